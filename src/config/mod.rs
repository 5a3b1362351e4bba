use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use time::{Duration, UtcOffset};

use crate::activity::{Bucket, GeoPoint};
use crate::clock::{parse_offset, Clock};

const APP_DOMAIN: &str = "io";
const APP_ORG: &str = "Meetup";
const APP_NAME: &str = "meetup";

pub struct ConfigLoader {
    paths: ConfigPaths,
}

impl ConfigLoader {
    pub fn discover() -> Result<Self> {
        let paths = ConfigPaths::discover()?;
        Ok(Self { paths })
    }

    pub fn from_paths(paths: ConfigPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &ConfigPaths {
        &self.paths
    }

    pub fn load_or_init(&self) -> Result<AppConfig> {
        self.paths.ensure_directories()?;
        if !self.paths.config_file.exists() {
            let mut default_cfg = AppConfig::default();
            default_cfg.post_load(&self.paths)?;
            self.write_default_config(&default_cfg)?;
            tracing::info!(path = %self.paths.config_file.display(), "wrote default config");
            return Ok(default_cfg);
        }

        self.load()
    }

    pub fn load(&self) -> Result<AppConfig> {
        let raw = fs::read_to_string(&self.paths.config_file)
            .with_context(|| format!("reading config {}", self.paths.config_file.display()))?;
        let mut cfg: AppConfig = toml::from_str(&raw).context("parsing config toml")?;
        cfg.post_load(&self.paths)?;
        Ok(cfg)
    }

    fn write_default_config(&self, cfg: &AppConfig) -> Result<()> {
        let toml = toml::to_string_pretty(cfg).context("serializing default config")?;
        if let Some(parent) = self.paths.config_file.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        let mut file = fs::File::create(&self.paths.config_file)
            .with_context(|| format!("creating config {}", self.paths.config_file.display()))?;
        file.write_all(toml.as_bytes())
            .context("writing default config")?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub config_dir: PathBuf,
    pub config_file: PathBuf,
    pub data_dir: PathBuf,
    pub database_path: PathBuf,
}

impl ConfigPaths {
    pub fn discover() -> Result<Self> {
        let override_config = env::var("MEETUP_CONFIG").ok().map(PathBuf::from);
        let override_data = env::var("MEETUP_DATA").ok().map(PathBuf::from);

        let project_dirs = ProjectDirs::from(APP_DOMAIN, APP_ORG, APP_NAME)
            .context("resolving XDG project directories")?;

        let config_dir = override_config
            .clone()
            .map(|p| {
                if p.is_dir() {
                    p
                } else {
                    p.parent().map(Path::to_path_buf).unwrap_or(p)
                }
            })
            .unwrap_or_else(|| project_dirs.config_dir().to_path_buf());

        let config_file = override_config
            .filter(|p| p.is_file() || p.extension().is_some())
            .unwrap_or_else(|| config_dir.join("config.toml"));

        let data_dir = override_data.unwrap_or_else(|| project_dirs.data_dir().to_path_buf());
        let database_path = data_dir.join("meetup.db");

        Ok(Self {
            config_dir,
            config_file,
            data_dir,
            database_path,
        })
    }

    /// Layout rooted at one directory, for tests and portable installs.
    pub fn rooted_at(root: &Path) -> Self {
        let config_dir = root.join("config");
        let data_dir = root.join("data");
        Self {
            config_file: config_dir.join("config.toml"),
            database_path: data_dir.join("meetup.db"),
            config_dir,
            data_dir,
        }
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [&self.config_dir, &self.data_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating application directory {}", dir.display()))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub user: UserOptions,
    pub timeline: TimelineOptions,
    pub activities: ActivityOptions,
    pub storage: StorageOptions,
    pub search: SearchOptions,
}

impl AppConfig {
    fn post_load(&mut self, paths: &ConfigPaths) -> Result<()> {
        self.storage
            .resolve(paths)
            .context("resolving storage paths")?;
        if parse_offset(&self.activities.utc_offset).is_none() {
            tracing::warn!(
                offset = %self.activities.utc_offset,
                "invalid utc_offset in config, falling back to UTC"
            );
            self.activities.utc_offset = DEFAULT_UTC_OFFSET.to_string();
        }
        if let Some(home) = self.activities.home() {
            if !home.is_valid() {
                tracing::warn!(?home, "home location out of range, ignoring");
                self.activities.home_latitude = None;
                self.activities.home_longitude = None;
            }
        }
        Ok(())
    }

    pub fn clock(&self) -> Clock {
        Clock::system(self.activities.offset())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UserOptions {
    /// Acting user id; `--as` on the command line takes precedence.
    pub id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineOptions {
    pub gap_ms: u64,
}

impl Default for TimelineOptions {
    fn default() -> Self {
        Self { gap_ms: 300_000 }
    }
}

impl TimelineOptions {
    pub fn gap(&self) -> Duration {
        Duration::milliseconds(i64::try_from(self.gap_ms).unwrap_or(i64::MAX))
    }
}

const DEFAULT_UTC_OFFSET: &str = "+00:00";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityOptions {
    pub default_bucket: Bucket,
    pub search_radius_m: f64,
    /// Offset used for "today"/"tomorrow" boundaries, e.g. `+08:00`.
    pub utc_offset: String,
    pub home_latitude: Option<f64>,
    pub home_longitude: Option<f64>,
}

impl Default for ActivityOptions {
    fn default() -> Self {
        Self {
            default_bucket: Bucket::Upcoming,
            search_radius_m: 25_000.0,
            utc_offset: DEFAULT_UTC_OFFSET.to_string(),
            home_latitude: None,
            home_longitude: None,
        }
    }
}

impl ActivityOptions {
    pub fn offset(&self) -> UtcOffset {
        parse_offset(&self.utc_offset).unwrap_or(UtcOffset::UTC)
    }

    pub fn home(&self) -> Option<GeoPoint> {
        match (self.home_latitude, self.home_longitude) {
            (Some(lat), Some(lng)) => Some(GeoPoint::new(lat, lng)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageOptions {
    #[serde(skip)]
    pub database_path: PathBuf,
    pub wal_autocheckpoint: u32,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            database_path: PathBuf::new(),
            wal_autocheckpoint: 1000,
        }
    }
}

impl StorageOptions {
    fn resolve(&mut self, paths: &ConfigPaths) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            self.database_path = paths.database_path.clone();
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchOptions {
    pub max_results: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self { max_results: 200 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use time::macros::offset;

    #[test]
    fn first_load_writes_defaults() -> Result<()> {
        let temp = TempDir::new()?;
        let loader = ConfigLoader::from_paths(ConfigPaths::rooted_at(temp.path()));
        let cfg = loader.load_or_init()?;
        assert!(loader.paths().config_file.exists());
        assert_eq!(cfg.timeline.gap(), Duration::minutes(5));
        assert_eq!(cfg.activities.default_bucket, Bucket::Upcoming);
        assert_eq!(cfg.storage.database_path, loader.paths().database_path);

        let reloaded = loader.load()?;
        assert_eq!(reloaded.search.max_results, cfg.search.max_results);
        Ok(())
    }

    #[test]
    fn partial_config_keeps_defaults_and_repairs_offset() -> Result<()> {
        let temp = TempDir::new()?;
        let paths = ConfigPaths::rooted_at(temp.path());
        paths.ensure_directories()?;
        fs::write(
            &paths.config_file,
            r#"
[user]
id = "alice"

[activities]
default_bucket = "weekend"
utc_offset = "eight hours ahead"
home_latitude = 37.77
home_longitude = -122.42
"#,
        )?;
        let cfg = ConfigLoader::from_paths(paths).load()?;
        assert_eq!(cfg.user.id.as_deref(), Some("alice"));
        assert_eq!(cfg.activities.default_bucket, Bucket::Weekend);
        assert_eq!(cfg.activities.utc_offset, "+00:00");
        assert_eq!(cfg.activities.home(), Some(GeoPoint::new(37.77, -122.42)));
        assert_eq!(cfg.timeline.gap_ms, 300_000);
        Ok(())
    }

    #[test]
    fn offset_drives_the_clock() {
        let mut cfg = AppConfig::default();
        cfg.activities.utc_offset = "+08:00".into();
        assert_eq!(cfg.clock().offset(), offset!(+8));
    }
}
