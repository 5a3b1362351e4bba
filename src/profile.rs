use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub username: String,
    pub full_name: Option<String>,
    pub website: Option<String>,
    pub avatar_url: Option<String>,
}

impl Profile {
    pub fn display_name(&self) -> String {
        display_name(Some(self), &self.id)
    }
}

/// Name shown for a user, falling back to `User <id>` when no profile or
/// username is known.
pub fn display_name(profile: Option<&Profile>, user_id: &str) -> String {
    profile
        .map(|p| p.username.trim())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("User {user_id}"))
}
