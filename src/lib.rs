pub mod activity;
pub mod chat;
pub mod cli;
pub mod clock;
pub mod config;
pub mod feed;
pub mod profile;
pub mod search;
pub mod storage;

pub use config::{AppConfig, ConfigLoader, ConfigPaths};
