use std::path::PathBuf;

use anyhow::{Context, Result};
use chatline_client::TransportConfig;
use chatline_client::config::DEFAULT_RECONNECTION_ATTEMPTS;

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:3000";
pub const DEFAULT_DB_PATH: &str = "chatline.db";

#[derive(Debug, Clone)]
pub struct Config {
    pub server_url: String,
    pub db_path: PathBuf,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Register instead of logging in when no session is stored.
    pub register: bool,
    pub reconnect_attempts: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let reconnect_attempts = match var("CHATLINE_RECONNECT_ATTEMPTS") {
            Some(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("CHATLINE_RECONNECT_ATTEMPTS is not a number: {}", raw))?,
            None => DEFAULT_RECONNECTION_ATTEMPTS,
        };

        Ok(Self {
            server_url: var("CHATLINE_SERVER_URL").unwrap_or_else(|| DEFAULT_SERVER_URL.into()),
            db_path: PathBuf::from(var("CHATLINE_DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.into())),
            username: var("CHATLINE_USERNAME"),
            password: var("CHATLINE_PASSWORD"),
            register: var("CHATLINE_REGISTER").is_some_and(|v| v.trim() == "1"),
            reconnect_attempts,
        })
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            reconnection_attempts: self.reconnect_attempts,
            ..TransportConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.server_url, DEFAULT_SERVER_URL);
        assert_eq!(config.db_path, PathBuf::from(DEFAULT_DB_PATH));
        assert_eq!(config.username, None);
        assert!(!config.register);
        assert_eq!(config.transport().reconnection_attempts, DEFAULT_RECONNECTION_ATTEMPTS);
    }

    #[test]
    fn overrides() {
        let config = Config::from_lookup(lookup(&[
            ("CHATLINE_SERVER_URL", "https://chat.example.com"),
            ("CHATLINE_USERNAME", "alice"),
            ("CHATLINE_PASSWORD", ""),
            ("CHATLINE_REGISTER", "1"),
            ("CHATLINE_RECONNECT_ATTEMPTS", "2"),
        ]))
        .unwrap();
        assert_eq!(config.server_url, "https://chat.example.com");
        assert_eq!(config.username.as_deref(), Some("alice"));
        assert_eq!(config.password, None);
        assert!(config.register);
        assert_eq!(config.transport().reconnection_attempts, 2);
    }

    #[test]
    fn bad_attempt_count_is_an_error() {
        assert!(Config::from_lookup(lookup(&[("CHATLINE_RECONNECT_ATTEMPTS", "lots")])).is_err());
    }
}
