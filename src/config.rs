use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_RELAY: &str = "https://allorigins.hexlet.app/get";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Delay between the end of one poll of a feed and the start of the next
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// CORS relay used for every fetch; an empty string fetches directly
    #[serde(default = "default_proxy_url")]
    pub proxy_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Feeds submitted at start-up
    #[serde(default)]
    pub feeds: Vec<FeedConfig>,
}

fn default_poll_interval_ms() -> u64 {
    5000
}

fn default_proxy_url() -> String {
    DEFAULT_RELAY.to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_bind_address() -> String {
    "0.0.0.0:3000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeedConfig {
    pub url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            proxy_url: default_proxy_url(),
            request_timeout_secs: default_request_timeout_secs(),
            bind_address: default_bind_address(),
            feeds: Vec::new(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn relay(&self) -> Option<&str> {
        let relay = self.proxy_url.trim();
        if relay.is_empty() {
            None
        } else {
            Some(relay)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = Config::from_str("").unwrap();

        assert_eq!(config.poll_interval_ms, 5000);
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.relay(), Some(DEFAULT_RELAY));
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.bind_address, "0.0.0.0:3000");
        assert!(config.feeds.is_empty());
    }

    #[test]
    fn test_load_valid_config() {
        let content = r#"
            poll_interval_ms = 60000
            proxy_url = "https://relay.example.com/get"
            request_timeout_secs = 10
            bind_address = "127.0.0.1:8080"

            [[feeds]]
            url = "https://example.com/feed.xml"

            [[feeds]]
            url = "https://example.org/rss"
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.poll_interval(), Duration::from_secs(60));
        assert_eq!(config.relay(), Some("https://relay.example.com/get"));
        assert_eq!(config.request_timeout_secs, 10);
        assert_eq!(config.bind_address, "127.0.0.1:8080");
        assert_eq!(config.feeds.len(), 2);
        assert_eq!(config.feeds[0].url, "https://example.com/feed.xml");
        assert_eq!(config.feeds[1].url, "https://example.org/rss");
    }

    #[test]
    fn test_empty_proxy_disables_relay() {
        let config = Config::from_str(r#"proxy_url = """#).unwrap();
        assert_eq!(config.relay(), None);
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = Config::load("/nonexistent/path/config.toml");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = Config::load_or_default("/nonexistent/path/config.toml").unwrap();
        assert_eq!(config.poll_interval_ms, 5000);
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let content = "this is not valid toml {{{";

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(content.as_bytes()).unwrap();

        let result = Config::load(temp_file.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_feed_missing_url() {
        let content = r#"
            [[feeds]]
            name = "Test Feed"
        "#;

        let result = Config::from_str(content);
        assert!(result.is_err());
    }
}
