use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

const APP_DIR: &str = "mangadex-reader";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base: String,
    pub catalog_host: String,
    pub language: String,
    pub legacy_server_marker: String,
    pub fallback_data_url: String,
    pub cache_dir: PathBuf,
    pub positions_file: PathBuf,
    pub slot_width: u32,
    pub page_timeout_ms: Option<u64>,
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        let config_dir = app_dir(dirs::config_dir());

        Self {
            api_base: "https://mangadex.cc/api/".to_string(),
            catalog_host: "mangadex".to_string(),
            language: "gb".to_string(),
            legacy_server_marker: "s4".to_string(),
            fallback_data_url: "https://s5.mangadex.org/data".to_string(),
            cache_dir: app_dir(dirs::cache_dir()).join("pages"),
            positions_file: config_dir.join("positions.json"),
            slot_width: 800,
            page_timeout_ms: None,
            user_agent: format!("mangadex-reader/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

fn app_dir(base: Option<PathBuf>) -> PathBuf {
    base.unwrap_or_else(|| PathBuf::from(".")).join(APP_DIR)
}

pub fn config_path() -> PathBuf {
    app_dir(dirs::config_dir()).join("config.json")
}

impl Config {
    /// Reads `config.json` from the user config directory, falling back to
    /// defaults when the file is missing or unreadable.
    pub fn load() -> Self {
        let path = config_path();

        if !path.exists() {
            return Config::default();
        }

        match fs::read_to_string(&path).map(|content| serde_json::from_str(&content)) {
            Ok(Ok(config)) => config,
            Ok(Err(e)) => {
                warn!("Ignoring invalid config {}: {}", path.display(), e);
                Config::default()
            }
            Err(e) => {
                warn!("Failed to read config {}: {}", path.display(), e);
                Config::default()
            }
        }
    }

    pub fn manga_endpoint(&self, title_id: u64) -> String {
        format!("{}manga/{}", self.api_base, title_id)
    }

    pub fn chapter_endpoint(&self, chapter_id: &str) -> String {
        format!("{}chapter/{}", self.api_base, urlencoding::encode(chapter_id))
    }

    pub fn page_timeout(&self) -> Option<Duration> {
        self.page_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: Config = serde_json::from_str(r#"{ "language": "fr" }"#).unwrap();

        assert_eq!(config.language, "fr");
        assert_eq!(config.catalog_host, "mangadex");
        assert_eq!(config.slot_width, 800);
        assert!(config.page_timeout().is_none());
    }

    #[test]
    fn endpoints_follow_api_base() {
        let config = Config::default();

        assert_eq!(config.manga_endpoint(42), "https://mangadex.cc/api/manga/42");
        assert_eq!(
            config.chapter_endpoint("1234"),
            "https://mangadex.cc/api/chapter/1234"
        );
    }
}
