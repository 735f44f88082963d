use serde::Deserialize;
use std::path::Path;

use crate::sources::FeedSource;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Maximum number of items shown per source
    #[serde(default = "default_display_limit")]
    pub display_limit: usize,
    #[serde(default)]
    pub proxies: ProxyConfig,
    #[serde(default = "default_presets")]
    pub presets: Vec<PresetConfig>,
}

fn default_listen_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_display_limit() -> usize {
    50
}

/// The two relay services used to reach feeds that cannot be fetched directly.
#[derive(Debug, Deserialize, Clone)]
pub struct ProxyConfig {
    /// Converts a feed into `{ "items": [...] }`
    #[serde(default = "default_json_endpoint")]
    pub json_endpoint: String,
    /// Returns the raw feed body as `{ "contents": "..." }`
    #[serde(default = "default_raw_endpoint")]
    pub raw_endpoint: String,
    /// Per-request timeout in seconds; unset means wait indefinitely
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_json_endpoint() -> String {
    "https://api.rss2json.com/v1/api.json".to_string()
}

fn default_raw_endpoint() -> String {
    "https://api.allorigins.win/get".to_string()
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            json_endpoint: default_json_endpoint(),
            raw_endpoint: default_raw_endpoint(),
            timeout_secs: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PresetConfig {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub website: Option<String>,
}

impl PresetConfig {
    fn new(name: &str, url: &str, website: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            website: Some(website.to_string()),
        }
    }
}

fn default_presets() -> Vec<PresetConfig> {
    vec![
        PresetConfig::new(
            "Mobile Gamer",
            "https://mobilegamer.biz/feed",
            "https://mobilegamer.biz/",
        ),
        PresetConfig::new(
            "游戏矩阵",
            "https://shouyoujz.com/feed",
            "https://shouyoujz.com/",
        ),
        PresetConfig::new(
            "GamesIndustry.biz",
            "https://www.gamesindustry.biz/feed",
            "https://www.gamesindustry.biz/",
        ),
        PresetConfig::new(
            "GameDeveloper",
            "https://www.gamedeveloper.com/rss.xml",
            "https://www.gamedeveloper.com/",
        ),
        PresetConfig::new(
            "Pocket Gamer",
            "https://www.pocketgamer.com/news/index.rss",
            "https://www.pocketgamer.com/",
        ),
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            display_limit: default_display_limit(),
            proxies: ProxyConfig::default(),
            presets: default_presets(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load the file if it exists, otherwise use the built-in defaults
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

    /// Built-in sources, flagged as presets, in configured order
    pub fn preset_sources(&self) -> Vec<FeedSource> {
        self.presets
            .iter()
            .map(|preset| FeedSource {
                name: preset.name.clone(),
                url: preset.url.clone(),
                website: preset.website.clone(),
                is_preset: true,
            })
            .collect()
    }
}
