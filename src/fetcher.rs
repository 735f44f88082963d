use std::time::Duration;

use anyhow::bail;
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use feed_rs::parser;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::config::ProxyConfig;

/// Shown when an item has no usable title
pub const UNTITLED: &str = "(untitled)";

// Offsets written without a colon, which RFC 3339 rejects
const OFFSET_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%z", "%Y-%m-%d %H:%M:%S%z"];

// Date-times without an offset are read as local time
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewsItem {
    pub title: String,
    pub link: String,
    /// `YYYY-MM-DD HH:MM` local time, or empty
    pub time: String,
}

impl NewsItem {
    fn new(title: Option<String>, link: Option<String>, time: String) -> Self {
        Self {
            title: title
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| UNTITLED.to_string()),
            link: link.unwrap_or_default(),
            time,
        }
    }
}

/// One element of the JSON proxy's `items` array
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JsonItem {
    pub title: Option<String>,
    pub link: Option<String>,
    pub pub_date: Option<String>,
}

impl JsonItem {
    /// Fields that are missing or not strings are left empty
    fn from_value(value: &Value) -> Self {
        let field = |name: &str| value.get(name).and_then(Value::as_str).map(str::to_string);
        Self {
            title: field("title"),
            link: field("link"),
            pub_date: field("pubDate"),
        }
    }
}

#[derive(Deserialize)]
struct ItemsEnvelope {
    #[serde(default)]
    items: Option<Value>,
}

#[derive(Deserialize)]
struct ContentsEnvelope {
    #[serde(default)]
    contents: Option<String>,
}

/// A decoded proxy response, one variant per proxy shape
#[derive(Debug, Clone)]
pub enum ProxyPayload {
    /// Items already extracted by the converting proxy
    Items(Vec<JsonItem>),
    /// Raw RSS/Atom text relayed by the pass-through proxy
    Document(String),
}

impl ProxyPayload {
    pub fn from_json_proxy(body: &[u8]) -> anyhow::Result<Self> {
        let envelope: ItemsEnvelope = serde_json::from_slice(body)?;
        match envelope.items {
            Some(Value::Array(items)) => {
                Ok(Self::Items(items.iter().map(JsonItem::from_value).collect()))
            }
            Some(_) => bail!("`items` is not an array"),
            None => bail!("response has no `items`"),
        }
    }

    pub fn from_raw_proxy(body: &[u8]) -> anyhow::Result<Self> {
        let envelope: ContentsEnvelope = serde_json::from_slice(body)?;
        match envelope.contents {
            Some(contents) => Ok(Self::Document(contents)),
            None => bail!("response has no `contents`"),
        }
    }

    pub fn into_news_items(self) -> anyhow::Result<Vec<NewsItem>> {
        match self {
            Self::Items(items) => Ok(items
                .into_iter()
                .map(|item| {
                    let time = item.pub_date.as_deref().map(format_date).unwrap_or_default();
                    NewsItem::new(item.title, item.link, time)
                })
                .collect()),
            Self::Document(contents) => {
                let feed = parser::Builder::new()
                    .timestamp_parser(parse_date)
                    .build()
                    .parse(contents.as_bytes())?;
                Ok(feed
                    .entries
                    .into_iter()
                    .map(|entry| {
                        let title = entry.title.map(|t| t.content);
                        // RSS <link> text and Atom href both land in `href`
                        let link = entry
                            .links
                            .into_iter()
                            .next()
                            .map(|l| l.href)
                            .filter(|href| !href.is_empty());
                        // Timestamps were read with `parse_date`, like the JSON path
                        let time = entry
                            .published
                            .or(entry.updated)
                            .map(format_datetime)
                            .unwrap_or_default();
                        NewsItem::new(title, link, time)
                    })
                    .collect())
            }
        }
    }
}

/// Parse a feed timestamp in any of the common shapes feeds and proxies emit
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(raw, format) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Local
                .from_local_datetime(&naive)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date
            .and_hms_opt(0, 0, 0)
            .map(|naive| Utc.from_utc_datetime(&naive));
    }

    None
}

pub fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

/// `YYYY-MM-DD HH:MM` in local time, or empty when `raw` is not a date
pub fn format_date(raw: &str) -> String {
    parse_date(raw).map(format_datetime).unwrap_or_default()
}

pub struct Fetcher {
    client: Client,
    json_endpoint: String,
    raw_endpoint: String,
}

impl Fetcher {
    pub fn new(proxies: &ProxyConfig) -> anyhow::Result<Self> {
        let mut builder = Client::builder().user_agent("Newsboard/1.0 (RSS Reader)");
        if let Some(secs) = proxies.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        Ok(Self {
            client: builder.build()?,
            json_endpoint: proxies.json_endpoint.clone(),
            raw_endpoint: proxies.raw_endpoint.clone(),
        })
    }

    /// Fetch and normalize a feed. Never fails: total failure is an empty list.
    ///
    /// The pass-through proxy is only tried after the converting proxy has failed.
    /// The list is not truncated here.
    pub async fn fetch(&self, feed_url: &str) -> Vec<NewsItem> {
        match self.fetch_via_json_proxy(feed_url).await {
            Ok(items) => {
                debug!("JSON proxy returned {} items for {}", items.len(), feed_url);
                return items;
            }
            Err(e) => warn!("JSON proxy failed for {}: {}", feed_url, e),
        }

        match self.fetch_via_raw_proxy(feed_url).await {
            Ok(items) => {
                debug!("Raw proxy returned {} items for {}", items.len(), feed_url);
                items
            }
            Err(e) => {
                error!("Both proxies failed for {}: {}", feed_url, e);
                Vec::new()
            }
        }
    }

    async fn fetch_via_json_proxy(&self, feed_url: &str) -> anyhow::Result<Vec<NewsItem>> {
        let response = self
            .client
            .get(&self.json_endpoint)
            .query(&[("rss_url", feed_url)])
            .send()
            .await?;
        let bytes = response.bytes().await?;

        ProxyPayload::from_json_proxy(&bytes)?.into_news_items()
    }

    async fn fetch_via_raw_proxy(&self, feed_url: &str) -> anyhow::Result<Vec<NewsItem>> {
        let response = self
            .client
            .get(&self.raw_endpoint)
            .query(&[("url", feed_url)])
            .send()
            .await?;
        let bytes = response.bytes().await?;

        ProxyPayload::from_raw_proxy(&bytes)?.into_news_items()
    }
}
