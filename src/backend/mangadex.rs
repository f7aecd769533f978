use log::debug;
use reqwest::Url;
use serde::Deserialize;
use indexmap::IndexMap;
use std::sync::Arc;

use super::config::Config;
use super::error::{Error, Result};
use super::transport::Transport;

/// One selectable chapter of a manga.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub id: String,
    pub name: String,
    pub sort_key: f64,
}

/// Chapters of one manga in reading order.
#[derive(Debug, Clone)]
pub struct Catalog {
    pub title: String,
    pub entries: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&CatalogEntry> {
        self.entries.get(index)
    }

    /// Clamps into `[0, len - 1]`, or 0 for an empty catalog.
    pub fn clamp(&self, index: i64) -> usize {
        let last = self.entries.len().saturating_sub(1) as i64;
        index.clamp(0, last.max(0)) as usize
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }
}

/// A chapter's page list and the server it is hosted on.
#[derive(Debug, Clone)]
pub struct ChapterDocument {
    pub server: Url,
    pub hash: String,
    pub pages: Vec<String>,
}

impl ChapterDocument {
    pub fn page_urls(&self, config: &Config) -> Vec<String> {
        let legacy = self
            .server
            .host_str()
            .is_some_and(|host| host.contains(&config.legacy_server_marker));
        let base = if legacy {
            config.fallback_data_url.as_str()
        } else {
            self.server.as_str()
        };
        let base = base.trim_end_matches('/');

        self.pages
            .iter()
            .map(|file| format!("{}/{}/{}", base, self.hash, file))
            .collect()
    }
}

#[derive(Debug, Deserialize)]
pub struct MangaResponse {
    manga: MangaInfo,
    #[serde(default)]
    chapter: IndexMap<String, ChapterInfo>,
}

#[derive(Debug, Deserialize)]
struct MangaInfo {
    title: String,
}

#[derive(Debug, Deserialize)]
struct ChapterInfo {
    #[serde(default)]
    volume: Option<String>,
    #[serde(default)]
    chapter: Option<String>,
    #[serde(default)]
    title: Option<String>,
    lang_code: String,
}

#[derive(Debug, Deserialize)]
struct ChapterResponse {
    hash: String,
    server: String,
    page_array: Vec<String>,
}

/// Pulls the numeric title id out of a `https://<host>/title/<id>/<slug>` url.
pub fn parse_title_id(source: &str, host_marker: &str) -> Option<u64> {
    let source = source.trim();
    if source.is_empty() {
        return None;
    }

    let url = Url::parse(source).ok()?;
    if !url.host_str()?.contains(host_marker) {
        return None;
    }

    let segments: Vec<&str> = url.path_segments()?.collect();
    if segments.len() < 2 {
        return None;
    }
    segments[1].parse().ok()
}

fn chapter_name(info: &ChapterInfo) -> String {
    let chapter = info.chapter.as_deref().unwrap_or_default();
    if chapter.is_empty() {
        return "Oneshot".to_string();
    }

    let volume = info.volume.as_deref().unwrap_or_default();
    let mut name = format!("Vol. {} Ch. {}", volume, chapter);
    if let Some(title) = info.title.as_deref().filter(|t| !t.is_empty()) {
        name.push_str(" - ");
        name.push_str(title);
    }
    name
}

/// The chapter number is the fourth space-separated token of the display
/// name; anything without one sorts as chapter 0.
pub fn sort_key(name: &str) -> f64 {
    let tokens: Vec<&str> = name.split(' ').collect();
    let number = if tokens.len() >= 4 { tokens[3] } else { "" };
    format!("0{}", number).parse().unwrap_or(0.0)
}

/// Entries with equal sort keys keep the order the API listed them in.
pub fn build_catalog(response: MangaResponse, language: &str) -> Catalog {
    let mut entries: Vec<CatalogEntry> = response
        .chapter
        .into_iter()
        .filter(|(_, info)| info.lang_code == language)
        .map(|(id, info)| {
            let name = chapter_name(&info);
            CatalogEntry {
                sort_key: sort_key(&name),
                id,
                name,
            }
        })
        .collect();

    entries.sort_by(|a, b| a.sort_key.total_cmp(&b.sort_key));

    Catalog {
        title: response.manga.title,
        entries,
    }
}

pub struct MangadexApi {
    transport: Arc<dyn Transport>,
    config: Arc<Config>,
}

impl MangadexApi {
    pub fn new(transport: Arc<dyn Transport>, config: Arc<Config>) -> Self {
        Self { transport, config }
    }

    pub async fn get_catalog(&self, title_id: u64) -> Result<Catalog> {
        let url = self.config.manga_endpoint(title_id);
        let body = self.transport.get(&url).await?;
        let response: MangaResponse = serde_json::from_slice(&body)?;

        let catalog = build_catalog(response, &self.config.language);
        debug!("Catalog {} has {} chapters", catalog.title, catalog.len());
        Ok(catalog)
    }

    pub async fn get_chapter(&self, chapter_id: &str) -> Result<ChapterDocument> {
        let url = self.config.chapter_endpoint(chapter_id);
        let body = self.transport.get(&url).await?;
        let response: ChapterResponse = serde_json::from_slice(&body)?;

        // Older chapters report the server relative to the site root.
        let server = Url::parse(&response.server)
            .or_else(|_| Url::parse(&self.config.api_base)?.join(&response.server))
            .map_err(|_| Error::InvalidUrl(response.server.clone()))?;

        Ok(ChapterDocument {
            server,
            hash: response.hash,
            pages: response.page_array,
        })
    }
}
