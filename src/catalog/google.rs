//! Google Books volumes API.

use super::{Candidate, CatalogSource};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

const SOURCE: &str = "google-books";

/// Google Books caps `maxResults` at 40.
const MAX_RESULTS: usize = 40;

#[derive(Debug, Deserialize)]
struct VolumesResponse {
    #[serde(default)]
    items: Vec<Volume>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Volume {
    #[serde(default)]
    volume_info: Option<VolumeInfo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VolumeInfo {
    title: Option<String>,
    #[serde(default)]
    authors: Vec<String>,
    image_links: Option<ImageLinks>,
    #[serde(default)]
    categories: Vec<String>,
    page_count: Option<u32>,
    description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageLinks {
    thumbnail: Option<String>,
    small_thumbnail: Option<String>,
}

impl From<VolumeInfo> for Candidate {
    fn from(info: VolumeInfo) -> Self {
        let cover_url = info
            .image_links
            .and_then(|links| links.thumbnail.or(links.small_thumbnail))
            .filter(|url| !url.trim().is_empty())
            .map(|url| secure_url(&url));

        Candidate {
            title: info.title.unwrap_or_default().trim().to_string(),
            author: info
                .authors
                .into_iter()
                .map(|a| a.trim().to_string())
                .find(|a| !a.is_empty()),
            cover_url,
            genres: info
                .categories
                .into_iter()
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect(),
            page_count: info.page_count.filter(|&p| p > 0),
            synopsis: info.description.filter(|d| !d.trim().is_empty()),
        }
    }
}

/// Google serves thumbnails over plain http.
fn secure_url(url: &str) -> String {
    match url.strip_prefix("http://") {
        Some(rest) => format!("https://{}", rest),
        None => url.to_string(),
    }
}

/// Rich metadata source: authors, thumbnails, categories, page counts and
/// descriptions.
#[derive(Debug, Clone)]
pub struct GoogleBooks {
    client: Client,
    base_url: String,
    language: Option<String>,
}

impl GoogleBooks {
    /// Create a client for the API at `base_url` (without `/volumes`).
    pub fn new(client: Client, base_url: &str, language: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            language,
        }
    }

    async fn volumes(&self, query: &str, limit: usize) -> Result<Vec<Candidate>> {
        let mut url = format!(
            "{}/volumes?q={}&maxResults={}",
            self.base_url,
            urlencoding::encode(query),
            limit.clamp(1, MAX_RESULTS)
        );
        if let Some(lang) = &self.language {
            url.push_str(&format!("&langRestrict={}", urlencoding::encode(lang)));
        }

        tracing::debug!(%url, "Querying Google Books");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AppError::source_unavailable(SOURCE, e))?;

        let body: VolumesResponse = response
            .json()
            .await
            .map_err(|e| AppError::source_unavailable(SOURCE, format!("invalid response: {}", e)))?;

        Ok(body
            .items
            .into_iter()
            .filter_map(|v| v.volume_info)
            .map(Candidate::from)
            .filter(|c| !c.title.is_empty())
            .take(limit)
            .collect())
    }
}

#[async_trait]
impl CatalogSource for GoogleBooks {
    fn name(&self) -> &'static str {
        SOURCE
    }

    async fn search_title(&self, title: &str, limit: usize) -> Result<Vec<Candidate>> {
        self.volumes(&format!("intitle:{}", title), limit).await
    }

    async fn search_author(&self, author: &str, limit: usize) -> Result<Vec<Candidate>> {
        self.volumes(&format!("inauthor:{}", author), limit).await
    }
}
