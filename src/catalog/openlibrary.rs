//! OpenLibrary search API.

use super::{Candidate, CatalogSource};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

const SOURCE: &str = "openlibrary";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    docs: Vec<Doc>,
}

#[derive(Debug, Default, Deserialize)]
struct Doc {
    title: Option<String>,
    #[serde(default)]
    author_name: Vec<String>,
    cover_i: Option<i64>,
    #[serde(default)]
    subject: Vec<String>,
    number_of_pages_median: Option<u32>,
}

/// OpenLibrary filters by MARC language codes.
fn marc_language(lang: &str) -> String {
    match lang.to_ascii_lowercase().as_str() {
        "pt" => "por",
        "en" => "eng",
        "es" => "spa",
        "fr" => "fre",
        "de" => "ger",
        "it" => "ita",
        other => return other.to_string(),
    }
    .to_string()
}

/// Broad coverage source. Provides covers by numeric id and subjects, and
/// has no synopsis.
#[derive(Debug, Clone)]
pub struct OpenLibrary {
    client: Client,
    base_url: String,
    covers_url: String,
    language: Option<String>,
    max_subjects: usize,
}

impl OpenLibrary {
    /// Create a client for the search API at `base_url` and covers at
    /// `covers_url`.
    pub fn new(
        client: Client,
        base_url: &str,
        covers_url: &str,
        language: Option<String>,
        max_subjects: usize,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            covers_url: covers_url.trim_end_matches('/').to_string(),
            language,
            max_subjects,
        }
    }

    fn to_candidate(&self, doc: Doc) -> Candidate {
        Candidate {
            title: doc.title.unwrap_or_default().trim().to_string(),
            author: doc
                .author_name
                .into_iter()
                .map(|a| a.trim().to_string())
                .find(|a| !a.is_empty()),
            cover_url: doc
                .cover_i
                .filter(|&id| id > 0)
                .map(|id| format!("{}/b/id/{}-M.jpg", self.covers_url, id)),
            genres: doc
                .subject
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .take(self.max_subjects)
                .collect(),
            page_count: doc.number_of_pages_median.filter(|&p| p > 0),
            synopsis: None,
        }
    }
}

#[async_trait]
impl CatalogSource for OpenLibrary {
    fn name(&self) -> &'static str {
        SOURCE
    }

    async fn search_title(&self, title: &str, limit: usize) -> Result<Vec<Candidate>> {
        let mut url = format!(
            "{}/search.json?title={}&limit={}",
            self.base_url,
            urlencoding::encode(title),
            limit.max(1)
        );
        if let Some(lang) = &self.language {
            url.push_str(&format!("&lang={}", urlencoding::encode(&marc_language(lang))));
        }

        tracing::debug!(%url, "Querying OpenLibrary");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AppError::source_unavailable(SOURCE, e))?;

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| AppError::source_unavailable(SOURCE, format!("invalid response: {}", e)))?;

        Ok(body
            .docs
            .into_iter()
            .map(|doc| self.to_candidate(doc))
            .filter(|c| !c.title.is_empty())
            .take(limit)
            .collect())
    }
}
