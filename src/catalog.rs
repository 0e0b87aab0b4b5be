//! Book catalog search across Google Books and OpenLibrary.
//!
//! A search queries both sources with the same title and merges the two
//! result lists into one candidate list keyed by normalized title:
//!
//! 1. Google Books (authors, thumbnail, categories, page count, description)
//! 2. OpenLibrary (wider coverage, numeric cover ids, subjects)
//! 3. Results sharing a key are coalesced, filling only missing fields
//! 4. Too few candidates: re-query Google Books with significant title words
//! 5. Still too few: treat those words as author names
//! 6. Similar titles are grouped transitively and merged into one record
//! 7. Missing required fields get placeholder values
//!
//! Failures of a single source or a broadening query only drop that batch.
//! Only when both primary queries fail does the search fail.

mod google;
mod merge;
mod openlibrary;

pub use google::GoogleBooks;
pub use merge::{
    CandidatePool, fill_missing, merge_group, normalize_title, significant_words,
    similarity_groups, titles_similar, union_genres,
};
pub use openlibrary::OpenLibrary;

use crate::config::CatalogConfig;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Cover shown when no source has one.
pub const PLACEHOLDER_COVER: &str = "/placeholder.svg";
/// Title used when no source has one.
pub const UNKNOWN_TITLE: &str = "Unknown Title";
/// Author used when no source has one.
pub const UNKNOWN_AUTHOR: &str = "Unknown Author";

const HTTP_USER_AGENT: &str = concat!("bookshelf-rs/", env!("CARGO_PKG_VERSION"));

/// A search result as returned by one source, before defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Candidate {
    /// Title as the source spells it.
    pub title: String,
    /// First listed author.
    pub author: Option<String>,
    /// Cover image URL.
    pub cover_url: Option<String>,
    /// Categories or subjects.
    pub genres: Vec<String>,
    /// Page count.
    pub page_count: Option<u32>,
    /// Description.
    pub synopsis: Option<String>,
}

/// A search candidate offered to the user for adoption into a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookApiResult {
    /// Book title.
    pub title: String,
    /// Primary author.
    pub author: String,
    /// Cover image URL or [`PLACEHOLDER_COVER`].
    pub cover_url: String,
    /// Genres, without duplicates.
    #[serde(default)]
    pub genres: Vec<String>,
    /// Page count.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,
    /// Synopsis.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synopsis: Option<String>,
}

/// Result counts and thresholds driving the search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchTuning {
    /// Max results requested from each source on the primary query.
    pub source_limit: usize,
    /// Max results requested per broadening query.
    pub broaden_limit: usize,
    /// Broaden the search while fewer candidates than this were found.
    pub min_candidates: usize,
    /// Author broadening stops at this many candidates.
    pub max_candidates: usize,
    /// Title words tried as variations.
    pub max_variations: usize,
    /// Words must be longer than this to be tried.
    pub significant_word_len: usize,
    /// Shared leading characters that make two titles similar.
    pub prefix_len: usize,
    /// OpenLibrary subjects kept per result.
    pub max_subjects: usize,
}

impl Default for SearchTuning {
    fn default() -> Self {
        Self {
            source_limit: 15,
            broaden_limit: 5,
            min_candidates: 3,
            max_candidates: 10,
            max_variations: 3,
            significant_word_len: 3,
            prefix_len: 5,
            max_subjects: 5,
        }
    }
}

/// An external book metadata provider.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Search by title.
    async fn search_title(&self, title: &str, limit: usize) -> Result<Vec<Candidate>>;

    /// Search by author. Sources without author search report themselves
    /// unavailable for it.
    async fn search_author(&self, _author: &str, _limit: usize) -> Result<Vec<Candidate>> {
        Err(AppError::source_unavailable(
            self.name(),
            "author search is not supported",
        ))
    }
}

/// Merges search results from a rich and a broad metadata source.
#[derive(Clone)]
pub struct CatalogAggregator {
    rich: Arc<dyn CatalogSource>,
    broad: Arc<dyn CatalogSource>,
    tuning: SearchTuning,
    request_timeout: Duration,
}

impl CatalogAggregator {
    /// Create an aggregator over two sources.
    pub fn new(
        rich: Arc<dyn CatalogSource>,
        broad: Arc<dyn CatalogSource>,
        tuning: SearchTuning,
        request_timeout: Duration,
    ) -> Self {
        Self {
            rich,
            broad,
            tuning,
            request_timeout,
        }
    }

    /// Build the Google Books + OpenLibrary aggregator from configuration.
    pub fn from_config(config: &CatalogConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_seconds.max(1));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(HTTP_USER_AGENT)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;

        let rich = GoogleBooks::new(
            client.clone(),
            &config.google_books_url,
            config.language.clone(),
        );
        let broad = OpenLibrary::new(
            client,
            &config.open_library_url,
            &config.open_library_covers_url,
            config.language.clone(),
            config.tuning.max_subjects,
        );

        Ok(Self::new(
            Arc::new(rich),
            Arc::new(broad),
            config.tuning,
            timeout,
        ))
    }

    /// Search both sources for a title and return merged candidates.
    ///
    /// Every returned result has a non-empty title, author and cover URL.
    pub async fn search_by_title(&self, title: &str) -> Result<Vec<BookApiResult>> {
        let title = title.trim();
        if title.is_empty() {
            return Err(AppError::Validation(
                "Enter a book title to search".to_string(),
            ));
        }

        let tuning = &self.tuning;
        let (rich, broad) = tokio::join!(
            self.guarded(self.rich.name(), self.rich.search_title(title, tuning.source_limit)),
            self.guarded(
                self.broad.name(),
                self.broad.search_title(title, tuning.source_limit)
            ),
        );

        let mut pool = CandidatePool::new(tuning.prefix_len);
        match (rich, broad) {
            (Err(rich_err), Err(broad_err)) => {
                tracing::warn!(title, rich = %rich_err, broad = %broad_err, "All catalog sources failed");
                return Err(AppError::SearchFailed(format!(
                    "{}; {}",
                    rich_err, broad_err
                )));
            }
            (rich, broad) => {
                for (source, batch) in [(self.rich.name(), rich), (self.broad.name(), broad)] {
                    match batch {
                        Ok(results) => {
                            tracing::debug!(source, count = results.len(), "Primary results");
                            for candidate in results {
                                pool.insert_or_fill(candidate);
                            }
                        }
                        Err(e) => {
                            tracing::warn!(source, title, error = %e, "Catalog source failed, continuing without it");
                        }
                    }
                }
            }
        }

        if pool.len() < tuning.min_candidates {
            self.broaden_by_title_words(title, &mut pool).await;
        }

        if pool.len() < tuning.min_candidates {
            self.broaden_by_author(title, &mut pool).await;
        }

        pool.merge_similar();
        let results = pool.finish();
        tracing::info!(title, count = results.len(), "Catalog search finished");
        Ok(results)
    }

    /// Re-query the rich source with single significant title words.
    async fn broaden_by_title_words(&self, title: &str, pool: &mut CandidatePool) {
        let words = significant_words(title, self.tuning.significant_word_len);
        for word in words.iter().take(self.tuning.max_variations) {
            if word.eq_ignore_ascii_case(title) {
                continue;
            }
            let batch = self
                .guarded(
                    self.rich.name(),
                    self.rich.search_title(word, self.tuning.broaden_limit),
                )
                .await;
            match batch {
                Ok(results) => {
                    for candidate in results {
                        pool.fill_similar_or_insert(candidate);
                    }
                }
                Err(e) => {
                    tracing::debug!(variation = %word, error = %e, "Skipping title variation");
                }
            }
        }
    }

    /// Treat significant title words as author names.
    async fn broaden_by_author(&self, title: &str, pool: &mut CandidatePool) {
        let words = significant_words(title, self.tuning.significant_word_len);
        for word in &words {
            if pool.len() >= self.tuning.max_candidates {
                break;
            }
            let batch = self
                .guarded(
                    self.rich.name(),
                    self.rich.search_author(word, self.tuning.broaden_limit),
                )
                .await;
            match batch {
                Ok(results) => {
                    for candidate in results {
                        if pool.len() >= self.tuning.max_candidates {
                            break;
                        }
                        pool.insert_new(candidate);
                    }
                }
                Err(e) => {
                    tracing::debug!(author = %word, error = %e, "Skipping author query");
                }
            }
        }
    }

    /// Bound a source call by the request timeout.
    async fn guarded<F>(&self, source: &'static str, call: F) -> Result<Vec<Candidate>>
    where
        F: Future<Output = Result<Vec<Candidate>>>,
    {
        match tokio::time::timeout(self.request_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(AppError::source_unavailable(
                source,
                format!("timed out after {:?}", self.request_timeout),
            )),
        }
    }
}
