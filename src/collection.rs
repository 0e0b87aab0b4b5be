//! Per-user book collections: search, adoption, views and updates.

use crate::catalog::{BookApiResult, CatalogAggregator};
use crate::db::{BookPatch, BookRecord, BookStore, NewBook, ReadingStatus, now_timestamp};
use crate::error::{AppError, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use unicode_normalization::{UnicodeNormalization, char::is_combining_mark};

/// Which statuses a list view shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusFilter {
    /// Every book.
    #[default]
    All,
    /// Books with exactly this status.
    Only(ReadingStatus),
}

impl FromStr for StatusFilter {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "" | "All" | "all" | "Todos" => Ok(StatusFilter::All),
            other => other.parse().map(StatusFilter::Only),
        }
    }
}

/// List ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOption {
    /// Reading, then unread, then read.
    #[default]
    Status,
    /// Highest rating first; unrated counts as zero.
    Rating,
    /// Alphabetical.
    Title,
    /// Favorites first.
    Favorite,
}

impl FromStr for SortOption {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "status" => Ok(SortOption::Status),
            "rating" => Ok(SortOption::Rating),
            "title" => Ok(SortOption::Title),
            "favorite" | "favorites" => Ok(SortOption::Favorite),
            other => Err(AppError::Validation(format!("Unknown sort option: {}", other))),
        }
    }
}

/// Accent and case-insensitive collation key.
fn collation_key(title: &str) -> String {
    title
        .trim()
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Compare titles the way a reader expects: "Éramos" sorts next to "Eramos",
/// case does not matter. Ties fall back to the raw strings so the order is
/// total.
pub fn compare_titles(a: &str, b: &str) -> Ordering {
    collation_key(a)
        .cmp(&collation_key(b))
        .then_with(|| a.cmp(b))
}

/// Keep books matching the filter, preserving order.
pub fn filter(records: &[BookRecord], status: StatusFilter) -> Vec<BookRecord> {
    match status {
        StatusFilter::All => records.to_vec(),
        StatusFilter::Only(s) => records.iter().filter(|r| r.status == s).cloned().collect(),
    }
}

/// Keep books whose title or author contains `term`, ignoring case and
/// accents. A blank term keeps everything.
pub fn search_records(records: &[BookRecord], term: &str) -> Vec<BookRecord> {
    let term = collation_key(term);
    if term.is_empty() {
        return records.to_vec();
    }
    records
        .iter()
        .filter(|r| collation_key(&r.title).contains(&term) || collation_key(&r.author).contains(&term))
        .cloned()
        .collect()
}

/// Sort in place. The sort is stable.
pub fn sort(records: &mut [BookRecord], option: SortOption) {
    match option {
        SortOption::Status => records.sort_by(|a, b| {
            a.status
                .sort_priority()
                .cmp(&b.status.sort_priority())
                .then_with(|| compare_titles(&a.title, &b.title))
        }),
        SortOption::Rating => records.sort_by(|a, b| {
            b.rating
                .unwrap_or(0.0)
                .total_cmp(&a.rating.unwrap_or(0.0))
                .then_with(|| compare_titles(&a.title, &b.title))
        }),
        SortOption::Title => records.sort_by(|a, b| compare_titles(&a.title, &b.title)),
        SortOption::Favorite => records.sort_by(|a, b| {
            b.favorite
                .cmp(&a.favorite)
                .then_with(|| compare_titles(&a.title, &b.title))
        }),
    }
}

/// Counters shown on the collection home page.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionStats {
    /// Books in the collection.
    pub total: usize,
    /// Books being read.
    pub reading: usize,
    /// Books not started.
    pub unread: usize,
    /// Books finished.
    pub read: usize,
    /// Books marked favorite.
    pub favorites: usize,
    /// Mean over rated books only.
    pub average_rating: Option<f32>,
}

/// Count books per status and average the ratings.
pub fn stats(records: &[BookRecord]) -> CollectionStats {
    let mut stats = CollectionStats {
        total: records.len(),
        ..Default::default()
    };
    let mut rating_sum = 0.0f32;
    let mut rated = 0usize;

    for r in records {
        match r.status {
            ReadingStatus::Reading => stats.reading += 1,
            ReadingStatus::Unread => stats.unread += 1,
            ReadingStatus::Read => stats.read += 1,
        }
        if r.favorite {
            stats.favorites += 1;
        }
        if let Some(rating) = r.rating {
            rating_sum += rating;
            rated += 1;
        }
    }
    if rated > 0 {
        stats.average_rating = Some(rating_sum / rated as f32);
    }
    stats
}

/// Drives the search, adopt, list and update flows for every user.
///
/// Keeps the last listed collection of each user in memory. The cached
/// list only changes after the store accepted a write.
pub struct CollectionManager {
    store: Arc<dyn BookStore>,
    catalog: CatalogAggregator,
    cache: RwLock<HashMap<String, Vec<BookRecord>>>,
}

impl CollectionManager {
    /// Create a manager over a store and a catalog.
    pub fn new(store: Arc<dyn BookStore>, catalog: CatalogAggregator) -> Self {
        Self {
            store,
            catalog,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Search the catalog for candidates to adopt.
    pub async fn search(&self, title: &str) -> Result<Vec<BookApiResult>> {
        self.catalog.search_by_title(title).await
    }

    /// Adopt a search result into a user's collection. Returns the new ID.
    pub async fn add(
        &self,
        selected: BookApiResult,
        status: ReadingStatus,
        rating: Option<f32>,
        notes: Option<String>,
        user_id: &str,
    ) -> Result<String> {
        let book = NewBook {
            title: selected.title,
            author: selected.author,
            cover_url: selected.cover_url,
            genres: selected.genres,
            page_count: selected.page_count,
            synopsis: selected.synopsis,
            status,
            rating,
            user_id: user_id.to_string(),
            notes: notes.filter(|n| !n.trim().is_empty()),
            language: None,
            favorite: false,
        };
        book.validate()?;

        let id = self.store.create(book).await?;
        tracing::info!(user_id, book_id = %id, "Book added to collection");

        match self.store.get(&id).await {
            Ok(Some(record)) => self.with_cached(user_id, |list| list.push(record)),
            _ => self.forget_user(user_id),
        }
        Ok(id)
    }

    /// All books of a user, in creation order.
    ///
    /// Served from the cached list when one exists. Otherwise the store is
    /// read and the result cached until the user signs out.
    pub async fn list(&self, user_id: &str) -> Result<Vec<BookRecord>> {
        if let Some(records) = self.cached(user_id) {
            return Ok(records);
        }
        let records = self.store.list_by_user(user_id).await?;
        self.cache
            .write()
            .insert(user_id.to_string(), records.clone());
        Ok(records)
    }

    /// Cached collection of a user, if any.
    pub fn cached(&self, user_id: &str) -> Option<Vec<BookRecord>> {
        self.cache.read().get(user_id).cloned()
    }

    /// Drop the cached collection of a user.
    pub fn forget_user(&self, user_id: &str) {
        self.cache.write().remove(user_id);
    }

    /// One of the user's books.
    pub async fn get(&self, user_id: &str, id: &str) -> Result<BookRecord> {
        match self.store.get(id).await? {
            Some(record) if record.user_id == user_id => Ok(record),
            Some(_) => {
                tracing::warn!(user_id, book_id = id, "Access to another user's book");
                Err(AppError::NotFound(id.to_string()))
            }
            None => Err(AppError::NotFound(id.to_string())),
        }
    }

    /// Change the present fields of a book and return the updated record.
    pub async fn update_fields(
        &self,
        user_id: &str,
        id: &str,
        patch: &BookPatch,
    ) -> Result<BookRecord> {
        patch.validate()?;
        let mut record = self.get(user_id, id).await?;
        if patch.is_empty() {
            return Ok(record);
        }

        self.store.update(id, patch).await?;
        patch.apply_to(&mut record);
        record.updated_at = now_timestamp();
        tracing::debug!(user_id, book_id = id, "Book updated");

        let updated = record.clone();
        self.with_cached(user_id, |list| {
            if let Some(slot) = list.iter_mut().find(|r| r.id == updated.id) {
                *slot = updated;
            }
        });
        Ok(record)
    }

    /// Flip the favorite flag of a book.
    pub async fn toggle_favorite(&self, user_id: &str, id: &str) -> Result<BookRecord> {
        let record = self.get(user_id, id).await?;
        self.update_fields(user_id, id, &BookPatch::favorite(!record.favorite))
            .await
    }

    /// Delete a book. This can not be undone.
    pub async fn remove(&self, user_id: &str, id: &str) -> Result<()> {
        self.get(user_id, id).await?;
        self.store.delete(id).await?;
        tracing::info!(user_id, book_id = id, "Book removed from collection");

        self.with_cached(user_id, |list| list.retain(|r| r.id != id));
        Ok(())
    }

    fn with_cached(&self, user_id: &str, f: impl FnOnce(&mut Vec<BookRecord>)) {
        if let Some(list) = self.cache.write().get_mut(user_id) {
            f(list);
        }
    }
}
