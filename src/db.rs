mod schema;

pub use schema::Database;

use crate::error::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// User account.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Unique user ID.
    pub id: String,
    /// Username for login.
    pub username: String,
    /// Argon2 password hash.
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    /// Display name.
    pub display_name: Option<String>,
    /// Profile picture URL.
    pub photo_url: Option<String>,
    /// Account creation timestamp.
    pub created_at: i64,
    /// Last login timestamp.
    pub last_login: Option<i64>,
}

/// Authentication session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Session token.
    pub token: String,
    /// User ID.
    pub user_id: String,
    /// Expiration timestamp.
    pub expires_at: i64,
}

/// Reading status of a book in a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReadingStatus {
    /// Finished.
    #[serde(rename = "Lido")]
    Read,
    /// Not started.
    #[serde(rename = "Não Lido", alias = "NãoLido")]
    Unread,
    /// In progress.
    #[serde(rename = "Lendo")]
    Reading,
}

impl ReadingStatus {
    /// Stored/wire value.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadingStatus::Read => "Lido",
            ReadingStatus::Unread => "Não Lido",
            ReadingStatus::Reading => "Lendo",
        }
    }

    /// Position when sorting by status (reading first, read last).
    pub fn sort_priority(&self) -> u8 {
        match self {
            ReadingStatus::Reading => 1,
            ReadingStatus::Unread => 2,
            ReadingStatus::Read => 3,
        }
    }
}

impl FromStr for ReadingStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "Lido" => Ok(ReadingStatus::Read),
            "Não Lido" | "NãoLido" => Ok(ReadingStatus::Unread),
            "Lendo" => Ok(ReadingStatus::Reading),
            other => Err(AppError::Validation(format!(
                "Unknown reading status: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ReadingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A book in a user's collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookRecord {
    /// Store-assigned ID.
    pub id: String,
    /// Book title.
    pub title: String,
    /// Primary author.
    pub author: String,
    /// Cover image URL (placeholder when unknown).
    pub cover_url: String,
    /// Genres, in display order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub genres: Vec<String>,
    /// Number of pages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,
    /// Synopsis.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synopsis: Option<String>,
    /// Reading status.
    pub status: ReadingStatus,
    /// Rating from 0 to 5 in half points.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<f32>,
    /// Owning user.
    pub user_id: String,
    /// Personal notes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Language of the edition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Marked as favorite.
    #[serde(default)]
    pub favorite: bool,
    /// Creation timestamp.
    pub created_at: i64,
    /// Last update timestamp.
    pub updated_at: i64,
}

/// A book about to be created; the store assigns the ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBook {
    /// Book title.
    pub title: String,
    /// Primary author.
    pub author: String,
    /// Cover image URL.
    pub cover_url: String,
    /// Genres.
    #[serde(default)]
    pub genres: Vec<String>,
    /// Number of pages.
    pub page_count: Option<u32>,
    /// Synopsis.
    pub synopsis: Option<String>,
    /// Reading status.
    pub status: ReadingStatus,
    /// Rating.
    pub rating: Option<f32>,
    /// Owning user.
    pub user_id: String,
    /// Personal notes.
    pub notes: Option<String>,
    /// Language.
    pub language: Option<String>,
    /// Favorite flag.
    #[serde(default)]
    pub favorite: bool,
}

impl NewBook {
    /// Check required fields and value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.user_id.trim().is_empty() {
            return Err(AppError::Validation("Owner is required".to_string()));
        }
        if self.title.trim().is_empty() {
            return Err(AppError::Validation("Title is required".to_string()));
        }
        if self.author.trim().is_empty() {
            return Err(AppError::Validation("Author is required".to_string()));
        }
        if self.cover_url.trim().is_empty() {
            return Err(AppError::Validation("Cover URL is required".to_string()));
        }
        if let Some(rating) = self.rating {
            validate_rating(rating)?;
        }
        Ok(())
    }

    /// Materialize the record with the ID the store picked.
    pub fn into_record(self, id: String, now: i64) -> BookRecord {
        BookRecord {
            id,
            title: self.title,
            author: self.author,
            cover_url: self.cover_url,
            genres: self.genres,
            page_count: self.page_count,
            synopsis: self.synopsis,
            status: self.status,
            rating: self.rating,
            user_id: self.user_id,
            notes: self.notes,
            language: self.language,
            favorite: self.favorite,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Sparse update of a book. Only present fields change.
///
/// A field that is absent from the JSON body (or `null`) stays `None` and is
/// never written, so a partial update can not clear data by accident. The
/// owner and the ID are not patchable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BookPatch {
    /// New title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// New author.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// New cover URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
    /// Replacement genre list.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub genres: Option<Vec<String>>,
    /// New page count.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,
    /// New synopsis.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synopsis: Option<String>,
    /// New reading status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ReadingStatus>,
    /// New rating, 0 to 5 in half steps.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<f32>,
    /// New personal notes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// New language tag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// New favorite flag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub favorite: Option<bool>,
}

impl BookPatch {
    /// Patch that only sets the favorite flag.
    pub fn favorite(value: bool) -> Self {
        Self {
            favorite: Some(value),
            ..Default::default()
        }
    }

    /// True when no field is present.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Reject values a record could not hold.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("Title", &self.title),
            ("Author", &self.author),
            ("Cover URL", &self.cover_url),
        ] {
            if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
                return Err(AppError::Validation(format!("{} can not be empty", name)));
            }
        }
        if let Some(rating) = self.rating {
            validate_rating(rating)?;
        }
        Ok(())
    }

    /// Apply present fields onto an in-memory record.
    pub fn apply_to(&self, book: &mut BookRecord) {
        if let Some(v) = &self.title {
            book.title = v.clone();
        }
        if let Some(v) = &self.author {
            book.author = v.clone();
        }
        if let Some(v) = &self.cover_url {
            book.cover_url = v.clone();
        }
        if let Some(v) = &self.genres {
            book.genres = v.clone();
        }
        if let Some(v) = self.page_count {
            book.page_count = Some(v);
        }
        if let Some(v) = &self.synopsis {
            book.synopsis = Some(v.clone());
        }
        if let Some(v) = self.status {
            book.status = v;
        }
        if let Some(v) = self.rating {
            book.rating = Some(v);
        }
        if let Some(v) = &self.notes {
            book.notes = Some(v.clone());
        }
        if let Some(v) = &self.language {
            book.language = Some(v.clone());
        }
        if let Some(v) = self.favorite {
            book.favorite = v;
        }
    }
}

/// Ratings go from 0 to 5 in half points.
pub fn validate_rating(rating: f32) -> Result<()> {
    if !rating.is_finite() || !(0.0..=5.0).contains(&rating) || (rating * 2.0).fract() != 0.0 {
        return Err(AppError::Validation(format!(
            "Rating must be between 0 and 5 in steps of 0.5, got {}",
            rating
        )));
    }
    Ok(())
}

/// Document store for collection books.
///
/// Every record belongs to exactly one user; callers list by owner and
/// never across users. `update` and `delete` fail with
/// [`AppError::NotFound`] for unknown IDs.
#[async_trait]
pub trait BookStore: Send + Sync {
    /// Persist a new book and return its ID.
    async fn create(&self, book: NewBook) -> Result<String>;

    /// Fetch one book by ID.
    async fn get(&self, id: &str) -> Result<Option<BookRecord>>;

    /// All books owned by a user, oldest first.
    async fn list_by_user(&self, user_id: &str) -> Result<Vec<BookRecord>>;

    /// Apply a sparse update.
    async fn update(&self, id: &str, patch: &BookPatch) -> Result<()>;

    /// Delete a book permanently.
    async fn delete(&self, id: &str) -> Result<()>;
}

/// Timestamp helper.
pub fn now_timestamp() -> i64 {
    Utc::now().timestamp()
}

/// Convert timestamp to DateTime.
pub fn timestamp_to_datetime(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> BookRecord {
        NewBook {
            title: "Dom Casmurro".to_string(),
            author: "Machado de Assis".to_string(),
            cover_url: "/placeholder.svg".to_string(),
            genres: vec!["Fiction".to_string()],
            page_count: Some(256),
            synopsis: None,
            status: ReadingStatus::Unread,
            rating: None,
            user_id: "user-1".to_string(),
            notes: Some("lent to Ana".to_string()),
            language: None,
            favorite: false,
        }
        .into_record("book-1".to_string(), 100)
    }

    #[test]
    fn test_status_wire_values() {
        assert_eq!(
            serde_json::to_string(&ReadingStatus::Unread).unwrap(),
            "\"Não Lido\""
        );
        let status: ReadingStatus = serde_json::from_str("\"NãoLido\"").unwrap();
        assert_eq!(status, ReadingStatus::Unread);
        assert_eq!("Lendo".parse::<ReadingStatus>().unwrap(), ReadingStatus::Reading);
        assert!("Done".parse::<ReadingStatus>().is_err());
    }

    #[test]
    fn test_rating_validation() {
        assert!(validate_rating(0.0).is_ok());
        assert!(validate_rating(3.5).is_ok());
        assert!(validate_rating(5.0).is_ok());
        assert!(validate_rating(2.3).is_err());
        assert!(validate_rating(5.5).is_err());
        assert!(validate_rating(-0.5).is_err());
        assert!(validate_rating(f32::NAN).is_err());
    }

    #[test]
    fn test_patch_from_json_ignores_missing_and_null() {
        let patch: BookPatch =
            serde_json::from_str(r#"{"favorite": true, "notes": null}"#).unwrap();
        assert_eq!(patch, BookPatch::favorite(true));

        let mut book = record();
        patch.apply_to(&mut book);
        assert!(book.favorite);
        assert_eq!(book.notes.as_deref(), Some("lent to Ana"));
        assert_eq!(book.page_count, Some(256));
    }

    #[test]
    fn test_patch_rejects_owner_change() {
        let result: std::result::Result<BookPatch, _> =
            serde_json::from_str(r#"{"userId": "someone-else"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_patch_validation() {
        assert!(BookPatch::default().is_empty());
        let patch = BookPatch {
            title: Some("  ".to_string()),
            ..Default::default()
        };
        assert!(patch.validate().is_err());
        let patch = BookPatch {
            rating: Some(4.5),
            ..Default::default()
        };
        assert!(patch.validate().is_ok());
    }

    #[test]
    fn test_record_json_has_no_empty_optionals() {
        let mut book = record();
        book.notes = None;
        let value = serde_json::to_value(&book).unwrap();
        let obj = value.as_object().unwrap();
        assert!(!obj.contains_key("notes"));
        assert!(!obj.contains_key("rating"));
        assert!(!obj.contains_key("synopsis"));
        assert_eq!(obj["pageCount"], 256);
        assert_eq!(obj["userId"], "user-1");
    }
}
