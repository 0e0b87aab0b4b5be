use crate::db::*;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Arc;

const BOOK_COLUMNS: &str = "id, user_id, title, author, cover_url, genres_json, page_count, synopsis,
     status, rating, notes, language, favorite, created_at, updated_at";

/// Database wrapper for thread-safe access.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| AppError::Internal(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Open in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AppError::Internal(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Initialize database schema.
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            -- Users table
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                display_name TEXT,
                photo_url TEXT,
                created_at INTEGER NOT NULL,
                last_login INTEGER
            );

            -- Sessions table
            CREATE TABLE IF NOT EXISTS sessions (
                token TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            );

            -- Collection books, one row per (user, book)
            CREATE TABLE IF NOT EXISTS books (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                author TEXT NOT NULL,
                cover_url TEXT NOT NULL,
                genres_json TEXT,
                page_count INTEGER,
                synopsis TEXT,
                status TEXT NOT NULL,
                rating REAL,
                notes TEXT,
                language TEXT,
                favorite INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_books_user ON books(user_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_expires ON sessions(expires_at);
            "#,
        )
        .map_err(|e| AppError::Internal(format!("Failed to initialize schema: {}", e)))?;

        Ok(())
    }

    // ========== USER OPERATIONS ==========

    /// Create a new user.
    pub fn create_user(&self, user: &User) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO users (id, username, password_hash, display_name, photo_url, created_at, last_login)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                user.id,
                user.username,
                user.password_hash,
                user.display_name,
                user.photo_url,
                user.created_at,
                user.last_login,
            ],
        )
        .map_err(|e| {
            if e.to_string().contains("UNIQUE constraint") {
                AppError::Validation(format!("Username '{}' already exists", user.username))
            } else {
                AppError::Internal(format!("Failed to create user: {}", e))
            }
        })?;
        Ok(())
    }

    /// Get user by username.
    pub fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, username, password_hash, display_name, photo_url, created_at, last_login
             FROM users WHERE username = ?1",
            params![username],
            Self::row_to_user,
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get user: {}", e)))
    }

    /// Get user by ID.
    pub fn get_user_by_id(&self, id: &str) -> Result<Option<User>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, username, password_hash, display_name, photo_url, created_at, last_login
             FROM users WHERE id = ?1",
            params![id],
            Self::row_to_user,
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get user: {}", e)))
    }

    /// List all users.
    pub fn list_users(&self) -> Result<Vec<User>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, username, password_hash, display_name, photo_url, created_at, last_login
                 FROM users ORDER BY username",
            )
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let users = stmt
            .query_map([], Self::row_to_user)
            .map_err(|e| AppError::Internal(format!("Failed to list users: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect users: {}", e)))?;

        Ok(users)
    }

    fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
        Ok(User {
            id: row.get(0)?,
            username: row.get(1)?,
            password_hash: row.get(2)?,
            display_name: row.get(3)?,
            photo_url: row.get(4)?,
            created_at: row.get(5)?,
            last_login: row.get(6)?,
        })
    }

    /// Update user password.
    pub fn update_user_password(&self, username: &str, password_hash: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE users SET password_hash = ?1 WHERE username = ?2",
                params![password_hash, username],
            )
            .map_err(|e| AppError::Internal(format!("Failed to update password: {}", e)))?;
        Ok(rows > 0)
    }

    /// Update display name and photo.
    pub fn update_user_profile(
        &self,
        user_id: &str,
        display_name: &str,
        photo_url: Option<&str>,
    ) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE users SET display_name = ?1, photo_url = ?2 WHERE id = ?3",
                params![display_name, photo_url, user_id],
            )
            .map_err(|e| AppError::Internal(format!("Failed to update profile: {}", e)))?;
        Ok(rows > 0)
    }

    /// Update user last login.
    pub fn update_user_last_login(&self, user_id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE users SET last_login = ?1 WHERE id = ?2",
            params![now_timestamp(), user_id],
        )
        .map_err(|e| AppError::Internal(format!("Failed to update last login: {}", e)))?;
        Ok(())
    }

    /// Delete user together with their sessions and books.
    pub fn delete_user(&self, username: &str) -> Result<bool> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Internal(format!("Failed to start transaction: {}", e)))?;

        let user_id: Option<String> = tx
            .query_row(
                "SELECT id FROM users WHERE username = ?1",
                params![username],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| AppError::Internal(format!("Failed to get user: {}", e)))?;

        let Some(user_id) = user_id else {
            return Ok(false);
        };

        tx.execute("DELETE FROM sessions WHERE user_id = ?1", params![user_id])?;
        tx.execute("DELETE FROM books WHERE user_id = ?1", params![user_id])?;
        tx.execute("DELETE FROM users WHERE id = ?1", params![user_id])?;
        tx.commit()
            .map_err(|e| AppError::Internal(format!("Failed to delete user: {}", e)))?;
        Ok(true)
    }

    // ========== SESSION OPERATIONS ==========

    /// Create session.
    pub fn create_session(&self, session: &Session) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sessions (token, user_id, expires_at) VALUES (?1, ?2, ?3)",
            params![session.token, session.user_id, session.expires_at],
        )
        .map_err(|e| AppError::Internal(format!("Failed to create session: {}", e)))?;
        Ok(())
    }

    /// Get session by token.
    pub fn get_session(&self, token: &str) -> Result<Option<Session>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT token, user_id, expires_at FROM sessions WHERE token = ?1",
            params![token],
            |row| {
                Ok(Session {
                    token: row.get(0)?,
                    user_id: row.get(1)?,
                    expires_at: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get session: {}", e)))
    }

    /// Delete session.
    pub fn delete_session(&self, token: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])
            .map_err(|e| AppError::Internal(format!("Failed to delete session: {}", e)))?;
        Ok(())
    }

    /// Cleanup expired sessions.
    pub fn cleanup_expired_sessions(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "DELETE FROM sessions WHERE expires_at < ?1",
                params![now_timestamp()],
            )
            .map_err(|e| AppError::Internal(format!("Failed to cleanup sessions: {}", e)))?;
        Ok(rows)
    }

    // ========== BOOK OPERATIONS ==========

    /// Insert a book row.
    pub fn insert_book(&self, book: &BookRecord) -> Result<()> {
        let conn = self.conn.lock();
        let genres_json = genres_to_json(&book.genres)?;
        conn.execute(
            "INSERT INTO books
             (id, user_id, title, author, cover_url, genres_json, page_count, synopsis,
              status, rating, notes, language, favorite, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                book.id,
                book.user_id,
                book.title,
                book.author,
                book.cover_url,
                genres_json,
                book.page_count,
                book.synopsis,
                book.status.as_str(),
                book.rating,
                book.notes,
                book.language,
                book.favorite,
                book.created_at,
                book.updated_at,
            ],
        )
        .map_err(|e| AppError::Persistence(format!("Failed to add book: {}", e)))?;
        Ok(())
    }

    /// Get book by ID.
    pub fn get_book(&self, id: &str) -> Result<Option<BookRecord>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {} FROM books WHERE id = ?1", BOOK_COLUMNS),
            params![id],
            Self::row_to_book,
        )
        .optional()
        .map_err(|e| AppError::Persistence(format!("Failed to get book: {}", e)))
    }

    /// Get all books owned by a user, in insertion order.
    pub fn get_user_books(&self, user_id: &str) -> Result<Vec<BookRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM books WHERE user_id = ?1 ORDER BY created_at, rowid",
                BOOK_COLUMNS
            ))
            .map_err(|e| AppError::Persistence(format!("Failed to prepare query: {}", e)))?;

        let books = stmt
            .query_map(params![user_id], Self::row_to_book)
            .map_err(|e| AppError::Persistence(format!("Failed to get books: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Persistence(format!("Failed to collect books: {}", e)))?;

        Ok(books)
    }

    /// Write only the fields present in the patch.
    pub fn update_book(&self, id: &str, patch: &BookPatch) -> Result<()> {
        if patch.is_empty() {
            return match self.get_book(id)? {
                Some(_) => Ok(()),
                None => Err(AppError::NotFound(id.to_string())),
            };
        }

        let mut sets: Vec<(&str, Value)> = Vec::new();
        if let Some(v) = &patch.title {
            sets.push(("title", Value::Text(v.clone())));
        }
        if let Some(v) = &patch.author {
            sets.push(("author", Value::Text(v.clone())));
        }
        if let Some(v) = &patch.cover_url {
            sets.push(("cover_url", Value::Text(v.clone())));
        }
        if let Some(v) = &patch.genres {
            let json = genres_to_json(v)?.map_or(Value::Null, Value::Text);
            sets.push(("genres_json", json));
        }
        if let Some(v) = patch.page_count {
            sets.push(("page_count", Value::Integer(i64::from(v))));
        }
        if let Some(v) = &patch.synopsis {
            sets.push(("synopsis", Value::Text(v.clone())));
        }
        if let Some(v) = patch.status {
            sets.push(("status", Value::Text(v.as_str().to_string())));
        }
        if let Some(v) = patch.rating {
            sets.push(("rating", Value::Real(f64::from(v))));
        }
        if let Some(v) = &patch.notes {
            sets.push(("notes", Value::Text(v.clone())));
        }
        if let Some(v) = &patch.language {
            sets.push(("language", Value::Text(v.clone())));
        }
        if let Some(v) = patch.favorite {
            sets.push(("favorite", Value::Integer(i64::from(v))));
        }
        sets.push(("updated_at", Value::Integer(now_timestamp())));

        let assignments: Vec<String> = sets
            .iter()
            .enumerate()
            .map(|(i, (column, _))| format!("{} = ?{}", column, i + 1))
            .collect();
        let sql = format!(
            "UPDATE books SET {} WHERE id = ?{}",
            assignments.join(", "),
            sets.len() + 1
        );

        let mut values: Vec<Value> = sets.into_iter().map(|(_, value)| value).collect();
        values.push(Value::Text(id.to_string()));

        let conn = self.conn.lock();
        let rows = conn
            .execute(&sql, rusqlite::params_from_iter(values))
            .map_err(|e| AppError::Persistence(format!("Failed to update book: {}", e)))?;

        if rows == 0 {
            return Err(AppError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Delete a single book by ID.
    pub fn delete_book(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute("DELETE FROM books WHERE id = ?1", params![id])
            .map_err(|e| AppError::Persistence(format!("Failed to delete book: {}", e)))?;
        Ok(rows > 0)
    }

    /// Helper to convert a row to BookRecord.
    fn row_to_book(row: &rusqlite::Row<'_>) -> rusqlite::Result<BookRecord> {
        let genres_json: Option<String> = row.get(5)?;
        let status: String = row.get(8)?;
        let status = status.parse::<ReadingStatus>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e))
        })?;
        let rating: Option<f64> = row.get(9)?;

        Ok(BookRecord {
            id: row.get(0)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            author: row.get(3)?,
            cover_url: row.get(4)?,
            genres: genres_json
                .and_then(|j| serde_json::from_str::<Vec<String>>(&j).ok())
                .unwrap_or_default(),
            page_count: row.get(6)?,
            synopsis: row.get(7)?,
            status,
            rating: rating.map(|r| r as f32),
            notes: row.get(10)?,
            language: row.get(11)?,
            favorite: row.get(12)?,
            created_at: row.get(13)?,
            updated_at: row.get(14)?,
        })
    }
}

fn genres_to_json(genres: &[String]) -> Result<Option<String>> {
    if genres.is_empty() {
        return Ok(None);
    }
    serde_json::to_string(genres)
        .map(Some)
        .map_err(|e| AppError::Internal(format!("Failed to encode genres: {}", e)))
}

#[async_trait]
impl BookStore for Database {
    async fn create(&self, book: NewBook) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let record = book.into_record(id.clone(), now_timestamp());
        self.insert_book(&record)?;
        Ok(id)
    }

    async fn get(&self, id: &str) -> Result<Option<BookRecord>> {
        self.get_book(id)
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<BookRecord>> {
        self.get_user_books(user_id)
    }

    async fn update(&self, id: &str, patch: &BookPatch) -> Result<()> {
        self.update_book(id, patch)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        if self.delete_book(id)? {
            Ok(())
        } else {
            Err(AppError::NotFound(id.to_string()))
        }
    }
}
