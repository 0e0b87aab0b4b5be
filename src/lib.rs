//! bookshelf-rs: a self-hosted reading organizer.
//!
//! Users search external book catalogs by title, adopt results into a
//! personal collection and track what they read.
//!
//! # Features
//!
//! - Catalog search merged from Google Books and OpenLibrary
//! - Per-user collections with reading status, rating, notes and favorites
//! - Filtered and sorted collection views
//! - User accounts with session tokens and profile updates
//! - JSON HTTP API and an operator CLI

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Authentication and user management.
pub mod auth;
/// Book catalog search.
pub mod catalog;
/// Per-user collections.
pub mod collection;
/// Configuration and CLI.
pub mod config;
/// Database operations.
pub mod db;
/// Error types.
pub mod error;
/// HTTP server.
pub mod server;

#[cfg(test)]
mod tests;

pub use catalog::{BookApiResult, CatalogAggregator};
pub use collection::CollectionManager;
pub use config::{Cli, Command, Config};
pub use db::Database;
pub use error::{AppError, Result};
pub use server::AppState;
