use crate::auth::AuthService;
use crate::catalog::{BookApiResult, Candidate, CatalogAggregator, CatalogSource, SearchTuning};
use crate::collection::{self, CollectionManager, SortOption, StatusFilter};
use crate::config::Config;
use crate::db::{
    BookPatch, BookRecord, BookStore, Database, NewBook, ReadingStatus, Session, User,
    now_timestamp,
};
use crate::error::{AppError, Result};
use crate::server::AppState;
use async_trait::async_trait;
use axum::response::IntoResponse;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::fmt::MakeWriter;

fn test_db() -> Database {
    Database::open_memory().unwrap()
}

fn create_user(db: &Database, id: &str, username: &str) {
    let user = User {
        id: id.to_string(),
        username: username.to_string(),
        password_hash: "hash".to_string(),
        display_name: None,
        photo_url: None,
        created_at: now_timestamp(),
        last_login: None,
    };
    db.create_user(&user).unwrap();
}

/// Catalog that always returns the same titles.
struct StaticSource(Vec<&'static str>);

#[async_trait]
impl CatalogSource for StaticSource {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn search_title(&self, _title: &str, limit: usize) -> Result<Vec<Candidate>> {
        Ok(self
            .0
            .iter()
            .take(limit)
            .map(|t| Candidate {
                title: t.to_string(),
                ..Default::default()
            })
            .collect())
    }
}

fn static_catalog() -> CatalogAggregator {
    CatalogAggregator::new(
        Arc::new(StaticSource(vec!["Dom Casmurro", "Iracema", "O Cortiço"])),
        Arc::new(StaticSource(vec![])),
        SearchTuning::default(),
        Duration::from_secs(5),
    )
}

fn manager(store: Arc<dyn BookStore>) -> CollectionManager {
    CollectionManager::new(store, static_catalog())
}

fn selected(title: &str) -> BookApiResult {
    BookApiResult {
        title: title.to_string(),
        author: "Machado de Assis".to_string(),
        cover_url: "https://covers.openlibrary.org/b/id/123-M.jpg".to_string(),
        genres: vec!["Fiction".to_string()],
        page_count: Some(256),
        synopsis: None,
    }
}

/// Store whose writes always fail.
struct BrokenStore(Database);

#[async_trait]
impl BookStore for BrokenStore {
    async fn create(&self, _book: NewBook) -> Result<String> {
        Err(AppError::Persistence("disk full".to_string()))
    }

    async fn get(&self, id: &str) -> Result<Option<BookRecord>> {
        self.0.get(id).await
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<BookRecord>> {
        self.0.list_by_user(user_id).await
    }

    async fn update(&self, _id: &str, _patch: &BookPatch) -> Result<()> {
        Err(AppError::Persistence("disk full".to_string()))
    }

    async fn delete(&self, _id: &str) -> Result<()> {
        Err(AppError::Persistence("disk full".to_string()))
    }
}

/// Catalog that is always unreachable.
struct DownSource;

#[async_trait]
impl CatalogSource for DownSource {
    fn name(&self) -> &'static str {
        "down"
    }

    async fn search_title(&self, _title: &str, _limit: usize) -> Result<Vec<Candidate>> {
        Err(AppError::source_unavailable("down", "connection refused"))
    }
}

/// In-memory sink for formatted log lines.
#[derive(Clone, Default)]
struct LogBuffer(Arc<parking_lot::Mutex<Vec<u8>>>);

impl LogBuffer {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl std::io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

// ========== DATABASE ==========

#[test]
fn db_create_and_get_user() {
    let db = test_db();
    create_user(&db, "user-1", "alice");

    let user = db.get_user_by_username("alice").unwrap().unwrap();
    assert_eq!(user.id, "user-1");
    assert!(db.get_user_by_id("user-1").unwrap().is_some());
    assert!(db.get_user_by_username("bob").unwrap().is_none());
}

#[test]
fn db_duplicate_username_is_validation_error() {
    let db = test_db();
    create_user(&db, "user-1", "alice");

    let dup = User {
        id: "user-2".to_string(),
        username: "alice".to_string(),
        password_hash: "hash".to_string(),
        display_name: None,
        photo_url: None,
        created_at: now_timestamp(),
        last_login: None,
    };
    assert!(matches!(db.create_user(&dup), Err(AppError::Validation(_))));
}

#[test]
fn db_expired_sessions_are_cleaned_up() {
    let db = test_db();
    create_user(&db, "user-1", "alice");
    db.create_session(&Session {
        token: "old".to_string(),
        user_id: "user-1".to_string(),
        expires_at: now_timestamp() - 10,
    })
    .unwrap();
    db.create_session(&Session {
        token: "fresh".to_string(),
        user_id: "user-1".to_string(),
        expires_at: now_timestamp() + 3600,
    })
    .unwrap();

    assert_eq!(db.cleanup_expired_sessions().unwrap(), 1);
    assert!(db.get_session("old").unwrap().is_none());
    assert!(db.get_session("fresh").unwrap().is_some());
}

#[tokio::test]
async fn db_books_are_scoped_to_their_owner() {
    let db = test_db();
    let mgr = manager(Arc::new(db.clone()));
    mgr.add(selected("Dom Casmurro"), ReadingStatus::Read, None, None, "user-1")
        .await
        .unwrap();
    mgr.add(selected("Iracema"), ReadingStatus::Unread, None, None, "user-2")
        .await
        .unwrap();

    let books = db.get_user_books("user-1").unwrap();
    assert_eq!(books.len(), 1);
    assert_eq!(books[0].title, "Dom Casmurro");
}

#[tokio::test]
async fn db_delete_user_removes_collection() {
    let db = test_db();
    create_user(&db, "user-1", "alice");
    let mgr = manager(Arc::new(db.clone()));
    mgr.add(selected("Dom Casmurro"), ReadingStatus::Read, None, None, "user-1")
        .await
        .unwrap();

    assert!(db.delete_user("alice").unwrap());
    assert!(db.get_user_books("user-1").unwrap().is_empty());
}

#[tokio::test]
async fn db_patch_only_writes_present_fields() {
    let db = test_db();
    let id = db
        .create(NewBook {
            title: "Dom Casmurro".to_string(),
            author: "Machado de Assis".to_string(),
            cover_url: "/placeholder.svg".to_string(),
            genres: vec!["Fiction".to_string()],
            page_count: Some(256),
            synopsis: Some("Bentinho e Capitu.".to_string()),
            status: ReadingStatus::Reading,
            rating: Some(4.0),
            user_id: "user-1".to_string(),
            notes: Some("Reler".to_string()),
            language: Some("pt".to_string()),
            favorite: false,
        })
        .await
        .unwrap();

    let patch: BookPatch = serde_json::from_str(r#"{"status": "Lido", "notes": null}"#).unwrap();
    db.update(&id, &patch).await.unwrap();

    let book = db.get(&id).await.unwrap().unwrap();
    assert_eq!(book.status, ReadingStatus::Read);
    assert_eq!(book.notes.as_deref(), Some("Reler"));
    assert_eq!(book.rating, Some(4.0));
    assert_eq!(book.genres, vec!["Fiction".to_string()]);
    assert_eq!(book.language.as_deref(), Some("pt"));
}

#[tokio::test]
async fn db_update_unknown_book_fails() {
    let db = test_db();
    let err = db.update("missing", &BookPatch::favorite(true)).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    let err = db.delete("missing").await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn db_collection_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bookshelf.db");

    let id = {
        let db = Database::open(&path).unwrap();
        manager(Arc::new(db))
            .add(selected("Dom Casmurro"), ReadingStatus::Reading, Some(4.5), None, "user-1")
            .await
            .unwrap()
    };

    let db = Database::open(&path).unwrap();
    let book = db.get_book(&id).unwrap().unwrap();
    assert_eq!(book.title, "Dom Casmurro");
    assert_eq!(book.rating, Some(4.5));
}

// ========== COLLECTION ==========

#[tokio::test]
async fn collection_add_then_list_round_trip() {
    let mgr = manager(Arc::new(test_db()));
    let id = mgr
        .add(
            selected("Dom Casmurro"),
            ReadingStatus::Reading,
            Some(4.5),
            Some("Capitu traiu?".to_string()),
            "user-1",
        )
        .await
        .unwrap();

    let books = mgr.list("user-1").await.unwrap();
    assert_eq!(books.len(), 1);
    let book = &books[0];
    assert_eq!(book.id, id);
    assert_eq!(book.title, "Dom Casmurro");
    assert_eq!(book.author, "Machado de Assis");
    assert_eq!(book.cover_url, "https://covers.openlibrary.org/b/id/123-M.jpg");
    assert_eq!(book.genres, vec!["Fiction".to_string()]);
    assert_eq!(book.page_count, Some(256));
    assert_eq!(book.status, ReadingStatus::Reading);
    assert_eq!(book.rating, Some(4.5));
    assert_eq!(book.notes.as_deref(), Some("Capitu traiu?"));
    assert!(!book.favorite);

    // No absent value is written out as null.
    let json = serde_json::to_value(book).unwrap();
    let object = json.as_object().unwrap();
    assert!(object.values().all(|v| !v.is_null()));
    assert!(!object.contains_key("synopsis"));
}

#[tokio::test]
async fn collection_add_rejects_bad_rating() {
    let mgr = manager(Arc::new(test_db()));
    let err = mgr
        .add(selected("Dom Casmurro"), ReadingStatus::Read, Some(4.3), None, "user-1")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert!(mgr.list("user-1").await.unwrap().is_empty());
}

#[tokio::test]
async fn collection_favorite_update_keeps_other_fields() {
    let mgr = manager(Arc::new(test_db()));
    let id = mgr
        .add(selected("Dom Casmurro"), ReadingStatus::Read, Some(5.0), None, "user-1")
        .await
        .unwrap();
    let before = mgr.list("user-1").await.unwrap().remove(0);

    mgr.update_fields("user-1", &id, &BookPatch::favorite(true))
        .await
        .unwrap();

    mgr.forget_user("user-1");
    let after = mgr.list("user-1").await.unwrap().remove(0);
    assert!(after.favorite);
    assert_eq!(
        BookRecord {
            favorite: before.favorite,
            updated_at: before.updated_at,
            ..after
        },
        before
    );
}

#[tokio::test]
async fn collection_toggle_favorite_flips() {
    let mgr = manager(Arc::new(test_db()));
    let id = mgr
        .add(selected("Iracema"), ReadingStatus::Unread, None, None, "user-1")
        .await
        .unwrap();

    assert!(mgr.toggle_favorite("user-1", &id).await.unwrap().favorite);
    assert!(!mgr.toggle_favorite("user-1", &id).await.unwrap().favorite);
}

#[tokio::test]
async fn collection_cache_follows_successful_writes() {
    let mgr = manager(Arc::new(test_db()));
    assert!(mgr.cached("user-1").is_none());

    mgr.list("user-1").await.unwrap();
    let id = mgr
        .add(selected("Iracema"), ReadingStatus::Unread, None, None, "user-1")
        .await
        .unwrap();
    assert_eq!(mgr.cached("user-1").unwrap().len(), 1);

    mgr.update_fields(
        "user-1",
        &id,
        &BookPatch {
            status: Some(ReadingStatus::Reading),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(mgr.cached("user-1").unwrap()[0].status, ReadingStatus::Reading);

    mgr.remove("user-1", &id).await.unwrap();
    assert!(mgr.cached("user-1").unwrap().is_empty());
}

#[tokio::test]
async fn collection_list_is_served_from_cache_until_forgotten() {
    let db = test_db();
    let mgr = manager(Arc::new(db.clone()));
    mgr.add(selected("Iracema"), ReadingStatus::Unread, None, None, "user-1")
        .await
        .unwrap();
    assert_eq!(mgr.list("user-1").await.unwrap().len(), 1);

    // Written behind the manager's back.
    let other = manager(Arc::new(db));
    other
        .add(selected("Helena"), ReadingStatus::Read, None, None, "user-1")
        .await
        .unwrap();
    assert_eq!(mgr.list("user-1").await.unwrap().len(), 1);

    mgr.forget_user("user-1");
    let titles: Vec<String> = mgr
        .list("user-1")
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.title)
        .collect();
    assert_eq!(titles, vec!["Iracema", "Helena"]);
}

#[tokio::test]
async fn collection_remove_unknown_id_leaves_list_unchanged() {
    let mgr = manager(Arc::new(test_db()));
    mgr.add(selected("Iracema"), ReadingStatus::Unread, None, None, "user-1")
        .await
        .unwrap();
    let before = mgr.list("user-1").await.unwrap();

    let err = mgr.remove("user-1", "no-such-id").await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    assert_eq!(mgr.cached("user-1").unwrap(), before);
}

#[tokio::test]
async fn collection_failed_write_leaves_list_unchanged() {
    let db = test_db();
    let id = manager(Arc::new(db.clone()))
        .add(selected("Iracema"), ReadingStatus::Unread, None, None, "user-1")
        .await
        .unwrap();

    let mgr = manager(Arc::new(BrokenStore(db)));
    let before = mgr.list("user-1").await.unwrap();

    let err = mgr
        .update_fields("user-1", &id, &BookPatch::favorite(true))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Persistence(_)));
    assert!(matches!(
        mgr.remove("user-1", &id).await,
        Err(AppError::Persistence(_))
    ));
    assert!(matches!(
        mgr.add(selected("Ubirajara"), ReadingStatus::Read, None, None, "user-1")
            .await,
        Err(AppError::Persistence(_))
    ));
    assert_eq!(mgr.cached("user-1").unwrap(), before);
}

#[tokio::test]
async fn collection_hides_other_users_books() {
    let mgr = manager(Arc::new(test_db()));
    let id = mgr
        .add(selected("Dom Casmurro"), ReadingStatus::Read, None, None, "user-1")
        .await
        .unwrap();

    assert!(matches!(mgr.get("user-2", &id).await, Err(AppError::NotFound(_))));
    assert!(matches!(
        mgr.update_fields("user-2", &id, &BookPatch::favorite(true)).await,
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(mgr.remove("user-2", &id).await, Err(AppError::NotFound(_))));
    assert!(!mgr.get("user-1", &id).await.unwrap().favorite);
}

#[tokio::test]
async fn collection_search_then_adopt() {
    let mgr = manager(Arc::new(test_db()));
    let results = mgr.search("Dom Casmurro").await.unwrap();
    let pick = results
        .into_iter()
        .find(|r| r.title == "Dom Casmurro")
        .unwrap();
    assert_eq!(pick.author, crate::catalog::UNKNOWN_AUTHOR);

    mgr.add(pick, ReadingStatus::Unread, None, None, "user-1")
        .await
        .unwrap();
    assert_eq!(mgr.list("user-1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn collection_views_compose() {
    let mgr = manager(Arc::new(test_db()));
    for (title, status) in [
        ("Quincas Borba", ReadingStatus::Read),
        ("Dom Casmurro", ReadingStatus::Read),
        ("Iracema", ReadingStatus::Reading),
        ("Helena", ReadingStatus::Unread),
    ] {
        mgr.add(selected(title), status, None, None, "user-1")
            .await
            .unwrap();
    }

    let records = mgr.list("user-1").await.unwrap();
    let read = collection::filter(&records, "Lido".parse::<StatusFilter>().unwrap());
    assert_eq!(
        read.iter().map(|r| r.title.as_str()).collect::<Vec<_>>(),
        vec!["Quincas Borba", "Dom Casmurro"]
    );

    let mut all = collection::filter(&records, StatusFilter::All);
    collection::sort(&mut all, SortOption::Status);
    assert_eq!(
        all.iter().map(|r| r.title.as_str()).collect::<Vec<_>>(),
        vec!["Iracema", "Helena", "Dom Casmurro", "Quincas Borba"]
    );

    let stats = collection::stats(&records);
    assert_eq!((stats.reading, stats.unread, stats.read), (1, 1, 2));
}

// ========== CATALOG ==========

#[tokio::test]
async fn failed_search_is_logged_once_at_error() {
    let logs = LogBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::WARN)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let catalog = CatalogAggregator::new(
        Arc::new(DownSource),
        Arc::new(DownSource),
        SearchTuning::default(),
        Duration::from_secs(5),
    );
    let err = catalog.search_by_title("Iracema").await.unwrap_err();
    assert!(matches!(err, AppError::SearchFailed(_)));
    let _response = err.into_response();

    let output = logs.contents();
    assert!(output.contains("All catalog sources failed"));
    assert_eq!(output.lines().filter(|l| l.contains(" ERROR ")).count(), 1);
}

// ========== AUTH EVENTS ==========

#[tokio::test]
async fn sign_out_drops_cached_collection() {
    let db = test_db();
    let state = AppState::from_config(Config::default(), db.clone()).unwrap();
    state.spawn_auth_listener();

    state.auth.create_user("alice", "secret123").unwrap();
    let (user, token) = state.auth.sign_in("alice", "secret123", None).unwrap();
    state.collection.list(&user.id).await.unwrap();
    assert!(state.collection.cached(&user.id).is_some());

    state.auth.sign_out(&token).unwrap();

    let mut cleared = false;
    for _ in 0..50 {
        if state.collection.cached(&user.id).is_none() {
            cleared = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(cleared);
    assert!(state.auth.current_user(&token).unwrap().is_none());
}

#[test]
fn auth_service_with_registration_disabled() {
    let auth = AuthService::new(test_db(), 30, false, Vec::new());
    assert!(matches!(
        auth.register("alice", "secret123"),
        Err(AppError::Auth(_))
    ));
    // Operators can still create accounts.
    assert!(auth.create_user("alice", "secret123").is_ok());
}
