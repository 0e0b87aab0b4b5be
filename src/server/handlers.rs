//! HTTP request handlers.

use crate::auth::ProfileUpdate;
use crate::catalog::BookApiResult;
use crate::collection::{self, CollectionStats, SortOption, StatusFilter};
use crate::db::{BookPatch, BookRecord, ReadingStatus, User};
use crate::error::{AppError, AuthErrorCode, Result};
use crate::server::AppState;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::Html,
};
use serde::{Deserialize, Serialize};

// ============================================================================
// WEB PAGES
// ============================================================================

/// Index page (simple HTML).
pub async fn index(State(state): State<AppState>) -> Html<String> {
    let html = format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>{title}</title>
    <style>
        body {{ font-family: system-ui, sans-serif; max-width: 600px; margin: 2rem auto; padding: 0 1rem; }}
        h1 {{ color: #333; }}
        code {{ background: #e8e8e8; padding: 0.2rem 0.4rem; border-radius: 4px; }}
    </style>
</head>
<body>
    <h1>{title}</h1>
    <p>Reading organizer API. Sign in at <code>POST /api/auth/login</code>, then:</p>
    <ul>
        <li><code>GET /api/catalog/search?title=</code> find books</li>
        <li><code>GET /api/books</code> your collection</li>
        <li><code>GET /api/stats</code> reading counters</li>
    </ul>
</body>
</html>"#,
        title = state.config.server.title,
    );

    Html(html)
}

// ============================================================================
// AUTH API
// ============================================================================

/// Login request.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    username: String,
    password: String,
}

/// Login response.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    token: String,
    user: User,
}

/// Auth login.
pub async fn auth_login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>> {
    let (user, token) = state
        .auth
        .sign_in(&req.username, &req.password, origin(&headers))?;

    Ok(Json(LoginResponse { token, user }))
}

/// Auth register. Signs the new user in.
pub async fn auth_register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<LoginRequest>,
) -> Result<(StatusCode, Json<LoginResponse>)> {
    state.auth.check_origin(origin(&headers))?;
    state.auth.register(&req.username, &req.password)?;
    let (user, token) = state
        .auth
        .sign_in(&req.username, &req.password, origin(&headers))?;

    Ok((StatusCode::CREATED, Json(LoginResponse { token, user })))
}

/// Auth logout.
pub async fn auth_logout(State(state): State<AppState>, headers: HeaderMap) -> Result<StatusCode> {
    if let Some(token) = extract_token(&headers) {
        state.auth.sign_out(&token)?;
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Get current user info.
pub async fn auth_me(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<User>> {
    let user = get_authenticated_user(&state, &headers).await?;
    Ok(Json(user))
}

/// Update display name and photo.
pub async fn auth_update_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(update): Json<ProfileUpdate>,
) -> Result<Json<User>> {
    let user = get_authenticated_user(&state, &headers).await?;
    let user = state.auth.update_profile(&user.id, &update)?;
    Ok(Json(user))
}

/// User-facing message for a provider error code.
#[derive(Debug, Serialize)]
pub struct AuthErrorMessage {
    code: AuthErrorCode,
    message: &'static str,
}

/// Map an error code reported by a sign-in client to its message.
///
/// Accepts both `auth/<code>` and bare codes. Unknown codes get the generic
/// message.
pub async fn auth_error_message(Path(code): Path<String>) -> Json<AuthErrorMessage> {
    let code = AuthErrorCode::from_code(&code);
    Json(AuthErrorMessage {
        code,
        message: code.user_message(),
    })
}

// ============================================================================
// CATALOG API
// ============================================================================

/// Catalog search parameters.
#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    title: String,
}

/// Search external catalogs by title.
pub async fn catalog_search(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<BookApiResult>>> {
    get_authenticated_user(&state, &headers).await?;
    let results = state.collection.search(&params.title).await?;
    Ok(Json(results))
}

// ============================================================================
// COLLECTION API
// ============================================================================

/// Collection list parameters.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    status: Option<String>,
    sort: Option<String>,
    q: Option<String>,
}

/// List the user's books, optionally searched, filtered and sorted.
pub async fn books_list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<BookRecord>>> {
    let user = get_authenticated_user(&state, &headers).await?;

    let status: StatusFilter = params.status.as_deref().unwrap_or_default().parse()?;
    let sort: SortOption = match params.sort.as_deref() {
        Some(s) => s.parse()?,
        None => SortOption::default(),
    };

    let records = state.collection.list(&user.id).await?;
    let records = collection::search_records(&records, params.q.as_deref().unwrap_or_default());
    let mut records = collection::filter(&records, status);
    collection::sort(&mut records, sort);

    Ok(Json(records))
}

/// Add book request: a selected search result plus personal fields.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddBookRequest {
    #[serde(flatten)]
    book: BookApiResult,
    status: ReadingStatus,
    rating: Option<f32>,
    notes: Option<String>,
}

/// Add book response.
#[derive(Debug, Serialize)]
pub struct AddBookResponse {
    id: String,
}

/// Adopt a search result into the collection.
pub async fn books_add(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AddBookRequest>,
) -> Result<(StatusCode, Json<AddBookResponse>)> {
    let user = get_authenticated_user(&state, &headers).await?;
    let id = state
        .collection
        .add(req.book, req.status, req.rating, req.notes, &user.id)
        .await?;

    Ok((StatusCode::CREATED, Json(AddBookResponse { id })))
}

/// Get one book.
pub async fn books_get(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<BookRecord>> {
    let user = get_authenticated_user(&state, &headers).await?;
    let record = state.collection.get(&user.id, &id).await?;
    Ok(Json(record))
}

/// Change some fields of a book.
pub async fn books_update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(patch): Json<BookPatch>,
) -> Result<Json<BookRecord>> {
    let user = get_authenticated_user(&state, &headers).await?;
    let record = state.collection.update_fields(&user.id, &id, &patch).await?;
    Ok(Json(record))
}

/// Flip the favorite flag.
pub async fn books_toggle_favorite(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<BookRecord>> {
    let user = get_authenticated_user(&state, &headers).await?;
    let record = state.collection.toggle_favorite(&user.id, &id).await?;
    Ok(Json(record))
}

/// Delete a book.
pub async fn books_remove(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let user = get_authenticated_user(&state, &headers).await?;
    state.collection.remove(&user.id, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Collection counters.
pub async fn api_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<CollectionStats>> {
    let user = get_authenticated_user(&state, &headers).await?;
    let records = state.collection.list(&user.id).await?;
    Ok(Json(collection::stats(&records)))
}

// ============================================================================
// HELPERS
// ============================================================================

/// Extract token from Authorization header.
fn extract_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Origin header, if sent.
fn origin(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::ORIGIN).and_then(|v| v.to_str().ok())
}

/// Get authenticated user from token.
async fn get_authenticated_user(state: &AppState, headers: &HeaderMap) -> Result<User> {
    let token = extract_token(headers).ok_or(AppError::Auth(AuthErrorCode::MissingToken))?;

    state
        .auth
        .current_user(&token)?
        .ok_or(AppError::Auth(AuthErrorCode::SessionExpired))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_extract_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(extract_token(&headers).as_deref(), Some("abc"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_token(&headers), None);
    }

    #[test]
    fn test_add_book_request_shape() {
        let req: AddBookRequest = serde_json::from_str(
            r#"{
                "title": "Dom Casmurro",
                "author": "Machado de Assis",
                "coverUrl": "/placeholder.svg",
                "genres": ["Fiction"],
                "pageCount": 256,
                "status": "Não Lido",
                "rating": 4.5
            }"#,
        )
        .unwrap();
        assert_eq!(req.book.page_count, Some(256));
        assert_eq!(req.status, ReadingStatus::Unread);
        assert_eq!(req.rating, Some(4.5));
        assert_eq!(req.notes, None);
    }

    #[tokio::test]
    async fn test_auth_error_message_lookup() {
        let Json(body) = auth_error_message(Path("auth/popup-blocked".to_string())).await;
        assert_eq!(body.code, AuthErrorCode::PopupBlocked);
        assert_eq!(body.message, AuthErrorCode::PopupBlocked.user_message());

        let Json(body) = auth_error_message(Path("quota-exceeded".to_string())).await;
        assert_eq!(body.code, AuthErrorCode::Unknown);
    }
}
