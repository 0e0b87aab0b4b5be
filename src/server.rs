//! HTTP server and routes.

mod handlers;
mod state;

pub use state::AppState;

use axum::{
    Router,
    routing::{get, post, put},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let auth_routes = Router::new()
        .route("/login", post(handlers::auth_login))
        .route("/register", post(handlers::auth_register))
        .route("/logout", post(handlers::auth_logout))
        .route("/me", get(handlers::auth_me))
        .route("/profile", put(handlers::auth_update_profile))
        .route("/errors/{code}", get(handlers::auth_error_message));

    let book_routes = Router::new()
        .route("/", get(handlers::books_list).post(handlers::books_add))
        .route(
            "/{id}",
            get(handlers::books_get)
                .patch(handlers::books_update)
                .delete(handlers::books_remove),
        )
        .route("/{id}/favorite", post(handlers::books_toggle_favorite));

    let api_routes = Router::new()
        .route("/catalog/search", get(handlers::catalog_search))
        .route("/stats", get(handlers::api_stats));

    Router::new()
        .route("/", get(handlers::index))
        .nest("/api/auth", auth_routes)
        .nest("/api/books", book_routes)
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
