//! Identity provider: accounts, sessions and profile changes.

use crate::db::{Database, Session, User, now_timestamp};
use crate::error::{AppError, AuthErrorCode, Result};
use argon2::{
    Argon2,
    password_hash::{
        PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
        rand_core::{OsRng, RngCore},
    },
};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::Deserialize;
use tokio::sync::broadcast;

/// Buffered events per subscriber before lagging.
const EVENT_CAPACITY: usize = 64;

/// Hash a password using Argon2.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))
}

/// Verify a password against a hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| AppError::Internal(format!("Invalid password hash: {}", e)))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// Generate a secure random token.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Change of the signed-in user, pushed to subscribers.
#[derive(Debug, Clone)]
pub enum AuthEvent {
    /// A user opened a session.
    SignedIn(User),
    /// A session was closed.
    SignedOut {
        /// Owner of the closed session.
        user_id: String,
    },
    /// Display name or photo changed.
    ProfileUpdated(User),
}

/// Profile fields a user can change.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    /// New display name.
    pub display_name: String,
    /// New photo URL; `None` keeps the current one.
    pub photo_url: Option<String>,
}

/// Authentication service.
pub struct AuthService {
    db: Database,
    session_duration_days: u32,
    registration_enabled: bool,
    allowed_origins: Vec<String>,
    events: broadcast::Sender<AuthEvent>,
}

impl AuthService {
    /// Create a new auth service.
    pub fn new(
        db: Database,
        session_duration_days: u32,
        registration_enabled: bool,
        allowed_origins: Vec<String>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            db,
            session_duration_days,
            registration_enabled,
            allowed_origins,
            events,
        }
    }

    /// Register a listener for sign-in, sign-out and profile events.
    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: AuthEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    /// Register a new user.
    pub fn register(&self, username: &str, password: &str) -> Result<User> {
        if !self.registration_enabled {
            return Err(AppError::Auth(AuthErrorCode::RegistrationDisabled));
        }

        self.create_user(username, password)
    }

    /// Create a new user (admin function).
    pub fn create_user(&self, username: &str, password: &str) -> Result<User> {
        // Validate username
        if username.is_empty() || username.len() > 64 {
            return Err(AppError::Validation(
                "Username must be 1-64 characters".to_string(),
            ));
        }

        if !username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(AppError::Validation(
                "Username can only contain letters, numbers, _ and -".to_string(),
            ));
        }

        validate_password(password)?;

        let password_hash = hash_password(password)?;

        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            username: username.to_string(),
            password_hash,
            display_name: Some(username.to_string()),
            photo_url: None,
            created_at: now_timestamp(),
            last_login: None,
        };

        self.db.create_user(&user)?;
        tracing::info!(user_id = %user.id, username = %user.username, "User created");
        Ok(user)
    }

    /// Check the request origin against the allow list.
    ///
    /// An empty list allows every origin, and so does a request without an
    /// `Origin` header (CLI and same-origin clients).
    pub fn check_origin(&self, origin: Option<&str>) -> Result<()> {
        let Some(origin) = origin else {
            return Ok(());
        };
        if self.allowed_origins.is_empty() {
            return Ok(());
        }
        let origin = origin.trim_end_matches('/');
        if self
            .allowed_origins
            .iter()
            .any(|allowed| allowed.trim_end_matches('/').eq_ignore_ascii_case(origin))
        {
            Ok(())
        } else {
            tracing::warn!(origin, "Sign-in from unauthorized origin");
            Err(AppError::Auth(AuthErrorCode::UnauthorizedDomain))
        }
    }

    /// Sign in and create a session.
    pub fn sign_in(
        &self,
        username: &str,
        password: &str,
        origin: Option<&str>,
    ) -> Result<(User, String)> {
        self.check_origin(origin)?;

        let user = self
            .db
            .get_user_by_username(username)?
            .ok_or(AppError::Auth(AuthErrorCode::InvalidCredentials))?;

        if !verify_password(password, &user.password_hash)? {
            return Err(AppError::Auth(AuthErrorCode::InvalidCredentials));
        }

        self.db.update_user_last_login(&user.id)?;

        let token = generate_token();
        let expires_at = now_timestamp() + (self.session_duration_days as i64 * 24 * 60 * 60);

        let session = Session {
            token: token.clone(),
            user_id: user.id.clone(),
            expires_at,
        };

        self.db.create_session(&session)?;

        let user = self.db.get_user_by_id(&user.id)?.unwrap_or(user);
        tracing::info!(user_id = %user.id, "User signed in");
        self.publish(AuthEvent::SignedIn(user.clone()));

        Ok((user, token))
    }

    /// Resolve the user behind a session token.
    pub fn current_user(&self, token: &str) -> Result<Option<User>> {
        let session = match self.db.get_session(token)? {
            Some(s) => s,
            None => return Ok(None),
        };

        // Check expiration
        if session.expires_at < now_timestamp() {
            self.db.delete_session(token)?;
            return Ok(None);
        }

        self.db.get_user_by_id(&session.user_id)
    }

    /// Sign out (delete session).
    pub fn sign_out(&self, token: &str) -> Result<()> {
        let Some(session) = self.db.get_session(token)? else {
            return Ok(());
        };
        self.db.delete_session(token)?;
        tracing::info!(user_id = %session.user_id, "User signed out");
        self.publish(AuthEvent::SignedOut {
            user_id: session.user_id,
        });
        Ok(())
    }

    /// Change display name and photo.
    pub fn update_profile(&self, user_id: &str, update: &ProfileUpdate) -> Result<User> {
        let display_name = update.display_name.trim();
        if display_name.is_empty() || display_name.chars().count() > 64 {
            return Err(AppError::Validation(
                "Display name must be 1-64 characters".to_string(),
            ));
        }

        let current = self
            .db
            .get_user_by_id(user_id)?
            .ok_or(AppError::Auth(AuthErrorCode::SessionExpired))?;

        let photo_url = match update.photo_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => {
                if !(url.starts_with("https://") || url.starts_with("http://")) {
                    return Err(AppError::Validation(
                        "Photo URL must start with http:// or https://".to_string(),
                    ));
                }
                Some(url.to_string())
            }
            _ => current.photo_url.clone(),
        };

        self.db
            .update_user_profile(user_id, display_name, photo_url.as_deref())?;

        let user = User {
            display_name: Some(display_name.to_string()),
            photo_url,
            ..current
        };
        tracing::info!(user_id = %user.id, "Profile updated");
        self.publish(AuthEvent::ProfileUpdated(user.clone()));
        Ok(user)
    }

    /// Change user password.
    pub fn change_password(&self, username: &str, new_password: &str) -> Result<bool> {
        validate_password(new_password)?;

        let password_hash = hash_password(new_password)?;
        self.db.update_user_password(username, &password_hash)
    }

    /// Delete a user and everything they own.
    pub fn delete_user(&self, username: &str) -> Result<bool> {
        self.db.delete_user(username)
    }

    /// List all users.
    pub fn list_users(&self) -> Result<Vec<User>> {
        self.db.list_users()
    }
}

fn validate_password(password: &str) -> Result<()> {
    if password.len() < 4 {
        return Err(AppError::Validation(
            "Password must be at least 4 characters".to_string(),
        ));
    }
    Ok(())
}
