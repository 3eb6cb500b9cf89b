//! The room's single shared-secret gate.
//!
//! There are no users and no server-side sessions: a correct password earns
//! a fixed marker cookie, and anything carrying that cookie is let in. The
//! marker is the same for everyone and never expires.

mod login;
mod logout;

use std::sync::Arc;

use axum::{
    routing::get,
    Router,
};
use axum_extra::extract::{
    cookie::{Cookie, SameSite},
    CookieJar,
};

use crate::{AppError, AppResult, AppState};

pub const MARKER_COOKIE: &str = "authenticated";
pub const MARKER_VALUE: &str = "true";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(login::login_page))
        .route("/login", get(login::login_page).post(login::login))
        .route("/logout", get(logout::logout))
}

#[derive(Clone)]
pub struct SessionGate {
    password: Arc<str>,
}

impl std::fmt::Debug for SessionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionGate").finish_non_exhaustive()
    }
}

impl SessionGate {
    pub fn new(password: &str) -> Self {
        SessionGate {
            password: Arc::from(password),
        }
    }

    /// Exact comparison against the room password.
    pub fn verify(&self, password: &str) -> AppResult<()> {
        if password == &*self.password {
            Ok(())
        } else {
            Err(AppError::Auth)
        }
    }

    /// The marker handed out after a successful [`verify`](Self::verify).
    pub fn issue(&self) -> Cookie<'static> {
        Cookie::build((MARKER_COOKIE, MARKER_VALUE))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .build()
    }

    pub fn check(&self, jar: &CookieJar) -> bool {
        jar.get(MARKER_COOKIE)
            .is_some_and(|cookie| cookie.value() == MARKER_VALUE)
    }

    /// A removal cookie matching the one from [`issue`](Self::issue).
    pub fn revoke(&self) -> Cookie<'static> {
        Cookie::build((MARKER_COOKIE, "")).path("/").build()
    }
}
