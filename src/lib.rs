pub mod auth;
pub mod config;
pub mod error;
pub mod media;
pub mod registry;
pub mod res;
pub mod rooms;
pub mod store;

use std::sync::Arc;

use axum::{Router, extract::FromRef};
use tower_http::{services::ServeDir, trace::TraceLayer};

pub use config::Config;
pub use error::{AppError, AppResult};

use auth::SessionGate;
use media::MediaIngest;
use registry::ConnectionRegistry;
use rooms::Hub;
use store::MessageStore;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub store: MessageStore,
    pub hub: Hub,
    pub gate: SessionGate,
    pub media: MediaIngest,
}

impl AppState {
    pub async fn new(config: &Config) -> AppResult<AppState> {
        let store = MessageStore::open(&config.database_url).await?;
        let media = MediaIngest::new(&config.upload_dir).await?;
        Ok(AppState::with_parts(config, store, media))
    }

    pub fn with_parts(config: &Config, store: MessageStore, media: MediaIngest) -> AppState {
        let registry = Arc::new(ConnectionRegistry::new(config.send_queue));
        AppState {
            hub: Hub::new(store.clone(), registry, config.idle_timeout),
            gate: SessionGate::new(&config.room_password),
            store,
            media,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let uploads = ServeDir::new(state.media.dir());

    Router::new()
        .merge(auth::router())
        .merge(rooms::router())
        .merge(media::router())
        .nest_service("/uploads", uploads)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub trait GetField {
    fn get_str_field(&self, field: &str) -> AppResult<String>;
}

impl GetField for serde_json::Value {
    fn get_str_field(&self, field: &str) -> AppResult<String> {
        Ok(
            self.get(field)
            .ok_or_else(|| AppError::Protocol(format!("expected {field} in {self}")))?
            .as_str()
            .ok_or_else(|| AppError::Protocol(format!("expected {field} in {self} to be string")))?
            .to_owned()
        )
    }
}
