mod export;
mod frame;
mod hub;
mod room;
mod ws;

use axum::{routing::get, Router};

use crate::AppState;

pub use hub::Hub;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/chat", get(room::room))
        .route("/ws", get(ws::room_ws))
        .route("/export", get(export::export))
}
