use axum::{
    debug_handler,
    extract::{State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;

use crate::{auth::SessionGate, AppState};

use super::Hub;

#[debug_handler(state = AppState)]
pub(crate) async fn room_ws(
    State(hub): State<Hub>,
    State(gate): State<SessionGate>,
    jar: CookieJar,

    ws: WebSocketUpgrade,
) -> Response {
    if !gate.check(&jar) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    ws.on_upgrade(move |socket| hub.serve(socket))
}
