use axum::{
    debug_handler,
    extract::State,
    response::{Html, IntoResponse, Redirect, Response},
};
use axum_extra::extract::CookieJar;

use crate::{auth::SessionGate, include_res, AppState};

#[debug_handler(state = AppState)]
pub(crate) async fn room(
    State(gate): State<SessionGate>,
    jar: CookieJar,
) -> Response {
    if !gate.check(&jar) {
        return Redirect::to("/").into_response();
    }

    Html(include_res!(str, "/pages/chat.html")).into_response()
}
