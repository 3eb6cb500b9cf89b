use axum::{
    debug_handler,
    extract::State,
    response::{IntoResponse, Redirect},
};
use axum_extra::extract::CookieJar;

use crate::AppState;

use super::SessionGate;

#[debug_handler(state = AppState)]
pub(crate) async fn logout(
    State(gate): State<SessionGate>,
    jar: CookieJar,
) -> impl IntoResponse {
    (jar.remove(gate.revoke()), Redirect::to("/"))
}
