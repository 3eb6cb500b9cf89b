use axum::{
    debug_handler,
    extract::State,
    response::{IntoResponse, Redirect, Response},
    Form,
};
use axum_extra::extract::CookieJar;
use serde::Deserialize;
use tracing::{info, warn};

use crate::{res, AppState};

use super::SessionGate;

#[derive(Deserialize)]
pub(crate) struct LoginForm {
    password: String,
}

#[debug_handler]
pub(crate) async fn login_page() -> impl IntoResponse {
    res::login_page(None)
}

#[debug_handler(state = AppState)]
pub(crate) async fn login(
    State(gate): State<SessionGate>,
    jar: CookieJar,

    Form(LoginForm { password }): Form<LoginForm>,
) -> Response {
    match gate.verify(&password) {
        Ok(()) => {
            info!("password accepted");
            (jar.add(gate.issue()), Redirect::to("/chat")).into_response()
        }
        Err(err) => {
            warn!("login refused: {err}");
            res::login_page(Some("wrong password")).into_response()
        }
    }
}
