use axum::{
    debug_handler,
    extract::State,
    http::header,
    response::IntoResponse,
};

use crate::{store::MessageStore, AppResult, AppState};

/// The whole history as a plain-text download, one line per message.
#[debug_handler(state = AppState)]
pub(crate) async fn export(State(store): State<MessageStore>) -> AppResult<impl IntoResponse> {
    let transcript = store
        .list_all()
        .await?
        .iter()
        .map(|message| message.transcript_line())
        .collect::<Vec<_>>()
        .join("\n");

    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CONTENT_DISPOSITION, "attachment; filename=chat_history.txt"),
        ],
        transcript,
    ))
}
