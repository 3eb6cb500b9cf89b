//! Shared setup for the integration tests.
#![allow(dead_code)]

use axum::Router;
use hushroom::{AppState, Config, media::MediaIngest, router, store::MessageStore};
use tempfile::TempDir;

pub const PASSWORD: &str = "test-room-password";
pub const MARKER: &str = "authenticated=true";

/// A fresh in-memory room. Keep the `TempDir` alive for as long as uploads are needed.
pub async fn test_state() -> (AppState, TempDir) {
    test_state_with(|_| {}).await
}

/// Like [`test_state`], with `configure` applied to the config first.
pub async fn test_state_with(configure: impl FnOnce(&mut Config)) -> (AppState, TempDir) {
    let uploads = tempfile::tempdir().unwrap();
    let mut config = Config {
        room_password: PASSWORD.to_owned(),
        upload_dir: uploads.path().to_path_buf(),
        ..Config::default()
    };
    configure(&mut config);

    let store = MessageStore::in_memory().await.unwrap();
    let media = MediaIngest::new(&config.upload_dir).await.unwrap();

    (AppState::with_parts(&config, store, media), uploads)
}

pub async fn test_app() -> (Router, AppState, TempDir) {
    let (state, uploads) = test_state().await;
    (router(state.clone()), state, uploads)
}

/// A `multipart/form-data` body with one `file` field.
pub fn multipart_file(filename: &str, bytes: &[u8]) -> (String, Vec<u8>) {
    let boundary = "hushroom-test-boundary";

    let mut body = format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    (format!("multipart/form-data; boundary={boundary}"), body)
}
