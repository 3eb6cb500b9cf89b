use axum::response::Html;

#[macro_export]
macro_rules! include_res {
    (str, $p:expr) => {
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/res", $p))
    };
}

/// The login form, optionally with an error line above it.
pub fn login_page(error: Option<&str>) -> Html<String> {
    let error = error
        .map(|error| format!(r#"<p class="error">{error}</p>"#))
        .unwrap_or_default();

    Html(
        include_res!(str, "/pages/login.html")
            .replace("{error}", &error)
    )
}
