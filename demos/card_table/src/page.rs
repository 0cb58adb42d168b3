use axum::extract::Path;
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use fragcast_session::SessionId;

use crate::table::html_escape;

const CLIENT_JS: &str = include_str!("client.js");

/// `/` lets the browser pick a session id and bind with a handshake;
/// `/table/{id}` names the session in a `<meta name="session">` tag.
pub fn pages() -> Router {
    Router::new()
        .route("/", get(lobby))
        .route("/table/{session_id}", get(table))
        .route("/client.js", get(client_js))
}

async fn lobby() -> Html<String> {
    Html(page(None))
}

async fn table(Path(session_id): Path<String>) -> Response {
    match SessionId::new(&session_id) {
        Ok(id) => Html(page(Some(&id))).into_response(),
        Err(err) => (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    }
}

async fn client_js() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/javascript")], CLIENT_JS)
}

fn page(session: Option<&SessionId>) -> String {
    let meta = session
        .map(|id| {
            format!(
                r#"<meta name="session" content="{}">"#,
                html_escape(id.as_str())
            )
        })
        .unwrap_or_default();
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    {meta}
    <title>Card table</title>
    <style>
        .board {{ display: flex; gap: 2rem; }}
        .hand[data-turn="true"] h2 {{ text-decoration: underline; }}
    </style>
</head>
<body>
    <label>Player <input id="player" autocomplete="off"></label>
    <main id="table">connecting&hellip;</main>
    <script src="/client.js"></script>
</body>
</html>"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_page_carries_session_meta() {
        let id = SessionId::new("t-\"1\"").unwrap();
        let html = page(Some(&id));
        assert!(html.contains(r#"<meta name="session" content="t-&quot;1&quot;">"#));
    }

    #[test]
    fn lobby_has_no_session_meta() {
        assert!(!page(None).contains(r#"name="session""#));
    }
}
