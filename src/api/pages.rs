//! HTML pages
//!
//! The public front page, the admin login page, and the admin shell. The
//! admin shell is only reachable through the edge gate, which attaches the
//! verified identity to the request.

use axum::{
    http::Uri,
    response::Html,
    routing::get,
    Extension, Router,
};

use crate::api::middleware::{AppState, AuthenticatedIdentity, GateRules};

/// Build page routes at the configured admin paths
pub fn router(gate: &GateRules) -> Router<AppState> {
    let prefix = gate.admin_prefix();
    let mut router = Router::new()
        .route("/", get(index))
        .route(gate.login_path(), get(login_page))
        .route(&format!("{}/{{*rest}}", prefix), get(admin_page));

    if !prefix.is_empty() && prefix != gate.login_path() {
        router = router.route(prefix, get(admin_page));
    }
    router
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

async fn index() -> Html<&'static str> {
    Html(concat!(
        "<!doctype html><html><head><title>Inkpost</title></head>",
        "<body><h1>Inkpost</h1></body></html>"
    ))
}

async fn login_page() -> Html<&'static str> {
    Html(concat!(
        "<!doctype html><html><head><title>Sign in · Inkpost</title></head><body>",
        "<h1>Sign in</h1>",
        "<form id=\"sign-in\"><input type=\"email\" name=\"email\" required>",
        "<input type=\"password\" name=\"password\" required>",
        "<button type=\"submit\">Sign in</button></form>",
        "</body></html>"
    ))
}

async fn admin_page(
    uri: Uri,
    identity: Option<Extension<AuthenticatedIdentity>>,
) -> Html<String> {
    let who = identity
        .map(|Extension(AuthenticatedIdentity(identity))| identity.email.unwrap_or(identity.uid))
        .unwrap_or_default();

    Html(format!(
        "<!doctype html><html><head><title>Admin · Inkpost</title></head><body>\
         <header>Signed in as {}</header><main data-path=\"{}\"></main></body></html>",
        escape_html(&who),
        escape_html(uri.path()),
    ))
}
