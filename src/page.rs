use poem::handler;
use poem::web::Html;

const INDEX: &str = include_str!("../static/index.html");

/// Serves the format converter page.
#[handler]
pub fn index() -> Html<&'static str> {
    Html(INDEX)
}
