use poem::http::{Method, StatusCode};
use poem::web::headers::{ContentLength, HeaderMapExt};
use poem::{Endpoint, IntoResponse, Middleware, Request, Response, Result};

/// Caps the size of request bodies.
///
/// Only requests that carry a body are checked, those must declare a
/// `Content-Length` no larger than `max_size`. Reads pass straight through.
pub struct BodyLimit {
    max_size: usize,
}

impl BodyLimit {
    pub fn new(max_size: usize) -> Self {
        Self { max_size }
    }
}

impl<E: Endpoint> Middleware<E> for BodyLimit {
    type Output = BodyLimitEndpoint<E>;

    fn transform(&self, ep: E) -> Self::Output {
        BodyLimitEndpoint {
            inner: ep,
            max_size: self.max_size,
        }
    }
}

pub struct BodyLimitEndpoint<E> {
    inner: E,
    max_size: usize,
}

#[poem::async_trait]
impl<E: Endpoint> Endpoint for BodyLimitEndpoint<E> {
    type Output = Response;

    async fn call(&self, req: Request) -> Result<Self::Output> {
        if has_body(req.method()) {
            match req.headers().typed_get::<ContentLength>() {
                None => {
                    return Ok(rejection(
                        StatusCode::LENGTH_REQUIRED,
                        "request body must declare its length".to_string(),
                    ))
                },
                Some(ContentLength(len)) if len > self.max_size as u64 => {
                    debug!(len, max = self.max_size, "Rejecting oversized request body");
                    return Ok(rejection(
                        StatusCode::PAYLOAD_TOO_LARGE,
                        format!("request body exceeds the limit of {} bytes", self.max_size),
                    ));
                },
                Some(_) => {},
            }
        }

        self.inner.call(req).await.map(IntoResponse::into_response)
    }
}

#[inline]
fn has_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

fn rejection(status: StatusCode, error: String) -> Response {
    Response::builder()
        .status(status)
        .content_type("application/json")
        .body(serde_json::json!({ "error": error }).to_string())
}

#[cfg(test)]
mod tests {
    use poem::test::TestClient;
    use poem::{handler, post, EndpointExt, Route};

    use super::*;

    #[handler]
    fn accept() -> &'static str {
        "ok"
    }

    fn limited() -> TestClient<impl Endpoint> {
        let app = Route::new()
            .at("/", post(accept).get(accept))
            .with(BodyLimit::new(8));
        TestClient::new(app)
    }

    #[tokio::test]
    async fn reads_without_length_pass() {
        let res = limited().get("/").send().await;
        res.assert_status(StatusCode::OK);
    }

    #[tokio::test]
    async fn bodies_are_capped() {
        let app = limited();

        let res = app
            .post("/")
            .typed_header(ContentLength(4))
            .body("tiny")
            .send()
            .await;
        res.assert_status(StatusCode::OK);

        let res = app
            .post("/")
            .typed_header(ContentLength(16))
            .body("far too long ...")
            .send()
            .await;
        res.assert_status(StatusCode::PAYLOAD_TOO_LARGE);
        let body = res.json().await;
        assert!(body
            .value()
            .object()
            .get("error")
            .string()
            .contains("8 bytes"));
    }
}
