use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, StatusCode};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::config::{ProviderConfig, ProviderCredentials};
use crate::provider::{ImageService, Transformation, UploadError, UploadFile, UploadedAsset};

/// The provider replies with a 400 rather than a 413 for oversized files,
/// this is the prefix of the message it uses.
const FILE_TOO_LARGE_MESSAGE: &str = "File size too large";

#[derive(Deserialize)]
struct UploadReply {
    public_id: Option<String>,
}

#[derive(Deserialize)]
struct ErrorReply {
    error: ErrorMessage,
}

#[derive(Deserialize)]
struct ErrorMessage {
    message: String,
}

pub struct CloudinaryBackend {
    client: Client,
    credentials: ProviderCredentials,
    api_url: String,
    delivery_url: String,
}

impl CloudinaryBackend {
    pub fn new(credentials: ProviderCredentials, cfg: &ProviderConfig) -> anyhow::Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = cfg.timeout() {
            builder = builder.timeout(timeout);
        }

        let client = builder.build().context("Error building reqwest client")?;

        Ok(Self {
            client,
            credentials,
            api_url: cfg.api_url.trim_end_matches('/').to_string(),
            delivery_url: cfg.delivery_url.trim_end_matches('/').to_string(),
        })
    }

    #[inline]
    fn upload_endpoint(&self) -> String {
        format!(
            "{}/v1_1/{}/image/upload",
            self.api_url, self.credentials.cloud_name,
        )
    }

    fn build_form(&self, folder: &str, timestamp: u64, file: UploadFile) -> Result<Form, UploadError> {
        let mut signed = BTreeMap::new();
        signed.insert("folder", folder.to_string());
        signed.insert("timestamp", timestamp.to_string());

        let signature = sign(&signed, &self.credentials.api_secret);

        let len = file.data.len() as u64;
        let part = Part::stream_with_length(Body::from(file.data), len)
            .file_name(file.file_name.unwrap_or_else(|| "upload".to_string()))
            .mime_str(file.content_type.as_ref())
            .map_err(|e| UploadError::InvalidFile(e.to_string()))?;

        let mut form = Form::new();
        for (key, value) in signed {
            form = form.text(key, value);
        }

        Ok(form
            .text("api_key", self.credentials.api_key.clone())
            .text("signature_algorithm", "sha256")
            .text("signature", signature)
            .part("file", part))
    }
}

#[async_trait]
impl ImageService for CloudinaryBackend {
    async fn upload(&self, folder: &str, file: UploadFile) -> Result<UploadedAsset, UploadError> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        let form = self.build_form(folder, timestamp, file)?;

        debug!("Uploading asset @ {}", self.upload_endpoint());
        let res = self
            .client
            .post(self.upload_endpoint())
            .multipart(form)
            .send()
            .await?;

        let status = res.status();
        let body = res.bytes().await?;

        parse_reply(status, &body)
    }

    fn rendering_url(&self, public_id: &str, transformation: &Transformation) -> String {
        format!(
            "{}/{}/image/upload/{}/{}",
            self.delivery_url, self.credentials.cloud_name, transformation, public_id,
        )
    }
}

/// Signs a set of request parameters.
///
/// The params are joined as sorted `key=value` pairs separated by `&`,
/// the secret is appended and the whole string is SHA-256 hashed.
pub fn sign(params: &BTreeMap<&str, String>, api_secret: &str) -> String {
    let to_sign = params
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<String>>()
        .join("&");

    let mut hasher = Sha256::new();
    hasher.update(to_sign.as_bytes());
    hasher.update(api_secret.as_bytes());
    hex::encode(hasher.finalize())
}

fn parse_reply(status: StatusCode, body: &[u8]) -> Result<UploadedAsset, UploadError> {
    if status.is_success() {
        let reply: UploadReply = serde_json::from_slice(body)
            .map_err(|e| UploadError::MalformedResponse(e.to_string()))?;

        return match reply.public_id {
            Some(public_id) if !public_id.is_empty() => Ok(UploadedAsset { public_id }),
            _ => Err(UploadError::MissingIdentifier),
        };
    }

    let message = serde_json::from_slice::<ErrorReply>(body)
        .map(|reply| reply.error.message)
        .unwrap_or_else(|_| String::from_utf8_lossy(body).into_owned());

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(UploadError::Unauthorized(message)),
        StatusCode::PAYLOAD_TOO_LARGE => Err(UploadError::PayloadTooLarge(message)),
        StatusCode::BAD_REQUEST if message.starts_with(FILE_TOO_LARGE_MESSAGE) => {
            Err(UploadError::PayloadTooLarge(message))
        },
        other => Err(UploadError::Rejected {
            status: other.as_u16(),
            message,
        }),
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use super::*;
    use crate::presets::SocialFormat;

    fn backend(api_url: String) -> CloudinaryBackend {
        let creds = ProviderCredentials::new("demo".into(), "1234".into(), "abcd".into()).unwrap();
        let cfg = ProviderConfig {
            api_url,
            delivery_url: "https://res.cloudinary.com/".to_string(),
            timeout: Some(5),
        };
        CloudinaryBackend::new(creds, &cfg).unwrap()
    }

    fn file() -> UploadFile {
        UploadFile {
            file_name: Some("cat.jpg".to_string()),
            content_type: mime::IMAGE_JPEG,
            data: bytes::Bytes::from_static(b"not really a jpeg"),
        }
    }

    #[test]
    fn signature_matches_known_digest() {
        let mut params = BTreeMap::new();
        params.insert("timestamp", "1315060510".to_string());
        params.insert("folder", "social-format-uploads".to_string());

        assert_eq!(
            sign(&params, "abcd"),
            "91b7737722d8b2ff1d4e0bffc6b2402ba609704a48ced74c66950ae50a52f22b",
        );
    }

    #[test]
    fn rendering_url_contains_transformation() {
        let backend = backend("https://api.cloudinary.com".to_string());
        let url = backend.rendering_url(
            "social-format-uploads/abc123",
            &Transformation::from(SocialFormat::TweeterHeader),
        );
        assert_eq!(
            url,
            "https://res.cloudinary.com/demo/image/upload/c_fill,ar_3:1,g_auto,w_1500,h_500/social-format-uploads/abc123",
        );
    }

    #[test]
    fn error_statuses_map_to_taxonomy() {
        let body = json!({"error": {"message": "Invalid Signature"}}).to_string();
        assert!(matches!(
            parse_reply(StatusCode::UNAUTHORIZED, body.as_bytes()),
            Err(UploadError::Unauthorized(m)) if m == "Invalid Signature",
        ));

        let body = json!({"error": {"message": "File size too large. Got 20000000."}}).to_string();
        assert!(matches!(
            parse_reply(StatusCode::BAD_REQUEST, body.as_bytes()),
            Err(UploadError::PayloadTooLarge(_)),
        ));

        assert!(matches!(
            parse_reply(StatusCode::INTERNAL_SERVER_ERROR, b"oops"),
            Err(UploadError::Rejected { status: 500, message }) if message == "oops",
        ));

        assert!(matches!(
            parse_reply(StatusCode::OK, b"{}"),
            Err(UploadError::MissingIdentifier),
        ));

        assert!(matches!(
            parse_reply(StatusCode::OK, b"<html>"),
            Err(UploadError::MalformedResponse(_)),
        ));
    }

    #[tokio::test]
    async fn upload_posts_signed_form() {
        let server = MockServer::start();
        let upload_mock = server.mock(|when, then| {
            when.method(POST)
                .path("/v1_1/demo/image/upload")
                .body_contains("social-format-uploads")
                .body_contains("sha256")
                .body_contains("not really a jpeg");
            then.status(200).json_body(json!({
                "public_id": "social-format-uploads/abc123",
                "format": "jpg",
            }));
        });

        let backend = backend(server.base_url());
        let asset = backend.upload("social-format-uploads", file()).await.unwrap();

        upload_mock.assert();
        assert_eq!(asset.public_id, "social-format-uploads/abc123");
    }

    #[tokio::test]
    async fn upload_surfaces_bad_credentials() {
        let server = MockServer::start();
        let upload_mock = server.mock(|when, then| {
            when.method(POST).path("/v1_1/demo/image/upload");
            then.status(401)
                .json_body(json!({"error": {"message": "Invalid api_key 1234"}}));
        });

        let backend = backend(server.base_url());
        let err = backend
            .upload("social-format-uploads", file())
            .await
            .unwrap_err();

        upload_mock.assert();
        assert_eq!(err.kind(), "unauthorized");
    }

    #[tokio::test]
    async fn unreachable_provider_is_a_transport_error() {
        // Nothing listens on port 9 on the loopback.
        let backend = backend("http://127.0.0.1:9".to_string());
        let err = backend
            .upload("social-format-uploads", file())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "transport");
    }
}
