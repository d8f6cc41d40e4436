use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub mod cloudinary;
mod delivery;

pub use delivery::Transformation;

/// A file received by the proxy, ready to be handed to the provider.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub file_name: Option<String>,
    pub content_type: mime::Mime,
    pub data: Bytes,
}

/// The provider's view of a stored asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedAsset {
    pub public_id: String,
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("provider rejected the account credentials: {0}")]
    Unauthorized(String),

    #[error("provider rejected the file as too large: {0}")]
    PayloadTooLarge(String),

    #[error("provider rejected the upload with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("file could not be prepared for upload: {0}")]
    InvalidFile(String),

    #[error("failed to reach the provider: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("provider returned an unreadable response: {0}")]
    MalformedResponse(String),

    #[error("provider response did not contain an asset identifier")]
    MissingIdentifier,
}

impl UploadError {
    /// A short, stable name for the failure, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "unauthorized",
            Self::PayloadTooLarge(_) => "payload_too_large",
            Self::Rejected { .. } => "rejected",
            Self::InvalidFile(_) => "invalid_file",
            Self::Transport(_) => "transport",
            Self::MalformedResponse(_) => "malformed_response",
            Self::MissingIdentifier => "missing_identifier",
        }
    }
}

/// The hosted image service uploads are delegated to.
///
/// The service owns storage, transformation and delivery. We only
/// ever ask it to store a file and to tell us where a rendering lives.
#[async_trait]
pub trait ImageService: Sync + Send + 'static {
    async fn upload(&self, folder: &str, file: UploadFile) -> Result<UploadedAsset, UploadError>;

    fn rendering_url(&self, public_id: &str, transformation: &Transformation) -> String;
}
