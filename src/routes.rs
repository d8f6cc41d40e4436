use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use poem_openapi::param::Query;
use poem_openapi::payload::Json;
use poem_openapi::types::multipart::Upload;
use poem_openapi::{ApiResponse, Multipart, Object, OpenApi};
use tracing_futures::Instrument;
use uuid::Uuid;

use crate::config::config;
use crate::presets::{PresetInfo, SocialFormat};
use crate::provider::{ImageService, Transformation, UploadError, UploadFile};

/// The form posted by the upload page.
#[derive(Debug, Multipart)]
pub struct UploadForm {
    /// The image to upload.
    file: Option<Upload>,
}

#[derive(Object, Debug)]
pub struct UploadedImage {
    /// The provider assigned identifier of the stored image.
    ///
    /// This is used to request renderings of the image.
    #[oai(rename = "publicId")]
    pub public_id: String,
}

#[derive(Object, Debug)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    fn new(error: impl Into<String>) -> Json<Self> {
        Json(Self { error: error.into() })
    }
}

#[derive(Object, Debug)]
pub struct PresetList {
    /// The label of the preset selected before the user picks one.
    pub default: String,

    /// All available presets in display order.
    pub presets: Vec<PresetInfo>,
}

#[derive(Object, Debug)]
pub struct Rendering {
    /// The url the cropped image can be fetched from.
    pub url: String,
    pub width: u32,
    pub height: u32,
    #[oai(rename = "aspectRatio")]
    pub aspect_ratio: String,
    pub crop: String,
    pub gravity: String,
}

#[derive(ApiResponse)]
#[oai(bad_request_handler = "UploadResponse::unreadable_form")]
pub enum UploadResponse {
    /// The image was stored by the provider.
    #[oai(status = 200)]
    Ok(Json<UploadedImage>),

    /// No file was given in the `file` field, or the form could not be read.
    #[oai(status = 404)]
    NotFound(Json<ErrorBody>),

    /// The provider refused the file because of its size.
    #[oai(status = 413)]
    TooLarge(Json<ErrorBody>),

    /// The provider could not be reached or refused the upload.
    #[oai(status = 502)]
    BadGateway(Json<ErrorBody>),

    /// The uploaded file could not be read or prepared for the provider.
    #[oai(status = 500)]
    InternalServerError(Json<ErrorBody>),
}

#[derive(ApiResponse)]
pub enum PresetsResponse {
    #[oai(status = 200)]
    Ok(Json<PresetList>),
}

#[derive(ApiResponse)]
pub enum TransformResponse {
    /// The rendering for the given image and preset.
    #[oai(status = 200)]
    Ok(Json<Rendering>),

    /// The image id was empty or the preset does not exist.
    #[oai(status = 400)]
    BadRequest(Json<ErrorBody>),
}

impl UploadResponse {
    /// A form that cannot be parsed has no file we could find.
    fn unreadable_form(err: poem::Error) -> Self {
        debug!("Rejecting unreadable upload form: {}", err);
        Self::NotFound(ErrorBody::new("file not found"))
    }
}

impl From<UploadError> for UploadResponse {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::PayloadTooLarge(_) => Self::TooLarge(ErrorBody::new(err.to_string())),
            UploadError::InvalidFile(_) => Self::InternalServerError(ErrorBody::new(err.to_string())),
            other => Self::BadGateway(ErrorBody::new(format!("upstream error: {}", other))),
        }
    }
}

pub struct SocialApi {
    service: Arc<dyn ImageService>,
}

impl SocialApi {
    pub fn new(service: Arc<dyn ImageService>) -> Self {
        Self { service }
    }

    async fn upload(&self, upload: Upload) -> UploadResponse {
        let file_name = upload.file_name().map(ToString::to_string);
        let content_type = upload
            .content_type()
            .and_then(|ct| mime::Mime::from_str(ct).ok())
            .unwrap_or(mime::APPLICATION_OCTET_STREAM);

        let data = match upload.into_vec().await {
            Ok(data) => Bytes::from(data),
            Err(e) => {
                error!("Failed to read uploaded file: {}", e);
                return UploadResponse::InternalServerError(ErrorBody::new(format!(
                    "failed to read uploaded file: {}",
                    e
                )));
            },
        };

        if data.is_empty() {
            return UploadResponse::NotFound(ErrorBody::new("file not found"));
        }

        let checksum = crate::utils::checksum(&data);
        info!(
            size = data.len(),
            checksum,
            content_type = %content_type,
            "Forwarding upload to provider"
        );

        let file = UploadFile {
            file_name,
            content_type,
            data,
        };

        match self.service.upload(&config().folder, file).await {
            Ok(asset) => {
                info!(public_id = %asset.public_id, checksum, "Upload stored by provider");
                UploadResponse::Ok(Json(UploadedImage {
                    public_id: asset.public_id,
                }))
            },
            Err(e) => {
                error!(kind = e.kind(), error = %e, "Upload to provider failed");
                UploadResponse::from(e)
            },
        }
    }
}

#[OpenApi]
impl SocialApi {
    /// Upload Image
    ///
    /// Forwards the image in the `file` field to the image provider
    /// and returns the identifier it was stored under.
    ///
    /// Every request creates a new stored image, uploading the same
    /// file twice gives two different identifiers.
    #[oai(path = "/image-upload", method = "post")]
    pub async fn upload_image(&self, form: UploadForm) -> UploadResponse {
        let upload = match form.file {
            Some(upload) => upload,
            None => return UploadResponse::NotFound(ErrorBody::new("file not found")),
        };

        let request_id = Uuid::new_v4();
        self.upload(upload)
            .instrument(info_span!("upload", %request_id))
            .await
    }

    /// List Presets
    ///
    /// Returns every social media format an image can be rendered as.
    #[oai(path = "/presets", method = "get")]
    pub async fn list_presets(&self) -> PresetsResponse {
        PresetsResponse::Ok(Json(PresetList {
            default: config().default_preset.label().to_string(),
            presets: SocialFormat::all().map(PresetInfo::from).collect(),
        }))
    }

    /// Transform Image
    ///
    /// Builds the rendering of an uploaded image cropped to the given preset.
    /// If no preset is given the default preset is used.
    #[oai(path = "/transform", method = "get")]
    pub async fn transform(
        &self,
        #[oai(name = "publicId")] public_id: Query<String>,
        preset: Query<Option<String>>,
    ) -> TransformResponse {
        if public_id.0.trim().is_empty() {
            return TransformResponse::BadRequest(ErrorBody::new("publicId must not be empty"));
        }

        let format = match preset.0 {
            None => config().default_preset,
            Some(label) => match SocialFormat::from_str(&label) {
                Ok(format) => format,
                Err(_) => {
                    return TransformResponse::BadRequest(ErrorBody::new(format!(
                        "unknown preset: {:?}",
                        label
                    )))
                },
            },
        };

        let transformation = Transformation::from(format);
        let url = self.service.rendering_url(&public_id.0, &transformation);

        debug!(preset = format.label(), url = %url, "Built rendering");
        TransformResponse::Ok(Json(Rendering {
            url,
            width: transformation.width,
            height: transformation.height,
            aspect_ratio: transformation.aspect_ratio.to_string(),
            crop: transformation.crop.as_str().to_string(),
            gravity: transformation.gravity.as_str().to_string(),
        }))
    }
}
