use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::presets::SocialFormat;
use crate::selector::{FormatSelector, ImageFetcher, RenderRequest, SaveTarget};

#[derive(Deserialize)]
struct UploadReply {
    #[serde(rename = "publicId")]
    public_id: String,
}

#[derive(Deserialize)]
struct ErrorReply {
    error: String,
}

#[derive(Debug, Deserialize)]
pub struct RenderingInfo {
    pub url: String,
    pub width: u32,
    pub height: u32,
    #[serde(rename = "aspectRatio")]
    pub aspect_ratio: String,
}

/// Talks to a running proxy the same way the browser page does.
pub struct ProxyClient {
    client: Client,
    base: Url,
}

impl ProxyClient {
    pub fn new(server: &str) -> Result<Self> {
        let mut base =
            Url::parse(server).with_context(|| format!("Invalid server url {:?}", server))?;
        // Endpoints are joined relative to the base, keep any path prefix.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = Client::builder()
            .build()
            .context("Error building reqwest client")?;

        Ok(Self { client, base })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .with_context(|| format!("Cannot join {:?} onto {}", path, self.base))
    }

    /// Uploads the file through the proxy and returns the identifier it
    /// was stored under.
    pub async fn upload(&self, file: &Path) -> Result<String> {
        let data = tokio::fs::read(file)
            .await
            .with_context(|| format!("Failed to read {:?}", file))?;

        let file_name = file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let part = Part::bytes(data)
            .file_name(file_name)
            .mime_str(guess_mime(file).as_ref())?;

        let res = self
            .client
            .post(self.endpoint("api/image-upload")?)
            .multipart(Form::new().part("file", part))
            .send()
            .await
            .context("Error sending upload to proxy")?;

        if !res.status().is_success() {
            return Err(reply_error(res).await);
        }

        let reply: UploadReply = res.json().await.context("Invalid upload reply")?;
        Ok(reply.public_id)
    }

    pub async fn rendering(&self, public_id: &str, preset: SocialFormat) -> Result<RenderingInfo> {
        let mut url = self.endpoint("api/transform")?;
        url.query_pairs_mut()
            .append_pair("publicId", public_id)
            .append_pair("preset", preset.label());

        let res = self
            .client
            .get(url)
            .send()
            .await
            .context("Error requesting rendering from proxy")?;

        if !res.status().is_success() {
            return Err(reply_error(res).await);
        }

        Ok(res.json().await.context("Invalid rendering reply")?)
    }

    /// Resolves the rendering url of a request and loads it, marking it as
    /// displayed on the selector once loaded.
    pub async fn load(&self, selector: &mut FormatSelector, request: RenderRequest) -> Result<()> {
        let loaded = async {
            let info = self.rendering(&request.public_id, request.preset).await?;
            debug!(
                width = info.width,
                height = info.height,
                aspect_ratio = %info.aspect_ratio,
                "Loading rendering @ {}",
                &info.url
            );
            self.fetch(&info.url).await?;
            Ok::<_, anyhow::Error>(info.url)
        }
        .await;

        match loaded {
            Ok(url) => {
                selector.render_loaded(request.seq, url);
                Ok(())
            },
            Err(e) => {
                selector.render_failed(request.seq, &e);
                Err(e)
            },
        }
    }
}

#[async_trait]
impl ImageFetcher for ProxyClient {
    async fn fetch(&self, url: &str) -> Result<Bytes> {
        let res = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Error fetching {}", url))?
            .error_for_status()?;

        Ok(res.bytes().await?)
    }
}

/// Saves downloads into a local directory.
pub struct DirectoryTarget {
    directory: PathBuf,
}

impl DirectoryTarget {
    pub fn new(dir: PathBuf) -> Self {
        Self { directory: dir }
    }
}

#[async_trait]
impl SaveTarget for DirectoryTarget {
    async fn save(&self, file_name: &str, data: Bytes) -> Result<PathBuf> {
        let path = self.directory.join(file_name);

        debug!("Saving download @ {:?}", &path);
        match tokio::fs::write(&path, &data).await {
            Ok(()) => Ok(path),
            Err(ref e) if e.kind() == ErrorKind::NotFound => {
                tokio::fs::create_dir_all(&self.directory).await?;
                tokio::fs::write(&path, data).await?;
                Ok(path)
            },
            Err(other) => Err(other.into()),
        }
    }
}

/// Runs the whole converter flow for a single file.
///
/// Uploads the file, renders it with the given preset and downloads
/// the rendering into the target.
pub async fn convert(
    client: &ProxyClient,
    file: &Path,
    preset: SocialFormat,
    target: &DirectoryTarget,
) -> Result<PathBuf> {
    let mut selector = FormatSelector::new(SocialFormat::default());

    let ticket = selector.begin_upload();
    let uploaded = client.upload(file).await;
    let mut request = match selector.finish_upload(ticket, uploaded) {
        Some(request) => request,
        None => {
            let reason = selector.last_error().unwrap_or("upload failed");
            return Err(anyhow!(reason.to_string()));
        },
    };
    info!(public_id = ?selector.public_id(), "Image uploaded");

    if preset != selector.preset() {
        if let Some(superseding) = selector.select_preset(preset) {
            request = superseding;
        }
    }

    client.load(&mut selector, request).await?;
    if let Some(displayed) = selector.displayed() {
        debug!(state = ?selector.state(), preset = displayed.preset.label(), "Rendering loaded");
    }

    selector
        .download(client, target)
        .await?
        .ok_or_else(|| anyhow!("No rendering to download"))
}

async fn reply_error(res: reqwest::Response) -> anyhow::Error {
    let status = res.status();
    match res.json::<ErrorReply>().await {
        Ok(reply) => anyhow!("proxy responded with {}: {}", status, reply.error),
        Err(_) => anyhow!("proxy responded with {}", status),
    }
}

fn guess_mime(file: &Path) -> mime::Mime {
    let ext = file
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => mime::IMAGE_JPEG,
        Some("png") => mime::IMAGE_PNG,
        Some("gif") => mime::IMAGE_GIF,
        Some("webp") => "image/webp".parse().unwrap_or(mime::APPLICATION_OCTET_STREAM),
        _ => mime::APPLICATION_OCTET_STREAM,
    }
}
