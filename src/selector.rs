use std::fmt::Display;
use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;

use crate::presets::SocialFormat;

/// The name every downloaded rendering is saved under, whichever
/// preset produced it.
pub const DOWNLOAD_FILE_NAME: &str = "image_transformed.jpg";

#[async_trait]
pub trait ImageFetcher: Sync + Send {
    async fn fetch(&self, url: &str) -> anyhow::Result<Bytes>;
}

#[async_trait]
pub trait SaveTarget: Sync + Send {
    /// Saves the data under the given file name, returning where it ended up.
    async fn save(&self, file_name: &str, data: Bytes) -> anyhow::Result<PathBuf>;
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SelectorState {
    NoImage,
    Uploading,
    HasImage,
    Transforming,
}

/// Handed out when an upload starts, only the latest ticket may
/// complete an upload.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct UploadTicket(u64);

/// A request to render the current image with a preset.
///
/// `seq` increases with every request, completions carrying an
/// older `seq` are dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    pub seq: u64,
    pub public_id: String,
    pub preset: SocialFormat,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayedRendering {
    pub url: String,
    pub preset: SocialFormat,
}

/// The client side of the converter.
///
/// Holds at most one uploaded image, the selected preset and the
/// rendering currently on display.
#[derive(Debug)]
pub struct FormatSelector {
    public_id: Option<String>,
    preset: SocialFormat,
    upload_seq: u64,
    pending_upload: Option<u64>,
    render_seq: u64,
    pending_render: Option<(u64, SocialFormat)>,
    displayed: Option<DisplayedRendering>,
    last_error: Option<String>,
}

impl FormatSelector {
    pub fn new(preset: SocialFormat) -> Self {
        Self {
            public_id: None,
            preset,
            upload_seq: 0,
            pending_upload: None,
            render_seq: 0,
            pending_render: None,
            displayed: None,
            last_error: None,
        }
    }

    pub fn state(&self) -> SelectorState {
        if self.pending_upload.is_some() {
            SelectorState::Uploading
        } else if self.public_id.is_none() {
            SelectorState::NoImage
        } else if self.pending_render.is_some() {
            SelectorState::Transforming
        } else {
            SelectorState::HasImage
        }
    }

    #[inline]
    pub fn preset(&self) -> SocialFormat {
        self.preset
    }

    #[inline]
    pub fn public_id(&self) -> Option<&str> {
        self.public_id.as_deref()
    }

    #[inline]
    pub fn displayed(&self) -> Option<&DisplayedRendering> {
        self.displayed.as_ref()
    }

    /// The message of the last failed upload or rendering, cleared
    /// when a new upload starts.
    #[inline]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn begin_upload(&mut self) -> UploadTicket {
        self.upload_seq += 1;
        self.pending_upload = Some(self.upload_seq);
        self.last_error = None;
        UploadTicket(self.upload_seq)
    }

    /// Completes an upload.
    ///
    /// On success the new image replaces the old one and a rendering of
    /// the selected preset is requested. On failure the previous image,
    /// if any, is kept and the error is recorded.
    pub fn finish_upload<E: Display>(
        &mut self,
        ticket: UploadTicket,
        result: Result<String, E>,
    ) -> Option<RenderRequest> {
        if self.pending_upload != Some(ticket.0) {
            return None;
        }

        self.pending_upload = None;
        match result {
            Ok(public_id) => {
                self.public_id = Some(public_id);
                self.displayed = None;
                Some(self.next_render())
            },
            Err(e) => {
                self.last_error = Some(format!("upload failed: {}", e));
                None
            },
        }
    }

    /// Selects a preset, requesting a new rendering if an image is present.
    pub fn select_preset(&mut self, preset: SocialFormat) -> Option<RenderRequest> {
        self.preset = preset;
        if self.public_id.is_some() {
            Some(self.next_render())
        } else {
            None
        }
    }

    /// Marks a rendering as loaded.
    ///
    /// Returns `false` if the request has since been superseded, in which
    /// case nothing changes.
    pub fn render_loaded(&mut self, seq: u64, url: String) -> bool {
        let preset = match self.pending_render {
            Some((pending, preset)) if pending == seq => preset,
            _ => return false,
        };

        self.pending_render = None;
        self.displayed = Some(DisplayedRendering { url, preset });
        true
    }

    pub fn render_failed<E: Display>(&mut self, seq: u64, err: E) -> bool {
        match self.pending_render {
            Some((pending, _)) if pending == seq => {},
            _ => return false,
        }

        self.pending_render = None;
        self.last_error = Some(format!("rendering failed: {}", err));
        true
    }

    /// Fetches the rendering on display and saves it.
    ///
    /// Does nothing and returns `None` if nothing is on display.
    pub async fn download<F, T>(&self, fetcher: &F, target: &T) -> anyhow::Result<Option<PathBuf>>
    where
        F: ImageFetcher + ?Sized,
        T: SaveTarget + ?Sized,
    {
        let displayed = match self.displayed.as_ref() {
            None => return Ok(None),
            Some(displayed) => displayed,
        };

        let data = fetcher.fetch(&displayed.url).await?;
        let path = target.save(DOWNLOAD_FILE_NAME, data).await?;

        Ok(Some(path))
    }

    fn next_render(&mut self) -> RenderRequest {
        self.render_seq += 1;
        self.pending_render = Some((self.render_seq, self.preset));

        RenderRequest {
            seq: self.render_seq,
            public_id: self.public_id.clone().unwrap_or_default(),
            preset: self.preset,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct RecordingFetcher {
        fetched: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ImageFetcher for RecordingFetcher {
        async fn fetch(&self, url: &str) -> anyhow::Result<Bytes> {
            self.fetched.lock().unwrap().push(url.to_string());
            Ok(Bytes::from(url.to_string()))
        }
    }

    #[derive(Default)]
    struct MemoryTarget {
        saved: Mutex<Vec<(String, Bytes)>>,
    }

    #[async_trait]
    impl SaveTarget for MemoryTarget {
        async fn save(&self, file_name: &str, data: Bytes) -> anyhow::Result<PathBuf> {
            self.saved.lock().unwrap().push((file_name.to_string(), data));
            Ok(PathBuf::from(file_name))
        }
    }

    fn with_image() -> (FormatSelector, RenderRequest) {
        let mut selector = FormatSelector::new(SocialFormat::default());
        let ticket = selector.begin_upload();
        let request = selector
            .finish_upload::<String>(ticket, Ok("uploads/cat".to_string()))
            .unwrap();
        (selector, request)
    }

    #[test]
    fn starts_without_image_on_default_preset() {
        let selector = FormatSelector::new(SocialFormat::default());
        assert_eq!(selector.state(), SelectorState::NoImage);
        assert_eq!(selector.preset(), SocialFormat::InstagramSquare);
        assert!(selector.public_id().is_none());
    }

    #[test]
    fn successful_upload_requests_a_rendering() {
        let mut selector = FormatSelector::new(SocialFormat::default());
        let ticket = selector.begin_upload();
        assert_eq!(selector.state(), SelectorState::Uploading);

        let request = selector
            .finish_upload::<String>(ticket, Ok("uploads/cat".to_string()))
            .unwrap();
        assert_eq!(request.public_id, "uploads/cat");
        assert_eq!(request.preset, SocialFormat::InstagramSquare);
        assert_eq!(selector.state(), SelectorState::Transforming);

        assert!(selector.render_loaded(request.seq, "https://cdn/cat".to_string()));
        assert_eq!(selector.state(), SelectorState::HasImage);
    }

    #[test]
    fn failed_upload_returns_to_no_image_with_error() {
        let mut selector = FormatSelector::new(SocialFormat::default());
        let ticket = selector.begin_upload();

        let request = selector.finish_upload(ticket, Err("upstream error: 502"));
        assert!(request.is_none());
        assert_eq!(selector.state(), SelectorState::NoImage);
        assert_eq!(selector.last_error(), Some("upload failed: upstream error: 502"));
    }

    #[test]
    fn stale_upload_is_discarded() {
        let mut selector = FormatSelector::new(SocialFormat::default());
        let first = selector.begin_upload();
        let second = selector.begin_upload();

        assert!(selector
            .finish_upload::<String>(second, Ok("uploads/new".to_string()))
            .is_some());
        assert!(selector
            .finish_upload::<String>(first, Ok("uploads/old".to_string()))
            .is_none());
        assert_eq!(selector.public_id(), Some("uploads/new"));
    }

    #[test]
    fn new_upload_replaces_previous_image() {
        let (mut selector, request) = with_image();
        selector.render_loaded(request.seq, "https://cdn/cat".to_string());

        let ticket = selector.begin_upload();
        selector.finish_upload::<String>(ticket, Ok("uploads/dog".to_string()));

        assert_eq!(selector.public_id(), Some("uploads/dog"));
        assert!(selector.displayed().is_none());
    }

    #[test]
    fn preset_change_without_image_only_updates_selection() {
        let mut selector = FormatSelector::new(SocialFormat::default());
        assert!(selector.select_preset(SocialFormat::TweeterHeader).is_none());
        assert_eq!(selector.preset(), SocialFormat::TweeterHeader);
        assert_eq!(selector.state(), SelectorState::NoImage);
    }

    #[test]
    fn transforming_clears_only_for_latest_rendering() {
        let (mut selector, first) = with_image();
        let second = selector.select_preset(SocialFormat::TweeterHeader).unwrap();
        let third = selector.select_preset(SocialFormat::FacebookCover).unwrap();
        assert!(first.seq < second.seq && second.seq < third.seq);

        assert!(!selector.render_loaded(second.seq, "https://cdn/header".to_string()));
        assert!(!selector.render_loaded(first.seq, "https://cdn/square".to_string()));
        assert_eq!(selector.state(), SelectorState::Transforming);
        assert!(selector.displayed().is_none());

        assert!(selector.render_loaded(third.seq, "https://cdn/cover".to_string()));
        assert_eq!(selector.state(), SelectorState::HasImage);
        assert_eq!(
            selector.displayed(),
            Some(&DisplayedRendering {
                url: "https://cdn/cover".to_string(),
                preset: SocialFormat::FacebookCover,
            }),
        );
    }

    #[test]
    fn failed_rendering_leaves_transforming() {
        let (mut selector, request) = with_image();
        assert!(selector.render_failed(request.seq, "404"));
        assert_eq!(selector.state(), SelectorState::HasImage);
        assert_eq!(selector.last_error(), Some("rendering failed: 404"));
    }

    #[tokio::test]
    async fn download_without_image_is_noop() {
        let selector = FormatSelector::new(SocialFormat::default());
        let fetcher = RecordingFetcher::default();
        let target = MemoryTarget::default();

        let saved = selector.download(&fetcher, &target).await.unwrap();

        assert!(saved.is_none());
        assert!(fetcher.fetched.lock().unwrap().is_empty());
        assert!(target.saved.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn download_saves_displayed_rendering() {
        let (mut selector, _) = with_image();
        let request = selector.select_preset(SocialFormat::TweeterPost).unwrap();
        selector.render_loaded(request.seq, "https://cdn/post".to_string());

        let fetcher = RecordingFetcher::default();
        let target = MemoryTarget::default();
        let saved = selector.download(&fetcher, &target).await.unwrap();

        assert_eq!(saved, Some(PathBuf::from(DOWNLOAD_FILE_NAME)));
        assert_eq!(*fetcher.fetched.lock().unwrap(), vec!["https://cdn/post".to_string()]);

        let saved = target.saved.lock().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].0, "image_transformed.jpg");
        assert_eq!(saved[0].1, Bytes::from_static(b"https://cdn/post"));
    }
}
