use std::str::FromStr;

use poem_openapi::Object;
use serde::Deserialize;
use strum::{Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

/// The fixed set of social media formats an uploaded image can be
/// rendered as.
///
/// The label of each variant is what the client sees and sends back,
/// e.g. `"tweeter header (3:1)"`.
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumIter,
    EnumString,
    IntoStaticStr,
    Deserialize,
)]
#[serde(try_from = "String")]
pub enum SocialFormat {
    #[strum(to_string = "instagram square (1:1)")]
    InstagramSquare,

    #[strum(to_string = "instagram portrait (4:5)")]
    InstagramPortrait,

    #[strum(to_string = "tweeter post (16:9)")]
    TweeterPost,

    #[strum(to_string = "tweeter header (3:1)")]
    TweeterHeader,

    #[strum(to_string = "facebook cover (205:78)")]
    FacebookCover,
}

impl Default for SocialFormat {
    fn default() -> Self {
        Self::InstagramSquare
    }
}

impl TryFrom<String> for SocialFormat {
    type Error = strum::ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_str(&value)
    }
}

impl SocialFormat {
    #[inline]
    pub fn label(self) -> &'static str {
        self.into()
    }

    /// The target dimensions the provider should crop to.
    pub const fn dimensions(self) -> Dimensions {
        match self {
            Self::InstagramSquare => Dimensions::new(1080, 1080, "1:1"),
            Self::InstagramPortrait => Dimensions::new(1080, 1350, "4:5"),
            Self::TweeterPost => Dimensions::new(1200, 675, "16:9"),
            Self::TweeterHeader => Dimensions::new(1500, 500, "3:1"),
            Self::FacebookCover => Dimensions::new(820, 312, "205:78"),
        }
    }

    /// All presets in table order.
    pub fn all() -> impl Iterator<Item = SocialFormat> {
        Self::iter()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
    pub aspect_ratio: &'static str,
}

impl Dimensions {
    const fn new(width: u32, height: u32, aspect_ratio: &'static str) -> Self {
        Self {
            width,
            height,
            aspect_ratio,
        }
    }
}

#[derive(Object, Debug, Clone)]
pub struct PresetInfo {
    /// The human readable label, used to select the preset.
    pub label: String,

    /// The width in pixels the image is cropped to.
    pub width: u32,

    /// The height in pixels the image is cropped to.
    pub height: u32,

    /// The aspect ratio in `W:H` form.
    #[oai(rename = "aspectRatio")]
    pub aspect_ratio: String,
}

impl From<SocialFormat> for PresetInfo {
    fn from(format: SocialFormat) -> Self {
        let dims = format.dimensions();
        Self {
            label: format.label().to_string(),
            width: dims.width,
            height: dims.height,
            aspect_ratio: dims.aspect_ratio.to_string(),
        }
    }
}
