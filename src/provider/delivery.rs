use std::fmt;

use crate::presets::SocialFormat;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Crop {
    /// Scale to cover the target box and crop off the excess.
    Fill,
}

impl Crop {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fill => "fill",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Gravity {
    /// Let the provider pick the most interesting region to keep.
    Auto,
}

impl Gravity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
        }
    }
}

/// A crop request for a single rendering, derived from a preset.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Transformation {
    pub width: u32,
    pub height: u32,
    pub aspect_ratio: &'static str,
    pub crop: Crop,
    pub gravity: Gravity,
}

impl From<SocialFormat> for Transformation {
    fn from(format: SocialFormat) -> Self {
        let dims = format.dimensions();
        Self {
            width: dims.width,
            height: dims.height,
            aspect_ratio: dims.aspect_ratio,
            crop: Crop::Fill,
            gravity: Gravity::Auto,
        }
    }
}

/// Formats as a delivery url path component,
/// e.g. `c_fill,ar_3:1,g_auto,w_1500,h_500`.
impl fmt::Display for Transformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "c_{},ar_{},g_{},w_{},h_{}",
            self.crop.as_str(),
            self.aspect_ratio,
            self.gravity.as_str(),
            self.width,
            self.height,
        )
    }
}
