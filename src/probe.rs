use std::fmt::Display;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ProbeError;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u64,
    pub height: u64,
}

impl Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoStream {
    pub codec: String,
    pub codec_long_name: Option<String>,
    pub resolution: Resolution,
    pub bit_rate: Option<u64>,
}

/// Metadata gathered for a queued file before conversion.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    /// Length of the media in seconds, when the prober reports one.
    pub duration: Option<f64>,
    pub bit_rate: Option<u64>,
    pub size: Option<u64>,
    pub format_name: Option<String>,
    pub format_long_name: Option<String>,
    pub nb_streams: usize,
    pub video: Option<VideoStream>,
    pub audio_codecs: Vec<String>,
    pub subtitle_languages: Vec<String>,
}

impl MediaInfo {
    pub fn with_duration(duration: f64) -> Self {
        MediaInfo {
            duration: Some(duration),
            ..MediaInfo::default()
        }
    }

    /// Duration in seconds, zero when unknown.
    pub fn duration_secs(&self) -> f64 {
        self.duration.filter(|d| d.is_finite() && *d > 0.0).unwrap_or(0.0)
    }
}

/// Extracts [`MediaInfo`] from a file on disk.
pub trait Prober {
    fn probe(&self, path: &Path) -> Result<MediaInfo, ProbeError>;
}
