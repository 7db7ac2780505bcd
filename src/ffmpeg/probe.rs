use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ProbeError;
use crate::probe::{MediaInfo, Prober, Resolution, VideoStream};

#[derive(Serialize, Deserialize, Debug, Default)]
struct FFProbeJsonOutput {
    #[serde(default)]
    pub streams: Vec<FFProbeJsonStream>,
    pub format: Option<FFProbeJsonFormat>,
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct FFProbeJsonStream {
    pub codec_type: Option<String>,
    pub codec_name: Option<String>,
    pub codec_long_name: Option<String>,
    pub width: Option<u64>,
    pub height: Option<u64>,
    pub bit_rate: Option<String>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct FFProbeJsonFormat {
    pub nb_streams: Option<usize>,
    pub format_name: Option<String>,
    pub format_long_name: Option<String>,
    pub duration: Option<String>,
    pub size: Option<String>,
    pub bit_rate: Option<String>,
}

/// Runs `ffprobe` once per file and reads its JSON report.
#[derive(Clone, Debug)]
pub struct FFprobe {
    executable: PathBuf,
}

impl FFprobe {
    pub fn new(executable: PathBuf) -> Self {
        FFprobe { executable }
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }
}

impl Prober for FFprobe {
    fn probe(&self, path: &Path) -> Result<MediaInfo, ProbeError> {
        debug!(file = %path.display(), "probing");
        let output = Command::new(&self.executable)
            .args(["-v", "error", "-of", "json", "-show_format", "-show_streams"])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| ProbeError::Spawn {
                prober: self.executable.clone(),
                source,
            })?;
        if output.status.success() {
            let utf8 = String::from_utf8_lossy(&output.stdout);
            parse_ffprobe_json(path, &utf8)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = stderr
                .lines()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("ffprobe did not exit successfully.");
            Err(ProbeError::for_file(path, message.trim()))
        }
    }
}

fn parse_ffprobe_json(path: &Path, json: &str) -> Result<MediaInfo, ProbeError> {
    let deserialized = serde_json::from_str::<FFProbeJsonOutput>(json)?;
    let format = match deserialized.format {
        Some(format) => format,
        None => return Err(ProbeError::for_file(path, "no format information reported.")),
    };

    let video = deserialized
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .map(|s| VideoStream {
            codec: s.codec_name.clone().unwrap_or_default(),
            codec_long_name: s.codec_long_name.clone(),
            resolution: Resolution {
                width: s.width.unwrap_or(0),
                height: s.height.unwrap_or(0),
            },
            bit_rate: parse_number(&s.bit_rate),
        });

    let audio_codecs = deserialized
        .streams
        .iter()
        .filter(|s| s.codec_type.as_deref() == Some("audio"))
        .filter_map(|s| s.codec_name.clone())
        .collect();

    let subtitle_languages = deserialized
        .streams
        .iter()
        .filter(|s| s.codec_type.as_deref() == Some("subtitle"))
        .map(|s| s.tags.get("language").cloned().unwrap_or_else(|| String::from("und")))
        .collect();

    Ok(MediaInfo {
        duration: format.duration.as_deref().and_then(|d| d.trim().parse().ok()),
        bit_rate: parse_number(&format.bit_rate),
        size: parse_number(&format.size),
        format_name: format.format_name,
        format_long_name: format.format_long_name,
        nb_streams: format.nb_streams.unwrap_or(deserialized.streams.len()),
        video,
        audio_codecs,
        subtitle_languages,
    })
}

fn parse_number(value: &Option<String>) -> Option<u64> {
    value.as_deref().and_then(|v| v.trim().parse().ok())
}
