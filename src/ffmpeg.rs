use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::ConfigError;

pub mod probe;

pub const ENCODER: &str = "ffmpeg";
pub const PROBER: &str = "ffprobe";

/// Paths of the encoder and prober executables.
#[derive(Clone, Debug)]
pub struct FFmpeg {
    pub encoder: PathBuf,
    pub prober: PathBuf,
}

impl FFmpeg {
    /// Prefer configured paths, otherwise search `PATH`.
    pub fn locate(encoder: Option<&Path>, prober: Option<&Path>) -> Result<Self, ConfigError> {
        Ok(FFmpeg {
            encoder: tool_path(ENCODER, encoder)?,
            prober: tool_path(PROBER, prober)?,
        })
    }

    pub fn is_installed(&self) -> bool {
        let cmd = Command::new(&self.encoder)
            .arg("-version")
            .stdin(Stdio::null())
            .output();
        match cmd {
            Ok(output) => output.status.success(),
            Err(_) => false,
        }
    }

    pub fn prober(&self) -> probe::FFprobe {
        probe::FFprobe::new(self.prober.clone())
    }
}

fn tool_path(name: &str, configured: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = configured {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        tracing::warn!("configured {} not found at {}, searching PATH", name, path.display());
    }
    which::which(name).map_err(|_| ConfigError::ToolNotFound(String::from(name)))
}
