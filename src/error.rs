use std::io;
use std::path::{Path, PathBuf};

/// Errors raised while loading, querying or persisting conversion profiles.
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("unable to load profiles from {}: {message}", path.display())]
    Load { path: PathBuf, message: String },

    #[error("profile not found: {0}")]
    NotFound(String),

    #[error("permission denied: {}", .0.display())]
    Permission(PathBuf),

    #[error("invalid profile definition: {0}")]
    Format(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ProfileError {
    pub fn load(path: &Path, message: impl Into<String>) -> Self {
        ProfileError::Load {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }

    /// Map an io error on `path` to the closest profile error.
    pub fn from_io(path: &Path, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::PermissionDenied => ProfileError::Permission(path.to_path_buf()),
            _ => ProfileError::Io(err),
        }
    }
}

/// Metadata extraction failed for a single file.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("unable to run {}: {source}", prober.display())]
    Spawn { prober: PathBuf, source: io::Error },

    #[error("error probing {}: {message}", path.display())]
    Failed { path: PathBuf, message: String },

    #[error("unable to parse prober output: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ProbeError {
    pub fn for_file(path: &Path, message: &str) -> Self {
        ProbeError::Failed {
            path: path.to_path_buf(),
            message: String::from(message),
        }
    }
}

/// Pre-flight failures while building an encoder invocation.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("output file already exists: {}", .0.display())]
    OutputExists(PathBuf),

    #[error("input file not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("can not write to output directory: {}", .0.display())]
    Write(PathBuf),

    #[error("unknown preset {preset:?} for profile {profile:?}")]
    UnknownPreset { profile: String, preset: String },
}

/// The encoder process could not be started.
#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("permission denied executing {}", .0.display())]
    Permission(PathBuf),

    #[error("executable not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("file already exists while starting {}", .0.display())]
    AlreadyExists(PathBuf),

    #[error("an encoder process is already running")]
    Busy,

    #[error("unable to start {}: {source}", program.display())]
    Io { program: PathBuf, source: io::Error },
}

impl SpawnError {
    pub fn from_io(program: &Path, err: io::Error) -> Self {
        let program = program.to_path_buf();
        match err.kind() {
            io::ErrorKind::PermissionDenied => SpawnError::Permission(program),
            io::ErrorKind::NotFound => SpawnError::NotFound(program),
            io::ErrorKind::AlreadyExists => SpawnError::AlreadyExists(program),
            _ => SpawnError::Io { program, source: err },
        }
    }

    /// Errors that leave the encoder unusable for every remaining file.
    pub fn is_run_fatal(&self) -> bool {
        matches!(self, SpawnError::NotFound(_) | SpawnError::Permission(_))
    }
}

/// Best-effort filesystem cleanup failed. Never fatal.
#[derive(Debug, thiserror::Error)]
#[error("unable to delete {}: {source}", path.display())]
pub struct CleanupError {
    pub path: PathBuf,
    pub source: io::Error,
}

/// Settings file problems.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unable to read config file {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("unable to parse config file {}: {source}", path.display())]
    Parse { path: PathBuf, source: toml::de::Error },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("tool not found: {0}")]
    ToolNotFound(String),
}

/// Errors returned by [`crate::converter::Converter`] commands.
#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("not allowed while a conversion is running")]
    Busy,

    #[error("no task at position {0}")]
    NoSuchTask(usize),

    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Spawn(#[from] SpawnError),

    #[error(transparent)]
    Cleanup(#[from] CleanupError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_error_kinds() {
        let program = PathBuf::from("ffmpeg");
        let err = SpawnError::from_io(&program, io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(err, SpawnError::NotFound(_)));
        assert!(err.is_run_fatal());

        let err = SpawnError::from_io(&program, io::Error::from(io::ErrorKind::AlreadyExists));
        assert!(matches!(err, SpawnError::AlreadyExists(_)));
        assert!(!err.is_run_fatal());

        let err = SpawnError::from_io(&program, io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(err, SpawnError::Permission(_)));
    }

    #[test]
    fn test_display() {
        let err = BuildError::OutputExists(PathBuf::from("/out/a.mp4"));
        assert_eq!(err.to_string(), "output file already exists: /out/a.mp4");
        let err =
            ProbeError::for_file(&PathBuf::from("a.mkv"), "ffprobe did not exit successfully.");
        assert_eq!(err.to_string(), "error probing a.mkv: ffprobe did not exit successfully.");
    }
}
