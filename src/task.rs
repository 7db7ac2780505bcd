use std::fmt::Display;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::probe::MediaInfo;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    #[default]
    Todo,
    Running,
    Done,
    Stopped,
}

impl TaskStatus {
    pub fn label(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "To Convert",
            TaskStatus::Running => "Converting...",
            TaskStatus::Done => "Done!",
            TaskStatus::Stopped => "Stopped!",
        }
    }
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// One queued source file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversionTask {
    pub path: PathBuf,
    pub info: MediaInfo,
    pub status: TaskStatus,
    pub preset: String,
    /// Set when the encoder reported an error for this file.
    pub error: Option<String>,
}

impl ConversionTask {
    pub fn new(path: PathBuf, info: MediaInfo, preset: &str) -> Self {
        ConversionTask {
            path,
            info,
            status: TaskStatus::Todo,
            preset: String::from(preset),
            error: None,
        }
    }

    pub fn name(&self, with_extension: bool) -> String {
        let name = match with_extension {
            true => self.path.file_name(),
            false => self.path.file_stem(),
        };
        name.map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
    }

    pub fn duration(&self) -> f64 {
        self.info.duration_secs()
    }

    pub fn source(&self) -> &Path {
        &self.path
    }

    pub fn is_todo(&self) -> bool {
        self.status == TaskStatus::Todo
    }

    /// Put the task back in line for the next run.
    pub fn reset(&mut self) {
        self.status = TaskStatus::Todo;
        self.error = None;
    }
}
