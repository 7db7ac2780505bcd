use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

pub const MEDIA_EXTENSIONS: [&str; 22] = [
    "3gp", "asf", "avi", "dat", "divx", "dv", "f4v", "flv", "m2ts", "m4v", "mkv", "mov", "mp4",
    "mpeg", "mpg", "mts", "ogg", "ogv", "ts", "vob", "webm", "wmv",
];

pub fn is_media_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .is_some_and(|e| MEDIA_EXTENSIONS.contains(&e.as_str()))
}

/// Expands directories into the media files they contain.
pub struct FileScanner {
    pub recursive: bool,
}

impl FileScanner {
    pub fn new(recursive: bool) -> Self {
        FileScanner { recursive }
    }

    /// Media files under `dirpath`, sorted by path.
    pub fn scan(&self, dirpath: &Path) -> Vec<PathBuf> {
        let mut found = vec![];
        let mut dirpaths = vec![dirpath.to_path_buf()];
        while let Some(current_dir) = dirpaths.pop() {
            let entries = match fs::read_dir(&current_dir) {
                Ok(entries) => entries,
                Err(err) => {
                    debug!("skipping {}: {}", current_dir.display(), err);
                    continue;
                },
            };
            for entry in entries.filter_map(|e| e.ok()) {
                let Ok(ft) = entry.file_type() else {
                    continue;
                };
                let path = entry.path();
                if ft.is_file() && is_media_file(&path) {
                    found.push(path);
                } else if ft.is_dir() && self.recursive {
                    dirpaths.push(path);
                }
            }
        }
        found.sort();
        found
    }
}
