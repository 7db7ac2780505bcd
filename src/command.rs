//! Turns a queued file plus a preset into an encoder command line.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::BuildError;
use crate::profile::{Profile, ProfileStore};
use crate::task::{ConversionTask, TaskStatus};

pub const SUBTITLE_EXTENSIONS: [&str; 3] = ["srt", "ssa", "stl"];
const TAG_SEPARATOR: &str = "__";

#[derive(Clone, Debug)]
pub struct BuildOptions {
    pub profile: String,
    pub output_dir: PathBuf,
    pub tag_output: bool,
    pub embed_subtitles: bool,
}

/// A ready-to-spawn encoder invocation.
#[derive(Clone, Debug, PartialEq)]
pub struct Invocation {
    pub executable: PathBuf,
    pub args: Vec<OsString>,
    pub output: PathBuf,
}

impl Invocation {
    pub fn command_line(&self) -> String {
        let mut parts = vec![self.executable.to_string_lossy().into_owned()];
        parts.extend(self.args.iter().map(|a| {
            let a = a.to_string_lossy();
            match a.contains(' ') {
                true => format!("{:?}", a),
                false => a.into_owned(),
            }
        }));
        parts.join(" ")
    }
}

/// `output_dir/<stem>[__<profile>].<ext>`
pub fn output_path(
    source: &Path,
    output_dir: &Path,
    tag_output: bool,
    profile: &Profile,
) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match tag_output {
        true => format!("{stem}{TAG_SEPARATOR}{}.{}", profile.name, profile.extension()),
        false => format!("{stem}.{}", profile.extension()),
    };
    output_dir.join(name)
}

/// Sibling subtitle file of `source`, if any.
pub fn subtitle_sidecar(source: &Path) -> Option<PathBuf> {
    SUBTITLE_EXTENSIONS
        .iter()
        .flat_map(|ext| [ext.to_string(), ext.to_uppercase()])
        .map(|ext| source.with_extension(ext))
        .find(|p| p.is_file())
}

pub fn build(
    task: &ConversionTask,
    preset: &str,
    options: &BuildOptions,
    profiles: &ProfileStore,
    encoder: &Path,
) -> Result<Invocation, BuildError> {
    if !is_writable(&options.output_dir) {
        return Err(BuildError::Write(options.output_dir.clone()));
    }
    if !task.path.is_file() {
        return Err(BuildError::SourceNotFound(task.path.clone()));
    }
    let unknown = || BuildError::UnknownPreset {
        profile: options.profile.clone(),
        preset: String::from(preset),
    };
    let profile = profiles.profile(&options.profile).map_err(|_| unknown())?;
    let params = profile.preset(preset).ok_or_else(unknown)?.params.as_str();

    let output = output_path(&task.path, &options.output_dir, options.tag_output, profile);
    if task.status == TaskStatus::Todo && output.exists() {
        return Err(BuildError::OutputExists(output));
    }

    let mut args: Vec<OsString> = vec![OsString::from("-i"), task.path.clone().into_os_string()];
    if options.embed_subtitles {
        if let Some(subtitle) = subtitle_sidecar(&task.path) {
            args.push(OsString::from("-vf"));
            args.push(OsString::from(subtitle_filter(&subtitle)));
        }
    }
    args.extend(split_params(params).into_iter().map(OsString::from));
    args.push(OsString::from("-threads"));
    args.push(OsString::from(thread_count().to_string()));
    args.push(OsString::from("-y"));
    args.push(output.clone().into_os_string());

    let invocation = Invocation {
        executable: encoder.to_path_buf(),
        args,
        output,
    };
    debug!("{}", invocation.command_line());
    Ok(invocation)
}

fn subtitle_filter(subtitle: &Path) -> String {
    format!(
        "subtitles='{}':force_style='Fontsize=24':charenc=cp1252",
        subtitle.display()
    )
}

fn thread_count() -> usize {
    num_cpus::get().saturating_sub(1)
}

fn is_writable(dir: &Path) -> bool {
    dir.is_dir() && tempfile::tempfile_in(dir).is_ok()
}

/// Whitespace split that keeps single- or double-quoted runs together.
pub fn split_params(params: &str) -> Vec<String> {
    let mut args = vec![];
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut in_arg = false;
    for c in params.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), c) => current.push(c),
            (None, '"' | '\'') => {
                quote = Some(c);
                in_arg = true;
            },
            (None, c) if c.is_whitespace() => {
                if in_arg {
                    args.push(std::mem::take(&mut current));
                    in_arg = false;
                }
            },
            (None, c) => {
                current.push(c);
                in_arg = true;
            },
        }
    }
    if in_arg {
        args.push(current);
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::MediaInfo;
    use std::fs;

    fn fixture() -> (tempfile::TempDir, ProfileStore, ConversionTask, BuildOptions) {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::open(dir.path().join("profiles.json"), "en").unwrap();
        let source = dir.path().join("Dad.mpg");
        fs::write(&source, b"data").unwrap();
        let out = dir.path().join("out");
        fs::create_dir(&out).unwrap();
        let task = ConversionTask::new(source, MediaInfo::with_duration(10.0), "Standard Quality");
        let options = BuildOptions {
            profile: String::from("MP4"),
            output_dir: out,
            tag_output: false,
            embed_subtitles: false,
        };
        (dir, store, task, options)
    }

    fn args(inv: &Invocation) -> Vec<String> {
        inv.args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn test_output_path() {
        let profile = Profile {
            name: String::from("DVD"),
            extension: String::from(".mpg"),
            presets: vec![],
        };
        let src = Path::new("/videos/Dad.avi");
        assert_eq!(
            output_path(src, Path::new("/out"), false, &profile),
            PathBuf::from("/out/Dad.mpg")
        );
        assert_eq!(
            output_path(src, Path::new("/out"), true, &profile),
            PathBuf::from("/out/Dad__DVD.mpg")
        );
    }

    #[test]
    fn test_build_args() {
        let (_dir, store, task, options) = fixture();
        let inv = build(&task, "Standard Quality", &options, &store, Path::new("ffmpeg")).unwrap();
        let args = args(&inv);
        assert_eq!(args[0], "-i");
        assert_eq!(PathBuf::from(&args[1]), task.path);
        assert!(args.contains(&String::from("libx264")));
        assert_eq!(args[args.len() - 4], "-threads");
        assert_eq!(args[args.len() - 2], "-y");
        assert_eq!(inv.output, options.output_dir.join("Dad.mp4"));
        assert_eq!(PathBuf::from(&args[args.len() - 1]), inv.output);
    }

    #[test]
    fn test_existing_output_only_for_todo() {
        let (_dir, store, mut task, options) = fixture();
        fs::write(options.output_dir.join("Dad.mp4"), b"old").unwrap();
        let err =
            build(&task, "Standard Quality", &options, &store, Path::new("ffmpeg")).unwrap_err();
        assert!(matches!(err, BuildError::OutputExists(_)));

        task.status = TaskStatus::Done;
        assert!(build(&task, "Standard Quality", &options, &store, Path::new("ffmpeg")).is_ok());
        task.status = TaskStatus::Stopped;
        assert!(build(&task, "Standard Quality", &options, &store, Path::new("ffmpeg")).is_ok());
    }

    #[test]
    fn test_check_order() {
        let (_dir, store, mut task, mut options) = fixture();
        let missing_dir = options.output_dir.join("missing");
        task.path = task.path.with_file_name("gone.mpg");
        options.output_dir = missing_dir.clone();
        let err =
            build(&task, "Standard Quality", &options, &store, Path::new("ffmpeg")).unwrap_err();
        assert!(matches!(err, BuildError::Write(p) if p == missing_dir));

        fs::create_dir(&missing_dir).unwrap();
        let err = build(&task, "nope", &options, &store, Path::new("ffmpeg")).unwrap_err();
        assert!(matches!(err, BuildError::SourceNotFound(_)));
    }

    #[test]
    fn test_unknown_preset() {
        let (_dir, store, task, mut options) = fixture();
        let err = build(&task, "nope", &options, &store, Path::new("ffmpeg")).unwrap_err();
        assert!(matches!(err, BuildError::UnknownPreset { .. }));
        options.profile = String::from("nope");
        let err =
            build(&task, "Standard Quality", &options, &store, Path::new("ffmpeg")).unwrap_err();
        assert!(matches!(err, BuildError::UnknownPreset { .. }));
    }

    #[test]
    fn test_subtitles() {
        let (_dir, store, task, mut options) = fixture();
        options.embed_subtitles = true;
        let inv = build(&task, "Standard Quality", &options, &store, Path::new("ffmpeg")).unwrap();
        assert!(!args(&inv).contains(&String::from("-vf")));

        let subtitle = task.path.with_extension("SRT");
        fs::write(&subtitle, b"1\n").unwrap();
        let inv = build(&task, "Standard Quality", &options, &store, Path::new("ffmpeg")).unwrap();
        let args = args(&inv);
        assert_eq!(args[2], "-vf");
        assert_eq!(
            args[3],
            format!("subtitles='{}':force_style='Fontsize=24':charenc=cp1252", subtitle.display())
        );
    }

    #[test]
    fn test_split_params() {
        assert_eq!(split_params("  -c:v  libx264 -crf 23 "), vec!["-c:v", "libx264", "-crf", "23"]);
        assert_eq!(
            split_params(r#"-metadata title="My Movie" -vf 'scale=1280:-2'"#),
            vec!["-metadata", "title=My Movie", "-vf", "scale=1280:-2"]
        );
        assert_eq!(split_params(r#"-x """#), vec!["-x", ""]);
        assert!(split_params("").is_empty());
    }
}
