//! Drives the queue through the encoder one file at a time.
//!
//! [`Converter`] owns every piece of mutable state. Front ends call its
//! commands, pump it with [`Converter::poll`] and listen for
//! [`ConverterMessage`]s on the channels returned by [`Converter::subscribe`].

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::capabilities::Capabilities;
use crate::command::{self, BuildOptions};
use crate::error::{BuildError, ConversionError, ProfileError};
use crate::probe::Prober;
use crate::profile::{Profile, ProfileStore};
use crate::progress::{format_duration, OutputReader, Timer};
use crate::queue::{AddFiles, TaskQueue};
use crate::supervisor::{ExitKind, Supervisor, SupervisorEvent};
use crate::task::{ConversionTask, TaskStatus};

const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(3);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionOptions {
    pub profile: String,
    /// Preset given to newly added files. Empty selects the profile's first preset.
    pub preset: String,
    pub output_dir: PathBuf,
    pub tag_output: bool,
    pub embed_subtitles: bool,
    pub delete_input_on_success: bool,
    pub shutdown_on_finish: bool,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        ConversionOptions {
            profile: String::from("MP4"),
            preset: String::new(),
            output_dir: dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")),
            tag_output: false,
            embed_subtitles: false,
            delete_input_on_success: false,
            shutdown_on_finish: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProgressUpdate {
    pub index: usize,
    pub file_name: String,
    /// Percent of the current file.
    pub operation: u8,
    /// Percent of the whole run.
    pub process: u8,
    pub bitrate: String,
    pub remaining: String,
    pub elapsed: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum FileOutcome {
    Done,
    Stopped,
    Error(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum RunOutcome {
    Completed { shutdown_requested: bool },
    StoppedByUser,
    Failed(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum ConverterMessage {
    FileStarted { index: usize, name: String },
    Progress(ProgressUpdate),
    FileFinished { index: usize, name: String, outcome: FileOutcome },
    Warning(String),
    RunFinished(RunOutcome),
}

pub struct Converter {
    queue: TaskQueue,
    profiles: ProfileStore,
    supervisor: Supervisor,
    reader: OutputReader,
    timer: Timer,
    options: ConversionOptions,
    encoder: PathBuf,
    prober: Box<dyn Prober>,
    stop_grace: Duration,
    converting: bool,
    finished_duration: f64,
    run_error: Option<String>,
    subscribers: Vec<Sender<ConverterMessage>>,
}

impl Converter {
    pub fn new(
        profiles: ProfileStore,
        encoder: PathBuf,
        prober: Box<dyn Prober>,
        options: ConversionOptions,
    ) -> Result<Self, ConversionError> {
        let mut converter = Converter {
            queue: TaskQueue::new(),
            profiles,
            supervisor: Supervisor::new(),
            reader: OutputReader::new(),
            timer: Timer::new(),
            options,
            encoder,
            prober,
            stop_grace: DEFAULT_STOP_GRACE,
            converting: false,
            finished_duration: 0.0,
            run_error: None,
            subscribers: vec![],
        };
        converter.profiles.profile(&converter.options.profile)?;
        converter.reconcile_options();
        Ok(converter)
    }

    pub fn stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn subscribe(&mut self) -> Receiver<ConverterMessage> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    fn publish(&self, msg: ConverterMessage) {
        for tx in &self.subscribers {
            let _ = tx.send(msg.clone());
        }
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub fn options(&self) -> &ConversionOptions {
        &self.options
    }

    pub fn profiles(&self) -> &ProfileStore {
        &self.profiles
    }

    pub fn is_converting(&self) -> bool {
        self.converting
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities::evaluate(&self.queue, self.converting)
    }

    /// Seconds of media in this run: the converted part of files already
    /// handled, the running file and everything still waiting. `Todo` files
    /// behind the cursor were skipped and do not count.
    pub fn run_duration(&self) -> f64 {
        let cursor = self.queue.position();
        let waiting: f64 = self
            .queue
            .iter()
            .enumerate()
            .filter(|(i, t)| match t.status {
                TaskStatus::Running => true,
                TaskStatus::Todo => cursor.is_none_or(|c| *i >= c),
                _ => false,
            })
            .map(|(_, t)| t.duration())
            .sum();
        self.finished_duration + waiting
    }

    fn current_profile(&self) -> Result<&Profile, ProfileError> {
        self.profiles.profile(&self.options.profile)
    }

    /// Keep profile and preset pointing at something that exists.
    fn reconcile_options(&mut self) {
        let profiles = self.profiles.profiles();
        let profile = match profiles.iter().find(|p| p.name == self.options.profile) {
            Some(p) => p,
            None => match profiles.first() {
                Some(p) => p,
                None => return,
            },
        };
        let first_preset = profile.first_preset().map(|p| p.name.clone()).unwrap_or_default();
        let preset_ok = profile.preset(&self.options.preset).is_some();
        let profile_name = profile.name.clone();
        let known_presets: Vec<String> = profile.presets.iter().map(|p| p.name.clone()).collect();

        if profile_name != self.options.profile {
            warn!("profile {:?} not available, using {:?}", self.options.profile, profile_name);
            self.options.profile = profile_name;
        }
        if !preset_ok {
            self.options.preset = first_preset.clone();
        }
        for task in self.queue.iter_mut() {
            if !known_presets.contains(&task.preset) {
                task.preset = first_preset.clone();
            }
        }
    }

    fn ensure_idle(&self) -> Result<(), ConversionError> {
        match self.converting {
            true => Err(ConversionError::Busy),
            false => Ok(()),
        }
    }

    /// Probe and queue `paths` with the current preset. Allowed during a run.
    pub fn add_files(&mut self, paths: Vec<PathBuf>) -> AddFiles<'_> {
        self.queue.add(paths, self.prober.as_ref(), &self.options.preset)
    }

    pub fn remove_file(&mut self, index: usize) -> Result<ConversionTask, ConversionError> {
        self.ensure_idle()?;
        self.queue.remove(index).ok_or(ConversionError::NoSuchTask(index))
    }

    pub fn clear_queue(&mut self) -> Result<(), ConversionError> {
        self.ensure_idle()?;
        self.queue.clear();
        Ok(())
    }

    pub fn change_output_dir(&mut self, dir: &Path) -> Result<(), ConversionError> {
        self.ensure_idle()?;
        self.options.output_dir = dir.to_path_buf();
        self.queue.set_all_status(TaskStatus::Todo);
        Ok(())
    }

    pub fn set_tag_output(&mut self, tag: bool) -> Result<(), ConversionError> {
        self.ensure_idle()?;
        self.options.tag_output = tag;
        self.queue.set_all_status(TaskStatus::Todo);
        Ok(())
    }

    pub fn set_embed_subtitles(&mut self, embed: bool) -> Result<(), ConversionError> {
        self.ensure_idle()?;
        self.options.embed_subtitles = embed;
        self.queue.set_all_status(TaskStatus::Todo);
        Ok(())
    }

    pub fn set_delete_input_on_success(&mut self, delete: bool) -> Result<(), ConversionError> {
        self.ensure_idle()?;
        self.options.delete_input_on_success = delete;
        Ok(())
    }

    pub fn set_shutdown_on_finish(&mut self, shutdown: bool) {
        self.options.shutdown_on_finish = shutdown;
    }

    /// Assign `preset` to one task, or to every task and to new files when `index` is `None`.
    pub fn change_preset(
        &mut self,
        index: Option<usize>,
        preset: &str,
    ) -> Result<(), ConversionError> {
        self.ensure_idle()?;
        if self.current_profile()?.preset(preset).is_none() {
            let name = format!("{}/{}", self.options.profile, preset);
            return Err(ProfileError::NotFound(name).into());
        }
        match index {
            Some(i) => {
                let task = self.queue.get_mut(i).ok_or(ConversionError::NoSuchTask(i))?;
                task.preset = String::from(preset);
                task.reset();
            },
            None => {
                self.options.preset = String::from(preset);
                for task in self.queue.iter_mut() {
                    task.preset = String::from(preset);
                }
                self.queue.set_all_status(TaskStatus::Todo);
            },
        }
        Ok(())
    }

    pub fn change_profile(&mut self, name: &str) -> Result<(), ConversionError> {
        self.ensure_idle()?;
        let first = self
            .profiles
            .profile(name)?
            .first_preset()
            .map(|p| p.name.clone())
            .unwrap_or_default();
        self.options.profile = String::from(name);
        self.options.preset = first.clone();
        for task in self.queue.iter_mut() {
            task.preset = first.clone();
        }
        self.queue.set_all_status(TaskStatus::Todo);
        Ok(())
    }

    pub fn export_profiles(&self, target_dir: &Path) -> Result<PathBuf, ConversionError> {
        Ok(self.profiles.export(target_dir)?)
    }

    pub fn import_profiles(&mut self, file: &Path) -> Result<(), ConversionError> {
        self.ensure_idle()?;
        self.profiles.import(file)?;
        self.reconcile_options();
        Ok(())
    }

    pub fn restore_profiles(&mut self) -> Result<(), ConversionError> {
        self.ensure_idle()?;
        self.profiles.restore_defaults()?;
        self.reconcile_options();
        Ok(())
    }

    pub fn add_preset(
        &mut self,
        profile: &str,
        extension: &str,
        preset: &str,
        params: &str,
    ) -> Result<(), ConversionError> {
        self.ensure_idle()?;
        self.profiles.add_preset(profile, extension, preset, params)?;
        Ok(())
    }

    fn build_options(&self) -> BuildOptions {
        BuildOptions {
            profile: self.options.profile.clone(),
            output_dir: self.options.output_dir.clone(),
            tag_output: self.options.tag_output,
            embed_subtitles: self.options.embed_subtitles,
        }
    }

    /// Begin converting every `Todo` task. Does nothing when there is nothing to do.
    pub fn start_conversion(&mut self) -> Result<(), ConversionError> {
        self.ensure_idle()?;
        if !self.queue.has_todo() {
            debug!("nothing to convert");
            return Ok(());
        }
        let todo = self.queue.iter().filter(|t| t.is_todo()).count();
        info!("starting conversion of {} file(s)", todo);
        self.converting = true;
        self.run_error = None;
        self.finished_duration = 0.0;
        self.queue.reset_position();
        self.timer.reset();
        self.timer.init_process_start_time();
        self.start_next();
        Ok(())
    }

    fn start_next(&mut self) {
        loop {
            self.timer.reset_progress_times();
            self.reader.reset();
            let Some(index) = self.queue.advance() else {
                self.end_run();
                return;
            };
            let Some(task) = self.queue.get(index) else {
                continue;
            };
            if !task.is_todo() {
                continue;
            }

            let name = task.name(true);
            let options = self.build_options();
            let built = command::build(task, &task.preset, &options, &self.profiles, &self.encoder);
            let invocation = match built {
                Ok(invocation) => invocation,
                Err(BuildError::OutputExists(path)) => {
                    let message = format!(
                        "skipping {}: output file already exists: {}",
                        name,
                        path.display()
                    );
                    warn!("{}", message);
                    self.publish(ConverterMessage::Warning(message));
                    continue;
                },
                Err(err @ BuildError::SourceNotFound(_)) => {
                    self.fail_file(index, err.to_string());
                    continue;
                },
                Err(err) => {
                    self.fail_run(err.to_string());
                    return;
                },
            };

            match self.supervisor.start(&invocation.executable, &invocation.args) {
                Ok(()) => {
                    self.queue.set_current_status(TaskStatus::Running);
                    self.timer.init_operation_start_time();
                    info!("converting {}", name);
                    self.publish(ConverterMessage::FileStarted { index, name });
                    return;
                },
                Err(err) if err.is_run_fatal() => {
                    self.fail_run(err.to_string());
                    return;
                },
                Err(err) => {
                    self.fail_file(index, err.to_string());
                    continue;
                },
            }
        }
    }

    fn fail_file(&mut self, index: usize, message: String) {
        warn!("{}", message);
        let name = match self.queue.get_mut(index) {
            Some(task) => {
                task.status = TaskStatus::Stopped;
                task.error = Some(message.clone());
                task.name(true)
            },
            None => return,
        };
        self.publish(ConverterMessage::FileFinished {
            index,
            name,
            outcome: FileOutcome::Error(message),
        });
    }

    fn fail_run(&mut self, message: String) {
        error!("{}", message);
        self.run_error = Some(message);
        self.end_run();
    }

    fn end_run(&mut self) {
        let outcome = match self.run_error.take() {
            Some(err) => RunOutcome::Failed(err),
            None if !self.queue.all_stopped() => RunOutcome::Completed {
                shutdown_requested: self.options.shutdown_on_finish,
            },
            None => RunOutcome::StoppedByUser,
        };
        info!("conversion finished: {:?}", outcome);
        self.converting = false;
        self.finished_duration = 0.0;
        self.timer.reset();
        self.queue.reset_position();
        self.publish(ConverterMessage::RunFinished(outcome));
    }

    /// Handle at most one supervisor event. Returns whether a run is still in progress.
    pub fn poll(&mut self, timeout: Duration) -> bool {
        if !self.converting {
            return false;
        }
        match self.supervisor.next_event_timeout(timeout) {
            Some(SupervisorEvent::Output(chunk)) => self.ready_read(&chunk),
            Some(SupervisorEvent::Terminated) => self.finish_file(),
            None => (),
        }
        self.converting
    }

    pub fn run_to_completion(&mut self) {
        while self.converting {
            match self.supervisor.next_event() {
                Some(SupervisorEvent::Output(chunk)) => self.ready_read(&chunk),
                Some(SupervisorEvent::Terminated) | None => self.finish_file(),
            }
        }
    }

    fn ready_read(&mut self, chunk: &str) {
        self.reader.update_read(chunk);
        self.timer.init_process_start_time();
        self.timer.init_operation_start_time();
        if !self.reader.time_seen
            && self.supervisor.error().is_none()
            && self.supervisor.catch_errors()
        {
            warn!("encoder reported: {}", self.supervisor.error().unwrap_or_default());
        }
        if !self.reader.has_time_read {
            return;
        }
        self.timer.update_time(self.reader.time);
        self.timer.update_cum_times();
        if let Some(update) = self.progress_update() {
            self.publish(ConverterMessage::Progress(update));
        }
    }

    fn progress_update(&self) -> Option<ProgressUpdate> {
        let index = self.queue.position()?;
        let task = self.queue.get(index)?;
        let duration = task.duration();
        Some(ProgressUpdate {
            index,
            file_name: task.name(true),
            operation: self.timer.operation_progress(duration),
            process: self.timer.process_progress(self.run_duration()),
            bitrate: self.reader.bitrate.clone(),
            remaining: self.timer.operation_remaining_time(duration),
            elapsed: format_duration(self.timer.process_elapsed().as_secs_f64()),
        })
    }

    fn finish_file(&mut self) {
        let exit = self.supervisor.exit_status();
        let code = self.supervisor.exit_code();
        if exit != Some(ExitKind::Normal) {
            self.supervisor.catch_errors();
        }
        let encoder_error = self.supervisor.take_error();
        self.supervisor.close();

        let Some(index) = self.queue.position() else {
            self.start_next();
            return;
        };
        let Some(task) = self.queue.get(index) else {
            self.start_next();
            return;
        };
        let name = task.name(true);
        let duration = task.duration();
        let stop_requested = task.status == TaskStatus::Stopped;

        let outcome = if stop_requested {
            info!("stopped {}", name);
            self.delete_output();
            FileOutcome::Stopped
        } else if exit == Some(ExitKind::Normal) {
            self.timer.update_time(duration);
            self.timer.update_cum_times();
            if let Some(update) = self.progress_update() {
                self.publish(ConverterMessage::Progress(update));
            }
            self.queue.set_current_status(TaskStatus::Done);
            info!("converted {}", name);
            if self.options.delete_input_on_success && !self.queue.delete_running_input() {
                self.publish(ConverterMessage::Warning(format!("unable to delete {}", name)));
            }
            FileOutcome::Done
        } else {
            let message = encoder_error.unwrap_or_else(|| match code {
                Some(code) => format!("encoder exited with code {}", code),
                None => String::from("encoder terminated abnormally"),
            });
            warn!("{} failed: {}", name, message);
            if let Some(task) = self.queue.current_mut() {
                task.status = TaskStatus::Stopped;
                task.error = Some(message.clone());
            }
            self.delete_output();
            self.run_error.get_or_insert_with(|| message.clone());
            FileOutcome::Error(message)
        };

        self.finished_duration += match outcome {
            FileOutcome::Done => duration,
            _ => self.timer.operation_cum_time().min(duration),
        };
        self.publish(ConverterMessage::FileFinished { index, name, outcome });
        self.start_next();
    }

    fn delete_output(&self) {
        let Ok(profile) = self.current_profile() else {
            return;
        };
        let deleted = self.queue.delete_running_output(
            &self.options.output_dir,
            self.options.tag_output,
            profile,
        );
        if let Err(err) = deleted {
            warn!("{}", err);
            self.publish(ConverterMessage::Warning(err.to_string()));
        }
    }

    fn terminate(&mut self) {
        if !self.supervisor.request_stop(self.stop_grace) {
            debug!("encoder ignored the stop request; killing it");
            self.supervisor.kill();
        }
    }

    /// Stop the running file and move on to the next one.
    pub fn stop_current(&mut self) {
        if !self.converting {
            return;
        }
        self.queue.set_current_status(TaskStatus::Stopped);
        self.terminate();
    }

    /// Stop the running file and give up on everything not yet done.
    pub fn stop_all(&mut self) {
        if !self.converting {
            return;
        }
        for task in self.queue.iter_mut().filter(|t| t.status != TaskStatus::Done) {
            task.status = TaskStatus::Stopped;
        }
        self.terminate();
    }

    /// Kill the encoder right away; for host shutdown.
    pub fn shutdown(&mut self) {
        if !self.converting {
            return;
        }
        self.queue.set_current_status(TaskStatus::Stopped);
        self.supervisor.kill();
        self.supervisor.close();
        self.delete_output();
        self.converting = false;
        self.timer.reset();
        self.queue.reset_position();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::queue::tests::FakeProber;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    const FAST: &str = r#"
echo "Input #0, mpeg, from '$2':" >&2
echo "frame=  10 fps=0.0 q=28.0 size=       0kB time=00:00:05.00 bitrate=  10.0kbits/s speed=10x" >&2
echo "frame=  20 fps=0.0 q=28.0 size=       1kB time=00:00:09.50 bitrate=  12.5kbits/s speed=10x" >&2
echo converted > "$last"
"#;

    const SLOW: &str = r#"
echo "frame=  10 fps=0.0 q=28.0 size=       0kB time=00:00:01.00 bitrate=  10.0kbits/s speed=1x" >&2
exec sleep 30
"#;

    const BROKEN: &str = r#"
echo "Unknown encoder 'libx264'" >&2
echo partial > "$last"
exit 1
"#;

    struct Fixture {
        dir: tempfile::TempDir,
        converter: Converter,
        rx: Receiver<ConverterMessage>,
    }

    impl Fixture {
        fn source(&self, name: &str) -> PathBuf {
            self.dir.path().join(name)
        }

        fn output(&self, stem: &str) -> PathBuf {
            self.dir.path().join("out").join(format!("{stem}.mp4"))
        }

        fn messages(&self) -> Vec<ConverterMessage> {
            self.rx.try_iter().collect()
        }
    }

    /// Sources named `*slow*` hang, `*broken*` fail, everything else converts.
    fn fixture(files: &[(&str, f64)], encoder: Option<&str>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        fs::create_dir(&out).unwrap();
        let script = dir.path().join("fake-ffmpeg");
        let body = format!(
            "#!/bin/sh\nfor last; do :; done\ncase \"$2\" in\n*slow*) {SLOW} ;;\n*broken*) {BROKEN} ;;\n*) {FAST} ;;\nesac\n"
        );
        fs::write(&script, body).unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let mut entries = vec![];
        for (name, duration) in files {
            let path = dir.path().join(name);
            fs::write(&path, b"media").unwrap();
            entries.push((path, *duration));
        }
        let known: Vec<(&Path, f64)> = entries.iter().map(|(p, d)| (p.as_path(), *d)).collect();
        let prober = FakeProber::new(&known);
        let profiles = ProfileStore::open(dir.path().join("profiles.json"), "en").unwrap();
        let options = ConversionOptions {
            output_dir: out,
            ..ConversionOptions::default()
        };
        let encoder = match encoder {
            Some(e) => PathBuf::from(e),
            None => script,
        };
        let mut converter = Converter::new(profiles, encoder, Box::new(prober), options)
            .unwrap()
            .stop_grace(Duration::from_secs(5));
        let rx = converter.subscribe();
        let paths: Vec<PathBuf> = entries.into_iter().map(|(p, _)| p).collect();
        let _ = converter.add_files(paths).count();
        Fixture { dir, converter, rx }
    }

    fn wait_for_started(
        converter: &mut Converter,
        seen: &mut Vec<ConverterMessage>,
        rx: &Receiver<ConverterMessage>,
        index: usize,
    ) {
        for _ in 0..500 {
            seen.extend(rx.try_iter());
            let started = seen
                .iter()
                .any(|m| matches!(m, ConverterMessage::Progress(u) if u.index == index));
            if started {
                return;
            }
            converter.poll(Duration::from_millis(20));
        }
        panic!("file {index} never reported progress");
    }

    fn run_outcome(messages: &[ConverterMessage]) -> Option<RunOutcome> {
        messages.iter().find_map(|m| match m {
            ConverterMessage::RunFinished(outcome) => Some(outcome.clone()),
            _ => None,
        })
    }

    #[test]
    fn test_converts_every_file() {
        let mut f = fixture(&[("a.mpg", 10.0), ("b.mpg", 10.0)], None);
        assert_eq!(f.converter.options().preset, "Standard Quality");
        f.converter.start_conversion().unwrap();
        assert!(f.converter.capabilities().stop);
        f.converter.run_to_completion();

        let messages = f.messages();
        assert!(f.converter.queue().iter().all(|t| t.status == TaskStatus::Done));
        assert!(f.output("a").exists());
        assert!(f.output("b").exists());
        for index in 0..2 {
            let last = messages
                .iter()
                .filter_map(|m| match m {
                    ConverterMessage::Progress(u) if u.index == index => Some(u.operation),
                    _ => None,
                })
                .last();
            assert_eq!(last, Some(100));
        }
        let progress: Vec<u8> = messages
            .iter()
            .filter_map(|m| match m {
                ConverterMessage::Progress(u) => Some(u.process),
                _ => None,
            })
            .collect();
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(progress.last(), Some(&100));
        assert_eq!(
            run_outcome(&messages),
            Some(RunOutcome::Completed { shutdown_requested: false })
        );
        assert!(!f.converter.is_converting());
        assert!(!f.converter.capabilities().convert);
    }

    #[test]
    fn test_empty_queue_start_is_noop() {
        let mut f = fixture(&[], None);
        let _ = f.converter.add_files(vec![PathBuf::from("missing.bin")]).count();
        assert_eq!(f.converter.queue().len(), 0);
        assert_eq!(f.converter.queue().not_added(), &[PathBuf::from("missing.bin")]);
        f.converter.start_conversion().unwrap();
        assert!(!f.converter.is_converting());
        assert!(f.messages().is_empty());
    }

    #[test]
    fn test_encoder_error_marks_file_stopped() {
        let mut f = fixture(&[("broken.mpg", 10.0), ("b.mpg", 10.0)], None);
        f.converter.start_conversion().unwrap();
        f.converter.run_to_completion();

        let broken = f.converter.queue().get(0).unwrap();
        assert_eq!(broken.status, TaskStatus::Stopped);
        assert_eq!(broken.error.as_deref(), Some("Unknown encoder 'libx264'"));
        assert!(!f.output("broken").exists());
        assert_eq!(f.converter.queue().get(1).unwrap().status, TaskStatus::Done);
        assert_eq!(
            run_outcome(&f.messages()),
            Some(RunOutcome::Failed(String::from("Unknown encoder 'libx264'")))
        );
    }

    fn last_process_progress(messages: &[ConverterMessage]) -> Option<u8> {
        messages.iter().rev().find_map(|m| match m {
            ConverterMessage::Progress(u) => Some(u.process),
            _ => None,
        })
    }

    #[test]
    fn test_stop_current_moves_on() {
        let mut f = fixture(&[("slow.mpg", 60.0), ("b.mpg", 10.0)], None);
        f.converter.start_conversion().unwrap();
        let mut seen = vec![];
        wait_for_started(&mut f.converter, &mut seen, &f.rx, 0);
        f.converter.stop_current();
        f.converter.run_to_completion();
        seen.extend(f.messages());

        assert_eq!(f.converter.queue().get(0).unwrap().status, TaskStatus::Stopped);
        assert_eq!(f.converter.queue().get(1).unwrap().status, TaskStatus::Done);
        assert!(seen.iter().any(|m| matches!(
            m,
            ConverterMessage::FileFinished { index: 0, outcome: FileOutcome::Stopped, .. }
        )));
        assert_eq!(last_process_progress(&seen), Some(100));
        assert_eq!(run_outcome(&seen), Some(RunOutcome::Completed { shutdown_requested: false }));
    }

    #[test]
    fn test_stop_current_beats_normal_exit() {
        let mut f = fixture(&[("a.mpg", 10.0)], None);
        f.converter.start_conversion().unwrap();
        for _ in 0..250 {
            if f.output("a").exists() {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(f.output("a").exists());
        std::thread::sleep(Duration::from_millis(300));

        f.converter.stop_current();
        f.converter.run_to_completion();

        assert_eq!(f.converter.supervisor.exit_status(), Some(ExitKind::Normal));
        assert_eq!(f.converter.queue().get(0).unwrap().status, TaskStatus::Stopped);
        assert!(!f.output("a").exists());
        let messages = f.messages();
        assert!(messages.iter().any(|m| matches!(
            m,
            ConverterMessage::FileFinished { index: 0, outcome: FileOutcome::Stopped, .. }
        )));
        assert_eq!(run_outcome(&messages), Some(RunOutcome::StoppedByUser));
    }

    #[test]
    fn test_stop_all_during_second_file() {
        let mut f = fixture(&[("a.mpg", 10.0), ("slow.mpg", 60.0), ("c.mpg", 10.0)], None);
        f.converter.set_shutdown_on_finish(true);
        f.converter.start_conversion().unwrap();
        let mut seen = vec![];
        wait_for_started(&mut f.converter, &mut seen, &f.rx, 1);
        assert!(matches!(f.converter.clear_queue(), Err(ConversionError::Busy)));
        f.converter.stop_all();
        f.converter.run_to_completion();
        seen.extend(f.messages());

        let statuses: Vec<TaskStatus> = f.converter.queue().iter().map(|t| t.status).collect();
        assert_eq!(statuses, vec![TaskStatus::Done, TaskStatus::Stopped, TaskStatus::Stopped]);
        assert!(!f.converter.queue().all_stopped());
        assert!(!f.output("slow").exists());
        assert_eq!(run_outcome(&seen), Some(RunOutcome::Completed { shutdown_requested: true }));
    }

    #[test]
    fn test_stop_all_on_first_file() {
        let mut f = fixture(&[("slow.mpg", 60.0), ("b.mpg", 10.0)], None);
        f.converter.start_conversion().unwrap();
        let mut seen = vec![];
        wait_for_started(&mut f.converter, &mut seen, &f.rx, 0);
        f.converter.stop_all();
        f.converter.run_to_completion();
        seen.extend(f.messages());
        assert!(f.converter.queue().all_stopped());
        assert_eq!(run_outcome(&seen), Some(RunOutcome::StoppedByUser));
    }

    #[test]
    fn test_existing_output_is_skipped() {
        let mut f = fixture(&[("a.mpg", 10.0), ("b.mpg", 10.0)], None);
        fs::write(f.output("a"), b"keep me").unwrap();
        f.converter.start_conversion().unwrap();
        f.converter.run_to_completion();

        assert_eq!(fs::read(f.output("a")).unwrap(), b"keep me");
        assert_eq!(f.converter.queue().get(0).unwrap().status, TaskStatus::Todo);
        assert_eq!(f.converter.queue().get(1).unwrap().status, TaskStatus::Done);
        let messages = f.messages();
        assert!(messages.iter().any(|m| matches!(
            m,
            ConverterMessage::Warning(w) if w.contains("already exists")
        )));
        assert_eq!(last_process_progress(&messages), Some(100));
        assert!(matches!(run_outcome(&messages), Some(RunOutcome::Completed { .. })));
    }

    #[test]
    fn test_missing_source_is_skipped() {
        let mut f = fixture(&[("a.mpg", 10.0), ("b.mpg", 10.0)], None);
        fs::remove_file(f.source("a.mpg")).unwrap();
        f.converter.start_conversion().unwrap();
        f.converter.run_to_completion();
        let a = f.converter.queue().get(0).unwrap();
        assert_eq!(a.status, TaskStatus::Stopped);
        assert!(a.error.is_some());
        assert_eq!(f.converter.queue().get(1).unwrap().status, TaskStatus::Done);
    }

    #[test]
    fn test_missing_encoder_fails_run() {
        let mut f = fixture(&[("a.mpg", 10.0), ("b.mpg", 10.0)], Some("/nonexistent/ffmpeg"));
        f.converter.start_conversion().unwrap();
        assert!(!f.converter.is_converting());
        assert!(f.converter.queue().iter().all(|t| t.status == TaskStatus::Todo));
        assert!(matches!(run_outcome(&f.messages()), Some(RunOutcome::Failed(_))));
    }

    #[test]
    fn test_delete_input_on_success() {
        let mut f = fixture(&[("a.mpg", 10.0)], None);
        f.converter.set_delete_input_on_success(true).unwrap();
        f.converter.start_conversion().unwrap();
        f.converter.run_to_completion();
        assert!(!f.source("a.mpg").exists());
        assert!(f.output("a").exists());
    }

    #[test]
    fn test_options_reset_statuses() {
        let mut f = fixture(&[("a.mpg", 10.0)], None);
        f.converter.start_conversion().unwrap();
        f.converter.run_to_completion();
        assert_eq!(f.converter.queue().get(0).unwrap().status, TaskStatus::Done);

        f.converter.set_tag_output(true).unwrap();
        assert_eq!(f.converter.queue().get(0).unwrap().status, TaskStatus::Todo);
        f.converter.start_conversion().unwrap();
        f.converter.run_to_completion();
        assert!(f.dir.path().join("out").join("a__MP4.mp4").exists());
    }

    #[test]
    fn test_change_preset_and_profile() {
        let mut f = fixture(&[("a.mpg", 10.0), ("b.mpg", 10.0)], None);
        f.converter.change_preset(Some(1), "High Quality").unwrap();
        assert_eq!(f.converter.queue().get(0).unwrap().preset, "Standard Quality");
        assert_eq!(f.converter.queue().get(1).unwrap().preset, "High Quality");
        assert!(matches!(
            f.converter.change_preset(None, "nope"),
            Err(ConversionError::Profile(_))
        ));
        assert!(matches!(
            f.converter.change_preset(Some(7), "High Quality"),
            Err(ConversionError::NoSuchTask(7))
        ));

        f.converter.change_profile("WEBM").unwrap();
        assert_eq!(f.converter.options().profile, "WEBM");
        assert!(f.converter.queue().iter().all(|t| t.preset == "Standard Quality"));
        assert!(matches!(f.converter.change_profile("nope"), Err(ConversionError::Profile(_))));
    }

    #[test]
    fn test_run_duration_grows_with_added_files() {
        let mut f = fixture(&[("slow.mpg", 60.0)], None);
        f.converter.start_conversion().unwrap();
        assert_eq!(f.converter.run_duration(), 60.0);
        let again = f.source("slow.mpg");
        let _ = f.converter.add_files(vec![again]).count();
        assert_eq!(f.converter.queue().len(), 2);
        assert_eq!(f.converter.run_duration(), 120.0);
        f.converter.shutdown();
        assert!(!f.converter.is_converting());
        assert_eq!(f.converter.queue().get(0).unwrap().status, TaskStatus::Stopped);
    }

    #[test]
    fn test_remove_and_clear() {
        let mut f = fixture(&[("a.mpg", 10.0), ("b.mpg", 10.0)], None);
        assert!(matches!(f.converter.remove_file(5), Err(ConversionError::NoSuchTask(5))));
        let removed = f.converter.remove_file(0).unwrap();
        assert_eq!(removed.name(true), "a.mpg");
        f.converter.clear_queue().unwrap();
        assert!(f.converter.queue().is_empty());
    }
}
