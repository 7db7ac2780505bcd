//! Ordered conversion queue with a cursor on the task being converted.

use std::collections::vec_deque;
use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::command::{output_path, subtitle_sidecar};
use crate::error::{CleanupError, ProbeError};
use crate::probe::Prober;
use crate::profile::Profile;
use crate::task::{ConversionTask, TaskStatus};

#[derive(Debug)]
pub enum AddEvent {
    Added(PathBuf),
    Rejected(PathBuf, ProbeError),
}

#[derive(Debug, Default)]
pub struct TaskQueue {
    tasks: Vec<ConversionTask>,
    cursor: Option<usize>,
    not_added: Vec<PathBuf>,
}

impl TaskQueue {
    pub fn new() -> Self {
        TaskQueue::default()
    }

    /// Probe and enqueue `paths`. Nothing happens until the returned
    /// iterator is driven; its `total()` is known up front.
    pub fn add<'a>(
        &'a mut self,
        paths: Vec<PathBuf>,
        prober: &'a dyn Prober,
        preset: &str,
    ) -> AddFiles<'a> {
        self.not_added.clear();
        AddFiles {
            total: paths.len(),
            paths: paths.into(),
            queue: self,
            prober,
            preset: String::from(preset),
        }
    }

    pub fn push(&mut self, task: ConversionTask) {
        self.tasks.push(task);
    }

    pub fn remove(&mut self, index: usize) -> Option<ConversionTask> {
        if index >= self.tasks.len() {
            return None;
        }
        let task = self.tasks.remove(index);
        self.cursor = match self.cursor {
            Some(c) if c == index => None,
            Some(c) if c > index => Some(c - 1),
            other => other,
        };
        Some(task)
    }

    pub fn clear(&mut self) {
        self.tasks.clear();
        self.cursor = None;
    }

    /// Move the cursor to the next task, starting at the first one.
    pub fn advance(&mut self) -> Option<usize> {
        let next = match self.cursor {
            None => 0,
            Some(c) => (c + 1).min(self.tasks.len()),
        };
        self.cursor = Some(next);
        Some(next).filter(|n| *n < self.tasks.len())
    }

    pub fn position(&self) -> Option<usize> {
        self.cursor
    }

    pub fn reset_position(&mut self) {
        self.cursor = None;
    }

    pub fn current(&self) -> Option<&ConversionTask> {
        self.cursor.and_then(|c| self.tasks.get(c))
    }

    pub fn current_mut(&mut self) -> Option<&mut ConversionTask> {
        self.cursor.and_then(|c| self.tasks.get_mut(c))
    }

    pub fn get(&self, index: usize) -> Option<&ConversionTask> {
        self.tasks.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut ConversionTask> {
        self.tasks.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ConversionTask> {
        self.tasks.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, ConversionTask> {
        self.tasks.iter_mut()
    }

    pub fn not_added(&self) -> &[PathBuf] {
        &self.not_added
    }

    pub fn set_status(&mut self, index: usize, status: TaskStatus) -> bool {
        match self.tasks.get_mut(index) {
            Some(task) => {
                task.status = status;
                true
            },
            None => false,
        }
    }

    pub fn set_current_status(&mut self, status: TaskStatus) {
        if let Some(task) = self.current_mut() {
            task.status = status;
        }
    }

    pub fn set_all_status(&mut self, status: TaskStatus) {
        for task in self.tasks.iter_mut() {
            task.status = status;
            if status == TaskStatus::Todo {
                task.error = None;
            }
        }
    }

    pub fn is_exhausted(&self) -> bool {
        match self.cursor {
            None => false,
            Some(c) => c >= self.tasks.len(),
        }
    }

    pub fn all_stopped(&self) -> bool {
        self.tasks.iter().all(|t| t.status == TaskStatus::Stopped)
    }

    pub fn has_todo(&self) -> bool {
        self.tasks.iter().any(|t| t.is_todo())
    }

    /// Seconds across every known duration.
    pub fn duration(&self) -> f64 {
        self.tasks.iter().map(|t| t.duration()).sum()
    }

    /// Seconds still to convert.
    pub fn pending_duration(&self) -> f64 {
        self.tasks.iter().filter(|t| t.is_todo()).map(|t| t.duration()).sum()
    }

    /// Remove the (possibly partial) output of the cursor task.
    pub fn delete_running_output(
        &self,
        output_dir: &Path,
        tag_output: bool,
        profile: &Profile,
    ) -> Result<(), CleanupError> {
        let Some(task) = self.current() else {
            return Ok(());
        };
        let path = output_path(&task.path, output_dir, tag_output, profile);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("deleted output {}", path.display());
                Ok(())
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(CleanupError { path, source }),
        }
    }

    /// Remove the cursor task's source and subtitle sidecar.
    pub fn delete_running_input(&self) -> bool {
        let Some(task) = self.current() else {
            return false;
        };
        let mut deleted = true;
        let subtitle = subtitle_sidecar(&task.path);
        for path in std::iter::once(task.path.clone()).chain(subtitle) {
            if let Err(err) = fs::remove_file(&path) {
                warn!("unable to delete input {}: {}", path.display(), err);
                deleted = false;
            }
        }
        deleted
    }
}

/// Lazily probes one path per step.
pub struct AddFiles<'a> {
    total: usize,
    paths: VecDeque<PathBuf>,
    queue: &'a mut TaskQueue,
    prober: &'a dyn Prober,
    preset: String,
}

impl AddFiles<'_> {
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn remaining(&self) -> vec_deque::Iter<'_, PathBuf> {
        self.paths.iter()
    }
}

impl Iterator for AddFiles<'_> {
    type Item = AddEvent;

    fn next(&mut self) -> Option<Self::Item> {
        let path = self.paths.pop_front()?;
        match self.prober.probe(&path) {
            Ok(info) => {
                debug!(file = %path.display(), duration = ?info.duration, "queued");
                self.queue.tasks.push(ConversionTask::new(path.clone(), info, &self.preset));
                Some(AddEvent::Added(path))
            },
            Err(err) => {
                warn!("not adding {}: {}", path.display(), err);
                self.queue.not_added.push(path.clone());
                Some(AddEvent::Rejected(path, err))
            },
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.paths.len(), Some(self.paths.len()))
    }
}
