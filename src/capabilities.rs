use serde::Serialize;

use crate::queue::TaskQueue;

/// What a front end may offer the user right now.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub add: bool,
    pub convert: bool,
    pub clear: bool,
    pub remove: bool,
    pub stop: bool,
    pub stop_all: bool,
    pub presets: bool,
    pub profiles: bool,
    pub add_profile: bool,
    pub import_profile: bool,
    pub restore_profile: bool,
    pub output_dir: bool,
    pub subtitles: bool,
    pub delete_input: bool,
    pub tag_output: bool,
    pub shutdown: bool,
}

impl Capabilities {
    pub fn evaluate(queue: &TaskQueue, converting: bool) -> Self {
        if converting {
            return Capabilities {
                add: true,
                stop: true,
                stop_all: true,
                shutdown: true,
                ..Capabilities::default()
            };
        }
        let idle = Capabilities {
            add: true,
            presets: true,
            profiles: true,
            add_profile: true,
            import_profile: true,
            restore_profile: true,
            output_dir: true,
            ..Capabilities::default()
        };
        if queue.is_empty() {
            return idle;
        }
        Capabilities {
            convert: queue.has_todo(),
            clear: true,
            remove: true,
            subtitles: true,
            delete_input: true,
            tag_output: true,
            shutdown: true,
            ..idle
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::MediaInfo;
    use crate::task::{ConversionTask, TaskStatus};
    use std::path::PathBuf;

    fn queue(statuses: &[TaskStatus]) -> TaskQueue {
        let mut queue = TaskQueue::new();
        for (i, s) in statuses.iter().enumerate() {
            let mut task =
                ConversionTask::new(PathBuf::from(format!("{i}.avi")), MediaInfo::default(), "p");
            task.status = *s;
            queue.push(task);
        }
        queue
    }

    #[test]
    fn test_empty_queue() {
        let caps = Capabilities::evaluate(&TaskQueue::new(), false);
        assert!(caps.add && caps.profiles && caps.import_profile && caps.restore_profile);
        assert!(!caps.convert && !caps.clear && !caps.remove && !caps.stop && !caps.stop_all);
    }

    #[test]
    fn test_converting() {
        let caps = Capabilities::evaluate(&queue(&[TaskStatus::Running]), true);
        assert!(caps.add && caps.stop && caps.stop_all);
        assert!(!caps.convert && !caps.clear && !caps.remove && !caps.presets && !caps.profiles);
        assert!(!caps.output_dir && !caps.tag_output && !caps.delete_input);
    }

    #[test]
    fn test_idle_with_todo() {
        let caps = Capabilities::evaluate(&queue(&[TaskStatus::Done, TaskStatus::Todo]), false);
        assert!(caps.convert && caps.clear && caps.remove && caps.presets && caps.tag_output);
        assert!(!caps.stop && !caps.stop_all);
    }

    #[test]
    fn test_idle_all_finished() {
        let caps = Capabilities::evaluate(&queue(&[TaskStatus::Done, TaskStatus::Stopped]), false);
        assert!(!caps.convert);
        assert!(caps.clear && caps.remove && caps.add);
    }
}
