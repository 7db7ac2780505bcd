use std::time::{Duration, Instant};

use super::{format_duration, percent};

/// Wall clock and media-time accounting for one file and for the whole run.
#[derive(Clone, Debug, Default)]
pub struct Timer {
    operation_start: Option<Instant>,
    process_start: Option<Instant>,
    time: f64,
    last_reading: f64,
    operation_cum_time: f64,
    process_cum_time: f64,
}

impl Timer {
    pub fn new() -> Self {
        Timer::default()
    }

    pub fn init_operation_start_time(&mut self) {
        self.operation_start.get_or_insert_with(Instant::now);
    }

    pub fn init_process_start_time(&mut self) {
        self.process_start.get_or_insert_with(Instant::now);
    }

    /// Record the latest elapsed media time reported by the encoder.
    pub fn update_time(&mut self, secs: f64) {
        if secs.is_finite() && secs >= 0.0 {
            self.time = secs;
        }
    }

    pub fn update_cum_times(&mut self) {
        let delta = self.time - self.last_reading;
        if delta > 0.0 {
            self.process_cum_time += delta;
        }
        self.last_reading = self.time;
        self.operation_cum_time = self.time;
    }

    pub fn operation_progress(&self, file_duration: f64) -> u8 {
        percent(self.operation_cum_time, file_duration)
    }

    pub fn process_progress(&self, run_duration: f64) -> u8 {
        percent(self.process_cum_time, run_duration)
    }

    /// Media time left in the current file, as `HH:MM:SS`.
    pub fn operation_remaining_time(&self, file_duration: f64) -> String {
        format_duration(remaining_secs(file_duration, self.operation_cum_time))
    }

    pub fn operation_elapsed(&self) -> Duration {
        self.operation_start.map(|s| s.elapsed()).unwrap_or_default()
    }

    pub fn process_elapsed(&self) -> Duration {
        self.process_start.map(|s| s.elapsed()).unwrap_or_default()
    }

    pub fn operation_cum_time(&self) -> f64 {
        self.operation_cum_time
    }

    pub fn process_cum_time(&self) -> f64 {
        self.process_cum_time
    }

    /// Forget the current file; run totals are kept.
    pub fn reset_progress_times(&mut self) {
        self.operation_start = None;
        self.time = 0.0;
        self.last_reading = 0.0;
        self.operation_cum_time = 0.0;
    }

    pub fn reset(&mut self) {
        *self = Timer::default();
    }
}

fn remaining_secs(duration: f64, done: f64) -> f64 {
    match duration.is_finite() && duration > 0.0 {
        true => (duration - done).max(0.0),
        false => 0.0,
    }
}
