//! Encoder output parsing and progress arithmetic.

pub mod reader;
pub mod timer;

pub use reader::OutputReader;
pub use timer::Timer;

/// Whole seconds as `HH:MM:SS`. Negative and non-finite values read as zero.
pub fn format_duration(secs: f64) -> String {
    let total = match secs.is_finite() && secs > 0.0 {
        true => secs.round() as u64,
        false => 0,
    };
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

/// Percentage of `value` over `total`, rounded and clamped to 0..=100.
pub(crate) fn percent(value: f64, total: f64) -> u8 {
    if !(total.is_finite() && total > 0.0) || !value.is_finite() {
        return 0;
    }
    (value / total * 100.0).round().clamp(0.0, 100.0) as u8
}
