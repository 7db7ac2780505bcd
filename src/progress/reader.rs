use once_cell::sync::Lazy;
use regex::Regex;

static TIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"time=\s*(\d+):(\d{2}):(\d{2}(?:\.\d+)?)").expect("valid time regex"));
static BITRATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"bitrate=\s*(\S+)").expect("valid bitrate regex"));

/// Latest telemetry read from the encoder's output.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OutputReader {
    /// Elapsed media time in seconds.
    pub time: f64,
    pub bitrate: String,
    /// The last chunk carried a timestamp.
    pub has_time_read: bool,
    /// A timestamp was seen since the last reset.
    pub time_seen: bool,
}

impl OutputReader {
    pub fn new() -> Self {
        OutputReader::default()
    }

    pub fn update_read(&mut self, chunk: &str) {
        let time = TIME_RE.captures_iter(chunk).last().and_then(|caps| {
            let hours: f64 = caps[1].parse().ok()?;
            let minutes: f64 = caps[2].parse().ok()?;
            let seconds: f64 = caps[3].parse().ok()?;
            Some(hours * 3600.0 + minutes * 60.0 + seconds)
        });
        match time {
            Some(t) => {
                self.time = t;
                self.has_time_read = true;
                self.time_seen = true;
                if let Some(caps) = BITRATE_RE.captures_iter(chunk).last() {
                    self.bitrate = String::from(&caps[1]);
                }
            },
            None => self.has_time_read = false,
        }
    }

    pub fn reset(&mut self) {
        *self = OutputReader::default();
    }
}
