use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use regex::Regex;

pub const FLOOR_PROCESSING: f32 = 10.0;
pub const FLOOR_DOWNLOADING: f32 = 40.0;
pub const FLOOR_COMPLETE: f32 = 98.0;

/// Percentage shapes seen in downloader output, most specific first. Each
/// captures the numeric value right before the percent sign.
const PERCENT_PATTERNS: [&str; 5] = [
    r"\[download\]\s*(\d{1,3}(?:\.\d+)?)%",
    r"(?i)progress:\s*(\d{1,3}(?:\.\d+)?)%",
    r"[█▉▊▋▌▍▎▏━╸=#>-]{2,}\s*(\d{1,3}(?:\.\d+)?)%",
    r"(?i)(\d{1,3}(?:\.\d+)?)%\s*(?:complete|done|of)\b",
    r"(\d{1,3}(?:\.\d+)?)\s*%",
];

/// What one line of tool output told us about the job.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct LineSignal {
    /// Minimum progress implied by a milestone keyword.
    pub floor: Option<f32>,
    /// Real percentage parsed out of the line.
    pub percent: Option<f32>,
    /// A downloading milestone was seen; the simulation may speed up.
    pub accelerate: bool,
    /// The tool printed its completion line.
    pub complete: bool,
}

/// Scans downloader output for milestones and percentages. The output format
/// of the wrapped tool is not guaranteed, so everything here is best-effort
/// smoothing for the UI, not a source of truth.
pub struct ProgressScanner {
    percent_patterns: Vec<Regex>,
    completion: Option<Regex>,
}

impl ProgressScanner {
    pub fn new() -> Self {
        Self {
            percent_patterns: PERCENT_PATTERNS
                .iter()
                .filter_map(|pattern| Regex::new(pattern).ok())
                .collect(),
            completion: Regex::new(r#"(?i)downloaded\s+"[^"]+""#).ok(),
        }
    }

    pub fn scan(&self, line: &str) -> LineSignal {
        let mut signal = LineSignal::default();
        let lower = line.to_lowercase();

        let completed = self
            .completion
            .as_ref()
            .map(|re| re.is_match(line))
            .unwrap_or(false);

        if completed {
            signal.floor = Some(FLOOR_COMPLETE);
            signal.complete = true;
        } else if lower.contains("downloading")
            || lower.contains("found")
            || lower.contains("fetching")
        {
            signal.floor = Some(FLOOR_DOWNLOADING);
            signal.accelerate = true;
        } else if lower.contains("processing") || lower.contains("query") {
            signal.floor = Some(FLOOR_PROCESSING);
        }

        signal.percent = self.extract_percent(line);
        signal
    }

    fn extract_percent(&self, line: &str) -> Option<f32> {
        for pattern in &self.percent_patterns {
            if let Some(captures) = pattern.captures(line) {
                if let Some(value) = captures.get(1).and_then(|m| m.as_str().parse::<f32>().ok()) {
                    return Some(value.clamp(0.0, 100.0));
                }
            }
        }
        None
    }
}

impl Default for ProgressScanner {
    fn default() -> Self {
        Self::new()
    }
}

/// Switches shared between the worker, the line scanner and the simulation
/// thread for one job.
#[derive(Debug, Default)]
pub struct SimulationFlags {
    /// The worker finished or the job left the downloading state.
    pub stop: AtomicBool,
    /// A real percentage was parsed from tool output; the simulation stands
    /// down for the rest of the job.
    pub real_signal: AtomicBool,
    /// A downloading milestone was seen; the middle phase speeds up.
    pub accelerate: AtomicBool,
}

struct Phase {
    cap: f32,
    step: f32,
    fast_step: f32,
    tick: Duration,
}

/// Processing ramps up quickly, the long middle crawls until a downloading
/// milestone confirms real work, and the finalizing tail inches toward 95
/// without ever claiming completion.
const PHASES: [Phase; 3] = [
    Phase {
        cap: 15.0,
        step: 3.0,
        fast_step: 3.0,
        tick: Duration::from_millis(250),
    },
    Phase {
        cap: 85.0,
        step: 0.9,
        fast_step: 2.4,
        tick: Duration::from_millis(400),
    },
    Phase {
        cap: 95.0,
        step: 0.5,
        fast_step: 0.5,
        tick: Duration::from_secs(1),
    },
];

/// Drives the time-based ramp for one job. Runs on a short-lived helper
/// thread and hands each new value to `push`; the monotone accumulator on
/// the other side keeps whichever signal is further along.
pub fn run_simulation(flags: &SimulationFlags, mut push: impl FnMut(f32)) {
    let mut value = 0.0_f32;

    for phase in &PHASES {
        while value < phase.cap {
            std::thread::sleep(phase.tick);

            if flags.stop.load(Ordering::Relaxed) || flags.real_signal.load(Ordering::Relaxed) {
                return;
            }

            let step = if flags.accelerate.load(Ordering::Relaxed) {
                phase.fast_step
            } else {
                phase.step
            };
            value = (value + step).min(phase.cap);
            push(value);
        }
    }
}
