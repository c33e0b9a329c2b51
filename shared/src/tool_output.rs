/// Progress parsers for the text that yt-dlp and ffmpeg print while running.
///
/// Each tool's output grammar lives behind a [`ProgressMatcher`], so the
/// mapping from raw text to a percentage is testable without spawning anything.
use once_cell::sync::Lazy;
use regex::Regex;

/// Upper bound of the fetch phase on the overall 0-100 scale.
pub const FETCH_PHASE_CEILING: f64 = 80.0;

/// Highest percent the trim phase may report before the terminal 100.
pub const TRIM_PHASE_CEILING: f64 = 99.0;

/// Seconds of ffmpeg output treated as a "full" trim phase.
pub const TRIM_BUDGET_SECS: f64 = 30.0;

/// A progress value extracted from one chunk of tool output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSignal {
    /// Overall job percent, already mapped into the phase's sub-range.
    pub percent: f64,
}

/// Turns tool output into progress signals.
pub trait ProgressMatcher: Send + Sync {
    fn parse(&self, chunk: &str) -> Option<ProgressSignal>;

    /// Display message for a reported percent.
    fn message(&self, percent: f64) -> String;
}

// ====== REGEX PATTERNS ======

static DOWNLOAD_PERCENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[download\]\s+(\d+(?:\.\d+)?)%").unwrap()
});

static FFMPEG_TIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"time=(\d+):(\d+):(\d+(?:\.\d+)?)").unwrap()
});

/// yt-dlp `[download]  42.3% of ...` lines, clamped to the fetch phase.
#[derive(Debug, Default, Clone, Copy)]
pub struct FetchProgress;

impl ProgressMatcher for FetchProgress {
    fn parse(&self, chunk: &str) -> Option<ProgressSignal> {
        let caps = DOWNLOAD_PERCENT_RE.captures(chunk)?;
        let raw: f64 = caps[1].parse().ok()?;
        Some(ProgressSignal {
            percent: raw.min(FETCH_PHASE_CEILING),
        })
    }

    fn message(&self, percent: f64) -> String {
        format!("Downloading... {:.1}% - Please wait", percent)
    }
}

/// ffmpeg `time=HH:MM:SS.ss` stats, mapped into [80, 99].
///
/// The scale is a heuristic: elapsed output time is measured against a fixed
/// 30 second budget, not against the real clip length.
#[derive(Debug, Default, Clone, Copy)]
pub struct TrimProgress;

impl TrimProgress {
    /// Elapsed output time in seconds, if the chunk carries one.
    pub fn elapsed_seconds(chunk: &str) -> Option<f64> {
        let caps = FFMPEG_TIME_RE.captures(chunk)?;
        let hours: f64 = caps[1].parse().ok()?;
        let minutes: f64 = caps[2].parse().ok()?;
        let seconds: f64 = caps[3].parse().ok()?;
        Some(hours * 3600.0 + minutes * 60.0 + seconds)
    }
}

impl ProgressMatcher for TrimProgress {
    fn parse(&self, chunk: &str) -> Option<ProgressSignal> {
        let elapsed = Self::elapsed_seconds(chunk)?;
        let span = TRIM_PHASE_CEILING + 1.0 - FETCH_PHASE_CEILING;
        let percent = (FETCH_PHASE_CEILING + (elapsed / TRIM_BUDGET_SECS) * span).min(TRIM_PHASE_CEILING);
        Some(ProgressSignal { percent })
    }

    fn message(&self, percent: f64) -> String {
        format!("Processing timestamps... {:.1}% - Please wait", percent)
    }
}
