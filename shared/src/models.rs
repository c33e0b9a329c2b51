/// Request, plan, and progress models shared across ytclip crates.
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

use crate::errors::ValidationError;
use crate::timecode::TrimWindow;

// ====== JOB IDENTIFIER ======

/// Time-based job identifier (milliseconds since the Unix epoch).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(u64);

static LAST_JOB_ID: AtomicU64 = AtomicU64::new(0);

impl JobId {
    /// Allocate a fresh id. Strictly increasing within the process, so two
    /// jobs accepted in the same millisecond still get distinct artifacts.
    pub fn next() -> Self {
        let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let mut last = LAST_JOB_ID.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(last + 1);
            match LAST_JOB_ID.compare_exchange_weak(last, candidate, Ordering::SeqCst, Ordering::Relaxed) {
                Ok(_) => return JobId(candidate),
                Err(actual) => last = actual,
            }
        }
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for JobId {
    fn from(value: u64) -> Self {
        JobId(value)
    }
}

impl std::str::FromStr for JobId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(JobId)
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ====== PROGRESS ======

/// Job status as reported to polling clients.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Starting,
    Downloading,
    Processing,
    Completed,
    Error,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Starting => write!(f, "starting"),
            JobStatus::Downloading => write!(f, "downloading"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Error => write!(f, "error"),
        }
    }
}

/// Pipeline stage, a coarser view than [`JobStatus`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Download,
    Timestamps,
    Complete,
    Error,
}

/// Snapshot of a job's progress. Replaced wholesale, never patched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressRecord {
    pub percent: f64,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<JobStage>,
    pub message: String,
}

impl ProgressRecord {
    /// Record reported for ids the store does not know about.
    pub fn starting() -> Self {
        Self {
            percent: 0.0,
            status: JobStatus::Starting,
            stage: None,
            message: "Starting download...".to_string(),
        }
    }

    pub fn downloading(percent: f64, message: impl Into<String>) -> Self {
        Self {
            percent,
            status: JobStatus::Downloading,
            stage: Some(JobStage::Download),
            message: message.into(),
        }
    }

    pub fn processing(percent: f64, message: impl Into<String>) -> Self {
        Self {
            percent,
            status: JobStatus::Processing,
            stage: Some(JobStage::Timestamps),
            message: message.into(),
        }
    }

    pub fn completed() -> Self {
        Self {
            percent: 100.0,
            status: JobStatus::Completed,
            stage: Some(JobStage::Complete),
            message: "Download ready!".to_string(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            percent: 0.0,
            status: JobStatus::Error,
            stage: Some(JobStage::Error),
            message: message.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, JobStatus::Completed | JobStatus::Error)
    }
}

impl Default for ProgressRecord {
    fn default() -> Self {
        Self::starting()
    }
}

// ====== REQUEST ======

/// Download request body as posted by the web client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequest {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub quality: Option<String>,
}

/// Treat missing, empty, and whitespace-only strings alike.
pub(crate) fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Output container or audio codec family.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Mp4,
    Webm,
    Mkv,
    Mp3,
    M4a,
}

impl OutputFormat {
    /// Parse a requested format. Unknown values fall back to mp4.
    pub fn parse(value: Option<&str>) -> Self {
        let Some(raw) = value else {
            return OutputFormat::Mp4;
        };
        OutputFormat::from_extension(raw).unwrap_or_else(|| {
            warn!("Unrecognized format {:?}, using default mp4", raw);
            OutputFormat::Mp4
        })
    }

    /// File extension, also the value echoed back in responses.
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "mp4",
            OutputFormat::Webm => "webm",
            OutputFormat::Mkv => "mkv",
            OutputFormat::Mp3 => "mp3",
            OutputFormat::M4a => "m4a",
        }
    }

    pub fn is_audio_only(&self) -> bool {
        matches!(self, OutputFormat::Mp3 | OutputFormat::M4a)
    }

    /// MIME type used when serving an artifact of this format.
    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "video/mp4",
            OutputFormat::Webm => "video/webm",
            OutputFormat::Mkv => "video/x-matroska",
            OutputFormat::Mp3 => "audio/mpeg",
            OutputFormat::M4a => "audio/mp4",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim().to_ascii_lowercase().as_str() {
            "mp4" => Some(OutputFormat::Mp4),
            "webm" => Some(OutputFormat::Webm),
            "mkv" => Some(OutputFormat::Mkv),
            "mp3" => Some(OutputFormat::Mp3),
            "m4a" => Some(OutputFormat::M4a),
            _ => None,
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.extension())
    }
}

/// Video quality tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quality {
    P360,
    P480,
    P720,
    P1080,
    Best,
}

impl Quality {
    /// Parse a quality selector. Unknown values fall back to 720p.
    pub fn parse(value: Option<&str>) -> Self {
        let Some(raw) = value else {
            return Quality::P720;
        };
        let normalized = raw.trim().to_ascii_lowercase();
        match normalized.trim_end_matches('p') {
            "360" => Quality::P360,
            "480" => Quality::P480,
            "720" => Quality::P720,
            "1080" => Quality::P1080,
            "best" | "best available" => Quality::Best,
            _ => {
                warn!("Unrecognized quality {:?}, using default 720p", raw);
                Quality::P720
            }
        }
    }

    /// yt-dlp format selector for this tier.
    pub fn selector(&self) -> &'static str {
        match self {
            Quality::P360 => "best[height<=360]",
            Quality::P480 => "best[height<=480]",
            Quality::P720 => "best[height<=720]",
            Quality::P1080 => "best[height<=1080]",
            Quality::Best => "best",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Quality::P360 => "360p",
            Quality::P480 => "480p",
            Quality::P720 => "720p",
            Quality::P1080 => "1080p",
            Quality::Best => "best",
        }
    }
}

// ====== PLAN / RESULT ======

/// A validated download request, ready for orchestration.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadPlan {
    pub url: String,
    pub format: OutputFormat,
    pub quality: Quality,
    pub window: Option<TrimWindow>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

impl DownloadPlan {
    /// Validate a raw request. No external process is involved.
    pub fn from_request(request: &DownloadRequest) -> Result<Self, ValidationError> {
        let url = non_empty(&request.url).ok_or(ValidationError::MissingUrl)?;
        let start_time = non_empty(&request.start_time);
        let end_time = non_empty(&request.end_time);
        let window = TrimWindow::resolve(start_time, end_time)?;

        Ok(Self {
            url: url.to_string(),
            format: OutputFormat::parse(non_empty(&request.format)),
            quality: Quality::parse(non_empty(&request.quality)),
            window,
            start_time: start_time.map(String::from),
            end_time: end_time.map(String::from),
        })
    }

    pub fn wants_trim(&self) -> bool {
        self.window.is_some()
    }

    /// Quality as shown to the client: the tier label, or "Audio".
    pub fn quality_label(&self) -> &'static str {
        if self.format.is_audio_only() {
            "Audio"
        } else {
            self.quality.label()
        }
    }

    /// Human-readable description of the delivered time range.
    pub fn timestamp_label(&self, clipped: bool) -> String {
        if !clipped {
            return "Full video".to_string();
        }
        format!(
            "{} to {}",
            self.start_time.as_deref().unwrap_or("start"),
            self.end_time.as_deref().unwrap_or("end"),
        )
    }
}

/// A finished file in the downloads directory.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Artifact {
    pub filename: String,
    pub path: PathBuf,
    /// Container actually delivered, which can differ from the requested
    /// format when yt-dlp falls back to another container in the tier.
    pub extension: String,
    pub size_bytes: u64,
    pub clipped: bool,
}

impl Artifact {
    /// Size formatted the way the web client displays it.
    pub fn size_display(&self) -> String {
        format!("{:.2} MB", self.size_bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_ids_are_strictly_increasing() {
        let a = JobId::next();
        let b = JobId::next();
        let c = JobId::next();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_job_id_round_trips_through_display() {
        let id = JobId::from(1_718_000_000_000);
        assert_eq!(id.to_string(), "1718000000000");
        assert_eq!("1718000000000".parse::<JobId>().unwrap(), id);
    }

    #[test]
    fn test_default_record_json() {
        let json = serde_json::to_value(ProgressRecord::starting()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "percent": 0.0, "status": "starting", "message": "Starting download..." })
        );
    }

    #[test]
    fn test_terminal_records() {
        assert!(ProgressRecord::completed().is_terminal());
        assert!(ProgressRecord::failed("boom").is_terminal());
        assert!(!ProgressRecord::downloading(5.0, "x").is_terminal());
        assert!(!ProgressRecord::processing(80.0, "x").is_terminal());

        let json = serde_json::to_value(ProgressRecord::failed("boom")).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["stage"], "error");
    }

    #[test]
    fn test_quality_fallback() {
        assert_eq!(Quality::parse(Some("1080")), Quality::P1080);
        assert_eq!(Quality::parse(Some("480p")), Quality::P480);
        assert_eq!(Quality::parse(Some("best")), Quality::Best);
        assert_eq!(Quality::parse(Some("Best Available")), Quality::Best);
        assert_eq!(Quality::parse(Some("4k")), Quality::P720);
        assert_eq!(Quality::parse(None), Quality::P720);
        assert_eq!(Quality::P360.selector(), "best[height<=360]");
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!(OutputFormat::parse(None), OutputFormat::Mp4);
        assert_eq!(OutputFormat::parse(Some("MP3")), OutputFormat::Mp3);
        assert!(OutputFormat::Mp3.is_audio_only());
        assert!(!OutputFormat::Webm.is_audio_only());
        assert_eq!(OutputFormat::parse(Some("../etc")), OutputFormat::Mp4);
        assert_eq!(OutputFormat::parse(Some("avi")), OutputFormat::Mp4);
        assert_eq!(OutputFormat::from_extension("avi"), None);
        assert_eq!(OutputFormat::from_extension("MKV"), Some(OutputFormat::Mkv));
    }

    #[test]
    fn test_plan_requires_url() {
        let request = DownloadRequest { url: Some("   ".into()), ..Default::default() };
        assert_eq!(DownloadPlan::from_request(&request), Err(ValidationError::MissingUrl));
    }

    #[test]
    fn test_plan_defaults() {
        let request: DownloadRequest =
            serde_json::from_str(r#"{"url":"https://youtu.be/abc12345678","startTime":""}"#).unwrap();
        let plan = DownloadPlan::from_request(&request).unwrap();
        assert_eq!(plan.format, OutputFormat::Mp4);
        assert_eq!(plan.quality, Quality::P720);
        assert!(!plan.wants_trim());
        assert_eq!(plan.quality_label(), "720p");
        assert_eq!(plan.timestamp_label(false), "Full video");
    }

    #[test]
    fn test_plan_with_window() {
        let request = DownloadRequest {
            url: Some("https://youtu.be/abc12345678".into()),
            start_time: Some("0:30".into()),
            format: Some("mp3".into()),
            ..Default::default()
        };
        let plan = DownloadPlan::from_request(&request).unwrap();
        assert!(plan.wants_trim());
        assert_eq!(plan.quality_label(), "Audio");
        assert_eq!(plan.timestamp_label(true), "0:30 to end");
    }

    #[test]
    fn test_artifact_size_display() {
        let artifact = Artifact {
            filename: "video_1.mp4".into(),
            path: PathBuf::from("downloads/video_1.mp4"),
            extension: "mp4".into(),
            size_bytes: 3 * 1024 * 1024 / 2,
            clipped: false,
        };
        assert_eq!(artifact.size_display(), "1.50 MB");
    }
}
