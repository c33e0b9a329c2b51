/// ytclip shared library.
///
/// Download orchestration (yt-dlp fetch, optional ffmpeg trim), tool output
/// parsing, and the progress store polled by the HTTP layer.
pub mod config;
pub mod errors;
pub mod models;
pub mod orchestrator;
pub mod process_runner;
pub mod progress_store;
pub mod timecode;
pub mod tool_output;

pub use config::{Capabilities, PipelineConfig};
pub use errors::{DownloadError, ToolError, ValidationError, YtclipError, YtclipResult};
pub use models::{Artifact, DownloadPlan, DownloadRequest, JobId, JobStatus, ProgressRecord};
pub use orchestrator::Orchestrator;
pub use progress_store::ProgressStore;
