/// Download orchestration: fetch with yt-dlp, optionally trim with ffmpeg.
///
/// Per-job state machine:
///
/// ```text
/// downloading (5..=80) -> [processing (80..=99)] -> completed (100)
///          \___________________\________________-> error (0)
/// ```
///
/// Every transition is written to the [`ProgressStore`]. Terminal records are
/// evicted after the configured grace period. Failures are recorded in the
/// store *and* returned to the caller. A job whose future is dropped midway
/// is recorded as failed and its files are removed.
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{Capabilities, PipelineConfig};
use crate::errors::{DownloadError, ValidationError};
use crate::models::{Artifact, DownloadPlan, DownloadRequest, JobId, OutputFormat, ProgressRecord};
use crate::process_runner::{run_tool, ToolInvocation};
use crate::progress_store::ProgressStore;
use crate::timecode::{format_hms, TrimWindow};
use crate::tool_output::{FetchProgress, TrimProgress, FETCH_PHASE_CEILING};

/// Percent written when a job is accepted.
pub const INITIAL_PERCENT: f64 = 5.0;

const FETCH_TOOL: &str = "yt-dlp";
const TRIM_TOOL: &str = "ffmpeg";

/// Leftovers yt-dlp may write next to the real output.
const PARTIAL_SUFFIXES: &[&str] = &[".part", ".ytdl", ".temp"];

/// File locations for one job, unique via the job id.
#[derive(Debug, Clone)]
pub struct JobPaths {
    dir: PathBuf,
    temp_prefix: String,
    final_stem: String,
}

impl JobPaths {
    pub fn new(dir: &Path, job: JobId, format: OutputFormat, clipped: bool) -> Self {
        let kind = if clipped {
            "clip"
        } else if format.is_audio_only() {
            "audio"
        } else {
            "video"
        };
        Self {
            dir: dir.to_path_buf(),
            temp_prefix: format!("temp_{}.", job),
            final_stem: format!("{}_{}", kind, job),
        }
    }

    /// yt-dlp output template; the tool fills in the real extension.
    pub fn fetch_template(&self) -> PathBuf {
        self.dir.join(format!("{}%(ext)s", self.temp_prefix))
    }

    /// Artifact name for the container that was actually delivered.
    pub fn final_name(&self, extension: &str) -> String {
        format!("{}.{}", self.final_stem, extension)
    }

    pub fn final_path(&self, extension: &str) -> PathBuf {
        self.dir.join(self.final_name(extension))
    }

    fn owns(&self, name: &str) -> bool {
        name.starts_with(&self.temp_prefix)
            || name
                .strip_prefix(&self.final_stem)
                .is_some_and(|rest| rest.starts_with('.'))
    }

    /// All files in the download dir belonging to this job's fetch stage.
    async fn temp_files(&self) -> Vec<PathBuf> {
        let mut found = Vec::new();
        let Ok(mut entries) = tokio::fs::read_dir(&self.dir).await else {
            return found;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            if name.to_string_lossy().starts_with(&self.temp_prefix) {
                found.push(entry.path());
            }
        }
        found.sort();
        found
    }

    /// Every file this job created, intermediate or final.
    async fn job_files(&self) -> Vec<PathBuf> {
        let mut found = Vec::new();
        let Ok(mut entries) = tokio::fs::read_dir(&self.dir).await else {
            return found;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if self.owns(&entry.file_name().to_string_lossy()) {
                found.push(entry.path());
            }
        }
        found
    }

    /// Synchronous variant of cleanup for use from `Drop`.
    fn remove_job_files_now(&self) {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return;
        };
        for entry in entries.flatten() {
            if !self.owns(&entry.file_name().to_string_lossy()) {
                continue;
            }
            let path = entry.path();
            match std::fs::remove_file(&path) {
                Ok(()) => debug!("Removed partial file {}", path.display()),
                Err(e) => warn!("Failed to remove partial file {}: {}", path.display(), e),
            }
        }
    }

    /// The finished fetch output, ignoring partial-download leftovers.
    /// Prefers a file with the requested extension.
    async fn fetched_file(&self, format: OutputFormat) -> Result<PathBuf, DownloadError> {
        let complete: Vec<PathBuf> = self
            .temp_files()
            .await
            .into_iter()
            .filter(|p| {
                let name = p.to_string_lossy();
                !PARTIAL_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
            })
            .collect();

        let preferred = complete
            .iter()
            .find(|p| p.extension().map(|e| e == format.extension()).unwrap_or(false));
        preferred
            .or_else(|| complete.first())
            .cloned()
            .ok_or_else(|| DownloadError::MissingOutput(self.fetch_template()))
    }
}

/// Marks a job as failed if its future is dropped before reaching a terminal
/// state, so the record still gets evicted and leftovers get removed.
struct JobGuard<'a> {
    store: &'a ProgressStore,
    paths: &'a JobPaths,
    job: JobId,
    grace: Duration,
    armed: bool,
}

impl JobGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for JobGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!("Job {} dropped before finishing, marking as failed", self.job);
        self.store
            .set(self.job, ProgressRecord::failed(DownloadError::Interrupted.to_string()));
        self.paths.remove_job_files_now();
        if tokio::runtime::Handle::try_current().is_ok() {
            self.store.schedule_eviction(self.job, self.grace);
        }
    }
}

/// Build the yt-dlp argument vector.
pub fn fetch_args(plan: &DownloadPlan, template: &Path) -> Vec<String> {
    let mut args = vec!["-o".to_string(), template.to_string_lossy().into_owned()];

    if plan.format.is_audio_only() {
        args.extend([
            "--extract-audio".to_string(),
            "--audio-format".to_string(),
            plan.format.extension().to_string(),
            "--audio-quality".to_string(),
            "0".to_string(),
        ]);
    } else {
        // Prefer the requested container, then anything within the tier.
        let tier = plan.quality.selector();
        args.push("-f".to_string());
        args.push(format!("{}[ext={}]/{}", tier, plan.format.extension(), tier));
    }

    args.extend(
        [
            "--newline",
            "--no-overwrites",
            "--extractor-args",
            "youtube:player_client=web,android",
            "--throttled-rate",
            "100K",
            "--socket-timeout",
            "30",
            "--",
        ]
        .map(String::from),
    );
    args.push(plan.url.clone());
    args
}

/// Build the ffmpeg argument vector for a trim.
///
/// `container` is the format of the fetched file. Streams are copied unless
/// it is an audio format, and unknown containers are copied as well.
pub fn trim_args(container: Option<OutputFormat>, window: &TrimWindow, input: &Path, output: &Path) -> Vec<String> {
    let mut args = vec!["-i".to_string(), input.to_string_lossy().into_owned()];

    if let Some(start) = window.start_seconds {
        args.push("-ss".to_string());
        args.push(start.to_string());
    }
    match (window.duration_seconds(), window.end_seconds) {
        (Some(duration), _) => {
            args.push("-t".to_string());
            args.push(duration.to_string());
        }
        (None, Some(end)) => {
            args.push("-to".to_string());
            args.push(end.to_string());
        }
        (None, None) => {}
    }

    let codec: &[&str] = match container {
        Some(OutputFormat::Mp3) => &["-acodec", "libmp3lame", "-b:a", "128k"],
        Some(OutputFormat::M4a) => &["-c:a", "aac", "-b:a", "128k"],
        Some(OutputFormat::Mp4 | OutputFormat::Webm | OutputFormat::Mkv) | None => &["-c", "copy"],
    };
    args.extend(codec.iter().map(|s| s.to_string()));

    args.push("-y".to_string());
    args.push(output.to_string_lossy().into_owned());
    args
}

/// Drives jobs through the pipeline. Cheap to clone.
#[derive(Clone)]
pub struct Orchestrator {
    config: Arc<PipelineConfig>,
    store: ProgressStore,
    capabilities: Capabilities,
}

impl Orchestrator {
    pub fn new(
        config: PipelineConfig,
        store: ProgressStore,
        capabilities: Capabilities,
    ) -> Self {
        Self {
            config: Arc::new(config),
            store,
            capabilities,
        }
    }

    pub fn store(&self) -> &ProgressStore {
        &self.store
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Validate a request. Runs before any job or process exists.
    pub fn plan(&self, request: &DownloadRequest) -> Result<DownloadPlan, ValidationError> {
        DownloadPlan::from_request(request)
    }

    /// Allocate an id for a new job.
    pub fn begin(&self) -> JobId {
        JobId::next()
    }

    /// Whether this plan will actually be trimmed in this environment.
    pub fn will_clip(&self, plan: &DownloadPlan) -> bool {
        plan.wants_trim() && self.capabilities.trim_available
    }

    /// Run a job on its own task. Dropping the handle does not cancel it.
    pub fn spawn(&self, job: JobId, plan: DownloadPlan) -> JoinHandle<Result<Artifact, DownloadError>> {
        let orchestrator = self.clone();
        tokio::spawn(async move { orchestrator.execute(job, &plan).await })
    }

    /// Run a job to its terminal state.
    pub async fn execute(&self, job: JobId, plan: &DownloadPlan) -> Result<Artifact, DownloadError> {
        let clip = self.will_clip(plan);
        let paths = JobPaths::new(&self.config.download_dir, job, plan.format, clip);

        info!(
            "Job {} started: url={} format={} quality={} mode={}",
            job,
            plan.url,
            plan.format,
            plan.quality_label(),
            if clip { "with timestamps" } else { "full media" },
        );

        let mut guard = JobGuard {
            store: &self.store,
            paths: &paths,
            job,
            grace: self.config.eviction_grace,
            armed: true,
        };
        let outcome = self.run_pipeline(job, plan, &paths, clip).await;

        let result = match outcome {
            Ok(artifact) => {
                self.store.set(job, ProgressRecord::completed());
                info!("Job {} completed: {} ({})", job, artifact.filename, artifact.size_display());
                Ok(artifact)
            }
            Err(e) => {
                error!("Job {} failed: {}", job, e);
                self.store.set(job, ProgressRecord::failed(e.to_string()));
                cleanup(&paths).await;
                Err(e)
            }
        };
        guard.disarm();
        self.store.schedule_eviction(job, self.config.eviction_grace);
        result
    }

    async fn run_pipeline(
        &self,
        job: JobId,
        plan: &DownloadPlan,
        paths: &JobPaths,
        clip: bool,
    ) -> Result<Artifact, DownloadError> {
        self.store.set(
            job,
            ProgressRecord::downloading(INITIAL_PERCENT, "Downloading... Please wait for a few seconds"),
        );

        tokio::fs::create_dir_all(&self.config.download_dir)
            .await
            .map_err(|e| DownloadError::filesystem("create", &self.config.download_dir, e))?;

        // Stage 1: fetch
        let fetch = ToolInvocation::new(
            FETCH_TOOL,
            &self.config.fetch_bin,
            fetch_args(plan, &paths.fetch_template()),
        )
        .with_timeout(self.config.fetch_timeout)
        .with_progress_floor(INITIAL_PERCENT);

        let store = self.store.clone();
        run_tool(&fetch, &FetchProgress, |update| {
            store.set(job, ProgressRecord::downloading(update.percent, update.message));
        })
        .await?;

        let fetched = paths.fetched_file(plan.format).await?;
        let extension = fetched
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_else(|| plan.format.extension().to_string());
        if extension != plan.format.extension() {
            warn!(
                "Job {}: requested {} but yt-dlp delivered {}, keeping {}",
                job, plan.format, extension, extension
            );
        }
        let final_path = paths.final_path(&extension);
        debug!("Job {} fetched {}", job, fetched.display());

        // Stage 2: trim, or hand over the full media
        match plan.window.filter(|_| clip) {
            Some(window) => {
                self.store.set(
                    job,
                    ProgressRecord::processing(FETCH_PHASE_CEILING, "Applying timestamps... Please wait"),
                );
                info!(
                    "Job {} trimming {} to {}",
                    job,
                    window.start_seconds.map(format_hms).unwrap_or_else(|| "start".into()),
                    window.end_seconds.map(format_hms).unwrap_or_else(|| "end".into()),
                );

                let trim = ToolInvocation::new(
                    TRIM_TOOL,
                    &self.config.trim_bin,
                    trim_args(OutputFormat::from_extension(&extension), &window, &fetched, &final_path),
                )
                .with_timeout(self.config.trim_timeout)
                .with_progress_floor(FETCH_PHASE_CEILING);

                let store = self.store.clone();
                run_tool(&trim, &TrimProgress, |update| {
                    store.set(job, ProgressRecord::processing(update.percent, update.message));
                })
                .await?;

                if let Err(e) = tokio::fs::remove_file(&fetched).await {
                    warn!("Failed to remove temp file {}: {}", fetched.display(), e);
                }
            }
            None => {
                if plan.wants_trim() {
                    warn!("Job {}: timestamps requested but ffmpeg not available, delivering full media", job);
                }
                tokio::fs::rename(&fetched, &final_path)
                    .await
                    .map_err(|e| DownloadError::filesystem("rename", &fetched, e))?;
            }
        }

        let meta = tokio::fs::metadata(&final_path)
            .await
            .map_err(|e| DownloadError::filesystem("stat", &final_path, e))?;

        Ok(Artifact {
            filename: paths.final_name(&extension),
            path: final_path,
            extension,
            size_bytes: meta.len(),
            clipped: clip,
        })
    }
}

/// Remove everything a failed job may have left behind.
async fn cleanup(paths: &JobPaths) {
    for path in paths.job_files().await {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!("Removed partial file {}", path.display()),
            Err(e) => warn!("Failed to remove partial file {}: {}", path.display(), e),
        }
    }
}
