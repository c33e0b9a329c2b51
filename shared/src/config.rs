use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::progress_store::DEFAULT_EVICTION_GRACE;

/// Hard limit for the fetch stage.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(300);

/// Hard limit for the trim stage.
pub const TRIM_TIMEOUT: Duration = Duration::from_secs(120);

/// Settings for the download pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Directory holding intermediate and final artifacts.
    pub download_dir: PathBuf,
    /// yt-dlp executable.
    pub fetch_bin: PathBuf,
    /// ffmpeg executable.
    pub trim_bin: PathBuf,
    pub fetch_timeout: Duration,
    pub trim_timeout: Duration,
    /// How long terminal progress records stay pollable.
    pub eviction_grace: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("./downloads"),
            fetch_bin: PathBuf::from("yt-dlp"),
            trim_bin: PathBuf::from("./ffmpeg"),
            fetch_timeout: FETCH_TIMEOUT,
            trim_timeout: TRIM_TIMEOUT,
            eviction_grace: DEFAULT_EVICTION_GRACE,
        }
    }
}

/// What the runtime environment offers, detected once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub trim_available: bool,
}

impl Capabilities {
    pub fn detect(config: &PipelineConfig) -> Self {
        let trim_available = match locate_tool(&config.trim_bin) {
            Some(path) => {
                info!("ffmpeg found at {}", path.display());
                true
            }
            None => {
                warn!(
                    "ffmpeg not found at {} (timestamp trimming disabled)",
                    config.trim_bin.display()
                );
                false
            }
        };
        Self { trim_available }
    }
}

/// Resolve a tool path. Paths with a directory component must exist as a
/// file; bare program names are searched on `PATH`.
pub fn locate_tool(tool: &Path) -> Option<PathBuf> {
    if tool.components().count() > 1 || tool.is_absolute() {
        return tool.is_file().then(|| tool.to_path_buf());
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var).find_map(|dir| {
        let candidate = dir.join(tool);
        if candidate.is_file() {
            return Some(candidate);
        }
        if cfg!(target_os = "windows") {
            let exe = candidate.with_extension("exe");
            if exe.is_file() {
                return Some(exe);
            }
        }
        None
    })
}
