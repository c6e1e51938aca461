use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

/// Measures audio duration before scheduling. Any failure means "unknown".
#[async_trait]
pub trait DurationProbe: Send + Sync {
    async fn probe(&self, path: &Path) -> Option<f64>;
}

/// Asks `ffprobe` for the container duration, giving up after `timeout`.
pub struct FfprobeDurationProbe {
    timeout: Duration,
}

impl FfprobeDurationProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl DurationProbe for FfprobeDurationProbe {
    async fn probe(&self, path: &Path) -> Option<f64> {
        let mut command = Command::new("ffprobe");
        command
            .args(["-v", "quiet", "-show_entries", "format=duration", "-of", "csv=p=0"])
            .arg(path)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Err(_) => {
                warn!(
                    "ffprobe timed out after {:?} on {}",
                    self.timeout,
                    path.display()
                );
                return None;
            }
            Ok(Err(e)) => {
                warn!("Could not get audio duration: {}", e);
                return None;
            }
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            debug!("ffprobe exited with {} for {}", output.status, path.display());
            return None;
        }

        let duration = parse_duration(&String::from_utf8_lossy(&output.stdout));
        if duration.is_none() {
            debug!("ffprobe reported no usable duration for {}", path.display());
        }
        duration
    }
}

/// Parses ffprobe's `csv=p=0` output, rejecting non-finite or negative values.
pub fn parse_duration(raw: &str) -> Option<f64> {
    let seconds = raw.trim().parse::<f64>().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Some(seconds)
}
