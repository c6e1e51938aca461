const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Transcribe inside the request and return the full result.
    Sync,
    /// Register a task, hand it to a worker and return the task id.
    Async,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub mode: ExecutionMode,
    /// Audio minutes when the duration is known, otherwise the file size in MB.
    pub estimated_minutes: f64,
    pub file_size_mb: f64,
    pub duration_seconds: Option<f64>,
}

impl Decision {
    pub fn is_async(&self) -> bool {
        self.mode == ExecutionMode::Async
    }
}

/// Chooses between inline and background transcription from the estimated workload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulingPolicy {
    pub async_duration_minutes: f64,
    pub async_file_size_mb: f64,
}

impl Default for SchedulingPolicy {
    fn default() -> Self {
        Self {
            async_duration_minutes: 10.0,
            async_file_size_mb: 10.0,
        }
    }
}

impl SchedulingPolicy {
    /// A measured duration wins; without one (probe failed, zero-length
    /// or unreadable audio) the file size decides.
    pub fn decide(&self, file_size: u64, duration_seconds: Option<f64>) -> Decision {
        let file_size_mb = file_size as f64 / BYTES_PER_MB;
        let duration_seconds = duration_seconds.filter(|d| d.is_finite() && *d > 0.0);

        let (mode, estimated_minutes) = match duration_seconds {
            Some(seconds) => {
                let minutes = seconds / 60.0;
                (Self::mode(minutes > self.async_duration_minutes), minutes)
            }
            None => (Self::mode(file_size_mb > self.async_file_size_mb), file_size_mb),
        };

        Decision {
            mode,
            estimated_minutes,
            file_size_mb,
            duration_seconds,
        }
    }

    fn mode(run_async: bool) -> ExecutionMode {
        if run_async {
            ExecutionMode::Async
        } else {
            ExecutionMode::Sync
        }
    }
}
