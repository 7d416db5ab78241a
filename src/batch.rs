//! Batches of jobs.
//!
//! The coordinator runs jobs on its own bounded pool, independent of the
//! device pool inside each job. Jobs whose device set is missing are
//! recorded as configuration errors and never scheduled.

use std::collections::{BTreeMap, HashSet};
use std::path::{Component, Path};
use std::sync::Arc;

use log::{error, info, warn};
use tokio::sync::Semaphore;

use crate::config::BatchOptions;
use crate::device::is_file;
use crate::error::ConfigError;
use crate::job::{JobRunner, JobSpec};
use crate::timer::ScopedTimer;
use crate::transport::DeviceTransport;

/// How one job of a batch ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Completed {
        devices: usize,
        failed_devices: usize,
        output_errors: Vec<String>,
    },
    /// The job was rejected before any device was contacted.
    ConfigError(String),
    /// The job task died unexpectedly.
    Aborted(String),
}

impl JobStatus {
    pub fn success(&self) -> bool {
        matches!(self, JobStatus::Completed { .. })
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            JobStatus::Completed { .. } => None,
            JobStatus::ConfigError(detail) | JobStatus::Aborted(detail) => Some(detail),
        }
    }
}

/// Job name to status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResult(BTreeMap<String, JobStatus>);

impl BatchResult {
    pub fn get(&self, job: &str) -> Option<&JobStatus> {
        self.0.get(job)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &JobStatus)> {
        self.0.iter().map(|(job, status)| (job.as_str(), status))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn all_succeeded(&self) -> bool {
        self.0.values().all(JobStatus::success)
    }

    fn insert(&mut self, job: String, status: JobStatus) {
        self.0.insert(job, status);
    }
}

/// Parses batch file text: one device-set reference per line. Lines are
/// trimmed, blank lines skipped and repeated references kept once.
pub fn parse_batch(text: &str) -> Vec<String> {
    let mut entries: Vec<String> = Vec::new();
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if entries.iter().any(|e| e == line) {
            warn!("Skipping repeated batch entry {}", line);
            continue;
        }
        entries.push(line.to_string());
    }
    entries
}

/// Job name for a batch entry: the entry path without its extension, with
/// directories joined by `_`, so `east/core.csv` becomes `east_core`.
pub fn job_name(entry: &str) -> String {
    let path = Path::new(entry).with_extension("");
    let parts: Vec<String> = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        "job".to_string()
    } else {
        parts.join("_")
    }
}

/// Renames specs whose name is already taken by appending `_2`, `_3`, ...
/// so no two jobs of a batch share a result entry or output files.
fn make_names_unique(specs: &mut [JobSpec]) {
    let mut taken: HashSet<String> = HashSet::new();
    for spec in specs.iter_mut() {
        if taken.contains(&spec.name) {
            let base = spec.name.clone();
            let mut n = 2;
            while taken.contains(&format!("{base}_{n}")) {
                n += 1;
            }
            spec.name = format!("{base}_{n}");
            warn!(
                "Job name {} already used in batch, running {} as {}",
                base,
                spec.device_set.display(),
                spec.name
            );
        }
        taken.insert(spec.name.clone());
    }
}

pub async fn read_batch_file(path: &Path) -> Result<Vec<String>, ConfigError> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConfigError::MissingBatchFile(path.to_path_buf()));
        }
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    let entries = parse_batch(&text);
    if entries.is_empty() {
        return Err(ConfigError::EmptyBatch(path.to_path_buf()));
    }
    Ok(entries)
}

pub struct BatchCoordinator<T> {
    runner: Arc<JobRunner<T>>,
    options: BatchOptions,
}

impl<T: DeviceTransport> BatchCoordinator<T> {
    pub fn new(runner: JobRunner<T>, options: BatchOptions) -> Self {
        Self {
            runner: Arc::new(runner),
            options,
        }
    }

    /// Reads a batch file and runs every device set it lists.
    pub async fn run_file(&self, batch_file: &Path) -> Result<BatchResult, ConfigError> {
        let entries = read_batch_file(batch_file).await?;
        let specs = entries
            .iter()
            .map(|entry| {
                JobSpec::new(
                    self.runner.context().resolve_config(entry),
                    Some(job_name(entry)),
                )
            })
            .collect();
        Ok(self.run(specs).await)
    }

    pub async fn run(&self, mut specs: Vec<JobSpec>) -> BatchResult {
        let _timer = ScopedTimer::start("batch");
        let mut result = BatchResult::default();
        make_names_unique(&mut specs);

        let mut scheduled = Vec::with_capacity(specs.len());
        for spec in specs {
            if is_file(&spec.device_set).await {
                scheduled.push(spec);
            } else {
                let err = ConfigError::MissingDeviceSet(spec.device_set.clone());
                error!("Job {} not scheduled: {}", spec.name, err);
                result.insert(spec.name, JobStatus::ConfigError(err.to_string()));
            }
        }
        info!(
            "Running {} jobs with {} job workers",
            scheduled.len(),
            self.options.job_workers.max(1)
        );

        let semaphore = Arc::new(Semaphore::new(self.options.job_workers.max(1)));
        let mut handles = Vec::with_capacity(scheduled.len());
        for spec in scheduled {
            let permit = semaphore.clone().acquire_owned().await;
            let runner = self.runner.clone();
            let name = spec.name.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                match runner.run(&spec).await {
                    Ok(summary) => JobStatus::Completed {
                        devices: summary.devices(),
                        failed_devices: summary.failed_devices,
                        output_errors: summary.output_errors,
                    },
                    Err(err) => {
                        error!("Job {} failed: {}", spec.name, err);
                        JobStatus::ConfigError(err.to_string())
                    }
                }
            });
            handles.push((name, handle));
        }

        for (name, handle) in handles {
            let status = match handle.await {
                Ok(status) => status,
                Err(err) => {
                    error!("Job {} task aborted: {}", name, err);
                    JobStatus::Aborted(err.to_string())
                }
            };
            result.insert(name, status);
        }
        result
    }
}
