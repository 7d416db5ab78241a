//! One job: a device set run end to end.
//!
//! Loading and validation happen before any device is contacted, so a
//! [`ConfigError`] aborts the job cleanly. Everything after that produces
//! output even when devices fail.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use log::{error, info};
use tokio_util::sync::CancellationToken;

use crate::command::CommandList;
use crate::config::{RunContext, RunOptions};
use crate::device::load_device_set;
use crate::error::{ConfigError, OutputError};
use crate::report::{JobReport, ReportAggregator};
use crate::scheduler::{DeviceTask, FanoutScheduler, JobOutcome};
use crate::sink::{OutputPaths, write_file};
use crate::timer::ScopedTimer;
use crate::transport::DeviceTransport;
use crate::worker::ConnectionStatus;

/// A device set and the name its outputs are written under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub name: String,
    pub device_set: PathBuf,
}

impl JobSpec {
    /// The job name defaults to the device-set file stem.
    pub fn new(device_set: impl Into<PathBuf>, name: Option<String>) -> Self {
        let device_set = device_set.into();
        let name = name.unwrap_or_else(|| {
            device_set
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| "job".to_string())
        });
        Self { name, device_set }
    }
}

/// What a finished job produced.
#[derive(Debug)]
pub struct JobSummary {
    pub report: JobReport,
    pub failed_devices: usize,
    pub written: Vec<PathBuf>,
    /// Output files that could not be written.
    pub output_errors: Vec<String>,
}

impl JobSummary {
    pub fn devices(&self) -> usize {
        self.report.device_count()
    }
}

pub struct JobRunner<T> {
    transport: Arc<T>,
    ctx: Arc<RunContext>,
    options: RunOptions,
    cancel: CancellationToken,
}

impl<T: DeviceTransport> JobRunner<T> {
    pub fn new(
        transport: Arc<T>,
        ctx: Arc<RunContext>,
        options: RunOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            transport,
            ctx,
            options,
            cancel,
        }
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    pub async fn run(&self, spec: &JobSpec) -> Result<JobSummary, ConfigError> {
        let _timer = ScopedTimer::start(format!("job {}", spec.name));
        info!("Starting job {} from {}", spec.name, spec.device_set.display());

        let tasks = self.load_tasks(&spec.device_set).await?;
        let planned: HashMap<String, Arc<CommandList>> = tasks
            .iter()
            .map(|task| (task.device.ip().to_string(), task.commands.clone()))
            .collect();

        let scheduler = FanoutScheduler::new(
            self.transport.clone(),
            self.options.device_workers,
            self.cancel.clone(),
        );
        let outcome = scheduler.run(tasks).await;
        let report = ReportAggregator::aggregate(&spec.name, Local::now(), &outcome);

        let failed_devices = outcome
            .outcomes
            .iter()
            .filter(|o| o.status() == ConnectionStatus::Failed)
            .count();

        let mut summary = JobSummary {
            report,
            failed_devices,
            written: Vec::new(),
            output_errors: Vec::new(),
        };
        self.write_outputs(&spec.name, &outcome, &planned, &mut summary)
            .await;

        info!(
            "Job {} finished: {} devices, {} failed",
            spec.name,
            summary.devices(),
            summary.failed_devices
        );
        Ok(summary)
    }

    async fn load_tasks(&self, device_set: &Path) -> Result<Vec<DeviceTask>, ConfigError> {
        let devices = load_device_set(device_set, &self.ctx).await?;

        let mut lists: HashMap<PathBuf, Arc<CommandList>> = HashMap::new();
        let mut tasks = Vec::with_capacity(devices.len());
        for device in devices {
            let path = device.command_file().to_path_buf();
            let commands = match lists.get(&path) {
                Some(list) => list.clone(),
                None => {
                    let list = Arc::new(CommandList::load(&path).await?);
                    lists.insert(path, list.clone());
                    list
                }
            };
            tasks.push(DeviceTask { device, commands });
        }
        Ok(tasks)
    }

    async fn write_outputs(
        &self,
        job: &str,
        outcome: &JobOutcome,
        planned: &HashMap<String, Arc<CommandList>>,
        summary: &mut JobSummary,
    ) {
        let paths = OutputPaths::new(&self.ctx, self.options.layout, job);
        let json = self.options.save_json.then(|| summary.report.to_json());
        let table = summary.report.connection_table();

        let mut record = |path: &Path, result: Result<(), OutputError>| match result {
            Ok(()) => summary.written.push(path.to_path_buf()),
            Err(err) => {
                error!("Job {}: {}", job, err);
                summary.output_errors.push(err.to_string());
            }
        };

        if let Some(json) = json {
            let written = match json {
                Ok(json) => write_file(&paths.json, &json).await,
                Err(err) => Err(err),
            };
            record(&paths.json, written);
        }
        record(&paths.report, write_file(&paths.report, &table).await);

        if self.options.save_txt {
            for device in &outcome.outcomes {
                // Only devices that got as far as a connection attempt.
                let attempted = device
                    .resolution()
                    .is_some_and(|r| r.device_type().is_some());
                let Some(commands) = planned.get(device.ip()).filter(|_| attempted) else {
                    continue;
                };
                let path = paths.transcript(device.hostname());
                let text = ReportAggregator::transcript(device, commands);
                record(&path, write_file(&path, &text).await);
            }
        }
    }
}
