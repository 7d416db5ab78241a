//! Bounded fan-out over the devices of one job.
//!
//! Every device runs in its own tokio task. A semaphore caps the number of
//! tasks in flight, and each task hands its [`DeviceOutcome`] back through its
//! join handle. Only the scheduler itself, awaiting the handles, builds the
//! [`JobResult`].

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, error};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::command::CommandList;
use crate::device::Device;
use crate::transport::DeviceTransport;
use crate::worker::{CommandOutcome, DeviceOutcome, DeviceWorker};

/// One unit of work: a device and the commands to run on it.
#[derive(Debug, Clone)]
pub struct DeviceTask {
    pub device: Device,
    pub commands: Arc<CommandList>,
}

/// `ip -> {command -> output-or-error}`, the JSON result of a job.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct JobResult(BTreeMap<String, CommandOutcome>);

impl JobResult {
    /// Merges device outcomes by IP.
    pub fn reduce<'a>(outcomes: impl IntoIterator<Item = &'a DeviceOutcome>) -> Self {
        let mut result = BTreeMap::new();
        for outcome in outcomes {
            result.insert(outcome.ip().to_string(), outcome.commands().clone());
        }
        Self(result)
    }

    pub fn get(&self, ip: &str) -> Option<&CommandOutcome> {
        self.0.get(ip)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn ips(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

/// Per-device outcomes, in device-set order, plus the reduced result.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub outcomes: Vec<DeviceOutcome>,
    pub result: JobResult,
}

pub struct FanoutScheduler<T> {
    transport: Arc<T>,
    workers: usize,
    cancel: CancellationToken,
}

impl<T: DeviceTransport> FanoutScheduler<T> {
    /// `workers` is clamped to at least one.
    pub fn new(transport: Arc<T>, workers: usize, cancel: CancellationToken) -> Self {
        Self {
            transport,
            workers: workers.max(1),
            cancel,
        }
    }

    pub async fn run(&self, tasks: Vec<DeviceTask>) -> JobOutcome {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut handles = Vec::with_capacity(tasks.len());

        for task in tasks {
            let permit = semaphore.clone().acquire_owned().await;
            let worker = DeviceWorker::new(self.transport.clone(), self.cancel.clone());
            let device = task.device.clone();

            let handle = tokio::spawn(async move {
                let _permit = permit;
                worker.run(&task.device, &task.commands).await
            });
            handles.push((device, handle));
        }
        debug!("Spawned {} device tasks", handles.len());

        let mut outcomes = Vec::with_capacity(handles.len());
        for (device, handle) in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => {
                    error!("{} worker task aborted: {}", device.addr(), err);
                    outcomes.push(DeviceOutcome::defect(&device));
                }
            }
        }

        let result = JobResult::reduce(&outcomes);
        JobOutcome { outcomes, result }
    }
}
