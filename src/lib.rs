//! # netfanout - Concurrent Command Runner for Network Devices
//!
//! `netfanout` runs command files against fleets of network devices and turns
//! the per-device results into one JSON document and a connection report per
//! job. Devices of a job run on a bounded pool, and jobs of a batch run on a
//! second, independent pool.
//!
//! ## Features
//!
//! - **Per-device state machine**: optional dialect autodetection, connection,
//!   sequential execution with continue-on-error
//! - **Failure isolation**: connection, detection and command failures stay
//!   inside the device outcome; only configuration errors abort a job
//! - **Race-free aggregation**: every task returns its outcome, one reducer merges
//! - **Cancellation**: one token threaded through batch, job and device levels
//! - **SSH transport**: dialect catalog with prompt, pager and error patterns,
//!   and selectable algorithm profiles for legacy devices
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use netfanout::config::{RunContext, RunOptions};
//! use netfanout::job::{JobRunner, JobSpec};
//! use netfanout::transport::SshTransport;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ctx = Arc::new(RunContext::new("."));
//!     let runner = JobRunner::new(
//!         Arc::new(SshTransport::default()),
//!         ctx.clone(),
//!         RunOptions::default(),
//!         CancellationToken::new(),
//!     );
//!
//!     let spec = JobSpec::new(ctx.resolve_config("core.csv"), None);
//!     let summary = runner.run(&spec).await?;
//!     println!("{}", summary.report.connection_table());
//!     Ok(())
//! }
//! ```
//!
//! ## Main Components
//!
//! - [`worker::DeviceWorker`] - Runs one device through its states
//! - [`scheduler::FanoutScheduler`] - Bounded fan-out over the devices of a job
//! - [`batch::BatchCoordinator`] - Bounded fan-out over the jobs of a batch
//! - [`report::ReportAggregator`] - JSON result, connection table, transcripts
//! - [`transport::DeviceTransport`] - Device access capability, with [`transport::SshTransport`]

pub mod batch;
pub mod command;
pub mod config;
pub mod device;
pub mod error;
pub mod job;
pub mod report;
pub mod scheduler;
pub mod sink;
pub mod timer;
pub mod transport;
pub mod worker;
