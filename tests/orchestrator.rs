use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use netfanout::batch::{BatchCoordinator, JobStatus};
use netfanout::config::{BatchOptions, OutputLayout, RunContext, RunOptions};
use netfanout::device::{Device, DeviceTypeResolution};
use netfanout::error::{ConfigError, ConnectError};
use netfanout::job::{JobRunner, JobSpec};
use netfanout::transport::{DeviceSession, DeviceTransport};
use tokio_util::sync::CancellationToken;

const TWO_DEVICES: &str = include_str!("fixtures/two_devices.csv");
const SHOW_COMMANDS: &str = include_str!("fixtures/show.txt");
const HEADER: &str = "username,password,hostname,ip,port,cmdfile,device_type\n";

#[derive(Clone, Copy, Default)]
enum Connect {
    #[default]
    Accept,
    WrongPassword,
    Timeout,
}

#[derive(Default)]
struct DeviceScript {
    detect: Option<&'static str>,
    connect: Connect,
    failing: Vec<&'static str>,
}

/// Open sessions and the highest counts seen. A job is identified by the
/// first three octets of its device IPs.
#[derive(Default)]
struct Gauge {
    open: Mutex<Vec<String>>,
    peak_devices: AtomicUsize,
    peak_jobs: AtomicUsize,
}

impl Gauge {
    fn enter(&self, ip: &str) {
        let mut open = self.open.lock().expect("gauge lock");
        open.push(ip.to_string());
        let jobs: HashSet<&str> = open
            .iter()
            .map(|ip| ip.rsplit_once('.').map_or(ip.as_str(), |(job, _)| job))
            .collect();
        self.peak_devices.fetch_max(open.len(), Ordering::SeqCst);
        self.peak_jobs.fetch_max(jobs.len(), Ordering::SeqCst);
    }

    fn leave(&self, ip: &str) {
        let mut open = self.open.lock().expect("gauge lock");
        if let Some(pos) = open.iter().position(|o| o == ip) {
            open.remove(pos);
        }
    }
}

/// In-memory fleet keyed by device IP. Unknown devices accept everything.
#[derive(Default)]
struct Fleet {
    scripts: HashMap<&'static str, DeviceScript>,
    log: Arc<Mutex<Vec<String>>>,
    gauge: Arc<Gauge>,
    delay: Option<Duration>,
}

impl Fleet {
    fn with(mut self, ip: &'static str, script: DeviceScript) -> Self {
        self.scripts.insert(ip, script);
        self
    }

    fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    fn contacted(&self) -> Vec<String> {
        self.log.lock().expect("log lock").clone()
    }
}

struct FleetSession {
    ip: String,
    failing: Vec<&'static str>,
    log: Arc<Mutex<Vec<String>>>,
    gauge: Arc<Gauge>,
    delay: Option<Duration>,
}

impl DeviceSession for FleetSession {
    async fn execute(&mut self, command: &str) -> Result<String, ConnectError> {
        self.log
            .lock()
            .expect("log lock")
            .push(format!("{} exec {}", self.ip, command));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.iter().any(|f| *f == command) {
            return Err(ConnectError::Exec(format!("% Invalid input: {command}")));
        }
        Ok(format!("{} says {}", self.ip, command))
    }

    async fn close(self) {
        self.gauge.leave(&self.ip);
    }
}

impl DeviceTransport for Fleet {
    type Session = FleetSession;

    async fn detect(&self, device: &Device) -> Result<String, ConnectError> {
        self.log
            .lock()
            .expect("log lock")
            .push(format!("{} detect", device.ip()));
        self.scripts
            .get(device.ip())
            .and_then(|s| s.detect)
            .map(str::to_string)
            .ok_or_else(|| ConnectError::Detection(format!("no dialect matched {}", device.ip())))
    }

    async fn connect(
        &self,
        device: &Device,
        device_type: &str,
    ) -> Result<FleetSession, ConnectError> {
        self.log
            .lock()
            .expect("log lock")
            .push(format!("{} connect {}", device.ip(), device_type));
        let script = self.scripts.get(device.ip());
        match script.map(|s| s.connect).unwrap_or_default() {
            Connect::Accept => {
                self.gauge.enter(device.ip());
                Ok(FleetSession {
                    ip: device.ip().to_string(),
                    failing: script.map(|s| s.failing.clone()).unwrap_or_default(),
                    log: self.log.clone(),
                    gauge: self.gauge.clone(),
                    delay: self.delay,
                })
            }
            Connect::WrongPassword => Err(ConnectError::AuthFailure(device.addr())),
            Connect::Timeout => Err(ConnectError::Timeout(device.addr())),
        }
    }
}

struct Workspace {
    _dir: tempfile::TempDir,
    ctx: Arc<RunContext>,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("config")).expect("config dir");
        std::fs::create_dir_all(dir.path().join("cmd")).expect("cmd dir");
        let ctx = Arc::new(RunContext::new(dir.path()));
        Self { _dir: dir, ctx }
    }

    fn config(&self, name: &str, text: &str) -> PathBuf {
        let path = self.ctx.resolve_config(name);
        std::fs::write(&path, text).expect("write config file");
        path
    }

    fn commands(&self, name: &str, text: &str) {
        std::fs::write(self.ctx.resolve_command_file(name), text).expect("write command file");
    }

    fn output(&self) -> &Path {
        self.ctx.output_dir()
    }

    fn runner(&self, fleet: Arc<Fleet>, options: RunOptions) -> JobRunner<Fleet> {
        JobRunner::new(fleet, self.ctx.clone(), options, CancellationToken::new())
    }
}

fn read_json(path: &Path) -> serde_json::Value {
    let text = std::fs::read_to_string(path).expect("read json output");
    serde_json::from_str(&text).expect("valid json")
}

#[tokio::test]
async fn two_device_job_reports_success_and_detection_failure() {
    let ws = Workspace::new();
    ws.commands("show.txt", SHOW_COMMANDS);
    let device_set = ws.config("core.csv", TWO_DEVICES);
    let fleet = Arc::new(Fleet::default());

    let summary = ws
        .runner(fleet.clone(), RunOptions::default())
        .run(&JobSpec::new(device_set, None))
        .await
        .expect("job runs");

    let result = &summary.report.result;
    assert_eq!(result.len(), 2);
    let a = result.get("10.0.0.1").expect("device A");
    assert_eq!(a.len(), 2);
    assert!(a.iter().all(|(_, r)| !r.is_failed()));
    assert!(result.get("10.0.0.2").expect("device B").is_empty());

    let rows = &summary.report.rows;
    assert_eq!(rows.len(), 2);
    let row_a = rows.iter().find(|r| r.ip == "10.0.0.1").expect("row A");
    assert_eq!(row_a.input_type, "cisco_ios");
    assert_eq!(row_a.detected_type, "cisco_ios");
    assert_eq!(row_a.status, "Success");
    let row_b = rows.iter().find(|r| r.ip == "10.0.0.2").expect("row B");
    assert_eq!(row_b.input_type, "None");
    assert_eq!(row_b.detected_type, "Failed");
    assert_eq!(row_b.status, "Failed");

    assert!(!fleet.contacted().iter().any(|l| l.starts_with("10.0.0.2 connect")));

    let ts = ws.ctx.timestamp();
    let json = read_json(&ws.output().join(&ts).join("core.json"));
    assert_eq!(json["10.0.0.1"]["show version"], "10.0.0.1 says show version");
    assert_eq!(json["10.0.0.2"], serde_json::json!({}));
    let table = std::fs::read_to_string(ws.output().join(&ts).join("core_report.txt"))
        .expect("connection report");
    assert!(table.contains("Devices: 2"));
    assert!(summary.output_errors.is_empty());
}

#[tokio::test]
async fn failing_command_does_not_stop_the_device() {
    let ws = Workspace::new();
    ws.commands("three.txt", "show a\nshow b\nshow c\n");
    let device_set = ws.config(
        "lab.csv",
        &format!("{HEADER}admin,pw,lab1,10.1.0.1,22,three.txt,linux\n"),
    );
    let fleet = Arc::new(Fleet::default().with(
        "10.1.0.1",
        DeviceScript {
            failing: vec!["show b"],
            ..Default::default()
        },
    ));

    let summary = ws
        .runner(fleet.clone(), RunOptions::default())
        .run(&JobSpec::new(device_set, None))
        .await
        .expect("job runs");

    let outcome = summary.report.result.get("10.1.0.1").expect("device");
    let values: Vec<String> = outcome.iter().map(|(_, r)| r.rendered().into_owned()).collect();
    assert_eq!(values[0], "10.1.0.1 says show a");
    assert!(values[1].starts_with("Error: "));
    assert_eq!(values[2], "10.1.0.1 says show c");
    assert_eq!(summary.report.rows[0].status, "Success");
    assert_eq!(
        fleet
            .contacted()
            .iter()
            .filter(|l| l.contains(" exec "))
            .count(),
        3
    );
}

#[tokio::test]
async fn connection_failures_mark_every_queued_command() {
    let ws = Workspace::new();
    ws.commands("show.txt", SHOW_COMMANDS);
    let device_set = ws.config(
        "edge.csv",
        &format!(
            "{HEADER}admin,bad,e1,10.2.0.1,22,show.txt,huawei\nadmin,pw,e2,10.2.0.2,22,show.txt,huawei\n"
        ),
    );
    let fleet = Arc::new(
        Fleet::default()
            .with(
                "10.2.0.1",
                DeviceScript {
                    connect: Connect::WrongPassword,
                    ..Default::default()
                },
            )
            .with(
                "10.2.0.2",
                DeviceScript {
                    connect: Connect::Timeout,
                    ..Default::default()
                },
            ),
    );

    let summary = ws
        .runner(fleet, RunOptions::default())
        .run(&JobSpec::new(device_set, None))
        .await
        .expect("job runs");

    assert_eq!(summary.failed_devices, 2);
    for ip in ["10.2.0.1", "10.2.0.2"] {
        let outcome = summary.report.result.get(ip).expect("device entry");
        assert_eq!(outcome.len(), 2);
        assert!(outcome.iter().all(|(_, r)| r.rendered().starts_with("Error: ")));
    }
    let auth = summary.report.result.get("10.2.0.1").expect("e1");
    assert!(
        auth.get("show version")
            .expect("show version")
            .rendered()
            .contains("authentication failed")
    );
}

#[tokio::test]
async fn invalid_port_aborts_job_before_contact() {
    let ws = Workspace::new();
    ws.commands("show.txt", SHOW_COMMANDS);
    let device_set = ws.config(
        "bad.csv",
        &format!(
            "{HEADER}admin,pw,ok,10.3.0.1,22,show.txt,linux\nadmin,pw,bad,10.3.0.2,0,show.txt,linux\n"
        ),
    );
    let fleet = Arc::new(Fleet::default());

    let err = ws
        .runner(fleet.clone(), RunOptions::default())
        .run(&JobSpec::new(device_set, None))
        .await
        .expect_err("port 0 must abort");

    assert!(matches!(err, ConfigError::InvalidPort { .. }));
    assert!(fleet.contacted().is_empty());
    assert!(!ws.output().exists());
}

#[tokio::test]
async fn missing_command_file_aborts_job() {
    let ws = Workspace::new();
    let device_set = ws.config(
        "core.csv",
        &format!("{HEADER}admin,pw,c1,10.4.0.1,22,absent.txt,linux\n"),
    );

    let err = ws
        .runner(Arc::new(Fleet::default()), RunOptions::default())
        .run(&JobSpec::new(device_set, None))
        .await
        .expect_err("missing command file");
    assert!(matches!(err, ConfigError::MissingCommandFile { .. }));
}

#[tokio::test]
async fn every_device_yields_exactly_one_outcome() {
    let ws = Workspace::new();
    ws.commands("show.txt", SHOW_COMMANDS);
    let mut text = HEADER.to_string();
    for i in 1..=25 {
        let declared = if i % 5 == 0 { "" } else { "linux" };
        text.push_str(&format!("admin,pw,n{i},10.5.0.{i},22,show.txt,{declared}\n"));
    }
    let device_set = ws.config("fleet.csv", &text);
    let options = RunOptions {
        device_workers: 4,
        save_json: false,
        ..RunOptions::default()
    };

    let summary = ws
        .runner(Arc::new(Fleet::default()), options)
        .run(&JobSpec::new(device_set, None))
        .await
        .expect("job runs");

    assert_eq!(summary.devices(), 25);
    assert_eq!(summary.report.result.len(), 25);
    assert_eq!(summary.failed_devices, 5);
    assert!(!ws.output().join(ws.ctx.timestamp()).join("fleet.json").exists());
}

#[tokio::test]
async fn transcripts_are_written_for_connected_devices() {
    let ws = Workspace::new();
    ws.commands("show.txt", SHOW_COMMANDS);
    let device_set = ws.config("core.csv", TWO_DEVICES);
    let options = RunOptions {
        save_txt: true,
        layout: OutputLayout::Suffixed,
        ..RunOptions::default()
    };

    let summary = ws
        .runner(Arc::new(Fleet::default()), options)
        .run(&JobSpec::new(device_set, Some("pull".to_string())))
        .await
        .expect("job runs");

    let ts = ws.ctx.timestamp();
    let dir = ws.output().join(format!("pull_{ts}"));
    let transcript = std::fs::read_to_string(dir.join("core-a.txt")).expect("transcript");
    assert!(transcript.starts_with("##### OUTPUT FOR 10.0.0.1 core-a\n##### WILL EXECUTE:\n"));
    assert!(transcript.contains("##### EXECUTE CMD: show ip interface brief\n"));
    assert!(!dir.join("edge-b.txt").exists());
    assert!(ws.output().join(format!("pull_{ts}.json")).exists());
    assert!(ws.output().join(format!("pull_report_{ts}.txt")).exists());
    assert_eq!(summary.written.len(), 3);
}

#[tokio::test]
async fn detected_dialect_is_used_for_connection() {
    let ws = Workspace::new();
    ws.commands("show.txt", SHOW_COMMANDS);
    let device_set = ws.config("core.csv", TWO_DEVICES);
    let fleet = Arc::new(Fleet::default().with(
        "10.0.0.2",
        DeviceScript {
            detect: Some("arista_eos"),
            ..Default::default()
        },
    ));

    let summary = ws
        .runner(fleet.clone(), RunOptions::default())
        .run(&JobSpec::new(device_set, None))
        .await
        .expect("job runs");

    assert!(fleet.contacted().contains(&"10.0.0.2 connect arista_eos".to_string()));
    let row_b = summary
        .report
        .rows
        .iter()
        .find(|r| r.ip == "10.0.0.2")
        .expect("row B");
    assert_eq!(row_b.detected_type, "arista_eos");
    assert_eq!(row_b.status, "Success");
}

#[tokio::test]
async fn cancelled_run_short_circuits_devices() {
    let ws = Workspace::new();
    ws.commands("show.txt", SHOW_COMMANDS);
    let device_set = ws.config("core.csv", TWO_DEVICES);
    let fleet = Arc::new(Fleet::default());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let runner = JobRunner::new(fleet.clone(), ws.ctx.clone(), RunOptions::default(), cancel);
    let summary = runner
        .run(&JobSpec::new(device_set, None))
        .await
        .expect("job runs");

    assert!(fleet.contacted().is_empty());
    assert_eq!(summary.failed_devices, 2);
    let a = summary.report.result.get("10.0.0.1").expect("device A");
    assert!(a.iter().all(|(_, r)| r.rendered() == "Error: run cancelled"));
}

#[tokio::test]
async fn batch_with_missing_device_set_still_runs_other_jobs() {
    let ws = Workspace::new();
    ws.commands("show.txt", SHOW_COMMANDS);
    ws.config("core.csv", TWO_DEVICES);
    let batch_file = ws.config("nightly.txt", "core.csv\n\n  missing.csv\ncore.csv\n");

    let coordinator = BatchCoordinator::new(
        ws.runner(Arc::new(Fleet::default()), RunOptions::default()),
        BatchOptions { job_workers: 2 },
    );
    let result = coordinator.run_file(&batch_file).await.expect("batch runs");

    assert_eq!(result.len(), 2);
    assert!(matches!(
        result.get("core"),
        Some(JobStatus::Completed { devices: 2, .. })
    ));
    let missing = result.get("missing").expect("missing job");
    assert!(!missing.success());
    assert!(missing.error().expect("error detail").contains("does not exist"));
    assert!(!result.all_succeeded());

    let ts = ws.ctx.timestamp();
    assert!(ws.output().join(&ts).join("core.json").exists());
    assert!(ws.output().join(&ts).join("core_report.txt").exists());
}

#[tokio::test]
async fn job_level_config_error_is_recorded_in_batch() {
    let ws = Workspace::new();
    ws.commands("show.txt", SHOW_COMMANDS);
    ws.config("core.csv", TWO_DEVICES);
    ws.config(
        "broken.csv",
        &format!("{HEADER}admin,pw,x,10.6.0.1,65536,show.txt,linux\n"),
    );
    let batch_file = ws.config("batch.txt", "core.csv\nbroken.csv\n");

    let coordinator = BatchCoordinator::new(
        ws.runner(Arc::new(Fleet::default()), RunOptions::default()),
        BatchOptions::default(),
    );
    let result = coordinator.run_file(&batch_file).await.expect("batch runs");

    assert!(result.get("core").expect("core").success());
    assert!(matches!(
        result.get("broken"),
        Some(JobStatus::ConfigError(detail)) if detail.contains("invalid port")
    ));
}

#[tokio::test]
async fn batch_keeps_same_named_device_sets_apart() {
    let ws = Workspace::new();
    ws.commands("show.txt", SHOW_COMMANDS);
    for site in ["east", "west"] {
        std::fs::create_dir_all(ws.ctx.resolve_config(site)).expect("site dir");
    }
    ws.config(
        "east/core.csv",
        &format!("{HEADER}admin,pw,e1,10.9.0.1,22,show.txt,linux\n"),
    );
    ws.config(
        "west/core.csv",
        &format!("{HEADER}admin,pw,w1,10.9.0.2,22,show.txt,linux\n"),
    );
    let batch_file = ws.config("sites.txt", "east/core.csv\nwest/core.csv\n");

    let coordinator = BatchCoordinator::new(
        ws.runner(Arc::new(Fleet::default()), RunOptions::default()),
        BatchOptions { job_workers: 1 },
    );
    let result = coordinator.run_file(&batch_file).await.expect("batch runs");

    assert_eq!(result.len(), 2);
    assert!(result.get("east_core").expect("east job").success());
    assert!(result.get("west_core").expect("west job").success());

    let run_dir = ws.output().join(ws.ctx.timestamp());
    let east = read_json(&run_dir.join("east_core.json"));
    let west = read_json(&run_dir.join("west_core.json"));
    assert!(east.get("10.9.0.1").is_some());
    assert!(east.get("10.9.0.2").is_none());
    assert!(west.get("10.9.0.2").is_some());
    assert!(run_dir.join("east_core_report.txt").exists());
    assert!(run_dir.join("west_core_report.txt").exists());
}

#[tokio::test]
async fn batch_pool_bounds_concurrent_jobs() {
    let ws = Workspace::new();
    ws.commands("show.txt", SHOW_COMMANDS);
    let mut entries = String::new();
    for job in 1..=5 {
        let mut text = HEADER.to_string();
        for dev in 1..=3 {
            text.push_str(&format!(
                "admin,pw,j{job}d{dev},10.7.{job}.{dev},22,show.txt,linux\n"
            ));
        }
        ws.config(&format!("site{job}.csv"), &text);
        entries.push_str(&format!("site{job}.csv\n"));
    }
    let batch_file = ws.config("all.txt", &entries);

    let fleet = Arc::new(Fleet::slow(Duration::from_millis(40)));
    let options = RunOptions {
        device_workers: 3,
        save_json: false,
        ..RunOptions::default()
    };
    let coordinator = BatchCoordinator::new(
        ws.runner(fleet.clone(), options),
        BatchOptions { job_workers: 2 },
    );
    let result = coordinator.run_file(&batch_file).await.expect("batch runs");

    assert_eq!(result.len(), 5);
    assert!(result.all_succeeded());
    let peak_jobs = fleet.gauge.peak_jobs.load(Ordering::SeqCst);
    let peak_devices = fleet.gauge.peak_devices.load(Ordering::SeqCst);
    assert!(peak_jobs <= 2, "peak jobs {peak_jobs}");
    assert!(peak_devices <= 6, "peak devices {peak_devices}");
    // Devices of one job may exceed the job bound.
    assert!(peak_devices >= 3, "peak devices {peak_devices}");
    assert!(fleet.gauge.open.lock().expect("gauge lock").is_empty());
}

#[test]
fn resolution_exposes_connectable_type() {
    assert_eq!(
        DeviceTypeResolution::Detected("huawei".into()).device_type(),
        Some("huawei")
    );
    assert_eq!(DeviceTypeResolution::DetectionFailed.device_type(), None);
}
