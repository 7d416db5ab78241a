use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

use netfanout::batch::BatchCoordinator;
use netfanout::config::{
    BatchOptions, DEFAULT_DEVICE_WORKERS, DEFAULT_JOB_WORKERS, OutputLayout, RunContext,
    RunOptions,
};
use netfanout::job::{JobRunner, JobSpec};
use netfanout::timer::ScopedTimer;
use netfanout::transport::{ConnectionSecurityOptions, SecurityLevel, SshTransport};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "netfanout")]
#[command(version = VERSION)]
#[command(about = "Run command files against fleets of network devices over SSH")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one device set
    Run(RunArgs),
    /// Run every device set listed in a batch file
    Batch(BatchArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Device-set CSV, relative to config/
    #[arg(short, long)]
    input: PathBuf,

    /// Output name (defaults to the device-set file stem)
    #[arg(short = 'o', long)]
    outname: Option<String>,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args)]
struct BatchArgs {
    /// Batch file listing device sets, relative to config/
    #[arg(short, long)]
    batch: PathBuf,

    /// Number of jobs run concurrently
    #[arg(long, default_value_t = DEFAULT_JOB_WORKERS)]
    job_workers: usize,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args)]
struct CommonArgs {
    /// Number of devices contacted concurrently per job
    #[arg(short, long, default_value_t = DEFAULT_DEVICE_WORKERS)]
    workers: usize,

    /// Output layout: grouped (output/<ts>/<name>.json) or suffixed (output/<name>_<ts>.json)
    #[arg(short = 's', long, default_value = "grouped")]
    output_structure: OutputLayout,

    /// Do not write the JSON result
    #[arg(long)]
    no_json: bool,

    /// Write one text transcript per device
    #[arg(long)]
    save_txt: bool,

    /// Directory holding config/, cmd/ and output/
    #[arg(long, default_value = ".")]
    base_dir: PathBuf,

    /// SSH algorithm profile: secure, balanced or legacy
    #[arg(long, default_value = "secure")]
    security: SecurityLevel,

    /// Connect timeout in seconds
    #[arg(long, default_value_t = 30)]
    connect_timeout: u64,

    /// Per-command timeout in seconds
    #[arg(long, default_value_t = 60)]
    command_timeout: u64,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl CommonArgs {
    fn run_options(&self) -> RunOptions {
        RunOptions {
            device_workers: self.workers,
            save_json: !self.no_json,
            save_txt: self.save_txt,
            layout: self.output_structure,
        }
    }

    fn transport(&self) -> SshTransport {
        SshTransport::new(ConnectionSecurityOptions::from(self.security))
            .with_connect_timeout(Duration::from_secs(self.connect_timeout))
            .with_command_timeout(Duration::from_secs(self.command_timeout))
    }

    fn runner(&self, ctx: Arc<RunContext>, cancel: CancellationToken) -> JobRunner<SshTransport> {
        JobRunner::new(
            Arc::new(self.transport()),
            ctx,
            self.run_options(),
            cancel,
        )
    }
}

impl Commands {
    fn common(&self) -> &CommonArgs {
        match self {
            Commands::Run(args) => &args.common,
            Commands::Batch(args) => &args.common,
        }
    }

    /// Prefix of the per-run log file.
    fn log_prefix(&self) -> String {
        match self {
            Commands::Run(_) => "netfanout".to_string(),
            Commands::Batch(args) => {
                let name = args
                    .batch
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "batch".to_string());
                format!("batch_{name}")
            }
        }
    }
}

/// Copies every log record to stderr and the run's log file.
struct Tee {
    file: File,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    File::create(path)
}

fn init_logging(verbose: bool, log_file: &Path) {
    let default = if verbose { "debug" } else { "info" };
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default));
    builder.format_timestamp_millis();

    let opened = open_log_file(log_file).map(|file| {
        builder.target(env_logger::Target::Pipe(Box::new(Tee { file })));
    });
    builder.init();

    match opened {
        Ok(_) => info!("Logging to {}", log_file.display()),
        Err(err) => warn!("Cannot write log file {}: {}", log_file.display(), err),
    }
}

/// Cancels the run on Ctrl-C. In-flight devices stop at their next command.
fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling run");
            cancel.cancel();
        }
    });
}

async fn run(args: RunArgs, ctx: Arc<RunContext>, cancel: CancellationToken) -> Result<bool> {
    let runner = args.common.runner(ctx, cancel);
    let spec = JobSpec::new(runner.context().resolve_config(&args.input), args.outname);
    let summary = runner
        .run(&spec)
        .await
        .with_context(|| format!("job {} aborted", spec.name))?;

    println!("{}", summary.report.connection_table());
    for err in &summary.output_errors {
        warn!("Output not written: {}", err);
    }
    Ok(true)
}

async fn batch(args: BatchArgs, ctx: Arc<RunContext>, cancel: CancellationToken) -> Result<bool> {
    let runner = args.common.runner(ctx, cancel);
    let batch_file = runner.context().resolve_config(&args.batch);
    let coordinator = BatchCoordinator::new(
        runner,
        BatchOptions {
            job_workers: args.job_workers,
        },
    );
    let result = coordinator
        .run_file(&batch_file)
        .await
        .with_context(|| format!("batch {} aborted", batch_file.display()))?;

    for (job, status) in result.iter() {
        match status.error() {
            None => info!("Job {}: completed", job),
            Some(detail) => error!("Job {}: {}", job, detail),
        }
    }
    Ok(result.all_succeeded())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let ctx = Arc::new(RunContext::new(&cli.command.common().base_dir));
    init_logging(
        cli.command.common().verbose,
        &ctx.log_file(&cli.command.log_prefix()),
    );

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let _timer = ScopedTimer::start("netfanout");
    let outcome = match cli.command {
        Commands::Run(args) => run(args, ctx, cancel).await,
        Commands::Batch(args) => batch(args, ctx, cancel).await,
    };

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
