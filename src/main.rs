use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use appforge::config::{BuildConfig, DeviceConfig, EngineConfig};
use appforge::dashboard::{run_dashboard, DashboardState};
use appforge::shutdown::install_shutdown_handler;
use appforge::worker::{BuildExecutor, BuildOutcome, DeployExecutor, InstallOutcome};
use appforge::Engine;

#[derive(Parser, Debug)]
#[command(name = "appforge")]
#[command(version)]
#[command(about = "Turns app ideas into buildable Android projects")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the API server and the retention reaper
    Server(ServerArgs),

    /// Build an existing project directory with the configured toolchain
    Build {
        /// Project root containing the build entry point
        project_dir: PathBuf,

        /// Build timeout in seconds
        #[arg(long, env = "APPFORGE_BUILD_TIMEOUT_SECS", default_value = "600")]
        timeout_secs: u64,

        #[arg(long, short = 'o', value_enum, default_value = "table")]
        output: OutputFormat,
    },

    /// Install a package on the first connected device
    Install {
        /// Package file to install
        package: PathBuf,

        #[command(flatten)]
        device: DeviceArgs,

        #[arg(long, short = 'o', value_enum, default_value = "table")]
        output: OutputFormat,
    },
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Address to serve the API on
    #[arg(long, env = "APPFORGE_LISTEN_ADDR", default_value = "127.0.0.1:8080")]
    listen: SocketAddr,

    /// Directory holding one project tree per job
    #[arg(long, env = "APPFORGE_STORAGE_ROOT", default_value = "generated_apps")]
    storage_root: PathBuf,

    /// Maximum number of jobs generating at the same time
    #[arg(long, env = "APPFORGE_MAX_CONCURRENT_JOBS", default_value = "5")]
    max_concurrent_jobs: usize,

    /// Hours a finished job and its files are kept
    #[arg(long, env = "APPFORGE_RETENTION_HOURS", default_value = "24")]
    retention_hours: u64,

    /// Build timeout in seconds
    #[arg(long, env = "APPFORGE_BUILD_TIMEOUT_SECS", default_value = "600")]
    build_timeout_secs: u64,

    /// Base URL put into share links and QR codes
    #[arg(long, env = "APPFORGE_PUBLIC_URL")]
    public_url: Option<String>,

    #[command(flatten)]
    device: DeviceArgs,
}

#[derive(Parser, Debug)]
struct DeviceArgs {
    /// Device bridge executable
    #[arg(long, env = "APPFORGE_ADB", default_value = "adb")]
    adb: PathBuf,

    /// Install timeout in seconds
    #[arg(long, env = "APPFORGE_INSTALL_TIMEOUT_SECS", default_value = "120")]
    install_timeout_secs: u64,
}

impl DeviceArgs {
    fn to_config(&self) -> DeviceConfig {
        DeviceConfig {
            bridge: self.adb.clone(),
            install_timeout: Duration::from_secs(self.install_timeout_secs),
            ..DeviceConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match args.command {
        Commands::Server(server) => run_server(server).await,
        Commands::Build {
            project_dir,
            timeout_secs,
            output,
        } => handle_build(project_dir, timeout_secs, &output).await,
        Commands::Install {
            package,
            device,
            output,
        } => handle_install(package, &device, &output).await,
    }
}

// =============================================================================
// Server Implementation
// =============================================================================

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    if args.max_concurrent_jobs == 0 {
        return Err("--max-concurrent-jobs must be at least 1".into());
    }
    tokio::fs::create_dir_all(&args.storage_root).await?;

    let build = BuildConfig {
        timeout: Duration::from_secs(args.build_timeout_secs),
        ..BuildConfig::default()
    };
    let public_url = args
        .public_url
        .unwrap_or_else(|| format!("http://{}", args.listen));
    let config = EngineConfig::new(args.storage_root)
        .with_max_concurrent_jobs(args.max_concurrent_jobs)
        .with_retention(retention_window(args.retention_hours)?)
        .with_build(build)
        .with_device(args.device.to_config())
        .with_public_base_url(public_url);

    tracing::info!(
        listen_addr = %args.listen,
        storage_root = %config.storage_root.display(),
        max_concurrent_jobs = config.max_concurrent_jobs,
        retention = ?config.retention,
        "Starting appforge server"
    );

    let shutdown = install_shutdown_handler();
    let engine = Engine::new(config, shutdown.clone());
    let reaper = engine.spawn_reaper();

    run_dashboard(args.listen, DashboardState { engine }, shutdown.clone()).await;

    shutdown.cancel();
    if let Err(e) = reaper.await {
        tracing::warn!(error = %e, "Reaper task ended abnormally");
    }
    tracing::info!("Server stopped");
    Ok(())
}

/// Retention in hours as a duration, rejecting values that overflow.
fn retention_window(hours: u64) -> Result<Duration, String> {
    hours
        .checked_mul(60 * 60)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("--retention-hours {} is too large", hours))
}

// =============================================================================
// Direct Executor Commands
// =============================================================================

async fn handle_build(
    project_dir: PathBuf,
    timeout_secs: u64,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let executor = BuildExecutor::new(BuildConfig {
        timeout: Duration::from_secs(timeout_secs),
        ..BuildConfig::default()
    });
    let cancel = ctrl_c_token();
    let outcome = executor
        .build(&project_dir, &cancel)
        .await
        .map_err(|_| "build cancelled")?;

    match output_format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&outcome)?),
        OutputFormat::Table => print_build(&outcome),
    }
    if !outcome.success {
        std::process::exit(1);
    }
    Ok(())
}

fn print_build(outcome: &BuildOutcome) {
    if let Some(path) = &outcome.artifact_path {
        println!("Build succeeded!");
        println!("Package:  {}", path.display());
        if let Some(size) = outcome.size_bytes {
            println!("Size:     {:.2} MB", size as f64 / (1024.0 * 1024.0));
        }
        return;
    }
    println!("Build failed");
    if let Some(error) = &outcome.error {
        println!("Code:     {}", error.code);
        if let Some(classification) = &error.classification {
            println!("Kind:     {}", classification);
        }
        println!("Message:  {}", error.message);
        if let Some(tail) = &error.diagnostic_tail {
            println!("Output:");
            for line in tail.lines() {
                println!("  {}", line);
            }
        }
    }
}

async fn handle_install(
    package: PathBuf,
    device: &DeviceArgs,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let executor = DeployExecutor::new(device.to_config());
    let cancel = ctrl_c_token();
    let outcome = executor
        .install(&package, &cancel)
        .await
        .map_err(|_| "install cancelled")?;

    match output_format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&outcome)?),
        OutputFormat::Table => print_install(&outcome),
    }
    if !outcome.success {
        std::process::exit(1);
    }
    Ok(())
}

fn print_install(outcome: &InstallOutcome) {
    println!("{}", outcome.message);
    if let Some(device) = &outcome.device {
        println!("Device:   {} ({}, {})", device.model, device.id, device.connectivity);
    }
    if let Some(error) = &outcome.error {
        println!("Code:     {}", error.code);
        if let Some(classification) = &error.classification {
            println!("Kind:     {}", classification);
        }
    }
}

fn ctrl_c_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });
    token
}
