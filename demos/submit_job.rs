use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use appforge::config::EngineConfig;
use appforge::scheduler::AppSpec;
use appforge::Engine;

#[derive(Parser, Debug)]
#[command(name = "submit-job")]
#[command(about = "Run one generation job in-process and follow it to the end")]
struct Args {
    /// The application idea
    #[arg(short, long)]
    idea: String,

    /// java or kotlin
    #[arg(long, default_value = "java")]
    language: String,

    /// Where project trees are written
    #[arg(long, default_value = "generated_apps")]
    storage_root: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    let engine = Engine::new(EngineConfig::new(args.storage_root), CancellationToken::new());

    let mut spec = AppSpec::new(args.idea);
    spec.language = args.language;
    let submitted = engine.submit(spec).await?;
    println!("Job submitted successfully!");
    println!("Job ID: {}", submitted.job_id);

    let mut last_status = None;
    loop {
        let view = engine.status(&submitted.job_id).await?;
        if last_status != Some(view.status) {
            println!("[{:>3}%] {:<22} {}", view.progress, view.status.to_string(), view.current_step);
            last_status = Some(view.status);
        }
        if view.status.is_terminal() {
            println!("{}", serde_json::to_string_pretty(&view)?);
            break;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    Ok(())
}
