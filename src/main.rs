mod cli;
mod engine;
mod job;
mod plugins;
mod protocol;
mod task;
mod util;
mod worker;

use anyhow::Context;
use std::path::Path;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::cli::Command;
use crate::task::TransformOptions;
use crate::worker::Worker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging; stdout is reserved for results
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    let opts = cli::get_opts();
    match opts.command {
        Command::Run { job } => {
            let overrides = job::executor::Overrides { dry: opts.dry };
            let summary = job::executor::run_job(Path::new(&job), overrides)
                .await
                .context("job run failed")?;
            if summary.errors > 0 {
                anyhow::bail!("{} file(s) failed", summary.errors);
            }
        }
        Command::Validate { job } => {
            let job = job::parser::validate_job_file(Path::new(&job))?;
            println!("Job '{}' validated", job.display_name());
        }
        Command::Apply { transform, file } => {
            let mut worker = Worker::new();
            let options = TransformOptions { dry: opts.dry };
            let result = worker.run(Path::new(&transform), Path::new(&file), &options).await;
            println!("{}", serde_json::to_string(&result)?);
            if result.is_error() {
                anyhow::bail!("transform failed for {}", file);
            }
        }
        Command::Worker => {
            let mut worker = Worker::new();
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            protocol::serve(&mut worker, stdin, tokio::io::stdout()).await?;
        }
    }

    Ok(())
}
