//! Line-delimited JSON task protocol for running as a pool worker process.
//!
//! Each input line is a `TransformTask`; each output line is the matching
//! `TaskResult`. Tasks are processed strictly one after another.

use std::path::PathBuf;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

use crate::task::{TaskResult, TransformTask};
use crate::worker::Worker;

/// Serve tasks until the input closes. Returns the number of tasks answered.
pub async fn serve<R, W>(worker: &mut Worker, input: R, mut output: W) -> anyhow::Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let mut answered = 0usize;
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let result = match serde_json::from_str::<TransformTask>(&line) {
            Ok(task) => worker.run_task(&task).await,
            Err(e) => {
                warn!("malformed task line: {}", e);
                TaskResult::Error {
                    file: PathBuf::new(),
                    error: format!("malformed task: {}", e),
                }
            }
        };
        let mut encoded = serde_json::to_string(&result)?;
        encoded.push('\n');
        output.write_all(encoded.as_bytes()).await?;
        output.flush().await?;
        answered += 1;
    }
    info!(
        "input closed after {} tasks ({} plugins loaded, {} script compilers)",
        answered,
        worker.loader().loaded(),
        worker.loader().compilers().count()
    );
    Ok(answered)
}
