use crate::job::parser::{load_job, validate_job};
use crate::task::{TaskResult, TransformTask, UpdateStatus};
use crate::util::{create_run_dir, timestamp, write_artifact};
use crate::worker::Worker;
use futures::future::join_all;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};
use chrono::Utc;

/// Caller-side overrides applied on top of the job file.
#[derive(Debug, Clone, Copy, Default)]
pub struct Overrides {
    pub dry: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub ok: usize,
    pub skipped: usize,
    pub nochange: usize,
    pub errors: usize,
    /// Tasks never started because the run was stopped early.
    pub not_run: usize,
}

impl Summary {
    fn record(&mut self, result: &TaskResult) {
        match result {
            TaskResult::Update { status: UpdateStatus::Ok, .. } => self.ok += 1,
            TaskResult::Update { status: UpdateStatus::Skipped, .. } => self.skipped += 1,
            TaskResult::Update { status: UpdateStatus::NoChange, .. } => self.nochange += 1,
            TaskResult::Error { .. } => self.errors += 1,
        }
    }
}

/// Public entry used by main.rs
pub async fn run_job(path: &Path, overrides: Overrides) -> anyhow::Result<Summary> {
    let mut job = load_job(path)?;
    validate_job(&job)?;
    if overrides.dry {
        job.dry = true;
    }

    info!("Starting job: {} ({} files, dry={})", job.display_name(), job.files.len(), job.dry);

    // create run dir for artifacts
    let base = Path::new(".rustymod");
    let run_dir = create_run_dir(base)?;
    write_artifact(&run_dir, "job.yaml", &serde_yaml::to_string(&job)?)?;

    let job_dir = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
    let tasks = job.tasks(&job_dir);
    let stop_on_error = job.stop_on_error.unwrap_or(false);

    // graceful shutdown: stop handing out tasks, let running ones finish
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Received Ctrl+C; no new files will be started");
                shutdown.store(true, Ordering::SeqCst);
            }
        });
    }

    let results = dispatch(tasks, job.worker_count(), stop_on_error, shutdown).await;

    let mut summary = Summary::default();
    let mut report = Vec::with_capacity(results.len());
    for (task, result) in &results {
        match result {
            Some(result) => {
                summary.record(result);
                println!("{}", serde_json::to_string(result)?);
                report.push(serde_json::to_value(result)?);
            }
            None => {
                summary.not_run += 1;
                report.push(json!({ "type": "notrun", "file": task.file_path }));
            }
        }
    }

    let meta = json!({
        "job": job.display_name(),
        "timestamp": Utc::now().to_rfc3339(),
        "summary": summary,
        "results": report,
    });
    write_artifact(&run_dir, &format!("results_{}.json", timestamp()), &serde_json::to_string_pretty(&meta)?)?;

    info!(
        "Job finished: {} ok, {} skipped, {} nochange, {} errors, {} not run",
        summary.ok, summary.skipped, summary.nochange, summary.errors, summary.not_run
    );
    Ok(summary)
}

/// Run `tasks` on `workers` workers, each with its own plugin cache. Results come
/// back in task order; `None` marks a task that was never started.
pub async fn dispatch(
    tasks: Vec<TransformTask>,
    workers: usize,
    stop_on_error: bool,
    shutdown: Arc<AtomicBool>,
) -> Vec<(TransformTask, Option<TaskResult>)> {
    let (task_tx, task_rx) = mpsc::unbounded_channel::<(usize, TransformTask)>();
    let (result_tx, mut result_rx) = mpsc::unbounded_channel::<(usize, TaskResult)>();
    for (idx, task) in tasks.iter().cloned().enumerate() {
        // receiver is alive until the workers below exit
        let _ = task_tx.send((idx, task));
    }
    drop(task_tx);

    let queue = Arc::new(Mutex::new(task_rx));
    let handles: Vec<_> = (0..workers.max(1)).map(|id| {
        let queue = queue.clone();
        let result_tx = result_tx.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut worker = Worker::new();
            loop {
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                let next = queue.lock().await.recv().await;
                let Some((idx, task)) = next else { break };
                let result = worker.run_task(&task).await;
                if result.is_error() && stop_on_error {
                    warn!("worker {}: {:?} failed; stopping (stop_on_error=true)", id, result.file());
                    shutdown.store(true, Ordering::SeqCst);
                }
                if result_tx.send((idx, result)).is_err() {
                    break;
                }
            }
        })
    }).collect();
    drop(result_tx);

    for joined in join_all(handles).await {
        if let Err(e) = joined {
            warn!("worker task ended abnormally: {:?}", e);
        }
    }

    let mut slots: Vec<Option<TaskResult>> = vec![None; tasks.len()];
    while let Some((idx, result)) = result_rx.recv().await {
        slots[idx] = Some(result);
    }
    tasks.into_iter().zip(slots).collect()
}
