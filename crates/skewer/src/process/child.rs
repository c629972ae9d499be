use std::io::{self, BufRead, Write};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;
use crate::error::{Result, SkewerError};
use crate::predictor::OfflinePredictor;
use super::protocol::{read_message, write_message, Request, Response, TaskId};

/// Environment variable carrying a worker process's index.
pub const WORKER_INDEX_ENV: &str = "SKEWER_WORKER_INDEX";

/// Runs one out-of-process worker until it reads the shutdown sentinel.
///
/// `init` builds the predictor inside this process, so each index can bind
/// its own device. Only worker 0 logs the predictor description.
///
/// Each request is scored on its own and answered with the same task id. On
/// the sentinel the worker echoes it once and returns the number of tasks it
/// answered. A closed inbound stream, malformed input or a failed write ends
/// the worker with an error; a predictor error is logged and answered with
/// no output.
pub fn run_worker<P, R, W, F>(index: usize, mut inbound: R, mut outbound: W, init: F) -> Result<usize>
where
    P: OfflinePredictor,
    R: BufRead,
    W: Write,
    F: FnOnce(usize) -> anyhow::Result<P>,
{
    let mut predictor = init(index).map_err(SkewerError::Init)?;
    if index == 0 {
        info!(worker = index, predictor = %predictor.describe(), "predictor ready");
    }

    let mut answered = 0;
    loop {
        let request: Request<P::Input> = read_message(&mut inbound)?.ok_or(SkewerError::ChannelClosed)?;
        let id = match request.task_id {
            TaskId::Die => {
                write_message(&mut outbound, &Response::<P::Output>::die())?;
                debug!(worker = index, answered, "received shutdown sentinel");
                return Ok(answered);
            }
            TaskId::Task(id) => id,
        };

        let item = request.item.ok_or_else(|| SkewerError::Protocol {
            index,
            reason: format!("task {id} has no item"),
        })?;
        let output = match predictor.predict(item) {
            Ok(output) => Some(output),
            Err(e) => {
                error!(worker = index, task = id, error = ?e, "predictor failed");
                None
            }
        };
        write_message(&mut outbound, &Response { task_id: request.task_id, output })?;
        answered += 1;
    }
}

/// Entry point for a worker executable.
///
/// Reads its index from [`WORKER_INDEX_ENV`] (default 0), logs to stderr and
/// serves requests on stdin/stdout.
pub fn run_worker_main<P, F>(init: F) -> Result<()>
where
    P: OfflinePredictor,
    F: FnOnce(usize) -> anyhow::Result<P>,
{
    // stdout carries the protocol, logs must stay on stderr
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "skewer=info".into()))
        .with_writer(io::stderr)
        .try_init();

    let index = match std::env::var(WORKER_INDEX_ENV) {
        Ok(value) => value
            .parse()
            .map_err(|_| SkewerError::Config(format!("{WORKER_INDEX_ENV} is not an index: {value}")))?,
        Err(_) => 0,
    };

    let stdin = io::stdin();
    let stdout = io::stdout();
    let answered = run_worker(index, stdin.lock(), stdout.lock(), init)?;
    info!(worker = index, answered, "worker exiting");
    Ok(())
}
