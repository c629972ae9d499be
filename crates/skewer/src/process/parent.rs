use std::io::{BufReader, BufWriter};
use std::marker::PhantomData;
use std::process::{Child, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread::{self, JoinHandle};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};
use crate::config::ProcessConfig;
use crate::error::{Result, SkewerError};
use super::child::WORKER_INDEX_ENV;
use super::protocol::{read_message, write_message, Request, Response, TaskId};

/// Parent-side handle to one worker process.
///
/// The child's stdin is its inbound queue and its stdout its outbound queue.
/// Dropping a worker that was not shut down kills the child.
pub struct ProcessWorker<I, O> {
    index: usize,
    child: Child,
    stdin: Option<BufWriter<ChildStdin>>,
    stdout: BufReader<ChildStdout>,
    _marker: PhantomData<fn(I) -> O>,
}

impl<I, O> ProcessWorker<I, O>
where
    I: Serialize,
    O: DeserializeOwned,
{
    /// Launches `config.program` with [`WORKER_INDEX_ENV`] set to `index`.
    /// The child's stderr is inherited so its logs stay visible.
    pub fn spawn(index: usize, config: &ProcessConfig) -> Result<Self> {
        let mut child = Command::new(&config.program)
            .args(&config.args)
            .envs(&config.env)
            .env(WORKER_INDEX_ENV, index.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;

        let missing = |pipe: &str| SkewerError::Protocol {
            index,
            reason: format!("child {pipe} was not captured"),
        };
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        debug!(worker = index, pid = child.id(), program = %config.program, "worker process spawned");

        Ok(Self {
            index,
            child,
            stdin: Some(BufWriter::new(stdin)),
            stdout: BufReader::new(stdout),
            _marker: PhantomData,
        })
    }

    /// The index this worker was spawned with.
    pub fn index(&self) -> usize {
        self.index
    }

    /// OS process id of the child.
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Writes one request to the child's stdin and flushes it.
    ///
    /// # Returns
    ///
    /// [`SkewerError::ChannelClosed`] once the worker is shutting down, or an
    /// IO error if the child has gone away
    pub fn send(&mut self, request: &Request<I>) -> Result<()> {
        let stdin = self.stdin.as_mut().ok_or(SkewerError::ChannelClosed)?;
        write_message(stdin, request)
    }

    /// Sends `item` as task `id` without waiting for the answer.
    pub fn send_task(&mut self, id: u64, item: I) -> Result<()> {
        self.send(&Request::task(id, item))
    }

    /// Blocks for the next response.
    ///
    /// # Returns
    ///
    /// The next message on the child's stdout, or
    /// [`SkewerError::ChannelClosed`] if the child closed it
    pub fn recv(&mut self) -> Result<Response<O>> {
        read_message(&mut self.stdout)?.ok_or(SkewerError::ChannelClosed)
    }

    /// One round trip: sends `item` and waits for its answer.
    pub fn predict(&mut self, id: u64, item: I) -> Result<Option<O>> {
        self.send_task(id, item)?;
        let response = self.recv()?;
        if response.task_id != TaskId::Task(id) {
            return Err(SkewerError::Protocol {
                index: self.index,
                reason: format!("expected answer to task {id}, got {:?}", response.task_id),
            });
        }
        Ok(response.output)
    }

    /// Sends the sentinel, collects answers still in flight, consumes the one
    /// sentinel echo and waits for the process to exit.
    pub fn shutdown(mut self) -> Result<Vec<Response<O>>> {
        self.send(&Request::die())?;
        let mut drained = Vec::new();
        loop {
            let response = self.recv()?;
            if response.task_id.is_die() {
                break;
            }
            drained.push(response);
        }
        self.stdin.take();
        let status = self.child.wait()?;
        check_exit(self.index, status)?;
        info!(worker = self.index, drained = drained.len(), "worker process exited");
        Ok(drained)
    }
}

impl<I, O> Drop for ProcessWorker<I, O> {
    fn drop(&mut self) {
        if self.stdin.take().is_some() {
            // not shut down cleanly
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

fn check_exit(index: usize, status: ExitStatus) -> Result<()> {
    if status.success() {
        Ok(())
    } else {
        Err(SkewerError::Protocol {
            index,
            reason: format!("worker exited with {status}"),
        })
    }
}

/// # ProcessWorkerPool
///
/// N worker processes fed from one shared inbound queue, answering into one
/// shared outbound queue.
///
/// Each worker process gets a feeding thread that takes the next request from
/// the shared queue only after the previous answer came back, so an idle
/// process picks up work first. Answers from different processes interleave
/// in completion order.
///
/// [`shutdown`](Self::shutdown) sends one sentinel per process and returns
/// once every process has echoed it.
pub struct ProcessWorkerPool<I, O> {
    inbound: Option<SyncSender<Request<I>>>,
    outbound: Receiver<Response<O>>,
    feeders: Vec<JoinHandle<Result<()>>>,
}

impl<I, O> ProcessWorkerPool<I, O>
where
    I: Serialize + Send + 'static,
    O: DeserializeOwned + Send + 'static,
{
    /// Launches `workers` processes with indices `0..workers`, each with its
    /// own feeding thread.
    ///
    /// # Parameters
    ///
    /// * `workers` - Number of processes; must be at least one
    /// * `config` - How to launch each process
    pub fn spawn(workers: usize, config: &ProcessConfig) -> Result<Self> {
        if workers == 0 {
            return Err(SkewerError::Config("at least one worker process is required".into()));
        }

        let (inbound, requests) = mpsc::sync_channel::<Request<I>>(workers);
        let requests = Arc::new(Mutex::new(requests));
        let (answers, outbound) = mpsc::channel();

        let mut feeders = Vec::with_capacity(workers);
        for index in 0..workers {
            let worker = ProcessWorker::spawn(index, config)?;
            let requests = requests.clone();
            let answers = answers.clone();
            let feeder = thread::Builder::new()
                .name(format!("skewer-feeder-{index}"))
                .spawn(move || feed(worker, &requests, &answers))
                .map_err(|e| SkewerError::Spawn(index, e))?;
            feeders.push(feeder);
        }
        info!(workers, program = %config.program, "process pool started");

        Ok(Self {
            inbound: Some(inbound),
            outbound,
            feeders,
        })
    }

    /// Number of worker processes.
    pub fn workers(&self) -> usize {
        self.feeders.len()
    }

    /// Queues one task, blocking while every process is busy and the queue is full.
    pub fn put(&self, id: u64, item: I) -> Result<()> {
        let inbound = self.inbound.as_ref().ok_or(SkewerError::ChannelClosed)?;
        inbound
            .send(Request::task(id, item))
            .map_err(|_| SkewerError::ChannelClosed)
    }

    /// Blocks for the next answer from any process.
    pub fn get(&self) -> Result<Response<O>> {
        self.outbound.recv().map_err(|_| SkewerError::ChannelClosed)
    }

    /// Stops every process. Returns the answers that had not been taken with
    /// [`get`](Self::get) yet, in arrival order.
    pub fn shutdown(mut self) -> Result<Vec<Response<O>>> {
        let workers = self.feeders.len();
        if let Some(inbound) = self.inbound.take() {
            for _ in 0..workers {
                inbound.send(Request::die()).map_err(|_| SkewerError::ChannelClosed)?;
            }
        }

        let mut drained = Vec::new();
        let mut echoes = 0;
        while echoes < workers {
            let response = self.get()?;
            if response.task_id.is_die() {
                echoes += 1;
            } else {
                drained.push(response);
            }
        }

        for (index, feeder) in self.feeders.drain(..).enumerate() {
            feeder.join().map_err(|_| SkewerError::WorkerPanicked(index))??;
        }
        info!(workers, drained = drained.len(), "process pool stopped");
        Ok(drained)
    }
}

impl<I, O> Drop for ProcessWorkerPool<I, O> {
    fn drop(&mut self) {
        // dropping the sender ends every feeder, which kills its process
        self.inbound.take();
    }
}

fn feed<I, O>(
    mut worker: ProcessWorker<I, O>,
    requests: &Mutex<Receiver<Request<I>>>,
    answers: &mpsc::Sender<Response<O>>,
) -> Result<()>
where
    I: Serialize,
    O: DeserializeOwned,
{
    let index = worker.index();
    loop {
        let request = requests.lock().recv();
        let Ok(request) = request else {
            warn!(worker = index, "inbound queue closed without a sentinel");
            return Err(SkewerError::ChannelClosed);
        };

        let is_die = request.task_id.is_die();
        if is_die {
            let drained = worker.shutdown()?;
            for response in drained {
                let _ = answers.send(response);
            }
            let _ = answers.send(Response::die());
            return Ok(());
        }

        worker.send(&request)?;
        let response = worker.recv()?;
        if answers.send(response).is_err() {
            debug!(worker = index, "outbound queue dropped");
        }
    }
}
