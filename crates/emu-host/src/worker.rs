//! Serialized access to one executor from many threads.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::config::HostConfig;
use crate::executor::Executor;
use crate::foreign::ForeignModule;
use crate::wasm::WasmtimeModule;

type Job<M> = Box<dyn FnOnce(&mut Executor<M>) + Send>;

/// Owns an [`Executor`] on a dedicated thread and runs submitted jobs one at
/// a time, in submission order.
///
/// The module is built on the worker thread, so it never has to be `Send`.
/// Dropping the worker closes the queue, lets queued jobs finish, shuts the
/// executor down and joins the thread.
pub struct ExecutorWorker<M: ForeignModule + 'static> {
    tx: Option<mpsc::Sender<Job<M>>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl ExecutorWorker<WasmtimeModule> {
    pub fn from_config(config: HostConfig) -> Result<Self> {
        Self::spawn(move || WasmtimeModule::from_config(&config))
    }
}

impl<M: ForeignModule + 'static> ExecutorWorker<M> {
    /// Starts the worker; returns once `factory` has produced the module.
    pub fn spawn<F>(factory: F) -> Result<Self>
    where
        F: FnOnce() -> Result<M> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<Job<M>>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

        let thread = thread::Builder::new()
            .name("emu-host-worker".to_string())
            .spawn(move || {
                let exec = match factory() {
                    Ok(module) => {
                        let _ = ready_tx.send(Ok(()));
                        Executor::new(module)
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                worker_loop(exec, rx);
            })
            .context("spawn executor worker thread")?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                tx: Some(tx),
                thread: Some(thread),
            }),
            Ok(Err(err)) => {
                let _ = thread.join();
                Err(err.context("build executor module"))
            }
            Err(_) => {
                let _ = thread.join();
                anyhow::bail!("executor worker exited during startup")
            }
        }
    }

    /// Runs `job` on the worker and waits for its result.
    ///
    /// A panicking job is reported to its caller as an error; the worker
    /// keeps serving later jobs.
    pub fn run<R, F>(&self, job: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut Executor<M>) -> R + Send + 'static,
    {
        let (result_tx, result_rx) = mpsc::sync_channel::<thread::Result<R>>(1);
        let boxed: Job<M> = Box::new(move |exec| {
            let out = panic::catch_unwind(AssertUnwindSafe(|| job(exec)));
            let _ = result_tx.send(out);
        });
        self.tx
            .as_ref()
            .context("executor worker is shut down")?
            .send(boxed)
            .map_err(|_| anyhow::anyhow!("executor worker stopped"))?;
        match result_rx.recv() {
            Ok(Ok(out)) => Ok(out),
            Ok(Err(payload)) => {
                let message = panic_message(payload.as_ref());
                warn!(panic = %message, "executor job panicked");
                anyhow::bail!("executor job panicked: {message}")
            }
            Err(_) => anyhow::bail!("executor worker dropped the job"),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

fn worker_loop<M: ForeignModule>(mut exec: Executor<M>, rx: mpsc::Receiver<Job<M>>) {
    let mut jobs = 0u64;
    while let Ok(job) = rx.recv() {
        job(&mut exec);
        jobs += 1;
    }
    debug!(jobs, "executor worker queue closed");
    if let Err(err) = exec.shutdown() {
        let err = format!("{err:#}");
        warn!(error = %err, "executor shutdown failed");
    }
}

impl<M: ForeignModule + 'static> Drop for ExecutorWorker<M> {
    fn drop(&mut self) {
        drop(self.tx.take());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("executor worker thread panicked");
            }
        }
    }
}
