//! Background maintenance: periodic checkpoints and log reclamation.
//!
//! Each [`PeriodicTask`] runs on its own named thread. Between runs the
//! thread sleeps for the task's interval; [`MaintenanceHandle::stop`] wakes it
//! at once. A task that returns an error (or panics) stops and reports the
//! failure as its exit status; the environment itself keeps serving.
//!
//! ```rust
//! use berrydb_core::{EnvConfig, Environment, MaintenanceConfig, MaintenanceScheduler};
//! use std::time::Duration;
//!
//! let env = Environment::open_in_memory(EnvConfig::default())?;
//! let config = MaintenanceConfig::default().checkpoint_interval(Duration::from_millis(10));
//! let handle = MaintenanceScheduler::start(&env, &config)?;
//! // ... foreground work ...
//! for (task, exit) in handle.stop() {
//!     println!("{task}: {exit:?}");
//! }
//! # Ok::<(), berrydb_core::CoreError>(())
//! ```

use crate::checkpoint::{ArchiveMode, CheckpointOptions};
use crate::config::MaintenanceConfig;
use crate::env::Environment;
use crate::error::CoreResult;
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// A unit of background work run at a fixed interval.
pub trait PeriodicTask: Send + 'static {
    /// Short name, used for the thread name and in logs.
    fn name(&self) -> &str;

    /// Time to wait before each run.
    fn interval(&self) -> Duration;

    /// Performs one run. An error ends the task.
    fn run_once(&mut self) -> CoreResult<()>;
}

/// Takes checkpoints when the configured thresholds are met.
#[derive(Debug)]
pub struct CheckpointTask {
    env: Environment,
    interval: Duration,
    options: CheckpointOptions,
}

impl CheckpointTask {
    /// Creates a checkpoint task.
    #[must_use]
    pub fn new(env: Environment, interval: Duration, options: CheckpointOptions) -> Self {
        Self {
            env,
            interval,
            options,
        }
    }
}

impl PeriodicTask for CheckpointTask {
    fn name(&self) -> &str {
        "checkpoint"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn run_once(&mut self) -> CoreResult<()> {
        self.env.checkpoint(&self.options)?;
        Ok(())
    }
}

/// Removes log files that the latest checkpoint no longer needs.
#[derive(Debug)]
pub struct LogReclaimTask {
    env: Environment,
    interval: Duration,
}

impl LogReclaimTask {
    /// Creates a log reclamation task.
    #[must_use]
    pub fn new(env: Environment, interval: Duration) -> Self {
        Self { env, interval }
    }
}

impl PeriodicTask for LogReclaimTask {
    fn name(&self) -> &str {
        "log-reclaim"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn run_once(&mut self) -> CoreResult<()> {
        for path in self.env.log_archive(ArchiveMode::Absolute)? {
            self.env.remove_log_file(&path)?;
        }
        Ok(())
    }
}

/// How a maintenance task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskExit {
    /// Stopped on request after `runs` successful runs.
    Stopped {
        /// Completed runs.
        runs: u64,
    },
    /// Ended by an error or a panic after `runs` successful runs.
    Failed {
        /// Completed runs before the failure.
        runs: u64,
        /// The error or panic message.
        error: String,
    },
}

impl TaskExit {
    /// Returns true if the task ended by failing.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Number of successful runs.
    #[must_use]
    pub fn runs(&self) -> u64 {
        match self {
            Self::Stopped { runs } | Self::Failed { runs, .. } => *runs,
        }
    }
}

#[derive(Default)]
struct Shutdown {
    stopped: Mutex<bool>,
    signal: Condvar,
}

impl Shutdown {
    fn trigger(&self) {
        *self.stopped.lock() = true;
        self.signal.notify_all();
    }

    /// Sleeps for `interval` unless shutdown comes first. Returns true on
    /// shutdown.
    fn wait(&self, interval: Duration) -> bool {
        let deadline = Instant::now() + interval;
        let mut stopped = self.stopped.lock();
        while !*stopped {
            if self.signal.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        *stopped
    }
}

/// Starts maintenance threads.
#[derive(Debug)]
pub struct MaintenanceScheduler;

impl MaintenanceScheduler {
    /// Starts the checkpoint and log reclamation tasks for `env`.
    pub fn start(env: &Environment, config: &MaintenanceConfig) -> CoreResult<MaintenanceHandle> {
        Self::spawn(vec![
            Box::new(CheckpointTask::new(
                env.clone(),
                config.checkpoint_interval,
                config.checkpoint,
            )) as Box<dyn PeriodicTask>,
            Box::new(LogReclaimTask::new(env.clone(), config.reclaim_interval)),
        ])
    }

    /// Runs each task on a thread of its own.
    ///
    /// # Errors
    ///
    /// `Io` if a thread cannot be spawned; tasks already started are stopped.
    pub fn spawn(tasks: Vec<Box<dyn PeriodicTask>>) -> CoreResult<MaintenanceHandle> {
        let mut handle = MaintenanceHandle {
            shutdown: Arc::new(Shutdown::default()),
            workers: Vec::with_capacity(tasks.len()),
        };
        for task in tasks {
            let name = task.name().to_string();
            let shutdown = Arc::clone(&handle.shutdown);
            let worker = thread::Builder::new()
                .name(format!("berrydb-{name}"))
                .spawn(move || run_task(task, &shutdown))?;
            tracing::debug!(task = %name, "maintenance task started");
            handle.workers.push((name, worker));
        }
        Ok(handle)
    }
}

fn run_task(mut task: Box<dyn PeriodicTask>, shutdown: &Shutdown) -> TaskExit {
    let mut runs = 0;
    loop {
        if shutdown.wait(task.interval()) {
            return TaskExit::Stopped { runs };
        }
        let error = match panic::catch_unwind(AssertUnwindSafe(|| task.run_once())) {
            Ok(Ok(())) => {
                runs += 1;
                continue;
            }
            Ok(Err(err)) => err.to_string(),
            Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
        };
        tracing::error!(task = %task.name(), runs, error = %error, "maintenance task failed");
        return TaskExit::Failed { runs, error };
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Running maintenance threads.
///
/// Dropping the handle stops and joins the threads too, discarding their exit
/// status.
pub struct MaintenanceHandle {
    shutdown: Arc<Shutdown>,
    workers: Vec<(String, JoinHandle<TaskExit>)>,
}

impl MaintenanceHandle {
    /// Names of the tasks, in start order.
    #[must_use]
    pub fn task_names(&self) -> Vec<&str> {
        self.workers.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Returns true if the task has ended on its own (it failed).
    #[must_use]
    pub fn is_finished(&self, name: &str) -> bool {
        self.workers
            .iter()
            .any(|(task, worker)| task == name && worker.is_finished())
    }

    /// Signals shutdown, waits for every thread and returns each task's exit
    /// status.
    #[must_use]
    pub fn stop(mut self) -> Vec<(String, TaskExit)> {
        self.shutdown.trigger();
        std::mem::take(&mut self.workers)
            .into_iter()
            .map(|(name, worker)| {
                let exit = worker.join().unwrap_or_else(|payload| TaskExit::Failed {
                    runs: 0,
                    error: format!("panicked: {}", panic_message(payload.as_ref())),
                });
                tracing::debug!(task = %name, ?exit, "maintenance task stopped");
                (name, exit)
            })
            .collect()
    }
}

impl Drop for MaintenanceHandle {
    fn drop(&mut self) {
        self.shutdown.trigger();
        for (name, worker) in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::warn!(task = %name, "maintenance thread panicked");
            }
        }
    }
}

impl fmt::Debug for MaintenanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaintenanceHandle")
            .field("tasks", &self.task_names())
            .finish_non_exhaustive()
    }
}
