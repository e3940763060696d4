//! Process lifecycle for the heru services.
//!
//! A [`Runner`] owns a set of named long-running processes sharing one
//! [`CancellationToken`]. SIGINT or SIGTERM cancels the token, as does the
//! failure of any one-shot process. Supervised processes are instead restarted
//! after a delay for as long as the token is live. Once every process has
//! stopped, the registered closers run under a common deadline.
//!
//! ```no_run
//! use heru_runner::Runner;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     Runner::new()
//!         .with_supervised_process("heartbeat", Duration::from_secs(5), |ctx| async move {
//!             while !ctx.is_cancelled() {
//!                 tracing::info!("alive");
//!                 tokio::time::sleep(Duration::from_secs(30)).await;
//!             }
//!             Ok(())
//!         })
//!         .with_closer(|| async { Ok(()) })
//!         .run()
//!         .await;
//! }
//! ```

use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type ProcessResult = Result<(), anyhow::Error>;

/// A process that runs once; its failure stops the runner
pub type AppProcess =
    Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, ProcessResult> + Send>;

/// Builds a fresh run of a supervised process each time it is (re)started
pub type SupervisedProcess =
    Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, ProcessResult> + Send + Sync>;

pub type Closer = Box<dyn FnOnce() -> BoxFuture<'static, ProcessResult> + Send>;

const DEFAULT_CLOSER_TIMEOUT: Duration = Duration::from_secs(10);

enum Lifecycle {
    Once(AppProcess),
    Restarting {
        factory: SupervisedProcess,
        delay: Duration,
    },
}

/// How a run ended
#[derive(Debug, Default)]
pub struct RunOutcome {
    /// Error of the one-shot process whose failure triggered shutdown
    pub first_error: Option<anyhow::Error>,
}

pub struct Runner {
    processes: Vec<(String, Lifecycle)>,
    closers: Vec<Closer>,
    closer_timeout: Duration,
    token: CancellationToken,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    pub fn new() -> Self {
        Self {
            processes: Vec::new(),
            closers: Vec::new(),
            closer_timeout: DEFAULT_CLOSER_TIMEOUT,
            token: CancellationToken::new(),
        }
    }

    /// One-shot process named after its position
    pub fn with_app_process<F, Fut>(self, process: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ProcessResult> + Send + 'static,
    {
        let name = format!("process_{}", self.processes.len());
        self.with_named_process(name, Box::new(move |ctx| Box::pin(process(ctx))))
    }

    pub fn with_named_process(mut self, name: impl Into<String>, process: AppProcess) -> Self {
        self.processes.push((name.into(), Lifecycle::Once(process)));
        self
    }

    /// Process restarted `restart_delay` after it fails, panics or returns while
    /// the runner is still live
    pub fn with_supervised_process<F, Fut>(
        mut self,
        name: impl Into<String>,
        restart_delay: Duration,
        factory: F,
    ) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ProcessResult> + Send + 'static,
    {
        let factory: SupervisedProcess = Arc::new(move |ctx| Box::pin(factory(ctx)));
        self.processes.push((
            name.into(),
            Lifecycle::Restarting {
                factory,
                delay: restart_delay,
            },
        ));
        self
    }

    /// Cleanup step run after every process has stopped, whatever the outcome
    pub fn with_closer<F, Fut>(mut self, closer: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ProcessResult> + Send + 'static,
    {
        self.closers.push(Box::new(move || Box::pin(closer())));
        self
    }

    /// Deadline shared by all closers
    pub fn with_closer_timeout(mut self, timeout: Duration) -> Self {
        self.closer_timeout = timeout;
        self
    }

    /// Share shutdown with an externally owned token
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Run to completion and exit the process: status 1 if a one-shot process failed
    pub async fn run(self) {
        let token = self.token.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            token.cancel();
        });

        match self.run_until_stopped().await.first_error {
            Some(e) => {
                error!(error = %format!("{e:#}"), "stopped after process failure");
                std::process::exit(1);
            }
            None => {
                info!("stopped cleanly");
                std::process::exit(0);
            }
        }
    }

    /// Drive every process until the token is cancelled or a one-shot process
    /// fails, then run the closers
    pub async fn run_until_stopped(self) -> RunOutcome {
        let Self {
            processes,
            closers,
            closer_timeout,
            token,
        } = self;

        let mut running = JoinSet::new();
        for (name, lifecycle) in processes {
            let ctx = token.clone();
            debug!(process = %name, "starting process");
            running.spawn(async move {
                let result = match lifecycle {
                    Lifecycle::Once(process) => process(ctx).await,
                    Lifecycle::Restarting { factory, delay } => {
                        supervise(&name, factory, delay, ctx).await;
                        Ok(())
                    }
                };
                (name, result)
            });
        }

        let mut outcome = RunOutcome::default();
        while !token.is_cancelled() {
            let Some(joined) = running.join_next().await else {
                break;
            };
            match joined {
                Ok((name, Ok(()))) => debug!(process = %name, "process finished"),
                Ok((name, Err(e))) => {
                    error!(process = %name, error = %format!("{e:#}"), "process failed");
                    outcome.first_error = Some(e);
                    token.cancel();
                }
                Err(e) => {
                    error!(error = %e, "process panicked");
                    token.cancel();
                }
            }
        }

        // Give every process the closer deadline to observe cancellation, then
        // abort the rest so nothing is still working while the closers run
        let drained = tokio::time::timeout(closer_timeout, async {
            while let Some(joined) = running.join_next().await {
                match joined {
                    Ok((name, Ok(()))) => debug!(process = %name, "process stopped"),
                    Ok((name, Err(e))) => error!(
                        process = %name,
                        error = %format!("{e:#}"),
                        "process failed while stopping"
                    ),
                    Err(e) => error!(error = %e, "process panicked while stopping"),
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                remaining = running.len(),
                timeout = ?closer_timeout,
                "processes ignored cancellation, aborting them"
            );
        }
        running.shutdown().await;

        close_all(closers, closer_timeout).await;
        outcome
    }
}

async fn supervise(
    name: &str,
    factory: SupervisedProcess,
    delay: Duration,
    ctx: CancellationToken,
) {
    let mut attempt: u64 = 0;

    while !ctx.is_cancelled() {
        attempt += 1;
        // Spawned so a panic is contained to this attempt. The set aborts the
        // attempt if this supervisor is itself aborted.
        let mut current = JoinSet::new();
        current.spawn(factory(ctx.clone()));
        let Some(exit) = current.join_next().await else {
            break;
        };
        if ctx.is_cancelled() {
            break;
        }

        match exit {
            Ok(Ok(())) => warn!(process = %name, attempt, "exited while still live"),
            Ok(Err(e)) => {
                error!(process = %name, attempt, error = %format!("{e:#}"), "failed")
            }
            Err(e) => error!(process = %name, attempt, error = %e, "panicked"),
        }

        tokio::select! {
            _ = ctx.cancelled() => break,
            _ = tokio::time::sleep(delay) => info!(process = %name, attempt, "restarting"),
        }
    }

    debug!(process = %name, attempts = attempt, "supervision ended");
}

/// Resolves on Ctrl-C, or SIGTERM on unix
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => info!("interrupt received, shutting down"),
        _ = terminate => info!("SIGTERM received, shutting down"),
    }
}

async fn close_all(closers: Vec<Closer>, deadline: Duration) {
    if closers.is_empty() {
        return;
    }

    let mut closing = JoinSet::new();
    for closer in closers {
        closing.spawn(closer());
    }

    let drained = tokio::time::timeout(deadline, async {
        while let Some(joined) = closing.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %format!("{e:#}"), "closer failed"),
                Err(e) => error!(error = %e, "closer panicked"),
            }
        }
    })
    .await;

    match drained {
        Ok(()) => info!("closers finished"),
        Err(_) => error!(timeout = ?deadline, "closers did not finish in time"),
    }
}
