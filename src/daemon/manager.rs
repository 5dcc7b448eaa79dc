//! Daemon manager: startup handshake, supervision and ordered shutdown.

use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, error, info, warn};

use super::{Daemon, DaemonCommand, DaemonContext, DaemonProgram, DaemonReport, DaemonState};
use crate::error::{describe_panic, install_panic_hook, CoreError, Result};

/// Manager-side handles of a started daemon.
pub(super) struct DaemonLink {
    commands: mpsc::Sender<DaemonCommand>,
    reports: Arc<Mutex<mpsc::Receiver<DaemonReport>>>,
    handshake: Option<JoinHandle<()>>,
    exit_seen: bool,
}

/// Why supervision stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorExit {
    /// The shutdown future completed (an OS signal in production).
    Signal,
    /// A daemon exited with an error or panicked.
    DaemonFailed { name: String },
    /// Every started daemon exited cleanly, or none was started.
    AllFinished,
}

/// Owns the daemon registry and drives its lifecycle.
pub struct DaemonManager {
    daemons: Vec<Daemon>,
    completion_tx: mpsc::UnboundedSender<usize>,
    completion_rx: mpsc::UnboundedReceiver<usize>,
    stopped: bool,
}

impl DaemonManager {
    /// Creates a manager over an ordered daemon list.
    pub fn new(daemons: Vec<Daemon>) -> Self {
        install_panic_hook();
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        Self {
            daemons,
            completion_tx,
            completion_rx,
            stopped: false,
        }
    }

    /// Registered daemons in registration order.
    pub fn daemons(&self) -> &[Daemon] {
        &self.daemons
    }

    /// Starts every daemon with a program, concurrently.
    ///
    /// Each daemon gets its runner task and a startup handshake task. A failed
    /// or timed out handshake is logged only; other daemons are unaffected.
    pub fn start_up(&mut self) {
        for (index, daemon) in self.daemons.iter_mut().enumerate() {
            if daemon.link.is_some() {
                continue;
            }
            let Some(program) = daemon.program.clone() else {
                info!(
                    daemon = %daemon.name,
                    "Daemon {}: Skipping (Daemon has no program to run)",
                    daemon.name
                );
                continue;
            };

            info!(daemon = %daemon.name, "Daemon {}: Starting up... Please wait", daemon.name);

            let (command_tx, command_rx) = mpsc::channel(1);
            let (report_tx, report_rx) = mpsc::channel(1);
            let reports = Arc::new(Mutex::new(report_rx));
            let ctx = DaemonContext::new(daemon.name.clone(), command_rx, report_tx.clone());

            tokio::spawn(run_daemon(
                daemon.name.clone(),
                program,
                ctx,
                report_tx.clone(),
                Arc::clone(&daemon.state),
                self.completion_tx.clone(),
                index,
            ));

            let handshake = tokio::spawn(await_startup(
                daemon.name.clone(),
                Arc::clone(&reports),
                report_tx,
                daemon.startup_grace,
                self.completion_tx.clone(),
                index,
            ));

            daemon.link = Some(DaemonLink {
                commands: command_tx,
                reports,
                handshake: Some(handshake),
                exit_seen: false,
            });
        }
    }

    /// Supervises running daemons until `shutdown` completes, a daemon fails,
    /// or nothing is left running.
    pub async fn supervise<F>(&mut self, shutdown: F) -> SupervisorExit
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            if self.all_finished() {
                info!("All daemons finished");
                return SupervisorExit::AllFinished;
            }

            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    return SupervisorExit::Signal;
                }
                notified = self.completion_rx.recv() => {
                    let Some(index) = notified else {
                        return SupervisorExit::AllFinished;
                    };
                    if let Some(name) = self.drain_reports(index).await {
                        return SupervisorExit::DaemonFailed { name };
                    }
                }
            }
        }
    }

    /// Stops running daemons in reverse registration order. Runs once.
    ///
    /// Each daemon gets a `Shutdown` command and is awaited up to its
    /// shutdown grace. A failed acknowledgement aborts the sequence, leaving
    /// earlier-registered daemons unsignalled.
    pub async fn shut_down(&mut self) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;

        for daemon in &mut self.daemons {
            if let Some(handshake) = daemon.link.as_mut().and_then(|l| l.handshake.take()) {
                handshake.abort();
                let _ = handshake.await;
            }
        }

        for daemon in self.daemons.iter().rev() {
            let Some(link) = daemon.link.as_ref() else {
                continue;
            };
            if daemon.state() != DaemonState::Running {
                debug!(daemon = %daemon.name, state = %daemon.state(), "Not running, skipping shutdown");
                continue;
            }

            match link.commands.try_send(DaemonCommand::Shutdown) {
                Ok(()) => info!(daemon = %daemon.name, "Daemon {}: Shutdown signalled", daemon.name),
                Err(TrySendError::Full(_)) => {
                    warn!(daemon = %daemon.name, "Daemon {}: Command channel full, shutdown not signalled", daemon.name)
                }
                Err(TrySendError::Closed(_)) => {
                    warn!(daemon = %daemon.name, "Daemon {}: Program stopped listening for commands", daemon.name)
                }
            }

            await_shutdown_ack(&daemon.name, &link.reports, daemon.shutdown_grace).await?;
        }

        Ok(())
    }

    /// Starts, supervises until `shutdown` or a failure, then shuts down.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<SupervisorExit>
    where
        F: Future<Output = ()>,
    {
        self.start_up();
        let exit = self.supervise(shutdown).await;
        self.shut_down().await?;
        Ok(exit)
    }

    fn all_finished(&self) -> bool {
        self.daemons
            .iter()
            .filter_map(|d| d.link.as_ref())
            .all(|link| link.exit_seen)
    }

    /// Drains the status channel of the daemon that raised a completion
    /// notification. Returns the daemon's name if it exited with an error.
    async fn drain_reports(&mut self, index: usize) -> Option<String> {
        let daemon = self.daemons.get_mut(index)?;
        let link = daemon.link.as_mut()?;
        let reports = Arc::clone(&link.reports);
        let mut rx = reports.lock().await;

        while let Ok(report) = rx.try_recv() {
            match report {
                DaemonReport::Exit { ok: true, .. } => {
                    link.exit_seen = true;
                    info!(daemon = %daemon.name, "Daemon {}: Finished", daemon.name);
                }
                DaemonReport::Exit { ok: false, note } => {
                    link.exit_seen = true;
                    let err = CoreError::DaemonFailed {
                        daemon: daemon.name.clone(),
                        note,
                    };
                    error!(daemon = %daemon.name, error_code = %err.code(), "{}", err);
                    return Some(daemon.name.clone());
                }
                DaemonReport::Startup { .. } => {
                    debug!(daemon = %daemon.name, "Ignoring late startup report");
                }
            }
        }

        None
    }
}

/// Executes a daemon program and reports its terminal outcome.
async fn run_daemon(
    name: String,
    program: Arc<dyn DaemonProgram>,
    ctx: DaemonContext,
    status: mpsc::Sender<DaemonReport>,
    state: Arc<AtomicU8>,
    completion: mpsc::UnboundedSender<usize>,
    index: usize,
) {
    state.store(DaemonState::Running as u8, Ordering::Release);
    let outcome = tokio::spawn(async move { program.run(ctx).await }).await;
    state.store(DaemonState::Done as u8, Ordering::Release);

    let report = match outcome {
        Ok(Ok(())) => DaemonReport::finished(),
        Ok(Err(e)) => DaemonReport::failed(e.to_string()),
        Err(e) if e.is_panic() => {
            DaemonReport::failed(format!("Panicked [{}]", describe_panic(e)))
        }
        Err(e) => DaemonReport::failed(format!("Cancelled [{}]", e)),
    };

    match status.try_send(report) {
        Ok(()) => {
            let _ = completion.send(index);
        }
        Err(TrySendError::Full(report)) => {
            // A stale startup report occupies the slot; wake the supervisor to drain it.
            let _ = completion.send(index);
            if status.send(report).await.is_ok() {
                let _ = completion.send(index);
            }
        }
        Err(TrySendError::Closed(_)) => {
            debug!(daemon = %name, "Manager gone, exit report dropped");
        }
    }
}

/// Races the first status report against the startup grace.
async fn await_startup(
    name: String,
    reports: Arc<Mutex<mpsc::Receiver<DaemonReport>>>,
    requeue: mpsc::Sender<DaemonReport>,
    grace: Duration,
    completion: mpsc::UnboundedSender<usize>,
    index: usize,
) {
    let mut rx = reports.lock().await;
    let received = if grace.is_zero() {
        Some(rx.recv().await)
    } else {
        timeout(grace, rx.recv()).await.ok()
    };

    let failure = |note: String| {
        let err = CoreError::StartupFailed {
            daemon: name.clone(),
            note,
        };
        error!(daemon = %name, error_code = %err.code(), "{}", err);
    };

    match received {
        None => failure("Startup grace period expired".to_string()),
        Some(None) => debug!(daemon = %name, "Status channel closed during startup"),
        Some(Some(DaemonReport::Startup { ok: true, .. })) => {
            info!(daemon = %name, "Daemon {}: Up and running", name)
        }
        Some(Some(DaemonReport::Startup { ok: false, note })) => failure(note),
        Some(Some(report @ DaemonReport::Exit { .. })) => {
            failure("Program exited before reporting startup".to_string());
            if requeue.try_send(report).is_err() {
                warn!(daemon = %name, "Could not requeue exit report");
            }
            drop(rx);
            let _ = completion.send(index);
        }
    }
}

/// Waits for a daemon's exit acknowledgement within its shutdown grace.
async fn await_shutdown_ack(
    name: &str,
    reports: &Mutex<mpsc::Receiver<DaemonReport>>,
    grace: Duration,
) -> Result<()> {
    let mut rx = reports.lock().await;
    let deadline = (!grace.is_zero()).then(|| Instant::now() + grace);

    loop {
        let next = match deadline {
            Some(deadline) => match timeout_at(deadline, rx.recv()).await {
                Ok(next) => next,
                Err(_) => {
                    warn!(daemon = %name, "Daemon {}: Shutdown grace period expired", name);
                    return Ok(());
                }
            },
            None => rx.recv().await,
        };

        match next {
            Some(DaemonReport::Startup { .. }) => continue,
            Some(DaemonReport::Exit { ok: true, .. }) => {
                info!(daemon = %name, "Daemon {}: Shutdown successful", name);
                return Ok(());
            }
            Some(DaemonReport::Exit { ok: false, note }) => {
                let err = CoreError::ShutdownAborted {
                    daemon: name.to_string(),
                    note,
                };
                error!(daemon = %name, error_code = %err.code(), "{}", err);
                return Err(err);
            }
            None => {
                warn!(daemon = %name, "Daemon {}: Status channel closed", name);
                return Ok(());
            }
        }
    }
}
