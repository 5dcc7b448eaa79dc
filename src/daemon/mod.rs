//! Daemon lifecycle supervision.
//!
//! A [`Daemon`] is a named long-lived task with a monotonic lifecycle state
//! and a pair of typed channels: [`DaemonCommand`]s flow from the manager to
//! the program, [`DaemonReport`]s flow back. The [`DaemonManager`] starts
//! every daemon concurrently, supervises them until a signal or a fatal
//! error, and then shuts them down in reverse registration order.

mod manager;
mod signal;


pub use manager::{DaemonManager, SupervisorExit};
pub use signal::shutdown_signal;

use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::Result;

/// Lifecycle state of a daemon. Transitions only `Init -> Running -> Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DaemonState {
    /// Registered, program not yet invoked.
    Init = 0,
    /// Program is executing.
    Running = 1,
    /// Program returned or panicked.
    Done = 2,
}

impl DaemonState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => DaemonState::Init,
            1 => DaemonState::Running,
            _ => DaemonState::Done,
        }
    }
}

impl fmt::Display for DaemonState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DaemonState::Init => write!(f, "init"),
            DaemonState::Running => write!(f, "running"),
            DaemonState::Done => write!(f, "done"),
        }
    }
}

/// Command sent from the manager to a daemon program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonCommand {
    /// Stop serving and return from the program.
    Shutdown,
}

/// Status message sent from a daemon to the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonReport {
    /// Result of the startup handshake, sent by the program itself.
    Startup { ok: bool, note: String },
    /// Terminal outcome, sent once by the runner when the program ends.
    Exit { ok: bool, note: String },
}

impl DaemonReport {
    /// Successful startup.
    pub fn started(note: impl Into<String>) -> Self {
        DaemonReport::Startup {
            ok: true,
            note: note.into(),
        }
    }

    /// Failed startup.
    pub fn startup_failed(note: impl Into<String>) -> Self {
        DaemonReport::Startup {
            ok: false,
            note: note.into(),
        }
    }

    /// Clean exit.
    pub fn finished() -> Self {
        DaemonReport::Exit {
            ok: true,
            note: String::new(),
        }
    }

    /// Exit with an error.
    pub fn failed(note: impl Into<String>) -> Self {
        DaemonReport::Exit {
            ok: false,
            note: note.into(),
        }
    }
}

/// The program's side of a daemon's channels.
pub struct DaemonContext {
    name: String,
    commands: mpsc::Receiver<DaemonCommand>,
    status: mpsc::Sender<DaemonReport>,
}

impl DaemonContext {
    pub(crate) fn new(
        name: impl Into<String>,
        commands: mpsc::Receiver<DaemonCommand>,
        status: mpsc::Sender<DaemonReport>,
    ) -> Self {
        Self {
            name: name.into(),
            commands,
            status,
        }
    }

    /// Name of the daemon running this program.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sends a report to the manager. Returns false once the manager is gone.
    pub async fn report(&self, report: DaemonReport) -> bool {
        self.status.send(report).await.is_ok()
    }

    /// Waits for the next command. `None` means the manager dropped the channel.
    pub async fn next_command(&mut self) -> Option<DaemonCommand> {
        self.commands.recv().await
    }
}

/// A daemon's body of work.
///
/// Implementations report startup through [`DaemonContext::report`], then
/// run until they receive [`DaemonCommand::Shutdown`] or fail. The returned
/// value becomes the daemon's exit report.
#[async_trait]
pub trait DaemonProgram: Send + Sync {
    /// Runs the program to completion.
    async fn run(&self, ctx: DaemonContext) -> Result<()>;
}

/// Adapts an async closure into a [`DaemonProgram`].
pub struct FnProgram<F>(F);

#[async_trait]
impl<F, Fut> DaemonProgram for FnProgram<F>
where
    F: Fn(DaemonContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn run(&self, ctx: DaemonContext) -> Result<()> {
        (self.0)(ctx).await
    }
}

/// Wraps an async closure as a shareable program.
pub fn program_fn<F, Fut>(f: F) -> Arc<dyn DaemonProgram>
where
    F: Fn(DaemonContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnProgram(f))
}

/// A named unit of supervised work.
pub struct Daemon {
    name: String,
    program: Option<Arc<dyn DaemonProgram>>,
    startup_grace: Duration,
    shutdown_grace: Duration,
    state: Arc<AtomicU8>,
    link: Option<manager::DaemonLink>,
}

impl Daemon {
    /// Registers a daemon. A `None` program is skipped at startup.
    pub fn new(name: impl Into<String>, program: Option<Arc<dyn DaemonProgram>>) -> Self {
        Self {
            name: name.into(),
            program,
            startup_grace: Duration::ZERO,
            shutdown_grace: Duration::ZERO,
            state: Arc::new(AtomicU8::new(DaemonState::Init as u8)),
            link: None,
        }
    }

    /// Sets the startup handshake grace; zero waits indefinitely.
    pub fn with_startup_grace(mut self, grace: Duration) -> Self {
        self.startup_grace = grace;
        self
    }

    /// Sets the shutdown acknowledgement grace; zero waits indefinitely.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Daemon name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state. May be stale when read from another task.
    pub fn state(&self) -> DaemonState {
        DaemonState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether the daemon has a program to run.
    pub fn has_program(&self) -> bool {
        self.program.is_some()
    }
}

impl fmt::Debug for Daemon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Daemon")
            .field("name", &self.name)
            .field("has_program", &self.program.is_some())
            .field("startup_grace", &self.startup_grace)
            .field("shutdown_grace", &self.shutdown_grace)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daemon_new_defaults() {
        let daemon = Daemon::new("alpha", None);
        assert_eq!(daemon.name(), "alpha");
        assert_eq!(daemon.state(), DaemonState::Init);
        assert!(!daemon.has_program());
    }

    #[test]
    fn test_daemon_builders() {
        let daemon = Daemon::new("beta", Some(program_fn(|_ctx| async { Ok(()) })))
            .with_startup_grace(Duration::from_millis(250))
            .with_shutdown_grace(Duration::from_secs(2));

        assert!(daemon.has_program());
        assert_eq!(daemon.startup_grace, Duration::from_millis(250));
        assert_eq!(daemon.shutdown_grace, Duration::from_secs(2));
    }

    #[test]
    fn test_report_helpers() {
        assert_eq!(
            DaemonReport::started("OK"),
            DaemonReport::Startup {
                ok: true,
                note: "OK".to_string()
            }
        );
        assert!(matches!(
            DaemonReport::failed("boom"),
            DaemonReport::Exit { ok: false, .. }
        ));
        assert!(matches!(
            DaemonReport::finished(),
            DaemonReport::Exit { ok: true, .. }
        ));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(DaemonState::Running.to_string(), "running");
        assert_eq!(DaemonState::from_u8(2), DaemonState::Done);
    }

    #[tokio::test]
    async fn test_context_round_trip() {
        let (command_tx, command_rx) = mpsc::channel(1);
        let (status_tx, mut status_rx) = mpsc::channel(1);
        let mut ctx = DaemonContext::new("gamma", command_rx, status_tx);

        assert_eq!(ctx.name(), "gamma");
        assert!(ctx.report(DaemonReport::started("up")).await);
        assert_eq!(status_rx.recv().await, Some(DaemonReport::started("up")));

        command_tx.send(DaemonCommand::Shutdown).await.unwrap();
        assert_eq!(ctx.next_command().await, Some(DaemonCommand::Shutdown));

        drop(command_tx);
        assert_eq!(ctx.next_command().await, None);
    }
}
