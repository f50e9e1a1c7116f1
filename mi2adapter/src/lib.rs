/// GDB/MI2 debugger adapter
///
/// Supervises a `gdb --interpreter=mi2` subprocess, serialises commands
/// against its output stream and keeps a structured model of the session
/// (breakpoints, stop location, call stack, variables) that a frontend
/// reads through snapshots and [`DebugEvent`]s.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

pub mod breakpoints;
pub mod commands;
pub mod communication;
pub mod config;
pub mod demux;
pub mod events;
pub mod parser;
pub mod process;
mod session;
pub mod stack;
pub mod state;
pub mod types;
pub mod variables;

pub use breakpoints::{Breakpoint, BreakpointId};
pub use communication::CommandReply;
pub use config::AdapterConfig;
pub use events::{DebugEvent, EventSink, ExitReason, StopInfo};
pub use parser::ParseError;
pub use stack::StackFrame;
pub use state::SessionState;
pub use variables::{Scope, Variable};

use communication::Correlator;
use process::GdbProcess;
use session::{lock_model, Model, Readiness, SessionCore, SharedModel};

#[derive(Error, Debug)]
pub enum DebuggerError {
    #[error("Debugger unavailable: {0}")]
    ToolUnavailable(String),
    #[error("A debug session is already running")]
    AlreadyRunning,
    #[error("Executable not found: {}", .0.display())]
    ExecutableNotFound(PathBuf),
    #[error("Failed to start GDB process: {0}")]
    SpawnFailed(#[source] std::io::Error),
    #[error("GDB did not become ready in time")]
    InitTimeout,
    #[error("No debug session is running")]
    NotRunning,
    #[error("GDB command failed: {0}")]
    Command(String),
    #[error("Command discarded before GDB answered")]
    CommandDiscarded,
    #[error("Failed to set breakpoint at {location}: {message}")]
    BreakpointInsertFailed { location: String, message: String },
    #[error("Unknown variable: {0}")]
    UnknownVariable(String),
    #[error("Communication error: {0}")]
    Communication(String),
    #[error("Invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, DebuggerError>;

struct ActiveSession {
    core: SessionCore,
    process: Option<GdbProcess>,
    reader: JoinHandle<()>,
    tasks: Vec<JoinHandle<()>>,
}

/// Main GDB adapter that manages the GDB process and communication
pub struct GdbAdapter {
    config: Arc<AdapterConfig>,
    model: SharedModel,
    session: Mutex<Option<ActiveSession>>,
    events: EventSink,
    event_receiver: Arc<AsyncMutex<mpsc::UnboundedReceiver<DebugEvent>>>,
}

impl GdbAdapter {
    pub fn new(config: AdapterConfig) -> Self {
        let (events, event_receiver) = EventSink::channel();

        GdbAdapter {
            config: Arc::new(config),
            model: Arc::new(Mutex::new(Model::default())),
            session: Mutex::new(None),
            events,
            event_receiver: Arc::new(AsyncMutex::new(event_receiver)),
        }
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<ActiveSession>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn core(&self) -> Result<SessionCore> {
        self.lock_session()
            .as_ref()
            .map(|session| session.core.clone())
            .ok_or(DebuggerError::NotRunning)
    }

    /// Check that GDB is installed; returns its version line
    pub async fn probe(&self) -> Result<String> {
        process::probe(&self.config).await
    }

    /// Spawn GDB for `executable` and initialise a session
    pub async fn start(
        &self,
        executable: impl AsRef<Path>,
        source: impl AsRef<Path>,
    ) -> Result<()> {
        let executable = executable.as_ref();
        let source = source.as_ref();
        self.reap_dead_session().await;

        if self.lock_session().is_some() {
            return Err(DebuggerError::AlreadyRunning);
        }
        if !executable.is_file() {
            return Err(DebuggerError::ExecutableNotFound(executable.to_path_buf()));
        }
        process::probe(&self.config).await?;

        let (core, readiness) = {
            let mut session = self.lock_session();
            // another start may have won while probing
            if session.is_some() {
                return Err(DebuggerError::AlreadyRunning);
            }

            let mut process = GdbProcess::spawn(&self.config, executable)?;
            let (stdin, stdout, stderr) = process.take_pipes()?;
            let stderr_task = process::forward_stderr(stderr, self.events.clone());

            let (active, core, readiness) = self.launch(stdout, stdin, executable, source);
            let mut active = ActiveSession {
                process: Some(process),
                ..active
            };
            active.tasks.push(stderr_task);
            *session = Some(active);
            (core, readiness)
        };

        self.handshake(core, readiness, executable, source).await
    }

    /// Run a session over already-connected GDB/MI streams
    pub async fn attach<R, W>(
        &self,
        reader: R,
        writer: W,
        executable: impl AsRef<Path>,
        source: impl AsRef<Path>,
    ) -> Result<()>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let executable = executable.as_ref();
        let source = source.as_ref();
        self.reap_dead_session().await;

        let (core, readiness) = {
            let mut session = self.lock_session();
            if session.is_some() {
                return Err(DebuggerError::AlreadyRunning);
            }
            let (active, core, readiness) = self.launch(reader, writer, executable, source);
            *session = Some(active);
            (core, readiness)
        };

        self.handshake(core, readiness, executable, source).await
    }

    fn launch<R, W>(
        &self,
        reader: R,
        writer: W,
        executable: &Path,
        source: &Path,
    ) -> (ActiveSession, SessionCore, watch::Receiver<Readiness>)
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let generation = lock_model(&self.model).begin(executable, source);
        let (writer_tx, writer_task) = communication::spawn_writer(writer);
        let correlator = Correlator::new(writer_tx, self.config.command_timeout);
        let (core, readiness) = SessionCore::new(
            generation,
            self.model.clone(),
            correlator,
            self.events.clone(),
            self.config.clone(),
        );
        let reader_task = communication::spawn_reader(reader, core.clone());

        let active = ActiveSession {
            core: core.clone(),
            process: None,
            reader: reader_task,
            tasks: vec![writer_task],
        };
        (active, core, readiness)
    }

    async fn handshake(
        &self,
        core: SessionCore,
        mut readiness: watch::Receiver<Readiness>,
        executable: &Path,
        source: &Path,
    ) -> Result<()> {
        let failure = match tokio::time::timeout(
            self.config.init_timeout,
            readiness.wait_for(|state| *state != Readiness::Pending),
        )
        .await
        {
            Ok(Ok(state)) if *state == Readiness::Ready => None,
            Ok(_) => Some(DebuggerError::Communication(
                "GDB exited before it was ready".into(),
            )),
            Err(_) => Some(DebuggerError::InitTimeout),
        };

        if let Some(error) = failure {
            log::error!("GDB startup failed: {}", error);
            let session = self.lock_session().take();
            if let Some(session) = session {
                self.teardown(session).await;
            }
            return Err(error);
        }

        core.initialize(source).await;
        log::info!("Debug session started for {}", executable.display());
        self.events.emit(DebugEvent::Started {
            executable: executable.to_path_buf(),
            source: source.to_path_buf(),
        });
        Ok(())
    }

    /// End the session; a no-op when none is active
    pub async fn stop(&self) -> Result<()> {
        let session = self.lock_session().take();
        let Some(session) = session else {
            return Ok(());
        };

        let (was_active, code) = self.teardown(session).await;
        if was_active {
            log::info!("Debug session stopped");
            self.events.emit(DebugEvent::Exited { code });
        }
        Ok(())
    }

    /// Graceful exit, forced kill after the grace period, then clear state
    async fn teardown(&self, mut session: ActiveSession) -> (bool, Option<i32>) {
        let grace = self.config.shutdown_timeout;
        session.core.begin_shutdown();

        let code = match session.process.take() {
            Some(process) => process.shutdown(grace).await,
            None => None,
        };
        if tokio::time::timeout(grace, &mut session.reader).await.is_err() {
            log::debug!("GDB stdout still open after {:?}, closing it", grace);
        }
        session.reader.abort();
        for task in session.tasks {
            task.abort();
        }

        (session.core.finish_shutdown(), code)
    }

    /// Clean up after a GDB that died on its own
    async fn reap_dead_session(&self) {
        let dead = {
            let mut session = self.lock_session();
            let is_dead = session
                .as_ref()
                .map(|active| !active.core.is_active())
                .unwrap_or(false);
            if is_dead {
                session.take()
            } else {
                None
            }
        };
        if let Some(session) = dead {
            log::debug!("Cleaning up terminated session");
            self.teardown(session).await;
        }
    }

    pub async fn run(&self) -> Result<()> {
        self.core()?.execute(commands::EXEC_RUN).await.map(|_| ())
    }

    pub async fn continue_execution(&self) -> Result<()> {
        self.core()?.execute(commands::EXEC_CONTINUE).await.map(|_| ())
    }

    /// Next source line, stepping over calls
    pub async fn step_over(&self) -> Result<()> {
        self.core()?.execute(commands::EXEC_NEXT).await.map(|_| ())
    }

    pub async fn step_into(&self) -> Result<()> {
        self.core()?.execute(commands::EXEC_STEP).await.map(|_| ())
    }

    /// Run until the current function returns
    pub async fn step_out(&self) -> Result<()> {
        self.core()?.execute(commands::EXEC_FINISH).await.map(|_| ())
    }

    pub async fn interrupt(&self) -> Result<()> {
        self.core()?.execute(commands::EXEC_INTERRUPT).await.map(|_| ())
    }

    /// Insert a breakpoint, trying the base name before the full path
    pub async fn set_breakpoint(
        &self,
        file: impl AsRef<Path>,
        line: u32,
    ) -> Result<Option<Breakpoint>> {
        let file = file.as_ref().to_string_lossy().into_owned();
        self.core()?.set_breakpoint(&file, line).await
    }

    pub async fn remove_breakpoint(&self, id: BreakpointId) -> Result<()> {
        self.core()?.remove_breakpoint(id).await
    }

    /// Returns false when `name` does not resolve and was not kept
    pub async fn add_watch_variable(&self, name: &str) -> Result<bool> {
        self.core()?.add_watch_variable(name).await
    }

    pub fn remove_watch_variable(&self, name: &str) -> Result<bool> {
        self.core()?.remove_watch_variable(name)
    }

    pub async fn expand_variable(&self, name: &str) -> Result<Variable> {
        self.core()?.expand_variable(name).await
    }

    pub fn collapse_variable(&self, name: &str) -> Result<Variable> {
        self.core()?.collapse_variable(name)
    }

    pub async fn evaluate_expression(&self, expression: &str) -> Result<String> {
        self.core()?.evaluate_expression(expression).await
    }

    /// Forward a line of text to the debuggee's stdin
    pub fn send_input(&self, text: &str) -> Result<()> {
        self.core()?.send_input(text)
    }

    pub fn state(&self) -> SessionState {
        lock_model(&self.model).state
    }

    pub fn is_running(&self) -> bool {
        self.state().is_active()
    }

    pub fn executable(&self) -> Option<PathBuf> {
        lock_model(&self.model).executable.clone()
    }

    pub fn breakpoints(&self) -> Vec<Breakpoint> {
        lock_model(&self.model).breakpoints.list()
    }

    pub fn variables(&self) -> Vec<Variable> {
        lock_model(&self.model).variables.list()
    }

    pub fn call_stack(&self) -> Vec<StackFrame> {
        lock_model(&self.model).call_stack.clone()
    }

    pub fn watches(&self) -> Vec<String> {
        lock_model(&self.model).watches.names()
    }

    /// Raw GDB output of this session, most recent last
    pub fn output_buffer(&self) -> String {
        lock_model(&self.model).output.clone()
    }

    /// Get the next event (non-blocking)
    pub fn try_recv_event(&self) -> Option<DebugEvent> {
        self.event_receiver.try_lock().ok()?.try_recv().ok()
    }

    /// Wait for the next event
    pub async fn next_event(&self) -> Option<DebugEvent> {
        self.event_receiver.lock().await.recv().await
    }

    /// Shared handle to the event receiver
    pub fn get_event_receiver(&self) -> Arc<AsyncMutex<mpsc::UnboundedReceiver<DebugEvent>>> {
        self.event_receiver.clone()
    }
}

impl Default for GdbAdapter {
    fn default() -> Self {
        Self::new(AdapterConfig::default())
    }
}

impl Drop for GdbAdapter {
    fn drop(&mut self) {
        let session = self
            .session
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(session) = session {
            session.core.begin_shutdown();
            session.reader.abort();
            for task in session.tasks {
                task.abort();
            }
        }
    }
}
