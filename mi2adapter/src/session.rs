/// Debug session core
///
/// `SessionCore` sits between the stdout reader task and the public
/// facade. The reader feeds it every line GDB writes; it routes records to
/// the correlator, the state machine and the models, and emits events.
/// Operations of the facade run here too so both paths share one model.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

use crate::breakpoints::{Breakpoint, BreakpointId, BreakpointRegistry};
use crate::commands;
use crate::communication::{CommandReply, Correlator, LineSink};
use crate::config::AdapterConfig;
use crate::events::{DebugEvent, EventSink, ExitReason, StopInfo};
use crate::parser::parse_line;
use crate::stack::{parse_stack, StackFrame};
use crate::state::{SessionState, Transition};
use crate::types::{AsyncClass, Record, ResultClass, StopReason, StreamRecord, StreamType, Value};
use crate::variables::{
    classify_scope, discoverable_names, parse_variable_list, parse_varobj_children, Scope,
    Variable, VariableStore, WatchSet,
};
use crate::{DebuggerError, Result};

static EXITED_WITH_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"exited with code (\d+)").expect("exit code pattern"));

/// GDB prints exit codes in octal with a leading zero (`"01"`, `"0377"`)
pub fn parse_exit_code(text: &str) -> Option<i32> {
    let text = text.trim();
    if text.len() > 1 && text.starts_with('0') {
        i32::from_str_radix(text, 8).ok()
    } else {
        text.parse().ok()
    }
}

fn exit_code_field(results: &HashMap<String, Value>) -> Option<i32> {
    results
        .get("exit-code")
        .and_then(Value::as_string)
        .and_then(parse_exit_code)
}

/// Outcome of the ready handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Readiness {
    Pending,
    Ready,
    /// GDB's stdout closed first
    Closed,
}

/// Everything the adapter knows about the current session
#[derive(Debug, Default)]
pub(crate) struct Model {
    /// Bumped whenever a session begins or ends
    pub generation: u64,
    pub state: SessionState,
    pub executable: Option<PathBuf>,
    pub source: Option<PathBuf>,
    pub output: String,
    pub breakpoints: BreakpointRegistry,
    pub variables: VariableStore,
    pub call_stack: Vec<StackFrame>,
    pub watches: WatchSet,
    pub live_threads: usize,
    pub stop_seq: u64,
    /// `stop()` is in progress; EOF on stdout is expected
    pub stopping: bool,
}

impl Model {
    /// Reset for a new session and return its generation
    pub fn begin(&mut self, executable: &Path, source: &Path) -> u64 {
        self.clear();
        self.generation += 1;
        self.state = self
            .state
            .next(Transition::Start)
            .unwrap_or(SessionState::Starting);
        self.executable = Some(executable.to_path_buf());
        self.source = Some(source.to_path_buf());
        self.stopping = false;
        self.generation
    }

    /// End the session; returns false if it had already ended
    pub fn terminate(&mut self) -> bool {
        let was_active = self.state.is_active();
        self.generation += 1;
        self.state = SessionState::Terminated;
        self.executable = None;
        self.source = None;
        self.stopping = false;
        self.clear();
        was_active
    }

    fn clear(&mut self) {
        self.output.clear();
        self.breakpoints.clear();
        self.variables.clear();
        self.call_stack.clear();
        self.watches.clear();
        self.live_threads = 0;
    }

    fn append_output(&mut self, line: &str, limit: usize) {
        self.output.push_str(line);
        self.output.push('\n');
        if self.output.len() > limit {
            let mut cut = self.output.len() - limit;
            while !self.output.is_char_boundary(cut) {
                cut += 1;
            }
            self.output.drain(..cut);
        }
    }
}

pub(crate) type SharedModel = Arc<Mutex<Model>>;

pub(crate) fn lock_model(model: &SharedModel) -> MutexGuard<'_, Model> {
    model.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone)]
pub(crate) struct SessionCore {
    generation: u64,
    model: SharedModel,
    correlator: Correlator,
    events: EventSink,
    config: Arc<AdapterConfig>,
    readiness: Arc<watch::Sender<Readiness>>,
}

impl SessionCore {
    pub fn new(
        generation: u64,
        model: SharedModel,
        correlator: Correlator,
        events: EventSink,
        config: Arc<AdapterConfig>,
    ) -> (Self, watch::Receiver<Readiness>) {
        let (readiness, receiver) = watch::channel(Readiness::Pending);
        let core = Self {
            generation,
            model,
            correlator,
            events,
            config,
            readiness: Arc::new(readiness),
        };
        (core, receiver)
    }

    /// The model, unless a newer session has replaced this one
    fn current(&self) -> Option<MutexGuard<'_, Model>> {
        let model = lock_model(&self.model);
        (model.generation == self.generation).then_some(model)
    }

    fn ensure_active(&self) -> Result<()> {
        match self.current() {
            Some(model) if model.state.is_active() => Ok(()),
            _ => Err(DebuggerError::NotRunning),
        }
    }

    pub fn is_active(&self) -> bool {
        self.ensure_active().is_ok()
    }

    fn handle_record(&self, record: Record) {
        if self.try_handshake(&record) {
            return;
        }

        match record {
            Record::Result(result) => {
                if result.class == ResultClass::Running {
                    self.on_resumed();
                }
                self.correlator.complete(&result);
            }
            Record::Exec(record) => match record.class {
                AsyncClass::Running => self.on_resumed(),
                AsyncClass::Stopped => self.on_stopped(&record.results),
                other => log::debug!("Unhandled exec record: {:?}", other),
            },
            Record::Notify(record) => match record.class {
                AsyncClass::BreakpointCreated => self.on_breakpoint_created(&record.results),
                AsyncClass::BreakpointModified => self.on_breakpoint_modified(&record.results),
                AsyncClass::BreakpointDeleted => self.on_breakpoint_deleted(&record.results),
                AsyncClass::ThreadCreated => {
                    if let Some(mut model) = self.current() {
                        model.live_threads += 1;
                    }
                }
                AsyncClass::ThreadExited => self.on_thread_exited(),
                AsyncClass::ThreadGroupExited => {
                    self.on_program_exit(exit_code_field(&record.results), ExitReason::ProcessExit)
                }
                other => log::trace!("Notification: {:?}", other),
            },
            Record::Status(record) => log::trace!("Status: {:?}", record.class),
            Record::Stream(stream) => self.on_stream(stream),
            Record::Prompt => {
                if !self.correlator.is_busy() {
                    log::trace!("GDB is idle");
                }
            }
            Record::Text(text) => match EXITED_WITH_CODE.captures(&text) {
                Some(caps) => {
                    self.on_program_exit(parse_exit_code(&caps[1]), ExitReason::ProgramExit)
                }
                None => log::debug!("Dropping unrecognized output: {}", text),
            },
        }
    }

    /// Complete the ready handshake on the first prompt, banner or stop
    ///
    /// Returns true when the record was consumed by the handshake.
    fn try_handshake(&self, record: &Record) -> bool {
        let marker = match record {
            Record::Prompt => true,
            Record::Stream(stream) => {
                stream.stream_type == StreamType::Console && stream.content.starts_with("GNU gdb")
            }
            Record::Exec(record) => record.class == AsyncClass::Stopped,
            _ => false,
        };
        if !marker {
            return false;
        }

        {
            let Some(mut model) = self.current() else {
                return false;
            };
            if model.state != SessionState::Starting {
                return false;
            }
            model.state = model
                .state
                .next(Transition::Handshake)
                .unwrap_or(SessionState::Ready);
        }

        log::info!("GDB is ready");
        self.readiness.send_replace(Readiness::Ready);
        matches!(record, Record::Exec(_))
    }

    fn on_resumed(&self) {
        let entered = {
            let Some(mut model) = self.current() else {
                return;
            };
            match model.state.next(Transition::Resume) {
                Some(next) => {
                    let entered = model.state != SessionState::Running;
                    model.state = next;
                    entered
                }
                None => {
                    log::debug!("Ignoring resume in state {:?}", model.state);
                    false
                }
            }
        };
        if entered {
            log::debug!("Inferior running");
            self.events.emit(DebugEvent::Running);
        }
    }

    fn on_stopped(&self, results: &HashMap<String, Value>) {
        let info = StopInfo::from_results(results);
        if info.stop_reason().map(StopReason::is_exit).unwrap_or(false) {
            let code = exit_code_field(results).unwrap_or(0);
            self.on_program_exit(Some(code), ExitReason::ProgramExit);
            return;
        }

        let stop_seq = {
            let Some(mut model) = self.current() else {
                return;
            };
            match model.state.next(Transition::Halt) {
                Some(next) => {
                    model.state = next;
                    model.stop_seq += 1;
                    model.stop_seq
                }
                None => {
                    log::debug!("Ignoring stop in state {:?}", model.state);
                    return;
                }
            }
        };

        log::info!(
            "Stopped ({}) in {} at {}:{}",
            info.reason.as_deref().unwrap_or("unknown"),
            info.function.as_deref().unwrap_or("??"),
            info.file.as_deref().unwrap_or("??"),
            info.line.unwrap_or(0)
        );
        self.events.emit(DebugEvent::Stopped(info.clone()));
        if info.is_breakpoint() {
            self.events.emit(DebugEvent::BreakpointHit(info));
        }
        self.schedule_refresh(stop_seq);
    }

    /// Enter `Exited`, or amend its exit code when a later record
    /// reports the real one
    fn on_program_exit(&self, code: Option<i32>, reason: ExitReason) {
        let exit_code = {
            let Some(mut model) = self.current() else {
                return;
            };
            let state = model.state;
            match state {
                SessionState::Exited { code: known } => match code {
                    Some(code) if code != known => {
                        model.state = SessionState::Exited { code };
                        code
                    }
                    _ => return,
                },
                state => {
                    let code = code.unwrap_or(0);
                    match state.next(Transition::ProgramExit(code)) {
                        Some(next) => {
                            model.state = next;
                            code
                        }
                        None => {
                            log::debug!("Ignoring program exit in state {:?}", state);
                            return;
                        }
                    }
                }
            }
        };

        let flushed = self.correlator.flush_queued();
        log::info!(
            "Program exited with code {} ({:?}); {} queued commands discarded",
            exit_code,
            reason,
            flushed
        );
        self.events.emit(DebugEvent::ProgramExited { exit_code, reason });
    }

    fn on_thread_exited(&self) {
        let last = {
            let Some(mut model) = self.current() else {
                return;
            };
            model.live_threads = model.live_threads.saturating_sub(1);
            model.live_threads == 0
        };
        if last {
            self.on_program_exit(None, ExitReason::ThreadExit);
        }
    }

    fn on_breakpoint_created(&self, fields: &HashMap<String, Value>) {
        let created = self
            .current()
            .and_then(|mut model| model.breakpoints.apply_created(fields));
        if let Some(breakpoint) = created {
            log::info!(
                "Breakpoint {} at {}:{}",
                breakpoint.number,
                breakpoint.file,
                breakpoint.line
            );
            self.events.emit(DebugEvent::BreakpointSet(breakpoint));
        }
    }

    fn on_breakpoint_modified(&self, fields: &HashMap<String, Value>) {
        let Some(breakpoint) = Breakpoint::from_fields(fields) else {
            return;
        };
        let changed = self
            .current()
            .map(|mut model| model.breakpoints.apply_modified(fields))
            .unwrap_or(false);
        if changed {
            self.events.emit(DebugEvent::BreakpointSet(breakpoint));
        }
    }

    fn on_breakpoint_deleted(&self, fields: &HashMap<String, Value>) {
        let deleted = self
            .current()
            .and_then(|mut model| model.breakpoints.apply_deleted(fields));
        if let Some(id) = deleted {
            log::info!("Breakpoint {} deleted", id);
            self.events.emit(DebugEvent::BreakpointRemoved(id));
        }
    }

    fn on_stream(&self, stream: StreamRecord) {
        match stream.stream_type {
            StreamType::Console => {
                let exit_code = EXITED_WITH_CODE
                    .captures(&stream.content)
                    .and_then(|caps| parse_exit_code(&caps[1]));
                self.events.emit(DebugEvent::ConsoleOutput(stream.content));
                if let Some(code) = exit_code {
                    self.on_program_exit(Some(code), ExitReason::ProgramExit);
                }
            }
            StreamType::Target => self.events.emit(DebugEvent::TargetOutput(stream.content)),
            StreamType::Log => self.events.emit(DebugEvent::LogOutput(stream.content)),
        }
    }

    fn schedule_refresh(&self, stop_seq: u64) {
        let core = self.clone();
        let delay = self.config.settle_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            core.refresh(stop_seq).await;
        });
    }

    /// Still paused at the stop that scheduled a refresh
    fn still_stopped(&self, stop_seq: u64) -> bool {
        self.current()
            .map(|model| model.state == SessionState::Stopped && model.stop_seq == stop_seq)
            .unwrap_or(false)
    }

    async fn refresh(&self, stop_seq: u64) {
        if !self.still_stopped(stop_seq) {
            log::debug!("Skipping refresh for stop {}", stop_seq);
            return;
        }

        let discovered = self.refresh_frame_variables().await;
        if !self.still_stopped(stop_seq) {
            return;
        }
        self.refresh_watches().await;
        if self.config.auto_watch {
            self.auto_watch(discovered).await;
        }
        if let Some(variables) = self.current().map(|model| model.variables.list()) {
            self.events.emit(DebugEvent::VariablesUpdated(variables));
        }

        if self.still_stopped(stop_seq) {
            self.refresh_call_stack().await;
        }
    }

    /// Replace locals and globals; returns local names worth auto-watching
    async fn refresh_frame_variables(&self) -> Vec<String> {
        let listing = match self.correlator.send(commands::STACK_LIST_VARIABLES_ALL).await {
            Ok(reply) if !reply.timed_out => parse_variable_list(&reply.results),
            Ok(_) => {
                log::warn!("Variable listing timed out, keeping previous values");
                return Vec::new();
            }
            Err(e) => {
                log::warn!("Failed to list variables: {}", e);
                return Vec::new();
            }
        };

        // --all-values omits declared types
        let typed = match self.correlator.send(commands::STACK_LIST_VARIABLES_SIMPLE).await {
            Ok(reply) => parse_variable_list(&reply.results),
            Err(e) => {
                log::debug!("Failed to list variable types: {}", e);
                Vec::new()
            }
        };
        let types: HashMap<&str, &str> = typed
            .iter()
            .filter_map(|record| Some((record.name.as_str(), record.var_type.as_deref()?)))
            .collect();

        let max_children = self.config.max_children;
        let variables: Vec<Variable> = listing
            .iter()
            .map(|record| {
                let var_type = record
                    .var_type
                    .as_deref()
                    .or_else(|| types.get(record.name.as_str()).copied())
                    .unwrap_or_default();
                Variable::new(
                    record.name.clone(),
                    record.value.clone().unwrap_or_default(),
                    var_type,
                    classify_scope(&record.name, var_type),
                    max_children,
                )
            })
            .collect();

        log::debug!("Refreshed {} frame variables", variables.len());
        if let Some(mut model) = self.current() {
            model.variables.replace_frame_variables(variables);
        }
        discoverable_names(&typed)
    }

    /// Evaluate one watch; `None` when it does not resolve here
    async fn evaluate_watch(&self, name: &str) -> Option<Variable> {
        match self.correlator.send(&commands::evaluate_expression(name)).await {
            Ok(reply) => {
                let value = reply.field("value")?;
                let var_type = self
                    .current()
                    .and_then(|model| {
                        model
                            .variables
                            .lookup(Scope::Local, name)
                            .map(|local| local.var_type.clone())
                    })
                    .unwrap_or_default();
                Some(Variable::new(
                    name,
                    value,
                    var_type,
                    Scope::Watch,
                    self.config.max_children,
                ))
            }
            Err(e) => {
                log::debug!("Watch {} did not resolve: {}", name, e);
                None
            }
        }
    }

    async fn refresh_watches(&self) {
        let names = self
            .current()
            .map(|model| model.watches.names())
            .unwrap_or_default();

        for name in names {
            let variable = self.evaluate_watch(&name).await;
            let Some(mut model) = self.current() else {
                return;
            };
            match variable {
                Some(variable) => {
                    model.variables.upsert(variable);
                }
                None => {
                    model.variables.remove(Scope::Watch, &name);
                }
            }
        }
    }

    async fn auto_watch(&self, discovered: Vec<String>) {
        let mut candidates = self.config.auto_watch_names.clone();
        for name in discovered {
            if !candidates.contains(&name) {
                candidates.push(name);
            }
        }

        for name in candidates {
            let watched = self
                .current()
                .map(|model| model.watches.contains(&name))
                .unwrap_or(true);
            if watched {
                continue;
            }
            if let Some(variable) = self.evaluate_watch(&name).await {
                if let Some(mut model) = self.current() {
                    model.watches.insert(&name);
                    model.variables.upsert(variable);
                }
            }
        }
    }

    async fn refresh_call_stack(&self) {
        match self.correlator.send(commands::STACK_LIST_FRAMES).await {
            Ok(reply) if !reply.timed_out => {
                let stack = parse_stack(&reply.results);
                if let Some(mut model) = self.current() {
                    model.call_stack = stack.clone();
                }
                self.events.emit(DebugEvent::CallstackUpdated(stack));
            }
            Ok(_) => log::warn!("Call stack listing timed out, keeping previous frames"),
            Err(e) => log::warn!("Failed to list stack frames: {}", e),
        }
    }

    /// Send a command on behalf of the facade
    pub async fn execute(&self, command: &str) -> Result<CommandReply> {
        self.ensure_active()?;
        self.correlator.send(command).await
    }

    /// Initialisation commands; failures are logged and skipped
    pub async fn initialize(&self, source: &Path) {
        let mut init: Vec<String> = commands::INIT_SETTINGS
            .iter()
            .map(|command| command.to_string())
            .collect();
        if let Some(dir) = source.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            init.push(commands::environment_directory(dir));
        }

        for command in init {
            if let Err(e) = self.correlator.send(&command).await {
                log::warn!("Initialization command {} failed: {}", command, e);
            }
        }
    }

    /// Insert by base name first, then by the path as given
    pub async fn set_breakpoint(&self, file: &str, line: u32) -> Result<Option<Breakpoint>> {
        self.ensure_active()?;

        let base = Path::new(file)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.to_string());
        let mut locations = vec![base];
        if locations[0] != file {
            locations.push(file.to_string());
        }

        let mut last_error = String::new();
        for location in &locations {
            match self.correlator.send(&commands::break_insert(location, line)).await {
                Ok(reply) => {
                    if reply.timed_out {
                        return Ok(None);
                    }
                    // MI-issued inserts are not echoed as notifications
                    let created = self
                        .current()
                        .and_then(|mut model| model.breakpoints.apply_created(&reply.results));
                    if let Some(breakpoint) = created {
                        self.events.emit(DebugEvent::BreakpointSet(breakpoint));
                    }
                    return Ok(Breakpoint::from_fields(&reply.results));
                }
                Err(DebuggerError::Command(message)) => {
                    log::debug!("Breakpoint at {}:{} rejected: {}", location, line, message);
                    last_error = message;
                }
                Err(e) => return Err(e),
            }
        }

        Err(DebuggerError::BreakpointInsertFailed {
            location: format!("{}:{}", file, line),
            message: last_error,
        })
    }

    pub async fn remove_breakpoint(&self, id: BreakpointId) -> Result<()> {
        let reply = self.execute(&commands::break_delete(id)).await?;
        // MI-issued deletes are not echoed as notifications
        if !reply.timed_out {
            let removed = self
                .current()
                .map(|mut model| model.breakpoints.remove(id))
                .unwrap_or(false);
            if removed {
                self.events.emit(DebugEvent::BreakpointRemoved(id));
            }
        }
        Ok(())
    }

    pub async fn evaluate_expression(&self, expression: &str) -> Result<String> {
        let reply = self
            .execute(&commands::evaluate_expression(expression))
            .await?;
        Ok(reply.field("value").unwrap_or_default().to_string())
    }

    /// Watch `name`; `Ok(false)` when it does not resolve in the current frame
    pub async fn add_watch_variable(&self, name: &str) -> Result<bool> {
        self.ensure_active()?;
        let inserted = self
            .current()
            .map(|mut model| model.watches.insert(name))
            .unwrap_or(false);

        match self.evaluate_watch(name).await {
            Some(variable) => {
                let variables = {
                    let mut model = self.current().ok_or(DebuggerError::NotRunning)?;
                    model.variables.upsert(variable);
                    model.variables.list()
                };
                self.events.emit(DebugEvent::VariablesUpdated(variables));
                Ok(true)
            }
            None => {
                if let Some(mut model) = self.current() {
                    if inserted {
                        model.watches.remove(name);
                    }
                    model.variables.remove(Scope::Watch, name);
                }
                Ok(false)
            }
        }
    }

    pub fn remove_watch_variable(&self, name: &str) -> Result<bool> {
        let removed = {
            let mut model = self.current().ok_or(DebuggerError::NotRunning)?;
            let unwatched = model.watches.remove(name);
            let uncached = model.variables.remove(Scope::Watch, name).is_some();
            unwatched || uncached
        };
        if removed {
            self.events.emit(DebugEvent::VariableRemoved(name.to_string()));
        }
        Ok(removed)
    }

    /// Mark a variable expanded, fetching variable-object children the
    /// first time a complex value is expanded
    pub async fn expand_variable(&self, name: &str) -> Result<Variable> {
        let fetch = {
            let mut model = self.current().ok_or(DebuggerError::NotRunning)?;
            let id = model
                .variables
                .find(name)
                .ok_or_else(|| DebuggerError::UnknownVariable(name.to_string()))?;
            let complex = model
                .variables
                .get(id)
                .map(Variable::is_complex)
                .unwrap_or(false);
            if complex {
                let (varobj, fresh) = model.variables.varobj_for(name);
                fresh.then_some(varobj)
            } else {
                None
            }
        };

        let children = match fetch {
            Some(varobj) => self.fetch_children(name, &varobj).await,
            None => None,
        };

        let expanded = {
            let mut model = self.current().ok_or(DebuggerError::NotRunning)?;
            let id = model
                .variables
                .find(name)
                .ok_or_else(|| DebuggerError::UnknownVariable(name.to_string()))?;
            let variable = model
                .variables
                .get_mut(id)
                .ok_or_else(|| DebuggerError::UnknownVariable(name.to_string()))?;
            variable.expanded = true;
            if let Some(children) = children.filter(|children| !children.is_empty()) {
                variable.children = Some(children);
            }
            variable.clone()
        };

        self.events.emit(DebugEvent::VariableExpanded(expanded.clone()));
        Ok(expanded)
    }

    async fn fetch_children(&self, expression: &str, varobj: &str) -> Option<Vec<Variable>> {
        if let Err(e) = self
            .correlator
            .send(&commands::var_create(varobj, expression))
            .await
        {
            log::warn!("Failed to create variable object for {}: {}", expression, e);
            if let Some(mut model) = self.current() {
                model.variables.forget_varobj(expression);
            }
            return None;
        }

        match self
            .correlator
            .send(&commands::var_list_children(varobj))
            .await
        {
            Ok(reply) => Some(parse_varobj_children(&reply.results)),
            Err(e) => {
                log::warn!("Failed to list children of {}: {}", expression, e);
                None
            }
        }
    }

    pub fn collapse_variable(&self, name: &str) -> Result<Variable> {
        let collapsed = {
            let mut model = self.current().ok_or(DebuggerError::NotRunning)?;
            let id = model
                .variables
                .find(name)
                .ok_or_else(|| DebuggerError::UnknownVariable(name.to_string()))?;
            let variable = model
                .variables
                .get_mut(id)
                .ok_or_else(|| DebuggerError::UnknownVariable(name.to_string()))?;
            variable.expanded = false;
            variable.clone()
        };
        self.events.emit(DebugEvent::VariableCollapsed(collapsed.clone()));
        Ok(collapsed)
    }

    /// Forward text to the inferior through GDB's stdin
    pub fn send_input(&self, text: &str) -> Result<()> {
        self.ensure_active()?;
        self.correlator.write_raw(text)
    }

    /// Ask GDB to exit and fail outstanding commands
    pub fn begin_shutdown(&self) {
        if let Some(mut model) = self.current() {
            model.stopping = true;
        }
        let flushed = self.correlator.flush_queued();
        if flushed > 0 {
            log::debug!("Discarded {} queued commands", flushed);
        }
        if let Err(e) = self.correlator.write_raw(commands::GDB_EXIT) {
            log::debug!("Could not send {}: {}", commands::GDB_EXIT, e);
        }
        self.correlator.close();
    }

    /// Clear all session state; returns false if it was already gone
    pub fn finish_shutdown(&self) -> bool {
        self.current()
            .map(|mut model| model.terminate())
            .unwrap_or(false)
    }
}

impl LineSink for SessionCore {
    fn line(&mut self, line: &str) {
        if let Some(mut model) = self.current() {
            model.append_output(line, self.config.output_buffer_limit);
        }
        match parse_line(line) {
            Ok(record) => self.handle_record(record),
            Err(e) => log::warn!("Skipping unparsable GDB output {:?}: {}", line, e),
        }
    }

    fn closed(&mut self) {
        self.readiness.send_replace(Readiness::Closed);
        self.correlator.close();

        {
            let Some(mut model) = self.current() else {
                return;
            };
            if model.stopping {
                return;
            }
            model.terminate();
        }

        log::error!("GDB exited unexpectedly");
        self.events
            .emit(DebugEvent::Error("GDB exited unexpectedly".to_string()));
        self.events.emit(DebugEvent::Exited { code: None });
    }
}
