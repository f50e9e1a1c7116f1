/// Events the adapter emits to its frontend
///
/// A closed set of variants delivered in order through an unbounded
/// channel. Record-driven events keep the order GDB produced the records in.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::mpsc;

use crate::breakpoints::{Breakpoint, BreakpointId};
use crate::stack::StackFrame;
use crate::types::{StopReason, Value};
use crate::variables::Variable;

/// Where the inferior stopped
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopInfo {
    /// Raw reason string as GDB reported it
    pub reason: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub function: Option<String>,
    pub breakpoint: Option<BreakpointId>,
    pub signal_name: Option<String>,
}

impl StopInfo {
    /// Extract stop details from a `*stopped` record
    ///
    /// Location fields are read from the top level first and from the
    /// nested `frame={...}` tuple otherwise.
    pub fn from_results(results: &HashMap<String, Value>) -> Self {
        let frame = results.get("frame").and_then(Value::as_tuple);
        let field = |key: &str| {
            results
                .get(key)
                .and_then(Value::as_string)
                .or_else(|| frame?.get(key)?.as_string())
                .map(str::to_string)
        };

        StopInfo {
            reason: field("reason"),
            file: field("file"),
            line: field("line").and_then(|line| line.parse().ok()),
            function: field("func"),
            breakpoint: field("bkptno").and_then(|number| number.parse().ok()),
            signal_name: field("signal-name"),
        }
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.reason.as_deref()?.parse().ok()
    }

    pub fn is_breakpoint(&self) -> bool {
        self.reason
            .as_deref()
            .map(|reason| reason.contains("breakpoint"))
            .unwrap_or(false)
    }
}

/// Which record announced the end of the inferior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExitReason {
    ThreadExit,
    ProcessExit,
    ProgramExit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum DebugEvent {
    Started {
        executable: PathBuf,
        source: PathBuf,
    },
    /// GDB itself has gone away
    Exited {
        code: Option<i32>,
    },
    Error(String),
    Stopped(StopInfo),
    Running,
    BreakpointHit(StopInfo),
    BreakpointSet(Breakpoint),
    BreakpointRemoved(BreakpointId),
    VariablesUpdated(Vec<Variable>),
    VariableExpanded(Variable),
    VariableCollapsed(Variable),
    VariableRemoved(String),
    CallstackUpdated(Vec<StackFrame>),
    ConsoleOutput(String),
    TargetOutput(String),
    LogOutput(String),
    ProgramExited {
        exit_code: i32,
        reason: ExitReason,
    },
}

/// Sending half of the event channel
#[derive(Debug, Clone)]
pub struct EventSink {
    sender: mpsc::UnboundedSender<DebugEvent>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DebugEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Emit an event; a frontend that stopped listening is not an error
    pub fn emit(&self, event: DebugEvent) {
        log::trace!("EVENT: {:?}", event);
        if self.sender.send(event).is_err() {
            log::trace!("Event receiver dropped");
        }
    }
}
