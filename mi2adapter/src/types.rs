/// GDB/MI2 record types
///
/// Every line GDB writes in machine-interface mode is classified into one
/// of these records by the parser.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// One classified line of MI2 output
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    /// `^class,...` terminating result of a command
    Result(ResultRecord),
    /// `*class,...` execution state change
    Exec(AsyncRecord),
    /// `=class,...` notification
    Notify(AsyncRecord),
    /// `+class,...` progress status
    Status(AsyncRecord),
    /// `~`, `@` or `&` stream output
    Stream(StreamRecord),
    /// `(gdb)` ready-for-next-command prompt
    Prompt,
    /// A line without any MI sigil (usually inferior output)
    Text(String),
}

/// A GDB/MI result record
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRecord {
    pub token: Option<u64>,
    pub class: ResultClass,
    pub results: HashMap<String, Value>,
}

impl ResultRecord {
    /// String field lookup at the top level of the record
    pub fn field(&self, key: &str) -> Option<&str> {
        self.results.get(key).and_then(Value::as_string)
    }

    /// The `msg` field of an `^error` record
    pub fn message(&self) -> String {
        self.field("msg").unwrap_or("Unknown error").to_string()
    }
}

/// GDB/MI result classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultClass {
    Done,
    Running,
    Connected,
    Error,
    Exit,
}

impl ResultClass {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "done" => Some(ResultClass::Done),
            "running" => Some(ResultClass::Running),
            "connected" => Some(ResultClass::Connected),
            "error" => Some(ResultClass::Error),
            "exit" => Some(ResultClass::Exit),
            _ => None,
        }
    }
}

/// An exec, notify or status async record
#[derive(Debug, Clone, PartialEq)]
pub struct AsyncRecord {
    pub token: Option<u64>,
    pub class: AsyncClass,
    pub results: HashMap<String, Value>,
}

impl AsyncRecord {
    pub fn field(&self, key: &str) -> Option<&str> {
        self.results.get(key).and_then(Value::as_string)
    }
}

/// GDB/MI async classes the adapter distinguishes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsyncClass {
    Running,
    Stopped,
    ThreadGroupAdded,
    ThreadGroupStarted,
    ThreadGroupExited,
    ThreadCreated,
    ThreadExited,
    ThreadSelected,
    LibraryLoaded,
    LibraryUnloaded,
    BreakpointCreated,
    BreakpointModified,
    BreakpointDeleted,
    CmdParamChanged,
    MemoryChanged,
    /// Any class this adapter does not interpret
    Other(String),
}

impl AsyncClass {
    pub fn from_name(name: &str) -> Self {
        match name {
            "running" => AsyncClass::Running,
            "stopped" => AsyncClass::Stopped,
            "thread-group-added" => AsyncClass::ThreadGroupAdded,
            "thread-group-started" => AsyncClass::ThreadGroupStarted,
            "thread-group-exited" => AsyncClass::ThreadGroupExited,
            "thread-created" => AsyncClass::ThreadCreated,
            "thread-exited" => AsyncClass::ThreadExited,
            "thread-selected" => AsyncClass::ThreadSelected,
            "library-loaded" => AsyncClass::LibraryLoaded,
            "library-unloaded" => AsyncClass::LibraryUnloaded,
            "breakpoint-created" => AsyncClass::BreakpointCreated,
            "breakpoint-modified" => AsyncClass::BreakpointModified,
            "breakpoint-deleted" => AsyncClass::BreakpointDeleted,
            "cmd-param-changed" => AsyncClass::CmdParamChanged,
            "memory-changed" => AsyncClass::MemoryChanged,
            other => AsyncClass::Other(other.to_string()),
        }
    }
}

/// A GDB/MI stream record
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRecord {
    pub stream_type: StreamType,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    Console, // ~
    Target,  // @
    Log,     // &
}

/// Values in GDB/MI output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    String(String),
    /// Lists of results (`[frame={..},frame={..}]`) keep only the values
    List(Vec<Value>),
    Tuple(HashMap<String, Value>),
}

impl Value {
    pub fn as_string(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Value::Tuple(tuple) => Some(tuple),
            _ => None,
        }
    }

    /// String field of a tuple value
    pub fn field(&self, key: &str) -> Option<&str> {
        self.as_tuple()?.get(key)?.as_string()
    }
}

/// Reasons GDB reports in `*stopped` records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    BreakpointHit,
    WatchpointTrigger,
    ReadWatchpointTrigger,
    AccessWatchpointTrigger,
    FunctionFinished,
    LocationReached,
    WatchpointScope,
    EndSteppingRange,
    ExitedSignalled,
    Exited,
    ExitedNormally,
    SignalReceived,
    SolibEvent,
    Fork,
    Vfork,
    SyscallEntry,
    SyscallReturn,
    Exec,
    NoHistory,
}

const STOP_REASONS: &[(StopReason, &str)] = &[
    (StopReason::BreakpointHit, "breakpoint-hit"),
    (StopReason::WatchpointTrigger, "watchpoint-trigger"),
    (StopReason::ReadWatchpointTrigger, "read-watchpoint-trigger"),
    (StopReason::AccessWatchpointTrigger, "access-watchpoint-trigger"),
    (StopReason::FunctionFinished, "function-finished"),
    (StopReason::LocationReached, "location-reached"),
    (StopReason::WatchpointScope, "watchpoint-scope"),
    (StopReason::EndSteppingRange, "end-stepping-range"),
    (StopReason::ExitedSignalled, "exited-signalled"),
    (StopReason::Exited, "exited"),
    (StopReason::ExitedNormally, "exited-normally"),
    (StopReason::SignalReceived, "signal-received"),
    (StopReason::SolibEvent, "solib-event"),
    (StopReason::Fork, "fork"),
    (StopReason::Vfork, "vfork"),
    (StopReason::SyscallEntry, "syscall-entry"),
    (StopReason::SyscallReturn, "syscall-return"),
    (StopReason::Exec, "exec"),
    (StopReason::NoHistory, "no-history"),
];

impl StopReason {
    /// The inferior is gone rather than paused
    pub fn is_exit(self) -> bool {
        matches!(
            self,
            StopReason::Exited | StopReason::ExitedNormally | StopReason::ExitedSignalled
        )
    }

    pub fn as_str(self) -> &'static str {
        STOP_REASONS
            .iter()
            .find(|(reason, _)| *reason == self)
            .map(|(_, name)| *name)
            .unwrap_or("unknown")
    }
}

impl FromStr for StopReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        STOP_REASONS
            .iter()
            .find(|(_, name)| *name == s)
            .map(|(reason, _)| *reason)
            .ok_or_else(|| format!("Unknown stop reason: {}", s))
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
