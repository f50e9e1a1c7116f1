/// Call-stack model

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::Value;

/// One frame of the call stack; level 0 is the innermost
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackFrame {
    pub level: u32,
    pub address: Option<String>,
    pub function: Option<String>,
    pub file: Option<String>,
    pub fullname: Option<String>,
    pub line: Option<u32>,
}

impl StackFrame {
    /// Build from a `frame={...}` tuple; `level` is required
    pub fn from_tuple(tuple: &HashMap<String, Value>) -> Option<Self> {
        let field = |key: &str| tuple.get(key).and_then(Value::as_string);
        let owned = |key: &str| field(key).map(str::to_string);

        Some(StackFrame {
            level: field("level")?.parse().ok()?,
            address: owned("addr"),
            function: owned("func"),
            file: owned("file"),
            fullname: owned("fullname"),
            line: field("line").and_then(|line| line.parse().ok()),
        })
    }
}

/// Frames of a `-stack-list-frames` result, ascending by level
pub fn parse_stack(results: &HashMap<String, Value>) -> Vec<StackFrame> {
    let Some(frames) = results.get("stack").and_then(Value::as_list) else {
        return Vec::new();
    };
    let mut stack: Vec<StackFrame> = frames
        .iter()
        .filter_map(Value::as_tuple)
        .filter_map(StackFrame::from_tuple)
        .collect();
    stack.sort_by_key(|frame| frame.level);
    stack
}
