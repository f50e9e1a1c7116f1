/// Variable model
///
/// Turns GDB's printed values into a small tree: containers and arrays get
/// one level of indexed children parsed straight out of the value string.
/// Deeper levels come from GDB variable objects on demand.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::types::Value;

/// Type names treated as containers
pub const CONTAINER_TYPES: &[&str] = &[
    "std::vector",
    "std::list",
    "std::deque",
    "std::set",
    "std::map",
    "std::unordered_set",
    "std::unordered_map",
    "std::array",
    "std::queue",
    "std::stack",
];

static ARRAY_LEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(\d+)\]").expect("array length pattern"));
static SIZE_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:size=|of length )(\d+)").expect("size token pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Local,
    Global,
    Watch,
    Element,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub scope: Scope,
    pub value: String,
    pub var_type: String,
    pub expanded: bool,
    /// Present only for containers and arrays
    pub children: Option<Vec<Variable>>,
    pub is_container: bool,
    pub is_array: bool,
    pub element_count: Option<usize>,
}

impl Variable {
    /// Classify a value and expand one level of children
    pub fn new(
        name: impl Into<String>,
        value: impl Into<String>,
        var_type: impl Into<String>,
        scope: Scope,
        max_children: usize,
    ) -> Self {
        let value = value.into();
        let var_type = var_type.into();
        let is_container = is_container_type(&var_type);
        let is_array = is_array_type(&var_type, &value);
        let children = (is_container || is_array)
            .then(|| expand_children(&value, &var_type, max_children));

        Variable {
            name: name.into(),
            scope,
            element_count: element_count(&var_type, &value),
            value,
            var_type,
            expanded: false,
            children,
            is_container,
            is_array,
        }
    }

    /// A child node; never expanded eagerly
    pub fn element(
        name: impl Into<String>,
        value: impl Into<String>,
        var_type: impl Into<String>,
    ) -> Self {
        Variable {
            name: name.into(),
            scope: Scope::Element,
            value: value.into(),
            var_type: var_type.into(),
            expanded: false,
            children: None,
            is_container: false,
            is_array: false,
            element_count: None,
        }
    }

    /// Worth creating a variable object for
    pub fn is_complex(&self) -> bool {
        self.is_container || self.is_array
    }
}

pub fn is_container_type(var_type: &str) -> bool {
    CONTAINER_TYPES.iter().any(|name| var_type.contains(name))
}

pub fn is_array_type(var_type: &str, value: &str) -> bool {
    var_type.contains('[') || var_type.contains('*') || is_brace_delimited(value)
}

fn is_brace_delimited(value: &str) -> bool {
    let value = value.trim();
    value.len() >= 2 && value.starts_with('{') && value.ends_with('}')
}

/// `local` unless the name is fully qualified or the type is `static`
pub fn classify_scope(name: &str, var_type: &str) -> Scope {
    if name.starts_with("::") || var_type.contains("static") {
        Scope::Global
    } else {
        Scope::Local
    }
}

/// Element count: `[N]` in the type, else a size token in the value, else
/// the comma count of a brace-delimited value
pub fn element_count(var_type: &str, value: &str) -> Option<usize> {
    if let Some(caps) = ARRAY_LEN.captures(var_type) {
        return caps[1].parse().ok();
    }
    if let Some(caps) = SIZE_TOKEN.captures(value) {
        return caps[1].parse().ok();
    }
    let body = brace_body(value)?;
    if body.trim().is_empty() {
        Some(0)
    } else {
        Some(body.split(',').count())
    }
}

/// Contents of the brace group a value consists of
///
/// Pretty-printed containers look like `std::vector of length 3, capacity 3 = {1, 2, 3}`;
/// the trailing group after ` = ` counts as the value.
pub fn brace_body(value: &str) -> Option<&str> {
    let value = value.trim();
    let group = if is_brace_delimited(value) {
        value
    } else {
        let (_, tail) = value.split_once(" = ")?;
        let tail = tail.trim();
        if !is_brace_delimited(tail) {
            return None;
        }
        tail
    };
    Some(&group[1..group.len() - 1])
}

/// Split the body of a brace group on top-level commas
///
/// Nested `{}`, `()` and `[]` as well as quoted strings and character
/// literals are kept intact.
pub fn split_elements(body: &str) -> Vec<String> {
    let mut elements = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escape = false;

    for ch in body.chars() {
        if escape {
            current.push(ch);
            escape = false;
            continue;
        }
        match (quote, ch) {
            (_, '\\') => {
                escape = true;
                current.push(ch);
            }
            (Some(open), c) if c == open => {
                quote = None;
                current.push(ch);
            }
            (Some(_), _) => current.push(ch),
            (None, '"' | '\'') => {
                quote = Some(ch);
                current.push(ch);
            }
            (None, '{' | '(' | '[') => {
                depth += 1;
                current.push(ch);
            }
            (None, '}' | ')' | ']') => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            (None, ',') if depth == 0 => {
                elements.push(current.trim().to_string());
                current.clear();
            }
            (None, _) => current.push(ch),
        }
    }
    if !current.trim().is_empty() {
        elements.push(current.trim().to_string());
    }
    elements
}

/// Element type of a container, pointer or array type
pub fn element_type(container_type: &str) -> String {
    if let (Some(open), Some(close)) = (container_type.find('<'), container_type.rfind('>')) {
        if open < close {
            return first_template_argument(&container_type[open + 1..close]);
        }
    }
    if let Some(open) = container_type.find('[') {
        return container_type[..open].trim().to_string();
    }
    if container_type.contains('*') {
        return container_type.replacen('*', "", 1).trim().to_string();
    }
    "unknown".to_string()
}

fn first_template_argument(arguments: &str) -> String {
    let mut depth = 0usize;
    for (offset, ch) in arguments.char_indices() {
        match ch {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => return arguments[..offset].trim().to_string(),
            _ => {}
        }
    }
    arguments.trim().to_string()
}

/// Indexed children of a brace-delimited value, capped at `max_children`
/// plus a trailer describing what was left out
pub fn expand_children(value: &str, var_type: &str, max_children: usize) -> Vec<Variable> {
    let Some(body) = brace_body(value) else {
        return Vec::new();
    };
    let elements = split_elements(body);
    let child_type = element_type(var_type);

    let mut children: Vec<Variable> = elements
        .iter()
        .take(max_children)
        .enumerate()
        .map(|(index, element)| Variable::element(format!("[{}]", index), element, &child_type))
        .collect();

    if elements.len() > max_children {
        children.push(Variable::element(
            "...",
            format!("{} more elements", elements.len() - max_children),
            "info",
        ));
    }
    children
}

/// One entry of a `variables=[...]` payload
#[derive(Debug, Clone, PartialEq)]
pub struct VariableRecord {
    pub name: String,
    pub value: Option<String>,
    pub var_type: Option<String>,
}

/// Entries of a `-stack-list-variables` result
pub fn parse_variable_list(results: &HashMap<String, Value>) -> Vec<VariableRecord> {
    let Some(list) = results.get("variables").and_then(Value::as_list) else {
        return Vec::new();
    };
    list.iter()
        .filter_map(|entry| {
            Some(VariableRecord {
                name: entry.field("name")?.to_string(),
                value: entry.field("value").map(str::to_string),
                var_type: entry.field("type").map(str::to_string),
            })
        })
        .collect()
}

/// Children of a `-var-list-children --all-values` result
pub fn parse_varobj_children(results: &HashMap<String, Value>) -> Vec<Variable> {
    let Some(list) = results.get("children").and_then(Value::as_list) else {
        return Vec::new();
    };
    list.iter()
        .filter_map(|child| {
            let exp = child.field("exp")?;
            let name = if exp.chars().all(|c| c.is_ascii_digit()) {
                format!("[{}]", exp)
            } else {
                exp.to_string()
            };
            let var_type = child.field("type").unwrap_or_default();
            let mut variable =
                Variable::element(name, child.field("value").unwrap_or_default(), var_type);
            let numchild = child
                .field("numchild")
                .and_then(|n| n.parse::<usize>().ok())
                .unwrap_or(0);
            if numchild > 0 {
                variable.is_container = is_container_type(var_type);
                variable.is_array = !variable.is_container;
                variable.element_count = Some(numchild);
            }
            Some(variable)
        })
        .collect()
}

/// Local names worth auto-watching from a `--simple-values` listing
pub fn discoverable_names(records: &[VariableRecord]) -> Vec<String> {
    records
        .iter()
        .map(|record| record.name.as_str())
        .filter(|name| !name.starts_with("__") && !name.contains("std::") && name.len() < 50)
        .map(str::to_string)
        .collect()
}

/// Stable handle of a top-level variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VariableId(pub u64);

/// Top-level variables keyed by id, with a `(scope, name)` index
///
/// A watch named `i` and a local named `i` are separate entries.
#[derive(Debug, Default)]
pub struct VariableStore {
    entries: BTreeMap<VariableId, Variable>,
    index: HashMap<(Scope, String), VariableId>,
    next_id: u64,
    varobjs: HashMap<String, String>,
    next_varobj: u64,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or wholesale-replace the entry with the same scope and name
    pub fn upsert(&mut self, variable: Variable) -> VariableId {
        let key = (variable.scope, variable.name.clone());
        let id = match self.index.get(&key) {
            Some(id) => *id,
            None => {
                self.next_id += 1;
                let id = VariableId(self.next_id);
                self.index.insert(key, id);
                id
            }
        };
        self.entries.insert(id, variable);
        id
    }

    /// Replace every local and global with a fresh listing
    pub fn replace_frame_variables(&mut self, variables: Vec<Variable>) {
        let fresh: Vec<(Scope, String)> = variables
            .iter()
            .map(|v| (v.scope, v.name.clone()))
            .collect();
        let stale: Vec<(Scope, String)> = self
            .index
            .keys()
            .filter(|(scope, _)| matches!(scope, Scope::Local | Scope::Global))
            .filter(|key| !fresh.contains(key))
            .cloned()
            .collect();
        for (scope, name) in stale {
            self.remove(scope, &name);
        }
        for variable in variables {
            self.upsert(variable);
        }
    }

    pub fn remove(&mut self, scope: Scope, name: &str) -> Option<Variable> {
        let id = self.index.remove(&(scope, name.to_string()))?;
        self.entries.remove(&id)
    }

    pub fn get(&self, id: VariableId) -> Option<&Variable> {
        self.entries.get(&id)
    }

    pub fn get_mut(&mut self, id: VariableId) -> Option<&mut Variable> {
        self.entries.get_mut(&id)
    }

    pub fn lookup(&self, scope: Scope, name: &str) -> Option<&Variable> {
        let id = self.index.get(&(scope, name.to_string()))?;
        self.entries.get(id)
    }

    /// Resolve a display name, preferring locals over watches over globals
    pub fn find(&self, name: &str) -> Option<VariableId> {
        [Scope::Local, Scope::Watch, Scope::Global]
            .into_iter()
            .find_map(|scope| self.index.get(&(scope, name.to_string())).copied())
    }

    /// Variable object name for an expression and whether it is new
    pub fn varobj_for(&mut self, expression: &str) -> (String, bool) {
        if let Some(name) = self.varobjs.get(expression) {
            return (name.clone(), false);
        }
        self.next_varobj += 1;
        let name = format!("var{}", self.next_varobj);
        self.varobjs.insert(expression.to_string(), name.clone());
        (name, true)
    }

    /// Forget a variable object that GDB failed to create
    pub fn forget_varobj(&mut self, expression: &str) {
        self.varobjs.remove(expression);
    }

    /// Snapshot in creation order
    pub fn list(&self) -> Vec<Variable> {
        self.entries.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
        self.varobjs.clear();
    }
}

/// Names the caller asked to track, in insertion order
#[derive(Debug, Default, Clone)]
pub struct WatchSet {
    names: Vec<String>,
}

impl WatchSet {
    /// Returns false when the name was already watched
    pub fn insert(&mut self, name: &str) -> bool {
        if self.contains(name) {
            return false;
        }
        self.names.push(name.to_string());
        true
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.names.len();
        self.names.retain(|watched| watched != name);
        before != self.names.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|watched| watched == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.names.clone()
    }

    pub fn clear(&mut self) {
        self.names.clear();
    }
}
