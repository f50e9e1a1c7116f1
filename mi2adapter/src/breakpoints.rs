/// Breakpoint registry
///
/// Entries change only on what GDB itself reports:
/// `=breakpoint-created`, `=breakpoint-modified` and `=breakpoint-deleted`
/// notifications, plus the replies to this adapter's own MI commands. GDB
/// does not emit those notifications for breakpoints inserted or deleted
/// through MI, so the `bkpt={...}` tuple of a `-break-insert` `^done` is
/// applied as a creation and a `^done` to `-break-delete` as a deletion.
/// A timed-out command changes nothing. Creation is an upsert keyed by
/// number, so a reply followed by a notification for the same breakpoint
/// leaves one entry.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use crate::types::Value;

/// Breakpoint number assigned by GDB
///
/// Location sub-numbers (`2.1`) collapse onto their parent breakpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BreakpointId(pub u32);

impl FromStr for BreakpointId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let major = s.split('.').next().unwrap_or(s);
        major
            .trim()
            .parse()
            .map(BreakpointId)
            .map_err(|_| format!("Invalid breakpoint number: {}", s))
    }
}

impl fmt::Display for BreakpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub number: BreakpointId,
    pub file: String,
    pub line: u32,
    pub enabled: bool,
}

impl Breakpoint {
    /// Build from the fields of a breakpoint description
    ///
    /// Accepts both the nested `bkpt={...}` form and flat top-level
    /// fields. Pending breakpoints have no `file`/`line` yet; their
    /// location is taken from `original-location` or `pending` when either
    /// is in `file:line` form.
    pub fn from_fields(fields: &HashMap<String, Value>) -> Option<Self> {
        if let Some(bkpt) = fields.get("bkpt").and_then(Value::as_tuple) {
            return Self::from_fields(bkpt);
        }

        let field = |key: &str| fields.get(key).and_then(Value::as_string);
        let number = field("number")?.parse().ok()?;
        let enabled = field("enabled").map(|e| e != "n").unwrap_or(true);

        let (file, line) = match (field("file"), field("line")) {
            (Some(file), Some(line)) => (file.to_string(), line.parse().ok()?),
            _ => ["original-location", "pending"]
                .into_iter()
                .filter_map(|key| field(key)?.rsplit_once(':'))
                .find_map(|(file, line)| Some((file.to_string(), line.parse().ok()?)))?,
        };

        Some(Breakpoint {
            number,
            file,
            line,
            enabled,
        })
    }
}

/// Breakpoints keyed by GDB number
///
/// Fed from notifications and from `-break-insert` / `-break-delete`
/// replies; see the module docs.
#[derive(Debug, Default)]
pub struct BreakpointRegistry {
    breakpoints: BTreeMap<BreakpointId, Breakpoint>,
}

impl BreakpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a created breakpoint; returns it when the registry changed
    pub fn apply_created(&mut self, fields: &HashMap<String, Value>) -> Option<Breakpoint> {
        let breakpoint = Breakpoint::from_fields(fields)?;
        if self.breakpoints.get(&breakpoint.number) == Some(&breakpoint) {
            return None;
        }
        self.breakpoints.insert(breakpoint.number, breakpoint.clone());
        Some(breakpoint)
    }

    /// Update an existing entry from a `=breakpoint-modified` notification
    pub fn apply_modified(&mut self, fields: &HashMap<String, Value>) -> bool {
        match Breakpoint::from_fields(fields) {
            Some(breakpoint) => {
                let changed = self.breakpoints.get(&breakpoint.number) != Some(&breakpoint);
                self.breakpoints.insert(breakpoint.number, breakpoint);
                changed
            }
            None => false,
        }
    }

    /// Remove an entry; `fields` carries the `id` of the deleted breakpoint
    pub fn apply_deleted(&mut self, fields: &HashMap<String, Value>) -> Option<BreakpointId> {
        let id = fields
            .get("id")
            .or_else(|| fields.get("number"))
            .and_then(Value::as_string)?
            .parse()
            .ok()?;
        self.remove(id).then_some(id)
    }

    pub fn remove(&mut self, id: BreakpointId) -> bool {
        self.breakpoints.remove(&id).is_some()
    }

    pub fn get(&self, id: BreakpointId) -> Option<&Breakpoint> {
        self.breakpoints.get(&id)
    }

    /// All breakpoints ordered by number
    pub fn list(&self) -> Vec<Breakpoint> {
        self.breakpoints.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.breakpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakpoints.is_empty()
    }

    pub fn clear(&mut self) {
        self.breakpoints.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_results;

    #[test]
    fn test_flat_creation_notification() {
        let mut registry = BreakpointRegistry::new();
        let fields = parse_results(r#"number="1",file="file",line="10""#).unwrap();
        let created = registry.apply_created(&fields).unwrap();

        assert_eq!(
            registry.list(),
            vec![Breakpoint {
                number: BreakpointId(1),
                file: "file".into(),
                line: 10,
                enabled: true,
            }]
        );
        assert_eq!(created.line, 10);
    }

    #[test]
    fn test_nested_bkpt_tuple() {
        let mut registry = BreakpointRegistry::new();
        let fields = parse_results(
            r#"bkpt={number="3",type="breakpoint",disp="keep",enabled="n",addr="0x1149",func="main",file="a.cpp",fullname="/tmp/a.cpp",line="7",times="0"}"#,
        )
        .unwrap();
        let created = registry.apply_created(&fields).unwrap();
        assert_eq!(created.number, BreakpointId(3));
        assert_eq!(created.file, "a.cpp");
        assert!(!created.enabled);
    }

    #[test]
    fn test_duplicate_creation_is_not_a_change() {
        let mut registry = BreakpointRegistry::new();
        let fields = parse_results(r#"bkpt={number="1",file="a.cpp",line="5"}"#).unwrap();
        assert!(registry.apply_created(&fields).is_some());
        assert!(registry.apply_created(&fields).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_insert_reply_then_notification_leaves_one_entry() {
        let mut registry = BreakpointRegistry::new();
        let reply = parse_results(
            r#"bkpt={number="1",type="breakpoint",enabled="y",file="file",fullname="/src/file",line="10",times="0"}"#,
        )
        .unwrap();
        let notification = parse_results(r#"number="1",file="file",line="10""#).unwrap();

        assert!(registry.apply_created(&reply).is_some());
        assert!(registry.apply_created(&notification).is_none());
        assert_eq!(
            registry.list(),
            vec![Breakpoint {
                number: BreakpointId(1),
                file: "file".into(),
                line: 10,
                enabled: true,
            }]
        );
    }

    #[test]
    fn test_same_location_is_not_deduplicated() {
        let mut registry = BreakpointRegistry::new();
        registry
            .apply_created(&parse_results(r#"number="1",file="a.cpp",line="5""#).unwrap())
            .unwrap();
        registry
            .apply_created(&parse_results(r#"number="2",file="a.cpp",line="5""#).unwrap())
            .unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_pending_breakpoint_location() {
        let fields = parse_results(
            r#"bkpt={number="4",type="breakpoint",enabled="y",addr="<PENDING>",pending="main.cpp:12",original-location="-source main.cpp -line 12"}"#,
        )
        .unwrap();
        // original-location is not in file:line form here, fall back to pending
        let breakpoint = Breakpoint::from_fields(&fields).unwrap();
        assert_eq!(breakpoint.number, BreakpointId(4));
        assert_eq!(breakpoint.line, 12);

        let fields =
            parse_results(r#"bkpt={number="5",pending="main.cpp:12",enabled="y"}"#).unwrap();
        let breakpoint = Breakpoint::from_fields(&fields).unwrap();
        assert_eq!(breakpoint.file, "main.cpp");
        assert_eq!(breakpoint.line, 12);
    }

    #[test]
    fn test_deletion() {
        let mut registry = BreakpointRegistry::new();
        registry
            .apply_created(&parse_results(r#"number="7",file="a.cpp",line="1""#).unwrap())
            .unwrap();
        let deleted = registry.apply_deleted(&parse_results(r#"id="7""#).unwrap());
        assert_eq!(deleted, Some(BreakpointId(7)));
        assert!(registry.is_empty());
        assert_eq!(registry.apply_deleted(&parse_results(r#"id="7""#).unwrap()), None);
    }

    #[test]
    fn test_modified_updates_enabled_flag() {
        let mut registry = BreakpointRegistry::new();
        registry
            .apply_created(&parse_results(r#"number="1",file="a.cpp",line="1""#).unwrap())
            .unwrap();
        let modified =
            parse_results(r#"bkpt={number="1",file="a.cpp",line="1",enabled="n"}"#).unwrap();
        assert!(registry.apply_modified(&modified));
        assert!(!registry.get(BreakpointId(1)).unwrap().enabled);
    }

    #[test]
    fn test_location_sub_number() {
        assert_eq!("2.1".parse::<BreakpointId>(), Ok(BreakpointId(2)));
        assert!("x".parse::<BreakpointId>().is_err());
    }
}
