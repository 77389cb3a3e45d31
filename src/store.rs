//! Flat-file persistence for the three client resources: conversation
//! history, the free-text memory log, and the tool-definition list.
//!
//! Every call here runs inside a queued task on the host thread, which is what
//! serializes concurrent writers. Writes go through a temp file and a rename,
//! so a resource is either fully replaced or left as it was.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::StoreError;

pub const HISTORY_FILE: &str = "history.json";
pub const MEMORY_FILE: &str = "memory.txt";
pub const TOOLS_FILE: &str = "tools.json";

pub const MEMORY_MAX_ENTRIES: usize = 250;

/// Built-in tool names that are never handed back to clients.
pub const RESERVED_TOOL_NAMES: &[&str] = &[
    "remember",
    "create_tool",
    "run_tool",
    "inspect_graph",
    "get_screenshot",
    "execute_code",
    "search_knowledge_base",
    "qdrant_list_collections",
    "qdrant_create_collection",
    "qdrant_delete_collection",
    "qdrant_add_knowledge",
];

/// A client-defined tool. Fields beyond `trigger` and `name` are kept as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub trigger: String,
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ToolDefinition {
    pub fn from_json(body: &str) -> Result<Self, StoreError> {
        let value: Value = serde_json::from_str(body)?;
        for field in ["trigger", "name"] {
            if !value.get(field).is_some_and(Value::is_string) {
                return Err(StoreError::MissingField(field));
            }
        }
        Ok(serde_json::from_value(value)?)
    }
}

#[derive(Debug, Clone)]
pub struct Store {
    dir: PathBuf,
}

impl Store {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    /// Reads a resource, falling back to `default` when it is missing or unreadable.
    pub fn read_or(&self, file: &str, default: &str) -> String {
        let path = self.path(file);
        match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => default.to_string(),
            Err(err) => {
                warn!("read {} failed: {err}", path.display());
                default.to_string()
            }
        }
    }

    /// Replaces a resource wholesale. Failures are logged and reported as `false`.
    pub fn write(&self, file: &str, content: &str) -> bool {
        match self.write_atomic(file, content) {
            Ok(()) => true,
            Err(err) => {
                warn!("write {} failed: {err}", self.path(file).display());
                false
            }
        }
    }

    fn write_atomic(&self, file: &str, content: &str) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path(file);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &path)?;
        debug!("wrote {} ({} bytes)", path.display(), content.len());
        Ok(())
    }

    // ── History ─────────────────────────────────────────────────────────

    pub fn read_history(&self) -> String {
        self.read_or(HISTORY_FILE, "[]")
    }

    pub fn write_history(&self, body: &str) -> bool {
        self.write(HISTORY_FILE, body)
    }

    // ── Memory ──────────────────────────────────────────────────────────

    pub fn read_memory(&self) -> String {
        self.read_or(MEMORY_FILE, "")
    }

    /// Appends `entry` as newline-terminated lines and keeps only the newest
    /// [`MEMORY_MAX_ENTRIES`] lines.
    pub fn append_memory(&self, entry: &str) -> bool {
        let mut current = self.read_memory();
        if !current.is_empty() && !current.ends_with('\n') {
            current.push('\n');
        }
        let appended = format!("{entry}\n");
        let mut lines: Vec<&str> = current.split_inclusive('\n').collect();
        if !entry.is_empty() {
            lines.extend(appended.split_inclusive('\n'));
        }
        let start = lines.len().saturating_sub(MEMORY_MAX_ENTRIES);
        self.write(MEMORY_FILE, &lines[start..].concat())
    }

    pub fn overwrite_memory(&self, body: &str) -> bool {
        self.write(MEMORY_FILE, body)
    }

    // ── Tools ───────────────────────────────────────────────────────────

    /// The persisted tool list. A corrupt file reads as empty.
    pub fn read_tools(&self) -> Vec<Value> {
        let raw = self.read_or(TOOLS_FILE, "[]");
        match serde_json::from_str::<Vec<Value>>(&raw) {
            Ok(tools) => tools,
            Err(err) => {
                warn!("{TOOLS_FILE} is not a JSON array: {err}");
                Vec::new()
            }
        }
    }

    /// Tools safe to show a client: everything except reserved names.
    pub fn visible_tools(&self) -> Vec<Value> {
        self.read_tools()
            .into_iter()
            .filter(|tool| {
                let name = tool.get("name").and_then(Value::as_str).unwrap_or("");
                !RESERVED_TOOL_NAMES.contains(&name)
            })
            .collect()
    }

    fn write_tools(&self, tools: &[Value]) -> bool {
        match serde_json::to_string_pretty(tools) {
            Ok(json) => self.write(TOOLS_FILE, &json),
            Err(err) => {
                warn!("encode tools failed: {err}");
                false
            }
        }
    }

    /// Inserts `tool`, replacing any existing tool with the same trigger.
    pub fn upsert_tool(&self, tool: &ToolDefinition) -> bool {
        let value = match serde_json::to_value(tool) {
            Ok(v) => v,
            Err(err) => {
                warn!("encode tool {} failed: {err}", tool.trigger);
                return false;
            }
        };
        let mut tools = self.read_tools();
        tools.retain(|t| t.get("trigger").and_then(Value::as_str) != Some(tool.trigger.as_str()));
        tools.push(value);
        self.write_tools(&tools)
    }

    /// Removes tools with `trigger`. Deleting a trigger that is not present
    /// still counts as success.
    pub fn delete_tool(&self, trigger: &str) -> bool {
        let mut tools = self.read_tools();
        let before = tools.len();
        tools.retain(|t| t.get("trigger").and_then(Value::as_str) != Some(trigger));
        if tools.len() == before {
            return true;
        }
        self.write_tools(&tools)
    }
}
