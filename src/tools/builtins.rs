//! Minimal, real built-in tool implementations the router dispatches to: `read`,
//! `write`, `edit`, `glob`, `search`, `TodoWrite`, `bash`.
//!
//! These exist so the router has live handlers to exercise, not as a complete file-tool suite —
//! persistence and a full file-ops suite are out of scope here; this crate keeps just enough of
//! them to validate dispatch end to end, in the usual async/`tokio::fs`/stdout-stderr-shaped-result
//! style.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::message::CommandResult;

pub async fn read(path: &str) -> CommandResult {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => CommandResult::ok(content),
        Err(e) => CommandResult::err(format!("read {path}: {e}")),
    }
}

pub async fn write(path: &str, content: &str) -> CommandResult {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return CommandResult::err(format!("write {path}: {e}"));
            }
        }
    }
    match tokio::fs::write(path, content).await {
        Ok(()) => CommandResult::ok(format!("wrote {} bytes to {path}", content.len())),
        Err(e) => CommandResult::err(format!("write {path}: {e}")),
    }
}

pub async fn edit(path: &str, old: &str, new: &str) -> CommandResult {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) => return CommandResult::err(format!("edit {path}: {e}")),
    };
    let Some(pos) = content.find(old) else {
        return CommandResult::err(format!("edit {path}: no match for the given text"));
    };
    let mut next = String::with_capacity(content.len());
    next.push_str(&content[..pos]);
    next.push_str(new);
    next.push_str(&content[pos + old.len()..]);
    match tokio::fs::write(path, &next).await {
        Ok(()) => CommandResult::ok(format!("edited {path}")),
        Err(e) => CommandResult::err(format!("edit {path}: {e}")),
    }
}

pub fn glob(pattern: &str) -> CommandResult {
    match glob::glob(pattern) {
        Ok(paths) => {
            let matches: Vec<String> = paths
                .filter_map(|p| p.ok())
                .map(|p| p.display().to_string())
                .collect();
            CommandResult::ok(matches.join("\n"))
        }
        Err(e) => CommandResult::err(format!("glob {pattern}: {e}")),
    }
}

pub fn search(pattern: &str, root: &str) -> CommandResult {
    let re = match regex::Regex::new(pattern) {
        Ok(re) => re,
        Err(e) => return CommandResult::err(format!("search: invalid pattern: {e}")),
    };
    let mut hits = Vec::new();
    for entry in walk(root) {
        if let Ok(content) = std::fs::read_to_string(&entry) {
            for (lineno, line) in content.lines().enumerate() {
                if re.is_match(line) {
                    hits.push(format!("{}:{}:{}", entry.display(), lineno + 1, line));
                }
            }
        }
    }
    CommandResult::ok(hits.join("\n"))
}

fn walk(root: &str) -> Vec<std::path::PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![std::path::PathBuf::from(root)];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else { continue };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                out.push(path);
            }
        }
    }
    out
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: String,
    pub content: String,
    pub status: String,
}

/// In-memory per-agent todo list. Replaces the list wholesale on each write: single source of
/// truth owned by the running agent, not persisted across sessions.
#[derive(Default)]
pub struct TodoList {
    items: Mutex<Vec<TodoItem>>,
}

impl TodoList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&self, items: Vec<TodoItem>) -> CommandResult {
        let rendered = render_todos(&items);
        *self.items.lock().unwrap_or_else(|e| e.into_inner()) = items;
        CommandResult::ok(rendered)
    }

    pub fn render(&self) -> String {
        render_todos(&self.items.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

fn render_todos(items: &[TodoItem]) -> String {
    items
        .iter()
        .map(|t| format!("[{}] {} ({})", t.status, t.content, t.id))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Lightweight per-session built-in-tool state (currently just the todo list), separate from
/// the persistent shell session owned by the router.
#[derive(Default)]
pub struct BuiltinState {
    pub todos: TodoList,
}
