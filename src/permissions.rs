//! Permission sets gating which tool names a given agent (top-level or sub-agent) may call
//!.
//!
//! An include/exclude profile shape, generalized to the prefix-exclusion semantics a sub-agent
//! permission scope requires for `task:*` permission scoping.

use std::collections::HashSet;

/// What a tool set includes before exclusions are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Include {
    All,
    Set(HashSet<String>),
}

/// `include` names (or "all") minus any name with an `exclude` entry as a prefix. Applying the
/// same `Permissions` twice to a name set is idempotent: exclusion is a pure predicate over
/// names, not a stateful consumption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permissions {
    pub include: Include,
    pub exclude: Vec<String>,
}

impl Permissions {
    pub fn all() -> Self {
        Permissions { include: Include::All, exclude: Vec::new() }
    }

    pub fn only(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Permissions {
            include: Include::Set(names.into_iter().map(Into::into).collect()),
            exclude: Vec::new(),
        }
    }

    pub fn excluding(mut self, prefixes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.exclude.extend(prefixes.into_iter().map(Into::into));
        self
    }

    /// Whether `name` is permitted: included (explicitly or via `All`) and not matched by any
    /// exclude prefix.
    pub fn allows(&self, name: &str) -> bool {
        let included = match &self.include {
            Include::All => true,
            Include::Set(set) => set.contains(name),
        };
        included && !self.exclude.iter().any(|prefix| name.starts_with(prefix.as_str()))
    }

    /// Filter a declared tool-name list down to the permitted subset, preserving order.
    pub fn filter<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Vec<&'a str> {
        names.into_iter().filter(|n| self.allows(n)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_permits_everything_not_excluded() {
        let perms = Permissions::all().excluding(["mcp:dangerous"]);
        assert!(perms.allows("Bash"));
        assert!(perms.allows("read"));
        assert!(!perms.allows("mcp:dangerous:drop_table"));
    }

    #[test]
    fn explicit_set_excludes_everything_else() {
        let perms = Permissions::only(["read", "glob", "search"]);
        assert!(perms.allows("read"));
        assert!(!perms.allows("write"));
    }

    #[test]
    fn exclude_prefix_matches_whole_namespace() {
        let perms = Permissions::all().excluding(["task:"]);
        assert!(!perms.allows("task:explore"));
        assert!(!perms.allows("task:general"));
        assert!(perms.allows("Bash"));
    }

    #[test]
    fn filtering_is_idempotent() {
        let perms = Permissions::only(["read", "write"]).excluding(["write"]);
        let names = vec!["read", "write", "edit"];
        let once = perms.filter(names.clone());
        let twice = perms.filter(once.clone());
        assert_eq!(once, twice);
        assert_eq!(once, vec!["read"]);
    }
}
