//! The narrow `skill:load` handler: loads a skill's Markdown definition
//! from disk and returns its body as the tool output, the way the router expects extension
//! commands to resolve.
//!
//! Narrowed to just the `load` operation — `skill:search` and `skill:enhance` are deliberately
//! left unhandled here and fall through to the generic `skill:<a>:<b>` extension-command error
//! path in `router.rs`.

use std::path::PathBuf;

use crate::message::CommandResult;
use crate::tools::router::tokenize;

/// Resolves `skill:load <name>` against a fixed set of search roots, in order, the first
/// existing `<root>/<name>.md` (or `<root>/<name>/SKILL.md`) wins.
pub struct SkillLoader {
    roots: Vec<PathBuf>,
}

impl SkillLoader {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        SkillLoader { roots }
    }

    pub async fn load(&self, command: &str) -> CommandResult {
        let tokens = tokenize(command.trim().strip_prefix("skill:load").unwrap_or("").trim());
        let Some(name) = tokens.first() else {
            return CommandResult::err("skill:load: missing skill name");
        };
        for root in &self.roots {
            let direct = root.join(format!("{name}.md"));
            if let Ok(body) = tokio::fs::read_to_string(&direct).await {
                return CommandResult::ok(body);
            }
            let nested = root.join(name).join("SKILL.md");
            if let Ok(body) = tokio::fs::read_to_string(&nested).await {
                return CommandResult::ok(body);
            }
        }
        CommandResult::err(format!("skill:load: no skill named {name} found"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loads_direct_markdown_file() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("triage.md"), "# Triage\nsteps").await.unwrap();
        let loader = SkillLoader::new(vec![dir.path().to_path_buf()]);
        let result = loader.load("skill:load triage").await;
        assert_eq!(result.exit_code, 0);
        assert!(result.stdout.contains("Triage"));
    }

    #[tokio::test]
    async fn loads_nested_skill_md() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("deploy");
        tokio::fs::create_dir_all(&nested).await.unwrap();
        tokio::fs::write(nested.join("SKILL.md"), "# Deploy").await.unwrap();
        let loader = SkillLoader::new(vec![dir.path().to_path_buf()]);
        let result = loader.load("skill:load deploy").await;
        assert_eq!(result.exit_code, 0);
        assert!(result.stdout.contains("Deploy"));
    }

    #[tokio::test]
    async fn missing_skill_errors() {
        let dir = tempfile::tempdir().unwrap();
        let loader = SkillLoader::new(vec![dir.path().to_path_buf()]);
        let result = loader.load("skill:load nope").await;
        assert_eq!(result.exit_code, 1);
    }
}
