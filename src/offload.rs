//! History-offload mechanism: once the estimated history size crosses a threshold, large
//! tool-result bodies in the oldest slice of the history are rewritten to filesystem references.
//!
//! Transcripts already live as newline-delimited JSON files on disk; this reuses that same
//! directory for offloaded bodies, keyed by a random file name rather than a rewound transcript
//! offset.

use std::path::{Path, PathBuf};

use crate::message::{ContentPart, Message, Role};

pub const SENTINEL_PREFIX: &str = "Tool result is at: ";

pub struct OffloadConfig {
    pub token_threshold: usize,
    pub scan_ratio: f64,
    pub min_chars: usize,
}

impl Default for OffloadConfig {
    fn default() -> Self {
        OffloadConfig { token_threshold: 8000, scan_ratio: 0.5, min_chars: 50 }
    }
}

pub struct OffloadOutcome {
    pub offloaded_count: usize,
    pub still_exceeds_threshold: bool,
}

/// Estimate the history's total token size; if at or above `config.token_threshold`, scan the
/// oldest `scan_ratio` fraction of message *indices* and rewrite
/// oversized, not-yet-offloaded tool-role message bodies to a sentinel pointing at a file under
/// `dir`. Returns the number offloaded and whether the post-offload estimate still exceeds
/// threshold; the loop proceeds regardless.
pub async fn maybe_offload(
    history: &mut [Message],
    dir: &Path,
    config: &OffloadConfig,
) -> std::io::Result<OffloadOutcome> {
    let estimate: usize = history.iter().map(Message::token_estimate).sum();
    if estimate < config.token_threshold {
        return Ok(OffloadOutcome { offloaded_count: 0, still_exceeds_threshold: false });
    }

    let scan_upto = ((history.len() as f64) * config.scan_ratio).floor() as usize;
    let mut offloaded_count = 0;

    for message in history.iter_mut().take(scan_upto) {
        if message.role != Role::Tool {
            continue;
        }
        let text = message.text();
        if text.len() < config.min_chars || text.starts_with(SENTINEL_PREFIX) {
            continue;
        }
        let path = write_offload_file(dir, &text).await?;
        message.content = vec![ContentPart::text(format!("{SENTINEL_PREFIX}{}", path.display()))];
        offloaded_count += 1;
    }

    let post_estimate: usize = history.iter().map(Message::token_estimate).sum();
    Ok(OffloadOutcome {
        offloaded_count,
        still_exceeds_threshold: post_estimate >= config.token_threshold,
    })
}

async fn write_offload_file(dir: &Path, content: &str) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let name = format!("{}.txt", uuid::Uuid::new_v4());
    let path = dir.join(name);
    tokio::fs::write(&path, content).await?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool_message(body: &str) -> Message {
        Message::tool_result("c1", body)
    }

    #[tokio::test]
    async fn rewrites_oversized_tool_body_to_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let mut history = vec![tool_message(&"x".repeat(200))];
        let config = OffloadConfig { token_threshold: 1, scan_ratio: 1.0, min_chars: 50 };
        let outcome = maybe_offload(&mut history, dir.path(), &config).await.unwrap();
        assert_eq!(outcome.offloaded_count, 1);
        assert!(history[0].text().starts_with(SENTINEL_PREFIX));
    }

    #[tokio::test]
    async fn rescan_of_already_offloaded_message_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let mut history = vec![tool_message(&"x".repeat(200))];
        let config = OffloadConfig { token_threshold: 1, scan_ratio: 1.0, min_chars: 50 };
        maybe_offload(&mut history, dir.path(), &config).await.unwrap();
        let outcome = maybe_offload(&mut history, dir.path(), &config).await.unwrap();
        assert_eq!(outcome.offloaded_count, 0);
    }

    #[tokio::test]
    async fn below_threshold_skips_scan_entirely() {
        let dir = tempfile::tempdir().unwrap();
        let mut history = vec![tool_message(&"x".repeat(200))];
        let config = OffloadConfig { token_threshold: 1_000_000, scan_ratio: 1.0, min_chars: 50 };
        let outcome = maybe_offload(&mut history, dir.path(), &config).await.unwrap();
        assert_eq!(outcome.offloaded_count, 0);
    }

    #[tokio::test]
    async fn messages_below_min_chars_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut history = vec![tool_message("short")];
        let config = OffloadConfig { token_threshold: 1, scan_ratio: 1.0, min_chars: 50 };
        let outcome = maybe_offload(&mut history, dir.path(), &config).await.unwrap();
        assert_eq!(outcome.offloaded_count, 0);
    }

    #[tokio::test]
    async fn scan_ratio_limits_to_oldest_fraction_of_indices() {
        let dir = tempfile::tempdir().unwrap();
        let mut history: Vec<Message> = (0..10).map(|_| tool_message(&"y".repeat(200))).collect();
        let config = OffloadConfig { token_threshold: 1, scan_ratio: 0.5, min_chars: 50 };
        let outcome = maybe_offload(&mut history, dir.path(), &config).await.unwrap();
        assert_eq!(outcome.offloaded_count, 5);
        assert!(history[4].text().starts_with(SENTINEL_PREFIX));
        assert!(!history[5].text().starts_with(SENTINEL_PREFIX));
    }
}
