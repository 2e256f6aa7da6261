//! End-of-conversation stop hooks: invoked once a loop reaches a terminal state other
//! than *cancelled*, with a snapshot of the finished conversation.
//!
//! A registry of boxed async subscribers, each invoked best-effort (a failing hook is logged,
//! not fatal).

use async_trait::async_trait;
use futures::FutureExt;

use crate::message::Message;

pub struct ConversationSnapshot<'a> {
    pub session_id: Option<&'a str>,
    pub working_dir: &'a std::path::Path,
    pub messages: &'a [Message],
    pub final_text: &'a str,
    /// Lets a hook report on its own progress as it runs, without the caller waiting for it
    /// to finish before learning anything.
    pub on_progress: &'a dyn Fn(&str),
}

#[async_trait]
pub trait StopHook: Send + Sync {
    async fn on_stop(&self, snapshot: &ConversationSnapshot<'_>);
}

#[derive(Default)]
pub struct HookRegistry {
    hooks: Vec<std::sync::Arc<dyn StopHook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, hook: std::sync::Arc<dyn StopHook>) {
        self.hooks.push(hook);
    }

    /// Run every registered hook against `snapshot`. A hook that panics during `on_stop` is
    /// caught and logged rather than propagated — matching the "hook failures are logged, not
    /// fatal" rule.
    pub async fn run(&self, snapshot: &ConversationSnapshot<'_>) {
        for hook in &self.hooks {
            let result = std::panic::AssertUnwindSafe(hook.on_stop(snapshot))
                .catch_unwind()
                .await;
            if result.is_err() {
                tracing::warn!("stop hook panicked; continuing");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingHook(Arc<AtomicUsize>);

    #[async_trait]
    impl StopHook for CountingHook {
        async fn on_stop(&self, _snapshot: &ConversationSnapshot<'_>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct PanickingHook;

    #[async_trait]
    impl StopHook for PanickingHook {
        async fn on_stop(&self, _snapshot: &ConversationSnapshot<'_>) {
            panic!("boom");
        }
    }

    struct ProgressReportingHook;

    #[async_trait]
    impl StopHook for ProgressReportingHook {
        async fn on_stop(&self, snapshot: &ConversationSnapshot<'_>) {
            (snapshot.on_progress)("starting");
            (snapshot.on_progress)("done");
        }
    }

    #[tokio::test]
    async fn a_hook_can_report_progress_through_the_snapshot() {
        let reported = Arc::new(std::sync::Mutex::new(Vec::new()));
        let reported_clone = reported.clone();
        let on_progress = move |msg: &str| reported_clone.lock().unwrap().push(msg.to_string());
        let mut registry = HookRegistry::new();
        registry.register(Arc::new(ProgressReportingHook));
        let dir = std::path::PathBuf::from(".");
        let snapshot = ConversationSnapshot {
            session_id: None,
            working_dir: &dir,
            messages: &[],
            final_text: "done",
            on_progress: &on_progress,
        };
        registry.run(&snapshot).await;
        assert_eq!(*reported.lock().unwrap(), vec!["starting", "done"]);
    }

    #[tokio::test]
    async fn runs_every_registered_hook() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut registry = HookRegistry::new();
        registry.register(Arc::new(CountingHook(counter.clone())));
        registry.register(Arc::new(CountingHook(counter.clone())));
        let dir = std::path::PathBuf::from(".");
        let no_progress = |_msg: &str| {};
        let snapshot = ConversationSnapshot {
            session_id: None,
            working_dir: &dir,
            messages: &[],
            final_text: "done",
            on_progress: &no_progress,
        };
        registry.run(&snapshot).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn a_panicking_hook_does_not_stop_the_others() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut registry = HookRegistry::new();
        registry.register(Arc::new(PanickingHook));
        registry.register(Arc::new(CountingHook(counter.clone())));
        let dir = std::path::PathBuf::from(".");
        let no_progress = |_msg: &str| {};
        let snapshot = ConversationSnapshot {
            session_id: None,
            working_dir: &dir,
            messages: &[],
            final_text: "done",
            on_progress: &no_progress,
        };
        registry.run(&snapshot).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
