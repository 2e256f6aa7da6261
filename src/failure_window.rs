//! Sliding-window failure detector: a FIFO of the last N tool-result outcomes: trips when
//! at least `threshold` of them are failures.
//!
//! A `VecDeque<bool>` bounding an error rate over a fixed window. Scoped per
//! [`crate::agent_loop::AgentLoop`] instance across all its steps, not reset between individual
//! steps.

use std::collections::VecDeque;

pub struct FailureWindow {
    outcomes: VecDeque<bool>,
    size: usize,
    threshold: usize,
}

impl FailureWindow {
    pub fn new(size: usize, threshold: usize) -> Self {
        FailureWindow { outcomes: VecDeque::with_capacity(size), size, threshold }
    }

    /// Record one tool-result outcome (`true` = failure). Evicts the oldest entry once the
    /// window is at capacity.
    pub fn push(&mut self, is_error: bool) {
        if self.outcomes.len() == self.size {
            self.outcomes.pop_front();
        }
        self.outcomes.push_back(is_error);
    }

    /// Whether the number of failures currently in the window has reached the threshold.
    pub fn tripped(&self) -> bool {
        self.outcomes.iter().filter(|&&e| e).count() >= self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trips_once_threshold_reached_within_window() {
        let mut window = FailureWindow::new(3, 2);
        window.push(true);
        assert!(!window.tripped());
        window.push(true);
        assert!(window.tripped());
    }

    #[test]
    fn old_failures_fall_out_of_window() {
        let mut window = FailureWindow::new(2, 2);
        window.push(true);
        window.push(false);
        window.push(false);
        assert!(!window.tripped());
    }

    #[test]
    fn matches_spec_scenario_window3_threshold2() {
        let mut window = FailureWindow::new(3, 2);
        for _ in 0..2 {
            window.push(true);
        }
        assert!(window.tripped());
    }
}
