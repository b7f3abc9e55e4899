//! Coalescing of runtime events for display.
//!
//! The runtime may report many evaluations per second. [`LogBatcher`]
//! collects whatever arrives within a short window and groups consecutive
//! evaluations of the same rule, so a printer or view updates once per burst.

use std::time::Duration;

use rudi_debug_core::RuleId;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::protocol::{LogRule, Message, SetLoggingState};

/// Default collection window.
pub const DEFAULT_BATCH_WINDOW: Duration = Duration::from_millis(50);

/// Upper bound on messages pulled into one batch.
pub const MAX_BATCH_MESSAGES: usize = 1024;

/// Consecutive evaluations of one rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleLogs {
    pub rule: RuleId,
    /// One result vector per evaluation, in arrival order.
    pub evaluations: Vec<Vec<bool>>,
}

impl RuleLogs {
    /// Evaluations as the runtime reported them.
    pub fn entries(&self) -> impl Iterator<Item = LogRule> + '_ {
        self.evaluations.iter().map(|results| LogRule {
            rule: self.rule,
            results: results.clone(),
        })
    }
}

/// One burst of runtime messages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogBatch {
    /// Rule evaluations, consecutive reports of one rule grouped.
    pub logs: Vec<RuleLogs>,
    /// Logging states pushed by the runtime.
    pub states: Vec<SetLoggingState>,
}

impl LogBatch {
    fn push(&mut self, msg: Message) {
        match msg {
            Message::LogRule(log) => match self.logs.last_mut() {
                Some(last) if last.rule == log.rule => last.evaluations.push(log.results),
                _ => self.logs.push(RuleLogs {
                    rule: log.rule,
                    evaluations: vec![log.results],
                }),
            },
            Message::SetLoggingState(state) => self.states.push(state),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty() && self.states.is_empty()
    }

    /// Total number of evaluations in the batch.
    pub fn evaluation_count(&self) -> usize {
        self.logs.iter().map(|l| l.evaluations.len()).sum()
    }
}

/// Groups inbound runtime messages into [`LogBatch`]es.
#[derive(Debug)]
pub struct LogBatcher {
    rx: mpsc::UnboundedReceiver<Message>,
    window: Duration,
}

impl LogBatcher {
    pub fn new(rx: mpsc::UnboundedReceiver<Message>, window: Duration) -> Self {
        Self { rx, window }
    }

    /// Wait for the next burst.
    ///
    /// Returns `None` once the sending side is gone and everything was
    /// delivered.
    pub async fn next_batch(&mut self) -> Option<LogBatch> {
        let first = self.rx.recv().await?;
        let mut batch = LogBatch::default();
        batch.push(first);

        let deadline = Instant::now() + self.window;
        for _ in 1..MAX_BATCH_MESSAGES {
            match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                Ok(Some(msg)) => batch.push(msg),
                Ok(None) | Err(_) => break,
            }
        }
        Some(batch)
    }
}
