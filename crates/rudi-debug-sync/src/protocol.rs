//! Wire format shared by the debugger and the runtime.
//!
//! One JSON object per line, `{"method": ..., "params": [...]}`:
//!
//! ```text
//! {"method":"setLoggingState","params":[7,3]}
//! {"method":"logRule","params":[7,[true,false]]}
//! ```

use rudi_debug_core::{LoggingState, RuleId};
use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

/// Tell the runtime which evaluations of a rule to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetLoggingState {
    pub rule: RuleId,
    pub state: LoggingState,
}

/// One evaluation of a rule, reported by the runtime.
///
/// `results[0]` is the outcome of the rule; the remaining entries are the
/// values of its base terms, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRule {
    pub rule: RuleId,
    pub results: Vec<bool>,
}

impl LogRule {
    /// Outcome of the evaluation; `None` for an empty result vector.
    pub fn outcome(&self) -> Option<bool> {
        self.results.first().copied()
    }

    /// Base term values of the evaluation.
    pub fn terms(&self) -> &[bool] {
        self.results.get(1..).unwrap_or(&[])
    }
}

/// A decoded message in either direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    SetLoggingState(SetLoggingState),
    LogRule(LogRule),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "camelCase")]
enum Wire {
    SetLoggingState(i32, i32),
    LogRule(i32, Vec<bool>),
}

#[derive(Deserialize)]
struct Envelope {
    method: String,
}

const KNOWN_METHODS: [&str; 2] = ["setLoggingState", "logRule"];

impl From<SetLoggingState> for Message {
    fn from(msg: SetLoggingState) -> Self {
        Message::SetLoggingState(msg)
    }
}

impl From<LogRule> for Message {
    fn from(msg: LogRule) -> Self {
        Message::LogRule(msg)
    }
}

/// Encode a message as a single line, without the trailing newline.
pub fn encode(message: &Message) -> SyncResult<String> {
    let wire = match message {
        Message::SetLoggingState(msg) => {
            let code = msg.state.wire_code().ok_or_else(|| SyncError::InvalidMessage {
                line: String::new(),
                message: format!("{} cannot be sent to the runtime", msg.state),
            })?;
            Wire::SetLoggingState(msg.rule.0, code)
        }
        Message::LogRule(msg) => Wire::LogRule(msg.rule.0, msg.results.clone()),
    };
    Ok(serde_json::to_string(&wire)?)
}

/// Decode one line.
///
/// Returns `Ok(None)` for well-formed messages with a method this side does
/// not understand; those are skipped rather than treated as errors.
pub fn decode(line: &str) -> SyncResult<Option<Message>> {
    let invalid = |message: String| SyncError::InvalidMessage {
        line: line.to_string(),
        message,
    };

    let envelope: Envelope = serde_json::from_str(line).map_err(|e| invalid(e.to_string()))?;
    if !KNOWN_METHODS.contains(&envelope.method.as_str()) {
        return Ok(None);
    }

    let wire: Wire = serde_json::from_str(line).map_err(|e| invalid(e.to_string()))?;
    let message = match wire {
        Wire::SetLoggingState(rule, code) => {
            let state = LoggingState::from_wire_code(code)
                .ok_or_else(|| invalid(format!("unknown logging state code {code}")))?;
            Message::SetLoggingState(SetLoggingState {
                rule: RuleId(rule),
                state,
            })
        }
        Wire::LogRule(rule, results) => Message::LogRule(LogRule {
            rule: RuleId(rule),
            results,
        }),
    };
    Ok(Some(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_logging_state_wire_form() {
        let msg = Message::from(SetLoggingState {
            rule: RuleId(7),
            state: LoggingState::IfFalse,
        });
        assert_eq!(
            encode(&msg).unwrap(),
            r#"{"method":"setLoggingState","params":[7,2]}"#
        );
    }

    #[test]
    fn test_decode_log_rule() {
        let msg = decode(r#"{"method":"logRule","params":[4,[true,false,true]]}"#)
            .unwrap()
            .unwrap();
        assert_eq!(
            msg,
            Message::LogRule(LogRule {
                rule: RuleId(4),
                results: vec![true, false, true],
            })
        );
    }

    #[test]
    fn test_outcome_and_terms() {
        let log = LogRule {
            rule: RuleId(1),
            results: vec![false, true, false],
        };
        assert_eq!(log.outcome(), Some(false));
        assert_eq!(log.terms(), &[true, false]);

        let empty = LogRule {
            rule: RuleId(1),
            results: vec![],
        };
        assert_eq!(empty.outcome(), None);
        assert!(empty.terms().is_empty());
    }

    #[test]
    fn test_unknown_method_is_skipped() {
        assert_eq!(decode(r#"{"method":"ping","params":[]}"#).unwrap(), None);
    }

    #[test]
    fn test_derived_state_is_not_encodable() {
        let msg = Message::from(SetLoggingState {
            rule: RuleId(1),
            state: LoggingState::Mixed,
        });
        assert!(encode(&msg).is_err());
    }

    #[test]
    fn test_bad_lines_are_errors() {
        assert!(decode("not json").is_err());
        assert!(decode(r#"{"method":"setLoggingState","params":[1,9]}"#).is_err());
        assert!(decode(r#"{"method":"logRule","params":["x"]}"#).is_err());
    }
}
