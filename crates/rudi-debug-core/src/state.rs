//! Logging state carried by every node of the rule tree.

use serde::{Deserialize, Serialize};

/// Controls whether evaluations of a rule are reported back by the runtime.
///
/// `Mixed` and `RuleLess` are derived values that only imports can hold:
/// `Mixed` when children disagree, `RuleLess` when a subtree has no rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoggingState {
    /// Never report evaluations.
    #[default]
    Never,
    /// Report evaluations whose result was false.
    IfFalse,
    /// Report evaluations whose result was true.
    IfTrue,
    /// Report every evaluation.
    Always,
    /// Children of an import disagree.
    Mixed,
    /// Import subtree without any rules.
    RuleLess,
}

impl LoggingState {
    /// States a user (or the runtime) may assign directly.
    pub const SELECTABLE: [LoggingState; 4] = [
        LoggingState::Never,
        LoggingState::IfFalse,
        LoggingState::IfTrue,
        LoggingState::Always,
    ];

    /// Whether this state is only ever derived by aggregation.
    pub fn is_derived(&self) -> bool {
        matches!(self, LoggingState::Mixed | LoggingState::RuleLess)
    }

    /// Bitmask sent to the runtime: bit 0 logs true results, bit 1 false ones.
    ///
    /// Returns `None` for derived states, which never cross the wire.
    pub fn wire_code(&self) -> Option<i32> {
        match self {
            LoggingState::Never => Some(0),
            LoggingState::IfTrue => Some(1),
            LoggingState::IfFalse => Some(2),
            LoggingState::Always => Some(3),
            LoggingState::Mixed | LoggingState::RuleLess => None,
        }
    }

    /// Inverse of [`LoggingState::wire_code`].
    pub fn from_wire_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(LoggingState::Never),
            1 => Some(LoggingState::IfTrue),
            2 => Some(LoggingState::IfFalse),
            3 => Some(LoggingState::Always),
            _ => None,
        }
    }

    /// Whether an evaluation with the given result should be shown.
    pub fn shows(&self, result: bool) -> bool {
        match self {
            LoggingState::Always => true,
            LoggingState::IfTrue => result,
            LoggingState::IfFalse => !result,
            _ => false,
        }
    }

    /// Short symbol used in tree listings.
    pub fn symbol(&self) -> &'static str {
        match self {
            LoggingState::Never => " ",
            LoggingState::IfFalse => "F",
            LoggingState::IfTrue => "T",
            LoggingState::Always => "A",
            LoggingState::Mixed => "~",
            LoggingState::RuleLess => "-",
        }
    }
}

impl std::fmt::Display for LoggingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LoggingState::Never => "never",
            LoggingState::IfFalse => "if-false",
            LoggingState::IfTrue => "if-true",
            LoggingState::Always => "always",
            LoggingState::Mixed => "mixed",
            LoggingState::RuleLess => "rule-less",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for LoggingState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "never" | "off" => Ok(LoggingState::Never),
            "if-false" | "false" => Ok(LoggingState::IfFalse),
            "if-true" | "true" => Ok(LoggingState::IfTrue),
            "always" | "on" => Ok(LoggingState::Always),
            other => Err(format!(
                "unknown logging state '{other}' (expected never, if-false, if-true or always)"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_codes_round_trip_for_selectable_states() {
        for state in LoggingState::SELECTABLE {
            let code = state.wire_code().unwrap();
            assert_eq!(LoggingState::from_wire_code(code), Some(state));
        }
        assert_eq!(LoggingState::Mixed.wire_code(), None);
        assert_eq!(LoggingState::RuleLess.wire_code(), None);
        assert_eq!(LoggingState::from_wire_code(7), None);
    }

    #[test]
    fn test_shows_follows_bitmask() {
        assert!(LoggingState::Always.shows(false));
        assert!(LoggingState::IfTrue.shows(true));
        assert!(!LoggingState::IfTrue.shows(false));
        assert!(LoggingState::IfFalse.shows(false));
        assert!(!LoggingState::Never.shows(true));
        assert!(!LoggingState::Mixed.shows(true));
    }

    #[test]
    fn test_parse_rejects_derived_states() {
        assert_eq!("Always".parse::<LoggingState>(), Ok(LoggingState::Always));
        assert!("mixed".parse::<LoggingState>().is_err());
    }
}
