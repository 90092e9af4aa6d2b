//! Line-based change operations and their validation.

use serde::{Deserialize, Serialize};

/// What a change does to its line range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    /// Replace lines `start_line..=end_line`.
    Replace,
    /// Insert before `start_line` (`line_count + 1` appends).
    #[serde(alias = "add")]
    Insert,
    /// Remove lines `start_line..=end_line`.
    Delete,
    /// Anything else the model invented. Never applied.
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Replace => write!(f, "replace"),
            Self::Insert => write!(f, "insert"),
            Self::Delete => write!(f, "delete"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// One change proposed by the model. Line numbers are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeOperation {
    pub action: ChangeAction,
    pub start_line: usize,
    #[serde(default)]
    pub end_line: Option<usize>,
    pub new_code: String,
    #[serde(default)]
    pub explanation: Option<String>,
}

impl ChangeOperation {
    /// `end_line`, or `start_line` when absent.
    #[must_use]
    pub fn effective_end_line(&self) -> usize {
        self.end_line.unwrap_or(self.start_line)
    }

    #[must_use]
    pub fn replace(start_line: usize, end_line: usize, new_code: impl Into<String>) -> Self {
        Self {
            action: ChangeAction::Replace,
            start_line,
            end_line: Some(end_line),
            new_code: new_code.into(),
            explanation: None,
        }
    }

    #[must_use]
    pub fn insert(start_line: usize, new_code: impl Into<String>) -> Self {
        Self {
            action: ChangeAction::Insert,
            start_line,
            end_line: None,
            new_code: new_code.into(),
            explanation: None,
        }
    }

    #[must_use]
    pub fn delete(start_line: usize, end_line: Option<usize>) -> Self {
        Self {
            action: ChangeAction::Delete,
            start_line,
            end_line,
            new_code: String::new(),
            explanation: None,
        }
    }
}

/// Why a change was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("start line {start_line} is outside [1, {max}]")]
    StartOutOfRange { start_line: usize, max: usize },

    #[error("end line {end_line} is before start line {start_line}")]
    EndBeforeStart { start_line: usize, end_line: usize },

    #[error("end line {end_line} is past the last line {line_count}")]
    EndOutOfRange { end_line: usize, line_count: usize },

    #[error("unknown action")]
    UnknownAction,
}

/// Check one change against a document of `line_count` lines.
///
/// # Errors
///
/// Returns the first bound the change violates.
pub fn check(change: &ChangeOperation, line_count: usize) -> Result<(), Rejection> {
    let start_line = change.start_line;
    match change.action {
        ChangeAction::Insert => {
            let max = line_count + 1;
            if !(1..=max).contains(&start_line) {
                return Err(Rejection::StartOutOfRange { start_line, max });
            }
        }
        ChangeAction::Replace | ChangeAction::Delete => {
            if !(1..=line_count).contains(&start_line) {
                return Err(Rejection::StartOutOfRange {
                    start_line,
                    max: line_count,
                });
            }
            let end_line = change.effective_end_line();
            if end_line < start_line {
                return Err(Rejection::EndBeforeStart {
                    start_line,
                    end_line,
                });
            }
            if end_line > line_count {
                return Err(Rejection::EndOutOfRange {
                    end_line,
                    line_count,
                });
            }
        }
        ChangeAction::Unknown => return Err(Rejection::UnknownAction),
    }
    Ok(())
}

/// Keep only the changes that fit a document of `line_count` lines.
///
/// Dropped changes are logged, never reported as errors. Order is preserved.
#[must_use]
pub fn validate(changes: Vec<ChangeOperation>, line_count: usize) -> Vec<ChangeOperation> {
    changes
        .into_iter()
        .filter(|change| match check(change, line_count) {
            Ok(()) => true,
            Err(reason) => {
                tracing::warn!(
                    action = %change.action,
                    start_line = change.start_line,
                    end_line = ?change.end_line,
                    line_count,
                    %reason,
                    "dropping invalid change"
                );
                false
            }
        })
        .collect()
}

/// Whether any two changes overlap.
///
/// Sorts by start line and flags a change that starts at or before the
/// previous change's effective end line. Inserts are treated like one-line
/// ranges, so two inserts at the same line also count as a conflict.
#[must_use]
pub fn detect_conflicts(changes: &[ChangeOperation]) -> bool {
    let mut sorted: Vec<&ChangeOperation> = changes.iter().collect();
    sorted.sort_by_key(|c| c.start_line);
    sorted
        .windows(2)
        .any(|pair| pair[1].start_line <= pair[0].effective_end_line())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_past_end_is_dropped() {
        let kept = validate(vec![ChangeOperation::replace(5, 12, "x")], 10);
        assert!(kept.is_empty());
    }

    #[test]
    fn insert_may_append() {
        let kept = validate(vec![ChangeOperation::insert(11, "x")], 10);
        assert_eq!(kept.len(), 1);
        let kept = validate(vec![ChangeOperation::insert(12, "x")], 10);
        assert!(kept.is_empty());
    }

    #[test]
    fn zero_start_line_is_dropped() {
        assert!(validate(vec![ChangeOperation::insert(0, "x")], 10).is_empty());
        assert!(validate(vec![ChangeOperation::delete(0, None)], 10).is_empty());
    }

    #[test]
    fn end_before_start_is_dropped() {
        assert_eq!(
            check(&ChangeOperation::replace(5, 4, "x"), 10),
            Err(Rejection::EndBeforeStart {
                start_line: 5,
                end_line: 4
            })
        );
    }

    #[test]
    fn delete_defaults_end_to_start() {
        assert!(check(&ChangeOperation::delete(10, None), 10).is_ok());
        assert!(check(&ChangeOperation::delete(11, None), 10).is_err());
    }

    #[test]
    fn unknown_action_is_dropped() {
        let change: ChangeOperation = serde_json::from_str(
            r#"{"action":"rename","start_line":1,"end_line":1,"new_code":"x"}"#,
        )
        .unwrap();
        assert_eq!(change.action, ChangeAction::Unknown);
        assert!(validate(vec![change], 10).is_empty());
    }

    #[test]
    fn add_is_an_alias_for_insert() {
        let change: ChangeOperation =
            serde_json::from_str(r#"{"action":"add","start_line":1,"new_code":"x"}"#).unwrap();
        assert_eq!(change.action, ChangeAction::Insert);
    }

    #[test]
    fn validation_preserves_order_of_survivors() {
        let kept = validate(
            vec![
                ChangeOperation::replace(7, 8, "a"),
                ChangeOperation::replace(9, 30, "bad"),
                ChangeOperation::insert(1, "b"),
            ],
            10,
        );
        let starts: Vec<usize> = kept.iter().map(|c| c.start_line).collect();
        assert_eq!(starts, vec![7, 1]);
    }

    #[test]
    fn validator_matches_bounds_rule_exhaustively() {
        let line_count = 6;
        for start in 0..=8 {
            for end in [None, Some(0), Some(3), Some(6), Some(7)] {
                for action in [ChangeAction::Replace, ChangeAction::Delete, ChangeAction::Insert] {
                    let change = ChangeOperation {
                        action,
                        start_line: start,
                        end_line: end,
                        new_code: String::new(),
                        explanation: None,
                    };
                    let effective_end = end.unwrap_or(start);
                    let in_bounds = match action {
                        ChangeAction::Insert => (1..=line_count + 1).contains(&start),
                        _ => {
                            (1..=line_count).contains(&start)
                                && effective_end >= start
                                && effective_end <= line_count
                        }
                    };
                    let kept = validate(vec![change], line_count);
                    assert_eq!(kept.len() == 1, in_bounds, "{action} {start} {end:?}");
                }
            }
        }
    }

    #[test]
    fn overlapping_ranges_conflict() {
        let changes = vec![
            ChangeOperation::replace(1, 5, "a"),
            ChangeOperation::replace(3, 8, "b"),
        ];
        assert!(detect_conflicts(&changes));
    }

    #[test]
    fn adjacent_ranges_do_not_conflict() {
        let changes = vec![
            ChangeOperation::replace(6, 8, "b"),
            ChangeOperation::replace(1, 5, "a"),
        ];
        assert!(!detect_conflicts(&changes));
    }

    #[test]
    fn inserts_on_same_line_flag_conflict() {
        let changes = vec![
            ChangeOperation::insert(4, "a"),
            ChangeOperation::insert(4, "b"),
        ];
        assert!(detect_conflicts(&changes));
    }
}
