//! Applying validated change lists to a [`Document`].

use std::ops::Range;

use crate::changes::{ChangeAction, ChangeOperation};
use crate::document::{Document, detect_line_ending};
use crate::error::{Error, Result};

/// A single text edit in document offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    pub range: Range<usize>,
    pub text: String,
}

/// Offset of the first byte of 1-based `line`, clamped to end-of-document
/// past the last line.
#[must_use]
pub fn line_start(doc: &dyn Document, line: usize) -> usize {
    let index = line.saturating_sub(1);
    if index >= doc.line_count() {
        doc.text().len()
    } else {
        doc.line_start_offset(index)
    }
}

/// Offset after the last byte of 1-based `line`, excluding its terminator.
#[must_use]
pub fn line_end(doc: &dyn Document, line: usize) -> usize {
    let index = line.saturating_sub(1);
    if index >= doc.line_count() {
        doc.text().len()
    } else {
        doc.line_end_offset(index)
    }
}

/// Translate one change into an edit against the current state of `doc`.
///
/// Returns `None` for changes that cannot be applied: a replace with no
/// `end_line`, or an unknown action.
#[must_use]
pub fn edit_for(doc: &dyn Document, change: &ChangeOperation) -> Option<Edit> {
    let text = doc.text();
    match change.action {
        ChangeAction::Replace => {
            let Some(end_line) = change.end_line else {
                tracing::warn!(
                    start_line = change.start_line,
                    "replace without end_line, skipping"
                );
                return None;
            };
            let start = line_start(doc, change.start_line);
            let end = line_end(doc, end_line).max(start);
            Some(Edit {
                range: start..end,
                text: change.new_code.clone(),
            })
        }
        ChangeAction::Insert => {
            let offset = line_start(doc, change.start_line);
            let terminator = detect_line_ending(text);
            let mut code = String::with_capacity(change.new_code.len() + 2 * terminator.len());
            if offset == text.len() && !text.is_empty() && !text.ends_with('\n') {
                code.push_str(terminator);
            }
            code.push_str(&change.new_code);
            if !code.ends_with('\n') {
                code.push_str(terminator);
            }
            Some(Edit {
                range: offset..offset,
                text: code,
            })
        }
        ChangeAction::Delete => {
            let start = line_start(doc, change.start_line);
            let mut end = line_end(doc, change.effective_end_line()).max(start);
            let rest = &text[end..];
            if rest.starts_with("\r\n") {
                end += 2;
            } else if rest.starts_with('\n') {
                end += 1;
            }
            Some(Edit {
                range: start..end,
                text: String::new(),
            })
        }
        ChangeAction::Unknown => {
            tracing::warn!(start_line = change.start_line, "unknown action, skipping");
            None
        }
    }
}

/// Apply `changes` to `doc` bottom-up and return how many were applied.
///
/// Changes run in descending `start_line` order, stable for ties, so the
/// line numbers of changes not yet applied keep pointing at the same text.
/// The batch is all-or-nothing: if the document rejects an edit, its text is
/// restored to what it was before the call. Selection and pending-change
/// highlights are cleared afterwards either way.
///
/// # Errors
///
/// Returns [`Error::Apply`] when the document rejects an edit.
pub fn apply_changes(doc: &mut dyn Document, changes: &[ChangeOperation]) -> Result<usize> {
    let mut ordered: Vec<&ChangeOperation> = changes.iter().collect();
    ordered.sort_by(|a, b| b.start_line.cmp(&a.start_line));

    let snapshot = doc.text().to_string();
    let result = apply_ordered(doc, &ordered);

    if let Err(e) = &result {
        tracing::error!(error = %e, "apply failed, restoring document");
        let len = doc.text().len();
        if let Err(restore) = doc.replace_range(0, len, &snapshot) {
            tracing::error!(error = %restore, "could not restore document");
            return Err(Error::Apply(format!(
                "{e}; restoring the document also failed: {restore}"
            )));
        }
    }

    doc.clear_selection();
    doc.clear_highlights();
    result
}

fn apply_ordered(doc: &mut dyn Document, ordered: &[&ChangeOperation]) -> Result<usize> {
    let mut applied = 0;
    for change in ordered {
        let Some(edit) = edit_for(doc, change) else {
            continue;
        };
        tracing::debug!(
            action = %change.action,
            start_line = change.start_line,
            range = ?edit.range,
            "applying change"
        );
        let Range { start, end } = edit.range;
        if start == end {
            doc.insert_at(start, &edit.text)?;
        } else if edit.text.is_empty() {
            doc.delete_range(start, end)?;
        } else {
            doc.replace_range(start, end, &edit.text)?;
        }
        applied += 1;
    }
    Ok(applied)
}
