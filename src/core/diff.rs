//! Diff previews shown before a change is approved.

use similar::TextDiff;

/// Unified diff of `old` → `new` with three lines of context.
#[must_use]
pub fn unified(old: &str, new: &str, label: &str) -> String {
    let diff = TextDiff::from_lines(old, new);
    let mut output = diff
        .unified_diff()
        .context_radius(3)
        .header(&format!("a/{label}"), &format!("b/{label}"))
        .to_string();
    if !output.is_empty() && !output.ends_with('\n') {
        output.push('\n');
    }
    output
}
