//! Prompts for the structured-output flows.

use std::fmt::Write as _;

/// Prefix every line with its 1-based number, right-aligned.
#[must_use]
pub fn number_lines(text: &str) -> String {
    let count = text.lines().count();
    let width = count.max(1).to_string().len();
    let mut out = String::with_capacity(text.len() + count * (width + 2));
    for (index, line) in text.lines().enumerate() {
        let _ = writeln!(out, "{:>width$}| {line}", index + 1);
    }
    out
}

/// Prompt asking for a JSON change list against `document`.
#[must_use]
pub fn changes_prompt(
    document: &str,
    language: &str,
    instruction: &str,
    suggested_code: Option<&str>,
) -> String {
    let mut prompt = String::new();
    let _ = writeln!(
        prompt,
        "You are editing the {language} file below. Each line is prefixed with its \
         1-based line number followed by `| `; the prefix is not part of the file."
    );
    let _ = writeln!(prompt, "\n```{language}\n{}```", number_lines(document));
    let _ = writeln!(prompt, "\nTask: {instruction}");
    if let Some(code) = suggested_code {
        let _ = writeln!(
            prompt,
            "\nIntegrate this suggested code where it belongs:\n```{language}\n{}\n```",
            code.trim_end()
        );
    }
    prompt.push_str(
        "\nRespond with only a JSON array of change objects and nothing else:\n\
         [{\"action\": \"replace\" | \"insert\" | \"delete\", \"start_line\": <int>, \
         \"end_line\": <int or null>, \"new_code\": <string>, \"explanation\": <string or null>}]\n\
         Rules:\n\
         - Line numbers refer to the numbered file above.\n\
         - replace: lines start_line..=end_line become new_code.\n\
         - insert: new_code goes before start_line; use the last line number + 1 to append.\n\
         - delete: removes start_line..=end_line; new_code is \"\".\n\
         - Do not include line-number prefixes in new_code.\n\
         - Changes must not overlap.\n",
    );
    prompt
}

/// Prompt asking for the selected code with comments added.
#[must_use]
pub fn comment_prompt(code: &str, language: &str) -> String {
    format!(
        "Add concise, useful comments to the following {language} code. Do not change its \
         behavior or formatting.\n\n```{language}\n{}\n```\n\n\
         Respond with exactly one JSON object on one line and nothing else:\n\
         {{\"commentedCode\": \"<the full code with comments>\"}}\n",
        code.trim_end()
    )
}

/// Guess a fence language from a file extension.
#[must_use]
pub fn language_for(path: &std::path::Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).unwrap_or("") {
        "rs" => "rust",
        "py" => "python",
        "js" | "mjs" | "cjs" => "javascript",
        "ts" | "tsx" => "typescript",
        "java" => "java",
        "kt" | "kts" => "kotlin",
        "go" => "go",
        "c" | "h" => "c",
        "cc" | "cpp" | "hpp" | "cxx" => "cpp",
        "rb" => "ruby",
        "sh" | "bash" => "bash",
        "toml" => "toml",
        "json" => "json",
        "md" => "markdown",
        _ => "text",
    }
}
