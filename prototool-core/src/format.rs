//! # Format
//!
//! A minimal rewriting boundary over schema source text. Each [`Formatter`]
//! turns a file's text into its formatted form; the runner either writes the
//! result back or reports where the two differ as [`Diagnostic`]s.
use crate::compile::Diagnostic;

/// Diagnostic id attached to every formatting difference.
pub const FORMAT_DIFF_ID: &str = "FORMAT_DIFF";

pub trait Formatter: Send + Sync {
    fn id(&self) -> &'static str;
    fn format(&self, source: &str) -> String;
}

/// Every formatter that ships with the tool, in the order they are applied.
pub fn builtin_formatters() -> Vec<Box<dyn Formatter>> {
    vec![Box::new(Whitespace)]
}

/// Runs `source` through each formatter in turn.
pub fn apply(formatters: &[Box<dyn Formatter>], source: &str) -> String {
    formatters
        .iter()
        .fold(source.to_string(), |text, formatter| formatter.format(&text))
}

/// Line-by-line differences between `original` and `formatted`.
///
/// Empty exactly when the two texts are equal.
pub fn differences(filename: &str, original: &str, formatted: &str) -> Vec<Diagnostic> {
    if original == formatted {
        return Vec::new();
    }

    let before: Vec<&str> = original.lines().collect();
    let after: Vec<&str> = formatted.lines().collect();
    let mut found = Vec::new();

    for index in 0..before.len().max(after.len()) {
        let message = match (before.get(index), after.get(index)) {
            (Some(was), Some(wanted)) if was == wanted => continue,
            (_, Some(wanted)) => format!("Expected \"{wanted}\"."),
            (Some(_), None) => "Unexpected trailing line.".to_string(),
            (None, None) => continue,
        };
        found.push(difference(filename, index + 1, message));
    }

    // Only line endings differ
    if found.is_empty() {
        found.push(difference(
            filename,
            before.len().max(1),
            "Line endings differ.".to_string(),
        ));
    }

    found
}

fn difference(filename: &str, line: usize, message: String) -> Diagnostic {
    Diagnostic {
        filename: filename.to_string(),
        line: line as u32,
        column: 1,
        id: Some(FORMAT_DIFF_ID.to_string()),
        message,
    }
}

/// Two-space indentation, no trailing whitespace, one final newline.
struct Whitespace;

impl Formatter for Whitespace {
    fn id(&self) -> &'static str {
        "WHITESPACE"
    }

    fn format(&self, source: &str) -> String {
        let mut lines: Vec<String> = source
            .lines()
            .map(|line| {
                let body = line.trim_start_matches('\t');
                let tabs = line.len() - body.len();
                format!("{}{}", "  ".repeat(tabs), body.trim_end())
            })
            .collect();

        while lines.last().is_some_and(|line| line.is_empty()) {
            lines.pop();
        }

        if lines.is_empty() {
            return String::new();
        }

        let mut text = lines.join("\n");
        text.push('\n');
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(source: &str) -> String {
        apply(&builtin_formatters(), source)
    }

    #[test]
    fn formatted_text_is_left_alone() {
        let source = "syntax = \"proto3\";\n\nmessage A {\n  string a = 1;\n}\n";
        assert_eq!(format(source), source);
        assert!(differences("a.proto", source, &format(source)).is_empty());
    }

    #[test]
    fn whitespace_is_normalized() {
        assert_eq!(
            format("message A {  \n\tstring a = 1;\n}\n\n\n"),
            "message A {\n  string a = 1;\n}\n"
        );
        assert_eq!(format("message A {}"), "message A {}\n");
        assert_eq!(format("\n\n"), "");
    }

    #[test]
    fn differences_point_at_the_changed_lines() {
        let original = "message A {\n\tstring a = 1;\n}\n\n";
        let found = differences("a.proto", original, &format(original));

        let located: Vec<_> = found.iter().map(|d| (d.line, d.message.as_str())).collect();
        assert_eq!(
            located,
            [
                (2, "Expected \"  string a = 1;\"."),
                (4, "Unexpected trailing line.")
            ]
        );
        assert!(found.iter().all(|d| d.id.as_deref() == Some(FORMAT_DIFF_ID)));
    }

    #[test]
    fn missing_final_newline_is_reported() {
        let found = differences("a.proto", "message A {}", "message A {}\n");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].line, 1);
    }
}
