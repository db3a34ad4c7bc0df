//! Exit codes and error reporting.

use shroud_core::{ShroudError, Span};
use std::process::ExitCode;

/// Run finished and every output was written.
pub const EXIT_SUCCESS: u8 = 0;
/// An input could not be parsed, or a pass refused it.
pub const EXIT_ERROR: u8 = 1;
/// Bad flags, bad options, or unusable paths.
pub const EXIT_USAGE_ERROR: u8 = 2;

/// Exit code for `err`.
#[must_use]
pub const fn exit_code(err: &ShroudError) -> u8 {
    match err {
        ShroudError::UnknownOption { .. }
        | ShroudError::InvalidOption { .. }
        | ShroudError::NothingToDo
        | ShroudError::Io { .. } => EXIT_USAGE_ERROR,
        _ => EXIT_ERROR,
    }
}

/// Print `err` to stderr, with the offending source line when the error
/// carries a location in `source`, and return the matching exit code.
pub fn report(err: &ShroudError, source: Option<&str>, filename: &str) -> ExitCode {
    eprintln!("{}", render(err, source, filename));
    ExitCode::from(exit_code(err))
}

/// The text [`report`] prints.
#[must_use]
pub fn render(err: &ShroudError, source: Option<&str>, filename: &str) -> String {
    let mut out = format!("shroud: {err}");
    let Some(span) = err.span().filter(|s| !s.is_dummy()) else {
        return out;
    };
    if !filename.is_empty() {
        out.push_str(&format!("\n  File \"{filename}\", line {}", span.start.line));
    }
    if let Some(snippet) = source.and_then(|source| snippet(source, span)) {
        out.push('\n');
        out.push_str(&snippet);
    }
    out
}

/// The source line of `span` with a caret under its start column.
fn snippet(source: &str, span: Span) -> Option<String> {
    let line = source.lines().nth((span.start.line as usize).checked_sub(1)?)?;
    let trimmed = line.trim_start();
    let indent = line.chars().count() - trimmed.chars().count();
    let col = (span.start.col as usize).saturating_sub(indent);
    Some(format!("    {trimmed}\n    {}^", " ".repeat(col)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(&ShroudError::NothingToDo), EXIT_USAGE_ERROR);
        assert_eq!(exit_code(&ShroudError::unknown_option("x.y")), EXIT_USAGE_ERROR);
        assert_eq!(exit_code(&ShroudError::syntax("bad", Span::point(1, 0))), EXIT_ERROR);
    }

    #[test]
    fn test_render_points_at_column() {
        let err = ShroudError::syntax("invalid syntax", Span::point(2, 8));
        let text = render(&err, Some("x = 1\n    y = = 2\n"), "demo.py");
        assert!(text.contains("File \"demo.py\", line 2"));
        assert!(text.ends_with("    y = = 2\n        ^"));
    }

    #[test]
    fn test_render_without_location() {
        let text = render(&ShroudError::NothingToDo, Some("x = 1\n"), "demo.py");
        assert_eq!(text, "shroud: nothing to do: no passes are enabled");
    }
}
