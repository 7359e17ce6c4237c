//! Command-output truncation.
//!
//! Output stored in execution state is bounded to 100 lines / 4000
//! characters: the first and last 50 lines are kept with a separator in
//! between. Raw output is streamed at `trace` level before truncation, so
//! nothing is lost to observers.

/// Maximum lines kept in state.
pub const MAX_OUTPUT_LINES: usize = 100;

/// Maximum characters kept in state.
pub const MAX_OUTPUT_CHARS: usize = 4000;

const HEAD_LINES: usize = 50;
const TAIL_LINES: usize = 50;

/// Truncate command output for storage. Returns the stored text and
/// whether truncation occurred.
pub fn truncate_output(raw: &str) -> (String, bool) {
    let lines: Vec<&str> = raw.lines().collect();

    let (text, mut truncated) = if lines.len() > MAX_OUTPUT_LINES {
        let omitted = lines.len() - HEAD_LINES - TAIL_LINES;
        let mut kept: Vec<&str> = Vec::with_capacity(MAX_OUTPUT_LINES + 1);
        kept.extend(&lines[..HEAD_LINES]);
        let separator = format!("... [{} lines truncated] ...", omitted);
        let mut text = kept.join("\n");
        text.push('\n');
        text.push_str(&separator);
        text.push('\n');
        text.push_str(&lines[lines.len() - TAIL_LINES..].join("\n"));
        (text, true)
    } else {
        (raw.to_string(), false)
    };

    if text.chars().count() > MAX_OUTPUT_CHARS {
        let half = MAX_OUTPUT_CHARS / 2 - 20;
        let head: String = text.chars().take(half).collect();
        let tail: String = {
            let chars: Vec<char> = text.chars().collect();
            chars[chars.len() - half..].iter().collect()
        };
        truncated = true;
        return (format!("{}\n... [truncated] ...\n{}", head, tail), truncated);
    }

    (text, truncated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_output_untouched() {
        let raw = "line one\nline two";
        let (text, truncated) = truncate_output(raw);
        assert_eq!(text, raw);
        assert!(!truncated);
    }

    #[test]
    fn long_output_keeps_head_and_tail_lines() {
        let raw: String = (0..200).map(|i| format!("line {}\n", i)).collect();
        let (text, truncated) = truncate_output(&raw);
        assert!(truncated);
        assert!(text.starts_with("line 0\n"));
        assert!(text.contains("line 49"));
        assert!(text.contains("[100 lines truncated]"));
        assert!(text.contains("line 150"));
        assert!(text.contains("line 199"));
        assert!(!text.contains("line 100\n"));
    }

    #[test]
    fn oversized_characters_are_bounded() {
        let raw = "x".repeat(20_000);
        let (text, truncated) = truncate_output(&raw);
        assert!(truncated);
        assert!(text.chars().count() <= MAX_OUTPUT_CHARS + 30);
        assert!(text.contains("[truncated]"));
    }

    #[test]
    fn exactly_at_line_limit_untouched() {
        let raw: String = (0..MAX_OUTPUT_LINES)
            .map(|i| format!("l{}\n", i))
            .collect();
        let (_, truncated) = truncate_output(&raw);
        assert!(!truncated);
    }
}
