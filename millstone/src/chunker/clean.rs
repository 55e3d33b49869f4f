//! Text normalization applied before boundary detection.

use std::sync::LazyLock;

use regex::Regex;

static HORIZONTAL_WS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]+").unwrap());
static EXCESS_NEWLINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());
static ANY_WS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Normalize raw document text.
///
/// Structure-preserving mode keeps paragraph breaks intact so the boundary
/// scanners can see them: line endings normalized to `\n`, runs of three or
/// more newlines collapsed to exactly two, horizontal whitespace runs
/// collapsed to a single space. The flattening mode reduces all whitespace
/// to single spaces for plain fixed windowing.
pub fn clean_text(raw: &str, preserve_structure: bool) -> String {
    if preserve_structure {
        let unified = raw.replace("\r\n", "\n").replace('\r', "\n");
        let spaced = HORIZONTAL_WS.replace_all(&unified, " ");
        let collapsed = EXCESS_NEWLINES.replace_all(&spaced, "\n\n");
        collapsed.trim().to_string()
    } else {
        ANY_WS.replace_all(raw, " ").trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_paragraph_breaks() {
        let raw = "First  paragraph.\r\n\r\n\r\n\r\nSecond\tparagraph.";
        assert_eq!(
            clean_text(raw, true),
            "First paragraph.\n\nSecond paragraph."
        );
    }

    #[test]
    fn flattens_all_whitespace() {
        let raw = "  one\n\ntwo\tthree  ";
        assert_eq!(clean_text(raw, false), "one two three");
    }

    #[test]
    fn empty_input_stays_empty() {
        assert_eq!(clean_text("   \n\n\t ", true), "");
        assert_eq!(clean_text("", false), "");
    }
}
