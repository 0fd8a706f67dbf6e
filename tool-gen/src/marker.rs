//! Extraction of marked blocks from free-text generations.
//!
//! Backends are asked to wrap each piece of structured output in a pair of
//! sentinels, for example:
//!
//! ```text
//! # START_IMPLEMENTATION
//! def run(n): ...
//! # END_IMPLEMENTATION
//! ```

use regex_lite::Regex;
use tracing::warn;

/// Names of the blocks a generation can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Marker {
    Implementation,
    Dependencies,
    Tests,
    Arguments,
    ArgumentTypes,
    Usage,
    Match,
    Summary,
    EnvVariables,
    Output,
}

impl Marker {
    /// The upper-case name used inside the sentinels.
    pub fn name(self) -> &'static str {
        match self {
            Self::Implementation => "IMPLEMENTATION",
            Self::Dependencies => "DEPENDENCIES",
            Self::Tests => "TESTS",
            Self::Arguments => "ARGUMENTS",
            Self::ArgumentTypes => "ARGUMENT_TYPES",
            Self::Usage => "USAGE",
            Self::Match => "MATCH",
            Self::Summary => "SUMMARY",
            Self::EnvVariables => "ENV_VARIABLES",
            Self::Output => "OUTPUT",
        }
    }

    /// Opening sentinel, e.g. `# START_SUMMARY`.
    pub fn start(self) -> String {
        format!("# START_{}", self.name())
    }

    /// Closing sentinel, e.g. `# END_SUMMARY`.
    pub fn end(self) -> String {
        format!("# END_{}", self.name())
    }

    /// Wrap `body` in this marker's sentinels.
    pub fn wrap(self, body: &str) -> String {
        format!("{}\n{body}\n{}", self.start(), self.end())
    }
}

impl std::fmt::Display for Marker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Extract every block delimited by `marker` from `contents`.
///
/// Blocks are matched non-greedily, trimmed, and joined with newlines in the
/// order they appear. A language tag glued to the start sentinel and a
/// Markdown code fence around the block body are dropped. Returns an empty
/// string when the marker does not occur.
pub fn parse_marked_blocks(marker: Marker, contents: &str) -> String {
    let pattern = format!(
        r"(?s){}(?:\w+\s+)?(.*?){}",
        regex_lite::escape(&marker.start()),
        regex_lite::escape(&marker.end())
    );
    let re = match Regex::new(&pattern) {
        Ok(re) => re,
        Err(e) => {
            warn!("invalid pattern for marker {marker}: {e}");
            return String::new();
        }
    };

    re.captures_iter(contents)
        .filter_map(|caps| caps.get(1))
        .map(|body| strip_code_fence(body.as_str().trim()).to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Remove a surrounding ```lang ... ``` fence, if the block has one.
fn strip_code_fence(block: &str) -> &str {
    let Some(rest) = block.strip_prefix("```") else {
        return block;
    };
    let Some(body) = rest.trim_end().strip_suffix("```") else {
        return block;
    };
    // Drop the language hint on the opening fence line.
    match body.split_once('\n') {
        Some((hint, code)) if !hint.trim().contains(char::is_whitespace) => code.trim(),
        _ => body.trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_single_block() {
        let text = "intro\n# START_SUMMARY\n  Compute N!  \n# END_SUMMARY\noutro";
        assert_eq!(parse_marked_blocks(Marker::Summary, text), "Compute N!");
    }

    #[test]
    fn test_absent_marker_is_empty() {
        assert_eq!(parse_marked_blocks(Marker::Match, "no blocks here"), "");
    }

    #[test]
    fn test_repeated_blocks_are_not_merged() {
        let text = "# START_OUTPUT\none\n# END_OUTPUT\nbetween\n# START_OUTPUT\ntwo\n# END_OUTPUT";
        assert_eq!(parse_marked_blocks(Marker::Output, text), "one\ntwo");
    }

    #[test]
    fn test_markers_are_extracted_independently() {
        let text = [
            Marker::Implementation.wrap("def f(n):\n    return n"),
            Marker::Dependencies.wrap("NONE"),
            Marker::Arguments.wrap("n"),
            Marker::ArgumentTypes.wrap("int"),
            Marker::EnvVariables.wrap("NONE"),
        ]
        .join("\n\n");

        assert_eq!(
            parse_marked_blocks(Marker::Implementation, &text),
            "def f(n):\n    return n"
        );
        assert_eq!(parse_marked_blocks(Marker::Arguments, &text), "n");
        assert_eq!(parse_marked_blocks(Marker::ArgumentTypes, &text), "int");
        assert_eq!(parse_marked_blocks(Marker::Dependencies, &text), "NONE");
    }

    #[test]
    fn test_arguments_does_not_swallow_argument_types() {
        let text = "# START_ARGUMENT_TYPES\nint\n# END_ARGUMENT_TYPES";
        assert_eq!(parse_marked_blocks(Marker::Arguments, text), "");
    }

    #[test]
    fn test_glued_language_tag_is_dropped() {
        let text = "# START_IMPLEMENTATIONpython\nprint(1)\n# END_IMPLEMENTATION";
        assert_eq!(parse_marked_blocks(Marker::Implementation, text), "print(1)");
    }

    #[test]
    fn test_code_fence_is_dropped() {
        let text = "# START_IMPLEMENTATION\n```python\nprint(1)\n```\n# END_IMPLEMENTATION";
        assert_eq!(parse_marked_blocks(Marker::Implementation, text), "print(1)");
    }

    #[test]
    fn test_inline_block_keeps_first_word() {
        let text = "# START_MATCH TRUE # END_MATCH";
        assert_eq!(parse_marked_blocks(Marker::Match, text), "TRUE");
    }
}
