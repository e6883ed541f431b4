//! Replaces the dependency group that follows the revision field.
//!
//! The splice is one forward pass over the manifest lines:
//!
//! ```text
//! SeekingMarker --marker--> AwaitOldBlockStart --any--> SkippingOldBlock --non-group--> Done
//! ```
//!
//! Lines before the marker and from the first non-group line onwards are kept
//! byte for byte. Running out of input in either post-marker state is an
//! error: the old group has no visible end, so dropping the tail would lose
//! unrelated manifest content.

use crate::error::{Error, Result};
use crate::manifest::FieldMarker;

/// Decides whether a manifest line is part of the generated dependency group.
pub trait GroupClassifier {
    fn belongs(&self, line: &str) -> bool;
}

impl<F> GroupClassifier for F
where
    F: Fn(&str) -> bool,
{
    fn belongs(&self, line: &str) -> bool {
        self(line)
    }
}

/// Group membership by quoted key prefix, e.g. `'dart_`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixGroup {
    prefix: String,
}

impl PrefixGroup {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl GroupClassifier for PrefixGroup {
    fn belongs(&self, line: &str) -> bool {
        let line = line.trim_start();
        ['\'', '"'].iter().any(|q| {
            line.strip_prefix(*q)
                .is_some_and(|rest| rest.starts_with(self.prefix.as_str()))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpliceState {
    SeekingMarker,
    AwaitOldBlockStart,
    SkippingOldBlock,
    Done,
}

fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

/// Returns `lines` with the group after `marker` replaced by `block`.
///
/// The output is the marker line, one `"\n"` separator, then `block` as given.
/// The input is never modified; callers swap the result in on success.
pub fn splice_block(
    lines: &[String],
    origin: &str,
    marker: &FieldMarker,
    block: &[String],
    group: &dyn GroupClassifier,
) -> Result<Vec<String>> {
    let mut out = Vec::with_capacity(lines.len() + block.len() + 1);
    let mut state = SpliceState::SeekingMarker;
    let mut marker_line = 0;

    for (idx, line) in lines.iter().enumerate() {
        match state {
            SpliceState::SeekingMarker => {
                out.push(line.clone());
                if marker.matches(line) {
                    marker_line = idx + 1;
                    out.push("\n".to_string());
                    out.extend(block.iter().cloned());
                    state = SpliceState::AwaitOldBlockStart;
                }
            }
            SpliceState::AwaitOldBlockStart => {
                state = SpliceState::SkippingOldBlock;
                if is_blank(line) {
                    continue;
                }
                // No separator in the old layout: this line is already old group content.
                if !group.belongs(line) {
                    out.extend(lines[idx..].iter().cloned());
                    state = SpliceState::Done;
                    break;
                }
            }
            SpliceState::SkippingOldBlock => {
                if !group.belongs(line) {
                    out.extend(lines[idx..].iter().cloned());
                    state = SpliceState::Done;
                    break;
                }
            }
            SpliceState::Done => break,
        }
    }

    match state {
        SpliceState::Done => Ok(out),
        SpliceState::SeekingMarker => Err(Error::FieldNotFound {
            field: marker.name().to_string(),
            origin: origin.to_string(),
        }),
        SpliceState::AwaitOldBlockStart | SpliceState::SkippingOldBlock => {
            Err(Error::UnterminatedBlock {
                field: marker.name().to_string(),
                origin: origin.to_string(),
                line: marker_line,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    fn marker() -> FieldMarker {
        FieldMarker::new("dart_revision").expect("marker")
    }

    #[test]
    fn prefix_group_matches_quoted_keys() {
        let g = PrefixGroup::new("dart_");
        assert!(g.belongs("  'dart_foo': '1',\n"));
        assert!(g.belongs("\"dart_bar\": \"2\",\n"));
        assert!(!g.belongs("  'skia_revision': 'x',\n"));
        assert!(!g.belongs("  # dart_ comment\n"));
        assert!(!g.belongs("\n"));
    }

    #[test]
    fn replaces_old_group_and_keeps_tail() {
        let input = lines(&[
            "x = 1\n",
            "  'dart_revision': 'abc123',\n",
            "\n",
            "  'dart_foo': '1',\n",
            "  'dart_bar': '2',\n",
            "other = 2\n",
            "  'dart_late': '3',\n",
        ]);
        let block = lines(&["  'dart_foo': '9',\n", "  'dart_baz': '9',\n"]);
        let out = splice_block(&input, "<mem>", &marker(), &block, &PrefixGroup::new("dart_"))
            .expect("splice");
        assert_eq!(
            out,
            lines(&[
                "x = 1\n",
                "  'dart_revision': 'abc123',\n",
                "\n",
                "  'dart_foo': '9',\n",
                "  'dart_baz': '9',\n",
                "other = 2\n",
                "  'dart_late': '3',\n",
            ])
        );
    }

    #[test]
    fn line_count_matches_layout() {
        let input = lines(&[
            "# header\n",
            "vars = {\n",
            "  'dart_revision': 'abc',\n",
            "\n",
            "  'dart_a': '1',\n",
            "  'dart_b': '2',\n",
            "  'dart_c': '3',\n",
            "}\n",
            "deps = {}\n",
        ]);
        for block_len in 0..4 {
            let block: Vec<String> = (0..block_len)
                .map(|i| format!("  'dart_n{i}': 'x',\n"))
                .collect();
            let out =
                splice_block(&input, "<mem>", &marker(), &block, &PrefixGroup::new("dart_"))
                    .expect("splice");
            // 2 before, marker, separator, block, 2 after.
            assert_eq!(out.len(), 2 + 1 + 1 + block_len + 2);
        }
    }

    #[test]
    fn non_blank_line_after_marker_is_not_dropped() {
        let input = lines(&["  'dart_revision': 'abc',\n", "}\n"]);
        let out = splice_block(&input, "<mem>", &marker(), &[], &PrefixGroup::new("dart_"))
            .expect("splice");
        assert_eq!(out, lines(&["  'dart_revision': 'abc',\n", "\n", "}\n"]));

        let input = lines(&["  'dart_revision': 'abc',\n", "  'dart_x': '1',\n", "}\n"]);
        let out = splice_block(&input, "<mem>", &marker(), &[], &PrefixGroup::new("dart_"))
            .expect("splice");
        assert_eq!(out, lines(&["  'dart_revision': 'abc',\n", "\n", "}\n"]));
    }

    #[test]
    fn group_running_to_end_of_input_is_unterminated() {
        let g = PrefixGroup::new("dart_");
        for input in [
            lines(&["a\n", "  'dart_revision': 'abc',\n"]),
            lines(&["a\n", "  'dart_revision': 'abc',\n", "\n"]),
            lines(&["a\n", "  'dart_revision': 'abc',\n", "\n", "  'dart_x': '1',\n"]),
        ] {
            let err = splice_block(&input, "DEPS", &marker(), &[], &g).unwrap_err();
            match err {
                Error::UnterminatedBlock { line, origin, .. } => {
                    assert_eq!(line, 2);
                    assert_eq!(origin, "DEPS");
                }
                other => panic!("unexpected error {other:?}"),
            }
        }
    }

    #[test]
    fn missing_marker_is_field_not_found() {
        let input = lines(&["a\n", "b\n"]);
        let err = splice_block(&input, "DEPS", &marker(), &[], &PrefixGroup::new("dart_"))
            .unwrap_err();
        assert!(matches!(err, Error::FieldNotFound { .. }), "got {err:?}");
    }

    #[test]
    fn closure_classifier() {
        let input = lines(&[
            "  'dart_revision': 'abc',\n",
            "\n",
            "  'pkg_a': '1',\n",
            "  'pkg_b': '1',\n",
            "done\n",
        ]);
        let by_pkg = |line: &str| line.contains("'pkg_");
        let out = splice_block(&input, "<mem>", &marker(), &lines(&["  'pkg_c': '2',\n"]), &by_pkg)
            .expect("splice");
        assert_eq!(
            out,
            lines(&["  'dart_revision': 'abc',\n", "\n", "  'pkg_c': '2',\n", "done\n"])
        );
    }
}
