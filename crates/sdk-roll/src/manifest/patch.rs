use crate::error::{Error, Result};
use crate::manifest::FieldMarker;

/// What a revision patch changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPatch {
    pub index: usize,
    pub original: String,
    pub updated: String,
}

impl FieldPatch {
    pub fn line_number(&self) -> usize {
        self.index + 1
    }
}

/// Overwrites the first line holding `marker` with its canonical form.
///
/// Only the first occurrence is touched. When no line matches, or the
/// matching line does not hold exactly one quoted value after the key,
/// `lines` is left as it was.
pub fn patch_field(
    lines: &mut [String],
    origin: &str,
    marker: &FieldMarker,
    value: &str,
) -> Result<FieldPatch> {
    let Some((index, key_end)) = lines
        .iter()
        .enumerate()
        .find_map(|(i, l)| marker.locate(l).map(|(_, end)| (i, end)))
    else {
        return Err(Error::FieldNotFound {
            field: marker.name().to_string(),
            origin: origin.to_string(),
        });
    };

    let original = quoted_value(&lines[index][key_end..]).ok_or_else(|| Error::MalformedField {
        field: marker.name().to_string(),
        origin: origin.to_string(),
        line: index + 1,
    })?;

    lines[index] = marker.canonical_line(value);
    Ok(FieldPatch {
        index,
        original,
        updated: value.to_string(),
    })
}

// After the key: `:`, then one quoted value, then at most a trailing comma.
fn quoted_value(rest: &str) -> Option<String> {
    let rest = rest.trim_start().strip_prefix(':')?.trim_start();
    let quote = rest.chars().next().filter(|c| *c == '\'' || *c == '"')?;
    let body = &rest[quote.len_utf8()..];
    let close = body.find(quote)?;
    let value = &body[..close];
    if value.contains(['\'', '"']) {
        return None;
    }
    let tail = body[close + quote.len_utf8()..].trim_start();
    let tail = tail.strip_prefix(',').unwrap_or(tail);
    tail.trim().is_empty().then(|| value.to_string())
}
