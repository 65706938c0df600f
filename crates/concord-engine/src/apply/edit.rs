//! Edit primitives: anchored text substitution and keyed-container insertion.
//!
//! Both are pure functions over file content; the caller owns reading, writing
//! and backups.

use concord_adapters::util::truncate;
use concord_core::{CodeChange, ConcordError, ContainerInsert};
use serde_json::Value;
use std::ops::Range;
use std::path::Path;

const MAX_ANCHOR_IN_ERROR: usize = 120;

/// Where an anchor sits in a file.
enum AnchorHit {
    Absent,
    At(Range<usize>),
    Repeated(usize),
}

fn locate(content: &str, anchor: &str) -> AnchorHit {
    let mut hits = content.match_indices(anchor).map(|(idx, _)| idx);
    match (hits.next(), hits.next()) {
        (None, _) => AnchorHit::Absent,
        (Some(idx), None) => AnchorHit::At(idx..idx + anchor.len()),
        (Some(_), Some(_)) => AnchorHit::Repeated(2 + hits.count()),
    }
}

/// Apply one change to `content`, returning the new content.
pub fn apply_change(content: &str, change: &CodeChange) -> Result<String, ConcordError> {
    if let Some(anchor) = change.old_code.as_deref() {
        let replacement = change.new_code.as_deref().unwrap_or_default();
        return replace_anchor(content, anchor, replacement, &change.file);
    }
    if let Some(insert) = &change.insert {
        return insert_into_container(content, insert, &change.file);
    }
    Err(ConcordError::apply(
        &change.file,
        "edit has neither an anchor nor a container insertion",
    ))
}

/// Substitute the single occurrence of `anchor`. Validators quote files with LF
/// endings, so a multi-line anchor that misses a CRLF file is retried in CRLF form.
fn replace_anchor(
    content: &str,
    anchor: &str,
    replacement: &str,
    file: &Path,
) -> Result<String, ConcordError> {
    if anchor.is_empty() {
        return Err(ConcordError::apply(file, "anchor is empty"));
    }
    let mut hit = locate(content, anchor);
    let mut replacement = replacement.to_string();
    if matches!(hit, AnchorHit::Absent) && anchor.contains('\n') && content.contains("\r\n") {
        hit = locate(content, &anchor.replace('\n', "\r\n"));
        replacement = replacement.replace('\n', "\r\n");
    }
    let shown = truncate(anchor, MAX_ANCHOR_IN_ERROR);
    match hit {
        AnchorHit::At(range) => {
            let mut out = content.to_string();
            out.replace_range(range, &replacement);
            Ok(out)
        }
        AnchorHit::Absent => Err(ConcordError::apply(
            file,
            format!("anchor not found verbatim: {:?}", shown),
        )),
        AnchorHit::Repeated(count) => Err(ConcordError::apply(
            file,
            format!("anchor matches {} times (must be unique): {:?}", count, shown),
        )),
    }
}

fn insert_into_container(
    content: &str,
    insert: &ContainerInsert,
    file: &Path,
) -> Result<String, ConcordError> {
    match file.extension().and_then(|e| e.to_str()) {
        Some("json") => insert_json(content, insert, file),
        Some("toml") => insert_toml(content, insert, file),
        _ => Err(ConcordError::apply(
            file,
            "container insertion needs a .json or .toml file",
        )),
    }
}

fn insert_json(
    content: &str,
    insert: &ContainerInsert,
    file: &Path,
) -> Result<String, ConcordError> {
    let mut doc: Value = serde_json::from_str(content)
        .map_err(|e| ConcordError::apply(file, format!("file is not valid JSON: {}", e)))?;
    let container = doc.pointer_mut(&insert.pointer).ok_or_else(|| {
        ConcordError::apply(file, format!("container {:?} not found", insert.pointer))
    })?;
    match (container, &insert.key) {
        (Value::Object(map), Some(key)) => {
            if map.contains_key(key) {
                return Err(ConcordError::apply(
                    file,
                    format!("key {:?} already present in {:?}", key, insert.pointer),
                ));
            }
            map.insert(key.clone(), insert.value.clone());
        }
        (Value::Array(items), None) => items.push(insert.value.clone()),
        (Value::Object(_), None) => {
            return Err(ConcordError::apply(
                file,
                format!("{:?} is an object; insertion needs a key", insert.pointer),
            ))
        }
        (Value::Array(_), Some(_)) => {
            return Err(ConcordError::apply(
                file,
                format!("{:?} is an array; insertion must not name a key", insert.pointer),
            ))
        }
        _ => {
            return Err(ConcordError::apply(
                file,
                format!("{:?} is not a container", insert.pointer),
            ))
        }
    }
    let mut out = serde_json::to_string_pretty(&doc)
        .map_err(|e| ConcordError::apply(file, format!("failed to serialize JSON: {}", e)))?;
    if content.ends_with('\n') {
        out.push('\n');
    }
    Ok(out)
}

/// JSON-pointer segments with `~1` and `~0` unescaped.
fn pointer_segments(pointer: &str) -> Vec<String> {
    pointer
        .split('/')
        .skip(1)
        .map(|s| s.replace("~1", "/").replace("~0", "~"))
        .collect()
}

// Re-serializing drops comments and reorders tables; data files are expected
// to be machine-maintained.
fn insert_toml(
    content: &str,
    insert: &ContainerInsert,
    file: &Path,
) -> Result<String, ConcordError> {
    let mut doc: toml::Table = content
        .parse()
        .map_err(|e| ConcordError::apply(file, format!("file is not valid TOML: {}", e)))?;
    let value = toml::Value::try_from(&insert.value).map_err(|e| {
        ConcordError::apply(file, format!("value has no TOML representation: {}", e))
    })?;

    let not_found = || ConcordError::apply(file, format!("container {:?} not found", insert.pointer));
    let segments = pointer_segments(&insert.pointer);
    let mut cursor: &mut toml::Value = match segments.split_first() {
        None => {
            let key = insert.key.as_ref().ok_or_else(|| {
                ConcordError::apply(file, "the document root is a table; insertion needs a key")
            })?;
            if doc.contains_key(key) {
                return Err(ConcordError::apply(
                    file,
                    format!("key {:?} already present at the document root", key),
                ));
            }
            doc.insert(key.clone(), value);
            return toml::to_string(&doc)
                .map_err(|e| ConcordError::apply(file, format!("failed to serialize TOML: {}", e)));
        }
        Some((first, _)) => doc.get_mut(first).ok_or_else(not_found)?,
    };
    for segment in segments.iter().skip(1) {
        cursor = match cursor {
            toml::Value::Table(table) => table.get_mut(segment).ok_or_else(not_found)?,
            toml::Value::Array(items) => {
                let idx: usize = segment.parse().map_err(|_| not_found())?;
                items.get_mut(idx).ok_or_else(not_found)?
            }
            _ => return Err(not_found()),
        };
    }

    match (cursor, &insert.key) {
        (toml::Value::Table(table), Some(key)) => {
            if table.contains_key(key) {
                return Err(ConcordError::apply(
                    file,
                    format!("key {:?} already present in {:?}", key, insert.pointer),
                ));
            }
            table.insert(key.clone(), value);
        }
        (toml::Value::Array(items), None) => items.push(value),
        _ => {
            return Err(ConcordError::apply(
                file,
                format!(
                    "{:?} does not accept this insertion (tables need a key, arrays must not name one)",
                    insert.pointer
                ),
            ))
        }
    }
    toml::to_string(&doc)
        .map_err(|e| ConcordError::apply(file, format!("failed to serialize TOML: {}", e)))
}
