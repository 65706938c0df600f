//! Repair of hand-maintained JSON data files (picklists, alias tables).
//!
//! Exports from the CRM sometimes cut long string values mid-literal, leaving a line
//! with an unterminated string. Known truncations are closed with their full value.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

/// A truncated literal prefix and the value it should have been.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineFix {
    pub truncated: String,
    pub full: String,
}

impl LineFix {
    pub fn new(truncated: &str, full: &str) -> Self {
        Self {
            truncated: truncated.to_string(),
            full: full.to_string(),
        }
    }
}

/// Truncations observed in the brand picklist export.
pub fn default_fixes() -> Vec<LineFix> {
    vec![
        LineFix::new("CAPITAL LIGHTING FIXTURE C", "CAPITAL LIGHTING FIXTURE COMPANY"),
        LineFix::new("HOME DECORATORS COLLECTION", "HOME DECORATORS COLLECTION"),
        LineFix::new("DCS by FISHER &amp; PAYKEL", "DCS by FISHER & PAYKEL"),
        LineFix::new("Mountain Plumbing Products", "Mountain Plumbing Products"),
        LineFix::new("HOME REFINEMENTS BY JULIEN", "HOME REFINEMENTS BY JULIEN"),
        LineFix::new("CHARLOTTE PIPE AND FOUNDRY", "CHARLOTTE PIPE AND FOUNDRY"),
        LineFix::new("METROPOLITAN LIGHTING FIXT", "METROPOLITAN LIGHTING FIXTURES"),
        LineFix::new("WATTS MUELLER STEAM SPECIA", "WATTS MUELLER STEAM SPECIALTIES"),
        LineFix::new("Preferred Bath Accessories", "Preferred Bath Accessories"),
    ]
}

/// Load a fix table: either `[{"truncated": .., "full": ..}]` or `{"truncated": "full"}`.
pub fn load_fixes(path: &Path) -> Result<Vec<LineFix>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read fix table {}", path.display()))?;
    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("Fix table {} is not valid JSON", path.display()))?;
    match value {
        Value::Array(_) => Ok(serde_json::from_value(value)?),
        Value::Object(map) => map
            .into_iter()
            .map(|(truncated, full)| match full {
                Value::String(full) => Ok(LineFix { truncated, full }),
                other => Err(anyhow!("fix for '{}' must be a string, got {}", truncated, other)),
            })
            .collect(),
        other => Err(anyhow!("fix table must be an array or object, got {}", other)),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairReport {
    pub path: PathBuf,
    pub lines_repaired: usize,
    pub entities_unescaped: usize,
    /// Array length or object key count of the repaired document.
    pub entries: usize,
}

/// Text-level repair. Returns the repaired text, repaired line count and unescaped entity count.
pub fn repair_text(content: &str, fixes: &[LineFix]) -> (String, usize, usize) {
    let lines: Vec<&str> = content.lines().collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    let mut repaired = 0usize;

    for (idx, line) in lines.iter().enumerate() {
        let indent_len = line.len() - line.trim_start().len();
        let body = line.trim();
        let fix = fixes
            .iter()
            .find(|fix| is_unterminated(body) && body == format!("\"{}", fix.truncated));
        let Some(fix) = fix else {
            out.push(line.to_string());
            continue;
        };
        let next_closes = lines[idx + 1..]
            .iter()
            .map(|l| l.trim())
            .find(|l| !l.is_empty())
            .map(|l| l.starts_with(']') || l.starts_with('}'))
            .unwrap_or(true);
        let separator = if next_closes { "" } else { "," };
        out.push(format!(
            "{}{}{}",
            &line[..indent_len],
            Value::String(fix.full.clone()),
            separator
        ));
        repaired += 1;
    }

    let mut text = out.join("\n");
    if content.ends_with('\n') {
        text.push('\n');
    }
    let entities = text.matches("&amp;").count();
    (text.replace("&amp;", "&"), repaired, entities)
}

/// A line whose string literal never closes.
fn is_unterminated(body: &str) -> bool {
    if !body.starts_with('"') {
        return false;
    }
    let mut escaped = false;
    for ch in body.chars().skip(1) {
        if escaped {
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else if ch == '"' {
            return false;
        }
    }
    true
}

/// Repair `path` in place. The file is left untouched when the result does not parse.
pub fn repair_file(path: &Path, fixes: &[LineFix]) -> Result<RepairReport> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let (repaired, lines_repaired, entities_unescaped) = repair_text(&content, fixes);
    let data: Value = serde_json::from_str(&repaired)
        .with_context(|| format!("{} is still not valid JSON after repair", path.display()))?;
    let entries = match &data {
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        _ => 1,
    };
    let pretty = serde_json::to_string_pretty(&data)?;
    fs::write(path, pretty).with_context(|| format!("Failed to write {}", path.display()))?;
    tracing::info!(
        path = %path.display(),
        lines_repaired,
        entities_unescaped,
        entries,
        "data file repaired"
    );
    Ok(RepairReport {
        path: path.to_path_buf(),
        lines_repaired,
        entities_unescaped,
        entries,
    })
}
