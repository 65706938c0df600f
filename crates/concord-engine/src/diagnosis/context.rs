use concord_core::settings::DiagnosisSettings;
use concord_core::{ContextExcerpt, DiagnosedIssue, DiagnosisContext, SourceAccessor};
use std::path::PathBuf;

/// Collect excerpts of the configured context files (alias tables, schema mappers).
///
/// A configured path that is not a file is listed as a directory. Each excerpt is
/// centred on the first mention of a missing field, or is the head of the file.
pub fn gather_context(
    source: &dyn SourceAccessor,
    settings: &DiagnosisSettings,
    issue: &DiagnosedIssue,
) -> DiagnosisContext {
    let mut paths: Vec<PathBuf> = Vec::new();
    for configured in &settings.context_files {
        if source.exists(configured) {
            paths.push(configured.clone());
            continue;
        }
        match source.list_files(configured) {
            Ok(listed) => paths.extend(listed),
            Err(err) => {
                tracing::debug!(path = %configured.display(), error = %err, "context path skipped")
            }
        }
    }
    paths.dedup();

    let excerpts = paths
        .into_iter()
        .filter_map(|path| match source.read_file(&path) {
            Ok(content) => Some(ContextExcerpt {
                excerpt: excerpt_around(
                    &content,
                    &issue.missing_fields,
                    settings.context_excerpt_chars,
                ),
                path,
            }),
            Err(err) => {
                tracing::debug!(path = %path.display(), error = %err, "context file unreadable");
                None
            }
        })
        .collect();
    DiagnosisContext { excerpts }
}

fn excerpt_around(content: &str, needles: &[String], max_chars: usize) -> String {
    let chars: Vec<char> = content.chars().collect();
    if chars.len() <= max_chars {
        return content.to_string();
    }
    let lower = content.to_lowercase();
    let hit = needles
        .iter()
        .filter(|n| !n.trim().is_empty())
        .filter_map(|n| lower.find(&n.to_lowercase()))
        .min();
    let start = match hit {
        // Lowercasing can change byte lengths; position by char count.
        Some(byte_idx) => lower[..byte_idx].chars().count().saturating_sub(max_chars / 2),
        None => 0,
    };
    let start = start.min(chars.len().saturating_sub(max_chars));
    chars[start..start + max_chars].iter().collect()
}
