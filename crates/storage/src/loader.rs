use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::warn;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::SopDocument;

/// Reads every `.md` / `.txt` file under `root` as an SOP document.
///
/// The id is the lowercased file stem; the title is the first `# ` heading,
/// or the stem when the file has none. Unreadable files are skipped.
pub fn load_sop_dir(root: impl AsRef<Path>) -> Result<Vec<SopDocument>> {
    let root = root.as_ref();
    if !root.is_dir() {
        anyhow::bail!("SOP directory {} does not exist", root.display());
    }

    let mut documents = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.with_context(|| format!("failed walking {}", root.display()))?;
        let path = entry.path();
        if !entry.file_type().is_file() || !is_document(path) {
            continue;
        }

        let body = match fs::read_to_string(path) {
            Ok(body) => body,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping unreadable SOP file");
                continue;
            }
        };

        let stem = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or_default()
            .to_string();
        let title = body
            .lines()
            .find_map(|line| line.trim().strip_prefix("# "))
            .map(|heading| heading.trim().to_string())
            .unwrap_or_else(|| stem.clone());

        documents.push(SopDocument::new(stem.to_lowercase(), title, body.trim()));
    }

    Ok(documents)
}

fn is_document(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("md") || ext.eq_ignore_ascii_case("txt"))
        .unwrap_or(false)
}

/// Slug used for uploaded documents that arrive without an id.
pub fn sop_id_from_title(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for ch in title.trim().chars() {
        if ch.is_alphanumeric() {
            slug.extend(ch.to_lowercase());
        } else if !slug.ends_with('_') && !slug.is_empty() {
            slug.push('_');
        }
    }
    let slug = slug.trim_end_matches('_').to_string();

    if slug.is_empty() {
        Uuid::new_v4().to_string()
    } else {
        slug
    }
}
