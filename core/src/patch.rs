//! In-process unified-diff applier.
//!
//! Wire-level Git operations (`merge`, `rebase`, `am`, `cherry-pick`) are
//! suspension points handled by the Git Adapter itself. This module instead
//! covers the one place the specification calls for an applier that does
//! *not* shell out to `patch` or `git apply`: turning the textual
//! `effective_diff` computed by the Merge Engine into working-tree
//! mutations, file by file, using [`diffy`].

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use thiserror::Error;

/// A single per-file diff extracted from a multi-file unified diff.
#[derive(Debug)]
struct FileDiff<'a> {
  old_path: Option<PathBuf>,
  new_path: Option<PathBuf>,
  hunk_text: &'a str,
  is_binary: bool,
}

#[derive(Error, Debug)]
pub enum PatchError {
  #[error("patch rejected for {path}: {reason}")]
  Rejected { path: String, reason: String },
  #[error("binary patch for {path} is not supported by the in-process applier")]
  BinaryUnsupported { path: String },
  #[error("I/O error applying patch to {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

type Result<T> = std::result::Result<T, PatchError>;

/// Applies a unified diff (as produced by `git diff`/`git format-patch`) to
/// the working tree rooted at `work_dir`. Does not stage changes; the
/// caller stages explicitly via the Git Adapter afterwards.
pub fn apply_unified_diff(work_dir: &Path, diff_text: &str) -> Result<()> {
  if diff_text.trim().is_empty() {
    return Ok(());
  }

  for file_diff in split_file_diffs(diff_text) {
    apply_file_diff(work_dir, &file_diff)?;
  }
  Ok(())
}

fn split_file_diffs(diff_text: &str) -> Vec<FileDiff<'_>> {
  let mut blocks = Vec::new();
  let mut starts = Vec::new();
  for (idx, _) in diff_text.match_indices("\ndiff --git ") {
    starts.push(idx + 1);
  }
  if diff_text.starts_with("diff --git ") {
    starts.insert(0, 0);
  }
  if starts.is_empty() {
    // Not a multi-file `diff --git` style diff; treat the whole input as
    // a single-file unified diff (e.g. plain `--- a\n+++ b\n@@ ...`).
    blocks.push(parse_block(diff_text));
    return blocks;
  }
  for window in starts.windows(2) {
    blocks.push(parse_block(&diff_text[window[0]..window[1]]));
  }
  let last = *starts.last().unwrap();
  blocks.push(parse_block(&diff_text[last..]));
  blocks
}

fn parse_block(block: &str) -> FileDiff<'_> {
  let mut old_path = None;
  let mut new_path = None;
  let mut hunk_start = None;
  let mut is_binary = false;

  for (line_idx, line) in block.lines().enumerate() {
    if line.starts_with("--- ") {
      old_path = strip_diff_prefix(&line[4..]);
    } else if line.starts_with("+++ ") {
      new_path = strip_diff_prefix(&line[4..]);
    } else if line.starts_with("rename from ") {
      old_path = Some(PathBuf::from(line.trim_start_matches("rename from ").trim()));
    } else if line.starts_with("rename to ") {
      new_path = Some(PathBuf::from(line.trim_start_matches("rename to ").trim()));
    } else if line.starts_with("GIT binary patch") || line.contains("Binary files ") {
      is_binary = true;
    } else if line.starts_with("@@") && hunk_start.is_none() {
      hunk_start = Some(line_idx);
    }
  }

  let hunk_text = match hunk_start {
    Some(idx) => {
      let offset: usize = block
        .lines()
        .take(idx)
        .map(|l| l.len() + 1)
        .sum();
      &block[offset..]
    }
    None => "",
  };

  FileDiff {
    old_path,
    new_path,
    hunk_text,
    is_binary,
  }
}

fn strip_diff_prefix(raw: &str) -> Option<PathBuf> {
  let raw = raw.split('\t').next().unwrap_or(raw).trim();
  if raw == "/dev/null" {
    return None;
  }
  let stripped = raw
    .strip_prefix("a/")
    .or_else(|| raw.strip_prefix("b/"))
    .unwrap_or(raw);
  Some(PathBuf::from(stripped))
}

fn apply_file_diff(work_dir: &Path, file_diff: &FileDiff<'_>) -> Result<()> {
  let display_path = file_diff
    .new_path
    .as_ref()
    .or(file_diff.old_path.as_ref())
    .map(|p| p.display().to_string())
    .unwrap_or_else(|| "<unknown>".to_string());

  if file_diff.is_binary {
    return Err(PatchError::BinaryUnsupported { path: display_path });
  }

  match (&file_diff.old_path, &file_diff.new_path) {
    (Some(old_rel), None) => {
      // Deletion.
      let old_abs = work_dir.join(old_rel);
      if old_abs.exists() {
        fs::remove_file(&old_abs).map_err(|e| PatchError::Io {
          path: old_abs.clone(),
          source: e,
        })?;
      }
      Ok(())
    }
    (None, Some(new_rel)) => {
      // Creation.
      let new_abs = work_dir.join(new_rel);
      let new_content = apply_hunks_to("", file_diff.hunk_text, &display_path)?;
      if let Some(parent) = new_abs.parent() {
        fs::create_dir_all(parent).map_err(|e| PatchError::Io {
          path: parent.to_path_buf(),
          source: e,
        })?;
      }
      fs::write(&new_abs, new_content).map_err(|e| PatchError::Io {
        path: new_abs,
        source: e,
      })?;
      Ok(())
    }
    (Some(old_rel), Some(new_rel)) => {
      let old_abs = work_dir.join(old_rel);
      let existing = fs::read_to_string(&old_abs).map_err(|e| PatchError::Io {
        path: old_abs.clone(),
        source: e,
      })?;
      let new_content = apply_hunks_to(&existing, file_diff.hunk_text, &display_path)?;
      if old_rel != new_rel {
        let new_abs = work_dir.join(new_rel);
        if let Some(parent) = new_abs.parent() {
          fs::create_dir_all(parent).map_err(|e| PatchError::Io {
            path: parent.to_path_buf(),
            source: e,
          })?;
        }
        fs::remove_file(&old_abs).map_err(|e| PatchError::Io {
          path: old_abs,
          source: e,
        })?;
        fs::write(&new_abs, new_content).map_err(|e| PatchError::Io {
          path: new_abs,
          source: e,
        })?;
      } else {
        fs::write(&old_abs, new_content).map_err(|e| PatchError::Io {
          path: old_abs,
          source: e,
        })?;
      }
      Ok(())
    }
    (None, None) => {
      debug!("empty file diff block, skipping");
      Ok(())
    }
  }
}

fn apply_hunks_to(original: &str, hunk_text: &str, display_path: &str) -> Result<String> {
  if hunk_text.trim().is_empty() {
    return Ok(original.to_string());
  }
  let patch_text = format!("--- a\n+++ b\n{hunk_text}");
  let patch = diffy::Patch::from_str(&patch_text).map_err(|e| PatchError::Rejected {
    path: display_path.to_string(),
    reason: format!("could not parse hunks: {e}"),
  })?;
  diffy::apply(original, &patch).map_err(|e| {
    warn!("patch rejected for {}: {}", display_path, e);
    PatchError::Rejected {
      path: display_path.to_string(),
      reason: e.to_string(),
    }
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn write(dir: &Path, name: &str, content: &str) {
    fs::write(dir.join(name), content).unwrap();
  }

  #[test]
  fn applies_single_file_modification() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a.txt", "line1\nline2\nline3\n");
    let diff = "diff --git a/a.txt b/a.txt\n\
                index 1111111..2222222 100644\n\
                --- a/a.txt\n\
                +++ b/a.txt\n\
                @@ -1,3 +1,3 @@\n\
                 line1\n\
                -line2\n\
                +line2-changed\n\
                 line3\n";
    apply_unified_diff(dir.path(), diff).unwrap();
    let result = fs::read_to_string(dir.path().join("a.txt")).unwrap();
    assert_eq!(result, "line1\nline2-changed\nline3\n");
  }

  #[test]
  fn applies_new_file_creation() {
    let dir = TempDir::new().unwrap();
    let diff = "diff --git a/new.txt b/new.txt\n\
                new file mode 100644\n\
                index 0000000..abcdefg\n\
                --- /dev/null\n\
                +++ b/new.txt\n\
                @@ -0,0 +1,2 @@\n\
                +hello\n\
                +world\n";
    apply_unified_diff(dir.path(), diff).unwrap();
    let result = fs::read_to_string(dir.path().join("new.txt")).unwrap();
    assert_eq!(result, "hello\nworld\n");
  }

  #[test]
  fn applies_file_deletion() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "gone.txt", "bye\n");
    let diff = "diff --git a/gone.txt b/gone.txt\n\
                deleted file mode 100644\n\
                index abcdefg..0000000\n\
                --- a/gone.txt\n\
                +++ /dev/null\n\
                @@ -1 +0,0 @@\n\
                -bye\n";
    apply_unified_diff(dir.path(), diff).unwrap();
    assert!(!dir.path().join("gone.txt").exists());
  }

  #[test]
  fn rejects_conflicting_hunk() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a.txt", "totally different\n");
    let diff = "diff --git a/a.txt b/a.txt\n\
                --- a/a.txt\n\
                +++ b/a.txt\n\
                @@ -1,3 +1,3 @@\n\
                 line1\n\
                -line2\n\
                +line2-changed\n\
                 line3\n";
    let err = apply_unified_diff(dir.path(), diff).unwrap_err();
    assert!(matches!(err, PatchError::Rejected { .. }));
  }

  #[test]
  fn empty_diff_is_a_noop() {
    let dir = TempDir::new().unwrap();
    apply_unified_diff(dir.path(), "").unwrap();
  }
}
