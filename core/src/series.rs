//! Patch-Series Store.
//!
//! The `patches` branch's *tree*, not its history, encodes the current
//! state of the rebased stack: one `NNNN-*.patch` file per commit between
//! `upstream` and `rebased`, a `_current_patch_` file holding the last
//! mainline step's patch (empty when that step carried no code change),
//! and an `_upstream_commit_` file recording the upstream tip the series
//! was generated against. Each commit on `patches` is therefore a
//! self-contained snapshot; [`gen_rebased`] reconstructs `rebased` from
//! any one of them.

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use tempfile::TempDir;

use crate::git::GitRepo;
use crate::{BranchNames, GitumError, Result, LAST_PATCH_FILE, UPSTREAM_COMMIT_FILE};

fn list_patch_files(dir: &Path) -> Result<Vec<PathBuf>> {
  let mut files: Vec<PathBuf> = fs::read_dir(dir)
    .map_err(|e| GitumError::Io {
      source: e,
      path: dir.to_path_buf(),
    })?
    .filter_map(|entry| entry.ok())
    .map(|entry| entry.path())
    .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("patch"))
    .collect();
  // Lexical order, not directory-listing order: NNNN-*.patch sorts
  // correctly by filename, which is all the invariant requires.
  files.sort();
  Ok(files)
}

fn move_patch_files(from: &Path, to: &Path) -> Result<()> {
  for path in list_patch_files(from)? {
    let name = path.file_name().expect("listed file has a name");
    let dest = to.join(name);
    fs::rename(&path, &dest).map_err(|e| GitumError::Io { source: e, path: dest })?;
  }
  Ok(())
}

/// Seeds the `patches` branch with a single commit recording the upstream
/// tip at `create` time. Mirrors the original tool's initial
/// `gitum-patches: begin` commit.
pub fn save_patches(repo: &GitRepo, patches_branch: &str, upstream_branch: &str) -> Result<()> {
  let upstream_sha = repo.rev_parse(upstream_branch)?;
  let blob = repo.hash_object_write(upstream_sha.as_bytes())?;
  let tree = repo.mktree_single(UPSTREAM_COMMIT_FILE, &blob)?;
  let commit = repo.commit_tree(&tree, "gitum-patches: begin")?;
  repo.branch(patches_branch, Some(&commit))?;
  Ok(())
}

/// Snapshots the current patch stack onto the `patches` branch.
///
/// `mainline_commit` is the mainline commit this step produced (`None`
/// when called from a context with no single originating commit, such as
/// `update`'s whole-diff path). `cur_rebased` overrides the branch used
/// for the "current stack" side of the equality check, used while a
/// multi-commit `pull` is still walking its commit list.
pub fn save_repo_state(
  repo: &GitRepo,
  names: &BranchNames,
  mainline_commit: Option<&str>,
  message: Option<&str>,
  cur_rebased: Option<&str>,
) -> Result<()> {
  let rebased_ref = cur_rebased.unwrap_or(&names.rebased);
  let mainline_ref = mainline_commit.unwrap_or(&names.mainline);

  if !repo.diff(rebased_ref, mainline_ref, false)?.is_empty() {
    return Err(GitumError::NotUptodate {
      rebased: rebased_ref.to_string(),
      mainline: mainline_ref.to_string(),
    });
  }

  let staging = TempDir::new().map_err(|e| GitumError::Io {
    source: e,
    path: std::env::temp_dir(),
  })?;

  let stack_patches = repo.format_patch(&format!("{}..{}", names.upstream, rebased_ref), repo.work_tree())?;
  move_patch_files(repo.work_tree(), staging.path())?;
  debug!("staged {} patch file(s) for the rebased stack", stack_patches.len());

  let current_patch_path = staging.path().join(LAST_PATCH_FILE);
  if let Some(commit) = mainline_commit {
    let single = repo.format_patch(&format!("{commit}^..{commit}"), repo.work_tree())?;
    for name in &single {
      fs::rename(repo.work_tree().join(name), &current_patch_path).map_err(|e| GitumError::Io {
        source: e,
        path: current_patch_path.clone(),
      })?;
    }
  } else {
    fs::write(&current_patch_path, b"").map_err(|e| GitumError::Io {
      source: e,
      path: current_patch_path.clone(),
    })?;
  }

  repo.checkout(&names.patches, true)?;
  repo.rm_ignore_unmatch("*.patch")?;

  for path in list_patch_files(staging.path())? {
    let name = path.file_name().expect("listed file has a name");
    let dest = repo.work_tree().join(name);
    fs::rename(&path, &dest).map_err(|e| GitumError::Io { source: e, path: dest })?;
  }
  let dest_current = repo.work_tree().join(LAST_PATCH_FILE);
  fs::rename(&current_patch_path, &dest_current).map_err(|e| GitumError::Io {
    source: e,
    path: dest_current,
  })?;

  let upstream_sha = repo.rev_parse(&names.upstream)?;
  let upstream_commit_path = repo.work_tree().join(UPSTREAM_COMMIT_FILE);
  fs::write(&upstream_commit_path, &upstream_sha).map_err(|e| GitumError::Io {
    source: e,
    path: upstream_commit_path,
  })?;

  repo.add_all()?;

  match (message, mainline_commit) {
    (Some(msg), _) => repo.commit(msg, None)?,
    (None, Some(commit)) => {
      let meta = repo.commit_meta(commit)?;
      repo.commit(&meta.message, Some((&meta.author_name, &meta.author_email)))?;
    }
    (None, None) => {
      repo.commit(&format!("{} branch updated without code changes", names.rebased), None)?;
    }
  }

  Ok(())
}

/// Rebuilds the `rebased` branch from the patch stack recorded in the
/// `patches` branch commit `commit` (defaults to the branch's tip):
/// checkout `_upstream_commit_`, then `git am` every `NNNN-*.patch` file
/// in lexical order.
pub fn gen_rebased(repo: &GitRepo, names: &BranchNames, commit: Option<&str>) -> Result<()> {
  let commit_ref = commit.unwrap_or(&names.patches);
  repo.checkout(commit_ref, true)?;

  let staging = TempDir::new().map_err(|e| GitumError::Io {
    source: e,
    path: std::env::temp_dir(),
  })?;
  move_patch_files(repo.work_tree(), staging.path())?;

  let upstream_sha = String::from_utf8_lossy(&repo.show_blob(commit_ref, UPSTREAM_COMMIT_FILE)?)
    .trim()
    .to_string();

  if repo.has_branch(&names.rebased)? {
    repo.delete_head(&names.rebased, true)?;
  }
  repo.checkout_new_branch(&names.rebased, &upstream_sha)?;

  for path in list_patch_files(staging.path())? {
    let bytes = fs::read(&path).map_err(|e| GitumError::Io {
      source: e,
      path: path.clone(),
    })?;
    if !bytes.is_empty() {
      repo.am(&bytes, &[])?;
    }
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;

  fn init_repo() -> (tempfile::TempDir, GitRepo) {
    let dir = tempfile::TempDir::new().unwrap();
    let repo = GitRepo::new(dir.path());
    repo.run(&["init", "-q"]).unwrap();
    repo.run(&["config", "user.email", "test@example.com"]).unwrap();
    repo.run(&["config", "user.name", "Test"]).unwrap();
    (dir, repo)
  }

  #[test]
  fn save_patches_seeds_a_single_commit_branch() {
    let (dir, repo) = init_repo();
    fs::write(dir.path().join("seed.txt"), "seed\n").unwrap();
    repo.add_all().unwrap();
    repo.commit("seed", None).unwrap();
    repo.branch("upstream", None).unwrap();

    save_patches(&repo, "patches", "upstream").unwrap();
    assert!(repo.has_branch("patches").unwrap());
    let blob = repo.show_blob("patches", UPSTREAM_COMMIT_FILE).unwrap();
    let upstream_sha = repo.rev_parse("upstream").unwrap();
    assert_eq!(String::from_utf8_lossy(&blob), upstream_sha);
  }

  #[test]
  fn gen_rebased_reconstructs_from_empty_patch_stack() {
    let (dir, repo) = init_repo();
    fs::write(dir.path().join("seed.txt"), "seed\n").unwrap();
    repo.add_all().unwrap();
    repo.commit("seed", None).unwrap();
    repo.branch("upstream", None).unwrap();
    save_patches(&repo, "patches", "upstream").unwrap();

    let names = BranchNames {
      upstream: "upstream".into(),
      rebased: "rebased".into(),
      mainline: "mainline".into(),
      patches: "patches".into(),
    };
    gen_rebased(&repo, &names, None).unwrap();
    assert!(repo.has_branch("rebased").unwrap());
    assert_eq!(repo.rev_parse("rebased").unwrap(), repo.rev_parse("upstream").unwrap());
  }
}
