//! Top-level commands: everything that isn't a step of the Merge or Pull
//! Engine lives here — setting up the four work branches the first time,
//! tearing them down, rebuilding the whole repository from an arbitrary
//! point in the patch-series history, bootstrapping from a remote clone,
//! reporting what's out of sync, and folding local changes back into the
//! patch series outside of a `merge`/`pull`.

use std::fs;

use log::info;

use crate::config;
use crate::git::GitRepo;
use crate::merge::{self, finish_successfully};
use crate::series;
use crate::{BranchNames, GitumError, Result, CONFIG_BRANCH, UPSTREAM_COMMIT_FILE};

/// Sets up the four work branches (`upstream`, `rebased`, `mainline`,
/// `patches`) in a repository that currently holds just the code to
/// track, renaming the current branch to `upstream` if nothing by that
/// name exists yet. Writes a `gitum-config` branch only when any branch
/// name deviates from the defaults.
pub fn create(repo: &GitRepo, remote: &str, names: &BranchNames) -> Result<()> {
  let defaults = BranchNames::default();
  let custom = names.upstream != defaults.upstream
    || names.rebased != defaults.rebased
    || names.mainline != defaults.mainline
    || names.patches != defaults.patches;

  if repo.has_branch(&names.mainline)? {
    return Err(GitumError::BranchExists(names.mainline.clone()));
  }
  if repo.has_branch(&names.rebased)? {
    return Err(GitumError::BranchExists(names.rebased.clone()));
  }
  if repo.has_branch(&names.patches)? {
    return Err(GitumError::BranchExists(names.patches.clone()));
  }
  if custom && repo.has_branch(CONFIG_BRANCH)? {
    return Err(GitumError::BranchExists(CONFIG_BRANCH.to_string()));
  }

  if !repo.has_branch(&names.upstream)? {
    repo.run(&["branch", "-m", &names.upstream])?;
  }
  repo.checkout(&names.upstream, false)?;
  repo.branch(&names.mainline, None)?;
  repo.branch(&names.rebased, None)?;
  series::save_patches(repo, &names.patches, &names.upstream)?;

  if custom {
    config::save_branch_names(repo, names)?;
  }
  config::save_mbranch(repo, remote)?;

  repo.checkout(&names.rebased, false)?;
  config::save_current_rebased(repo, &names.rebased)?;
  config::save_current_mainline(repo, &names.mainline)?;
  info!("Successfully created work branches.");
  Ok(())
}

/// Deletes the four work branches and (if present) `gitum-config`.
/// Absence of any one of them is not an error.
pub fn remove_branches(repo: &GitRepo, names: &BranchNames) -> Result<()> {
  if repo.has_branch(&names.upstream)? {
    repo.checkout(&names.upstream, true)?;
  }
  if repo.has_branch(&names.mainline)? {
    repo.delete_head(&names.mainline, true)?;
  }
  if repo.has_branch(&names.rebased)? {
    repo.delete_head(&names.rebased, true)?;
  }
  if repo.has_branch(&names.patches)? {
    repo.delete_head(&names.patches, true)?;
  }
  if repo.has_branch(CONFIG_BRANCH)? {
    repo.delete_head(CONFIG_BRANCH, true)?;
  }
  info!("Successfully removed work branches.");
  Ok(())
}

/// Removes the flat `.git/.gitum-*` bookkeeping files, leaving branches
/// untouched.
pub fn remove_config_files(repo: &GitRepo) -> Result<()> {
  config::remove_all_config_files(repo)?;
  info!("Successfully removed configuration files.");
  Ok(())
}

/// `remove_branches` followed by `remove_config_files`.
pub fn remove_all(repo: &GitRepo, names: &BranchNames) -> Result<()> {
  remove_branches(repo, names)?;
  remove_config_files(repo)
}

fn read_work_tree_file(repo: &GitRepo, name: &str) -> Result<String> {
  let path = repo.work_tree().join(name);
  let content = fs::read_to_string(&path).map_err(|e| GitumError::Io { source: e, path: path.clone() })?;
  if content.lines().count() > 1 {
    return Err(GitumError::BrokenRepo {
      branch: name.to_string(),
      reason: "expected a single line".to_string(),
    });
  }
  Ok(content.trim().to_string())
}

/// Rebuilds the repository from an earlier point in the `patches` branch
/// history. With `rebased_only`, only `rebased` is rebuilt (via
/// [`series::gen_rebased`]); otherwise `upstream`, `mainline`, and
/// `rebased` are all reconstructed by replaying the patch-series commits
/// between the stack's `gitum-patches: begin` seed and `commit`.
pub fn restore(repo: &GitRepo, names: &BranchNames, commit: Option<&str>, rebased_only: bool) -> Result<()> {
  let commit_ref = commit.unwrap_or(&names.patches).to_string();

  if rebased_only {
    series::gen_rebased(repo, names, Some(&commit_ref))?;
    config::save_current_rebased(repo, &names.rebased)?;
    info!("Successfully restored {} branch.", names.rebased);
    return Ok(());
  }

  let history = repo.log_with_subject(&commit_ref)?;
  let mut commits = Vec::new();
  let mut found_begin = false;
  for (sha, subject) in history {
    commits.push(sha);
    if subject.starts_with("gitum-patches: begin") {
      found_begin = true;
      break;
    }
  }
  if !found_begin {
    return Err(GitumError::BrokenRepo {
      branch: names.patches.clone(),
      reason: "no gitum-patches: begin commit found in history".to_string(),
    });
  }
  commits.reverse();
  let begin = commits.remove(0);

  repo.checkout(&begin, true)?;
  let mut upstream_commit = read_work_tree_file(repo, UPSTREAM_COMMIT_FILE)?;
  repo.checkout(&upstream_commit, true)?;

  let staging = tempfile::TempDir::new().map_err(|e| GitumError::Io {
    source: e,
    path: std::env::temp_dir(),
  })?;
  let mut saved_commit_id = repo.rev_parse("HEAD")?;

  for step in &commits {
    repo.checkout(step, true)?;
    for path in fs::read_dir(repo.work_tree())
      .map_err(|e| GitumError::Io { source: e, path: repo.work_tree().to_path_buf() })?
      .filter_map(|entry| entry.ok())
      .map(|entry| entry.path())
      .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("patch"))
    {
      let name = path.file_name().expect("listed file has a name");
      fs::copy(&path, staging.path().join(name)).map_err(|e| GitumError::Io { source: e, path: path.clone() })?;
    }
    let current_patch = read_work_tree_file(repo, crate::LAST_PATCH_FILE)?;
    let staged_current = staging.path().join(crate::LAST_PATCH_FILE);
    fs::write(&staged_current, &current_patch).map_err(|e| GitumError::Io { source: e, path: staged_current.clone() })?;
    upstream_commit = read_work_tree_file(repo, UPSTREAM_COMMIT_FILE)?;

    repo.checkout(&saved_commit_id, true)?;
    if !current_patch.trim().is_empty() {
      repo.am(current_patch.as_bytes(), &[])?;
    }
    let _ = fs::remove_file(&staged_current);
    saved_commit_id = repo.rev_parse("HEAD")?;
  }

  if repo.has_branch(&names.mainline)? {
    repo.delete_head(&names.mainline, true)?;
  }
  repo.branch(&names.mainline, None)?;

  repo.checkout(&upstream_commit, true)?;
  if repo.has_branch(&names.upstream)? {
    repo.delete_head(&names.upstream, true)?;
  }
  repo.branch(&names.upstream, None)?;

  if repo.has_branch(&names.rebased)? {
    repo.delete_head(&names.rebased, true)?;
  }
  repo.branch(&names.rebased, None)?;
  repo.checkout(&names.rebased, false)?;

  let mut remaining: Vec<_> = fs::read_dir(staging.path())
    .map_err(|e| GitumError::Io { source: e, path: staging.path().to_path_buf() })?
    .filter_map(|entry| entry.ok())
    .map(|entry| entry.path())
    .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("patch"))
    .collect();
  remaining.sort();
  for path in remaining {
    let bytes = fs::read(&path).map_err(|e| GitumError::Io { source: e, path: path.clone() })?;
    if !bytes.is_empty() {
      repo.am(&bytes, &[])?;
    }
  }

  config::save_current_rebased(repo, &names.rebased)?;
  config::save_current_mainline(repo, &names.mainline)?;
  info!("Successfully restored work branches to the {} commit from {} branch.", commit_ref, names.patches);
  Ok(())
}

/// Bootstraps a freshly `git init`-ed repository from a remote gitum
/// clone: adds `origin`, fetches it, checks out `gitum-config` if the
/// remote carries one, then checks out `upstream`/`patches`/`mainline`
/// and reconstructs `rebased` from the fetched patch stack.
pub fn clone(repo: &GitRepo, remote_repo: &str) -> Result<()> {
  if remote_repo.is_empty() {
    return Err(GitumError::NoGitumRemote);
  }
  repo.remote_add("origin", remote_repo)?;
  repo.fetch("origin")?;

  if repo
    .run(&["rev-parse", "--verify", "--quiet", &format!("refs/remotes/origin/{CONFIG_BRANCH}")])
    .is_ok()
  {
    repo.checkout_new_branch(CONFIG_BRANCH, &format!("origin/{CONFIG_BRANCH}"))?;
  }

  let names = config::load_branch_names(repo)?;
  repo.checkout_new_branch(&names.upstream, &format!("origin/{}", names.upstream))?;
  repo.checkout_new_branch(&names.patches, &format!("origin/{}", names.patches))?;
  repo.checkout_new_branch(&names.mainline, &format!("origin/{}", names.mainline))?;
  config::save_remote(repo, "origin", None)?;

  series::gen_rebased(repo, &names, None)?;
  config::save_current_rebased(repo, &names.rebased)?;
  config::save_current_mainline(repo, &names.mainline)?;
  info!("Repository from {} was cloned into {}.", remote_repo, repo.work_tree().display());
  Ok(())
}

/// Reports whether the rebased stack is in sync with the last recorded
/// state: nothing to do, new commits ready to fold in via `update`, or an
/// existing patch that was edited in place (shown as a diff).
pub fn status(repo: &GitRepo, names: &BranchNames) -> Result<()> {
  let diff = repo.diff(&names.mainline, &names.rebased, true)?;
  let recorded_rebased = config::load_current_rebased(repo)?;
  config::check_mainline_unchanged(repo, &names.mainline)?;
  let actual_rebased = repo.rev_parse(&names.rebased)?;

  if recorded_rebased.as_deref() == Some(actual_rebased.as_str()) {
    info!("Nothing to update.");
    return Ok(());
  }

  let ca = match &recorded_rebased {
    Some(r) => repo.merge_base(r, &names.rebased)?,
    None => String::new(),
  };

  if recorded_rebased.as_deref() == Some(ca.as_str()) {
    info!("Have new commits, run gitum update to save them:");
    for sha in repo.iter_commits(&format!("{ca}..{}", names.rebased))? {
      let meta = repo.commit_meta(&sha)?;
      info!("\t{}", meta.message.lines().next().unwrap_or(""));
    }
  } else {
    info!("Existing patches were modified.");
    info!("Run gitum update to save the result diff:\n{diff}");
  }
  Ok(())
}

/// Folds changes made directly on `rebased` back into the patch series:
/// commits that sit cleanly on top of the last recorded point are
/// cherry-picked onto `mainline` one at a time; otherwise the whole
/// result diff between `mainline` and `rebased` is committed as a single
/// step.
pub fn update(repo: &GitRepo, names: &BranchNames, message: Option<&str>) -> Result<()> {
  if repo.is_dirty()? {
    return Err(GitumError::RepoIsDirty);
  }
  config::check_mainline_unchanged(repo, &names.mainline)?;

  let current_rebased = config::load_current_rebased(repo)?;
  let actual_rebased = repo.rev_parse(&names.rebased)?;
  if current_rebased.as_deref() == Some(actual_rebased.as_str()) {
    info!("Nothing to update.");
    return Ok(());
  }

  let diff = repo.diff(&names.mainline, &names.rebased, true)?;
  let ca = match &current_rebased {
    Some(r) => repo.merge_base(r, &names.rebased)?,
    None => String::new(),
  };

  if current_rebased.as_deref() == Some(ca.as_str()) {
    let mainline_commit = if diff.is_empty() { None } else { Some(names.mainline.as_str()) };
    for sha in repo.iter_commits(&format!("{ca}..{}", names.rebased))? {
      let meta = repo.commit_meta(&sha)?;
      info!("Applying commit: {}", meta.message.lines().next().unwrap_or(""));
      repo.checkout(&names.mainline, false)?;
      repo.cherry_pick(&sha)?;
      series::save_repo_state(repo, names, mainline_commit, message, Some(sha.as_str()))?;
    }
  } else if !diff.is_empty() {
    info!("Applying result diff between {} and {}", names.mainline, names.rebased);
    let interactive = message.is_none();
    merge::stage3(repo, names, "update current", &diff, interactive, message)?;
    series::save_repo_state(repo, names, Some(names.mainline.as_str()), message, None)?;
  }

  finish_successfully(repo, names)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn init_repo() -> (tempfile::TempDir, GitRepo) {
    let dir = tempfile::TempDir::new().unwrap();
    let repo = GitRepo::new(dir.path());
    repo.run(&["init", "-q"]).unwrap();
    repo.run(&["config", "user.email", "test@example.com"]).unwrap();
    repo.run(&["config", "user.name", "Test"]).unwrap();
    (dir, repo)
  }

  #[test]
  fn create_sets_up_four_work_branches() {
    let (dir, repo) = init_repo();
    fs::write(dir.path().join("a.txt"), "a\n").unwrap();
    repo.add_all().unwrap();
    repo.commit("initial", None).unwrap();

    let names = BranchNames::default();
    create(&repo, "origin", &names).unwrap();

    assert!(repo.has_branch(&names.upstream).unwrap());
    assert!(repo.has_branch(&names.mainline).unwrap());
    assert!(repo.has_branch(&names.rebased).unwrap());
    assert!(repo.has_branch(&names.patches).unwrap());
    assert!(!repo.has_branch(CONFIG_BRANCH).unwrap());
  }

  #[test]
  fn create_twice_reports_branch_already_exists() {
    let (dir, repo) = init_repo();
    fs::write(dir.path().join("a.txt"), "a\n").unwrap();
    repo.add_all().unwrap();
    repo.commit("initial", None).unwrap();
    let names = BranchNames::default();
    create(&repo, "origin", &names).unwrap();
    let err = create(&repo, "origin", &names).unwrap_err();
    assert!(matches!(err, GitumError::BranchExists(_)));
  }

  #[test]
  fn remove_all_clears_branches_and_config_files() {
    let (dir, repo) = init_repo();
    fs::write(dir.path().join("a.txt"), "a\n").unwrap();
    repo.add_all().unwrap();
    repo.commit("initial", None).unwrap();
    let names = BranchNames::default();
    create(&repo, "origin", &names).unwrap();

    remove_all(&repo, &names).unwrap();
    assert!(!repo.has_branch(&names.mainline).unwrap());
    assert!(!repo.has_branch(&names.rebased).unwrap());
    assert!(!repo.has_branch(&names.patches).unwrap());
    assert!(config::load_current_rebased(&repo).unwrap().is_none());
  }

  #[test]
  fn status_on_freshly_created_repo_reports_nothing_to_update() {
    let (dir, repo) = init_repo();
    fs::write(dir.path().join("a.txt"), "a\n").unwrap();
    repo.add_all().unwrap();
    repo.commit("initial", None).unwrap();
    let names = BranchNames::default();
    create(&repo, "origin", &names).unwrap();
    status(&repo, &names).unwrap();
  }
}
