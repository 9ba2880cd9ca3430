//! Pull Engine — reconciles local patch-series commits made since the
//! last sync against a remote clone's advanced `upstream`/`patches`/
//! `mainline` branches, then `push` sends the local state back out.
//!
//! Unlike the Merge Engine, a suspended pull always resumes the same
//! fixed recovery sequence regardless of where it stopped, so no
//! per-stage state is tracked beyond the plain commit queue.

use log::info;

use crate::config;
use crate::git::GitRepo;
use crate::merge::{capture_branch_tips, finish_successfully};
use crate::series;
use crate::{BranchNames, GitumError, OperationState, Result, SavedBranches, Stage, CONFIG_BRANCH, LAST_PATCH_FILE, UPSTREAM_COMMIT_FILE};

fn fixup_pull_message(message: &str) -> String {
  message
    .replace("git am --resolved", "gitum pull --resolved")
    .replace("git am --abort", "gitum pull --abort")
    .replace("git am --skip", "gitum pull --skip")
}

fn shape_pull_error(err: GitumError) -> GitumError {
  match err {
    GitumError::GitCommand { stdout, stderr, .. } => GitumError::RebaseFailed {
      message: fixup_pull_message(&format!("{stdout}{stderr}")),
    },
    other => other,
  }
}

fn commit_subject_from_patch(patch_text: &str) -> String {
  for line in patch_text.lines() {
    if let Some(subject) = line.strip_prefix("Subject: [PATCH] ") {
      return subject.to_string();
    }
  }
  String::new()
}

fn resolve_remote(repo: &GitRepo, remote: Option<&str>, track_with: bool) -> Result<String> {
  let remote = match remote {
    Some(r) => r.to_string(),
    None => config::load_remote(repo)?.remote,
  };
  if track_with {
    config::save_remote(repo, &remote, None)?;
  }
  Ok(remote)
}

fn pull_one_commit(repo: &GitRepo, names: &BranchNames, commit: &str) -> Result<()> {
  let patch_bytes = repo.show_blob(commit, LAST_PATCH_FILE)?;
  if !patch_bytes.is_empty() {
    let subject = commit_subject_from_patch(&String::from_utf8_lossy(&patch_bytes));
    info!("Applying commit: {}", subject);
    repo.am(&patch_bytes, &["-3"])?;
    repo.checkout(&names.rebased, false)?;
    repo.cherry_pick(&names.mainline)?;
    series::save_repo_state(repo, names, Some(names.mainline.as_str()), None, None)?;
  }
  repo.checkout(&names.upstream, false)?;
  let upstream_commit = String::from_utf8_lossy(&repo.show_blob(commit, UPSTREAM_COMMIT_FILE)?)
    .trim()
    .to_string();
  repo.merge(&upstream_commit)?;
  repo.checkout(&names.mainline, false)?;
  Ok(())
}

fn run_pull_commits(
  repo: &GitRepo,
  names: &BranchNames,
  saved: SavedBranches,
  commits: &[String],
  total: usize,
  mut consumed: usize,
) -> Result<()> {
  let mut idx = 0;
  while idx < commits.len() {
    let commit = &commits[idx];
    match pull_one_commit(repo, names, commit) {
      Ok(()) => {
        consumed += 1;
        idx += 1;
      }
      Err(e) => {
        let state = OperationState {
          saved: saved.clone(),
          stage: Stage::Start,
          total,
          consumed,
          remaining_commits: commits[idx..].to_vec(),
        };
        config::save_state(repo, &state)?;
        return Err(shape_pull_error(e));
      }
    }
  }
  Ok(())
}

/// Fetches `remote`, hard-resets `upstream`/`patches`/`mainline` to its
/// tips, reconstructs `rebased` from the new patch stack, then replays
/// every locally-made patch-series step recorded since the last sync on
/// top of the new baseline.
pub fn pull(repo: &GitRepo, names: &BranchNames, remote: Option<&str>, track_with: bool) -> Result<()> {
  config::check_mainline_unchanged(repo, &names.mainline)?;
  let remote = resolve_remote(repo, remote, track_with)?;
  let saved = capture_branch_tips(repo, names)?;

  let cur = repo.rev_parse(&names.patches)?;
  repo.fetch(&remote)?;
  repo.checkout(&names.upstream, true)?;
  repo.reset_hard(&format!("{remote}/{}", names.upstream))?;
  repo.checkout(&names.patches, true)?;
  repo.reset_hard(&format!("{remote}/{}", names.patches))?;
  repo.checkout(&names.mainline, true)?;
  repo.reset_hard(&format!("{remote}/{}", names.mainline))?;
  series::gen_rebased(repo, names, None)?;
  info!("Reset work branches to the remote state, applying our commits on top...");
  repo.checkout(&names.mainline, false)?;

  let previd = repo.merge_base(&format!("{remote}/{}", names.patches), &cur)?;
  let commits = repo.iter_commits(&format!("{previd}..{cur}"))?;
  let total = commits.len();
  run_pull_commits(repo, names, saved, &commits, total, 0)?;
  finish_successfully(repo, names)
}

/// Resumes a suspended `pull` by finishing its `git am` (`--resolved`,
/// `--skip`, or `--abort`) and continuing the remaining commit queue.
pub fn continue_pull(repo: &GitRepo, names: &BranchNames, command: &str) -> Result<()> {
  let state = config::load_state(repo)?;
  config::discard_state(repo)?;
  let commit = state
    .remaining_commits
    .first()
    .cloned()
    .ok_or(GitumError::NoStateFile)?;

  let result = (|| -> Result<()> {
    repo.am_command(command)?;
    if command == "--resolved" {
      repo.checkout(&names.rebased, false)?;
      repo.cherry_pick(&names.mainline)?;
      series::save_repo_state(repo, names, Some(names.mainline.as_str()), None, None)?;
    }
    repo.checkout(&names.upstream, true)?;
    let upstream_commit = String::from_utf8_lossy(&repo.show_blob(&commit, UPSTREAM_COMMIT_FILE)?)
      .trim()
      .to_string();
    repo.merge(&upstream_commit)?;
    repo.checkout(&names.mainline, false)?;
    Ok(())
  })();

  if let Err(e) = result {
    config::save_state(repo, &state)?;
    return Err(shape_pull_error(e));
  }

  let remaining = state.remaining_commits[1..].to_vec();
  run_pull_commits(repo, names, state.saved.clone(), &remaining, state.total, state.consumed + 1)?;
  finish_successfully(repo, names)
}

/// Pushes `upstream`, `mainline`, and `patches` (and `gitum-config`, when
/// present) to `remote`.
pub fn push(repo: &GitRepo, names: &BranchNames, remote: Option<&str>, track_with: bool) -> Result<()> {
  config::check_mainline_unchanged(repo, &names.mainline)?;
  let remote = resolve_remote(repo, remote, track_with)?;
  repo.push(&remote, &[&names.upstream, &names.mainline, &names.patches])?;
  if repo.has_branch(CONFIG_BRANCH)? {
    repo.push(&remote, &[CONFIG_BRANCH])?;
  }
  info!("Successfully pushed work branches.");
  Ok(())
}
