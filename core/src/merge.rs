//! Merge Engine — the three-stage MERGE → REBASE → COMMIT state machine
//! that folds upstream commits into the rebased patch stack one at a
//! time, suspending at whichever Git operation needs human conflict
//! resolution and resuming exactly where it left off.

use log::info;

use crate::config;
use crate::git::GitRepo;
use crate::patch;
use crate::series;
use crate::{BranchNames, GitumError, OperationState, Result, SavedBranches, Stage};

fn fixup_merge_message(message: &str) -> String {
  message
    .replace("git rebase --continue", "gitum merge --continue")
    .replace("git rebase --abort", "gitum merge --abort")
    .replace("git rebase --skip", "gitum merge --skip")
}

/// Any `GitCommand` failure surfaced while folding a commit is reported as
/// a rebase-conflict suspension, regardless of which of the three stages
/// raised it — matching the original tool, which distinguishes only
/// patch-application failures (`PatchFailed`) from everything else.
fn shape_stage_error(err: GitumError) -> GitumError {
  match err {
    GitumError::GitCommand { stdout, stderr, .. } => GitumError::RebaseFailed {
      message: fixup_merge_message(&format!("{stdout}{stderr}")),
    },
    other => other,
  }
}

struct StageError {
  stage: Stage,
  error: GitumError,
  /// When true, this commit is considered consumed even though it failed:
  /// the user is expected to finish it by hand (patch rejects land here),
  /// so `continue` must not re-run stage1 for it.
  advance: bool,
}

fn stage1(repo: &GitRepo, names: &BranchNames, commit: &str) -> Result<()> {
  repo.checkout(&names.upstream, false)?;
  repo.merge(commit)
}

fn stage2(
  repo: &GitRepo,
  names: &BranchNames,
  commit: &str,
  saved: &mut SavedBranches,
  rebase_cmd: Option<&str>,
  interactive: bool,
) -> Result<String> {
  match rebase_cmd {
    Some(cmd) => {
      if interactive {
        repo.rebase_interactive(cmd)?;
      } else {
        repo.rebase(cmd)?;
      }
    }
    None => {
      repo.checkout(&names.rebased, false)?;
      saved.prev_head = repo.rev_parse(&names.rebased)?;
      if interactive {
        repo.rebase_interactive(commit)?;
      } else {
        repo.rebase(commit)?;
      }
    }
  }
  repo.diff(&saved.prev_head, &names.rebased, true)
}

/// Checks out `mainline`, applies `diff_str` with the in-process patch
/// applier, and commits. Shared with [`crate::orchestrator::update`],
/// which drives it directly when the rebased stack's result diff changed
/// without a one-to-one upstream-commit correspondence.
pub(crate) fn stage3(
  repo: &GitRepo,
  names: &BranchNames,
  commit: &str,
  diff_str: &str,
  interactive: bool,
  message: Option<&str>,
) -> Result<()> {
  repo.checkout(&names.mainline, false)?;
  if diff_str.is_empty() {
    info!("Nothing to commit in branch {}, skipping {} commit.", names.mainline, commit);
    return Ok(());
  }
  repo.clean_dirs_force()?;
  if let Err(e) = patch::apply_unified_diff(repo.work_tree(), diff_str) {
    return Err(GitumError::PatchFailed {
      commit: commit.to_string(),
      message: e.to_string(),
    });
  }
  repo.add_all()?;
  if interactive {
    repo.commit_interactive(&format!("place your comments for {} branch commit", names.mainline))?;
    return Ok(());
  }
  match message {
    Some(m) => repo.commit(m, None)?,
    None => {
      let meta = repo.commit_meta(commit)?;
      repo.commit(&meta.message, Some((&meta.author_name, &meta.author_email)))?;
    }
  }
  Ok(())
}

fn process_commit(repo: &GitRepo, names: &BranchNames, commit: &str, saved: &mut SavedBranches) -> std::result::Result<bool, StageError> {
  if let Err(e) = stage1(repo, names, commit) {
    return Err(StageError {
      stage: Stage::Merge,
      error: shape_stage_error(e),
      advance: false,
    });
  }
  let diff = match stage2(repo, names, commit, saved, None, false) {
    Ok(d) => d,
    Err(e) => {
      return Err(StageError {
        stage: Stage::Rebase,
        error: shape_stage_error(e),
        advance: false,
      })
    }
  };
  if let Err(e) = stage3(repo, names, commit, &diff, false, None) {
    return Err(match e {
      GitumError::PatchFailed { .. } => StageError {
        stage: Stage::Merge,
        error: e,
        advance: true,
      },
      other => StageError {
        stage: Stage::Commit,
        error: shape_stage_error(other),
        advance: false,
      },
    });
  }
  let mainline_commit = if diff.is_empty() { None } else { Some(names.mainline.as_str()) };
  if let Err(e) = series::save_repo_state(repo, names, mainline_commit, None, None) {
    return Err(StageError {
      stage: Stage::Commit,
      error: shape_stage_error(e),
      advance: false,
    });
  }
  Ok(!diff.is_empty())
}

fn process_commits(
  repo: &GitRepo,
  names: &BranchNames,
  mut saved: SavedBranches,
  commits: &[String],
  total: usize,
  mut consumed: usize,
) -> Result<()> {
  let mut idx = 0;
  while idx < commits.len() {
    let commit = &commits[idx];
    info!("[{}/{}] Applying commit: {}", consumed + 1, total, commit);
    match process_commit(repo, names, commit, &mut saved) {
      Ok(_) => {
        consumed += 1;
        idx += 1;
      }
      Err(se) => {
        // `advance` moves the commit index past this commit (the Python
        // original's `self._id += 1` in `_stage3`'s except block), but the
        // progress counter itself is never bumped on this path — the
        // exception unwinds before `self._cur_num += 1` runs.
        let remaining_from = if se.advance { idx + 1 } else { idx };
        let state = OperationState {
          saved: saved.clone(),
          stage: se.stage,
          total,
          consumed,
          remaining_commits: commits[remaining_from..].to_vec(),
        };
        config::save_state(repo, &state)?;
        return Err(se.error);
      }
    }
  }
  Ok(())
}

pub(crate) fn capture_branch_tips(repo: &GitRepo, names: &BranchNames) -> Result<SavedBranches> {
  Ok(SavedBranches {
    upstream: repo.rev_parse(&names.upstream)?,
    rebased: repo.rev_parse(&names.rebased)?,
    mainline: repo.rev_parse(&names.mainline)?,
    patches: repo.rev_parse(&names.patches)?,
    prev_head: repo.rev_parse(&names.rebased)?,
  })
}

pub(crate) fn finish_successfully(repo: &GitRepo, names: &BranchNames) -> Result<()> {
  repo.checkout(&names.rebased, false)?;
  config::save_current_rebased(repo, &names.rebased)?;
  config::save_current_mainline(repo, &names.mainline)?;
  info!("Successfully updated work branches.");
  Ok(())
}

/// Merges every commit reachable from `mbranch` (or the saved merge
/// branch) but not yet on `upstream` into the rebased stack, one commit
/// at a time.
pub fn merge(repo: &GitRepo, names: &BranchNames, mbranch: Option<&str>, track_with: bool) -> Result<()> {
  if repo.is_dirty()? {
    return Err(GitumError::RepoIsDirty);
  }
  config::check_mainline_unchanged(repo, &names.mainline)?;
  if !repo.diff(&names.rebased, &names.mainline, false)?.is_empty() {
    return Err(GitumError::NotUptodate {
      rebased: names.rebased.clone(),
      mainline: names.mainline.clone(),
    });
  }

  let mbranch = match mbranch {
    Some(m) => m.to_string(),
    None => config::load_mbranch(repo)?,
  };
  if track_with {
    config::save_mbranch(repo, &mbranch)?;
  }
  if let Some(remote) = mbranch.split('/').next().filter(|_| mbranch.contains('/')) {
    repo.fetch(remote)?;
  }
  repo.rev_parse(&mbranch).map_err(|_| GitumError::NoMergeBranch)?;

  let commits = repo.iter_commits(&format!("{}..{}", names.upstream, mbranch))?;
  if commits.is_empty() {
    info!("Repository is up to date - nothing to merge.");
    return Ok(());
  }
  let total = commits.len();
  let saved = capture_branch_tips(repo, names)?;
  process_commits(repo, names, saved, &commits, total, 0)?;
  finish_successfully(repo, names)
}

/// Resumes a suspended `merge`, continuing the interrupted rebase step
/// (or, if the suspension happened during the preceding merge step,
/// re-running it — the caller is expected to have resolved and committed
/// by hand first).
pub fn continue_merge(repo: &GitRepo, names: &BranchNames, rebase_cmd: Option<&str>) -> Result<()> {
  let state = config::load_state(repo)?;
  config::discard_state(repo)?;

  let (remaining, consumed) = match state.stage {
    Stage::Rebase => {
      let commit = state
        .remaining_commits
        .first()
        .cloned()
        .ok_or(GitumError::NoStateFile)?;
      let mut saved = state.saved.clone();
      let result = (|| -> Result<bool> {
        let diff = stage2(repo, names, &commit, &mut saved, rebase_cmd, false)?;
        stage3(repo, names, &commit, &diff, false, None)?;
        let mainline_commit = if diff.is_empty() { None } else { Some(names.mainline.as_str()) };
        series::save_repo_state(repo, names, mainline_commit, None, None)?;
        Ok(!diff.is_empty())
      })();
      if let Err(e) = result {
        config::save_state(repo, &state)?;
        return Err(shape_stage_error(e));
      }
      (state.remaining_commits[1..].to_vec(), state.consumed + 1)
    }
    Stage::Merge => (state.remaining_commits.clone(), state.consumed),
    _ => return Err(GitumError::NotSupported),
  };

  let saved = capture_branch_tips(repo, names)?;
  process_commits(repo, names, saved, &remaining, state.total, consumed)?;
  finish_successfully(repo, names)
}

/// Aborts an in-flight merge, restoring all four tracked branches to
/// their tips at the start of the operation.
pub fn abort(repo: &GitRepo, names: &BranchNames, am: bool) -> Result<()> {
  let state = config::load_state(repo)?;
  config::discard_state(repo)?;

  if am {
    repo.am_abort_quiet()?;
  } else {
    repo.rebase_abort()?;
  }
  restore_branches(repo, names, &state.saved)?;
  repo.checkout(&names.rebased, false)?;
  config::save_current_rebased(repo, &names.rebased)?;
  config::save_current_mainline(repo, &names.mainline)?;
  info!("Restored work branches.");
  Ok(())
}

fn restore_branches(repo: &GitRepo, names: &BranchNames, saved: &SavedBranches) -> Result<()> {
  repo.checkout(&names.upstream, true)?;
  repo.reset_hard(&saved.upstream)?;
  repo.checkout(&names.rebased, true)?;
  repo.reset_hard(&saved.rebased)?;
  repo.checkout(&names.mainline, true)?;
  repo.reset_hard(&saved.mainline)?;
  repo.checkout(&names.patches, true)?;
  repo.reset_hard(&saved.patches)?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fixup_rewrites_rebase_hints() {
    let msg = "Please run \"git rebase --continue\" or \"git rebase --abort\".";
    let fixed = fixup_merge_message(msg);
    assert!(fixed.contains("gitum merge --continue"));
    assert!(fixed.contains("gitum merge --abort"));
  }

  #[test]
  fn merge_with_no_new_commits_is_a_noop() {
    let dir = tempfile::TempDir::new().unwrap();
    let repo = GitRepo::new(dir.path());
    repo.run(&["init", "-q"]).unwrap();
    repo.run(&["config", "user.email", "test@example.com"]).unwrap();
    repo.run(&["config", "user.name", "Test"]).unwrap();
    std::fs::write(dir.path().join("a.txt"), "a\n").unwrap();
    repo.add_all().unwrap();
    repo.commit("initial", None).unwrap();
    for b in ["upstream", "rebased", "mainline", "patches"] {
      repo.branch(b, None).unwrap();
    }
    config::save_current_mainline(&repo, "mainline").unwrap();

    let names = BranchNames {
      upstream: "upstream".into(),
      rebased: "rebased".into(),
      mainline: "mainline".into(),
      patches: "patches".into(),
    };
    merge(&repo, &names, Some("upstream"), false).unwrap();
  }
}
