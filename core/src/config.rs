//! Config / State Store.
//!
//! Two families of persistence live here, matching §4.3 of the
//! specification:
//!
//!  - the per-repository `gitum-config` branch, read and written through
//!    the Git Adapter without ever requiring a checkout, plus the small
//!    flat files under `.git/` that record resumable state, the default
//!    remote, the merge branch, and the last-seen tips used by `status`
//!    and `update`;
//!  - an optional process-wide defaults file in the platform config
//!    directory, read once at CLI startup and unrelated to any one
//!    repository.

use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::git::GitRepo;
use crate::{
  BranchNames, GitumError, OperationState, Result, SavedBranches, Stage, CONFIG_BRANCH,
  CONFIG_FILE, CURRENT_MAINLINE_FILE, CURRENT_REBASED_FILE, MERGE_BRANCH_FILE, REMOTE_FILE,
  STATE_FILE,
};

fn metadata_path(repo: &GitRepo, name: &str) -> PathBuf {
  repo.work_tree().join(".git").join(name)
}

fn save_parm(repo: &GitRepo, name: &str, value: &str) -> Result<()> {
  let path = metadata_path(repo, name);
  fs::write(&path, value).map_err(|e| GitumError::Io { source: e, path })
}

fn load_parm(repo: &GitRepo, name: &str) -> Result<Option<String>> {
  let path = metadata_path(repo, name);
  match fs::read_to_string(&path) {
    Ok(content) => Ok(content.lines().next().map(|l| l.trim().to_string())),
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
    Err(e) => Err(GitumError::Io { source: e, path }),
  }
}

fn remove_parm(repo: &GitRepo, name: &str) -> Result<()> {
  let path = metadata_path(repo, name);
  match fs::remove_file(&path) {
    Ok(()) => Ok(()),
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
    Err(e) => Err(GitumError::Io { source: e, path }),
  }
}

// --- gitum-config branch --------------------------------------------------

/// Reads the branch-name mapping from the `gitum-config` branch. Absence of
/// the branch, or of the file on it, is not an error: the compile-time
/// defaults are used, matching the original tool's silent fallback.
pub fn load_branch_names(repo: &GitRepo) -> Result<BranchNames> {
  let names = BranchNames::default();

  let raw = match repo.show_blob(CONFIG_BRANCH, CONFIG_FILE) {
    Ok(bytes) => bytes,
    Err(_) => return Ok(names),
  };
  parse_branch_names(&String::from_utf8_lossy(&raw), names)
}

fn parse_branch_names(text: &str, mut names: BranchNames) -> Result<BranchNames> {
  for (line_no, line) in text.lines().enumerate() {
    let without_comment = line.split('#').next().unwrap_or("").trim();
    if without_comment.is_empty() {
      continue;
    }
    let parts: Vec<&str> = without_comment.splitn(2, '=').collect();
    if parts.len() != 2 {
      warn!("error in config file on line {}: {}", line_no + 1, line);
      continue;
    }
    let key = parts[0].trim();
    let value = parts[1].trim().to_string();
    match key {
      "upstream" => names.upstream = value,
      "rebased" => names.rebased = value,
      // "current" and "mainline" are treated as synonyms: the config key
      // stays `current` for compatibility, but it names the mainline branch.
      "current" | "mainline" => names.mainline = value,
      "patches" => names.patches = value,
      other => warn!("unknown config key '{}' on line {}, ignoring", other, line_no + 1),
    }
  }
  Ok(names)
}

/// Writes the branch-name mapping to the `gitum-config` branch via
/// blob/tree/commit, without touching the working tree.
pub fn save_branch_names(repo: &GitRepo, names: &BranchNames) -> Result<()> {
  let content = format!(
    "current = {}\nupstream = {}\nrebased = {}\npatches = {}\n",
    names.mainline, names.upstream, names.rebased, names.patches
  );
  let blob = repo.hash_object_write(content.as_bytes())?;
  let tree = repo.mktree_single(CONFIG_FILE, &blob)?;
  let commit = repo.commit_tree(&tree, "Save config file")?;
  repo.branch(CONFIG_BRANCH, Some(&commit))?;
  Ok(())
}

// --- resumable operation state --------------------------------------------

/// Persists an in-flight operation's checkpoint to `.git/.gitum-state`.
pub fn save_state(repo: &GitRepo, state: &OperationState) -> Result<()> {
  let mut body = String::new();
  body.push_str(&state.saved.upstream);
  body.push('\n');
  body.push_str(&state.saved.rebased);
  body.push('\n');
  body.push_str(&state.saved.mainline);
  body.push('\n');
  body.push_str(&state.saved.patches);
  body.push('\n');
  body.push_str(&state.saved.prev_head);
  body.push('\n');
  body.push_str(&state.stage.to_u8().to_string());
  body.push('\n');
  body.push_str(&state.total.to_string());
  body.push('\n');
  body.push_str(&state.consumed.to_string());
  body.push('\n');
  for c in &state.remaining_commits {
    body.push_str(c);
    body.push('\n');
  }
  let path = metadata_path(repo, STATE_FILE);
  fs::write(&path, body).map_err(|e| GitumError::Io { source: e, path })
}

/// Loads the resumable state file. `NoStateFile` when the file is missing
/// or shorter than the mandatory header. Does not remove the file; callers
/// call [`discard_state`] once the resumed operation settles.
pub fn load_state(repo: &GitRepo) -> Result<OperationState> {
  let path = metadata_path(repo, STATE_FILE);
  let content = match fs::read_to_string(&path) {
    Ok(c) => c,
    Err(_) => return Err(GitumError::NoStateFile),
  };
  let lines: Vec<&str> = content
    .lines()
    .map(|l| l.trim())
    .filter(|l| !l.is_empty())
    .collect();
  if lines.len() < 8 {
    return Err(GitumError::NoStateFile);
  }
  let stage = lines[5]
    .parse::<u8>()
    .ok()
    .and_then(|v| Stage::from_u8(v).ok())
    .ok_or(GitumError::NoStateFile)?;
  let total = lines[6].parse::<usize>().map_err(|_| GitumError::NoStateFile)?;
  let consumed = lines[7].parse::<usize>().map_err(|_| GitumError::NoStateFile)?;
  let remaining_commits = lines[8..].iter().map(|s| s.to_string()).collect();

  Ok(OperationState {
    saved: SavedBranches {
      upstream: lines[0].to_string(),
      rebased: lines[1].to_string(),
      mainline: lines[2].to_string(),
      patches: lines[3].to_string(),
      prev_head: lines[4].to_string(),
    },
    stage,
    total,
    consumed,
    remaining_commits,
  })
}

/// Removes the state file, the terminal step of a successful `continue` or
/// an explicit `abort`.
pub fn discard_state(repo: &GitRepo) -> Result<()> {
  remove_parm(repo, STATE_FILE)
}

// --- remote tracking -------------------------------------------------------

/// Two-line file: remote name on the first line, last-synced `patches`
/// branch SHA on the second (empty before the first successful `pull`).
#[derive(Debug, Clone, Default)]
pub struct RemoteTracking {
  pub remote: String,
  pub last_synced_patches: Option<String>,
}

pub fn save_remote(repo: &GitRepo, remote: &str, last_synced_patches: Option<&str>) -> Result<()> {
  let body = format!("{}\n{}\n", remote, last_synced_patches.unwrap_or(""));
  let path = metadata_path(repo, REMOTE_FILE);
  fs::write(&path, body).map_err(|e| GitumError::Io { source: e, path })
}

pub fn load_remote(repo: &GitRepo) -> Result<RemoteTracking> {
  let path = metadata_path(repo, REMOTE_FILE);
  match fs::read_to_string(&path) {
    Ok(content) => {
      let mut lines = content.lines();
      let remote = lines.next().unwrap_or("").trim().to_string();
      if remote.is_empty() {
        return Err(GitumError::NoGitumRemote);
      }
      let last = lines.next().map(|l| l.trim().to_string()).filter(|l| !l.is_empty());
      Ok(RemoteTracking {
        remote,
        last_synced_patches: last,
      })
    }
    Err(_) => Err(GitumError::NoGitumRemote),
  }
}

// --- merge branch -----------------------------------------------------------

pub fn save_mbranch(repo: &GitRepo, mbranch: &str) -> Result<()> {
  save_parm(repo, MERGE_BRANCH_FILE, mbranch)
}

pub fn load_mbranch(repo: &GitRepo) -> Result<String> {
  load_parm(repo, MERGE_BRANCH_FILE)?.ok_or(GitumError::NoMergeBranch)
}

// --- last-known tips, used by `status` / `update` ---------------------------

pub fn save_current_rebased(repo: &GitRepo, branch: &str) -> Result<()> {
  let sha = repo.rev_parse(branch)?;
  save_parm(repo, CURRENT_REBASED_FILE, &sha)
}

pub fn load_current_rebased(repo: &GitRepo) -> Result<Option<String>> {
  load_parm(repo, CURRENT_REBASED_FILE)
}

pub fn save_current_mainline(repo: &GitRepo, branch: &str) -> Result<()> {
  let sha = repo.rev_parse(branch)?;
  save_parm(repo, CURRENT_MAINLINE_FILE, &sha)
}

pub fn load_current_mainline(repo: &GitRepo) -> Result<Option<String>> {
  load_parm(repo, CURRENT_MAINLINE_FILE)
}

/// Verifies the mainline branch's tip still matches the last value this
/// tool recorded, catching the case where the user committed directly on
/// mainline outside of `gitum`.
pub fn check_mainline_unchanged(repo: &GitRepo, mainline_branch: &str) -> Result<()> {
  let recorded = load_current_mainline(repo)?;
  let actual = repo.rev_parse(mainline_branch)?;
  match recorded {
    Some(ref r) if *r == actual => Ok(()),
    Some(r) => {
      warn!(
        "You have an unexpected HEAD of {} branch ({} instead of {}).",
        mainline_branch, actual, r
      );
      Err(GitumError::RepoIsDirty)
    }
    None => Ok(()),
  }
}

pub fn remove_all_config_files(repo: &GitRepo) -> Result<()> {
  for name in [
    STATE_FILE,
    REMOTE_FILE,
    MERGE_BRANCH_FILE,
    CURRENT_REBASED_FILE,
    CURRENT_MAINLINE_FILE,
  ] {
    remove_parm(repo, name)?;
  }
  Ok(())
}

// --- process-wide defaults (ambient, unrelated to any one repository) ----

/// Optional global defaults, seeded into `create` when the caller didn't
/// override them on the command line. Entirely separate from the
/// per-repository `gitum-config` branch above.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
pub struct GlobalDefaults {
  pub default_remote: Option<String>,
  pub default_upstream_branch: Option<String>,
  pub default_rebased_branch: Option<String>,
  pub default_mainline_branch: Option<String>,
  pub default_patches_branch: Option<String>,
}

pub fn default_config_path() -> Result<PathBuf> {
  match ProjectDirs::from("com", "gitum", "gitum") {
    Some(dirs) => Ok(dirs.config_dir().join("config.toml")),
    None => Err(GitumError::Config(
      "Could not determine standard configuration directory.".to_string(),
    )),
  }
}

/// Loads the process-wide defaults file. A missing file is not an error —
/// unlike the per-repository `gitum-config` branch, this file is optional.
pub fn load_global_defaults(path_override: Option<&Path>) -> Result<GlobalDefaults> {
  let path = match path_override {
    Some(p) => p.to_path_buf(),
    None => default_config_path()?,
  };

  debug!("Attempting to load global defaults from: {}", path.display());
  match fs::read_to_string(&path) {
    Ok(content) => toml::from_str(&content).map_err(GitumError::TomlParse),
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(GlobalDefaults::default()),
    Err(e) => Err(GitumError::Io { source: e, path }),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn branch_names_default_when_no_config_branch() {
    let dir = tempfile::TempDir::new().unwrap();
    let repo = GitRepo::new(dir.path());
    repo.run(&["init", "-q"]).unwrap();
    let names = load_branch_names(&repo).unwrap();
    assert_eq!(names.upstream, "upstream");
    assert_eq!(names.mainline, "mainline");
  }

  #[test]
  fn parses_current_as_mainline_synonym() {
    let names = parse_branch_names("current = trunk\nupstream = up\n", BranchNames::default()).unwrap();
    assert_eq!(names.mainline, "trunk");
    assert_eq!(names.upstream, "up");
  }

  #[test]
  fn unknown_key_is_tolerated() {
    let names = parse_branch_names("bogus = whatever\nrebased = r\n", BranchNames::default()).unwrap();
    assert_eq!(names.rebased, "r");
  }

  #[test]
  fn state_round_trips_through_file() {
    let dir = tempfile::TempDir::new().unwrap();
    let repo = GitRepo::new(dir.path());
    repo.run(&["init", "-q"]).unwrap();
    let state = OperationState {
      saved: SavedBranches {
        upstream: "a".into(),
        rebased: "b".into(),
        mainline: "c".into(),
        patches: "d".into(),
        prev_head: "e".into(),
      },
      stage: Stage::Rebase,
      total: 3,
      consumed: 1,
      remaining_commits: vec!["f".into(), "g".into()],
    };
    save_state(&repo, &state).unwrap();
    let loaded = load_state(&repo).unwrap();
    assert_eq!(loaded.saved.upstream, "a");
    assert_eq!(loaded.stage, Stage::Rebase);
    assert_eq!(loaded.remaining_commits, vec!["f", "g"]);
    assert!(load_state(&repo).is_ok());
    discard_state(&repo).unwrap();
    assert!(matches!(load_state(&repo), Err(GitumError::NoStateFile)));
  }

  #[test]
  fn missing_state_file_is_reported() {
    let dir = tempfile::TempDir::new().unwrap();
    let repo = GitRepo::new(dir.path());
    repo.run(&["init", "-q"]).unwrap();
    assert!(matches!(load_state(&repo), Err(GitumError::NoStateFile)));
  }

  #[test]
  fn remote_tracking_round_trips() {
    let dir = tempfile::TempDir::new().unwrap();
    let repo = GitRepo::new(dir.path());
    repo.run(&["init", "-q"]).unwrap();
    save_remote(&repo, "origin", Some("deadbeef")).unwrap();
    let tracking = load_remote(&repo).unwrap();
    assert_eq!(tracking.remote, "origin");
    assert_eq!(tracking.last_synced_patches.as_deref(), Some("deadbeef"));
  }

  #[test]
  fn missing_remote_file_is_reported() {
    let dir = tempfile::TempDir::new().unwrap();
    let repo = GitRepo::new(dir.path());
    repo.run(&["init", "-q"]).unwrap();
    assert!(matches!(load_remote(&repo), Err(GitumError::NoGitumRemote)));
  }

  #[test]
  fn global_defaults_missing_file_is_not_an_error() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("nonexistent.toml");
    let defaults = load_global_defaults(Some(&path)).unwrap();
    assert!(defaults.default_remote.is_none());
  }
}
