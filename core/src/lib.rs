pub mod config;
pub mod git;
pub mod merge;
pub mod orchestrator;
pub mod patch;
pub mod pull;
pub mod series;

use std::path::PathBuf;

use thiserror::Error;

/// Default branch and file names, used whenever the `gitum-config` branch
/// is absent or a given key is unset.
pub const DEFAULT_UPSTREAM_BRANCH: &str = "upstream";
pub const DEFAULT_REBASED_BRANCH: &str = "rebased";
pub const DEFAULT_MAINLINE_BRANCH: &str = "mainline";
pub const DEFAULT_PATCHES_BRANCH: &str = "patches";
pub const CONFIG_BRANCH: &str = "gitum-config";
pub const CONFIG_FILE: &str = ".gitum-config";

pub const STATE_FILE: &str = ".gitum-state";
pub const REMOTE_FILE: &str = ".gitum-remote";
pub const MERGE_BRANCH_FILE: &str = ".gitum-mbranch";
pub const CURRENT_REBASED_FILE: &str = ".curent_rebased";
pub const CURRENT_MAINLINE_FILE: &str = ".curent_mainline";

pub const UPSTREAM_COMMIT_FILE: &str = "_upstream_commit_";
pub const LAST_PATCH_FILE: &str = "_current_patch_";

#[derive(Error, Debug)]
pub enum GitumError {
  #[error("You have local changes. Commit them and try again, please.")]
  RepoIsDirty,
  #[error("{rebased} and {mainline} work trees are not equal - can't save state!")]
  NotUptodate { rebased: String, mainline: String },
  #[error("No {CONFIG_BRANCH} branch or {CONFIG_FILE} file found; run `gitum create` first.")]
  NoConfigFile,
  #[error("State file is missing or corrupted: nothing to continue.")]
  NoStateFile,
  #[error("Rebase requires manual resolution:\n{message}")]
  RebaseFailed { message: String },
  #[error("Failed to apply patch for {commit}: {message}\nFix the error, commit, and continue the process, please.")]
  PatchFailed { commit: String, message: String },
  #[error("Cherry-pick requires manual resolution:\n{message}")]
  CherryPickFailed { message: String },
  #[error("Broken {branch} commit: {reason}")]
  BrokenRepo { branch: String, reason: String },
  #[error("Specify a remote gitum repository, please.")]
  NoGitumRemote,
  #[error("Specify a merge branch, please.")]
  NoMergeBranch,
  #[error("{0} branch already exists.")]
  BranchExists(String),
  #[error("Don't support continue not from merge or rebase mode.")]
  NotSupported,
  #[error("Git command failed: {cmd}\nStdout: {stdout}\nStderr: {stderr}")]
  GitCommand {
    cmd: String,
    stdout: String,
    stderr: String,
  },
  #[error("I/O error at {path}: {source}")]
  Io {
    #[source]
    source: std::io::Error,
    path: PathBuf,
  },
  #[error("Configuration error: {0}")]
  Config(String),
  #[error("TOML parsing error: {0}")]
  TomlParse(#[from] toml::de::Error),
  #[error("TOML serialization error: {0}")]
  TomlSerialize(#[from] toml::ser::Error),
}

pub type Result<T> = std::result::Result<T, GitumError>;

/// The three-plus-one stages of the per-upstream-commit pipeline, persisted
/// numerically in the state file for forward compatibility with hand
/// inspection (as in the original tool).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
  Start = 0,
  Merge = 1,
  Rebase = 2,
  Commit = 3,
}

impl Stage {
  pub fn to_u8(self) -> u8 {
    self as u8
  }

  pub fn from_u8(v: u8) -> Result<Self> {
    match v {
      0 => Ok(Stage::Start),
      1 => Ok(Stage::Merge),
      2 => Ok(Stage::Rebase),
      3 => Ok(Stage::Commit),
      other => Err(GitumError::Config(format!("unknown stage value {other}"))),
    }
  }
}

/// The branch-name mapping loaded from `gitum-config`, or the compile-time
/// defaults when that branch is absent.
#[derive(Debug, Clone)]
pub struct BranchNames {
  pub upstream: String,
  pub rebased: String,
  pub mainline: String,
  pub patches: String,
}

impl Default for BranchNames {
  fn default() -> Self {
    BranchNames {
      upstream: DEFAULT_UPSTREAM_BRANCH.to_string(),
      rebased: DEFAULT_REBASED_BRANCH.to_string(),
      mainline: DEFAULT_MAINLINE_BRANCH.to_string(),
      patches: DEFAULT_PATCHES_BRANCH.to_string(),
    }
  }
}

impl BranchNames {
  /// True when every name is still the compile-time default, in which case
  /// `create` skips writing a `gitum-config` branch at all.
  pub fn is_default(&self) -> bool {
    self.upstream == DEFAULT_UPSTREAM_BRANCH
      && self.rebased == DEFAULT_REBASED_BRANCH
      && self.mainline == DEFAULT_MAINLINE_BRANCH
      && self.patches == DEFAULT_PATCHES_BRANCH
  }
}

/// Saved tips of all four tracked branches plus the rebased tip at the
/// start of the current step, used to restore on `abort`.
#[derive(Debug, Clone, Default)]
pub struct SavedBranches {
  pub upstream: String,
  pub rebased: String,
  pub mainline: String,
  pub patches: String,
  pub prev_head: String,
}

/// Resumable operation state, persisted to `.git/.gitum-state` between a
/// suspension and the matching `continue`/`abort`.
#[derive(Debug, Clone)]
pub struct OperationState {
  pub saved: SavedBranches,
  pub stage: Stage,
  pub total: usize,
  pub consumed: usize,
  pub remaining_commits: Vec<String>,
}
