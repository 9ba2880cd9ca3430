//! Typed wrapper over a subprocess Git client.
//!
//! Every higher-level component (the engines, the patch-series store, the
//! orchestrator) goes through [`GitRepo`] instead of invoking `git`
//! directly. A command's non-zero exit is surfaced as
//! [`crate::GitumError::GitCommand`]; callers that expect a command to be a
//! *suspension point* (merge, rebase, am, cherry-pick) inspect that error
//! themselves rather than have the adapter guess at conflict vs. failure,
//! per the design note in the specification.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use log::{debug, error};

use crate::{GitumError, Result};

/// A Git repository rooted at a working directory, invoked as a subprocess.
#[derive(Debug, Clone)]
pub struct GitRepo {
  work_tree: PathBuf,
}

/// Author and message of a single commit, as read by [`GitRepo::commit_meta`].
#[derive(Debug, Clone)]
pub struct CommitMeta {
  pub author_name: String,
  pub author_email: String,
  pub message: String,
}

impl GitRepo {
  pub fn new(work_tree: impl Into<PathBuf>) -> Self {
    GitRepo {
      work_tree: work_tree.into(),
    }
  }

  pub fn work_tree(&self) -> &Path {
    &self.work_tree
  }

  fn git_dir(&self) -> PathBuf {
    self.work_tree.join(".git")
  }

  /// Runs `git <args>` in this repository's working tree, capturing output.
  pub fn run(&self, args: &[&str]) -> Result<Output> {
    let cmd_str = format!("git {}", args.join(" "));
    debug!("Running command: '{}' in {}", cmd_str, self.work_tree.display());

    let output = Command::new("git")
      .arg(format!("--git-dir={}", self.git_dir().display()))
      .arg(format!("--work-tree={}", self.work_tree.display()))
      .args(args)
      .current_dir(&self.work_tree)
      .output()
      .map_err(|e| GitumError::Io {
        source: e,
        path: self.work_tree.clone(),
      })?;

    if !output.status.success() {
      let stdout = String::from_utf8_lossy(&output.stdout).to_string();
      let stderr = String::from_utf8_lossy(&output.stderr).to_string();
      error!("Command failed: {}", cmd_str);
      error!("Stderr: {}", stderr);
      return Err(GitumError::GitCommand {
        cmd: cmd_str,
        stdout,
        stderr,
      });
    }
    debug!("Command successful: {}", cmd_str);
    Ok(output)
  }

  fn stdout_string(output: Output) -> String {
    String::from_utf8_lossy(&output.stdout).trim_end_matches('\n').to_string()
  }

  /// Runs an interactive command (inherits stdio), used only for
  /// `rebase -i` and `commit -e`. Returns the exit code.
  pub fn run_interactive(&self, args: &[&str]) -> Result<i32> {
    let status = Command::new("git")
      .arg(format!("--git-dir={}", self.git_dir().display()))
      .arg(format!("--work-tree={}", self.work_tree.display()))
      .args(args)
      .current_dir(&self.work_tree)
      .stdin(Stdio::inherit())
      .stdout(Stdio::inherit())
      .stderr(Stdio::inherit())
      .status()
      .map_err(|e| GitumError::Io {
        source: e,
        path: self.work_tree.clone(),
      })?;
    Ok(status.code().unwrap_or(-1))
  }

  pub fn is_dirty(&self) -> Result<bool> {
    let out = self.run(&["status", "--porcelain"])?;
    Ok(!String::from_utf8_lossy(&out.stdout).trim().is_empty())
  }

  pub fn fetch(&self, remote: &str) -> Result<()> {
    self.run(&["fetch", remote])?;
    Ok(())
  }

  pub fn checkout(&self, reference: &str, force: bool) -> Result<()> {
    if force {
      self.run(&["checkout", "-f", reference])?;
    } else {
      self.run(&["checkout", reference])?;
    }
    Ok(())
  }

  pub fn checkout_new_branch(&self, branch: &str, start_point: &str) -> Result<()> {
    self.run(&["checkout", "-b", branch, start_point])?;
    Ok(())
  }

  pub fn branch(&self, name: &str, commit: Option<&str>) -> Result<()> {
    match commit {
      Some(c) => self.run(&["branch", name, c])?,
      None => self.run(&["branch", name])?,
    };
    Ok(())
  }

  pub fn has_branch(&self, name: &str) -> Result<bool> {
    let out = Command::new("git")
      .arg(format!("--git-dir={}", self.git_dir().display()))
      .arg(format!("--work-tree={}", self.work_tree.display()))
      .args(["rev-parse", "--verify", "--quiet", &format!("refs/heads/{name}")])
      .current_dir(&self.work_tree)
      .output()
      .map_err(|e| GitumError::Io {
        source: e,
        path: self.work_tree.clone(),
      })?;
    Ok(out.status.success())
  }

  pub fn delete_head(&self, name: &str, force: bool) -> Result<()> {
    if force {
      self.run(&["branch", "-D", name])?;
    } else {
      self.run(&["branch", "-d", name])?;
    }
    Ok(())
  }

  pub fn reset_hard(&self, reference: &str) -> Result<()> {
    self.run(&["reset", "--hard", reference])?;
    Ok(())
  }

  /// Merges `reference` into the current branch. Non-zero exit is a
  /// suspension point: the caller decides whether conflicts are present.
  pub fn merge(&self, reference: &str) -> Result<()> {
    self.run(&["merge", reference])?;
    Ok(())
  }

  pub fn merge_abort(&self) -> Result<()> {
    let _ = self.run(&["merge", "--abort"]);
    Ok(())
  }

  /// Rebases the current branch onto `onto`. A suspension point.
  pub fn rebase(&self, onto: &str) -> Result<()> {
    self.run(&["rebase", onto])?;
    Ok(())
  }

  pub fn rebase_continue(&self) -> Result<()> {
    self.run(&["rebase", "--continue"])?;
    Ok(())
  }

  pub fn rebase_skip(&self) -> Result<()> {
    self.run(&["rebase", "--skip"])?;
    Ok(())
  }

  pub fn rebase_abort(&self) -> Result<()> {
    let _ = self.run(&["rebase", "--abort"]);
    Ok(())
  }

  pub fn rebase_interactive(&self, onto: &str) -> Result<i32> {
    self.run_interactive(&["rebase", "-i", onto])
  }

  /// Feeds `patch` to `git am [extra_args...]` over stdin. A suspension
  /// point: non-zero exit with conflict markers in the working tree means
  /// the caller must ask the user to resolve and `continue`/`skip`/`abort`.
  pub fn am(&self, patch: &[u8], extra_args: &[&str]) -> Result<()> {
    let mut args: Vec<&str> = vec!["am"];
    args.extend_from_slice(extra_args);

    let mut cmd = Command::new("git");
    cmd
      .arg(format!("--git-dir={}", self.git_dir().display()))
      .arg(format!("--work-tree={}", self.work_tree.display()))
      .args(&args)
      .current_dir(&self.work_tree)
      .stdin(Stdio::piped())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|e| GitumError::Io {
      source: e,
      path: self.work_tree.clone(),
    })?;
    {
      let mut stdin = child.stdin.take().expect("stdin was piped");
      stdin.write_all(patch).map_err(|e| GitumError::Io {
        source: e,
        path: self.work_tree.clone(),
      })?;
    }
    let output = child.wait_with_output().map_err(|e| GitumError::Io {
      source: e,
      path: self.work_tree.clone(),
    })?;

    if !output.status.success() {
      let stdout = String::from_utf8_lossy(&output.stdout).to_string();
      let stderr = String::from_utf8_lossy(&output.stderr).to_string();
      return Err(GitumError::GitCommand {
        cmd: format!("git {}", args.join(" ")),
        stdout,
        stderr,
      });
    }
    Ok(())
  }

  pub fn am_command(&self, flag: &str) -> Result<()> {
    self.run(&["am", flag])?;
    Ok(())
  }

  pub fn am_abort_quiet(&self) -> Result<()> {
    let _ = self.run(&["am", "--abort", "--quiet"]);
    Ok(())
  }

  pub fn cherry_pick(&self, reference: &str) -> Result<()> {
    self.run(&["cherry-pick", reference])?;
    Ok(())
  }

  pub fn cherry_pick_abort(&self) -> Result<()> {
    let _ = self.run(&["cherry-pick", "--abort"]);
    Ok(())
  }

  /// Runs `git format-patch <range>` in `cwd` (defaults to the work tree)
  /// and returns the names of the files produced, lexically sorted.
  pub fn format_patch(&self, range: &str, cwd: &Path) -> Result<Vec<String>> {
    let cmd_str = format!("git format-patch {range}");
    let output = Command::new("git")
      .arg(format!("--git-dir={}", self.git_dir().display()))
      .args(["format-patch", range])
      .current_dir(cwd)
      .output()
      .map_err(|e| GitumError::Io {
        source: e,
        path: cwd.to_path_buf(),
      })?;
    if !output.status.success() {
      return Err(GitumError::GitCommand {
        cmd: cmd_str,
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
      });
    }
    let mut names: Vec<String> = String::from_utf8_lossy(&output.stdout)
      .lines()
      .map(|l| l.trim().to_string())
      .filter(|l| !l.is_empty())
      .collect();
    names.sort();
    Ok(names)
  }

  /// `git show <ref>:<path>`, returning raw bytes (patch files may contain
  /// non-UTF8 content in theory; callers normally treat them as text).
  pub fn show_blob(&self, reference: &str, path: &str) -> Result<Vec<u8>> {
    let spec = format!("{reference}:{path}");
    let out = self.run(&["show", &spec])?;
    Ok(out.stdout)
  }

  pub fn add(&self, pathspec: &str) -> Result<()> {
    self.run(&["add", pathspec])?;
    Ok(())
  }

  pub fn add_all(&self) -> Result<()> {
    self.run(&["add", "-A"])?;
    Ok(())
  }

  pub fn rm_ignore_unmatch(&self, pathspec: &str) -> Result<()> {
    self.run(&["rm", pathspec, "--ignore-unmatch"])?;
    Ok(())
  }

  pub fn clean_dirs_force(&self) -> Result<()> {
    self.run(&["clean", "-d", "-f"])?;
    Ok(())
  }

  pub fn commit(&self, message: &str, author: Option<(&str, &str)>) -> Result<()> {
    let mut args = vec!["commit", "-m", message];
    let author_arg;
    if let Some((name, email)) = author {
      author_arg = format!("{name} <{email}>");
      args.push("--author");
      args.push(&author_arg);
    }
    self.run(&args)?;
    Ok(())
  }

  pub fn commit_interactive(&self, placeholder_message: &str) -> Result<i32> {
    self.run_interactive(&["commit", "-e", "-m", placeholder_message])
  }

  /// `git diff [--full-index] <a> <b>`, returning the textual diff (empty
  /// string means the trees are equal).
  pub fn diff(&self, a: &str, b: &str, full_index: bool) -> Result<String> {
    let out = if full_index {
      self.run(&["diff", "--full-index", a, b])?
    } else {
      self.run(&["diff", a, b])?
    };
    Ok(String::from_utf8_lossy(&out.stdout).to_string())
  }

  /// Ordered hex SHAs for `range`, old \u{2192} new.
  pub fn iter_commits(&self, range: &str) -> Result<Vec<String>> {
    let out = self.run(&["log", "--reverse", "--pretty=format:%H", range])?;
    Ok(
      String::from_utf8_lossy(&out.stdout)
        .lines()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect(),
    )
  }

  /// SHA and subject line of every commit reachable from `start`, newest
  /// first. Used by `restore` to walk a `patches` branch tip backwards
  /// looking for its seeding `gitum-patches: begin` commit.
  pub fn log_with_subject(&self, start: &str) -> Result<Vec<(String, String)>> {
    let out = self.run(&["log", "--pretty=format:%H\x1f%s", start])?;
    Ok(
      String::from_utf8_lossy(&out.stdout)
        .lines()
        .filter(|l| !l.is_empty())
        .filter_map(|l| {
          let mut parts = l.splitn(2, '\u{1f}');
          let sha = parts.next()?.to_string();
          let subject = parts.next().unwrap_or("").to_string();
          Some((sha, subject))
        })
        .collect(),
    )
  }

  pub fn merge_base(&self, a: &str, b: &str) -> Result<String> {
    let out = self.run(&["merge-base", a, b])?;
    Ok(Self::stdout_string(out))
  }

  pub fn remote_add(&self, name: &str, url: &str) -> Result<()> {
    self.run(&["remote", "add", name, url])?;
    Ok(())
  }

  pub fn push(&self, remote: &str, refs: &[&str]) -> Result<()> {
    let mut args = vec!["push", remote];
    args.extend_from_slice(refs);
    self.run(&args)?;
    Ok(())
  }

  pub fn rev_parse(&self, reference: &str) -> Result<String> {
    let out = self.run(&["rev-parse", reference])?;
    Ok(Self::stdout_string(out))
  }

  /// Writes `content` as a blob and returns its hash, without touching the
  /// working tree or the index.
  pub fn hash_object_write(&self, content: &[u8]) -> Result<String> {
    let mut child = Command::new("git")
      .arg(format!("--git-dir={}", self.git_dir().display()))
      .args(["hash-object", "-w", "--stdin"])
      .current_dir(&self.work_tree)
      .stdin(Stdio::piped())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .spawn()
      .map_err(|e| GitumError::Io {
        source: e,
        path: self.work_tree.clone(),
      })?;
    child
      .stdin
      .take()
      .expect("stdin was piped")
      .write_all(content)
      .map_err(|e| GitumError::Io {
        source: e,
        path: self.work_tree.clone(),
      })?;
    let output = child.wait_with_output().map_err(|e| GitumError::Io {
      source: e,
      path: self.work_tree.clone(),
    })?;
    if !output.status.success() {
      return Err(GitumError::GitCommand {
        cmd: "git hash-object -w --stdin".to_string(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
      });
    }
    Ok(Self::stdout_string(output))
  }

  /// Builds a single-entry tree (mode `100644`) mapping `path` to `blob`.
  pub fn mktree_single(&self, path: &str, blob: &str) -> Result<String> {
    let entry = format!("100644 blob {blob}\t{path}\n");
    let mut child = Command::new("git")
      .arg(format!("--git-dir={}", self.git_dir().display()))
      .arg("mktree")
      .current_dir(&self.work_tree)
      .stdin(Stdio::piped())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .spawn()
      .map_err(|e| GitumError::Io {
        source: e,
        path: self.work_tree.clone(),
      })?;
    child
      .stdin
      .take()
      .expect("stdin was piped")
      .write_all(entry.as_bytes())
      .map_err(|e| GitumError::Io {
        source: e,
        path: self.work_tree.clone(),
      })?;
    let output = child.wait_with_output().map_err(|e| GitumError::Io {
      source: e,
      path: self.work_tree.clone(),
    })?;
    if !output.status.success() {
      return Err(GitumError::GitCommand {
        cmd: "git mktree".to_string(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
      });
    }
    Ok(Self::stdout_string(output))
  }

  /// Author name, author email, and full message of `commit`, used to
  /// replay a mainline commit's provenance onto a synthetic commit built
  /// on another branch (the Patch-Series Store and Merge Engine do this
  /// when committing a rebased step with no explicit `--message`).
  pub fn commit_meta(&self, commit: &str) -> Result<CommitMeta> {
    let out = self.run(&["log", "-1", "--format=%an\x1f%ae\x1f%B", commit])?;
    let text = String::from_utf8_lossy(&out.stdout);
    let mut parts = text.splitn(3, '\u{1f}');
    let author_name = parts.next().unwrap_or("").to_string();
    let author_email = parts.next().unwrap_or("").to_string();
    let message = parts.next().unwrap_or("").trim_end_matches('\n').to_string();
    Ok(CommitMeta {
      author_name,
      author_email,
      message,
    })
  }

  pub fn commit_tree(&self, tree: &str, message: &str) -> Result<String> {
    let mut child = Command::new("git")
      .arg(format!("--git-dir={}", self.git_dir().display()))
      .args(["commit-tree", tree])
      .current_dir(&self.work_tree)
      .stdin(Stdio::piped())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .spawn()
      .map_err(|e| GitumError::Io {
        source: e,
        path: self.work_tree.clone(),
      })?;
    child
      .stdin
      .take()
      .expect("stdin was piped")
      .write_all(message.as_bytes())
      .map_err(|e| GitumError::Io {
        source: e,
        path: self.work_tree.clone(),
      })?;
    let output = child.wait_with_output().map_err(|e| GitumError::Io {
      source: e,
      path: self.work_tree.clone(),
    })?;
    if !output.status.success() {
      return Err(GitumError::GitCommand {
        cmd: format!("git commit-tree {tree}"),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
      });
    }
    Ok(Self::stdout_string(output))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;
  use tempfile::TempDir;

  fn init_repo() -> (TempDir, GitRepo) {
    let dir = TempDir::new().unwrap();
    let repo = GitRepo::new(dir.path());
    repo.run(&["init", "-q"]).unwrap();
    repo.run(&["config", "user.email", "test@example.com"]).unwrap();
    repo.run(&["config", "user.name", "Test"]).unwrap();
    (dir, repo)
  }

  #[test]
  fn is_dirty_reflects_working_tree() {
    let (dir, repo) = init_repo();
    fs::write(dir.path().join("a.txt"), "one\n").unwrap();
    assert!(repo.is_dirty().unwrap());
    repo.add_all().unwrap();
    repo.commit("initial", None).unwrap();
    assert!(!repo.is_dirty().unwrap());
  }

  #[test]
  fn hash_object_and_mktree_build_blob_without_checkout() {
    let (_dir, repo) = init_repo();
    fs::write(_dir.path().join("seed.txt"), "seed\n").unwrap();
    repo.add_all().unwrap();
    repo.commit("seed", None).unwrap();

    let blob = repo.hash_object_write(b"hello\n").unwrap();
    let tree = repo.mktree_single("greeting.txt", &blob).unwrap();
    let commit = repo.commit_tree(&tree, "say hello").unwrap();
    assert_eq!(commit.len(), 40);
  }

  #[test]
  fn diff_is_empty_for_identical_trees() {
    let (dir, repo) = init_repo();
    fs::write(dir.path().join("a.txt"), "content\n").unwrap();
    repo.add_all().unwrap();
    repo.commit("c1", None).unwrap();
    repo.branch("other", None).unwrap();
    assert_eq!(repo.diff("HEAD", "other", true).unwrap(), "");
  }
}
