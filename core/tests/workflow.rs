//! End-to-end scenarios against real disposable Git repositories.

use std::fs;
use std::path::Path;

use gitum_core::git::GitRepo;
use gitum_core::{config, merge, orchestrator, pull, series, BranchNames, GitumError};

fn init_repo() -> (tempfile::TempDir, GitRepo) {
  let dir = tempfile::TempDir::new().unwrap();
  let repo = GitRepo::new(dir.path());
  repo.run(&["init", "-q"]).unwrap();
  repo.run(&["config", "user.email", "test@example.com"]).unwrap();
  repo.run(&["config", "user.name", "Test"]).unwrap();
  (dir, repo)
}

fn write(dir: &Path, name: &str, content: &str) {
  fs::write(dir.join(name), content).unwrap();
}

fn names() -> BranchNames {
  BranchNames::default()
}

/// A patch committed directly on `rebased` (no matching upstream commit)
/// is folded into the mainline branch and the patch series by `update`.
#[test]
fn local_only_patch_stack_is_saved_by_update() {
  let (dir, repo) = init_repo();
  write(dir.path(), "lib.rs", "fn main() {}\n");
  repo.add_all().unwrap();
  repo.commit("initial", None).unwrap();
  let names = names();
  orchestrator::create(&repo, "origin", &names).unwrap();

  repo.checkout(&names.rebased, false).unwrap();
  write(dir.path(), "lib.rs", "fn main() { println!(\"hi\"); }\n");
  repo.add_all().unwrap();
  repo.commit("add greeting", None).unwrap();

  orchestrator::update(&repo, &names, None).unwrap();

  repo.checkout(&names.mainline, false).unwrap();
  let content = fs::read_to_string(dir.path().join("lib.rs")).unwrap();
  assert!(content.contains("println!"));

  assert_eq!(
    config::load_current_rebased(&repo).unwrap().unwrap(),
    repo.rev_parse(&names.rebased).unwrap()
  );
}

/// Two commits made on `rebased` since the last sync are both folded onto
/// `mainline` by a single `update` call, rather than the first iteration's
/// up-to-date check comparing against the full (not-yet-applied) rebased
/// tip and spuriously failing.
#[test]
fn update_batches_multiple_pending_commits_in_one_call() {
  let (dir, repo) = init_repo();
  write(dir.path(), "lib.rs", "fn main() {}\n");
  repo.add_all().unwrap();
  repo.commit("initial", None).unwrap();
  let names = names();
  orchestrator::create(&repo, "origin", &names).unwrap();

  repo.checkout(&names.rebased, false).unwrap();
  write(dir.path(), "lib.rs", "fn main() { println!(\"one\"); }\n");
  repo.add_all().unwrap();
  repo.commit("add one", None).unwrap();
  write(dir.path(), "lib.rs", "fn main() { println!(\"one\"); println!(\"two\"); }\n");
  repo.add_all().unwrap();
  repo.commit("add two", None).unwrap();

  orchestrator::update(&repo, &names, Some("batched sync")).unwrap();

  repo.checkout(&names.mainline, false).unwrap();
  let content = fs::read_to_string(dir.path().join("lib.rs")).unwrap();
  assert!(content.contains("one") && content.contains("two"));

  assert_eq!(
    config::load_current_rebased(&repo).unwrap().unwrap(),
    repo.rev_parse(&names.rebased).unwrap()
  );
}

/// A clean upstream commit with no conflicting local changes folds
/// straight through `merge` without suspending.
#[test]
fn merge_folds_a_clean_upstream_commit() {
  let (dir, repo) = init_repo();
  write(dir.path(), "a.txt", "one\n");
  repo.add_all().unwrap();
  repo.commit("initial", None).unwrap();
  let names = names();
  orchestrator::create(&repo, "origin", &names).unwrap();

  repo.checkout(&names.upstream, false).unwrap();
  write(dir.path(), "b.txt", "two\n");
  repo.add_all().unwrap();
  repo.commit("add b", None).unwrap();
  let upstream_head = repo.rev_parse(&names.upstream).unwrap();

  merge::merge(&repo, &names, Some(&upstream_head), false).unwrap();

  repo.checkout(&names.mainline, false).unwrap();
  assert!(dir.path().join("b.txt").exists());
  repo.checkout(&names.rebased, false).unwrap();
  assert!(dir.path().join("b.txt").exists());
}

/// `restore` with `rebased_only` rebuilds `rebased` from an earlier
/// `patches` commit without touching `mainline`/`upstream`.
#[test]
fn restore_rebased_only_rebuilds_from_an_earlier_step() {
  let (dir, repo) = init_repo();
  write(dir.path(), "a.txt", "one\n");
  repo.add_all().unwrap();
  repo.commit("initial", None).unwrap();
  let names = names();
  orchestrator::create(&repo, "origin", &names).unwrap();
  let first_patches_commit = repo.rev_parse(&names.patches).unwrap();

  repo.checkout(&names.rebased, false).unwrap();
  write(dir.path(), "a.txt", "one\ntwo\n");
  repo.add_all().unwrap();
  repo.commit("append two", None).unwrap();
  orchestrator::update(&repo, &names, None).unwrap();

  orchestrator::restore(&repo, &names, Some(&first_patches_commit), false).unwrap();

  repo.checkout(&names.rebased, false).unwrap();
  let content = fs::read_to_string(dir.path().join("a.txt")).unwrap();
  assert_eq!(content, "one\n");
}

/// A second `clone` of a pushed-to remote carries over the full patch
/// stack, and a subsequent `pull` after further remote changes folds
/// them in without manual intervention when there is no conflict.
#[test]
fn clone_and_pull_round_trip_a_bare_remote() {
  let bare_dir = tempfile::TempDir::new().unwrap();
  let bare = GitRepo::new(bare_dir.path());
  bare.run(&["init", "-q", "--bare"]).unwrap();

  let (origin_dir, origin) = init_repo();
  write(origin_dir.path(), "a.txt", "one\n");
  origin.add_all().unwrap();
  origin.commit("initial", None).unwrap();
  let names = names();
  orchestrator::create(&origin, "origin", &names).unwrap();
  origin.remote_add("origin", bare_dir.path().to_str().unwrap()).unwrap();
  pull::push(&origin, &names, Some("origin"), true).unwrap();

  let clone_dir = tempfile::TempDir::new().unwrap();
  let clone_repo = GitRepo::new(clone_dir.path());
  clone_repo.run(&["init", "-q"]).unwrap();
  clone_repo.run(&["config", "user.email", "test@example.com"]).unwrap();
  clone_repo.run(&["config", "user.name", "Test"]).unwrap();
  orchestrator::clone(&clone_repo, bare_dir.path().to_str().unwrap()).unwrap();
  assert!(clone_repo.has_branch(&names.rebased).unwrap());
  assert!(clone_dir.path().join("a.txt").exists());

  origin.checkout(&names.upstream, false).unwrap();
  write(origin_dir.path(), "b.txt", "two\n");
  origin.add_all().unwrap();
  origin.commit("add b", None).unwrap();
  let upstream_head = origin.rev_parse(&names.upstream).unwrap();
  merge::merge(&origin, &names, Some(&upstream_head), false).unwrap();
  pull::push(&origin, &names, Some("origin"), false).unwrap();

  pull::pull(&clone_repo, &names, Some("origin"), true).unwrap();
  clone_repo.checkout(&names.mainline, false).unwrap();
  assert!(clone_dir.path().join("b.txt").exists());
}

/// `merge --abort` restores every tracked branch to its pre-merge tip and
/// can be invoked repeatedly once there's nothing left to undo without
/// corrupting state further (it only fails once the state file itself is
/// gone).
#[test]
fn merge_abort_restores_branches_and_is_not_repeatable() {
  let (dir, repo) = init_repo();
  write(dir.path(), "a.txt", "one\n");
  repo.add_all().unwrap();
  repo.commit("initial", None).unwrap();
  let names = names();
  orchestrator::create(&repo, "origin", &names).unwrap();

  repo.checkout(&names.upstream, false).unwrap();
  write(dir.path(), "a.txt", "one\nupstream-change\n");
  repo.add_all().unwrap();
  repo.commit("conflicting upstream change", None).unwrap();
  let upstream_head = repo.rev_parse(&names.upstream).unwrap();

  repo.checkout(&names.mainline, false).unwrap();
  write(dir.path(), "a.txt", "one\nlocal-change\n");
  repo.add_all().unwrap();
  repo.commit("local change on mainline", None).unwrap();

  let before_upstream = repo.rev_parse(&names.upstream).unwrap();
  let result = merge::merge(&repo, &names, Some(&upstream_head), false);
  assert!(result.is_err());

  merge::abort(&repo, &names, false).unwrap();
  assert_eq!(repo.rev_parse(&names.upstream).unwrap(), before_upstream);

  let second = merge::abort(&repo, &names, false);
  assert!(matches!(second, Err(GitumError::NoStateFile)));
}

/// A `save_repo_state` call whose mainline commit carries no diff against
/// the prior rebased tip leaves an empty `_current_patch_` file and still
/// advances the recorded upstream tip — mirrors a no-op `merge` step.
#[test]
fn empty_effective_diff_step_is_skipped_but_still_recorded() {
  let (dir, repo) = init_repo();
  write(dir.path(), "a.txt", "one\n");
  repo.add_all().unwrap();
  repo.commit("initial", None).unwrap();
  let names = names();
  orchestrator::create(&repo, "origin", &names).unwrap();

  series::save_repo_state(&repo, &names, None, Some("no-op sync"), None).unwrap();

  let blob = repo.show_blob(&names.patches, gitum_core::LAST_PATCH_FILE).unwrap();
  assert!(blob.is_empty());
}
