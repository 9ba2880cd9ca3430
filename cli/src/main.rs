use std::path::PathBuf;
use std::process::exit;

use clap::{Parser, Subcommand};
use gitum_core::git::GitRepo;
use gitum_core::{config, merge, orchestrator, pull, BranchNames, GitumError};

#[derive(Parser, Debug)]
#[command(author, version, about = "Resumable multi-branch upstream synchronization", long_about = None)]
struct Cli {
  /// Path to the repository to operate on
  #[arg(long, global = true, value_name = "PATH")]
  repo: Option<PathBuf>,

  /// Raise the log level; repeat for more detail (-v, -vv)
  #[arg(short, long, global = true, action = clap::ArgAction::Count)]
  verbose: u8,

  /// Suppress everything but warnings and errors
  #[arg(short, long, global = true)]
  quiet: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
  /// Set up the upstream/rebased/mainline/patches work branches
  Create {
    #[arg(long, value_name = "R")]
    remote: Option<String>,
    #[arg(long, value_name = "C")]
    current: Option<String>,
    #[arg(long, value_name = "U")]
    upstream: Option<String>,
    #[arg(long, value_name = "B")]
    rebased: Option<String>,
    #[arg(long, value_name = "P")]
    patches: Option<String>,
  },
  /// Fold new upstream commits into the rebased patch stack
  Merge {
    #[arg(long, value_name = "B")]
    branch: Option<String>,
    #[arg(long)]
    r#continue: bool,
    #[arg(long)]
    skip: bool,
    #[arg(long)]
    abort: bool,
    #[arg(long)]
    track: bool,
  },
  /// Fold changes made directly on rebased back into the patch series
  Update {
    #[arg(long, value_name = "TEXT")]
    message: Option<String>,
  },
  /// Rebuild the repository from a point in the patch-series history
  Restore {
    #[arg(long, value_name = "C")]
    commit: Option<String>,
    /// Rebuild only the rebased branch instead of the whole repository
    #[arg(long)]
    full: bool,
  },
  /// Bootstrap a fresh repository from a remote gitum clone
  Clone {
    git_repo: String,
    repo_dir: Option<PathBuf>,
  },
  /// Synchronize local patch-series commits against a remote clone
  Pull {
    remote: Option<String>,
    #[arg(long)]
    track: bool,
    #[arg(long)]
    resolved: bool,
    #[arg(long)]
    skip: bool,
    #[arg(long)]
    abort: bool,
  },
  /// Push upstream/mainline/patches (and gitum-config) to a remote
  Push {
    remote: Option<String>,
    #[arg(long)]
    track: bool,
  },
  /// Tear down work branches and/or bookkeeping files
  Remove {
    #[arg(long)]
    full: bool,
    #[arg(long)]
    branches: bool,
    #[arg(long)]
    configfiles: bool,
  },
  /// Report whether the rebased stack is in sync
  Status,
}

fn init_logging(verbose: u8, quiet: bool) {
  let level = if quiet {
    "warn"
  } else {
    match verbose {
      0 => "info",
      1 => "debug",
      _ => "trace",
    }
  };
  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn resolve_repo(repo: Option<PathBuf>) -> PathBuf {
  repo.unwrap_or_else(|| PathBuf::from("."))
}

fn load_names(repo: &GitRepo) -> Result<BranchNames, GitumError> {
  config::load_branch_names(repo)
}

fn run(cli: Cli) -> Result<(), GitumError> {
  let repo = GitRepo::new(resolve_repo(cli.repo));

  match cli.command {
    Commands::Create {
      remote,
      current,
      upstream,
      rebased,
      patches,
    } => {
      let defaults = BranchNames::default();
      let names = BranchNames {
        mainline: current.unwrap_or(defaults.mainline),
        upstream: upstream.unwrap_or(defaults.upstream),
        rebased: rebased.unwrap_or(defaults.rebased),
        patches: patches.unwrap_or(defaults.patches),
      };
      orchestrator::create(&repo, &remote.unwrap_or_else(|| "origin".to_string()), &names)
    }
    Commands::Merge {
      branch,
      r#continue,
      skip,
      abort,
      track,
    } => {
      let names = load_names(&repo)?;
      if abort {
        merge::abort(&repo, &names, false)
      } else if r#continue {
        merge::continue_merge(&repo, &names, None)
      } else if skip {
        merge::continue_merge(&repo, &names, Some("--skip"))
      } else {
        merge::merge(&repo, &names, branch.as_deref(), track)
      }
    }
    Commands::Update { message } => {
      let names = load_names(&repo)?;
      orchestrator::update(&repo, &names, message.as_deref())
    }
    Commands::Restore { commit, full } => {
      let names = load_names(&repo)?;
      orchestrator::restore(&repo, &names, commit.as_deref(), !full)
    }
    Commands::Clone { git_repo, repo_dir } => {
      let target = repo_dir.unwrap_or_else(|| PathBuf::from("."));
      std::fs::create_dir_all(&target).map_err(|e| GitumError::Io { source: e, path: target.clone() })?;
      let repo = GitRepo::new(target);
      repo.run(&["init", "-q"])?;
      orchestrator::clone(&repo, &git_repo)
    }
    Commands::Pull {
      remote,
      track,
      resolved,
      skip,
      abort,
    } => {
      let names = load_names(&repo)?;
      if abort {
        pull::continue_pull(&repo, &names, "--abort")
      } else if resolved {
        pull::continue_pull(&repo, &names, "--resolved")
      } else if skip {
        pull::continue_pull(&repo, &names, "--skip")
      } else {
        pull::pull(&repo, &names, remote.as_deref(), track)
      }
    }
    Commands::Push { remote, track } => {
      let names = load_names(&repo)?;
      pull::push(&repo, &names, remote.as_deref(), track)
    }
    Commands::Remove { full, branches, configfiles } => {
      let names = load_names(&repo)?;
      if configfiles {
        orchestrator::remove_config_files(&repo)
      } else if branches {
        orchestrator::remove_branches(&repo, &names)
      } else if full {
        orchestrator::remove_all(&repo, &names)
      } else {
        orchestrator::remove_all(&repo, &names)
      }
    }
    Commands::Status => {
      let names = load_names(&repo)?;
      orchestrator::status(&repo, &names)
    }
  }
}

fn describe(err: &GitumError) -> (&'static str, String) {
  match err {
    GitumError::RepoIsDirty => ("repo-dirty", err.to_string()),
    GitumError::NotUptodate { .. } => ("not-uptodate", err.to_string()),
    GitumError::NoConfigFile => ("no-config", err.to_string()),
    GitumError::NoStateFile => ("no-suspended-operation", err.to_string()),
    GitumError::RebaseFailed { message } => ("conflict", message.clone()),
    GitumError::PatchFailed { .. } => ("patch-conflict", err.to_string()),
    GitumError::CherryPickFailed { .. } => ("conflict", err.to_string()),
    GitumError::BrokenRepo { .. } => ("broken-repo", err.to_string()),
    GitumError::NoGitumRemote => ("no-remote", err.to_string()),
    GitumError::NoMergeBranch => ("no-merge-branch", err.to_string()),
    GitumError::BranchExists(_) => ("branch-exists", err.to_string()),
    GitumError::NotSupported => ("not-supported", err.to_string()),
    GitumError::GitCommand { .. } => ("git-error", err.to_string()),
    GitumError::Io { .. } => ("io-error", err.to_string()),
    GitumError::Config(_) => ("config-error", err.to_string()),
    GitumError::TomlParse(_) | GitumError::TomlSerialize(_) => ("config-error", err.to_string()),
  }
}

fn main() {
  let cli = Cli::parse();
  init_logging(cli.verbose, cli.quiet);

  if let Err(e) = run(cli) {
    let (category, message) = describe(&e);
    eprintln!("error [{category}]: {message}");
    exit(1);
  }
}
