//! Version-control provider
//!
//! [`VersionControl`] is the seam between the engine and git. [`Git`] drives
//! the `git` binary; tests substitute an in-memory fake.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

/// One commit from `git log`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitInfo {
    pub hash: String,
    pub short_hash: String,
    pub author: String,
    /// ISO 8601 author date
    pub date: String,
    pub subject: String,
}

/// Working-copy status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoStatus {
    /// Current branch, `None` when HEAD is detached
    pub branch: Option<String>,
    /// Repo-relative paths with staged or unstaged changes
    pub changed_paths: Vec<String>,
}

/// Operations the engine needs from version control
pub trait VersionControl {
    fn is_repository(&self, path: &Path) -> bool;

    fn status(&self, path: &Path) -> Result<RepoStatus>;

    fn repo_root(&self, path: &Path) -> Result<PathBuf>;

    /// Nearest common ancestor of two refs, `None` for unrelated histories
    fn merge_base(&self, root: &Path, a: &str, b: &str) -> Result<Option<String>>;

    /// Paths a merge of `target` into HEAD would leave textually conflicted
    fn dry_run_merge(&self, root: &Path, target: &str) -> Result<Vec<String>>;

    /// Newest-first commits that touched `rel_path`
    fn file_history(&self, root: &Path, rel_path: &str, limit: usize) -> Result<Vec<CommitInfo>>;

    fn list_tags(&self, root: &Path, pattern: &str) -> Result<Vec<String>>;

    /// Commit a ref points at, `None` if it does not resolve
    fn resolve_ref(&self, root: &Path, reference: &str) -> Result<Option<String>>;

    /// File content at a ref, `None` if the ref or path does not exist there
    fn read_file_at_ref(&self, root: &Path, rel_path: &str, reference: &str)
        -> Result<Option<String>>;

    /// Stage exactly `paths`, commit them, return the new commit hash
    fn stage_and_commit(&self, root: &Path, paths: &[&str], message: &str) -> Result<String>;

    fn create_annotated_tag(&self, root: &Path, name: &str, message: &str, target: &str)
        -> Result<()>;
}

/// [`VersionControl`] backed by the `git` command line
#[derive(Debug, Clone)]
pub struct Git {
    program: PathBuf,
}

impl Default for Git {
    fn default() -> Self {
        Self::new()
    }
}

impl Git {
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("git"),
        }
    }

    /// Use a specific git executable
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn output(&self, dir: &Path, args: &[&str]) -> Result<Output> {
        tracing::debug!(dir = %dir.display(), args = ?args, "git");
        Ok(Command::new(&self.program)
            .args(args)
            .current_dir(dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()?)
    }

    /// Run git and return trimmed stdout, or a `Git` error with stderr
    fn run(&self, dir: &Path, args: &[&str]) -> Result<String> {
        let output = self.output(dir, args)?;
        if !output.status.success() {
            return Err(command_failed(args, &output));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
    }
}

fn command_failed(args: &[&str], output: &Output) -> Error {
    Error::Git {
        command: args.first().copied().unwrap_or_default().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
}

fn non_empty_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Field separator for `git log --format`
const FIELD_SEP: char = '\x1f';

fn parse_log(text: &str) -> Vec<CommitInfo> {
    text.lines()
        .filter_map(|line| {
            let mut fields = line.splitn(5, FIELD_SEP);
            Some(CommitInfo {
                hash: fields.next()?.to_string(),
                short_hash: fields.next()?.to_string(),
                author: fields.next()?.to_string(),
                date: fields.next()?.to_string(),
                subject: fields.next()?.to_string(),
            })
        })
        .collect()
}

/// Paths from `git status --porcelain`, including both sides of renames
fn parse_porcelain(text: &str) -> Vec<String> {
    text.lines()
        .filter(|line| line.len() > 3)
        .flat_map(|line| {
            line[3..]
                .split(" -> ")
                .map(|p| p.trim_matches('"').to_string())
                .collect::<Vec<_>>()
        })
        .collect()
}

impl VersionControl for Git {
    fn is_repository(&self, path: &Path) -> bool {
        if !path.is_dir() {
            return false;
        }
        self.run(path, &["rev-parse", "--is-inside-work-tree"])
            .map(|out| out == "true")
            .unwrap_or(false)
    }

    fn status(&self, path: &Path) -> Result<RepoStatus> {
        // symbolic-ref also names unborn branches and fails on a detached HEAD
        let branch = self
            .output(path, &["symbolic-ref", "--short", "-q", "HEAD"])
            .ok()
            .filter(|o| o.status.success())
            .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
            .filter(|b| !b.is_empty());

        let porcelain = self.run(path, &["status", "--porcelain", "--untracked-files=all"])?;

        Ok(RepoStatus {
            branch,
            changed_paths: parse_porcelain(&porcelain),
        })
    }

    fn repo_root(&self, path: &Path) -> Result<PathBuf> {
        if !path.is_dir() {
            return Err(Error::NotARepository {
                path: path.to_path_buf(),
            });
        }
        match self.run(path, &["rev-parse", "--show-toplevel"]) {
            Ok(root) => Ok(PathBuf::from(root)),
            Err(Error::Git { .. }) => Err(Error::NotARepository {
                path: path.to_path_buf(),
            }),
            Err(e) => Err(e),
        }
    }

    fn merge_base(&self, root: &Path, a: &str, b: &str) -> Result<Option<String>> {
        let output = self.output(root, &["merge-base", a, b])?;
        // Exit status 1 with empty output means no common ancestor
        match output.status.code() {
            Some(0) => {
                let hash = String::from_utf8_lossy(&output.stdout).trim().to_string();
                Ok(Some(hash).filter(|h| !h.is_empty()))
            }
            Some(1) if output.stderr.is_empty() => Ok(None),
            _ => Err(command_failed(&["merge-base"], &output)),
        }
    }

    fn dry_run_merge(&self, root: &Path, target: &str) -> Result<Vec<String>> {
        let args = [
            "merge-tree",
            "--write-tree",
            "--name-only",
            "--no-messages",
            "HEAD",
            target,
        ];
        let output = self.output(root, &args)?;
        match output.status.code() {
            Some(0) => Ok(Vec::new()),
            // First line is the tree id, the rest are conflicted paths
            Some(1) => Ok(non_empty_lines(&String::from_utf8_lossy(&output.stdout))
                .into_iter()
                .skip(1)
                .collect()),
            _ => Err(command_failed(&args, &output)),
        }
    }

    fn file_history(&self, root: &Path, rel_path: &str, limit: usize) -> Result<Vec<CommitInfo>> {
        let limit = limit.to_string();
        let format = format!(
            "--format=%H{sep}%h{sep}%an{sep}%aI{sep}%s",
            sep = FIELD_SEP
        );
        // An unborn branch has no history rather than an error
        if self.resolve_ref(root, "HEAD")?.is_none() {
            return Ok(Vec::new());
        }
        let out = self.run(root, &["log", "-n", &limit, &format, "--", rel_path])?;
        Ok(parse_log(&out))
    }

    fn list_tags(&self, root: &Path, pattern: &str) -> Result<Vec<String>> {
        let out = self.run(root, &["tag", "--list", pattern])?;
        Ok(non_empty_lines(&out))
    }

    fn resolve_ref(&self, root: &Path, reference: &str) -> Result<Option<String>> {
        let spec = format!("{}^{{commit}}", reference);
        let output = self.output(root, &["rev-parse", "--verify", "--quiet", &spec])?;
        if !output.status.success() {
            return Ok(None);
        }
        let hash = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(Some(hash).filter(|h| !h.is_empty()))
    }

    fn read_file_at_ref(
        &self,
        root: &Path,
        rel_path: &str,
        reference: &str,
    ) -> Result<Option<String>> {
        let object = format!("{}:{}", reference, rel_path);
        let output = self.output(root, &["show", &object])?;
        if !output.status.success() {
            tracing::debug!(object = %object, "not present at ref");
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned()))
    }

    fn stage_and_commit(&self, root: &Path, paths: &[&str], message: &str) -> Result<String> {
        let mut add = vec!["add", "--"];
        add.extend_from_slice(paths);
        self.run(root, &add)?;

        let mut commit = vec!["commit", "--no-verify", "-m", message, "--"];
        commit.extend_from_slice(paths);
        self.run(root, &commit)?;

        self.run(root, &["rev-parse", "HEAD"])
    }

    fn create_annotated_tag(
        &self,
        root: &Path,
        name: &str,
        message: &str,
        target: &str,
    ) -> Result<()> {
        self.run(root, &["tag", "-a", name, "-m", message, target])?;
        Ok(())
    }
}

/// Path of `file` relative to `root` in git's forward-slash form
pub fn repo_relative(root: &Path, file: &Path) -> Option<String> {
    let root = root.canonicalize().ok()?;
    // The file may not exist yet; canonicalize its directory instead
    let file = match file.canonicalize() {
        Ok(path) => path,
        Err(_) => file.parent()?.canonicalize().ok()?.join(file.file_name()?),
    };
    let rel = file.strip_prefix(&root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
