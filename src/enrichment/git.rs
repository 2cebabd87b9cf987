//! Version-control lookups: repository root, origin remote and line blame

use crate::enrichment::process::{path_argument, ProcessInvoker};
use crate::error::{EnrichmentField, EnrichmentFieldFailure};
use crate::events::BlameInfo;
use std::path::{Component, Path, PathBuf};

const GIT: &str = "git";
const SHORT_COMMIT_LEN: usize = 8;

/// Nearest ancestor of `start` (inclusive) that holds a `.git` entry
///
/// Both `.git` directories and `.git` files (worktrees, submodules) count.
pub fn find_repository_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(".git").exists())
        .map(Path::to_path_buf)
}

/// URL of the `origin` remote of the repository at `root`
pub fn resolve_remote(
    invoker: &dyn ProcessInvoker,
    root: &Path,
) -> Result<String, EnrichmentFieldFailure> {
    let args = vec![
        "config".to_string(),
        "--get".to_string(),
        "remote.origin.url".to_string(),
    ];

    invoker
        .run(GIT, &args, root)
        .map_err(|e| EnrichmentFieldFailure::new(EnrichmentField::GitRemote, e.to_string()))
}

/// Authorship of `line` in `file`, which must live under `root`
pub fn resolve_blame(
    invoker: &dyn ProcessInvoker,
    root: &Path,
    file: &Path,
    line: u32,
) -> Result<BlameInfo, EnrichmentFieldFailure> {
    let failure = |reason: String| EnrichmentFieldFailure::new(EnrichmentField::Blame, reason);

    let relative = file.strip_prefix(root).map_err(|_| {
        failure(format!(
            "{} is outside repository {}",
            file.display(),
            root.display()
        ))
    })?;
    if relative
        .components()
        .any(|component| matches!(component, Component::ParentDir))
    {
        return Err(failure(format!(
            "{} escapes repository {}",
            file.display(),
            root.display()
        )));
    }
    let relative = path_argument(relative).map_err(|e| failure(e.to_string()))?;

    let args = vec![
        "blame".to_string(),
        "-L".to_string(),
        format!("{},{}", line, line),
        "--porcelain".to_string(),
        "--".to_string(),
        relative,
    ];

    let output = invoker
        .run(GIT, &args, root)
        .map_err(|e| failure(e.to_string()))?;

    parse_porcelain(&output).ok_or_else(|| failure("incomplete porcelain output".to_string()))
}

/// Extract author, email, short commit and summary from `git blame --porcelain`
///
/// Returns `None` unless all four fields are present.
pub fn parse_porcelain(output: &str) -> Option<BlameInfo> {
    let mut lines = output.lines();

    let header = lines.next()?;
    let sha = header.split_whitespace().next()?;
    if sha.len() != 40 || !sha.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }

    let mut author = None;
    let mut email = None;
    let mut summary = None;

    for line in lines {
        if let Some(value) = line.strip_prefix("author ") {
            author = Some(value.to_string());
        } else if let Some(value) = line.strip_prefix("author-mail ") {
            email = Some(value.trim_start_matches('<').trim_end_matches('>').to_string());
        } else if let Some(value) = line.strip_prefix("summary ") {
            summary = Some(value.to_string());
        }
    }

    Some(BlameInfo {
        author: author?,
        email: email?,
        commit: sha[..SHORT_COMMIT_LEN].to_string(),
        summary: summary?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrichment::process::MockProcessInvoker;
    use crate::error::ProcessError;
    use tempfile::TempDir;

    const PORCELAIN: &str = "\
3f2a9c1e4b5d6f708192a3b4c5d6e7f809112233 7 7 1
author Jane Doe
author-mail <jane@example.com>
author-time 1700000000
author-tz +0100
committer Jane Doe
committer-mail <jane@example.com>
committer-time 1700000000
committer-tz +0100
summary Handle empty cart on checkout
filename src/Checkout.php
\t$total = $cart->total();";

    #[test]
    fn test_parse_porcelain() {
        let blame = parse_porcelain(PORCELAIN).unwrap();
        assert_eq!(blame.author, "Jane Doe");
        assert_eq!(blame.email, "jane@example.com");
        assert_eq!(blame.commit, "3f2a9c1e");
        assert_eq!(blame.summary, "Handle empty cart on checkout");
    }

    #[test]
    fn test_parse_porcelain_requires_all_fields() {
        let without_summary: String = PORCELAIN
            .lines()
            .filter(|line| !line.starts_with("summary "))
            .collect::<Vec<_>>()
            .join("\n");
        assert!(parse_porcelain(&without_summary).is_none());
        assert!(parse_porcelain("").is_none());
        assert!(parse_porcelain("fatal: no such path").is_none());
    }

    #[test]
    fn test_find_repository_root_walks_upward() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("shop");
        let nested = root.join("src").join("Controller");
        std::fs::create_dir_all(root.join(".git")).unwrap();
        std::fs::create_dir_all(&nested).unwrap();

        assert_eq!(find_repository_root(&nested), Some(root.clone()));
        assert_eq!(find_repository_root(&root), Some(root));
    }

    #[test]
    fn test_find_repository_root_accepts_git_file() {
        let dir = TempDir::new().unwrap();
        let worktree = dir.path().join("wt");
        std::fs::create_dir_all(&worktree).unwrap();
        std::fs::write(worktree.join(".git"), "gitdir: /elsewhere\n").unwrap();

        assert_eq!(find_repository_root(&worktree), Some(worktree));
    }

    #[test]
    fn test_resolve_remote_invokes_git_config() {
        let mut invoker = MockProcessInvoker::new();
        invoker
            .expect_run()
            .withf(|program: &str, args: &[String], cwd: &Path| {
                program == "git"
                    && args == ["config", "--get", "remote.origin.url"]
                    && cwd == Path::new("/srv/shop")
            })
            .times(1)
            .returning(|_, _, _| Ok("git@github.com:acme/shop.git".to_string()));

        let remote = resolve_remote(&invoker, Path::new("/srv/shop")).unwrap();
        assert_eq!(remote, "git@github.com:acme/shop.git");
    }

    #[test]
    fn test_resolve_blame_uses_relative_path_after_separator() {
        let mut invoker = MockProcessInvoker::new();
        invoker
            .expect_run()
            .withf(|_program: &str, args: &[String], cwd: &Path| {
                args == ["blame", "-L", "7,7", "--porcelain", "--", "src/Checkout.php"]
                    && cwd == Path::new("/srv/shop")
            })
            .times(1)
            .returning(|_, _, _| Ok(PORCELAIN.to_string()));

        let blame = resolve_blame(
            &invoker,
            Path::new("/srv/shop"),
            Path::new("/srv/shop/src/Checkout.php"),
            7,
        )
        .unwrap();
        assert_eq!(blame.commit, "3f2a9c1e");
    }

    #[test]
    fn test_resolve_blame_rejects_file_outside_root() {
        let invoker = MockProcessInvoker::new();
        let failure = resolve_blame(
            &invoker,
            Path::new("/srv/shop"),
            Path::new("/etc/passwd"),
            1,
        )
        .unwrap_err();
        assert_eq!(failure.field, EnrichmentField::Blame);

        let failure = resolve_blame(
            &invoker,
            Path::new("/srv/shop"),
            Path::new("/srv/shop/../../etc/passwd"),
            1,
        )
        .unwrap_err();
        assert!(failure.reason.contains("escapes"));
    }

    #[test]
    fn test_resolve_blame_reports_process_failure() {
        let mut invoker = MockProcessInvoker::new();
        invoker
            .expect_run()
            .returning(|_, _, _| Err(ProcessError::NonZeroExit("exit status: 128".to_string())));

        let failure = resolve_blame(
            &invoker,
            Path::new("/srv/shop"),
            Path::new("/srv/shop/index.php"),
            3,
        )
        .unwrap_err();
        assert_eq!(failure.field, EnrichmentField::Blame);
        assert!(failure.reason.contains("128"));
    }
}
