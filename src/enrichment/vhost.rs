use log::debug;
use std::io;
use std::path::{Path, PathBuf};

/// Finds the virtual-host definition serving a file
#[cfg_attr(test, mockall::automock)]
pub trait VhostLocator {
    /// Search `vhost_dir` for the definition referencing `file`'s directory tree
    ///
    /// `Ok(None)` means the search completed without a match.
    fn locate(&self, vhost_dir: &Path, file: &Path) -> io::Result<Option<PathBuf>>;
}

/// Scans the regular files of a vhost directory in-process
///
/// Starting at the file's directory and moving towards the filesystem root
/// (the root itself excluded), the first definition file, in name order,
/// that names the directory as a complete path wins. A definition naming a
/// sibling or a descendant of the directory, such as `/var/www/shop2` when
/// looking for `/var/www`, does not count.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectoryVhostLocator;

impl DirectoryVhostLocator {
    pub fn new() -> Self {
        Self
    }

    fn definitions(vhost_dir: &Path) -> io::Result<Vec<(PathBuf, String)>> {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(vhost_dir)? {
            let path = entry?.path();
            // Follows symlinks, which is how sites-enabled is usually populated
            if path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();

        let mut definitions = Vec::with_capacity(paths.len());
        for path in paths {
            match std::fs::read(&path) {
                Ok(bytes) => {
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    definitions.push((path, text));
                }
                Err(e) => {
                    debug!(
                        target: "logwatch::enricher",
                        "Skipping unreadable vhost file path={} error={}",
                        path.display(),
                        e
                    );
                }
            }
        }
        Ok(definitions)
    }
}

impl VhostLocator for DirectoryVhostLocator {
    fn locate(&self, vhost_dir: &Path, file: &Path) -> io::Result<Option<PathBuf>> {
        let definitions = Self::definitions(vhost_dir)?;
        if definitions.is_empty() {
            return Ok(None);
        }

        let Some(start) = file.parent() else {
            return Ok(None);
        };

        for dir in start.ancestors() {
            if dir.parent().is_none() {
                break;
            }
            let Some(needle) = dir.to_str() else {
                continue;
            };
            if needle.is_empty() {
                continue;
            }

            if let Some((path, _)) = definitions
                .iter()
                .find(|(_, text)| mentions_directory(text, needle))
            {
                return Ok(Some(path.clone()));
            }
        }

        Ok(None)
    }
}

/// Whether `text` contains `dir` as a standalone path token, optionally with
/// a trailing slash
fn mentions_directory(text: &str, dir: &str) -> bool {
    text.match_indices(dir).any(|(index, _)| {
        let starts_token = text[..index].chars().next_back().map_or(true, is_token_boundary);
        let rest = &text[index + dir.len()..];
        let rest = rest.strip_prefix('/').unwrap_or(rest);
        let ends_token = rest.chars().next().map_or(true, is_token_boundary);
        starts_token && ends_token
    })
}

fn is_token_boundary(c: char) -> bool {
    c.is_whitespace() || matches!(c, '"' | '\'' | '<' | '>' | ';' | '=')
}
