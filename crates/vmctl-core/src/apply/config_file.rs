//! Line-oriented substitution in text configuration files.
//!
//! Every rule is a regex with one capture group (the key and assignment
//! prefix). A line matching a rule is rewritten to `<prefix>"<value>"`;
//! the rest of the line, e.g. a trailing `;`, is kept. Before a changed
//! file is replaced, the original is copied to `<path>.<unix-ts>.back`;
//! if the replacement fails the backup is copied back.

use std::io::Write;
use std::path::{Path, PathBuf};

use regex::{Captures, Regex};
use tracing::{debug, info, warn};

use crate::outcome::Outcome;

/// One `key = "value"` rewrite rule.
#[derive(Debug, Clone)]
pub struct Substitution {
    pattern: Regex,
    value: String,
}

impl Substitution {
    /// Build a rule from a raw pattern. The pattern must have a capture
    /// group 1 holding the text kept in front of the quoted value.
    pub fn new(pattern: &str, value: impl Into<String>) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            value: value.into(),
        })
    }

    /// Rule for an `KEY = "..."` assignment at the start of a line.
    pub fn quoted(key: &str, value: impl Into<String>) -> Result<Self, regex::Error> {
        let pattern = format!(r#"^(\s*{}\s*=\s*)"[^"]*""#, regex::escape(key));
        Self::new(&pattern, value)
    }

    fn rewrite(&self, line: &str) -> String {
        self.pattern
            .replace_all(line, |caps: &Captures<'_>| format!("{}\"{}\"", &caps[1], self.value))
            .into_owned()
    }
}

/// Edits one configuration file in place.
#[derive(Debug, Clone)]
pub struct ConfigFileEditor {
    path: PathBuf,
}

impl ConfigFileEditor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply every rule to every line of the file.
    pub fn apply(&self, rules: &[Substitution]) -> Outcome {
        if rules.is_empty() {
            return Outcome::ok("nothing to configure");
        }
        if !self.path.is_file() {
            warn!(path = %self.path.display(), "config file is not found");
            return Outcome::warn(format!("config file not found at {}", self.path.display()));
        }

        let original = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                return Outcome::fail(format!("failed to read {}: {e}", self.path.display()));
            }
        };

        let updated: String = original
            .split_inclusive('\n')
            .map(|line| rules.iter().fold(line.to_owned(), |acc, rule| rule.rewrite(&acc)))
            .collect();

        if updated == original {
            debug!(path = %self.path.display(), "config file already up to date");
            return Outcome::ok(format!("{} already up to date", self.path.display()));
        }

        replace_with_backup(&self.path, &updated)
    }
}

/// Replace `path` with `content`, keeping a timestamped backup.
///
/// The new content goes to a temporary file in the same directory which is
/// then renamed over the original, so readers never see a half-written
/// file. Permissions of the original are carried over.
pub fn replace_with_backup(path: &Path, content: &str) -> Outcome {
    let backup = backup_path(path);
    if let Err(e) = std::fs::copy(path, &backup) {
        return Outcome::fail(format!("failed to back up {}: {e}", path.display()));
    }

    match write_atomically(path, content) {
        Ok(()) => {
            info!(path = %path.display(), backup = %backup.display(), "config file updated");
            Outcome::ok(format!("{} updated", path.display()))
                .with_detail("backup", backup.display().to_string())
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to write config file, restoring backup");
            let restored = std::fs::copy(&backup, path).is_ok();
            Outcome::fail(format!("failed to write {}: {e}", path.display()))
                .with_detail("backup", backup.display().to_string())
                .with_detail("restored", restored.to_string())
        }
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let stamp = chrono::Utc::now().timestamp();
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{stamp}.back"));
    PathBuf::from(name)
}

fn write_atomically(path: &Path, content: &str) -> std::io::Result<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let permissions = std::fs::metadata(path)?.permissions();

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file().sync_all()?;
    std::fs::set_permissions(tmp.path(), permissions)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
