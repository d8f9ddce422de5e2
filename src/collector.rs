use anyhow::{Context, Result};
use itertools::Itertools;
use log::{info, warn};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::sync::OnceLock;
use tempfile::TempDir;
use thiserror::Error;

pub const CLASS2D_DIR: &str = "Class2D";
const DATA_MARKER: &str = "_data.star";
const EXCLUDE_MARKER: &str = "sub";
const PRUNED_MARKER: &str = "_ct";

fn pruned_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"_ct(\d+)_it(\d+)_data\.star").unwrap())
}

// (ct, it) counters of a pruned result name. The last "_ct" wins, matching
// names like "run_ct3_ct12_it025_data.star" from continued runs.
fn pruned_key(name: &str) -> Option<(u64, u64)> {
    let caps = pruned_pattern().captures_iter(name).last()?;
    let ct = caps[1].parse().ok()?;
    let it = caps[2].parse().ok()?;
    Some((ct, it))
}

/// Pick the most advanced `_data.star` among `names`.
///
/// Results from continued runs (`_ct<N>_it<M>`) take precedence over plain
/// iteration files whatever their names; among them the highest
/// (continuation, iteration) pair wins. Otherwise the lexicographically
/// largest plain name is chosen, which orders `_it###` correctly because
/// RELION zero pads iteration numbers.
pub fn select_latest<S: AsRef<str>>(names: &[S]) -> Option<String> {
    let (pruned, plain): (Vec<&str>, Vec<&str>) = names
        .iter()
        .map(|name| name.as_ref())
        .filter(|name| name.contains(DATA_MARKER) && !name.contains(EXCLUDE_MARKER))
        .partition(|name| name.contains(PRUNED_MARKER));

    if !pruned.is_empty() {
        let ranked: Vec<(&str, (u64, u64))> = pruned
            .iter()
            .filter_map(|&name| match pruned_key(name) {
                Some(key) => Some((name, key)),
                None => {
                    warn!("Ignoring '{}': unable to read iteration counters", name);
                    None
                }
            })
            .collect();

        if let Some((name, _)) = ranked.into_iter().max_by_key(|&(name, key)| (key, name)) {
            return Some(name.to_string());
        }
    }

    plain.into_iter().max().map(|name| name.to_string())
}

/// `<prefix>/Class2D/<job>/<file>` with path separators replaced by `_`.
/// Empty components are left out.
pub fn flattened_name(prefix: &str, job: &str, file: &str) -> String {
    [prefix, CLASS2D_DIR, job, file]
        .iter()
        .filter(|part| !part.is_empty())
        .join("/")
        .replace('/', "_")
}

/// Basename of the project directory, after resolving `.`, `..` and
/// trailing separators.
pub fn default_prefix(project: &Path) -> Result<String> {
    let absolute = std::path::absolute(project)
        .with_context(|| format!("Unable to resolve '{}'", project.display()))?;

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            std::path::Component::CurDir => {}
            std::path::Component::ParentDir => {
                normalized.pop();
            }
            c => normalized.push(c),
        }
    }

    Ok(normalized
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default())
}

// Job directories under Class2D, sorted by name. Symlinks (RELION's job
// aliases) are skipped so each job is collected once.
fn job_dirs(project: &Path) -> Result<Vec<(String, PathBuf)>> {
    let class2d = project.join(CLASS2D_DIR);
    let entries = fs::read_dir(&class2d)
        .with_context(|| format!("Unable to list '{}'", class2d.display()))?;

    let mut jobs = Vec::new();
    for entry in entries {
        let entry = entry?;
        let file_type = fs::symlink_metadata(entry.path())?.file_type();
        if file_type.is_dir() {
            jobs.push((entry.file_name().to_string_lossy().into_owned(), entry.path()));
        }
    }

    Ok(jobs.into_iter().sorted_by(|a, b| a.0.cmp(&b.0)).collect())
}

/// Copy the latest result of every Class2D job into `dest`, returning the
/// paths written.
pub fn collect(project: &Path, dest: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();

    for (job, dir) in job_dirs(project)? {
        let names: Vec<String> = fs::read_dir(&dir)
            .with_context(|| format!("Unable to list '{}'", dir.display()))?
            .map(|entry| entry.map(|entry| entry.file_name().to_string_lossy().into_owned()))
            .collect::<Result<_, _>>()?;

        let latest = match select_latest(&names) {
            Some(latest) => latest,
            None => {
                warn!("Folder {} does not include data star files", dir.display());
                continue;
            }
        };

        let source = dir.join(&latest);
        let target = dest.join(flattened_name(prefix, &job, &latest));
        fs::copy(&source, &target).with_context(|| {
            format!(
                "Unable to copy '{}' to '{}'",
                source.display(),
                target.display()
            )
        })?;
        info!("{} -> {}", source.display(), target.display());
        written.push(target);
    }

    Ok(written)
}

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("unable to start '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' exited with {status}")]
    CommandFailed { command: String, status: ExitStatus },
}

/// Local directory that collects files before a single remote copy. The
/// directory is removed when the staging area is dropped, on success or
/// error alike.
pub struct StagingArea {
    dir: TempDir,
}

impl StagingArea {
    pub fn new() -> Result<StagingArea> {
        let dir = TempDir::new().context("Unable to create staging directory")?;
        Ok(StagingArea { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Run `<command> <files...> <destination>` and wait for it.
    pub fn relay(&self, files: &[PathBuf], destination: &str, command: &str) -> Result<(), RelayError> {
        let status = Command::new(command)
            .args(files)
            .arg(destination)
            .status()
            .map_err(|source| RelayError::Spawn {
                command: command.to_string(),
                source,
            })?;

        if !status.success() {
            return Err(RelayError::CommandFailed {
                command: command.to_string(),
                status,
            });
        }
        Ok(())
    }
}
