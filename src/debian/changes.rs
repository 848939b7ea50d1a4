//! `.changes` files produced by `dpkg-buildpackage`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::changelog::Changelog;
use super::deb822;
use crate::error::PipelineError;

/// A finished build: the `.changes` file and what it lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangesArtifact {
    pub path: PathBuf,
    pub source: String,
    pub version: String,
    pub distribution: String,
    /// The `Changes:` field, one entry per line, `.` lines turned into blanks.
    pub changes: Vec<String>,
    /// File names from the `Files:` field, relative to the `.changes` directory.
    pub files: Vec<String>,
}

impl ChangesArtifact {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading changes file '{}'", path.display()))?;
        let malformed = |reason: String| PipelineError::Metadata {
            kind: "changes file",
            path: path.to_path_buf(),
            reason,
        };

        let paragraphs = deb822::parse(&text).map_err(malformed)?;
        let paragraph = paragraphs
            .first()
            .ok_or_else(|| malformed("no paragraphs".to_string()))?;

        let field = |name: &str| {
            paragraph
                .get(name)
                .map(str::to_string)
                .ok_or_else(|| malformed(format!("missing field '{name}'")))
        };

        let changes = paragraph
            .lines("Changes")
            .into_iter()
            .map(|line| if line == "." { String::new() } else { line.to_string() })
            .collect();

        let files = paragraph
            .lines("Files")
            .into_iter()
            .filter_map(|line| line.split_whitespace().last())
            .map(str::to_string)
            .collect();

        Ok(Self {
            path: path.to_path_buf(),
            source: field("Source")?,
            version: field("Version")?,
            distribution: field("Distribution")?,
            changes,
            files,
        })
    }

    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    /// Binary packages (`.deb`) listed in the artifact, as absolute paths.
    pub fn debs(&self) -> Vec<PathBuf> {
        self.files
            .iter()
            .filter(|name| name.ends_with(".deb"))
            .map(|name| self.dir().join(name))
            .collect()
    }

    /// Distribution named by the first changelog entry embedded in `Changes:`.
    pub fn changelog_distribution(&self) -> Option<String> {
        let text = self
            .changes
            .iter()
            .skip_while(|line| line.trim().is_empty())
            .cloned()
            .collect::<Vec<_>>()
            .join("\n");
        // The embedded text is a header followed by change lines and no
        // trailer; append one so the changelog reader accepts it.
        let wrapped = format!("{text}\n -- nobody <nobody@localhost>  now\n");
        Changelog::parse(&wrapped)
            .ok()
            .map(|changelog| changelog.top().distributions.clone())
    }

    /// Copy the `.changes` file and everything it lists into `dest_dir`.
    pub fn copy_to(&self, dest_dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dest_dir)
            .with_context(|| format!("creating output directory '{}'", dest_dir.display()))?;
        for name in &self.files {
            let src = self.dir().join(name);
            let dst = dest_dir.join(name);
            fs::copy(&src, &dst).with_context(|| {
                format!("copying '{}' to '{}'", src.display(), dst.display())
            })?;
        }
        let file_name = self
            .path
            .file_name()
            .with_context(|| format!("changes path '{}' has no file name", self.path.display()))?;
        let dst = dest_dir.join(file_name);
        fs::copy(&self.path, &dst).with_context(|| {
            format!("copying '{}' to '{}'", self.path.display(), dst.display())
        })?;
        Ok(dst)
    }
}

/// Find the single `.changes` file in `dir`.
///
/// `Ok(None)` when the build produced nothing; more than one is an error.
pub fn find_single(dir: &Path) -> Result<Option<PathBuf>> {
    let mut found = Vec::new();
    for entry in fs::read_dir(dir)
        .with_context(|| format!("reading build output directory '{}'", dir.display()))?
    {
        let entry = entry
            .with_context(|| format!("iterating build output directory '{}'", dir.display()))?;
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "changes") {
            found.push(path);
        }
    }

    match found.len() {
        0 => Ok(None),
        1 => Ok(found.pop()),
        count => Err(PipelineError::ArtifactCount {
            dir: dir.to_path_buf(),
            count,
        }
        .into()),
    }
}
