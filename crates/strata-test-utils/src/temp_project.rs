//! Temporary source trees for integration tests.
//!
//! Files are addressed by paths relative to the project root, and artifact
//! ids produced by [`TempProject::sources`] use those same relative paths.

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use strata_core::{ArtifactId, SourceFile};
use tempfile::TempDir;
use walkdir::WalkDir;

/// A temporary source tree, removed on drop.
#[derive(Debug)]
pub struct TempProject {
    dir: TempDir,
}

impl TempProject {
    /// Create an empty project.
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("Failed to create temporary project")?;
        Ok(Self { dir })
    }

    /// Add a file and return the project.
    pub fn with_file(self, relative_path: &str, content: &str) -> Result<Self> {
        self.write(relative_path, content)?;
        Ok(self)
    }

    /// Project root.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Absolute path of a project file.
    #[must_use]
    pub fn file(&self, relative_path: &str) -> PathBuf {
        self.dir.path().join(relative_path)
    }

    /// Create or overwrite a file, creating parent directories.
    pub fn write(&self, relative_path: &str, content: &str) -> Result<PathBuf> {
        let path = self.file(relative_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content).with_context(|| format!("Failed to write {relative_path}"))?;
        Ok(path)
    }

    /// Read a file.
    pub fn read(&self, relative_path: &str) -> Result<String> {
        fs::read_to_string(self.file(relative_path))
            .with_context(|| format!("Failed to read {relative_path}"))
    }

    /// Delete a file.
    pub fn remove(&self, relative_path: &str) -> Result<()> {
        fs::remove_file(self.file(relative_path))
            .with_context(|| format!("Failed to remove {relative_path}"))
    }

    /// Set a file's modification time.
    pub fn set_mtime(&self, relative_path: &str, mtime: SystemTime) -> Result<()> {
        let file = File::options()
            .write(true)
            .open(self.file(relative_path))
            .with_context(|| format!("Failed to open {relative_path}"))?;
        file.set_modified(mtime)
            .with_context(|| format!("Failed to set mtime of {relative_path}"))
    }

    /// Backdate a file's modification time by `by`, moving it out of the
    /// racy-timestamp window.
    pub fn age(&self, relative_path: &str, by: Duration) -> Result<SystemTime> {
        let mtime = SystemTime::now() - by;
        self.set_mtime(relative_path, mtime)?;
        Ok(mtime)
    }

    /// Backdate every file in the project by `by`.
    pub fn age_all(&self, by: Duration) -> Result<()> {
        for path in self.files() {
            let relative = path
                .strip_prefix(self.path())
                .context("File outside project")?
                .to_string_lossy()
                .into_owned();
            self.age(&relative, by)?;
        }
        Ok(())
    }

    /// Current modification time of a file.
    pub fn mtime(&self, relative_path: &str) -> Result<SystemTime> {
        Ok(fs::metadata(self.file(relative_path))?.modified()?)
    }

    /// Absolute paths of every regular file, sorted.
    #[must_use]
    pub fn files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = WalkDir::new(self.path())
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(walkdir::DirEntry::into_path)
            .collect();
        files.sort();
        files
    }

    /// Every file as a [`SourceFile`] whose id is its project-relative path.
    pub fn sources(&self, language: &str) -> Result<Vec<SourceFile>> {
        self.files()
            .into_iter()
            .map(|path| {
                let relative = path
                    .strip_prefix(self.path())
                    .context("File outside project")?
                    .to_path_buf();
                Ok(SourceFile::new(ArtifactId::new(relative, language), path))
            })
            .collect()
    }

    /// The [`SourceFile`] for one project file, whether or not it exists.
    #[must_use]
    pub fn source(&self, relative_path: &str, language: &str) -> SourceFile {
        SourceFile::new(
            ArtifactId::new(relative_path, language),
            self.file(relative_path),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_sources_use_relative_ids() {
        let project = TempProject::new()
            .unwrap()
            .with_file("src/a.txt", "a")
            .unwrap()
            .with_file("b.txt", "b")
            .unwrap();
        let ids: Vec<String> = project
            .sources("txt")
            .unwrap()
            .iter()
            .map(|s| s.id.path().to_string())
            .collect();
        assert_eq!(ids, vec!["b.txt".to_string(), "src/a.txt".to_string()]);
    }

    #[test]
    fn test_set_mtime() {
        let project = TempProject::new().unwrap().with_file("a.txt", "a").unwrap();
        let when = SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000);
        project.set_mtime("a.txt", when).unwrap();
        assert_eq!(project.mtime("a.txt").unwrap(), when);
    }
}
