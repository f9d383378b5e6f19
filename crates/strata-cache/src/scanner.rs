//! Reference artifact builder.
//!
//! Understands one construct: a line `import <path>` (optionally quoted,
//! optionally ending in `;`) declares a dependency on the file at `<path>`,
//! relative to the importing file. The artifact is a normalized listing of
//! the remaining lines, which is enough to drive the cache and the graph from
//! the command line.

use bytes::Bytes;
use std::fmt::Write as _;
use std::path::{Component, Path, PathBuf};
use strata_core::{ArtifactBuilder, ArtifactId, BuildOutput, Error, Result};

/// Builder that scans `import` lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImportScanner;

impl ImportScanner {
    /// Create a scanner.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Target of an import line, if `line` is one.
    fn import_target(line: &str) -> Option<&str> {
        let rest = line.trim().strip_prefix("import")?;
        if !rest.starts_with(char::is_whitespace) {
            return None;
        }
        let target = rest.trim().trim_end_matches(';').trim();
        let target = target
            .strip_prefix('"')
            .and_then(|t| t.strip_suffix('"'))
            .unwrap_or(target);
        (!target.is_empty()).then_some(target)
    }
}

/// Resolve `target` against the directory of `from`, folding `.` and `..`.
fn resolve(from: &Path, target: &str) -> PathBuf {
    let base = from.parent().unwrap_or_else(|| Path::new(""));
    let mut out = PathBuf::new();
    for component in base.join(target).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

impl ArtifactBuilder for ImportScanner {
    fn build(&self, id: &ArtifactId, source: &[u8]) -> Result<BuildOutput> {
        let text = std::str::from_utf8(source)
            .map_err(|e| Error::build(id.clone(), format!("not UTF-8: {e}")))?;
        let from = id.to_path_buf();

        let mut dependencies = Vec::new();
        let mut ir = format!("artifact {id}\n");
        for line in text.lines() {
            if let Some(target) = Self::import_target(line) {
                let dep = ArtifactId::new(resolve(&from, target), id.language());
                let _ = writeln!(ir, "use {dep}");
                dependencies.push(dep);
            } else if !line.trim().is_empty() {
                let _ = writeln!(ir, "  {}", line.trim());
            }
        }

        Ok(BuildOutput::new(Bytes::from(ir), dependencies))
    }
}
