//! Resolution of artifact paths into validated bundle locators.
//!
//! An artifact is a zip archive with the code workers need to run the job.
//! Paths are made absolute against the current directory and converted to
//! `file://` URLs. Every artifact must exist, be a readable regular file and
//! open as a zip archive, or the whole resolution fails.

use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};

use url::Url;

use crate::error::ConstructionError;

/// Absolute, protocol-qualified reference to a validated artifact bundle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactLocator {
    url: Url,
    path: PathBuf,
    size_bytes: u64,
}

impl ArtifactLocator {
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Local filesystem path of the bundle.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }
}

impl fmt::Display for ArtifactLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// Resolve every path, in order. Fails on the first bad entry.
pub fn resolve_artifacts<S: AsRef<str>>(
    paths: &[S],
) -> Result<Vec<ArtifactLocator>, ConstructionError> {
    paths.iter().map(|p| resolve_artifact(p.as_ref())).collect()
}

pub fn resolve_artifact(raw: &str) -> Result<ArtifactLocator, ConstructionError> {
    let malformed = |reason: &str| ConstructionError::MalformedArtifactPath {
        path: raw.to_string(),
        reason: reason.to_string(),
    };

    if raw.trim().is_empty() {
        return Err(malformed("path is empty"));
    }
    if raw.contains('\0') {
        return Err(malformed("path contains a NUL byte"));
    }

    let path = std::path::absolute(raw).map_err(|e| malformed(&e.to_string()))?;
    let url = Url::from_file_path(&path).map_err(|_| malformed("not a valid file URL"))?;
    let size_bytes = check_bundle(&path).map_err(|source| ConstructionError::InvalidArtifact {
        path: raw.to_string(),
        source,
    })?;

    tracing::debug!(artifact = %url, size_bytes, "Resolved artifact");

    Ok(ArtifactLocator {
        url,
        path,
        size_bytes,
    })
}

/// Verify that `path` is a readable zip archive and return its size.
fn check_bundle(path: &Path) -> Result<u64, crate::error::BoxError> {
    let metadata = std::fs::metadata(path)?;
    if !metadata.is_file() {
        return Err(format!("{} is not a file", path.display()).into());
    }
    let file = File::open(path)?;
    zip::ZipArchive::new(file)?;
    Ok(metadata.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    fn write_bundle(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut writer = zip::ZipWriter::new(File::create(&path).unwrap());
        writer
            .start_file("job/Main.class", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"bytecode").unwrap();
        writer.finish().unwrap();
        path
    }

    #[test]
    fn resolves_in_order_to_absolute_file_urls() {
        let dir = TempDir::new().unwrap();
        let a = write_bundle(&dir, "a.jar");
        let b = write_bundle(&dir, "b.jar");

        let locators =
            resolve_artifacts(&[b.to_str().unwrap(), a.to_str().unwrap()]).unwrap();

        assert_eq!(locators.len(), 2);
        assert_eq!(locators[0].path(), b.as_path());
        assert_eq!(locators[1].path(), a.as_path());
        assert_eq!(locators[0].url().scheme(), "file");
        assert!(locators[0].size_bytes() > 0);
    }

    #[test]
    fn relative_paths_become_absolute() {
        let dir = TempDir::new().unwrap();
        write_bundle(&dir, "rel.jar");
        let cwd = std::env::current_dir().unwrap();
        let relative = pathdiff(&dir.path().join("rel.jar"), &cwd);

        let locator = resolve_artifact(relative.to_str().unwrap()).unwrap();
        assert!(locator.path().is_absolute());
    }

    // Walks up from `base` to express `target` relative to it.
    fn pathdiff(target: &Path, base: &Path) -> PathBuf {
        let mut up = PathBuf::new();
        for _ in base.components().skip(1) {
            up.push("..");
        }
        up.join(target.strip_prefix("/").unwrap())
    }

    #[test]
    fn empty_path_is_malformed() {
        let result = resolve_artifact("");
        assert!(matches!(
            result,
            Err(ConstructionError::MalformedArtifactPath { .. })
        ));
    }

    #[test]
    fn nul_byte_is_malformed() {
        let result = resolve_artifact("job\0.jar");
        assert!(matches!(
            result,
            Err(ConstructionError::MalformedArtifactPath { .. })
        ));
    }

    #[test]
    fn missing_file_is_invalid() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.jar");
        let result = resolve_artifact(missing.to_str().unwrap());
        assert!(matches!(
            result,
            Err(ConstructionError::InvalidArtifact { .. })
        ));
    }

    #[test]
    fn directory_is_invalid() {
        let dir = TempDir::new().unwrap();
        let result = resolve_artifact(dir.path().to_str().unwrap());
        assert!(matches!(
            result,
            Err(ConstructionError::InvalidArtifact { .. })
        ));
    }

    #[test]
    fn non_zip_file_is_invalid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.jar");
        std::fs::write(&path, b"plain text, not an archive").unwrap();

        let err = resolve_artifact(path.to_str().unwrap()).unwrap_err();
        assert!(err.to_string().starts_with("Problem with artifact"));
    }

    #[test]
    fn one_bad_entry_fails_the_whole_list() {
        let dir = TempDir::new().unwrap();
        let good = write_bundle(&dir, "good.jar");
        let bad = dir.path().join("bad.jar");

        let result = resolve_artifacts(&[good.to_str().unwrap(), bad.to_str().unwrap()]);
        assert!(result.is_err());
    }
}
