//! Ruleset fingerprints.
//!
//! A fingerprint maps every rule/decoder file to the hex SHA-256 of its
//! content. Two nodes run the same ruleset exactly when their fingerprints are
//! equal; ordering plays no part in the comparison.

use crate::error::{Result, VigilError};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// File path (relative to its ruleset directory's parent) to content hash.
pub type RulesetFingerprint = BTreeMap<String, String>;

/// Source of the local node's ruleset fingerprint.
#[async_trait::async_trait]
pub trait RulesetIntegrity: Send + Sync + 'static {
    async fn fingerprint(&self) -> Result<RulesetFingerprint>;
}

/// Fingerprint computed from ruleset directories on disk.
#[derive(Debug, Clone)]
pub struct RulesetDirectories {
    dirs: Vec<PathBuf>,
}

impl RulesetDirectories {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }
}

#[async_trait::async_trait]
impl RulesetIntegrity for RulesetDirectories {
    async fn fingerprint(&self) -> Result<RulesetFingerprint> {
        let dirs = self.dirs.clone();
        // Hashing is blocking file I/O.
        tokio::task::spawn_blocking(move || compute_fingerprint(&dirs))
            .await
            .map_err(|e| VigilError::Internal {
                code: crate::error::codes::INTERNAL,
                message: format!("Ruleset hashing task failed: {}", e),
            })?
    }
}

/// Hash every regular file below `dirs`.
///
/// Keys are `<dir name>/<relative path>` with `/` separators so that nodes
/// installed under different prefixes still compare equal. Missing
/// directories contribute nothing.
pub fn compute_fingerprint(dirs: &[PathBuf]) -> Result<RulesetFingerprint> {
    let mut fingerprint = RulesetFingerprint::new();

    for dir in dirs {
        if !dir.is_dir() {
            debug!("Ruleset directory {} not present, skipping", dir.display());
            continue;
        }
        let base = dir.parent().unwrap_or(dir);

        for entry in WalkDir::new(dir).follow_links(true).sort_by_file_name() {
            let entry = entry.map_err(|e| VigilError::Io {
                message: e.to_string(),
                path: e.path().map(Path::to_path_buf),
                source: None,
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(base).unwrap_or(entry.path());
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            fingerprint.insert(key, hash_file(entry.path())?);
        }
    }

    Ok(fingerprint)
}

/// Hex SHA-256 of a file's content.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path).map_err(|e| VigilError::io_with_path(e, path))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = file
            .read(&mut buffer)
            .map_err(|e| VigilError::io_with_path(e, path))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ruleset(root: &Path, files: &[(&str, &str)]) -> Vec<PathBuf> {
        for (name, content) in files {
            let path = root.join(name);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }
        vec![root.join("rules"), root.join("decoders")]
    }

    #[test]
    fn test_hash_file_is_sha256() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.xml");
        std::fs::write(&path, b"").unwrap();
        assert_eq!(
            hash_file(&path).unwrap(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_fingerprint_keys_are_relative() {
        let dir = TempDir::new().unwrap();
        let dirs = ruleset(
            dir.path(),
            &[
                ("rules/local_rules.xml", "<group/>"),
                ("rules/extra/sshd.xml", "<rule/>"),
                ("decoders/local_decoder.xml", "<decoder/>"),
            ],
        );

        let fingerprint = compute_fingerprint(&dirs).unwrap();
        let keys: Vec<_> = fingerprint.keys().cloned().collect();
        assert_eq!(
            keys,
            vec![
                "decoders/local_decoder.xml",
                "rules/extra/sshd.xml",
                "rules/local_rules.xml"
            ]
        );
    }

    #[test]
    fn test_equal_content_under_different_roots_compares_equal() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        let files = [("rules/local_rules.xml", "<group/>")];

        let fa = compute_fingerprint(&ruleset(a.path(), &files)).unwrap();
        let fb = compute_fingerprint(&ruleset(b.path(), &files)).unwrap();
        assert_eq!(fa, fb);

        std::fs::write(b.path().join("rules/local_rules.xml"), "<group name=\"x\"/>").unwrap();
        let fb = compute_fingerprint(&[b.path().join("rules")]).unwrap();
        assert_ne!(fa, fb);
    }

    #[tokio::test]
    async fn test_missing_directories_yield_empty_fingerprint() {
        let dir = TempDir::new().unwrap();
        let source = RulesetDirectories::new(vec![dir.path().join("absent")]);
        assert!(source.fingerprint().await.unwrap().is_empty());
    }
}
