//! Duplicate account finder
//!
//! Compares a target folder against a master folder by SHA-256 over raw file
//! bytes. Dry runs report the duplicate pairs without touching disk; real
//! runs delete the duplicated target files.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};

use droidherd_core::prelude::*;

/// One duplicated file in the target folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicatePair {
    /// File in the target folder whose content already exists in the master.
    pub file_b_name: String,
    /// The master-folder file it matches.
    pub matches_with_name: String,
}

/// Outcome of one dedup pass.
#[derive(Debug, Clone, Serialize)]
pub struct DedupReport {
    pub pairs: Vec<DuplicatePair>,
    pub removed_count: usize,
    pub scanned_master: usize,
    pub scanned_target: usize,
}

/// Find (and optionally delete) files in `target` whose bytes match any file
/// in `master`. Only files with `extension` are considered.
pub fn find_duplicates(
    master: &Path,
    target: &Path,
    extension: &str,
    dry_run: bool,
) -> Result<DedupReport> {
    if !master.is_dir() {
        return Err(Error::validation(format!(
            "master folder missing: {}",
            master.display()
        )));
    }
    if !target.is_dir() {
        return Err(Error::validation(format!(
            "target folder missing: {}",
            target.display()
        )));
    }

    let master_files = matching_files(master, extension)?;
    let target_files = matching_files(target, extension)?;

    // First master file wins for a given content hash.
    let mut master_hashes: HashMap<[u8; 32], String> = HashMap::new();
    for path in &master_files {
        let digest = hash_file(path)?;
        master_hashes
            .entry(digest)
            .or_insert_with(|| file_name(path));
    }

    let mut pairs = Vec::new();
    let mut removed_count = 0;
    for path in &target_files {
        let digest = hash_file(path)?;
        let Some(master_name) = master_hashes.get(&digest) else {
            continue;
        };

        pairs.push(DuplicatePair {
            file_b_name: file_name(path),
            matches_with_name: master_name.clone(),
        });

        if !dry_run {
            std::fs::remove_file(path)?;
            removed_count += 1;
            info!("Removed duplicate {}", path.display());
        }
    }

    info!(
        "dedup: {} duplicate(s) of {} target file(s) against {} master file(s){}",
        pairs.len(),
        target_files.len(),
        master_files.len(),
        if dry_run { " (dry run)" } else { "" }
    );

    Ok(DedupReport {
        pairs,
        removed_count,
        scanned_master: master_files.len(),
        scanned_target: target_files.len(),
    })
}

fn matching_files(folder: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let wanted = extension.trim_start_matches('.').to_ascii_lowercase();
    let mut files = Vec::new();
    for entry in std::fs::read_dir(folder)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase() == wanted)
            .unwrap_or(false);
        if matches {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn hash_file(path: &Path) -> Result<[u8; 32]> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hasher.finalize().into())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(folder: &Path, name: &str, content: &str) {
        std::fs::write(folder.join(name), content).unwrap();
    }

    #[test]
    fn test_dry_run_reports_without_deleting() {
        let master = tempdir().unwrap();
        let target = tempdir().unwrap();
        write(master.path(), "x.xml", "same-bytes");
        write(master.path(), "y.xml", "other");
        write(target.path(), "x.xml", "same-bytes");
        write(target.path(), "z.xml", "unique");

        let report = find_duplicates(master.path(), target.path(), "xml", true).unwrap();

        assert_eq!(
            report.pairs,
            vec![DuplicatePair {
                file_b_name: "x.xml".to_string(),
                matches_with_name: "x.xml".to_string(),
            }]
        );
        assert_eq!(report.removed_count, 0);
        assert!(target.path().join("x.xml").exists());
        assert!(target.path().join("z.xml").exists());
    }

    #[test]
    fn test_real_run_deletes_duplicates() {
        let master = tempdir().unwrap();
        let target = tempdir().unwrap();
        write(master.path(), "x.xml", "same-bytes");
        write(target.path(), "x.xml", "same-bytes");
        write(target.path(), "z.xml", "unique");

        let report = find_duplicates(master.path(), target.path(), "xml", false).unwrap();

        assert_eq!(report.removed_count, 1);
        assert!(!target.path().join("x.xml").exists());
        assert!(target.path().join("z.xml").exists());
    }

    #[test]
    fn test_content_match_ignores_names() {
        let master = tempdir().unwrap();
        let target = tempdir().unwrap();
        write(master.path(), "original.xml", "payload");
        write(target.path(), "renamed.xml", "payload");

        let report = find_duplicates(master.path(), target.path(), "xml", true).unwrap();
        assert_eq!(report.pairs.len(), 1);
        assert_eq!(report.pairs[0].file_b_name, "renamed.xml");
        assert_eq!(report.pairs[0].matches_with_name, "original.xml");
    }

    #[test]
    fn test_extension_filter() {
        let master = tempdir().unwrap();
        let target = tempdir().unwrap();
        write(master.path(), "x.xml", "same");
        write(target.path(), "x.txt", "same");

        let report = find_duplicates(master.path(), target.path(), "xml", true).unwrap();
        assert!(report.pairs.is_empty());
        assert_eq!(report.scanned_target, 0);
    }

    #[test]
    fn test_missing_folders_rejected() {
        let present = tempdir().unwrap();
        let missing = present.path().join("nope");

        assert!(find_duplicates(&missing, present.path(), "xml", true).is_err());
        assert!(find_duplicates(present.path(), &missing, "xml", true).is_err());
    }

    #[test]
    fn test_no_duplicates() {
        let master = tempdir().unwrap();
        let target = tempdir().unwrap();
        write(master.path(), "a.xml", "one");
        write(target.path(), "b.xml", "two");

        let report = find_duplicates(master.path(), target.path(), "xml", false).unwrap();
        assert!(report.pairs.is_empty());
        assert_eq!(report.removed_count, 0);
        assert!(target.path().join("b.xml").exists());
    }
}
