pub mod terraform;

use std::path::{Path, PathBuf};

use crate::error::{HarnessError, Result};
use crate::ir::Resource;

/// Extracts declared resources from the text of one definition file.
///
/// The compliance checker only sees the resource list, so a grammar-aware
/// implementation can replace the regex one without touching the scorer.
pub trait ResourceExtractor: Send + Sync {
    /// File extension (without dot) this extractor understands.
    fn extension(&self) -> &'static str;

    fn extract(&self, path: &Path, content: &str) -> Vec<Resource>;
}

/// Recursively collect every file under `root` with the extractor's extension.
///
/// Provider caches (`.terraform/`) are skipped. Paths come back sorted so
/// repeated runs list resources in the same order.
pub fn discover_files(root: &Path, extension: &str) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || e.file_name() != ".terraform")
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(e) => {
                tracing::warn!(error = %e, "unable to read directory entry, skipping");
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == extension))
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

/// Extract resources from every matching file under `root`.
///
/// A directory without any definition files is an error, distinct from a
/// directory whose files simply declare no resources (an empty list).
pub fn extract_resources(root: &Path, extractor: &dyn ResourceExtractor) -> Result<Vec<Resource>> {
    if !root.is_dir() {
        return Err(HarnessError::Config(format!(
            "Directory {} does not exist",
            root.display()
        )));
    }

    let files = discover_files(root, extractor.extension());
    if files.is_empty() {
        return Err(HarnessError::NoTerraformFiles(root.display().to_string()));
    }

    let mut resources = Vec::new();
    for path in &files {
        match std::fs::read_to_string(path) {
            Ok(content) => resources.extend(extractor.extract(path, &content)),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "unreadable file, skipping");
            }
        }
    }

    Ok(resources)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::terraform::TerraformExtractor;

    #[test]
    fn missing_directory_is_config_error() {
        let err = extract_resources(Path::new("/definitely/not/here"), &TerraformExtractor)
            .unwrap_err();
        assert!(matches!(err, HarnessError::Config(_)));
    }

    #[test]
    fn directory_without_tf_files_is_explicit_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("README.md"), "# nothing").unwrap();
        let err = extract_resources(dir.path(), &TerraformExtractor).unwrap_err();
        assert!(matches!(err, HarnessError::NoTerraformFiles(_)));
        assert!(err.to_string().contains("No Terraform files found"));
    }

    #[test]
    fn walks_nested_directories_without_dedup() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("modules/storage");
        std::fs::create_dir_all(&nested).unwrap();
        let block = "resource \"aws_s3_bucket\" \"logs\" {\n}\n";
        std::fs::write(dir.path().join("main.tf"), block).unwrap();
        std::fs::write(nested.join("main.tf"), block).unwrap();

        let resources = extract_resources(dir.path(), &TerraformExtractor).unwrap();
        assert_eq!(resources.len(), 2);
        assert!(resources.iter().all(|r| r.address == "aws_s3_bucket.logs"));
    }

    #[test]
    fn unreadable_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a_broken.tf"), [0xff, 0xfe, 0x00, 0x80]).unwrap();
        std::fs::write(dir.path().join("main.tf"), "resource \"aws_vpc\" \"main\" {}").unwrap();

        let resources = extract_resources(dir.path(), &TerraformExtractor).unwrap();
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].address, "aws_vpc.main");
    }

    #[test]
    fn skips_provider_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join(".terraform/modules/vpc");
        std::fs::create_dir_all(&cache).unwrap();
        std::fs::write(cache.join("main.tf"), "resource \"aws_vpc\" \"x\" {}").unwrap();
        std::fs::write(dir.path().join("main.tf"), "resource \"aws_vpc\" \"main\" {}").unwrap();

        let resources = extract_resources(dir.path(), &TerraformExtractor).unwrap();
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].name, "main");
    }
}
