//! Shared helpers for response tests
//!
//! Locates the workspace root, provides a `test_output/` directory for
//! FITS files worth inspecting after a run, and initialises logging once.

use once_cell::sync::Lazy;
use std::env;
use std::path::{Path, PathBuf};

/// Error type for test helper operations
#[derive(thiserror::Error, Debug)]
pub enum TestHelperError {
    #[error("Failed to find workspace root: {0}")]
    WorkspaceRootNotFound(String),
    #[error("Failed to prepare output file {path}: {source}")]
    OutputFile {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Returns the path to the workspace root directory.
///
/// Walks up from the current directory until it reaches a Cargo.toml that
/// declares `[workspace]`.
///
/// # Returns
/// * Ok(PathBuf) - The workspace root
/// * Err(TestHelperError) - If no workspace manifest sits above the current directory
pub fn find_workspace_root() -> Result<PathBuf, TestHelperError> {
    let mut current_dir = env::current_dir().map_err(|e| {
        TestHelperError::WorkspaceRootNotFound(format!("Failed to get current directory: {e}"))
    })?;

    loop {
        let cargo_toml = current_dir.join("Cargo.toml");
        if cargo_toml.exists() {
            let content = std::fs::read_to_string(&cargo_toml).map_err(|e| {
                TestHelperError::WorkspaceRootNotFound(format!("Failed to read Cargo.toml: {e}"))
            })?;

            if content.contains("[workspace]") {
                return Ok(current_dir);
            }
        }

        if !current_dir.pop() {
            break;
        }
    }

    Err(TestHelperError::WorkspaceRootNotFound(
        "No Cargo.toml with [workspace] above the current directory".to_string(),
    ))
}

/// Workspace root, resolved on first use
static WORKSPACE_ROOT: Lazy<PathBuf> =
    Lazy::new(|| find_workspace_root().expect("Failed to find workspace root directory"));

/// Returns the directory for test artifacts.
///
/// FITS files written by tests land here so they can be opened after a run.
/// The directory is created if missing.
///
/// # Returns
/// * PathBuf - `test_output/` under the workspace root
pub fn get_output_dir() -> PathBuf {
    let output_dir = WORKSPACE_ROOT.join("test_output");

    if !output_dir.exists() {
        std::fs::create_dir_all(&output_dir).expect("Failed to create output directory");
    }

    output_dir
}

/// Returns a path within the output directory.
///
/// # Arguments
/// * `path` - Relative path inside `test_output/`
///
/// # Returns
/// * PathBuf - The joined path; nothing is created on disk
pub fn output_path<P: AsRef<Path>>(path: P) -> PathBuf {
    get_output_dir().join(path)
}

/// Returns an output path for a FITS file, removing any file left by a previous run.
///
/// cfitsio refuses to create a file that already exists, so every test that
/// writes FITS output starts from here. Subdirectories in `name` are created.
///
/// # Arguments
/// * `name` - Relative path inside `test_output/`
///
/// # Returns
/// * Ok(PathBuf) - A path with no file behind it
/// * Err(TestHelperError) - If the parent directory or the stale file cannot be handled
///
/// ```
/// let path = test_helpers::fresh_output_path("doc/fresh.rsp").unwrap();
/// assert!(path.parent().unwrap().is_dir());
/// assert!(!path.exists());
/// ```
pub fn fresh_output_path<P: AsRef<Path>>(name: P) -> Result<PathBuf, TestHelperError> {
    let path = output_path(name);
    let io_error = |source| TestHelperError::OutputFile {
        path: path.clone(),
        source,
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_error)?;
    }
    if path.exists() {
        std::fs::remove_file(&path).map_err(io_error)?;
    }

    Ok(path)
}

/// Initializes `env_logger` for tests.
///
/// Output goes through the test harness capture. Repeated calls are ignored,
/// so every test may call it.
pub fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_root_exists() {
        let root = find_workspace_root().expect("Failed to find workspace root");
        assert!(root.exists());
        assert!(root.join("Cargo.toml").exists());
        assert!(root.join("response").is_dir());
    }

    #[test]
    fn test_output_dir_created() {
        let output = get_output_dir();
        assert!(output.exists());
        assert!(output.is_dir());
    }

    #[test]
    fn test_output_path() {
        let path = output_path("test.rsp");
        assert_eq!(path, get_output_dir().join("test.rsp"));
    }

    #[test]
    fn test_fresh_output_path_removes_old_file() {
        let path = fresh_output_path("helpers/stale.rsp").unwrap();
        std::fs::write(&path, b"old").unwrap();
        assert!(path.exists());

        let again = fresh_output_path("helpers/stale.rsp").unwrap();
        assert_eq!(again, path);
        assert!(!again.exists());
    }

    #[test]
    fn test_init_logging_twice() {
        init_test_logging();
        init_test_logging();
    }
}
