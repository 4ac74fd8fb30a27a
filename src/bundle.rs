//! Module discovery and IO for the offline workflow.
//!
//! A "bundle" here is a directory of extracted `.js` module files, one
//! module per file, with the module id taken from the file stem. The
//! CLI feeds these through the interceptor and writes patched copies
//! next to (never over) the originals.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum BundleError {
    #[error("failed to read module {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to scan {dir}: {source}")]
    Walk {
        dir: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("module file name is not valid UTF-8: {path}")]
    BadName { path: PathBuf },

    #[error("no .js modules found under {dir}")]
    NoModules { dir: PathBuf },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One module read from disk.
#[derive(Debug, Clone)]
pub struct BundleModule {
    pub id: String,
    pub path: PathBuf,
    pub source: String,
}

/// Load every `.js` module under `path`, sorted by file name.
///
/// A plain file loads as a single module; a directory is scanned one
/// level deep.
pub fn discover_modules(path: &Path) -> Result<Vec<BundleModule>, BundleError> {
    if path.is_file() {
        return Ok(vec![load_module(path)?]);
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(path).max_depth(1) {
        let entry = entry.map_err(|source| BundleError::Walk {
            dir: path.to_path_buf(),
            source,
        })?;
        if entry.file_type().is_file()
            && entry.path().extension().and_then(|s| s.to_str()) == Some("js")
        {
            files.push(entry.path().to_path_buf());
        }
    }
    files.sort();

    if files.is_empty() {
        return Err(BundleError::NoModules {
            dir: path.to_path_buf(),
        });
    }

    files.iter().map(|f| load_module(f)).collect()
}

/// Read one module; the id is the file stem.
pub fn load_module(path: &Path) -> Result<BundleModule, BundleError> {
    let id = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| BundleError::BadName {
            path: path.to_path_buf(),
        })?
        .to_string();
    let source = fs::read_to_string(path).map_err(|source| BundleError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(BundleModule {
        id,
        path: path.to_path_buf(),
        source,
    })
}

/// Write a patched module under `out_dir` as `<id>.js`.
///
/// Uses tempfile + fsync + rename so a crash leaves either the old
/// file or the new one, never a torn write.
pub fn write_patched(out_dir: &Path, id: &str, text: &str) -> Result<PathBuf, BundleError> {
    fs::create_dir_all(out_dir).map_err(|source| BundleError::Write {
        path: out_dir.to_path_buf(),
        source,
    })?;
    let path = out_dir.join(format!("{id}.js"));

    let write = |path: &Path| -> std::io::Result<()> {
        let parent = path.parent().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no parent")
        })?;
        let mut temp = tempfile::NamedTempFile::new_in(parent)?;
        temp.write_all(text.as_bytes())?;
        temp.as_file().sync_all()?;
        temp.persist(path).map_err(|e| e.error)?;
        Ok(())
    };

    write(&path).map_err(|source| BundleError::Write {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}
