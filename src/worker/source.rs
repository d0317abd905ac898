//! Input resolution for invocations.
//!
//! Inputs are either inline or a reference to a file the host can read.
//! References are resolved on the host before the request is sent, so the
//! worker only ever sees bytes.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use super::protocol::{Blob, Request};
use crate::error::{Error, Result};

/// Resolves referenced input files to bytes.
pub trait FileSource: Send + Sync {
    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>>;
}

/// Reads references relative to a root directory on disk.
#[derive(Debug, Clone)]
pub struct FsSource {
    root: PathBuf,
}

impl FsSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl FileSource for FsSource {
    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(self.root.join(path))
    }
}

/// In-memory file map, for libraries edited alongside the main source.
#[derive(Debug, Default)]
pub struct MemorySource {
    files: RwLock<FxHashMap<PathBuf, Arc<[u8]>>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<PathBuf>, content: impl Into<Vec<u8>>) {
        let content: Vec<u8> = content.into();
        self.files.write().insert(path.into(), Arc::from(content));
    }

    pub fn remove(&self, path: &Path) -> bool {
        self.files.write().remove(path).is_some()
    }
}

impl FileSource for MemorySource {
    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.files
            .read()
            .get(path)
            .map(|bytes| bytes.to_vec())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("{} not in memory source", path.display())))
    }
}

// ============================================================================
// Invocation
// ============================================================================

/// Content of one virtual input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    Inline(Vec<u8>),
    /// Read through the host's [`FileSource`] when the invocation starts.
    Reference(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
    /// Path inside the worker's scratch directory.
    pub path: String,
    pub source: InputSource,
}

impl InputFile {
    pub fn inline(path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            source: InputSource::Inline(content.into()),
        }
    }

    pub fn reference(path: impl Into<String>, from: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            source: InputSource::Reference(from.into()),
        }
    }
}

/// Immutable description of one compiler run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    pub inputs: Vec<InputFile>,
    pub args: Vec<String>,
    pub output_paths: Option<Vec<String>>,
}

impl Invocation {
    /// Resolve every input to bytes and build the wire request.
    pub fn to_request(&self, source: &dyn FileSource) -> Result<Request> {
        let inputs = self
            .inputs
            .iter()
            .map(|input| {
                let bytes = match &input.source {
                    InputSource::Inline(bytes) => bytes.clone(),
                    InputSource::Reference(from) => source
                        .read_file(from)
                        .map_err(|e| Error::worker(format!("cannot read input `{}`: {e}", from.display())))?,
                };
                Ok((input.path.clone(), Blob(bytes)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Request {
            inputs,
            args: self.args.clone(),
            output_paths: self.output_paths.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_source_resolves_references() {
        let source = MemorySource::new();
        source.insert("lib/util.scad", "module u() {}");

        let invocation = Invocation {
            inputs: vec![
                InputFile::inline("input.scad", "use <util.scad>"),
                InputFile::reference("util.scad", "lib/util.scad"),
            ],
            args: vec!["input.scad".into()],
            output_paths: None,
        };
        let request = invocation.to_request(&source).unwrap();
        assert_eq!(request.inputs[1].0, "util.scad");
        assert_eq!(request.inputs[1].1.0, b"module u() {}");
    }

    #[test]
    fn test_unreadable_reference_is_a_worker_failure() {
        let invocation = Invocation {
            inputs: vec![InputFile::reference("a.scad", "missing.scad")],
            ..Default::default()
        };
        let err = invocation.to_request(&MemorySource::new()).unwrap_err();
        assert!(matches!(err, Error::Worker { ref message, .. } if message.contains("missing.scad")));
    }

    #[test]
    fn test_fs_source_reads_under_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("part.scad"), "sphere(1);").unwrap();
        let source = FsSource::new(dir.path());
        assert_eq!(source.read_file(Path::new("part.scad")).unwrap(), b"sphere(1);");
        assert!(source.read_file(Path::new("nope.scad")).is_err());
    }

    #[test]
    fn test_memory_source_remove() {
        let source = MemorySource::new();
        source.insert("x", vec![1]);
        assert!(source.remove(Path::new("x")));
        assert!(!source.remove(Path::new("x")));
        assert!(source.read_file(Path::new("x")).is_err());
    }
}
