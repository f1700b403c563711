//! Input source capabilities
//!
//! The engine only needs to enumerate sources and open one as a lazy
//! stream of lines. `DirectorySource` serves `<SYMBOL>.txt` files from a
//! directory; `MemorySource` serves in-process text and is what embedders
//! and tests use.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use tracing::debug;
use types::ids::EntityId;

use crate::error::{CatalogError, SourceError};

/// Lazy sequence of raw lines from one source.
///
/// An item with `ErrorKind::InvalidData` is a single undecodable line and
/// the stream continues after it; any other error ends the stream.
pub type LineStream = Box<dyn Iterator<Item = io::Result<String>> + Send>;

/// Identifies one input source and the entity its records belong to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceId {
    name: String,
    entity_id: EntityId,
}

impl SourceId {
    /// Build from a source name; the entity id is the name's file stem
    /// (`AAPL.txt` -> `AAPL`).
    pub fn from_name(name: impl Into<String>) -> Result<Self, SourceError> {
        let name = name.into();
        let stem = Path::new(&name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        let entity_id = EntityId::try_new(stem).map_err(|_| SourceError::InvalidName {
            name: name.clone(),
        })?;
        Ok(Self { name, entity_id })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Lists the sources to merge.
pub trait SourceCatalog {
    fn enumerate(&self) -> Result<Vec<SourceId>, CatalogError>;
}

/// Opens a source as a line stream. Shared across producer threads.
pub trait SourceOpener: Send + Sync {
    fn open(&self, id: &SourceId) -> Result<LineStream, SourceError>;
}

// ── Filesystem ──────────────────────────────────────────────────────

/// Serves every `*.<extension>` file in one directory as a source.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
    extension: String,
    exclude: Vec<String>,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            extension: extension.into(),
            exclude: Vec::new(),
        }
    }

    /// Skip a file name during enumeration (e.g. the output file when it
    /// lives next to the inputs).
    pub fn excluding(mut self, file_name: impl Into<String>) -> Self {
        self.exclude.push(file_name.into());
        self
    }

    /// Skip the output file, but only when it is written into this
    /// directory; an output elsewhere may share a name with an input.
    pub fn excluding_output(self, output: &Path) -> Self {
        let Some(name) = output.file_name().and_then(|n| n.to_str()) else {
            return self;
        };
        let parent = match output.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        if same_directory(parent, &self.root) {
            let name = name.to_string();
            self.excluding(name)
        } else {
            self
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn same_directory(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

impl SourceCatalog for DirectorySource {
    fn enumerate(&self) -> Result<Vec<SourceId>, CatalogError> {
        let list_err = |cause| CatalogError::List {
            root: self.root.clone(),
            cause,
        };

        let mut sources = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(list_err)? {
            let entry = entry.map_err(list_err)?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some(self.extension.as_str()) {
                continue;
            }
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                debug!(path = %path.display(), "Skipping non UTF-8 file name");
                continue;
            };
            if self.exclude.iter().any(|x| x == file_name) {
                continue;
            }
            match SourceId::from_name(file_name) {
                Ok(id) => sources.push(id),
                Err(err) => debug!(error = %err, "Skipping unusable file name"),
            }
        }

        sources.sort();
        debug!(root = %self.root.display(), count = sources.len(), "Enumerated sources");
        Ok(sources)
    }
}

impl SourceOpener for DirectorySource {
    fn open(&self, id: &SourceId) -> Result<LineStream, SourceError> {
        let file = File::open(self.root.join(id.name())).map_err(|cause| SourceError::Open {
            name: id.name().to_string(),
            cause,
        })?;
        Ok(Box::new(Utf8Lines::new(BufReader::new(file))))
    }
}

/// Splits a reader on `\n` and decodes each line on its own, so one
/// non UTF-8 line does not end the stream.
struct Utf8Lines<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R: BufRead> Utf8Lines<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
        }
    }
}

impl<R: BufRead> Iterator for Utf8Lines<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        self.buf.clear();
        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => None,
            Ok(_) => {
                if self.buf.last() == Some(&b'\n') {
                    self.buf.pop();
                    if self.buf.last() == Some(&b'\r') {
                        self.buf.pop();
                    }
                }
                Some(
                    String::from_utf8(std::mem::take(&mut self.buf))
                        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err)),
                )
            }
            Err(err) => Some(Err(err)),
        }
    }
}

// ── In-memory ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum MemoryEntry {
    Lines(Vec<String>),
    /// Listed by the catalog but fails to open.
    Missing,
    /// Yields its lines, then a read error.
    Broken(Vec<String>),
}

/// In-memory sources keyed by name.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    entries: BTreeMap<String, MemoryEntry>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lines<I, S>(mut self, name: impl Into<String>, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let lines = lines.into_iter().map(Into::into).collect();
        self.entries.insert(name.into(), MemoryEntry::Lines(lines));
        self
    }

    /// Register a source from file-like text (one record per line).
    pub fn with_text(self, name: impl Into<String>, text: &str) -> Self {
        self.with_lines(name, text.lines())
    }

    pub fn with_missing(mut self, name: impl Into<String>) -> Self {
        self.entries.insert(name.into(), MemoryEntry::Missing);
        self
    }

    pub fn with_broken<I, S>(mut self, name: impl Into<String>, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let lines = lines.into_iter().map(Into::into).collect();
        self.entries.insert(name.into(), MemoryEntry::Broken(lines));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl SourceCatalog for MemorySource {
    fn enumerate(&self) -> Result<Vec<SourceId>, CatalogError> {
        Ok(self
            .entries
            .keys()
            .filter_map(|name| SourceId::from_name(name.as_str()).ok())
            .collect())
    }
}

impl SourceOpener for MemorySource {
    fn open(&self, id: &SourceId) -> Result<LineStream, SourceError> {
        match self.entries.get(id.name()) {
            None | Some(MemoryEntry::Missing) => Err(SourceError::NotFound {
                name: id.name().to_string(),
            }),
            Some(MemoryEntry::Lines(lines)) => Ok(Box::new(lines.clone().into_iter().map(Ok))),
            Some(MemoryEntry::Broken(lines)) => {
                let failure = io::Error::new(io::ErrorKind::UnexpectedEof, "stream truncated");
                Ok(Box::new(
                    lines
                        .clone()
                        .into_iter()
                        .map(Ok)
                        .chain(std::iter::once(Err(failure))),
                ))
            }
        }
    }
}
