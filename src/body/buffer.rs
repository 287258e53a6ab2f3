//! Spill-to-disk body accumulator.

use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use tempfile::NamedTempFile;
use tracing::debug;

/// Accumulates one direction's body.
///
/// Bytes stay in memory up to `memory_limit`; the whole body then moves to a
/// temporary file and further writes go there. Callers enforce the hard limit
/// before writing.
#[derive(Debug)]
pub struct BodyBuffer {
    memory_limit: usize,
    tmp_dir: Option<PathBuf>,
    data: Vec<u8>,
    file: Option<NamedTempFile>,
    length: usize,
}

impl BodyBuffer {
    /// Create an empty buffer.
    pub fn new(memory_limit: usize, tmp_dir: Option<PathBuf>) -> Self {
        Self {
            memory_limit,
            tmp_dir,
            data: Vec::new(),
            file: None,
            length: 0,
        }
    }

    /// Change the spill threshold and directory. Takes effect for data
    /// written after the call.
    pub fn configure(&mut self, memory_limit: usize, tmp_dir: Option<PathBuf>) {
        self.memory_limit = memory_limit;
        self.tmp_dir = tmp_dir;
    }

    /// Total bytes written.
    pub fn len(&self) -> usize {
        self.length
    }

    /// Whether nothing was written.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Whether the body lives in a temporary file.
    pub fn is_spilled(&self) -> bool {
        self.file.is_some()
    }

    fn spill(&mut self) -> io::Result<()> {
        let mut file = match &self.tmp_dir {
            Some(dir) => tempfile::Builder::new().prefix("body").tempfile_in(dir)?,
            None => tempfile::Builder::new().prefix("body").tempfile()?,
        };
        file.write_all(&self.data)?;
        debug!(path = %file.path().display(), bytes = self.data.len(), "body spilled to disk");
        self.data.clear();
        self.file = Some(file);
        Ok(())
    }

    /// Append bytes, spilling to disk once the memory threshold is crossed.
    pub fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        if bytes.is_empty() {
            return Ok(0);
        }
        if self.file.is_none() && self.data.len() + bytes.len() > self.memory_limit {
            self.spill()?;
        }
        match &mut self.file {
            Some(file) => file.write_all(bytes)?,
            None => self.data.extend_from_slice(bytes),
        }
        self.length += bytes.len();
        Ok(bytes.len())
    }

    /// A reader over the whole body from the start.
    pub fn reader(&self) -> io::Result<Box<dyn Read + '_>> {
        match &self.file {
            Some(file) => {
                let mut handle = file.as_file();
                handle.flush()?;
                Ok(Box::new(file.reopen()?))
            }
            None => Ok(Box::new(Cursor::new(self.data.as_slice()))),
        }
    }

    /// Read at most `limit` bytes from the start of the body.
    pub fn read_to_vec(&self, limit: usize) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.length.min(limit));
        self.reader()?.take(limit as u64).read_to_end(&mut out)?;
        Ok(out)
    }

    /// Cut the body down to `limit` bytes.
    pub fn truncate(&mut self, limit: usize) -> io::Result<()> {
        if limit >= self.length {
            return Ok(());
        }
        match &self.file {
            Some(file) => {
                let mut handle = file.as_file();
                handle.set_len(limit as u64)?;
                handle.seek(SeekFrom::Start(limit as u64))?;
            }
            None => self.data.truncate(limit),
        }
        self.length = limit;
        Ok(())
    }

    /// Drop the contents and remove any temporary file. The memory buffer
    /// keeps its capacity.
    pub fn reset(&mut self) -> io::Result<()> {
        self.data.clear();
        self.length = 0;
        match self.file.take() {
            Some(file) => file.close(),
            None => Ok(()),
        }
    }
}
