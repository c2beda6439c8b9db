//! Temporary, compressed storage for the repeated fields of a merged
//! response.
//!
//! Each repeated field gets one [`SpillBuffer`], created the first time the
//! field shows up. Spill files are anonymous temporary files: they have no
//! name on disk and are released by the OS as soon as the buffer (or its
//! reader) is dropped, on every exit path.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// zstd-compressed temporary file holding the encoded elements of one field
pub struct SpillBuffer {
    field: String,
    encoder: zstd::stream::write::Encoder<'static, BufWriter<File>>,
    written: u64,
}

impl SpillBuffer {
    /// Create a spill file in `dir`, or in the system temp dir
    pub fn create(field: &str, dir: Option<&Path>, level: i32) -> io::Result<Self> {
        let file = match dir {
            Some(dir) => tempfile::tempfile_in(dir)?,
            None => tempfile::tempfile()?,
        };
        Ok(Self {
            field: field.to_string(),
            encoder: zstd::stream::write::Encoder::new(BufWriter::new(file), level)?,
            written: 0,
        })
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    /// Uncompressed bytes written so far
    pub fn len(&self) -> u64 {
        self.written
    }

    pub fn is_empty(&self) -> bool {
        self.written == 0
    }

    pub fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.encoder.write_all(bytes)?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    /// Finish compression and rewind, for draining
    pub fn into_reader(self) -> io::Result<SpillReader> {
        let mut file = self.encoder.finish()?.into_inner().map_err(|e| e.into_error())?;
        file.seek(SeekFrom::Start(0))?;
        Ok(SpillReader {
            decoder: zstd::stream::read::Decoder::new(file)?,
        })
    }
}

/// Decompressing reader over a finished [`SpillBuffer`]
pub struct SpillReader {
    decoder: zstd::stream::read::Decoder<'static, BufReader<File>>,
}

impl Read for SpillReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.decoder.read(buf)
    }
}

/// Spill buffers of one response, in first-seen field order
pub struct SpillSet {
    buffers: Vec<SpillBuffer>,
    dir: Option<PathBuf>,
    level: i32,
}

impl SpillSet {
    pub fn new(dir: Option<PathBuf>, level: i32) -> Self {
        Self {
            buffers: Vec::new(),
            dir,
            level,
        }
    }

    /// Append `bytes` to the buffer of `field`, creating it on first use
    pub fn append(&mut self, field: &str, bytes: &[u8]) -> io::Result<()> {
        let index = match self.buffers.iter().position(|b| b.field == field) {
            Some(index) => index,
            None => {
                let buffer = SpillBuffer::create(field, self.dir.as_deref(), self.level)?;
                self.buffers.push(buffer);
                self.buffers.len() - 1
            }
        };
        self.buffers[index].write(bytes)
    }

    pub fn fields(&self) -> Vec<&str> {
        self.buffers.iter().map(|b| b.field()).collect()
    }

    pub fn into_buffers(self) -> Vec<SpillBuffer> {
        self.buffers
    }
}
