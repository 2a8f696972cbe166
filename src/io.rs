//! this file gathers io around the client : where reads come from, where called reads go.
//!
//! Decoding instrument capture files is not done here, a [ReadSource] is plugged by the user.

use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::{ClientError, Result};
use crate::read::ReadData;

/// Something giving the reads of a file. Each call to reads restarts from the beginning of the file.
/// Shared by all workers of a caller, so it must be Sync.
pub trait ReadSource: Sync {
    type Reads: Iterator<Item = Result<ReadData>>;
    fn reads(&self, path: &Path) -> Result<Self::Reads>;
}

/// reads kept in memory, keyed by file name
#[derive(Default)]
pub struct MemoryReadSource {
    files: HashMap<PathBuf, Vec<ReadData>>,
}

impl MemoryReadSource {
    pub fn new() -> MemoryReadSource {
        MemoryReadSource { files: HashMap::new() }
    }

    pub fn insert<P: AsRef<Path>>(&mut self, path: P, reads: Vec<ReadData>) {
        self.files.insert(path.as_ref().to_path_buf(), reads);
    }

    pub fn nb_reads(&self) -> usize {
        self.files.values().map(|v| v.len()).sum()
    }
} // end of impl MemoryReadSource

impl ReadSource for MemoryReadSource {
    type Reads = std::vec::IntoIter<Result<ReadData>>;

    fn reads(&self, path: &Path) -> Result<Self::Reads> {
        match self.files.get(path) {
            Some(reads) => Ok(reads.iter().cloned().map(Ok).collect::<Vec<_>>().into_iter()),
            None => {
                let msg = format!("file does not exist: {:?}", path);
                Err(ClientError::Io(io::Error::new(io::ErrorKind::NotFound, msg)))
            }
        }
    }
}

/// write a read in fasta format
pub fn write_fasta<W: Write>(read_id: &str, sequence: &str, out: &mut W) -> io::Result<()> {
    writeln!(out, ">{}", read_id)?;
    writeln!(out, "{}", sequence)
}

/// write a read in fastq format
pub fn write_fastq<W: Write>(read_id: &str, sequence: &str, qstring: &str, out: &mut W) -> io::Result<()> {
    writeln!(out, "@{}", read_id)?;
    writeln!(out, "{}", sequence)?;
    writeln!(out, "+")?;
    writeln!(out, "{}", qstring)
}

// end of mod tests
