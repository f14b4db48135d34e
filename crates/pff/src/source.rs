//! Random-access byte sources.
//!
//! The reader consumes anything that can serve absolute-offset reads. File
//! handles are wrapped in a mutex so concurrent readers can share one open
//! descriptor without coordinating seek positions.

use std::{
    fs::File,
    io::{self, Read, Seek, SeekFrom},
    path::Path,
    sync::Mutex,
};

/// Random-access input. `read_at` must be idempotent and side-effect-free;
/// implementations are shared by every reader thread of one file.
pub trait ByteSource: Send + Sync {
    /// Fill `buffer` with the bytes at `offset`. Short data is an error.
    fn read_at(&self, offset: u64, buffer: &mut [u8]) -> io::Result<()>;

    /// Total size of the underlying data in bytes.
    fn size(&self) -> u64;

    /// Read `length` bytes at `offset` into a fresh buffer.
    fn read_vec(&self, offset: u64, length: usize) -> io::Result<Vec<u8>> {
        let mut buffer = vec![0; length];
        self.read_at(offset, &mut buffer)?;
        Ok(buffer)
    }
}

/// A [`ByteSource`] over an open file.
pub struct FileSource {
    file: Mutex<File>,
    size: u64,
}

impl FileSource {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        Self::new(File::open(path)?)
    }

    pub fn new(file: File) -> io::Result<Self> {
        let size = file.metadata()?.len();
        Ok(Self {
            file: Mutex::new(file),
            size,
        })
    }
}

impl ByteSource for FileSource {
    fn read_at(&self, offset: u64, buffer: &mut [u8]) -> io::Result<()> {
        let mut file = self
            .file
            .lock()
            .map_err(|_| io::Error::other("file source lock poisoned"))?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buffer)
    }

    fn size(&self) -> u64 {
        self.size
    }
}

impl ByteSource for Vec<u8> {
    fn read_at(&self, offset: u64, buffer: &mut [u8]) -> io::Result<()> {
        let offset = usize::try_from(offset)
            .map_err(|_| io::Error::new(io::ErrorKind::UnexpectedEof, "offset past end"))?;
        let end = offset
            .checked_add(buffer.len())
            .filter(|&end| end <= self.len())
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "read past end"))?;
        buffer.copy_from_slice(&self[offset..end]);
        Ok(())
    }

    fn size(&self) -> u64 {
        self.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_read_at() {
        let source = vec![0, 1, 2, 3, 4, 5, 6, 7];
        let mut buffer = [0; 4];
        source.read_at(2, &mut buffer).unwrap();
        assert_eq!(buffer, [2, 3, 4, 5]);
        assert_eq!(source.size(), 8);
    }

    #[test]
    fn test_vec_read_past_end() {
        let source = vec![0_u8; 4];
        let mut buffer = [0; 4];
        assert!(source.read_at(1, &mut buffer).is_err());
        assert!(source.read_at(u64::MAX, &mut buffer).is_err());
    }

    #[test]
    fn test_read_vec() {
        let source = vec![9_u8, 8, 7];
        assert_eq!(source.read_vec(1, 2).unwrap(), vec![8, 7]);
    }
}
