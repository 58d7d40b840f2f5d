pub mod layout;

use crate::fs::storage::BlockIO;
use crate::fs::{FSError, Result};
use layout::Geometry;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::{debug, trace};

/// A container backed by a host file. The file stays open only as long
/// as this value lives.
#[derive(Debug)]
pub struct ContainerFile {
    file: File,
    geometry: Geometry,
}

impl ContainerFile {
    fn file_size(file: &File) -> Result<u64> {
        let size = file.metadata()?.len();
        trace!("Stat'ed file size: {}", size);
        Ok(size)
    }

    /// Opens an existing container. Its length must match `geometry`
    /// exactly, nothing else about the contents is checked here.
    pub fn open(path: impl AsRef<Path>, geometry: Geometry) -> Result<Self> {
        let path = path.as_ref();
        debug!("Opening container at {:?}", path);
        let file = File::options().read(true).write(true).open(path)?;
        let size = Self::file_size(&file)?;
        let expected = geometry.container_size() as u64;
        if size != expected {
            return Err(FSError::WrongSize {
                expected,
                actual: size,
            });
        }
        Ok(Self { file, geometry })
    }

    /// Creates a zero filled container file. The caller formats it.
    pub fn create(path: impl AsRef<Path>, geometry: Geometry) -> Result<Self> {
        let path = path.as_ref();
        debug!("Creating container at {path:?}");
        if path.exists() {
            return Err(FSError::AlreadyExists(path.to_owned()));
        }
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|err| match err.kind() {
                io::ErrorKind::AlreadyExists => FSError::AlreadyExists(path.to_owned()),
                _ => err.into(),
            })?;
        let block = vec![0; geometry.block_size()];
        for _ in 0..geometry.block_count() {
            file.write_all(&block)?;
        }
        file.flush()?;
        Ok(Self { file, geometry })
    }

    /// Removes the container file from the host filesystem
    pub fn delete(path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        debug!("Deleting container at {path:?}");
        if !path.is_file() {
            return Err(FSError::NotFound(path.display().to_string()));
        }
        fs::remove_file(path)?;
        Ok(())
    }

    /// Flushes pending writes to disk and closes the file
    pub fn close(self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn check_len(&self, len: usize) -> io::Result<()> {
        if len != self.geometry.block_size() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "buffer does not match the block size",
            ));
        }
        Ok(())
    }

    fn seek_block(&mut self, block_number: u64) -> io::Result<()> {
        if block_number >= self.geometry.block_count() as u64 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "block number out of range",
            ));
        }
        let offset = block_number * self.geometry.block_size() as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        Ok(())
    }
}

impl BlockIO for ContainerFile {
    type IoError = io::Error;

    fn block_count(&self) -> usize {
        self.geometry.block_count()
    }

    fn block_size(&self) -> usize {
        self.geometry.block_size()
    }

    fn read_block(&mut self, block_number: u64, block: &mut [u8]) -> io::Result<()> {
        self.check_len(block.len())?;
        self.seek_block(block_number)?;
        self.file.read_exact(block)
    }

    fn write_block(&mut self, block_number: u64, block: &[u8]) -> io::Result<()> {
        self.check_len(block.len())?;
        self.seek_block(block_number)?;
        self.file.write_all(block)
    }
}
