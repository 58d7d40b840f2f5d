//! Block level access to the bytes of a container.
//! The engine only ever reads and writes whole blocks,
//! so anything able to do that can host a filesystem.

use super::FSError;

/// Trait that abstracts out a block device. The crate
/// ships a host file backing, tests also use an in-memory one.
pub trait BlockIO {
    /// Error type returned from the IO methods
    type IoError: std::error::Error + Into<FSError>;
    /// The total amount of blocks available
    /// to do IO
    fn block_count(&self) -> usize;
    /// The size of a single block. It is required
    /// all blocks are the same size.
    fn block_size(&self) -> usize;
    /// Read a single block at offset `block_number` (starting at 0),
    /// stores the block into the `block` argument (must be exactly `block_size` long).
    fn read_block(&mut self, block_number: u64, block: &mut [u8]) -> Result<(), Self::IoError>;
    /// Write a single `block` at offset `block_number` (starting at 0).
    /// The `block` argument must be exactly `block_size` long.
    fn write_block(&mut self, block_number: u64, block: &[u8]) -> Result<(), Self::IoError>;
}

impl<Device: BlockIO> BlockIO for &mut Device {
    type IoError = Device::IoError;

    fn block_count(&self) -> usize {
        (**self).block_count()
    }

    fn block_size(&self) -> usize {
        (**self).block_size()
    }

    fn read_block(&mut self, block_number: u64, block: &mut [u8]) -> Result<(), Self::IoError> {
        (**self).read_block(block_number, block)
    }

    fn write_block(&mut self, block_number: u64, block: &[u8]) -> Result<(), Self::IoError> {
        (**self).write_block(block_number, block)
    }
}

/// Zero filled blocks kept in memory. Writes to `fail_writes_to`
/// error out without touching the bytes, which stands in for a crash
/// between two block writes.
#[cfg(test)]
#[derive(Debug, Clone)]
pub(crate) struct MemoryDevice {
    block_size: usize,
    pub(crate) bytes: Vec<u8>,
    pub(crate) fail_writes_to: Option<u64>,
}

#[cfg(test)]
impl MemoryDevice {
    pub(crate) fn new(geometry: crate::container::layout::Geometry) -> Self {
        Self {
            block_size: geometry.block_size(),
            bytes: vec![0; geometry.container_size()],
            fail_writes_to: None,
        }
    }

    fn range(&self, block_number: u64) -> std::io::Result<std::ops::Range<usize>> {
        let start = block_number as usize * self.block_size;
        if start + self.block_size > self.bytes.len() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "block number out of range",
            ));
        }
        Ok(start..start + self.block_size)
    }
}

#[cfg(test)]
impl BlockIO for MemoryDevice {
    type IoError = std::io::Error;

    fn block_count(&self) -> usize {
        self.bytes.len() / self.block_size
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn read_block(&mut self, block_number: u64, block: &mut [u8]) -> std::io::Result<()> {
        let range = self.range(block_number)?;
        block.copy_from_slice(&self.bytes[range]);
        Ok(())
    }

    fn write_block(&mut self, block_number: u64, block: &[u8]) -> std::io::Result<()> {
        if self.fail_writes_to == Some(block_number) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "injected write failure",
            ));
        }
        let range = self.range(block_number)?;
        self.bytes[range].copy_from_slice(block);
        Ok(())
    }
}
