use packed_struct::PackingError;
use std::io::{Read, Write};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, trace};

pub mod directory;
pub mod inspect;
pub mod name;
pub mod storage;
pub mod table;

use crate::container::layout::{
    FileRecord, Geometry, SlotState, DIRECTORY_BLOCK, TABLE_BLOCK,
};
use directory::Directory;
pub use name::FileName;
use storage::BlockIO;
use table::BlockTable;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum FSError {
    #[error("{0:?} already exists")]
    AlreadyExists(PathBuf),
    #[error("{0} not found")]
    NotFound(String),
    #[error("Invalid file name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },
    #[error("{0} already exists in the container")]
    DuplicateName(String),
    #[error("Not enough space available: {requested} blocks needed, {free} free")]
    CapacityExceeded { requested: usize, free: usize },
    #[error("The directory is full, it holds at most {0} files")]
    DirectoryFull(usize),
    #[error("Not a container file or the file is corrupted: expected {expected} bytes, found {actual}")]
    WrongSize { expected: u64, actual: u64 },
    #[error("The container is corrupted: {0}")]
    Corrupted(&'static str),
    #[error("Container metadata could not be decoded: {0}")]
    Layout(String),
    #[error("Invalid container geometry: {0}")]
    InvalidGeometry(&'static str),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<PackingError> for FSError {
    fn from(err: PackingError) -> Self {
        Self::Layout(format!("{err:?}"))
    }
}

pub type Result<T> = std::result::Result<T, FSError>;

/// An active file as seen through the directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub slot: usize,
    pub name: String,
    /// Logical size in bytes
    pub size: u64,
    pub first_block: u32,
    pub block_count: usize,
}

/// The storage engine. Every operation reads the table and the
/// directory fresh from the device, no state survives between calls.
#[derive(Debug)]
pub struct FileSystem<Device: BlockIO> {
    geometry: Geometry,
    device: Device,
    buffer: Vec<u8>,
}

fn head_block(record: &FileRecord) -> Result<u32> {
    u32::try_from(record.first_data_block)
        .map_err(|_| FSError::Corrupted("file record has a negative first block"))
}

impl<Device: BlockIO> FileSystem<Device> {
    fn geometry_of(device: &Device) -> Result<Geometry> {
        Geometry::new(
            device.block_size(),
            device.block_size() * device.block_count(),
        )
    }

    /// Writes an empty table and directory onto `device`
    pub fn format(device: Device) -> Result<Self> {
        let geometry = Self::geometry_of(&device)?;
        debug!(
            "Formatting {} blocks of {} bytes",
            geometry.block_count(),
            geometry.block_size()
        );
        let mut fs = Self {
            buffer: vec![0; geometry.block_size()],
            geometry,
            device,
        };
        fs.store_table(&BlockTable::empty(&geometry))?;
        fs.store_directory(&Directory::empty(&geometry))?;
        Ok(fs)
    }

    /// Wraps a formatted device, checking that its metadata decodes
    pub fn open(device: Device) -> Result<Self> {
        let geometry = Self::geometry_of(&device)?;
        let mut fs = Self {
            buffer: vec![0; geometry.block_size()],
            geometry,
            device,
        };
        fs.load_table()?;
        fs.load_directory()?;
        Ok(fs)
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn into_inner(self) -> Device {
        self.device
    }

    fn read_buffer(&mut self, block: u32) -> Result<()> {
        self.device
            .read_block(block as u64, &mut self.buffer)
            .map_err(Into::into)
    }

    fn write_buffer(&mut self, block: u32) -> Result<()> {
        self.device
            .write_block(block as u64, &self.buffer)
            .map_err(Into::into)
    }

    pub(crate) fn load_table(&mut self) -> Result<BlockTable> {
        self.read_buffer(TABLE_BLOCK)?;
        BlockTable::decode(&self.geometry, &self.buffer)
    }

    fn store_table(&mut self, table: &BlockTable) -> Result<()> {
        self.read_buffer(TABLE_BLOCK)?;
        table.encode(&mut self.buffer);
        self.write_buffer(TABLE_BLOCK)
    }

    pub(crate) fn load_directory(&mut self) -> Result<Directory> {
        self.read_buffer(DIRECTORY_BLOCK)?;
        Directory::decode(&self.geometry, &self.buffer)
    }

    fn store_directory(&mut self, directory: &Directory) -> Result<()> {
        self.read_buffer(DIRECTORY_BLOCK)?;
        directory.encode(&self.geometry, &mut self.buffer)?;
        self.write_buffer(DIRECTORY_BLOCK)
    }

    fn entry_for(&self, table: &BlockTable, slot: usize, record: &FileRecord) -> Result<FileEntry> {
        let first_block = head_block(record)?;
        Ok(FileEntry {
            slot,
            name: record.name_lossy(),
            size: table.logical_size(&self.geometry, first_block, record.last_block_size)?,
            first_block,
            block_count: table.chain(first_block)?.len(),
        })
    }

    /// Copies `size` bytes from `source` into a new file called `name`.
    ///
    /// Name, directory slot and free space are all checked before the
    /// first write. Data blocks go out first, then the table, then the
    /// directory, so an interrupted insert can only leak blocks.
    pub fn insert(
        &mut self,
        name: &FileName,
        size: u64,
        source: &mut impl Read,
    ) -> Result<FileEntry> {
        debug!("Inserting {name} ({size} bytes)");
        let mut directory = self.load_directory()?;
        if directory.find_by_name(name).is_some() {
            return Err(FSError::DuplicateName(name.to_string()));
        }
        let slot = if directory.file_count() == 0 {
            0
        } else {
            directory.find_free_slot()?
        };
        let mut table = self.load_table()?;
        let block_count = self.geometry.blocks_for(size);
        let chain = table.allocate(block_count)?;

        let block_size = self.geometry.block_size();
        let mut remaining = size;
        for &block in &chain {
            let len = remaining.min(block_size as u64) as usize;
            source.read_exact(&mut self.buffer[..len])?;
            self.buffer[len..].fill(0);
            self.write_buffer(block)?;
            trace!("Wrote {len} bytes to block {block}");
            remaining -= len as u64;
        }
        self.store_table(&table)?;

        let last_block_size = size - ((block_count - 1) * block_size) as u64;
        let record = FileRecord {
            name: name.to_record_bytes(),
            state: SlotState::Active,
            last_block_size: last_block_size as i32,
            first_data_block: chain[0] as i32,
        };
        directory.insert(slot, record);
        self.store_directory(&directory)?;
        debug!("Inserted {name} into slot {slot}, blocks {chain:?}");
        Ok(FileEntry {
            slot,
            name: name.to_string(),
            size,
            first_block: chain[0],
            block_count,
        })
    }

    /// Deletes `name`, returning the entry it had.
    ///
    /// The directory is written before the table: an interrupted remove
    /// leaves unreachable blocks, never blocks shared by two files.
    pub fn remove(&mut self, name: &FileName) -> Result<FileEntry> {
        debug!("Removing {name}");
        let mut directory = self.load_directory()?;
        let slot = directory
            .find_by_name(name)
            .ok_or_else(|| FSError::NotFound(name.to_string()))?;
        let mut table = self.load_table()?;
        let record = directory
            .deactivate(slot)
            .ok_or_else(|| FSError::NotFound(name.to_string()))?;
        let entry = self.entry_for(&table, slot, &record)?;
        let freed = table.reclaim(entry.first_block)?;
        self.store_directory(&directory)?;
        self.store_table(&table)?;
        debug!("Removed {name} from slot {slot}, freed {freed} blocks");
        Ok(entry)
    }

    /// Looks up a single active file
    pub fn entry(&mut self, name: &FileName) -> Result<FileEntry> {
        let directory = self.load_directory()?;
        let table = self.load_table()?;
        let slot = directory
            .find_by_name(name)
            .ok_or_else(|| FSError::NotFound(name.to_string()))?;
        let record = directory
            .record(slot)
            .ok_or_else(|| FSError::NotFound(name.to_string()))?;
        self.entry_for(&table, slot, record)
    }

    /// Streams the contents of `name` into `sink`, returns the byte count
    pub fn read_file(&mut self, name: &FileName, sink: &mut impl Write) -> Result<u64> {
        let entry = self.entry(name)?;
        debug!("Reading {name} ({} bytes)", entry.size);
        let chain = self.load_table()?.chain(entry.first_block)?;
        let block_size = self.geometry.block_size() as u64;
        let mut remaining = entry.size;
        for block in chain {
            let len = remaining.min(block_size) as usize;
            self.read_buffer(block)?;
            sink.write_all(&self.buffer[..len])?;
            trace!("Read {len} bytes from block {block}");
            remaining -= len as u64;
        }
        Ok(entry.size)
    }

    /// All active files in slot order
    pub fn entries(&mut self) -> Result<Vec<FileEntry>> {
        let directory = self.load_directory()?;
        let table = self.load_table()?;
        directory
            .active()
            .map(|(slot, record)| self.entry_for(&table, slot, record))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::inspect::BlockRole;
    use super::storage::MemoryDevice;
    use super::table::BlockState;
    use super::*;
    use rand::RngCore;
    use std::collections::HashSet;

    fn formatted(geometry: Geometry) -> FileSystem<MemoryDevice> {
        FileSystem::format(MemoryDevice::new(geometry)).unwrap()
    }

    fn name(name: &str) -> FileName {
        FileName::parse(name).unwrap()
    }

    fn random_bytes(len: usize) -> Vec<u8> {
        let mut bytes = vec![0; len];
        rand::thread_rng().fill_bytes(&mut bytes);
        bytes
    }

    fn put(fs: &mut FileSystem<MemoryDevice>, file: &str, data: &[u8]) -> Result<FileEntry> {
        fs.insert(&name(file), data.len() as u64, &mut &data[..])
    }

    fn get(fs: &mut FileSystem<MemoryDevice>, file: &str) -> Vec<u8> {
        let mut out = Vec::new();
        fs.read_file(&name(file), &mut out).unwrap();
        out
    }

    /// Every active chain is well formed and no block is shared
    fn assert_sound(fs: &mut FileSystem<MemoryDevice>) {
        let table = fs.load_table().unwrap();
        let block_size = fs.geometry().block_size() as u64;
        let mut seen = HashSet::new();
        for entry in fs.entries().unwrap() {
            let chain = table.chain(entry.first_block).unwrap();
            assert_eq!(chain.len() as u64, entry.size.div_ceil(block_size).max(1));
            assert_eq!(table.state(*chain.last().unwrap()), Some(BlockState::Last));
            for block in chain {
                assert!(seen.insert(block), "block {block} is shared");
            }
        }
        let allocated = (0..table.len() as u32)
            .filter(|&b| !table.state(b).unwrap().is_free())
            .count();
        assert_eq!(allocated, seen.len());
    }

    #[test]
    fn test_single_small_file() {
        let mut fs = formatted(Geometry::default());
        let data = b"0123456789";
        let entry = put(&mut fs, "a", data).unwrap();
        assert_eq!(entry.first_block, 2);
        assert_eq!(entry.slot, 0);
        let directory = fs.load_directory().unwrap();
        assert_eq!(directory.file_count(), 1);
        let record = directory.record(0).unwrap();
        assert_eq!(record.last_block_size, 10);
        assert_eq!(record.first_data_block, 2);
        assert_eq!(get(&mut fs, "a"), data);

        fs.remove(&name("a")).unwrap();
        assert_eq!(fs.load_table().unwrap().state(2), Some(BlockState::Free));
        assert_eq!(fs.load_directory().unwrap().file_count(), 0);
    }

    #[test]
    fn test_roundtrip_sizes() {
        let geometry = Geometry::default();
        let block_size = geometry.block_size();
        let mut fs = formatted(geometry);
        let sizes = [0, 1, block_size - 1, block_size, block_size + 1, 3 * block_size + 17];
        for (i, &size) in sizes.iter().enumerate() {
            let file = format!("f{i}");
            let data = random_bytes(size);
            let entry = put(&mut fs, &file, &data).unwrap();
            assert_eq!(entry.size, size as u64);
            assert_eq!(get(&mut fs, &file), data);
        }
        assert_sound(&mut fs);
    }

    #[test]
    fn test_whole_data_region() {
        let geometry = Geometry::default();
        let mut fs = formatted(geometry);
        let data = random_bytes(geometry.max_file_size() as usize);
        let entry = put(&mut fs, "big", &data).unwrap();
        assert_eq!(entry.block_count, 30);
        assert_eq!(get(&mut fs, "big"), data);
        assert_eq!(fs.load_table().unwrap().free_count(), 0);
    }

    #[test]
    fn test_empty_file_takes_one_block() {
        let mut fs = formatted(Geometry::default());
        let entry = put(&mut fs, "empty", &[]).unwrap();
        assert_eq!(entry.block_count, 1);
        assert_eq!(entry.size, 0);
        let directory = fs.load_directory().unwrap();
        assert_eq!(directory.record(0).unwrap().last_block_size, 0);
        assert!(get(&mut fs, "empty").is_empty());
        fs.remove(&name("empty")).unwrap();
        assert_eq!(fs.load_table().unwrap().free_count(), 30);
    }

    #[test]
    fn test_duplicate_rejected_without_changes() {
        let mut fs = formatted(Geometry::default());
        put(&mut fs, "a", b"first").unwrap();
        let before = fs.device.bytes.clone();
        assert!(matches!(
            put(&mut fs, "a", b"second"),
            Err(FSError::DuplicateName(_))
        ));
        assert_eq!(fs.device.bytes, before);
        assert_eq!(get(&mut fs, "a"), b"first");
    }

    #[test]
    fn test_capacity_exceeded_without_changes() {
        let geometry = Geometry::default();
        let mut fs = formatted(geometry);
        put(&mut fs, "a", &random_bytes(20 * geometry.block_size())).unwrap();
        let before = fs.device.bytes.clone();
        match put(&mut fs, "b", &random_bytes(10 * geometry.block_size() + 1)) {
            Err(FSError::CapacityExceeded { requested, free }) => {
                assert_eq!(requested, 11);
                assert_eq!(free, 10);
            }
            other => panic!("unexpected result {other:?}"),
        }
        assert_eq!(fs.device.bytes, before);
        assert!(matches!(fs.entry(&name("b")), Err(FSError::NotFound(_))));
    }

    #[test]
    fn test_directory_full() {
        // 2 directory slots, 6 data blocks
        let mut fs = formatted(Geometry::new(64, 512).unwrap());
        put(&mut fs, "a", b"a").unwrap();
        put(&mut fs, "b", b"b").unwrap();
        let before = fs.device.bytes.clone();
        assert!(matches!(
            put(&mut fs, "c", b"c"),
            Err(FSError::DirectoryFull(2))
        ));
        assert_eq!(fs.device.bytes, before);
        fs.remove(&name("a")).unwrap();
        assert_eq!(put(&mut fs, "c", b"c").unwrap().slot, 0);
    }

    #[test]
    fn test_space_is_reused() {
        let geometry = Geometry::default();
        let block_size = geometry.block_size();
        let mut fs = formatted(geometry);
        put(&mut fs, "keep", &random_bytes(block_size)).unwrap();
        for round in 0..50 {
            let data = random_bytes(25 * block_size);
            let entry = put(&mut fs, "cycle", &data).unwrap();
            assert_eq!(entry.first_block, 3, "round {round}");
            assert_eq!(get(&mut fs, "cycle"), data);
            fs.remove(&name("cycle")).unwrap();
        }
        assert_eq!(fs.load_table().unwrap().free_count(), 29);
    }

    #[test]
    fn test_interleaved_inserts_and_removes() {
        let geometry = Geometry::new(512, 512 * 32).unwrap();
        let mut fs = formatted(geometry);
        let mut stored = Vec::new();
        for i in 0..12 {
            let data = random_bytes(i * 150 + 5);
            let file = format!("file{i}");
            put(&mut fs, &file, &data).unwrap();
            stored.push((file, data));
            if i % 3 == 2 {
                let (file, _) = stored.remove(0);
                fs.remove(&name(&file)).unwrap();
            }
            assert_sound(&mut fs);
        }
        for (file, data) in &stored {
            assert_eq!(&get(&mut fs, file), data);
        }
        assert_eq!(fs.load_directory().unwrap().file_count(), stored.len());
    }

    #[test]
    fn test_remove_missing() {
        let mut fs = formatted(Geometry::default());
        assert!(matches!(
            fs.remove(&name("ghost")),
            Err(FSError::NotFound(_))
        ));
        put(&mut fs, "a", b"a").unwrap();
        fs.remove(&name("a")).unwrap();
        assert!(matches!(fs.remove(&name("a")), Err(FSError::NotFound(_))));
    }

    #[test]
    fn test_short_source_is_io_error() {
        let mut fs = formatted(Geometry::default());
        let data = b"short";
        let result = fs.insert(&name("a"), 100, &mut &data[..]);
        assert!(matches!(result, Err(FSError::Io(_))));
        // nothing but data blocks were touched
        assert!(fs.entries().unwrap().is_empty());
        assert_eq!(fs.load_table().unwrap().free_count(), 30);
    }

    #[test]
    fn test_interrupted_insert_only_leaks() {
        let mut fs = formatted(Geometry::new(64, 512).unwrap());
        fs.device.fail_writes_to = Some(DIRECTORY_BLOCK as u64);
        assert!(matches!(put(&mut fs, "a", b"lost"), Err(FSError::Io(_))));
        // data and table made it out, the directory did not
        assert!(fs.entries().unwrap().is_empty());
        let map = fs.block_map().unwrap();
        assert_eq!(map.block(2).unwrap().role, BlockRole::Data(None));
        assert!(map.to_string().contains("2      128       data    orphan"));

        fs.device.fail_writes_to = None;
        let entry = put(&mut fs, "b", b"kept").unwrap();
        assert_eq!(entry.first_block, 3);
        assert_eq!(get(&mut fs, "b"), b"kept");
        assert_eq!(fs.load_table().unwrap().free_count(), 4);
    }

    #[test]
    fn test_interrupted_remove_only_leaks() {
        let mut fs = formatted(Geometry::new(64, 512).unwrap());
        put(&mut fs, "a", b"doomed").unwrap();
        fs.device.fail_writes_to = Some(TABLE_BLOCK as u64);
        assert!(matches!(fs.remove(&name("a")), Err(FSError::Io(_))));
        // the record is gone, its chain is still marked in the table
        assert!(fs.entries().unwrap().is_empty());
        assert_eq!(fs.load_table().unwrap().state(2), Some(BlockState::Last));
        let map = fs.block_map().unwrap();
        assert_eq!(map.block(2).unwrap().role, BlockRole::Data(None));

        fs.device.fail_writes_to = None;
        assert_eq!(put(&mut fs, "b", b"fresh").unwrap().first_block, 3);
        assert_eq!(get(&mut fs, "b"), b"fresh");
    }

    #[test]
    fn test_failing_sink_is_io_error() {
        struct FullDisk;

        impl Write for FullDisk {
            fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
                Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"))
            }

            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let mut fs = formatted(Geometry::default());
        put(&mut fs, "a", b"payload").unwrap();
        assert!(matches!(
            fs.read_file(&name("a"), &mut FullDisk),
            Err(FSError::Io(_))
        ));
        // reading never changes the container
        assert_eq!(get(&mut fs, "a"), b"payload");
    }

    #[test]
    fn test_open_checks_metadata() {
        let geometry = Geometry::default();
        assert!(FileSystem::open(MemoryDevice::new(geometry)).is_err());
        let mut device = MemoryDevice::new(geometry);
        FileSystem::format(&mut device).unwrap();
        let mut fs = FileSystem::open(&mut device).unwrap();
        put_into(&mut fs);
        let mut fs = FileSystem::open(device).unwrap();
        assert_eq!(fs.entries().unwrap().len(), 1);
    }

    fn put_into(fs: &mut FileSystem<&mut MemoryDevice>) {
        let data = b"persisted";
        fs.insert(&name("p"), data.len() as u64, &mut &data[..])
            .unwrap();
    }
}
