//! Read-only views over a container: file listings and the block map.

use super::storage::BlockIO;
use super::{FileEntry, FileSystem, Result};
use crate::container::layout::{Geometry, DIRECTORY_BLOCK, TABLE_BLOCK};
use std::collections::HashMap;
use std::fmt;

/// Marks the open end of a prefix or suffix filter
pub const FILTER_DELIMITER: char = '+';

/// Name filter for listings. `abc+` matches names starting with `abc`,
/// `+abc` names ending with it, anything else must match exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    All,
    Prefix(String),
    Suffix(String),
    Exact(String),
}

impl Filter {
    pub fn parse(filter: &str) -> Self {
        if filter.is_empty() {
            Self::All
        } else if let Some(prefix) = filter.strip_suffix(FILTER_DELIMITER) {
            Self::Prefix(prefix.to_owned())
        } else if let Some(suffix) = filter.strip_prefix(FILTER_DELIMITER) {
            Self::Suffix(suffix.to_owned())
        } else {
            Self::Exact(filter.to_owned())
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        match self {
            Self::All => true,
            Self::Prefix(prefix) => name.starts_with(prefix.as_str()),
            Self::Suffix(suffix) => name.ends_with(suffix.as_str()),
            Self::Exact(exact) => name == exact,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Listing {
    /// The container holds no files at all
    Empty,
    /// Files exist but none passed the filter
    NoMatch,
    Files(Vec<FileEntry>),
}

impl Listing {
    pub fn new(entries: Vec<FileEntry>, filter: &Filter) -> Self {
        if entries.is_empty() {
            return Self::Empty;
        }
        let matched: Vec<_> = entries
            .into_iter()
            .filter(|entry| filter.matches(&entry.name))
            .collect();
        if matched.is_empty() {
            Self::NoMatch
        } else {
            Self::Files(matched)
        }
    }
}

impl fmt::Display for Listing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => writeln!(f, "Container is empty"),
            Self::NoMatch => writeln!(f, "No files matching given filter found"),
            Self::Files(entries) => {
                writeln!(f, "{:<18}SIZE [bytes]", "FILENAME")?;
                for entry in entries {
                    writeln!(f, "{:<18}{}", entry.name, entry.size)?;
                }
                Ok(())
            }
        }
    }
}

/// Which file a data block belongs to, and where in its chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner {
    pub name: String,
    /// 1-based position in the chain
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockRole {
    Table,
    Directory,
    Free,
    /// Allocated. No owner means no active file reaches the block.
    Data(Option<Owner>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockInfo {
    pub index: u32,
    pub address: u64,
    pub role: BlockRole,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockMap {
    pub geometry: Geometry,
    pub blocks: Vec<BlockInfo>,
}

impl BlockMap {
    pub fn free_count(&self) -> usize {
        self.blocks
            .iter()
            .filter(|b| b.role == BlockRole::Free)
            .count()
    }

    pub fn block(&self, index: u32) -> Option<&BlockInfo> {
        self.blocks.get(index as usize)
    }
}

impl fmt::Display for BlockMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Block size [bytes]: {}", self.geometry.block_size())?;
        writeln!(f, "Container size [bytes]: {}", self.geometry.container_size())?;
        writeln!(
            f,
            "Free data blocks: {} of {}",
            self.free_count(),
            self.geometry.data_block_count()
        )?;
        writeln!(f)?;
        writeln!(f, "{:<7}{:<10}{:<8}FILE", "BLOCK", "ADDRESS", "TYPE")?;
        for block in &self.blocks {
            write!(f, "{:<7}{:<10}", block.index, block.address)?;
            match &block.role {
                BlockRole::Table => writeln!(f, "table")?,
                BlockRole::Directory => writeln!(f, "dir")?,
                BlockRole::Free => writeln!(f, "free")?,
                BlockRole::Data(Some(owner)) => {
                    writeln!(f, "{:<8}({}) {}", "data", owner.position, owner.name)?
                }
                BlockRole::Data(None) => writeln!(f, "{:<8}orphan", "data")?,
            }
        }
        Ok(())
    }
}

impl<Device: BlockIO> FileSystem<Device> {
    /// Active files passing `filter`
    pub fn list(&mut self, filter: &Filter) -> Result<Listing> {
        Ok(Listing::new(self.entries()?, filter))
    }

    /// Role and owner of every block, owners found by walking each
    /// active chain once.
    pub fn block_map(&mut self) -> Result<BlockMap> {
        let directory = self.load_directory()?;
        let table = self.load_table()?;
        let mut owners = HashMap::new();
        for (_, record) in directory.active() {
            let first = super::head_block(record)?;
            for (i, block) in table.chain(first)?.into_iter().enumerate() {
                let owner = Owner {
                    name: record.name_lossy(),
                    position: i + 1,
                };
                owners.insert(block, owner);
            }
        }
        let geometry = *self.geometry();
        let blocks = (0..table.len() as u32)
            .map(|index| {
                let role = match index {
                    TABLE_BLOCK => BlockRole::Table,
                    DIRECTORY_BLOCK => BlockRole::Directory,
                    _ if table.state(index).is_some_and(|s| s.is_free()) => BlockRole::Free,
                    _ => BlockRole::Data(owners.remove(&index)),
                };
                BlockInfo {
                    index,
                    address: geometry.block_offset(index),
                    role,
                }
            })
            .collect();
        Ok(BlockMap { geometry, blocks })
    }
}
