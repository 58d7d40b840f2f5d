pub mod container;
pub mod fs;

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use tracing::{debug, warn};

use container::layout::Geometry;
use container::ContainerFile;
use fs::inspect::{BlockMap, Filter, Listing};
use fs::{FSError, FileEntry, FileName, FileSystem, Result};

/// Removes the half written host file at `path` when `result` failed.
/// The original error is returned either way.
fn discard_on_error<T>(path: &Path, result: Result<T>) -> Result<T> {
    if result.is_err() {
        debug!("Removing incomplete {path:?}");
        if let Err(err) = std::fs::remove_file(path) {
            warn!("Failed to remove incomplete {path:?}: {err}");
        }
    }
    result
}

/// Path based entry points. Each call opens the container, does its
/// work and closes it again, nothing is kept between calls.
#[derive(Debug, Default, Clone, Copy)]
pub struct FatBox {
    geometry: Geometry,
}

impl FatBox {
    pub fn new(geometry: Geometry) -> Self {
        Self { geometry }
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    fn open(&self, container: &Path) -> Result<FileSystem<ContainerFile>> {
        FileSystem::open(ContainerFile::open(container, self.geometry)?)
    }

    /// Creates and formats a new container at `container`. A container
    /// that could not be formatted is removed again.
    pub fn create(&self, container: impl AsRef<Path>) -> Result<()> {
        let container = container.as_ref();
        let file = ContainerFile::create(container, self.geometry)?;
        let formatted = FileSystem::format(file).and_then(|fs| fs.into_inner().close());
        discard_on_error(container, formatted)
    }

    pub fn delete(&self, container: impl AsRef<Path>) -> Result<()> {
        ContainerFile::delete(container)
    }

    /// Copies the host file `source` into the container. It is stored
    /// under `name`, or under the last component of `source` if no name
    /// is given.
    pub fn insert(
        &self,
        container: impl AsRef<Path>,
        source: impl AsRef<Path>,
        name: Option<&str>,
    ) -> Result<FileEntry> {
        let source = source.as_ref();
        let name = match name {
            Some(name) => FileName::parse(name)?,
            None => {
                let file_name = source
                    .file_name()
                    .and_then(|n| n.to_str())
                    .ok_or_else(|| FSError::InvalidName {
                        name: source.display().to_string(),
                        reason: "path has no usable file name",
                    })?;
                FileName::parse(file_name)?
            }
        };
        let mut fs = self.open(container.as_ref())?;
        let file = File::open(source)?;
        let size = file.metadata()?.len();
        let entry = fs.insert(&name, size, &mut BufReader::new(file))?;
        fs.into_inner().close()?;
        Ok(entry)
    }

    pub fn remove(&self, container: impl AsRef<Path>, name: &str) -> Result<FileEntry> {
        let name = FileName::parse(name)?;
        let mut fs = self.open(container.as_ref())?;
        let entry = fs.remove(&name)?;
        fs.into_inner().close()?;
        Ok(entry)
    }

    /// Copies `name` out of the container into a new host file at
    /// `output`, which must not exist yet. Returns the bytes written.
    pub fn get(
        &self,
        container: impl AsRef<Path>,
        name: &str,
        output: impl AsRef<Path>,
    ) -> Result<u64> {
        let name = FileName::parse(name)?;
        let output = output.as_ref();
        if output.exists() {
            return Err(FSError::AlreadyExists(output.to_owned()));
        }
        let mut fs = self.open(container.as_ref())?;
        // fail on a missing name before the output file exists
        fs.entry(&name)?;
        let file = File::options()
            .write(true)
            .create_new(true)
            .open(output)
            .map_err(|err| match err.kind() {
                std::io::ErrorKind::AlreadyExists => FSError::AlreadyExists(output.to_owned()),
                _ => err.into(),
            })?;
        let mut writer = BufWriter::new(file);
        let copied = fs
            .read_file(&name, &mut writer)
            .and_then(|size| writer.flush().map(|_| size).map_err(Into::into));
        drop(writer);
        discard_on_error(output, copied)
    }

    pub fn list(&self, container: impl AsRef<Path>, filter: &str) -> Result<Listing> {
        self.open(container.as_ref())?.list(&Filter::parse(filter))
    }

    pub fn block_map(&self, container: impl AsRef<Path>) -> Result<BlockMap> {
        self.open(container.as_ref())?.block_map()
    }
}
