//! Backing storage for hard disk images.
//!
//! The controller only needs a seekable byte stream per drive. `DiskStore`
//! hands those out by image name, so the same controller runs against a
//! directory of image files or against images held in memory.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{TrsError, TrsResult};

/// An open disk image.
pub trait DiskImage: Read + Write + Seek + Send {}

impl<T: Read + Write + Seek + Send> DiskImage for T {}

/// Result of opening an image.
pub struct OpenedImage {
    pub image: Box<dyn DiskImage>,
    /// The image could only be opened for reading.
    pub read_only: bool,
}

/// Source of disk images.
pub trait DiskStore: Send {
    /// Open `name`, for reading and writing if possible, else read-only.
    fn open(&mut self, name: &str) -> io::Result<OpenedImage>;
}

/// Images stored as files in one directory.
#[derive(Debug, Clone)]
pub struct DirDiskStore {
    dir: PathBuf,
}

impl DirDiskStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }
}

impl DiskStore for DirDiskStore {
    fn open(&mut self, name: &str) -> io::Result<OpenedImage> {
        let path = self.path(name);
        match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(file) => Ok(OpenedImage {
                image: Box::new(file),
                read_only: false,
            }),
            Err(_) => {
                let file = File::open(&path)?;
                Ok(OpenedImage {
                    image: Box::new(file),
                    read_only: true,
                })
            }
        }
    }
}

/// Image bytes shared between a store and its open handles.
pub type SharedImage = Arc<Mutex<Vec<u8>>>;

struct StoredImage {
    data: SharedImage,
    read_only: bool,
}

/// In-memory images, for tests.
#[derive(Default)]
pub struct MemoryDiskStore {
    images: HashMap<String, StoredImage>,
}

impl MemoryDiskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an image. Returns the shared bytes so the caller can inspect
    /// them after the controller writes.
    pub fn insert(&mut self, name: &str, data: impl Into<Vec<u8>>) -> SharedImage {
        self.insert_image(name, data.into(), false)
    }

    /// Add an image that only opens for reading.
    pub fn insert_read_only(&mut self, name: &str, data: impl Into<Vec<u8>>) -> SharedImage {
        self.insert_image(name, data.into(), true)
    }

    fn insert_image(&mut self, name: &str, data: Vec<u8>, read_only: bool) -> SharedImage {
        let data = Arc::new(Mutex::new(data));
        self.images.insert(
            name.to_string(),
            StoredImage {
                data: Arc::clone(&data),
                read_only,
            },
        );
        data
    }

    /// Copy of an image's current contents.
    pub fn snapshot(&self, name: &str) -> TrsResult<Option<Vec<u8>>> {
        match self.images.get(name) {
            Some(stored) => {
                let data = stored.data.lock().map_err(|_| TrsError::LockPoisoned)?;
                Ok(Some(data.clone()))
            }
            None => Ok(None),
        }
    }
}

impl DiskStore for MemoryDiskStore {
    fn open(&mut self, name: &str) -> io::Result<OpenedImage> {
        let stored = self
            .images
            .get(name)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, name.to_string()))?;
        Ok(OpenedImage {
            image: Box::new(MemoryImage {
                data: Arc::clone(&stored.data),
                position: 0,
                read_only: stored.read_only,
            }),
            read_only: stored.read_only,
        })
    }
}

/// Cursor over a shared in-memory image.
struct MemoryImage {
    data: SharedImage,
    position: u64,
    read_only: bool,
}

impl MemoryImage {
    fn lock(&self) -> io::Result<MutexGuard<'_, Vec<u8>>> {
        self.data
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "disk image lock poisoned"))
    }
}

impl Read for MemoryImage {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let data = self.lock()?;
        let start = (self.position as usize).min(data.len());
        let len = buf.len().min(data.len() - start);
        buf[..len].copy_from_slice(&data[start..start + len]);
        drop(data);
        self.position += len as u64;
        Ok(len)
    }
}

impl Write for MemoryImage {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.read_only {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "disk image is read-only",
            ));
        }
        let position = self.position as usize;
        let mut data = self.lock()?;
        if data.len() < position + buf.len() {
            data.resize(position + buf.len(), 0);
        }
        data[position..position + buf.len()].copy_from_slice(buf);
        drop(data);
        self.position += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for MemoryImage {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let len = self.lock()?.len() as i64;
        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(offset) => len + offset,
            SeekFrom::Current(offset) => self.position as i64 + offset,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of image",
            ));
        }
        self.position = target as u64;
        Ok(self.position)
    }
}
