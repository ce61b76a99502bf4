//! Per-drive image handles and geometry.

use std::io::Read;

use log::debug;

use super::header::{Geometry, HardDiskHeader, HEADER_SIZE};
use super::store::{DiskImage, DiskStore};
use crate::config::Model;
use crate::error::{TrsError, TrsResult};

pub const MAX_DRIVES: usize = 4;

/// One drive slot. Empty until first accessed.
#[derive(Default)]
pub struct Drive {
    image: Option<Box<dyn DiskImage>>,
    write_protect: bool,
    geometry: Geometry,
}

impl Drive {
    pub fn is_open(&self) -> bool {
        self.image.is_some()
    }

    pub fn write_protect(&self) -> bool {
        self.write_protect
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }
}

/// Lazily opens and validates the drive images.
pub struct DriveManager {
    model: Model,
    store: Box<dyn DiskStore>,
    drives: [Drive; MAX_DRIVES],
}

impl DriveManager {
    pub fn new(model: Model, store: Box<dyn DiskStore>) -> Self {
        Self {
            model,
            store,
            drives: Default::default(),
        }
    }

    pub fn drive(&self, index: usize) -> &Drive {
        &self.drives[index % MAX_DRIVES]
    }

    /// Open drive `index` if it is not open yet.
    ///
    /// On failure the slot is left closed and zeroed.
    pub fn open(&mut self, index: usize) -> TrsResult<()> {
        let index = index % MAX_DRIVES;
        if self.drives[index].is_open() {
            return Ok(());
        }
        let name = self.model.hard_disk_name(index);
        match self.load(&name) {
            Ok(drive) => {
                debug!(
                    "opened {}: {} cylinders, {} heads{}",
                    name,
                    drive.geometry.cylinders,
                    drive.geometry.heads,
                    if drive.write_protect { ", write protected" } else { "" }
                );
                self.drives[index] = drive;
                Ok(())
            }
            Err(e) => {
                self.drives[index] = Drive::default();
                Err(e)
            }
        }
    }

    fn load(&mut self, name: &str) -> TrsResult<Drive> {
        let mut opened = self.store.open(name)?;
        let mut bytes = [0u8; HEADER_SIZE];
        opened
            .image
            .read_exact(&mut bytes)
            .map_err(|_| TrsError::BadImage(format!("{}: header truncated", name)))?;
        let header = HardDiskHeader::parse(&bytes)
            .map_err(|e| TrsError::BadImage(format!("{}: {}", name, e)))?;
        let geometry = header.geometry()?;
        Ok(Drive {
            image: Some(opened.image),
            write_protect: opened.read_only || header.is_write_protected(),
            geometry,
        })
    }

    /// Open image of drive `index`, if any.
    pub fn image(&mut self, index: usize) -> Option<&mut (dyn DiskImage + 'static)> {
        self.drives[index % MAX_DRIVES].image.as_deref_mut()
    }

    /// Close every image and forget its geometry.
    pub fn close_all(&mut self) {
        for drive in self.drives.iter_mut() {
            *drive = Drive::default();
        }
    }
}
