//! WD1000/WD1010 hard disk controller.
//!
//! Port map (low byte of the port):
//!
//! | Port | Read | Write |
//! |---|---|---|
//! | 0xC0 | write protect, one bit per drive | - |
//! | 0xC1 | control | control (bit 4: soft reset) |
//! | 0xC8 | data | data |
//! | 0xC9 | error | write precompensation |
//! | 0xCA | sector count | sector count |
//! | 0xCB | sector number | sector number |
//! | 0xCC | cylinder low | cylinder low |
//! | 0xCD | cylinder high | cylinder high |
//! | 0xCE | size/drive/head | size/drive/head |
//! | 0xCF | status | command |
//!
//! Failures never leave the controller: they show up in the status and
//! error registers, and are logged.

pub mod drive;
pub mod header;
pub mod store;

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use log::{debug, error, trace, warn};

use crate::config::Model;
use crate::error::TrsError;

pub use drive::{Drive, DriveManager, MAX_DRIVES};
pub use header::{
    create_image, Geometry, HardDiskHeader, HEADER_SIZE, SECTORS_PER_TRACK, SECTOR_SIZE,
};
pub use store::{DirDiskStore, DiskImage, DiskStore, MemoryDiskStore, OpenedImage, SharedImage};

pub const PORT_WP: u8 = 0xC0;
pub const PORT_CONTROL: u8 = 0xC1;
pub const PORT_DATA: u8 = 0xC8;
/// Error on read, precompensation on write.
pub const PORT_ERROR: u8 = 0xC9;
pub const PORT_SECCNT: u8 = 0xCA;
pub const PORT_SECNUM: u8 = 0xCB;
pub const PORT_CYLLO: u8 = 0xCC;
pub const PORT_CYLHI: u8 = 0xCD;
pub const PORT_SDH: u8 = 0xCE;
/// Status on read, command on write.
pub const PORT_STATUS: u8 = 0xCF;

/// First and last controller ports.
pub const PORT_FIRST: u8 = 0xC0;
pub const PORT_LAST: u8 = 0xCF;

pub const CONTROL_SOFT_RESET: u8 = 0x10;

pub const STATUS_BUSY: u8 = 0x80;
pub const STATUS_READY: u8 = 0x40;
pub const STATUS_WRERR: u8 = 0x20;
pub const STATUS_SEEKDONE: u8 = 0x10;
pub const STATUS_DRQ: u8 = 0x08;
pub const STATUS_ECC: u8 = 0x04;
pub const STATUS_CIP: u8 = 0x02;
pub const STATUS_ERR: u8 = 0x01;

pub const ERROR_BBD: u8 = 0x80;
pub const ERROR_DATA: u8 = 0x40;
pub const ERROR_NOT_FOUND: u8 = 0x10;
pub const ERROR_ABORT: u8 = 0x04;
pub const ERROR_TRK0: u8 = 0x02;
pub const ERROR_DAM: u8 = 0x01;

pub const COMMAND_MASK: u8 = 0xF0;
pub const COMMAND_RESTORE: u8 = 0x10;
pub const COMMAND_READ: u8 = 0x20;
pub const COMMAND_WRITE: u8 = 0x30;
pub const COMMAND_VERIFY: u8 = 0x40;
pub const COMMAND_FORMAT: u8 = 0x50;
pub const COMMAND_INIT: u8 = 0x60;
pub const COMMAND_SEEK: u8 = 0x70;
/// Modifier bit on READ and WRITE.
pub const COMMAND_DMA: u8 = 0x08;

const SDH_SIZE_MASK: u8 = 0x60;
const SDH_DRIVE_MASK: u8 = 0x18;
const SDH_DRIVE_SHIFT: u8 = 3;
const SDH_HEAD_MASK: u8 = 0x07;

/// Value read from a controller port nothing answers on.
const NO_REGISTER: u8 = 0xFF;

/// Decoded controller command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Restore,
    Read { dma: bool },
    Write { dma: bool },
    Verify,
    Format,
    Init,
    Seek,
    Unknown(u8),
}

impl Command {
    pub fn decode(value: u8) -> Self {
        let dma = value & COMMAND_DMA != 0;
        match value & COMMAND_MASK {
            COMMAND_RESTORE => Command::Restore,
            COMMAND_READ => Command::Read { dma },
            COMMAND_WRITE => Command::Write { dma },
            COMMAND_VERIFY => Command::Verify,
            COMMAND_FORMAT => Command::Format,
            COMMAND_INIT => Command::Init,
            COMMAND_SEEK => Command::Seek,
            _ => Command::Unknown(value),
        }
    }
}

/// Hard disk controller register file and command state machine.
pub struct HardDiskController {
    control: u8,
    data: u8,
    error: u8,
    seccnt: u8,
    secnum: u8,
    cyl: u16,
    drive: u8,
    head: u8,
    status: u8,
    command: u8,
    /// Bytes moved through the data port by the current READ or WRITE.
    bytes_done: usize,
    drives: DriveManager,
}

impl HardDiskController {
    pub fn new(model: Model, store: Box<dyn DiskStore>) -> Self {
        let mut controller = Self {
            control: 0,
            data: 0,
            error: 0,
            seccnt: 0,
            secnum: 0,
            cyl: 0,
            drive: 0,
            head: 0,
            status: STATUS_READY,
            command: 0,
            bytes_done: 0,
            drives: DriveManager::new(model, store),
        };
        controller.reset();
        controller
    }

    /// Controller reading `hardN-M` images from `dir`.
    pub fn with_dir(model: Model, dir: impl Into<PathBuf>) -> Self {
        Self::new(model, Box::new(DirDiskStore::new(dir)))
    }

    /// Power-on and reset button state. Closes every drive.
    pub fn reset(&mut self) {
        self.control = 0;
        self.data = 0;
        self.error = 0;
        self.seccnt = 0;
        self.secnum = 0;
        self.cyl = 0;
        self.drive = 0;
        self.head = 0;
        self.status = STATUS_READY;
        self.command = 0;
        self.bytes_done = 0;
        self.drives.close_all();
    }

    pub fn status(&self) -> u8 {
        self.status
    }

    pub fn error(&self) -> u8 {
        self.error
    }

    pub fn cylinder(&self) -> u16 {
        self.cyl
    }

    pub fn drive(&self) -> u8 {
        self.drive
    }

    pub fn head(&self) -> u8 {
        self.head
    }

    pub fn bytes_done(&self) -> usize {
        self.bytes_done
    }

    pub fn drives(&self) -> &DriveManager {
        &self.drives
    }

    /// Read a controller port.
    pub fn port_in(&mut self, port: u8) -> u8 {
        match port {
            PORT_WP => self.write_protect_bits(),
            PORT_CONTROL => self.control,
            PORT_DATA => self.read_data(),
            PORT_ERROR => self.error,
            PORT_SECCNT => self.seccnt,
            PORT_SECNUM => self.secnum,
            PORT_CYLLO => self.cyl as u8,
            PORT_CYLHI => (self.cyl >> 8) as u8,
            PORT_SDH => (self.drive << SDH_DRIVE_SHIFT) | self.head,
            PORT_STATUS => self.status,
            _ => NO_REGISTER,
        }
    }

    /// Write a controller port.
    pub fn port_out(&mut self, port: u8, value: u8) {
        match port {
            PORT_CONTROL => self.set_control(value),
            PORT_DATA => self.write_data(value),
            PORT_SECCNT => self.seccnt = value,
            PORT_SECNUM => self.secnum = value,
            PORT_CYLLO => self.cyl = (self.cyl & 0xFF00) | value as u16,
            PORT_CYLHI => self.cyl = (self.cyl & 0x00FF) | ((value as u16) << 8),
            PORT_SDH => self.set_sdh(value),
            PORT_STATUS => self.set_command(value),
            // Write protect and precompensation are read-only / ignored
            _ => {}
        }
    }

    pub fn set_control(&mut self, value: u8) {
        if value & CONTROL_SOFT_RESET != 0 {
            debug!("hard disk soft reset");
            self.reset();
        }
        self.control = value;
    }

    pub fn set_sector_count(&mut self, value: u8) {
        self.seccnt = value;
    }

    pub fn set_sector_number(&mut self, value: u8) {
        self.secnum = value;
    }

    pub fn set_cylinder(&mut self, cylinder: u16) {
        self.cyl = cylinder;
    }

    /// Size/drive/head register. Only 256-byte sectors exist; other sizes
    /// are reported and otherwise ignored.
    pub fn set_sdh(&mut self, value: u8) {
        if value & SDH_SIZE_MASK != 0 {
            warn!(
                "hard disk size bits set to nonzero value ({})",
                value & SDH_SIZE_MASK
            );
        }
        self.drive = (value & SDH_DRIVE_MASK) >> SDH_DRIVE_SHIFT;
        self.head = value & SDH_HEAD_MASK;
    }

    /// Command register write. Always starts a new transfer.
    pub fn set_command(&mut self, value: u8) {
        self.bytes_done = 0;
        self.command = value;
        let command = Command::decode(value);
        trace!(
            "hard disk command {:#04x} ({:?}) drive {} cyl {} head {} sector {}",
            value,
            command,
            self.drive,
            self.cyl,
            self.head,
            self.secnum
        );
        match command {
            Command::Restore => {
                self.cyl = 0;
                self.set_ready(STATUS_READY);
            }
            Command::Read { dma } | Command::Write { dma } => {
                if dma {
                    warn!("hard disk DMA transfer not supported ({:#04x})", value);
                    self.fail(ERROR_ABORT);
                } else if self.find_sector() {
                    self.set_ready(STATUS_READY | STATUS_DRQ);
                }
            }
            Command::Verify | Command::Seek => {
                if self.find_sector() {
                    self.set_ready(STATUS_READY);
                }
            }
            Command::Format => {
                if self.seccnt as u16 != SECTORS_PER_TRACK {
                    warn!(
                        "hard disk format: only {} sectors/track, not {}",
                        SECTORS_PER_TRACK, self.seccnt
                    );
                }
                if self.secnum != header::SECTOR_SIZE_CODE {
                    warn!(
                        "hard disk format: only {} byte sectors (code {}), not code {}",
                        SECTOR_SIZE,
                        header::SECTOR_SIZE_CODE,
                        self.secnum
                    );
                }
                self.set_ready(STATUS_READY);
            }
            Command::Init => {
                warn!("hard disk init command ({:#04x}) not implemented", value);
                self.set_ready(STATUS_READY);
            }
            Command::Unknown(value) => {
                warn!("hard disk unknown command {:#04x}", value);
            }
        }
    }

    fn set_ready(&mut self, status: u8) {
        self.status = status;
        self.error = 0;
    }

    fn fail(&mut self, error: u8) {
        self.status = STATUS_ERR;
        self.error = error;
    }

    fn write_protect_bits(&mut self) -> u8 {
        let mut bits = 0;
        for index in 0..MAX_DRIVES {
            // Probing a missing drive is not a controller error
            if let Err(e) = self.drives.open(index) {
                trace!("hard drive {} not available: {}", index, e);
            }
            if self.drives.drive(index).write_protect() {
                bits |= 0x80 >> index;
            }
        }
        bits
    }

    /// Open the current drive and position it at the addressed sector.
    fn find_sector(&mut self) -> bool {
        let index = self.drive as usize;
        if let Err(e) = self.drives.open(index) {
            match e {
                TrsError::Io(e) => {
                    debug!("hard drive {} cannot be opened: {}", index, e)
                }
                e => warn!("hard drive {}: {}", index, e),
            }
            self.fail(ERROR_NOT_FOUND);
            return false;
        }
        let geometry = self.drives.drive(index).geometry();
        let head = self.head as u16;
        let sector = self.secnum as u16;
        // The cylinder is not range checked; past the end reads 0xFF
        if head >= geometry.heads || sector >= geometry.sectors_per_track {
            self.fail(ERROR_NOT_FOUND);
            return false;
        }
        let offset = geometry.sector_offset(self.cyl, head, sector);
        let seek = match self.drives.image(index) {
            Some(image) => image.seek(SeekFrom::Start(offset)).map(|_| ()),
            None => Err(io::Error::new(io::ErrorKind::NotFound, "drive not open")),
        };
        if let Err(e) = seek {
            error!("hard drive {} seek to {} failed: {}", index, offset, e);
            self.fail(ERROR_NOT_FOUND);
            return false;
        }
        true
    }

    fn transfer_active(&self, command: u8) -> bool {
        self.command & COMMAND_MASK == command
            && self.status & STATUS_ERR == 0
            && self.bytes_done < SECTOR_SIZE
    }

    /// Data register read. Streams the sector during READ; otherwise, and
    /// once the sector is done, returns the last value.
    pub fn read_data(&mut self) -> u8 {
        if self.transfer_active(COMMAND_READ) {
            let index = self.drive as usize;
            let mut byte = [0u8; 1];
            let read = match self.drives.image(index) {
                Some(image) => image.read(&mut byte),
                None => Ok(0),
            };
            match read {
                Ok(1) => self.data = byte[0],
                // Past the end of a short image
                Ok(_) => self.data = 0xFF,
                Err(e) => {
                    error!("hard drive {} read error: {}", index, e);
                    self.data = 0xFF;
                    self.fail(ERROR_DATA);
                }
            }
            self.bytes_done += 1;
        }
        self.data
    }

    /// Data register write. Streams into the sector during WRITE and flushes
    /// the image when the sector is complete.
    pub fn write_data(&mut self, value: u8) {
        self.data = value;
        if self.transfer_active(COMMAND_WRITE) {
            let index = self.drive as usize;
            if let Err(e) = self.write_sector_byte(value) {
                error!("hard drive {} write error: {}", index, e);
                self.fail(ERROR_DATA);
            }
        }
    }

    fn write_sector_byte(&mut self, value: u8) -> io::Result<()> {
        let index = self.drive as usize;
        let directory_byte =
            self.cyl == 0 && self.head == 0 && self.secnum == 0 && self.bytes_done == 2;
        // The byte counts toward the sector even if storing it fails
        self.bytes_done += 1;
        let image = self
            .drives
            .image(index)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "drive not open"))?;
        if directory_byte {
            update_directory_cylinder(image, value)?;
        }
        image.write_all(&[value])?;
        if self.bytes_done == SECTOR_SIZE {
            image.flush()?;
        }
        Ok(())
    }
}

/// Copy the directory cylinder into the image header.
///
/// The boot sector's third byte is the directory cylinder. Other emulators
/// read it from header byte 31, so it is kept in step whenever that byte of
/// cylinder 0, head 0, sector 0 is written. The file position is restored
/// afterwards.
fn update_directory_cylinder(image: &mut dyn DiskImage, cylinder: u8) -> io::Result<()> {
    let position = image.stream_position()?;
    image.seek(SeekFrom::Start(header::DIR_CYLINDER_OFFSET))?;
    image.write_all(&[cylinder])?;
    image.seek(SeekFrom::Start(position))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(cylinders: u16, sectors: u16) -> Vec<u8> {
        HardDiskHeader::new(cylinders, sectors).unwrap().to_bytes().to_vec()
    }

    fn controller_with(name: &str, data: Vec<u8>) -> (HardDiskController, SharedImage) {
        let mut store = MemoryDiskStore::new();
        let shared = store.insert(name, data);
        (
            HardDiskController::new(Model::Model4, Box::new(store)),
            shared,
        )
    }

    fn select(hd: &mut HardDiskController, drive: u8, head: u8, cyl: u16, sector: u8) {
        hd.port_out(PORT_SDH, (drive << 3) | head);
        hd.port_out(PORT_CYLLO, cyl as u8);
        hd.port_out(PORT_CYLHI, (cyl >> 8) as u8);
        hd.port_out(PORT_SECNUM, sector);
    }

    #[test]
    fn test_reset_state() {
        let (mut hd, _) = controller_with("hard4-0", image(10, 32));
        assert_eq!(hd.port_in(PORT_STATUS), STATUS_READY);
        assert_eq!(hd.port_in(PORT_ERROR), 0);
        assert_eq!(hd.port_in(0xC5), 0xFF);
    }

    #[test]
    fn test_register_file() {
        let (mut hd, _) = controller_with("hard4-0", image(10, 32));
        hd.port_out(PORT_SECCNT, 32);
        hd.port_out(PORT_CYLLO, 0x34);
        hd.port_out(PORT_CYLHI, 0x12);
        hd.port_out(PORT_SDH, 0x1D);
        assert_eq!(hd.port_in(PORT_SECCNT), 32);
        assert_eq!(hd.cylinder(), 0x1234);
        assert_eq!(hd.port_in(PORT_CYLLO), 0x34);
        assert_eq!(hd.port_in(PORT_CYLHI), 0x12);
        assert_eq!(hd.drive(), 3);
        assert_eq!(hd.head(), 5);
        assert_eq!(hd.port_in(PORT_SDH), 0x1D);

        // Size bits are reported and dropped
        hd.port_out(PORT_SDH, 0x20 | 0x09);
        assert_eq!(hd.port_in(PORT_SDH), 0x09);
    }

    #[test]
    fn test_data_register_is_plain_cell_when_idle() {
        let (mut hd, shared) = controller_with("hard4-0", image(10, 32));
        hd.port_out(PORT_DATA, 0x5A);
        assert_eq!(hd.port_in(PORT_DATA), 0x5A);
        assert_eq!(hd.bytes_done(), 0);
        assert_eq!(shared.lock().unwrap().len(), HEADER_SIZE);
    }

    #[test]
    fn test_restore() {
        let (mut hd, _) = controller_with("hard4-0", image(10, 32));
        hd.set_cylinder(7);
        hd.port_out(PORT_STATUS, COMMAND_RESTORE);
        assert_eq!(hd.cylinder(), 0);
        assert_eq!(hd.status(), STATUS_READY);
    }

    #[test]
    fn test_sector_round_trip() {
        let (mut hd, shared) = controller_with("hard4-0", image(10, 64));
        let sector: Vec<u8> = (0..=255u8).map(|b| b.wrapping_mul(7)).collect();

        select(&mut hd, 0, 0, 0, 0);
        hd.port_out(PORT_STATUS, COMMAND_WRITE);
        assert_eq!(hd.status(), STATUS_READY | STATUS_DRQ);
        for &byte in &sector {
            hd.port_out(PORT_DATA, byte);
        }
        assert_eq!(hd.bytes_done(), SECTOR_SIZE);
        // Extra bytes after the sector are not written
        hd.port_out(PORT_DATA, 0xEE);
        assert_eq!(shared.lock().unwrap().len(), HEADER_SIZE + SECTOR_SIZE);

        hd.port_out(PORT_STATUS, COMMAND_READ);
        assert_eq!(hd.bytes_done(), 0);
        let read: Vec<u8> = (0..SECTOR_SIZE).map(|_| hd.port_in(PORT_DATA)).collect();
        assert_eq!(read, sector);
        // Past the sector the last value repeats
        assert_eq!(hd.port_in(PORT_DATA), sector[255]);
        assert_eq!(hd.bytes_done(), SECTOR_SIZE);

        // Header byte 31 picked up the third data byte
        let data = shared.lock().unwrap();
        assert_eq!(data[31], sector[2]);
        assert_eq!(&data[HEADER_SIZE..], &sector[..]);
    }

    #[test]
    fn test_directory_byte_only_on_first_sector() {
        let (mut hd, shared) = controller_with("hard4-0", image(10, 64));
        select(&mut hd, 0, 1, 0, 0);
        hd.port_out(PORT_STATUS, COMMAND_WRITE);
        for byte in 0..SECTOR_SIZE {
            hd.port_out(PORT_DATA, byte as u8 | 0x80);
        }
        let data = shared.lock().unwrap();
        assert_eq!(data[31], 1);
        let offset = HEADER_SIZE + 32 * SECTOR_SIZE;
        assert_eq!(data[offset + 2], 0x82);
    }

    #[test]
    fn test_sector_addressing() {
        let (mut hd, shared) = controller_with("hard4-0", image(10, 64));
        select(&mut hd, 0, 1, 2, 3);
        hd.port_out(PORT_STATUS, COMMAND_WRITE);
        hd.port_out(PORT_DATA, 0xA5);
        let offset = HEADER_SIZE + SECTOR_SIZE * (2 * 64 + 32 + 3);
        assert_eq!(shared.lock().unwrap()[offset], 0xA5);
    }

    #[test]
    fn test_read_past_end_of_image() {
        let (mut hd, _) = controller_with("hard4-0", image(10, 32));
        select(&mut hd, 0, 0, 5, 1);
        hd.port_out(PORT_STATUS, COMMAND_READ);
        assert_eq!(hd.status(), STATUS_READY | STATUS_DRQ);
        assert_eq!(hd.port_in(PORT_DATA), 0xFF);
        assert_eq!(hd.status() & STATUS_ERR, 0);
    }

    #[test]
    fn test_cylinder_not_checked() {
        let (mut hd, _) = controller_with("hard4-0", image(10, 32));
        select(&mut hd, 0, 0, 500, 0);
        hd.port_out(PORT_STATUS, COMMAND_SEEK);
        assert_eq!(hd.status(), STATUS_READY);
    }

    #[test]
    fn test_head_out_of_range() {
        // 32 sectors per cylinder is one head
        let (mut hd, _) = controller_with("hard4-0", image(40, 32));
        select(&mut hd, 0, 1, 0, 0);
        hd.port_out(PORT_STATUS, COMMAND_SEEK);
        assert_eq!(hd.status(), STATUS_ERR);
        assert_eq!(hd.error(), ERROR_NOT_FOUND);
        assert_eq!(hd.drives().drive(0).geometry().heads, 1);

        // A good seek clears the error again
        select(&mut hd, 0, 0, 0, 31);
        hd.port_out(PORT_STATUS, COMMAND_VERIFY);
        assert_eq!(hd.status(), STATUS_READY);
        assert_eq!(hd.error(), 0);
    }

    #[test]
    fn test_sector_out_of_range() {
        let (mut hd, _) = controller_with("hard4-0", image(40, 32));
        select(&mut hd, 0, 0, 0, 32);
        hd.port_out(PORT_STATUS, COMMAND_READ);
        assert_eq!(hd.status(), STATUS_ERR);
        assert_eq!(hd.error(), ERROR_NOT_FOUND);
        // No transfer while the error stands
        hd.port_out(PORT_DATA, 0x11);
        assert_eq!(hd.port_in(PORT_DATA), 0x11);
        assert_eq!(hd.bytes_done(), 0);
    }

    #[test]
    fn test_dma_aborts() {
        let (mut hd, _) = controller_with("hard4-0", image(10, 32));
        hd.port_out(PORT_STATUS, COMMAND_READ | COMMAND_DMA);
        assert_eq!(hd.status(), STATUS_ERR);
        assert_eq!(hd.error(), ERROR_ABORT);
        hd.port_out(PORT_STATUS, COMMAND_WRITE | COMMAND_DMA);
        assert_eq!(hd.error(), ERROR_ABORT);
        // The drive was never touched
        assert!(!hd.drives().drive(0).is_open());
    }

    #[test]
    fn test_missing_drive() {
        let (mut hd, _) = controller_with("hard4-0", image(10, 32));
        select(&mut hd, 2, 0, 0, 0);
        hd.port_out(PORT_STATUS, COMMAND_SEEK);
        assert_eq!(hd.status(), STATUS_ERR);
        assert_eq!(hd.error(), ERROR_NOT_FOUND);
    }

    #[test]
    fn test_geometry_rejected_on_open() {
        let mut bad = image(10, 32);
        bad[29] = 48;
        let (mut hd, _) = controller_with("hard4-0", bad);
        hd.port_out(PORT_STATUS, COMMAND_SEEK);
        assert_eq!(hd.status(), STATUS_ERR);
        assert_eq!(hd.error(), ERROR_NOT_FOUND);
        assert!(!hd.drives().drive(0).is_open());
    }

    #[test]
    fn test_format_and_init_report_ready() {
        let (mut hd, _) = controller_with("hard4-0", image(10, 32));
        hd.port_out(PORT_SECCNT, 17);
        hd.port_out(PORT_SECNUM, 1);
        hd.port_out(PORT_STATUS, COMMAND_FORMAT);
        assert_eq!(hd.status(), STATUS_READY);
        hd.port_out(PORT_STATUS, COMMAND_INIT);
        assert_eq!(hd.status(), STATUS_READY);
    }

    #[test]
    fn test_unknown_command_keeps_status() {
        let (mut hd, _) = controller_with("hard4-0", image(10, 32));
        hd.port_out(PORT_STATUS, COMMAND_READ | COMMAND_DMA);
        hd.port_out(PORT_STATUS, 0x90);
        assert_eq!(hd.status(), STATUS_ERR);
        assert_eq!(hd.error(), ERROR_ABORT);
        assert_eq!(Command::decode(0x00), Command::Unknown(0x00));
        assert_eq!(Command::decode(0x28), Command::Read { dma: true });
    }

    #[test]
    fn test_write_protect_port() {
        let mut store = MemoryDiskStore::new();
        store.insert("hard4-0", image(10, 32));
        store.insert_read_only("hard4-2", image(10, 32));
        let mut hd = HardDiskController::new(Model::Model4, Box::new(store));
        assert_eq!(hd.port_in(PORT_WP), 0x80 >> 2);
        // Missing drives 1 and 3 do not latch an error
        assert_eq!(hd.status(), STATUS_READY);
    }

    #[test]
    fn test_write_to_read_only_image() {
        let mut store = MemoryDiskStore::new();
        store.insert_read_only("hard4-0", image(10, 32));
        let mut hd = HardDiskController::new(Model::Model4, Box::new(store));
        select(&mut hd, 0, 0, 0, 1);
        hd.port_out(PORT_STATUS, COMMAND_WRITE);
        assert_eq!(hd.status(), STATUS_READY | STATUS_DRQ);
        hd.port_out(PORT_DATA, 0x01);
        assert_eq!(hd.status(), STATUS_ERR);
        assert_eq!(hd.error(), ERROR_DATA);
        // The failed byte is counted; the error ends the transfer
        assert_eq!(hd.bytes_done(), 1);
        hd.port_out(PORT_DATA, 0x02);
        assert_eq!(hd.bytes_done(), 1);
    }

    #[test]
    fn test_soft_reset_closes_drives() {
        let (mut hd, _) = controller_with("hard4-0", image(10, 32));
        hd.port_out(PORT_STATUS, COMMAND_SEEK);
        assert!(hd.drives().drive(0).is_open());
        hd.port_out(PORT_SDH, 0x0B);
        hd.port_out(PORT_CONTROL, CONTROL_SOFT_RESET | 0x0C);
        assert!(!hd.drives().drive(0).is_open());
        assert_eq!(hd.port_in(PORT_CONTROL), CONTROL_SOFT_RESET | 0x0C);
        assert_eq!(hd.port_in(PORT_SDH), 0);
        assert_eq!(hd.status(), STATUS_READY);
    }

    #[test]
    fn test_deterministic() {
        let run = || {
            let (mut hd, shared) = controller_with("hard4-0", image(10, 64));
            select(&mut hd, 0, 1, 3, 4);
            hd.port_out(PORT_STATUS, COMMAND_WRITE);
            for byte in 0..40u8 {
                hd.port_out(PORT_DATA, byte ^ 0x3C);
            }
            hd.port_out(PORT_STATUS, COMMAND_READ);
            let bytes: Vec<u8> = (0..8).map(|_| hd.port_in(PORT_DATA)).collect();
            let image = shared.lock().unwrap().clone();
            (hd.status(), hd.error(), bytes, image)
        };
        assert_eq!(run(), run());
    }
}
