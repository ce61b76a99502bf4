//! Reed hard disk image header.
//!
//! Every image starts with a 256-byte header; sector data follows, ordered
//! by cylinder, head, then sector. Only the first 72 bytes carry anything.
//!
//! | Offset | Field |
//! |---|---|
//! | 0-2 | magic `0x56 0xCB`, version `0x10` |
//! | 3 | checksum |
//! | 4-6 | header blocks, MB/4, media type |
//! | 7-9 | flags (flag1 bit 7: write protected) |
//! | 10-14 | creator, format, creation date (mm/dd/yy) |
//! | 27-31 | drive parameters, cylinders, sectors per cylinder, granules, directory cylinder |
//! | 32-63 | volume label |
//! | 64-71 | file name |

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use crate::error::{TrsError, TrsResult};

pub const HEADER_SIZE: usize = 256;
pub const SECTOR_SIZE: usize = 256;
/// WD1010 size code for 256-byte sectors.
pub const SECTOR_SIZE_CODE: u8 = 0;
/// Fixed by the RSHARD driver format.
pub const SECTORS_PER_TRACK: u16 = 32;
pub const MAX_HEADS: u16 = 8;

const ID1: u8 = 0x56;
const ID2: u8 = 0xCB;
const VERSION: u8 = 0x10;
const CREATOR: u8 = 0x42;
const CHECKSUM_XOR: u8 = 0x4C;
const WRITE_PROTECT: u8 = 0x80;

/// Header byte the directory cylinder is kept in.
pub const DIR_CYLINDER_OFFSET: u64 = 31;

/// Drive geometry derived from a header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Geometry {
    pub cylinders: u16,
    pub heads: u16,
    pub sectors_per_track: u16,
}

impl Geometry {
    /// File offset of a sector. The cylinder is not checked against the
    /// drive size.
    pub fn sector_offset(&self, cylinder: u16, head: u16, sector: u16) -> u64 {
        let spt = self.sectors_per_track as u64;
        let index =
            cylinder as u64 * self.heads as u64 * spt + head as u64 * spt + sector as u64;
        HEADER_SIZE as u64 + SECTOR_SIZE as u64 * index
    }

    /// Image size with every sector present.
    pub fn image_size(&self) -> u64 {
        self.sector_offset(self.cylinders, 0, 0)
    }
}

/// Parsed image header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardDiskHeader {
    pub blocks: u8,
    pub mb4: u8,
    pub media: u8,
    pub flags: [u8; 3],
    pub creator: u8,
    pub format: u8,
    /// Month, day, two-digit year.
    pub created: [u8; 3],
    pub drive_params: u8,
    /// Raw cylinder count; 0 means 256.
    pub cylinders: u8,
    /// Raw sectors per cylinder; 0 means 256.
    pub sectors: u8,
    pub granules: u8,
    pub dir_cylinder: u8,
    pub label: [u8; 32],
    pub filename: [u8; 8],
}

impl Default for HardDiskHeader {
    /// A blank 10MB image: 202 cylinders of 256 sectors, directory on
    /// cylinder 1.
    fn default() -> Self {
        let mut label = [0; 32];
        label[..8].copy_from_slice(b"xtrshard");
        Self {
            blocks: 1,
            mb4: 4,
            media: 0,
            flags: [0; 3],
            creator: CREATOR,
            format: 0,
            created: [0; 3],
            drive_params: 0,
            cylinders: 202,
            sectors: 0,
            granules: 8,
            dir_cylinder: 1,
            label,
            filename: [0; 8],
        }
    }
}

impl HardDiskHeader {
    /// Header for a new image. Counts of 256 are stored as 0.
    pub fn new(cylinders: u16, sectors_per_cylinder: u16) -> TrsResult<Self> {
        if !(1..=256).contains(&cylinders) {
            return Err(TrsError::BadImage(format!(
                "{} cylinders is out of range",
                cylinders
            )));
        }
        if sectors_per_cylinder == 0 || sectors_per_cylinder > 256 {
            return Err(TrsError::BadGeometry {
                sectors: sectors_per_cylinder,
            });
        }
        let header = Self {
            cylinders: (cylinders & 0xFF) as u8,
            sectors: (sectors_per_cylinder & 0xFF) as u8,
            ..Self::default()
        };
        header.geometry()?;
        Ok(header)
    }

    /// Parse the first `HEADER_SIZE` bytes of an image. Only the magic and
    /// version are checked; the checksum is not.
    pub fn parse(bytes: &[u8]) -> TrsResult<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(TrsError::BadImage(format!(
                "header truncated at {} bytes",
                bytes.len()
            )));
        }
        if bytes[0] != ID1 || bytes[1] != ID2 || bytes[2] != VERSION {
            return Err(TrsError::BadImage(format!(
                "bad magic {:02x} {:02x} {:02x}",
                bytes[0], bytes[1], bytes[2]
            )));
        }
        let mut label = [0; 32];
        label.copy_from_slice(&bytes[32..64]);
        let mut filename = [0; 8];
        filename.copy_from_slice(&bytes[64..72]);
        Ok(Self {
            blocks: bytes[4],
            mb4: bytes[5],
            media: bytes[6],
            flags: [bytes[7], bytes[8], bytes[9]],
            creator: bytes[10],
            format: bytes[11],
            created: [bytes[12], bytes[13], bytes[14]],
            drive_params: bytes[27],
            cylinders: bytes[28],
            sectors: bytes[29],
            granules: bytes[30],
            dir_cylinder: bytes[31],
            label,
            filename,
        })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0; HEADER_SIZE];
        bytes[0] = ID1;
        bytes[1] = ID2;
        bytes[2] = VERSION;
        bytes[4] = self.blocks;
        bytes[5] = self.mb4;
        bytes[6] = self.media;
        bytes[7..10].copy_from_slice(&self.flags);
        bytes[10] = self.creator;
        bytes[11] = self.format;
        bytes[12..15].copy_from_slice(&self.created);
        bytes[27] = self.drive_params;
        bytes[28] = self.cylinders;
        bytes[29] = self.sectors;
        bytes[30] = self.granules;
        bytes[31] = self.dir_cylinder;
        bytes[32..64].copy_from_slice(&self.label);
        bytes[64..72].copy_from_slice(&self.filename);
        bytes[3] = checksum(&bytes);
        bytes
    }

    pub fn checksum(&self) -> u8 {
        checksum(&self.to_bytes())
    }

    pub fn is_write_protected(&self) -> bool {
        self.flags[0] & WRITE_PROTECT != 0
    }

    pub fn set_write_protected(&mut self, protect: bool) {
        if protect {
            self.flags[0] |= WRITE_PROTECT;
        } else {
            self.flags[0] &= !WRITE_PROTECT;
        }
    }

    pub fn cylinder_count(&self) -> u16 {
        if self.cylinders == 0 {
            256
        } else {
            self.cylinders as u16
        }
    }

    pub fn sectors_per_cylinder(&self) -> u16 {
        if self.sectors == 0 {
            256
        } else {
            self.sectors as u16
        }
    }

    /// Volume label up to the first NUL.
    pub fn label(&self) -> String {
        let end = self.label.iter().position(|&b| b == 0).unwrap_or(self.label.len());
        String::from_utf8_lossy(&self.label[..end]).into_owned()
    }

    pub fn set_label(&mut self, label: &str) {
        self.label = [0; 32];
        let bytes = label.as_bytes();
        let len = bytes.len().min(self.label.len());
        self.label[..len].copy_from_slice(&bytes[..len]);
    }

    /// Geometry as the controller sees it: fixed sectors per track, heads
    /// from sectors per cylinder.
    pub fn geometry(&self) -> TrsResult<Geometry> {
        let sectors = self.sectors_per_cylinder();
        let heads = sectors / SECTORS_PER_TRACK;
        if sectors % SECTORS_PER_TRACK != 0 || heads == 0 || heads > MAX_HEADS {
            return Err(TrsError::BadGeometry { sectors });
        }
        Ok(Geometry {
            cylinders: self.cylinder_count(),
            heads,
            sectors_per_track: SECTORS_PER_TRACK,
        })
    }
}

/// Sum of the first 32 header bytes except the checksum itself.
fn checksum(bytes: &[u8; HEADER_SIZE]) -> u8 {
    let sum = bytes[..32]
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != 3)
        .fold(0u8, |acc, (_, &b)| acc.wrapping_add(b));
    sum ^ CHECKSUM_XOR
}

/// Write a header-only image. Sectors read past the end of the file come
/// back as 0xFF; writes extend it.
pub fn create_image(path: &Path, header: &HardDiskHeader) -> TrsResult<()> {
    header.geometry()?;
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    file.write_all(&header.to_bytes())?;
    Ok(())
}
