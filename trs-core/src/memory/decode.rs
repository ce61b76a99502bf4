//! Address decoding tables.
//!
//! Every mode code owns an ordered list of zones per access kind. The first
//! zone whose range holds the address (and, for ROM, whose address falls
//! inside the loaded image) decides the target; an address no zone claims is
//! open bus. Tables are built once per model when the memory system is
//! created.
//!
//! Model I zones may defer to the shared MMIO table with a masked address,
//! the way the selector card's "I/O high" modes fold 0xF7E0-0xFFFF back onto
//! 0x37E0-0x3FFF.

use super::bank::BankSwitchUnit;
use super::map::ModeCode;
use crate::config::Model;
use crate::peripheral::FdcRegister;

/// First address of the keyboard matrix in the low 16K.
pub const KEYBOARD_START: u16 = 0x3800;
/// First address of video memory in the low 16K.
pub const VIDEO_START: u16 = 0x3C00;
/// First RAM address on an unbanked map.
pub const RAM_START: u16 = 0x4000;
/// Model 4 map 2 video window.
pub const MAP2_VIDEO_START: u16 = 0xF800;
/// Model 4 map 2 keyboard window.
pub const MAP2_KEYBOARD_START: u16 = 0xF400;

pub const CASSETTE_SELECT: u16 = 0x37E4;
pub const PRINTER_ADDRESS: u16 = 0x37E8;
pub const FDC_STATUS: u16 = 0x37EC;
pub const FDC_TRACK: u16 = 0x37ED;
pub const FDC_SECTOR: u16 = 0x37EE;
pub const FDC_DATA: u16 = 0x37EF;
/// Interrupt latch on read, drive select on write.
pub const INTLATCH_START: u16 = 0x37E0;
pub const INTLATCH_END: u16 = 0x37E3;

/// Kind of CPU access being decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// Memory-mapped peripheral behind a zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Keyboard,
    Printer,
    Cassette,
    InterruptLatch,
    FloppySelect,
    Floppy(FdcRegister),
}

/// How a RAM zone turns an address into a physical offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RamMap {
    /// Model I: selector/SuperMem bank on one 32K half, no RAM below 16K.
    Model1,
    /// Model III: SuperMem bank on the upper 32K.
    Model3,
    /// Model 4: per-half bank offset.
    Banked,
}

/// How a video zone indexes video memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoMap {
    /// Relative to 0x3C00 plus the selected page.
    Paged,
    /// Relative to a fixed window base, ignoring the page.
    Fixed(u16),
}

/// What a zone routes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Ram(RamMap),
    /// Bounded by the loaded image size.
    Rom,
    Video(VideoMap),
    Device(Device),
    /// Consult the Model I MMIO table with `address & mask`.
    Mmio { mask: u16 },
}

/// A contiguous address range and its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Zone {
    pub start: u16,
    pub end: u16,
    pub target: Target,
}

const fn zone(start: u16, end: u16, target: Target) -> Zone {
    Zone { start, end, target }
}

impl Zone {
    fn contains(&self, address: u16) -> bool {
        self.start <= address && address <= self.end
    }
}

/// Result of decoding one address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded {
    Ram(usize),
    Rom(usize),
    Video(usize),
    Device(Device, u16),
    Unmapped,
}

/// Zone lists for one mode code.
#[derive(Debug, Clone)]
pub struct ModeTable {
    read: Vec<Zone>,
    write: Vec<Zone>,
    view_read: Vec<Zone>,
    view_write: Vec<Zone>,
}

impl ModeTable {
    /// Views see the same storage as bus cycles, minus the peripherals.
    fn new(read: Vec<Zone>, write: Vec<Zone>) -> Self {
        let view_read = without_devices(&read);
        let view_write = without_devices(&write);
        Self {
            read,
            write,
            view_read,
            view_write,
        }
    }

    fn with_views(mut self, view: Vec<Zone>) -> Self {
        self.view_read = view.clone();
        self.view_write = view;
        self
    }

    fn empty() -> Self {
        Self::new(Vec::new(), Vec::new())
    }

    pub fn zones(&self, access: Access, view: bool) -> &[Zone] {
        match (access, view) {
            (Access::Read, false) => &self.read,
            (Access::Write, false) => &self.write,
            (Access::Read, true) => &self.view_read,
            (Access::Write, true) => &self.view_write,
        }
    }
}

fn without_devices(zones: &[Zone]) -> Vec<Zone> {
    zones
        .iter()
        .filter(|z| !matches!(z.target, Target::Device(_)))
        .copied()
        .collect()
}

/// Decoding tables for every sub-mode of one model.
#[derive(Debug, Clone)]
pub struct DecodeTable {
    model: Model,
    modes: [ModeTable; 8],
    mmio: ModeTable,
}

impl DecodeTable {
    /// Build the tables for `model`. `selector` says whether the Model I
    /// memory selector card is installed (it opens 0x3900-0x3BFF to RAM).
    pub fn new(model: Model, selector: bool) -> Self {
        match model {
            Model::Model1 => Self {
                model,
                modes: std::array::from_fn(model1_mode),
                mmio: model1_mmio(selector),
            },
            Model::Model3 => Self {
                model,
                modes: std::array::from_fn(|_| model3_mode()),
                mmio: ModeTable::empty(),
            },
            Model::Model4 => Self {
                model,
                modes: std::array::from_fn(|sub| model4_mode(sub & 3)),
                mmio: ModeTable::empty(),
            },
            Model::Model4P => Self {
                model,
                modes: std::array::from_fn(model4p_mode),
                mmio: ModeTable::empty(),
            },
        }
    }

    pub fn model(&self) -> Model {
        self.model
    }

    pub fn mode_table(&self, mode: ModeCode) -> &ModeTable {
        &self.modes[mode.sub_mode()]
    }

    /// Decode `address` under `mode`.
    ///
    /// `view` selects the pointer-style tables, which never reach a
    /// peripheral. Total over all addresses: misses are `Decoded::Unmapped`.
    pub fn resolve(
        &self,
        mode: ModeCode,
        address: u16,
        access: Access,
        view: bool,
        bank: &BankSwitchUnit,
        rom_size: usize,
    ) -> Decoded {
        let zones = self.mode_table(mode).zones(access, view);
        let strict = view || access == Access::Write;
        match find(zones, address, rom_size) {
            Some(Target::Mmio { mask }) => {
                let address = address & mask;
                match find(self.mmio.zones(access, view), address, rom_size) {
                    Some(Target::Mmio { .. }) | None => Decoded::Unmapped,
                    Some(target) => route(target, address, bank, strict),
                }
            }
            Some(target) => route(target, address, bank, strict),
            None => Decoded::Unmapped,
        }
    }
}

fn find(zones: &[Zone], address: u16, rom_size: usize) -> Option<Target> {
    zones
        .iter()
        .find(|z| z.contains(address) && (z.target != Target::Rom || (address as usize) < rom_size))
        .map(|z| z.target)
}

fn route(target: Target, address: u16, bank: &BankSwitchUnit, strict: bool) -> Decoded {
    match target {
        Target::Ram(map) => match ram_offset(map, address, bank, strict) {
            Some(offset) => Decoded::Ram(offset),
            None => Decoded::Unmapped,
        },
        Target::Rom => Decoded::Rom(address as usize),
        Target::Video(VideoMap::Paged) => {
            Decoded::Video((address - VIDEO_START) as usize + bank.video_offset())
        }
        Target::Video(VideoMap::Fixed(base)) => Decoded::Video((address - base) as usize),
        Target::Device(device) => Decoded::Device(device, address),
        Target::Mmio { .. } => Decoded::Unmapped,
    }
}

/// Physical RAM offset for `address`, or `None` where the hardware has no
/// RAM.
///
/// `strict` marks writes and views: the selector's "low 16K in top 16K"
/// mode has nothing to write to unless external RAM is enabled.
fn ram_offset(map: RamMap, address: u16, bank: &BankSwitchUnit, strict: bool) -> Option<usize> {
    let address = address as usize;
    match map {
        RamMap::Model1 => {
            let selector = bank.selector_reg();
            let mut offset = address;
            if selector & 0x07 == 6 && address >= 0xC000 {
                if strict && selector & 0x08 == 0 {
                    return None;
                }
                offset &= 0x3FFF;
            }
            // Odd selector modes bank the low half
            let half = if selector & 0x01 == 1 { 0 } else { 0x8000 };
            if address & 0x8000 == half {
                offset += bank.bank_base();
            }
            (offset >= RAM_START as usize).then_some(offset)
        }
        RamMap::Model3 => {
            if address >= 0x8000 {
                Some(address + bank.bank_base())
            } else {
                Some(address)
            }
        }
        RamMap::Banked => Some(address + bank.bank_offset(address >> 15)),
    }
}

const M1_RAM: Target = Target::Ram(RamMap::Model1);
const M3_RAM: Target = Target::Ram(RamMap::Model3);
const M4_RAM: Target = Target::Ram(RamMap::Banked);
const PAGED_VIDEO: Target = Target::Video(VideoMap::Paged);
const MAP2_VIDEO: Target = Target::Video(VideoMap::Fixed(MAP2_VIDEO_START));
const KEYBOARD: Target = Target::Device(Device::Keyboard);
const PRINTER: Target = Target::Device(Device::Printer);

/// Model I 0x0000-0x3FFF: ROM, the 0x37E0 peripherals, keyboard and video.
fn model1_mmio(selector: bool) -> ModeTable {
    let mut read = vec![
        zone(VIDEO_START, 0x3FFF, PAGED_VIDEO),
        zone(0x0000, KEYBOARD_START - 1, Target::Rom),
        zone(FDC_DATA, FDC_DATA, Target::Device(Device::Floppy(FdcRegister::Data))),
        zone(INTLATCH_START, INTLATCH_END, Target::Device(Device::InterruptLatch)),
        zone(FDC_STATUS, FDC_STATUS, Target::Device(Device::Floppy(FdcRegister::Status))),
        zone(PRINTER_ADDRESS, PRINTER_ADDRESS, PRINTER),
        zone(FDC_TRACK, FDC_TRACK, Target::Device(Device::Floppy(FdcRegister::Track))),
        zone(FDC_SECTOR, FDC_SECTOR, Target::Device(Device::Floppy(FdcRegister::Sector))),
    ];
    // With a selector 768 bytes of RAM poke through the keyboard hole
    if selector {
        read.push(zone(0x3900, VIDEO_START - 1, M1_RAM));
    }
    read.push(zone(KEYBOARD_START, VIDEO_START - 1, KEYBOARD));

    let write = vec![
        zone(VIDEO_START, 0x3FFF, PAGED_VIDEO),
        zone(PRINTER_ADDRESS, PRINTER_ADDRESS, PRINTER),
        zone(CASSETTE_SELECT, CASSETTE_SELECT, Target::Device(Device::Cassette)),
        zone(FDC_DATA, FDC_DATA, Target::Device(Device::Floppy(FdcRegister::Data))),
        zone(FDC_STATUS, FDC_STATUS, Target::Device(Device::Floppy(FdcRegister::Status))),
        zone(FDC_TRACK, FDC_TRACK, Target::Device(Device::Floppy(FdcRegister::Track))),
        zone(FDC_SECTOR, FDC_SECTOR, Target::Device(Device::Floppy(FdcRegister::Sector))),
        zone(INTLATCH_START, INTLATCH_END, Target::Device(Device::FloppySelect)),
        zone(0x3900, VIDEO_START - 1, M1_RAM),
    ];
    ModeTable::new(read, write)
}

/// Model I stock map (0) and selector card modes 1-7.
fn model1_mode(sub: usize) -> ModeTable {
    let low_io = Target::Mmio { mask: 0x3FFF };
    let high_io = Target::Mmio { mask: 0x3FFF };
    let all_ram = vec![zone(0x0000, 0xFFFF, M1_RAM)];
    match sub {
        0 => {
            let zones = vec![zone(0x0000, RAM_START - 1, low_io), zone(RAM_START, 0xFFFF, M1_RAM)];
            ModeTable::new(zones.clone(), zones)
        }
        // All RAM except I/O high; views see RAM only
        1 => {
            let zones = vec![zone(0xF7E0, 0xF7FF, high_io), zone(0x0000, 0xFFFF, M1_RAM)];
            ModeTable::new(zones.clone(), zones).with_views(all_ram)
        }
        // ROM disabled
        2 => {
            let zones = vec![
                zone(0x0000, INTLATCH_START - 1, M1_RAM),
                zone(INTLATCH_START, RAM_START - 1, Target::Mmio { mask: 0xFFFF }),
                zone(RAM_START, 0xFFFF, M1_RAM),
            ];
            ModeTable::new(zones.clone(), zones)
        }
        // CP/M mode
        3 => {
            let zones = vec![zone(0xF7E0, 0xFFFF, high_io), zone(0x0000, 0xFFFF, M1_RAM)];
            ModeTable::new(zones.clone(), zones)
        }
        // All RAM, banking high / low
        4 | 5 => ModeTable::new(all_ram.clone(), all_ram),
        // Low 16K in top 16K, ROM kept visible
        6 => {
            let zones = vec![zone(0x0000, RAM_START - 1, low_io), zone(RAM_START, 0xFFFF, M1_RAM)];
            ModeTable::new(zones.clone(), zones)
        }
        // Documented as "not useful": nothing answers
        _ => ModeTable::empty(),
    }
}

fn model3_mode() -> ModeTable {
    let read = vec![
        zone(RAM_START, 0xFFFF, M3_RAM),
        zone(PRINTER_ADDRESS, PRINTER_ADDRESS, PRINTER),
        zone(0x0000, KEYBOARD_START - 1, Target::Rom),
        zone(VIDEO_START, RAM_START - 1, PAGED_VIDEO),
        zone(KEYBOARD_START, VIDEO_START - 1, KEYBOARD),
    ];
    let write = vec![
        zone(RAM_START, 0xFFFF, M3_RAM),
        zone(VIDEO_START, RAM_START - 1, PAGED_VIDEO),
        zone(PRINTER_ADDRESS, PRINTER_ADDRESS, PRINTER),
    ];
    ModeTable::new(read, write)
}

fn map0_read() -> Vec<Zone> {
    vec![
        zone(RAM_START, 0xFFFF, M4_RAM),
        zone(PRINTER_ADDRESS, PRINTER_ADDRESS, PRINTER),
        zone(0x0000, KEYBOARD_START - 1, Target::Rom),
        zone(VIDEO_START, RAM_START - 1, PAGED_VIDEO),
        zone(KEYBOARD_START, VIDEO_START - 1, KEYBOARD),
    ]
}

fn map0_write() -> Vec<Zone> {
    vec![
        zone(RAM_START, 0xFFFF, M4_RAM),
        zone(VIDEO_START, RAM_START - 1, PAGED_VIDEO),
        zone(PRINTER_ADDRESS, PRINTER_ADDRESS, PRINTER),
    ]
}

fn map1_read() -> Vec<Zone> {
    vec![
        zone(RAM_START, 0xFFFF, M4_RAM),
        zone(0x0000, KEYBOARD_START - 1, M4_RAM),
        zone(VIDEO_START, RAM_START - 1, PAGED_VIDEO),
        zone(KEYBOARD_START, VIDEO_START - 1, KEYBOARD),
    ]
}

fn map1_write() -> Vec<Zone> {
    vec![
        zone(RAM_START, 0xFFFF, M4_RAM),
        zone(0x0000, KEYBOARD_START - 1, M4_RAM),
        zone(VIDEO_START, RAM_START - 1, PAGED_VIDEO),
    ]
}

fn map2_read() -> Vec<Zone> {
    vec![
        zone(0x0000, MAP2_KEYBOARD_START - 1, M4_RAM),
        zone(MAP2_VIDEO_START, 0xFFFF, MAP2_VIDEO),
        zone(MAP2_KEYBOARD_START, MAP2_VIDEO_START - 1, KEYBOARD),
    ]
}

fn map2_write() -> Vec<Zone> {
    vec![
        zone(0x0000, MAP2_KEYBOARD_START - 1, M4_RAM),
        zone(MAP2_VIDEO_START, 0xFFFF, MAP2_VIDEO),
    ]
}

fn map3() -> Vec<Zone> {
    vec![zone(0x0000, 0xFFFF, M4_RAM)]
}

fn model4_mode(map: usize) -> ModeTable {
    match map {
        0 => ModeTable::new(map0_read(), map0_write()),
        1 => ModeTable::new(map1_read(), map1_write()),
        2 => ModeTable::new(map2_read(), map2_write()),
        _ => ModeTable::new(map3(), map3()),
    }
}

/// Model 4P: bit 2 of the sub-mode is the boot ROM.
///
/// Map 0 reads like map 1 on the 4P; with the boot ROM in, ROM overlays the
/// bottom of that map for reads only.
fn model4p_mode(sub: usize) -> ModeTable {
    let boot_rom = sub & 0x04 != 0;
    match sub & 0x03 {
        0 | 1 => {
            let mut read = Vec::new();
            if boot_rom {
                read.push(zone(0x0000, KEYBOARD_START - 1, Target::Rom));
            }
            read.extend(map1_read());
            let write = if sub & 0x03 == 0 { map0_write() } else { map1_write() };
            ModeTable::new(read, write)
        }
        2 => ModeTable::new(map2_read(), map2_write()),
        _ => ModeTable::new(map3(), map3()),
    }
}
