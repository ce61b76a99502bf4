//! Memory subsystem: storage, banking, map selection and address decoding.
//!
//! `MemorySystem` is what the CPU sees. Every access is decoded against the
//! current mode code and lands in RAM, ROM, video memory or a peripheral
//! callback. Nothing here fails: unmapped reads return `0xFF` and unmapped
//! writes are dropped.

pub mod bank;
pub mod decode;
pub mod map;
pub mod space;

use log::debug;

use crate::config::{Expansion, MachineConfig, Model};
use crate::error::{TrsError, TrsResult};
use crate::peripheral::{Peripherals, SENTINEL};

pub use bank::BankSwitchUnit;
pub use decode::{Access, DecodeTable, Decoded, Device};
pub use map::{MemoryMapSelector, ModeCode};
pub use space::{AddressSpace, RAM_MAX, ROM_MAX, VIDEO_MAX};

/// Storage buffer a view points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Ram,
    Rom,
    Video,
}

/// Bounded raw access to the byte behind an address.
///
/// `len` counts the bytes from `offset` to the end of the buffer. Callers
/// stepping through a view must stay inside the zone they started in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryView {
    Mapped {
        region: Region,
        offset: usize,
        len: usize,
    },
    Unmapped,
}

/// Step direction for block transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    fn step(self, address: u16) -> u16 {
        match self {
            Direction::Up => address.wrapping_add(1),
            Direction::Down => address.wrapping_sub(1),
        }
    }
}

/// The CPU-facing memory of one machine.
pub struct MemorySystem<P: Peripherals> {
    space: AddressSpace,
    bank: BankSwitchUnit,
    selector: MemoryMapSelector,
    table: DecodeTable,
    peripherals: P,
}

impl<P: Peripherals> MemorySystem<P> {
    pub fn new(config: &MachineConfig, peripherals: P) -> Self {
        Self::with_space(
            AddressSpace::for_config(config),
            config.model,
            config.expansion,
            peripherals,
        )
    }

    pub(crate) fn with_space(
        space: AddressSpace,
        model: Model,
        expansion: Expansion,
        peripherals: P,
    ) -> Self {
        let mut selector = MemoryMapSelector::new(model);
        if model == Model::Model4P {
            selector.set_boot_rom_visible(true);
        }
        Self {
            space,
            bank: BankSwitchUnit::new(model, expansion),
            selector,
            table: DecodeTable::new(model, expansion == Expansion::Selector),
            peripherals,
        }
    }

    pub fn model(&self) -> Model {
        self.table.model()
    }

    pub fn mode(&self) -> ModeCode {
        self.selector.current_mode()
    }

    pub fn space(&self) -> &AddressSpace {
        &self.space
    }

    pub fn space_mut(&mut self) -> &mut AddressSpace {
        &mut self.space
    }

    pub fn bank(&self) -> &BankSwitchUnit {
        &self.bank
    }

    pub fn selector(&self) -> &MemoryMapSelector {
        &self.selector
    }

    pub fn peripherals(&self) -> &P {
        &self.peripherals
    }

    pub fn peripherals_mut(&mut self) -> &mut P {
        &mut self.peripherals
    }

    fn decode(&self, address: u16, access: Access, view: bool) -> Decoded {
        self.table.resolve(
            self.mode(),
            address,
            access,
            view,
            &self.bank,
            self.space.rom_size(),
        )
    }

    /// CPU read cycle.
    pub fn read(&mut self, address: u16) -> u8 {
        match self.decode(address, Access::Read, false) {
            Decoded::Ram(offset) => self.space.ram().get(offset).copied().unwrap_or(SENTINEL),
            Decoded::Rom(offset) => self.space.rom()[offset],
            Decoded::Video(offset) => self.space.video().get(offset).copied().unwrap_or(SENTINEL),
            Decoded::Device(device, address) => match device {
                Device::Keyboard => self.peripherals.keyboard_read(address),
                Device::Printer => self.peripherals.printer_status(),
                Device::InterruptLatch => self.peripherals.interrupt_latch(),
                Device::Floppy(register) => self.peripherals.floppy_read(register),
                Device::Cassette | Device::FloppySelect => SENTINEL,
            },
            Decoded::Unmapped => SENTINEL,
        }
    }

    /// CPU write cycle.
    ///
    /// A video write that stores the byte already there does nothing at all.
    pub fn write(&mut self, address: u16, value: u8) {
        match self.decode(address, Access::Write, false) {
            Decoded::Ram(offset) => {
                if let Some(cell) = self.space.ram_mut().get_mut(offset) {
                    *cell = value;
                }
            }
            Decoded::Video(offset) => {
                if let Some(cell) = self.space.video_mut().get_mut(offset) {
                    if *cell != value {
                        *cell = value;
                        self.peripherals.screen_write(offset, value);
                    }
                }
            }
            Decoded::Device(device, _) => match device {
                Device::Printer => self.peripherals.printer_write(value),
                Device::Cassette => self.peripherals.cassette_select(value),
                Device::FloppySelect => self.peripherals.floppy_select(value),
                Device::Floppy(register) => self.peripherals.floppy_write(register, value),
                Device::Keyboard | Device::InterruptLatch => {}
            },
            // ROM is only written through `write_rom`
            Decoded::Rom(_) | Decoded::Unmapped => {}
        }
    }

    /// Little-endian word read: low byte from `address`.
    pub fn read_word(&mut self, address: u16) -> u16 {
        let low = self.read(address) as u16;
        let high = self.read(address.wrapping_add(1)) as u16;
        low | (high << 8)
    }

    /// Little-endian word write: low byte to `address`.
    pub fn write_word(&mut self, address: u16, value: u16) {
        self.write(address, value as u8);
        self.write(address.wrapping_add(1), (value >> 8) as u8);
    }

    /// Side-effect free read through the view tables.
    pub fn peek(&self, address: u16) -> u8 {
        match self.view(address, Access::Read) {
            MemoryView::Mapped { region, offset, .. } => self.region(region)[offset],
            MemoryView::Unmapped => SENTINEL,
        }
    }

    /// Resolve `address` to a bounded view. Write views never land in ROM
    /// and no view reaches a peripheral.
    pub fn view(&self, address: u16, access: Access) -> MemoryView {
        let (region, offset) = match self.decode(address, access, true) {
            Decoded::Ram(offset) => (Region::Ram, offset),
            Decoded::Rom(offset) => (Region::Rom, offset),
            Decoded::Video(offset) => (Region::Video, offset),
            Decoded::Device(..) | Decoded::Unmapped => return MemoryView::Unmapped,
        };
        let size = match region {
            Region::Rom => self.space.rom_size(),
            _ => self.region(region).len(),
        };
        if offset < size {
            MemoryView::Mapped {
                region,
                offset,
                len: size - offset,
            }
        } else {
            MemoryView::Unmapped
        }
    }

    /// Bytes behind a read view, up to `max` of them.
    pub fn view_bytes(&self, view: MemoryView, max: usize) -> &[u8] {
        match view {
            MemoryView::Mapped {
                region,
                offset,
                len,
            } => &self.region(region)[offset..offset + len.min(max)],
            MemoryView::Unmapped => &[],
        }
    }

    /// Writable bytes behind a view. ROM is never writable this way.
    pub fn view_bytes_mut(&mut self, view: MemoryView, max: usize) -> Option<&mut [u8]> {
        match view {
            MemoryView::Mapped {
                region: Region::Ram,
                offset,
                len,
            } => Some(&mut self.space.ram_mut()[offset..offset + len.min(max)]),
            MemoryView::Mapped {
                region: Region::Video,
                offset,
                len,
            } => Some(&mut self.space.video_mut()[offset..offset + len.min(max)]),
            _ => None,
        }
    }

    fn region(&self, region: Region) -> &[u8] {
        match region {
            Region::Ram => self.space.ram(),
            Region::Rom => self.space.rom(),
            Region::Video => self.space.video(),
        }
    }

    /// Block move (LDIR/LDDR). Moves one byte at a time through the normal
    /// read and write cycles; a `count` of 0 moves 65536 bytes. Returns the
    /// last byte moved.
    pub fn block_transfer(
        &mut self,
        dest: u16,
        source: u16,
        direction: Direction,
        count: u16,
    ) -> u8 {
        let total = if count == 0 { 0x1_0000 } else { count as u32 };
        let (mut dest, mut source) = (dest, source);
        let mut last = SENTINEL;
        for _ in 0..total {
            last = self.read(source);
            self.write(dest, last);
            dest = direction.step(dest);
            source = direction.step(source);
        }
        last
    }

    /// Store a byte into ROM. Load-time path only.
    pub fn write_rom(&mut self, address: u16, value: u8) {
        self.space.write_rom(address, value);
    }

    pub fn load_rom(&mut self, image: &[u8]) -> TrsResult<()> {
        if image.len() > ROM_MAX {
            return Err(TrsError::RomTooLarge {
                size: image.len(),
                max: ROM_MAX,
            });
        }
        self.space.load_rom(image);
        debug!("loaded {} byte ROM", image.len());
        Ok(())
    }

    /// Run a bank command. Returns false if the command was rejected.
    pub fn bank_command(&mut self, command: u8) -> bool {
        self.selector.on_bank_command(&mut self.bank, command)
    }

    pub fn set_map(&mut self, which: u8) {
        self.selector.set_map(which);
        debug!("memory map now {}", self.mode());
    }

    pub fn set_video_page(&mut self, which: bool) {
        self.bank.set_video_page(which);
    }

    pub fn set_boot_rom_visible(&mut self, visible: bool) {
        self.selector.set_boot_rom_visible(visible);
    }

    /// Model 4 port 0x84: bit 7 video page, bits 4-6 bank command, bits 0-1
    /// map.
    pub fn write_map_register(&mut self, value: u8) {
        self.set_video_page(value & 0x80 != 0);
        self.bank_command((value & 0x70) >> 4);
        self.set_map(value & 0x03);
    }

    /// Port 0x94 write.
    pub fn write_expansion_port(&mut self, value: u8) {
        self.bank.apply_expansion_port(value);
    }

    /// Port 0x94 read.
    pub fn read_expansion_port(&self) -> u8 {
        self.bank.read_expansion_port()
    }

    /// Model I selector card register. Ignored if no card is installed.
    pub fn write_selector_port(&mut self, value: u8) {
        if self.bank.selector_enabled() {
            let sub_mode = self.bank.apply_selector_port(value);
            self.selector.set_selector_mode(sub_mode);
            debug!("selector {:#04x}, memory map now {}", value, self.mode());
        }
    }

    /// Reset button: the map, bank and boot ROM state of a fresh machine.
    pub fn reset(&mut self) {
        match self.model() {
            Model::Model1 => {
                self.bank.reset();
                self.selector.set_selector_mode(0);
            }
            Model::Model3 => {}
            Model::Model4 | Model::Model4P => {
                if self.model() == Model::Model4P {
                    self.set_boot_rom_visible(true);
                }
                self.write_map_register(0);
                if self.bank.huffman_ram() {
                    self.write_expansion_port(0);
                }
            }
        }
    }
}
