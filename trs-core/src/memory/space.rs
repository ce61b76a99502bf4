//! Raw storage behind the address decoder: RAM, ROM and video memory.

use crate::config::{Expansion, MachineConfig};

/// Largest ROM image the address map can show.
pub const ROM_MAX: usize = 0x3800;
/// Video memory size (Model 4 has two 1K pages; Model I/III use the first).
pub const VIDEO_MAX: usize = 0x0800;
/// Banked RAM limit of the port 0x94 board.
pub const RAM_MAX: usize = 0x20_0000;

/// Flat storage buffers. No routing policy lives here.
pub struct AddressSpace {
    ram: Vec<u8>,
    rom: Vec<u8>,
    video: Vec<u8>,
    rom_size: usize,
}

impl AddressSpace {
    /// Allocate storage sized for the configured model and expansion board.
    ///
    /// RAM carries one extra sentinel byte past the last bankable location.
    pub fn for_config(config: &MachineConfig) -> Self {
        let ram_size = match config.expansion {
            Expansion::Huffman => RAM_MAX,
            Expansion::SuperMem => 0x8_8000,
            Expansion::Selector => 0x4_0000,
            Expansion::None => 0x2_0000,
        };
        Self::with_ram_size(ram_size)
    }

    pub(crate) fn with_ram_size(ram_size: usize) -> Self {
        Self {
            ram: vec![0; ram_size + 1],
            rom: vec![0; ROM_MAX],
            video: vec![0; VIDEO_MAX],
            rom_size: 0,
        }
    }

    pub fn ram(&self) -> &[u8] {
        &self.ram
    }

    pub fn ram_mut(&mut self) -> &mut [u8] {
        &mut self.ram
    }

    pub fn rom(&self) -> &[u8] {
        &self.rom
    }

    pub fn video(&self) -> &[u8] {
        &self.video
    }

    pub fn video_mut(&mut self) -> &mut [u8] {
        &mut self.video
    }

    /// Size of the loaded ROM image. The ROM zone ends here, not at `ROM_MAX`.
    pub fn rom_size(&self) -> usize {
        self.rom_size
    }

    /// Store a byte into ROM. Only used while loading images.
    pub fn write_rom(&mut self, address: u16, value: u8) {
        let address = address as usize;
        if address < ROM_MAX {
            self.rom[address] = value;
            self.rom_size = self.rom_size.max(address + 1);
        }
    }

    /// Replace the ROM contents with `image`, truncated to `ROM_MAX`.
    pub fn load_rom(&mut self, image: &[u8]) {
        let len = image.len().min(ROM_MAX);
        self.rom.fill(0);
        self.rom[..len].copy_from_slice(&image[..len]);
        self.rom_size = len;
    }
}
