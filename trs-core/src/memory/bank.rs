//! Bank switching state: Model 4 bank commands, the port 0x94 expansion
//! boards and the Model I memory selector card.

use log::warn;

use crate::config::{Expansion, Model};

/// One 32K bank.
pub const BANK_SIZE: usize = 0x8000;

/// Video page bases within video memory.
const VIDEO_PAGE_0: usize = 0;
const VIDEO_PAGE_1: usize = 1024;

/// Value read back from port 0x94 when no board answers.
const NOT_PRESENT: u8 = 0xFF;

/// Mutable banking registers.
#[derive(Debug, Clone)]
pub struct BankSwitchUnit {
    model: Model,
    expansion: Expansion,
    /// Added to addresses in the lower and upper 32K respectively.
    bank_offset: [usize; 2],
    /// Physical base of the alternate bank.
    bank_base: usize,
    /// Offset of the displayed page within video memory.
    video_offset: usize,
    /// Last accepted bank command, reapplied when the base moves.
    command: u8,
    selector_reg: u8,
}

impl BankSwitchUnit {
    pub fn new(model: Model, expansion: Expansion) -> Self {
        Self {
            model,
            expansion,
            bank_offset: [0, 0],
            bank_base: if model == Model::Model1 { 0 } else { 0x1_0000 },
            video_offset: VIDEO_PAGE_0,
            command: 0,
            selector_reg: 0,
        }
    }

    pub fn bank_offset(&self, half: usize) -> usize {
        self.bank_offset[half & 1]
    }

    pub fn bank_offsets(&self) -> (usize, usize) {
        (self.bank_offset[0], self.bank_offset[1])
    }

    pub fn bank_base(&self) -> usize {
        self.bank_base
    }

    pub fn video_offset(&self) -> usize {
        self.video_offset
    }

    pub fn selector_reg(&self) -> u8 {
        self.selector_reg
    }

    pub fn huffman_ram(&self) -> bool {
        self.expansion == Expansion::Huffman
    }

    /// SuperMem only decodes on the Model I and III.
    pub fn supermem(&self) -> bool {
        self.expansion == Expansion::SuperMem && matches!(self.model, Model::Model1 | Model::Model3)
    }

    pub fn selector_enabled(&self) -> bool {
        self.expansion == Expansion::Selector
    }

    /// Apply a bank command (bits 4-6 of port 0x84).
    ///
    /// Command 3 adds `bank_base` alone to the upper 32K, with no extra
    /// 32K step, so the alternate bank starts at the base itself.
    ///
    /// Returns false for a command the board does not decode; the offsets
    /// are left as they were.
    pub fn apply_bank_command(&mut self, command: u8) -> bool {
        let offsets = match command {
            0 => [0, 0],
            2 => [0, BANK_SIZE],
            3 => [0, self.bank_base],
            6 => [self.bank_base, 0],
            7 => [BANK_SIZE + self.bank_base, 0],
            _ => {
                warn!("unknown memory bank command {}", command);
                return false;
            }
        };
        self.bank_offset = offsets;
        self.command = command;
        true
    }

    /// Write to the expansion board port (0x94).
    pub fn apply_expansion_port(&mut self, bits: u8) {
        if self.huffman_ram() {
            // Bits 4-0 are A20-A16 of the alternate bank.
            self.bank_base = ((bits & 0x1F) as usize) << 16;
            let command = self.command;
            self.apply_bank_command(command);
        } else if self.supermem() {
            self.bank_base = ((bits & 0x0F) as usize) << 15;
        }
    }

    /// Read back the expansion board port.
    pub fn read_expansion_port(&self) -> u8 {
        if self.huffman_ram() {
            ((self.bank_base >> 16) & 0x1F) as u8
        } else if self.supermem() {
            (self.bank_base >> 15) as u8
        } else {
            NOT_PRESENT
        }
    }

    /// Write the selector card register. Returns the selector sub-mode.
    ///
    /// Bit 3 enables external RAM, bits 4-5 pick the 64K block and bit 0
    /// moves the bank from the upper to the lower 32K.
    pub fn apply_selector_port(&mut self, value: u8) -> u8 {
        self.selector_reg = value;
        self.bank_base = if value & 0x08 != 0 {
            let mut base = BANK_SIZE + (((value & 0x30) as usize) << 11);
            if value & 0x01 != 0 {
                base += BANK_SIZE;
            }
            base
        } else {
            0
        };
        value & 0x07
    }

    /// Select which 1K page the video zone shows.
    pub fn set_video_page(&mut self, which: bool) {
        self.video_offset = if which { VIDEO_PAGE_1 } else { VIDEO_PAGE_0 };
    }

    /// Reset-button state for the Model I: no bank and a cleared selector.
    pub fn reset(&mut self) {
        if self.model == Model::Model1 {
            self.bank_base = 0;
            self.selector_reg = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bank_command_table() {
        let mut bank = BankSwitchUnit::new(Model::Model4, Expansion::None);
        let base = bank.bank_base();

        assert!(bank.apply_bank_command(0));
        assert_eq!(bank.bank_offsets(), (0, 0));
        assert!(bank.apply_bank_command(2));
        assert_eq!(bank.bank_offsets(), (0, 0x8000));
        assert!(bank.apply_bank_command(3));
        assert_eq!(bank.bank_offsets(), (0, base));
        assert!(bank.apply_bank_command(6));
        assert_eq!(bank.bank_offsets(), (base, 0));
        assert!(bank.apply_bank_command(7));
        assert_eq!(bank.bank_offsets(), (0x8000 + base, 0));
    }

    #[test]
    fn test_unknown_bank_command_keeps_offsets() {
        let mut bank = BankSwitchUnit::new(Model::Model4, Expansion::None);
        bank.apply_bank_command(2);
        for command in [1, 4, 5, 8, 0xFF] {
            assert!(!bank.apply_bank_command(command));
            assert_eq!(bank.bank_offsets(), (0, 0x8000));
        }
    }

    #[test]
    fn test_huffman_port_reapplies_command() {
        let mut bank = BankSwitchUnit::new(Model::Model4, Expansion::Huffman);
        bank.apply_bank_command(3);
        bank.apply_expansion_port(0x05);
        assert_eq!(bank.bank_base(), 0x5_0000);
        assert_eq!(bank.bank_offsets(), (0, 0x5_0000));
        assert_eq!(bank.read_expansion_port(), 0x05);

        // Only A20-A16 are decoded
        bank.apply_expansion_port(0xFF);
        assert_eq!(bank.bank_base(), 0x1F_0000);
        assert_eq!(bank.read_expansion_port(), 0x1F);
    }

    #[test]
    fn test_supermem_port() {
        let mut bank = BankSwitchUnit::new(Model::Model1, Expansion::SuperMem);
        bank.apply_expansion_port(0x13);
        assert_eq!(bank.bank_base(), 3 << 15);
        assert_eq!(bank.read_expansion_port(), 3);
    }

    #[test]
    fn test_supermem_ignored_on_model4() {
        let mut bank = BankSwitchUnit::new(Model::Model4, Expansion::SuperMem);
        bank.apply_expansion_port(0x03);
        assert_eq!(bank.bank_base(), 0x1_0000);
        assert_eq!(bank.read_expansion_port(), NOT_PRESENT);
    }

    #[test]
    fn test_no_expansion_reads_sentinel() {
        let bank = BankSwitchUnit::new(Model::Model3, Expansion::None);
        assert_eq!(bank.read_expansion_port(), 0xFF);
    }

    #[test]
    fn test_selector_port() {
        let mut bank = BankSwitchUnit::new(Model::Model1, Expansion::Selector);
        assert_eq!(bank.apply_selector_port(0x0C), 4);
        assert_eq!(bank.bank_base(), 0x8000);
        assert_eq!(bank.apply_selector_port(0x3D), 5);
        assert_eq!(bank.bank_base(), 0x8000 + 0x1_8000 + 0x8000);
        // External RAM off
        assert_eq!(bank.apply_selector_port(0x05), 5);
        assert_eq!(bank.bank_base(), 0);
    }

    #[test]
    fn test_video_page() {
        let mut bank = BankSwitchUnit::new(Model::Model4, Expansion::None);
        bank.set_video_page(true);
        assert_eq!(bank.video_offset(), 1024);
        bank.set_video_page(false);
        assert_eq!(bank.video_offset(), 0);
    }

    #[test]
    fn test_reset_clears_model1_bank() {
        let mut bank = BankSwitchUnit::new(Model::Model1, Expansion::Selector);
        bank.apply_selector_port(0x0E);
        bank.reset();
        assert_eq!(bank.bank_base(), 0);
        assert_eq!(bank.selector_reg(), 0);
    }
}
