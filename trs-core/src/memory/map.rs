//! Memory map mode selection.

use std::fmt;

use super::bank::BankSwitchUnit;
use crate::config::Model;

/// Active address decoding rule set: model number in the high nibble, the
/// sub-mode (map register, boot ROM bit, or selector card mode) in the low
/// three bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModeCode(u8);

impl ModeCode {
    pub fn new(model: Model, sub_mode: u8) -> Self {
        Self((model.code() << 4) | (sub_mode & 0x07))
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn sub_mode(self) -> usize {
        (self.0 & 0x07) as usize
    }
}

impl fmt::Display for ModeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

/// Composes the mode code from the model and the map-affecting registers.
#[derive(Debug, Clone)]
pub struct MemoryMapSelector {
    model: Model,
    /// Map number from port 0x84 bits 0-1 (Model 4/4P).
    map: u8,
    /// Model 4P boot ROM switched in.
    boot_rom: bool,
    /// Model I selector card mode.
    selector: u8,
    mode: ModeCode,
}

impl MemoryMapSelector {
    pub fn new(model: Model) -> Self {
        Self {
            model,
            map: 0,
            boot_rom: false,
            selector: 0,
            mode: ModeCode::new(model, 0),
        }
    }

    pub fn model(&self) -> Model {
        self.model
    }

    pub fn set_model(&mut self, model: Model) {
        self.model = model;
        self.recompute();
    }

    /// Show or hide the boot ROM. Only the 4P has one; other models keep
    /// their mode.
    pub fn set_boot_rom_visible(&mut self, visible: bool) {
        self.boot_rom = visible;
        self.recompute();
    }

    pub fn boot_rom_visible(&self) -> bool {
        self.model == Model::Model4P && self.boot_rom
    }

    /// Select one of the four Model 4 address space maps.
    pub fn set_map(&mut self, which: u8) {
        self.map = which & 0x03;
        self.recompute();
    }

    /// Select a Model I selector card mode.
    pub fn set_selector_mode(&mut self, sub_mode: u8) {
        self.selector = sub_mode & 0x07;
        self.recompute();
    }

    /// Run a bank command through `bank` and refresh the mode.
    ///
    /// An unknown command is reported by the bank unit and changes nothing.
    pub fn on_bank_command(&mut self, bank: &mut BankSwitchUnit, command: u8) -> bool {
        let accepted = bank.apply_bank_command(command);
        self.recompute();
        accepted
    }

    pub fn current_mode(&self) -> ModeCode {
        self.mode
    }

    fn recompute(&mut self) {
        let sub_mode = match self.model {
            Model::Model1 => self.selector,
            Model::Model3 => 0,
            Model::Model4 => self.map,
            Model::Model4P => self.map | if self.boot_rom { 0x04 } else { 0 },
        };
        self.mode = ModeCode::new(self.model, sub_mode);
    }
}
