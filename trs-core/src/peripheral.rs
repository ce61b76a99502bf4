//! Memory-mapped peripherals outside the emulation core.
//!
//! The `Peripherals` trait is the boundary to the keyboard matrix, printer,
//! cassette relay, interrupt latch, floppy controller and display. Every
//! callback runs to completion inside the CPU cycle that triggered it.

use std::collections::HashMap;

/// Open-bus value.
pub const SENTINEL: u8 = 0xFF;

/// Floppy controller register behind a Model I memory-mapped address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FdcRegister {
    /// Status on read, command on write.
    Status,
    Track,
    Sector,
    Data,
}

/// Callbacks for the memory-mapped devices.
///
/// Defaults behave like an empty machine: nothing pressed, no printer, no
/// floppy controller.
pub trait Peripherals {
    /// Keyboard matrix read. `address` selects rows on its low byte.
    fn keyboard_read(&mut self, _address: u16) -> u8 {
        0
    }

    /// Printer status byte.
    fn printer_status(&mut self) -> u8 {
        SENTINEL
    }

    fn printer_write(&mut self, _value: u8) {}

    /// Cassette motor and drive select (Model I 0x37E4).
    fn cassette_select(&mut self, _value: u8) {}

    /// Model I interrupt latch read (0x37E0-0x37E3).
    fn interrupt_latch(&mut self) -> u8 {
        SENTINEL
    }

    fn floppy_read(&mut self, _register: FdcRegister) -> u8 {
        SENTINEL
    }

    fn floppy_write(&mut self, _register: FdcRegister, _value: u8) {}

    /// Floppy drive select (Model I writes to 0x37E0-0x37E3).
    fn floppy_select(&mut self, _value: u8) {}

    /// A byte of video memory changed. `offset` indexes video memory, so it
    /// already includes the page.
    fn screen_write(&mut self, _offset: usize, _value: u8) {}
}

/// Headless peripherals for testing: records output, answers keyboard rows
/// from a table.
#[derive(Debug, Default)]
pub struct HeadlessPeripherals {
    keys: HashMap<u16, u8>,
    printer: Vec<u8>,
    screen_writes: Vec<(usize, u8)>,
    floppy: HashMap<FdcRegister, u8>,
}

impl HeadlessPeripherals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make keyboard reads at `address` return `bits`.
    pub fn press(&mut self, address: u16, bits: u8) {
        self.keys.insert(address, bits);
    }

    pub fn release_all(&mut self) {
        self.keys.clear();
    }

    /// Bytes sent to the printer.
    pub fn printer_output(&self) -> &[u8] {
        &self.printer
    }

    /// Display updates in arrival order.
    pub fn screen_writes(&self) -> &[(usize, u8)] {
        &self.screen_writes
    }

    pub fn clear_screen_writes(&mut self) {
        self.screen_writes.clear();
    }

    /// Last value written to a floppy register.
    pub fn floppy_register(&self, register: FdcRegister) -> Option<u8> {
        self.floppy.get(&register).copied()
    }
}

impl Peripherals for HeadlessPeripherals {
    fn keyboard_read(&mut self, address: u16) -> u8 {
        self.keys.get(&address).copied().unwrap_or(0)
    }

    fn printer_status(&mut self) -> u8 {
        // Ready, selected, paper present
        0x30
    }

    fn printer_write(&mut self, value: u8) {
        self.printer.push(value);
    }

    fn floppy_write(&mut self, register: FdcRegister, value: u8) {
        self.floppy.insert(register, value);
    }

    fn screen_write(&mut self, offset: usize, value: u8) {
        self.screen_writes.push((offset, value));
    }
}
