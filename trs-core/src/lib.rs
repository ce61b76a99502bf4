//! TRS-80 Model I/III/4/4P emulation core
//!
//! This crate provides:
//! - The address space: per-model decoding of every CPU memory cycle to RAM,
//!   ROM, video memory or a memory-mapped peripheral, with bank switching
//!   for the Model 4 and the Huffman, SuperMem and selector expansion boards
//! - A WD1000-style hard disk controller backed by Reed-format image files
//! - A machine that drives both from a Z80 core
//!
//! # Architecture
//!
//! - `MemorySystem`: storage, bank registers, mode selection and decode tables
//! - `Peripherals` trait: keyboard, printer, cassette, floppy and display
//! - `HardDiskController`: register file and command state machine
//! - `DiskStore` trait: where disk images come from (directory or memory)
//! - `Trs80`: integrates the Z80 CPU with the above

pub mod config;
pub mod error;
pub mod hard;
pub mod machine;
pub mod memory;
pub mod peripheral;

pub use config::{Expansion, MachineConfig, Model};
pub use error::{TrsError, TrsResult};
pub use hard::{
    create_image, DirDiskStore, DiskStore, Geometry, HardDiskController, HardDiskHeader,
    MemoryDiskStore,
};
pub use machine::{ExitInfo, ExitReason, Trs80};
pub use memory::{Access, Direction, MemorySystem, MemoryView, ModeCode, Region};
pub use peripheral::{FdcRegister, HeadlessPeripherals, Peripherals};
