//! TRS-80 machine - integrates the Z80 CPU with the memory map and the hard
//! disk controller.

use std::cell::RefCell;
use std::num::NonZeroU16;

use log::{debug, info};
use z80emu::host::TsCounter;
use z80emu::{Clock, Cpu, Io, Memory, Z80NMOS};

use crate::config::{Expansion, MachineConfig, Model};
use crate::error::TrsResult;
use crate::hard::{DiskStore, HardDiskController, PORT_FIRST, PORT_LAST};
use crate::memory::MemorySystem;
use crate::peripheral::{Peripherals, SENTINEL};

/// Type alias for the clock.
type TsClock = TsCounter<i32>;

/// Model 4 memory map, video page and bank register.
const PORT_MAP_FIRST: u8 = 0x84;
const PORT_MAP_LAST: u8 = 0x87;
/// Expansion board bank base.
const PORT_EXPANSION: u8 = 0x94;
/// Model 4P boot ROM switch.
const PORT_ROMIN_FIRST: u8 = 0x9C;
const PORT_ROMIN_LAST: u8 = 0x9F;
/// Model I memory selector card.
const PORT_SELECTOR: u8 = 0x1F;

/// Text screen geometry at the 64-column setting.
const SCREEN_COLUMNS: usize = 64;
const SCREEN_ROWS: usize = 16;

/// Why `run` returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// The T-state budget is spent.
    Budget,
    /// CPU halted
    Halt,
}

/// Information about a run.
#[derive(Debug, Clone)]
pub struct ExitInfo {
    pub reason: ExitReason,
    pub t_states: u64,
    pub pc: u16,
}

/// CPU bus: memory cycles through the decoder, ports through the port map.
///
/// z80emu reads memory through `&self`, but a read can reach a peripheral,
/// hence the `RefCell`.
struct Bus<'a, P: Peripherals> {
    memory: RefCell<&'a mut MemorySystem<P>>,
    hard: &'a mut HardDiskController,
}

impl<P: Peripherals> Memory for Bus<'_, P> {
    type Timestamp = i32;

    fn read_debug(&self, addr: u16) -> u8 {
        self.memory.borrow().peek(addr)
    }

    fn read_mem(&self, addr: u16, _ts: Self::Timestamp) -> u8 {
        self.memory.borrow_mut().read(addr)
    }

    fn write_mem(&mut self, addr: u16, value: u8, _ts: Self::Timestamp) {
        self.memory.get_mut().write(addr, value);
    }
}

impl<P: Peripherals> Io for Bus<'_, P> {
    type Timestamp = i32;
    type WrIoBreak = ();
    type RetiBreak = ();

    fn read_io(&mut self, port: u16, _ts: Self::Timestamp) -> (u8, Option<NonZeroU16>) {
        let port = port as u8;
        let memory = self.memory.get_mut();
        let value = match port {
            PORT_FIRST..=PORT_LAST => self.hard.port_in(port),
            PORT_EXPANSION => memory.read_expansion_port(),
            _ => SENTINEL,
        };
        (value, None)
    }

    fn write_io(
        &mut self,
        port: u16,
        value: u8,
        _ts: Self::Timestamp,
    ) -> (Option<Self::WrIoBreak>, Option<NonZeroU16>) {
        let port = port as u8;
        let memory = self.memory.get_mut();
        let model = memory.model();
        match port {
            PORT_FIRST..=PORT_LAST => self.hard.port_out(port, value),
            PORT_MAP_FIRST..=PORT_MAP_LAST if model.has_map_register() => {
                memory.write_map_register(value)
            }
            PORT_EXPANSION => memory.write_expansion_port(value),
            PORT_ROMIN_FIRST..=PORT_ROMIN_LAST if model == Model::Model4P => {
                memory.set_boot_rom_visible(value & 0x01 != 0)
            }
            PORT_SELECTOR if model == Model::Model1 => memory.write_selector_port(value),
            _ => {}
        }
        (None, None)
    }
}

/// A TRS-80.
pub struct Trs80<P: Peripherals> {
    /// Z80 CPU.
    cpu: Z80NMOS,
    /// Clock/T-state counter.
    clock: TsClock,
    memory: MemorySystem<P>,
    hard: HardDiskController,
}

impl<P: Peripherals> Trs80<P> {
    /// Build a machine from `config`, with hard disk images from its disk
    /// directory. Loads the configured ROM, if any.
    pub fn new(config: &MachineConfig, peripherals: P) -> TrsResult<Self> {
        let hard = HardDiskController::with_dir(config.model, config.disk_dir.clone());
        Self::build(config, peripherals, hard)
    }

    /// Build a machine whose hard disk images come from `store`.
    pub fn with_store(
        config: &MachineConfig,
        peripherals: P,
        store: Box<dyn DiskStore>,
    ) -> TrsResult<Self> {
        let hard = HardDiskController::new(config.model, store);
        Self::build(config, peripherals, hard)
    }

    fn build(config: &MachineConfig, peripherals: P, hard: HardDiskController) -> TrsResult<Self> {
        config.validate()?;
        let mut machine = Self {
            cpu: Z80NMOS::default(),
            clock: TsClock::default(),
            memory: MemorySystem::new(config, peripherals),
            hard,
        };
        if let Some(path) = &config.rom {
            let image = std::fs::read(path)?;
            machine.load_rom(&image)?;
            info!("loaded ROM {}", path.display());
        }
        if config.expansion != Expansion::None {
            debug!("{:?} expansion installed", config.expansion);
        }
        machine.reset(true);
        Ok(machine)
    }

    pub fn model(&self) -> Model {
        self.memory.model()
    }

    pub fn memory(&self) -> &MemorySystem<P> {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut MemorySystem<P> {
        &mut self.memory
    }

    pub fn hard_disk(&self) -> &HardDiskController {
        &self.hard
    }

    pub fn hard_disk_mut(&mut self) -> &mut HardDiskController {
        &mut self.hard
    }

    pub fn pc(&self) -> u16 {
        self.cpu.get_pc()
    }

    pub fn set_pc(&mut self, pc: u16) {
        self.cpu.set_pc(pc);
    }

    /// Replace the ROM image. The ROM zone ends where `image` does.
    pub fn load_rom(&mut self, image: &[u8]) -> TrsResult<()> {
        self.memory.load_rom(image)
    }

    /// Reset button (`power_on` false) or power cycle.
    ///
    /// Devices go back to their reset state either way. RAM survives.
    pub fn reset(&mut self, power_on: bool) {
        self.hard.reset();
        self.memory.reset();
        self.cpu.reset();
        debug!(
            "{} reset, memory map {}",
            if power_on { "power-on" } else { "button" },
            self.memory.mode()
        );
    }

    /// Execute until `t_states` have elapsed or the CPU halts.
    pub fn run(&mut self, t_states: u64) -> ExitInfo {
        let mut elapsed: u64 = 0;
        loop {
            let before = self.clock.as_timestamp();
            let mut bus = Bus {
                memory: RefCell::new(&mut self.memory),
                hard: &mut self.hard,
            };
            let _result =
                self.cpu
                    .execute_next(&mut bus, &mut self.clock, None::<fn(z80emu::CpuDebug)>);
            elapsed += self.clock.as_timestamp().wrapping_sub(before) as u32 as u64;

            // Check for HALT instruction
            if self.cpu.is_halt() {
                return ExitInfo {
                    reason: ExitReason::Halt,
                    t_states: elapsed,
                    pc: self.cpu.get_pc(),
                };
            }
            if elapsed >= t_states {
                return ExitInfo {
                    reason: ExitReason::Budget,
                    t_states: elapsed,
                    pc: self.cpu.get_pc(),
                };
            }
        }
    }

    /// The visible 64x16 text screen. Control and graphics characters show
    /// as spaces.
    pub fn screen_text(&self) -> String {
        let video = self.memory.space().video();
        let base = self.memory.bank().video_offset();
        let mut text = String::with_capacity((SCREEN_COLUMNS + 1) * SCREEN_ROWS);
        for row in 0..SCREEN_ROWS {
            let start = base + row * SCREEN_COLUMNS;
            let line: String = video[start..start + SCREEN_COLUMNS]
                .iter()
                .map(|&b| match b {
                    0x20..=0x7E => b as char,
                    _ => ' ',
                })
                .collect();
            text.push_str(line.trim_end());
            text.push('\n');
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrsError;
    use crate::hard::{HardDiskHeader, MemoryDiskStore, STATUS_READY};
    use crate::memory::ROM_MAX;
    use crate::peripheral::HeadlessPeripherals;

    fn machine(model: Model, rom: &[u8]) -> Trs80<HeadlessPeripherals> {
        let config = MachineConfig::new(model);
        let mut machine =
            Trs80::with_store(&config, HeadlessPeripherals::new(), Box::new(MemoryDiskStore::new()))
                .unwrap();
        machine.load_rom(rom).unwrap();
        machine
    }

    #[test]
    fn test_video_write_from_rom() {
        // LD A,'A'; LD (3C00h),A; HALT
        let mut m = machine(Model::Model4, &[0x3E, 0x41, 0x32, 0x00, 0x3C, 0x76]);
        let exit = m.run(10_000);
        assert_eq!(exit.reason, ExitReason::Halt);
        assert_eq!(m.memory().space().video()[0], 0x41);
        assert_eq!(m.memory().peripherals().screen_writes(), &[(0, 0x41)]);
        assert!(m.screen_text().starts_with("A\n"));
    }

    #[test]
    fn test_budget() {
        // JR $
        let mut m = machine(Model::Model3, &[0x18, 0xFE]);
        let exit = m.run(1_000);
        assert_eq!(exit.reason, ExitReason::Budget);
        assert!(exit.t_states >= 1_000);
        assert_eq!(exit.pc, 0x0000);
    }

    #[test]
    fn test_map_register_port() {
        // LD A,83h; OUT (84h),A; HALT (at 0004h, fetched from RAM in map 3)
        let mut m = machine(Model::Model4, &[0x3E, 0x83, 0xD3, 0x84]);
        m.memory_mut().space_mut().ram_mut()[4] = 0x76;
        let exit = m.run(10_000);
        assert_eq!(exit.reason, ExitReason::Halt);
        assert_eq!(m.memory().mode().value(), 0x43);
        assert_eq!(m.memory().bank().video_offset(), 1024);
    }

    #[test]
    fn test_map_register_ignored_on_model3() {
        // LD A,83h; OUT (84h),A; HALT
        let mut m = machine(Model::Model3, &[0x3E, 0x83, 0xD3, 0x84, 0x76]);
        assert_eq!(m.run(10_000).reason, ExitReason::Halt);
        assert_eq!(m.memory().mode().value(), 0x30);
    }

    #[test]
    fn test_boot_rom_port() {
        // XOR A; OUT (9Ch),A; then RAM
        let mut m = machine(Model::Model4P, &[0xAF, 0xD3, 0x9C]);
        assert_eq!(m.memory().mode().value(), 0x54);
        m.memory_mut().space_mut().ram_mut()[3] = 0x76;
        assert_eq!(m.run(10_000).reason, ExitReason::Halt);
        assert_eq!(m.memory().mode().value(), 0x50);
    }

    #[test]
    fn test_hard_disk_ports() {
        let mut store = MemoryDiskStore::new();
        store.insert("hard4-0", HardDiskHeader::new(10, 32).unwrap().to_bytes().to_vec());
        let config = MachineConfig::new(Model::Model4);
        let mut m = Trs80::with_store(&config, HeadlessPeripherals::new(), Box::new(store)).unwrap();
        // LD A,70h; OUT (CFh),A; IN A,(CFh); LD (4000h),A; HALT
        m.load_rom(&[0x3E, 0x70, 0xD3, 0xCF, 0xDB, 0xCF, 0x32, 0x00, 0x40, 0x76])
            .unwrap();
        assert_eq!(m.run(10_000).reason, ExitReason::Halt);
        assert_eq!(m.memory_mut().read(0x4000), STATUS_READY);
        assert!(m.hard_disk().drives().drive(0).is_open());
    }

    #[test]
    fn test_unmapped_port_reads_sentinel() {
        // IN A,(50h); LD (4000h),A; HALT
        let mut m = machine(Model::Model3, &[0xDB, 0x50, 0x32, 0x00, 0x40, 0x76]);
        m.run(10_000);
        assert_eq!(m.memory_mut().read(0x4000), 0xFF);
    }

    #[test]
    fn test_reset_restores_boot_rom() {
        let mut m = machine(Model::Model4P, &[0x76]);
        m.memory_mut().set_boot_rom_visible(false);
        m.memory_mut().write_map_register(0x02);
        m.reset(false);
        assert_eq!(m.memory().mode().value(), 0x54);
        assert_eq!(m.pc(), 0);
    }

    #[test]
    fn test_rom_too_large() {
        let config = MachineConfig::new(Model::Model1);
        let mut m = Trs80::with_store(
            &config,
            HeadlessPeripherals::new(),
            Box::new(MemoryDiskStore::new()),
        )
        .unwrap();
        assert!(matches!(
            m.load_rom(&vec![0; ROM_MAX + 1]),
            Err(TrsError::RomTooLarge { .. })
        ));
    }

    #[test]
    fn test_reload_smaller_rom() {
        let mut m = machine(Model::Model4, &[0xAA; 0x3000]);
        assert_eq!(m.memory_mut().read(0x2000), 0xAA);
        m.load_rom(&[0x11; 0x800]).unwrap();
        assert_eq!(m.memory().space().rom_size(), 0x800);
        assert_eq!(m.memory_mut().read(0x07FF), 0x11);
        assert_eq!(m.memory_mut().read(0x0800), 0xFF);
        assert_eq!(m.memory_mut().read(0x2000), 0xFF);
    }

    fn expanded(model: Model, expansion: Expansion, rom: &[u8]) -> Trs80<HeadlessPeripherals> {
        let mut config = MachineConfig::new(model);
        config.expansion = expansion;
        let mut machine =
            Trs80::with_store(&config, HeadlessPeripherals::new(), Box::new(MemoryDiskStore::new()))
                .unwrap();
        machine.load_rom(rom).unwrap();
        machine
    }

    #[test]
    fn test_selector_port_remaps() {
        // LD A,0Dh; OUT (1Fh),A; then HALT from banked RAM
        let mut m = expanded(Model::Model1, Expansion::Selector, &[0x3E, 0x0D, 0xD3, 0x1F]);
        m.memory_mut().space_mut().ram_mut()[0x1_0004] = 0x76;
        assert_eq!(m.run(10_000).reason, ExitReason::Halt);
        assert_eq!(m.memory().mode().value(), 0x15);
        assert_eq!(m.memory().bank().bank_base(), 0x1_0000);
        m.memory_mut().write(0x1000, 0x42);
        assert_eq!(m.memory().space().ram()[0x1_1000], 0x42);
    }

    #[test]
    fn test_selector_port_ignored_on_model3() {
        // LD A,0Dh; OUT (1Fh),A; HALT
        let mut m = machine(Model::Model3, &[0x3E, 0x0D, 0xD3, 0x1F, 0x76]);
        assert_eq!(m.run(10_000).reason, ExitReason::Halt);
        assert_eq!(m.memory().mode().value(), 0x30);
    }

    #[test]
    fn test_expansion_port_remaps() {
        // LD A,03h; OUT (94h),A; LD A,5Ah; LD (9000h),A; HALT
        let mut m = expanded(
            Model::Model3,
            Expansion::SuperMem,
            &[0x3E, 0x03, 0xD3, 0x94, 0x3E, 0x5A, 0x32, 0x00, 0x90, 0x76],
        );
        assert_eq!(m.run(10_000).reason, ExitReason::Halt);
        assert_eq!(m.memory().bank().bank_base(), 0x1_8000);
        assert_eq!(m.memory().read_expansion_port(), 0x03);
        assert_eq!(m.memory().space().ram()[0x9000 + 0x1_8000], 0x5A);
    }

    #[test]
    fn test_huffman_port_remaps_model4() {
        // LD A,30h; OUT (84h),A; LD A,02h; OUT (94h),A; HALT
        let mut m = expanded(
            Model::Model4,
            Expansion::Huffman,
            &[0x3E, 0x30, 0xD3, 0x84, 0x3E, 0x02, 0xD3, 0x94, 0x76],
        );
        assert_eq!(m.run(10_000).reason, ExitReason::Halt);
        assert_eq!(m.memory().bank().bank_base(), 0x2_0000);
        m.memory_mut().write(0x9000, 0x66);
        assert_eq!(m.memory().space().ram()[0x9000 + 0x2_0000], 0x66);
    }

    #[test]
    fn test_invalid_config() {
        let mut config = MachineConfig::new(Model::Model4);
        config.expansion = Expansion::Selector;
        assert!(Trs80::with_store(
            &config,
            HeadlessPeripherals::new(),
            Box::new(MemoryDiskStore::new())
        )
        .is_err());
    }
}
