//! TRS-80 CLI - hard disk image tools and a headless machine runner.
//!
//! Usage:
//!   trs80 mkdisk <file> [options]    # Create a blank hard disk image
//!   trs80 info <file>                # Show an image header and geometry
//!   trs80 run <config.json>          # Run a machine and print its screen
//!
//! Examples:
//!   trs80 mkdisk disks/hard4-0 -c 153 -s 128
//!   trs80 info disks/hard4-0
//!   trs80 -v run model4.json --t-states 50000000

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::{info, LevelFilter, Log, Metadata, Record};

use trs_core::{
    create_image, HardDiskHeader, HeadlessPeripherals, MachineConfig, Trs80, TrsError,
};

/// TRS-80 emulator tools
#[derive(Parser, Debug)]
#[command(name = "trs80")]
#[command(about = "TRS-80 hard disk tools and headless runner")]
struct Args {
    /// Log more (repeat for trace output)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a blank hard disk image
    Mkdisk {
        /// Image file to create
        file: PathBuf,

        /// Cylinders (1-256)
        #[arg(short, long, default_value_t = 202)]
        cylinders: u16,

        /// Sectors per cylinder, a multiple of 32 (up to 256)
        #[arg(short, long, default_value_t = 256)]
        sectors: u16,

        /// Granules per track
        #[arg(short, long, default_value_t = 8)]
        granules: u8,

        /// Directory cylinder
        #[arg(short, long, default_value_t = 1)]
        dir_cylinder: u8,

        /// Volume label
        #[arg(short, long)]
        label: Option<String>,

        /// Mark the image write protected
        #[arg(long)]
        write_protect: bool,
    },

    /// Show an image header and the geometry the controller would use
    Info {
        /// Image file
        file: PathBuf,
    },

    /// Run a machine headless and print its screen
    Run {
        /// Machine configuration (JSON)
        config: PathBuf,

        /// T-states to run for
        #[arg(short, long, default_value_t = 10_000_000)]
        t_states: u64,
    },
}

/// Logger writing to stderr.
struct StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(filter);
    }
}

fn mkdisk(
    file: PathBuf,
    cylinders: u16,
    sectors: u16,
    granules: u8,
    dir_cylinder: u8,
    label: Option<String>,
    write_protect: bool,
) -> Result<(), TrsError> {
    let mut header = HardDiskHeader::new(cylinders, sectors)?;
    header.granules = granules;
    header.dir_cylinder = dir_cylinder;
    if let Some(label) = label {
        header.set_label(&label);
    }
    header.set_write_protected(write_protect);
    create_image(&file, &header)?;
    let geometry = header.geometry()?;
    info!(
        "{}: {} cylinders, {} heads, {} sectors/track",
        file.display(),
        geometry.cylinders,
        geometry.heads,
        geometry.sectors_per_track
    );
    Ok(())
}

fn show_info(file: PathBuf) -> Result<(), TrsError> {
    let bytes = std::fs::read(&file)?;
    let header = HardDiskHeader::parse(&bytes)?;
    let stored = bytes[3];
    println!("Image:            {}", file.display());
    println!("Label:            {}", header.label());
    println!(
        "Checksum:         {:#04x} ({})",
        stored,
        if stored == header.checksum() {
            "ok".to_string()
        } else {
            format!("expected {:#04x}", header.checksum())
        }
    );
    println!("Cylinders:        {}", header.cylinder_count());
    println!("Sectors/cylinder: {}", header.sectors_per_cylinder());
    println!("Granules:         {}", header.granules);
    println!("Dir cylinder:     {}", header.dir_cylinder);
    println!("Write protected:  {}", header.is_write_protected());
    println!(
        "Created:          {:02}/{:02}/{:02}",
        header.created[0], header.created[1], header.created[2]
    );
    match header.geometry() {
        Ok(geometry) => {
            println!(
                "Geometry:         {} heads x {} sectors/track",
                geometry.heads, geometry.sectors_per_track
            );
            println!(
                "Size:             {} of {} bytes",
                bytes.len(),
                geometry.image_size()
            );
        }
        Err(e) => println!("Unusable:         {}", e),
    }
    Ok(())
}

fn run(config: PathBuf, t_states: u64) -> Result<(), TrsError> {
    let config = MachineConfig::load(&config)?;
    let mut machine = Trs80::new(&config, HeadlessPeripherals::new())?;
    let exit = machine.run(t_states);
    eprintln!(
        "Stopped: {:?} after {} T-states at PC {:#06x}",
        exit.reason, exit.t_states, exit.pc
    );
    print!("{}", machine.screen_text());
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(args.verbose);

    let result = match args.command {
        Command::Mkdisk {
            file,
            cylinders,
            sectors,
            granules,
            dir_cylinder,
            label,
            write_protect,
        } => mkdisk(
            file,
            cylinders,
            sectors,
            granules,
            dir_cylinder,
            label,
            write_protect,
        ),
        Command::Info { file } => show_info(file),
        Command::Run { config, t_states } => run(config, t_states),
    };

    result.map_err(|e| e.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_are_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_mkdisk_defaults() {
        let args = Args::parse_from(["trs80", "mkdisk", "hard4-0"]);
        match args.command {
            Command::Mkdisk {
                cylinders,
                sectors,
                granules,
                dir_cylinder,
                write_protect,
                ..
            } => {
                assert_eq!(cylinders, 202);
                assert_eq!(sectors, 256);
                assert_eq!(granules, 8);
                assert_eq!(dir_cylinder, 1);
                assert!(!write_protect);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_verbose_is_global() {
        let args = Args::parse_from(["trs80", "info", "x", "-vv"]);
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_mkdisk_writes_header() {
        let file = std::env::temp_dir().join(format!("trs80-cli-mkdisk-{}", std::process::id()));
        let _ = std::fs::remove_file(&file);
        mkdisk(file.clone(), 40, 64, 6, 2, Some("games".into()), true).unwrap();
        let header = HardDiskHeader::parse(&std::fs::read(&file).unwrap()).unwrap();
        assert_eq!(header.cylinder_count(), 40);
        assert_eq!(header.granules, 6);
        assert_eq!(header.dir_cylinder, 2);
        assert_eq!(header.label(), "games");
        assert!(header.is_write_protected());
        let _ = std::fs::remove_file(&file);
    }

    #[test]
    fn test_mkdisk_rejects_geometry() {
        let file = std::env::temp_dir().join(format!("trs80-cli-bad-{}", std::process::id()));
        assert!(mkdisk(file.clone(), 40, 48, 8, 1, None, false).is_err());
        assert!(!file.exists());
    }
}
