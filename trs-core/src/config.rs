//! Machine configuration.
//!
//! Configurations are JSON documents:
//!
//! ```json
//! { "model": "4p", "rom": "roms/boot4p.rom", "diskDir": "disks", "expansion": "huffman" }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{TrsError, TrsResult};

/// TRS-80 hardware model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Model {
    #[serde(rename = "1")]
    Model1,
    #[serde(rename = "3")]
    Model3,
    #[serde(rename = "4")]
    Model4,
    #[serde(rename = "4p")]
    Model4P,
}

impl Model {
    /// Model number as used in the memory map mode code (4P is 5).
    pub fn code(self) -> u8 {
        match self {
            Model::Model1 => 1,
            Model::Model3 => 3,
            Model::Model4 => 4,
            Model::Model4P => 5,
        }
    }

    /// Hard disk image file name for a drive on this model.
    pub fn hard_disk_name(self, drive: usize) -> String {
        match self {
            Model::Model4P => format!("hard4p-{}", drive),
            _ => format!("hard{}-{}", self.code(), drive),
        }
    }

    /// Model 4 and 4P have the port 0x84 memory map register.
    pub fn has_map_register(self) -> bool {
        matches!(self, Model::Model4 | Model::Model4P)
    }
}

/// Memory expansion board installed in the machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Expansion {
    #[default]
    None,
    /// Huffman-style port 0x94 board, up to 2MB.
    Huffman,
    /// Alpha Products SuperMem, 32K banks in the upper half.
    SuperMem,
    /// Model I memory selector card.
    Selector,
}

/// Machine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineConfig {
    pub model: Model,
    /// ROM image to load at startup.
    #[serde(default)]
    pub rom: Option<PathBuf>,
    /// Directory holding the `hardN-M` disk images.
    #[serde(default = "default_disk_dir")]
    pub disk_dir: PathBuf,
    #[serde(default)]
    pub expansion: Expansion,
}

fn default_disk_dir() -> PathBuf {
    PathBuf::from(".")
}

impl MachineConfig {
    /// Create a configuration for a stock machine.
    pub fn new(model: Model) -> Self {
        Self {
            model,
            rom: None,
            disk_dir: default_disk_dir(),
            expansion: Expansion::None,
        }
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json(text: &str) -> TrsResult<Self> {
        let config: MachineConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file. Relative `rom` and `diskDir` paths are
    /// resolved against the file's directory.
    pub fn load(path: &Path) -> TrsResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut config = Self::from_json(&text)?;
        if let Some(base) = path.parent() {
            if let Some(rom) = config.rom.take() {
                config.rom = Some(base.join(rom));
            }
            config.disk_dir = base.join(&config.disk_dir);
        }
        Ok(config)
    }

    /// Reject expansion boards the model never supported.
    pub fn validate(&self) -> TrsResult<()> {
        let ok = match self.expansion {
            Expansion::None => true,
            Expansion::Huffman => self.model.has_map_register(),
            Expansion::SuperMem => matches!(self.model, Model::Model1 | Model::Model3),
            Expansion::Selector => self.model == Model::Model1,
        };
        if ok {
            Ok(())
        } else {
            Err(TrsError::Config(format!(
                "{:?} expansion is not available on {:?}",
                self.expansion, self.model
            )))
        }
    }
}
