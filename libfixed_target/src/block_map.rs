//! Selection of the blocks of a chip to collect.
//!
//! The motion controller reads one enable register per block: block `n` is enabled when register
//! `GP(n + 10)` holds 1. A selection can come from a named stock map, from a "lite" map file
//! listing blocks by name, or from the current state of the registers (saved as
//! `currentchip.map` and uploaded to the controller as `P3nn1` variables).
use bit_set::BitSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use super::address::BLOCK_ROW_LABELS;
use super::chip_format::ChipType;
use super::config::Config;
use super::error::BlockMapError;
use super::hardware::{ControlPoint, HardwareIo, PvValue};

/// Offset between a block number and its enable register
const BLOCK_REGISTER_OFFSET: u16 = 10;
/// Number of block registers cleared when a stock map is loaded
const CLEARED_BLOCKS: usize = 64;
/// Number of block registers recorded by `save_screen_map`
const SCREEN_MAP_BLOCKS: usize = 81;
/// Register holding the name of the lite map file to load
const LITE_MAP_REGISTER: u16 = 5;
/// Register holding the chip type
const CHIP_TYPE_REGISTER: u16 = 1;

pub const SCREEN_MAP_FILE: &str = "currentchip.map";
/// Raw motion controller program for a full chip map, two lines per command
pub const FULL_MAP_FILE: &str = "currentchip.full";

pub fn block_register(block: usize) -> ControlPoint {
    ControlPoint::Register(block as u16 + BLOCK_REGISTER_OFFSET)
}

/// The stock maps that can be loaded by name
pub const STOCK_MAPS: [&str; 16] = [
    "Just The First Block",
    "clear",
    "r33",
    "r55",
    "r77",
    "h33",
    "x33",
    "x44",
    "x49",
    "x55",
    "x66",
    "x77",
    "x88",
    "x99",
    "half1",
    "half2",
];

const R33: [usize; 9] = [19, 18, 17, 26, 31, 32, 33, 24, 25];
const R55: [usize; 16] = [9, 10, 11, 12, 13, 16, 27, 30, 41, 40, 39, 38, 37, 34, 23, 20];
const R77: [usize; 24] = [
    7, 6, 5, 4, 3, 2, 1, 14, 15, 28, 29, 42, 43, 44, 45, 46, 47, 48, 49, 36, 35, 22, 21, 8,
];
const H33: [usize; 9] = [3, 2, 1, 6, 7, 8, 9, 4, 5];
const X33: [usize; 9] = [31, 32, 33, 40, 51, 50, 49, 42, 41];
const X55: [usize; 16] = [25, 24, 23, 22, 21, 34, 39, 52, 57, 58, 59, 60, 61, 48, 43, 30];
const X77: [usize; 24] = [
    11, 12, 13, 14, 15, 16, 17, 20, 35, 38, 53, 56, 71, 70, 69, 68, 67, 66, 65, 62, 47, 44, 29, 26,
];
const X99: [usize; 32] = [
    9, 8, 7, 6, 5, 4, 3, 2, 1, 18, 19, 36, 37, 54, 55, 72, 73, 74, 75, 76, 77, 78, 79, 80, 81, 64,
    63, 46, 45, 28, 27, 10,
];
const X44: [usize; 16] = [22, 21, 20, 19, 30, 35, 46, 45, 44, 43, 38, 27, 28, 29, 36, 37];
const X66: [usize; 20] = [
    10, 11, 12, 13, 14, 15, 18, 31, 34, 47, 50, 51, 52, 53, 54, 55, 42, 39, 26, 23,
];
const X88: [usize; 28] = [
    8, 7, 6, 5, 4, 3, 2, 1, 16, 17, 32, 33, 48, 49, 64, 63, 62, 61, 60, 59, 58, 57, 56, 41, 40, 25,
    24, 9,
];

/// The blocks enabled by a stock map, in the order they are listed. The larger square maps are
/// rings wrapped around the smaller ones.
pub fn stock_map_blocks(name: &str) -> Result<Vec<usize>, BlockMapError> {
    let rings: Vec<&[usize]> = match name {
        "Just The First Block" => return Ok(vec![1]),
        "clear" => return Ok(vec![]),
        "x49" => return Ok((1..=49).collect()),
        "half1" => return Ok((1..=32).collect()),
        "half2" => return Ok((33..=64).collect()),
        "r33" => vec![&R33],
        "r55" => vec![&R55, &R33],
        "r77" => vec![&R77, &R55, &R33],
        "h33" => vec![&H33],
        "x33" => vec![&X33],
        "x55" => vec![&X55, &X33],
        "x77" => vec![&X77, &X55, &X33],
        "x99" => vec![&X99, &X77, &X55, &X33],
        "x44" => vec![&X44],
        "x66" => vec![&X66, &X44],
        "x88" => vec![&X88, &X66, &X44],
        _ => return Err(BlockMapError::UnknownStockMap(name.to_string())),
    };
    Ok(rings.concat())
}

/// Clear the block registers and enable the blocks of the named stock map
pub fn load_stock_map<H: HardwareIo>(hardware: &mut H, name: &str) -> Result<BitSet, BlockMapError> {
    let blocks = stock_map_blocks(name)?;
    spdlog::info!("Clearing GP {}-{}", 1 + BLOCK_REGISTER_OFFSET as usize, CLEARED_BLOCKS + BLOCK_REGISTER_OFFSET as usize);
    for block in 1..=CLEARED_BLOCKS {
        hardware.write(block_register(block), PvValue::Int(0))?;
    }
    spdlog::info!("Loading stock map {name}");
    let mut selection = BitSet::new();
    for block in blocks {
        hardware.write(block_register(block), PvValue::Int(1))?;
        selection.insert(block);
    }
    Ok(selection)
}

/// Block numbering used by the lite maps of a chip type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiteLayout {
    /// Rows numbered left to right, then right to left on the next row
    RowSerpentine { width: usize },
    /// Columns numbered top to bottom, then bottom to top on the next column
    ColumnSerpentine { height: usize },
}

impl LiteLayout {
    pub fn for_chip(chip_type: ChipType) -> Result<Self, BlockMapError> {
        match chip_type {
            ChipType::Toronto => Ok(Self::RowSerpentine { width: 9 }),
            ChipType::Hamburg => Ok(Self::RowSerpentine { width: 3 }),
            ChipType::Regina => Ok(Self::RowSerpentine { width: 7 }),
            c if c.is_oxford_family() => Ok(Self::ColumnSerpentine { height: 8 }),
            c => Err(BlockMapError::NoLiteLayout(c)),
        }
    }

    /// Convert a zero based (row, column) to the one based block number
    fn number(&self, row: usize, col: usize) -> Option<usize> {
        match *self {
            Self::RowSerpentine { width } => {
                if row >= width || col >= width {
                    return None;
                }
                let offset = if row % 2 == 0 { col + 1 } else { width - col };
                Some(row * width + offset)
            }
            Self::ColumnSerpentine { height } => {
                if row >= height || col >= height {
                    return None;
                }
                let offset = if col % 2 == 0 { row } else { height - 1 - row };
                Some(col * height + offset + 1)
            }
        }
    }
}

/// Block number of a block name such as `B3` on the given chip
pub fn lite_block_number(chip_type: ChipType, block_name: &str) -> Result<usize, BlockMapError> {
    let layout = LiteLayout::for_chip(chip_type)?;
    let unknown = || BlockMapError::UnknownBlock {
        block: block_name.to_string(),
        chip_type,
    };
    let mut chars = block_name.chars();
    let row = chars
        .next()
        .and_then(|c| BLOCK_ROW_LABELS.find(c))
        .ok_or_else(unknown)?;
    let col = usize::from_str(chars.as_str())
        .ok()
        .filter(|c| *c >= 1)
        .ok_or_else(unknown)?;
    layout.number(row, col - 1).ok_or_else(unknown)
}

/// Parse the `A1 1` lines of a lite map into (block number, enabled) pairs
pub fn parse_lite_map(chip_type: ChipType, contents: &str) -> Result<Vec<(usize, i64)>, BlockMapError> {
    let mut entries = Vec::new();
    for line in contents.lines() {
        let columns: Vec<&str> = line.split_whitespace().collect();
        match columns.as_slice() {
            [] => continue,
            [name, value] => {
                let block = lite_block_number(chip_type, name)?;
                let value = value
                    .parse::<i64>()
                    .map_err(|_| BlockMapError::BadLine(line.to_string()))?;
                entries.push((block, value));
            }
            _ => return Err(BlockMapError::BadLine(line.to_string())),
        }
    }
    Ok(entries)
}

/// Load the lite map named by the lite map register from the lite map directory.
///
/// The file is parsed in full before the block registers are touched.
pub fn load_lite_map<H: HardwareIo>(
    hardware: &mut H,
    config: &Config,
    chip_type: ChipType,
) -> Result<BitSet, BlockMapError> {
    spdlog::info!("{chip_type} block order");
    let map_name = hardware.read_string(ControlPoint::Register(LITE_MAP_REGISTER))?;
    let path = config.litemap_path.join(format!("{map_name}.lite"));
    if !path.exists() {
        return Err(BlockMapError::BadFilePath(path));
    }
    spdlog::info!("Opening lite map {}", path.display());
    let entries = parse_lite_map(chip_type, &std::fs::read_to_string(&path)?)?;

    load_stock_map(hardware, "clear")?;
    let mut selection = BitSet::new();
    for (block, value) in entries {
        spdlog::debug!("Block {block} set to {value}");
        hardware.write(block_register(block), PvValue::Int(value))?;
        if value == 1 {
            selection.insert(block);
        }
    }
    Ok(selection)
}

/// Record the block registers to `currentchip.map` in the lite map directory
pub fn save_screen_map<H: HardwareIo>(hardware: &mut H, config: &Config) -> Result<PathBuf, BlockMapError> {
    let path = config.litemap_path.join(SCREEN_MAP_FILE);
    spdlog::info!("Saving {}", path.display());
    let mut contents = String::new();
    for block in 1..=SCREEN_MAP_BLOCKS {
        let value = hardware.read_i64(block_register(block))?;
        if value == 1 {
            spdlog::info!("Block {block} enabled");
        }
        contents.push_str(&format!("{block:02}status    P3{block:02}1 \t{value}\n"));
    }
    std::fs::write(&path, contents)?;
    Ok(path)
}

/// Lite map grid width for a short chip id
fn upload_width(chip_type: ChipType) -> Result<usize, BlockMapError> {
    match chip_type {
        ChipType::Toronto => Ok(9),
        ChipType::Oxford => Ok(8),
        ChipType::Hamburg => Ok(3),
        ChipType::OxfordInner => Ok(1),
        ChipType::Bismuth | ChipType::Regina => Ok(7),
        c => Err(BlockMapError::NoLiteLayout(c)),
    }
}

/// Read `(variable, value)` pairs from a screen map file
fn read_screen_map(path: &Path, count: usize) -> Result<Vec<(String, String)>, BlockMapError> {
    if !path.exists() {
        return Err(BlockMapError::BadFilePath(path.to_path_buf()));
    }
    let contents = std::fs::read_to_string(path)?;
    let mut pairs = Vec::new();
    for line in contents.lines().take(count) {
        let columns: Vec<&str> = line.split_whitespace().collect();
        match columns.as_slice() {
            [_, variable, value, ..] => pairs.push((variable.to_string(), value.to_string())),
            _ => return Err(BlockMapError::BadLine(line.to_string())),
        }
    }
    Ok(pairs)
}

/// Upload the saved screen map to the motion controller as `P3nn1=value` variables
pub fn upload_parameters<H: HardwareIo>(
    hardware: &mut H,
    config: &Config,
    chip_id: &str,
) -> Result<(), BlockMapError> {
    let chip_type = ChipType::from_chip_id(chip_id)?;
    let width = upload_width(chip_type)?;
    spdlog::info!("Uploading parameters to the GeoBrick, chipid {chip_id} width {width}");
    let pairs = read_screen_map(&config.litemap_path.join(SCREEN_MAP_FILE), width * width)?;

    hardware.write(
        ControlPoint::Register(CHIP_TYPE_REGISTER),
        PvValue::Int(chip_type.id()),
    )?;
    for (variable, value) in pairs {
        hardware.send_raw_motion_command(&format!("{variable}={value}"))?;
        hardware.settle(Duration::from_millis(20));
    }
    spdlog::warn!("Automatic setting of the mapping type to lite has been disabled");
    Ok(())
}

/// Send `currentchip.full` from the lite map directory to the motion controller.
///
/// Lines are joined in pairs and each pair is sent as one command. Returns the number of
/// commands sent.
pub fn upload_full<H: HardwareIo>(hardware: &mut H, config: &Config) -> Result<usize, BlockMapError> {
    let path = config.litemap_path.join(FULL_MAP_FILE);
    if !path.exists() {
        return Err(BlockMapError::BadFilePath(path));
    }
    let contents = std::fs::read_to_string(&path)?;
    let lines: Vec<&str> = contents.lines().collect();
    if lines.len() % 2 != 0 {
        let last = lines.last().copied().unwrap_or_default();
        return Err(BlockMapError::UnpairedLine(last.to_string()));
    }

    spdlog::info!("Uploading {}", path.display());
    let mut sent = 0;
    for pair in lines.chunks_exact(2) {
        let command = pair.join(" ");
        spdlog::info!("{command}");
        hardware.send_raw_motion_command(&command)?;
        hardware.settle(Duration::from_millis(20));
        sent += 1;
    }
    spdlog::info!("Full map upload done");
    Ok(sent)
}
