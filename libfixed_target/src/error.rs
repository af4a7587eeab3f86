use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use super::calibration::RotationAngle;
use super::chip_format::ChipType;
use super::status::OperationStatus;

#[derive(Debug, Clone, Error)]
pub enum ChipFormatError {
    #[error("Unsupported chip type {0}; no chip format is defined for it")]
    UnsupportedChipType(String),
}

#[derive(Debug, Clone, Error)]
pub enum AddressError {
    #[error("Invalid traversal order token: {0}")]
    InvalidTraversalOrder(String),
    #[error("Could not parse crystal address from {0:?}")]
    MalformedAddress(String),
    #[error("Index {index} has no label, only {labels} labels exist")]
    UnlabelledIndex { index: usize, labels: usize },
    #[error("Address {address} lies outside the {rows}x{cols} {level} grid of the chip")]
    OutOfRange {
        address: String,
        level: &'static str,
        rows: usize,
        cols: usize,
    },
    #[error("Addressing failed due to chip format error: {0}")]
    FormatError(#[from] ChipFormatError),
}

#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("Unknown control point {0}")]
    UnknownControlPoint(String),
    #[error("Hardware channel timed out after {timeout:?} during {operation}")]
    Timeout {
        operation: String,
        timeout: Duration,
    },
    #[error("Control point {point} holds {value:?}, which could not be read as {expected}")]
    BadValue {
        point: String,
        value: String,
        expected: &'static str,
    },
    #[error("Hardware state failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Hardware state failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Hardware timeout of {0} s is not a valid duration")]
    InvalidTimeout(f64),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
}

#[derive(Debug, Error)]
pub enum ParameterError {
    #[error("Could not read parameter file {0:?} as it does not exist")]
    BadFilePath(PathBuf),
    #[error("Parameter file is missing the required key {0}")]
    MissingKey(&'static str),
    #[error("Parameter {key} has the invalid value {value:?}")]
    BadValue { key: &'static str, value: String },
    #[error("Parameter file line {0:?} is not a key/value pair")]
    BadLine(String),
    #[error("Parameter file failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Parameter file failed due to chip format error: {0}")]
    ChipError(#[from] ChipFormatError),
}

#[derive(Debug, Error)]
pub enum SiteFileError {
    #[error("Site line {0:?} does not have the five expected columns")]
    BadColumnCount(String),
    #[error("Site line has an invalid coordinate: {0}")]
    BadCoordinate(#[from] std::num::ParseFloatError),
    #[error("Site line has an invalid present flag: {0}")]
    BadPresent(String),
    #[error("Site file failed due to address error: {0}")]
    AddressError(#[from] AddressError),
    #[error("Site file failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Site file failed due to parameter error: {0}")]
    ParameterError(#[from] ParameterError),
}

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("No chip type is defined for this session; the chip type register holds an unknown value")]
    UnknownChipType,
    #[error("Calibration failed computing the {angle} angle: sine value {value} is outside [-1, 1]; check the fiducial measurements")]
    DomainError { angle: RotationAngle, value: f64 },
    #[error("Direction coefficient {name} is {value}, but must be +1 or -1")]
    InvalidDirection { name: String, value: f64 },
    #[error("Calibration file is missing the required key {0}")]
    MissingKey(&'static str),
    #[error("Calibration key {key} has the non-numeric value {value}")]
    BadKeyValue { key: &'static str, value: String },
    #[error("Could not read calibration file {0:?} as it does not exist")]
    BadFilePath(PathBuf),
    #[error("Fiducial {0} does not exist, only fiducials 1 and 2 can be recorded")]
    InvalidFiducialPoint(u8),
    #[error("Fiducial file {0:?} is not in the expected MTR/RBV/RAW/Corr/f_value format")]
    BadFiducialFile(PathBuf),
    #[error("Calibration failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Calibration failed to parse a number: {0}")]
    ParsingError(#[from] std::num::ParseFloatError),
    #[error("Calibration failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Calibration failed due to hardware error: {0}")]
    HardwareError(#[from] HardwareError),
}

#[derive(Debug, Error)]
pub enum MotionError {
    #[error("Unknown position {0}")]
    UnknownPosition(String),
    #[error("Burn time of {0} s is not a valid duration")]
    InvalidDwell(f64),
    #[error("Move failed due to hardware error: {0}")]
    HardwareError(#[from] HardwareError),
}

#[derive(Debug, Error)]
pub enum BlockMapError {
    #[error("Unknown stock map {0}")]
    UnknownStockMap(String),
    #[error("Block {block} is not a block of a {chip_type} chip")]
    UnknownBlock { block: String, chip_type: ChipType },
    #[error("Lite maps are not supported for {0} chips")]
    NoLiteLayout(ChipType),
    #[error("Map file line {0:?} is not in the expected format")]
    BadLine(String),
    #[error("Full map ends with the unpaired line {0:?}")]
    UnpairedLine(String),
    #[error("Could not open map file {0:?} as it does not exist")]
    BadFilePath(PathBuf),
    #[error("Block map failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Block map failed due to hardware error: {0}")]
    HardwareError(#[from] HardwareError),
    #[error("Block map failed due to chip format error: {0}")]
    ChipError(#[from] ChipFormatError),
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Processor failed because the chip type register holds an unknown value")]
    UnknownChipType,
    #[error("Could not open file {0:?} as it does not exist")]
    BadFilePath(PathBuf),
    #[error("Pvar line {0:?} is not of the form P3nn0=x P3nn1=y")]
    BadPvarLine(String),
    #[error("Processor failed due to ChipFormat error: {0}")]
    ChipError(#[from] ChipFormatError),
    #[error("Processor failed due to Address error: {0}")]
    AddressError(#[from] AddressError),
    #[error("Processor failed due to Parameter error: {0}")]
    ParameterError(#[from] ParameterError),
    #[error("Processor failed due to SiteFile error: {0}")]
    SiteFileError(#[from] SiteFileError),
    #[error("Processor failed due to Calibration error: {0}")]
    CalibrationError(#[from] CalibrationError),
    #[error("Processor failed due to Motion error: {0}")]
    MotionError(#[from] MotionError),
    #[error("Processor failed due to BlockMap error: {0}")]
    BlockMapError(#[from] BlockMapError),
    #[error("Processor failed due to Hardware error: {0}")]
    HardwareError(#[from] HardwareError),
    #[error("Processor failed due to Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Processor failed due to Send error: {0}")]
    SendError(#[from] std::sync::mpsc::SendError<OperationStatus>),
    #[error("Processor failed due to IO error: {0}")]
    IoError(#[from] std::io::Error),
}
