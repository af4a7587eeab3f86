//! The chip manager operations driven from the beamline screens.
//!
//! Each operation reads and writes the general purpose registers of the motion controller IOC
//! through a [`HardwareIo`] and the parameter files named in the [`Config`].
use rand::Rng;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::time::Duration;

use super::block_map::load_stock_map;
use super::chip_format::{get_format, ChipType};
use super::config::Config;
use super::error::{HardwareError, ProcessorError};
use super::hardware::{Axis, ControlPoint, HardwareIo, PvValue};
use super::parameters::{DetectorType, RunParameters};
use super::site_file::{
    check_files, chip_file_path, fiducial_addresses, generate_sites, write_chip_file,
    ChipFileKind, ADDR_FILE, RANDOM_FILE, SHOT_FILE,
};
use super::status::OperationStatus;

/// Chip type register
pub const GP_CHIP_TYPE: u16 = 1;
/// Map type register
pub const GP_MAP_TYPE: u16 = 2;
/// Number of exposures per window
pub const GP_N_EXPOSURES: u16 = 3;
pub const GP_PUMP_REPEAT: u16 = 4;
/// Set to non-zero by the operator to abort a block check
pub const GP_ABORT: u16 = 9;
pub const GP_VISIT: u16 = 100;
pub const GP_DET_TYPE: u16 = 101;
pub const GP_PUMP_EXPTIME: u16 = 103;
/// First of the five registers holding the pump-probe repeat times
pub const GP_REPEAT_TIMES: u16 = 104;
pub const GP_PREPUMP_EXPTIME: u16 = 109;
pub const GP_PUMP_DELAY: u16 = 110;

/// Registers cleared by `initialise`
const CLEARED_REGISTERS: std::ops::RangeInclusive<u16> = 4..=119;

/// Laser and flipper timing strings set on the motion controller at start up
const PMAC_TIMING_STRINGS: [&str; 4] = [
    "m508=100 m509=150",
    "m608=100 m609=150",
    "m708=100 m709=150",
    "m808=100 m809=150",
];

/// Stage move time between windows used by the pump-probe estimate
const MOVE_TIME: f64 = 0.008;
const PUMP_REPEATS: [u32; 5] = [1, 2, 3, 5, 10];

const BLOCK_CHECK_SETTLE: Duration = Duration::from_millis(400);
const PVAR_SETTLE: Duration = Duration::from_millis(20);

/// The chip files written for every run
pub const RUN_FILES: [ChipFileKind; 3] = [ADDR_FILE, SHOT_FILE, RANDOM_FILE];

fn register(n: u16) -> ControlPoint {
    ControlPoint::Register(n)
}

/// The chip type held by the chip type register. An unknown value is logged and reported as
/// `None`.
pub fn current_chip_type<H: HardwareIo>(hardware: &mut H) -> Result<Option<ChipType>, HardwareError> {
    let id = hardware.read_i64(register(GP_CHIP_TYPE))?;
    match ChipType::from_id(id) {
        Ok(chip) => Ok(Some(chip)),
        Err(e) => {
            spdlog::warn!("{e}");
            Ok(None)
        }
    }
}

/// Put the stage and the registers in their start of shift state
pub fn initialise<H: HardwareIo>(hardware: &mut H, config: &Config) -> Result<(), ProcessorError> {
    spdlog::info!("Setting VMAX VELO ACCL HLM LLM");
    let stage = &config.stage;
    for axis in Axis::ALL {
        hardware.write(ControlPoint::StageMaxVelocity(axis), stage.velocity.into())?;
    }
    for axis in Axis::ALL {
        hardware.write(ControlPoint::StageVelocity(axis), stage.velocity.into())?;
    }
    for axis in Axis::ALL {
        hardware.write(ControlPoint::StageAcceleration(axis), stage.acceleration.into())?;
    }
    for (axis, limits) in [
        (Axis::X, stage.x_limits),
        (Axis::Y, stage.y_limits),
        (Axis::Z, stage.z_limits),
    ] {
        hardware.write(ControlPoint::StageHighLimit(axis), limits.high.into())?;
        hardware.write(ControlPoint::StageLowLimit(axis), limits.low.into())?;
    }

    hardware.write(register(GP_CHIP_TYPE), PvValue::Int(ChipType::Oxford.id()))?;
    hardware.write(register(GP_MAP_TYPE), PvValue::Int(0))?;
    hardware.write(register(GP_N_EXPOSURES), PvValue::Int(1))?;
    hardware.write(register(GP_PUMP_REPEAT), PvValue::Int(0))?;
    hardware.write(ControlPoint::Filepath, "test".into())?;
    hardware.write(ControlPoint::ChipName, "albion".into())?;
    hardware.write(ControlPoint::DetectorDistance, PvValue::Int(1480))?;
    hardware.write(ControlPoint::ExposureTime, PvValue::Float(0.01))?;
    for command in PMAC_TIMING_STRINGS {
        hardware.send_raw_motion_command(command)?;
    }

    hardware.settle(Duration::from_millis(100));
    spdlog::info!(
        "Clearing general purpose registers {}-{}",
        CLEARED_REGISTERS.start(),
        CLEARED_REGISTERS.end()
    );
    for n in CLEARED_REGISTERS {
        hardware.write(register(n), PvValue::Int(0))?;
    }
    hardware.write(register(GP_VISIT), "press set params to read visit".into())?;
    hardware.write(
        register(GP_DET_TYPE),
        config.default_detector.to_string().into(),
    )?;
    spdlog::info!("Initialisation complete");
    Ok(())
}

/// Select a chip by its short id: enable only the first block, record the chip type and send the
/// chip's pvar file to the motion controller.
pub fn define_current_chip<H: HardwareIo>(
    hardware: &mut H,
    config: &Config,
    chip_id: &str,
) -> Result<ChipType, ProcessorError> {
    let chip_type = ChipType::from_chip_id(chip_id)?;
    let path = config.pvar_path.join(format!("{chip_id}.pvar"));
    if !path.exists() {
        return Err(ProcessorError::BadFilePath(path));
    }
    let contents = std::fs::read_to_string(&path)?;

    load_stock_map(hardware, "Just The First Block")?;
    spdlog::info!("Defining current chip as {chip_type} from {}", path.display());
    hardware.write(register(GP_CHIP_TYPE), PvValue::Int(chip_type.id()))?;
    for line in contents
        .lines()
        .filter(|l| !l.starts_with('#') && !l.trim().is_empty())
    {
        let line = line.trim_end();
        spdlog::debug!("{line}");
        hardware.send_raw_motion_command(line)?;
        hardware.settle(PVAR_SETTLE);
    }
    Ok(chip_type)
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Estimate the time taken by 1, 2, 3, 5 and 10 pump repeats and publish them to the repeat
/// time registers
pub fn pumpprobe_calc<H: HardwareIo>(hardware: &mut H) -> Result<[f64; 5], ProcessorError> {
    let exptime = hardware.read_f64(ControlPoint::ExposureTime)?;
    let pumpexptime = hardware.read_f64(register(GP_PUMP_EXPTIME))?;
    spdlog::info!("X-ray exposure time {exptime}, laser dwell time {pumpexptime}");

    let mut repeats = [0.0; 5];
    for (i, n) in PUMP_REPEATS.iter().enumerate() {
        let repeat = round_to(
            (*n as f64) * 2.0 * 20.0 * (MOVE_TIME + (pumpexptime + exptime) / 2.0),
            4,
        );
        spdlog::info!("repeat{n}: {repeat} s");
        hardware.write(register(GP_REPEAT_TIMES + i as u16), PvValue::Float(repeat))?;
        repeats[i] = repeat;
    }
    Ok(repeats)
}

/// Assemble the run parameters from the registers. The visit is taken from the config and
/// published to the visit register.
pub fn read_run_parameters<H: HardwareIo>(
    hardware: &mut H,
    config: &Config,
) -> Result<RunParameters, ProcessorError> {
    hardware.write(register(GP_VISIT), config.visit.as_str().into())?;

    let protein_name = hardware.read_string(ControlPoint::Filepath)?;
    let mut chip_name = hardware.read_string(ControlPoint::ChipName)?;
    let exptime = hardware.read_f64(ControlPoint::ExposureTime)?;
    let dcdetdist = hardware.read_f64(ControlPoint::DetectorDistance)?;
    let pump_repeat = hardware.read_i64(register(GP_PUMP_REPEAT))?;
    let pumpexptime = hardware.read_f64(register(GP_PUMP_EXPTIME))?;
    let pumpdelay = hardware.read_f64(register(GP_PUMP_DELAY))?;
    let prepumpexptime = hardware.read_f64(register(GP_PREPUMP_EXPTIME))?;
    let n_exposures = hardware.read_i64(register(GP_N_EXPOSURES))?;
    let map_type = hardware.read_i64(register(GP_MAP_TYPE))?;
    let chip_type = ChipType::from_id(hardware.read_i64(register(GP_CHIP_TYPE))?)?;
    let det_type: DetectorType = hardware.read_string(register(GP_DET_TYPE))?.parse()?;

    if det_type == DetectorType::Pilatus && chip_name.ends_with(|c: char| c.is_ascii_digit()) {
        chip_name.push('-');
        spdlog::info!("Requested filename ends in a number, appended dash: {chip_name}");
    }

    Ok(RunParameters {
        visit: config.visit.clone(),
        chip_name,
        protein_name,
        n_exposures,
        chip_type,
        map_type,
        pump_repeat,
        pumpexptime,
        pumpdelay,
        prepumpexptime,
        exptime,
        dcdetdist,
        det_type,
    })
}

/// Prepare the chip files of a run: move old files aside, then write the `.addr`, `.shot` and
/// `.rando.spec` files. Chips without a grid layout get header only files.
pub fn startup<R: Rng>(
    config: &Config,
    params: &RunParameters,
    rng: &mut R,
) -> Result<Vec<PathBuf>, ProcessorError> {
    let directory = config.chip_directory(params.sub_dir());
    check_files(&directory, &params.chip_name, &RUN_FILES)?;
    spdlog::info!("Checked files in {}", directory.display());

    let gridded = match get_format(params.chip_type) {
        Ok(_) => true,
        Err(e) => {
            spdlog::warn!("{e}; writing headers only");
            false
        }
    };
    let fiducials = fiducial_addresses(params.chip_type);
    let mut written = Vec::with_capacity(RUN_FILES.len());
    for kind in RUN_FILES {
        let sites = if gridded {
            generate_sites(&params.chip_name, params.chip_type, kind, &fiducials, rng)?
        } else {
            vec![]
        };
        let path = chip_file_path(&directory, &params.chip_name, kind);
        write_chip_file(&path, params, &sites)?;
        spdlog::info!("Wrote {} sites to {}", sites.len(), path.display());
        written.push(path);
    }
    Ok(written)
}

/// Write `parameters.txt` from the registers and prepare the chip files of the run
pub fn write_parameter_file<H: HardwareIo, R: Rng>(
    hardware: &mut H,
    config: &Config,
    rng: &mut R,
) -> Result<RunParameters, ProcessorError> {
    let params = read_run_parameters(hardware, config)?;
    let path = config.parameter_file();
    spdlog::info!("Writing parameter file {}", path.display());
    params.write_parameter_file(&path)?;
    for (key, value) in params.entries() {
        spdlog::info!("{key}: {value}");
    }
    startup(config, &params, rng)?;
    Ok(params)
}

/// Start position of one block, as given by a pvar file
#[derive(Debug, Clone, PartialEq)]
pub struct BlockStart {
    pub block: String,
    pub x: String,
    pub y: String,
}

/// Read the block start positions (`P3nn0=x P3nn1=y`) from a pvar file
pub fn scrape_pvar_file(path: &Path) -> Result<Vec<BlockStart>, ProcessorError> {
    if !path.exists() {
        return Err(ProcessorError::BadFilePath(path.to_path_buf()));
    }
    let contents = std::fs::read_to_string(path)?;
    let mut starts = Vec::new();
    for line in contents.lines() {
        let line = line.trim_end();
        if line.starts_with('#') || line.starts_with("P3000") || line.starts_with("P3011") {
            continue;
        }
        let entry: Vec<&str> = line.split(' ').collect();
        let [x_entry, y_entry] = entry.as_slice() else {
            continue;
        };
        let bad_line = || ProcessorError::BadPvarLine(line.to_string());
        let block = x_entry.get(2..4).ok_or_else(bad_line)?;
        let (_, x) = x_entry.split_once('=').ok_or_else(bad_line)?;
        let (_, y) = y_entry.split_once('=').ok_or_else(bad_line)?;
        starts.push(BlockStart {
            block: block.to_string(),
            x: x.to_string(),
            y: y.to_string(),
        });
    }
    Ok(starts)
}

/// Pvar file holding the block starts visited by `block_check` for a chip type
pub fn block_check_file(chip_type: Option<ChipType>) -> &'static str {
    match chip_type {
        Some(ChipType::Minichip) => "minichip_oxford.pvar",
        Some(ChipType::Oxford6x6) => "oxford6x6.pvar",
        _ => "sacla3_oxford.pvar",
    }
}

/// How a block check ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockCheckOutcome {
    Completed,
    Aborted { visited: usize },
}

/// Visit the start of every block of the chip so the operator can check the alignment.
///
/// The abort register is cleared first and polled before each move; a non-zero value stops the
/// check. Progress is reported through `tx` after each block.
pub fn block_check<H: HardwareIo>(
    hardware: &mut H,
    config: &Config,
    tx: &Sender<OperationStatus>,
) -> Result<BlockCheckOutcome, ProcessorError> {
    hardware.write(register(GP_ABORT), PvValue::Int(0))?;
    let chip_type = current_chip_type(hardware)?;
    let path = config.pvar_path.join(block_check_file(chip_type));
    let starts = scrape_pvar_file(&path)?;
    let total = starts.len();
    spdlog::info!("Checking {total} blocks from {}", path.display());

    tx.send(OperationStatus::new(0, total, "start"))?;
    for (visited, start) in starts.iter().enumerate() {
        if hardware.read_i64(register(GP_ABORT))? != 0 {
            spdlog::warn!("Block check aborted after {visited} of {total} blocks");
            return Ok(BlockCheckOutcome::Aborted { visited });
        }
        spdlog::info!("{} {} {}", start.block, start.x, start.y);
        hardware.send_raw_motion_command(&format!("!x{}y{}", start.x, start.y))?;
        hardware.settle(BLOCK_CHECK_SETTLE);
        tx.send(OperationStatus::new(visited + 1, total, &start.block))?;
    }
    spdlog::info!("Block check done");
    Ok(BlockCheckOutcome::Completed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_map::block_register;
    use crate::hardware::{HardwareEvent, SimulatedHardware};
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::mpsc::channel;

    fn sim() -> SimulatedHardware {
        SimulatedHardware::new(Duration::from_secs(1))
    }

    fn temp_config(dir: &Path) -> Config {
        let mut config = Config::default();
        config.param_path = dir.to_path_buf();
        config.pvar_path = dir.join("pvar");
        config.litemap_path = dir.join("litemaps");
        config.chip_file_path = dir.to_path_buf();
        std::fs::create_dir_all(&config.pvar_path).unwrap();
        config
    }

    #[test]
    fn test_pumpprobe_calc() {
        let mut hw = sim();
        hw.preset(ControlPoint::ExposureTime, 0.01);
        hw.preset(register(GP_PUMP_EXPTIME), 0.005);
        let repeats = pumpprobe_calc(&mut hw).unwrap();
        let expected = [0.62, 1.24, 1.86, 3.1, 6.2];
        for (i, value) in expected.iter().enumerate() {
            assert_relative_eq!(repeats[i], *value);
            assert_relative_eq!(
                hw.read_f64(register(GP_REPEAT_TIMES + i as u16)).unwrap(),
                *value
            );
        }
    }

    #[test]
    fn test_initialise() {
        let mut hw = sim();
        hw.preset(register(50), 7i64);
        let config = Config::default();
        initialise(&mut hw, &config).unwrap();

        assert_eq!(hw.read_f64(ControlPoint::StageVelocity(Axis::Z)).unwrap(), 20.0);
        assert_eq!(hw.read_f64(ControlPoint::StageLowLimit(Axis::X)).unwrap(), -29.0);
        assert_eq!(hw.read_f64(ControlPoint::StageHighLimit(Axis::Z)).unwrap(), 5.1);
        assert_eq!(hw.read_i64(register(GP_CHIP_TYPE)).unwrap(), 1);
        assert_eq!(hw.read_i64(register(GP_N_EXPOSURES)).unwrap(), 1);
        assert_eq!(hw.read_i64(register(50)).unwrap(), 0);
        assert_eq!(hw.read_string(ControlPoint::ChipName).unwrap(), "albion");
        assert_eq!(hw.read_string(register(GP_DET_TYPE)).unwrap(), "eiger");
        assert_eq!(hw.commands(), PMAC_TIMING_STRINGS.to_vec());
    }

    #[test]
    fn test_define_current_chip() {
        let dir = tempfile::tempdir().unwrap();
        let config = temp_config(dir.path());
        std::fs::write(
            config.pvar_path.join("oxford.pvar"),
            "# Oxford chip\nP3000=0\nP3010=0 P3011=0\n",
        )
        .unwrap();
        let mut hw = sim();
        hw.preset(block_register(12), 1i64);

        let chip = define_current_chip(&mut hw, &config, "oxford").unwrap();
        assert_eq!(chip, ChipType::Oxford);
        assert_eq!(hw.read_i64(register(GP_CHIP_TYPE)).unwrap(), 1);
        assert_eq!(hw.read_i64(block_register(1)).unwrap(), 1);
        assert_eq!(hw.read_i64(block_register(12)).unwrap(), 0);
        assert_eq!(hw.commands(), vec!["P3000=0", "P3010=0 P3011=0"]);

        assert!(matches!(
            define_current_chip(&mut hw, &config, "heidelberg"),
            Err(ProcessorError::ChipError(_))
        ));
        assert!(matches!(
            define_current_chip(&mut hw, &config, "toronto"),
            Err(ProcessorError::BadFilePath(_))
        ));
    }

    #[test]
    fn test_write_parameter_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = temp_config(dir.path());
        let mut hw = sim();
        initialise(&mut hw, &config).unwrap();
        hw.preset(ControlPoint::Filepath, "lysozyme");
        hw.preset(ControlPoint::ChipName, "chip7");
        hw.preset(register(GP_CHIP_TYPE), 9i64);
        hw.preset(register(GP_DET_TYPE), "pilatus");

        let mut rng = StdRng::seed_from_u64(3);
        let params = write_parameter_file(&mut hw, &config, &mut rng).unwrap();
        assert_eq!(params.chip_name, "chip7-");
        assert_eq!(params.chip_type, ChipType::Minichip);
        assert_eq!(hw.read_string(register(GP_VISIT)).unwrap(), config.visit);

        let stored = RunParameters::read_parameter_file(&config.parameter_file()).unwrap();
        assert_eq!(stored, params);
        let chip_dir = config.chip_directory("lysozyme");
        for suffix in ["addr", "shot", "rando.spec"] {
            assert!(chip_dir.join(format!("chip7-.{suffix}")).is_file());
        }
    }

    #[test]
    fn test_scrape_pvar_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sacla3_oxford.pvar");
        std::fs::write(
            &path,
            "#header\nP3000=0\nP3011=0\nP3020=3.175 P3021=0.0\nP3030=6.35 P3031=0.0\nM100=1\n",
        )
        .unwrap();
        let starts = scrape_pvar_file(&path).unwrap();
        assert_eq!(starts.len(), 2);
        assert_eq!(
            starts[0],
            BlockStart {
                block: String::from("02"),
                x: String::from("3.175"),
                y: String::from("0.0"),
            }
        );
        std::fs::write(&path, "P3020 P3021\n").unwrap();
        assert!(matches!(
            scrape_pvar_file(&path),
            Err(ProcessorError::BadPvarLine(_))
        ));
    }

    #[test]
    fn test_block_check_file() {
        assert_eq!(block_check_file(Some(ChipType::Minichip)), "minichip_oxford.pvar");
        assert_eq!(block_check_file(Some(ChipType::Oxford6x6)), "oxford6x6.pvar");
        assert_eq!(block_check_file(Some(ChipType::Oxford)), "sacla3_oxford.pvar");
        assert_eq!(block_check_file(None), "sacla3_oxford.pvar");
    }

    #[test]
    fn test_block_check() {
        let dir = tempfile::tempdir().unwrap();
        let config = temp_config(dir.path());
        std::fs::write(
            config.pvar_path.join("sacla3_oxford.pvar"),
            "P3010=0.0 P3011=0.0\nP3020=3.175 P3021=0.0\nP3030=6.35 P3031=0.0\n",
        )
        .unwrap();
        let mut hw = sim();
        hw.preset(register(GP_ABORT), 1i64);
        let (tx, rx) = channel();

        let outcome = block_check(&mut hw, &config, &tx).unwrap();
        assert_eq!(outcome, BlockCheckOutcome::Completed);
        assert_eq!(hw.commands(), vec!["!x0.0y0.0", "!x3.175y0.0", "!x6.35y0.0"]);
        assert_eq!(hw.settles(), vec![BLOCK_CHECK_SETTLE; 3]);
        let statuses: Vec<OperationStatus> = rx.try_iter().collect();
        assert_eq!(statuses.len(), 4);
        assert_eq!(statuses[3].progress, 1.0);
        assert_eq!(statuses[2].label, "02");
        assert!(matches!(hw.events()[0], HardwareEvent::Write(_, PvValue::Int(0))));
    }
}
