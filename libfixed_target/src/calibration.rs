//! Coordinate system calibration of the chip stage.
//!
//! The chip is never mounted perfectly flat and square to the stage axes. Two fiducial marks at a
//! known distance from the chip origin are located by hand; their measured offsets give the roll
//! (rotation about z), yaw (about y) and pitch (about x) of the chip. From those angles, the
//! per-axis scale factors and the measured skew of the stage, a 3x3 transform is built and sent
//! to the motion controller as its coordinate system definition (`#n->aX+bY+cZ`).
//!
//! The rotation order is roll, then yaw, then pitch: `R = Pitch * Yaw * Roll`.
//!
//! Calibration inputs are read fresh from the parameter files every time; nothing is cached
//! between calibrations.
use ndarray::{arr2, Array2};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::path::Path;
use std::time::Duration;

use super::chip_format::ChipType;
use super::config::Config;
use super::error::CalibrationError;
use super::hardware::{Axis, ControlPoint, HardwareIo};

/// Command that homes all three motors of the coordinate system
pub const HOME_ALL: &str = "#1hmz#2hmz#3hmz";
/// Command that moves the stage to the coordinate system origin
pub const ORIGIN: &str = "!x0y0z0";
/// Command that selects coordinate system 2
pub const SELECT_CS: &str = "&2";
/// The identity coordinate system, as sent by [`cs_reset`]
pub const RESET_CS: [&str; 3] = ["#1->-10000X+0Y+0Z", "#2->+0X+10000Y+0Z", "#3->0X+0Y+10000Z"];

const FIDUCIAL_HEADER: &str = "MTR\tRBV\tRAW\tCorr\tf_value";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationAngle {
    /// Rotation about the z axis
    Roll,
    /// Rotation about the y axis
    Yaw,
    /// Rotation about the x axis
    Pitch,
}

impl Display for RotationAngle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Roll => write!(f, "roll (z)"),
            Self::Yaw => write!(f, "yaw (y)"),
            Self::Pitch => write!(f, "pitch (x)"),
        }
    }
}

/// Stage constants from `cs_maker.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsSettings {
    pub scalex: f64,
    pub scaley: f64,
    pub scalez: f64,
    /// Measured skew of the x and y stage axes in degrees
    pub skew: f64,
    #[serde(rename = "Sx_dir")]
    pub sx_dir: f64,
    #[serde(rename = "Sy_dir")]
    pub sy_dir: f64,
    #[serde(rename = "Sz_dir")]
    pub sz_dir: f64,
}

impl Default for CsSettings {
    /// Crucifix 1 in its normal orientation on I24, measured October 2022
    fn default() -> Self {
        Self {
            scalex: 10018.0,
            scaley: 9999.5,
            scalez: 10000.0,
            skew: -0.189,
            sx_dir: -1.0,
            sy_dir: 1.0,
            sz_dir: -1.0,
        }
    }
}

impl CsSettings {
    /// Read the settings, checking each key separately so that a missing or malformed key is
    /// reported by name
    pub fn read_file(path: &Path) -> Result<Self, CalibrationError> {
        if !path.exists() {
            return Err(CalibrationError::BadFilePath(path.to_path_buf()));
        }
        let json_str = std::fs::read_to_string(path)?;
        let table: serde_json::Value = serde_json::from_str(&json_str)?;
        let get = |key: &'static str| -> Result<f64, CalibrationError> {
            let value = table.get(key).ok_or(CalibrationError::MissingKey(key))?;
            value.as_f64().ok_or_else(|| CalibrationError::BadKeyValue {
                key,
                value: value.to_string(),
            })
        };
        let settings = Self {
            scalex: get("scalex")?,
            scaley: get("scaley")?,
            scalez: get("scalez")?,
            skew: get("skew")?,
            sx_dir: get("Sx_dir")?,
            sy_dir: get("Sy_dir")?,
            sz_dir: get("Sz_dir")?,
        };
        check_direction("Sx_dir", settings.sx_dir)?;
        check_direction("Sy_dir", settings.sy_dir)?;
        check_direction("Sz_dir", settings.sz_dir)?;
        Ok(settings)
    }

    pub fn write_file(&self, path: &Path) -> Result<(), CalibrationError> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

fn check_direction(name: &str, value: f64) -> Result<(), CalibrationError> {
    if value == 1.0 || value == -1.0 {
        Ok(())
    } else {
        Err(CalibrationError::InvalidDirection {
            name: name.to_string(),
            value,
        })
    }
}

/// Read the motor directions from `motor_direction.txt` (`mtr1_dir=1` lines). Any motor not
/// listed defaults to +1; unrelated lines are ignored.
pub fn scrape_mtr_directions(path: &Path) -> Result<[f64; 3], CalibrationError> {
    if !path.exists() {
        return Err(CalibrationError::BadFilePath(path.to_path_buf()));
    }
    let contents = std::fs::read_to_string(path)?;
    let mut directions = [1.0; 3];
    for line in contents.lines() {
        let index = match line.get(0..4) {
            Some("mtr1") => 0,
            Some("mtr2") => 1,
            Some("mtr3") => 2,
            _ => continue,
        };
        let value = line
            .split_once('=')
            .map(|(_, v)| v.trim())
            .ok_or_else(|| CalibrationError::BadKeyValue {
                key: "mtr_dir",
                value: line.to_string(),
            })?
            .parse::<f64>()?;
        check_direction(&format!("mtr{}_dir", index + 1), value)?;
        directions[index] = value;
    }
    spdlog::info!(
        "mtr1_dir {} mtr2_dir {} mtr3_dir {}",
        directions[0],
        directions[1],
        directions[2]
    );
    Ok(directions)
}

/// Read the (x, y, z) f-values recorded in a fiducial file
pub fn scrape_mtr_fiducials(path: &Path) -> Result<[f64; 3], CalibrationError> {
    if !path.exists() {
        return Err(CalibrationError::BadFilePath(path.to_path_buf()));
    }
    let contents = std::fs::read_to_string(path)?;
    let bad_file = || CalibrationError::BadFiducialFile(path.to_path_buf());
    let rows: Vec<&str> = contents.lines().skip(1).take(3).collect();
    if rows.len() != 3 {
        return Err(bad_file());
    }
    let mut values = [0.0; 3];
    for (value, row) in values.iter_mut().zip(rows) {
        let column = row.split_whitespace().nth(4).ok_or_else(bad_file)?;
        *value = column.parse::<f64>()?;
    }
    Ok(values)
}

/// Write a fiducial file from the stage readbacks
pub fn write_fiducial_file(
    path: &Path,
    readback: [f64; 3],
    raw: [f64; 3],
    directions: [f64; 3],
) -> Result<(), CalibrationError> {
    let mut lines = vec![FIDUCIAL_HEADER.to_string()];
    for i in 0..3 {
        lines.push(format!(
            "MTR{}\t{:.4}\t{}\t{}\t{:.4}",
            i + 1,
            readback[i],
            raw[i].trunc() as i64,
            directions[i] as i64,
            readback[i]
        ));
    }
    for line in lines.iter() {
        spdlog::info!("{line}");
    }
    std::fs::write(path, lines.join("\n") + "\n")?;
    Ok(())
}

/// Everything the transform is computed from
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationInput {
    /// Direction of each motor, +1 or -1
    pub motor_directions: [f64; 3],
    pub fiducial_1: [f64; 3],
    pub fiducial_2: [f64; 3],
    /// Nominal distance from the origin to fiducial 1 (x) and fiducial 2 (y)
    pub spacing: (f64, f64),
    pub skew_degrees: f64,
    pub scale: [f64; 3],
    /// Mounting sign of the pitch, yaw and roll sines, +1 or -1
    pub mount: [f64; 3],
}

impl CalibrationInput {
    /// Read the motor directions, both fiducials and the stage constants from disk
    pub fn load(config: &Config, chip_type: ChipType) -> Result<Self, CalibrationError> {
        let settings = CsSettings::read_file(&config.cs_maker_file())?;
        Ok(Self {
            motor_directions: scrape_mtr_directions(&config.motor_direction_file())?,
            fiducial_1: scrape_mtr_fiducials(&config.fiducial_file(1))?,
            fiducial_2: scrape_mtr_fiducials(&config.fiducial_file(2))?,
            spacing: chip_type.fiducial_spacing(),
            skew_degrees: settings.skew,
            scale: [settings.scalex, settings.scaley, settings.scalez],
            mount: [settings.sx_dir, settings.sy_dir, settings.sz_dir],
        })
    }
}

/// The calibrated coordinate system
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinateSystemTransform {
    /// Rows of motor counts per mm, after the skew correction
    pub factors: Array2<f64>,
    /// Sines of pitch, yaw, roll
    pub sines: [f64; 3],
    /// Cosines of pitch, yaw, roll
    pub cosines: [f64; 3],
    /// Norm of each row over its scale, before the skew correction. Ideally 1.0.
    pub residuals: [f64; 3],
    /// Skew implied by the two roll estimates in degrees; only a diagnostic
    pub calculated_skew: Option<f64>,
    /// Roll of the chip in degrees
    pub rotation_degrees: f64,
}

fn tidy(value: f64) -> f64 {
    if value == 0.0 {
        0.0
    } else {
        value
    }
}

impl CoordinateSystemTransform {
    /// The three `#n->aX+bY+cZ` coordinate system definitions
    pub fn commands(&self) -> [String; 3] {
        let row = |i: usize| {
            format!(
                "#{}->{:+.3}X{:+.3}Y{:+.3}Z",
                i + 1,
                tidy(self.factors[[i, 0]]),
                tidy(self.factors[[i, 1]]),
                tidy(self.factors[[i, 2]])
            )
        };
        [row(0), row(1), row(2)]
    }

    pub fn residuals_within(&self, tolerance: f64) -> bool {
        self.residuals.iter().all(|r| (r - 1.0).abs() <= tolerance)
    }
}

fn checked_sine(angle: RotationAngle, value: f64) -> Result<f64, CalibrationError> {
    if !value.is_finite() || value.abs() > 1.0 {
        return Err(CalibrationError::DomainError { angle, value });
    }
    Ok(value)
}

fn asin_degrees(value: f64) -> Option<f64> {
    if value.is_finite() && value.abs() <= 1.0 {
        Some(value.asin().to_degrees())
    } else {
        None
    }
}

/// Compute the coordinate system transform. Pure; no hardware is touched.
pub fn compute_transform(
    input: &CalibrationInput,
) -> Result<CoordinateSystemTransform, CalibrationError> {
    for (i, dir) in input.motor_directions.iter().enumerate() {
        check_direction(&format!("mtr{}_dir", i + 1), *dir)?;
    }
    for (name, sign) in ["Sx_dir", "Sy_dir", "Sz_dir"].iter().zip(input.mount) {
        check_direction(name, sign)?;
    }
    let (dx, dy) = input.spacing;
    let [f1_x, f1_y, f1_z] = input.fiducial_1;
    let [f2_x, f2_y, f2_z] = input.fiducial_2;
    spdlog::debug!("Fiducial 1 ({f1_x}, {f1_y}, {f1_z}), fiducial 2 ({f2_x}, {f2_y}, {f2_z})");

    // Roll: two independent estimates, one from each fiducial
    let sz1 = -f1_y / dx;
    let sz2 = f2_x / dy;
    let sz = checked_sine(RotationAngle::Roll, input.mount[2] * (sz1 + sz2) / 2.0)?;
    let sy = checked_sine(RotationAngle::Yaw, input.mount[1] * f1_z / dx)?;
    let sx = checked_sine(RotationAngle::Pitch, input.mount[0] * f2_z / dy)?;
    let cz = (1.0 - sz * sz).sqrt();
    let cy = (1.0 - sy * sy).sqrt();
    let cx = (1.0 - sx * sx).sqrt();
    for (name, s, c) in [("Sz", sz, cz), ("Sy", sy, cy), ("Sx", sx, cx)] {
        spdlog::info!(
            "{name}: sin {s:.4} ({:.4} deg), cos {c:.4}",
            s.asin().to_degrees()
        );
    }

    let pitch = arr2(&[[1.0, 0.0, 0.0], [0.0, cx, -sx], [0.0, sx, cx]]);
    let yaw = arr2(&[[cy, 0.0, sy], [0.0, 1.0, 0.0], [-sy, 0.0, cy]]);
    let roll = arr2(&[[cz, -sz, 0.0], [sz, cz, 0.0], [0.0, 0.0, 1.0]]);
    let rotation = pitch.dot(&yaw).dot(&roll);

    let mut factors = Array2::<f64>::zeros((3, 3));
    for i in 0..3 {
        for j in 0..3 {
            factors[[i, j]] = rotation[[i, j]] * input.motor_directions[j] * input.scale[j];
        }
    }

    let mut residuals = [0.0; 3];
    for (i, residual) in residuals.iter_mut().enumerate() {
        *residual = factors.row(i).iter().map(|f| f * f).sum::<f64>().sqrt() / input.scale[i];
    }

    let calculated_skew = match (asin_degrees(sz1), asin_degrees(sz2)) {
        (Some(s1), Some(s2)) => Some(s1 - s2),
        _ => None,
    };
    let rotation_degrees = ((sz1 + sz2) / 2.0).asin().to_degrees();

    let half_skew = (input.skew_degrees / 2.0).to_radians();
    let (sin_d, cos_d) = half_skew.sin_cos();
    for i in 0..2 {
        let x = factors[[i, 0]];
        let y = factors[[i, 1]];
        factors[[i, 0]] = x * cos_d + y * sin_d;
        factors[[i, 1]] = x * sin_d + y * cos_d;
    }

    Ok(CoordinateSystemTransform {
        factors,
        sines: [sx, sy, sz],
        cosines: [cx, cy, cz],
        residuals,
        calculated_skew,
        rotation_degrees,
    })
}

/// Record the current stage position as fiducial `point` (1 or 2)
pub fn fiducial<H: HardwareIo>(
    hardware: &mut H,
    config: &Config,
    point: u8,
) -> Result<(), CalibrationError> {
    if !(1..=2).contains(&point) {
        return Err(CalibrationError::InvalidFiducialPoint(point));
    }
    let directions = scrape_mtr_directions(&config.motor_direction_file())?;
    let mut readback = [0.0; 3];
    let mut raw = [0.0; 3];
    for (i, axis) in Axis::ALL.iter().enumerate() {
        readback[i] = hardware.read_f64(ControlPoint::StageReadback(*axis))?;
        raw[i] = hardware.read_f64(ControlPoint::StageRawReadback(*axis))?;
    }
    let path = config.fiducial_file(point);
    spdlog::info!("Writing fiducial file {}", path.display());
    write_fiducial_file(&path, readback, raw, directions)
}

/// Calibrate the coordinate system of the stage for the current chip and send it to the
/// motion controller.
///
/// Every input is read and the transform computed before the first command is sent, so a failed
/// calibration leaves the hardware untouched.
pub fn cs_maker<H: HardwareIo>(
    hardware: &mut H,
    config: &Config,
    chip_type: ChipType,
) -> Result<CoordinateSystemTransform, CalibrationError> {
    let (dx, dy) = chip_type.fiducial_spacing();
    spdlog::info!("Chip type is {chip_type} with fiducial spacing ({dx}, {dy})");
    let input = CalibrationInput::load(config, chip_type)?;
    let transform = compute_transform(&input)?;

    spdlog::info!("Skew being used is: {:.4}", input.skew_degrees);
    spdlog::info!(
        "Calculated rotation from current fiducials is: {:.4}",
        transform.rotation_degrees
    );
    match transform.calculated_skew {
        Some(skew) => spdlog::info!(
            "Calculated skew from current fiducials is: {skew:.4} (diagnostic only, sign is unreliable)"
        ),
        None => spdlog::info!("Calculated skew is undefined for the current fiducials"),
    }
    let commands = transform.commands();
    for command in commands.iter() {
        spdlog::info!("{command}");
    }
    spdlog::info!(
        "Row norms over scale: {:.4} {:.4} {:.4}",
        transform.residuals[0],
        transform.residuals[1],
        transform.residuals[2]
    );
    if !transform.residuals_within(config.residual_tolerance) {
        spdlog::warn!(
            "Coordinate system row norms deviate from 1 by more than {}: {:?}",
            config.residual_tolerance,
            transform.residuals
        );
    }

    spdlog::info!("Sending coordinate system, long wait, please be patient");
    hardware.send_raw_motion_command(ORIGIN)?;
    hardware.settle(Duration::from_secs_f64(2.5));
    hardware.send_raw_motion_command(SELECT_CS)?;
    for command in commands.iter() {
        hardware.send_raw_motion_command(command)?;
    }
    hardware.send_raw_motion_command(ORIGIN)?;
    hardware.settle(Duration::from_secs_f64(0.1));
    hardware.send_raw_motion_command(HOME_ALL)?;
    hardware.settle(Duration::from_secs_f64(0.1));
    if chip_type == ChipType::Oxford {
        hardware.send_raw_motion_command("!x0.4y0.4")?;
        hardware.settle(Duration::from_secs_f64(0.1));
    }
    hardware.send_raw_motion_command(HOME_ALL)?;
    spdlog::info!("Coordinate system done");
    Ok(transform)
}

/// Restore the identity coordinate system
pub fn cs_reset<H: HardwareIo>(hardware: &mut H) -> Result<(), CalibrationError> {
    spdlog::info!("Resetting coordinate system:\n{}", RESET_CS.join("\n"));
    hardware.send_raw_motion_command(SELECT_CS)?;
    for command in RESET_CS {
        hardware.settle(Duration::from_secs_f64(0.5));
        hardware.send_raw_motion_command(command)?;
    }
    Ok(())
}
