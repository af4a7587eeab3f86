//! The narrow contract between the chip control logic and the beamline hardware.
//!
//! Everything that touches a motor, a register or the trigger box goes through [`HardwareIo`].
//! Process-variable transport lives outside of this crate; the [`SimulatedHardware`] adapter is
//! an in-memory stand-in used for dry runs and tests. It records every command and settle so
//! that sequences can be checked exactly.
use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use super::error::HardwareError;

/// Number of motor counts per mm used by the simulated raw readbacks
const SIM_COUNTS_PER_MM: f64 = 10000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    fn name(&self) -> &'static str {
        match self {
            Self::X => "x",
            Self::Y => "y",
            Self::Z => "z",
        }
    }
}

/// A named value on the hardware side: a stage field, a general purpose register or one of the
/// beamline selectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlPoint {
    StageSetpoint(Axis),
    StageReadback(Axis),
    StageRawReadback(Axis),
    StageVelocity(Axis),
    StageMaxVelocity(Axis),
    StageAcceleration(Axis),
    StageHighLimit(Axis),
    StageLowLimit(Axis),
    /// General purpose register `GPn` of the motion controller IOC
    Register(u16),
    Filter,
    Filepath,
    ChipName,
    DetectorDistance,
    ExposureTime,
    BeamstopSelect,
    BacklightSelect,
    DetectorZ,
}

impl Display for ControlPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StageSetpoint(a) => write!(f, "stage_{}", a.name()),
            Self::StageReadback(a) => write!(f, "stage_{}.RBV", a.name()),
            Self::StageRawReadback(a) => write!(f, "stage_{}.RRBV", a.name()),
            Self::StageVelocity(a) => write!(f, "stage_{}.VELO", a.name()),
            Self::StageMaxVelocity(a) => write!(f, "stage_{}.VMAX", a.name()),
            Self::StageAcceleration(a) => write!(f, "stage_{}.ACCL", a.name()),
            Self::StageHighLimit(a) => write!(f, "stage_{}.HLM", a.name()),
            Self::StageLowLimit(a) => write!(f, "stage_{}.LLM", a.name()),
            Self::Register(n) => write!(f, "gp{n}"),
            Self::Filter => write!(f, "filter"),
            Self::Filepath => write!(f, "filepath"),
            Self::ChipName => write!(f, "chip_name"),
            Self::DetectorDistance => write!(f, "dcdetdist"),
            Self::ExposureTime => write!(f, "exptime"),
            Self::BeamstopSelect => write!(f, "beamstop_select"),
            Self::BacklightSelect => write!(f, "backlight_select"),
            Self::DetectorZ => write!(f, "det_z"),
        }
    }
}

impl FromStr for ControlPoint {
    type Err = HardwareError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || HardwareError::UnknownControlPoint(s.to_string());
        let lowered = s.trim().to_lowercase();
        if let Some(n) = lowered.strip_prefix("gp") {
            return n.parse::<u16>().map(Self::Register).map_err(|_| unknown());
        }
        if let Some(rest) = lowered.strip_prefix("stage_") {
            let (axis, field) = rest.split_once('.').unwrap_or((rest, ""));
            let axis = match axis {
                "x" => Axis::X,
                "y" => Axis::Y,
                "z" => Axis::Z,
                _ => return Err(unknown()),
            };
            return match field {
                "" => Ok(Self::StageSetpoint(axis)),
                "rbv" => Ok(Self::StageReadback(axis)),
                "rrbv" => Ok(Self::StageRawReadback(axis)),
                "velo" => Ok(Self::StageVelocity(axis)),
                "vmax" => Ok(Self::StageMaxVelocity(axis)),
                "accl" => Ok(Self::StageAcceleration(axis)),
                "hlm" => Ok(Self::StageHighLimit(axis)),
                "llm" => Ok(Self::StageLowLimit(axis)),
                _ => Err(unknown()),
            };
        }
        match lowered.as_str() {
            "filter" => Ok(Self::Filter),
            "filepath" => Ok(Self::Filepath),
            "chip_name" => Ok(Self::ChipName),
            "dcdetdist" => Ok(Self::DetectorDistance),
            "exptime" => Ok(Self::ExposureTime),
            "beamstop_select" => Ok(Self::BeamstopSelect),
            "backlight_select" => Ok(Self::BacklightSelect),
            "det_z" => Ok(Self::DetectorZ),
            _ => Err(unknown()),
        }
    }
}

/// A value held by a control point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PvValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl PvValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            Self::Float(_) => None,
            Self::Text(s) => {
                let s = s.trim();
                s.parse::<i64>().ok().or_else(|| {
                    s.parse::<f64>()
                        .ok()
                        .filter(|f| f.fract() == 0.0 && f.is_finite())
                        .map(|f| f as i64)
                })
            }
        }
    }
}

impl Display for PvValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for PvValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for PvValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for PvValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for PvValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// The hardware contract. Every call is synchronous and bounded by the adapter's timeout; a
/// timeout is reported as [`HardwareError::Timeout`] and is never retried by the caller.
pub trait HardwareIo {
    fn read(&mut self, point: ControlPoint) -> Result<PvValue, HardwareError>;

    fn write(&mut self, point: ControlPoint, value: PvValue) -> Result<(), HardwareError>;

    /// Send a raw command string to the motion controller (e.g. `!x0y0z0`)
    fn send_raw_motion_command(&mut self, command: &str) -> Result<(), HardwareError>;

    /// Arm the trigger box
    fn arm(&mut self) -> Result<(), HardwareError>;

    /// Disarm the trigger box
    fn disarm(&mut self) -> Result<(), HardwareError>;

    /// Block for the given duration, letting the hardware settle
    fn settle(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }

    fn read_f64(&mut self, point: ControlPoint) -> Result<f64, HardwareError> {
        let value = self.read(point)?;
        value.as_f64().ok_or_else(|| HardwareError::BadValue {
            point: point.to_string(),
            value: value.to_string(),
            expected: "a number",
        })
    }

    fn read_i64(&mut self, point: ControlPoint) -> Result<i64, HardwareError> {
        let value = self.read(point)?;
        value.as_i64().ok_or_else(|| HardwareError::BadValue {
            point: point.to_string(),
            value: value.to_string(),
            expected: "an integer",
        })
    }

    fn read_string(&mut self, point: ControlPoint) -> Result<String, HardwareError> {
        Ok(self.read(point)?.to_string())
    }
}

/// One observable interaction with the simulated hardware
#[derive(Debug, Clone, PartialEq)]
pub enum HardwareEvent {
    Write(ControlPoint, PvValue),
    Command(String),
    Settle(Duration),
    Arm,
    Disarm,
}

/// A write performed by the simulation after a given number of motion commands. Used to emulate
/// an operator pressing abort part way through a sequence.
#[derive(Debug, Clone)]
struct ScheduledWrite {
    after_commands: usize,
    point: ControlPoint,
    value: PvValue,
}

/// In-memory hardware. Stage setpoints update their readbacks, motion commands of the form
/// `!x..y..z..` move the stage, and the register state can be persisted to YAML so that a
/// series of CLI invocations behaves like one session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulatedHardware {
    values: FxHashMap<String, PvValue>,
    armed: bool,
    #[serde(skip)]
    events: Vec<HardwareEvent>,
    #[serde(skip)]
    timeout: Duration,
    #[serde(skip)]
    fail_prefix: Option<String>,
    #[serde(skip)]
    scheduled: Vec<ScheduledWrite>,
}

impl SimulatedHardware {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Default::default()
        }
    }

    /// Load the persisted state, or start fresh if the file does not exist yet
    pub fn load_or_new(path: &Path, timeout: Duration) -> Result<Self, HardwareError> {
        if !path.exists() {
            return Ok(Self::new(timeout));
        }
        let yaml_str = std::fs::read_to_string(path)?;
        let mut hardware = serde_yaml::from_str::<Self>(&yaml_str)?;
        hardware.timeout = timeout;
        Ok(hardware)
    }

    pub fn save(&self, path: &Path) -> Result<(), HardwareError> {
        #[derive(Serialize)]
        struct Sorted<'a> {
            values: BTreeMap<&'a String, &'a PvValue>,
            armed: bool,
        }
        let sorted = Sorted {
            values: self.values.iter().collect(),
            armed: self.armed,
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, serde_yaml::to_string(&sorted)?)?;
        Ok(())
    }

    /// Make every write or command whose name starts with `prefix` time out
    pub fn fail_on_prefix(&mut self, prefix: &str) {
        self.fail_prefix = Some(prefix.to_string());
    }

    /// Perform `point = value` once `after_commands` motion commands have been sent
    pub fn schedule_write(&mut self, after_commands: usize, point: ControlPoint, value: PvValue) {
        self.scheduled.push(ScheduledWrite {
            after_commands,
            point,
            value,
        });
    }

    /// Set a value without recording an event
    pub fn preset(&mut self, point: ControlPoint, value: impl Into<PvValue>) {
        self.store(point, value.into());
    }

    pub fn value(&self, point: ControlPoint) -> Option<&PvValue> {
        self.values.get(&point.to_string())
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn events(&self) -> &[HardwareEvent] {
        &self.events
    }

    /// All raw motion commands sent, in order
    pub fn commands(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|e| match e {
                HardwareEvent::Command(c) => Some(c.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn settles(&self) -> Vec<Duration> {
        self.events
            .iter()
            .filter_map(|e| match e {
                HardwareEvent::Settle(d) => Some(*d),
                _ => None,
            })
            .collect()
    }

    pub fn writes(&self) -> Vec<(ControlPoint, &PvValue)> {
        self.events
            .iter()
            .filter_map(|e| match e {
                HardwareEvent::Write(p, v) => Some((*p, v)),
                _ => None,
            })
            .collect()
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    fn check_timeout(&self, operation: &str) -> Result<(), HardwareError> {
        match &self.fail_prefix {
            Some(prefix) if operation.starts_with(prefix.as_str()) => Err(HardwareError::Timeout {
                operation: operation.to_string(),
                timeout: self.timeout,
            }),
            _ => Ok(()),
        }
    }

    fn store(&mut self, point: ControlPoint, value: PvValue) {
        if let ControlPoint::StageSetpoint(axis) = point {
            if let Some(position) = value.as_f64() {
                self.move_axis(axis, position);
                return;
            }
        }
        self.values.insert(point.to_string(), value);
    }

    fn move_axis(&mut self, axis: Axis, position: f64) {
        self.values.insert(
            ControlPoint::StageSetpoint(axis).to_string(),
            PvValue::Float(position),
        );
        self.values.insert(
            ControlPoint::StageReadback(axis).to_string(),
            PvValue::Float(position),
        );
        self.values.insert(
            ControlPoint::StageRawReadback(axis).to_string(),
            PvValue::Int((position * SIM_COUNTS_PER_MM).round() as i64),
        );
    }

    /// Interpret `!x1.0y-2z0` style jog commands
    fn apply_motion_command(&mut self, command: &str) {
        let Some(body) = command.trim().strip_prefix('!') else {
            return;
        };
        let mut current: Option<(Axis, String)> = None;
        let mut moves = Vec::new();
        for c in body.chars() {
            let axis = match c {
                'x' | 'X' => Some(Axis::X),
                'y' | 'Y' => Some(Axis::Y),
                'z' | 'Z' => Some(Axis::Z),
                _ => None,
            };
            if let Some(a) = axis {
                if let Some(done) = current.take() {
                    moves.push(done);
                }
                current = Some((a, String::new()));
            } else if let Some((_, digits)) = current.as_mut() {
                digits.push(c);
            } else {
                return;
            }
        }
        if let Some(done) = current.take() {
            moves.push(done);
        }
        for (axis, digits) in moves {
            if let Ok(position) = digits.parse::<f64>() {
                self.move_axis(axis, position);
            }
        }
    }

    fn run_scheduled(&mut self) {
        let sent = self
            .events
            .iter()
            .filter(|e| matches!(e, HardwareEvent::Command(_)))
            .count();
        let (due, pending): (Vec<_>, Vec<_>) = self
            .scheduled
            .drain(..)
            .partition(|s| s.after_commands <= sent);
        self.scheduled = pending;
        for write in due {
            self.store(write.point, write.value);
        }
    }
}

impl HardwareIo for SimulatedHardware {
    fn read(&mut self, point: ControlPoint) -> Result<PvValue, HardwareError> {
        Ok(self
            .values
            .get(&point.to_string())
            .cloned()
            .unwrap_or(PvValue::Int(0)))
    }

    fn write(&mut self, point: ControlPoint, value: PvValue) -> Result<(), HardwareError> {
        self.check_timeout(&point.to_string())?;
        self.events.push(HardwareEvent::Write(point, value.clone()));
        self.store(point, value);
        Ok(())
    }

    fn send_raw_motion_command(&mut self, command: &str) -> Result<(), HardwareError> {
        self.check_timeout(command)?;
        self.events.push(HardwareEvent::Command(command.to_string()));
        self.apply_motion_command(command);
        self.run_scheduled();
        Ok(())
    }

    fn arm(&mut self) -> Result<(), HardwareError> {
        self.check_timeout("arm")?;
        spdlog::info!("Trigger box armed");
        self.events.push(HardwareEvent::Arm);
        self.armed = true;
        Ok(())
    }

    fn disarm(&mut self) -> Result<(), HardwareError> {
        self.check_timeout("disarm")?;
        spdlog::info!("Trigger box disarmed");
        self.events.push(HardwareEvent::Disarm);
        self.armed = false;
        Ok(())
    }

    fn settle(&mut self, duration: Duration) {
        self.events.push(HardwareEvent::Settle(duration));
    }
}
