use std::fmt::Display;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::chip_format::ChipType;
use super::error::MotionError;
use super::hardware::{Axis, ControlPoint, HardwareIo, PvValue};

/// Granularity at which a burn dwell checks for cancellation
const BURN_SLICE: Duration = Duration::from_millis(100);

/// Every position or action reachable through `moveto`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamedPosition {
    Origin,
    F1,
    F2,
    Zero,
    Yag,
    LoadPosition,
    CollectPosition,
    MicrodropPosition,
    LightIn,
    LightOut,
    FlipperIn,
    FlipperOut,
    Laser1On,
    Laser1Off,
    Laser2On,
    Laser2Off,
    Laser1Burn,
    Laser2Burn,
}

impl NamedPosition {
    pub const ALL: [NamedPosition; 18] = [
        Self::Origin,
        Self::F1,
        Self::F2,
        Self::Zero,
        Self::Yag,
        Self::LoadPosition,
        Self::CollectPosition,
        Self::MicrodropPosition,
        Self::LightIn,
        Self::LightOut,
        Self::FlipperIn,
        Self::FlipperOut,
        Self::Laser1On,
        Self::Laser1Off,
        Self::Laser2On,
        Self::Laser2Off,
        Self::Laser1Burn,
        Self::Laser2Burn,
    ];

    fn name(&self) -> &'static str {
        match self {
            Self::Origin => "origin",
            Self::F1 => "f1",
            Self::F2 => "f2",
            Self::Zero => "zero",
            Self::Yag => "yag",
            Self::LoadPosition => "load_position",
            Self::CollectPosition => "collect_position",
            Self::MicrodropPosition => "microdrop_position",
            Self::LightIn => "lightin",
            Self::LightOut => "lightout",
            Self::FlipperIn => "flipperin",
            Self::FlipperOut => "flipperout",
            Self::Laser1On => "laser1on",
            Self::Laser1Off => "laser1off",
            Self::Laser2On => "laser2on",
            Self::Laser2Off => "laser2off",
            Self::Laser1Burn => "laser1burn",
            Self::Laser2Burn => "laser2burn",
        }
    }

    /// Whether the position depends on the chip geometry
    pub fn is_chip_relative(&self) -> bool {
        matches!(self, Self::Origin | Self::F1 | Self::F2)
    }
}

impl Display for NamedPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for NamedPosition {
    type Err = MotionError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|p| p.name() == s.trim())
            .copied()
            .ok_or_else(|| MotionError::UnknownPosition(s.to_string()))
    }
}

/// Shared flag used to stop a long running action (a laser burn) from another thread
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// The pump lasers, each gated by a shutter on the motion controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Laser {
    One,
    Two,
}

impl Laser {
    pub fn open_command(&self) -> &'static str {
        match self {
            Self::One => " M712=1 M711=1",
            Self::Two => " M812=1 M811=1",
        }
    }

    pub fn close_command(&self) -> &'static str {
        match self {
            Self::One => " M712=0 M711=1",
            Self::Two => " M812=0 M811=1",
        }
    }

    /// Register holding the burn dwell in seconds
    pub fn dwell_register(&self) -> ControlPoint {
        match self {
            Self::One => ControlPoint::Register(103),
            Self::Two => ControlPoint::Register(109),
        }
    }
}

/// How a burn ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BurnOutcome {
    Completed,
    Cancelled,
}

/// Open the shutter of `laser` for the dwell stored in its register, then close it.
///
/// The dwell is waited out in short slices so that `cancel` can cut it short. The shutter is
/// closed whether the dwell completed, was cancelled, or opening failed.
pub fn burn<H: HardwareIo>(
    hardware: &mut H,
    laser: Laser,
    cancel: &CancelToken,
) -> Result<BurnOutcome, MotionError> {
    let seconds = hardware.read_f64(laser.dwell_register())?;
    let dwell = if seconds > 0.0 {
        Duration::try_from_secs_f64(seconds).map_err(|_| MotionError::InvalidDwell(seconds))?
    } else {
        Duration::ZERO
    };
    spdlog::info!("Laser {laser:?} on, burn time is {} s", dwell.as_secs_f64());

    if let Err(e) = hardware.send_raw_motion_command(laser.open_command()) {
        hardware.send_raw_motion_command(laser.close_command())?;
        return Err(e.into());
    }

    let mut remaining = dwell;
    let mut outcome = BurnOutcome::Completed;
    while !remaining.is_zero() {
        if cancel.is_cancelled() {
            outcome = BurnOutcome::Cancelled;
            break;
        }
        let step = remaining.min(BURN_SLICE);
        hardware.settle(step);
        remaining -= step;
    }

    hardware.send_raw_motion_command(laser.close_command())?;
    match outcome {
        BurnOutcome::Completed => spdlog::info!("Laser {laser:?} off"),
        BurnOutcome::Cancelled => spdlog::warn!(
            "Laser {laser:?} burn cancelled with {:.1} s remaining, shutter closed",
            remaining.as_secs_f64()
        ),
    }
    Ok(outcome)
}

fn set_stage<H: HardwareIo>(hardware: &mut H, axis: Axis, value: f64) -> Result<(), MotionError> {
    hardware.write(ControlPoint::StageSetpoint(axis), PvValue::Float(value))?;
    Ok(())
}

/// Move to a named position.
///
/// Chip-relative positions (`origin`, `f1`, `f2`) need the chip type; when it is unknown the move
/// is logged and skipped.
pub fn move_to<H: HardwareIo>(
    hardware: &mut H,
    position: NamedPosition,
    chip_type: Option<ChipType>,
    cancel: &CancelToken,
) -> Result<(), MotionError> {
    spdlog::info!("Moving to {position}");
    match position {
        NamedPosition::Origin | NamedPosition::F1 | NamedPosition::F2 => {
            let Some(chip) = chip_type else {
                spdlog::warn!("Unknown chip_type move to {position}, ignoring");
                return Ok(());
            };
            let (dx, dy) = chip.fiducial_spacing();
            let (x, y) = match position {
                NamedPosition::F1 => (dx, 0.0),
                NamedPosition::F2 => (0.0, dy),
                _ => (0.0, 0.0),
            };
            spdlog::info!("{chip} chip move to ({x}, {y})");
            set_stage(hardware, Axis::X, x)?;
            set_stage(hardware, Axis::Y, y)?;
        }
        NamedPosition::Zero => hardware.send_raw_motion_command("!x0y0z0")?,
        NamedPosition::Yag => {
            for axis in Axis::ALL {
                set_stage(hardware, axis, 1.0)?;
            }
        }
        NamedPosition::LoadPosition => {
            hardware.write(ControlPoint::BeamstopSelect, "Robot".into())?;
            hardware.write(ControlPoint::BacklightSelect, "Out".into())?;
            hardware.write(ControlPoint::DetectorZ, PvValue::Int(1300))?;
        }
        NamedPosition::CollectPosition => {
            hardware.write(ControlPoint::Filter, PvValue::Int(20))?;
            for axis in Axis::ALL {
                set_stage(hardware, axis, 0.0)?;
            }
            hardware.write(ControlPoint::BeamstopSelect, "Data Collection".into())?;
            hardware.write(ControlPoint::BacklightSelect, "In".into())?;
        }
        NamedPosition::MicrodropPosition => {
            set_stage(hardware, Axis::X, 6.0)?;
            set_stage(hardware, Axis::Y, -7.8)?;
            set_stage(hardware, Axis::Z, 0.0)?;
        }
        NamedPosition::LightIn => hardware.write(ControlPoint::Filter, PvValue::Int(24))?,
        NamedPosition::LightOut => hardware.write(ControlPoint::Filter, PvValue::Int(-24))?,
        NamedPosition::FlipperIn => hardware.send_raw_motion_command("M512=0 M511=1")?,
        NamedPosition::FlipperOut => hardware.send_raw_motion_command(" M512=1 M511=1")?,
        NamedPosition::Laser1On => hardware.send_raw_motion_command(Laser::One.open_command())?,
        NamedPosition::Laser1Off => hardware.send_raw_motion_command(Laser::One.close_command())?,
        NamedPosition::Laser2On => hardware.send_raw_motion_command(Laser::Two.open_command())?,
        NamedPosition::Laser2Off => hardware.send_raw_motion_command(Laser::Two.close_command())?,
        NamedPosition::Laser1Burn => {
            burn(hardware, Laser::One, cancel)?;
        }
        NamedPosition::Laser2Burn => {
            burn(hardware, Laser::Two, cancel)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::{HardwareEvent, SimulatedHardware};

    fn sim() -> SimulatedHardware {
        SimulatedHardware::new(Duration::from_secs(1))
    }

    #[test]
    fn test_parse_positions() {
        for position in NamedPosition::ALL {
            assert_eq!(NamedPosition::from_str(&position.to_string()).unwrap(), position);
        }
        match NamedPosition::from_str("home") {
            Err(MotionError::UnknownPosition(name)) => assert_eq!(name, "home"),
            _ => panic!(),
        }
    }

    #[test]
    fn test_origin_for_every_chip() {
        for chip in ChipType::ALL {
            let mut hw = sim();
            hw.preset(ControlPoint::StageSetpoint(Axis::X), 3.0);
            move_to(&mut hw, NamedPosition::Origin, Some(chip), &CancelToken::new()).unwrap();
            assert_eq!(
                hw.writes(),
                vec![
                    (ControlPoint::StageSetpoint(Axis::X), &PvValue::Float(0.0)),
                    (ControlPoint::StageSetpoint(Axis::Y), &PvValue::Float(0.0)),
                ]
            );
        }
    }

    #[test]
    fn test_fiducial_positions() {
        let mut hw = sim();
        move_to(&mut hw, NamedPosition::F1, Some(ChipType::Toronto), &CancelToken::new()).unwrap();
        assert_eq!(hw.read_f64(ControlPoint::StageReadback(Axis::X)).unwrap(), 18.975);
        move_to(&mut hw, NamedPosition::F2, Some(ChipType::Toronto), &CancelToken::new()).unwrap();
        assert_eq!(hw.read_f64(ControlPoint::StageReadback(Axis::X)).unwrap(), 0.0);
        assert_eq!(hw.read_f64(ControlPoint::StageReadback(Axis::Y)).unwrap(), 21.375);
    }

    #[test]
    fn test_unknown_chip_is_noop() {
        let mut hw = sim();
        move_to(&mut hw, NamedPosition::F1, None, &CancelToken::new()).unwrap();
        assert!(hw.events().is_empty());
    }

    #[test]
    fn test_presets() {
        let mut hw = sim();
        let cancel = CancelToken::new();
        move_to(&mut hw, NamedPosition::Zero, None, &cancel).unwrap();
        move_to(&mut hw, NamedPosition::FlipperOut, None, &cancel).unwrap();
        move_to(&mut hw, NamedPosition::Laser2On, None, &cancel).unwrap();
        assert_eq!(hw.commands(), vec!["!x0y0z0", " M512=1 M511=1", " M812=1 M811=1"]);

        move_to(&mut hw, NamedPosition::MicrodropPosition, None, &cancel).unwrap();
        assert_eq!(hw.read_f64(ControlPoint::StageReadback(Axis::Y)).unwrap(), -7.8);
        move_to(&mut hw, NamedPosition::LoadPosition, None, &cancel).unwrap();
        assert_eq!(hw.read_string(ControlPoint::BeamstopSelect).unwrap(), "Robot");
        assert_eq!(hw.read_i64(ControlPoint::DetectorZ).unwrap(), 1300);
        move_to(&mut hw, NamedPosition::LightOut, None, &cancel).unwrap();
        assert_eq!(hw.read_i64(ControlPoint::Filter).unwrap(), -24);
    }

    #[test]
    fn test_burn_fractional_dwell() {
        let mut hw = sim();
        hw.preset(ControlPoint::Register(103), 0.25);
        let outcome = burn(&mut hw, Laser::One, &CancelToken::new()).unwrap();
        assert_eq!(outcome, BurnOutcome::Completed);
        assert_eq!(hw.commands(), vec![" M712=1 M711=1", " M712=0 M711=1"]);
        let total: Duration = hw.settles().iter().sum();
        assert_eq!(total, Duration::from_millis(250));
        assert!(matches!(hw.events().last(), Some(HardwareEvent::Command(c)) if c == " M712=0 M711=1"));
    }

    #[test]
    fn test_cancelled_burn_closes_shutter() {
        let mut hw = sim();
        hw.preset(ControlPoint::Register(109), 30.0);
        let cancel = CancelToken::new();
        cancel.cancel();
        let outcome = burn(&mut hw, Laser::Two, &cancel).unwrap();
        assert_eq!(outcome, BurnOutcome::Cancelled);
        assert!(hw.settles().is_empty());
        assert_eq!(hw.commands(), vec![" M812=1 M811=1", " M812=0 M811=1"]);
    }

    #[test]
    fn test_unrepresentable_dwell_is_an_error() {
        for seconds in [1.0e20, f64::INFINITY] {
            let mut hw = sim();
            hw.preset(ControlPoint::Register(103), seconds);
            match burn(&mut hw, Laser::One, &CancelToken::new()) {
                Err(MotionError::InvalidDwell(value)) => assert_eq!(value, seconds),
                other => panic!("expected an invalid dwell, got {other:?}"),
            }
            assert!(hw.commands().is_empty());
        }

        let mut hw = sim();
        hw.preset(ControlPoint::Register(109), f64::NAN);
        assert_eq!(
            burn(&mut hw, Laser::Two, &CancelToken::new()).unwrap(),
            BurnOutcome::Completed
        );
        assert!(hw.settles().is_empty());
    }

    #[test]
    fn test_failed_open_still_closes() {
        let mut hw = sim();
        hw.preset(ControlPoint::Register(103), 1.0);
        hw.fail_on_prefix(" M712=1");
        assert!(matches!(
            burn(&mut hw, Laser::One, &CancelToken::new()),
            Err(MotionError::HardwareError(_))
        ));
        assert_eq!(hw.commands(), vec![" M712=0 M711=1"]);
    }
}
