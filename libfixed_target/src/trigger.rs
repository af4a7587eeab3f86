use super::error::HardwareError;
use super::hardware::HardwareIo;
use super::parameters::DetectorType;

/// Extra time added to each pulse step so that no trigger is missed
const PULSE_STEP_BUFFER: f64 = 0.0001;
/// Drop at the end of each Eiger pulse so that the falling edge ends the exposure
const EIGER_PULSE_DROP: f64 = 0.0001;
/// Gap between extruder gates in pump-probe mode
const PUMP_PROBE_BUFFER: f64 = 0.01;

/// Position-compare settings of the trigger box for a fixed target collection. One gate is
/// opened per window and each gate produces `pulse_max` detector triggers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerSettings {
    pub det_type: DetectorType,
    pub num_gates: usize,
    pub pulse_start: f64,
    pub pulse_step: f64,
    pub pulse_width: f64,
    pub pulse_max: i64,
}

impl TriggerSettings {
    /// The Pilatus only needs a rising edge, while the Eiger collects for as long as the pulse
    /// is high.
    pub fn for_fixed_target(
        det_type: DetectorType,
        num_gates: usize,
        n_exposures: i64,
        exptime: f64,
    ) -> Self {
        let pulse_width = match det_type {
            DetectorType::Eiger => exptime - EIGER_PULSE_DROP,
            DetectorType::Pilatus => exptime / 2.0,
        };
        Self {
            det_type,
            num_gates,
            pulse_start: 0.0,
            pulse_step: exptime + PULSE_STEP_BUFFER,
            pulse_width,
            pulse_max: n_exposures,
        }
    }
}

/// Gate settings for an extruder pump-probe collection
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtruderGate {
    pub gate_width: f64,
    pub gate_step: f64,
}

impl ExtruderGate {
    pub fn new(exptime: f64, pump_exp: f64, pump_delay: f64) -> Self {
        let gate_width = pump_exp + pump_delay + exptime;
        Self {
            gate_width,
            gate_step: gate_width + PUMP_PROBE_BUFFER,
        }
    }
}

/// Arm the trigger box for a collection with the given settings
pub fn start_collection<H: HardwareIo>(
    hardware: &mut H,
    settings: &TriggerSettings,
) -> Result<(), HardwareError> {
    spdlog::info!(
        "Trigger box set up for {}: {} gates, pulse step {:.4} width {:.4}, {} pulses per gate",
        settings.det_type,
        settings.num_gates,
        settings.pulse_step,
        settings.pulse_width,
        settings.pulse_max
    );
    hardware.arm()?;
    spdlog::info!("Arming trigger box");
    Ok(())
}

pub fn end_collection<H: HardwareIo>(hardware: &mut H) -> Result<(), HardwareError> {
    hardware.disarm()?;
    spdlog::info!("Disarming trigger box");
    Ok(())
}
