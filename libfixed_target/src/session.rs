use bit_set::BitSet;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::mpsc::Sender;

use super::block_map;
use super::calibration::{self, CoordinateSystemTransform};
use super::chip_format::{get_format, ChipType};
use super::config::Config;
use super::error::{CalibrationError, ProcessorError};
use super::hardware::HardwareIo;
use super::motion::{self, CancelToken, NamedPosition};
use super::parameters::RunParameters;
use super::process::{self, BlockCheckOutcome};
use super::status::OperationStatus;
use super::trigger::{self, TriggerSettings};

/// Everything one chip manager invocation works with: the configuration, the hardware and the
/// cancellation token shared with whoever may stop a burn.
///
/// The chip type is never cached; it is read from the chip type register whenever an operation
/// needs it so that changes made from the beamline screens are picked up.
pub struct Session<H: HardwareIo> {
    pub config: Config,
    pub hardware: H,
    cancel: CancelToken,
}

impl<H: HardwareIo> Session<H> {
    pub fn new(config: Config, hardware: H) -> Self {
        Self {
            config,
            hardware,
            cancel: CancelToken::new(),
        }
    }

    /// Token that cancels a running burn
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Give back the hardware, e.g. to persist a simulated state
    pub fn into_hardware(self) -> H {
        self.hardware
    }

    pub fn chip_type(&mut self) -> Result<Option<ChipType>, ProcessorError> {
        Ok(process::current_chip_type(&mut self.hardware)?)
    }

    fn require_chip_type(&mut self) -> Result<ChipType, ProcessorError> {
        self.chip_type()?.ok_or(ProcessorError::UnknownChipType)
    }

    pub fn initialise(&mut self) -> Result<(), ProcessorError> {
        process::initialise(&mut self.hardware, &self.config)
    }

    /// Move to the named position, see [`NamedPosition`]
    pub fn move_to(&mut self, name: &str) -> Result<(), ProcessorError> {
        let position = NamedPosition::from_str(name)?;
        let chip_type = if position.is_chip_relative() {
            self.chip_type()?
        } else {
            None
        };
        self.cancel.reset();
        motion::move_to(&mut self.hardware, position, chip_type, &self.cancel)?;
        Ok(())
    }

    pub fn fiducial(&mut self, point: u8) -> Result<(), ProcessorError> {
        calibration::fiducial(&mut self.hardware, &self.config, point)?;
        Ok(())
    }

    pub fn cs_maker(&mut self) -> Result<CoordinateSystemTransform, ProcessorError> {
        let chip_type = self
            .chip_type()?
            .ok_or(CalibrationError::UnknownChipType)?;
        Ok(calibration::cs_maker(
            &mut self.hardware,
            &self.config,
            chip_type,
        )?)
    }

    pub fn cs_reset(&mut self) -> Result<(), ProcessorError> {
        calibration::cs_reset(&mut self.hardware)?;
        Ok(())
    }

    pub fn define_current_chip(&mut self, chip_id: &str) -> Result<ChipType, ProcessorError> {
        process::define_current_chip(&mut self.hardware, &self.config, chip_id)
    }

    pub fn load_stock_map(&mut self, name: &str) -> Result<BitSet, ProcessorError> {
        Ok(block_map::load_stock_map(&mut self.hardware, name)?)
    }

    pub fn load_lite_map(&mut self) -> Result<BitSet, ProcessorError> {
        let chip_type = self.require_chip_type()?;
        Ok(block_map::load_lite_map(
            &mut self.hardware,
            &self.config,
            chip_type,
        )?)
    }

    pub fn save_screen_map(&mut self) -> Result<PathBuf, ProcessorError> {
        Ok(block_map::save_screen_map(&mut self.hardware, &self.config)?)
    }

    pub fn upload_parameters(&mut self, chip_id: &str) -> Result<(), ProcessorError> {
        Ok(block_map::upload_parameters(
            &mut self.hardware,
            &self.config,
            chip_id,
        )?)
    }

    /// Send `currentchip.full`, returning the number of commands sent
    pub fn upload_full(&mut self) -> Result<usize, ProcessorError> {
        Ok(block_map::upload_full(&mut self.hardware, &self.config)?)
    }

    pub fn pumpprobe_calc(&mut self) -> Result<[f64; 5], ProcessorError> {
        process::pumpprobe_calc(&mut self.hardware)
    }

    pub fn write_parameter_file(&mut self) -> Result<RunParameters, ProcessorError> {
        let mut rng = rand::thread_rng();
        process::write_parameter_file(&mut self.hardware, &self.config, &mut rng)
    }

    pub fn block_check(
        &mut self,
        tx: &Sender<OperationStatus>,
    ) -> Result<BlockCheckOutcome, ProcessorError> {
        process::block_check(&mut self.hardware, &self.config, tx)
    }

    /// Arm the trigger box for the run described by `parameters.txt`. One gate is opened per
    /// window of the chip.
    pub fn arm(&mut self) -> Result<TriggerSettings, ProcessorError> {
        let params = RunParameters::read_parameter_file(&self.config.parameter_file())?;
        let num_gates = get_format(params.chip_type)?.site_count();
        let settings = TriggerSettings::for_fixed_target(
            params.det_type,
            num_gates,
            params.n_exposures,
            params.exptime,
        );
        trigger::start_collection(&mut self.hardware, &settings)?;
        Ok(settings)
    }

    pub fn disarm(&mut self) -> Result<(), ProcessorError> {
        trigger::end_collection(&mut self.hardware)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::{Axis, ControlPoint, HardwareEvent, SimulatedHardware};
    use crate::parameters::DetectorType;
    use std::time::Duration;

    fn session(dir: &std::path::Path) -> Session<SimulatedHardware> {
        let mut config = Config::default();
        config.param_path = dir.to_path_buf();
        Session::new(config, SimulatedHardware::new(Duration::from_secs(1)))
    }

    #[test]
    fn test_chip_type_from_register() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path());
        session.hardware.preset(ControlPoint::Register(1), 10i64);
        assert_eq!(session.chip_type().unwrap(), Some(ChipType::Oxford6x6));
        session.hardware.preset(ControlPoint::Register(1), 42i64);
        assert_eq!(session.chip_type().unwrap(), None);
        assert!(matches!(
            session.load_lite_map(),
            Err(ProcessorError::UnknownChipType)
        ));
        assert!(matches!(
            session.cs_maker(),
            Err(ProcessorError::CalibrationError(
                CalibrationError::UnknownChipType
            ))
        ));
        assert!(session.hardware.events().is_empty());
    }

    #[test]
    fn test_move_to_unknown_chip_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path());
        session.hardware.preset(ControlPoint::Register(1), -1i64);
        session.move_to("f1").unwrap();
        assert!(session.hardware.events().is_empty());
        assert!(matches!(
            session.move_to("f3"),
            Err(ProcessorError::MotionError(_))
        ));
    }

    #[test]
    fn test_f2_uses_register_chip() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path());
        session.hardware.preset(ControlPoint::Register(1), 2i64);
        session.move_to("f2").unwrap();
        let (_, dy) = ChipType::Hamburg.fiducial_spacing();
        assert_eq!(
            session
                .hardware
                .read_f64(ControlPoint::StageReadback(Axis::Y))
                .unwrap(),
            dy
        );
    }

    #[test]
    fn test_arm_from_parameter_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path());
        let params = RunParameters {
            visit: String::from("/tmp/visit/"),
            chip_name: String::from("chip"),
            protein_name: String::from("protein"),
            n_exposures: 2,
            chip_type: ChipType::Oxford,
            map_type: 0,
            pump_repeat: 0,
            pumpexptime: 0.0,
            pumpdelay: 0.0,
            prepumpexptime: 0.0,
            exptime: 0.02,
            dcdetdist: 1480.0,
            det_type: DetectorType::Pilatus,
        };
        params
            .write_parameter_file(&session.config.parameter_file())
            .unwrap();

        let settings = session.arm().unwrap();
        assert_eq!(settings.num_gates, 25600);
        assert_eq!(settings.pulse_max, 2);
        assert!(session.hardware.is_armed());
        session.disarm().unwrap();
        assert_eq!(
            session.hardware.events(),
            &[HardwareEvent::Arm, HardwareEvent::Disarm]
        );
    }
}
