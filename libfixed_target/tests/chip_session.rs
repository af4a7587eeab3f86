use std::path::{Path, PathBuf};
use std::sync::mpsc::channel;
use std::time::Duration;

use libfixed_target::calibration::{
    write_fiducial_file, CsSettings, RotationAngle, HOME_ALL, ORIGIN, RESET_CS,
};
use libfixed_target::chip_format::ChipType;
use libfixed_target::config::Config;
use libfixed_target::error::{CalibrationError, ProcessorError};
use libfixed_target::hardware::{Axis, ControlPoint, HardwareIo, PvValue, SimulatedHardware};
use libfixed_target::process::BlockCheckOutcome;
use libfixed_target::session::Session;
use libfixed_target::site_file::read_chip_file;

fn sample_parameters() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../parameters")
}

/// A session writing only into `dir`, reading the shipped calibration and pvar files
fn session_in(dir: &Path) -> Session<SimulatedHardware> {
    let samples = sample_parameters();
    let mut config = Config::default();
    config.param_path = dir.to_path_buf();
    config.cs_path = samples.join("cs");
    config.pvar_path = samples.join("pvar_files");
    config.litemap_path = dir.join("litemaps");
    config.chip_file_path = dir.to_path_buf();
    config.hardware_state_path = dir.join("hardware_state.yml");
    std::fs::create_dir_all(&config.litemap_path).unwrap();
    std::fs::copy(
        samples.join("motor_direction.txt"),
        config.motor_direction_file(),
    )
    .unwrap();
    std::fs::copy(
        samples.join("litemaps/oxford_half.lite"),
        config.litemap_path.join("oxford_half.lite"),
    )
    .unwrap();
    Session::new(config, SimulatedHardware::new(Duration::from_secs(1)))
}

fn set_stage(session: &mut Session<SimulatedHardware>, x: f64, y: f64, z: f64) {
    for (axis, value) in Axis::ALL.into_iter().zip([x, y, z]) {
        session
            .hardware
            .write(ControlPoint::StageSetpoint(axis), PvValue::Float(value))
            .unwrap();
    }
}

#[test]
fn calibrate_flat_oxford_chip() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = session_in(dir.path());
    session.define_current_chip("oxford").unwrap();

    set_stage(&mut session, 25.4, 0.0, 0.0);
    session.fiducial(1).unwrap();
    set_stage(&mut session, 0.0, 25.4, 0.0);
    session.fiducial(2).unwrap();
    session.hardware.clear_events();

    let transform = session.cs_maker().unwrap();
    assert!(transform.residuals_within(0.01));
    let commands = session.hardware.commands();
    assert_eq!(commands.len(), 9);
    assert_eq!(commands[0], ORIGIN);
    assert_eq!(commands[1], "&2");
    assert!(commands[2].starts_with("#1->"));
    assert!(commands[3].starts_with("#2->"));
    assert!(commands[4].starts_with("#3->"));
    assert_eq!(commands[5], ORIGIN);
    assert_eq!(commands[6], HOME_ALL);
    assert_eq!(commands[7], "!x0.4y0.4");
    assert_eq!(commands[8], HOME_ALL);
    assert_eq!(session.hardware.settles()[0], Duration::from_secs_f64(2.5));
}

#[test]
fn fiducials_at_origin_give_identity() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = session_in(dir.path());
    session.config.cs_path = dir.path().join("cs");
    std::fs::create_dir_all(&session.config.cs_path).unwrap();
    let settings = CsSettings {
        scalex: 10000.0,
        scaley: 10000.0,
        scalez: 10000.0,
        skew: 0.0,
        ..CsSettings::default()
    };
    settings.write_file(&session.config.cs_maker_file()).unwrap();
    std::fs::write(
        session.config.motor_direction_file(),
        "mtr1_dir=1\nmtr2_dir=1\nmtr3_dir=1\n",
    )
    .unwrap();
    session
        .hardware
        .preset(ControlPoint::Register(1), ChipType::Oxford.id());

    set_stage(&mut session, 0.0, 0.0, 0.0);
    session.fiducial(1).unwrap();
    session.fiducial(2).unwrap();
    session.hardware.clear_events();

    let transform = session.cs_maker().unwrap();
    assert_eq!(transform.sines, [0.0, 0.0, 0.0]);
    assert_eq!(transform.calculated_skew, Some(0.0));
    assert!(transform.residuals_within(1e-12));
    assert_eq!(
        session.hardware.commands()[1..5],
        [
            "&2",
            "#1->+10000.000X+0.000Y+0.000Z",
            "#2->+0.000X+10000.000Y+0.000Z",
            "#3->+0.000X+0.000Y+10000.000Z",
        ]
    );
}

#[test]
fn failed_calibration_sends_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = session_in(dir.path());
    session
        .hardware
        .preset(ControlPoint::Register(1), ChipType::Oxford.id());
    let directions = [1.0, -1.0, -1.0];
    write_fiducial_file(
        &session.config.fiducial_file(1),
        [25.4, 0.0, 30.0],
        [254000.0, 0.0, 300000.0],
        directions,
    )
    .unwrap();
    write_fiducial_file(
        &session.config.fiducial_file(2),
        [0.0, 25.4, 0.0],
        [0.0, 254000.0, 0.0],
        directions,
    )
    .unwrap();

    match session.cs_maker() {
        Err(ProcessorError::CalibrationError(CalibrationError::DomainError { angle, value })) => {
            assert_eq!(angle, RotationAngle::Yaw);
            assert!(value > 1.0);
        }
        other => panic!("expected a yaw domain error, got {other:?}"),
    }
    assert!(session.hardware.commands().is_empty());
}

#[test]
fn reset_coordinate_system() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = session_in(dir.path());
    session.cs_reset().unwrap();
    let mut expected = vec!["&2"];
    expected.extend(RESET_CS);
    assert_eq!(session.hardware.commands(), expected);
}

#[test]
fn moveto_origin_for_every_chip() {
    for chip in ChipType::ALL {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_in(dir.path());
        session.hardware.preset(ControlPoint::Register(1), chip.id());
        session.move_to("yag").unwrap();
        session.move_to("origin").unwrap();
        for axis in [Axis::X, Axis::Y] {
            assert_eq!(
                session
                    .hardware
                    .read_f64(ControlPoint::StageReadback(axis))
                    .unwrap(),
                0.0,
                "{chip} origin"
            );
        }
    }
}

#[test]
fn prepare_an_oxford_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = session_in(dir.path());
    session.initialise().unwrap();
    session.define_current_chip("oxford").unwrap();

    session
        .hardware
        .preset(ControlPoint::Register(5), "oxford_half");
    let selection = session.load_lite_map().unwrap();
    assert_eq!(selection.len(), 32);
    assert!(selection.contains(1));
    assert!(selection.contains(16));
    assert!(!selection.contains(64));
    let map = session.save_screen_map().unwrap();
    assert!(map.is_file());

    session.hardware.preset(ControlPoint::Filepath, "lysozyme");
    session.hardware.preset(ControlPoint::ChipName, "chip7");
    let params = session.write_parameter_file().unwrap();
    assert_eq!(params.chip_type, ChipType::Oxford);

    let chip_dir = session.config.chip_directory("lysozyme");
    let addr = read_chip_file(&chip_dir.join("chip7.addr")).unwrap();
    let shot = read_chip_file(&chip_dir.join("chip7.shot")).unwrap();
    let rando = read_chip_file(&chip_dir.join("chip7.rando.spec")).unwrap();
    assert_eq!(addr.len(), 25600);
    assert_eq!(shot.len(), 25600);
    assert_eq!(rando.len(), 25600);
    assert_eq!(addr[0].crystal_name(), "chip7_A1_aa");
    assert!(addr.iter().all(|site| site.present == -1));
    assert!(rando.iter().all(|site| site.present == 0 || site.present == 1));

    // A second run moves the first run's files aside
    session.write_parameter_file().unwrap();
    let n_files = std::fs::read_dir(&chip_dir).unwrap().count();
    assert_eq!(n_files, 6);

    let settings = session.arm().unwrap();
    assert_eq!(settings.num_gates, 25600);
    session.disarm().unwrap();
    assert!(!session.hardware.is_armed());
}

#[test]
fn abort_a_block_check() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = session_in(dir.path());
    session
        .hardware
        .preset(ControlPoint::Register(1), ChipType::Oxford.id());
    session
        .hardware
        .schedule_write(3, ControlPoint::Register(9), PvValue::Int(1));
    let (tx, rx) = channel();

    let outcome = session.block_check(&tx).unwrap();
    assert_eq!(outcome, BlockCheckOutcome::Aborted { visited: 3 });
    assert_eq!(session.hardware.commands().len(), 3);
    assert_eq!(rx.try_iter().count(), 4);
}

#[test]
fn block_check_visits_every_oxford_block() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = session_in(dir.path());
    session
        .hardware
        .preset(ControlPoint::Register(1), ChipType::Oxford.id());
    let (tx, rx) = channel();

    let outcome = session.block_check(&tx).unwrap();
    assert_eq!(outcome, BlockCheckOutcome::Completed);
    assert_eq!(session.hardware.commands().len(), 64);
    let last = rx.try_iter().last().unwrap();
    assert_eq!(last.progress, 1.0);
    assert_eq!(last.label, "64");
}

#[test]
fn hardware_state_survives_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = session_in(dir.path());
    session.initialise().unwrap();
    let path = session.config.hardware_state_path.clone();
    session.into_hardware().save(&path).unwrap();

    let hardware = SimulatedHardware::load_or_new(&path, Duration::from_secs(1)).unwrap();
    let mut session = Session::new(Config::default(), hardware);
    assert_eq!(session.chip_type().unwrap(), Some(ChipType::Oxford));
    assert_eq!(
        session
            .hardware
            .read_f64(ControlPoint::StageHighLimit(Axis::Z))
            .unwrap(),
        5.1
    );
}
