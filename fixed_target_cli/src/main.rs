//! # fixed_target_cli
//!
//! Part of the fixed_target crate family.
//!
//! This is the command line chip manager. Each invocation runs one operation against the
//! hardware and exits, the way the beamline screen buttons call it.
//!
//! ## Use
//!
//! ```bash
//! fixed_target_cli -p config.yml <operation> [args]
//! ```
//!
//! Use `fixed_target_cli -p config.yml new` to make a template configuration. The hardware
//! adapter built in to the CLI is the simulated one; its register state is kept in the
//! `hardware_state_path` file of the configuration between invocations, so a sequence of calls
//! behaves like one session. `get` and `set` read and write a single control point by name
//! (`gp1`, `stage_x.RBV`, `exptime`, ...).
use clap::{value_parser, Arg, ArgMatches, Command};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::mpsc::channel;
use std::sync::Arc;
use time::macros::format_description;

use libfixed_target::config::Config;
use libfixed_target::error::ProcessorError;
use libfixed_target::hardware::{ControlPoint, HardwareIo, PvValue, SimulatedHardware};
use libfixed_target::process::BlockCheckOutcome;
use libfixed_target::session::Session;

fn make_template_config(path: &Path) {
    match Config::default().write_config_file(path) {
        Ok(()) => println!("Made a template config at {}", path.display()),
        Err(e) => eprintln!("Could not write template config: {e}"),
    }
}

/// Log to the terminal and to `<log_path>/fixed_target_YYYY_MM_DD.log`
fn setup_logging(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all(&config.log_path)?;
    let today = time::OffsetDateTime::now_local()
        .unwrap_or_else(|_| time::OffsetDateTime::now_utc())
        .format(format_description!("[year]_[month]_[day]"))?;
    let file_sink = Arc::new(
        spdlog::sink::FileSink::builder()
            .path(config.log_path.join(format!("fixed_target_{today}.log")))
            .formatter(Box::new(spdlog::formatter::PatternFormatter::new(
                spdlog::formatter::pattern!(
                    "[{date_short} {time_short}] - [thread: {tid}] - [{^{level}}] - {payload}{eol}"
                ),
            )))
            .truncate(false)
            .build()?,
    );
    let mut sinks = spdlog::default_logger().sinks().to_owned();
    sinks.push(file_sink);
    let logger = Arc::new(
        spdlog::Logger::builder()
            .sinks(sinks)
            .flush_level_filter(spdlog::LevelFilter::All)
            .build()?,
    );
    spdlog::set_default_logger(logger);
    Ok(())
}

fn chip_id_arg() -> Arg {
    Arg::new("chipid")
        .required(true)
        .help("Short chip id: toronto, oxford, hamburg, hamburgfull, bismuth1, bismuth2 or regina")
}

fn cli() -> Command {
    Command::new("fixed_target_cli")
        .arg_required_else_help(true)
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .required(true)
                .help("Path to the configuration file"),
        )
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .subcommand(
            Command::new("initialise").about("Set the stage limits and reset the registers"),
        )
        .subcommand(
            Command::new("moveto")
                .about("Move to a named position")
                .arg(Arg::new("position").required(true)),
        )
        .subcommand(
            Command::new("fiducial")
                .about("Record the current stage position as fiducial 1 or 2")
                .arg(
                    Arg::new("point")
                        .required(true)
                        .value_parser(value_parser!(u8).range(1..=2)),
                ),
        )
        .subcommand(Command::new("cs_maker").about("Calibrate the chip coordinate system"))
        .subcommand(Command::new("cs_reset").about("Restore the identity coordinate system"))
        .subcommand(
            Command::new("define_current_chip")
                .about("Select the chip and send its pvar file")
                .arg(chip_id_arg()),
        )
        .subcommand(
            Command::new("load_stock_map")
                .about("Enable the blocks of a stock map")
                .arg(Arg::new("map").required(true)),
        )
        .subcommand(Command::new("load_lite_map").about("Enable the blocks of the lite map named in GP5"))
        .subcommand(Command::new("save_screen_map").about("Save the enabled blocks to currentchip.map"))
        .subcommand(
            Command::new("upload_parameters")
                .about("Send currentchip.map to the motion controller")
                .arg(chip_id_arg()),
        )
        .subcommand(
            Command::new("upload_full")
                .about("Send currentchip.full to the motion controller two lines at a time"),
        )
        .subcommand(Command::new("pumpprobe_calc").about("Compute the pump repeat times"))
        .subcommand(
            Command::new("write_parameter_file")
                .about("Write parameters.txt and the chip files of the run"),
        )
        .subcommand(Command::new("block_check").about("Visit the start of every block"))
        .subcommand(Command::new("arm").about("Arm the trigger box for the current run"))
        .subcommand(Command::new("disarm").about("Disarm the trigger box"))
        .subcommand(
            Command::new("get")
                .about("Read a control point")
                .arg(Arg::new("point").required(true)),
        )
        .subcommand(
            Command::new("set")
                .about("Write a control point")
                .arg(Arg::new("point").required(true))
                .arg(Arg::new("value").required(true)),
        )
}

fn required<'a>(args: &'a ArgMatches, name: &str) -> &'a str {
    args.get_one::<String>(name).map(String::as_str).unwrap_or_default()
}

fn parse_value(value: &str) -> PvValue {
    if let Ok(i) = value.parse::<i64>() {
        PvValue::Int(i)
    } else if let Ok(f) = value.parse::<f64>() {
        PvValue::Float(f)
    } else {
        PvValue::Text(value.to_string())
    }
}

/// Run `block_check` on a worker thread while the progress is shown here
fn run_block_check(
    mut session: Session<SimulatedHardware>,
) -> (Option<Session<SimulatedHardware>>, Result<(), ProcessorError>) {
    let (tx, rx) = channel();
    let handle = std::thread::spawn(move || {
        let result = session.block_check(&tx);
        (session, result)
    });

    let pb = ProgressBar::new(100);
    if let Ok(style) = ProgressStyle::with_template("{bar:40.cyan/blue} {pos:>3}% block {msg}") {
        pb.set_style(style);
    }
    for status in rx {
        pb.set_position((status.progress * 100.0) as u64);
        pb.set_message(status.label);
    }
    pb.finish();

    match handle.join() {
        Ok((session, Ok(BlockCheckOutcome::Completed))) => (Some(session), Ok(())),
        Ok((session, Ok(BlockCheckOutcome::Aborted { visited }))) => {
            spdlog::warn!("Block check aborted after {visited} blocks");
            (Some(session), Ok(()))
        }
        Ok((session, Err(e))) => (Some(session), Err(e)),
        Err(_) => {
            spdlog::error!("Failed to join block check task!");
            (None, Ok(()))
        }
    }
}

fn run_operation(
    session: &mut Session<SimulatedHardware>,
    name: &str,
    args: &ArgMatches,
) -> Result<(), ProcessorError> {
    match name {
        "initialise" => session.initialise()?,
        "moveto" => session.move_to(required(args, "position"))?,
        "fiducial" => session.fiducial(args.get_one::<u8>("point").copied().unwrap_or(1))?,
        "cs_maker" => {
            let transform = session.cs_maker()?;
            for command in transform.commands() {
                spdlog::info!("{command}");
            }
        }
        "cs_reset" => session.cs_reset()?,
        "define_current_chip" => {
            let chip = session.define_current_chip(required(args, "chipid"))?;
            spdlog::info!("Current chip is {chip}");
        }
        "load_stock_map" => {
            let blocks = session.load_stock_map(required(args, "map"))?;
            spdlog::info!("{} blocks enabled", blocks.len());
        }
        "load_lite_map" => {
            let blocks = session.load_lite_map()?;
            spdlog::info!("{} blocks enabled", blocks.len());
        }
        "save_screen_map" => {
            let path = session.save_screen_map()?;
            spdlog::info!("Saved {}", path.display());
        }
        "upload_parameters" => session.upload_parameters(required(args, "chipid"))?,
        "upload_full" => {
            let count = session.upload_full()?;
            spdlog::info!("{count} full map commands sent");
        }
        "pumpprobe_calc" => {
            session.pumpprobe_calc()?;
        }
        "write_parameter_file" => {
            session.write_parameter_file()?;
        }
        "arm" => {
            session.arm()?;
        }
        "disarm" => session.disarm()?,
        "get" => {
            let point = ControlPoint::from_str(required(args, "point"))?;
            let value = session.hardware.read(point)?;
            println!("{point} = {value}");
        }
        "set" => {
            let point = ControlPoint::from_str(required(args, "point"))?;
            session
                .hardware
                .write(point, parse_value(required(args, "value")))?;
        }
        other => spdlog::warn!("Unknown operation {other}"),
    }
    Ok(())
}

fn main() {
    let matches = cli().get_matches();
    let config_path = PathBuf::from(required(&matches, "path"));

    let Some((name, args)) = matches.subcommand() else {
        eprintln!("No operation given, see --help");
        return;
    };
    if name == "new" {
        make_template_config(&config_path);
        return;
    }

    let config = match Config::read_config_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{e}");
            return;
        }
    };
    if let Err(e) = setup_logging(&config) {
        eprintln!("Could not create file logging: {e}");
    }
    spdlog::info!("Config loaded from {}", config_path.display());

    let timeout = match config.hardware_timeout() {
        Ok(t) => t,
        Err(e) => {
            spdlog::error!("{e}");
            return;
        }
    };
    let hardware = match SimulatedHardware::load_or_new(&config.hardware_state_path, timeout) {
        Ok(h) => h,
        Err(e) => {
            spdlog::error!("{e}");
            return;
        }
    };
    let state_path = config.hardware_state_path.clone();
    let mut session = Session::new(config, hardware);

    spdlog::info!("Running {name}");
    let (session, result) = if name == "block_check" {
        run_block_check(session)
    } else {
        let result = run_operation(&mut session, name, args);
        (Some(session), result)
    };
    match result {
        Ok(()) => spdlog::info!("{name} done"),
        Err(e) => spdlog::error!("{name} failed with error: {e}"),
    }

    if let Some(session) = session {
        if let Err(e) = session.into_hardware().save(&state_path) {
            spdlog::error!("Could not save hardware state: {e}");
        }
    }
}
