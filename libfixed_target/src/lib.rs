//! # fixed_target
//!
//! fixed_target is the chip manager for fixed-target serial crystallography, written in Rust.
//! It drives a three axis sample stage through a motion controller so that every window of a
//! patterned chip can be brought into the X-ray beam, and it writes the site files that describe
//! where each crystal of a chip sits.
//!
//! ## Installation
//!
//! The only method of install is from source, which is laid out below.
//!
//! ### Rust
//!
//! If you have not used Rust before, you will most likely need to install the Rust tool
//! chain. See the [Rust docs](https://www.rust-lang.org/tools/install) for installation
//! instructions.
//!
//! ### Building & Install
//!
//! To build and install the CLI use `cargo install --path ./fixed_target_cli` from the top
//! level fixed_target repository. The binary will be installed to your cargo install location
//! (typically something like `~/.cargo/bin/`). To use the CLI see the `fixed_target_cli`
//! README.
//!
//! ## Chips
//!
//! A chip is a grid of blocks, each of which is a grid of windows. Blocks are named with a
//! letter row and a one based column (`A1`, `C4`), windows with a row and a column letter
//! (`aa`, `ba`). A crystal is therefore addressed as `<chip_name>_<block>_<window>`, e.g.
//! `chip7_C4_ba`. The supported chip types and their register ids are
//!
//! | id | chip | site layout |
//! |----|------|-------------|
//! | 0 | Toronto | |
//! | 1 | Oxford | 8x8 blocks of 20x20 windows |
//! | 2 | Hamburg | |
//! | 3 | Oxford Inner | 1 block of 25x25 windows |
//! | 4 | Bismuth | |
//! | 5 | Regina | |
//! | 6 | Custom | |
//! | 7 | Heidelberg4 | |
//! | 8 | Heidelberg6 | |
//! | 9 | Minichip | 1 block of 20x20 windows |
//! | 10 | Oxford 6x6 | 6x6 blocks of 20x20 windows |
//!
//! Chips without a site layout can still be calibrated and moved to, but their site files only
//! hold the run header.
//!
//! ## Configuration
//!
//! The CLI reads a YAML configuration file. A template can be made with
//! `fixed_target_cli -p config.yml new`; the format is as follows:
//!
//! ```yml
//! visit: /dls/i24/data/2023/visit/
//! param_path: parameters
//! cs_path: parameters/cs
//! litemap_path: parameters/litemaps
//! pvar_path: parameters/pvar_files
//! chip_file_path: parameters
//! log_path: logs
//! hardware_state_path: parameters/hardware_state.yml
//! hardware_timeout_s: 5.0
//! stage:
//!   velocity: 20.0
//!   acceleration: 0.01
//!   x_limits:
//!     high: 30.0
//!     low: -29.0
//!   y_limits:
//!     high: 30.0
//!     low: -30.0
//!   z_limits:
//!     high: 5.1
//!     low: -4.1
//! default_detector: eiger
//! residual_tolerance: 0.01
//! ```
//!
//! ## Parameter files
//!
//! The `param_path` directory holds
//!
//! - `parameters.txt`: the run parameters, written by `write_parameter_file`
//! - `motor_direction.txt`: the direction of each stage motor as `mtr1_dir=1` lines
//! - `fiducial_1.txt` and `fiducial_2.txt`: the stage position recorded at each fiducial
//!
//! The stage scale factors, skew and mounting signs used by the calibration live in
//! `cs_path/cs_maker.json`:
//!
//! ```json
//! {
//!   "scalex": 10018.0,
//!   "scaley": 9999.5,
//!   "scalez": 10000.0,
//!   "skew": -0.189,
//!   "Sx_dir": -1,
//!   "Sy_dir": 1,
//!   "Sz_dir": -1
//! }
//! ```
//!
//! ## Output
//!
//! For every run three site files are written to `<chip_file_path>/chips/<protein_name>/`:
//! `<chip_name>.addr` in alphanumeric order, `<chip_name>.shot` in the serpentine order the
//! stage actually scans, and `<chip_name>.rando.spec` with a random subset of sites marked
//! present. Existing files are moved aside with a timestamp prefix rather than overwritten.
//!
//! ```text
//! #23456789012345678901234567890123456789012345678901234567890123456789012345678901234567890
//! #
//! #&i24	chip_name    = chip7
//! ...
//! #XtalAddr      XCoord  YCoord  ZCoord  Present Shot  Spare04 Spare03 Spare02 Spare01
//! chip7_A1_aa	0.0	0.0	0.0	-1
//! ```
pub mod address;
pub mod addressing;
pub mod block_map;
pub mod calibration;
pub mod chip_format;
pub mod config;
pub mod error;
pub mod hardware;
pub mod motion;
pub mod parameters;
pub mod process;
pub mod session;
pub mod site_file;
pub mod status;
pub mod trigger;
