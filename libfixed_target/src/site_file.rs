use rand::Rng;
use std::fmt::Display;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use time::macros::format_description;

use super::address::{address_to_xy, Address};
use super::addressing::{enumerate_addresses, TraversalOrder};
use super::chip_format::ChipType;
use super::error::{AddressError, SiteFileError};
use super::parameters::RunParameters;

const RULER: &str =
    "#23456789012345678901234567890123456789012345678901234567890123456789012345678901234567890";
const COLUMNS: &str =
    "#XtalAddr      XCoord  YCoord  ZCoord  Present Shot  Spare04 Spare03 Spare02 Spare01";

/// One crystal site line of a chip file: `chip_A1_aa\tx\ty\tz\tpresent`
#[derive(Debug, Clone, PartialEq)]
pub struct SiteRecord {
    pub chip_name: String,
    pub address: Address,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// -1 skip, 0 fiducial placeholder, 1 collect
    pub present: i8,
}

impl SiteRecord {
    pub fn crystal_name(&self) -> String {
        format!("{}_{}", self.chip_name, self.address)
    }
}

impl Display for SiteRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}\t{:?}\t{:?}\t{:?}\t{}",
            self.crystal_name(),
            self.x,
            self.y,
            self.z,
            self.present
        )
    }
}

impl FromStr for SiteRecord {
    type Err = SiteFileError;
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let columns: Vec<&str> = line.trim_end().split('\t').collect();
        if columns.len() != 5 {
            return Err(SiteFileError::BadColumnCount(line.to_string()));
        }
        let name = columns[0];
        let address = Address::from_crystal_name(name)?;
        let chip_name = name
            .rsplitn(3, '_')
            .nth(2)
            .ok_or_else(|| AddressError::MalformedAddress(name.to_string()))?
            .to_string();
        let present = match columns[4].trim() {
            "-1" => -1,
            "0" => 0,
            "1" => 1,
            other => return Err(SiteFileError::BadPresent(other.to_string())),
        };
        Ok(Self {
            chip_name,
            address,
            x: columns[1].trim().parse()?,
            y: columns[2].trim().parse()?,
            z: columns[3].trim().parse()?,
            present,
        })
    }
}

/// How the present flag of a generated chip file is filled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// Every non-fiducial site is skipped (-1)
    Skip,
    /// Every non-fiducial site is randomly collected or not (0 or 1); used for test maps
    Random,
}

/// A chip file to generate: its extension, site order and presence filling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChipFileKind {
    pub suffix: &'static str,
    pub order: TraversalOrder,
    pub presence: Presence,
}

pub const ADDR_FILE: ChipFileKind = ChipFileKind {
    suffix: "addr",
    order: TraversalOrder::Alphanumeric,
    presence: Presence::Skip,
};

pub const SHOT_FILE: ChipFileKind = ChipFileKind {
    suffix: "shot",
    order: TraversalOrder::ScanOptimized,
    presence: Presence::Skip,
};

pub const RANDOM_FILE: ChipFileKind = ChipFileKind {
    suffix: "rando.spec",
    order: TraversalOrder::Alphanumeric,
    presence: Presence::Random,
};

/// Addresses reserved as fiducial placeholders. None of the gridded chips reserve any.
pub fn fiducial_addresses(chip_type: ChipType) -> Vec<Address> {
    match chip_type {
        ChipType::Oxford | ChipType::OxfordInner | ChipType::Minichip | ChipType::Oxford6x6 => {
            vec![]
        }
        _ => {
            spdlog::warn!("Unknown chip type {chip_type} when looking up fiducial sites");
            vec![]
        }
    }
}

/// Generate the site records of a chip in the given order
pub fn generate_sites<R: Rng>(
    chip_name: &str,
    chip_type: ChipType,
    kind: ChipFileKind,
    fiducials: &[Address],
    rng: &mut R,
) -> Result<Vec<SiteRecord>, SiteFileError> {
    let addresses = enumerate_addresses(chip_type, kind.order)?;
    let mut sites = Vec::with_capacity(addresses.len());
    for address in addresses {
        let (x, y) = address_to_xy(&address, chip_type)?;
        let present = if fiducials.contains(&address) {
            0
        } else {
            match kind.presence {
                Presence::Skip => -1,
                Presence::Random => rng.gen_range(0..=1),
            }
        };
        sites.push(SiteRecord {
            chip_name: chip_name.to_string(),
            address,
            x,
            y,
            z: 0.0,
            present,
        });
    }
    Ok(sites)
}

/// Path of the chip file of `kind` for the run
pub fn chip_file_path(directory: &Path, chip_name: &str, kind: ChipFileKind) -> PathBuf {
    directory.join(format!("{chip_name}.{}", kind.suffix))
}

/// Make sure the chip directory exists and move any existing chip files out of the way.
///
/// An existing `chip.addr` becomes `YYYYmmdd_HHMMSS_chip.addr`. Returns the paths the old files
/// were moved to.
pub fn check_files(
    directory: &Path,
    chip_name: &str,
    kinds: &[ChipFileKind],
) -> Result<Vec<PathBuf>, SiteFileError> {
    if !directory.exists() {
        std::fs::create_dir_all(directory)?;
    }
    let now = time::OffsetDateTime::now_local().unwrap_or_else(|_| time::OffsetDateTime::now_utc());
    let stamp = now
        .format(format_description!(
            "[year][month][day]_[hour][minute][second]"
        ))
        .unwrap_or_default();

    let mut moved = Vec::new();
    for kind in kinds {
        let path = chip_file_path(directory, chip_name, *kind);
        if path.is_file() {
            let backup = directory.join(format!("{stamp}_{chip_name}.{}", kind.suffix));
            spdlog::info!(
                "File {} already exists, moving old file to {}",
                path.display(),
                backup.display()
            );
            std::fs::rename(&path, &backup)?;
            moved.push(backup);
        }
    }
    Ok(moved)
}

/// Write the comment header describing the run
pub fn write_header<W: Write>(writer: &mut W, params: &RunParameters) -> Result<(), SiteFileError> {
    writeln!(writer, "{RULER}")?;
    writeln!(writer, "#")?;
    let entries = [
        ("chip_name", params.chip_name.clone()),
        ("visit", params.visit.clone()),
        ("sub_dir", params.sub_dir().to_string()),
        ("n_exposures", params.n_exposures.to_string()),
        ("chip_type", params.chip_type.id().to_string()),
        ("map_type", params.map_type.to_string()),
        ("pump_repeat", params.pump_repeat.to_string()),
        ("pumpexptime", params.pumpexptime.to_string()),
        ("pumpdelay", params.pumpdelay.to_string()),
        ("exptime", params.exptime.to_string()),
        ("dcdetdist", params.dcdetdist.to_string()),
        ("prepumpexptime", params.prepumpexptime.to_string()),
        ("det_type", params.det_type.to_string()),
    ];
    for (key, value) in entries {
        writeln!(writer, "#&i24\t{key:<12} = {value}")?;
    }
    writeln!(writer, "#")?;
    writeln!(writer, "{COLUMNS}")?;
    Ok(())
}

/// Write a complete chip file (header then one line per site)
pub fn write_chip_file(
    path: &Path,
    params: &RunParameters,
    sites: &[SiteRecord],
) -> Result<(), SiteFileError> {
    let file = std::fs::File::create(path)?;
    let mut writer = std::io::BufWriter::new(file);
    write_header(&mut writer, params)?;
    for site in sites {
        writeln!(writer, "{site}")?;
    }
    writer.flush()?;
    Ok(())
}

/// Read the site lines of a chip file, skipping the comment header
pub fn read_chip_file(path: &Path) -> Result<Vec<SiteRecord>, SiteFileError> {
    let contents = std::fs::read_to_string(path)?;
    contents
        .lines()
        .filter(|line| !line.starts_with('#') && !line.trim().is_empty())
        .map(SiteRecord::from_str)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::DetectorType;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn params() -> RunParameters {
        RunParameters {
            visit: String::from("/tmp/visit/"),
            chip_name: String::from("mini"),
            protein_name: String::from("thaumatin"),
            n_exposures: 2,
            chip_type: ChipType::Minichip,
            map_type: 0,
            pump_repeat: 0,
            pumpexptime: 0.0,
            pumpdelay: 0.0,
            prepumpexptime: 0.0,
            exptime: 0.01,
            dcdetdist: 1480.0,
            det_type: DetectorType::Pilatus,
        }
    }

    #[test]
    fn test_site_line() {
        let site = SiteRecord {
            chip_name: String::from("my_chip"),
            address: Address::new(0, 1, 2, 3).unwrap(),
            x: 3.55,
            y: 0.25,
            z: 0.0,
            present: -1,
        };
        let line = site.to_string();
        assert_eq!(line, "my_chip_A2_cd\t3.55\t0.25\t0.0\t-1");
        assert_eq!(SiteRecord::from_str(&line).unwrap(), site);
    }

    #[test]
    fn test_bad_site_lines() {
        assert!(matches!(
            SiteRecord::from_str("chip_A1_aa\t0.0\t0.0\t0.0"),
            Err(SiteFileError::BadColumnCount(_))
        ));
        assert!(matches!(
            SiteRecord::from_str("chip_A1_aa\t0.0\t0.0\t0.0\t2"),
            Err(SiteFileError::BadPresent(_))
        ));
        assert!(matches!(
            SiteRecord::from_str("chip_A1_aa\tx\t0.0\t0.0\t1"),
            Err(SiteFileError::BadCoordinate(_))
        ));
        assert!(matches!(
            SiteRecord::from_str("A1_aa\t0.0\t0.0\t0.0\t1"),
            Err(SiteFileError::AddressError(_))
        ));
    }

    #[test]
    fn test_generate_random_sites() {
        let mut rng = StdRng::seed_from_u64(24);
        let sites =
            generate_sites("mini", ChipType::Minichip, RANDOM_FILE, &[], &mut rng).unwrap();
        assert_eq!(sites.len(), 400);
        assert!(sites.iter().all(|s| s.present == 0 || s.present == 1));
        assert!(sites.iter().any(|s| s.present == 1));

        let fiducial = Address::new(0, 0, 0, 0).unwrap();
        let sites =
            generate_sites("mini", ChipType::Minichip, SHOT_FILE, &[fiducial], &mut rng).unwrap();
        assert_eq!(sites[0].present, 0);
        assert!(sites[1..].iter().all(|s| s.present == -1));
    }

    #[test]
    fn test_write_and_read_chip_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = chip_file_path(dir.path(), "mini", ADDR_FILE);
        let mut rng = StdRng::seed_from_u64(1);
        let sites = generate_sites("mini", ChipType::Minichip, ADDR_FILE, &[], &mut rng).unwrap();
        write_chip_file(&path, &params(), &sites).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], RULER);
        assert_eq!(lines[2], "#&i24\tchip_name    = mini");
        assert!(lines.contains(&"#&i24\tdet_type     = pilatus"));
        assert_eq!(lines[16], COLUMNS);
        assert_eq!(lines[17], "mini_A1_aa\t0.0\t0.0\t0.0\t-1");
        assert_eq!(read_chip_file(&path).unwrap(), sites);
    }

    #[test]
    fn test_check_files_moves_existing() {
        let dir = tempfile::tempdir().unwrap();
        let chip_dir = dir.path().join("chips").join("thaumatin");
        assert!(check_files(&chip_dir, "mini", &[ADDR_FILE]).unwrap().is_empty());
        assert!(chip_dir.is_dir());

        std::fs::write(chip_file_path(&chip_dir, "mini", ADDR_FILE), "old").unwrap();
        let moved = check_files(&chip_dir, "mini", &[ADDR_FILE, SHOT_FILE]).unwrap();
        assert_eq!(moved.len(), 1);
        let name = moved[0].file_name().unwrap().to_string_lossy().to_string();
        assert!(name.ends_with("_mini.addr"));
        assert_eq!(name.len(), "YYYYmmdd_HHMMSS_mini.addr".len());
        assert!(!chip_file_path(&chip_dir, "mini", ADDR_FILE).exists());
        assert_eq!(std::fs::read_to_string(&moved[0]).unwrap(), "old");
    }
}
