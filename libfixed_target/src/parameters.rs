use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

use super::chip_format::ChipType;
use super::error::ParameterError;

/// The detector collecting the data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorType {
    Eiger,
    Pilatus,
}

impl Display for DetectorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Eiger => write!(f, "eiger"),
            Self::Pilatus => write!(f, "pilatus"),
        }
    }
}

impl FromStr for DetectorType {
    type Err = ParameterError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "eiger" => Ok(Self::Eiger),
            "pilatus" => Ok(Self::Pilatus),
            _ => Err(ParameterError::BadValue {
                key: "det_type",
                value: s.to_string(),
            }),
        }
    }
}

/// Everything describing one chip collection, as recorded in `parameters.txt`
#[derive(Debug, Clone, PartialEq)]
pub struct RunParameters {
    pub visit: String,
    pub chip_name: String,
    /// Also used as the sub directory for the chip files
    pub protein_name: String,
    pub n_exposures: i64,
    pub chip_type: ChipType,
    pub map_type: i64,
    pub pump_repeat: i64,
    pub pumpexptime: f64,
    pub pumpdelay: f64,
    pub prepumpexptime: f64,
    pub exptime: f64,
    pub dcdetdist: f64,
    pub det_type: DetectorType,
}

const KEYS: [&str; 13] = [
    "visit",
    "chip_name",
    "protein_name",
    "n_exposures",
    "chip_type",
    "map_type",
    "pump_repeat",
    "pumpexptime",
    "pumpdelay",
    "prepumpexptime",
    "exptime",
    "dcdetdist",
    "det_type",
];

impl RunParameters {
    /// The (key, value) pairs in file order
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        let values = [
            self.visit.clone(),
            self.chip_name.clone(),
            self.protein_name.clone(),
            self.n_exposures.to_string(),
            self.chip_type.id().to_string(),
            self.map_type.to_string(),
            self.pump_repeat.to_string(),
            self.pumpexptime.to_string(),
            self.pumpdelay.to_string(),
            self.prepumpexptime.to_string(),
            self.exptime.to_string(),
            self.dcdetdist.to_string(),
            self.det_type.to_string(),
        ];
        KEYS.into_iter().zip(values).collect()
    }

    pub fn write_parameter_file(&self, path: &Path) -> Result<(), ParameterError> {
        let mut file = std::fs::File::create(path)?;
        for (key, value) in self.entries() {
            writeln!(file, "{key} \t{value}")?;
        }
        Ok(())
    }

    /// Read `parameters.txt`. Keys are matched case-insensitively and every key is required.
    pub fn read_parameter_file(path: &Path) -> Result<Self, ParameterError> {
        if !path.exists() {
            return Err(ParameterError::BadFilePath(path.to_path_buf()));
        }
        let contents = std::fs::read_to_string(path)?;
        Self::from_str(&contents)
    }

    /// Sub directory the chip files for this run go in
    pub fn sub_dir(&self) -> &str {
        &self.protein_name
    }
}

impl FromStr for RunParameters {
    type Err = ParameterError;
    fn from_str(contents: &str) -> Result<Self, Self::Err> {
        let mut table: Vec<(String, String)> = Vec::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match line.split_once(char::is_whitespace) {
                Some((key, value)) => {
                    table.push((key.to_lowercase(), value.trim().to_string()))
                }
                None => return Err(ParameterError::BadLine(line.to_string())),
            }
        }

        let get = |key: &'static str| -> Result<&str, ParameterError> {
            table
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
                .ok_or(ParameterError::MissingKey(key))
        };
        let int = |key: &'static str| -> Result<i64, ParameterError> {
            let value = get(key)?;
            value
                .parse::<i64>()
                .or_else(|_| value.parse::<f64>().map(|f| f as i64))
                .map_err(|_| ParameterError::BadValue {
                    key,
                    value: value.to_string(),
                })
        };
        let float = |key: &'static str| -> Result<f64, ParameterError> {
            let value = get(key)?;
            value.parse::<f64>().map_err(|_| ParameterError::BadValue {
                key,
                value: value.to_string(),
            })
        };

        Ok(Self {
            visit: get("visit")?.to_string(),
            chip_name: get("chip_name")?.to_string(),
            protein_name: get("protein_name")?.to_string(),
            n_exposures: int("n_exposures")?,
            chip_type: ChipType::from_str(get("chip_type")?)?,
            map_type: int("map_type")?,
            pump_repeat: int("pump_repeat")?,
            pumpexptime: float("pumpexptime")?,
            pumpdelay: float("pumpdelay")?,
            prepumpexptime: float("prepumpexptime")?,
            exptime: float("exptime")?,
            dcdetdist: float("dcdetdist")?,
            det_type: DetectorType::from_str(get("det_type")?)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example() -> RunParameters {
        RunParameters {
            visit: String::from("/dls/i24/data/2023/mx31850-14/"),
            chip_name: String::from("chip-7"),
            protein_name: String::from("lysozyme"),
            n_exposures: 1,
            chip_type: ChipType::Oxford,
            map_type: 1,
            pump_repeat: 0,
            pumpexptime: 0.0,
            pumpdelay: 0.0,
            prepumpexptime: 0.0,
            exptime: 0.01,
            dcdetdist: 1480.0,
            det_type: DetectorType::Eiger,
        }
    }

    #[test]
    fn test_write_and_read() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let params = example();
        params.write_parameter_file(file.path()).unwrap();
        let contents = std::fs::read_to_string(file.path()).unwrap();
        assert!(contents.starts_with("visit \t/dls/i24/data/2023/mx31850-14/\n"));
        assert!(contents.contains("chip_type \t1\n"));
        assert_eq!(RunParameters::read_parameter_file(file.path()).unwrap(), params);
    }

    #[test]
    fn test_missing_key() {
        let text = "visit /tmp\nchip_name test\n";
        match RunParameters::from_str(text) {
            Err(ParameterError::MissingKey(key)) => assert_eq!(key, "protein_name"),
            _ => panic!(),
        }
    }

    #[test]
    fn test_bad_values() {
        let mut text = String::new();
        for (key, value) in example().entries() {
            let value = if key == "exptime" { String::from("fast") } else { value };
            text.push_str(&format!("{key}\t{value}\n"));
        }
        assert!(matches!(
            RunParameters::from_str(&text),
            Err(ParameterError::BadValue { key: "exptime", .. })
        ));
        assert!(matches!(
            RunParameters::from_str("visit\n"),
            Err(ParameterError::BadLine(_))
        ));
        assert!(DetectorType::from_str("mar").is_err());
    }
}
