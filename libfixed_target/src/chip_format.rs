//! Chip types and their physical layout.
//!
//! Every chip the stage can hold is a variant of [`ChipType`]. The numeric identifier of each
//! variant is the value stored in the chip type register of the motion controller, so the
//! discriminants must not be renumbered.
use super::error::ChipFormatError;
use std::fmt::Display;
use std::str::FromStr;

/// The closed set of chip types known to the beamline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChipType {
    Toronto = 0,
    Oxford = 1,
    Hamburg = 2,
    OxfordInner = 3,
    Bismuth = 4,
    Regina = 5,
    Custom = 6,
    Heidelberg4 = 7,
    Heidelberg6 = 8,
    Minichip = 9,
    Oxford6x6 = 10,
}

impl ChipType {
    pub const ALL: [ChipType; 11] = [
        ChipType::Toronto,
        ChipType::Oxford,
        ChipType::Hamburg,
        ChipType::OxfordInner,
        ChipType::Bismuth,
        ChipType::Regina,
        ChipType::Custom,
        ChipType::Heidelberg4,
        ChipType::Heidelberg6,
        ChipType::Minichip,
        ChipType::Oxford6x6,
    ];

    /// The register value for this chip type
    pub fn id(&self) -> i64 {
        *self as i64
    }

    /// Look up a chip type from its register value
    pub fn from_id(id: i64) -> Result<Self, ChipFormatError> {
        Self::ALL
            .iter()
            .find(|chip| chip.id() == id)
            .copied()
            .ok_or_else(|| ChipFormatError::UnsupportedChipType(id.to_string()))
    }

    /// Look up a chip type from the short chip id used by the pvar parameter files
    /// (`toronto`, `oxford`, `hamburg`, `hamburgfull`, `bismuth1`, `bismuth2`, `regina`).
    pub fn from_chip_id(chip_id: &str) -> Result<Self, ChipFormatError> {
        match chip_id {
            "toronto" => Ok(Self::Toronto),
            "oxford" => Ok(Self::Oxford),
            "hamburg" | "hamburgfull" => Ok(Self::Hamburg),
            "bismuth1" => Ok(Self::OxfordInner),
            "bismuth2" => Ok(Self::Bismuth),
            "regina" => Ok(Self::Regina),
            _ => Err(ChipFormatError::UnsupportedChipType(chip_id.to_string())),
        }
    }

    /// Nominal distance (dx, dy) in mm from the chip origin to fiducial 1 (along x) and
    /// fiducial 2 (along y).
    pub fn fiducial_spacing(&self) -> (f64, f64) {
        match self {
            Self::Toronto => (18.975, 21.375),
            Self::Oxford => (25.400, 25.400),
            Self::Hamburg => (24.968, 24.968),
            Self::OxfordInner => (24.600, 24.600),
            Self::Bismuth => (27.500, 27.500),
            Self::Regina => (17.175, 17.175),
            Self::Custom => (25.400, 25.400),
            Self::Heidelberg4 => (19.135, 9.635),
            Self::Heidelberg6 => (19.525, 9.335),
            Self::Minichip => (2.375, 2.375),
            Self::Oxford6x6 => (18.25, 18.25),
        }
    }

    /// Whether the chip belongs to the Oxford family, which shares the column-serpentine
    /// block numbering
    pub fn is_oxford_family(&self) -> bool {
        matches!(self, Self::Oxford | Self::OxfordInner | Self::Oxford6x6)
    }
}

impl Display for ChipType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Toronto => "Toronto",
            Self::Oxford => "Oxford",
            Self::Hamburg => "Hamburg",
            Self::OxfordInner => "Oxford Inner",
            Self::Bismuth => "Bismuth",
            Self::Regina => "Regina",
            Self::Custom => "Custom",
            Self::Heidelberg4 => "Heidelberg4",
            Self::Heidelberg6 => "Heidelberg6",
            Self::Minichip => "Minichip",
            Self::Oxford6x6 => "Oxford 6x6",
        };
        write!(f, "{name}")
    }
}

impl FromStr for ChipType {
    type Err = ChipFormatError;
    /// Accepts either the numeric register value or the chip name (case and spacing insensitive)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(id) = trimmed.parse::<i64>() {
            return Self::from_id(id);
        }
        let wanted = trimmed.to_lowercase().replace([' ', '_', '-'], "");
        Self::ALL
            .iter()
            .find(|chip| chip.to_string().to_lowercase().replace(' ', "") == wanted)
            .copied()
            .ok_or_else(|| ChipFormatError::UnsupportedChipType(s.to_string()))
    }
}

/// The block and window grid of a chip.
///
/// Distances are in mm. `well_pitch` is the window-to-window distance inside a block and the
/// block pitches are the extra gap between the last window of one block and the first window of
/// the next.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChipFormat {
    pub block_count_x: usize,
    pub block_count_y: usize,
    pub window_count_x: usize,
    pub window_count_y: usize,
    pub well_pitch: f64,
    pub block_pitch_horizontal: f64,
    pub block_pitch_vertical: f64,
}

impl ChipFormat {
    /// Total number of crystal sites on the chip
    pub fn site_count(&self) -> usize {
        self.block_count_x * self.block_count_y * self.window_count_x * self.window_count_y
    }

    /// Total number of blocks on the chip
    pub fn block_count(&self) -> usize {
        self.block_count_x * self.block_count_y
    }
}

/// Get the grid format of a chip type.
///
/// Only chip types with a regular block/window grid have a format; the others fail with
/// [`ChipFormatError::UnsupportedChipType`].
pub fn get_format(chip_type: ChipType) -> Result<ChipFormat, ChipFormatError> {
    match chip_type {
        ChipType::Oxford => Ok(ChipFormat {
            block_count_x: 8,
            block_count_y: 8,
            window_count_x: 20,
            window_count_y: 20,
            well_pitch: 0.125,
            block_pitch_horizontal: 0.800,
            block_pitch_vertical: 0.800,
        }),
        ChipType::OxfordInner => Ok(ChipFormat {
            block_count_x: 1,
            block_count_y: 1,
            window_count_x: 25,
            window_count_y: 25,
            well_pitch: 0.600,
            block_pitch_horizontal: 0.0,
            block_pitch_vertical: 0.0,
        }),
        ChipType::Minichip => Ok(ChipFormat {
            block_count_x: 1,
            block_count_y: 1,
            window_count_x: 20,
            window_count_y: 20,
            well_pitch: 0.125,
            block_pitch_horizontal: 0.0,
            block_pitch_vertical: 0.0,
        }),
        ChipType::Oxford6x6 => Ok(ChipFormat {
            block_count_x: 6,
            block_count_y: 6,
            window_count_x: 20,
            window_count_y: 20,
            well_pitch: 0.125,
            block_pitch_horizontal: 0.800,
            block_pitch_vertical: 0.800,
        }),
        _ => Err(ChipFormatError::UnsupportedChipType(chip_type.to_string())),
    }
}
