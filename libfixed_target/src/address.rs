use super::chip_format::{get_format, ChipType};
use super::error::AddressError;
use std::fmt::Display;
use std::str::FromStr;

/// Block rows are lettered A, B, C...
pub const BLOCK_ROW_LABELS: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
/// Window rows and columns share one label alphabet
pub const WINDOW_LABELS: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0";

/// A crystal site on a chip, e.g. `C4_ba`.
///
/// All indices are zero based. The textual form prints the block column one based (`A1` is the
/// first block) and the window row then window column as single characters from
/// [`WINDOW_LABELS`]. Every row and window index of an `Address` has a label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    block_row: usize,
    block_col: usize,
    window_row: usize,
    window_col: usize,
}

impl Address {
    pub fn new(
        block_row: usize,
        block_col: usize,
        window_row: usize,
        window_col: usize,
    ) -> Result<Self, AddressError> {
        check_label(BLOCK_ROW_LABELS, block_row)?;
        check_label(WINDOW_LABELS, window_row)?;
        check_label(WINDOW_LABELS, window_col)?;
        Ok(Self {
            block_row,
            block_col,
            window_row,
            window_col,
        })
    }

    pub fn block_row(&self) -> usize {
        self.block_row
    }

    pub fn block_col(&self) -> usize {
        self.block_col
    }

    pub fn window_row(&self) -> usize {
        self.window_row
    }

    pub fn window_col(&self) -> usize {
        self.window_col
    }

    /// The block part of the address, e.g. `C4`
    pub fn block_name(&self) -> String {
        format!("{}{}", label(BLOCK_ROW_LABELS, self.block_row), self.block_col + 1)
    }

    /// The window part of the address, e.g. `ba`
    pub fn window_name(&self) -> String {
        format!(
            "{}{}",
            label(WINDOW_LABELS, self.window_row),
            label(WINDOW_LABELS, self.window_col)
        )
    }

    /// Parse the trailing address out of a full crystal name such as `mychip_C4_ba`
    pub fn from_crystal_name(name: &str) -> Result<Self, AddressError> {
        let mut parts = name.rsplitn(3, '_');
        let window = parts.next();
        let block = parts.next();
        match (block, window) {
            (Some(b), Some(w)) => Self::from_str(&format!("{b}_{w}"))
                .map_err(|_| AddressError::MalformedAddress(name.to_string())),
            _ => Err(AddressError::MalformedAddress(name.to_string())),
        }
    }
}

fn check_label(alphabet: &str, index: usize) -> Result<(), AddressError> {
    if index < alphabet.len() {
        Ok(())
    } else {
        Err(AddressError::UnlabelledIndex {
            index,
            labels: alphabet.len(),
        })
    }
}

/// Both alphabets are ASCII and `index` was checked by [`Address::new`]
fn label(alphabet: &str, index: usize) -> char {
    char::from(alphabet.as_bytes()[index])
}

impl Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.block_name(), self.window_name())
    }
}

impl FromStr for Address {
    type Err = AddressError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || AddressError::MalformedAddress(s.to_string());
        let (block, window) = s.split_once('_').ok_or_else(malformed)?;

        let mut block_chars = block.chars();
        let row_char = block_chars.next().ok_or_else(malformed)?;
        let block_row = BLOCK_ROW_LABELS.find(row_char).ok_or_else(malformed)?;
        let block_col: usize = block_chars.as_str().parse().map_err(|_| malformed())?;
        if block_col == 0 {
            return Err(malformed());
        }

        let window_chars: Vec<char> = window.chars().collect();
        if window_chars.len() != 2 {
            return Err(malformed());
        }
        let window_row = WINDOW_LABELS.find(window_chars[0]).ok_or_else(malformed)?;
        let window_col = WINDOW_LABELS.find(window_chars[1]).ok_or_else(malformed)?;

        Self::new(block_row, block_col - 1, window_row, window_col)
    }
}

/// Map an address to its physical (x, y) offset in mm from the chip origin.
///
/// Block and window pitches compose additively, assuming a uniform pitch across the chip.
pub fn address_to_xy(address: &Address, chip_type: ChipType) -> Result<(f64, f64), AddressError> {
    let format = get_format(chip_type)?;
    if address.block_row >= format.block_count_y || address.block_col >= format.block_count_x {
        return Err(AddressError::OutOfRange {
            address: address.to_string(),
            level: "block",
            rows: format.block_count_y,
            cols: format.block_count_x,
        });
    }
    if address.window_row >= format.window_count_y || address.window_col >= format.window_count_x
    {
        return Err(AddressError::OutOfRange {
            address: address.to_string(),
            level: "window",
            rows: format.window_count_y,
            cols: format.window_count_x,
        });
    }

    let block_col = address.block_col as f64;
    let block_row = address.block_row as f64;
    let x = block_col * format.block_pitch_horizontal
        + block_col * (format.window_count_x - 1) as f64 * format.well_pitch
        + address.window_col as f64 * format.well_pitch;
    let y = block_row * format.block_pitch_vertical
        + block_row * (format.window_count_y - 1) as f64 * format.well_pitch
        + address.window_row as f64 * format.well_pitch;
    Ok((x, y))
}
