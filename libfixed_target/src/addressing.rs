//! Enumeration of every crystal site of a chip in a given visiting order.
//!
//! Orders are built out of simple one dimensional paths (see [`PathWay`]) which are zipped
//! together to form two dimensional traversals: one path for the rows, one for the columns.
use std::str::FromStr;

use super::address::Address;
use super::chip_format::{get_format, ChipType};
use super::error::AddressError;

/// A one dimensional path over a list of labels.
///
/// `reps` of `None` means "as many repetitions as there are labels", which gives a square
/// traversal when two paths over the same labels are zipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathWay {
    /// Repeat the whole list: `abc abc abc`
    Typewriter { reps: Option<usize> },
    /// Repeat the list alternating direction: `abc cba abc`
    Snake { reps: Option<usize> },
    /// Repeat each entry in place: `aaa bbb ccc`
    Expand { reps: Option<usize> },
}

impl FromStr for PathWay {
    type Err = AddressError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AddressError::InvalidTraversalOrder(s.to_string());
        let (name, count) = match s.find(|c: char| c.is_ascii_digit()) {
            Some(idx) => (&s[..idx], Some(s[idx..].parse::<usize>().map_err(|_| invalid())?)),
            None => (s, None),
        };
        match name {
            "typewriter" => Ok(Self::Typewriter { reps: count }),
            "snake" => Ok(Self::Snake { reps: count }),
            "expand" => Ok(Self::Expand { reps: count }),
            _ => Err(invalid()),
        }
    }
}

/// Build a path over `items`. Empty input always gives an empty path.
pub fn build_path<T: Clone>(items: &[T], way: PathWay, reverse: bool) -> Vec<T> {
    if items.is_empty() {
        return Vec::new();
    }
    let forward: Vec<T> = if reverse {
        items.iter().rev().cloned().collect()
    } else {
        items.to_vec()
    };
    let backward: Vec<T> = forward.iter().rev().cloned().collect();

    let mut path = Vec::new();
    match way {
        PathWay::Typewriter { reps } => {
            for _ in 0..reps.unwrap_or(forward.len()) {
                path.extend_from_slice(&forward);
            }
        }
        PathWay::Snake { reps } => {
            for rep in 0..reps.unwrap_or(forward.len()) {
                if rep % 2 == 0 {
                    path.extend_from_slice(&forward);
                } else {
                    path.extend_from_slice(&backward);
                }
            }
        }
        PathWay::Expand { reps } => {
            let reps = reps.unwrap_or(forward.len());
            for entry in forward.iter() {
                for _ in 0..reps {
                    path.push(entry.clone());
                }
            }
        }
    }
    path
}

/// Parse a path token and build the path in one step
pub fn path_from_token<T: Clone>(items: &[T], token: &str) -> Result<Vec<T>, AddressError> {
    Ok(build_path(items, PathWay::from_str(token)?, false))
}

/// The order in which the sites of a chip are listed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalOrder {
    /// Row-major raster over blocks, then row-major over the windows of each block
    Alphanumeric,
    /// The order the stage actually visits sites during a collection
    ScanOptimized,
}

impl FromStr for TraversalOrder {
    type Err = AddressError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "alphanumeric" | "typewriter" => Ok(Self::Alphanumeric),
            "shot" | "snake" | "scan_optimized" => Ok(Self::ScanOptimized),
            _ => Err(AddressError::InvalidTraversalOrder(s.to_string())),
        }
    }
}

fn zip_paths(
    first: (&[usize], PathWay, bool),
    second: (&[usize], PathWay, bool),
) -> Vec<(usize, usize)> {
    build_path(first.0, first.1, first.2)
        .into_iter()
        .zip(build_path(second.0, second.1, second.2))
        .collect()
}

fn indices(n: usize) -> Vec<usize> {
    (0..n).collect()
}

/// List every site of the chip in the requested order.
///
/// # Scan optimized order
/// Blocks are visited column by column, snaking down the first column and back up the second.
/// Inside a block the window rows are walked top to bottom on "down" block columns and bottom to
/// top on "up" block columns, with the window columns snaking on alternate rows. The direction
/// flips each time a full block column has been visited.
pub fn enumerate_addresses(
    chip_type: ChipType,
    order: TraversalOrder,
) -> Result<Vec<Address>, AddressError> {
    let format = get_format(chip_type)?;
    let block_rows = indices(format.block_count_y);
    let block_cols = indices(format.block_count_x);
    let window_rows = indices(format.window_count_y);
    let window_cols = indices(format.window_count_x);
    let n_block_rows = block_rows.len();
    let n_block_cols = block_cols.len();
    let n_window_rows = window_rows.len();
    let n_window_cols = window_cols.len();

    let mut addresses = Vec::with_capacity(format.site_count());
    match order {
        TraversalOrder::Alphanumeric => {
            let blocks = zip_paths(
                (&block_rows, PathWay::Expand { reps: Some(n_block_cols) }, false),
                (&block_cols, PathWay::Typewriter { reps: Some(n_block_rows) }, false),
            );
            let windows = zip_paths(
                (&window_rows, PathWay::Expand { reps: Some(n_window_cols) }, false),
                (&window_cols, PathWay::Typewriter { reps: Some(n_window_rows) }, false),
            );
            for (br, bc) in blocks.iter() {
                for (wr, wc) in windows.iter() {
                    addresses.push(Address::new(*br, *bc, *wr, *wc)?);
                }
            }
        }
        TraversalOrder::ScanOptimized => {
            let blocks = zip_paths(
                (&block_rows, PathWay::Snake { reps: Some(n_block_cols) }, false),
                (&block_cols, PathWay::Expand { reps: Some(n_block_rows) }, false),
            );
            let window_down = zip_paths(
                (&window_rows, PathWay::Expand { reps: Some(n_window_cols) }, false),
                (&window_cols, PathWay::Snake { reps: Some(n_window_rows) }, false),
            );
            let window_up = zip_paths(
                (&window_rows, PathWay::Expand { reps: Some(n_window_cols) }, true),
                (&window_cols, PathWay::Snake { reps: Some(n_window_rows) }, false),
            );

            let mut going_up = false;
            let mut count = 0;
            for (br, bc) in blocks.iter() {
                let windows = if going_up { &window_up } else { &window_down };
                for (wr, wc) in windows.iter() {
                    addresses.push(Address::new(*br, *bc, *wr, *wc)?);
                }
                count += 1;
                if count == n_block_rows {
                    count = 0;
                    going_up = !going_up;
                }
            }
        }
    }
    spdlog::debug!(
        "Enumerated {} sites of a {} chip in {:?} order",
        addresses.len(),
        chip_type,
        order
    );
    Ok(addresses)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(addresses: &[Address]) -> Vec<String> {
        addresses.iter().map(|a| a.to_string()).collect()
    }

    #[test]
    fn test_path_ways() {
        let items = ['a', 'b', 'c'];
        let s = |v: Vec<char>| v.into_iter().collect::<String>();
        assert_eq!(s(path_from_token(&items, "typewriter").unwrap()), "abcabcabc");
        assert_eq!(s(path_from_token(&items, "snake").unwrap()), "abccbaabc");
        assert_eq!(s(path_from_token(&items, "expand").unwrap()), "aaabbbccc");
        assert_eq!(s(path_from_token(&items, "expand2").unwrap()), "aabbcc");
        assert_eq!(path_from_token(&items, "snake53").unwrap().len(), 159);
        assert_eq!(
            s(build_path(&items, PathWay::Expand { reps: Some(1) }, true)),
            "cba"
        );
    }

    #[test]
    fn test_empty_and_invalid_paths() {
        let empty: [char; 0] = [];
        assert!(path_from_token(&empty, "snake").unwrap().is_empty());
        match path_from_token(&['a'], "spiral") {
            Err(AddressError::InvalidTraversalOrder(token)) => assert_eq!(token, "spiral"),
            _ => panic!(),
        }
        assert!(PathWay::from_str("snake5x").is_err());
    }

    #[test]
    fn test_alphanumeric_order() {
        let addresses = enumerate_addresses(ChipType::Oxford, TraversalOrder::Alphanumeric).unwrap();
        assert_eq!(addresses.len(), 25600);
        let n = names(&addresses);
        assert_eq!(n[0], "A1_aa");
        assert_eq!(n[1], "A1_ab");
        assert_eq!(n[20], "A1_ba");
        assert_eq!(n[400], "A2_aa");
        assert_eq!(n[400 * 8], "B1_aa");
        assert_eq!(n[25599], "H8_tt");
    }

    #[test]
    fn test_shot_order() {
        let addresses = enumerate_addresses(ChipType::Oxford, TraversalOrder::ScanOptimized).unwrap();
        let n = names(&addresses);
        // First block column runs down with window rows forward
        assert_eq!(&n[0..3], &["A1_aa", "A1_ab", "A1_ac"]);
        assert_eq!(n[19], "A1_at");
        assert_eq!(n[20], "A1_bt");
        assert_eq!(n[400], "B1_aa");
        assert_eq!(n[7 * 400], "H1_aa");
        // Second block column runs back up with window rows reversed
        assert_eq!(n[8 * 400], "H2_ta");
        assert_eq!(n[8 * 400 + 20], "H2_st");
        assert_eq!(n[16 * 400 - 1], "A2_aa");
        assert_eq!(n[16 * 400], "A3_aa");
    }

    #[test]
    fn test_orders_are_permutations() {
        for chip in [ChipType::Oxford, ChipType::OxfordInner, ChipType::Minichip, ChipType::Oxford6x6] {
            let mut alpha = enumerate_addresses(chip, TraversalOrder::Alphanumeric).unwrap();
            let mut shot = enumerate_addresses(chip, TraversalOrder::ScanOptimized).unwrap();
            assert_eq!(alpha.len(), get_format(chip).unwrap().site_count());
            alpha.sort();
            shot.sort();
            assert_eq!(alpha, shot);
            alpha.dedup();
            assert_eq!(alpha.len(), shot.len());
        }
    }

    #[test]
    fn test_traversal_order_parse() {
        assert_eq!(TraversalOrder::from_str("shot").unwrap(), TraversalOrder::ScanOptimized);
        assert_eq!(TraversalOrder::from_str("alphanumeric").unwrap(), TraversalOrder::Alphanumeric);
        assert!(matches!(
            TraversalOrder::from_str("zigzag"),
            Err(AddressError::InvalidTraversalOrder(_))
        ));
        assert!(enumerate_addresses(ChipType::Hamburg, TraversalOrder::Alphanumeric).is_err());
    }
}
