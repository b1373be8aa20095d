//! Well addresses (`A1`, `H12`, `AB99`)
//!
//! Rows are letters in bijective base 26 (`A` = 1, `Z` = 26, `AA` = 27),
//! columns are decimal. Parsing is case-insensitive; display is upper case.

use core::fmt;
use core::str::FromStr;

use crate::error::Error;

/// A row/column address inside a rack, both 1-based
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WellId {
    row: u32,
    col: u32,
}

impl WellId {
    /// Build from 1-based indices
    pub fn new(row: u32, col: u32) -> Option<Self> {
        (row >= 1 && col >= 1).then_some(Self { row, col })
    }

    /// 1-based row index
    pub fn row(&self) -> u32 {
        self.row
    }

    /// 1-based column index
    pub fn col(&self) -> u32 {
        self.col
    }

    /// Row letters (`1` -> `A`, `27` -> `AA`)
    pub fn row_letters(&self) -> String {
        row_letters(self.row)
    }
}

/// Render a 1-based row index as letters
pub fn row_letters(mut row: u32) -> String {
    let mut letters = Vec::new();
    while row > 0 {
        let rem = (row - 1) % 26;
        letters.push(b'A' + rem as u8);
        row = (row - 1) / 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

impl FromStr for WellId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::ResourceNotFound(format!("well address {s:?}"));
        let split = s
            .find(|c: char| c.is_ascii_digit())
            .ok_or_else(invalid)?;
        let (letters, digits) = s.split_at(split);
        if letters.is_empty()
            || !letters.chars().all(|c| c.is_ascii_alphabetic())
            || !digits.chars().all(|c| c.is_ascii_digit())
        {
            return Err(invalid());
        }

        let mut row: u32 = 0;
        for c in letters.chars() {
            let value = c.to_ascii_uppercase() as u32 - 'A' as u32 + 1;
            row = row
                .checked_mul(26)
                .and_then(|r| r.checked_add(value))
                .ok_or_else(invalid)?;
        }
        let col: u32 = digits.parse().map_err(|_| invalid())?;
        WellId::new(row, col).ok_or_else(invalid)
    }
}

impl fmt::Display for WellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.row_letters(), self.col)
    }
}
