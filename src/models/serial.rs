//! Serial-number series.
//!
//! A start value is split into a free-form prefix and a trailing run of
//! decimal digits. The i-th serial keeps the prefix and adds `i` to the
//! number, zero-padded to the width of the original digit run. Numbers that
//! outgrow the width simply get longer (`A9` is followed by `A10`), so every
//! serial in a series is distinct.

use regex::Regex;
use std::sync::LazyLock;

use crate::error::ValidationError;

static START_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^(.*?)([0-9]+)$").expect("valid serial pattern"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSeries {
    prefix: String,
    base: u64,
    width: usize,
    count: u32,
}

impl SerialSeries {
    /// Parse `start` and check that `count` serials fit in the number space.
    pub fn new(start: &str, count: u32) -> Result<Self, ValidationError> {
        let captures = START_PATTERN.captures(start).ok_or_else(|| {
            ValidationError::new(format!(
                "series.start '{start}' must end with a numeric part"
            ))
        })?;

        let prefix = captures.get(1).map_or("", |m| m.as_str()).to_string();
        let digits = captures.get(2).map_or("", |m| m.as_str());
        let base: u64 = digits.parse().map_err(|_| {
            ValidationError::new(format!("series.start '{start}' numeric part is too long"))
        })?;

        if count > 0 && base.checked_add(u64::from(count) - 1).is_none() {
            return Err(ValidationError::new(format!(
                "series starting at '{start}' overflows after {count} serials"
            )));
        }

        Ok(Self {
            prefix,
            base,
            width: digits.len(),
            count,
        })
    }

    pub fn len(&self) -> usize {
        self.count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// The serial at `index`, or `None` past the end of the series.
    pub fn code(&self, index: u32) -> Option<String> {
        if index >= self.count {
            return None;
        }
        let number = self.base + u64::from(index);
        Some(format!(
            "{}{:0width$}",
            self.prefix,
            number,
            width = self.width
        ))
    }

    pub fn iter(&self) -> impl Iterator<Item = String> + '_ {
        (0..self.count).filter_map(|i| self.code(i))
    }
}
