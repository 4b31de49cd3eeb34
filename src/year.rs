//! Code for working with projection years and year ranges.
use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The number of years covered by a projection
pub const NUM_PROJECTION_YEARS: usize = 5;

/// One value per projection year
pub type YearlyValues<T> = [T; NUM_PROJECTION_YEARS];

/// Iterate over the projection year indexes (`0..NUM_PROJECTION_YEARS`)
pub fn projection_years() -> std::ops::Range<usize> {
    0..NUM_PROJECTION_YEARS
}

/// The calendar year corresponding to projection year `year_index`
pub fn calendar_year(base_year: u32, year_index: usize) -> u32 {
    base_year + year_index as u32
}

/// An inclusive range of publication years, optionally open-ended.
///
/// Used to represent perpetual-access (backfile) holdings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearRange {
    /// First year covered
    pub start: u32,
    /// Last year covered, or `None` if coverage is ongoing
    pub end: Option<u32>,
}

impl YearRange {
    /// Create a new [`YearRange`], checking that it is not inverted
    pub fn new(start: u32, end: Option<u32>) -> Result<Self> {
        if let Some(end) = end {
            ensure!(
                end >= start,
                "Invalid year range: end year {end} precedes start year {start}"
            );
        }

        Ok(Self { start, end })
    }

    /// Whether `year` falls inside the range
    pub fn contains(&self, year: u32) -> bool {
        year >= self.start && self.end.is_none_or(|end| year <= end)
    }
}

impl fmt::Display for YearRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            Some(end) => write!(f, "{}-{end}", self.start),
            None => write!(f, "{}-", self.start),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::assert_error;
    use rstest::rstest;

    #[test]
    fn test_inverted_range() {
        assert_error!(
            YearRange::new(2015, Some(2010)),
            "Invalid year range: end year 2010 precedes start year 2015"
        );
    }

    #[rstest]
    #[case(2009, false)]
    #[case(2010, true)]
    #[case(2015, true)]
    #[case(2016, false)]
    fn test_year_range_contains(#[case] year: u32, #[case] expected: bool) {
        let range = YearRange::new(2010, Some(2015)).unwrap();
        assert_eq!(range.contains(year), expected);
    }

    #[test]
    fn test_open_ended_range() {
        let range = YearRange::new(2010, None).unwrap();
        assert!(range.contains(2100));
        assert_eq!(range.to_string(), "2010-");
    }

    #[test]
    fn test_calendar_year() {
        assert_eq!(calendar_year(2024, 0), 2024);
        assert_eq!(calendar_year(2024, 4), 2028);
        assert_eq!(projection_years().count(), NUM_PROJECTION_YEARS);
    }
}
