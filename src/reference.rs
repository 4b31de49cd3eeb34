//! The Reference Data Loader's data model: large, slowly-changing per-ISSN-L tables.
//!
//! Every table is keyed independently by ISSN-L and any of them may be missing a given journal.
//! Lookups therefore return `Option`s and callers degrade to "no data" rather than failing.
use crate::id::IssnL;
use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Descriptive metadata for a journal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalMetadata {
    /// Journal title
    pub title: String,
    /// Subject area
    pub subject: Option<String>,
    /// Publisher name
    pub publisher: Option<String>,
    /// Whether the journal is published by a scholarly society
    pub is_society_journal: bool,
}

/// Counts of papers published in one year by their best open-access status.
///
/// The OA categories are mutually exclusive, so they never sum to more than `num_papers` in
/// consistent data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OaCounts {
    /// Total number of papers published
    pub num_papers: f64,
    /// Papers published in fully-OA journals
    pub gold: f64,
    /// Papers made OA by the publisher in a subscription journal
    pub hybrid: f64,
    /// Papers free to read on the publisher site without an open licence
    pub bronze: f64,
    /// Papers with an accepted or published version in a repository
    pub green: f64,
    /// Papers whose only free copy is a submitted version (preprint)
    pub green_submitted: f64,
}

impl OaCounts {
    /// The fraction of papers immediately available as OA under the given flags
    pub fn instant_fraction(&self, include_bronze: bool, include_submitted_version: bool) -> f64 {
        if self.num_papers <= 0.0 {
            return 0.0;
        }

        let mut oa = self.gold + self.hybrid + self.green;
        if include_bronze {
            oa += self.bronze;
        }
        if include_submitted_version {
            oa += self.green_submitted;
        }

        oa / self.num_papers
    }
}

/// Which journals to load reference data for
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdentifierSet {
    /// Every journal in the dataset
    All,
    /// Only these journals
    Only(BTreeSet<IssnL>),
}

impl IdentifierSet {
    /// Whether `issn_l` is part of the set
    pub fn contains(&self, issn_l: &IssnL) -> bool {
        match self {
            Self::All => true,
            Self::Only(issns) => issns.contains(issn_l),
        }
    }
}

impl FromIterator<IssnL> for IdentifierSet {
    fn from_iter<T: IntoIterator<Item = IssnL>>(iter: T) -> Self {
        Self::Only(iter.into_iter().collect())
    }
}

/// Row counts for each reference table.
///
/// Used to check whether a local snapshot is complete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceRowCounts {
    /// Rows in the journal metadata table
    pub metadata: u64,
    /// Rows in the embargo table
    pub embargo: u64,
    /// Rows in the download curve table
    pub downloads: u64,
    /// Rows in the OA status table
    pub oa_status: u64,
    /// Rows in the social network table
    pub social_networks: u64,
    /// Rows in the paper counts table
    pub paper_counts: u64,
}

/// Reference data for a set of journals, with one lookup map per table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceData {
    /// Journal metadata
    pub metadata: HashMap<IssnL, JournalMetadata>,
    /// Delayed-OA embargo length in months
    pub embargo_months: HashMap<IssnL, u32>,
    /// Population downloads by paper age in years (index 0 = current-year papers)
    pub downloads_by_age: HashMap<IssnL, Vec<f64>>,
    /// OA status counts by publication year
    pub oa_by_year: HashMap<IssnL, BTreeMap<u32, OaCounts>>,
    /// Fraction of usage which can be met through academic social networks
    pub social_network_rate: HashMap<IssnL, f64>,
    /// Number of papers published by year
    pub paper_counts: HashMap<IssnL, BTreeMap<u32, f64>>,
}

impl ReferenceData {
    /// Look up everything known about one journal
    pub fn journal(&self, issn_l: &IssnL) -> JournalReference<'_> {
        JournalReference {
            metadata: self.metadata.get(issn_l),
            embargo_months: self.embargo_months.get(issn_l).copied(),
            downloads_by_age: self.downloads_by_age.get(issn_l).map(Vec::as_slice),
            oa_by_year: self.oa_by_year.get(issn_l),
            social_network_rate: self.social_network_rate.get(issn_l).copied(),
            paper_counts: self.paper_counts.get(issn_l),
        }
    }

    /// Every ISSN-L that appears in at least one table
    pub fn issns(&self) -> BTreeSet<IssnL> {
        self.metadata
            .keys()
            .chain(self.embargo_months.keys())
            .chain(self.downloads_by_age.keys())
            .chain(self.oa_by_year.keys())
            .chain(self.social_network_rate.keys())
            .chain(self.paper_counts.keys())
            .cloned()
            .collect()
    }

    /// A copy restricted to the given identifiers
    pub fn restrict_to(&self, ids: &IdentifierSet) -> ReferenceData {
        fn filter<V: Clone>(map: &HashMap<IssnL, V>, ids: &IdentifierSet) -> HashMap<IssnL, V> {
            map.iter()
                .filter(|(issn_l, _)| ids.contains(issn_l))
                .map(|(issn_l, value)| (issn_l.clone(), value.clone()))
                .collect()
        }

        ReferenceData {
            metadata: filter(&self.metadata, ids),
            embargo_months: filter(&self.embargo_months, ids),
            downloads_by_age: filter(&self.downloads_by_age, ids),
            oa_by_year: filter(&self.oa_by_year, ids),
            social_network_rate: filter(&self.social_network_rate, ids),
            paper_counts: filter(&self.paper_counts, ids),
        }
    }

    /// Check that every count, curve value and rate is a finite number which isn't negative
    pub fn validate(&self) -> Result<()> {
        for (issn_l, curve) in &self.downloads_by_age {
            for downloads in curve {
                check_quantity("downloads", issn_l, *downloads)?;
            }
        }
        for (issn_l, by_year) in &self.oa_by_year {
            for counts in by_year.values() {
                for value in [
                    counts.num_papers,
                    counts.gold,
                    counts.hybrid,
                    counts.bronze,
                    counts.green,
                    counts.green_submitted,
                ] {
                    check_quantity("OA paper count", issn_l, value)?;
                }
            }
        }
        for (issn_l, rate) in &self.social_network_rate {
            check_quantity("social network rate", issn_l, *rate)?;
        }
        for (issn_l, by_year) in &self.paper_counts {
            for num_papers in by_year.values() {
                check_quantity("paper count", issn_l, *num_papers)?;
            }
        }

        Ok(())
    }

    /// The number of rows each table would occupy in the relational store
    pub fn row_counts(&self) -> ReferenceRowCounts {
        ReferenceRowCounts {
            metadata: self.metadata.len() as u64,
            embargo: self.embargo_months.len() as u64,
            downloads: self
                .downloads_by_age
                .values()
                .map(|curve| curve.len() as u64)
                .sum(),
            oa_status: self.oa_by_year.values().map(|rows| rows.len() as u64).sum(),
            social_networks: self.social_network_rate.len() as u64,
            paper_counts: self.paper_counts.values().map(|rows| rows.len() as u64).sum(),
        }
    }
}

/// Reference data for a single journal.
///
/// Every field is optional: a journal missing from a table simply has no data for it.
#[derive(Debug, Clone, Copy, Default)]
pub struct JournalReference<'a> {
    /// Journal metadata
    pub metadata: Option<&'a JournalMetadata>,
    /// Delayed-OA embargo in months
    pub embargo_months: Option<u32>,
    /// Population downloads by paper age
    pub downloads_by_age: Option<&'a [f64]>,
    /// OA status counts by publication year
    pub oa_by_year: Option<&'a BTreeMap<u32, OaCounts>>,
    /// Social network availability rate
    pub social_network_rate: Option<f64>,
    /// Papers published by year
    pub paper_counts: Option<&'a BTreeMap<u32, f64>>,
}

impl JournalReference<'_> {
    /// Whether the journal appears in any reference table
    pub fn is_known(&self) -> bool {
        self.metadata.is_some()
            || self.embargo_months.is_some()
            || self.downloads_by_age.is_some()
            || self.oa_by_year.is_some()
            || self.social_network_rate.is_some()
            || self.paper_counts.is_some()
    }
}

/// Check that a per-journal quantity is finite and not negative
pub(crate) fn check_quantity(what: &str, issn_l: &IssnL, value: f64) -> Result<()> {
    ensure!(
        value.is_finite() && value >= 0.0,
        "Invalid {what} for {issn_l}: {value}"
    );

    Ok(())
}

/// Find the OA counts that apply to papers published in `year`.
///
/// Uses the latest year with data at or before `year`, falling back to the earliest year with
/// data for years before the dataset starts.
pub fn oa_counts_for_year(oa_by_year: &BTreeMap<u32, OaCounts>, year: u32) -> Option<&OaCounts> {
    oa_by_year
        .range(..=year)
        .next_back()
        .or_else(|| oa_by_year.iter().next())
        .map(|(_, counts)| counts)
}
