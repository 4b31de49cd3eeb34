//! Packages and the package-specific data which seeds journal construction.
use crate::id::{InstitutionID, IssnL, PackageID};
use crate::reference::check_quantity;
use crate::units::{Money, Usage};
use crate::year::YearRange;
use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// A subscription container belonging to one institution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
    /// Unique identifier for the package
    pub id: PackageID,
    /// The institution which owns the package
    pub institution_id: InstitutionID,
    /// Display name of the institution
    pub institution_name: String,
    /// Currency used for all prices in the package
    pub currency: String,
    /// Current annual cost of the big-deal package
    pub big_deal_cost: Money,
    /// Expected annual percentage increase in the big-deal cost, if known for this package
    pub big_deal_cost_increase: Option<f64>,
    /// The first calendar year of the projection
    pub base_year: u32,
}

/// Package-specific records keyed by ISSN-L
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageData {
    /// Counted annual usage from uploaded usage reports
    pub usage: HashMap<IssnL, Usage>,
    /// Subscription price per journal: the package's custom price, or the public list price
    pub prices: HashMap<IssnL, Money>,
    /// Perpetual-access holdings
    pub perpetual_access: HashMap<IssnL, Vec<YearRange>>,
    /// Citations made by the institution's authors
    pub citations: HashMap<IssnL, f64>,
    /// Papers authored by the institution's researchers
    pub authorships: HashMap<IssnL, f64>,
}

impl PackageData {
    /// The journals in the package: everything with either usage or a price
    pub fn journal_issns(&self) -> BTreeSet<IssnL> {
        self.usage
            .keys()
            .chain(self.prices.keys())
            .cloned()
            .collect()
    }

    /// Check that every usage figure, price and count is a finite number which isn't negative
    pub fn validate(&self) -> Result<()> {
        for (issn_l, usage) in &self.usage {
            check_quantity("usage", issn_l, usage.value())?;
        }
        for (issn_l, price) in &self.prices {
            check_quantity("price", issn_l, price.value())?;
        }
        for (issn_l, citations) in &self.citations {
            check_quantity("citations", issn_l, *citations)?;
        }
        for (issn_l, authorships) in &self.authorships {
            check_quantity("authorships", issn_l, *authorships)?;
        }

        Ok(())
    }
}

impl Package {
    /// Check the package's cost figures
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.big_deal_cost.is_finite() && self.big_deal_cost >= Money::ZERO,
            "Invalid big deal cost for package {}: {}",
            self.id,
            self.big_deal_cost
        );
        if let Some(increase) = self.big_deal_cost_increase {
            ensure!(
                increase.is_finite() && increase >= 0.0,
                "Invalid big deal cost increase for package {}: {increase}",
                self.id
            );
        }

        Ok(())
    }
}
