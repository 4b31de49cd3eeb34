//! Journals and the per-journal usage-allocation engine.
//!
//! A [`Journal`] is one ISSN-L in the context of one package. It is built fresh for every scenario
//! evaluation by combining reference data with the package's own usage, price and perpetual-access
//! records, and is then evaluated into a five-year [`JournalMetrics`] breakdown.
use crate::allocation::{AllocationInputs, AllocationPipeline, Cohort, UsageBreakdown};
use crate::assumptions::Assumptions;
use crate::finance::{CostPerUse, Ncppu, compound_by_year, ncppu, sum_years};
use crate::id::IssnL;
use crate::package::PackageData;
use crate::reference::{JournalReference, OaCounts, oa_counts_for_year};
use crate::units::{Dimensionless, Money, Usage};
use crate::year::{YearRange, YearlyValues, calendar_year};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How a journal is subscribed in a scenario
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SubscriptionKind {
    /// Not subscribed
    #[default]
    None,
    /// Subscribed under the package's big-deal terms
    Bulk,
    /// Subscribed individually, at the journal's own price
    Custom,
}

impl SubscriptionKind {
    /// Whether the journal is subscribed at all
    pub fn is_subscribed(self) -> bool {
        self != Self::None
    }
}

/// One journal within one package
#[derive(Debug, Clone, PartialEq)]
pub struct Journal {
    /// The journal's ISSN-L
    pub issn_l: IssnL,
    /// Journal title, or the ISSN-L if there is no metadata
    pub title: String,
    /// Subject area
    pub subject: Option<String>,
    /// Publisher name
    pub publisher: Option<String>,
    /// Whether the journal is published by a scholarly society
    pub is_society_journal: bool,
    /// Subscription price, if known
    pub price: Option<Money>,
    /// Counted annual usage from the package's usage reports
    pub counted_usage: Usage,
    /// Citations made by the institution's authors
    pub citations: f64,
    /// Papers authored by the institution's researchers
    pub authorships: f64,
    /// Delayed-OA embargo in months
    pub embargo_months: Option<u32>,
    /// The first calendar year of the projection
    pub base_year: u32,
    /// Current subscription state
    pub subscription: SubscriptionKind,
    /// Whether any reference data was found for the journal
    pub has_reference_data: bool,
    social_network_rate: Dimensionless,
    downloads_by_age: Vec<f64>,
    oa_by_year: BTreeMap<u32, OaCounts>,
    paper_counts: BTreeMap<u32, f64>,
    perpetual_access: Vec<YearRange>,
}

/// Everything calculated for one journal under one set of assumptions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalMetrics {
    /// Usage by channel and year
    pub usage: UsageBreakdown,
    /// Subscription cost by year, if the journal has a price
    pub cost_subscription_by_year: Option<YearlyValues<Money>>,
    /// Cost of ILL by year if the journal were not subscribed
    pub cost_ill_by_year: YearlyValues<Money>,
    /// Total subscription cost over the projection
    pub cost_subscription: Option<Money>,
    /// Total ILL cost over the projection if the journal were not subscribed
    pub cost_ill: Money,
    /// Total usage which is neither free nor covered by perpetual access
    pub paywalled_usage: Usage,
    /// Total ILL usage if the journal were not subscribed
    pub ill_usage_unsubscribed: Usage,
    /// Net cost per paid use
    pub ncppu: Ncppu,
    /// Subscription cost per paid use
    pub cost_per_use: CostPerUse,
    /// What the library actually pays for the journal in this scenario
    pub cost_actual: Money,
}

impl Journal {
    /// Build a journal from reference and package data.
    ///
    /// Missing data is never an error: absent fields fall back to "no data" values.
    pub fn new(
        issn_l: IssnL,
        reference: &JournalReference,
        package_data: &PackageData,
        base_year: u32,
    ) -> Self {
        let metadata = reference.metadata;
        Self {
            title: metadata.map_or_else(|| issn_l.to_string(), |m| m.title.clone()),
            subject: metadata.and_then(|m| m.subject.clone()),
            publisher: metadata.and_then(|m| m.publisher.clone()),
            is_society_journal: metadata.is_some_and(|m| m.is_society_journal),
            price: package_data.prices.get(&issn_l).copied(),
            counted_usage: Usage(non_negative(
                &issn_l,
                "usage",
                package_data.usage.get(&issn_l).map_or(0.0, |usage| usage.value()),
            )),
            citations: non_negative(
                &issn_l,
                "citations",
                package_data.citations.get(&issn_l).copied().unwrap_or(0.0),
            ),
            authorships: non_negative(
                &issn_l,
                "authorships",
                package_data.authorships.get(&issn_l).copied().unwrap_or(0.0),
            ),
            embargo_months: reference.embargo_months,
            base_year,
            subscription: SubscriptionKind::None,
            has_reference_data: reference.is_known(),
            social_network_rate: Dimensionless(reference.social_network_rate.unwrap_or(0.0)),
            downloads_by_age: reference
                .downloads_by_age
                .unwrap_or_default()
                .iter()
                .map(|&downloads| non_negative(&issn_l, "downloads", downloads))
                .collect(),
            oa_by_year: reference.oa_by_year.cloned().unwrap_or_default(),
            paper_counts: reference.paper_counts.cloned().unwrap_or_default(),
            perpetual_access: package_data
                .perpetual_access
                .get(&issn_l)
                .cloned()
                .unwrap_or_default(),
            issn_l,
        }
    }

    /// Annual usage with citations and authorships converted into equivalent downloads
    pub fn weighted_usage(&self, assumptions: &Assumptions) -> Usage {
        self.counted_usage
            + Usage(self.citations * assumptions.weight_citation)
            + Usage(self.authorships * assumptions.weight_authorship)
    }

    /// The annual percentage increase which applies to this journal's price
    fn price_increase(&self, assumptions: &Assumptions) -> f64 {
        match self.subscription {
            SubscriptionKind::Bulk => assumptions.cost_bigdeal_increase,
            SubscriptionKind::Custom | SubscriptionKind::None => assumptions.cost_alacarte_increase,
        }
    }

    /// Subscription cost for each projection year, if the journal has a price
    pub fn cost_subscription_by_year(&self, assumptions: &Assumptions) -> Option<YearlyValues<Money>> {
        let price = self.price? * assumptions.content_fee_multiplier();
        Some(compound_by_year(price, self.price_increase(assumptions)))
    }

    /// The fraction of papers from `publication_year` which are OA on publication
    fn instant_oa_fraction(&self, publication_year: u32, assumptions: &Assumptions) -> f64 {
        let Some(counts) = oa_counts_for_year(&self.oa_by_year, publication_year) else {
            return 0.0;
        };

        let mut counts = *counts;
        if counts.num_papers <= 0.0 {
            // Fall back to the journal's paper count for the denominator
            counts.num_papers = self
                .paper_counts
                .range(..=publication_year)
                .next_back()
                .or_else(|| self.paper_counts.iter().next())
                .map_or(0.0, |(_, count)| *count);
        }

        counts.instant_fraction(
            assumptions.include_bronze,
            assumptions.include_submitted_version,
        )
    }

    /// The fraction of a cohort's usage year which falls after the embargo has expired
    fn post_embargo_fraction(&self, age: usize) -> f64 {
        let Some(embargo) = self.embargo_months else {
            return 0.0;
        };

        let months_available = 12.0 * (age as f64 + 1.0) - f64::from(embargo);
        (months_available / 12.0).clamp(0.0, 1.0)
    }

    /// Evaluate the journal under the given assumptions
    pub fn evaluate(&self, assumptions: &Assumptions, pipeline: &AllocationPipeline) -> JournalMetrics {
        let usage = pipeline.allocate(self, assumptions);
        let ill_fraction = assumptions.ill_fraction();
        let cost_ill_by_year: YearlyValues<Money> = std::array::from_fn(|year_index| {
            let ill_usage = usage.years[year_index].paywalled() * ill_fraction;
            Money(ill_usage.value() * assumptions.cost_ill.value())
        });
        let cost_subscription_by_year = self.cost_subscription_by_year(assumptions);

        let totals = usage.totals();
        let paywalled_usage = totals.paywalled();
        let cost_subscription = cost_subscription_by_year.as_ref().map(sum_years);
        let cost_ill = sum_years(&cost_ill_by_year);
        let cost_actual = if self.subscription.is_subscribed() {
            cost_subscription.unwrap_or(Money::ZERO)
        } else {
            cost_ill
        };

        JournalMetrics {
            usage,
            cost_subscription_by_year,
            cost_ill_by_year,
            cost_subscription,
            cost_ill,
            paywalled_usage,
            ill_usage_unsubscribed: paywalled_usage * ill_fraction,
            ncppu: ncppu(cost_subscription, cost_ill, paywalled_usage),
            cost_per_use: cost_subscription
                .map_or(CostPerUse::UNDEFINED, |cost| CostPerUse::new(cost, paywalled_usage)),
            cost_actual,
        }
    }
}

/// Replace a negative or non-finite input with zero, logging a warning
fn non_negative(issn_l: &IssnL, what: &str, value: f64) -> f64 {
    if value.is_finite() && value >= 0.0 {
        value
    } else {
        warn!("Treating invalid {what} value {value} for journal {issn_l} as zero");
        0.0
    }
}

impl AllocationInputs for Journal {
    fn issn_l(&self) -> &IssnL {
        &self.issn_l
    }

    fn cohorts(&self, year_index: usize, assumptions: &Assumptions) -> Vec<Cohort> {
        let year = calendar_year(self.base_year, year_index);
        let total = self.weighted_usage(assumptions) * Dimensionless(assumptions.usage_growth[year_index]);

        let population: f64 = self.downloads_by_age.iter().sum();
        if !(population.is_finite() && population > 0.0) {
            return vec![Cohort {
                year_index,
                age: 0,
                publication_year: year,
                usage: total,
            }];
        }

        self.downloads_by_age
            .iter()
            .enumerate()
            .map(|(age, downloads)| Cohort {
                year_index,
                age,
                publication_year: year.saturating_sub(age as u32),
                usage: total * Dimensionless(downloads / population),
            })
            .collect()
    }

    fn open_access_fraction(&self, cohort: &Cohort, assumptions: &Assumptions) -> Dimensionless {
        let instant = self.instant_oa_fraction(cohort.publication_year, assumptions);
        let delayed = (1.0 - instant) * self.post_embargo_fraction(cohort.age);
        Dimensionless(instant + delayed)
    }

    fn social_network_rate(&self) -> Dimensionless {
        self.social_network_rate
    }

    fn has_perpetual_access(&self, publication_year: u32) -> bool {
        self.perpetual_access
            .iter()
            .any(|range| range.contains(publication_year))
    }

    fn is_subscribed(&self) -> bool {
        self.subscription.is_subscribed()
    }
}
