//! The Scenario Aggregator: all the journals in one package, evaluated under one set of
//! assumptions and one subscription selection.
//!
//! Summary figures are always recomputed from the per-journal metrics. Nothing is kept as a
//! running total, so changing the subscription selection rebuilds every journal's metrics.
use crate::allocation::{AllocationPipeline, Channel, ChannelUsage};
use crate::assumptions::Assumptions;
use crate::cache::ReferenceCache;
use crate::finance::{CostPerUse, Ncppu, compound_by_year, percent_of, sum_years};
use crate::id::{IssnL, PackageID, ScenarioID};
use crate::journal::{Journal, JournalMetrics, SubscriptionKind};
use crate::package::{Package, PackageData};
use crate::reference::{IdentifierSet, ReferenceData};
use crate::store::Store;
use crate::units::{Money, Usage};
use crate::year::YearlyValues;
use anyhow::{Context, Result, bail};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeSet;

/// The journals chosen for subscription in a scenario
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionSelection {
    /// Journals subscribed under big-deal terms
    pub bulk: BTreeSet<IssnL>,
    /// Journals subscribed individually
    pub custom: BTreeSet<IssnL>,
}

impl SubscriptionSelection {
    /// The subscription kind for a journal. Custom wins if a journal appears in both lists.
    pub fn kind_for(&self, issn_l: &IssnL) -> SubscriptionKind {
        if self.custom.contains(issn_l) {
            SubscriptionKind::Custom
        } else if self.bulk.contains(issn_l) {
            SubscriptionKind::Bulk
        } else {
            SubscriptionKind::None
        }
    }
}

/// A persisted scenario configuration.
///
/// Snapshots are append-only: the most recently saved snapshot for a scenario ID is its current
/// state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioSnapshot {
    /// The scenario's identifier
    pub id: ScenarioID,
    /// The package the scenario belongs to
    pub package_id: PackageID,
    /// Display name
    pub name: String,
    /// Journals subscribed under big-deal terms
    #[serde(default)]
    pub subscribed: Vec<IssnL>,
    /// Journals subscribed individually
    #[serde(default)]
    pub custom_subscribed: Vec<IssnL>,
    /// Assumption overrides chosen for this scenario
    #[serde(default)]
    pub settings: Map<String, Value>,
}

impl ScenarioSnapshot {
    /// A new snapshot with no subscriptions and default settings
    pub fn new(id: ScenarioID, package_id: PackageID, name: &str) -> Self {
        Self {
            id,
            package_id,
            name: name.to_string(),
            subscribed: Vec::new(),
            custom_subscribed: Vec::new(),
            settings: Map::new(),
        }
    }

    /// The subscription selection recorded in the snapshot
    pub fn selection(&self) -> SubscriptionSelection {
        SubscriptionSelection {
            bulk: self.subscribed.iter().cloned().collect(),
            custom: self.custom_subscribed.iter().cloned().collect(),
        }
    }
}

/// One journal's results, flattened for display and for consumption by consortia
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalRow {
    /// The journal's ISSN-L
    pub issn_l: IssnL,
    /// Journal title
    pub title: String,
    /// Subject area
    pub subject: Option<String>,
    /// Publisher name
    pub publisher: Option<String>,
    /// Whether the journal is published by a scholarly society
    pub is_society_journal: bool,
    /// Subscription state in the scenario
    pub subscription: SubscriptionKind,
    /// Usage by channel over the whole projection
    pub usage: ChannelUsage,
    /// Paywalled usage over the whole projection
    pub paywalled_usage: Usage,
    /// ILL usage if the journal were not subscribed
    pub ill_usage_unsubscribed: Usage,
    /// Total subscription cost, if the journal has a price
    pub cost_subscription: Option<Money>,
    /// Total ILL cost if the journal were not subscribed
    pub cost_ill: Money,
    /// What the library pays in this scenario
    pub cost_actual: Money,
    /// Net cost per paid use
    pub ncppu: Ncppu,
    /// Subscription cost per paid use
    pub cost_per_use: CostPerUse,
    /// The package the row came from
    pub package_id: PackageID,
    /// The institution which owns the package
    pub institution_name: String,
}

/// Scenario-level totals and statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioSummary {
    /// The package evaluated
    pub package_id: PackageID,
    /// Number of journals in the package
    pub num_journals: usize,
    /// Number of subscribed journals
    pub num_subscribed: usize,
    /// Number of journals subscribed individually
    pub num_custom: usize,
    /// Total cost: subscriptions for subscribed journals, ILL for the rest
    pub cost_total: Money,
    /// Total subscription cost of subscribed journals
    pub cost_subscriptions: Money,
    /// Total ILL cost of unsubscribed journals
    pub cost_ill: Money,
    /// Projected cost of keeping the big deal over the projection
    pub cost_bigdeal_projected: Money,
    /// `cost_total` as a percentage of `cost_bigdeal_projected`
    pub cost_percent: Option<f64>,
    /// Usage by channel over the whole projection
    pub usage: ChannelUsage,
    /// Usage by channel for each projection year
    pub usage_by_year: YearlyValues<ChannelUsage>,
    /// Percentage of usage met without delay
    pub instant_usage_percent: Option<f64>,
}

impl ScenarioSummary {
    /// The percentage of total usage met through `channel`
    pub fn channel_percent(&self, channel: Channel) -> Option<f64> {
        percent_of(self.usage.get(channel), self.usage.total)
    }
}

/// A package evaluated under one set of assumptions
#[derive(Debug, Clone)]
pub struct Scenario {
    /// The package
    pub package: Package,
    /// The assumptions used for every journal
    pub assumptions: Assumptions,
    pipeline: AllocationPipeline,
    journals: Vec<Journal>,
    metrics: Vec<JournalMetrics>,
}

impl Scenario {
    /// Build and evaluate a scenario with the default allocation pipeline.
    ///
    /// Every journal starts unsubscribed.
    pub fn new(
        package: Package,
        package_data: &PackageData,
        reference: &ReferenceData,
        assumptions: Assumptions,
    ) -> Self {
        Self::with_pipeline(
            package,
            package_data,
            reference,
            assumptions,
            AllocationPipeline::default(),
        )
    }

    /// Build and evaluate a scenario with a custom allocation pipeline
    pub fn with_pipeline(
        package: Package,
        package_data: &PackageData,
        reference: &ReferenceData,
        assumptions: Assumptions,
        pipeline: AllocationPipeline,
    ) -> Self {
        let journals: Vec<_> = package_data
            .journal_issns()
            .into_iter()
            .map(|issn_l| {
                let journal_reference = reference.journal(&issn_l);
                Journal::new(issn_l, &journal_reference, package_data, package.base_year)
            })
            .collect();

        let missing = journals.iter().filter(|j| !j.has_reference_data).count();
        if missing > 0 {
            debug!(
                "{missing} of {} journals in package {} have no reference data",
                journals.len(),
                package.id
            );
        }

        let mut scenario = Self {
            package,
            assumptions,
            pipeline,
            journals,
            metrics: Vec::new(),
        };
        scenario.recompute();

        scenario
    }

    /// Re-evaluate every journal from scratch
    fn recompute(&mut self) {
        self.metrics = self
            .journals
            .iter()
            .map(|journal| journal.evaluate(&self.assumptions, &self.pipeline))
            .collect();
    }

    /// Set each journal's subscription state from `selection` and re-evaluate.
    ///
    /// Journals not in the selection become unsubscribed, so applying the same selection twice
    /// gives the same result.
    pub fn apply_subscriptions(&mut self, selection: &SubscriptionSelection) {
        for issn_l in selection.bulk.iter().chain(&selection.custom) {
            if !self.journals.iter().any(|journal| &journal.issn_l == issn_l) {
                debug!(
                    "Ignoring subscription to {issn_l}, which isn't in package {}",
                    self.package.id
                );
            }
        }

        for journal in &mut self.journals {
            journal.subscription = selection.kind_for(&journal.issn_l);
        }
        self.recompute();
    }

    /// The current subscription selection
    pub fn selection(&self) -> SubscriptionSelection {
        let mut selection = SubscriptionSelection::default();
        for journal in &self.journals {
            match journal.subscription {
                SubscriptionKind::Bulk => selection.bulk.insert(journal.issn_l.clone()),
                SubscriptionKind::Custom => selection.custom.insert(journal.issn_l.clone()),
                SubscriptionKind::None => false,
            };
        }

        selection
    }

    /// Iterate over journals and their metrics, in ISSN-L order
    pub fn journals(&self) -> impl Iterator<Item = (&Journal, &JournalMetrics)> {
        self.journals.iter().zip(&self.metrics)
    }

    /// Look up one journal
    pub fn journal(&self, issn_l: &IssnL) -> Option<(&Journal, &JournalMetrics)> {
        self.journals().find(|(journal, _)| &journal.issn_l == issn_l)
    }

    /// Scenario-level totals, summed from the per-journal metrics
    pub fn summary(&self) -> ScenarioSummary {
        let mut usage = ChannelUsage::default();
        let mut usage_by_year: YearlyValues<ChannelUsage> = Default::default();
        let mut cost_subscriptions = Money::ZERO;
        let mut cost_ill = Money::ZERO;
        let mut num_subscribed = 0;
        let mut num_custom = 0;

        for (journal, metrics) in self.journals() {
            usage += metrics.usage.totals();
            for (total, year) in usage_by_year.iter_mut().zip(&metrics.usage.years) {
                *total += *year;
            }

            match journal.subscription {
                SubscriptionKind::None => cost_ill += metrics.cost_actual,
                SubscriptionKind::Bulk => {
                    num_subscribed += 1;
                    cost_subscriptions += metrics.cost_actual;
                }
                SubscriptionKind::Custom => {
                    num_subscribed += 1;
                    num_custom += 1;
                    cost_subscriptions += metrics.cost_actual;
                }
            }
        }

        let cost_total = cost_subscriptions + cost_ill;
        let cost_bigdeal_projected = sum_years(&compound_by_year(
            self.package.big_deal_cost,
            self.assumptions.cost_bigdeal_increase,
        ));

        ScenarioSummary {
            package_id: self.package.id.clone(),
            num_journals: self.journals.len(),
            num_subscribed,
            num_custom,
            cost_total,
            cost_subscriptions,
            cost_ill,
            cost_bigdeal_projected,
            cost_percent: percent_of(cost_total, cost_bigdeal_projected),
            instant_usage_percent: percent_of(usage.instant(), usage.total),
            usage,
            usage_by_year,
        }
    }

    fn row(&self, journal: &Journal, metrics: &JournalMetrics) -> JournalRow {
        JournalRow {
            issn_l: journal.issn_l.clone(),
            title: journal.title.clone(),
            subject: journal.subject.clone(),
            publisher: journal.publisher.clone(),
            is_society_journal: journal.is_society_journal,
            subscription: journal.subscription,
            usage: metrics.usage.totals(),
            paywalled_usage: metrics.paywalled_usage,
            ill_usage_unsubscribed: metrics.ill_usage_unsubscribed,
            cost_subscription: metrics.cost_subscription,
            cost_ill: metrics.cost_ill,
            cost_actual: metrics.cost_actual,
            ncppu: metrics.ncppu,
            cost_per_use: metrics.cost_per_use,
            package_id: self.package.id.clone(),
            institution_name: self.package.institution_name.clone(),
        }
    }

    /// Journal rows in ISSN-L order, tagged with the package and institution.
    ///
    /// This is what a member package exposes to consortium aggregation.
    pub fn member_rows(&self) -> Vec<JournalRow> {
        self.journals()
            .map(|(journal, metrics)| self.row(journal, metrics))
            .collect()
    }

    /// Journal rows ordered by ascending net cost per paid use, undefined values last.
    ///
    /// Journals at the front are the best candidates for cancellation.
    pub fn ranked_by_cost_efficiency(&self) -> Vec<JournalRow> {
        let mut rows = self.member_rows();
        rows.sort_by(|a, b| a.ncppu.cmp(&b.ncppu).then_with(|| a.issn_l.cmp(&b.issn_l)));

        rows
    }

    /// Journal rows ordered by descending total usage
    pub fn ranked_by_usage(&self) -> Vec<JournalRow> {
        let mut rows = self.member_rows();
        rows.sort_by(|a, b| {
            b.usage
                .total
                .value()
                .total_cmp(&a.usage.total.value())
                .then_with(|| a.issn_l.cmp(&b.issn_l))
        });

        rows
    }

    /// A snapshot recording the current subscriptions and assumptions
    pub fn to_snapshot(&self, id: ScenarioID, name: &str) -> Result<ScenarioSnapshot> {
        let Value::Object(settings) = serde_json::to_value(&self.assumptions)? else {
            bail!("Assumptions did not serialise to an object");
        };
        let selection = self.selection();

        Ok(ScenarioSnapshot {
            id,
            package_id: self.package.id.clone(),
            name: name.to_string(),
            subscribed: selection.bulk.into_iter().collect(),
            custom_subscribed: selection.custom.into_iter().collect(),
            settings,
        })
    }
}

/// Build assumptions for a package, layering defaults, package terms and overrides
pub fn package_assumptions(
    package: &Package,
    snapshot: Option<&ScenarioSnapshot>,
    user_overrides: Option<&Value>,
) -> Result<Assumptions> {
    let package_terms = match package.big_deal_cost_increase {
        Some(increase) => json!({ "cost_bigdeal_increase": increase }),
        None => json!({}),
    };
    let stored = snapshot.map(|snapshot| Value::Object(snapshot.settings.clone()));

    Assumptions::from_overrides(
        std::iter::once(&package_terms)
            .chain(stored.as_ref())
            .chain(user_overrides),
    )
}

/// Load and evaluate a package's scenario.
///
/// The package must exist. If `scenario_id` is given, the latest snapshot for it supplies the
/// subscription selection and stored settings; a scenario without snapshots starts from
/// defaults. `user_overrides` are applied on top of everything else.
pub async fn load_scenario(
    store: &Store,
    cache: &ReferenceCache,
    package_id: &PackageID,
    scenario_id: Option<&ScenarioID>,
    user_overrides: Option<&Value>,
) -> Result<Scenario> {
    let package = store
        .package(package_id)
        .await?
        .with_context(|| format!("Unknown package: {package_id}"))?;
    let package_data = store.package_data(package_id).await?;

    let snapshot = match scenario_id {
        Some(scenario_id) => store.latest_scenario_snapshot(scenario_id).await?,
        None => None,
    };
    let assumptions = package_assumptions(&package, snapshot.as_ref(), user_overrides)
        .with_context(|| format!("Invalid settings for package {package_id}"))?;

    let ids = IdentifierSet::Only(package_data.journal_issns());
    let reference = cache
        .get_common_package_data(package_id.as_str(), &ids)
        .await?;

    let mut scenario = Scenario::new(package, &package_data, &reference, assumptions);
    if let Some(snapshot) = &snapshot {
        scenario.apply_subscriptions(&snapshot.selection());
    }
    info!(
        "Evaluated {} journals for package {package_id}",
        scenario.journals.len()
    );

    Ok(scenario)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{assert_error, issn, package, package_data, reference_data, scenario};
    use float_cmp::assert_approx_eq;
    use rstest::rstest;
    use strum::IntoEnumIterator;

    fn selection(bulk: &[&str], custom: &[&str]) -> SubscriptionSelection {
        SubscriptionSelection {
            bulk: bulk.iter().map(|s| issn(s)).collect(),
            custom: custom.iter().map(|s| issn(s)).collect(),
        }
    }

    #[rstest]
    fn test_new_scenario(scenario: Scenario) {
        let summary = scenario.summary();
        assert_eq!(summary.num_journals, 2);
        assert_eq!(summary.num_subscribed, 0);
        assert_eq!(summary.usage.subscription, Usage::ZERO);
        assert_approx_eq!(Usage, summary.usage.allocated(), summary.usage.total, epsilon = 1e-6);
    }

    #[rstest]
    fn test_apply_subscriptions(mut scenario: Scenario) {
        scenario.apply_subscriptions(&selection(&["0000-0001"], &["0000-0002"]));
        let summary = scenario.summary();
        assert_eq!(summary.num_subscribed, 2);
        assert_eq!(summary.num_custom, 1);
        assert_eq!(summary.usage.ill, Usage::ZERO);
        assert_eq!(summary.cost_ill, Money::ZERO);
        assert_eq!(
            scenario.journal(&issn("0000-0001")).unwrap().0.subscription,
            SubscriptionKind::Bulk
        );
    }

    #[rstest]
    fn test_apply_subscriptions_idempotent(mut scenario: Scenario) {
        let selected = selection(&["0000-0001", "9999-9999"], &[]);
        scenario.apply_subscriptions(&selected);
        let first = scenario.summary();
        scenario.apply_subscriptions(&selected);
        assert_eq!(scenario.summary(), first);
    }

    #[rstest]
    fn test_apply_subscriptions_resets(mut scenario: Scenario) {
        let unsubscribed = scenario.summary();
        scenario.apply_subscriptions(&selection(&["0000-0001"], &[]));
        scenario.apply_subscriptions(&SubscriptionSelection::default());
        assert_eq!(scenario.summary(), unsubscribed);
    }

    #[rstest]
    fn test_summary_costs(mut scenario: Scenario) {
        scenario.apply_subscriptions(&selection(&["0000-0001"], &[]));
        let summary = scenario.summary();
        let (_, subscribed) = scenario.journal(&issn("0000-0001")).unwrap();
        let (_, unsubscribed) = scenario.journal(&issn("0000-0002")).unwrap();

        assert_eq!(Some(summary.cost_subscriptions), subscribed.cost_subscription);
        assert_eq!(summary.cost_ill, unsubscribed.cost_ill);
        assert_eq!(summary.cost_total, summary.cost_subscriptions + summary.cost_ill);

        // Big deal of 10,000 growing at the default 5% for five years
        assert_approx_eq!(
            Money,
            summary.cost_bigdeal_projected,
            Money(55256.3125),
            epsilon = 1e-6
        );
        assert!(summary.cost_percent.is_some());
    }

    #[rstest]
    fn test_channel_percentages_sum_to_100(scenario: Scenario) {
        let summary = scenario.summary();
        let total: f64 = Channel::iter()
            .map(|channel| summary.channel_percent(channel).unwrap())
            .sum();
        assert_approx_eq!(f64, total, 100.0, epsilon = 1e-9);
    }

    #[rstest]
    fn test_ranked_by_cost_efficiency_undefined_last(mut scenario: Scenario) {
        scenario.journals[0].price = None;
        scenario.recompute();

        let ranked = scenario.ranked_by_cost_efficiency();
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].issn_l, issn("0000-0002"));
        assert!(!ranked[1].ncppu.is_defined());
    }

    #[rstest]
    fn test_ranked_by_usage(scenario: Scenario) {
        let ranked = scenario.ranked_by_usage();
        assert!(ranked[0].usage.total >= ranked[1].usage.total);
        assert_eq!(ranked[0].issn_l, issn("0000-0001"));
    }

    #[rstest]
    fn test_member_rows_tagged(scenario: Scenario) {
        for row in scenario.member_rows() {
            assert_eq!(row.package_id, scenario.package.id);
            assert_eq!(row.institution_name, "University of Testing");
        }
    }

    #[rstest]
    fn test_snapshot_restores_selection(mut scenario: Scenario) {
        let selected = selection(&["0000-0001"], &["0000-0002"]);
        scenario.apply_subscriptions(&selected);
        let snapshot = scenario.to_snapshot("scenario1".into(), "My scenario").unwrap();
        assert_eq!(snapshot.selection(), selected);

        let json = serde_json::to_string(&snapshot).unwrap();
        let parsed: ScenarioSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, snapshot);
    }

    #[test]
    fn test_snapshot_missing_fields_default() {
        let snapshot: ScenarioSnapshot =
            serde_json::from_str(r#"{"id": "s1", "package_id": "p1", "name": "Empty"}"#).unwrap();
        assert!(snapshot.subscribed.is_empty());
        assert!(snapshot.settings.is_empty());
    }

    #[rstest]
    fn test_package_assumptions_layering(mut package: Package) {
        package.big_deal_cost_increase = Some(3.0);
        let assumptions = package_assumptions(&package, None, None).unwrap();
        assert_eq!(assumptions.cost_bigdeal_increase, 3.0);

        let mut snapshot = ScenarioSnapshot::new("s1".into(), package.id.clone(), "s");
        snapshot
            .settings
            .insert("cost_bigdeal_increase".into(), json!(4.0));
        let assumptions = package_assumptions(&package, Some(&snapshot), None).unwrap();
        assert_eq!(assumptions.cost_bigdeal_increase, 4.0);

        let user = json!({"cost_bigdeal_increase": 6.0});
        let assumptions = package_assumptions(&package, Some(&snapshot), Some(&user)).unwrap();
        assert_eq!(assumptions.cost_bigdeal_increase, 6.0);
    }

    #[rstest]
    fn test_package_assumptions_bad_snapshot(package: Package) {
        let mut snapshot = ScenarioSnapshot::new("s1".into(), package.id.clone(), "s");
        snapshot.settings.insert("bogus".into(), json!(1));
        assert_error!(
            package_assumptions(&package, Some(&snapshot), None),
            "Unknown setting: bogus"
        );
    }

    #[rstest]
    fn test_unknown_journals_still_listed(
        package: Package,
        mut package_data: PackageData,
        reference_data: ReferenceData,
    ) {
        package_data.usage.insert(issn("9999-9999"), Usage(10.0));
        let scenario = Scenario::new(package, &package_data, &reference_data, Assumptions::default());
        let (journal, metrics) = scenario.journal(&issn("9999-9999")).unwrap();
        assert!(!journal.has_reference_data);
        assert_approx_eq!(Usage, metrics.usage.totals().total, Usage(50.0));
    }
}
