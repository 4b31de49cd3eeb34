//! The Consortium Aggregator.
//!
//! A consortium owns no journals of its own. Its view is derived entirely from the current
//! journal rows of its member packages, blended by ISSN-L.
use crate::allocation::ChannelUsage;
use crate::finance::percent_of;
use crate::id::{IssnL, PackageID, ScenarioID};
use crate::store::Store;
use crate::units::Money;
use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

pub mod blend;
pub mod fanout;
pub mod queue;

use blend::{ConsortiumJournal, blend_rows};
use fanout::{FanOutReport, MemberFailure, MemberSource, fan_out};

/// One member package of a consortium
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsortiumMember {
    /// The member's package
    pub package_id: PackageID,
    /// The member scenario to use, or `None` for the package's default scenario
    #[serde(default)]
    pub scenario_id: Option<ScenarioID>,
}

impl ConsortiumMember {
    /// A member using its package's default scenario
    pub fn new(package_id: PackageID) -> Self {
        Self {
            package_id,
            scenario_id: None,
        }
    }
}

/// A persisted consortium scenario: which members are included and what the consortium
/// subscribes to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsortiumSnapshot {
    /// The consortium scenario's identifier
    pub id: ScenarioID,
    /// Display name
    pub name: String,
    /// Members included in the consortium
    #[serde(default)]
    pub members: Vec<ConsortiumMember>,
    /// Journals the consortium subscribes to
    #[serde(default)]
    pub subscribed: Vec<IssnL>,
}

/// Consortium-level totals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsortiumSummary {
    /// The consortium scenario
    pub scenario_id: ScenarioID,
    /// Number of members in the consortium
    pub num_members: usize,
    /// Members whose data was included
    pub succeeded: Vec<PackageID>,
    /// Members which had to be left out
    pub failures: Vec<MemberFailure>,
    /// Number of distinct journals
    pub num_journals: usize,
    /// Number of subscribed journals
    pub num_subscribed: usize,
    /// Combined usage by channel
    pub usage: ChannelUsage,
    /// Subscription cost of subscribed journals
    pub cost_subscriptions: Money,
    /// ILL cost of unsubscribed journals
    pub cost_ill: Money,
    /// Total cost
    pub cost_total: Money,
    /// Percentage of usage met without delay
    pub instant_usage_percent: Option<f64>,
}

/// A blended view over a consortium's members
#[derive(Debug, Clone)]
pub struct Consortium {
    /// The consortium scenario
    pub snapshot: ConsortiumSnapshot,
    journals: Vec<ConsortiumJournal>,
    succeeded: Vec<PackageID>,
    failures: Vec<MemberFailure>,
}

impl Consortium {
    /// Blend the rows fetched from members and apply the consortium's subscriptions
    pub fn from_report(snapshot: ConsortiumSnapshot, report: FanOutReport) -> Self {
        let mut consortium = Self {
            journals: blend_rows(&report.rows),
            succeeded: report.succeeded,
            failures: report.failures,
            snapshot,
        };
        let subscribed = consortium.snapshot.subscribed.iter().cloned().collect();
        consortium.apply_subscriptions(&subscribed);

        consortium
    }

    /// Set which journals the consortium subscribes to
    pub fn apply_subscriptions(&mut self, subscribed: &BTreeSet<IssnL>) {
        for journal in &mut self.journals {
            journal.apply_subscription(subscribed.contains(&journal.issn_l));
        }
        self.snapshot.subscribed = subscribed.iter().cloned().collect();
    }

    /// Blended journals in ISSN-L order
    pub fn journals(&self) -> &[ConsortiumJournal] {
        &self.journals
    }

    /// Members which couldn't be included
    pub fn failures(&self) -> &[MemberFailure] {
        &self.failures
    }

    /// Journals ordered by ascending blended net cost per paid use, undefined last
    pub fn ranked_by_cost_efficiency(&self) -> Vec<&ConsortiumJournal> {
        let mut journals: Vec<_> = self.journals.iter().collect();
        journals.sort_by(|a, b| a.ncppu.cmp(&b.ncppu).then_with(|| a.issn_l.cmp(&b.issn_l)));

        journals
    }

    /// Consortium-level totals
    pub fn summary(&self) -> ConsortiumSummary {
        let mut usage = ChannelUsage::default();
        let mut cost_subscriptions = Money::ZERO;
        let mut cost_ill = Money::ZERO;
        for journal in &self.journals {
            usage += journal.usage;
            if journal.subscribed {
                cost_subscriptions += journal.cost_actual();
            } else {
                cost_ill += journal.cost_actual();
            }
        }

        ConsortiumSummary {
            scenario_id: self.snapshot.id.clone(),
            num_members: self.snapshot.members.len(),
            succeeded: self.succeeded.clone(),
            failures: self.failures.clone(),
            num_journals: self.journals.len(),
            num_subscribed: self.journals.iter().filter(|j| j.subscribed).count(),
            cost_subscriptions,
            cost_ill,
            cost_total: cost_subscriptions + cost_ill,
            instant_usage_percent: percent_of(usage.instant(), usage.total),
            usage,
        }
    }
}

/// Recompute a consortium from its latest snapshot and its members' current data
pub async fn recompute_consortium(
    store: &Store,
    source: &dyn MemberSource,
    scenario_id: &ScenarioID,
    workers: usize,
    timeout: Duration,
) -> Result<Consortium> {
    let snapshot = store
        .latest_consortium_snapshot(scenario_id)
        .await?
        .with_context(|| format!("Unknown consortium scenario: {scenario_id}"))?;

    info!(
        "Recomputing consortium {scenario_id} with {} members",
        snapshot.members.len()
    );
    let report = fan_out(source, &snapshot.members, workers, timeout).await;

    Ok(Consortium::from_report(snapshot, report))
}
