//! Combining member journal rows into one row per ISSN-L.
use crate::allocation::ChannelUsage;
use crate::finance::{Ncppu, usage_weighted_mean};
use crate::id::{IssnL, PackageID};
use crate::scenario::JournalRow;
use crate::units::{Money, Usage};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// Below this much combined usage, a blended net cost per paid use is too noisy to report
pub const MIN_BLEND_USAGE: Usage = Usage(10.0);

/// One journal across every consortium member which has it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsortiumJournal {
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
    /// Whether the consortium subscribes to the journal
    pub subscribed: bool,
    /// Combined usage by channel
    pub usage: ChannelUsage,
    /// Combined ILL usage if the journal were not subscribed
    pub ill_usage_unsubscribed: Usage,
    /// Combined subscription cost of the members with a price
    pub cost_subscription: Option<Money>,
    /// Combined ILL cost if the journal were not subscribed
    pub cost_ill: Money,
    /// Usage-weighted net cost per paid use
    pub ncppu: Ncppu,
    /// Institution of each contributing member, parallel to `package_ids`
    pub institution_names: Vec<String>,
    /// Package of each contributing member
    pub package_ids: Vec<PackageID>,
}

impl ConsortiumJournal {
    /// Blend member rows which all share one ISSN-L
    fn from_rows(rows: &[JournalRow]) -> Self {
        let first = &rows[0];
        let mut usage = ChannelUsage::default();
        let mut ill_usage_unsubscribed = Usage::ZERO;
        let mut cost_ill = Money::ZERO;
        for row in rows {
            usage += row.usage;
            ill_usage_unsubscribed += row.ill_usage_unsubscribed;
            cost_ill += row.cost_ill;
        }

        let cost_subscription = rows
            .iter()
            .filter_map(|row| row.cost_subscription)
            .reduce(|a, b| a + b);
        let ncppu = usage_weighted_mean(
            rows.iter().map(|row| (row.ncppu, row.usage.total)),
            MIN_BLEND_USAGE,
        );

        let mut journal = Self {
            issn_l: first.issn_l.clone(),
            title: first.title.clone(),
            subject: first.subject.clone(),
            publisher: first.publisher.clone(),
            is_society_journal: first.is_society_journal,
            subscribed: false,
            usage,
            ill_usage_unsubscribed,
            cost_subscription,
            cost_ill,
            ncppu,
            institution_names: rows.iter().map(|row| row.institution_name.clone()).collect(),
            package_ids: rows.iter().map(|row| row.package_id.clone()).collect(),
        };
        journal.apply_subscription(false);

        journal
    }

    /// Re-derive the paid channels for the consortium's subscription decision.
    ///
    /// Free and backfile usage are unchanged. Subscribed journals take all paywalled usage as
    /// subscription; otherwise it splits between ILL and other delayed access.
    pub fn apply_subscription(&mut self, subscribed: bool) {
        let paywalled = self.usage.paywalled();
        self.subscribed = subscribed;
        if subscribed {
            self.usage.subscription = paywalled;
            self.usage.ill = Usage::ZERO;
            self.usage.other_delayed = Usage::ZERO;
        } else {
            let ill = self.ill_usage_unsubscribed.max(Usage::ZERO).min(paywalled);
            self.usage.subscription = Usage::ZERO;
            self.usage.ill = ill;
            self.usage.other_delayed = paywalled - ill;
        }
    }

    /// What the consortium pays for this journal
    pub fn cost_actual(&self) -> Money {
        if self.subscribed {
            self.cost_subscription.unwrap_or(Money::ZERO)
        } else {
            self.cost_ill
        }
    }
}

/// Group member rows by ISSN-L and blend each group, returning journals in ISSN-L order
pub fn blend_rows(rows: &[JournalRow]) -> Vec<ConsortiumJournal> {
    rows.iter()
        .cloned()
        .into_group_map_by(|row| row.issn_l.clone())
        .into_iter()
        .sorted_by(|(a, _), (b, _)| a.cmp(b))
        .map(|(_, group)| ConsortiumJournal::from_rows(&group))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finance::CostPerUse;
    use crate::fixture::{issn, journal_row};
    use crate::units::MoneyPerUse;
    use float_cmp::assert_approx_eq;
    use rstest::rstest;

    fn member_row(package: &str, total: f64, ncppu: Option<f64>) -> JournalRow {
        let mut row = journal_row();
        row.package_id = package.into();
        row.institution_name = format!("{package} University");
        row.usage = ChannelUsage {
            oa_plus_social_networks: Usage(total * 0.5),
            ill: Usage(total * 0.05),
            other_delayed: Usage(total * 0.45),
            total: Usage(total),
            ..ChannelUsage::default()
        };
        row.paywalled_usage = Usage(total * 0.5);
        row.ill_usage_unsubscribed = Usage(total * 0.05);
        row.ncppu = ncppu.map_or(CostPerUse::UNDEFINED, |v| CostPerUse::from_value(MoneyPerUse(v)));
        row
    }

    #[test]
    fn test_blend_two_members() {
        let rows = [
            member_row("p1", 100.0, Some(5.0)),
            member_row("p2", 300.0, Some(10.0)),
        ];
        let blended = blend_rows(&rows);
        assert_eq!(blended.len(), 1);

        let journal = &blended[0];
        assert_approx_eq!(Usage, journal.usage.total, Usage(400.0));
        assert_approx_eq!(
            MoneyPerUse,
            journal.ncppu.value().unwrap(),
            MoneyPerUse(8.75)
        );
        assert_eq!(journal.package_ids, [PackageID::from("p1"), PackageID::from("p2")]);
        assert_eq!(journal.institution_names, ["p1 University", "p2 University"]);
    }

    #[rstest]
    #[case(4.0, 5.0)]
    #[case(0.0, 9.9)]
    fn test_blend_below_threshold(#[case] first: f64, #[case] second: f64) {
        let rows = [
            member_row("p1", first, Some(5.0)),
            member_row("p2", second, Some(10.0)),
        ];
        assert!(!blend_rows(&rows)[0].ncppu.is_defined());
    }

    #[test]
    fn test_blend_ignores_undefined_members() {
        let rows = [
            member_row("p1", 100.0, Some(5.0)),
            member_row("p2", 1000.0, None),
        ];
        let journal = &blend_rows(&rows)[0];
        assert_eq!(journal.ncppu.value(), Some(MoneyPerUse(5.0)));
        assert_approx_eq!(Usage, journal.usage.total, Usage(1100.0));
    }

    #[test]
    fn test_blend_groups_by_issn() {
        let mut other = member_row("p1", 50.0, None);
        other.issn_l = issn("0000-0002");
        let rows = [member_row("p2", 100.0, None), other, member_row("p1", 100.0, None)];

        let blended = blend_rows(&rows);
        let issns: Vec<_> = blended.iter().map(|j| j.issn_l.clone()).collect();
        assert_eq!(issns, [issn("0000-0001"), issn("0000-0002")]);
        assert_eq!(blended[0].package_ids.len(), 2);
    }

    #[test]
    fn test_apply_subscription_conserves_usage() {
        let mut journal = blend_rows(&[member_row("p1", 200.0, Some(1.0))]).remove(0);
        journal.cost_subscription = Some(Money(500.0));

        journal.apply_subscription(true);
        assert_approx_eq!(Usage, journal.usage.subscription, Usage(100.0));
        assert_eq!(journal.usage.ill, Usage::ZERO);
        assert_approx_eq!(Usage, journal.usage.allocated(), journal.usage.total);
        assert_eq!(journal.cost_actual(), Money(500.0));

        journal.apply_subscription(false);
        assert_approx_eq!(Usage, journal.usage.ill, Usage(10.0));
        assert_approx_eq!(Usage, journal.usage.other_delayed, Usage(90.0));
        assert_approx_eq!(Usage, journal.usage.allocated(), journal.usage.total);
        assert_eq!(journal.cost_actual(), journal.cost_ill);
    }
}
