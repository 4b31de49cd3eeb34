//! Fixtures for tests

use crate::allocation::ChannelUsage;
use crate::assumptions::Assumptions;
use crate::finance::CostPerUse;
use crate::id::IssnL;
use crate::journal::{Journal, SubscriptionKind};
use crate::package::{Package, PackageData};
use crate::reference::{JournalMetadata, OaCounts, ReferenceData};
use crate::scenario::{JournalRow, Scenario};
use crate::units::{Money, MoneyPerUse, Usage};
use crate::year::YearRange;
use map_macro::{btree_map, hash_map};
use rstest::fixture;

/// Assert that an error with the given message occurs
macro_rules! assert_error {
    ($result:expr, $msg:expr) => {
        assert_eq!(
            $result.unwrap_err().chain().next().unwrap().to_string(),
            $msg
        );
    };
}
pub(crate) use assert_error;

/// Shorthand for an ISSN-L
pub fn issn(s: &str) -> IssnL {
    s.into()
}

#[fixture]
pub fn reference_data() -> ReferenceData {
    ReferenceData {
        metadata: hash_map! {
            issn("0000-0001") => JournalMetadata {
                title: "Journal of Testing".into(),
                subject: Some("Software".into()),
                publisher: Some("Test Press".into()),
                is_society_journal: false,
            },
            issn("0000-0002") => JournalMetadata {
                title: "Annals of Fixtures".into(),
                subject: None,
                publisher: Some("Fixture Society".into()),
                is_society_journal: true,
            },
        },
        embargo_months: hash_map! { issn("0000-0001") => 12 },
        downloads_by_age: hash_map! {
            issn("0000-0001") => vec![40.0, 30.0, 15.0, 10.0, 5.0],
            issn("0000-0002") => vec![50.0, 20.0, 10.0, 10.0, 10.0],
        },
        oa_by_year: hash_map! {
            issn("0000-0001") => btree_map! {
                2020 => OaCounts {
                    num_papers: 100.0,
                    gold: 20.0,
                    hybrid: 10.0,
                    bronze: 10.0,
                    green: 10.0,
                    green_submitted: 10.0,
                },
            },
            issn("0000-0002") => btree_map! {
                2019 => OaCounts {
                    num_papers: 50.0,
                    gold: 10.0,
                    ..Default::default()
                },
            },
        },
        social_network_rate: hash_map! {
            issn("0000-0001") => 0.1,
            issn("0000-0002") => 0.05,
        },
        paper_counts: hash_map! {
            issn("0000-0001") => btree_map! { 2020 => 100.0 },
            issn("0000-0002") => btree_map! { 2019 => 50.0 },
        },
    }
}

#[fixture]
pub fn package() -> Package {
    Package {
        id: "package1".into(),
        institution_id: "inst1".into(),
        institution_name: "University of Testing".into(),
        currency: "USD".into(),
        big_deal_cost: Money(10000.0),
        big_deal_cost_increase: None,
        base_year: 2024,
    }
}

#[fixture]
pub fn package_data() -> PackageData {
    PackageData {
        usage: hash_map! {
            issn("0000-0001") => Usage(1000.0),
            issn("0000-0002") => Usage(500.0),
        },
        prices: hash_map! {
            issn("0000-0001") => Money(2000.0),
            issn("0000-0002") => Money(800.0),
        },
        perpetual_access: hash_map! {
            issn("0000-0001") => vec![YearRange::new(2010, Some(2020)).unwrap()],
        },
        citations: hash_map! { issn("0000-0001") => 10.0 },
        authorships: hash_map! { issn("0000-0002") => 1.0 },
    }
}

#[fixture]
pub fn journal(reference_data: ReferenceData, package_data: PackageData) -> Journal {
    let issn_l = issn("0000-0001");
    let reference = reference_data.journal(&issn_l);
    Journal::new(issn_l, &reference, &package_data, 2024)
}

#[fixture]
pub fn scenario(
    package: Package,
    package_data: PackageData,
    reference_data: ReferenceData,
) -> Scenario {
    Scenario::new(
        package,
        &package_data,
        &reference_data,
        Assumptions::default(),
    )
}

#[fixture]
pub fn journal_row() -> JournalRow {
    JournalRow {
        issn_l: issn("0000-0001"),
        title: "Journal of Testing".into(),
        subject: Some("Software".into()),
        publisher: Some("Test Press".into()),
        is_society_journal: false,
        subscription: SubscriptionKind::None,
        usage: ChannelUsage {
            oa_plus_social_networks: Usage(400.0),
            backfile: Usage(100.0),
            ill: Usage(25.0),
            other_delayed: Usage(475.0),
            total: Usage(1000.0),
            ..ChannelUsage::default()
        },
        paywalled_usage: Usage(500.0),
        ill_usage_unsubscribed: Usage(25.0),
        cost_subscription: Some(Money(2000.0)),
        cost_ill: Money(425.0),
        cost_actual: Money(425.0),
        ncppu: CostPerUse::from_value(MoneyPerUse(3.15)),
        cost_per_use: CostPerUse::from_value(MoneyPerUse(4.0)),
        package_id: "package1".into(),
        institution_name: "University of Testing".into(),
    }
}
