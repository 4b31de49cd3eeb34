//! The usage-allocation pipeline.
//!
//! Usage for each projection year is split between mutually exclusive fulfilment channels by an
//! explicit, ordered list of [`AllocationStep`]s. Each step sees only the usage left over by the
//! steps before it and claims some (or all) of it, so the precedence of channels is exactly the
//! order of the pipeline.
use crate::assumptions::Assumptions;
use crate::id::IssnL;
use crate::units::{Dimensionless, Usage};
use crate::year::{YearlyValues, projection_years};
use anyhow::{Result, ensure};
use itertools::Itertools;
use log::warn;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, IntoEnumIterator};

/// Claims outside the valid range by less than this are rounding noise and not reported
const CLAIM_TOLERANCE: f64 = 1e-9;

/// A usage-fulfilment channel
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter, Display, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Channel {
    /// Open access, including copies on academic social networks
    OaPlusSocialNetworks,
    /// Perpetual access to previously purchased content
    Backfile,
    /// A paid subscription
    Subscription,
    /// Interlibrary loan
    Ill,
    /// Any other delayed access, e.g. users waiting or going without
    OtherDelayed,
}

/// Usage split by channel, plus the total it was split from
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Serialize,
    Deserialize,
    derive_more::Add,
    derive_more::AddAssign,
)]
pub struct ChannelUsage {
    /// Usage met through open access or social networks
    pub oa_plus_social_networks: Usage,
    /// Usage met through perpetual access
    pub backfile: Usage,
    /// Usage met through a subscription
    pub subscription: Usage,
    /// Usage met through interlibrary loan
    pub ill: Usage,
    /// Usage met through other delayed access
    pub other_delayed: Usage,
    /// Total usage
    pub total: Usage,
}

impl ChannelUsage {
    /// Usage for the given channel
    pub fn get(&self, channel: Channel) -> Usage {
        match channel {
            Channel::OaPlusSocialNetworks => self.oa_plus_social_networks,
            Channel::Backfile => self.backfile,
            Channel::Subscription => self.subscription,
            Channel::Ill => self.ill,
            Channel::OtherDelayed => self.other_delayed,
        }
    }

    fn get_mut(&mut self, channel: Channel) -> &mut Usage {
        match channel {
            Channel::OaPlusSocialNetworks => &mut self.oa_plus_social_networks,
            Channel::Backfile => &mut self.backfile,
            Channel::Subscription => &mut self.subscription,
            Channel::Ill => &mut self.ill,
            Channel::OtherDelayed => &mut self.other_delayed,
        }
    }

    /// The sum of usage across every channel
    pub fn allocated(&self) -> Usage {
        Channel::iter().map(|channel| self.get(channel)).sum()
    }

    /// Usage which is neither free nor covered by perpetual access
    pub fn paywalled(&self) -> Usage {
        (self.total - self.oa_plus_social_networks - self.backfile).max(Usage::ZERO)
    }

    /// Usage which is met without delay
    pub fn instant(&self) -> Usage {
        self.oa_plus_social_networks + self.backfile + self.subscription
    }

    /// Iterate over channels and their usage
    pub fn iter(&self) -> impl Iterator<Item = (Channel, Usage)> + '_ {
        Channel::iter().map(|channel| (channel, self.get(channel)))
    }
}

/// The usage of papers of one age within one projection year
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cohort {
    /// The projection year index
    pub year_index: usize,
    /// The age of the papers in years
    pub age: usize,
    /// The year the papers were published
    pub publication_year: u32,
    /// How much usage the papers receive in the projection year
    pub usage: Usage,
}

/// The journal-specific information the allocation pipeline needs
pub trait AllocationInputs {
    /// The journal's ISSN-L, for diagnostics
    fn issn_l(&self) -> &IssnL;

    /// Split the usage of projection year `year_index` into cohorts by paper age.
    ///
    /// The cohorts' usage must sum to the year's total usage.
    fn cohorts(&self, year_index: usize, assumptions: &Assumptions) -> Vec<Cohort>;

    /// The fraction of a cohort's usage which open access can satisfy
    fn open_access_fraction(&self, cohort: &Cohort, assumptions: &Assumptions) -> Dimensionless;

    /// The fraction of usage which academic social networks can satisfy
    fn social_network_rate(&self) -> Dimensionless;

    /// Whether perpetual access covers papers published in `publication_year`
    fn has_perpetual_access(&self, publication_year: u32) -> bool;

    /// Whether the journal is subscribed
    fn is_subscribed(&self) -> bool;
}

/// One step of the allocation pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, Display)]
#[strum(serialize_all = "snake_case")]
pub enum AllocationStep {
    /// Usage of papers which are OA, either instantly or after an embargo
    OpenAccess,
    /// A fixed fraction of usage met by academic social networks
    SocialNetworks,
    /// Usage of papers covered by perpetual access
    Backfile,
    /// Everything left, if the journal is subscribed
    Subscription,
    /// A fraction of what is left, if the journal isn't subscribed
    Ill,
    /// Everything left
    OtherDelayed,
}

/// The outcome of applying one step to the remaining usage
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutcome {
    /// Usage claimed by the step's channel
    pub claimed: Usage,
    /// Usage left for later steps
    pub remainder: Usage,
}

impl AllocationStep {
    /// The channel which receives this step's usage
    pub fn channel(self) -> Channel {
        match self {
            Self::OpenAccess | Self::SocialNetworks => Channel::OaPlusSocialNetworks,
            Self::Backfile => Channel::Backfile,
            Self::Subscription => Channel::Subscription,
            Self::Ill => Channel::Ill,
            Self::OtherDelayed => Channel::OtherDelayed,
        }
    }

    /// The amount this step would like to claim, before clamping
    fn raw_claim<J: AllocationInputs + ?Sized>(
        self,
        journal: &J,
        assumptions: &Assumptions,
        cohort: &Cohort,
        remainder: Usage,
    ) -> Usage {
        match self {
            Self::OpenAccess => cohort.usage * journal.open_access_fraction(cohort, assumptions),
            Self::SocialNetworks if assumptions.include_social_networks => {
                cohort.usage * journal.social_network_rate()
            }
            Self::Backfile
                if assumptions.include_backfile
                    && journal.has_perpetual_access(cohort.publication_year) =>
            {
                remainder * assumptions.backfile_fraction()
            }
            Self::Subscription if journal.is_subscribed() => remainder,
            Self::Ill if !journal.is_subscribed() => remainder * assumptions.ill_fraction(),
            Self::OtherDelayed => remainder,
            _ => Usage::ZERO,
        }
    }

    /// Apply the step to the usage left by previous steps.
    ///
    /// The claim is clamped to `[0, remainder]`, so usage is never created or destroyed. Claims
    /// which had to be clamped indicate inconsistent reference data and are logged.
    pub fn apply<J: AllocationInputs + ?Sized>(
        self,
        journal: &J,
        assumptions: &Assumptions,
        cohort: &Cohort,
        remainder: Usage,
    ) -> StepOutcome {
        let available = remainder.max(Usage::ZERO);
        let raw = self.raw_claim(journal, assumptions, cohort, available);
        let claimed = if raw.is_finite() {
            raw.max(Usage::ZERO).min(available)
        } else {
            Usage::ZERO
        };

        if !raw.is_finite() || (raw - claimed).value().abs() > CLAIM_TOLERANCE {
            warn!(
                "Clamped {self} claim for journal {} (year {}, papers from {}): \
                wanted {raw}, {available} available",
                journal.issn_l(),
                cohort.year_index,
                cohort.publication_year
            );
        }

        StepOutcome {
            claimed,
            remainder: (available - claimed).max(Usage::ZERO),
        }
    }
}

/// Usage by channel for every projection year
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageBreakdown {
    /// Usage for each projection year
    pub years: YearlyValues<ChannelUsage>,
}

impl UsageBreakdown {
    /// Usage summed over all projection years
    pub fn totals(&self) -> ChannelUsage {
        let mut totals = ChannelUsage::default();
        for year in &self.years {
            totals += *year;
        }

        totals
    }
}

/// An ordered list of allocation steps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationPipeline {
    steps: Vec<AllocationStep>,
}

impl Default for AllocationPipeline {
    /// The standard precedence: OA, social networks, backfile, subscription, ILL, other delayed
    fn default() -> Self {
        Self {
            steps: AllocationStep::iter().collect(),
        }
    }
}

impl AllocationPipeline {
    /// Create a pipeline with a custom step order.
    ///
    /// Steps may not repeat and the last step must be [`AllocationStep::OtherDelayed`] so that no
    /// usage is left unallocated.
    pub fn new(steps: Vec<AllocationStep>) -> Result<Self> {
        ensure!(
            steps.last() == Some(&AllocationStep::OtherDelayed),
            "The final allocation step must be other_delayed"
        );
        ensure!(
            steps.iter().all_unique(),
            "Allocation steps cannot be repeated"
        );

        Ok(Self { steps })
    }

    /// The steps, in order of precedence
    pub fn steps(&self) -> &[AllocationStep] {
        &self.steps
    }

    /// Allocate a single cohort's usage between channels
    pub fn allocate_cohort<J: AllocationInputs + ?Sized>(
        &self,
        journal: &J,
        assumptions: &Assumptions,
        cohort: &Cohort,
    ) -> ChannelUsage {
        let total = if cohort.usage.is_finite() && cohort.usage >= Usage::ZERO {
            cohort.usage
        } else {
            warn!(
                "Ignoring invalid usage {} for journal {} (year {}, papers from {})",
                cohort.usage,
                journal.issn_l(),
                cohort.year_index,
                cohort.publication_year
            );
            Usage::ZERO
        };
        let mut usage = ChannelUsage {
            total,
            ..ChannelUsage::default()
        };

        let mut remainder = total;
        for step in &self.steps {
            let outcome = step.apply(journal, assumptions, cohort, remainder);
            *usage.get_mut(step.channel()) += outcome.claimed;
            remainder = outcome.remainder;
        }

        usage
    }

    /// Allocate usage between channels for every projection year
    pub fn allocate<J: AllocationInputs + ?Sized>(
        &self,
        journal: &J,
        assumptions: &Assumptions,
    ) -> UsageBreakdown {
        let mut breakdown = UsageBreakdown::default();
        for year_index in projection_years() {
            for cohort in journal.cohorts(year_index, assumptions) {
                breakdown.years[year_index] += self.allocate_cohort(journal, assumptions, &cohort);
            }
        }

        breakdown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::issn;
    use float_cmp::assert_approx_eq;
    use rstest::{fixture, rstest};

    /// A journal with fixed fractions, independent of paper age
    struct FixedJournal {
        issn_l: IssnL,
        usage: Usage,
        oa_fraction: f64,
        social_rate: f64,
        perpetual_access: bool,
        subscribed: bool,
    }

    impl AllocationInputs for FixedJournal {
        fn issn_l(&self) -> &IssnL {
            &self.issn_l
        }

        fn cohorts(&self, year_index: usize, assumptions: &Assumptions) -> Vec<Cohort> {
            vec![Cohort {
                year_index,
                age: 0,
                publication_year: 2020,
                usage: self.usage * Dimensionless(assumptions.usage_growth[year_index]),
            }]
        }

        fn open_access_fraction(&self, _: &Cohort, _: &Assumptions) -> Dimensionless {
            Dimensionless(self.oa_fraction)
        }

        fn social_network_rate(&self) -> Dimensionless {
            Dimensionless(self.social_rate)
        }

        fn has_perpetual_access(&self, _: u32) -> bool {
            self.perpetual_access
        }

        fn is_subscribed(&self) -> bool {
            self.subscribed
        }
    }

    #[fixture]
    fn journal() -> FixedJournal {
        FixedJournal {
            issn_l: issn("0000-0001"),
            usage: Usage(1000.0),
            oa_fraction: 0.2,
            social_rate: 0.1,
            perpetual_access: true,
            subscribed: false,
        }
    }

    #[fixture]
    fn assumptions() -> Assumptions {
        Assumptions {
            ill_request_percent_of_delayed: 10.0,
            backfile_contribution: 50.0,
            ..Assumptions::default()
        }
    }

    fn assert_conserved(usage: &ChannelUsage) {
        assert_approx_eq!(Usage, usage.allocated(), usage.total, epsilon = 1e-9);
        for (_, value) in usage.iter() {
            assert!(value >= Usage::ZERO);
        }
    }

    #[test]
    fn test_default_step_order() {
        assert_eq!(
            AllocationPipeline::default().steps(),
            [
                AllocationStep::OpenAccess,
                AllocationStep::SocialNetworks,
                AllocationStep::Backfile,
                AllocationStep::Subscription,
                AllocationStep::Ill,
                AllocationStep::OtherDelayed,
            ]
        );
    }

    #[rstest]
    fn test_allocate_unsubscribed(journal: FixedJournal, assumptions: Assumptions) {
        let breakdown = AllocationPipeline::default().allocate(&journal, &assumptions);
        for year in &breakdown.years {
            // 200 OA + 100 social networks, half of remaining 700 to backfile, 10% of the rest ILL
            assert_approx_eq!(Usage, year.oa_plus_social_networks, Usage(300.0));
            assert_approx_eq!(Usage, year.backfile, Usage(350.0));
            assert_approx_eq!(Usage, year.subscription, Usage(0.0));
            assert_approx_eq!(Usage, year.ill, Usage(35.0));
            assert_approx_eq!(Usage, year.other_delayed, Usage(315.0));
            assert_conserved(year);
        }
    }

    #[rstest]
    fn test_allocate_subscribed(mut journal: FixedJournal, assumptions: Assumptions) {
        journal.subscribed = true;
        let breakdown = AllocationPipeline::default().allocate(&journal, &assumptions);
        for year in &breakdown.years {
            assert_approx_eq!(Usage, year.subscription, Usage(350.0));
            assert_eq!(year.ill, Usage::ZERO);
            assert_eq!(year.other_delayed, Usage::ZERO);
            assert_conserved(year);
        }
    }

    #[rstest]
    #[case::backfile(|a: &mut Assumptions| a.include_backfile = false, Channel::Backfile)]
    #[case::social(|a: &mut Assumptions| a.include_social_networks = false, Channel::OaPlusSocialNetworks)]
    fn test_toggle_keeps_total(
        journal: FixedJournal,
        assumptions: Assumptions,
        #[case] toggle: fn(&mut Assumptions),
        #[case] channel: Channel,
    ) {
        let pipeline = AllocationPipeline::default();
        let before = pipeline.allocate(&journal, &assumptions).totals();

        let mut toggled = assumptions.clone();
        toggle(&mut toggled);
        let after = pipeline.allocate(&journal, &toggled).totals();

        assert_eq!(after.total, before.total);
        assert!(after.get(channel) < before.get(channel));
        assert_conserved(&after);
    }

    #[rstest]
    fn test_backfile_disabled_is_zero(journal: FixedJournal, mut assumptions: Assumptions) {
        assumptions.include_backfile = false;
        let breakdown = AllocationPipeline::default().allocate(&journal, &assumptions);
        assert!(breakdown.years.iter().all(|year| year.backfile == Usage::ZERO));
    }

    #[rstest]
    fn test_overclaim_is_clamped(mut journal: FixedJournal, assumptions: Assumptions) {
        // Inconsistent data: more OA than usage, plus social networks on top
        journal.oa_fraction = 1.5;
        let breakdown = AllocationPipeline::default().allocate(&journal, &assumptions);
        for year in &breakdown.years {
            assert_eq!(year.oa_plus_social_networks, year.total);
            assert_eq!(year.paywalled(), Usage::ZERO);
            assert_conserved(year);
        }
    }

    #[rstest]
    fn test_negative_claim_is_floored(mut journal: FixedJournal, assumptions: Assumptions) {
        journal.oa_fraction = -0.5;
        let usage = AllocationPipeline::default().allocate_cohort(
            &journal,
            &assumptions,
            &journal.cohorts(0, &assumptions)[0],
        );
        assert_eq!(usage.oa_plus_social_networks, Usage(100.0)); // social networks only
        assert_conserved(&usage);
    }

    #[rstest]
    #[case::negative_usage(-50.0, 0.2)]
    #[case::nan_usage(f64::NAN, 0.2)]
    #[case::infinite_usage(f64::INFINITY, 0.2)]
    #[case::oversized_oa(1000.0, 3.0)]
    #[case::negative_oa(1000.0, -2.0)]
    fn test_channels_stay_within_total(
        mut journal: FixedJournal,
        assumptions: Assumptions,
        #[case] usage: f64,
        #[case] oa_fraction: f64,
    ) {
        journal.usage = Usage(usage);
        journal.oa_fraction = oa_fraction;
        for year in AllocationPipeline::default().allocate(&journal, &assumptions).years {
            assert!(year.total >= Usage::ZERO);
            for (channel, value) in year.iter() {
                assert!(value <= year.total, "{channel} usage {value} exceeds {}", year.total);
            }
            assert_conserved(&year);
        }
    }

    #[rstest]
    fn test_custom_pipeline_order(journal: FixedJournal, assumptions: Assumptions) {
        // Backfile before OA: backfile takes half of everything
        let pipeline = AllocationPipeline::new(vec![
            AllocationStep::Backfile,
            AllocationStep::OpenAccess,
            AllocationStep::OtherDelayed,
        ])
        .unwrap();
        let usage = pipeline.allocate(&journal, &assumptions).years[0];
        assert_approx_eq!(Usage, usage.backfile, Usage(500.0));
        assert_approx_eq!(Usage, usage.oa_plus_social_networks, Usage(200.0));
        assert_approx_eq!(Usage, usage.other_delayed, Usage(300.0));
    }

    #[test]
    fn test_invalid_pipelines() {
        assert!(AllocationPipeline::new(vec![AllocationStep::OpenAccess]).is_err());
        assert!(
            AllocationPipeline::new(vec![
                AllocationStep::OtherDelayed,
                AllocationStep::OtherDelayed
            ])
            .is_err()
        );
    }

    #[test]
    fn test_paywalled_and_instant() {
        let usage = ChannelUsage {
            oa_plus_social_networks: Usage(10.0),
            backfile: Usage(20.0),
            subscription: Usage(30.0),
            ill: Usage(4.0),
            other_delayed: Usage(36.0),
            total: Usage(100.0),
        };
        assert_eq!(usage.paywalled(), Usage(70.0));
        assert_eq!(usage.instant(), Usage(60.0));
        assert_eq!(Channel::OaPlusSocialNetworks.to_string(), "oa_plus_social_networks");
    }
}
