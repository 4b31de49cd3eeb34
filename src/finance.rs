//! General functions related to cost projections and cost-efficiency metrics.
use crate::units::{Dimensionless, Money, MoneyPerUse, Usage};
use crate::year::YearlyValues;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Compound `base` by `rate_percent` per year for `years` years
pub fn compound(base: Money, rate_percent: f64, years: usize) -> Money {
    let factor = (Dimensionless(1.0) + Dimensionless::from_percent(rate_percent)).powi(years as i32);
    base * factor
}

/// The value of `base` in every projection year, compounded annually by `rate_percent`.
///
/// The first projection year is uncompounded.
pub fn compound_by_year(base: Money, rate_percent: f64) -> YearlyValues<Money> {
    std::array::from_fn(|year_index| compound(base, rate_percent, year_index))
}

/// Sum values across all projection years
pub fn sum_years<T: Copy + std::iter::Sum<T>>(values: &YearlyValues<T>) -> T {
    values.iter().copied().sum()
}

/// A cost-per-use metric which may be undefined.
///
/// The metric is undefined when there is no usage to divide by or when the cost isn't known.
/// Undefined values always order after defined ones, so sorting ascending puts them last.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CostPerUse(Option<MoneyPerUse>);

impl CostPerUse {
    /// An undefined value
    pub const UNDEFINED: Self = Self(None);

    /// Divide `cost` by `usage`, returning an undefined value if usage isn't positive or the
    /// result isn't finite
    pub fn new(cost: Money, usage: Usage) -> Self {
        if usage <= Usage::ZERO {
            return Self::UNDEFINED;
        }

        Self::from_value(cost / usage)
    }

    /// Wrap an existing value, treating non-finite numbers as undefined
    pub fn from_value(value: MoneyPerUse) -> Self {
        if value.is_finite() {
            Self(Some(value))
        } else {
            Self::UNDEFINED
        }
    }

    /// The value, if defined
    pub fn value(self) -> Option<MoneyPerUse> {
        self.0
    }

    /// Whether the value is defined
    pub fn is_defined(self) -> bool {
        self.0.is_some()
    }
}

impl Eq for CostPerUse {}

impl PartialOrd for CostPerUse {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CostPerUse {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.0, other.0) {
            (Some(a), Some(b)) => a.value().total_cmp(&b.value()),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }
}

impl fmt::Display for CostPerUse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(value) => write!(f, "{value}"),
            None => write!(f, "undefined"),
        }
    }
}

/// Net cost per paid use: the ranking metric for deciding which subscriptions to cancel first.
///
/// Calculated as (subscription cost − ILL cost) ÷ paywalled usage.
pub type Ncppu = CostPerUse;

/// Calculate net cost per paid use
pub fn ncppu(cost_subscription: Option<Money>, cost_ill: Money, paywalled_usage: Usage) -> Ncppu {
    match cost_subscription {
        Some(cost_subscription) => CostPerUse::new(cost_subscription - cost_ill, paywalled_usage),
        None => CostPerUse::UNDEFINED,
    }
}

/// Calculate the usage-weighted mean of a set of cost-per-use values.
///
/// Only entries with a defined value contribute. If their combined usage is below `min_usage`,
/// the result is undefined.
pub fn usage_weighted_mean<I>(entries: I, min_usage: Usage) -> CostPerUse
where
    I: IntoIterator<Item = (CostPerUse, Usage)>,
{
    let mut weighted_sum = Money::ZERO;
    let mut usage_sum = Usage::ZERO;
    for (value, usage) in entries {
        let Some(value) = value.value() else {
            continue;
        };
        if !usage.is_finite() {
            continue;
        }
        weighted_sum += value * usage;
        usage_sum += usage;
    }

    if usage_sum < min_usage {
        return CostPerUse::UNDEFINED;
    }

    CostPerUse::new(weighted_sum, usage_sum)
}

/// Express `part` as a percentage of `whole`, if `whole` is non-zero
pub fn percent_of<T>(part: T, whole: T) -> Option<f64>
where
    T: std::ops::Div<T, Output = Dimensionless> + PartialEq + Default,
{
    (whole != T::default()).then(|| (part / whole).value() * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;
    use rstest::rstest;

    #[rstest]
    #[case(100.0, 0.0, 3, 100.0)]
    #[case(100.0, 5.0, 0, 100.0)]
    #[case(100.0, 5.0, 1, 105.0)]
    #[case(100.0, 10.0, 2, 121.0)]
    fn test_compound(
        #[case] base: f64,
        #[case] rate: f64,
        #[case] years: usize,
        #[case] expected: f64,
    ) {
        assert_approx_eq!(
            Money,
            compound(Money(base), rate, years),
            Money(expected),
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_compound_by_year() {
        let values = compound_by_year(Money(1000.0), 10.0);
        assert_approx_eq!(Money, values[0], Money(1000.0));
        assert_approx_eq!(Money, values[4], Money(1464.1), epsilon = 1e-9);
        assert_approx_eq!(Money, sum_years(&values), Money(6105.1), epsilon = 1e-9);
    }

    #[rstest]
    #[case(Some(1000.0), 200.0, 100.0, Some(8.0))]
    #[case(Some(1000.0), 200.0, 0.0, None)] // no paywalled usage
    #[case(None, 200.0, 100.0, None)] // no price
    #[case(Some(100.0), 200.0, 10.0, Some(-10.0))] // ILL dearer than subscribing
    fn test_ncppu(
        #[case] cost_subscription: Option<f64>,
        #[case] cost_ill: f64,
        #[case] paywalled: f64,
        #[case] expected: Option<f64>,
    ) {
        let result = ncppu(cost_subscription.map(Money), Money(cost_ill), Usage(paywalled));
        assert_eq!(result.value().map(MoneyPerUse::value), expected);
    }

    #[test]
    fn test_cost_per_use_undefined_sorts_last() {
        let mut values = vec![
            CostPerUse::UNDEFINED,
            CostPerUse::new(Money(10.0), Usage(1.0)),
            CostPerUse::UNDEFINED,
            CostPerUse::new(Money(-5.0), Usage(1.0)),
            CostPerUse::new(Money(2.0), Usage(1.0)),
        ];
        values.sort();

        let defined: Vec<_> = values.iter().filter_map(|v| v.value()).collect();
        assert_eq!(defined, [MoneyPerUse(-5.0), MoneyPerUse(2.0), MoneyPerUse(10.0)]);
        assert!(!values[3].is_defined());
        assert!(!values[4].is_defined());
    }

    #[test]
    fn test_cost_per_use_non_finite() {
        assert!(!CostPerUse::from_value(MoneyPerUse(f64::INFINITY)).is_defined());
        assert!(!CostPerUse::from_value(MoneyPerUse(f64::NAN)).is_defined());
    }

    #[test]
    fn test_usage_weighted_mean() {
        let entries = [
            (CostPerUse::from_value(MoneyPerUse(5.0)), Usage(100.0)),
            (CostPerUse::from_value(MoneyPerUse(10.0)), Usage(300.0)),
            (CostPerUse::UNDEFINED, Usage(1000.0)), // ignored
        ];
        let mean = usage_weighted_mean(entries, Usage(10.0));
        assert_approx_eq!(MoneyPerUse, mean.value().unwrap(), MoneyPerUse(8.75));
    }

    #[test]
    fn test_usage_weighted_mean_below_threshold() {
        let entries = [
            (CostPerUse::from_value(MoneyPerUse(5.0)), Usage(4.0)),
            (CostPerUse::from_value(MoneyPerUse(10.0)), Usage(5.0)),
        ];
        assert!(!usage_weighted_mean(entries, Usage(10.0)).is_defined());
    }

    #[test]
    fn test_percent_of() {
        assert_eq!(percent_of(Money(25.0), Money(50.0)), Some(50.0));
        assert_eq!(percent_of(Usage(25.0), Usage(0.0)), None);
    }

    #[test]
    fn test_serialise_undefined_as_null() {
        assert_eq!(serde_json::to_string(&CostPerUse::UNDEFINED).unwrap(), "null");
        let value: CostPerUse = serde_json::from_str("2.5").unwrap();
        assert_eq!(value.value(), Some(MoneyPerUse(2.5)));
    }
}
