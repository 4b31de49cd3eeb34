//! Defines the [`Assumptions`] struct, the scenario settings used to evaluate a package.
//!
//! Assumptions are immutable once a scenario is evaluated. They are created fresh for every
//! evaluation, starting from defaults and applying stored or user-supplied overrides in turn.
use crate::units::{Dimensionless, Money};
use crate::year::{NUM_PROJECTION_YEARS, YearlyValues};
use anyhow::{Context, Result, bail, ensure};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

macro_rules! define_unit_param_default {
    ($name:ident, $type: ty, $value: expr) => {
        fn $name() -> $type {
            <$type>::new($value)
        }
    };
}

macro_rules! define_param_default {
    ($name:ident, $type: ty, $value: expr) => {
        fn $name() -> $type {
            $value
        }
    };
}

define_unit_param_default!(default_cost_ill, Money, 17.0);
define_param_default!(default_ill_request_percent_of_delayed, f64, 5.0);
define_param_default!(default_cost_alacarte_increase, f64, 8.0);
define_param_default!(default_cost_bigdeal_increase, f64, 5.0);
define_param_default!(default_cost_content_fee_percent, f64, 5.7);
define_param_default!(default_weight_citation, f64, 10.0);
define_param_default!(default_weight_authorship, f64, 100.0);
define_param_default!(default_true, bool, true);
define_param_default!(default_backfile_contribution, f64, 100.0);
define_param_default!(
    default_usage_growth,
    YearlyValues<f64>,
    [1.0; NUM_PROJECTION_YEARS]
);

/// The settings used when evaluating a scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assumptions {
    /// The cost of fulfilling one request through interlibrary loan
    #[serde(default = "default_cost_ill")]
    pub cost_ill: Money,
    /// The percentage of delayed-access usage which turns into ILL requests
    #[serde(default = "default_ill_request_percent_of_delayed")]
    pub ill_request_percent_of_delayed: f64,
    /// Annual percentage increase in à-la-carte subscription prices
    #[serde(default = "default_cost_alacarte_increase")]
    pub cost_alacarte_increase: f64,
    /// Annual percentage increase in the big-deal package price
    #[serde(default = "default_cost_bigdeal_increase")]
    pub cost_bigdeal_increase: f64,
    /// Content-fee surcharge applied to à-la-carte subscriptions, as a percentage
    #[serde(default = "default_cost_content_fee_percent")]
    pub cost_content_fee_percent: f64,
    /// How many downloads one institutional citation is worth
    #[serde(default = "default_weight_citation")]
    pub weight_citation: f64,
    /// How many downloads one institutional authorship is worth
    #[serde(default = "default_weight_authorship")]
    pub weight_authorship: f64,
    /// Whether bronze OA counts as open access
    #[serde(default = "default_true")]
    pub include_bronze: bool,
    /// Whether submitted versions (preprints) count as open access
    #[serde(default = "default_true")]
    pub include_submitted_version: bool,
    /// Whether copies on academic social networks count as open access
    #[serde(default = "default_true")]
    pub include_social_networks: bool,
    /// Whether perpetual-access holdings fulfil usage
    #[serde(default = "default_true")]
    pub include_backfile: bool,
    /// The percentage of backfile usage that perpetual access actually covers
    #[serde(default = "default_backfile_contribution")]
    pub backfile_contribution: f64,
    /// Multiplier applied to total usage for each projection year
    #[serde(default = "default_usage_growth")]
    pub usage_growth: YearlyValues<f64>,
}

impl Default for Assumptions {
    fn default() -> Self {
        Self {
            cost_ill: default_cost_ill(),
            ill_request_percent_of_delayed: default_ill_request_percent_of_delayed(),
            cost_alacarte_increase: default_cost_alacarte_increase(),
            cost_bigdeal_increase: default_cost_bigdeal_increase(),
            cost_content_fee_percent: default_cost_content_fee_percent(),
            weight_citation: default_weight_citation(),
            weight_authorship: default_weight_authorship(),
            include_bronze: true,
            include_submitted_version: true,
            include_social_networks: true,
            include_backfile: true,
            backfile_contribution: default_backfile_contribution(),
            usage_growth: default_usage_growth(),
        }
    }
}

/// Check that a percentage is finite and in [0, 100]
fn check_percent(name: &str, value: f64) -> Result<()> {
    ensure!(
        value.is_finite() && (0.0..=100.0).contains(&value),
        "{name} must be a percentage between 0 and 100"
    );

    Ok(())
}

/// Check that a value is finite and not negative
fn check_non_negative(name: &str, value: f64) -> Result<()> {
    ensure!(
        value.is_finite() && value >= 0.0,
        "{name} must be a finite number greater than or equal to zero"
    );

    Ok(())
}

/// Overlay the keys of `overrides` onto `base`.
///
/// Both values must be JSON objects. Keys in `overrides` which `base` doesn't have are rejected so
/// that typos in stored snapshots surface as errors.
fn overlay(base: &mut Map<String, Value>, overrides: &Value) -> Result<()> {
    let Value::Object(overrides) = overrides else {
        bail!("Settings overrides must be a JSON object");
    };

    for (key, value) in overrides {
        let Some(slot) = base.get_mut(key) else {
            bail!("Unknown setting: {key}");
        };
        if !value.is_null() {
            *slot = value.clone();
        }
    }

    Ok(())
}

impl Assumptions {
    /// Build assumptions from defaults, applying each set of overrides in order.
    ///
    /// Later overrides win. Null values are ignored so that partially filled snapshots fall back
    /// to the value beneath them.
    pub fn from_overrides<'a, I>(overrides: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a Value>,
    {
        let Value::Object(mut merged) = serde_json::to_value(Self::default())? else {
            bail!("Default assumptions did not serialise to an object");
        };

        for value in overrides {
            overlay(&mut merged, value)?;
        }

        let assumptions: Assumptions = serde_json::from_value(Value::Object(merged))
            .context("Invalid value in settings overrides")?;
        assumptions.validate()?;

        Ok(assumptions)
    }

    /// Validate the assumptions
    pub fn validate(&self) -> Result<()> {
        check_non_negative("cost_ill", self.cost_ill.value())?;
        check_percent(
            "ill_request_percent_of_delayed",
            self.ill_request_percent_of_delayed,
        )?;
        check_non_negative("cost_alacarte_increase", self.cost_alacarte_increase)?;
        check_non_negative("cost_bigdeal_increase", self.cost_bigdeal_increase)?;
        check_non_negative("cost_content_fee_percent", self.cost_content_fee_percent)?;
        check_non_negative("weight_citation", self.weight_citation)?;
        check_non_negative("weight_authorship", self.weight_authorship)?;
        check_percent("backfile_contribution", self.backfile_contribution)?;
        for growth in self.usage_growth {
            check_non_negative("usage_growth", growth)?;
        }

        Ok(())
    }

    /// The fraction of delayed-access usage which becomes ILL requests
    pub fn ill_fraction(&self) -> Dimensionless {
        Dimensionless::from_percent(self.ill_request_percent_of_delayed)
    }

    /// The fraction of perpetual-access usage which backfile fulfils
    pub fn backfile_fraction(&self) -> Dimensionless {
        Dimensionless::from_percent(self.backfile_contribution)
    }

    /// The multiplier applied to à-la-carte list prices for the content fee
    pub fn content_fee_multiplier(&self) -> Dimensionless {
        Dimensionless(1.0) + Dimensionless::from_percent(self.cost_content_fee_percent)
    }
}
