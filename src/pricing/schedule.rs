use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::common::errors::{LedgerError, Result};
use crate::common::types::Channel;

/// Number of surcharge brackets a schedule defines
pub const TIER_COUNT: usize = 3;

/// One price bracket: sales below `threshold` (and at or above the previous
/// bracket's threshold) pay `surcharge`, VAT-exclusive, per unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierBracket {
    pub threshold: Decimal,
    pub surcharge: Decimal,
}

/// Contiguous price interval with the surcharge charged inside it
///
/// `upper == None` is the open bracket above the top threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceBand {
    pub lower: Decimal,
    pub upper: Option<Decimal>,
    pub surcharge: Decimal,
}

impl PriceBand {
    pub fn contains(&self, price: Decimal) -> bool {
        price >= self.lower && self.upper.map_or(true, |u| price < u)
    }
}

/// A versioned, time-bounded commission schedule for one sales channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionSchedule {
    pub version: u32,
    pub scope: Channel,
    pub valid_from: NaiveDate,
    /// Inclusive; `None` means open-ended
    #[serde(default)]
    pub valid_to: Option<NaiveDate>,
    /// subcategory → subcategory group
    #[serde(default)]
    pub subcategory_groups: BTreeMap<String, String>,
    /// subcategory group → price list → base %
    #[serde(default)]
    pub base_rates: BTreeMap<String, BTreeMap<String, Decimal>>,
    /// Schedule-wide base % when no group rate resolves
    #[serde(default)]
    pub default_rate_pct: Option<Decimal>,
    /// Empty, or exactly `TIER_COUNT` ascending brackets
    #[serde(default)]
    pub tiers: Vec<TierBracket>,
    #[serde(default)]
    pub misc_fee_pct: Decimal,
}

impl CommissionSchedule {
    pub fn is_active(&self, date: NaiveDate) -> bool {
        date >= self.valid_from && self.valid_to.map_or(true, |to| date <= to)
    }

    /// True when both versions cover at least one common day
    pub fn overlaps(&self, other: &CommissionSchedule) -> bool {
        let starts_before_other_ends = other.valid_to.map_or(true, |to| self.valid_from <= to);
        let other_starts_before_end = self.valid_to.map_or(true, |to| other.valid_from <= to);
        starts_before_other_ends && other_starts_before_end
    }

    /// Base % for a subcategory and price list, falling back to the schedule default
    pub fn base_rate(&self, subcategory: &str, price_list: &str) -> Option<(Decimal, RateOrigin)> {
        self.subcategory_groups
            .get(subcategory)
            .and_then(|group| self.base_rates.get(group))
            .and_then(|lists| lists.get(price_list))
            .map(|rate| (*rate, RateOrigin::Group))
            .or_else(|| self.default_rate_pct.map(|rate| (rate, RateOrigin::ScheduleDefault)))
    }

    /// All price bands, ascending, ending with the open zero-surcharge band
    pub fn bands(&self) -> Vec<PriceBand> {
        let mut bands = Vec::with_capacity(self.tiers.len() + 1);
        let mut lower = Decimal::ZERO;
        for tier in &self.tiers {
            bands.push(PriceBand {
                lower,
                upper: Some(tier.threshold),
                surcharge: tier.surcharge,
            });
            lower = tier.threshold;
        }
        bands.push(PriceBand {
            lower,
            upper: None,
            surcharge: Decimal::ZERO,
        });
        bands
    }

    fn validate(&self) -> Result<()> {
        let invalid = |msg: String| {
            Err(LedgerError::InvalidDefinition(format!(
                "schedule {} v{}: {}",
                self.scope, self.version, msg
            )))
        };

        if let Some(to) = self.valid_to {
            if to < self.valid_from {
                return invalid(format!("valid_to {} before valid_from {}", to, self.valid_from));
            }
        }
        if !self.tiers.is_empty() && self.tiers.len() != TIER_COUNT {
            return invalid(format!("expected {} tiers, got {}", TIER_COUNT, self.tiers.len()));
        }
        for pair in self.tiers.windows(2) {
            if pair[1].threshold <= pair[0].threshold {
                return invalid("tier thresholds must be strictly ascending".to_string());
            }
        }
        if self.tiers.iter().any(|t| t.threshold <= Decimal::ZERO || t.surcharge < Decimal::ZERO) {
            return invalid("tier thresholds must be positive and surcharges non-negative".to_string());
        }
        let rates = self
            .base_rates
            .values()
            .flat_map(|lists| lists.values())
            .chain(self.default_rate_pct.iter())
            .chain(std::iter::once(&self.misc_fee_pct));
        for rate in rates {
            if *rate < Decimal::ZERO || *rate >= Decimal::ONE_HUNDRED {
                return invalid(format!("rate {} outside [0, 100)", rate));
            }
        }
        Ok(())
    }
}

/// Where the base rate of a commission came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateOrigin {
    /// Subcategory group + price list entry
    Group,
    /// Schedule-wide default
    ScheduleDefault,
    /// Hard floor (no usable schedule entry)
    Floor,
}

/// Rates and bands resolved for one sale context
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedRates {
    /// Active schedule version, if any
    pub version: Option<u32>,
    pub origin: RateOrigin,
    pub base_pct: Decimal,
    pub misc_pct: Decimal,
    #[serde(skip)]
    pub bands: Vec<PriceBand>,
}

impl ResolvedRates {
    pub fn surcharge_for(&self, unit_price: Decimal) -> Decimal {
        self.bands
            .iter()
            .find(|b| b.contains(unit_price))
            .map(|b| b.surcharge)
            .unwrap_or(Decimal::ZERO)
    }
}

/// All schedule versions, validated at load time
#[derive(Debug, Clone, Default)]
pub struct ScheduleBook {
    versions: BTreeMap<Channel, Vec<CommissionSchedule>>,
    floor_rate_pct: Option<Decimal>,
}

impl ScheduleBook {
    /// Validate and index schedule versions
    ///
    /// Rejects malformed versions and any two versions of the same scope
    /// whose date ranges overlap.
    pub fn new(schedules: Vec<CommissionSchedule>, floor_rate_pct: Option<Decimal>) -> Result<Self> {
        if let Some(floor) = floor_rate_pct {
            if floor < Decimal::ZERO || floor >= Decimal::ONE_HUNDRED {
                return Err(LedgerError::InvalidDefinition(format!(
                    "floor rate {} outside [0, 100)",
                    floor
                )));
            }
        }

        let mut versions: BTreeMap<Channel, Vec<CommissionSchedule>> = BTreeMap::new();
        for schedule in schedules {
            schedule.validate()?;
            let scoped = versions.entry(schedule.scope).or_default();
            if let Some(clash) = scoped.iter().find(|s| s.overlaps(&schedule)) {
                return Err(LedgerError::InvalidDefinition(format!(
                    "schedule {} v{} overlaps v{}",
                    schedule.scope, schedule.version, clash.version
                )));
            }
            scoped.push(schedule);
        }
        for scoped in versions.values_mut() {
            scoped.sort_by_key(|s| s.valid_from);
        }

        debug!("Loaded {} schedule scopes", versions.len());
        Ok(Self {
            versions,
            floor_rate_pct,
        })
    }

    pub fn floor_rate_pct(&self) -> Option<Decimal> {
        self.floor_rate_pct
    }

    /// The single active version for a scope and date
    pub fn resolve(&self, scope: Channel, date: NaiveDate) -> Option<&CommissionSchedule> {
        self.versions
            .get(&scope)
            .and_then(|scoped| scoped.iter().find(|s| s.is_active(date)))
    }

    /// Resolve base %, misc % and price bands for a sale context
    pub fn resolve_rates(
        &self,
        scope: Channel,
        date: NaiveDate,
        subcategory: &str,
        price_list: &str,
    ) -> Result<ResolvedRates> {
        let schedule = self.resolve(scope, date);

        if let Some(schedule) = schedule {
            if let Some((base_pct, origin)) = schedule.base_rate(subcategory, price_list) {
                return Ok(ResolvedRates {
                    version: Some(schedule.version),
                    origin,
                    base_pct,
                    misc_pct: schedule.misc_fee_pct,
                    bands: schedule.bands(),
                });
            }
        }

        match self.floor_rate_pct {
            Some(floor) => Ok(ResolvedRates {
                version: schedule.map(|s| s.version),
                origin: RateOrigin::Floor,
                base_pct: floor,
                misc_pct: schedule.map_or(Decimal::ZERO, |s| s.misc_fee_pct),
                bands: schedule.map_or_else(Vec::new, |s| s.bands()),
            }),
            None => Err(LedgerError::SchemaGap {
                scope: format!("{}/{}/{}", scope, subcategory, price_list),
                date,
            }),
        }
    }
}
