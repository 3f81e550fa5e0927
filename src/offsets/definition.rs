use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::common::errors::{LedgerError, Result};
use crate::common::types::{ChannelFlags, Sale, ScopeAttributes};

/// Offset definition identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OffsetId(pub String);

/// Offset group identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub String);

impl OffsetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl GroupId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

/// What a cap is enforced against: a standalone offset or a whole group
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum CapTarget {
    Offset(OffsetId),
    Group(GroupId),
}

impl std::fmt::Display for CapTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CapTarget::Offset(id) => write!(f, "offset:{}", id.0),
            CapTarget::Group(id) => write!(f, "group:{}", id.0),
        }
    }
}

/// Catalog scope an offset applies to; unset fields are wildcards
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopePredicate {
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub subcategory: Option<String>,
    #[serde(default)]
    pub item: Option<String>,
}

impl ScopePredicate {
    pub fn matches(&self, attrs: &ScopeAttributes) -> bool {
        fn field(expected: &Option<String>, actual: &str) -> bool {
            expected.as_deref().map_or(true, |e| e == actual)
        }
        field(&self.brand, &attrs.brand)
            && field(&self.category, &attrs.category)
            && field(&self.subcategory, &attrs.subcategory)
            && field(&self.item, &attrs.item)
    }

    pub fn item(item: impl Into<String>) -> Self {
        Self {
            item: Some(item.into()),
            ..Self::default()
        }
    }

    pub fn brand(brand: impl Into<String>) -> Self {
        Self {
            brand: Some(brand.into()),
            ..Self::default()
        }
    }
}

/// How much an offset pays for one matching sale line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AmountRule {
    /// Flat amount per sale line, independent of quantity
    Fixed(Decimal),
    /// Amount per unit sold
    PerUnit(Decimal),
    /// Percentage (5 = 5%) of the unit cost, per unit
    PercentOfCost(Decimal),
}

impl AmountRule {
    /// Nominal (uncapped) amount in settlement currency
    pub fn nominal(&self, quantity: u64, unit_cost_net: Decimal) -> Decimal {
        let qty = Decimal::from(quantity);
        match self {
            AmountRule::Fixed(amount) => *amount,
            AmountRule::PerUnit(amount) => *amount * qty,
            AmountRule::PercentOfCost(pct) => *pct / Decimal::ONE_HUNDRED * unit_cost_net * qty,
        }
    }

    /// Amount for a unit-truncated quantity
    ///
    /// Quantity-linear rules scale; a fixed amount is all-or-nothing.
    pub fn for_quantity(&self, nominal: Decimal, nominal_qty: u64, qty: u64) -> Decimal {
        if qty == 0 || nominal_qty == 0 {
            return Decimal::ZERO;
        }
        match self {
            AmountRule::Fixed(_) => nominal,
            _ => nominal * Decimal::from(qty) / Decimal::from(nominal_qty),
        }
    }

    fn validate(&self, owner: &str) -> Result<()> {
        let (value, limit) = match self {
            AmountRule::Fixed(v) | AmountRule::PerUnit(v) => (*v, None),
            AmountRule::PercentOfCost(v) => (*v, Some(Decimal::ONE_HUNDRED)),
        };
        if value < Decimal::ZERO {
            return Err(LedgerError::InvalidDefinition(format!(
                "{}: negative amount {}",
                owner, value
            )));
        }
        if limit.is_some_and(|l| value > l) {
            return Err(LedgerError::InvalidDefinition(format!(
                "{}: percent of cost {} above 100",
                owner, value
            )));
        }
        Ok(())
    }
}

/// Unit and monetary limits of one cap target
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caps {
    #[serde(default)]
    pub unit_cap: Option<u64>,
    #[serde(default)]
    pub monetary_cap_usd: Option<Decimal>,
}

impl Caps {
    pub fn is_uncapped(&self) -> bool {
        self.unit_cap.is_none() && self.monetary_cap_usd.is_none()
    }

    fn validate(&self, owner: &str) -> Result<()> {
        if let Some(cap) = self.monetary_cap_usd {
            if cap < Decimal::ZERO {
                return Err(LedgerError::InvalidDefinition(format!(
                    "{}: negative monetary cap {}",
                    owner, cap
                )));
            }
        }
        Ok(())
    }
}

/// Inclusive effective date range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Effective {
    pub valid_from: NaiveDate,
    #[serde(default)]
    pub valid_to: Option<NaiveDate>,
}

impl Effective {
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.valid_from && self.valid_to.map_or(true, |to| date <= to)
    }

    pub fn overlaps(&self, other: &Effective) -> bool {
        other.valid_to.map_or(true, |to| self.valid_from <= to)
            && self.valid_to.map_or(true, |to| other.valid_from <= to)
    }

    fn validate(&self, owner: &str) -> Result<()> {
        match self.valid_to {
            Some(to) if to < self.valid_from => Err(LedgerError::InvalidDefinition(format!(
                "{}: valid_to {} before valid_from {}",
                owner, to, self.valid_from
            ))),
            _ => Ok(()),
        }
    }
}

/// A single incentive program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OffsetDefinition {
    pub id: OffsetId,
    #[serde(default)]
    pub scope: ScopePredicate,
    pub rule: AmountRule,
    #[serde(flatten)]
    pub effective: Effective,
    #[serde(default)]
    pub channels: ChannelFlags,
    /// Own caps; must be empty for grouped definitions
    #[serde(default, flatten)]
    pub caps: Caps,
    #[serde(default)]
    pub group_id: Option<GroupId>,
}

impl OffsetDefinition {
    /// Scope, date range and channel all match
    pub fn applies_to(&self, sale: &Sale) -> bool {
        self.effective.contains(sale.date())
            && self.channels.allows(sale.channel)
            && self.scope.matches(&sale.scope)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        let owner = format!("offset {}", self.id.0);
        self.rule.validate(&owner)?;
        self.caps.validate(&owner)?;
        self.effective.validate(&owner)?;
        if self.group_id.is_some() && !self.caps.is_uncapped() {
            return Err(LedgerError::InvalidDefinition(format!(
                "{}: grouped offsets share the group's caps",
                owner
            )));
        }
        Ok(())
    }
}

/// Alternative scope that widens a group's matching
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OffsetGroupFilter {
    pub scope: ScopePredicate,
    pub rule: AmountRule,
}

/// Named campaign sharing one combined cap across its members and filters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OffsetGroup {
    pub id: GroupId,
    pub name: String,
    #[serde(flatten)]
    pub effective: Effective,
    #[serde(default)]
    pub channels: ChannelFlags,
    /// Member definitions, in match priority order
    #[serde(default)]
    pub members: Vec<OffsetId>,
    /// Tried after members, in order
    #[serde(default)]
    pub filters: Vec<OffsetGroupFilter>,
    #[serde(default, flatten)]
    pub caps: Caps,
}

impl OffsetGroup {
    pub fn is_open_for(&self, sale: &Sale) -> bool {
        self.effective.contains(sale.date()) && self.channels.allows(sale.channel)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        let owner = format!("group {}", self.id.0);
        self.caps.validate(&owner)?;
        self.effective.validate(&owner)?;
        for filter in &self.filters {
            filter.rule.validate(&owner)?;
        }
        if self.members.is_empty() && self.filters.is_empty() {
            return Err(LedgerError::InvalidDefinition(format!(
                "{}: no members or filters",
                owner
            )));
        }
        Ok(())
    }
}
