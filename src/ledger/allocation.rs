//! Cap arithmetic for a single ledger line
//!
//! Pure and order-free: the caller supplies the totals strictly before the
//! line, so replays and on-the-fly scans reuse exactly the same decision.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::offsets::{AmountRule, Caps};

/// Running consumption of one cap target
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub units: u64,
    pub amount: Decimal,
    pub amount_usd: Decimal,
}

impl Totals {
    pub fn add(&mut self, quantity: u64, amount: Decimal, amount_usd: Decimal) {
        self.units += quantity;
        self.amount += amount;
        self.amount_usd += amount_usd;
    }

    /// Whether any configured cap has been reached
    pub fn reaches(&self, caps: &Caps) -> bool {
        caps.unit_cap.is_some_and(|c| self.units >= c)
            || caps.monetary_cap_usd.is_some_and(|c| self.amount_usd >= c)
    }
}

/// Uncapped entitlement of one sale line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nominal {
    pub quantity: u64,
    /// Settlement currency
    pub amount: Decimal,
    pub amount_usd: Decimal,
    /// Settlement units per USD at the sale's snapshot
    pub fx_rate: Decimal,
}

/// How a line fared against its caps
///
/// `Partial` and `Zero` are the recorded form of a cap being exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationOutcome {
    Full,
    Partial,
    Zero,
}

/// Which cap produced the truncation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingCap {
    Unit,
    Monetary,
}

/// Capped result for one line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub quantity: u64,
    pub amount: Decimal,
    pub amount_usd: Decimal,
    pub outcome: AllocationOutcome,
    pub binding: Option<BindingCap>,
}

/// Apply unit and monetary caps to a nominal entitlement
///
/// Both truncations are computed independently against the totals before
/// this line; the smaller allocation wins.
pub fn apply_caps(rule: &AmountRule, nominal: &Nominal, prior: &Totals, caps: &Caps) -> Allocation {
    let unit_qty = match caps.unit_cap {
        Some(cap) => cap.saturating_sub(prior.units).min(nominal.quantity),
        None => nominal.quantity,
    };
    let unit_amount = rule.for_quantity(nominal.amount, nominal.quantity, unit_qty);
    let unit_usd = if unit_amount == nominal.amount {
        nominal.amount_usd
    } else {
        to_usd(unit_amount, nominal.fx_rate)
    };

    let (money_amount, money_usd) = match caps.monetary_cap_usd {
        Some(cap) => {
            let headroom = (cap - prior.amount_usd).max(Decimal::ZERO);
            if nominal.amount_usd <= headroom {
                (nominal.amount, nominal.amount_usd)
            } else {
                (headroom * nominal.fx_rate, headroom)
            }
        }
        None => (nominal.amount, nominal.amount_usd),
    };

    let (quantity, amount, amount_usd, binding) = if money_usd < unit_usd {
        let quantity = if money_amount.is_zero() { 0 } else { unit_qty };
        (quantity, money_amount, money_usd, Some(BindingCap::Monetary))
    } else if unit_qty < nominal.quantity {
        (unit_qty, unit_amount, unit_usd, Some(BindingCap::Unit))
    } else {
        (unit_qty, unit_amount, unit_usd, None)
    };

    let outcome = if quantity == nominal.quantity && amount == nominal.amount {
        AllocationOutcome::Full
    } else if amount.is_zero() && quantity == 0 {
        AllocationOutcome::Zero
    } else {
        AllocationOutcome::Partial
    };

    Allocation {
        quantity,
        amount,
        amount_usd,
        outcome,
        binding,
    }
}

fn to_usd(amount: Decimal, fx_rate: Decimal) -> Decimal {
    if fx_rate.is_zero() {
        Decimal::ZERO
    } else {
        amount / fx_rate
    }
}
