use rust_decimal::Decimal;
use serde::Serialize;

use super::schedule::ResolvedRates;

/// Commission charged on one sale line, split into its components
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommissionBreakdown {
    /// gross / (1 + VAT) × base %
    pub base: Decimal,
    /// Flat per-unit surcharge of the unit price's bracket × quantity
    pub tier_surcharge: Decimal,
    /// gross / (1 + VAT) × misc %
    pub misc: Decimal,
    pub total: Decimal,
    pub rates: ResolvedRates,
}

/// Tiered commission calculation
///
/// Pure functions over already-resolved rates; schedule resolution lives
/// in [`ScheduleBook`](super::ScheduleBook).
pub struct CommissionCalculator;

impl CommissionCalculator {
    /// Strip VAT from a VAT-inclusive amount
    ///
    /// # Arguments
    /// * `gross` - VAT-inclusive amount
    /// * `vat_pct` - VAT as a percentage (21 = 21%)
    pub fn net_of_vat(gross: Decimal, vat_pct: Decimal) -> Decimal {
        gross / (Decimal::ONE + vat_pct / Decimal::ONE_HUNDRED)
    }

    /// Commission for `quantity` units sold at `unit_price`
    ///
    /// The surcharge bracket is picked by the unit price, never by the line
    /// total, and the bracket's surcharge is charged once per unit. A line
    /// of several cheap units therefore never drops out of the brackets.
    ///
    /// # Arguments
    /// * `rates` - Base %, misc % and price bands for the sale context
    /// * `unit_price` - VAT-inclusive unit price, selects the surcharge bracket
    /// * `quantity` - Units on the line
    /// * `vat_pct` - VAT as a percentage
    ///
    /// # Returns
    /// Breakdown whose `total` is never negative
    pub fn commission(
        rates: &ResolvedRates,
        unit_price: Decimal,
        quantity: u32,
        vat_pct: Decimal,
    ) -> CommissionBreakdown {
        let qty = Decimal::from(quantity);
        let gross_net = Self::net_of_vat(unit_price * qty, vat_pct);

        let base = (gross_net * rates.base_pct / Decimal::ONE_HUNDRED).max(Decimal::ZERO);
        let tier_surcharge = (rates.surcharge_for(unit_price) * qty).max(Decimal::ZERO);
        let misc = (gross_net * rates.misc_pct / Decimal::ONE_HUNDRED).max(Decimal::ZERO);

        CommissionBreakdown {
            base,
            tier_surcharge,
            misc,
            total: base + tier_surcharge + misc,
            rates: rates.clone(),
        }
    }
}
