use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::commission::{CommissionBreakdown, CommissionCalculator};
use super::schedule::{ResolvedRates, ScheduleBook};
use crate::common::errors::Result;
use crate::common::types::{Channel, Currency, Sale, ShipmentShare};

/// Everything besides price and cost that commission and proceeds depend on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingContext {
    pub scope: Channel,
    pub subcategory: String,
    pub price_list: String,
    pub date: NaiveDate,
    pub vat_pct: Decimal,
    #[serde(default)]
    pub shipping: Option<ShipmentShare>,
}

impl PricingContext {
    pub fn from_sale(sale: &Sale) -> Self {
        Self {
            scope: sale.channel,
            subcategory: sale.scope.subcategory.clone(),
            price_list: sale.price_list.clone(),
            date: sale.date(),
            vat_pct: sale.vat_pct,
            shipping: sale.shipping.clone(),
        }
    }

    pub fn resolve_rates(&self, book: &ScheduleBook) -> Result<ResolvedRates> {
        book.resolve_rates(self.scope, self.date, &self.subcategory, &self.price_list)
    }

    /// This line's VAT-exclusive share of the shipment cost
    pub fn shipping_net(&self) -> Decimal {
        match &self.shipping {
            Some(share) => {
                let items = Decimal::from(share.items_in_pack.max(1));
                CommissionCalculator::net_of_vat(share.cost, self.vat_pct) / items
            }
            None => Decimal::ZERO,
        }
    }
}

/// Result of `evaluate_sale`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SaleEvaluation {
    pub commission: CommissionBreakdown,
    /// Gross amount of the line without VAT
    pub gross_net: Decimal,
    pub shipping_net: Decimal,
    pub net_proceeds: Decimal,
    /// Unit cost × quantity in settlement currency, at the cost's own snapshot
    pub cost_net: Decimal,
    /// `None` when the cost is not positive
    pub markup: Option<Decimal>,
}

/// Net proceeds and markup for sale lines
pub struct ProceedsCalculator;

impl ProceedsCalculator {
    /// net proceeds = gross / (1 + VAT) − commission − shipping net
    pub fn net_proceeds(gross: Decimal, vat_pct: Decimal, commission: Decimal, shipping_net: Decimal) -> Decimal {
        CommissionCalculator::net_of_vat(gross, vat_pct) - commission - shipping_net
    }

    /// markup = (net proceeds − cost) / cost
    pub fn markup(net_proceeds: Decimal, cost_net: Decimal) -> Option<Decimal> {
        if cost_net <= Decimal::ZERO {
            return None;
        }
        Some((net_proceeds - cost_net) / cost_net)
    }

    /// Evaluate one sale line
    ///
    /// Fails with `SchemaGap` when no commission rate resolves, or
    /// `CurrencyMismatch` when the cost snapshot cannot reach `settlement`.
    pub fn evaluate(book: &ScheduleBook, sale: &Sale, settlement: &Currency) -> Result<SaleEvaluation> {
        let ctx = PricingContext::from_sale(sale);
        let rates = ctx.resolve_rates(book)?;

        let commission = CommissionCalculator::commission(&rates, sale.gross_unit_price, sale.quantity, sale.vat_pct);
        let gross = sale.gross_amount();
        let shipping_net = ctx.shipping_net();
        let net_proceeds = Self::net_proceeds(gross, sale.vat_pct, commission.total, shipping_net);

        let cost_net = sale.unit_cost.in_currency(settlement)? * Decimal::from(sale.quantity);

        Ok(SaleEvaluation {
            gross_net: CommissionCalculator::net_of_vat(gross, sale.vat_pct),
            shipping_net,
            net_proceeds,
            cost_net,
            markup: Self::markup(net_proceeds, cost_net),
            commission,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::{FxSnapshot, MonetaryAmount, SaleId, ScopeAttributes};
    use crate::pricing::schedule::CommissionSchedule;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    fn ars() -> Currency {
        Currency::new("ARS")
    }

    fn book() -> ScheduleBook {
        let schedule = CommissionSchedule {
            version: 1,
            scope: Channel::Marketplace,
            valid_from: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            valid_to: None,
            subcategory_groups: BTreeMap::new(),
            base_rates: BTreeMap::new(),
            default_rate_pct: Some(dec!(10)),
            tiers: vec![],
            misc_fee_pct: dec!(0),
        };
        ScheduleBook::new(vec![schedule], None).unwrap()
    }

    fn sale(cost_usd: Decimal, cost_rate: Decimal) -> Sale {
        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        Sale {
            id: SaleId::new("S-1"),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            channel: Channel::Marketplace,
            scope: ScopeAttributes {
                brand: "acme".into(),
                category: "home".into(),
                subcategory: "lamps".into(),
                item: "LAMP-1".into(),
            },
            price_list: "classic".into(),
            quantity: 2,
            gross_unit_price: dec!(12100),
            vat_pct: dec!(21),
            unit_cost: MonetaryAmount::new(
                cost_usd,
                Currency::usd(),
                FxSnapshot::new(Currency::usd(), ars(), cost_rate, day),
            ),
            shipping: Some(ShipmentShare { cost: dec!(2420), items_in_pack: 2 }),
            usd_fx: FxSnapshot::new(Currency::usd(), ars(), dec!(1000), day),
        }
    }

    #[test]
    fn test_evaluate_line() {
        // gross 24200 → net 20000, commission 2000, shipping 2420/1.21/2 = 1000
        // cost 8 USD × 1000 × 2 = 16000, markup = (17000 - 16000) / 16000
        let eval = ProceedsCalculator::evaluate(&book(), &sale(dec!(8), dec!(1000)), &ars()).unwrap();
        assert_eq!(eval.gross_net, dec!(20000));
        assert_eq!(eval.commission.total, dec!(2000));
        assert_eq!(eval.shipping_net, dec!(1000));
        assert_eq!(eval.net_proceeds, dec!(17000));
        assert_eq!(eval.cost_net, dec!(16000));
        assert_eq!(eval.markup, Some(dec!(0.0625)));
    }

    #[test]
    fn test_cost_uses_its_own_snapshot() {
        // Same sale, cost recorded when USD was at 500: cost 8000
        let eval = ProceedsCalculator::evaluate(&book(), &sale(dec!(8), dec!(500)), &ars()).unwrap();
        assert_eq!(eval.cost_net, dec!(8000));
        assert_eq!(eval.markup, Some(dec!(1.125)));
    }

    #[test]
    fn test_zero_cost_has_no_markup() {
        let eval = ProceedsCalculator::evaluate(&book(), &sale(dec!(0), dec!(1000)), &ars()).unwrap();
        assert!(eval.markup.is_none());
    }
}
