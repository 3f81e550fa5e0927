//! Integration tests for commission, proceeds and price goal-seek

mod common;

use common::*;
use margin_ledger::{
    Channel, CommissionSchedule, Currency, FxSnapshot, InMemorySaleHistory, LedgerError, MarginService,
    MonetaryAmount, PricingContext, ScheduleBook, ShipmentShare,
};
use pretty_assertions::assert_eq;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use test_log::test;

fn lamp_context() -> PricingContext {
    PricingContext {
        scope: Channel::Marketplace,
        subcategory: "lamps".into(),
        price_list: "classic".into(),
        date: day(10),
        vat_pct: dec!(21),
        shipping: None,
    }
}

#[test]
fn test_commission_components() {
    let service = empty_service();
    let mut sale = lamp_sale("S1", at(10, 12, 0), 1);
    sale.gross_unit_price = dec!(12100);

    let evaluation = service.evaluate_sale(&sale).unwrap();
    // 10000 net: 12% base, 1.5% misc, 75 surcharge in the [10000, 15000) bracket
    assert_eq!(evaluation.gross_net, dec!(10000));
    assert_eq!(evaluation.commission.base, dec!(1200));
    assert_eq!(evaluation.commission.misc, dec!(150));
    assert_eq!(evaluation.commission.tier_surcharge, dec!(75));
    assert_eq!(evaluation.commission.total, dec!(1425));
    assert_eq!(evaluation.net_proceeds, dec!(8575));
    assert_eq!(evaluation.cost_net, dec!(400));
}

#[test]
fn test_commission_never_negative() {
    let service = empty_service();
    for price in [dec!(0), dec!(0.01), dec!(4999.99), dec!(5000), dec!(14999.99), dec!(15000), dec!(999999)] {
        let mut sale = lamp_sale("S1", at(10, 12, 0), 3);
        sale.gross_unit_price = price;
        let evaluation = service.evaluate_sale(&sale).unwrap();
        assert!(evaluation.commission.total >= Decimal::ZERO, "price {}", price);
    }
}

#[test]
fn test_shipping_share_reduces_proceeds() {
    let service = empty_service();
    let mut sale = lamp_sale("S1", at(10, 12, 0), 1);
    sale.gross_unit_price = dec!(12100);
    let without = service.evaluate_sale(&sale).unwrap();

    sale.shipping = Some(ShipmentShare {
        cost: dec!(2420),
        items_in_pack: 2,
    });
    let with = service.evaluate_sale(&sale).unwrap();
    assert_eq!(with.shipping_net, dec!(1000));
    assert_eq!(without.net_proceeds - with.net_proceeds, dec!(1000));
}

#[test]
fn test_goal_seek_round_trip() {
    let service = empty_service();
    let ctx = lamp_context();
    let cost = MonetaryAmount::settled(dec!(6000), ars(), day(10));

    for target in [dec!(0.10), dec!(0.30), dec!(0.75)] {
        let price = service.solve_price_for_markup(&cost, target, &ctx).unwrap();
        assert_eq!(price, price.round_dp(2));

        let mut sale = lamp_sale("Q", at(10, 12, 0), 1);
        sale.gross_unit_price = price;
        sale.unit_cost = cost.clone();
        let markup = service.evaluate_sale(&sale).unwrap().markup.unwrap();

        assert!(markup >= target, "price {} gives {} < {}", price, markup, target);
        assert!(markup - target < dec!(0.0001), "price {} overshoots: {}", price, markup);
    }
}

#[test]
fn test_goal_seek_uses_cost_snapshot() {
    let service = empty_service();
    let ctx = lamp_context();
    // 60 USD recorded at 100 ARS/USD is 6000 ARS
    let in_usd = MonetaryAmount::new(
        dec!(60),
        Currency::usd(),
        FxSnapshot::new(Currency::usd(), ars(), dec!(100), day(1)),
    );
    let in_ars = MonetaryAmount::settled(dec!(6000), ars(), day(10));

    assert_eq!(
        service.solve_price_for_markup(&in_usd, dec!(0.3), &ctx).unwrap(),
        service.solve_price_for_markup(&in_ars, dec!(0.3), &ctx).unwrap()
    );
}

#[test]
fn test_goal_seek_rejects_free_items() {
    let service = empty_service();
    let cost = MonetaryAmount::settled(dec!(0), ars(), day(10));
    let err = service
        .solve_price_for_markup(&cost, dec!(0.3), &lamp_context())
        .unwrap_err();
    assert!(matches!(err, LedgerError::NoConvergence(_)));
}

#[test]
fn test_schema_gap_without_floor() {
    let service = empty_service();
    let mut sale = lamp_sale("S1", at(10, 12, 0), 1);
    sale.timestamp = chrono::TimeZone::with_ymd_and_hms(&chrono::Utc, 2023, 6, 1, 12, 0, 0).unwrap();

    let err = service.evaluate_sale(&sale).unwrap_err();
    assert!(matches!(err, LedgerError::SchemaGap { .. }));
}

#[test]
fn test_floor_applies_outside_schedules() {
    let book = ScheduleBook::new(Vec::<CommissionSchedule>::new(), Some(dec!(10))).unwrap();
    let service = MarginService::new(book, registry(), ars(), Arc::new(InMemorySaleHistory::new()));
    let mut sale = lamp_sale("S1", at(10, 12, 0), 1);
    sale.gross_unit_price = dec!(12100);

    let evaluation = service.evaluate_sale(&sale).unwrap();
    assert_eq!(evaluation.commission.total, dec!(1000));
    assert_eq!(evaluation.commission.tier_surcharge, dec!(0));
}

#[test]
fn test_overlapping_versions_rejected_at_load() {
    let mut second = sample_schedule();
    second.version = 2;
    second.valid_from = day(1);
    let err = ScheduleBook::new(vec![sample_schedule(), second], None).unwrap_err();
    assert!(matches!(err, LedgerError::InvalidDefinition(_)));
}
