//! Common test utilities and fixtures
#![allow(dead_code)]

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use margin_ledger::common::types::ChannelFlags;
use margin_ledger::{
    AmountRule, CapTarget, Caps, Channel, CommissionSchedule, Currency, Effective, FxSnapshot, GroupId,
    InMemorySaleHistory, MarginService, MonetaryAmount, OffsetDefinition, OffsetGroup, OffsetGroupFilter,
    OffsetId, OffsetRegistry, Sale, SaleId, ScheduleBook, ScopeAttributes, ScopePredicate, TierBracket,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;
use std::sync::Arc;

/// ARS per USD used by every sample sale
pub const USD_RATE: Decimal = dec!(100);

pub fn ars() -> Currency {
    Currency::new("ARS")
}

/// A day in March 2024
pub fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
}

pub fn at(d: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, d, hour, minute, 0).unwrap()
}

/// Marketplace schedule: home 12%/16.5%, tech 11%, default 13%, misc 1.5%,
/// surcharges 300/150/75 below 5000/10000/15000
pub fn sample_schedule() -> CommissionSchedule {
    let mut groups = BTreeMap::new();
    groups.insert("lamps".to_string(), "home".to_string());
    groups.insert("rugs".to_string(), "home".to_string());
    groups.insert("phones".to_string(), "tech".to_string());

    let mut home = BTreeMap::new();
    home.insert("classic".to_string(), dec!(12));
    home.insert("premium".to_string(), dec!(16.5));
    let mut tech = BTreeMap::new();
    tech.insert("classic".to_string(), dec!(11));
    let mut base_rates = BTreeMap::new();
    base_rates.insert("home".to_string(), home);
    base_rates.insert("tech".to_string(), tech);

    CommissionSchedule {
        version: 1,
        scope: Channel::Marketplace,
        valid_from: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        valid_to: None,
        subcategory_groups: groups,
        base_rates,
        default_rate_pct: Some(dec!(13)),
        tiers: vec![
            TierBracket {
                threshold: dec!(5000),
                surcharge: dec!(300),
            },
            TierBracket {
                threshold: dec!(10000),
                surcharge: dec!(150),
            },
            TierBracket {
                threshold: dec!(15000),
                surcharge: dec!(75),
            },
        ],
        misc_fee_pct: dec!(1.5),
    }
}

pub fn schedule_book() -> ScheduleBook {
    ScheduleBook::new(vec![sample_schedule()], None).unwrap()
}

fn march() -> Effective {
    Effective {
        valid_from: day(1),
        valid_to: Some(day(31)),
    }
}

/// Offsets:
/// - `acme-units`: 100 ARS per acme unit, at most 10 units
/// - `lamp-budget`: 10% of cost on LAMP-1, at most 5 USD
/// - group `spring` (20 units): member `spring-rugs` (500 flat per rug line),
///   then any home item at 50 per unit
///
/// Everything is marketplace only.
pub fn registry() -> OffsetRegistry {
    registry_with_acme_channels(ChannelFlags::default())
}

/// Same offsets, with `acme-units` open on `channels`
pub fn registry_with_acme_channels(channels: ChannelFlags) -> OffsetRegistry {
    let definitions = vec![
        OffsetDefinition {
            id: OffsetId::new("acme-units"),
            scope: ScopePredicate::brand("acme"),
            rule: AmountRule::PerUnit(dec!(100)),
            effective: march(),
            channels,
            caps: Caps {
                unit_cap: Some(10),
                monetary_cap_usd: None,
            },
            group_id: None,
        },
        OffsetDefinition {
            id: OffsetId::new("lamp-budget"),
            scope: ScopePredicate::item("LAMP-1"),
            rule: AmountRule::PercentOfCost(dec!(10)),
            effective: march(),
            channels: ChannelFlags::default(),
            caps: Caps {
                unit_cap: None,
                monetary_cap_usd: Some(dec!(5)),
            },
            group_id: None,
        },
        OffsetDefinition {
            id: OffsetId::new("spring-rugs"),
            scope: ScopePredicate {
                subcategory: Some("rugs".into()),
                ..ScopePredicate::default()
            },
            rule: AmountRule::Fixed(dec!(500)),
            effective: march(),
            channels: ChannelFlags::default(),
            caps: Caps::default(),
            group_id: Some(GroupId::new("spring")),
        },
    ];
    let groups = vec![OffsetGroup {
        id: GroupId::new("spring"),
        name: "Spring campaign".into(),
        effective: march(),
        channels: ChannelFlags::default(),
        members: vec![OffsetId::new("spring-rugs")],
        filters: vec![OffsetGroupFilter {
            scope: ScopePredicate {
                category: Some("home".into()),
                ..ScopePredicate::default()
            },
            rule: AmountRule::PerUnit(dec!(50)),
        }],
        caps: Caps {
            unit_cap: Some(20),
            monetary_cap_usd: None,
        },
    }];
    OffsetRegistry::new(definitions, groups).unwrap()
}

pub fn acme_units() -> CapTarget {
    CapTarget::Offset(OffsetId::new("acme-units"))
}

pub fn lamp_budget() -> CapTarget {
    CapTarget::Offset(OffsetId::new("lamp-budget"))
}

pub fn spring() -> CapTarget {
    CapTarget::Group(GroupId::new("spring"))
}

/// Acme LAMP-1 sold on the marketplace at 10000 ARS, cost 400 ARS
pub fn lamp_sale(id: &str, timestamp: DateTime<Utc>, quantity: u32) -> Sale {
    let date = timestamp.date_naive();
    Sale {
        id: SaleId::new(id),
        timestamp,
        channel: Channel::Marketplace,
        scope: ScopeAttributes {
            brand: "acme".into(),
            category: "home".into(),
            subcategory: "lamps".into(),
            item: "LAMP-1".into(),
        },
        price_list: "classic".into(),
        quantity,
        gross_unit_price: dec!(10000),
        vat_pct: dec!(21),
        unit_cost: MonetaryAmount::settled(dec!(400), ars(), date),
        shipping: None,
        usd_fx: FxSnapshot::new(Currency::usd(), ars(), USD_RATE, date),
    }
}

/// Weavers RUG-1, only eligible for the spring group
pub fn rug_sale(id: &str, timestamp: DateTime<Utc>, quantity: u32) -> Sale {
    let mut sale = lamp_sale(id, timestamp, quantity);
    sale.scope = ScopeAttributes {
        brand: "weavers".into(),
        category: "home".into(),
        subcategory: "rugs".into(),
        item: "RUG-1".into(),
    };
    sale
}

pub fn service(history: Arc<InMemorySaleHistory>) -> MarginService {
    MarginService::new(schedule_book(), registry(), ars(), history)
}

pub fn empty_service() -> MarginService {
    service(Arc::new(InMemorySaleHistory::new()))
}
