//! Integration tests for offset allocation and cap enforcement

mod common;

use common::*;
use margin_ledger::{AllocationOutcome, GroupId, LedgerError, OffsetId};
use pretty_assertions::assert_eq;
use rust_decimal_macros::dec;
use std::sync::Arc;
use test_log::test;

#[test(tokio::test)]
async fn test_lamp_sale_hits_every_matching_target() {
    let service = empty_service();
    let records = service.allocate_offsets(&lamp_sale("S1", at(2, 10, 0), 2)).await.unwrap();

    let targets: Vec<_> = records.iter().map(|r| r.target.clone()).collect();
    assert_eq!(targets, vec![acme_units(), lamp_budget(), spring()]);
    assert_eq!(records[0].amount, dec!(200));
    // 10% of 400 per unit
    assert_eq!(records[1].amount, dec!(80));
    assert_eq!(records[1].amount_usd, dec!(0.8));
    assert_eq!(records[2].amount, dec!(100));
}

#[test(tokio::test)]
async fn test_unit_cap_truncates_crossing_sale() {
    let service = empty_service();
    service.allocate_offsets(&lamp_sale("S1", at(2, 10, 0), 8)).await.unwrap();
    let records = service.allocate_offsets(&lamp_sale("S2", at(3, 10, 0), 5)).await.unwrap();

    let acme = records.iter().find(|r| r.target == acme_units()).unwrap();
    assert_eq!(acme.quantity, 2);
    assert_eq!(acme.outcome, AllocationOutcome::Partial);

    let status = service.get_offset_status(&OffsetId::new("acme-units")).await.unwrap();
    assert_eq!(status.consumed_units, 10);
    assert_eq!(status.remaining_units, Some(0));
    assert!(status.exhausted);
    assert_eq!(status.exhausted_at, Some(at(3, 10, 0)));

    let after = service.allocate_offsets(&lamp_sale("S3", at(4, 10, 0), 1)).await.unwrap();
    let acme = after.iter().find(|r| r.target == acme_units()).unwrap();
    assert_eq!(acme.outcome, AllocationOutcome::Zero);
    assert_eq!(acme.amount, dec!(0));
}

#[test(tokio::test)]
async fn test_monetary_cap_never_exceeded() {
    let service = empty_service();
    for n in 0..20 {
        service
            .allocate_offsets(&lamp_sale(&format!("S{:02}", n), at(5, 9, n), 1))
            .await
            .unwrap();
    }

    let status = service.get_offset_status(&OffsetId::new("lamp-budget")).await.unwrap();
    assert_eq!(status.consumed_usd, dec!(5));
    assert_eq!(status.consumed_amount, dec!(500));
    assert_eq!(status.remaining_usd, Some(dec!(0)));
    // 12 full units at 0.4 USD, the 13th gets the last 0.2
    assert_eq!(status.exhausted_at, Some(at(5, 9, 12)));
}

#[test(tokio::test)]
async fn test_reallocation_is_idempotent() {
    let service = empty_service();
    let sale = lamp_sale("S1", at(2, 10, 0), 3);
    let first = service.allocate_offsets(&sale).await.unwrap();
    let before = service.statuses().await.unwrap();

    let second = service.allocate_offsets(&sale).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(service.statuses().await.unwrap(), before);
    assert_eq!(service.ledger().snapshot(&acme_units()).await.unwrap().len(), 1);
}

#[test(tokio::test)]
async fn test_amended_quantity_replaces_record() {
    let service = empty_service();
    service.allocate_offsets(&lamp_sale("S1", at(2, 10, 0), 3)).await.unwrap();
    service.allocate_offsets(&lamp_sale("S1", at(2, 10, 0), 5)).await.unwrap();

    let status = service.get_offset_status(&OffsetId::new("acme-units")).await.unwrap();
    assert_eq!(status.consumed_units, 5);
    assert_eq!(status.consumed_amount, dec!(500));
    assert_eq!(service.ledger().snapshot(&acme_units()).await.unwrap().len(), 1);
}

#[test(tokio::test)]
async fn test_group_cap_shared_by_members_and_filters() {
    let service = empty_service();
    let rug = service.allocate_offsets(&rug_sale("R1", at(2, 9, 0), 15)).await.unwrap();
    assert_eq!(rug.len(), 1);
    assert_eq!(rug[0].target, spring());
    // flat 500 regardless of quantity
    assert_eq!(rug[0].amount, dec!(500));

    let lamp = service.allocate_offsets(&lamp_sale("L1", at(3, 9, 0), 10)).await.unwrap();
    let group = lamp.iter().find(|r| r.target == spring()).unwrap();
    assert_eq!(group.quantity, 5);
    assert_eq!(group.amount, dec!(250));

    let status = service.get_group_status(&GroupId::new("spring")).await.unwrap();
    assert_eq!(status.consumed_units, 20);
    assert_eq!(status.consumed_amount, dec!(750));
    assert!(status.exhausted);
}

#[test(tokio::test)]
async fn test_grouped_offset_reports_through_group() {
    let service = empty_service();
    let err = service
        .get_offset_status(&OffsetId::new("spring-rugs"))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::UnknownTarget(_)));
}

#[test(tokio::test)]
async fn test_backdated_sale_recaps_later_records() {
    let service = empty_service();
    service.allocate_offsets(&lamp_sale("S-05", at(5, 10, 0), 6)).await.unwrap();
    service.allocate_offsets(&lamp_sale("S-06", at(6, 10, 0), 4)).await.unwrap();

    let backdated = service.allocate_offsets(&lamp_sale("S-01", at(1, 10, 0), 3)).await.unwrap();
    assert_eq!(backdated[0].quantity, 3);

    let book = service.ledger().snapshot(&acme_units()).await.unwrap();
    let quantities: Vec<_> = book.records().map(|r| (r.sale_id.0.clone(), r.quantity)).collect();
    assert_eq!(
        quantities,
        vec![("S-01".to_string(), 3), ("S-05".to_string(), 6), ("S-06".to_string(), 1)]
    );
    assert_eq!(book.totals().units, 10);
    assert_eq!(book.exhausted_at(), Some(at(6, 10, 0)));
}

#[test(tokio::test)]
async fn test_out_of_window_sale_is_ignored() {
    let service = empty_service();
    let mut sale = lamp_sale("S1", at(2, 10, 0), 1);
    sale.timestamp = chrono::TimeZone::with_ymd_and_hms(&chrono::Utc, 2024, 4, 2, 10, 0, 0).unwrap();
    assert!(service.allocate_offsets(&sale).await.unwrap().is_empty());
}

#[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn test_concurrent_allocations_near_cap() {
    let service = Arc::new(empty_service());
    let handles: Vec<_> = (0..30)
        .map(|n| {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .allocate_offsets(&lamp_sale(&format!("C{:02}", n), at(7, 12, n), 1))
                    .await
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let acme = service.get_offset_status(&OffsetId::new("acme-units")).await.unwrap();
    let budget = service.get_offset_status(&OffsetId::new("lamp-budget")).await.unwrap();
    let group = service.get_group_status(&GroupId::new("spring")).await.unwrap();
    assert_eq!(acme.consumed_units, 10);
    assert_eq!(budget.consumed_usd, dec!(5));
    assert_eq!(group.consumed_units, 20);
    assert_eq!(acme.exhausted_at, Some(at(7, 12, 9)));
}
