use rust_decimal::{Decimal, RoundingStrategy};
use tracing::debug;

use super::proceeds::PricingContext;
use super::schedule::{PriceBand, ScheduleBook};
use crate::common::errors::{LedgerError, Result};
use crate::common::types::{Currency, MonetaryAmount};

/// Solve for the VAT-inclusive unit price whose markup equals `target_markup`
///
/// Within one price band, net proceeds are linear in price:
///
/// ```text
/// net(P) = P / (1 + VAT) × (1 − base% − misc%) − surcharge − shipping
/// ```
///
/// so each band yields a closed-form candidate. The walk starts in the band
/// the surcharge-free candidate lands in and moves to the adjacent band until
/// the candidate lies inside the band it was solved for. If the target falls
/// in a surcharge discontinuity, the band boundary (the lowest price reaching
/// the target) is returned. Prices are rounded up to cents unless that would
/// cross into the next band.
pub fn solve_price_for_markup(
    book: &ScheduleBook,
    cost: &MonetaryAmount,
    target_markup: Decimal,
    ctx: &PricingContext,
    settlement: &Currency,
) -> Result<Decimal> {
    let cost_net = cost.in_currency(settlement)?;
    if cost_net <= Decimal::ZERO {
        return Err(LedgerError::NoConvergence(format!(
            "cost must be positive, got {}",
            cost_net
        )));
    }

    let rates = ctx.resolve_rates(book)?;
    let kept_share = Decimal::ONE - (rates.base_pct + rates.misc_pct) / Decimal::ONE_HUNDRED;
    if kept_share <= Decimal::ZERO {
        return Err(LedgerError::NoConvergence(format!(
            "commission rates {}% + {}% leave no proceeds",
            rates.base_pct, rates.misc_pct
        )));
    }

    let required_net = cost_net * (Decimal::ONE + target_markup);
    let shipping_net = ctx.shipping_net();
    let vat_factor = Decimal::ONE + ctx.vat_pct / Decimal::ONE_HUNDRED;
    // P = (net + surcharge + shipping) × (1 + VAT) / kept share; multiply first to stay exact
    let candidate = |surcharge: Decimal| (required_net + surcharge + shipping_net) * vat_factor / kept_share;

    let bands = if rates.bands.is_empty() {
        vec![PriceBand {
            lower: Decimal::ZERO,
            upper: None,
            surcharge: Decimal::ZERO,
        }]
    } else {
        rates.bands.clone()
    };

    let unsurcharged = candidate(Decimal::ZERO);
    let mut idx = bands
        .iter()
        .position(|b| b.contains(unsurcharged))
        .unwrap_or(0);
    let mut came_from: Option<usize> = None;

    for _ in 0..=bands.len() {
        let band = bands[idx];
        let price = candidate(band.surcharge);
        debug!(band = idx, %price, "goal-seek candidate");

        if price <= Decimal::ZERO {
            return Err(LedgerError::NoConvergence(format!(
                "markup {} needs a non-positive price",
                target_markup
            )));
        }

        if band.contains(price) {
            return Ok(round_within(price, &band));
        }

        let next = if price < band.lower {
            idx.checked_sub(1)
        } else {
            Some(idx + 1).filter(|n| *n < bands.len())
        };
        let next = next.ok_or_else(|| {
            LedgerError::NoConvergence(format!("candidate {} outside every price band", price))
        })?;

        if came_from == Some(next) {
            // Target sits in the jump between two bands
            let boundary = band.lower.max(bands[next].lower);
            return Ok(boundary);
        }
        came_from = Some(idx);
        idx = next;
    }

    Err(LedgerError::NoConvergence(format!(
        "no band settled for markup {}",
        target_markup
    )))
}

fn round_within(price: Decimal, band: &PriceBand) -> Decimal {
    // Drop division noise before rounding up to cents
    let price = price.round_dp(10);
    let up = price.round_dp_with_strategy(2, RoundingStrategy::AwayFromZero);
    match band.upper {
        Some(upper) if up >= upper => price.round_dp_with_strategy(2, RoundingStrategy::ToZero),
        _ => up,
    }
}
