//! Pricing: tiered commission, net proceeds, markup and price goal-seek
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  ScheduleBook (validated at load)                            │
//! │    scope + date → CommissionSchedule version                 │
//! │    subcategory group + price list → base %                   │
//! │      ↳ schedule default → hard floor → SchemaGap             │
//! └──────────────────────────────────────────────────────────────┘
//!                 │ ResolvedRates
//!                 ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │  CommissionCalculator   base + tier surcharge + misc         │
//! │  ProceedsCalculator     net proceeds, markup                 │
//! │  solve_price_for_markup band walk over the surcharge steps   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything here is pure: no I/O, no shared state, safe to call from
//! any number of tasks.

mod commission;
mod goal_seek;
mod proceeds;
mod schedule;

pub use commission::{CommissionBreakdown, CommissionCalculator};
pub use goal_seek::solve_price_for_markup;
pub use proceeds::{PricingContext, ProceedsCalculator, SaleEvaluation};
pub use schedule::{
    CommissionSchedule, PriceBand, RateOrigin, ResolvedRates, ScheduleBook, TierBracket, TIER_COUNT,
};
