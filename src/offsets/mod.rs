//! Offset (incentive) definitions, groups and the matching registry

mod definition;
mod registry;

pub use definition::{
    AmountRule, CapTarget, Caps, Effective, GroupId, OffsetDefinition, OffsetGroup, OffsetGroupFilter,
    OffsetId, ScopePredicate,
};
pub use registry::{MatchSource, MatchedOffset, OffsetRegistry, TargetInfo};
