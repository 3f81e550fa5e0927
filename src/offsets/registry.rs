use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use super::definition::{
    AmountRule, CapTarget, Caps, GroupId, OffsetDefinition, OffsetGroup, OffsetId, ScopePredicate,
};
use crate::common::errors::{LedgerError, Result};
use crate::common::types::{Channel, Sale};

/// Which configured entry produced a match
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", content = "ref", rename_all = "snake_case")]
pub enum MatchSource {
    Definition(OffsetId),
    /// Index into the group's filter list
    Filter(usize),
}

/// One cap target a sale is eligible for, with the rule that prices it
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedOffset {
    pub target: CapTarget,
    pub source: MatchSource,
    pub rule: AmountRule,
    pub caps: Caps,
}

/// Static facts about a cap target
#[derive(Debug, Clone, PartialEq)]
pub struct TargetInfo {
    pub caps: Caps,
    pub starts: NaiveDate,
    pub channels: Vec<Channel>,
}

/// Validated set of offset definitions and groups
///
/// Candidate order is stable: ungrouped definitions by id, then groups by id.
#[derive(Debug, Clone, Default)]
pub struct OffsetRegistry {
    definitions: BTreeMap<OffsetId, OffsetDefinition>,
    groups: BTreeMap<GroupId, OffsetGroup>,
}

impl OffsetRegistry {
    /// Validate and index definitions and groups
    pub fn new(definitions: Vec<OffsetDefinition>, groups: Vec<OffsetGroup>) -> Result<Self> {
        let mut defs = BTreeMap::new();
        for def in definitions {
            def.validate()?;
            if defs.contains_key(&def.id) {
                return Err(LedgerError::InvalidDefinition(format!(
                    "duplicate offset id {}",
                    def.id.0
                )));
            }
            defs.insert(def.id.clone(), def);
        }

        let mut grps = BTreeMap::new();
        for group in groups {
            group.validate()?;
            for member in &group.members {
                let def = defs.get(member).ok_or_else(|| {
                    LedgerError::InvalidDefinition(format!(
                        "group {} lists unknown offset {}",
                        group.id.0, member.0
                    ))
                })?;
                if def.group_id.as_ref() != Some(&group.id) {
                    return Err(LedgerError::InvalidDefinition(format!(
                        "offset {} is listed in group {} but does not reference it",
                        member.0, group.id.0
                    )));
                }
            }
            if grps.contains_key(&group.id) {
                return Err(LedgerError::InvalidDefinition(format!(
                    "duplicate group id {}",
                    group.id.0
                )));
            }
            grps.insert(group.id.clone(), group);
        }

        for def in defs.values() {
            if let Some(gid) = &def.group_id {
                let listed = grps.get(gid).is_some_and(|g| g.members.contains(&def.id));
                if !listed {
                    return Err(LedgerError::InvalidDefinition(format!(
                        "offset {} references group {} which does not list it",
                        def.id.0, gid.0
                    )));
                }
            }
        }

        Self::check_overlaps(&defs)?;

        debug!(
            "Registered {} offsets in {} groups",
            defs.len(),
            grps.len()
        );
        Ok(Self {
            definitions: defs,
            groups: grps,
        })
    }

    /// Definitions with the same scope inside the same group must not overlap in time
    fn check_overlaps(defs: &BTreeMap<OffsetId, OffsetDefinition>) -> Result<()> {
        let mut by_scope: HashMap<(&GroupId, &ScopePredicate), Vec<&OffsetDefinition>> = HashMap::new();
        for def in defs.values() {
            if let Some(gid) = &def.group_id {
                by_scope.entry((gid, &def.scope)).or_default().push(def);
            }
        }
        for ((gid, _), scoped) in by_scope {
            for (i, a) in scoped.iter().enumerate() {
                if let Some(b) = scoped[i + 1..].iter().find(|b| a.effective.overlaps(&b.effective)) {
                    return Err(LedgerError::InvalidDefinition(format!(
                        "offsets {} and {} in group {} overlap for the same scope",
                        a.id.0, b.id.0, gid.0
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn definition(&self, id: &OffsetId) -> Option<&OffsetDefinition> {
        self.definitions.get(id)
    }

    pub fn group(&self, id: &GroupId) -> Option<&OffsetGroup> {
        self.groups.get(id)
    }

    /// Every cap target, in candidate order
    pub fn targets(&self) -> Vec<CapTarget> {
        self.definitions
            .values()
            .filter(|d| d.group_id.is_none())
            .map(|d| CapTarget::Offset(d.id.clone()))
            .chain(self.groups.keys().map(|g| CapTarget::Group(g.clone())))
            .collect()
    }

    pub fn target_info(&self, target: &CapTarget) -> Option<TargetInfo> {
        match target {
            CapTarget::Offset(id) => self
                .definitions
                .get(id)
                .filter(|d| d.group_id.is_none())
                .map(|d| TargetInfo {
                    caps: d.caps,
                    starts: d.effective.valid_from,
                    channels: d.channels.channels(),
                }),
            CapTarget::Group(id) => self.groups.get(id).map(|g| {
                let member_start = g
                    .members
                    .iter()
                    .filter_map(|m| self.definitions.get(m))
                    .map(|d| d.effective.valid_from)
                    .min();
                TargetInfo {
                    caps: g.caps,
                    starts: member_start.map_or(g.effective.valid_from, |m| m.min(g.effective.valid_from)),
                    channels: g.channels.channels(),
                }
            }),
        }
    }

    /// Ordered candidates a sale is eligible for
    ///
    /// All matching ungrouped offsets apply independently; each group
    /// contributes at most its first matching member or filter.
    pub fn resolve(&self, sale: &Sale) -> Vec<MatchedOffset> {
        let standalone = self
            .definitions
            .values()
            .filter(|d| d.group_id.is_none() && d.applies_to(sale))
            .map(|d| MatchedOffset {
                target: CapTarget::Offset(d.id.clone()),
                source: MatchSource::Definition(d.id.clone()),
                rule: d.rule,
                caps: d.caps,
            });

        let grouped = self
            .groups
            .values()
            .filter_map(|g| self.first_group_match(g, sale));

        standalone.chain(grouped).collect()
    }

    /// The candidate for one specific target, if the sale is eligible
    pub fn resolve_target(&self, target: &CapTarget, sale: &Sale) -> Option<MatchedOffset> {
        match target {
            CapTarget::Offset(id) => self
                .definitions
                .get(id)
                .filter(|d| d.group_id.is_none() && d.applies_to(sale))
                .map(|d| MatchedOffset {
                    target: target.clone(),
                    source: MatchSource::Definition(d.id.clone()),
                    rule: d.rule,
                    caps: d.caps,
                }),
            CapTarget::Group(id) => self
                .groups
                .get(id)
                .and_then(|g| self.first_group_match(g, sale)),
        }
    }

    fn first_group_match(&self, group: &OffsetGroup, sale: &Sale) -> Option<MatchedOffset> {
        if !group.is_open_for(sale) {
            return None;
        }
        let target = CapTarget::Group(group.id.clone());

        let member = group
            .members
            .iter()
            .filter_map(|id| self.definitions.get(id))
            .find(|d| d.applies_to(sale))
            .map(|d| MatchedOffset {
                target: target.clone(),
                source: MatchSource::Definition(d.id.clone()),
                rule: d.rule,
                caps: group.caps,
            });

        member.or_else(|| {
            group
                .filters
                .iter()
                .position(|f| f.scope.matches(&sale.scope))
                .map(|idx| MatchedOffset {
                    target: target.clone(),
                    source: MatchSource::Filter(idx),
                    rule: group.filters[idx].rule,
                    caps: group.caps,
                })
        })
    }
}
