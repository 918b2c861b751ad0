//! Partition evaluation (section 4.6): a `Partition` is a site predicate plus
//! a per-block-replica membership predicate. Evaluating every replica once
//! materializes `site_partition.replicas[dr]`.

use std::collections::{HashMap, HashSet};

use dynamo_model::{glob_match, BlockHandle, BlockReplica, DatasetReplica, Inventory, PartitionHandle, SiteHandle};

/// A single condition in the attribute language the spec's rule conditions
/// are built from (section 4.6, `destination_sites`/`source_sites`/
/// `target_replicas`/site requirements all reduce to these).
#[derive(Clone, Debug)]
pub enum MembershipPredicate {
    Custodial(bool),
    Group(Option<String>),
    DatasetNameMatches(String),
}

impl MembershipPredicate {
    fn matches(&self, inventory: &Inventory, br: &BlockReplica, dataset_name: &str) -> bool {
        match self {
            MembershipPredicate::Custodial(expected) => br.is_custodial == *expected,
            MembershipPredicate::Group(expected) => {
                let actual = br.group.and_then(|g| inventory.group(g)).and_then(|g| g.name.clone());
                actual == *expected
            }
            MembershipPredicate::DatasetNameMatches(pattern) => glob_match(pattern, dataset_name),
        }
    }
}

/// A leaf partition's evaluable definition: which sites it applies at (an
/// OR-list of glob patterns; empty means every site) and the AND-combined
/// predicates a block replica must satisfy to be a member.
#[derive(Clone, Debug, Default)]
pub struct PartitionDef {
    pub handle: Option<PartitionHandle>,
    pub site_patterns: Vec<String>,
    pub predicates: Vec<MembershipPredicate>,
}

impl PartitionDef {
    pub fn new(predicates: Vec<MembershipPredicate>) -> Self {
        PartitionDef {
            handle: None,
            site_patterns: Vec::new(),
            predicates,
        }
    }

    pub fn at_sites(mut self, patterns: Vec<String>) -> Self {
        self.site_patterns = patterns;
        self
    }

    pub fn applies_at_site(&self, inventory: &Inventory, site: SiteHandle) -> bool {
        if self.site_patterns.is_empty() {
            return true;
        }
        let Some(site) = inventory.site(site) else { return false };
        self.site_patterns.iter().any(|p| glob_match(p, &site.name))
    }

    fn block_applies(&self, inventory: &Inventory, br: &BlockReplica, dataset_name: &str) -> bool {
        self.predicates.iter().all(|p| p.matches(inventory, br, dataset_name))
    }
}

/// `applies(dr)`: 0 = not in partition, 1 = every block replica is a member,
/// 2 = a strict subset is (section 4.6).
pub fn applies(inventory: &Inventory, def: &PartitionDef, dr: &DatasetReplica) -> u8 {
    if !def.applies_at_site(inventory, dr.site) {
        return 0;
    }
    let Some(dataset_name) = inventory.dataset(dr.dataset).map(|d| d.name.clone()) else {
        return 0;
    };
    let total = dr.num_block_replicas();
    if total == 0 {
        return 0;
    }
    let matching = member_blocks(inventory, def, dr, &dataset_name).len();
    if matching == 0 {
        0
    } else if matching == total {
        1
    } else {
        2
    }
}

fn member_blocks(inventory: &Inventory, def: &PartitionDef, dr: &DatasetReplica, dataset_name: &str) -> HashSet<BlockHandle> {
    dr.block_replicas()
        .filter(|&block| {
            inventory
                .block_replica(block, dr.site)
                .map(|br| def.block_applies(inventory, br, dataset_name))
                .unwrap_or(false)
        })
        .collect()
}

/// Materializes `site_partition.replicas[dr]` for every dataset replica at
/// `site`: `None` for full membership, `Some(blocks)` for partial, and no
/// entry at all for replicas outside the partition. Leaf partitions use
/// `def` directly; non-leaf partitions union their subpartitions' membership
/// maps (section 9 (d): non-leaf partitions are strict unions).
pub fn materialize_leaf(
    inventory: &Inventory,
    def: &PartitionDef,
    site: SiteHandle,
) -> HashMap<(dynamo_model::DatasetHandle, SiteHandle), Option<HashSet<BlockHandle>>> {
    let mut out = HashMap::new();
    if !def.applies_at_site(inventory, site) {
        return out;
    }
    for dr in inventory.dataset_replicas().filter(|dr| dr.site == site) {
        let verdict = applies(inventory, def, dr);
        if verdict == 0 {
            continue;
        }
        let key = (dr.dataset, dr.site);
        if verdict == 1 {
            out.insert(key, None);
        } else {
            let dataset_name = inventory.dataset(dr.dataset).map(|d| d.name.clone()).unwrap_or_default();
            out.insert(key, Some(member_blocks(inventory, def, dr, &dataset_name)));
        }
    }
    out
}

/// Unions a set of already-materialized subpartition membership maps into
/// one non-leaf membership map. `None` (full membership) absorbs any
/// `Some(...)` for the same key.
pub fn union_memberships(
    maps: &[HashMap<(dynamo_model::DatasetHandle, SiteHandle), Option<HashSet<BlockHandle>>>],
) -> HashMap<(dynamo_model::DatasetHandle, SiteHandle), Option<HashSet<BlockHandle>>> {
    let mut out: HashMap<(dynamo_model::DatasetHandle, SiteHandle), Option<HashSet<BlockHandle>>> = HashMap::new();
    for map in maps {
        for (key, membership) in map {
            match (out.get(key), membership) {
                (Some(None), _) => {}
                (_, None) => {
                    out.insert(*key, None);
                }
                (Some(Some(existing)), Some(add)) => {
                    let mut union = existing.clone();
                    union.extend(add.iter().copied());
                    out.insert(*key, Some(union));
                }
                (None, Some(add)) => {
                    out.insert(*key, Some(add.clone()));
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use dynamo_model::{BlockName, Inventory, OwnershipLevel};

    fn sample_with_two_block_replicas() -> (Inventory, dynamo_model::DatasetHandle, SiteHandle, dynamo_model::GroupHandle) {
        let mut inv = Inventory::new();
        let dataset = inv.get_or_create_dataset("/A/B/C");
        let b1 = inv.get_or_create_block(dataset, BlockName::new("b1"));
        let b2 = inv.get_or_create_block(dataset, BlockName::new("b2"));
        let site = inv.get_or_create_site("T1_US_FNAL");
        let group = inv.get_or_create_group(Some("AnalysisOps".into()), OwnershipLevel::Block);

        let mut br1 = BlockReplica::new(b1, site, 10);
        br1.is_custodial = true;
        br1.group = Some(group);
        inv.link_block_replica(br1);

        let mut br2 = BlockReplica::new(b2, site, 10);
        br2.is_custodial = false;
        br2.group = Some(group);
        inv.link_block_replica(br2);

        (inv, dataset, site, group)
    }

    #[test]
    fn full_membership_when_all_blocks_match() {
        let (inv, dataset, site, group) = sample_with_two_block_replicas();
        let def = PartitionDef::new(vec![MembershipPredicate::Group(Some(inv.group(group).unwrap().name.clone().unwrap()))]);
        let dr = inv.dataset_replica(dataset, site).unwrap();
        assert_eq!(applies(&inv, &def, dr), 1);
    }

    #[test]
    fn partial_membership_when_some_blocks_match() {
        let (inv, dataset, site, _group) = sample_with_two_block_replicas();
        let def = PartitionDef::new(vec![MembershipPredicate::Custodial(true)]);
        let dr = inv.dataset_replica(dataset, site).unwrap();
        assert_eq!(applies(&inv, &def, dr), 2);
    }

    #[test]
    fn no_membership_when_site_pattern_excludes_site() {
        let (inv, dataset, site, _group) = sample_with_two_block_replicas();
        let def = PartitionDef::new(vec![MembershipPredicate::Custodial(true)]).at_sites(vec!["T2_*".to_string()]);
        let dr = inv.dataset_replica(dataset, site).unwrap();
        assert_eq!(applies(&inv, &def, dr), 0);
    }
}
