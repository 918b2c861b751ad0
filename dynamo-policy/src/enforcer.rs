//! Enforcer, the targeted replication engine (section 4.6): evaluates a rule
//! stack that pins a fixed number of copies of matching datasets at matching
//! destination sites, drawn from matching source sites.

use rand::seq::SliceRandom;
use rand::Rng;

use dynamo_model::{glob_match, DatasetHandle, Inventory, SiteHandle};

/// `target_replicas`, `source_sites`, and `destination_sites` are OR-lists:
/// a dataset/site matches a rule if it matches any pattern in the list (an
/// empty list matches everything).
pub struct EnforcerRule {
    pub target_replicas: Vec<String>,
    pub source_sites: Vec<String>,
    pub destination_sites: Vec<String>,
    pub num_copies: u32,
    pub destination_group: Option<String>,
    #[allow(dead_code)]
    pub protect: bool,
}

fn matches_any(patterns: &[String], name: &str) -> bool {
    patterns.is_empty() || patterns.iter().any(|p| glob_match(p, name))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyRequest {
    pub dataset: DatasetHandle,
    pub origin: SiteHandle,
    pub destination: SiteHandle,
}

fn matching_sites(inventory: &Inventory, patterns: &[String]) -> Vec<SiteHandle> {
    inventory
        .sites()
        .filter(|s| matches_any(patterns, &s.name))
        .map(|s| s.handle)
        .collect()
}

fn matching_datasets(inventory: &Inventory, patterns: &[String]) -> Vec<DatasetHandle> {
    inventory
        .datasets()
        .filter(|d| matches_any(patterns, &d.name))
        .map(|d| d.handle)
        .collect()
}

fn owned_by(inventory: &Inventory, group: &Option<String>, owner: Option<dynamo_model::GroupHandle>) -> bool {
    let actual = owner.and_then(|g| inventory.group(g)).and_then(|g| g.name.clone());
    actual == *group
}

/// Runs every rule and returns the union of emitted copy requests, shuffled
/// globally to avoid site bias (section 4.6, "Emit the (dataset, site) list
/// randomized globally").
pub fn run_enforcer(inventory: &Inventory, rules: &[EnforcerRule], rng: &mut impl Rng) -> Vec<CopyRequest> {
    let mut requests = Vec::new();

    for rule in rules {
        let destinations = matching_sites(inventory, &rule.destination_sites);
        for dataset in matching_datasets(inventory, &rule.target_replicas) {
            let sources: Vec<SiteHandle> = matching_sites(inventory, &rule.source_sites)
                .into_iter()
                .filter(|&s| inventory.dataset_replica(dataset, s).map(|dr| dr.is_complete).unwrap_or(false))
                .collect();

            for &source_site in &sources {
                let mut num_complete = 0u32;
                let mut num_incomplete = 0u32;
                let mut can_be_flipped = Vec::new();
                let mut occupied = Vec::new();

                for &dest in &destinations {
                    let Some(dr) = inventory.dataset_replica(dataset, dest) else { continue };
                    occupied.push(dest);
                    let owned = owned_by(inventory, &rule.destination_group, dr.group);
                    if owned && dr.is_complete {
                        num_complete += 1;
                    } else if owned {
                        num_incomplete += 1;
                    } else if dr.is_complete {
                        can_be_flipped.push(dest);
                    }
                }

                if num_complete >= rule.num_copies {
                    continue;
                }
                if num_complete + num_incomplete >= rule.num_copies {
                    continue; // waiting on an in-flight transfer
                }

                let mut need = rule.num_copies - num_complete - num_incomplete;
                let mut candidates: Vec<SiteHandle> = destinations.iter().copied().filter(|d| !occupied.contains(d)).collect();
                candidates.shuffle(rng);

                for &site in &can_be_flipped {
                    if need == 0 {
                        break;
                    }
                    requests.push(CopyRequest { dataset, origin: source_site, destination: site });
                    need -= 1;
                }
                for site in candidates {
                    if need == 0 {
                        break;
                    }
                    requests.push(CopyRequest { dataset, origin: source_site, destination: site });
                    need -= 1;
                }
            }
        }
    }

    requests.shuffle(rng);
    requests
}

#[cfg(test)]
mod tests {
    use super::*;
    use dynamo_model::{BlockName, BlockReplica, OwnershipLevel};
    use rand::SeedableRng;

    fn setup() -> (Inventory, dynamo_model::GroupHandle) {
        let mut inv = Inventory::new();
        let group = inv.get_or_create_group(Some("G".into()), OwnershipLevel::Block);
        (inv, group)
    }

    #[test]
    fn target_met_emits_nothing() {
        let (mut inv, group) = setup();
        let t1a = inv.get_or_create_site("T1_a");
        let t2b = inv.get_or_create_site("T2_b");
        let dataset = inv.get_or_create_dataset("/X/Y/Z");
        let block = inv.get_or_create_block(dataset, BlockName::new("b1"));
        inv.block_mut(block).unwrap().size = 10;
        inv.recompute_dataset_totals(dataset);

        let mut br_a = BlockReplica::new(block, t1a, 10);
        br_a.is_complete = true;
        br_a.group = Some(group);
        inv.link_block_replica(br_a);
        let mut br_b = BlockReplica::new(block, t2b, 10);
        br_b.is_complete = true;
        br_b.group = Some(group);
        inv.link_block_replica(br_b);

        let rule = EnforcerRule {
            target_replicas: vec!["/X/*/*".to_string()],
            source_sites: vec!["T1_*".to_string()],
            destination_sites: vec!["T2_*".to_string()],
            num_copies: 2,
            destination_group: Some("G".to_string()),
            protect: false,
        };
        let mut rng = rand::rngs::SmallRng::seed_from_u64(1);
        let requests = run_enforcer(&inv, &[rule], &mut rng);
        assert!(requests.is_empty());
    }

    #[test]
    fn missing_destination_emits_request_to_remaining_site() {
        let (mut inv, group) = setup();
        let t1a = inv.get_or_create_site("T1_a");
        let t2b = inv.get_or_create_site("T2_b");
        let t2c = inv.get_or_create_site("T2_c");
        let dataset = inv.get_or_create_dataset("/X/Y/Z");
        let block = inv.get_or_create_block(dataset, BlockName::new("b1"));
        inv.block_mut(block).unwrap().size = 10;
        inv.recompute_dataset_totals(dataset);

        let mut br_a = BlockReplica::new(block, t1a, 10);
        br_a.is_complete = true;
        br_a.group = Some(group);
        inv.link_block_replica(br_a);
        let _ = t2b;

        let rule = EnforcerRule {
            target_replicas: vec!["/X/*/*".to_string()],
            source_sites: vec!["T1_*".to_string()],
            destination_sites: vec!["T2_*".to_string()],
            num_copies: 1,
            destination_group: Some("G".to_string()),
            protect: false,
        };
        let mut rng = rand::rngs::SmallRng::seed_from_u64(1);
        let requests = run_enforcer(&inv, &[rule], &mut rng);
        assert_eq!(requests.len(), 1);
        assert!(requests[0].destination == t2b || requests[0].destination == t2c);
    }
}
