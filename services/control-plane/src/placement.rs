//! Placement engine.
//!
//! Picks the node a pending zone should land on. A node is admitted only if
//! it is online and the zone fits within its remaining CPU, RAM and disk;
//! among admitted nodes the lowest [`score`] wins, ties going to the lowest
//! node id.

use std::cmp::Ordering;

use tracing::debug;

use crate::models::{NodeHealth, NodeWithZones, Resources};

/// True if `requested` fits on top of `used` within `total` for every
/// resource.
pub fn fits(used: Resources, requested: Resources, total: Resources) -> bool {
    let fits_one =
        |used: u32, requested: u32, total: u32| u64::from(used) + u64::from(requested) <= u64::from(total);

    fits_one(used.cpu_count, requested.cpu_count, total.cpu_count)
        && fits_one(used.ram_gb, requested.ram_gb, total.ram_gb)
        && fits_one(used.disk_gb, requested.disk_gb, total.disk_gb)
}

/// Placement score; lower is better.
///
/// Per resource: the absolute amount already used plus the fraction of the
/// node's total the request would take.
pub fn score(used: Resources, requested: Resources, total: Resources) -> f64 {
    let term = |used: u32, requested: u32, total: u32| {
        let share = if total == 0 {
            0.0
        } else {
            f64::from(requested) / f64::from(total)
        };
        f64::from(used) + share
    };

    term(used.cpu_count, requested.cpu_count, total.cpu_count)
        + term(used.ram_gb, requested.ram_gb, total.ram_gb)
        + term(used.disk_gb, requested.disk_gb, total.disk_gb)
}

/// Best node for a zone requesting `requested`, or `None` if no node is
/// eligible.
pub fn find_optimal_node<'a>(
    requested: &Resources,
    fleet: &'a [NodeWithZones],
) -> Option<&'a NodeWithZones> {
    fleet
        .iter()
        .filter(|candidate| candidate.node.health == Some(NodeHealth::Online))
        .filter_map(|candidate| {
            let used = candidate.used();
            let total = candidate.node.capacity;
            if !fits(used, *requested, total) {
                return None;
            }
            let score = score(used, *requested, total);
            debug!(node_id = %candidate.node.id, score, "Placement candidate");
            Some((score, candidate))
        })
        .min_by(|(a_score, a), (b_score, b)| {
            match a_score.total_cmp(b_score) {
                Ordering::Equal => a.node.id.cmp(&b.node.id),
                other => other,
            }
        })
        .map(|(_, candidate)| candidate)
}
