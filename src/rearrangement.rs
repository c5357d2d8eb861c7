//! Rearrangement policies used when an item finds no free space.
//!
//! A policy works on a scratch copy of the station. The placement engine commits
//! the scratch copy only when the policy returns a plan, so a failed attempt
//! leaves the real station untouched.

use tracing::debug;

use crate::model::{Item, Placement};
use crate::placement::{PlacementConfig, container_order, find_position};
use crate::station::StationState;

/// A displaced item's old and new placement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemMove {
    pub from: Placement,
    pub to: Placement,
}

/// Result of a successful rearrangement.
#[derive(Clone, Debug)]
pub struct RearrangementPlan {
    /// Displaced items, in the order they were re-placed.
    pub moves: Vec<ItemMove>,
    /// Placement of the item that needed room.
    pub placement: Placement,
}

/// Strategy for making room for an item that does not fit anywhere.
pub trait RearrangementPolicy {
    /// Tries to place `item_id` by moving other items.
    ///
    /// `container_order` is the item's container preference. On success the
    /// policy leaves `scratch` in the rearranged state and returns the plan; on
    /// failure the caller discards `scratch`.
    fn rearrange(
        &self,
        scratch: &mut StationState,
        item_id: &str,
        container_order: &[String],
        config: &PlacementConfig,
    ) -> Option<RearrangementPlan>;
}

/// Default policy: evict lower-priority occupants of one container.
///
/// For each container in preference order, the occupants with strictly lower
/// priority than the target are sorted by ascending priority (placement order
/// breaks ties). The policy tries every set of 1 occupant, then every set of 2,
/// up to `max_displaced_items`, in lexicographic order over that sorting, so
/// cheaper evictions are tried first. The evicted items are then re-placed,
/// highest priority first, through their own container preference. The first
/// trial in which everything finds a place wins.
///
/// At most [`EvictLowerPriority::MAX_TRIALS_PER_CONTAINER`] sets are tried per
/// container.
#[derive(Clone, Copy, Debug, Default)]
pub struct EvictLowerPriority;

impl EvictLowerPriority {
    pub const MAX_TRIALS_PER_CONTAINER: usize = 4096;
}

impl RearrangementPolicy for EvictLowerPriority {
    fn rearrange(
        &self,
        scratch: &mut StationState,
        item_id: &str,
        container_order: &[String],
        config: &PlacementConfig,
    ) -> Option<RearrangementPlan> {
        let target = scratch.item(item_id).ok()?.clone();

        for container_id in container_order {
            let Ok(container) = scratch.container(container_id) else {
                continue;
            };
            if !container.could_ever_hold(target.dims, config.allow_item_rotation) {
                continue;
            }

            let mut evictable: Vec<(u8, String)> = container
                .placements()
                .iter()
                .filter_map(|p| scratch.item(&p.item_id).ok())
                .filter(|occupant| occupant.priority < target.priority)
                .map(|occupant| (occupant.priority, occupant.id.clone()))
                .collect();
            evictable.sort_by_key(|(priority, _)| *priority);

            let limit = config.max_displaced_items.min(evictable.len());
            let mut trials = 0;
            for count in 1..=limit {
                let mut indices: Vec<usize> = (0..count).collect();
                loop {
                    if trials == Self::MAX_TRIALS_PER_CONTAINER {
                        debug!(
                            item = item_id,
                            container = %container_id,
                            "rearrangement trial limit reached"
                        );
                        break;
                    }
                    trials += 1;

                    let evicted: Vec<(u8, String)> =
                        indices.iter().map(|&i| evictable[i].clone()).collect();
                    let mut trial = scratch.clone();
                    if let Some(plan) =
                        try_eviction(&mut trial, &target, container_id, &evicted, config)
                    {
                        debug!(
                            item = item_id,
                            container = %container_id,
                            displaced = count,
                            trials,
                            "rearrangement found"
                        );
                        *scratch = trial;
                        return Some(plan);
                    }
                    if !next_combination(&mut indices, evictable.len()) {
                        break;
                    }
                }
            }
        }
        None
    }
}

/// Advances `indices` to the next `k`-subset of `0..n` in lexicographic order.
/// Returns false after the last subset.
fn next_combination(indices: &mut [usize], n: usize) -> bool {
    let k = indices.len();
    let Some(pos) = (0..k).rev().find(|&i| indices[i] < n - k + i) else {
        return false;
    };
    indices[pos] += 1;
    for i in pos + 1..k {
        indices[i] = indices[i - 1] + 1;
    }
    true
}

fn try_eviction(
    trial: &mut StationState,
    target: &Item,
    container_id: &str,
    evicted: &[(u8, String)],
    config: &PlacementConfig,
) -> Option<RearrangementPlan> {
    let mut released = Vec::with_capacity(evicted.len());
    for (_, occupant_id) in evicted {
        released.push(trial.release(occupant_id).ok()?);
    }

    let (start, rotation, _) = trial
        .container(container_id)
        .ok()?
        .first_fit_oriented(target.dims, config.allow_item_rotation)?;
    let placement = trial.allocate(&target.id, container_id, start, rotation).ok()?;

    // `evicted` is sorted by ascending priority.
    let mut moves = Vec::with_capacity(released.len());
    for from in released.into_iter().rev() {
        let displaced = trial.item(&from.item_id).ok()?;
        let dims = displaced.dims;
        let order = container_order(trial, displaced);
        let (to_container, to_start, to_rotation) =
            find_position(trial, dims, &order, config.allow_item_rotation)?;
        let to = trial
            .allocate(&from.item_id, &to_container, to_start, to_rotation)
            .ok()?;
        moves.push(ItemMove { from, to });
    }

    Some(RearrangementPlan { moves, placement })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Container;
    use crate::types::{Coords, Rotation};
    use chrono::NaiveDate;

    fn station() -> StationState {
        let mut station = StationState::new(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        station
            .insert_container(Container::new("front", "Lab", Coords::new(20, 10, 10)).unwrap())
            .unwrap();
        station
            .insert_container(Container::new("back", "Storage", Coords::new(10, 10, 10)).unwrap())
            .unwrap();
        for (id, priority, zone) in [
            ("p10", 10, "Lab"),
            ("p20", 20, "Lab"),
            ("p30", 30, "Storage"),
        ] {
            station
                .insert_item(
                    Item::new(id, id, Coords::new(10, 10, 10), 1.0, priority)
                        .unwrap()
                        .with_preferred_zone(zone),
                )
                .unwrap();
        }
        station
    }

    fn order(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn evicts_lowest_priority_first() {
        let mut station = station();
        station.allocate("p20", "front", Coords::zero(), Rotation::Identity).unwrap();
        station
            .allocate("p10", "front", Coords::new(10, 0, 0), Rotation::Identity)
            .unwrap();
        station
            .insert_item(Item::new("vip", "vip", Coords::new(10, 10, 10), 1.0, 90).unwrap())
            .unwrap();

        let mut scratch = station.clone();
        let plan = EvictLowerPriority
            .rearrange(
                &mut scratch,
                "vip",
                &order(&["front", "back"]),
                &PlacementConfig::default(),
            )
            .expect("rearrangement expected");

        assert_eq!(plan.moves.len(), 1);
        assert_eq!(plan.moves[0].from.item_id, "p10");
        assert_eq!(plan.moves[0].to.container_id, "back");
        assert_eq!(plan.placement.start, Coords::new(10, 0, 0));
        assert!(scratch.check_invariants().is_ok());
        // the real station is untouched
        assert_eq!(station.item("p10").unwrap().container_id(), Some("front"));
    }

    #[test]
    fn evicts_several_items_when_one_is_not_enough() {
        let mut station = station();
        station
            .insert_container(Container::new("spare", "Spare", Coords::new(20, 10, 10)).unwrap())
            .unwrap();
        station.allocate("p20", "front", Coords::zero(), Rotation::Identity).unwrap();
        station
            .allocate("p10", "front", Coords::new(10, 0, 0), Rotation::Identity)
            .unwrap();
        station
            .insert_item(Item::new("wide", "wide", Coords::new(20, 10, 10), 1.0, 90).unwrap())
            .unwrap();

        let mut scratch = station.clone();
        let plan = EvictLowerPriority
            .rearrange(
                &mut scratch,
                "wide",
                &order(&["front", "back", "spare"]),
                &PlacementConfig::default(),
            )
            .expect("rearrangement expected");

        let moved: Vec<&str> = plan.moves.iter().map(|m| m.from.item_id.as_str()).collect();
        assert_eq!(moved, vec!["p20", "p10"]);
        assert_eq!(plan.placement.container_id, "front");
        assert!(scratch.check_invariants().is_ok());
    }

    #[test]
    fn evicts_the_occupant_that_actually_frees_room() {
        let mut station = StationState::new(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        station
            .insert_container(Container::new("c1", "Lab", Coords::new(20, 10, 10)).unwrap())
            .unwrap();
        station
            .insert_container(Container::new("c2", "Lab", Coords::new(10, 5, 10)).unwrap())
            .unwrap();
        station
            .insert_item(Item::new("p10", "p10", Coords::new(10, 10, 10), 1.0, 10).unwrap())
            .unwrap();
        station
            .insert_item(Item::new("p20", "p20", Coords::new(10, 5, 10), 1.0, 20).unwrap())
            .unwrap();
        station
            .insert_item(Item::new("T", "T", Coords::new(10, 10, 10), 1.0, 90).unwrap())
            .unwrap();
        station.allocate("p10", "c1", Coords::zero(), Rotation::Identity).unwrap();
        station
            .allocate("p20", "c1", Coords::new(10, 0, 0), Rotation::Identity)
            .unwrap();

        // evicting p10 alone leaves it nowhere to go; p20 fits in c2
        let mut scratch = station.clone();
        let plan = EvictLowerPriority
            .rearrange(
                &mut scratch,
                "T",
                &order(&["c1", "c2"]),
                &PlacementConfig::default(),
            )
            .expect("rearrangement expected");

        assert_eq!(plan.moves.len(), 1);
        assert_eq!(plan.moves[0].from.item_id, "p20");
        assert_eq!(plan.moves[0].to.container_id, "c2");
        assert_eq!(plan.placement.container_id, "c1");
        assert_eq!(plan.placement.start, Coords::new(10, 0, 0));
        assert_eq!(scratch.placement_of("p10").unwrap().start, Coords::zero());
        assert!(scratch.check_invariants().is_ok());
    }

    #[test]
    fn combinations_are_lexicographic() {
        let mut indices = vec![0, 1];
        let mut seen = vec![indices.clone()];
        while next_combination(&mut indices, 4) {
            seen.push(indices.clone());
        }
        assert_eq!(
            seen,
            vec![
                vec![0, 1],
                vec![0, 2],
                vec![0, 3],
                vec![1, 2],
                vec![1, 3],
                vec![2, 3]
            ]
        );

        let mut single = vec![0];
        assert!(!next_combination(&mut single, 1));
    }

    #[test]
    fn respects_displacement_limit() {
        let mut station = station();
        station.allocate("p20", "front", Coords::zero(), Rotation::Identity).unwrap();
        station
            .allocate("p10", "front", Coords::new(10, 0, 0), Rotation::Identity)
            .unwrap();
        station
            .insert_item(Item::new("wide", "wide", Coords::new(20, 10, 10), 1.0, 90).unwrap())
            .unwrap();

        let config = PlacementConfig::builder().max_displaced_items(1).build();
        let mut scratch = station.clone();
        assert!(
            EvictLowerPriority
                .rearrange(&mut scratch, "wide", &order(&["front", "back"]), &config)
                .is_none()
        );
    }
}
