//! Retrieval planning.
//!
//! Containers are reached from the open face at depth 0. Items nearer the face
//! whose width-height footprint overlaps the target's must be taken out first
//! and put back afterwards.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use utoipa::{IntoParams, ToSchema};

use crate::error::{Result, StowageError};
use crate::geometry::blocks_access;
use crate::model::Placement;
use crate::station::StationState;
use crate::types::Coords;

/// Kind of a retrieval step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum RetrievalAction {
    Remove,
    Retrieve,
    PlaceBack,
    Move,
}

#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalStep {
    pub step: usize,
    pub action: RetrievalAction,
    pub item_id: String,
    pub item_name: String,
}

/// Ordered steps for taking one item out of its container.
#[derive(Clone, Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalPlan {
    pub item_id: String,
    pub container_id: String,
    pub blocker_count: usize,
    pub steps: Vec<RetrievalStep>,
}

/// Computes the retrieval steps for a placed item.
///
/// Blockers are removed nearest-to-the-face first and put back in reverse
/// order. Fails with `NotPlaced` if the item has no active placement.
pub fn plan_retrieval(station: &StationState, item_id: &str) -> Result<RetrievalPlan> {
    let target = station.placement_of(item_id)?;
    let container = station.container(&target.container_id)?;

    let mut blockers: Vec<&Placement> = container
        .placements()
        .iter()
        .filter(|other| other.item_id != target.item_id && blocks_access(other, target))
        .collect();
    blockers.sort_by_key(|p| p.start.depth);

    let name_of = |id: &str| {
        station
            .item(id)
            .map(|item| item.name.clone())
            .unwrap_or_default()
    };

    let mut steps = Vec::with_capacity(blockers.len() * 2 + 1);
    let mut push = |action: RetrievalAction, id: &str| {
        steps.push(RetrievalStep {
            step: steps.len() + 1,
            action,
            item_id: id.to_string(),
            item_name: name_of(id),
        });
    };
    for blocker in &blockers {
        push(RetrievalAction::Remove, &blocker.item_id);
    }
    push(RetrievalAction::Retrieve, item_id);
    for blocker in blockers.iter().rev() {
        push(RetrievalAction::PlaceBack, &blocker.item_id);
    }

    debug!(
        item = item_id,
        container = %target.container_id,
        blockers = blockers.len(),
        "retrieval planned"
    );
    Ok(RetrievalPlan {
        item_id: item_id.to_string(),
        container_id: target.container_id.clone(),
        blocker_count: blockers.len(),
        steps,
    })
}

/// Outcome of taking an item out of the station.
#[derive(Clone, Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalReport {
    pub plan: RetrievalPlan,
    pub released: Placement,
    pub remaining_uses: u32,
    pub is_waste: bool,
}

/// Plans the retrieval of an item, removes it from its container and records
/// one use.
///
/// Blockers end up where they were. An item that runs out of uses is flagged
/// as waste.
pub fn retrieve_item(station: &mut StationState, item_id: &str) -> Result<RetrievalReport> {
    let plan = plan_retrieval(station, item_id)?;
    let released = station.release(item_id)?;
    let item = station.item_mut(item_id)?;
    item.consume_use();
    let report = RetrievalReport {
        plan,
        released,
        remaining_uses: item.remaining_uses(),
        is_waste: item.is_waste(),
    };
    info!(
        item = item_id,
        steps = report.plan.steps.len(),
        remaining_uses = report.remaining_uses,
        "item retrieved"
    );
    Ok(report)
}

/// Search criteria for [`locate_item`]. The id wins when both are given.
#[derive(Clone, Debug, Default, Deserialize, ToSchema, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct ItemQuery {
    pub item_id: Option<String>,
    pub name: Option<String>,
}

/// Where an item sits and how to get it out.
#[derive(Clone, Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ItemLocation {
    pub item_id: String,
    pub name: String,
    pub container_id: String,
    pub zone: String,
    pub start: Coords,
    pub end: Coords,
    pub retrieval: RetrievalPlan,
}

/// Finds a placed item by id, or by a case-insensitive substring of its name.
///
/// Name searches return the first placed match in insertion order.
pub fn locate_item(station: &StationState, query: &ItemQuery) -> Result<ItemLocation> {
    let item = match (&query.item_id, &query.name) {
        (Some(id), _) => station.item(id)?,
        (None, Some(name)) => {
            let needle = name.to_lowercase();
            station
                .items()
                .iter()
                .filter(|item| item.is_placed())
                .find(|item| item.name.to_lowercase().contains(&needle))
                .ok_or_else(|| StowageError::ItemNotFound(name.clone()))?
        }
        (None, None) => {
            return Err(StowageError::InvalidArgument(
                "either itemId or name is required".into(),
            ));
        }
    };

    let placement = station.placement_of(&item.id)?;
    let container = station.container(&placement.container_id)?;
    Ok(ItemLocation {
        item_id: item.id.clone(),
        name: item.name.clone(),
        container_id: container.id.clone(),
        zone: container.zone.clone(),
        start: placement.start,
        end: placement.end,
        retrieval: plan_retrieval(station, &item.id)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Container, Item};
    use crate::types::Rotation;
    use chrono::NaiveDate;

    fn station(items: &[(&str, &str)]) -> StationState {
        let mut station = StationState::new(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        station
            .insert_container(Container::new("c1", "Lab", Coords::new(100, 100, 100)).unwrap())
            .unwrap();
        for (id, name) in items {
            station
                .insert_item(
                    Item::new(*id, *name, Coords::new(10, 10, 10), 1.0, 50)
                        .unwrap()
                        .with_usage_limit(2),
                )
                .unwrap();
        }
        station
    }

    fn put(station: &mut StationState, id: &str, start: (u32, u32, u32)) {
        station
            .allocate(id, "c1", start.into(), Rotation::Identity)
            .unwrap();
    }

    fn actions(plan: &RetrievalPlan) -> Vec<(usize, RetrievalAction, &str)> {
        plan.steps
            .iter()
            .map(|s| (s.step, s.action, s.item_id.as_str()))
            .collect()
    }

    #[test]
    fn item_behind_another_needs_three_steps() {
        let mut station = station(&[("A", "Alpha"), ("B", "Bravo")]);
        put(&mut station, "A", (0, 0, 0));
        put(&mut station, "B", (0, 10, 0));

        let plan = plan_retrieval(&station, "B").unwrap();
        assert_eq!(plan.blocker_count, 1);
        assert_eq!(
            actions(&plan),
            vec![
                (1, RetrievalAction::Remove, "A"),
                (2, RetrievalAction::Retrieve, "B"),
                (3, RetrievalAction::PlaceBack, "A"),
            ]
        );
        assert_eq!(plan.steps[0].item_name, "Alpha");
    }

    #[test]
    fn unobstructed_item_is_a_single_step() {
        let mut station = station(&[("A", "Alpha"), ("B", "Bravo")]);
        put(&mut station, "A", (0, 0, 0));
        put(&mut station, "B", (10, 10, 0));

        let plan = plan_retrieval(&station, "B").unwrap();
        assert_eq!(plan.blocker_count, 0);
        assert_eq!(actions(&plan), vec![(1, RetrievalAction::Retrieve, "B")]);
    }

    #[test]
    fn blockers_are_removed_nearest_first_and_put_back_in_reverse() {
        let mut station = station(&[("far", "Far"), ("near", "Near"), ("mid", "Mid"), ("T", "Target")]);
        put(&mut station, "mid", (0, 10, 0));
        put(&mut station, "near", (5, 0, 0));
        put(&mut station, "far", (0, 20, 5));
        put(&mut station, "T", (0, 30, 0));

        let plan = plan_retrieval(&station, "T").unwrap();
        assert_eq!(
            actions(&plan),
            vec![
                (1, RetrievalAction::Remove, "near"),
                (2, RetrievalAction::Remove, "mid"),
                (3, RetrievalAction::Remove, "far"),
                (4, RetrievalAction::Retrieve, "T"),
                (5, RetrievalAction::PlaceBack, "far"),
                (6, RetrievalAction::PlaceBack, "mid"),
                (7, RetrievalAction::PlaceBack, "near"),
            ]
        );
    }

    #[test]
    fn unplaced_item_cannot_be_planned() {
        let station = station(&[("A", "Alpha")]);
        assert_eq!(
            plan_retrieval(&station, "A").unwrap_err(),
            StowageError::NotPlaced("A".into())
        );
        assert!(matches!(
            plan_retrieval(&station, "nope"),
            Err(StowageError::ItemNotFound(_))
        ));
    }

    #[test]
    fn retrieving_removes_the_item_and_consumes_a_use() {
        let mut station = station(&[("A", "Alpha"), ("B", "Bravo")]);
        put(&mut station, "A", (0, 0, 0));
        put(&mut station, "B", (0, 10, 0));

        let report = retrieve_item(&mut station, "B").unwrap();
        assert_eq!(report.plan.steps.len(), 3);
        assert_eq!(report.remaining_uses, 1);
        assert!(!report.is_waste);
        assert!(!station.item("B").unwrap().is_placed());
        assert_eq!(station.placement_of("A").unwrap().start, Coords::zero());
        assert_eq!(station.container("c1").unwrap().occupied_volume(), 1000);
        assert!(station.check_invariants().is_ok());

        put(&mut station, "B", (0, 10, 0));
        let report = retrieve_item(&mut station, "B").unwrap();
        assert_eq!(report.remaining_uses, 0);
        assert!(report.is_waste);
        assert!(station.check_invariants().is_ok());
    }

    #[test]
    fn locate_by_id_or_name() {
        let mut station = station(&[("A", "Oxygen Cylinder"), ("B", "Food Packet")]);
        put(&mut station, "A", (0, 0, 0));
        put(&mut station, "B", (0, 10, 0));

        let found = locate_item(
            &station,
            &ItemQuery {
                name: Some("food".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(found.item_id, "B");
        assert_eq!(found.zone, "Lab");
        assert_eq!(found.retrieval.blocker_count, 1);

        let found = locate_item(
            &station,
            &ItemQuery {
                item_id: Some("A".into()),
                name: Some("food".into()),
            },
        )
        .unwrap();
        assert_eq!(found.item_id, "A");

        assert!(matches!(
            locate_item(&station, &ItemQuery::default()),
            Err(StowageError::InvalidArgument(_))
        ));
        assert!(matches!(
            locate_item(
                &station,
                &ItemQuery {
                    name: Some("wrench".into()),
                    ..Default::default()
                }
            ),
            Err(StowageError::ItemNotFound(_))
        ));
    }
}
