//! Waste handling: identification, return planning and undocking.
//!
//! Waste items are staged in an undocking container under a mass budget. The
//! greedy selection takes the lightest items first, which maximizes the number
//! of items returned.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::error::{Result, StowageError};
use crate::model::WasteReason;
use crate::retrieval::{RetrievalAction, RetrievalStep, plan_retrieval};
use crate::station::StationState;
use crate::types::{Coords, Dimensional, Positioned, Rotation, Weighted};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct WastePosition {
    pub start: Coords,
    pub end: Coords,
}

/// A waste item and where it currently sits.
#[derive(Clone, Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WasteItem {
    pub item_id: String,
    pub name: String,
    pub reason: WasteReason,
    pub container_id: Option<String>,
    pub position: Option<WastePosition>,
}

/// Flags every depleted or expired item that is not flagged yet, then lists
/// all waste items in station order.
pub fn identify_waste(station: &mut StationState) -> Vec<WasteItem> {
    let today = station.current_date();
    for item in station.items_mut() {
        let reason = if item.remaining_uses() == 0 {
            WasteReason::OutOfUses
        } else if item.is_expired_on(today) {
            WasteReason::Expired
        } else {
            continue;
        };
        if item.mark_waste(reason) {
            debug!(item = %item.id, reason = reason.code(), "item flagged as waste");
        }
    }

    station
        .items()
        .iter()
        .filter_map(|item| {
            let reason = item.waste_reason()?;
            let position = station.placement_of(&item.id).ok().map(|p| WastePosition {
                start: p.position(),
                end: p.end,
            });
            Some(WasteItem {
                item_id: item.id.clone(),
                name: item.name.clone(),
                reason,
                container_id: item.container_id().map(str::to_owned),
                position,
            })
        })
        .collect()
}

#[derive(Clone, Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReturnRequest {
    pub undocking_container_id: String,
    pub max_mass: f64,
    /// Defaults to the station's current date.
    pub undocking_date: Option<NaiveDate>,
}

/// Move of one waste item into the undocking container.
#[derive(Clone, Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReturnStep {
    pub step: usize,
    pub item_id: String,
    pub item_name: String,
    pub from_container: Option<String>,
    pub to_container: String,
}

#[derive(Clone, Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReturnItem {
    pub item_id: String,
    pub name: String,
    pub reason: WasteReason,
}

#[derive(Clone, Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReturnManifest {
    pub undocking_container_id: String,
    pub undocking_date: NaiveDate,
    pub return_items: Vec<ReturnItem>,
    pub total_volume: u64,
    pub total_mass: f64,
}

/// A waste item within budget that could not be staged.
#[derive(Clone, Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SkippedWaste {
    pub item_id: String,
    pub reason: String,
}

#[derive(Clone, Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReturnPlan {
    pub return_steps: Vec<ReturnStep>,
    /// Steps for getting the selected items out of their containers,
    /// numbered across the whole plan.
    pub retrieval_steps: Vec<RetrievalStep>,
    pub return_manifest: ReturnManifest,
    pub skipped: Vec<SkippedWaste>,
}

/// Selects waste items within `max_mass` and moves them into the undocking
/// container.
///
/// Items are taken in ascending mass order (ties keep station order) until the
/// next one would exceed the budget. Items already in the undocking container
/// need no move. Items that find no room there are skipped and do not count
/// against the budget.
pub fn plan_waste_return(station: &mut StationState, request: &ReturnRequest) -> Result<ReturnPlan> {
    if !request.max_mass.is_finite() || request.max_mass < 0.0 {
        return Err(StowageError::InvalidArgument(format!(
            "maxMass must be a non-negative number, got {}",
            request.max_mass
        )));
    }
    let target = request.undocking_container_id.as_str();
    station.container(target)?;

    let mut candidates: Vec<(String, f64)> = station
        .items()
        .iter()
        .filter(|item| item.is_waste())
        .map(|item| (item.id.clone(), item.mass()))
        .collect();
    candidates.sort_by(|a, b| a.1.total_cmp(&b.1));

    let mut plan = ReturnPlan {
        return_steps: Vec::new(),
        retrieval_steps: Vec::new(),
        return_manifest: ReturnManifest {
            undocking_container_id: target.to_string(),
            undocking_date: request.undocking_date.unwrap_or(station.current_date()),
            return_items: Vec::new(),
            total_volume: 0,
            total_mass: 0.0,
        },
        skipped: Vec::new(),
    };

    for (item_id, mass) in candidates {
        if !within_budget(plan.return_manifest.total_mass, mass, request.max_mass) {
            debug!(item = %item_id, mass, "return budget exhausted");
            break;
        }

        match stage(station, &item_id, target) {
            Ok(Some(staged)) => {
                for mut step in staged.retrieval {
                    step.step = plan.retrieval_steps.len() + 1;
                    plan.retrieval_steps.push(step);
                }
                if staged.moved {
                    plan.return_steps.push(ReturnStep {
                        step: plan.return_steps.len() + 1,
                        item_id: item_id.clone(),
                        item_name: staged.name,
                        from_container: staged.from_container,
                        to_container: target.to_string(),
                    });
                }
            }
            Ok(None) => {
                plan.skipped.push(SkippedWaste {
                    item_id,
                    reason: format!("no room in undocking container {target}"),
                });
                continue;
            }
            Err(err) => {
                warn!(item = %item_id, error = %err, "waste item could not be staged");
                plan.skipped.push(SkippedWaste {
                    item_id,
                    reason: err.to_string(),
                });
                continue;
            }
        }

        let item = station.item(&item_id)?;
        let manifest = &mut plan.return_manifest;
        manifest.total_mass += mass;
        manifest.total_volume += item.volume();
        manifest.return_items.push(ReturnItem {
            item_id: item.id.clone(),
            name: item.name.clone(),
            reason: item.waste_reason().unwrap_or(WasteReason::Expired),
        });
    }

    info!(
        container = target,
        selected = plan.return_manifest.return_items.len(),
        skipped = plan.skipped.len(),
        total_mass = plan.return_manifest.total_mass,
        "waste return planned"
    );
    Ok(plan)
}

/// Budget check with a relative tolerance so masses that sum to the budget in
/// decimal still fit after floating-point rounding.
fn within_budget(total: f64, mass: f64, max_mass: f64) -> bool {
    total + mass <= max_mass + MASS_TOLERANCE * max_mass.max(1.0)
}

const MASS_TOLERANCE: f64 = 1e-9;

struct Staged {
    name: String,
    moved: bool,
    from_container: Option<String>,
    retrieval: Vec<RetrievalStep>,
}

/// Moves one item into `target`. Returns `None` if there is no room.
fn stage(station: &mut StationState, item_id: &str, target: &str) -> Result<Option<Staged>> {
    let item = station.item(item_id)?;
    let name = item.name.clone();
    let dims = item.dims;
    let current = item.container_id().map(str::to_owned);

    if current.as_deref() == Some(target) {
        return Ok(Some(Staged {
            name,
            moved: false,
            from_container: current,
            retrieval: Vec::new(),
        }));
    }

    let Some(start) = station.container(target)?.first_fit(dims) else {
        return Ok(None);
    };

    let mut retrieval = Vec::new();
    if current.is_some() {
        retrieval = plan_retrieval(station, item_id)?.steps;
        station.release(item_id)?;
    }
    station.allocate(item_id, target, start, Rotation::Identity)?;
    retrieval.push(RetrievalStep {
        step: retrieval.len() + 1,
        action: RetrievalAction::Move,
        item_id: item_id.to_string(),
        item_name: name.clone(),
    });
    debug!(item = item_id, container = target, "waste item staged");

    Ok(Some(Staged {
        name,
        moved: true,
        from_container: current,
        retrieval,
    }))
}

#[derive(Clone, Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UndockingReport {
    pub container_id: String,
    pub items_removed: usize,
    pub removed_item_ids: Vec<String>,
}

/// Removes every waste item stowed in the container from the station.
pub fn complete_undocking(station: &mut StationState, container_id: &str) -> Result<UndockingReport> {
    let removed: Vec<String> = station
        .container(container_id)?
        .placements()
        .iter()
        .filter(|p| station.item(&p.item_id).is_ok_and(|item| item.is_waste()))
        .map(|p| p.item_id.clone())
        .collect();

    for item_id in &removed {
        station.release(item_id)?;
    }
    station.remove_items(&removed);

    info!(container = container_id, removed = removed.len(), "undocking completed");
    Ok(UndockingReport {
        container_id: container_id.to_string(),
        items_removed: removed.len(),
        removed_item_ids: removed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Container, Item};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn station() -> StationState {
        let mut station = StationState::new(date(2025, 3, 1));
        station
            .insert_container(Container::new("shelf", "Storage", Coords::new(30, 30, 10)).unwrap())
            .unwrap();
        station
            .insert_container(Container::new("dock", "Airlock", Coords::new(20, 10, 10)).unwrap())
            .unwrap();
        station
    }

    fn waste(station: &mut StationState, id: &str, mass: f64) {
        station
            .insert_item(
                Item::new(id, format!("Waste {id}"), Coords::new(10, 10, 10), mass, 50)
                    .unwrap()
                    .with_usage_limit(0),
            )
            .unwrap();
    }

    fn request(max_mass: f64) -> ReturnRequest {
        ReturnRequest {
            undocking_container_id: "dock".into(),
            max_mass,
            undocking_date: None,
        }
    }

    #[test]
    fn budget_below_every_item_selects_nothing() {
        let mut station = station();
        waste(&mut station, "a", 5.0);
        waste(&mut station, "b", 7.0);
        waste(&mut station, "c", 9.0);

        let plan = plan_waste_return(&mut station, &request(4.0)).unwrap();

        assert!(plan.return_steps.is_empty());
        assert!(plan.return_manifest.return_items.is_empty());
        assert_eq!(plan.return_manifest.total_mass, 0.0);
        assert_eq!(plan.return_manifest.total_volume, 0);
        assert_eq!(plan.return_manifest.undocking_date, date(2025, 3, 1));
    }

    #[test]
    fn lightest_items_are_taken_first() {
        let mut station = station();
        waste(&mut station, "heavy", 9.0);
        waste(&mut station, "light", 5.0);
        waste(&mut station, "mid", 7.0);
        for (id, start) in [("heavy", (0, 0, 0)), ("light", (10, 0, 0)), ("mid", (0, 10, 0))] {
            station
                .allocate(id, "shelf", start.into(), Rotation::Identity)
                .unwrap();
        }

        let plan = plan_waste_return(&mut station, &request(12.0)).unwrap();

        let ids: Vec<&str> = plan
            .return_manifest
            .return_items
            .iter()
            .map(|r| r.item_id.as_str())
            .collect();
        assert_eq!(ids, vec!["light", "mid"]);
        assert_eq!(plan.return_manifest.total_mass, 12.0);
        assert_eq!(plan.return_manifest.total_volume, 2000);
        assert_eq!(plan.return_steps.len(), 2);
        assert_eq!(plan.return_steps[1].from_container.as_deref(), Some("shelf"));
        assert_eq!(station.item("mid").unwrap().container_id(), Some("dock"));
        assert_eq!(station.item("heavy").unwrap().container_id(), Some("shelf"));
        assert!(station.check_invariants().is_ok());
    }

    #[test]
    fn blocked_items_bring_their_retrieval_steps() {
        let mut station = station();
        waste(&mut station, "back", 1.0);
        station
            .insert_item(Item::new("front", "Front", Coords::new(10, 10, 10), 1.0, 50).unwrap())
            .unwrap();
        station.allocate("front", "shelf", Coords::zero(), Rotation::Identity).unwrap();
        station
            .allocate("back", "shelf", Coords::new(0, 10, 0), Rotation::Identity)
            .unwrap();

        let plan = plan_waste_return(&mut station, &request(10.0)).unwrap();

        let steps: Vec<(usize, RetrievalAction, &str)> = plan
            .retrieval_steps
            .iter()
            .map(|s| (s.step, s.action, s.item_id.as_str()))
            .collect();
        assert_eq!(
            steps,
            vec![
                (1, RetrievalAction::Remove, "front"),
                (2, RetrievalAction::Retrieve, "back"),
                (3, RetrievalAction::PlaceBack, "front"),
                (4, RetrievalAction::Move, "back"),
            ]
        );
        assert_eq!(station.placement_of("front").unwrap().start, Coords::zero());
    }

    #[test]
    fn items_without_room_are_skipped_without_spending_budget() {
        let mut station = station();
        station
            .insert_item(
                Item::new("crate", "Crate", Coords::new(30, 10, 10), 1.0, 50)
                    .unwrap()
                    .with_usage_limit(0),
            )
            .unwrap();
        waste(&mut station, "bag", 2.0);

        let plan = plan_waste_return(&mut station, &request(2.5)).unwrap();

        assert_eq!(plan.skipped.len(), 1);
        assert_eq!(plan.skipped[0].item_id, "crate");
        assert_eq!(plan.return_manifest.return_items.len(), 1);
        assert_eq!(plan.return_manifest.return_items[0].item_id, "bag");
        assert_eq!(plan.return_steps[0].from_container, None);
        assert_eq!(plan.retrieval_steps.len(), 1);
        assert_eq!(plan.retrieval_steps[0].action, RetrievalAction::Move);
        assert_eq!(plan.retrieval_steps[0].item_id, "bag");
    }

    #[test]
    fn masses_summing_to_the_budget_all_fit() {
        let mut station = station();
        waste(&mut station, "a", 0.1);
        waste(&mut station, "b", 0.2);

        let plan = plan_waste_return(&mut station, &request(0.3)).unwrap();

        assert_eq!(plan.return_manifest.return_items.len(), 2);
        assert!(plan.skipped.is_empty());
        assert!((plan.return_manifest.total_mass - 0.3).abs() < 1e-9);
    }

    #[test]
    fn budget_tolerance_is_tiny() {
        assert!(within_budget(0.1, 0.2, 0.3));
        assert!(within_budget(0.0, 4.0, 4.0));
        assert!(!within_budget(0.0, 4.001, 4.0));
        assert!(!within_budget(0.0, 0.3001, 0.3));
    }

    #[test]
    fn invalid_requests_change_nothing() {
        let mut station = station();
        waste(&mut station, "a", 1.0);
        assert!(matches!(
            plan_waste_return(&mut station, &request(-1.0)),
            Err(StowageError::InvalidArgument(_))
        ));
        assert!(matches!(
            plan_waste_return(&mut station, &request(f64::NAN)),
            Err(StowageError::InvalidArgument(_))
        ));
        let mut unknown = request(10.0);
        unknown.undocking_container_id = "nowhere".into();
        assert!(matches!(
            plan_waste_return(&mut station, &unknown),
            Err(StowageError::ContainerNotFound(_))
        ));
        assert!(!station.item("a").unwrap().is_placed());
    }

    #[test]
    fn identify_flags_items_that_became_stale() {
        let mut station = station();
        station
            .insert_item(
                Item::new("soup", "Soup", Coords::new(1, 1, 1), 1.0, 50)
                    .unwrap()
                    .with_expiry(Some(date(2025, 3, 2))),
            )
            .unwrap();
        waste(&mut station, "used", 1.0);
        station.allocate("used", "shelf", Coords::zero(), Rotation::Identity).unwrap();
        station.advance_date(date(2025, 3, 5));

        let found = identify_waste(&mut station);

        assert_eq!(found.len(), 2);
        assert_eq!(found[0].item_id, "soup");
        assert_eq!(found[0].reason, WasteReason::Expired);
        assert_eq!(found[1].container_id.as_deref(), Some("shelf"));
        assert_eq!(
            found[1].position,
            Some(WastePosition {
                start: Coords::zero(),
                end: Coords::new(10, 10, 10)
            })
        );
        assert!(station.check_invariants().is_ok());
    }

    #[test]
    fn undocking_removes_staged_waste() {
        let mut station = station();
        waste(&mut station, "a", 1.0);
        station
            .insert_item(Item::new("keep", "Keep", Coords::new(10, 10, 10), 1.0, 50).unwrap())
            .unwrap();
        station.allocate("keep", "dock", Coords::zero(), Rotation::Identity).unwrap();
        plan_waste_return(&mut station, &request(10.0)).unwrap();

        let report = complete_undocking(&mut station, "dock").unwrap();

        assert_eq!(report.removed_item_ids, vec!["a".to_string()]);
        assert!(station.item("a").is_err());
        assert!(station.item("keep").is_ok());
        assert_eq!(station.container("dock").unwrap().occupied_volume(), 1000);
        assert!(station.check_invariants().is_ok());
        assert!(complete_undocking(&mut station, "nowhere").is_err());
    }
}
