//! Placement engine for stowing items into station containers.
//!
//! Items are placed greedily and deterministically:
//! - higher priority first, input order breaks ties
//! - containers in the item's preferred zone first
//! - the first free position in raster order (depth, then height, then width),
//!   which keeps items close to the open face
//!
//! When no container has room, a [`RearrangementPolicy`] may displace
//! lower-priority items to make space.

use serde::Serialize;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::error::Result;
use crate::model::{Item, Placement};
use crate::rearrangement::{EvictLowerPriority, RearrangementPolicy};
use crate::station::StationState;
use crate::types::{Coords, Rotation};

/// Configuration for the placement engine.
#[derive(Copy, Clone, Debug)]
pub struct PlacementConfig {
    /// Also try the five rotated orientations after the identity one
    pub allow_item_rotation: bool,
    /// Displace lower-priority items when an item finds no free space
    pub allow_rearrangement: bool,
    /// Upper bound on items displaced for a single placement
    pub max_displaced_items: usize,
}

impl PlacementConfig {
    pub const DEFAULT_ALLOW_ITEM_ROTATION: bool = false;
    pub const DEFAULT_ALLOW_REARRANGEMENT: bool = true;
    pub const DEFAULT_MAX_DISPLACED_ITEMS: usize = 3;

    /// Creates a builder for a custom configuration.
    pub fn builder() -> PlacementConfigBuilder {
        PlacementConfigBuilder::default()
    }
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            allow_item_rotation: Self::DEFAULT_ALLOW_ITEM_ROTATION,
            allow_rearrangement: Self::DEFAULT_ALLOW_REARRANGEMENT,
            max_displaced_items: Self::DEFAULT_MAX_DISPLACED_ITEMS,
        }
    }
}

/// Builder for [`PlacementConfig`].
#[derive(Clone, Debug, Default)]
pub struct PlacementConfigBuilder {
    config: PlacementConfig,
}

impl PlacementConfigBuilder {
    pub fn allow_item_rotation(mut self, allow: bool) -> Self {
        self.config.allow_item_rotation = allow;
        self
    }

    pub fn allow_rearrangement(mut self, allow: bool) -> Self {
        self.config.allow_rearrangement = allow;
        self
    }

    /// Sets the displacement bound (at least 1).
    pub fn max_displaced_items(mut self, max: usize) -> Self {
        self.config.max_displaced_items = max.max(1);
        self
    }

    pub fn build(self) -> PlacementConfig {
        self.config
    }
}

/// Why an item was not placed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum UnplacedReason {
    UnknownItem,
    AlreadyPlaced,
    WasteItem,
    ExceedsAllContainers,
    NoFit,
}

impl UnplacedReason {
    pub fn code(&self) -> &'static str {
        match self {
            UnplacedReason::UnknownItem => "unknown_item",
            UnplacedReason::AlreadyPlaced => "already_placed",
            UnplacedReason::WasteItem => "waste_item",
            UnplacedReason::ExceedsAllContainers => "exceeds_all_containers",
            UnplacedReason::NoFit => "no_fit",
        }
    }
}

impl std::fmt::Display for UnplacedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnplacedReason::UnknownItem => write!(f, "Item is not registered on the station"),
            UnplacedReason::AlreadyPlaced => write!(f, "Item already has a placement"),
            UnplacedReason::WasteItem => write!(f, "Waste items are not stowed"),
            UnplacedReason::ExceedsAllContainers => {
                write!(f, "Item exceeds every container in at least one dimension")
            }
            UnplacedReason::NoFit => {
                write!(f, "No free position found, even after rearrangement")
            }
        }
    }
}

/// Item that could not be placed.
#[derive(Clone, Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UnplacedItem {
    pub item_id: String,
    pub reason: UnplacedReason,
}

/// Kind of a rearrangement step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum RearrangementAction {
    /// A displaced item moves from its old placement to a new one.
    Move,
    /// The item that needed room is placed.
    Place,
}

/// One step of a rearrangement, numbered contiguously across an outcome.
#[derive(Clone, Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RearrangementStep {
    pub step: usize,
    pub action: RearrangementAction,
    pub item_id: String,
    pub from: Option<Placement>,
    pub to: Placement,
}

/// Result of a placement run.
#[derive(Clone, Debug, Default, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlacementOutcome {
    pub success: bool,
    pub placements: Vec<Placement>,
    pub rearrangements: Vec<RearrangementStep>,
    pub unplaced: Vec<UnplacedItem>,
}

impl PlacementOutcome {
    pub fn placed_count(&self) -> usize {
        self.placements.len()
    }

    pub fn unplaced_count(&self) -> usize {
        self.unplaced.len()
    }

    pub fn unplaced_ids(&self) -> Vec<&str> {
        self.unplaced.iter().map(|u| u.item_id.as_str()).collect()
    }
}

/// Events emitted while placing, for live progress reporting.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum PlacementEvent {
    /// An item received a placement.
    ItemPlaced {
        item_id: String,
        container_id: String,
        start: Coords,
        end: Coords,
        rotation: Rotation,
    },
    /// A lower-priority item was moved to make room.
    ItemRelocated {
        item_id: String,
        from_container: String,
        to_container: String,
        to_start: Coords,
    },
    /// An item could not be placed.
    ItemRejected {
        item_id: String,
        reason_code: String,
        reason_text: String,
    },
    /// Placement run finished.
    Finished {
        placed: usize,
        rearranged: usize,
        unplaced: usize,
    },
}

/// Places items with the default configuration.
///
/// `item_ids == None` selects every unplaced, non-waste item of the station.
pub fn place_items(station: &mut StationState, item_ids: Option<&[String]>) -> PlacementOutcome {
    place_items_with_config(station, item_ids, PlacementConfig::default())
}

/// Places items with a custom configuration.
pub fn place_items_with_config(
    station: &mut StationState,
    item_ids: Option<&[String]>,
    config: PlacementConfig,
) -> PlacementOutcome {
    place_items_with_progress(station, item_ids, config, |_| {})
}

/// Places items and reports every step through `on_event`.
pub fn place_items_with_progress(
    station: &mut StationState,
    item_ids: Option<&[String]>,
    config: PlacementConfig,
    on_event: impl FnMut(&PlacementEvent),
) -> PlacementOutcome {
    place_items_with_policy(station, item_ids, config, &EvictLowerPriority, on_event)
}

/// Places items using an explicit rearrangement policy.
pub fn place_items_with_policy(
    station: &mut StationState,
    item_ids: Option<&[String]>,
    config: PlacementConfig,
    policy: &dyn RearrangementPolicy,
    mut on_event: impl FnMut(&PlacementEvent),
) -> PlacementOutcome {
    let mut outcome = PlacementOutcome::default();

    // Candidate selection; rejected requests are reported in request order.
    let mut candidates: Vec<(String, u8)> = Vec::new();
    match item_ids {
        None => {
            candidates.extend(
                station
                    .items()
                    .iter()
                    .filter(|item| !item.is_placed() && !item.is_waste())
                    .map(|item| (item.id.clone(), item.priority)),
            );
        }
        Some(ids) => {
            for id in ids {
                if candidates.iter().any(|(seen, _)| seen == id) {
                    continue;
                }
                match station.item(id) {
                    Err(_) => reject(&mut outcome, &mut on_event, id, UnplacedReason::UnknownItem),
                    Ok(item) if item.is_placed() => {
                        reject(&mut outcome, &mut on_event, id, UnplacedReason::AlreadyPlaced)
                    }
                    Ok(item) if item.is_waste() => {
                        reject(&mut outcome, &mut on_event, id, UnplacedReason::WasteItem)
                    }
                    Ok(item) => candidates.push((item.id.clone(), item.priority)),
                }
            }
        }
    }

    // Stable sort: equal priorities keep their input order.
    candidates.sort_by(|a, b| b.1.cmp(&a.1));

    for (item_id, _) in candidates {
        let Ok(item) = station.item(&item_id) else {
            reject(&mut outcome, &mut on_event, &item_id, UnplacedReason::UnknownItem);
            continue;
        };
        // Rearrangements only move items placed before this run.
        if item.is_placed() {
            reject(&mut outcome, &mut on_event, &item_id, UnplacedReason::AlreadyPlaced);
            continue;
        }
        let dims = item.dims;
        let order = container_order(station, item);

        let holdable = order.iter().any(|id| {
            station
                .container(id)
                .map(|c| c.could_ever_hold(dims, config.allow_item_rotation))
                .unwrap_or(false)
        });
        if !holdable {
            reject(
                &mut outcome,
                &mut on_event,
                &item_id,
                UnplacedReason::ExceedsAllContainers,
            );
            continue;
        }

        if let Some((container_id, start, rotation)) =
            find_position(station, dims, &order, config.allow_item_rotation)
        {
            match station.allocate(&item_id, &container_id, start, rotation) {
                Ok(placement) => {
                    emit_placed(&mut on_event, &placement);
                    outcome.placements.push(placement);
                }
                Err(err) => {
                    warn!(item = %item_id, error = %err, "free position was rejected on allocation");
                    reject(&mut outcome, &mut on_event, &item_id, UnplacedReason::NoFit);
                }
            }
            continue;
        }

        if !config.allow_rearrangement {
            reject(&mut outcome, &mut on_event, &item_id, UnplacedReason::NoFit);
            continue;
        }

        let mut scratch = station.clone();
        match policy.rearrange(&mut scratch, &item_id, &order, &config) {
            Some(plan) => {
                *station = scratch;
                for item_move in plan.moves {
                    on_event(&PlacementEvent::ItemRelocated {
                        item_id: item_move.to.item_id.clone(),
                        from_container: item_move.from.container_id.clone(),
                        to_container: item_move.to.container_id.clone(),
                        to_start: item_move.to.start,
                    });
                    let step = outcome.rearrangements.len() + 1;
                    outcome.rearrangements.push(RearrangementStep {
                        step,
                        action: RearrangementAction::Move,
                        item_id: item_move.to.item_id.clone(),
                        from: Some(item_move.from),
                        to: item_move.to,
                    });
                }
                let step = outcome.rearrangements.len() + 1;
                outcome.rearrangements.push(RearrangementStep {
                    step,
                    action: RearrangementAction::Place,
                    item_id: item_id.clone(),
                    from: None,
                    to: plan.placement.clone(),
                });
                emit_placed(&mut on_event, &plan.placement);
                outcome.placements.push(plan.placement);
            }
            None => reject(&mut outcome, &mut on_event, &item_id, UnplacedReason::NoFit),
        }
    }

    outcome.success = outcome.unplaced.is_empty();
    on_event(&PlacementEvent::Finished {
        placed: outcome.placed_count(),
        rearranged: outcome
            .rearrangements
            .iter()
            .filter(|s| s.action == RearrangementAction::Move)
            .count(),
        unplaced: outcome.unplaced_count(),
    });
    info!(
        placed = outcome.placed_count(),
        rearrangement_steps = outcome.rearrangements.len(),
        unplaced = outcome.unplaced_count(),
        "placement run finished"
    );
    outcome
}

/// Places a single item at an explicit position.
pub fn place_item_at(
    station: &mut StationState,
    item_id: &str,
    container_id: &str,
    start: Coords,
    rotation: Rotation,
) -> Result<Placement> {
    station.allocate(item_id, container_id, start, rotation)
}

fn reject(
    outcome: &mut PlacementOutcome,
    on_event: &mut impl FnMut(&PlacementEvent),
    item_id: &str,
    reason: UnplacedReason,
) {
    debug!(item = item_id, reason = reason.code(), "item not placed");
    on_event(&PlacementEvent::ItemRejected {
        item_id: item_id.to_string(),
        reason_code: reason.code().to_string(),
        reason_text: reason.to_string(),
    });
    outcome.unplaced.push(UnplacedItem {
        item_id: item_id.to_string(),
        reason,
    });
}

fn emit_placed(on_event: &mut impl FnMut(&PlacementEvent), placement: &Placement) {
    on_event(&PlacementEvent::ItemPlaced {
        item_id: placement.item_id.clone(),
        container_id: placement.container_id.clone(),
        start: placement.start,
        end: placement.end,
        rotation: placement.rotation,
    });
}

/// Containers in the item's preferred zone first, then all others; both groups
/// keep the station's container order.
pub(crate) fn container_order(station: &StationState, item: &Item) -> Vec<String> {
    let (preferred, others): (Vec<_>, Vec<_>) = station
        .containers()
        .iter()
        .partition(|c| c.zone == item.preferred_zone);
    preferred
        .into_iter()
        .chain(others)
        .map(|c| c.id.clone())
        .collect()
}

/// First container in `order` with a free position for `dims`.
pub(crate) fn find_position(
    station: &StationState,
    dims: Coords,
    order: &[String],
    allow_rotation: bool,
) -> Option<(String, Coords, Rotation)> {
    order.iter().find_map(|container_id| {
        let container = station.container(container_id).ok()?;
        container
            .first_fit_oriented(dims, allow_rotation)
            .map(|(start, rotation, _)| (container_id.clone(), start, rotation))
    })
}
