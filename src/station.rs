//! Explicit station state.
//!
//! A `StationState` owns the items, the containers and the simulated date. It is
//! passed by reference into every engine call, so independent simulations can
//! live side by side in one process.

use std::collections::HashMap;

use chrono::NaiveDate;

use crate::error::{Result, StowageError};
use crate::model::{Container, Item, WasteReason};

/// Items, containers and the current simulated date.
///
/// Items and containers keep their insertion order; engines rely on it for
/// deterministic tie-breaking.
#[derive(Clone, Debug)]
pub struct StationState {
    current_date: NaiveDate,
    items: Vec<Item>,
    item_index: HashMap<String, usize>,
    containers: Vec<Container>,
    container_index: HashMap<String, usize>,
}

impl StationState {
    /// Creates an empty station starting at `current_date`.
    pub fn new(current_date: NaiveDate) -> Self {
        Self {
            current_date,
            items: Vec::new(),
            item_index: HashMap::new(),
            containers: Vec::new(),
            container_index: HashMap::new(),
        }
    }

    pub fn current_date(&self) -> NaiveDate {
        self.current_date
    }

    /// Moves the simulated clock forward. Dates never move backwards.
    pub(crate) fn advance_date(&mut self, new_date: NaiveDate) {
        if new_date > self.current_date {
            self.current_date = new_date;
        }
    }

    /// Registers a container.
    ///
    /// Placements carried by the record are ignored; containers always enter
    /// the station empty and are filled through the spatial model.
    pub fn insert_container(&mut self, container: Container) -> Result<()> {
        if self.container_index.contains_key(&container.id) {
            return Err(StowageError::Conflict(format!(
                "container {} already exists",
                container.id
            )));
        }
        let container = Container::new(container.id, container.zone, container.dims)?;
        self.container_index
            .insert(container.id.clone(), self.containers.len());
        self.containers.push(container);
        Ok(())
    }

    /// Registers an unplaced item.
    ///
    /// Items that are already depleted or expired on the current date are
    /// flagged as waste right away.
    pub fn insert_item(&mut self, mut item: Item) -> Result<()> {
        if self.item_index.contains_key(&item.id) {
            return Err(StowageError::Conflict(format!(
                "item {} already exists",
                item.id
            )));
        }
        item.set_container(None);
        if item.remaining_uses() == 0 {
            item.mark_waste(WasteReason::OutOfUses);
        } else if item.is_expired_on(self.current_date) {
            item.mark_waste(WasteReason::Expired);
        }
        self.item_index.insert(item.id.clone(), self.items.len());
        self.items.push(item);
        Ok(())
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn containers(&self) -> &[Container] {
        &self.containers
    }

    pub fn item(&self, item_id: &str) -> Result<&Item> {
        self.item_index
            .get(item_id)
            .map(|&idx| &self.items[idx])
            .ok_or_else(|| StowageError::ItemNotFound(item_id.to_string()))
    }

    pub fn container(&self, container_id: &str) -> Result<&Container> {
        self.container_index
            .get(container_id)
            .map(|&idx| &self.containers[idx])
            .ok_or_else(|| StowageError::ContainerNotFound(container_id.to_string()))
    }

    pub(crate) fn item_mut(&mut self, item_id: &str) -> Result<&mut Item> {
        match self.item_index.get(item_id) {
            Some(&idx) => Ok(&mut self.items[idx]),
            None => Err(StowageError::ItemNotFound(item_id.to_string())),
        }
    }

    pub(crate) fn container_mut(&mut self, container_id: &str) -> Result<&mut Container> {
        match self.container_index.get(container_id) {
            Some(&idx) => Ok(&mut self.containers[idx]),
            None => Err(StowageError::ContainerNotFound(container_id.to_string())),
        }
    }

    pub(crate) fn items_mut(&mut self) -> &mut [Item] {
        &mut self.items
    }

    /// First item (in insertion order) whose name matches exactly.
    pub fn find_item_by_name(&self, name: &str) -> Option<&Item> {
        self.items.iter().find(|item| item.name == name)
    }

    /// Deletes item records. Callers must release their placements first.
    pub(crate) fn remove_items(&mut self, item_ids: &[String]) {
        if item_ids.is_empty() {
            return;
        }
        self.items.retain(|item| !item_ids.contains(&item.id));
        self.item_index = self
            .items
            .iter()
            .enumerate()
            .map(|(idx, item)| (item.id.clone(), idx))
            .collect();
    }

    /// Checks the station invariants: non-overlap, bounds, cached volume,
    /// item/placement cross references and the waste flag.
    ///
    /// Returns a description of the first violation found.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        for container in &self.containers {
            let placements = container.placements();
            for (idx, placement) in placements.iter().enumerate() {
                if !placement.bounding_box().is_within(&container.dims) {
                    return Err(format!(
                        "{} exceeds the bounds of {}",
                        placement.item_id, container.id
                    ));
                }
                for other in &placements[idx + 1..] {
                    if crate::geometry::intersects(placement, other) {
                        return Err(format!(
                            "{} overlaps {} in {}",
                            placement.item_id, other.item_id, container.id
                        ));
                    }
                }
                match self.item(&placement.item_id) {
                    Ok(item) if item.container_id() == Some(container.id.as_str()) => {}
                    _ => {
                        return Err(format!(
                            "placement of {} in {} has no matching item reference",
                            placement.item_id, container.id
                        ));
                    }
                }
            }
            if container.occupied_volume() != container.recomputed_volume() {
                return Err(format!(
                    "cached volume of {} is {}, placements sum to {}",
                    container.id,
                    container.occupied_volume(),
                    container.recomputed_volume()
                ));
            }
        }
        for item in &self.items {
            if let Some(container_id) = item.container_id() {
                let holds = self
                    .container(container_id)
                    .map(|c| c.placement_of(&item.id).is_some())
                    .unwrap_or(false);
                if !holds {
                    return Err(format!(
                        "{} references {} without a placement",
                        item.id, container_id
                    ));
                }
            }
            if item.remaining_uses() > item.usage_limit {
                return Err(format!("{} has more uses left than its limit", item.id));
            }
            if (item.remaining_uses() == 0 || item.is_expired_on(self.current_date))
                && !item.is_waste()
            {
                return Err(format!("{} should be flagged as waste", item.id));
            }
        }
        Ok(())
    }
}
