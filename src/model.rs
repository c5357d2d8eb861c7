//! Data models for the station stowage core.
//!
//! This module defines the records the engines operate on:
//! - `Item`: a cargo item with dimensions, mass, priority and lifecycle counters
//! - `Container`: a storage container with its active placements
//! - `Placement`: an item's box inside a container
//!
//! All structures implement the traits from the `types` module.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::types::{
    BoundingBox, Coords, Dimensional, Positioned, Rotation, Weighted, validation,
};

/// Validation error for item and container records.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Invalid dimension: {0}")]
    InvalidDimension(String),
    #[error("Invalid mass: {0}")]
    InvalidMass(String),
    #[error("Invalid priority: {0}")]
    InvalidPriority(String),
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),
    #[error("Invalid usage counters: {0}")]
    InvalidUsage(String),
}

fn validate_item_params(
    id: &str,
    dims: Coords,
    mass: f64,
    priority: u8,
) -> Result<(), ValidationError> {
    validation::validate_id(id, "Item").map_err(ValidationError::InvalidIdentifier)?;
    validation::validate_dimensions_3d(dims, "Item").map_err(ValidationError::InvalidDimension)?;
    validation::validate_mass(mass).map_err(ValidationError::InvalidMass)?;
    validation::validate_priority(priority).map_err(ValidationError::InvalidPriority)?;
    Ok(())
}

/// Why an item became waste.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum WasteReason {
    Expired,
    OutOfUses,
}

impl WasteReason {
    pub fn code(&self) -> &'static str {
        match self {
            WasteReason::Expired => "expired",
            WasteReason::OutOfUses => "out_of_uses",
        }
    }
}

impl std::fmt::Display for WasteReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WasteReason::Expired => write!(f, "Expired"),
            WasteReason::OutOfUses => write!(f, "Out of Uses"),
        }
    }
}

/// A cargo item.
///
/// Lifecycle fields (`remaining_uses`, waste flag, current container) are only
/// changed through the engines so the station invariants hold.
#[derive(Clone, Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub dims: Coords,
    pub mass: f64,
    pub priority: u8,
    pub expiry_date: Option<NaiveDate>,
    pub usage_limit: u32,
    remaining_uses: u32,
    pub preferred_zone: String,
    is_waste: bool,
    waste_reason: Option<WasteReason>,
    container_id: Option<String>,
}

impl Item {
    /// Creates a new item with validation.
    ///
    /// The item starts without expiry, with a usage limit of 1 and no
    /// preferred zone; use the `with_*` methods to fill those in.
    ///
    /// # Examples
    /// ```
    /// use station_stowage::model::Item;
    /// use station_stowage::types::Coords;
    ///
    /// let ok = Item::new("001", "Food Packet", Coords::new(10, 10, 20), 5.0, 80);
    /// assert!(ok.is_ok());
    ///
    /// let invalid = Item::new("002", "Oxygen Cylinder", Coords::new(0, 10, 20), 5.0, 80);
    /// assert!(invalid.is_err());
    /// ```
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        dims: Coords,
        mass: f64,
        priority: u8,
    ) -> Result<Self, ValidationError> {
        let id = id.into();
        validate_item_params(&id, dims, mass, priority)?;
        Ok(Self {
            id,
            name: name.into(),
            dims,
            mass,
            priority,
            expiry_date: None,
            usage_limit: 1,
            remaining_uses: 1,
            preferred_zone: String::new(),
            is_waste: false,
            waste_reason: None,
            container_id: None,
        })
    }

    pub fn with_expiry(mut self, expiry_date: Option<NaiveDate>) -> Self {
        self.expiry_date = expiry_date;
        self
    }

    /// Sets the usage limit and resets the remaining uses to it.
    pub fn with_usage_limit(mut self, usage_limit: u32) -> Self {
        self.usage_limit = usage_limit;
        self.remaining_uses = usage_limit;
        self
    }

    /// Restores a partially used counter (e.g. when re-importing a record).
    pub fn with_remaining_uses(mut self, remaining_uses: u32) -> Result<Self, ValidationError> {
        if remaining_uses > self.usage_limit {
            return Err(ValidationError::InvalidUsage(format!(
                "remaining uses {} exceed usage limit {}",
                remaining_uses, self.usage_limit
            )));
        }
        self.remaining_uses = remaining_uses;
        Ok(self)
    }

    pub fn with_preferred_zone(mut self, zone: impl Into<String>) -> Self {
        self.preferred_zone = zone.into();
        self
    }

    pub fn remaining_uses(&self) -> u32 {
        self.remaining_uses
    }

    pub fn is_waste(&self) -> bool {
        self.is_waste
    }

    pub fn waste_reason(&self) -> Option<WasteReason> {
        self.waste_reason
    }

    /// Container currently holding the item, if any.
    pub fn container_id(&self) -> Option<&str> {
        self.container_id.as_deref()
    }

    pub fn is_placed(&self) -> bool {
        self.container_id.is_some()
    }

    /// `true` if the expiry date lies on or before `date`.
    pub fn is_expired_on(&self, date: NaiveDate) -> bool {
        self.expiry_date.is_some_and(|expiry| expiry <= date)
    }

    /// Flags the item as waste. Returns `true` only on the first transition;
    /// the first recorded reason is kept.
    pub(crate) fn mark_waste(&mut self, reason: WasteReason) -> bool {
        if self.is_waste {
            return false;
        }
        self.is_waste = true;
        self.waste_reason = Some(reason);
        true
    }

    /// Consumes one use. Returns the remaining count after the decrement, or
    /// `None` if the item had no uses left.
    pub(crate) fn consume_use(&mut self) -> Option<u32> {
        if self.remaining_uses == 0 {
            return None;
        }
        self.remaining_uses -= 1;
        if self.remaining_uses == 0 {
            self.mark_waste(WasteReason::OutOfUses);
        }
        Some(self.remaining_uses)
    }

    pub(crate) fn set_container(&mut self, container_id: Option<String>) {
        self.container_id = container_id;
    }
}

impl Dimensional for Item {
    fn dimensions(&self) -> Coords {
        self.dims
    }
}

impl Weighted for Item {
    fn mass(&self) -> f64 {
        self.mass
    }
}

/// An item's box inside a container.
///
/// `end` is exclusive: `end = start + oriented dimensions`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Placement {
    pub item_id: String,
    pub container_id: String,
    pub start: Coords,
    pub end: Coords,
    pub rotation: Rotation,
}

impl Placement {
    /// Creates a placement from its start corner and the already oriented extent.
    pub fn new(
        item_id: impl Into<String>,
        container_id: impl Into<String>,
        start: Coords,
        oriented_dims: Coords,
        rotation: Rotation,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            container_id: container_id.into(),
            start,
            end: start + oriented_dims,
            rotation,
        }
    }

    #[inline]
    pub fn bounding_box(&self) -> BoundingBox {
        BoundingBox::new(self.start, self.end)
    }
}

impl Positioned for Placement {
    fn position(&self) -> Coords {
        self.start
    }
}

impl Dimensional for Placement {
    fn dimensions(&self) -> Coords {
        self.bounding_box().dimensions()
    }
}

/// A storage container.
///
/// The open face is fixed at depth = 0. Active placements are kept as a list of
/// boxes in insertion order, together with the cached occupied volume.
#[derive(Clone, Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub id: String,
    pub zone: String,
    #[serde(flatten)]
    pub dims: Coords,
    occupied_volume: u64,
    placements: Vec<Placement>,
}

impl Container {
    /// Creates a new empty container with validation.
    pub fn new(
        id: impl Into<String>,
        zone: impl Into<String>,
        dims: Coords,
    ) -> Result<Self, ValidationError> {
        let id = id.into();
        validation::validate_id(&id, "Container").map_err(ValidationError::InvalidIdentifier)?;
        validation::validate_dimensions_3d(dims, "Container")
            .map_err(ValidationError::InvalidDimension)?;
        Ok(Self {
            id,
            zone: zone.into(),
            dims,
            occupied_volume: 0,
            placements: Vec::new(),
        })
    }

    /// Cached sum of the volumes of all active placements.
    pub fn occupied_volume(&self) -> u64 {
        self.occupied_volume
    }

    pub fn placements(&self) -> &[Placement] {
        &self.placements
    }

    pub fn placement_of(&self, item_id: &str) -> Option<&Placement> {
        self.placements.iter().find(|p| p.item_id == item_id)
    }

    pub fn placed_item_ids(&self) -> Vec<String> {
        self.placements.iter().map(|p| p.item_id.clone()).collect()
    }

    pub fn total_volume(&self) -> u64 {
        self.volume()
    }

    pub fn free_volume(&self) -> u64 {
        self.total_volume().saturating_sub(self.occupied_volume)
    }

    /// Volume usage in percent (0.0 to 100.0).
    pub fn utilization_percent(&self) -> f64 {
        let total = self.total_volume();
        if total == 0 {
            return 0.0;
        }
        (self.occupied_volume as f64 / total as f64) * 100.0
    }

    /// Sum of the volumes of the placement list, independent of the cache.
    pub fn recomputed_volume(&self) -> u64 {
        self.placements.iter().map(|p| p.volume()).sum()
    }

    pub(crate) fn push_placement(&mut self, placement: Placement) {
        self.occupied_volume += placement.volume();
        self.placements.push(placement);
    }

    pub(crate) fn take_placement(&mut self, item_id: &str) -> Option<Placement> {
        let idx = self.placements.iter().position(|p| p.item_id == item_id)?;
        let placement = self.placements.remove(idx);
        self.occupied_volume -= placement.volume();
        Some(placement)
    }
}

impl Dimensional for Container {
    fn dimensions(&self) -> Coords {
        self.dims
    }
}
