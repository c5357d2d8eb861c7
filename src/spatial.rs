//! Spatial model: occupancy queries and allocation.
//!
//! Occupancy is stored per container as a list of axis-aligned boxes; every
//! query is a pairwise interval test against that list. Memory scales with the
//! number of placements, not with the container volume.

use tracing::debug;

use crate::error::{Result, StowageError};
use crate::model::{Container, Placement};
use crate::station::StationState;
use crate::types::{BoundingBox, Coords, Rotation};

impl Container {
    /// Checks whether a box with extent `dims` starting at `start` fits inside
    /// the container and overlaps no active placement.
    ///
    /// Touching faces are allowed, shared volume is not.
    pub fn can_place(&self, start: Coords, dims: Coords) -> bool {
        if !dims.is_valid_dimension() {
            return false;
        }
        let Some(end) = start.checked_add(dims) else {
            return false;
        };
        if !end.fits_within(&self.dims) {
            return false;
        }
        let candidate = BoundingBox::new(start, end);
        !self
            .placements()
            .iter()
            .any(|p| p.bounding_box().intersects(&candidate))
    }

    /// First free start position for `dims` in raster order.
    ///
    /// Depth is the outer loop, then height, then width, each counting up from 0,
    /// so positions near the open face are preferred. On a collision the width
    /// cursor jumps past the colliding box. When a whole row is blocked the height
    /// cursor jumps to the lowest top among the row's blockers, and a fully
    /// blocked layer moves the depth cursor the same way. Every skipped position
    /// would collide with a box already seen, so the result equals a unit-step
    /// scan.
    pub fn first_fit(&self, dims: Coords) -> Option<Coords> {
        if !dims.is_valid_dimension() {
            return None;
        }
        let max = self.dims.max_start_for(&dims)?;
        let mut depth = 0;
        while depth <= max.depth {
            let mut layer_clear_at = u32::MAX;
            let mut height = 0;
            while height <= max.height {
                let mut row_clear_at = u32::MAX;
                let mut width = 0;
                while width <= max.width {
                    let start = Coords::new(width, depth, height);
                    let candidate = BoundingBox::from_position_and_dims(start, dims);
                    match self
                        .placements()
                        .iter()
                        .find(|p| p.bounding_box().intersects(&candidate))
                    {
                        None => return Some(start),
                        Some(blocking) => {
                            row_clear_at = row_clear_at.min(blocking.end.height);
                            layer_clear_at = layer_clear_at.min(blocking.end.depth);
                            width = blocking.end.width.max(width + 1);
                        }
                    }
                }
                height = row_clear_at.max(height.saturating_add(1));
            }
            depth = layer_clear_at.max(depth.saturating_add(1));
        }
        None
    }

    /// Like [`Container::first_fit`], trying each allowed orientation in turn.
    ///
    /// Returns the start corner, the orientation and the oriented extent.
    pub fn first_fit_oriented(
        &self,
        dims: Coords,
        allow_rotation: bool,
    ) -> Option<(Coords, Rotation, Coords)> {
        Rotation::orientations(dims, allow_rotation)
            .into_iter()
            .find_map(|(rotation, oriented)| {
                self.first_fit(oriented)
                    .map(|start| (start, rotation, oriented))
            })
    }

    /// Checks if the item could fit into the empty container in some allowed orientation.
    pub fn could_ever_hold(&self, dims: Coords, allow_rotation: bool) -> bool {
        Rotation::orientations(dims, allow_rotation)
            .iter()
            .any(|(_, oriented)| oriented.fits_within(&self.dims))
    }
}

impl StationState {
    /// `true` iff the box fits into the container's bounds and overlaps no
    /// active placement there.
    pub fn can_place(&self, container_id: &str, start: Coords, dims: Coords) -> Result<bool> {
        Ok(self.container(container_id)?.can_place(start, dims))
    }

    /// Active placement of an item.
    pub fn placement_of(&self, item_id: &str) -> Result<&Placement> {
        let item = self.item(item_id)?;
        let container_id = item
            .container_id()
            .ok_or_else(|| StowageError::NotPlaced(item_id.to_string()))?;
        self.container(container_id)?
            .placement_of(item_id)
            .ok_or_else(|| StowageError::NotPlaced(item_id.to_string()))
    }

    /// Registers a placement for an unplaced item.
    ///
    /// Fails with `Conflict` if the item is already placed or the box would leave
    /// the container or overlap another placement; nothing is changed then.
    pub fn allocate(
        &mut self,
        item_id: &str,
        container_id: &str,
        start: Coords,
        rotation: Rotation,
    ) -> Result<Placement> {
        let item = self.item(item_id)?;
        if let Some(current) = item.container_id() {
            return Err(StowageError::Conflict(format!(
                "item {} is already placed in {}",
                item_id, current
            )));
        }
        let dims = rotation.apply(item.dims);
        let container = self.container(container_id)?;
        if !container.can_place(start, dims) {
            return Err(StowageError::Conflict(format!(
                "item {} does not fit at ({}, {}, {}) in {}",
                item_id, start.width, start.depth, start.height, container_id
            )));
        }

        let placement = Placement::new(item_id, container_id, start, dims, rotation);
        self.container_mut(container_id)?
            .push_placement(placement.clone());
        self.item_mut(item_id)?
            .set_container(Some(container_id.to_string()));
        debug!(
            item = item_id,
            container = container_id,
            width = start.width,
            depth = start.depth,
            height = start.height,
            "allocated placement"
        );
        Ok(placement)
    }

    /// Removes the active placement of an item and returns it.
    pub fn release(&mut self, item_id: &str) -> Result<Placement> {
        let container_id = self
            .item(item_id)?
            .container_id()
            .map(str::to_owned)
            .ok_or_else(|| StowageError::NotPlaced(item_id.to_string()))?;
        let placement = self
            .container_mut(&container_id)?
            .take_placement(item_id)
            .ok_or_else(|| StowageError::NotPlaced(item_id.to_string()))?;
        self.item_mut(item_id)?.set_container(None);
        debug!(item = item_id, container = %container_id, "released placement");
        Ok(placement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Item;
    use chrono::NaiveDate;

    fn station_with(container_dims: (u32, u32, u32), items: &[(&str, (u32, u32, u32))]) -> StationState {
        let mut station = StationState::new(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        station
            .insert_container(Container::new("c1", "Lab", container_dims.into()).unwrap())
            .unwrap();
        for (id, dims) in items {
            station
                .insert_item(Item::new(*id, *id, (*dims).into(), 1.0, 50).unwrap())
                .unwrap();
        }
        station
    }

    #[test]
    fn exact_fit_succeeds_and_one_unit_more_fails() {
        let station = station_with((10, 20, 30), &[]);
        assert!(station.can_place("c1", Coords::zero(), Coords::new(10, 20, 30)).unwrap());
        assert!(!station.can_place("c1", Coords::zero(), Coords::new(11, 20, 30)).unwrap());
        assert!(!station.can_place("c1", Coords::zero(), Coords::new(10, 21, 30)).unwrap());
        assert!(!station.can_place("c1", Coords::zero(), Coords::new(10, 20, 31)).unwrap());
        assert!(!station.can_place("c1", Coords::new(1, 0, 0), Coords::new(10, 20, 30)).unwrap());
    }

    #[test]
    fn allocate_then_release_restores_state() {
        let mut station = station_with((10, 10, 10), &[("a", (2, 3, 4))]);
        let before = station.container("c1").unwrap().occupied_volume();

        let placement = station
            .allocate("a", "c1", Coords::new(1, 1, 1), Rotation::Identity)
            .unwrap();
        assert_eq!(placement.end, Coords::new(3, 4, 5));
        assert_eq!(station.container("c1").unwrap().occupied_volume(), 24);
        assert_eq!(station.item("a").unwrap().container_id(), Some("c1"));
        assert!(station.check_invariants().is_ok());

        let released = station.release("a").unwrap();
        assert_eq!(released, placement);
        assert_eq!(station.container("c1").unwrap().occupied_volume(), before);
        assert!(station.container("c1").unwrap().placements().is_empty());
        assert!(!station.item("a").unwrap().is_placed());
    }

    #[test]
    fn overlapping_allocation_is_a_conflict() {
        let mut station = station_with((10, 10, 10), &[("a", (5, 5, 5)), ("b", (5, 5, 5))]);
        station
            .allocate("a", "c1", Coords::zero(), Rotation::Identity)
            .unwrap();
        let err = station
            .allocate("b", "c1", Coords::new(4, 4, 4), Rotation::Identity)
            .unwrap_err();
        assert!(matches!(err, StowageError::Conflict(_)));
        assert!(!station.item("b").unwrap().is_placed());

        // touching faces are fine
        station
            .allocate("b", "c1", Coords::new(5, 0, 0), Rotation::Identity)
            .unwrap();
        assert!(station.check_invariants().is_ok());
    }

    #[test]
    fn double_allocation_is_a_conflict() {
        let mut station = station_with((10, 10, 10), &[("a", (1, 1, 1))]);
        station
            .allocate("a", "c1", Coords::zero(), Rotation::Identity)
            .unwrap();
        assert!(matches!(
            station.allocate("a", "c1", Coords::new(5, 5, 5), Rotation::Identity),
            Err(StowageError::Conflict(_))
        ));
    }

    #[test]
    fn release_of_unplaced_item_is_not_found() {
        let mut station = station_with((10, 10, 10), &[("a", (1, 1, 1))]);
        let err = station.release("a").unwrap_err();
        assert_eq!(err, StowageError::NotPlaced("a".into()));
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
        assert!(matches!(
            station.release("ghost"),
            Err(StowageError::ItemNotFound(_))
        ));
    }

    #[test]
    fn first_fit_scans_width_then_height_then_depth() {
        let mut station = station_with(
            (20, 20, 20),
            &[("a", (10, 10, 10)), ("b", (10, 10, 10)), ("c", (10, 10, 10))],
        );
        let container = station.container("c1").unwrap();
        assert_eq!(container.first_fit(Coords::new(10, 10, 10)), Some(Coords::zero()));

        station.allocate("a", "c1", Coords::zero(), Rotation::Identity).unwrap();
        let container = station.container("c1").unwrap();
        assert_eq!(
            container.first_fit(Coords::new(10, 10, 10)),
            Some(Coords::new(10, 0, 0))
        );

        station
            .allocate("b", "c1", Coords::new(10, 0, 0), Rotation::Identity)
            .unwrap();
        let container = station.container("c1").unwrap();
        assert_eq!(
            container.first_fit(Coords::new(10, 10, 10)),
            Some(Coords::new(0, 0, 10))
        );
        assert_eq!(container.first_fit(Coords::new(21, 1, 1)), None);
    }

    #[test]
    fn blocked_rows_and_layers_are_skipped() {
        let mut station = station_with(
            (10, 100, 100),
            &[("floor", (10, 100, 60)), ("wall", (10, 40, 40))],
        );
        station.allocate("floor", "c1", Coords::zero(), Rotation::Identity).unwrap();
        let container = station.container("c1").unwrap();
        assert_eq!(
            container.first_fit(Coords::new(10, 10, 10)),
            Some(Coords::new(0, 0, 60))
        );
        assert_eq!(container.first_fit(Coords::new(10, 10, 41)), None);

        station
            .allocate("wall", "c1", Coords::new(0, 0, 60), Rotation::Identity)
            .unwrap();
        let container = station.container("c1").unwrap();
        assert_eq!(
            container.first_fit(Coords::new(10, 10, 10)),
            Some(Coords::new(0, 40, 60))
        );
        assert_eq!(container.first_fit(Coords::new(10, 61, 40)), None);
    }

    #[test]
    fn first_fit_matches_unit_step_scan() {
        let mut station = station_with(
            (7, 5, 4),
            &[("a", (3, 2, 2)), ("b", (2, 5, 1)), ("c", (1, 1, 4))],
        );
        station.allocate("a", "c1", Coords::new(1, 0, 0), Rotation::Identity).unwrap();
        station.allocate("b", "c1", Coords::new(5, 0, 1), Rotation::Identity).unwrap();
        station.allocate("c", "c1", Coords::new(0, 0, 0), Rotation::Identity).unwrap();
        let container = station.container("c1").unwrap();

        for dims in [Coords::new(2, 2, 2), Coords::new(1, 1, 1), Coords::new(4, 3, 2)] {
            let mut expected = None;
            'scan: for d in 0..=(5 - dims.depth) {
                for h in 0..=(4 - dims.height) {
                    for w in 0..=(7 - dims.width) {
                        if container.can_place(Coords::new(w, d, h), dims) {
                            expected = Some(Coords::new(w, d, h));
                            break 'scan;
                        }
                    }
                }
            }
            assert_eq!(container.first_fit(dims), expected, "dims {:?}", dims);
        }
    }

    #[test]
    fn rotation_is_only_tried_when_allowed() {
        let station = station_with((10, 2, 2), &[]);
        let container = station.container("c1").unwrap();
        let dims = Coords::new(2, 10, 2);
        assert!(container.first_fit_oriented(dims, false).is_none());
        let (start, rotation, oriented) = container.first_fit_oriented(dims, true).unwrap();
        assert_eq!(start, Coords::zero());
        assert_eq!(rotation, Rotation::SwapWidthDepth);
        assert_eq!(oriented, Coords::new(10, 2, 2));
        assert!(container.could_ever_hold(dims, true));
        assert!(!container.could_ever_hold(dims, false));
    }
}
