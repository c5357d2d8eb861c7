//! Lifecycle simulation: usage consumption, expiry and the simulated clock.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use utoipa::ToSchema;

use crate::error::{Result, StowageError};
use crate::model::WasteReason;
use crate::station::StationState;

/// One use of an item, identified by id or, failing that, by exact name.
#[derive(Clone, Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UsageEvent {
    pub item_id: Option<String>,
    pub name: Option<String>,
}

impl UsageEvent {
    pub fn by_id(item_id: impl Into<String>) -> Self {
        Self {
            item_id: Some(item_id.into()),
            name: None,
        }
    }

    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            item_id: None,
            name: Some(name.into()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UsageChange {
    pub item_id: String,
    pub name: String,
    pub remaining_uses: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ItemRef {
    pub item_id: String,
    pub name: String,
}

/// Result of advancing the simulation.
#[derive(Clone, Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SimulationReport {
    pub previous_date: NaiveDate,
    pub new_date: NaiveDate,
    pub items_used: Vec<UsageChange>,
    pub items_depleted: Vec<ItemRef>,
    pub items_expired: Vec<ItemRef>,
    /// Usage events that matched no item, or an item without uses left.
    pub unresolved: Vec<String>,
}

/// Applies the usage events, then moves the clock forward by `days`.
///
/// Items expiring in `(current date, new date]` become waste. Negative day
/// counts and dates past the calendar range are rejected before anything
/// changes.
pub fn simulate_days(
    station: &mut StationState,
    days: i64,
    usage: &[UsageEvent],
) -> Result<SimulationReport> {
    let previous_date = station.current_date();
    let new_date = advance(previous_date, days)?;

    let mut report = SimulationReport {
        previous_date,
        new_date,
        items_used: Vec::new(),
        items_depleted: Vec::new(),
        items_expired: Vec::new(),
        unresolved: Vec::new(),
    };

    for event in usage {
        let Some(item_id) = resolve(station, event) else {
            report.unresolved.push(describe(event));
            continue;
        };
        let item = station.item_mut(&item_id)?;
        match item.consume_use() {
            Some(remaining) => {
                report.items_used.push(UsageChange {
                    item_id: item.id.clone(),
                    name: item.name.clone(),
                    remaining_uses: remaining,
                });
                if remaining == 0 {
                    report.items_depleted.push(ItemRef {
                        item_id: item.id.clone(),
                        name: item.name.clone(),
                    });
                }
            }
            None => report.unresolved.push(describe(event)),
        }
    }

    for item in station.items_mut() {
        let Some(expiry) = item.expiry_date else {
            continue;
        };
        if !item.is_waste()
            && previous_date < expiry
            && expiry <= new_date
            && item.mark_waste(WasteReason::Expired)
        {
            debug!(item = %item.id, %expiry, "item expired");
            report.items_expired.push(ItemRef {
                item_id: item.id.clone(),
                name: item.name.clone(),
            });
        }
    }

    station.advance_date(new_date);
    info!(
        from = %previous_date,
        to = %new_date,
        used = report.items_used.len(),
        depleted = report.items_depleted.len(),
        expired = report.items_expired.len(),
        "simulated time advanced"
    );
    Ok(report)
}

fn advance(date: NaiveDate, days: i64) -> Result<NaiveDate> {
    let days = u64::try_from(days).map_err(|_| {
        StowageError::InvalidArgument(format!("day count must not be negative, got {days}"))
    })?;
    date.checked_add_days(Days::new(days)).ok_or_else(|| {
        StowageError::InvalidArgument(format!("{date} plus {days} days is out of range"))
    })
}

fn resolve(station: &StationState, event: &UsageEvent) -> Option<String> {
    if let Some(item) = event.item_id.as_deref().and_then(|id| station.item(id).ok()) {
        return Some(item.id.clone());
    }
    event
        .name
        .as_deref()
        .and_then(|name| station.find_item_by_name(name))
        .map(|item| item.id.clone())
}

fn describe(event: &UsageEvent) -> String {
    event
        .item_id
        .clone()
        .or_else(|| event.name.clone())
        .unwrap_or_default()
}
