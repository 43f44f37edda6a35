// ── Live bridge model ──
//
// One collection per entity type, populated during bootstrap and
// mutated in place as statuses stream in. External holders keep stable
// handles across reconnects; a fresh bootstrap prunes ids the bridge no
// longer reports.

mod collection;

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::model::{Area, Button, ButtonGroup, Device, OccupancyGroup, Scene, Zone};

pub use collection::Entry;
pub(crate) use collection::EntityCollection;

pub struct DataStore {
    pub(crate) devices: EntityCollection<Device>,
    pub(crate) areas: EntityCollection<Area>,
    pub(crate) zones: EntityCollection<Zone>,
    pub(crate) buttons: EntityCollection<Button>,
    pub(crate) button_groups: EntityCollection<ButtonGroup>,
    pub(crate) occupancy_groups: EntityCollection<OccupancyGroup>,
    pub(crate) scenes: EntityCollection<Scene>,
    last_event: watch::Sender<Option<DateTime<Utc>>>,
}

impl DataStore {
    pub(crate) fn new() -> Self {
        let (last_event, _) = watch::channel(None);
        Self {
            devices: EntityCollection::new(),
            areas: EntityCollection::new(),
            zones: EntityCollection::new(),
            buttons: EntityCollection::new(),
            button_groups: EntityCollection::new(),
            occupancy_groups: EntityCollection::new(),
            scenes: EntityCollection::new(),
            last_event,
        }
    }

    // ── Lookups ──────────────────────────────────────────────────────

    pub fn device(&self, id: u32) -> Option<Entry<Device>> {
        self.devices.get(id)
    }

    /// The device owning the given zone, via the reciprocal zone map.
    pub fn device_by_zone(&self, zone_id: u32) -> Option<Entry<Device>> {
        let device_id = self.zones.get(zone_id)?.with(|zone| zone.device_id);
        self.devices.get(device_id)
    }

    /// The device owning the given button LED. Scans the (small) device
    /// set; LEDs are rare enough not to warrant an index.
    pub fn device_by_led(&self, led_id: u32) -> Option<Entry<Device>> {
        self.devices
            .iter_sorted()
            .into_iter()
            .map(|(_, entry)| entry)
            .find(|entry| entry.with(|d| d.button_led_ids.contains(&led_id)))
    }

    pub fn area(&self, id: u32) -> Option<Entry<Area>> {
        self.areas.get(id)
    }

    pub fn button(&self, id: u32) -> Option<Entry<Button>> {
        self.buttons.get(id)
    }

    pub fn occupancy_group(&self, id: u32) -> Option<Entry<OccupancyGroup>> {
        self.occupancy_groups.get(id)
    }

    pub fn scene(&self, id: u32) -> Option<Entry<Scene>> {
        self.scenes.get(id)
    }

    // ── Snapshots ────────────────────────────────────────────────────

    pub fn devices(&self) -> Vec<Entry<Device>> {
        values(self.devices.iter_sorted())
    }

    pub fn areas(&self) -> Vec<Entry<Area>> {
        values(self.areas.iter_sorted())
    }

    pub fn buttons(&self) -> Vec<Entry<Button>> {
        values(self.buttons.iter_sorted())
    }

    pub fn occupancy_groups(&self) -> Vec<Entry<OccupancyGroup>> {
        values(self.occupancy_groups.iter_sorted())
    }

    pub fn scenes(&self) -> Vec<Entry<Scene>> {
        values(self.scenes.iter_sorted())
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    // ── Bookkeeping ──────────────────────────────────────────────────

    pub(crate) fn mark_event(&self) {
        let _ = self.last_event.send(Some(Utc::now()));
    }

    /// When the engine last applied a streamed update, if ever.
    pub fn last_event(&self) -> Option<DateTime<Utc>> {
        *self.last_event.borrow()
    }

    /// Drop every id not reported by the bootstrap that just finished.
    pub(crate) fn prune(&self, seen: &BootstrapSeen) {
        self.devices.retain_ids(&seen.devices);
        self.areas.retain_ids(&seen.areas);
        self.zones.retain_ids(&seen.zones);
        self.buttons.retain_ids(&seen.buttons);
        self.button_groups.retain_ids(&seen.button_groups);
        self.occupancy_groups.retain_ids(&seen.occupancy_groups);
        self.scenes.retain_ids(&seen.scenes);
    }
}

/// Ids observed during one bootstrap pass; everything else is pruned
/// when the pass completes.
#[derive(Default)]
pub(crate) struct BootstrapSeen {
    pub devices: HashSet<u32>,
    pub areas: HashSet<u32>,
    pub zones: HashSet<u32>,
    pub buttons: HashSet<u32>,
    pub button_groups: HashSet<u32>,
    pub occupancy_groups: HashSet<u32>,
    pub scenes: HashSet<u32>,
}

fn values<T>(entries: Vec<(u32, Entry<T>)>) -> Vec<Entry<T>> {
    entries.into_iter().map(|(_, entry)| entry).collect()
}
