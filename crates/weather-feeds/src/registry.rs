use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::location::{Coordinates, Location};
use crate::model::Units;

/// Configured locations keyed by id, with one default while non-empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocationRegistry {
    locations: BTreeMap<String, Location>,
    default_id: Option<String>,
}

impl LocationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a location unless its id is already registered. The first
    /// location added becomes the default.
    pub fn add(&mut self, location: Location) -> bool {
        let id = location.id().to_string();
        if self.locations.contains_key(&id) {
            return false;
        }
        self.locations.insert(id.clone(), location);
        if self.default_id.is_none() {
            self.default_id = Some(id);
        }
        true
    }

    pub fn add_as_default(&mut self, location: Location) -> bool {
        let id = location.id().to_string();
        let added = self.add(location);
        self.default_id = Some(id);
        added
    }

    /// Removes a location; a removed default passes to the first remaining
    /// location by name.
    pub fn remove(&mut self, id: &str) -> Option<Location> {
        let removed = self.locations.remove(id)?;
        if self.default_id.as_deref() == Some(id) {
            self.default_id = self.sorted().first().map(|location| location.id().to_string());
        }
        Some(removed)
    }

    pub fn get(&self, id: &str) -> Option<&Location> {
        self.locations.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Location> {
        self.locations.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.locations.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn default_id(&self) -> Option<&str> {
        self.default_id.as_deref()
    }

    pub fn default_location(&self) -> Option<&Location> {
        self.default_id().and_then(|id| self.get(id))
    }

    pub fn set_default(&mut self, id: &str) -> bool {
        if !self.contains(id) {
            return false;
        }
        self.default_id = Some(id.to_string());
        true
    }

    /// Locations ordered by name, ties broken by id.
    pub fn sorted(&self) -> Vec<&Location> {
        let mut locations: Vec<&Location> = self.locations.values().collect();
        locations.sort_by(|left, right| {
            left.name
                .cmp(&right.name)
                .then_with(|| left.id().cmp(right.id()))
        });
        locations
    }

    pub fn sorted_ids(&self) -> Vec<String> {
        self.sorted()
            .into_iter()
            .map(|location| location.id().to_string())
            .collect()
    }

    pub fn next_id(&self, current: &str) -> Option<String> {
        self.step(current, 1)
    }

    pub fn prev_id(&self, current: &str) -> Option<String> {
        self.step(current, -1)
    }

    fn step(&self, current: &str, offset: isize) -> Option<String> {
        let ids = self.sorted_ids();
        let Some(position) = ids.iter().position(|id| id == current) else {
            return ids.into_iter().next();
        };
        let len = ids.len() as isize;
        let index = (position as isize + offset).rem_euclid(len) as usize;
        ids.into_iter().nth(index)
    }

    pub fn clear(&mut self) {
        self.locations.clear();
        self.default_id = None;
    }

    pub fn set_units(&mut self, id: &str, units: Units) -> bool {
        self.get_mut(id)
            .is_some_and(|location| location.set_units(units))
    }

    pub fn set_coordinates(&mut self, id: &str, coordinates: Option<Coordinates>) -> bool {
        self.get_mut(id)
            .is_some_and(|location| location.set_coordinates(coordinates))
    }

    /// Earliest last-checked time across all locations. `None` when the
    /// registry is empty or any location was never checked.
    pub fn oldest_check(&self) -> Option<DateTime<Utc>> {
        let mut oldest: Option<DateTime<Utc>> = None;
        for location in self.locations.values() {
            let checked = location.last_checked?;
            oldest = Some(oldest.map_or(checked, |current| current.min(checked)));
        }
        oldest
    }

    pub fn iter(&self) -> impl Iterator<Item = &Location> {
        self.locations.values()
    }

    pub(crate) fn restore_default(&mut self, id: Option<String>) {
        self.default_id = id
            .filter(|id| self.locations.contains_key(id))
            .or_else(|| self.sorted().first().map(|location| location.id().to_string()));
    }
}
