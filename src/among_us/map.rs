//! The Skeld: a fixed undirected graph of rooms, corridors and vents.

use std::collections::{BTreeMap, BTreeSet};

/// Room table: name, tasks available there, vent connections.
const ROOMS: &[(&str, &[&str], &[&str])] = &[
    (
        "Cafeteria",
        &["Download Data", "Empty Garbage", "Fix Wiring"],
        &["Admin"],
    ),
    (
        "Weapons",
        &["Accept Diverted Power", "Clear Asteroids", "Download Data"],
        &["Navigation"],
    ),
    (
        "Navigation",
        &[
            "Accept Diverted Power",
            "Chart Course",
            "Download Data",
            "Fix Wiring",
            "Stabilize Steering",
        ],
        &["Shields", "Weapons"],
    ),
    (
        "O2",
        &["Clean O2 Filter", "Empty Chute", "Accept Diverted Power"],
        &[],
    ),
    ("Shields", &["Accept Diverted Power", "Prime Shields"], &["Navigation"]),
    ("Communications", &["Accept Diverted Power", "Download Data"], &[]),
    ("Storage", &["Empty Garbage", "Empty Chute"], &[]),
    ("Admin", &["Fix Wiring", "Swipe Card", "Upload Data"], &["Cafeteria"]),
    (
        "Electrical",
        &[
            "Calibrate Distributor",
            "Divert Power",
            "Download Data",
            "Fix Wiring",
        ],
        &["Medbay", "Security"],
    ),
    (
        "Lower Engine",
        &["Accept Diverted Power", "Align Engine Output", "Fuel Engines"],
        &["Reactor"],
    ),
    (
        "Security",
        &["Accept Diverted Power", "Fix Wiring"],
        &["Electrical", "Medbay"],
    ),
    ("Reactor", &["Start Reactor", "Unlock Manifolds"], &["Upper Engine", "Lower Engine"]),
    (
        "Upper Engine",
        &["Accept Diverted Power", "Align Engine Output", "Fuel Engines"],
        &["Reactor"],
    ),
    ("Medbay", &["Inspect Sample", "Submit Scan"], &["Electrical", "Security"]),
];

/// Corridor edges, bi-directional.
const CORRIDORS: &[(&str, &str)] = &[
    ("Cafeteria", "Weapons"),
    ("Cafeteria", "Admin"),
    ("Cafeteria", "Upper Engine"),
    ("Cafeteria", "Medbay"),
    ("Weapons", "Navigation"),
    ("Weapons", "O2"),
    ("Navigation", "Shields"),
    ("O2", "Shields"),
    ("O2", "Admin"),
    ("Shields", "Communications"),
    ("Shields", "Storage"),
    ("Communications", "Storage"),
    ("Storage", "Admin"),
    ("Storage", "Electrical"),
    ("Storage", "Lower Engine"),
    ("Admin", "Electrical"),
    ("Electrical", "Lower Engine"),
    ("Lower Engine", "Security"),
    ("Lower Engine", "Reactor"),
    ("Lower Engine", "Upper Engine"),
    ("Security", "Reactor"),
    ("Security", "Upper Engine"),
    ("Reactor", "Upper Engine"),
    ("Upper Engine", "Medbay"),
    ("Medbay", "Cafeteria"),
];

/// The room everyone spawns in and where meetings are held.
pub const SPAWN_ROOM: &str = "Cafeteria";

/// Immutable adjacency view of the ship. Player occupancy is *not* stored
/// here; it is derived from each player's location field.
pub struct ShipMap {
    corridors: BTreeMap<&'static str, BTreeSet<&'static str>>,
    vents: BTreeMap<&'static str, BTreeSet<&'static str>>,
    tasks: BTreeMap<&'static str, Vec<&'static str>>,
}

impl ShipMap {
    pub fn new() -> Self {
        let mut corridors: BTreeMap<&'static str, BTreeSet<&'static str>> =
            ROOMS.iter().map(|(name, _, _)| (*name, BTreeSet::new())).collect();
        for (a, b) in CORRIDORS {
            corridors.entry(*a).or_default().insert(*b);
            corridors.entry(*b).or_default().insert(*a);
        }
        let mut vents: BTreeMap<&'static str, BTreeSet<&'static str>> =
            ROOMS.iter().map(|(name, _, _)| (*name, BTreeSet::new())).collect();
        for (name, _, vent_dests) in ROOMS {
            for dest in *vent_dests {
                vents.entry(*name).or_default().insert(*dest);
                vents.entry(*dest).or_default().insert(*name);
            }
        }
        let tasks = ROOMS
            .iter()
            .map(|(name, tasks, _)| (*name, tasks.to_vec()))
            .collect();
        Self {
            corridors,
            vents,
            tasks,
        }
    }

    pub fn is_room(&self, name: &str) -> bool {
        self.corridors.contains_key(name)
    }

    /// Canonical `&'static` name for a room, if it exists.
    pub fn canonical(&self, name: &str) -> Option<&'static str> {
        self.corridors.keys().find(|k| **k == name).copied()
    }

    pub fn corridor_adjacent(&self, from: &str, to: &str) -> bool {
        self.corridors.get(from).map(|s| s.contains(to)).unwrap_or(false)
    }

    pub fn vent_adjacent(&self, from: &str, to: &str) -> bool {
        self.vents.get(from).map(|s| s.contains(to)).unwrap_or(false)
    }

    pub fn adjacent_rooms(&self, from: &str) -> Vec<&'static str> {
        self.corridors
            .get(from)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn vent_rooms(&self, from: &str) -> Vec<&'static str> {
        self.vents
            .get(from)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn tasks_in(&self, room: &str) -> &[&'static str] {
        self.tasks.get(room).map(|t| t.as_slice()).unwrap_or(&[])
    }

    /// All `(task, room)` pairs, in deterministic room order.
    pub fn all_tasks(&self) -> Vec<(&'static str, &'static str)> {
        self.tasks
            .iter()
            .flat_map(|(room, tasks)| tasks.iter().map(|t| (*t, *room)))
            .collect()
    }

    pub fn room_names(&self) -> Vec<&'static str> {
        self.corridors.keys().copied().collect()
    }
}

impl Default for ShipMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fourteen_rooms_and_symmetric_edges() {
        let map = ShipMap::new();
        assert_eq!(map.room_names().len(), 14);
        for room in map.room_names() {
            for adj in map.adjacent_rooms(room) {
                assert!(map.corridor_adjacent(adj, room));
            }
            for vent in map.vent_rooms(room) {
                assert!(map.vent_adjacent(vent, room));
            }
        }
    }

    #[test]
    fn vents_are_not_corridors() {
        let map = ShipMap::new();
        // Cafeteria vents to Admin, which is also a corridor; Electrical
        // vents to Medbay, which is not.
        assert!(map.vent_adjacent("Cafeteria", "Admin"));
        assert!(map.vent_adjacent("Electrical", "Medbay"));
        assert!(!map.corridor_adjacent("Electrical", "Medbay"));
    }

    #[test]
    fn every_room_has_tasks() {
        let map = ShipMap::new();
        for room in map.room_names() {
            assert!(!map.tasks_in(room).is_empty());
        }
    }
}
