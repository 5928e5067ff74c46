//! Static world and zone name tables.
//!
//! Ids and names follow the Census territory listing. A miss is not an
//! error: callers get `None` and render a placeholder.

use crate::event::{WorldId, ZoneId};

/// Worlds relayed by default: Connery, Miller, Cobalt, Emerald, SolTech.
pub const WORLDS: &[(&str, &str)] = &[
    ("1", "Connery"),
    ("10", "Miller"),
    ("13", "Cobalt"),
    ("17", "Emerald"),
    ("40", "SolTech"),
];

/// Continents that run alerts: Indar, Hossin, Amerish, Esamir.
pub const ZONES: &[(&str, &str)] = &[
    ("2", "Indar"),
    ("4", "Hossin"),
    ("6", "Amerish"),
    ("8", "Esamir"),
];

pub fn world_name(id: &WorldId) -> Option<&'static str> {
    lookup(WORLDS, id.as_str())
}

pub fn zone_name(id: &ZoneId) -> Option<&'static str> {
    lookup(ZONES, id.as_str())
}

/// All world ids in the table, in table order.
pub fn default_worlds() -> Vec<WorldId> {
    WORLDS.iter().map(|(id, _)| WorldId::from(*id)).collect()
}

/// All zone ids in the table, in table order.
pub fn default_zones() -> Vec<ZoneId> {
    ZONES.iter().map(|(id, _)| ZoneId::from(*id)).collect()
}

fn lookup(table: &[(&str, &'static str)], id: &str) -> Option<&'static str> {
    table.iter().find(|(k, _)| *k == id).map(|(_, name)| *name)
}
