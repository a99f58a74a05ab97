//! Region-name and coordinate lookup over the static location table.
//!
//! Pure lookup logic: no I/O, no runtime state. The table is compiled in and
//! immutable for the process lifetime.

mod table;

use std::collections::HashSet;

pub use table::{DistrictEntry, ProvinceEntry, LOCATION_TABLE};
use table::PROVINCE_ALIASES;

/// Fallback cell when the table has nothing to offer (central Seoul). An
/// empty table is a configuration error; the nearest-neighbor path still
/// returns a usable cell rather than failing.
const DEFAULT_CELL: Cell = Cell { nx: 60, ny: 127 };

/// A grid coordinate pair in the provider's native addressing scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cell {
    pub nx: i64,
    pub ny: i64,
}

impl std::fmt::Display for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{})", self.nx, self.ny)
    }
}

/// A distinct grid cell to poll, tagged with the first region that maps to
/// it. Several regions may collapse onto one cell; the poll happens once and
/// the stored row carries these representative names.
#[derive(Debug, Clone)]
pub struct PollCell {
    pub cell: Cell,
    pub province: String,
    pub district: String,
}

/// A region name successfully resolved against the table.
#[derive(Debug, Clone)]
pub struct ResolvedLocation {
    pub province: &'static str,
    pub district: Option<&'static str>,
    pub lat: f64,
    pub lon: f64,
    pub cell: Cell,
}

/// The deduplicated set of distinct grid cells across the whole table, in
/// table order. Deterministic: the same table always yields the same list.
pub fn cells_to_poll() -> Vec<PollCell> {
    let mut seen = HashSet::new();
    let mut cells = Vec::new();
    for province in LOCATION_TABLE {
        for district in province.districts {
            let cell = Cell {
                nx: district.nx,
                ny: district.ny,
            };
            if !seen.insert(cell) {
                continue;
            }
            cells.push(PollCell {
                cell,
                province: province.name.to_string(),
                district: district.name.unwrap_or_default().to_string(),
            });
        }
    }
    cells
}

/// Looks a cell up by administrative name, tolerating common variants.
/// District matching runs three passes over the province's entries (exact,
/// prefix with the 구/군/시 suffix stripped, then space-insensitive
/// lowercase) and the first hit wins. Returns `None` when nothing matches.
pub fn resolve(province: &str, district: Option<&str>) -> Option<ResolvedLocation> {
    let entry = canonical_province(province)?;
    let district = district.map(str::trim).filter(|s| !s.is_empty());

    let Some(name) = district else {
        // Unitary regions: a lone entry, or the one without a district name.
        let single = match entry.districts {
            [only] => Some(only),
            list => list.iter().find(|d| d.name.is_none()),
        };
        return single.map(|d| located(entry, d));
    };

    let wanted = compact(name);
    let candidate = if wanted.ends_with(['구', '군', '시']) {
        wanted.clone()
    } else {
        // Bare stems are most often districts ("강남" -> "강남구").
        format!("{wanted}구")
    };

    if let Some(found) = entry
        .districts
        .iter()
        .find(|d| d.name == Some(name) || d.name.map(compact).as_deref() == Some(candidate.as_str()))
    {
        return Some(located(entry, found));
    }

    let stem = wanted.trim_end_matches(['구', '군', '시']);
    if !stem.is_empty() {
        if let Some(found) = entry
            .districts
            .iter()
            .find(|d| d.name.is_some_and(|n| n.starts_with(stem)))
        {
            return Some(located(entry, found));
        }
    }

    let loose = wanted.to_lowercase();
    entry
        .districts
        .iter()
        .find(|d| d.name.is_some_and(|n| compact(n).to_lowercase() == loose))
        .map(|d| located(entry, d))
}

/// Grid cell of the table entry closest to the given coordinates, by
/// Euclidean distance in lat/lon space. Total by design: an empty table
/// yields the fixed default cell.
pub fn nearest(lat: f64, lon: f64) -> Cell {
    let mut best: Option<(f64, Cell)> = None;
    for province in LOCATION_TABLE {
        for district in province.districts {
            let dist = (lat - district.lat).powi(2) + (lon - district.lon).powi(2);
            match best {
                Some((min, _)) if dist >= min => {}
                _ => {
                    best = Some((
                        dist,
                        Cell {
                            nx: district.nx,
                            ny: district.ny,
                        },
                    ));
                }
            }
        }
    }
    best.map(|(_, cell)| cell).unwrap_or(DEFAULT_CELL)
}

fn canonical_province(raw: &str) -> Option<&'static ProvinceEntry> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let key = compact(trimmed);
    let canonical = PROVINCE_ALIASES
        .iter()
        .find(|(alias, _)| *alias == trimmed || *alias == key)
        .map(|(_, full)| *full)
        .unwrap_or(&key);
    LOCATION_TABLE
        .iter()
        .find(|p| p.name == canonical || p.name == trimmed)
}

fn compact(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

fn located(province: &'static ProvinceEntry, district: &'static DistrictEntry) -> ResolvedLocation {
    ResolvedLocation {
        province: province.name,
        district: district.name,
        lat: district.lat,
        lon: district.lon,
        cell: Cell {
            nx: district.nx,
            ny: district.ny,
        },
    }
}
