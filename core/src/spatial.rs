//! Spatial binner: offense locations onto a fixed hexagon grid.
//!
//! The grid is pointy-top, laid in an equirectangular projection centred
//! on the grid origin (longitude scaled by cos(origin latitude), so a cell
//! is roughly regular on the ground). Cells are addressed in odd-row
//! offset coordinates: `col` in `0..columns`, `row` in `0..rows`.
//!
//! RULE: a point outside the grid has no cell. Only resolved coordinates
//! are binned; the geocoding sentinel never reaches this module.

use crate::{
    config::HexGridConfig,
    geocode::case_address,
    record::CaseRow,
    types::{CategoryFilter, Coordinate, Stage, Year},
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

const SQRT_3: f64 = 1.732_050_807_568_877_2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HexCell {
    pub col: u32,
    pub row: u32,
}

/// Maps a coordinate to a grid cell, or to nothing.
pub trait SpatialIndex {
    fn cell_of(&self, point: Coordinate) -> Option<HexCell>;
    fn center_of(&self, cell: HexCell) -> Coordinate;
}

#[derive(Debug, Clone)]
pub struct HexGrid {
    origin: Coordinate,
    size: f64,
    columns: u32,
    rows: u32,
    lon_scale: f64,
}

impl HexGrid {
    pub fn new(config: &HexGridConfig) -> Self {
        Self {
            origin: config.origin,
            size: config.cell_size_deg,
            columns: config.columns,
            rows: config.rows,
            lon_scale: config.origin.latitude.to_radians().cos(),
        }
    }

    pub fn cell_count(&self) -> usize {
        self.columns as usize * self.rows as usize
    }

    fn project(&self, point: Coordinate) -> (f64, f64) {
        (
            (point.longitude - self.origin.longitude) * self.lon_scale,
            point.latitude - self.origin.latitude,
        )
    }
}

/// Round fractional axial coordinates to the containing hexagon.
fn axial_round(q: f64, r: f64) -> (i64, i64) {
    let s = -q - r;
    let (mut rq, mut rr, rs) = (q.round(), r.round(), s.round());
    let dq = (rq - q).abs();
    let dr = (rr - r).abs();
    let ds = (rs - s).abs();
    if dq > dr && dq > ds {
        rq = -rr - rs;
    } else if dr > ds {
        rr = -rq - rs;
    }
    (rq as i64, rr as i64)
}

impl SpatialIndex for HexGrid {
    fn cell_of(&self, point: Coordinate) -> Option<HexCell> {
        if !point.latitude.is_finite() || !point.longitude.is_finite() {
            return None;
        }
        let (x, y) = self.project(point);
        let q = (SQRT_3 / 3.0 * x - y / 3.0) / self.size;
        let r = (2.0 / 3.0 * y) / self.size;
        let (q, r) = axial_round(q, r);

        let col = q + (r - (r & 1)) / 2;
        let row = r;
        if col < 0 || row < 0 || col >= i64::from(self.columns) || row >= i64::from(self.rows) {
            return None;
        }
        Some(HexCell {
            col: col as u32,
            row: row as u32,
        })
    }

    fn center_of(&self, cell: HexCell) -> Coordinate {
        let r = i64::from(cell.row);
        let q = i64::from(cell.col) - (r - (r & 1)) / 2;
        let x = self.size * (SQRT_3 * q as f64 + SQRT_3 / 2.0 * r as f64);
        let y = self.size * 1.5 * r as f64;
        Coordinate::new(
            self.origin.latitude + y,
            self.origin.longitude + x / self.lon_scale,
        )
    }
}

/// Cases of one (year, category, stage) cohort in one cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HexCount {
    pub year: Year,
    pub category: String,
    pub stage: String,
    pub col: u32,
    pub row: u32,
    pub center_lat: f64,
    pub center_lon: f64,
    pub count: u64,
}

/// Count the distinct cases of `rows` per hex cell.
///
/// `coordinates` is keyed by normalised address and holds resolved
/// points only. Rows without an address, without a coordinate, or off
/// the grid are not counted.
/// Only cells holding at least one case are returned, in cell order.
pub fn bin_cases(
    index: &dyn SpatialIndex,
    rows: &[&CaseRow],
    coordinates: &HashMap<String, Coordinate>,
    year: Year,
    category: &CategoryFilter,
    stage: Stage,
) -> Vec<HexCount> {
    let mut cells: BTreeMap<HexCell, BTreeSet<&str>> = BTreeMap::new();
    for row in rows {
        let Some(address) = case_address(row) else {
            continue;
        };
        let Some(point) = coordinates.get(&address) else {
            continue;
        };
        if let Some(cell) = index.cell_of(*point) {
            cells.entry(cell).or_default().insert(row.file_number.as_str());
        }
    }
    cells
        .into_iter()
        .map(|(cell, cases)| {
            let center = index.center_of(cell);
            HexCount {
                year,
                category: category.report_label(),
                stage: stage.label().to_string(),
                col: cell.col,
                row: cell.row,
                center_lat: center.latitude,
                center_lon: center.longitude,
                count: cases.len() as u64,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axial_round_snaps_to_nearest_hex() {
        assert_eq!(axial_round(0.1, -0.1), (0, 0));
        assert_eq!(axial_round(0.9, 0.05), (1, 0));
        assert_eq!(axial_round(-0.2, 1.1), (0, 1));
    }
}
