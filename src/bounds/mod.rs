//! Geographic bounds of indexes and the pairwise mask of indexes that can
//! never co-match because their bounds do not overlap.

use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};

use crate::config::MAX_ZOOM;

/// Longitude used when clipping a box at the antimeridian
const ANTIMERIDIAN_CLIP: f64 = 179.9;

/// Latitude limit of web mercator tiles
const MERCATOR_MAX_LAT: f64 = 85.051_128_779_806_59;

/// Axis aligned box `[min_lon, min_lat, max_lon, max_lat]`
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BBox {
    pub const WORLD: BBox = BBox {
        min_lon: -180.0,
        min_lat: -90.0,
        max_lon: 180.0,
        max_lat: 90.0,
    };

    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        }
    }

    /// Overlap test. Boxes that only share an edge intersect.
    pub fn intersects(&self, other: &BBox) -> bool {
        !(self.min_lon > other.max_lon
            || self.max_lon < other.min_lon
            || self.min_lat > other.max_lat
            || self.max_lat < other.min_lat)
    }

    /// Whether a `(lon, lat)` point lies inside or on the edge of the box.
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        !(lon < self.min_lon || lon > self.max_lon || lat < self.min_lat || lat > self.max_lat)
    }

    /// Smallest box covering both
    pub fn union(&self, other: &BBox) -> BBox {
        BBox {
            min_lon: self.min_lon.min(other.min_lon),
            min_lat: self.min_lat.min(other.min_lat),
            max_lon: self.max_lon.max(other.max_lon),
            max_lat: self.max_lat.max(other.max_lat),
        }
    }

    /// A box with `min_lon > max_lon` wraps the antimeridian. Keep its
    /// larger side, clipped at ±179.9.
    pub fn clip_antimeridian(&self) -> BBox {
        let mut clipped = *self;
        if self.min_lon <= self.max_lon {
            return clipped;
        }
        if self.min_lon.abs() > self.max_lon.abs() {
            clipped.min_lon = -ANTIMERIDIAN_CLIP;
        } else {
            clipped.max_lon = ANTIMERIDIAN_CLIP;
        }
        clipped
    }

    /// XYZ tile range `(min_x, min_y, max_x, max_y)` covering the box at
    /// `zoom`. Zooms above `MAX_ZOOM` are clamped.
    pub fn tile_range(&self, zoom: u8) -> (u32, u32, u32, u32) {
        let (min_x, max_y) = lon_lat_to_tile(self.min_lon, self.min_lat, zoom);
        let (max_x, min_y) = lon_lat_to_tile(self.max_lon, self.max_lat, zoom);
        (min_x, min_y, max_x, max_y)
    }
}

impl Default for BBox {
    fn default() -> Self {
        BBox::WORLD
    }
}

impl From<[f64; 4]> for BBox {
    fn from(v: [f64; 4]) -> Self {
        BBox::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BBox> for [f64; 4] {
    fn from(b: BBox) -> Self {
        [b.min_lon, b.min_lat, b.max_lon, b.max_lat]
    }
}

fn lon_lat_to_tile(lon: f64, lat: f64, zoom: u8) -> (u32, u32) {
    let zoom = zoom.min(MAX_ZOOM);
    let n = f64::from(1u32 << zoom);
    let max = (1u32 << zoom) - 1;
    let lat = lat.clamp(-MERCATOR_MAX_LAT, MERCATOR_MAX_LAT).to_radians();
    let x = ((lon + 180.0) / 360.0 * n).floor();
    let y = ((1.0 - (lat.tan() + 1.0 / lat.cos()).ln() / std::f64::consts::PI) / 2.0 * n).floor();
    let clamp = |v: f64| (v.max(0.0) as u32).min(max);
    (clamp(x), clamp(y))
}

/// Pairwise "cannot co-match" relation over a list of indexes.
///
/// Bit `j` of row `i` is set iff the bounds of `i` and `j` do not intersect.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BoundsMask {
    rows: Vec<RoaringBitmap>,
}

impl BoundsMask {
    /// O(n²) pass over all pairs. The self bit is never set.
    pub fn compute(bounds: &[BBox]) -> Self {
        let mut rows = vec![RoaringBitmap::new(); bounds.len()];
        for i in 0..bounds.len() {
            for j in (i + 1)..bounds.len() {
                if !bounds[i].intersects(&bounds[j]) {
                    rows[i].insert(j as u32);
                    rows[j].insert(i as u32);
                }
            }
        }
        Self { rows }
    }

    /// True when indexes `i` and `j` cannot spatially co-match.
    pub fn is_masked(&self, i: usize, j: usize) -> bool {
        self.rows
            .get(i)
            .map(|row| row.contains(j as u32))
            .unwrap_or(false)
    }

    pub fn row(&self, i: usize) -> Option<&RoaringBitmap> {
        self.rows.get(i)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Named indexes with their bounds and the mask derived from them.
#[derive(Clone, Debug, Default)]
pub struct IndexSet {
    names: Vec<String>,
    bounds: Vec<BBox>,
    mask: BoundsMask,
}

impl IndexSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an index, then recompute the mask.
    pub fn insert(&mut self, name: impl Into<String>, bounds: BBox) -> usize {
        let name = name.into();
        let idx = match self.position(&name) {
            Some(idx) => {
                self.bounds[idx] = bounds;
                idx
            }
            None => {
                self.names.push(name);
                self.bounds.push(bounds);
                self.names.len() - 1
            }
        };
        self.mask = BoundsMask::compute(&self.bounds);
        idx
    }

    /// Remove an index; later indexes shift down by one.
    pub fn remove(&mut self, name: &str) -> bool {
        let Some(idx) = self.position(name) else {
            return false;
        };
        self.names.remove(idx);
        self.bounds.remove(idx);
        self.mask = BoundsMask::compute(&self.bounds);
        true
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn mask(&self) -> &BoundsMask {
        &self.mask
    }

    /// Whether a query result from `a` may be stacked with one from `b`.
    pub fn can_co_match(&self, a: &str, b: &str) -> bool {
        match (self.position(a), self.position(b)) {
            (Some(i), Some(j)) => !self.mask.is_masked(i, j),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxes() -> Vec<BBox> {
        vec![
            BBox::new(-125.0, 24.0, -66.0, 49.0), // us
            BBox::new(-141.0, 41.0, -52.0, 83.0), // ca
            BBox::new(5.8, 47.2, 15.0, 55.1),     // de
            BBox::WORLD,
            BBox::new(-66.0, 10.0, -60.0, 24.0), // touches us corner
        ]
    }

    #[test]
    fn test_intersects() {
        let b = boxes();
        assert!(b[0].intersects(&b[1]));
        assert!(!b[0].intersects(&b[2]));
        assert!(b[2].intersects(&b[3]));
        assert!(b[0].intersects(&b[4]));
    }

    #[test]
    fn test_mask_symmetric_with_clear_diagonal() {
        let b = boxes();
        let mask = BoundsMask::compute(&b);
        assert_eq!(mask.len(), b.len());
        for i in 0..b.len() {
            assert!(!mask.is_masked(i, i));
            for j in 0..b.len() {
                assert_eq!(mask.is_masked(i, j), mask.is_masked(j, i));
                assert_eq!(mask.is_masked(i, j), i != j && !b[i].intersects(&b[j]));
            }
        }
        assert!(mask.is_masked(0, 2));
        assert!(!mask.is_masked(0, 3));
    }

    #[test]
    fn test_index_set_recomputes() {
        let mut set = IndexSet::new();
        set.insert("us", BBox::new(-125.0, 24.0, -66.0, 49.0));
        set.insert("de", BBox::new(5.8, 47.2, 15.0, 55.1));
        assert!(!set.can_co_match("us", "de"));

        set.insert("de", BBox::WORLD);
        assert!(set.can_co_match("us", "de"));

        set.insert("fr", BBox::new(-5.0, 41.0, 9.6, 51.1));
        assert!(!set.can_co_match("us", "fr"));
        assert!(set.remove("us"));
        assert_eq!(set.position("fr"), Some(1));
        assert!(set.can_co_match("de", "fr"));
        assert!(!set.remove("us"));
    }

    #[test]
    fn test_clip_antimeridian() {
        let fiji = BBox::new(177.0, -20.0, -178.0, -16.0);
        let clipped = fiji.clip_antimeridian();
        assert_eq!(clipped.min_lon, 177.0);
        assert_eq!(clipped.max_lon, 179.9);

        let wide_west = BBox::new(170.0, 50.0, -175.0, 60.0);
        assert_eq!(wide_west.clip_antimeridian().max_lon, 179.9);

        let wide_east = BBox::new(-179.5, 0.0, -179.0, 1.0).clip_antimeridian();
        assert_eq!(wide_east.min_lon, -179.5);

        let plain = BBox::new(0.0, 0.0, 1.0, 1.0);
        assert_eq!(plain.clip_antimeridian(), plain);

        let zero_width = BBox::new(10.0, 0.0, 10.0, 1.0);
        assert_eq!(zero_width.clip_antimeridian(), zero_width);
    }

    #[test]
    fn test_contains_and_tile_range() {
        let b = BBox::new(-10.0, -10.0, 10.0, 10.0);
        assert!(b.contains(10.0, -10.0));
        assert!(!b.contains(10.1, 0.0));

        assert_eq!(BBox::WORLD.tile_range(0), (0, 0, 0, 0));
        assert_eq!(BBox::WORLD.tile_range(2), (0, 0, 3, 3));
        let top = (1u32 << MAX_ZOOM) - 1;
        assert_eq!(BBox::WORLD.tile_range(40), (0, 0, top, top));
        assert_eq!(BBox::WORLD.tile_range(u8::MAX), BBox::WORLD.tile_range(MAX_ZOOM));
        let (min_x, min_y, max_x, max_y) = b.tile_range(1);
        assert_eq!((min_x, max_x), (0, 1));
        assert_eq!((min_y, max_y), (0, 1));
    }

    #[test]
    fn test_bbox_serde_as_array() {
        let b: BBox = serde_json::from_str("[-1.5, 2, 3, 4]").unwrap();
        assert_eq!(b, BBox::new(-1.5, 2.0, 3.0, 4.0));
        assert_eq!(serde_json::to_string(&b).unwrap(), "[-1.5,2.0,3.0,4.0]");
    }
}
