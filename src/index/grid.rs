//! Grid cells: one covered tile of one feature, packed into a `u64`.
//!
//! Layout from the high bits: zoom (4), x (14), TMS y (14), feature hash (20).

use crate::config::MAX_ZOOM;
use crate::models::Tile;

const Z_BITS: u32 = 4;
const XY_BITS: u32 = 14;
const ID_BITS: u32 = 20;

const ID_MASK: u64 = (1 << ID_BITS) - 1;
const XY_MASK: u64 = (1 << XY_BITS) - 1;
const Z_MASK: u64 = (1 << Z_BITS) - 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridCell {
    pub z: u8,
    pub x: u32,
    /// TMS row (`2^z - 1 - y` of the XYZ tile)
    pub y: u32,
    pub id: u64,
}

impl GridCell {
    /// Cell for an XYZ tile owned by feature hash `id`. `None` if the tile is
    /// outside the range of its zoom or deeper than the encodable zoom.
    pub fn from_tile(tile: &Tile, id: u64) -> Option<Self> {
        if tile.z > MAX_ZOOM {
            return None;
        }
        let size = 1u32 << tile.z;
        if tile.x >= size || tile.y >= size {
            return None;
        }
        Some(Self {
            z: tile.z,
            x: tile.x,
            y: size - 1 - tile.y,
            id: id & ID_MASK,
        })
    }

    pub fn encode(&self) -> u64 {
        (u64::from(self.z) << (2 * XY_BITS + ID_BITS))
            | (u64::from(self.x) << (XY_BITS + ID_BITS))
            | (u64::from(self.y) << ID_BITS)
            | self.id
    }

    pub fn decode(raw: u64) -> Self {
        Self {
            z: ((raw >> (2 * XY_BITS + ID_BITS)) & Z_MASK) as u8,
            x: ((raw >> (XY_BITS + ID_BITS)) & XY_MASK) as u32,
            y: ((raw >> ID_BITS) & XY_MASK) as u32,
            id: raw & ID_MASK,
        }
    }

    /// XYZ tile this cell covers
    pub fn tile(&self) -> Tile {
        let size = 1u32 << self.z;
        Tile::new(self.z, self.x, size - 1 - self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tms_inversion() {
        let cell = GridCell::from_tile(&Tile::new(2, 1, 0), 9).unwrap();
        assert_eq!(cell.y, 3);
        assert_eq!(cell.tile(), Tile::new(2, 1, 0));
    }

    #[test]
    fn test_encode_decode() {
        let cell = GridCell::from_tile(&Tile::new(14, 16383, 5), (1 << 20) - 1).unwrap();
        let decoded = GridCell::decode(cell.encode());
        assert_eq!(decoded, cell);
        let zero = GridCell::from_tile(&Tile::new(0, 0, 0), 0).unwrap();
        assert_eq!(zero.encode(), 0);
    }

    #[test]
    fn test_rejects_out_of_range_tiles() {
        assert!(GridCell::from_tile(&Tile::new(15, 0, 0), 1).is_none());
        assert!(GridCell::from_tile(&Tile::new(3, 8, 0), 1).is_none());
        assert!(GridCell::from_tile(&Tile::new(3, 0, 8), 1).is_none());
    }

    #[test]
    fn test_encoding_orders_by_zoom_first() {
        let low = GridCell::from_tile(&Tile::new(1, 1, 1), 5).unwrap().encode();
        let high = GridCell::from_tile(&Tile::new(2, 0, 3), 0).unwrap().encode();
        assert!(low < high);
    }
}
