use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::types::{feature_hash, DocumentId};

/// Map tile coordinate in XYZ addressing
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Tile {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

impl Tile {
    pub fn new(z: u8, x: u32, y: u32) -> Self {
        Self { z, x, y }
    }
}

impl fmt::Display for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

impl FromStr for Tile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('/');
        let (Some(z), Some(x), Some(y), None) = (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(format!("tile '{}' is not z/x/y", s));
        };
        let parse = |v: &str| v.trim().parse::<u32>().map_err(|e| format!("tile '{}': {}", s, e));
        let z = parse(z)?;
        let z = u8::try_from(z).map_err(|_| format!("tile '{}': zoom out of range", s))?;
        Ok(Tile::new(z, parse(x)?, parse(y)?))
    }
}

impl TryFrom<String> for Tile {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Tile> for String {
    fn from(tile: Tile) -> Self {
        tile.to_string()
    }
}

/// A place to index.
///
/// Only `id`, `text`, `center` and `tiles` are read by the indexer; all
/// other properties travel opaquely into the feature blob.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    /// Comma separated phrases
    #[serde(default)]
    pub text: String,
    /// `[lon, lat]`
    #[serde(default)]
    pub center: [f64; 2],
    #[serde(default)]
    pub tiles: Vec<Tile>,
    #[serde(flatten)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl Document {
    pub fn new(id: DocumentId, text: impl Into<String>) -> Self {
        Self {
            id,
            text: text.into(),
            center: [0.0, 0.0],
            tiles: Vec::new(),
            properties: serde_json::Map::new(),
        }
    }

    pub fn with_center(mut self, lon: f64, lat: f64) -> Self {
        self.center = [lon, lat];
        self
    }

    pub fn with_tiles(mut self, tiles: impl IntoIterator<Item = Tile>) -> Self {
        self.tiles.extend(tiles);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Feature cache key of this document
    pub fn hash(&self) -> u64 {
        feature_hash(self.id)
    }

    /// Non-empty phrases of `text`, trimmed
    pub fn phrases(&self) -> impl Iterator<Item = &str> {
        self.text.split(',').map(str::trim).filter(|p| !p.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tile_parse() {
        assert_eq!("6/32/31".parse::<Tile>().unwrap(), Tile::new(6, 32, 31));
        assert!("6/32".parse::<Tile>().is_err());
        assert!("6/32/31/1".parse::<Tile>().is_err());
        assert!("a/b/c".parse::<Tile>().is_err());
        assert!("300/1/1".parse::<Tile>().is_err());
    }

    #[test]
    fn test_document_deserialize_keeps_properties() {
        let doc: Document = serde_json::from_value(json!({
            "id": 12,
            "text": "Main Street, Main St",
            "center": [-77.03, 38.9],
            "tiles": ["14/4688/6267"],
            "population": 12000,
            "wikidata": "Q61"
        }))
        .unwrap();

        assert_eq!(doc.id, 12);
        assert_eq!(doc.tiles, vec![Tile::new(14, 4688, 6267)]);
        assert_eq!(doc.properties.get("population"), Some(&json!(12000)));
        assert_eq!(doc.phrases().collect::<Vec<_>>(), vec!["Main Street", "Main St"]);

        let back = serde_json::to_value(&doc).unwrap();
        assert_eq!(back["tiles"], json!(["14/4688/6267"]));
        assert_eq!(back["wikidata"], json!("Q61"));
    }

    #[test]
    fn test_missing_text_has_no_phrases() {
        let doc: Document = serde_json::from_value(json!({ "id": 1 })).unwrap();
        assert_eq!(doc.phrases().count(), 0);
        let doc = Document::new(2, " , ,");
        assert_eq!(doc.phrases().count(), 0);
    }
}
