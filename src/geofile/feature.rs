use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;

/// Index of a feature inside its collection, in insertion order.
pub type FeatureId = usize;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    pub x: f64,
    pub y: f64,
    pub z: Option<f64>,
}

impl Vertex {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y, z: None }
    }

    pub fn new_3d(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z: Some(z) }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.map_or(true, f64::is_finite)
    }

    /// Planar distance, ignoring z.
    pub fn distance_2d(&self, other: &Vertex) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    /// Position array as used by the JSON formats: `[x, y]` or `[x, y, z]`.
    pub fn position(&self) -> Vec<f64> {
        match self.z {
            Some(z) => vec![self.x, self.y, z],
            None => vec![self.x, self.y],
        }
    }

    /// Build a vertex from a JSON position array. Returns None for fewer than two ordinates.
    pub fn from_position(position: &[f64]) -> Option<Self> {
        match position {
            [x, y] => Some(Vertex::new(*x, *y)),
            [x, y, z, ..] => Some(Vertex::new_3d(*x, *y, *z)),
            _ => None,
        }
    }
}

impl From<(f64, f64)> for Vertex {
    fn from((x, y): (f64, f64)) -> Self {
        Vertex::new(x, y)
    }
}

impl From<(f64, f64, f64)> for Vertex {
    fn from((x, y, z): (f64, f64, f64)) -> Self {
        Vertex::new_3d(x, y, z)
    }
}

/// Ordered vertices of one part of a feature: an open path or a polygon boundary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ring {
    pub vertices: Vec<Vertex>,
}

/// Rings whose end points lie closer than this are snapped shut instead of extended.
pub const CLOSING_TOLERANCE: f64 = 1e-9;

impl Ring {
    pub fn new(vertices: Vec<Vertex>) -> Self {
        Self { vertices }
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        match (self.vertices.first(), self.vertices.last()) {
            (Some(first), Some(last)) => self.vertices.len() > 1 && first == last,
            _ => false,
        }
    }

    /// Copy of this ring whose last vertex equals its first.
    pub fn closed(&self) -> Ring {
        let mut vertices = self.vertices.clone();
        if let (Some(first), Some(last)) = (vertices.first().copied(), vertices.last().copied()) {
            if vertices.len() == 1 || first != last {
                if vertices.len() > 1 && first.distance_2d(&last) <= CLOSING_TOLERANCE {
                    // Snap an almost closed ring instead of adding a near-duplicate vertex.
                    if let Some(end) = vertices.last_mut() {
                        *end = first;
                    }
                } else {
                    vertices.push(first);
                }
            }
        }
        Ring { vertices }
    }
}

impl From<Vec<Vertex>> for Ring {
    fn from(vertices: Vec<Vertex>) -> Self {
        Ring { vertices }
    }
}

impl FromIterator<Vertex> for Ring {
    fn from_iter<T: IntoIterator<Item = Vertex>>(iter: T) -> Self {
        Ring {
            vertices: iter.into_iter().collect(),
        }
    }
}

/// What the parts of a feature describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeometryKind {
    /// Every vertex of every part is a separate point.
    Point,
    /// Every part is an open path.
    Polyline,
    /// First part is the shell, the remaining parts are holes.
    Polygon,
}

impl GeometryKind {
    pub fn name(&self) -> &'static str {
        match self {
            GeometryKind::Point => "point",
            GeometryKind::Polyline => "polyline",
            GeometryKind::Polygon => "polygon",
        }
    }
}

impl fmt::Display for GeometryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Attribute value with its kind resolved once at the model boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    DateTime(DateTime<Utc>),
    Null,
}

impl AttributeValue {
    /// Text form fed to coercion; None for null.
    pub fn to_raw(&self) -> Option<String> {
        match self {
            AttributeValue::Int(value) => Some(value.to_string()),
            AttributeValue::Float(value) => Some(value.to_string()),
            AttributeValue::Bool(value) => Some(if *value { "True" } else { "False" }.to_string()),
            AttributeValue::Text(value) => Some(value.clone()),
            AttributeValue::DateTime(value) => {
                Some(value.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            AttributeValue::Null => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_raw() {
            Some(raw) => f.write_str(&raw),
            None => f.write_str("null"),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Text(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::Text(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Int(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Float(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

impl From<DateTime<Utc>> for AttributeValue {
    fn from(value: DateTime<Utc>) -> Self {
        AttributeValue::DateTime(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub id: FeatureId,
    pub kind: GeometryKind,
    pub parts: Vec<Ring>,
    /// Aligned by position with the fields of the collection's schema.
    pub attributes: Vec<AttributeValue>,
}

impl Feature {
    pub fn vertex_count(&self) -> usize {
        self.parts.iter().map(Ring::len).sum()
    }
}

/// Ordered features. Built by a single writer, then read by codecs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureCollection {
    features: Vec<Feature>,
}

impl FeatureCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a geometry tree and an attribute tree with one branch per feature.
    /// Returns None when the branch counts differ.
    pub fn from_branches(
        kind: GeometryKind,
        geometry: Vec<Vec<Ring>>,
        attributes: Vec<Vec<AttributeValue>>,
    ) -> Option<Self> {
        if geometry.len() != attributes.len() {
            return None;
        }
        let mut collection = FeatureCollection::new();
        for (parts, values) in geometry.into_iter().zip(attributes) {
            let id = collection.push_feature(kind);
            for ring in parts {
                collection.append_ring(id, ring);
            }
            for value in values {
                collection.append_attribute(id, value);
            }
        }
        Some(collection)
    }

    /// Start a new empty feature and return its id.
    pub fn push_feature(&mut self, kind: GeometryKind) -> FeatureId {
        let id = self.features.len();
        self.features.push(Feature {
            id,
            kind,
            parts: Vec::new(),
            attributes: Vec::new(),
        });
        id
    }

    /// Append a ring to an existing feature. Unknown ids are ignored.
    pub fn append_ring(&mut self, id: FeatureId, ring: Ring) {
        if let Some(feature) = self.features.get_mut(id) {
            feature.parts.push(ring);
        }
    }

    /// Append an attribute value to an existing feature. Unknown ids are ignored.
    pub fn append_attribute(&mut self, id: FeatureId, value: AttributeValue) {
        if let Some(feature) = self.features.get_mut(id) {
            feature.attributes.push(value);
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn get(&self, id: FeatureId) -> Option<&Feature> {
        self.features.get(id)
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    pub fn features_mut(&mut self) -> &mut [Feature] {
        &mut self.features
    }

    pub fn iter(&self) -> impl Iterator<Item = (FeatureId, &[Ring], &[AttributeValue])> {
        self.features
            .iter()
            .map(|feature| (feature.id, &feature.parts[..], &feature.attributes[..]))
    }

    /// Kind of the layer, taken from the first feature.
    pub fn layer_kind(&self) -> Option<GeometryKind> {
        self.features.first().map(|feature| feature.kind)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn square() -> Ring {
        vec![
            Vertex::new(0.0, 0.0),
            Vertex::new(1.0, 0.0),
            Vertex::new(1.0, 1.0),
            Vertex::new(0.0, 1.0),
        ]
        .into()
    }

    #[rstest]
    fn test_closed_appends_first_vertex() {
        let ring = square().closed();
        assert_eq!(ring.len(), 5);
        assert!(ring.is_closed());
        assert_eq!(ring.vertices[0], ring.vertices[4]);
    }

    #[rstest]
    fn test_closed_is_idempotent() {
        let once = square().closed();
        assert_eq!(once.closed(), once);
    }

    #[rstest]
    fn test_closed_snaps_nearly_closed_ring() {
        let mut ring = square();
        ring.vertices.push(Vertex::new(1e-12, 0.0));
        let closed = ring.closed();
        assert_eq!(closed.len(), 5);
        assert!(closed.is_closed());
    }

    #[rstest]
    fn test_builder_keeps_insertion_order() {
        let mut collection = FeatureCollection::new();
        let first = collection.push_feature(GeometryKind::Polygon);
        let second = collection.push_feature(GeometryKind::Polygon);
        collection.append_ring(second, square());
        collection.append_ring(first, square());
        collection.append_ring(first, square());
        collection.append_attribute(first, "a".into());

        let triples: Vec<(FeatureId, usize, usize)> = collection
            .iter()
            .map(|(id, parts, attributes)| (id, parts.len(), attributes.len()))
            .collect();
        assert_eq!(triples, vec![(0, 2, 1), (1, 1, 0)]);
        assert_eq!(collection.get(1).map(Feature::vertex_count), Some(4));
    }

    #[rstest]
    fn test_from_branches_rejects_count_mismatch() {
        let built = FeatureCollection::from_branches(
            GeometryKind::Point,
            vec![vec![Ring::new(vec![Vertex::new(0.0, 0.0)])]],
            vec![],
        );
        assert!(built.is_none());
    }

    #[rstest]
    #[case(&[1.0, 2.0], Some(Vertex::new(1.0, 2.0)))]
    #[case(&[1.0, 2.0, 3.0], Some(Vertex::new_3d(1.0, 2.0, 3.0)))]
    #[case(&[1.0], None)]
    fn test_vertex_from_position(#[case] position: &[f64], #[case] expected: Option<Vertex>) {
        assert_eq!(Vertex::from_position(position), expected);
    }
}
