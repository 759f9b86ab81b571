use geo::Area;
use rayon::prelude::*;

use crate::{
    error::GeometryBuildError,
    geofile::{
        feature::{AttributeValue, Feature, FeatureId, GeometryKind, Ring},
        schema::FieldSchema,
    },
};

use super::{
    coercion::coerce_or_warn,
    diagnostics::{Diagnostics, Warning},
};

/// A feature that passed validation, with attributes coerced to the schema.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedFeature {
    pub id: FeatureId,
    pub kind: GeometryKind,
    /// Polygon rings are closed.
    pub parts: Vec<Ring>,
    /// One value per schema field.
    pub values: Vec<AttributeValue>,
}

impl PreparedFeature {
    pub fn vertex_count(&self) -> usize {
        self.parts.iter().map(Ring::len).sum()
    }
}

/// Prepare every feature for an encoder: check geometry, close rings, align the
/// attribute row with the schema and coerce it. Features that fail are skipped with a
/// warning. Work runs in parallel and results keep their original order.
///
/// When `layer_kind` is set, features of another kind are rejected, as formats with a
/// single geometry type per file require.
pub fn prepare_features(
    features: &[Feature],
    schema: &FieldSchema,
    layer_kind: Option<GeometryKind>,
    diagnostics: &mut Diagnostics,
) -> Vec<PreparedFeature> {
    let results: Vec<(Option<PreparedFeature>, Vec<Warning>)> = features
        .par_iter()
        .map(|feature| prepare_feature(feature, schema, layer_kind))
        .collect();

    let mut prepared = Vec::with_capacity(results.len());
    for (feature, warnings) in results {
        diagnostics.extend_logged(warnings);
        if let Some(feature) = feature {
            prepared.push(feature);
        }
    }
    log::debug!(
        "Prepared {} of {} features",
        prepared.len(),
        features.len()
    );
    prepared
}

fn prepare_feature(
    feature: &Feature,
    schema: &FieldSchema,
    layer_kind: Option<GeometryKind>,
) -> (Option<PreparedFeature>, Vec<Warning>) {
    let mut warnings = Vec::new();

    let parts = match build_parts(feature, layer_kind) {
        Ok(parts) => parts,
        Err(err) => {
            let warning = Warning::feature(feature.id, format!("skipped: {}", err));
            log::warn!("{}", warning);
            warnings.push(warning);
            return (None, warnings);
        }
    };

    let values = align_attributes(feature, schema, &mut warnings);
    (
        Some(PreparedFeature {
            id: feature.id,
            kind: feature.kind,
            parts,
            values,
        }),
        warnings,
    )
}

/// Validate the geometry of a feature and close its polygon rings.
pub fn build_parts(
    feature: &Feature,
    layer_kind: Option<GeometryKind>,
) -> Result<Vec<Ring>, GeometryBuildError> {
    if let Some(layer_kind) = layer_kind {
        if feature.kind != layer_kind {
            return Err(GeometryBuildError::KindMismatch {
                kind: feature.kind.to_string(),
                layer: layer_kind.to_string(),
            });
        }
    }
    if feature.vertex_count() == 0 {
        return Err(GeometryBuildError::Empty);
    }
    for (part, ring) in feature.parts.iter().enumerate() {
        if !ring.vertices.iter().all(|vertex| vertex.is_finite()) {
            return Err(GeometryBuildError::NonFinite { part });
        }
    }

    match feature.kind {
        GeometryKind::Point => Ok(feature
            .parts
            .iter()
            .filter(|ring| !ring.is_empty())
            .cloned()
            .collect()),
        GeometryKind::Polyline => {
            for (part, path) in feature.parts.iter().enumerate() {
                if path.len() < 2 {
                    return Err(GeometryBuildError::TooFewPathVertices {
                        part,
                        count: path.len(),
                    });
                }
            }
            Ok(feature.parts.clone())
        }
        GeometryKind::Polygon => feature
            .parts
            .iter()
            .enumerate()
            .map(|(index, ring)| close_polygon_ring(index, ring))
            .collect(),
    }
}

/// Close a polygon ring and check it can bound an area.
pub fn close_polygon_ring(index: usize, ring: &Ring) -> Result<Ring, GeometryBuildError> {
    let closed = ring.closed();
    if closed.len() < 4 {
        return Err(GeometryBuildError::TooFewRingVertices {
            ring: index,
            count: closed.len(),
        });
    }
    let boundary: geo::LineString = closed
        .vertices
        .iter()
        .map(|vertex| (vertex.x, vertex.y))
        .collect();
    if geo::Polygon::new(boundary, vec![]).unsigned_area() == 0.0 {
        return Err(GeometryBuildError::DegenerateRing { ring: index });
    }
    Ok(closed)
}

fn align_attributes(
    feature: &Feature,
    schema: &FieldSchema,
    warnings: &mut Vec<Warning>,
) -> Vec<AttributeValue> {
    let expected = schema.len();
    let found = feature.attributes.len();
    if found != expected {
        let message = if found == 0 {
            format!(
                "no attribute values for {} fields; attributes left empty",
                expected
            )
        } else if found < expected {
            format!(
                "{} attribute values for {} fields; missing values set to NULL",
                found, expected
            )
        } else {
            format!(
                "{} attribute values for {} fields; extra values ignored",
                found, expected
            )
        };
        let warning = Warning::feature(feature.id, message);
        log::warn!("{}", warning);
        warnings.push(warning);
    }

    schema
        .fields
        .iter()
        .enumerate()
        .map(|(index, field)| match feature.attributes.get(index) {
            Some(value) => {
                let (coerced, warning) =
                    coerce_or_warn(value, &field.name, field.field_type, feature.id);
                warnings.extend(warning);
                coerced
            }
            None => AttributeValue::Null,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::{
        convert::diagnostics::WarningScope,
        geofile::{
            feature::{FeatureCollection, Vertex},
            schema::{Field, FieldType},
        },
    };

    fn ring(points: &[(f64, f64)]) -> Ring {
        points.iter().map(|&point| Vertex::from(point)).collect()
    }

    fn feature(kind: GeometryKind, parts: Vec<Ring>, attributes: Vec<AttributeValue>) -> Feature {
        Feature {
            id: 0,
            kind,
            parts,
            attributes,
        }
    }

    #[rstest]
    fn test_polygon_rings_are_closed() {
        let parts = build_parts(
            &feature(
                GeometryKind::Polygon,
                vec![ring(&[(0.0, 0.0), (4.0, 0.0), (4.0, 4.0), (0.0, 4.0)])],
                vec![],
            ),
            None,
        )
        .unwrap();
        assert_eq!(parts[0].len(), 5);
        assert!(parts[0].is_closed());
    }

    #[rstest]
    #[case(vec![ring(&[(0.0, 0.0), (1.0, 0.0)])])]
    #[case(vec![ring(&[(0.0, 0.0), (1.0, 0.0), (2.0, 0.0)])])]
    #[case(vec![])]
    fn test_degenerate_polygons_are_rejected(#[case] parts: Vec<Ring>) {
        assert!(build_parts(&feature(GeometryKind::Polygon, parts, vec![]), None).is_err());
    }

    #[rstest]
    fn test_short_polyline_is_rejected() {
        let result = build_parts(
            &feature(GeometryKind::Polyline, vec![ring(&[(0.0, 0.0)])], vec![]),
            None,
        );
        assert!(matches!(
            result,
            Err(GeometryBuildError::TooFewPathVertices { part: 0, count: 1 })
        ));
    }

    #[rstest]
    fn test_kind_mismatch_is_rejected() {
        let result = build_parts(
            &feature(GeometryKind::Point, vec![ring(&[(0.0, 0.0)])], vec![]),
            Some(GeometryKind::Polygon),
        );
        assert!(matches!(result, Err(GeometryBuildError::KindMismatch { .. })));
    }

    #[rstest]
    fn test_one_bad_value_gives_one_warning_and_keeps_all_features() {
        let schema = FieldSchema::new(vec![
            Field::new("name", FieldType::String),
            Field::new("area", FieldType::Double),
        ]);
        let mut collection = FeatureCollection::new();
        for index in 0..5 {
            let id = collection.push_feature(GeometryKind::Point);
            collection.append_ring(id, ring(&[(index as f64, 0.0)]));
            collection.append_attribute(id, AttributeValue::Text(format!("f{}", index)));
            let area = if index == 3 { "abc".to_string() } else { format!("{}.5", index) };
            collection.append_attribute(id, AttributeValue::Text(area));
        }

        let mut diagnostics = Diagnostics::new();
        let prepared = prepare_features(collection.features(), &schema, None, &mut diagnostics);

        assert_eq!(prepared.len(), 5);
        assert_eq!(prepared[3].values[1], AttributeValue::Null);
        assert_eq!(prepared[2].values[1], AttributeValue::Float(2.5));
        assert_eq!(diagnostics.len(), 1);
        let warning = &diagnostics.warnings()[0];
        assert_eq!(warning.scope, WarningScope::Value);
        assert_eq!(warning.feature, Some(3));
        assert_eq!(warning.field.as_deref(), Some("area"));
    }

    #[rstest]
    fn test_missing_attribute_row_is_warned_and_nulled() {
        let schema = FieldSchema::new(vec![
            Field::new("a", FieldType::String),
            Field::new("b", FieldType::Int32),
        ]);
        let features = vec![feature(
            GeometryKind::Point,
            vec![ring(&[(1.0, 1.0)])],
            vec![],
        )];
        let mut diagnostics = Diagnostics::new();
        let prepared = prepare_features(&features, &schema, None, &mut diagnostics);
        assert_eq!(prepared[0].values, vec![AttributeValue::Null, AttributeValue::Null]);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics.warnings()[0].scope, WarningScope::Feature);
    }
}
