use chrono::SecondsFormat;
use geojson::JsonObject;
use serde_json::Value as JsonValue;

use crate::{
    convert::{
        diagnostics::{Diagnostics, Warning},
        prepare::{prepare_features, PreparedFeature},
    },
    error::{ConversionError, GeometryBuildError},
    geofile::{
        feature::{AttributeValue, FeatureCollection, GeometryKind, Ring, Vertex},
        schema::{Field, FieldSchema, FieldType},
        DecodeOptions, DecodedLayer, Encoded,
    },
};

#[derive(Debug, Clone, Copy, Default)]
pub struct GeoJsonOptions {
    /// Indent the output. Cosmetic only.
    pub pretty: bool,
}

/// Encode `collection` as a GeoJSON FeatureCollection.
///
/// Features whose geometry cannot be built are skipped with a warning. Attribute values
/// that fail to coerce to their field type are written as null.
pub fn encode(
    collection: &FeatureCollection,
    schema: &FieldSchema,
    options: &GeoJsonOptions,
    diagnostics: &mut Diagnostics,
) -> Result<Encoded<String>, ConversionError> {
    let prepared = prepare_features(collection.features(), schema, None, diagnostics);
    let features: Vec<geojson::Feature> = prepared
        .iter()
        .map(|feature| to_geojson_feature(feature, schema))
        .collect();
    let features_written = features.len();

    let feature_collection = geojson::FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    };
    let payload = if options.pretty {
        serde_json::to_string_pretty(&feature_collection)?
    } else {
        serde_json::to_string(&feature_collection)?
    };
    log::debug!("Encoded {} GeoJSON features", features_written);
    Ok(Encoded {
        payload,
        features_written,
    })
}

fn to_geojson_feature(feature: &PreparedFeature, schema: &FieldSchema) -> geojson::Feature {
    let properties: JsonObject = schema
        .fields
        .iter()
        .zip(&feature.values)
        .map(|(field, value)| (field.name.clone(), attribute_to_json(value)))
        .collect();
    geojson::Feature {
        bbox: None,
        geometry: Some(geojson::Geometry::new(geometry_value(feature))),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

fn positions(ring: &Ring) -> Vec<Vec<f64>> {
    ring.vertices.iter().map(Vertex::position).collect()
}

fn geometry_value(feature: &PreparedFeature) -> geojson::Value {
    match feature.kind {
        GeometryKind::Point => {
            let mut points: Vec<Vec<f64>> = feature.parts.iter().flat_map(positions).collect();
            if points.len() == 1 {
                geojson::Value::Point(points.remove(0))
            } else {
                geojson::Value::MultiPoint(points)
            }
        }
        GeometryKind::Polyline => {
            let mut paths: Vec<Vec<Vec<f64>>> = feature.parts.iter().map(positions).collect();
            if paths.len() == 1 {
                geojson::Value::LineString(paths.remove(0))
            } else {
                geojson::Value::MultiLineString(paths)
            }
        }
        GeometryKind::Polygon => {
            let rings: Vec<Vec<Vec<f64>>> = feature.parts.iter().map(positions).collect();
            // Shell plus holes are written as a single polygon inside a MultiPolygon.
            if rings.len() == 1 {
                geojson::Value::Polygon(rings)
            } else {
                geojson::Value::MultiPolygon(vec![rings])
            }
        }
    }
}

fn attribute_to_json(value: &AttributeValue) -> JsonValue {
    match value {
        AttributeValue::Int(int) => JsonValue::from(*int),
        AttributeValue::Float(float) => serde_json::Number::from_f64(*float)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        AttributeValue::Bool(flag) => JsonValue::Bool(*flag),
        AttributeValue::Text(text) => JsonValue::String(text.clone()),
        AttributeValue::DateTime(datetime) => {
            JsonValue::String(datetime.to_rfc3339_opts(SecondsFormat::AutoSi, true))
        }
        AttributeValue::Null => JsonValue::Null,
    }
}

/// Decode a GeoJSON FeatureCollection (or a single Feature).
///
/// Features with a null, unknown or unusable geometry are skipped with a warning. The
/// schema is inferred from property names in the order they are first seen.
pub fn decode(
    text: &str,
    options: &DecodeOptions,
    diagnostics: &mut Diagnostics,
) -> Result<DecodedLayer, ConversionError> {
    let mut document: JsonValue = serde_json::from_str(text)?;
    let document_type = document
        .get("type")
        .and_then(JsonValue::as_str)
        .map(str::to_string);
    let raw_features = match document_type.as_deref() {
        Some("FeatureCollection") => match document.get_mut("features").map(JsonValue::take) {
            Some(JsonValue::Array(features)) => features,
            _ => {
                return Err(ConversionError::malformed(
                    "GeoJSON",
                    "FeatureCollection without a features array",
                ))
            }
        },
        Some("Feature") => vec![document],
        Some(other) => {
            return Err(ConversionError::malformed(
                "GeoJSON",
                format!("expected a FeatureCollection, found '{}'", other),
            ))
        }
        None => return Err(ConversionError::malformed("GeoJSON", "missing 'type' member")),
    };

    let mut decoded: Vec<(GeometryKind, Vec<Ring>, JsonObject)> = Vec::new();
    for (index, raw) in raw_features.into_iter().enumerate() {
        let feature: geojson::Feature = match serde_json::from_value(raw) {
            Ok(feature) => feature,
            Err(err) => {
                diagnostics.push(Warning::feature(index, format!("skipped: {}", err)));
                continue;
            }
        };
        let geometry = match feature.geometry {
            Some(geometry) => geometry,
            None => {
                diagnostics.push(Warning::feature(index, "skipped: feature has no geometry"));
                continue;
            }
        };
        match flatten_geometry(&geometry.value) {
            Ok((kind, parts)) => {
                decoded.push((kind, parts, feature.properties.unwrap_or_default()))
            }
            Err(err) => diagnostics.push(Warning::feature(index, format!("skipped: {}", err))),
        }
    }

    let schema = infer_schema(decoded.iter().map(|(_, _, properties)| properties));
    let mut collection = FeatureCollection::new();
    for (kind, parts, properties) in decoded {
        let id = collection.push_feature(kind);
        for ring in parts {
            collection.append_ring(id, ring);
        }
        for field in &schema.fields {
            let value = properties
                .get(&field.name)
                .map(|value| json_to_attribute(value, options))
                .unwrap_or_else(|| options.blank_value());
            collection.append_attribute(id, value);
        }
    }
    log::debug!("Decoded {} GeoJSON features", collection.len());

    Ok(DecodedLayer {
        collection,
        schema,
        projection: None,
    })
}

fn ring_from_positions(positions: &[Vec<f64>]) -> Result<Ring, GeometryBuildError> {
    positions
        .iter()
        .map(|position| {
            Vertex::from_position(position).ok_or(GeometryBuildError::PointArity(position.len()))
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Ring::new)
}

/// Flatten any geometry into parts of a single kind. Collections are walked recursively.
fn flatten_geometry(
    value: &geojson::Value,
) -> Result<(GeometryKind, Vec<Ring>), GeometryBuildError> {
    use geojson::Value;

    let flattened = match value {
        Value::Point(position) => (
            GeometryKind::Point,
            vec![ring_from_positions(std::slice::from_ref(position))?],
        ),
        Value::MultiPoint(points) => (
            GeometryKind::Point,
            points
                .iter()
                .map(|point| ring_from_positions(std::slice::from_ref(point)))
                .collect::<Result<_, _>>()?,
        ),
        Value::LineString(path) => (GeometryKind::Polyline, vec![ring_from_positions(path)?]),
        Value::MultiLineString(paths) => (
            GeometryKind::Polyline,
            paths
                .iter()
                .map(|path| ring_from_positions(path))
                .collect::<Result<_, _>>()?,
        ),
        Value::Polygon(rings) => (
            GeometryKind::Polygon,
            rings
                .iter()
                .map(|ring| ring_from_positions(ring))
                .collect::<Result<_, _>>()?,
        ),
        Value::MultiPolygon(polygons) => (
            GeometryKind::Polygon,
            polygons
                .iter()
                .flatten()
                .map(|ring| ring_from_positions(ring))
                .collect::<Result<_, _>>()?,
        ),
        Value::GeometryCollection(geometries) => {
            let mut kind = None;
            let mut parts = Vec::new();
            for geometry in geometries {
                let (member_kind, member_parts) = flatten_geometry(&geometry.value)?;
                match kind {
                    None => kind = Some(member_kind),
                    Some(kind) if kind != member_kind => {
                        return Err(GeometryBuildError::Invalid(format!(
                            "GeometryCollection mixes {} and {} members",
                            kind, member_kind
                        )))
                    }
                    Some(_) => {}
                }
                parts.extend(member_parts);
            }
            (kind.ok_or(GeometryBuildError::Empty)?, parts)
        }
    };
    Ok(flattened)
}

fn json_field_type(value: &JsonValue) -> Option<FieldType> {
    match value {
        JsonValue::Null => None,
        JsonValue::String(text) if text.trim().is_empty() => None,
        JsonValue::Bool(_) => Some(FieldType::Bool),
        JsonValue::Number(number) if number.is_i64() => Some(FieldType::Int64),
        JsonValue::Number(_) => Some(FieldType::Double),
        _ => Some(FieldType::String),
    }
}

pub(crate) fn infer_schema<'a>(properties: impl Iterator<Item = &'a JsonObject>) -> FieldSchema {
    let mut fields: Vec<(String, Option<FieldType>)> = Vec::new();
    for object in properties {
        for (name, value) in object {
            let observed = json_field_type(value);
            let index = match fields.iter().position(|(existing, _)| existing == name) {
                Some(index) => index,
                None => {
                    fields.push((name.clone(), None));
                    fields.len() - 1
                }
            };
            let merged = match (fields[index].1, observed) {
                (current, None) => current,
                (None, observed) => observed,
                (Some(current), Some(observed)) if current == observed => Some(current),
                (Some(FieldType::Int64), Some(FieldType::Double))
                | (Some(FieldType::Double), Some(FieldType::Int64)) => Some(FieldType::Double),
                _ => Some(FieldType::String),
            };
            fields[index].1 = merged;
        }
    }
    FieldSchema::new(
        fields
            .into_iter()
            .map(|(name, field_type)| Field::new(name, field_type.unwrap_or(FieldType::String)))
            .collect(),
    )
}

pub(crate) fn json_to_attribute(value: &JsonValue, options: &DecodeOptions) -> AttributeValue {
    match value {
        JsonValue::Null => options.blank_value(),
        JsonValue::Bool(flag) => AttributeValue::Bool(*flag),
        JsonValue::Number(number) => match number.as_i64() {
            Some(int) => AttributeValue::Int(int),
            None => number
                .as_f64()
                .map(AttributeValue::Float)
                .unwrap_or_else(|| AttributeValue::Text(number.to_string())),
        },
        JsonValue::String(text) if text.trim().is_empty() => options.blank_value(),
        JsonValue::String(text) => AttributeValue::Text(text.clone()),
        other => AttributeValue::Text(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use rstest::rstest;

    use super::*;

    fn schema(specs: &[&str]) -> FieldSchema {
        FieldSchema::from_specs(specs).0
    }

    fn collection_of(
        kind: GeometryKind,
        features: Vec<(Vec<Vec<(f64, f64)>>, Vec<AttributeValue>)>,
    ) -> FeatureCollection {
        let mut collection = FeatureCollection::new();
        for (parts, attributes) in features {
            let id = collection.push_feature(kind);
            for part in parts {
                collection.append_ring(id, part.into_iter().map(Vertex::from).collect());
            }
            for value in attributes {
                collection.append_attribute(id, value);
            }
        }
        collection
    }

    #[rstest]
    fn test_point_feature_matches_expected_document() {
        let collection = collection_of(
            GeometryKind::Point,
            vec![(vec![vec![(-79.9, 40.4)]], vec!["Pittsburgh".into()])],
        );
        let mut diagnostics = Diagnostics::new();
        let encoded = encode(
            &collection,
            &schema(&["name;System.String"]),
            &GeoJsonOptions::default(),
            &mut diagnostics,
        )
        .unwrap();

        let actual: JsonValue = serde_json::from_str(&encoded.payload).unwrap();
        let expected: JsonValue = serde_json::from_str(
            r#"{"type":"FeatureCollection","features":[{"type":"Feature","properties":{"name":"Pittsburgh"},"geometry":{"type":"Point","coordinates":[-79.9,40.4]}}]}"#,
        )
        .unwrap();
        assert_eq!(actual, expected);
        assert_eq!(encoded.features_written, 1);
        assert!(diagnostics.is_empty());
    }

    #[rstest]
    #[case(GeometryKind::Point, vec![vec![(0.0, 0.0)], vec![(1.0, 1.0)]], "MultiPoint")]
    #[case(GeometryKind::Polyline, vec![vec![(0.0, 0.0), (1.0, 1.0)]], "LineString")]
    #[case(GeometryKind::Polyline, vec![vec![(0.0, 0.0), (1.0, 1.0)], vec![(2.0, 2.0), (3.0, 3.0)]], "MultiLineString")]
    #[case(GeometryKind::Polygon, vec![vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0)]], "Polygon")]
    #[case(GeometryKind::Polygon, vec![vec![(0.0, 0.0), (4.0, 0.0), (4.0, 4.0), (0.0, 4.0)], vec![(1.0, 1.0), (2.0, 1.0), (2.0, 2.0)]], "MultiPolygon")]
    fn test_geometry_type_follows_part_count(
        #[case] kind: GeometryKind,
        #[case] parts: Vec<Vec<(f64, f64)>>,
        #[case] expected_type: &str,
    ) {
        let collection = collection_of(kind, vec![(parts, vec![])]);
        let encoded = encode(
            &collection,
            &FieldSchema::default(),
            &GeoJsonOptions::default(),
            &mut Diagnostics::new(),
        )
        .unwrap();
        let document: JsonValue = serde_json::from_str(&encoded.payload).unwrap();
        assert_eq!(document["features"][0]["geometry"]["type"], expected_type);
    }

    #[rstest]
    fn test_polygon_ring_is_closed_on_output() {
        let collection = collection_of(
            GeometryKind::Polygon,
            vec![(vec![vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0)]], vec![])],
        );
        let encoded = encode(
            &collection,
            &FieldSchema::default(),
            &GeoJsonOptions::default(),
            &mut Diagnostics::new(),
        )
        .unwrap();
        let document: JsonValue = serde_json::from_str(&encoded.payload).unwrap();
        let ring = document["features"][0]["geometry"]["coordinates"][0]
            .as_array()
            .unwrap();
        assert_eq!(ring.len(), 4);
        assert_eq!(ring.first(), ring.last());
    }

    #[rstest]
    fn test_round_trip_keeps_counts_and_values() {
        let collection = collection_of(
            GeometryKind::Polygon,
            vec![
                (
                    vec![
                        vec![(0.0, 0.0), (4.0, 0.0), (4.0, 4.0), (0.0, 4.0)],
                        vec![(1.0, 1.0), (1.0, 2.0), (2.0, 2.0), (2.0, 1.0)],
                    ],
                    vec!["a".into(), AttributeValue::Float(1.25), AttributeValue::Int(3)],
                ),
                (
                    vec![vec![(10.1, 10.2), (11.3, 10.2), (11.3, 11.7)]],
                    vec!["b".into(), AttributeValue::Float(-2.5), AttributeValue::Int(-4)],
                ),
            ],
        );
        let schema = schema(&["name", "area;double", "rank;Int64"]);
        let mut diagnostics = Diagnostics::new();
        let encoded = encode(&collection, &schema, &GeoJsonOptions::default(), &mut diagnostics)
            .unwrap();

        let decoded =
            decode(&encoded.payload, &DecodeOptions::default(), &mut diagnostics).unwrap();
        assert!(diagnostics.is_empty());
        assert_eq!(decoded.collection.len(), 2);
        assert_eq!(decoded.schema, schema);

        let first = &decoded.collection.features()[0];
        assert_eq!(first.parts.len(), 2);
        assert_eq!(first.parts[0].len(), 5);
        assert_eq!(first.parts[1].len(), 5);
        assert_eq!(first.attributes[1], AttributeValue::Float(1.25));
        let second = &decoded.collection.features()[1];
        assert_abs_diff_eq!(second.parts[0].vertices[1].x, 11.3, epsilon = 1e-9);
        assert_eq!(second.attributes[2], AttributeValue::Int(-4));
    }

    #[rstest]
    fn test_reencoding_a_decoded_document_is_byte_identical() {
        let collection = collection_of(
            GeometryKind::Polyline,
            vec![
                (
                    vec![vec![(-79.9, 40.4), (-79.8, 40.5)]],
                    vec!["x".into(), AttributeValue::Bool(true)],
                ),
                (
                    vec![vec![(0.5, 0.5), (1.5, 1.5)], vec![(2.0, 2.0), (3.0, 3.0)]],
                    vec!["y".into(), AttributeValue::Bool(false)],
                ),
            ],
        );
        let schema = schema(&["label", "flag;bool"]);
        let options = GeoJsonOptions { pretty: true };
        let first = encode(&collection, &schema, &options, &mut Diagnostics::new()).unwrap();
        let decoded =
            decode(&first.payload, &DecodeOptions::default(), &mut Diagnostics::new()).unwrap();
        let second = encode(
            &decoded.collection,
            &decoded.schema,
            &options,
            &mut Diagnostics::new(),
        )
        .unwrap();
        assert_eq!(first.payload, second.payload);
    }

    #[rstest]
    fn test_decode_skips_unknown_and_empty_geometries() {
        let text = r#"{"type":"FeatureCollection","features":[
            {"type":"Feature","properties":{"n":1},"geometry":{"type":"Circle","coordinates":[0,0]}},
            {"type":"Feature","properties":{"n":2},"geometry":null},
            {"type":"Feature","properties":{"n":3},"geometry":{"type":"Point","coordinates":[1,2,3]}}
        ]}"#;
        let mut diagnostics = Diagnostics::new();
        let decoded = decode(text, &DecodeOptions::default(), &mut diagnostics).unwrap();
        assert_eq!(decoded.collection.len(), 1);
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics.warnings()[0].feature, Some(0));
        assert_eq!(diagnostics.warnings()[1].feature, Some(1));
        let point = &decoded.collection.features()[0];
        assert_eq!(point.parts[0].vertices[0], Vertex::new_3d(1.0, 2.0, 3.0));
        assert_eq!(point.attributes, vec![AttributeValue::Int(3)]);
    }

    #[rstest]
    fn test_decode_flattens_geometry_collections() {
        let text = r#"{"type":"Feature","properties":{},"geometry":{"type":"GeometryCollection","geometries":[
            {"type":"LineString","coordinates":[[0,0],[1,1]]},
            {"type":"GeometryCollection","geometries":[
                {"type":"MultiLineString","coordinates":[[[2,2],[3,3]],[[4,4],[5,5]]]}
            ]}
        ]}}"#;
        let decoded = decode(text, &DecodeOptions::default(), &mut Diagnostics::new()).unwrap();
        let feature = &decoded.collection.features()[0];
        assert_eq!(feature.kind, GeometryKind::Polyline);
        assert_eq!(feature.parts.len(), 3);
    }

    #[rstest]
    #[case(Some("nan".to_string()), AttributeValue::Text("nan".into()))]
    #[case(None, AttributeValue::Null)]
    fn test_decode_blank_values_use_sentinel(
        #[case] blank_sentinel: Option<String>,
        #[case] expected: AttributeValue,
    ) {
        let text = r#"{"type":"FeatureCollection","features":[
            {"type":"Feature","properties":{"a":"x","b":"  "},"geometry":{"type":"Point","coordinates":[0,0]}},
            {"type":"Feature","properties":{"a":null},"geometry":{"type":"Point","coordinates":[1,1]}}
        ]}"#;
        let options = DecodeOptions { blank_sentinel };
        let decoded = decode(text, &options, &mut Diagnostics::new()).unwrap();
        let features = decoded.collection.features();
        assert_eq!(features[0].attributes[1], expected);
        assert_eq!(features[1].attributes[0], expected);
        assert_eq!(features[1].attributes[1], expected);
    }

    #[rstest]
    fn test_schema_widens_mixed_numbers_and_falls_back_to_string() {
        let text = r#"{"type":"FeatureCollection","features":[
            {"type":"Feature","properties":{"n":1,"m":true},"geometry":{"type":"Point","coordinates":[0,0]}},
            {"type":"Feature","properties":{"n":1.5,"m":"yes"},"geometry":{"type":"Point","coordinates":[1,1]}}
        ]}"#;
        let decoded = decode(text, &DecodeOptions::default(), &mut Diagnostics::new()).unwrap();
        assert_eq!(
            decoded.schema.fields,
            vec![
                Field::new("n", FieldType::Double),
                Field::new("m", FieldType::String)
            ]
        );
    }

    #[rstest]
    fn test_decode_rejects_non_collections() {
        let result = decode(
            r#"{"type":"Point","coordinates":[0,0]}"#,
            &DecodeOptions::default(),
            &mut Diagnostics::new(),
        );
        assert!(matches!(result, Err(ConversionError::Malformed { .. })));
    }
}
