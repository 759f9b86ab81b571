use chrono::{TimeZone, Utc};
use geojson::JsonObject;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::{
    convert::{
        coercion::{coerce_or_warn, esri_alias},
        diagnostics::{Diagnostics, Warning},
        prepare::{prepare_features, PreparedFeature},
    },
    crs::projection::{latest_wkid_for, ProjectionDefinition},
    error::{ConversionError, GeometryBuildError},
    geofile::{
        feature::{AttributeValue, FeatureCollection, FeatureId, GeometryKind, Ring, Vertex},
        geojson::{infer_schema, json_to_attribute},
        schema::{Field, FieldSchema, FieldType},
        DecodeOptions, DecodedLayer, Encoded,
    },
};

/// Value of `wkid` and `latestWkid` when the spatial reference is unknown.
pub const UNSET_WKID: i32 = -1;

const POINT: &str = "esriGeometryPoint";
const MULTIPOINT: &str = "esriGeometryMultipoint";
const POLYLINE: &str = "esriGeometryPolyline";
const POLYGON: &str = "esriGeometryPolygon";

#[derive(Debug, Clone, Default)]
pub struct EsriJsonOptions {
    pub pretty: bool,
    /// Layer geometry kind. Defaults to the kind of the first feature.
    pub kind: Option<GeometryKind>,
    /// Projection of the written coordinates, used for `spatialReference`.
    pub projection: Option<ProjectionDefinition>,
    /// Explicit WKID, overriding the one derived from `projection`.
    pub wkid: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpatialReference {
    #[serde(default = "unset_wkid")]
    pub wkid: i32,
    #[serde(default = "unset_wkid")]
    pub latest_wkid: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wkt: Option<String>,
}

fn unset_wkid() -> i32 {
    UNSET_WKID
}

impl Default for SpatialReference {
    fn default() -> Self {
        Self {
            wkid: UNSET_WKID,
            latest_wkid: UNSET_WKID,
            wkt: None,
        }
    }
}

impl SpatialReference {
    pub fn new(projection: Option<&ProjectionDefinition>, wkid: Option<i32>) -> Self {
        if let Some(wkid) = wkid {
            return Self {
                wkid,
                latest_wkid: latest_wkid_for(wkid),
                wkt: None,
            };
        }
        match projection {
            Some(projection) => match projection.wkid() {
                Some(wkid) => Self {
                    wkid,
                    latest_wkid: projection.latest_wkid().unwrap_or(wkid),
                    wkt: None,
                },
                None => Self {
                    wkt: Some(projection.wkt().to_string()),
                    ..Self::default()
                },
            },
            None => Self::default(),
        }
    }

    /// Projection this reference points to, if it is bundled or carried as WKT.
    pub fn projection(&self) -> Option<ProjectionDefinition> {
        if let Some(wkt) = &self.wkt {
            if let Ok(projection) = ProjectionDefinition::parse(wkt) {
                return Some(projection);
            }
        }
        ProjectionDefinition::from_wkid(self.latest_wkid)
            .or_else(|| ProjectionDefinition::from_wkid(self.wkid))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EsriField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(rename = "GH_Type", default, skip_serializing_if = "Option::is_none")]
    pub gh_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl EsriField {
    fn field(&self) -> Field {
        let field_type = match self.field_type.as_str() {
            // Integer columns may carry 64-bit values from other writers.
            "esriFieldTypeInteger" => FieldType::Int64,
            other => self
                .gh_type
                .as_deref()
                .and_then(|gh_type| gh_type.parse().ok())
                .or_else(|| other.parse().ok())
                .unwrap_or(FieldType::String),
        };
        Field::new(self.name.clone(), field_type)
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EsriLayer<F> {
    #[serde(default)]
    display_field_name: String,
    #[serde(default)]
    field_aliases: JsonObject,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    geometry_type: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    has_z: bool,
    #[serde(default)]
    spatial_reference: SpatialReference,
    #[serde(default)]
    fields: Vec<EsriField>,
    #[serde(default)]
    features: Vec<F>,
}

#[derive(Debug, Serialize, Deserialize)]
struct EsriFeature {
    geometry: Option<EsriGeometry>,
    #[serde(default)]
    attributes: JsonObject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
enum EsriGeometry {
    Point {
        x: f64,
        y: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        z: Option<f64>,
    },
    Multipoint {
        points: Vec<Vec<f64>>,
    },
    Polyline {
        paths: Vec<Vec<Vec<f64>>>,
    },
    Polygon {
        rings: Vec<Vec<Vec<f64>>>,
    },
}

impl EsriGeometry {
    fn kind(&self) -> GeometryKind {
        match self {
            EsriGeometry::Point { .. } | EsriGeometry::Multipoint { .. } => GeometryKind::Point,
            EsriGeometry::Polyline { .. } => GeometryKind::Polyline,
            EsriGeometry::Polygon { .. } => GeometryKind::Polygon,
        }
    }

    fn into_parts(self) -> Result<Vec<Ring>, GeometryBuildError> {
        let ring = |positions: Vec<Vec<f64>>| -> Result<Ring, GeometryBuildError> {
            positions
                .iter()
                .map(|position| {
                    Vertex::from_position(position)
                        .ok_or(GeometryBuildError::PointArity(position.len()))
                })
                .collect()
        };
        match self {
            EsriGeometry::Point { x, y, z } => Ok(vec![Ring::new(vec![Vertex { x, y, z }])]),
            EsriGeometry::Multipoint { points } => points
                .into_iter()
                .map(|point| ring(vec![point]))
                .collect(),
            EsriGeometry::Polyline { paths } => paths.into_iter().map(ring).collect(),
            EsriGeometry::Polygon { rings } => rings.into_iter().map(ring).collect(),
        }
    }
}

fn geometry_type_name(kind: GeometryKind, single_points: bool) -> &'static str {
    match kind {
        GeometryKind::Point if single_points => POINT,
        GeometryKind::Point => MULTIPOINT,
        GeometryKind::Polyline => POLYLINE,
        GeometryKind::Polygon => POLYGON,
    }
}

fn geometry_kind_of(name: &str) -> Option<GeometryKind> {
    match name {
        POINT | MULTIPOINT => Some(GeometryKind::Point),
        POLYLINE => Some(GeometryKind::Polyline),
        POLYGON => Some(GeometryKind::Polygon),
        _ => None,
    }
}

/// Esri field type for a column, from the first written value, else the declared type.
/// Kinds without an Esri counterpart are written as strings tagged with `GH_Type`.
fn esri_field_type(
    observed: &AttributeValue,
    declared: FieldType,
) -> (&'static str, Option<String>) {
    match observed {
        AttributeValue::Int(_) => ("esriFieldTypeInteger", None),
        AttributeValue::Float(_) => ("esriFieldTypeDouble", None),
        AttributeValue::Text(_) => ("esriFieldTypeString", None),
        AttributeValue::DateTime(_) => ("esriFieldTypeDate", None),
        AttributeValue::Bool(_) => ("esriFieldTypeString", Some(FieldType::Bool.to_string())),
        AttributeValue::Null => match declared {
            FieldType::String => ("esriFieldTypeString", None),
            FieldType::Int32 | FieldType::Int64 => ("esriFieldTypeInteger", None),
            FieldType::Double | FieldType::Single | FieldType::Decimal => {
                ("esriFieldTypeDouble", None)
            }
            FieldType::DateTime => ("esriFieldTypeDate", None),
            FieldType::Bool => ("esriFieldTypeString", Some(declared.to_string())),
        },
    }
}

fn attribute_to_json(value: &AttributeValue) -> JsonValue {
    match value {
        AttributeValue::Int(int) => JsonValue::from(*int),
        AttributeValue::Float(float) => serde_json::Number::from_f64(*float)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        AttributeValue::DateTime(datetime) => JsonValue::from(datetime.timestamp_millis()),
        AttributeValue::Null => JsonValue::Null,
        other => other.to_raw().map(JsonValue::String).unwrap_or(JsonValue::Null),
    }
}

/// Encode `collection` as an Esri JSON feature set, the shape ArcGIS REST endpoints
/// return and "JSON To Features" accepts.
///
/// Every feature must match the layer geometry kind; others are skipped with a warning.
pub fn encode(
    collection: &FeatureCollection,
    schema: &FieldSchema,
    options: &EsriJsonOptions,
    diagnostics: &mut Diagnostics,
) -> Result<Encoded<String>, ConversionError> {
    let kind = options
        .kind
        .or_else(|| collection.layer_kind())
        .unwrap_or(GeometryKind::Point);
    let prepared = prepare_features(collection.features(), schema, Some(kind), diagnostics);

    let single_points = prepared.iter().all(|feature| feature.vertex_count() == 1);
    let has_z = prepared
        .iter()
        .flat_map(|feature| &feature.parts)
        .flat_map(|ring| &ring.vertices)
        .any(|vertex| vertex.z.is_some());

    let field_aliases: JsonObject = schema
        .fields
        .iter()
        .map(|field| (field.name.clone(), JsonValue::String(esri_alias(&field.name))))
        .collect();
    let fields = schema
        .fields
        .iter()
        .enumerate()
        .map(|(index, field)| {
            let observed = prepared
                .first()
                .and_then(|feature| feature.values.get(index))
                .unwrap_or(&AttributeValue::Null);
            let (field_type, gh_type) = esri_field_type(observed, field.field_type);
            EsriField {
                name: field.name.clone(),
                field_type: field_type.to_string(),
                gh_type,
                alias: Some(esri_alias(&field.name)),
            }
        })
        .collect();
    let features: Vec<EsriFeature> = prepared
        .iter()
        .map(|feature| EsriFeature {
            geometry: Some(to_esri_geometry(feature, single_points)),
            attributes: schema
                .fields
                .iter()
                .zip(&feature.values)
                .map(|(field, value)| (field.name.clone(), attribute_to_json(value)))
                .collect(),
        })
        .collect();
    let features_written = features.len();

    let layer = EsriLayer {
        display_field_name: " ".to_string(),
        field_aliases,
        geometry_type: Some(geometry_type_name(kind, single_points).to_string()),
        has_z,
        spatial_reference: SpatialReference::new(options.projection.as_ref(), options.wkid),
        fields,
        features,
    };
    let payload = if options.pretty {
        serde_json::to_string_pretty(&layer)?
    } else {
        serde_json::to_string(&layer)?
    };
    log::debug!("Encoded {} Esri JSON features", features_written);
    Ok(Encoded {
        payload,
        features_written,
    })
}

fn to_esri_geometry(feature: &PreparedFeature, single_points: bool) -> EsriGeometry {
    let positions = |ring: &Ring| -> Vec<Vec<f64>> {
        ring.vertices.iter().map(Vertex::position).collect()
    };
    match feature.kind {
        GeometryKind::Point => {
            let mut vertices = feature.parts.iter().flat_map(|ring| &ring.vertices);
            match (single_points, vertices.next()) {
                (true, Some(vertex)) => EsriGeometry::Point {
                    x: vertex.x,
                    y: vertex.y,
                    z: vertex.z,
                },
                _ => EsriGeometry::Multipoint {
                    points: feature.parts.iter().flat_map(positions).collect(),
                },
            }
        }
        GeometryKind::Polyline => EsriGeometry::Polyline {
            paths: feature.parts.iter().map(positions).collect(),
        },
        GeometryKind::Polygon => EsriGeometry::Polygon {
            rings: feature.parts.iter().map(positions).collect(),
        },
    }
}

/// Decode an Esri JSON feature set.
///
/// The schema comes from `fields` when present, otherwise it is inferred from the
/// attribute names. `spatialReference` is resolved to a projection when it is known.
pub fn decode(
    text: &str,
    options: &DecodeOptions,
    diagnostics: &mut Diagnostics,
) -> Result<DecodedLayer, ConversionError> {
    let layer: EsriLayer<JsonValue> = serde_json::from_str(text)
        .map_err(|err| ConversionError::malformed("Esri JSON", err.to_string()))?;

    let layer_kind = match layer.geometry_type.as_deref() {
        Some(name) => {
            let kind = geometry_kind_of(name);
            if kind.is_none() {
                diagnostics.push(Warning::collection(format!(
                    "unsupported geometryType '{}', using the geometry of each feature",
                    name
                )));
            }
            kind
        }
        None => None,
    };

    let mut decoded: Vec<(FeatureId, GeometryKind, Vec<Ring>, JsonObject)> = Vec::new();
    for (index, raw) in layer.features.into_iter().enumerate() {
        match decode_feature(raw, layer_kind) {
            Ok((kind, parts, attributes)) => decoded.push((index, kind, parts, attributes)),
            Err(message) => {
                diagnostics.push(Warning::feature(index, format!("skipped: {}", message)))
            }
        }
    }

    let schema = if layer.fields.is_empty() {
        infer_schema(decoded.iter().map(|(_, _, _, attributes)| attributes))
    } else {
        FieldSchema::new(layer.fields.iter().map(EsriField::field).collect())
    };

    let mut collection = FeatureCollection::new();
    for (index, kind, parts, attributes) in decoded {
        let id = collection.push_feature(kind);
        for ring in parts {
            collection.append_ring(id, ring);
        }
        for field in &schema.fields {
            let value = decode_value(
                attributes.get(&field.name),
                field,
                index,
                options,
                diagnostics,
            );
            collection.append_attribute(id, value);
        }
    }
    log::debug!("Decoded {} Esri JSON features", collection.len());

    let spatial_reference = layer.spatial_reference;
    let projection = spatial_reference.projection();
    if projection.is_none() && spatial_reference.wkid != UNSET_WKID {
        log::debug!(
            "No definition in the PROJ database for wkid {}, leaving the projection unset",
            spatial_reference.wkid
        );
    }
    Ok(DecodedLayer {
        collection,
        schema,
        projection,
    })
}

fn decode_feature(
    raw: JsonValue,
    layer_kind: Option<GeometryKind>,
) -> Result<(GeometryKind, Vec<Ring>, JsonObject), String> {
    let feature: EsriFeature = serde_json::from_value(raw).map_err(|err| err.to_string())?;
    let geometry = feature
        .geometry
        .ok_or_else(|| GeometryBuildError::Empty.to_string())?;
    let kind = geometry.kind();
    if let Some(layer_kind) = layer_kind {
        if kind != layer_kind {
            return Err(GeometryBuildError::KindMismatch {
                kind: kind.to_string(),
                layer: layer_kind.to_string(),
            }
            .to_string());
        }
    }
    let parts = geometry.into_parts().map_err(|err| err.to_string())?;
    Ok((kind, parts, feature.attributes))
}

fn decode_value(
    raw: Option<&JsonValue>,
    field: &Field,
    feature: FeatureId,
    options: &DecodeOptions,
    diagnostics: &mut Diagnostics,
) -> AttributeValue {
    let raw = match raw {
        Some(JsonValue::Null) | None => return options.blank_value(),
        Some(JsonValue::String(text)) if text.trim().is_empty() => return options.blank_value(),
        Some(raw) => raw,
    };
    if field.field_type == FieldType::DateTime {
        // Esri dates are milliseconds since the Unix epoch.
        if let Some(datetime) = raw
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
        {
            return AttributeValue::DateTime(datetime);
        }
    }
    let value = json_to_attribute(raw, options);
    let (value, warning) = coerce_or_warn(&value, &field.name, field.field_type, feature);
    diagnostics.extend_logged(warning);
    value
}
