use std::{
    fs,
    io::{Seek, Write},
    path::Path,
};

use chrono::{Datelike, NaiveDate, TimeZone, Utc};
use geo::algorithm::orient::{Direction, Orient};
use indicatif::ProgressBar;
use shapefile::{
    dbase::{self, FieldName, FieldValue, TableWriterBuilder},
    record::EsriShape,
    Shape,
};

use crate::{
    convert::{
        diagnostics::{Diagnostics, Warning},
        prepare::{prepare_features, PreparedFeature},
    },
    crs::projection::ProjectionDefinition,
    error::{ConversionError, GeometryBuildError},
    geofile::{
        feature::{AttributeValue, FeatureCollection, FeatureId, GeometryKind, Ring, Vertex},
        schema::{Field, FieldSchema, FieldType},
        DecodeOptions, DecodedLayer, Encoded,
    },
};

/// Longest field name a DBF header can hold, in bytes.
pub const MAX_FIELD_NAME_BYTES: usize = 10;
/// Longest value of a character column, in bytes.
pub const MAX_CHARACTER_BYTES: usize = 254;
/// Largest magnitude a DBF numeric, stored through `f64`, holds without rounding.
const MAX_EXACT_NUMERIC: i64 = 1 << 53;

#[derive(Debug, Clone, Default)]
pub struct ShapefileOptions {
    /// Layer geometry kind. Defaults to the kind of the first feature.
    pub kind: Option<GeometryKind>,
    /// Written to the `.prj` sidecar.
    pub projection: Option<ProjectionDefinition>,
}

/// One attribute table column: the schema field and its name as stored in the DBF.
#[derive(Debug, Clone, PartialEq)]
pub struct DbfColumn {
    pub name: String,
    pub field_type: FieldType,
}

impl DbfColumn {
    fn add_to(&self, builder: TableWriterBuilder) -> Result<TableWriterBuilder, ConversionError> {
        let name = FieldName::try_from(self.name.as_str()).map_err(|_| {
            ConversionError::Validation(format!("'{}' is not a valid DBF field name", self.name))
        })?;
        Ok(match self.field_type {
            FieldType::String => builder.add_character_field(name, MAX_CHARACTER_BYTES as u8),
            FieldType::Int32 | FieldType::Int64 => builder.add_numeric_field(name, 18, 0),
            FieldType::Double | FieldType::Decimal => builder.add_numeric_field(name, 24, 15),
            FieldType::Single => builder.add_float_field(name, 19, 11),
            FieldType::Bool => builder.add_logical_field(name),
            FieldType::DateTime => builder.add_date_field(name),
        })
    }
}

#[derive(Debug, Clone)]
pub enum LayerShapes {
    Multipoint(Vec<shapefile::Multipoint>),
    Polyline(Vec<shapefile::Polyline>),
    Polygon(Vec<shapefile::Polygon>),
}

impl LayerShapes {
    pub fn len(&self) -> usize {
        match self {
            LayerShapes::Multipoint(shapes) => shapes.len(),
            LayerShapes::Polyline(shapes) => shapes.len(),
            LayerShapes::Polygon(shapes) => shapes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An encoded shapefile held in memory until it is written.
#[derive(Debug, Clone)]
pub struct ShapefileLayer {
    pub kind: GeometryKind,
    pub columns: Vec<DbfColumn>,
    pub shapes: LayerShapes,
    pub records: Vec<dbase::Record>,
    pub projection: Option<ProjectionDefinition>,
}

impl ShapefileLayer {
    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    /// Write the `.shp`, `.shx` and `.dbf` files next to `path`, plus a `.prj` sidecar
    /// when the layer has a projection. Returns the number of features written.
    pub fn write(&self, path: &Path) -> Result<usize, ConversionError> {
        let builder = self
            .columns
            .iter()
            .try_fold(TableWriterBuilder::new(), |builder, column| column.add_to(builder))?;
        let mut writer = shapefile::Writer::from_path(path, builder)?;

        log::info!("Writing {} {} features to {:?}", self.len(), self.kind, path);
        let bar = ProgressBar::new(self.len() as u64);
        match &self.shapes {
            LayerShapes::Multipoint(shapes) => write_all(&mut writer, shapes, &self.records, &bar)?,
            LayerShapes::Polyline(shapes) => write_all(&mut writer, shapes, &self.records, &bar)?,
            LayerShapes::Polygon(shapes) => write_all(&mut writer, shapes, &self.records, &bar)?,
        }
        bar.finish_and_clear();
        // Headers are finalized when the writer is dropped.
        drop(writer);

        if let Some(projection) = &self.projection {
            let prj_path = path.with_extension("prj");
            fs::write(&prj_path, projection.wkt())
                .map_err(|source| ConversionError::io(prj_path, source))?;
        }
        Ok(self.len())
    }
}

fn write_all<W: Write + Seek, S: EsriShape>(
    writer: &mut shapefile::Writer<W>,
    shapes: &[S],
    records: &[dbase::Record],
    bar: &ProgressBar,
) -> Result<(), ConversionError> {
    for (shape, record) in shapes.iter().zip(records) {
        writer.write_shape_and_record(shape, record)?;
        bar.inc(1);
    }
    Ok(())
}

/// Encode `collection` into an in-memory shapefile layer.
///
/// Point layers are stored as multipoints. Polygon shells are wound clockwise and holes
/// counter-clockwise. Features that do not match the layer kind or whose geometry cannot
/// be built are skipped with a warning.
pub fn encode(
    collection: &FeatureCollection,
    schema: &FieldSchema,
    options: &ShapefileOptions,
    diagnostics: &mut Diagnostics,
) -> Result<Encoded<ShapefileLayer>, ConversionError> {
    let kind = options
        .kind
        .or_else(|| collection.layer_kind())
        .unwrap_or(GeometryKind::Point);
    let columns = dbf_columns(schema, diagnostics);
    let prepared = prepare_features(collection.features(), schema, Some(kind), diagnostics);

    let shapes = match kind {
        GeometryKind::Point => {
            LayerShapes::Multipoint(prepared.iter().map(to_multipoint).collect())
        }
        GeometryKind::Polyline => {
            LayerShapes::Polyline(prepared.iter().map(to_polyline).collect())
        }
        GeometryKind::Polygon => LayerShapes::Polygon(prepared.iter().map(to_polygon).collect()),
    };
    let records = prepared
        .iter()
        .map(|feature| to_record(feature, &columns, diagnostics))
        .collect();

    let layer = ShapefileLayer {
        kind,
        columns,
        shapes,
        records,
        projection: options.projection.clone(),
    };
    let features_written = layer.len();
    Ok(Encoded {
        payload: layer,
        features_written,
    })
}

fn truncate_bytes(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

fn int_to_numeric(
    int: i64,
    feature: FeatureId,
    column: &DbfColumn,
    diagnostics: &mut Diagnostics,
) -> f64 {
    if int.unsigned_abs() > MAX_EXACT_NUMERIC as u64 {
        diagnostics.push(Warning::value(
            feature,
            &column.name,
            format!(
                "Field '{}' value {} is beyond 2^53 and loses precision in DBF",
                column.name, int
            ),
        ));
    }
    int as f64
}

fn dbf_columns(schema: &FieldSchema, diagnostics: &mut Diagnostics) -> Vec<DbfColumn> {
    let mut columns: Vec<DbfColumn> = Vec::with_capacity(schema.len());
    for field in &schema.fields {
        let mut name = truncate_bytes(&field.name, MAX_FIELD_NAME_BYTES).to_string();
        let mut suffix = 1;
        while columns.iter().any(|column| column.name == name) {
            let tag = format!("_{}", suffix);
            name = format!(
                "{}{}",
                truncate_bytes(&field.name, MAX_FIELD_NAME_BYTES - tag.len()),
                tag
            );
            suffix += 1;
        }
        if name != field.name {
            diagnostics.push(Warning::collection(format!(
                "Field name '{}' does not fit a DBF header, stored as '{}'",
                field.name, name
            )));
        }
        columns.push(DbfColumn {
            name,
            field_type: field.field_type,
        });
    }
    columns
}

fn to_point(vertex: &Vertex) -> shapefile::Point {
    shapefile::Point::new(vertex.x, vertex.y)
}

fn to_multipoint(feature: &PreparedFeature) -> shapefile::Multipoint {
    shapefile::Multipoint::new(
        feature
            .parts
            .iter()
            .flat_map(|ring| &ring.vertices)
            .map(to_point)
            .collect(),
    )
}

fn to_polyline(feature: &PreparedFeature) -> shapefile::Polyline {
    shapefile::Polyline::with_parts(
        feature
            .parts
            .iter()
            .map(|path| path.vertices.iter().map(to_point).collect())
            .collect(),
    )
}

fn to_line_string(ring: &Ring) -> geo::LineString {
    ring.vertices
        .iter()
        .map(|vertex| (vertex.x, vertex.y))
        .collect()
}

fn to_polygon(feature: &PreparedFeature) -> shapefile::Polygon {
    let (shell, holes) = match feature.parts.split_first() {
        Some((shell, holes)) => (
            to_line_string(shell),
            holes.iter().map(to_line_string).collect(),
        ),
        None => (geo::LineString(vec![]), vec![]),
    };
    let polygon = geo::Polygon::new(shell, holes).orient(Direction::Reversed);

    let ring_points = |line: &geo::LineString| -> Vec<shapefile::Point> {
        line.coords()
            .map(|coord| shapefile::Point::new(coord.x, coord.y))
            .collect()
    };
    let mut rings = vec![shapefile::PolygonRing::Outer(ring_points(polygon.exterior()))];
    rings.extend(
        polygon
            .interiors()
            .iter()
            .map(|hole| shapefile::PolygonRing::Inner(ring_points(hole))),
    );
    shapefile::Polygon::with_rings(rings)
}

fn to_record(
    feature: &PreparedFeature,
    columns: &[DbfColumn],
    diagnostics: &mut Diagnostics,
) -> dbase::Record {
    let mut record = dbase::Record::default();
    for (column, value) in columns.iter().zip(&feature.values) {
        let field_value = match column.field_type {
            FieldType::String => FieldValue::Character(value.to_raw().map(|text| {
                let stored = truncate_bytes(&text, MAX_CHARACTER_BYTES);
                if stored.len() < text.len() {
                    diagnostics.push(Warning::value(
                        feature.id,
                        &column.name,
                        format!(
                            "Field '{}' value is longer than {} bytes and was truncated",
                            column.name, MAX_CHARACTER_BYTES
                        ),
                    ));
                }
                stored.to_string()
            })),
            FieldType::Int32 | FieldType::Int64 => FieldValue::Numeric(match value {
                AttributeValue::Int(int) => {
                    Some(int_to_numeric(*int, feature.id, column, diagnostics))
                }
                _ => None,
            }),
            FieldType::Double | FieldType::Decimal => FieldValue::Numeric(match value {
                AttributeValue::Float(float) if float.is_finite() => Some(*float),
                AttributeValue::Int(int) => {
                    Some(int_to_numeric(*int, feature.id, column, diagnostics))
                }
                _ => None,
            }),
            FieldType::Single => FieldValue::Float(match value {
                AttributeValue::Float(float) if float.is_finite() => Some(*float as f32),
                _ => None,
            }),
            FieldType::Bool => FieldValue::Logical(match value {
                AttributeValue::Bool(flag) => Some(*flag),
                _ => None,
            }),
            // The DBF date type has no time of day.
            FieldType::DateTime => FieldValue::Date(match value {
                AttributeValue::DateTime(datetime) => Some(dbase::Date::new(
                    datetime.day(),
                    datetime.month(),
                    datetime.year() as u32,
                )),
                _ => None,
            }),
        };
        record.insert(column.name.clone(), field_value);
    }
    record
}

/// Read a shapefile from its `.shp` path, with the `.dbf` table and `.prj` sidecar next
/// to it.
///
/// Multi-part shapes are flattened into one part per ring, path or point. Null and
/// multipatch shapes are skipped with a warning. An unreadable `.prj` is reported as a
/// warning and leaves the projection unset.
pub fn decode(
    path: &Path,
    options: &DecodeOptions,
    diagnostics: &mut Diagnostics,
) -> Result<DecodedLayer, ConversionError> {
    let shapes = shapefile::ShapeReader::from_path(path)?.read()?;

    let mut table = dbase::Reader::from_path(path.with_extension("dbf"))?;
    let table_fields: Vec<(String, dbase::FieldType)> = table
        .fields()
        .iter()
        .map(|info| (info.name().to_string(), info.field_type()))
        .collect();
    let records = table.read()?;
    if records.len() != shapes.len() {
        diagnostics.push(Warning::collection(format!(
            "{} shapes but {} attribute records, extra entries ignored",
            shapes.len(),
            records.len()
        )));
    }

    let schema = FieldSchema::new(
        table_fields
            .iter()
            .map(|(name, dbf_type)| {
                Field::new(name.clone(), field_type_of(name, *dbf_type, &records))
            })
            .collect(),
    );

    let mut collection = FeatureCollection::new();
    for (index, (shape, record)) in shapes.into_iter().zip(&records).enumerate() {
        let (kind, parts) = match shape_parts(shape) {
            Ok(decoded) => decoded,
            Err(err) => {
                diagnostics.push(Warning::feature(index, format!("skipped: {}", err)));
                continue;
            }
        };
        let id = collection.push_feature(kind);
        for ring in parts {
            collection.append_ring(id, ring);
        }
        for field in &schema.fields {
            let value = record
                .get(&field.name)
                .map(|value| field_value_to_attribute(value, field.field_type, options))
                .unwrap_or_else(|| options.blank_value());
            collection.append_attribute(id, value);
        }
    }

    let prj_path = path.with_extension("prj");
    let projection = if prj_path.exists() {
        match ProjectionDefinition::from_file(&prj_path) {
            Ok(projection) => Some(projection),
            Err(err) => {
                diagnostics.push(Warning::collection(format!("Failed to read .prj: {}", err)));
                None
            }
        }
    } else {
        None
    };
    log::debug!("Decoded {} shapefile features from {:?}", collection.len(), path);

    Ok(DecodedLayer {
        collection,
        schema,
        projection,
    })
}

/// Numeric columns hold integers when every stored value is whole.
fn field_type_of(name: &str, dbf_type: dbase::FieldType, records: &[dbase::Record]) -> FieldType {
    match dbf_type {
        dbase::FieldType::Numeric => {
            let whole = records.iter().all(|record| match record.get(name) {
                Some(FieldValue::Numeric(Some(number))) => {
                    number.fract() == 0.0 && number.abs() < 9.007_199_254_740_992e15
                }
                _ => true,
            });
            if whole {
                FieldType::Int64
            } else {
                FieldType::Double
            }
        }
        dbase::FieldType::Float => FieldType::Single,
        dbase::FieldType::Double | dbase::FieldType::Currency => FieldType::Double,
        dbase::FieldType::Integer => FieldType::Int32,
        dbase::FieldType::Logical => FieldType::Bool,
        dbase::FieldType::Date | dbase::FieldType::DateTime => FieldType::DateTime,
        _ => FieldType::String,
    }
}

fn field_value_to_attribute(
    value: &FieldValue,
    field_type: FieldType,
    options: &DecodeOptions,
) -> AttributeValue {
    let value = match value {
        FieldValue::Character(Some(text)) => {
            let text = text.trim_end_matches(' ');
            if text.trim().is_empty() {
                None
            } else {
                Some(AttributeValue::Text(text.to_string()))
            }
        }
        FieldValue::Memo(text) if !text.trim().is_empty() => {
            Some(AttributeValue::Text(text.clone()))
        }
        FieldValue::Numeric(Some(number)) if field_type == FieldType::Int64 => {
            Some(AttributeValue::Int(*number as i64))
        }
        FieldValue::Numeric(Some(number)) => Some(AttributeValue::Float(*number)),
        FieldValue::Float(Some(number)) => Some(AttributeValue::Float(*number as f64)),
        FieldValue::Double(number) | FieldValue::Currency(number) => {
            Some(AttributeValue::Float(*number))
        }
        FieldValue::Integer(int) => Some(AttributeValue::Int(*int as i64)),
        FieldValue::Logical(Some(flag)) => Some(AttributeValue::Bool(*flag)),
        FieldValue::Date(Some(date)) => date_to_attribute(date),
        FieldValue::DateTime(datetime) => date_to_attribute(&datetime.date()),
        _ => None,
    };
    value.unwrap_or_else(|| options.blank_value())
}

fn date_to_attribute(date: &dbase::Date) -> Option<AttributeValue> {
    NaiveDate::from_ymd_opt(date.year() as i32, date.month(), date.day())
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| AttributeValue::DateTime(Utc.from_utc_datetime(&naive)))
}

fn shape_parts(shape: Shape) -> Result<(GeometryKind, Vec<Ring>), GeometryBuildError> {
    fn ring<P>(points: &[P], vertex: impl Fn(&P) -> Vertex) -> Ring {
        points.iter().map(vertex).collect()
    }
    let flat = |point: &shapefile::Point| Vertex::new(point.x, point.y);
    let measured = |point: &shapefile::PointM| Vertex::new(point.x, point.y);
    let elevated = |point: &shapefile::PointZ| Vertex::new_3d(point.x, point.y, point.z);

    let decoded = match shape {
        Shape::Point(point) => (GeometryKind::Point, vec![ring(&[point], flat)]),
        Shape::PointM(point) => (GeometryKind::Point, vec![ring(&[point], measured)]),
        Shape::PointZ(point) => (GeometryKind::Point, vec![ring(&[point], elevated)]),
        Shape::Multipoint(shape) => (
            GeometryKind::Point,
            shape
                .points()
                .iter()
                .map(|point| ring(std::slice::from_ref(point), flat))
                .collect(),
        ),
        Shape::MultipointM(shape) => (
            GeometryKind::Point,
            shape
                .points()
                .iter()
                .map(|point| ring(std::slice::from_ref(point), measured))
                .collect(),
        ),
        Shape::MultipointZ(shape) => (
            GeometryKind::Point,
            shape
                .points()
                .iter()
                .map(|point| ring(std::slice::from_ref(point), elevated))
                .collect(),
        ),
        Shape::Polyline(shape) => (
            GeometryKind::Polyline,
            shape.parts().iter().map(|part| ring(&part[..], flat)).collect(),
        ),
        Shape::PolylineM(shape) => (
            GeometryKind::Polyline,
            shape.parts().iter().map(|part| ring(&part[..], measured)).collect(),
        ),
        Shape::PolylineZ(shape) => (
            GeometryKind::Polyline,
            shape.parts().iter().map(|part| ring(&part[..], elevated)).collect(),
        ),
        Shape::Polygon(shape) => (
            GeometryKind::Polygon,
            shape.rings().iter().map(|part| ring(part.points(), flat)).collect(),
        ),
        Shape::PolygonM(shape) => (
            GeometryKind::Polygon,
            shape.rings().iter().map(|part| ring(part.points(), measured)).collect(),
        ),
        Shape::PolygonZ(shape) => (
            GeometryKind::Polygon,
            shape.rings().iter().map(|part| ring(part.points(), elevated)).collect(),
        ),
        Shape::Multipatch(_) => {
            return Err(GeometryBuildError::UnsupportedType("Multipatch".to_string()))
        }
        Shape::NullShape => return Err(GeometryBuildError::Empty),
    };
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use geo::Area;
    use rstest::rstest;
    use testdir::testdir;

    use super::*;

    fn square(min: f64, max: f64) -> Ring {
        // Counter-clockwise and open on purpose.
        vec![(min, min), (max, min), (max, max), (min, max)]
            .into_iter()
            .map(Vertex::from)
            .collect()
    }

    fn signed_area(ring: &Ring) -> f64 {
        geo::Polygon::new(to_line_string(ring), vec![]).signed_area()
    }

    fn polygon_with_hole() -> (FeatureCollection, FieldSchema) {
        let mut collection = FeatureCollection::new();
        let id = collection.push_feature(GeometryKind::Polygon);
        collection.append_ring(id, square(0.0, 10.0));
        collection.append_ring(id, square(4.0, 6.0));
        collection.append_attribute(id, "lot 7".into());
        collection.append_attribute(id, "12".into());
        collection.append_attribute(id, "99.75".into());
        collection.append_attribute(id, "2021-06-30T18:00:00Z".into());
        collection.append_attribute(id, "False".into());
        let schema = FieldSchema::from_specs(&[
            "name",
            "parcel_number;int",
            "area;double",
            "recorded;DateTime",
            "vacant;bool",
        ])
        .0;
        (collection, schema)
    }

    #[rstest]
    fn test_polygon_with_hole_round_trips_through_files() {
        let dir = testdir!();
        let path = dir.join("parcels.shp");
        let (collection, schema) = polygon_with_hole();
        let options = ShapefileOptions {
            projection: Some(ProjectionDefinition::wgs1984()),
            ..Default::default()
        };
        let mut diagnostics = Diagnostics::new();
        let encoded = encode(&collection, &schema, &options, &mut diagnostics).unwrap();
        assert_eq!(encoded.features_written, 1);
        // "parcel_number" does not fit a DBF header.
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(encoded.payload.columns[1].name, "parcel_num");
        assert_eq!(encoded.payload.write(&path).unwrap(), 1);
        assert!(dir.join("parcels.dbf").exists());
        assert!(dir.join("parcels.shx").exists());
        assert!(dir.join("parcels.prj").exists());

        let mut diagnostics = Diagnostics::new();
        let decoded = decode(&path, &DecodeOptions::default(), &mut diagnostics).unwrap();
        assert!(diagnostics.is_empty());
        assert_eq!(decoded.projection, Some(ProjectionDefinition::wgs1984()));
        assert_eq!(decoded.collection.len(), 1);

        let feature = &decoded.collection.features()[0];
        assert_eq!(feature.kind, GeometryKind::Polygon);
        assert_eq!(feature.parts.len(), 2);
        assert!(feature.parts.iter().all(|ring| ring.len() == 5 && ring.is_closed()));
        // Shell first and clockwise, hole counter-clockwise.
        assert_eq!(signed_area(&feature.parts[0]), -100.0);
        assert_eq!(signed_area(&feature.parts[1]), 4.0);

        assert_eq!(feature.attributes[0], AttributeValue::Text("lot 7".into()));
        assert_eq!(feature.attributes[1], AttributeValue::Int(12));
        assert_eq!(feature.attributes[2], AttributeValue::Float(99.75));
        assert_eq!(
            feature.attributes[3],
            AttributeValue::DateTime(Utc.with_ymd_and_hms(2021, 6, 30, 0, 0, 0).unwrap())
        );
        assert_eq!(feature.attributes[4], AttributeValue::Bool(false));
        assert_eq!(decoded.schema.fields[2], Field::new("area", FieldType::Double));
    }

    #[rstest]
    fn test_degenerate_polygons_are_skipped() {
        let mut collection = FeatureCollection::new();
        let good = collection.push_feature(GeometryKind::Polygon);
        collection.append_ring(good, square(0.0, 1.0));
        let flat = collection.push_feature(GeometryKind::Polygon);
        collection.append_ring(
            flat,
            vec![Vertex::new(0.0, 0.0), Vertex::new(1.0, 1.0), Vertex::new(2.0, 2.0)].into(),
        );

        let mut diagnostics = Diagnostics::new();
        let encoded = encode(
            &collection,
            &FieldSchema::default(),
            &ShapefileOptions::default(),
            &mut diagnostics,
        )
        .unwrap();
        assert_eq!(encoded.features_written, 1);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics.warnings()[0].feature, Some(1));
    }

    #[rstest]
    fn test_integers_beyond_double_precision_warn() {
        let mut collection = FeatureCollection::new();
        for count in [42, MAX_EXACT_NUMERIC, MAX_EXACT_NUMERIC + 1, -MAX_EXACT_NUMERIC - 1] {
            let id = collection.push_feature(GeometryKind::Point);
            collection.append_ring(id, Ring::new(vec![Vertex::new(1.0, 2.0)]));
            collection.append_attribute(id, AttributeValue::Int(count));
        }
        let schema = FieldSchema::from_specs(&["count;Int64"]).0;

        let mut diagnostics = Diagnostics::new();
        let encoded = encode(&collection, &schema, &ShapefileOptions::default(), &mut diagnostics)
            .unwrap();
        assert_eq!(encoded.features_written, 4);
        let flagged: Vec<Option<FeatureId>> = diagnostics
            .warnings()
            .iter()
            .map(|warning| warning.feature)
            .collect();
        assert_eq!(flagged, vec![Some(2), Some(3)]);
        assert_eq!(diagnostics.warnings()[0].field.as_deref(), Some("count"));
    }

    #[rstest]
    fn test_points_and_lines_are_flattened_on_read() {
        let dir = testdir!();

        let mut points = FeatureCollection::new();
        let id = points.push_feature(GeometryKind::Point);
        points.append_ring(id, vec![Vertex::new(1.0, 2.0)].into());
        points.append_ring(id, vec![Vertex::new(3.0, 4.0)].into());
        points.append_attribute(id, AttributeValue::Int(1));
        let encoded = encode(
            &points,
            &FieldSchema::from_specs(&["rank;int"]).0,
            &ShapefileOptions::default(),
            &mut Diagnostics::new(),
        )
        .unwrap();
        encoded.payload.write(&dir.join("points.shp")).unwrap();
        let decoded = decode(
            &dir.join("points.shp"),
            &DecodeOptions::default(),
            &mut Diagnostics::new(),
        )
        .unwrap();
        let feature = &decoded.collection.features()[0];
        assert_eq!(feature.kind, GeometryKind::Point);
        assert_eq!(feature.parts.len(), 2);
        assert_eq!(decoded.projection, None);

        let mut lines = FeatureCollection::new();
        let id = lines.push_feature(GeometryKind::Polyline);
        lines.append_ring(id, vec![Vertex::new(0.0, 0.0), Vertex::new(1.0, 1.0)].into());
        lines.append_ring(id, vec![Vertex::new(5.0, 5.0), Vertex::new(6.0, 5.0)].into());
        lines.append_attribute(id, AttributeValue::Null);
        let schema = FieldSchema::from_specs(&["label"]).0;
        let encoded =
            encode(&lines, &schema, &ShapefileOptions::default(), &mut Diagnostics::new()).unwrap();
        encoded.payload.write(&dir.join("lines.shp")).unwrap();
        let decoded = decode(
            &dir.join("lines.shp"),
            &DecodeOptions::default(),
            &mut Diagnostics::new(),
        )
        .unwrap();
        let feature = &decoded.collection.features()[0];
        assert_eq!(feature.kind, GeometryKind::Polyline);
        assert_eq!(feature.parts.len(), 2);
        assert_eq!(feature.attributes, vec![AttributeValue::Text("nan".into())]);
    }

    #[rstest]
    fn test_malformed_prj_is_a_warning() {
        let dir = testdir!();
        let path = dir.join("broken.shp");
        let (collection, schema) = polygon_with_hole();
        encode(&collection, &schema, &ShapefileOptions::default(), &mut Diagnostics::new())
            .unwrap()
            .payload
            .write(&path)
            .unwrap();
        fs::write(dir.join("broken.prj"), "GEOGCS[\"unterminated").unwrap();

        let mut diagnostics = Diagnostics::new();
        let decoded = decode(&path, &DecodeOptions::default(), &mut diagnostics).unwrap();
        assert_eq!(decoded.projection, None);
        assert_eq!(decoded.collection.len(), 1);
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics.warnings()[0]
            .message
            .starts_with("Failed to read .prj: "));
    }

    #[rstest]
    #[case("short", "short")]
    #[case("exactly_10", "exactly_10")]
    #[case("much_longer_name", "much_longe")]
    #[case("größenklasse", "größenkl")]
    fn test_field_names_fit_dbf_headers(#[case] name: &str, #[case] expected: &str) {
        let schema = FieldSchema::new(vec![Field::new(name, FieldType::String)]);
        let columns = dbf_columns(&schema, &mut Diagnostics::new());
        assert_eq!(columns[0].name, expected);
    }

    #[rstest]
    fn test_colliding_truncated_names_are_disambiguated() {
        let schema = FieldSchema::from_specs(&["population_2010", "population_2020"]).0;
        let columns = dbf_columns(&schema, &mut Diagnostics::new());
        assert_eq!(columns[0].name, "population");
        assert_eq!(columns[1].name, "populati_1");
    }
}
