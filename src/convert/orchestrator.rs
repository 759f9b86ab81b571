use std::{
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use serde::Deserialize;

use crate::{
    crs::{projection::ProjectionDefinition, reproject::Reprojector},
    error::{ConversionError, ProjectionError},
    geofile::{
        esri_json::{self, EsriJsonOptions},
        feature::{AttributeValue, FeatureCollection, GeometryKind, Ring},
        geojson::{self, GeoJsonOptions},
        schema::FieldSchema,
        shp::{self, ShapefileLayer, ShapefileOptions},
        DecodeOptions, DecodedLayer, Encoded,
    },
};

use super::diagnostics::{Diagnostics, Warning};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Format {
    #[serde(rename = "geojson")]
    GeoJson,
    #[serde(rename = "esri_json")]
    EsriJson,
    #[serde(rename = "shapefile")]
    Shapefile,
}

impl Format {
    pub fn name(&self) -> &'static str {
        match self {
            Format::GeoJson => "GeoJSON",
            Format::EsriJson => "Esri JSON",
            Format::Shapefile => "Shapefile",
        }
    }

    /// Format implied by a file extension. `.json` is ambiguous and yields None.
    pub fn from_path(path: &Path) -> Option<Format> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "geojson" => Some(Format::GeoJson),
            "esrijson" => Some(Format::EsriJson),
            "shp" => Some(Format::Shapefile),
            _ => None,
        }
    }

    /// Tell the two JSON formats apart by their top level members.
    pub fn sniff_json(text: &str) -> Format {
        match serde_json::from_str::<serde_json::Value>(text) {
            Ok(serde_json::Value::Object(object))
                if object.contains_key("geometryType")
                    || object.contains_key("spatialReference")
                    || object.contains_key("fieldAliases") =>
            {
                Format::EsriJson
            }
            _ => Format::GeoJson,
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionState {
    Idle,
    Validating,
    Encoding,
    Decoding,
    Done,
    Failed,
}

/// Where a projection definition comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrjSource {
    Text(String),
    File(PathBuf),
    Wgs1984,
    WebMercator,
}

impl PrjSource {
    pub fn load(&self) -> Result<ProjectionDefinition, ProjectionError> {
        match self {
            PrjSource::Text(text) => ProjectionDefinition::parse(text),
            PrjSource::File(path) => ProjectionDefinition::from_file(path),
            PrjSource::Wgs1984 => Ok(ProjectionDefinition::wgs1984()),
            PrjSource::WebMercator => Ok(ProjectionDefinition::web_mercator()),
        }
    }
}

impl FromStr for PrjSource {
    type Err = std::convert::Infallible;

    /// `wgs1984` and `web_mercator` name the built-in systems, text ending in `.prj`
    /// is a file path, anything else is WKT.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let normalized: String = trimmed
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .collect::<String>()
            .to_ascii_lowercase();
        Ok(match normalized.as_str() {
            "wgs1984" | "wgs84" | "epsg4326" => PrjSource::Wgs1984,
            "webmercator" | "epsg3857" => PrjSource::WebMercator,
            _ if trimmed.to_ascii_lowercase().ends_with(".prj") => {
                PrjSource::File(PathBuf::from(trimmed))
            }
            _ => PrjSource::Text(trimmed.to_string()),
        })
    }
}

/// Geometry and attribute trees as handed over by the host, one branch per feature.
#[derive(Debug, Clone)]
pub struct ExportInput {
    pub kind: GeometryKind,
    /// Compact field specs, `"name"` or `"name;TypeName"`.
    pub fields: Vec<String>,
    pub geometry: Vec<Vec<Ring>>,
    pub attributes: Vec<Vec<AttributeValue>>,
}

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub format: Format,
    /// Layer geometry kind; taken from the first feature when unset.
    pub kind: Option<GeometryKind>,
    /// Projection of the input coordinates.
    pub source_prj: Option<PrjSource>,
    /// Projection to write. Coordinates are reprojected when both sides are set.
    pub target_prj: Option<PrjSource>,
    pub pretty: bool,
    /// Esri JSON WKID override.
    pub wkid: Option<i32>,
}

impl ExportOptions {
    pub fn new(format: Format) -> Self {
        Self {
            format,
            kind: None,
            source_prj: None,
            target_prj: None,
            pretty: false,
            wkid: None,
        }
    }
}

/// Materialize-or-preview: the payload is always produced, the file only when `write`.
#[derive(Debug, Clone, Default)]
pub struct Materialize {
    pub path: Option<PathBuf>,
    pub write: bool,
}

impl Materialize {
    pub fn preview() -> Self {
        Self::default()
    }

    pub fn to(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            write: true,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Payload {
    Text(String),
    Shapefile(ShapefileLayer),
}

impl Payload {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            Payload::Shapefile(_) => None,
        }
    }
}

#[derive(Debug)]
pub struct ExportOutcome {
    pub payload: Payload,
    pub features_written: usize,
    pub warnings: Vec<Warning>,
    pub message: String,
    pub written_to: Option<PathBuf>,
}

#[derive(Debug)]
pub struct ImportOutcome {
    pub layer: DecodedLayer,
    pub warnings: Vec<Warning>,
    pub message: String,
}

/// Runs conversion calls: validation, optional reprojection, encoding or decoding, and
/// the optional file write. Each call starts from `Idle` with an empty warning list and
/// ends in `Done` or `Failed`. Recoverable problems become warnings; only validation and
/// file access errors fail the call.
#[derive(Debug)]
pub struct Orchestrator {
    state: ConversionState,
    diagnostics: Diagnostics,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Orchestrator {
    pub fn new() -> Self {
        Self {
            state: ConversionState::Idle,
            diagnostics: Diagnostics::new(),
        }
    }

    pub fn state(&self) -> ConversionState {
        self.state
    }

    fn begin(&mut self) {
        self.state = ConversionState::Idle;
        self.diagnostics = Diagnostics::new();
    }

    fn transition(&mut self, next: ConversionState) {
        log::debug!("Conversion state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn fail<T>(&mut self, err: ConversionError) -> Result<T, ConversionError> {
        log::error!("Conversion failed: {}", err);
        self.transition(ConversionState::Failed);
        Err(err)
    }

    fn take_warnings(&mut self) -> Vec<Warning> {
        std::mem::take(&mut self.diagnostics).into_warnings()
    }

    /// Export host trees. The geometry and attribute trees must have the same number of
    /// branches; nothing is encoded or written otherwise.
    pub fn export(
        &mut self,
        input: ExportInput,
        options: &ExportOptions,
        materialize: &Materialize,
    ) -> Result<ExportOutcome, ConversionError> {
        self.begin();
        self.transition(ConversionState::Validating);
        let ExportInput {
            kind,
            fields,
            geometry,
            attributes,
        } = input;
        let mismatch = ConversionError::BranchCountMismatch {
            geometry: geometry.len(),
            attributes: attributes.len(),
        };
        let collection = match FeatureCollection::from_branches(kind, geometry, attributes) {
            Some(collection) => collection,
            None => return self.fail(mismatch),
        };

        let (schema, unresolved) = FieldSchema::from_specs(&fields);
        for (name, err) in unresolved {
            self.diagnostics.push(Warning::collection(format!(
                "Field '{}': {}, using String",
                name, err
            )));
        }

        let options = ExportOptions {
            kind: options.kind.or(Some(kind)),
            ..options.clone()
        };
        self.run_export(collection, &schema, &options, None, materialize)
    }

    /// Export an already built collection.
    pub fn export_collection(
        &mut self,
        collection: FeatureCollection,
        schema: &FieldSchema,
        options: &ExportOptions,
        materialize: &Materialize,
    ) -> Result<ExportOutcome, ConversionError> {
        self.begin();
        self.transition(ConversionState::Validating);
        self.run_export(collection, schema, options, None, materialize)
    }

    /// Read a file. With `read` false nothing is touched and an empty layer is returned.
    pub fn import(
        &mut self,
        path: &Path,
        format: Option<Format>,
        options: &DecodeOptions,
        read: bool,
    ) -> Result<ImportOutcome, ConversionError> {
        self.begin();
        if !read {
            self.transition(ConversionState::Done);
            return Ok(ImportOutcome {
                layer: DecodedLayer {
                    collection: FeatureCollection::new(),
                    schema: FieldSchema::default(),
                    projection: None,
                },
                warnings: Vec::new(),
                message: "Set read to true to import.".to_string(),
            });
        }
        self.transition(ConversionState::Validating);
        let layer = self.run_import(path, format, options)?;
        let message = format!("Read {} features.", layer.collection.len());
        log::info!("{}", message);
        self.transition(ConversionState::Done);
        Ok(ImportOutcome {
            layer,
            warnings: self.take_warnings(),
            message,
        })
    }

    /// Convert a file from one format to another in process.
    ///
    /// The projection read from the input is used as the source projection unless
    /// `options.source_prj` is given.
    pub fn convert(
        &mut self,
        input: &Path,
        input_format: Option<Format>,
        decode_options: &DecodeOptions,
        options: &ExportOptions,
        materialize: &Materialize,
    ) -> Result<ExportOutcome, ConversionError> {
        self.begin();
        self.transition(ConversionState::Validating);
        let layer = self.run_import(input, input_format, decode_options)?;
        let options = ExportOptions {
            kind: options.kind.or_else(|| layer.collection.layer_kind()),
            ..options.clone()
        };
        self.run_export(
            layer.collection,
            &layer.schema,
            &options,
            layer.projection,
            materialize,
        )
    }

    fn run_import(
        &mut self,
        path: &Path,
        format: Option<Format>,
        options: &DecodeOptions,
    ) -> Result<DecodedLayer, ConversionError> {
        if !path.exists() {
            return self.fail(ConversionError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "file does not exist"),
            ));
        }

        self.transition(ConversionState::Decoding);
        let decoded = match format.or_else(|| Format::from_path(path)) {
            Some(Format::Shapefile) => {
                log::info!("Reading {} from {:?}", Format::Shapefile, path);
                shp::decode(path, options, &mut self.diagnostics)
            }
            known => match fs::read_to_string(path) {
                Ok(text) => {
                    let format = known.unwrap_or_else(|| Format::sniff_json(&text));
                    log::info!("Reading {} from {:?}", format, path);
                    match format {
                        Format::GeoJson => geojson::decode(&text, options, &mut self.diagnostics),
                        _ => esri_json::decode(&text, options, &mut self.diagnostics),
                    }
                }
                Err(source) => Err(ConversionError::io(path, source)),
            },
        };
        match decoded {
            Ok(layer) => Ok(layer),
            Err(err) => self.fail(err),
        }
    }

    fn load_projection(&mut self, source: Option<&PrjSource>) -> Option<ProjectionDefinition> {
        match source?.load() {
            Ok(projection) => Some(projection),
            Err(err) => {
                self.diagnostics
                    .push(Warning::collection(format!("Failed to read .prj: {}", err)));
                None
            }
        }
    }

    fn reproject_collection(
        &mut self,
        collection: &mut FeatureCollection,
        source: &ProjectionDefinition,
        target: &ProjectionDefinition,
    ) {
        let reprojector = match Reprojector::new(source, target) {
            Ok(reprojector) => reprojector,
            Err(err) => {
                self.diagnostics.push(Warning::collection(format!(
                    "Coordinates written without reprojection: {}",
                    err
                )));
                return;
            }
        };
        log::info!(
            "Reprojecting {} features from '{}' to '{}'",
            collection.len(),
            reprojector.source_name(),
            reprojector.target_name()
        );
        for feature in collection.features_mut() {
            let reprojected: Result<Vec<Ring>, ProjectionError> = feature
                .parts
                .iter()
                .map(|ring| reprojector.reproject(&ring.vertices).map(Ring::new))
                .collect();
            match reprojected {
                Ok(parts) => feature.parts = parts,
                Err(err) => self.diagnostics.push(Warning::feature(
                    feature.id,
                    format!("written without reprojection: {}", err),
                )),
            }
        }
    }

    fn run_export(
        &mut self,
        mut collection: FeatureCollection,
        schema: &FieldSchema,
        options: &ExportOptions,
        input_projection: Option<ProjectionDefinition>,
        materialize: &Materialize,
    ) -> Result<ExportOutcome, ConversionError> {
        let output_path = match (materialize.write, &materialize.path) {
            (true, Some(path)) => Some(path.clone()),
            (true, None) => {
                return self.fail(ConversionError::Validation(
                    "write is set but no output path was given".to_string(),
                ))
            }
            (false, _) => None,
        };

        let source = self
            .load_projection(options.source_prj.as_ref())
            .or(input_projection);
        let target = self.load_projection(options.target_prj.as_ref());
        if let (Some(source), Some(target)) = (&source, &target) {
            self.reproject_collection(&mut collection, source, target);
        }
        let projection = target.or(source);

        self.transition(ConversionState::Encoding);
        let kind = options.kind.or_else(|| collection.layer_kind());
        log::info!("Encoding {} features as {}", collection.len(), options.format);
        let encoded = match options.format {
            Format::GeoJson => geojson::encode(
                &collection,
                schema,
                &GeoJsonOptions {
                    pretty: options.pretty,
                },
                &mut self.diagnostics,
            )
            .map(text_payload),
            Format::EsriJson => esri_json::encode(
                &collection,
                schema,
                &EsriJsonOptions {
                    pretty: options.pretty,
                    kind,
                    projection,
                    wkid: options.wkid,
                },
                &mut self.diagnostics,
            )
            .map(text_payload),
            Format::Shapefile => shp::encode(
                &collection,
                schema,
                &ShapefileOptions { kind, projection },
                &mut self.diagnostics,
            )
            .map(|encoded| Encoded {
                payload: Payload::Shapefile(encoded.payload),
                features_written: encoded.features_written,
            }),
        };
        let Encoded {
            payload,
            features_written,
        } = match encoded {
            Ok(encoded) => encoded,
            Err(err) => return self.fail(err),
        };

        let kind_name = kind.map(|kind| kind.name()).unwrap_or("point");
        let message = match &output_path {
            Some(path) => {
                if let Err(err) = write_payload(&payload, path) {
                    return self.fail(err);
                }
                format!("Wrote {} {} features.", features_written, kind_name)
            }
            None => format!(
                "Encoded {} {} features. Set write to true to export.",
                features_written, kind_name
            ),
        };
        log::info!("{}", message);
        self.transition(ConversionState::Done);

        Ok(ExportOutcome {
            payload,
            features_written,
            warnings: self.take_warnings(),
            message,
            written_to: output_path,
        })
    }
}

fn text_payload(encoded: Encoded<String>) -> Encoded<Payload> {
    Encoded {
        payload: Payload::Text(encoded.payload),
        features_written: encoded.features_written,
    }
}

fn write_payload(payload: &Payload, path: &Path) -> Result<(), ConversionError> {
    match payload {
        Payload::Text(text) => {
            fs::write(path, text).map_err(|source| ConversionError::io(path, source))
        }
        Payload::Shapefile(layer) => layer.write(path).map(|_| ()),
    }
}
