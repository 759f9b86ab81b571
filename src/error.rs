use std::path::PathBuf;

use thiserror::Error;

use crate::geofile::schema::FieldType;

/// Errors that abort a whole conversion call.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error(
        "attribute branch count ({attributes}) should be equal to geometry branch count ({geometry})"
    )]
    BranchCountMismatch { geometry: usize, attributes: usize },
    #[error("{0}")]
    Validation(String),
    #[error("could not access {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed {format} document: {message}")]
    Malformed {
        format: &'static str,
        message: String,
    },
    #[error("shapefile error: {0}")]
    Shapefile(#[from] shapefile::Error),
    #[error("dbase error: {0}")]
    Dbase(#[from] shapefile::dbase::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConversionError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConversionError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn malformed(format: &'static str, message: impl Into<String>) -> Self {
        ConversionError::Malformed {
            format,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("empty projection definition")]
    Empty,
    #[error("could not parse projection definition at byte {position}: {message}")]
    Parse { position: usize, message: String },
    #[error("could not read projection file {path:?}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no transformation available from '{source_name}' to '{target_name}'")]
    Unsupported {
        source_name: String,
        target_name: String,
    },
    #[error("could not transform ({x}, {y}): {message}")]
    Transform { x: f64, y: f64, message: String },
}

#[derive(Debug, Error)]
#[error("value '{raw}' failed to convert to {target}: {message}")]
pub struct CoercionError {
    pub raw: String,
    pub target: FieldType,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum GeometryBuildError {
    #[error("feature has no geometry")]
    Empty,
    #[error("ring {ring} has {count} vertices after closing, at least 4 are required")]
    TooFewRingVertices { ring: usize, count: usize },
    #[error("ring {ring} is degenerate (zero area)")]
    DegenerateRing { ring: usize },
    #[error("path {part} has {count} vertices, at least 2 are required")]
    TooFewPathVertices { part: usize, count: usize },
    #[error("point feature has {0} vertices where exactly one is required")]
    PointArity(usize),
    #[error("non-finite coordinate in part {part}")]
    NonFinite { part: usize },
    #[error("{kind} feature does not match the {layer} layer")]
    KindMismatch { kind: String, layer: String },
    #[error("unsupported geometry type '{0}'")]
    UnsupportedType(String),
    #[error("invalid geometry: {0}")]
    Invalid(String),
}
