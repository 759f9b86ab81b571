pub mod esri_json;
pub mod feature;
pub mod geojson;
pub mod schema;
pub mod shp;

use crate::crs::projection::ProjectionDefinition;

use self::{
    feature::{AttributeValue, FeatureCollection},
    schema::FieldSchema,
};

/// Blank values on import become this text unless configured otherwise.
pub const DEFAULT_BLANK_SENTINEL: &str = "nan";

/// Output of an encoder together with the number of features it accepted.
#[derive(Debug)]
pub struct Encoded<T> {
    pub payload: T,
    pub features_written: usize,
}

#[derive(Debug, Clone)]
pub struct DecodeOptions {
    /// Replacement for null, empty and whitespace-only values. None keeps them null.
    pub blank_sentinel: Option<String>,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            blank_sentinel: Some(DEFAULT_BLANK_SENTINEL.to_string()),
        }
    }
}

impl DecodeOptions {
    pub fn blank_value(&self) -> AttributeValue {
        match &self.blank_sentinel {
            Some(sentinel) => AttributeValue::Text(sentinel.clone()),
            None => AttributeValue::Null,
        }
    }
}

/// A layer read back from one of the formats.
#[derive(Debug, Clone)]
pub struct DecodedLayer {
    pub collection: FeatureCollection,
    pub schema: FieldSchema,
    pub projection: Option<ProjectionDefinition>,
}
