pub mod convert;
pub mod crs;
pub mod error;
pub mod geofile;
