use proj::Proj;

use crate::{error::ProjectionError, geofile::feature::Vertex};

use super::projection::ProjectionDefinition;

enum Backend {
    Identity,
    Proj(Proj),
}

/// Transformation between two coordinate systems, built once and applied per vertex.
pub struct Reprojector {
    backend: Backend,
    source_name: String,
    target_name: String,
}

impl Reprojector {
    pub fn new(
        source: &ProjectionDefinition,
        target: &ProjectionDefinition,
    ) -> Result<Self, ProjectionError> {
        let backend = if source.same_system(target) {
            Backend::Identity
        } else {
            Backend::Proj(Self::proj_transform(source, target)?)
        };
        log::debug!(
            "Reprojecting from '{}' to '{}'",
            source.name(),
            target.name()
        );
        Ok(Self {
            backend,
            source_name: source.name().to_string(),
            target_name: target.name().to_string(),
        })
    }

    /// Each side is handed to PROJ as "EPSG:xxxx" when the code is known, else as WKT.
    fn proj_transform(
        source: &ProjectionDefinition,
        target: &ProjectionDefinition,
    ) -> Result<Proj, ProjectionError> {
        let from = source
            .authority_string()
            .unwrap_or_else(|| source.wkt().to_string());
        let to = target
            .authority_string()
            .unwrap_or_else(|| target.wkt().to_string());
        Proj::new_known_crs(&from, &to, None).map_err(|err| ProjectionError::Unsupported {
            source_name: format!("{} ({})", source.name(), err),
            target_name: target.name().to_string(),
        })
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    /// Transform every vertex, preserving order and count. z is carried through.
    pub fn reproject(&self, points: &[Vertex]) -> Result<Vec<Vertex>, ProjectionError> {
        points.iter().map(|point| self.reproject_vertex(point)).collect()
    }

    pub fn reproject_vertex(&self, point: &Vertex) -> Result<Vertex, ProjectionError> {
        let (x, y) = match &self.backend {
            Backend::Identity => (point.x, point.y),
            Backend::Proj(transform) => {
                transform
                    .convert((point.x, point.y))
                    .map_err(|err| ProjectionError::Transform {
                        x: point.x,
                        y: point.y,
                        message: err.to_string(),
                    })?
            }
        };
        if !x.is_finite() || !y.is_finite() {
            return Err(ProjectionError::Transform {
                x: point.x,
                y: point.y,
                message: "result is not finite".to_string(),
            });
        }
        Ok(Vertex { x, y, z: point.z })
    }
}

/// Transform `points` from `source` to `target`.
pub fn reproject(
    points: &[Vertex],
    source: &ProjectionDefinition,
    target: &ProjectionDefinition,
) -> Result<Vec<Vertex>, ProjectionError> {
    Reprojector::new(source, target)?.reproject(points)
}

/// Reproject a single x/y pair, e.g. a projected point to WGS84 longitude/latitude.
pub fn reproject_point(
    x: f64,
    y: f64,
    source: &ProjectionDefinition,
    target: &ProjectionDefinition,
) -> Result<(f64, f64), ProjectionError> {
    let vertex = Reprojector::new(source, target)?.reproject_vertex(&Vertex::new(x, y))?;
    Ok((vertex.x, vertex.y))
}
