//! # Geofences
//!
//! Zone definitions owned by site configuration. The engine only reads
//! active zones; creation and editing belong to the site-management
//! collaborator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::coordinate::Coordinate;
use crate::error::ValidationError;
use crate::geometry::{self, MAX_POLYGON_SPAN_M};
use crate::identity::{GeofenceId, SiteId};

/// Zone geometry: a circle or a simple polygon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ZoneShape {
    /// All points within `radius_m` of `center`.
    Circle { center: Coordinate, radius_m: f64 },
    /// An ordered ring of at least three vertices. The ring is implicitly
    /// closed; the first vertex is not repeated.
    Polygon { vertices: Vec<Coordinate> },
}

impl ZoneShape {
    /// Build a validated circular zone.
    pub fn circle(center: Coordinate, radius_m: f64) -> Result<Self, ValidationError> {
        let shape = ZoneShape::Circle { center, radius_m };
        shape.validate()?;
        Ok(shape)
    }

    /// Build a validated polygon zone.
    pub fn polygon(vertices: Vec<Coordinate>) -> Result<Self, ValidationError> {
        let shape = ZoneShape::Polygon { vertices };
        shape.validate()?;
        Ok(shape)
    }

    /// Check structural constraints.
    ///
    /// Circles need a finite positive radius. Polygons need at least three
    /// vertices, a non-zero area, no crossing edges, and an extent small
    /// enough for the tangent-plane approximation.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            ZoneShape::Circle { radius_m, .. } => {
                if !radius_m.is_finite() || *radius_m <= 0.0 {
                    return Err(ValidationError::InvalidRadius(*radius_m));
                }
                Ok(())
            }
            ZoneShape::Polygon { vertices } => {
                if vertices.len() < 3 {
                    return Err(ValidationError::TooFewVertices(vertices.len()));
                }
                let span = vertices
                    .iter()
                    .flat_map(|a| {
                        vertices
                            .iter()
                            .map(move |b| geometry::haversine_distance_m(a, b))
                    })
                    .fold(0.0, f64::max);
                if span > MAX_POLYGON_SPAN_M {
                    return Err(ValidationError::PolygonTooLarge(span));
                }
                if geometry::polygon_area_m2(vertices).abs() < 1e-6 {
                    return Err(ValidationError::DegeneratePolygon);
                }
                if let Some((a, b)) = geometry::crossing_edges(vertices) {
                    return Err(ValidationError::SelfIntersectingPolygon(a, b));
                }
                Ok(())
            }
        }
    }

    /// Short name for logs and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            ZoneShape::Circle { .. } => "circle",
            ZoneShape::Polygon { .. } => "polygon",
        }
    }
}

/// A geofence zone belonging to a site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geofence {
    pub id: GeofenceId,
    pub site_id: SiteId,
    pub label: String,
    pub shape: ZoneShape,
    pub active: bool,
    pub updated_at: DateTime<Utc>,
}

impl Geofence {
    /// Create an active geofence after validating its shape and label.
    pub fn new(
        site_id: SiteId,
        label: impl Into<String>,
        shape: ZoneShape,
    ) -> Result<Self, ValidationError> {
        let label = label.into().trim().to_string();
        if label.is_empty() {
            return Err(ValidationError::EmptyLabel);
        }
        shape.validate()?;
        Ok(Self {
            id: GeofenceId::new(),
            site_id,
            label,
            shape,
            active: true,
            updated_at: Utc::now(),
        })
    }

    /// Whether `point` lies inside this zone (boundary-inclusive).
    pub fn contains(&self, point: &Coordinate) -> bool {
        geometry::contains(&self.shape, point)
    }

    /// Distance from `point` to this zone in meters, zero when inside.
    pub fn distance_outside_m(&self, point: &Coordinate) -> f64 {
        geometry::distance_outside_m(&self.shape, point)
    }
}
