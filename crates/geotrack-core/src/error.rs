//! # Error Types
//!
//! Validation failures for domain primitives. Every variant carries the
//! offending value so that rejection reasons can be reported verbatim to
//! the agent client.

use thiserror::Error;

/// A domain value failed validation at construction time.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Latitude or longitude is NaN or infinite.
    #[error("coordinate components must be finite numbers")]
    NonFiniteCoordinate,

    /// Latitude outside `[-90, 90]`.
    #[error("latitude {0} is outside [-90, 90]")]
    LatitudeOutOfRange(f64),

    /// Longitude outside `[-180, 180]`.
    #[error("longitude {0} is outside [-180, 180]")]
    LongitudeOutOfRange(f64),

    /// Horizontal accuracy is negative or not finite.
    #[error("accuracy {0} m must be a finite, non-negative number")]
    InvalidAccuracy(f64),

    /// Speed is negative or not finite.
    #[error("speed {0} m/s must be a finite, non-negative number")]
    InvalidSpeed(f64),

    /// Heading outside `[0, 360)`.
    #[error("heading {0} must be in [0, 360) degrees")]
    InvalidHeading(f64),

    /// Battery level above 100 percent.
    #[error("battery level {0} must be between 0 and 100 percent")]
    InvalidBattery(u8),

    /// Client deduplication key is empty or too long.
    #[error("dedup key must be 1..={max} characters, got {len}")]
    InvalidDedupKey { len: usize, max: usize },

    /// Sample timestamp lies too far in the future.
    #[error("sample timestamp {0} is in the future")]
    TimestampInFuture(String),

    /// Circular zone radius is zero, negative, or not finite.
    #[error("zone radius {0} m must be a finite, positive number")]
    InvalidRadius(f64),

    /// Polygon has fewer than three vertices.
    #[error("polygon zone needs at least 3 vertices, got {0}")]
    TooFewVertices(usize),

    /// Polygon encloses no area.
    #[error("polygon zone encloses no area")]
    DegeneratePolygon,

    /// Two non-adjacent polygon edges touch or cross.
    #[error("polygon zone edges {0} and {1} intersect")]
    SelfIntersectingPolygon(usize, usize),

    /// Polygon is too large for the local tangent-plane approximation.
    #[error("polygon zone spans {0:.0} m, exceeding the supported extent")]
    PolygonTooLarge(f64),

    /// Zone label is empty.
    #[error("zone label must not be empty")]
    EmptyLabel,
}
