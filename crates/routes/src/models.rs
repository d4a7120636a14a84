//! Route data model and errors.

use geo::Point;
use serde::{Deserialize, Serialize};

use crate::identifiers::RouteId;

// ============================================================================
// Enums
// ============================================================================

/// Compass direction of travel, as signed by the highway.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompassDirection {
    NB,
    SB,
    EB,
    WB,
}

impl CompassDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NB => "NB",
            Self::SB => "SB",
            Self::EB => "EB",
            Self::WB => "WB",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NB" => Some(Self::NB),
            "SB" => Some(Self::SB),
            "EB" => Some(Self::EB),
            "WB" => Some(Self::WB),
            _ => None,
        }
    }
}

impl std::fmt::Display for CompassDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Data structures
// ============================================================================

/// The single point on a route whose mile value is known.
///
/// Every other position on the route is computed from arc length
/// relative to this anchor.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MileAnchor {
    /// Index into the route's point sequence.
    pub point_index: usize,
    /// Known mile-marker value at that point, `>= 0`.
    pub mm_value: f64,
}

/// A named highway reference line.
///
/// `points` is ordered and semantically meaningful: it defines both the
/// polyline and its traversal direction. The anchor/value pair is the
/// single source of truth for the whole route's linear reference; no
/// per-point mile values are stored.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Route {
    pub id: RouteId,
    pub name: String,
    /// Alternate names a dispatch source might use, stored uppercase.
    pub aliases: Vec<String>,
    pub points: Vec<Point>,
    pub bidirectional: bool,
    /// Signed direction, required when not bidirectional.
    pub direction: Option<CompassDirection>,
    /// Excludes the route from general routing use; informational only.
    pub limited_access: bool,
    pub anchor: Option<MileAnchor>,
    /// Compass direction in which mile values decrease.
    pub miles_decrease_toward: Option<CompassDirection>,
}

impl Route {
    /// Check the persistable invariants.
    ///
    /// An incomplete route (no anchor yet) is still saveable as editor
    /// working state; what `validate` rejects is structurally broken
    /// data that no state should contain.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(RouteError::Validation("route name is empty".into()));
        }
        if self.points.len() < 2 {
            return Err(RouteError::Validation(format!(
                "route needs at least 2 points, has {}",
                self.points.len()
            )));
        }
        if !self.bidirectional && self.direction.is_none() {
            return Err(RouteError::Validation(
                "direction is required for a one-way route".into(),
            ));
        }
        if let Some(anchor) = &self.anchor {
            if anchor.point_index >= self.points.len() {
                return Err(RouteError::Validation(format!(
                    "anchor index {} out of bounds for {} points",
                    anchor.point_index,
                    self.points.len()
                )));
            }
            if !anchor.mm_value.is_finite() || anchor.mm_value < 0.0 {
                return Err(RouteError::Validation(format!(
                    "anchor mile value {} must be a finite non-negative number",
                    anchor.mm_value
                )));
            }
        }
        Ok(())
    }

    /// A route is resolvable only when the anchor, its value, and the
    /// decrease direction are all set. Incomplete routes must never be
    /// exposed to the resolver.
    pub fn is_resolvable(&self) -> bool {
        self.anchor.is_some() && self.miles_decrease_toward.is_some() && self.validate().is_ok()
    }

    /// Case-insensitive match against the route name and aliases.
    pub fn matches_name(&self, hint: &str) -> bool {
        let hint = hint.trim().to_ascii_uppercase();
        if hint.is_empty() {
            return false;
        }
        self.name.to_ascii_uppercase() == hint || self.aliases.iter().any(|a| *a == hint)
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("no route within {radius_m:.0} m of the query point")]
    NoRouteMatch { radius_m: f64 },

    #[error("mile {requested} is outside the route extent ({min:.2}..{max:.2})")]
    OutOfRange { requested: f64, min: f64, max: f64 },

    #[error("route not found: {0}")]
    RouteNotFound(RouteId),

    #[error("invalid route: {0}")]
    Validation(String),

    #[error("trace failed: {0}")]
    TraceFailed(String),

    #[error("operation not allowed in editor state {state}")]
    InvalidState { state: &'static str },
}

pub type Result<T> = std::result::Result<T, RouteError>;
