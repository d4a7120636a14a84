//! # flare-routes
//!
//! Mile-marker linear referencing over named highway routes.
//!
//! A [`models::Route`] is an ordered polyline with a single anchor point
//! whose mile value is known; every other position on the route gets its
//! value from arc length relative to that anchor. This crate holds the
//! pure-geometry core:
//!
//! - **Geometry primitives**: haversine distance, segment projection,
//!   cumulative arc length (`spatial::queries`)
//! - **Route editing**: the `Empty → Tracing → Drawing → SettingAnchor →
//!   Ready` workflow with anchor-index bookkeeping (`editor`)
//! - **Geocoding**: point↔mile resolution over an R-tree of route
//!   segments (`resolver`)
//!
//! ## Example
//!
//! ```
//! use flare_routes::prelude::*;
//! use geo::Point;
//!
//! let route = Route {
//!     id: RouteId::new(1),
//!     name: "I-76".into(),
//!     aliases: vec!["SCHUYLKILL EXPY".into()],
//!     points: vec![
//!         Point::new(-75.0, 40.06),
//!         Point::new(-75.0, 40.03),
//!         Point::new(-75.0, 40.00),
//!     ],
//!     bidirectional: true,
//!     direction: None,
//!     limited_access: true,
//!     anchor: Some(MileAnchor { point_index: 1, mm_value: 320.0 }),
//!     miles_decrease_toward: Some(CompassDirection::NB),
//! };
//!
//! let resolver = MileMarkerResolver::from_routes(vec![route]);
//! let hit = resolver
//!     .resolve_point(Point::new(-75.0001, 40.03), Some("I-76"))
//!     .unwrap();
//! assert!((hit.mile_value - 320.0).abs() < 0.05);
//! ```

pub mod editor;
pub mod identifiers;
pub mod models;
pub mod resolver;
pub mod spatial;

// Re-exports for convenience
pub mod prelude {
    pub use crate::editor::{EditorState, MapClick, RoadTracer, RouteEditor};
    pub use crate::identifiers::RouteId;
    pub use crate::models::{CompassDirection, MileAnchor, Route, RouteError};
    pub use crate::resolver::{MileMarkerResolver, MileMatch};
}

pub use prelude::*;
