//! Spatial primitives: distance math and R-tree nodes.

pub mod index;
pub mod queries;

pub use index::SegmentNode;
pub use queries::{
    cumulative_lengths, degrees_to_meters_approx, haversine_distance,
    haversine_distance_to_line, interpolate_along, meters_to_degrees_approx, meters_to_miles,
    miles_to_meters, project_onto_segment, SegmentProjection, MILE_M,
};
