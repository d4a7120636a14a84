//! Point↔mile geocoding over a snapshot of resolvable routes.
//!
//! Built once from the route store's current contents; reads are
//! side-effect-free and safe to share across request handlers. Rebuild
//! after route edits.

use std::collections::{BTreeMap, HashMap};

use geo::{Line, Point};
use rstar::RTree;

use crate::identifiers::RouteId;
use crate::models::{CompassDirection, Result, Route, RouteError};
use crate::spatial::index::SegmentNode;
use crate::spatial::queries::{
    cumulative_lengths, haversine_distance, interpolate_along, meters_to_degrees_approx,
    meters_to_miles, miles_to_meters, project_onto_segment,
};

/// Default buffer around a query point when hunting for candidate routes.
pub const DEFAULT_SEARCH_RADIUS_M: f64 = 800.0;

// The degree-space prefilter underestimates longitude spans away from
// the equator; widen it and let the haversine check trim.
const PREFILTER_SLACK: f64 = 2.0;

/// A successful point→mile resolution.
#[derive(Clone, Copy, Debug)]
pub struct MileMatch {
    pub route_id: RouteId,
    pub mile_value: f64,
    pub distance_from_route_m: f64,
}

struct IndexedRoute {
    route: Route,
    /// Arc length at each vertex, meters.
    cum_m: Vec<f64>,
    /// Arc length at the anchor vertex.
    anchor_arc_m: f64,
    /// Known mile value at the anchor.
    mm_value: f64,
    /// +1 if mile values grow with arc length, -1 if they shrink.
    sign: f64,
}

impl IndexedRoute {
    fn mile_at_arc(&self, arc_m: f64) -> f64 {
        self.mm_value + self.sign * meters_to_miles(arc_m - self.anchor_arc_m)
    }

    fn total_m(&self) -> f64 {
        self.cum_m.last().copied().unwrap_or(0.0)
    }
}

/// Whether increasing arc length runs toward the direction in which mile
/// values decrease. Decided by the endpoint displacement on the relevant
/// axis: a route whose last vertex lies north of its first runs toward
/// NB as arc length grows.
fn arc_sign(points: &[Point], decrease_toward: CompassDirection) -> f64 {
    let first = points[0];
    let last = points[points.len() - 1];
    let toward_component = match decrease_toward {
        CompassDirection::NB => last.y() - first.y(),
        CompassDirection::SB => first.y() - last.y(),
        CompassDirection::EB => last.x() - first.x(),
        CompassDirection::WB => first.x() - last.x(),
    };
    if toward_component > 0.0 {
        -1.0
    } else {
        1.0
    }
}

pub struct MileMarkerResolver {
    routes: BTreeMap<RouteId, IndexedRoute>,
    tree: RTree<SegmentNode>,
    search_radius_m: f64,
}

impl MileMarkerResolver {
    /// Build a resolver from a set of routes.
    ///
    /// Routes that are not resolvable (missing anchor, value, or
    /// decrease direction) are silently excluded; the editor's working
    /// state must never leak into geocoding.
    pub fn from_routes(routes: Vec<Route>) -> Self {
        let mut indexed = BTreeMap::new();
        let mut nodes = Vec::new();

        for route in routes {
            let (anchor, decrease_toward) = match (route.anchor, route.miles_decrease_toward) {
                (Some(a), Some(d)) if route.is_resolvable() => (a, d),
                _ => continue,
            };
            let cum_m = cumulative_lengths(&route.points);
            let anchor_arc_m = cum_m[anchor.point_index];
            let sign = arc_sign(&route.points, decrease_toward);

            for (i, pair) in route.points.windows(2).enumerate() {
                nodes.push(SegmentNode::new(
                    route.id,
                    i,
                    Line::new(pair[0].0, pair[1].0),
                ));
            }
            indexed.insert(
                route.id,
                IndexedRoute {
                    route,
                    cum_m,
                    anchor_arc_m,
                    mm_value: anchor.mm_value,
                    sign,
                },
            );
        }

        Self {
            routes: indexed,
            tree: RTree::bulk_load(nodes),
            search_radius_m: DEFAULT_SEARCH_RADIUS_M,
        }
    }

    pub fn with_search_radius(mut self, radius_m: f64) -> Self {
        self.search_radius_m = radius_m;
        self
    }

    pub fn route(&self, id: RouteId) -> Option<&Route> {
        self.routes.get(&id).map(|ir| &ir.route)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Resolve a GPS point to a route and mile value.
    ///
    /// Candidates inside the search buffer are ranked: an exact
    /// case-insensitive match on `road_hint` (name or alias) wins,
    /// then smallest perpendicular distance, then ascending route id.
    pub fn resolve_point(&self, point: Point, road_hint: Option<&str>) -> Result<MileMatch> {
        let buffer_deg = meters_to_degrees_approx(self.search_radius_m) * PREFILTER_SLACK;

        // Best projection per candidate route: (distance m, arc length m)
        let mut best: HashMap<RouteId, (f64, f64)> = HashMap::new();

        for node in self
            .tree
            .locate_within_distance([point.x(), point.y()], buffer_deg * buffer_deg)
        {
            let ir = &self.routes[&node.route_id];
            let proj = project_onto_segment(point, node.segment);
            let dist_m = haversine_distance(point, proj.closest);
            if dist_m > self.search_radius_m {
                continue;
            }
            let seg_len_m = ir.cum_m[node.segment_index + 1] - ir.cum_m[node.segment_index];
            let arc_m = ir.cum_m[node.segment_index] + proj.fraction * seg_len_m;

            match best.get(&node.route_id) {
                Some((d, _)) if *d <= dist_m => {}
                _ => {
                    best.insert(node.route_id, (dist_m, arc_m));
                }
            }
        }

        let hint_matches = |id: &RouteId| {
            road_hint
                .map(|hint| self.routes[id].route.matches_name(hint))
                .unwrap_or(false)
        };

        let Some((route_id, (dist_m, arc_m))) = best
            .into_iter()
            .min_by(|(id_a, (dist_a, _)), (id_b, (dist_b, _))| {
                hint_matches(id_b)
                    .cmp(&hint_matches(id_a))
                    .then(dist_a.total_cmp(dist_b))
                    .then(id_a.cmp(id_b))
            })
        else {
            return Err(RouteError::NoRouteMatch {
                radius_m: self.search_radius_m,
            });
        };

        let ir = &self.routes[&route_id];
        Ok(MileMatch {
            route_id,
            mile_value: ir.mile_at_arc(arc_m),
            distance_from_route_m: dist_m,
        })
    }

    /// Resolve a mile value on a route back to a GPS point.
    ///
    /// Fails with `OutOfRange` if the value falls beyond the polyline's
    /// extent in either direction; there is no extrapolation past the
    /// recorded endpoints.
    pub fn resolve_mile(&self, route_id: RouteId, mile_value: f64) -> Result<Point> {
        let ir = self
            .routes
            .get(&route_id)
            .ok_or(RouteError::RouteNotFound(route_id))?;

        let arc_m = ir.anchor_arc_m + ir.sign * miles_to_meters(mile_value - ir.mm_value);
        let total_m = ir.total_m();

        // Small slack for float noise at the exact endpoints
        const EPS_M: f64 = 1e-6;
        if arc_m < -EPS_M || arc_m > total_m + EPS_M {
            let m0 = ir.mile_at_arc(0.0);
            let m1 = ir.mile_at_arc(total_m);
            return Err(RouteError::OutOfRange {
                requested: mile_value,
                min: m0.min(m1),
                max: m0.max(m1),
            });
        }
        let arc_m = arc_m.clamp(0.0, total_m);

        // Bracketing vertex pair by cumulative arc length
        let i = ir
            .cum_m
            .partition_point(|&c| c <= arc_m)
            .saturating_sub(1)
            .min(ir.route.points.len() - 2);
        let seg_len = ir.cum_m[i + 1] - ir.cum_m[i];
        let t = if seg_len > 0.0 {
            (arc_m - ir.cum_m[i]) / seg_len
        } else {
            0.0
        };
        Ok(interpolate_along(ir.route.points[i], ir.route.points[i + 1], t))
    }
}
