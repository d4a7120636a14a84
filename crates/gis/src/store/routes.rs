//! Route persistence.

use geo::Point;
use rusqlite::{params, Connection, OptionalExtension, Row};

use flare_routes::{CompassDirection, MileAnchor, MileMarkerResolver, Route, RouteError, RouteId};

use crate::error::{GisError, Result};
use crate::store::GisStore;

impl GisStore {
    /// Insert or fully update a route, including the point sequence and
    /// anchor. A route that fails validation is rejected before any
    /// write; a new route (id 0) gets its assigned id back.
    pub fn save_route(&self, route: &Route) -> Result<RouteId> {
        route.validate().map_err(GisError::Route)?;

        let points_json = serde_json::to_string(&route.points)?;
        let aliases_json = serde_json::to_string(&route.aliases)?;

        self.with_conn(|conn| {
            if route.id.raw() == 0 {
                conn.execute(
                    "INSERT INTO routes
                        (name, aliases_json, points_json, bidirectional, direction,
                         limited_access, anchor_index, anchor_value, miles_decrease_toward)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        route.name,
                        aliases_json,
                        points_json,
                        route.bidirectional,
                        route.direction.map(CompassDirection::as_str),
                        route.limited_access,
                        route.anchor.map(|a| a.point_index as i64),
                        route.anchor.map(|a| a.mm_value),
                        route.miles_decrease_toward.map(CompassDirection::as_str),
                    ],
                )?;
                Ok(RouteId::new(conn.last_insert_rowid()))
            } else {
                let changed = conn.execute(
                    "UPDATE routes SET
                        name = ?2, aliases_json = ?3, points_json = ?4,
                        bidirectional = ?5, direction = ?6, limited_access = ?7,
                        anchor_index = ?8, anchor_value = ?9,
                        miles_decrease_toward = ?10, updated_at = datetime('now')
                     WHERE id = ?1",
                    params![
                        route.id.raw(),
                        route.name,
                        aliases_json,
                        points_json,
                        route.bidirectional,
                        route.direction.map(CompassDirection::as_str),
                        route.limited_access,
                        route.anchor.map(|a| a.point_index as i64),
                        route.anchor.map(|a| a.mm_value),
                        route.miles_decrease_toward.map(CompassDirection::as_str),
                    ],
                )?;
                if changed == 0 {
                    return Err(GisError::Route(RouteError::RouteNotFound(route.id)));
                }
                Ok(route.id)
            }
        })
    }

    pub fn get_route(&self, id: RouteId) -> Result<Option<Route>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("{ROUTE_SELECT} WHERE id = ?1"),
                params![id.raw()],
                row_to_route,
            )
            .optional()
            .map_err(GisError::from)
        })
    }

    pub fn list_routes(&self) -> Result<Vec<Route>> {
        self.with_conn(|conn| query_routes(conn, &format!("{ROUTE_SELECT} ORDER BY id")))
    }

    /// Routes fit to feed the mile-marker resolver: anchor, value, and
    /// decrease direction all present. Editor working state stays out.
    pub fn load_resolvable_routes(&self) -> Result<Vec<Route>> {
        let all = self.list_routes()?;
        Ok(all.into_iter().filter(Route::is_resolvable).collect())
    }

    /// Snapshot the resolvable routes into a fresh geocoding resolver.
    /// Rebuild after route edits; resolver reads are lock-free.
    pub fn build_resolver(&self) -> Result<MileMarkerResolver> {
        Ok(MileMarkerResolver::from_routes(
            self.load_resolvable_routes()?,
        ))
    }

    /// Delete a route. No cascade beyond the route itself.
    pub fn delete_route(&self, id: RouteId) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM routes WHERE id = ?1", params![id.raw()])?;
            Ok(changed > 0)
        })
    }
}

const ROUTE_SELECT: &str = "SELECT id, name, aliases_json, points_json, bidirectional, direction,
        limited_access, anchor_index, anchor_value, miles_decrease_toward
 FROM routes";

fn query_routes(conn: &Connection, sql: &str) -> Result<Vec<Route>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([], row_to_route)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn row_to_route(row: &Row<'_>) -> rusqlite::Result<Route> {
    let aliases_json: String = row.get("aliases_json")?;
    let points_json: String = row.get("points_json")?;
    let direction: Option<String> = row.get("direction")?;
    let decrease: Option<String> = row.get("miles_decrease_toward")?;
    let anchor_index: Option<i64> = row.get("anchor_index")?;
    let anchor_value: Option<f64> = row.get("anchor_value")?;

    let points: Vec<Point> = serde_json::from_str(&points_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e)))?;
    let aliases: Vec<String> = serde_json::from_str(&aliases_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e)))?;

    Ok(Route {
        id: RouteId::new(row.get("id")?),
        name: row.get("name")?,
        aliases,
        points,
        bidirectional: row.get("bidirectional")?,
        direction: direction.as_deref().and_then(CompassDirection::parse),
        limited_access: row.get("limited_access")?,
        anchor: match (anchor_index, anchor_value) {
            (Some(i), Some(v)) => Some(MileAnchor {
                point_index: i as usize,
                mm_value: v,
            }),
            _ => None,
        },
        miles_decrease_toward: decrease.as_deref().and_then(CompassDirection::parse),
    })
}
