//! Declared-projection handling for uploaded vector bundles.
//!
//! Only projections named by bundled metadata are honored; there is no
//! guessing from coordinate magnitudes. A bundle without projection
//! metadata is assumed to already be in the working reference system
//! (WGS84 longitude/latitude).

use geo::Point;

use crate::error::{GisError, Result};

const WEB_MERCATOR_RADIUS_M: f64 = 6_378_137.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Projection {
    /// Working reference system; coordinates pass through.
    Wgs84,
    /// Spherical ("pseudo") Mercator, EPSG:3857.
    WebMercator,
}

impl Projection {
    /// Identify a projection from `.prj` WKT.
    ///
    /// Unrecognized projections are an error naming the WKT, not a
    /// silent pass-through.
    pub fn detect(wkt: &str) -> Result<Self> {
        let w = wkt.to_ascii_lowercase();
        if w.contains("mercator")
            && (w.contains("auxiliary_sphere")
                || w.contains("pseudo")
                || w.contains("3857")
                || w.contains("900913"))
        {
            return Ok(Self::WebMercator);
        }
        if w.starts_with("geogcs") && (w.contains("wgs_1984") || w.contains("wgs 84")) {
            return Ok(Self::Wgs84);
        }
        let name = wkt
            .split('"')
            .nth(1)
            .unwrap_or("unknown")
            .trim()
            .to_string();
        Err(GisError::parse(format!(
            "unsupported projection in bundle metadata: {name}"
        )))
    }

    /// Convert a source coordinate pair to WGS84 longitude/latitude.
    pub fn to_wgs84(self, x: f64, y: f64) -> Point {
        match self {
            Self::Wgs84 => Point::new(x, y),
            Self::WebMercator => Point::new(
                (x / WEB_MERCATOR_RADIUS_M).to_degrees(),
                (y / WEB_MERCATOR_RADIUS_M).sinh().atan().to_degrees(),
            ),
        }
    }
}
