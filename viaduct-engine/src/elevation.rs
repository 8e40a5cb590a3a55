//! Elevation lookup seam (§1, §2, §9 Open Question 1).
//!
//! SRTM elevation is out of scope: the source carries two parallel loaders
//! (one shelling out to `gzip`, one using an in-process zip library) and
//! the spec leaves choosing between them ambiguous. Neither is implemented
//! here; instead this module ships the interface route annotation calls
//! through, so the annotation step never hard-codes "no elevation" and a
//! real loader can be dropped in behind this trait later.

use viaduct_common::Coordinate;

pub trait ElevationSource: Send + Sync {
    /// Elevation in meters above sea level at `coord`, or `None` if the
    /// coordinate falls outside the loaded grid.
    fn elevation_m(&self, coord: Coordinate) -> Option<f64>;
}

/// The only `ElevationSource` shipped here: always reports "no data".
pub struct NullElevation;

impl ElevationSource for NullElevation {
    fn elevation_m(&self, _coord: Coordinate) -> Option<f64> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_elevation_always_reports_none() {
        let source = NullElevation;
        assert_eq!(source.elevation_m(Coordinate::from_degrees(0.0, 0.0)), None);
    }
}
