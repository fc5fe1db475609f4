//! Projection of geographic coordinates onto the unit sphere.

use glam::DVec3;

/// Map a geographic point to its position on a sphere of radius 1.
///
/// The sphere is oriented with +Y through the north pole. Longitude sweeps
/// the azimuth so that `(0, 0)` lands on `(-1, 0, 0)`; this matches the
/// orientation the outline and triangle meshes are built in, so changing it
/// would mirror the globe.
pub fn project(longitude: f64, latitude: f64) -> DVec3 {
    let azimuth = (180.0 - longitude).to_radians();
    let inclination = (90.0 - latitude).to_radians();
    DVec3::new(
        inclination.sin() * azimuth.cos(),
        inclination.cos(),
        inclination.sin() * azimuth.sin(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_projects_to_negative_x() {
        let v = project(0.0, 0.0);
        assert!((v.x - -1.0).abs() < 1e-6);
        assert!(v.y.abs() < 1e-6);
        assert!(v.z.abs() < 1e-6);
    }

    #[test]
    fn north_pole_is_positive_y() {
        let v = project(0.0, 90.0);
        assert!((v.y - 1.0).abs() < 1e-6);
        assert!(v.x.abs() < 1e-6 && v.z.abs() < 1e-6);
    }

    #[test]
    fn poles_are_gimbal_points() {
        // Any longitude projects to the same pole position.
        for lon in [-180.0, -45.0, 0.0, 90.0, 180.0] {
            assert!(project(lon, 90.0).distance(project(0.0, 90.0)) < 1e-6);
            assert!(project(lon, -90.0).distance(project(0.0, -90.0)) < 1e-6);
        }
    }

    #[test]
    fn projection_has_unit_norm_over_valid_range() {
        let mut lat = -90.0;
        while lat <= 90.0 {
            let mut lon = -180.0;
            while lon <= 180.0 {
                let norm = project(lon, lat).length();
                assert!(
                    (norm - 1.0).abs() < 1e-5,
                    "norm {norm} at lon {lon}, lat {lat}"
                );
                lon += 7.5;
            }
            lat += 7.5;
        }
    }

    #[test]
    fn antipodal_points_are_opposite() {
        let a = project(45.0, 30.0);
        let b = project(-135.0, -30.0);
        assert!((a + b).length() < 1e-6);
    }
}
