//! View frustum for culling

use crate::core::types::{Mat4, Vec3, Vec4};
use super::aabb::Aabb;

/// A plane defined by normal and distance from origin
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub distance: f32,
}

impl Plane {
    pub fn new(normal: Vec3, distance: f32) -> Self {
        Self { normal, distance }
    }

    /// Plane through `point` facing `normal` (normal is normalized)
    pub fn from_point_normal(point: Vec3, normal: Vec3) -> Self {
        let normal = normal.normalize();
        Self { normal, distance: -normal.dot(point) }
    }

    /// Signed distance from point to plane (positive = in front)
    pub fn distance_to_point(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.distance
    }
}

/// View frustum with 6 planes (Near, Far, Left, Right, Top, Bottom)
///
/// Plane normals point inward. The test used everywhere is conservative: a
/// box is rejected only when it lies entirely behind one plane.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Frustum {
    pub planes: [Plane; 6],
}

impl Frustum {
    /// Extract frustum planes from a view-projection matrix.
    ///
    /// Expects glam's `[0, 1]` clip depth, so the near plane is row 2 alone.
    pub fn from_view_projection(vp: &Mat4) -> Self {
        let r0 = vp.row(0);
        let r1 = vp.row(1);
        let r2 = vp.row(2);
        let r3 = vp.row(3);

        Self {
            planes: [
                Self::normalize_plane(r2),      // near
                Self::normalize_plane(r3 - r2), // far
                Self::normalize_plane(r3 + r0), // left
                Self::normalize_plane(r3 - r0), // right
                Self::normalize_plane(r3 - r1), // top
                Self::normalize_plane(r3 + r1), // bottom
            ],
        }
    }

    /// Build a frustum from explicit planes
    pub fn from_planes(planes: [Plane; 6]) -> Self {
        Self { planes }
    }

    /// A frustum containing everything on the front side of one plane
    pub fn half_space(plane: Plane) -> Self {
        let open = Plane::new(Vec3::X, f32::MAX);
        Self {
            planes: [plane, open, open, open, open, open],
        }
    }

    fn normalize_plane(plane: Vec4) -> Plane {
        let normal = plane.truncate();
        let len = normal.length();
        if len <= f32::EPSILON {
            // Degenerate row, accept everything
            return Plane::new(Vec3::X, f32::MAX);
        }
        Plane {
            normal: normal / len,
            distance: plane.w / len,
        }
    }

    /// Push every plane outward by `margin` world units
    pub fn dilated(&self, margin: f32) -> Self {
        let mut planes = self.planes;
        for plane in &mut planes {
            plane.distance += margin;
        }
        Self { planes }
    }

    /// Check if point is inside frustum
    pub fn contains_point(&self, point: Vec3) -> bool {
        self.planes.iter().all(|plane| plane.distance_to_point(point) >= 0.0)
    }

    /// Check if a sphere touches the frustum (conservative test)
    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.planes.iter().all(|plane| plane.distance_to_point(center) >= -radius)
    }

    /// Check if AABB intersects frustum (conservative test)
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        for plane in &self.planes {
            // Find the corner most aligned with plane normal (p-vertex)
            let p = Vec3::new(
                if plane.normal.x >= 0.0 { aabb.max.x } else { aabb.min.x },
                if plane.normal.y >= 0.0 { aabb.max.y } else { aabb.min.y },
                if plane.normal.z >= 0.0 { aabb.max.z } else { aabb.min.z },
            );

            // If p-vertex is outside, AABB is completely outside
            if plane.distance_to_point(p) < 0.0 {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera_frustum() -> Frustum {
        let proj = Mat4::perspective_rh(60f32.to_radians(), 1.0, 0.1, 100.0);
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y);
        Frustum::from_view_projection(&(proj * view))
    }

    #[test]
    fn test_plane_distance() {
        let plane = Plane::new(Vec3::Y, 0.0); // XZ plane
        assert_eq!(plane.distance_to_point(Vec3::new(0.0, 5.0, 0.0)), 5.0);
        assert_eq!(plane.distance_to_point(Vec3::new(0.0, -3.0, 0.0)), -3.0);
    }

    #[test]
    fn test_perspective_contains() {
        let frustum = camera_frustum();
        assert!(frustum.contains_point(Vec3::ZERO));
        // Behind the camera
        assert!(!frustum.contains_point(Vec3::new(0.0, 0.0, 10.0)));
        // Beyond the far plane
        assert!(!frustum.contains_point(Vec3::new(0.0, 0.0, -200.0)));
        // Far off to the side
        assert!(!frustum.contains_point(Vec3::new(50.0, 0.0, 0.0)));
    }

    #[test]
    fn test_aabb_and_sphere() {
        let frustum = camera_frustum();
        let inside = Aabb::from_center_half_extent(Vec3::ZERO, Vec3::ONE);
        let outside = Aabb::from_center_half_extent(Vec3::new(0.0, 0.0, 20.0), Vec3::ONE);
        assert!(frustum.intersects_aabb(&inside));
        assert!(!frustum.intersects_aabb(&outside));
        assert!(frustum.intersects_sphere(Vec3::ZERO, 0.5));
        assert!(!frustum.intersects_sphere(Vec3::new(0.0, 0.0, 20.0), 1.0));
    }

    #[test]
    fn test_dilation_widens() {
        let frustum = camera_frustum();
        let just_outside = Vec3::new(0.0, 0.0, 5.5);
        assert!(!frustum.contains_point(just_outside));
        assert!(frustum.dilated(1.0).contains_point(just_outside));
    }

    #[test]
    fn test_half_space() {
        let frustum = Frustum::half_space(Plane::from_point_normal(Vec3::ZERO, Vec3::X));
        assert!(frustum.contains_point(Vec3::new(10.0, -1e6, 1e6)));
        assert!(!frustum.contains_point(Vec3::new(-0.1, 0.0, 0.0)));
    }
}
