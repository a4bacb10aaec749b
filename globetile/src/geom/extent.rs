//! Model-space extents and view frustum culling.

use glam::{DMat4, DVec3, DVec4};

/// A plane `normal . p + distance = 0` whose positive side is "inside".
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub normal: DVec3,
    pub distance: f64,
}

impl Plane {
    /// Builds a normalized plane from homogeneous coefficients.
    fn from_coefficients(v: DVec4) -> Self {
        let normal = v.truncate();
        let length = normal.length();
        if length == 0.0 {
            return Self {
                normal,
                distance: v.w,
            };
        }
        Self {
            normal: normal / length,
            distance: v.w / length,
        }
    }

    pub fn signed_distance(&self, point: DVec3) -> f64 {
        self.normal.dot(point) + self.distance
    }
}

/// Six planes bounding the visible volume, in model coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frustum {
    planes: [Plane; 6],
}

impl Frustum {
    /// Extracts the frustum of a modelview-projection matrix (OpenGL clip conventions).
    pub fn from_modelview_projection(mvp: &DMat4) -> Self {
        let r0 = mvp.row(0);
        let r1 = mvp.row(1);
        let r2 = mvp.row(2);
        let r3 = mvp.row(3);

        Self {
            planes: [
                Plane::from_coefficients(r3 + r0), // left
                Plane::from_coefficients(r3 - r0), // right
                Plane::from_coefficients(r3 + r1), // bottom
                Plane::from_coefficients(r3 - r1), // top
                Plane::from_coefficients(r3 + r2), // near
                Plane::from_coefficients(r3 - r2), // far
            ],
        }
    }

    pub fn planes(&self) -> &[Plane; 6] {
        &self.planes
    }

    pub fn contains_point(&self, point: DVec3) -> bool {
        self.planes.iter().all(|p| p.signed_distance(point) >= 0.0)
    }
}

/// Axis-aligned bounding box in model coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min: DVec3,
    pub max: DVec3,
}

impl BoundingBox {
    /// The tightest box around the points, or `None` for an empty input.
    pub fn from_points<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = DVec3>,
    {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let (min, max) = iter.fold((first, first), |(min, max), p| (min.min(p), max.max(p)));
        Some(Self { min, max })
    }

    /// Grows the box by `margin` on every side.
    pub fn expanded(&self, margin: f64) -> Self {
        Self {
            min: self.min - DVec3::splat(margin),
            max: self.max + DVec3::splat(margin),
        }
    }

    pub fn center(&self) -> DVec3 {
        0.5 * (self.min + self.max)
    }

    pub fn radius(&self) -> f64 {
        0.5 * (self.max - self.min).length()
    }

    /// Conservative box/frustum test: false only when the box lies fully
    /// outside one of the planes.
    pub fn intersects_frustum(&self, frustum: &Frustum) -> bool {
        frustum.planes().iter().all(|plane| {
            let positive = DVec3::new(
                if plane.normal.x >= 0.0 { self.max.x } else { self.min.x },
                if plane.normal.y >= 0.0 { self.max.y } else { self.min.y },
                if plane.normal.z >= 0.0 { self.max.z } else { self.min.z },
            );
            plane.signed_distance(positive) >= 0.0
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn looking_down_negative_z() -> Frustum {
        let view = DMat4::look_at_rh(DVec3::new(0.0, 0.0, 10.0), DVec3::ZERO, DVec3::Y);
        let projection = DMat4::perspective_rh_gl(60f64.to_radians(), 1.0, 1.0, 100.0);
        Frustum::from_modelview_projection(&(projection * view))
    }

    #[test]
    fn test_frustum_contains_target() {
        let frustum = looking_down_negative_z();
        assert!(frustum.contains_point(DVec3::ZERO));
        assert!(!frustum.contains_point(DVec3::new(0.0, 0.0, 20.0)));
    }

    #[test]
    fn test_box_culling() {
        let frustum = looking_down_negative_z();
        let visible = BoundingBox::from_points([DVec3::splat(-1.0), DVec3::splat(1.0)]).unwrap();
        let behind = BoundingBox::from_points([
            DVec3::new(-1.0, -1.0, 15.0),
            DVec3::new(1.0, 1.0, 16.0),
        ])
        .unwrap();
        assert!(visible.intersects_frustum(&frustum));
        assert!(!behind.intersects_frustum(&frustum));
    }

    #[test]
    fn test_from_points_empty_is_none() {
        assert!(BoundingBox::from_points(Vec::<DVec3>::new()).is_none());
    }
}
