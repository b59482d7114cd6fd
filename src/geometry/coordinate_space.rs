use super::Vector3;

/// A right-handed orthonormal basis with an origin.
///
/// `right`, `up`, and `ahead` form the basis; `ahead` points in the direction
/// the object is facing.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct CoordinateSpace3 {
    /// Unit vector pointing to the right of the object.
    pub right: Vector3,

    /// Unit vector pointing upwards from the object.
    pub up: Vector3,

    /// Unit vector in the direction the object is facing.
    pub ahead: Vector3,

    /// The position of the object.
    pub origin: Vector3,
}

impl CoordinateSpace3 {
    /// Constructs a coordinate space from a facing direction and an origin.
    ///
    /// `right` and `up` are derived from `ahead`, using an arbitrary but
    /// stable choice of roll.
    pub fn from_ahead(ahead: Vector3, origin: Vector3) -> Self {
        let ahead = ahead.normalized();

        // Pick the world axis least aligned with ahead to stabilize the basis.
        let reference = if ahead.y.abs() < 0.999 {
            Vector3::UNIT_Y
        } else {
            Vector3::UNIT_Z
        };

        let right = Vector3::cross(ahead, reference).normalized();
        let up = Vector3::cross(right, ahead);

        Self {
            right,
            up,
            ahead,
            origin,
        }
    }

    /// Constructs a coordinate space from facing and up directions.
    ///
    /// `right = normalize(cross(ahead, up))`, and `up` is re-orthogonalized
    /// against `ahead`.
    pub fn from_ahead_and_up(ahead: Vector3, up: Vector3, origin: Vector3) -> Self {
        let ahead = ahead.normalized();
        let right = Vector3::cross(ahead, up).normalized();
        let up = Vector3::cross(right, ahead);

        Self {
            right,
            up,
            ahead,
            origin,
        }
    }

    /// Expresses a world-space direction in this coordinate space.
    ///
    /// The local z-axis points opposite `ahead`, following the engine's
    /// "negative z is ahead" convention.
    pub fn direction_to_local(&self, direction: Vector3) -> Vector3 {
        Vector3::new(
            Vector3::dot(direction, self.right),
            Vector3::dot(direction, self.up),
            -Vector3::dot(direction, self.ahead),
        )
    }
}

impl Default for CoordinateSpace3 {
    fn default() -> Self {
        Self {
            right: Vector3::UNIT_X,
            up: Vector3::UNIT_Y,
            ahead: -Vector3::UNIT_Z,
            origin: Vector3::ZERO,
        }
    }
}
