//! Decoded poses
//!
//! The device reports rotations as `W X Y Z` quaternions; internally they
//! are stored as [`Quaternion`] in `x, y, z, w` order. A quaternion whose
//! squared norm is below [`MIN_NORM_SQUARED`] cannot be normalized and is
//! replaced by the identity rotation.

use std::time::Instant;

use tracing::warn;

use crate::error::DataError;
use crate::protocol::tx::RawTransform;

/// Smallest squared norm accepted for a received quaternion
pub const MIN_NORM_SQUARED: f64 = 1e-6;

/// Rotation quaternion, stored `x, y, z, w`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Quaternion {
    pub const IDENTITY: Quaternion = Quaternion {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };

    pub fn new(x: f64, y: f64, z: f64, w: f64) -> Self {
        Self { x, y, z, w }
    }

    /// Build from the device field order `w, x, y, z`
    pub fn from_device_wxyz(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z, w }
    }

    pub fn norm_squared(&self) -> f64 {
        self.x * self.x + self.y * self.y + self.z * self.z + self.w * self.w
    }

    /// Unit quaternion, or `DegenerateQuaternion` when the norm is too small
    pub fn normalized(&self) -> Result<Self, DataError> {
        let n2 = self.norm_squared();
        if !n2.is_finite() || n2 < MIN_NORM_SQUARED {
            return Err(DataError::DegenerateQuaternion { norm: n2.sqrt() });
        }
        let n = n2.sqrt();
        Ok(Self::new(self.x / n, self.y / n, self.z / n, self.w / n))
    }

    /// 3x3 rotation matrix, row-major
    pub fn to_rotation_matrix(&self) -> [[f64; 3]; 3] {
        let Quaternion { x, y, z, w } = *self;
        [
            [1.0 - 2.0 * (y * y + z * z), 2.0 * (x * y - z * w), 2.0 * (x * z + y * w)],
            [2.0 * (x * y + z * w), 1.0 - 2.0 * (x * x + z * z), 2.0 * (y * z - x * w)],
            [2.0 * (x * z - y * w), 2.0 * (y * z + x * w), 1.0 - 2.0 * (x * x + y * y)],
        ]
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// A decoded pose with its error estimate and validity bound
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformSample {
    /// Unit rotation
    pub rotation: Quaternion,
    /// Translation in millimetres
    pub translation: [f64; 3],
    /// Device RMS error estimate, carried through unmodified
    pub error_estimate: f64,
    /// After this instant the sample is stale
    pub valid_until: Instant,
}

impl TransformSample {
    pub fn is_stale(&self, now: Instant) -> bool {
        now > self.valid_until
    }

    /// Homogeneous 4x4 transform, row-major
    pub fn to_matrix(&self) -> [[f64; 4]; 4] {
        let r = self.rotation.to_rotation_matrix();
        let t = self.translation;
        [
            [r[0][0], r[0][1], r[0][2], t[0]],
            [r[1][0], r[1][1], r[1][2], t[1]],
            [r[2][0], r[2][1], r[2][2], t[2]],
            [0.0, 0.0, 0.0, 1.0],
        ]
    }
}

/// A sample plus the data problem recovered while decoding it
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSample {
    pub sample: TransformSample,
    pub warning: Option<DataError>,
}

/// Decode a raw device transform (`qw qx qy qz tx ty tz err`)
///
/// A degenerate quaternion becomes the identity rotation; the problem is
/// logged and returned in [`DecodedSample::warning`].
///
/// # Examples
///
/// ```
/// use std::time::Instant;
/// use igt_tracker::tracking::sample::{decode_transform, Quaternion};
///
/// let decoded = decode_transform(&[1.0, 0.0, 0.0, 0.0, 10.0, 20.0, 30.0, 0.01], Instant::now());
/// assert_eq!(decoded.sample.rotation, Quaternion::IDENTITY);
/// assert_eq!(decoded.sample.translation, [10.0, 20.0, 30.0]);
/// assert!(decoded.warning.is_none());
/// ```
pub fn decode_transform(raw: &RawTransform, valid_until: Instant) -> DecodedSample {
    let received = Quaternion::from_device_wxyz(raw[0], raw[1], raw[2], raw[3]);
    let (rotation, warning) = match received.normalized() {
        Ok(rotation) => (rotation, None),
        Err(err) => {
            warn!("{}, substituting identity rotation", err);
            (Quaternion::IDENTITY, Some(err))
        }
    };

    DecodedSample {
        sample: TransformSample {
            rotation,
            translation: [raw[4], raw[5], raw[6]],
            error_estimate: raw[7],
            valid_until,
        },
        warning,
    }
}
