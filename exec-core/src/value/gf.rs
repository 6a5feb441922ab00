//! Small fixed-size math types carried by [`Value`](super::Value).
//!
//! Only the operations the engine itself needs are provided; these are value
//! carriers, not a linear algebra library.

use std::ops::Mul;

use serde::{Deserialize, Serialize};

macro_rules! vec_type {
    ($(#[$meta:meta])* $name:ident, $scalar:ty, $n:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
        pub struct $name(pub [$scalar; $n]);

        impl From<[$scalar; $n]> for $name {
            fn from(v: [$scalar; $n]) -> Self {
                Self(v)
            }
        }
    };
}

vec_type!(
    /// Two-component double vector.
    Vec2d, f64, 2
);
vec_type!(
    /// Two-component float vector.
    Vec2f, f32, 2
);
vec_type!(
    /// Three-component double vector.
    Vec3d, f64, 3
);
vec_type!(
    /// Three-component float vector.
    Vec3f, f32, 3
);
vec_type!(
    /// Four-component double vector.
    Vec4d, f64, 4
);
vec_type!(
    /// Four-component float vector.
    Vec4f, f32, 4
);

/// Double-precision quaternion stored as `(i, j, k, real)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quatd(pub [f64; 4]);

/// Single-precision quaternion stored as `(i, j, k, real)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quatf(pub [f32; 4]);

impl Quatd {
    pub fn identity() -> Self {
        Self([0.0, 0.0, 0.0, 1.0])
    }
}

impl Quatf {
    pub fn identity() -> Self {
        Self([0.0, 0.0, 0.0, 1.0])
    }
}

impl Default for Quatd {
    fn default() -> Self {
        Self::identity()
    }
}

impl Default for Quatf {
    fn default() -> Self {
        Self::identity()
    }
}

/// Row-major 4x4 double matrix using the row-vector convention, so
/// `local * parent` composes a local transform under its parent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Matrix4d(pub [[f64; 4]; 4]);

/// Row-major 4x4 float matrix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Matrix4f(pub [[f32; 4]; 4]);

impl Matrix4d {
    pub fn identity() -> Self {
        let mut m = [[0.0; 4]; 4];
        for (i, row) in m.iter_mut().enumerate() {
            row[i] = 1.0;
        }
        Self(m)
    }

    /// A pure translation.
    pub fn from_translation(t: Vec3d) -> Self {
        let mut m = Self::identity();
        m.0[3][0] = t.0[0];
        m.0[3][1] = t.0[1];
        m.0[3][2] = t.0[2];
        m
    }

    /// A uniform scale.
    pub fn from_scale(s: f64) -> Self {
        let mut m = Self::identity();
        m.0[0][0] = s;
        m.0[1][1] = s;
        m.0[2][2] = s;
        m
    }

    /// The translation component (last row).
    pub fn translation(&self) -> Vec3d {
        Vec3d([self.0[3][0], self.0[3][1], self.0[3][2]])
    }
}

impl Matrix4f {
    pub fn identity() -> Self {
        let mut m = [[0.0; 4]; 4];
        for (i, row) in m.iter_mut().enumerate() {
            row[i] = 1.0;
        }
        Self(m)
    }
}

impl Default for Matrix4d {
    fn default() -> Self {
        Self::identity()
    }
}

impl Default for Matrix4f {
    fn default() -> Self {
        Self::identity()
    }
}

impl Mul for Matrix4d {
    type Output = Matrix4d;

    fn mul(self, rhs: Matrix4d) -> Matrix4d {
        let mut out = [[0.0; 4]; 4];
        for (r, row) in out.iter_mut().enumerate() {
            for (c, cell) in row.iter_mut().enumerate() {
                *cell = (0..4).map(|k| self.0[r][k] * rhs.0[k][c]).sum();
            }
        }
        Matrix4d(out)
    }
}
