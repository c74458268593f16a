use serde::{Deserialize, Serialize};

/// Euler angles in degrees, ZYZ convention (rot about z, tilt about the new
/// y, psi about the new z).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EulerAngles {
    pub rot: f64,
    pub tilt: f64,
    pub psi: f64,
}

impl EulerAngles {
    pub fn new(rot: f64, tilt: f64, psi: f64) -> Self {
        Self { rot, tilt, psi }
    }

    pub fn matrix(&self) -> Rot3 {
        Rot3::from_euler(self.rot, self.tilt, self.psi)
    }
}

/// 3x3 rotation matrix acting on `[x, y, z]` column vectors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rot3(pub [[f64; 3]; 3]);

impl Rot3 {
    pub fn identity() -> Self {
        Rot3([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]])
    }

    pub fn from_euler(rot: f64, tilt: f64, psi: f64) -> Self {
        let (sa, ca) = rot.to_radians().sin_cos();
        let (sb, cb) = tilt.to_radians().sin_cos();
        let (sg, cg) = psi.to_radians().sin_cos();

        let cc = cb * ca;
        let cs = cb * sa;
        let sc = sb * ca;
        let ss = sb * sa;

        Rot3([
            [cg * cc - sg * sa, cg * cs + sg * ca, -cg * sb],
            [-sg * cc - cg * sa, -sg * cs + cg * ca, sg * sb],
            [sc, ss, cb],
        ])
    }

    /// Decompose into ZYZ Euler angles, tilt in [0, 180].
    ///
    /// At tilt 0 (or 180) rot and psi are not separable; the whole in-plane
    /// rotation is reported as psi with rot = 0.
    pub fn to_euler(&self) -> EulerAngles {
        let a = &self.0;
        let abs_sb = (a[0][2] * a[0][2] + a[1][2] * a[1][2]).sqrt();

        let (rot, tilt, psi) = if abs_sb > 16.0 * f32::EPSILON as f64 {
            let psi = a[1][2].atan2(-a[0][2]);
            let rot = a[2][1].atan2(a[2][0]);
            let sign_sb = if psi.sin().abs() < f32::EPSILON as f64 {
                (-a[0][2] / psi.cos()).signum()
            } else if psi.sin() > 0.0 {
                a[1][2].signum()
            } else {
                -a[1][2].signum()
            };
            let tilt = (sign_sb * abs_sb).atan2(a[2][2]);
            (rot, tilt, psi)
        } else if a[2][2] > 0.0 {
            (0.0, 0.0, (-a[1][0]).atan2(a[0][0]))
        } else {
            (0.0, std::f64::consts::PI, a[1][0].atan2(-a[0][0]))
        };

        EulerAngles {
            rot: rot.to_degrees(),
            tilt: tilt.to_degrees(),
            psi: psi.to_degrees(),
        }
    }

    pub fn transpose(&self) -> Self {
        let a = &self.0;
        let mut t = [[0.0; 3]; 3];
        for (r, row) in t.iter_mut().enumerate() {
            for (c, v) in row.iter_mut().enumerate() {
                *v = a[c][r];
            }
        }
        Rot3(t)
    }

    pub fn apply(&self, v: [f64; 3]) -> [f64; 3] {
        let a = &self.0;
        [
            a[0][0] * v[0] + a[0][1] * v[1] + a[0][2] * v[2],
            a[1][0] * v[0] + a[1][1] * v[1] + a[1][2] * v[2],
            a[2][0] * v[0] + a[2][1] * v[1] + a[2][2] * v[2],
        ]
    }
}

impl std::ops::Mul for Rot3 {
    type Output = Rot3;

    fn mul(self, rhs: Rot3) -> Rot3 {
        let mut out = [[0.0; 3]; 3];
        for (r, row) in out.iter_mut().enumerate() {
            for (c, v) in row.iter_mut().enumerate() {
                *v = (0..3).map(|k| self.0[r][k] * rhs.0[k][c]).sum();
            }
        }
        Rot3(out)
    }
}

/// Signed difference between two angles in degrees, folded into (-180, 180].
pub fn angle_diff(a: f64, b: f64) -> f64 {
    let mut d = (a - b) % 360.0;
    if d > 180.0 {
        d -= 360.0;
    } else if d <= -180.0 {
        d += 360.0;
    }
    d
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: &Rot3, b: &Rot3) {
        for r in 0..3 {
            for c in 0..3 {
                assert!((a.0[r][c] - b.0[r][c]).abs() < 1e-9, "{:?} != {:?}", a, b);
            }
        }
    }

    #[test]
    fn euler_matrix_is_orthonormal() {
        let m = Rot3::from_euler(33.0, 71.0, -128.0);
        assert_close(&(m * m.transpose()), &Rot3::identity());
    }

    #[test]
    fn euler_angles_survive_decomposition() {
        for &(rot, tilt, psi) in &[(90.0, 90.0, 0.0), (10.0, 45.0, 170.0), (-120.0, 135.0, 30.0)] {
            let back = Rot3::from_euler(rot, tilt, psi).to_euler();
            assert!(angle_diff(back.rot, rot).abs() < 1e-6, "{:?}", back);
            assert!((back.tilt - tilt).abs() < 1e-6, "{:?}", back);
            assert!(angle_diff(back.psi, psi).abs() < 1e-6, "{:?}", back);
        }
    }

    #[test]
    fn zero_tilt_folds_rot_into_psi() {
        let back = Rot3::from_euler(30.0, 0.0, 20.0).to_euler();
        assert_eq!(back.rot, 0.0);
        assert_eq!(back.tilt, 0.0);
        assert!(angle_diff(back.psi, 50.0).abs() < 1e-9);
    }

    #[test]
    fn angle_diff_wraps() {
        assert!((angle_diff(350.0, -10.0)).abs() < 1e-12);
        assert!((angle_diff(10.0, 350.0) - 20.0).abs() < 1e-12);
    }
}
