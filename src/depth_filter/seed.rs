//! Per-pixel inverse-depth hypothesis: a Gaussian inlier model mixed with a
//! uniform outlier model whose weights follow a Beta(a, b) distribution.

use std::f64::consts::PI;

use nalgebra::{Matrix2, Point2, Vector2, Vector3};

use crate::camera::CameraTrait;
use crate::geometry::Pose;

/// Rays closer to parallel than this (sin^2 of the parallax angle) are not triangulated.
const MIN_PARALLAX_DET: f64 = 1e-10;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InverseDepth {
    pub mu: f64,
    pub sigma2: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Seed {
    pub u: u32,
    pub v: u32,
    /// inlier evidence
    pub a: f64,
    /// outlier evidence
    pub b: f64,
    /// `None` until the first observation
    pub estimate: Option<InverseDepth>,
    /// width of the uniform outlier distribution in inverse depth
    pub z_range: f64,
    pub observations: u32,
}

impl Seed {
    pub fn new(u: usize, v: usize, a: f64, b: f64, z_range: f64) -> Self {
        Self {
            u: u as u32,
            v: v as u32,
            a,
            b,
            estimate: None,
            z_range,
            observations: 0,
        }
    }

    #[inline]
    pub fn pixel(&self) -> Point2<f64> {
        Point2::new(self.u as f64, self.v as f64)
    }

    /// Expected inlier probability.
    pub fn inlier_ratio(&self) -> f64 {
        self.a / (self.a + self.b)
    }

    /// Range along the pixel ray.
    pub fn depth(&self) -> Option<f64> {
        self.estimate
            .filter(|e| e.mu > 0.0 && e.mu.is_finite())
            .map(|e| 1.0 / e.mu)
    }

    /// Fuse the correspondence `matched` in a frame related by `t_cur_other`
    /// (points of the other frame into the seed's frame).
    ///
    /// Returns false and leaves the seed untouched when the correspondence
    /// cannot be triangulated.
    pub fn observe<C: CameraTrait>(
        &mut self,
        camera: &C,
        matched: &Point2<f64>,
        t_cur_other: &Pose,
    ) -> bool {
        let f_ref = camera.ray(&self.pixel());
        let f_other = camera.ray(matched);
        let Some(z) = triangulate(&t_cur_other.inverse(), &f_ref, &f_other) else {
            return false;
        };
        let tau2 = match compute_tau(t_cur_other, &f_ref, z, camera.px_error_angle()) {
            Some(tau) => {
                let tau_inverse = 0.5 * (1.0 / (z - tau).max(1e-7) - 1.0 / (z + tau));
                tau_inverse * tau_inverse
            }
            // the error cone does not close: keep the measurement, trust it like the prior
            None => self.prior_sigma2(),
        };
        self.update(1.0 / z, tau2)
    }

    fn prior_sigma2(&self) -> f64 {
        self.z_range * self.z_range / 36.0
    }

    /// Bayesian update with inverse-depth measurement `x` of variance `tau2`.
    pub fn update(&mut self, x: f64, tau2: f64) -> bool {
        if !(x.is_finite() && tau2.is_finite() && tau2 > 0.0) {
            return false;
        }
        let InverseDepth { mu, sigma2 } = self.estimate.unwrap_or(InverseDepth {
            mu: x,
            sigma2: self.prior_sigma2(),
        });
        let (a, b) = (self.a, self.b);

        let norm_scale = (sigma2 + tau2).sqrt();
        let s2 = 1.0 / (1.0 / sigma2 + 1.0 / tau2);
        let m = s2 * (mu / sigma2 + x / tau2);
        let mut c1 = a / (a + b) * normal_pdf(x, mu, norm_scale);
        let mut c2 = b / (a + b) / self.z_range;
        let normalization = c1 + c2;
        if !(normalization > 0.0 && normalization.is_finite()) {
            return false;
        }
        c1 /= normalization;
        c2 /= normalization;

        let f = c1 * (a + 1.0) / (a + b + 1.0) + c2 * a / (a + b + 1.0);
        let e = c1 * (a + 1.0) * (a + 2.0) / ((a + b + 1.0) * (a + b + 2.0))
            + c2 * a * (a + 1.0) / ((a + b + 1.0) * (a + b + 2.0));

        let mu_new = c1 * m + c2 * mu;
        let sigma2_new = c1 * (s2 + m * m) + c2 * (sigma2 + mu * mu) - mu_new * mu_new;
        let a_new = (e - f) / (f - e / f);
        let b_new = a_new * (1.0 - f) / f;
        if ![mu_new, sigma2_new, a_new, b_new].iter().all(|v| v.is_finite())
            || sigma2_new <= 0.0
            || a_new <= 0.0
            || b_new <= 0.0
        {
            return false;
        }

        self.estimate = Some(InverseDepth {
            mu: mu_new,
            sigma2: sigma2_new,
        });
        self.a = a_new;
        self.b = b_new;
        self.observations += 1;
        true
    }
}

#[inline]
fn normal_pdf(x: f64, mean: f64, sigma: f64) -> f64 {
    let d = (x - mean) / sigma;
    (-0.5 * d * d).exp() / ((2.0 * PI).sqrt() * sigma)
}

/// Range along `f_ref` from two unit bearings; `t_other_ref` maps the
/// reference frame into the other one.
pub fn triangulate(t_other_ref: &Pose, f_ref: &Vector3<f64>, f_other: &Vector3<f64>) -> Option<f64> {
    let rf = t_other_ref.rotation * f_ref;
    let a = nalgebra::Matrix3x2::from_columns(&[rf, *f_other]);
    let ata: Matrix2<f64> = a.transpose() * a;
    if ata.determinant() < MIN_PARALLAX_DET {
        return None;
    }
    let depths: Vector2<f64> = -(ata.try_inverse()? * a.transpose() * t_other_ref.translation.vector);
    // depths[1] is the negated range in the other frame
    (depths[0] > 0.0 && depths[1] < 0.0).then_some(depths[0])
}

/// Range uncertainty caused by an angular error of `px_error_angle` on the
/// other frame's ray. `t_ref_other` holds the other camera centre in the
/// reference frame.
pub fn compute_tau(t_ref_other: &Pose, f: &Vector3<f64>, z: f64, px_error_angle: f64) -> Option<f64> {
    let t = t_ref_other.translation.vector;
    let t_norm = t.norm();
    let a = f * z - t;
    let a_norm = a.norm();
    if t_norm < f64::EPSILON || a_norm < f64::EPSILON {
        return None;
    }
    let alpha = (f.dot(&t) / t_norm).clamp(-1.0, 1.0).acos();
    let beta = (a.dot(&-t) / (t_norm * a_norm)).clamp(-1.0, 1.0).acos();
    let beta_plus = beta + px_error_angle;
    let gamma_plus = PI - alpha - beta_plus;
    if gamma_plus <= 0.0 {
        return None;
    }
    let z_plus = t_norm * beta_plus.sin() / gamma_plus.sin();
    let tau = z_plus - z;
    (tau.is_finite() && tau > 0.0).then_some(tau)
}
