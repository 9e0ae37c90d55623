//! Thin-plate-spline warp for non-rigid alignment.
//!
//! The spline interpolates the control points exactly and minimizes bending
//! energy between them. Callers fit it backward (destination points as the
//! source argument) so evaluation directly drives backward-mapped resampling.

use nalgebra::{DMatrix, DVector};

use crate::error::{PairalignError, Result};
use crate::frame::Point;

/// A fitted thin-plate-spline mapping.
#[derive(Clone, Debug)]
pub struct TpsWarp {
    control: Vec<Point>,
    // Per output coordinate: control weights followed by the affine part
    // [w_1..w_n, a0, ax, ay].
    coeffs_x: Vec<f64>,
    coeffs_y: Vec<f64>,
}

/// Radial basis U(r) = r^2 ln(r^2), with U(0) = 0.
fn kernel(r2: f64) -> f64 {
    if r2 < 1e-12 {
        0.0
    } else {
        r2 * r2.ln()
    }
}

fn dist2(a: Point, b: Point) -> f64 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    dx * dx + dy * dy
}

impl TpsWarp {
    /// Fit a spline mapping `from[i]` to `to[i]`.
    ///
    /// Solves the standard augmented system
    /// `[K P; P^T 0] [w; a] = [v; 0]` once per output coordinate.
    pub fn fit(from: &[Point], to: &[Point]) -> Result<TpsWarp> {
        let n = from.len();
        if n != to.len() || n < 4 {
            return Err(PairalignError::Correspondence {
                found: n.min(to.len()),
                needed: 4,
            });
        }

        let size = n + 3;
        let mut system = DMatrix::<f64>::zeros(size, size);
        for i in 0..n {
            for j in 0..n {
                system[(i, j)] = kernel(dist2(from[i], from[j]));
            }
            system[(i, n)] = 1.0;
            system[(i, n + 1)] = from[i].x;
            system[(i, n + 2)] = from[i].y;
            system[(n, i)] = 1.0;
            system[(n + 1, i)] = from[i].x;
            system[(n + 2, i)] = from[i].y;
        }

        let lu = system.lu();

        let mut rhs_x = DVector::<f64>::zeros(size);
        let mut rhs_y = DVector::<f64>::zeros(size);
        for i in 0..n {
            rhs_x[i] = to[i].x;
            rhs_y[i] = to[i].y;
        }

        let coeffs_x = lu.solve(&rhs_x).ok_or_else(|| {
            PairalignError::TransformFit("thin-plate spline system is singular".into())
        })?;
        let coeffs_y = lu.solve(&rhs_y).ok_or_else(|| {
            PairalignError::TransformFit("thin-plate spline system is singular".into())
        })?;

        Ok(TpsWarp {
            control: from.to_vec(),
            coeffs_x: coeffs_x.iter().copied().collect(),
            coeffs_y: coeffs_y.iter().copied().collect(),
        })
    }

    /// Evaluate the warp at a point.
    pub fn apply(&self, p: Point) -> Point {
        let n = self.control.len();
        let mut x = self.coeffs_x[n] + self.coeffs_x[n + 1] * p.x + self.coeffs_x[n + 2] * p.y;
        let mut y = self.coeffs_y[n] + self.coeffs_y[n + 1] * p.x + self.coeffs_y[n + 2] * p.y;
        for (i, &c) in self.control.iter().enumerate() {
            let u = kernel(dist2(p, c));
            x += self.coeffs_x[i] * u;
            y += self.coeffs_y[i] * u;
        }
        Point::new(x, y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn interpolates_control_points_exactly() {
        let from = vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(0.0, 10.0),
            Point::new(10.0, 10.0),
            Point::new(5.0, 5.0),
        ];
        let to = vec![
            Point::new(1.0, 1.0),
            Point::new(11.5, 0.5),
            Point::new(-0.5, 11.0),
            Point::new(10.5, 10.5),
            Point::new(5.8, 4.9),
        ];
        let warp = TpsWarp::fit(&from, &to).unwrap();
        for (&f, &t) in from.iter().zip(to.iter()) {
            let got = warp.apply(f);
            assert_abs_diff_eq!(got.x, t.x, epsilon = 1e-6);
            assert_abs_diff_eq!(got.y, t.y, epsilon = 1e-6);
        }
    }

    #[test]
    fn affine_input_stays_affine_between_controls() {
        // When the displacement is purely affine the spline should reproduce
        // it everywhere, not just at the controls.
        let from = vec![
            Point::new(0.0, 0.0),
            Point::new(20.0, 0.0),
            Point::new(0.0, 20.0),
            Point::new(20.0, 20.0),
        ];
        let to: Vec<Point> = from
            .iter()
            .map(|p| Point::new(2.0 * p.x + 3.0, 2.0 * p.y - 1.0))
            .collect();
        let warp = TpsWarp::fit(&from, &to).unwrap();
        let mid = warp.apply(Point::new(7.0, 13.0));
        assert_abs_diff_eq!(mid.x, 17.0, epsilon = 1e-6);
        assert_abs_diff_eq!(mid.y, 25.0, epsilon = 1e-6);
    }

    #[test]
    fn too_few_controls_is_an_error() {
        let pts = vec![Point::new(0.0, 0.0), Point::new(1.0, 1.0)];
        assert!(TpsWarp::fit(&pts, &pts).is_err());
    }
}
