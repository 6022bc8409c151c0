/////////////////////////////////////////////////////////////////////////////////////////////
//
// Implements the least-squares linear trend optionally removed before the first level.
//
// Created on: 19 Oct 2026     Author: Daniel Owen
//
// Copyright (c) 2026, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

use ferreus_bspline::BoundingBox;
use faer::{linalg::solvers::Solve, Mat, MatRef};
use serde::{Deserialize, Serialize};

/// Relative size below which a pivot of the normal matrix counts as zero.
const RANK_TOL: f64 = 1e-10;

/// Weighted least-squares plane `v(p) = c0 + Σ c[d+1] * (p[d] - center[d]) / scale[d]`.
///
/// Coordinates are centred and scaled with the model bounding box so the
/// normal equations stay well conditioned for domains far from the origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearTrend {
    center: Vec<f64>,
    scale: Vec<f64>,
    coefficients: Vec<f64>,
}

impl LinearTrend {
    /// Fits the trend to `values` at `points`, ignoring samples whose weight
    /// is not positive.
    ///
    /// Falls back to the weighted mean when the samples do not determine a
    /// plane (fewer samples than unknowns or all samples on a hyperplane).
    pub(crate) fn fit(
        bbox: &BoundingBox,
        points: MatRef<f64>,
        values: &[f64],
        weights: Option<&[f64]>,
    ) -> Self {
        let dims = bbox.dimensions();
        let center: Vec<f64> = (0..dims)
            .map(|d| 0.5 * (bbox.lo()[d] + bbox.hi()[d]))
            .collect();
        let scale: Vec<f64> = (0..dims).map(|d| 0.5 * bbox.extent(d)).collect();

        let unknowns = dims + 1;
        let mut normal = Mat::<f64>::zeros(unknowns, unknowns);
        let mut rhs = Mat::<f64>::zeros(unknowns, 1);
        let mut row = vec![0.0; unknowns];
        let mut total_weight = 0.0;
        let mut weighted_sum = 0.0;
        let mut used = 0usize;

        for i in 0..points.nrows() {
            let w = weights.map_or(1.0, |w| w[i]);
            if !(w > 0.0) {
                continue;
            }

            row[0] = 1.0;
            for d in 0..dims {
                row[d + 1] = (*points.get(i, d) - center[d]) / scale[d];
            }

            for r in 0..unknowns {
                rhs[(r, 0)] += w * row[r] * values[i];
                for c in 0..unknowns {
                    normal[(r, c)] += w * row[r] * row[c];
                }
            }

            total_weight += w;
            weighted_sum += w * values[i];
            used += 1;
        }

        let mean = if total_weight > 0.0 {
            weighted_sum / total_weight
        } else {
            0.0
        };

        let mut coefficients = vec![0.0; unknowns];
        coefficients[0] = mean;

        if used >= unknowns && full_rank(&normal) {
            let solution = normal.full_piv_lu().solve(rhs);
            let solved: Vec<f64> = (0..unknowns).map(|r| solution[(r, 0)]).collect();

            if solved.iter().all(|c| c.is_finite()) {
                coefficients = solved;
            }
        }

        Self {
            center,
            scale,
            coefficients,
        }
    }

    /// Value of the trend at `point`.
    #[inline]
    pub fn evaluate(&self, point: &[f64]) -> f64 {
        self.coefficients[1..]
            .iter()
            .zip(point.iter())
            .zip(self.center.iter().zip(self.scale.iter()))
            .fold(self.coefficients[0], |acc, ((c, p), (m, s))| {
                acc + c * (p - m) / s
            })
    }

    /// Adds the (constant) gradient of the trend to `gradient`.
    #[inline]
    pub fn add_gradient(&self, gradient: &mut [f64]) {
        for (d, g) in gradient.iter_mut().enumerate() {
            *g += self.coefficients[d + 1] / self.scale[d];
        }
    }

    /// Intercept followed by one slope per dimension, in scaled coordinates.
    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    pub(crate) fn is_consistent(&self, dimensions: usize) -> bool {
        self.center.len() == dimensions
            && self.scale.len() == dimensions
            && self.coefficients.len() == dimensions + 1
    }
}

/// Whether the normal matrix determines a unique plane, judged from the
/// diagonal of its column-pivoted QR factor.
fn full_rank(normal: &Mat<f64>) -> bool {
    let qr = normal.col_piv_qr();
    let r = qr.thin_R();

    let thresh = RANK_TOL * r.get(0, 0).abs();
    let rank = r
        .diagonal()
        .column_vector()
        .iter()
        .filter(|val| val.abs() > thresh)
        .count();

    rank == normal.ncols()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn plane(p: &[f64]) -> f64 {
        3.0 - 2.0 * p[0] + 0.5 * p[1]
    }

    #[test]
    fn reproduces_a_plane() {
        let bbox = BoundingBox::new(vec![100.0, -50.0], vec![300.0, 50.0]).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let points = Mat::from_fn(40, 2, |_, d| {
            rng.random_range(bbox.lo()[d]..bbox.hi()[d])
        });
        let values: Vec<f64> = (0..40)
            .map(|i| plane(&[points[(i, 0)], points[(i, 1)]]))
            .collect();

        let trend = LinearTrend::fit(&bbox, points.as_ref(), &values, None);

        for p in [[150.0, 0.0], [299.0, -49.0], [400.0, 80.0]] {
            assert!((trend.evaluate(&p) - plane(&p)).abs() < 1e-8);
        }

        let mut gradient = [0.0; 2];
        trend.add_gradient(&mut gradient);
        assert!((gradient[0] + 2.0).abs() < 1e-10);
        assert!((gradient[1] - 0.5).abs() < 1e-10);
    }

    #[test]
    fn underdetermined_fit_falls_back_to_mean() {
        let bbox = BoundingBox::new(vec![0.0, 0.0, 0.0], vec![1.0, 1.0, 1.0]).unwrap();
        let points = Mat::from_fn(2, 3, |i, _| 0.25 + 0.5 * i as f64);

        let trend = LinearTrend::fit(&bbox, points.as_ref(), &[1.0, 3.0], None);

        assert_eq!(trend.coefficients(), &[2.0, 0.0, 0.0, 0.0]);
        assert_eq!(trend.evaluate(&[0.9, 0.1, 0.4]), 2.0);
    }

    #[test]
    fn samples_on_a_hyperplane_fall_back_to_mean() {
        let bbox = BoundingBox::new(vec![0.0, 0.0], vec![1.0, 1.0]).unwrap();
        let points = Mat::from_fn(5, 2, |i, _| 0.1 + 0.2 * i as f64);
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];

        let trend = LinearTrend::fit(&bbox, points.as_ref(), &values, None);

        assert!((trend.coefficients()[0] - 3.0).abs() < 1e-12);
        assert_eq!(&trend.coefficients()[1..], &[0.0, 0.0]);
        assert!((trend.evaluate(&[0.9, 0.1]) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn zero_weight_samples_do_not_contribute() {
        let bbox = BoundingBox::new(vec![0.0], vec![1.0]).unwrap();
        let points = Mat::from_fn(3, 1, |i, _| i as f64 * 0.5);

        let trend = LinearTrend::fit(
            &bbox,
            points.as_ref(),
            &[0.0, 1.0, 100.0],
            Some(&[1.0, 1.0, 0.0]),
        );

        assert!((trend.evaluate(&[1.0]) - 2.0).abs() < 1e-10);
    }
}
