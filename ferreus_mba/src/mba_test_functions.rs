/////////////////////////////////////////////////////////////////////////////////////////////
//
// Provides analytic test functions for validating and demonstrating multilevel B-spline fits.
//
// Created on: 19 Oct 2026     Author: Daniel Owen
//
// Copyright (c) 2026, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! Smooth analytic functions on the unit square / cube, used to generate
//! sample values for examples and tests.
use faer::Mat;
use std::f64::consts::PI;

/// Struct that implements 2D and 3D functions to generate values for testing
/// multilevel B-spline approximation.
pub struct MBATestFunctions;

impl MBATestFunctions {
    /// `F(x, y) = sin(2πx) cos(2πy)`.
    pub fn sine_cosine_2d(points: &Mat<f64>) -> Mat<f64> {
        assert_eq!(points.ncols(), 2);

        Mat::from_fn(points.nrows(), 1, |i, _| {
            (2.0 * PI * points[(i, 0)]).sin() * (2.0 * PI * points[(i, 1)]).cos()
        })
    }

    /// Franke's two-dimensional test function:
    ///
    /// ```text
    /// F(x, y) = 3/4 exp(-((9x-2)^2 + (9y-2)^2) / 4)
    ///         + 3/4 exp(-(9x+1)^2 / 49 - (9y+1)^2 / 10)
    ///         + 1/2 exp(-((9x-7)^2 + (9y-3)^2) / 4)
    ///         - 1/5 exp(-(9x-4)^2 - (9y-7)^2)
    /// ```
    pub fn franke_2d(points: &Mat<f64>) -> Mat<f64> {
        assert_eq!(points.ncols(), 2);

        Mat::from_fn(points.nrows(), 1, |i, _| {
            franke(&[9.0 * points[(i, 0)], 9.0 * points[(i, 1)]])
        })
    }

    /// Franke's function extended to three dimensions, with the `z` terms
    /// centred on `(9z - 2)`, `(9z + 1)`, `(9z - 5)` and `(9z - 5)`.
    pub fn franke_3d(points: &Mat<f64>) -> Mat<f64> {
        assert_eq!(points.ncols(), 3);

        Mat::from_fn(points.nrows(), 1, |i, _| {
            franke(&[
                9.0 * points[(i, 0)],
                9.0 * points[(i, 1)],
                9.0 * points[(i, 2)],
            ])
        })
    }
}

/// Franke's function in scaled coordinates `s = 9p`, for two or three dimensions.
fn franke(s: &[f64]) -> f64 {
    let sq = |v: f64| v * v;
    let z = |c: f64, divisor: f64| s.get(2).map_or(0.0, |z| sq(z - c) / divisor);

    let term1 = 0.75 * (-(sq(s[0] - 2.0) + sq(s[1] - 2.0)) / 4.0 - z(2.0, 4.0)).exp();
    let term2 = 0.75 * (-sq(s[0] + 1.0) / 49.0 - sq(s[1] + 1.0) / 10.0 - z(-1.0, 10.0)).exp();
    let term3 = 0.5 * (-(sq(s[0] - 7.0) + sq(s[1] - 3.0)) / 4.0 - z(5.0, 4.0)).exp();
    let term4 = -0.2 * (-sq(s[0] - 4.0) - sq(s[1] - 7.0) - z(5.0, 1.0)).exp();

    term1 + term2 + term3 + term4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn franke_known_value_at_origin() {
        let origin = Mat::<f64>::zeros(1, 2);
        let value = MBATestFunctions::franke_2d(&origin)[(0, 0)];

        let expected = 0.75 * (-2.0f64).exp()
            + 0.75 * (-1.0 / 49.0 - 0.1f64).exp()
            + 0.5 * (-58.0 / 4.0f64).exp()
            - 0.2 * (-65.0f64).exp();
        assert!((value - expected).abs() < 1e-14);
    }

    #[test]
    fn sine_cosine_vanishes_on_grid_lines() {
        let points = Mat::from_fn(3, 2, |i, j| if j == 0 { 0.5 * i as f64 } else { 0.3 });
        let values = MBATestFunctions::sine_cosine_2d(&points);

        for i in 0..3 {
            assert!(values[(i, 0)].abs() < 1e-12);
        }
    }

    #[test]
    fn franke_3d_is_finite_on_the_cube() {
        let points = Mat::from_fn(4, 3, |i, j| 0.1 * (i + j) as f64);
        let values = MBATestFunctions::franke_3d(&points);

        assert_eq!(values.nrows(), 4);
        assert!((0..4).all(|i| values[(i, 0)].is_finite()));
    }
}
