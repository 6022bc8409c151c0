/////////////////////////////////////////////////////////////////////////////////////////////
//
// Defines shared helpers for random point generation, evaluation grids, and CSV I/O.
//
// Created on: 19 Oct 2026     Author: Daniel Owen
//
// Copyright (c) 2026, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

use csv::{ReaderBuilder, Writer};
use faer::{Mat, MatRef};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::error::Error;
use std::fs::File;
use std::path::Path;

/// Generate a matrix of random points in the unit hypercube.
///
/// # Parameters
/// - `n`: Number of points to generate (rows in the output matrix).
/// - `d`: Number of spatial dimensions per point (columns in the output matrix).
/// - `seed`: Optional random seed. With `Some(seed)` the same points are
///   generated on every run; with `None` the generator is seeded from the
///   operating system's randomness source.
///
/// # Returns
/// A `Mat<f64>` of shape `(n, d)` where each element lies in `[0.0, 1.0)`.
///
/// # Example
/// ```
/// use ferreus_mba::generate_random_points;
///
/// let pts = generate_random_points(100, 3, Some(42));
/// assert_eq!(pts.ncols(), 3);
/// ```
pub fn generate_random_points(n: usize, d: usize, seed: Option<u64>) -> Mat<f64> {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    Mat::from_fn(n, d, |_, _| rng.random_range(0.0..1.0))
}

/// Create a regular evaluation grid from per-dimension ranges and sample counts.
///
/// The first dimension varies fastest. A dimension with a count of one is
/// sampled at the start of its range.
///
/// # Arguments
/// * `ranges` - Inclusive `(min, max)` range for each dimension.
/// * `counts` - Number of grid samples per range; must match `ranges.len()`.
///
/// # Returns
/// A `Mat<f64>` with one row per grid point and one column per dimension.
pub fn create_evaluation_grid(ranges: &[(f64, f64)], counts: &[usize]) -> Mat<f64> {
    assert_eq!(ranges.len(), counts.len());

    let total_points: usize = counts.iter().product();

    Mat::from_fn(total_points, ranges.len(), |row, col| {
        let (start, end) = ranges[col];
        let count = counts[col];
        let step = if count > 1 {
            (end - start) / (count - 1) as f64
        } else {
            0.0
        };

        let stride: usize = counts[..col].iter().product();
        let index = (row / stride) % count;
        start + step * index as f64
    })
}

/// Load a CSV file into separate point and value matrices.
///
/// The last column is treated as the scalar value, and all preceding
/// columns form the point coordinates.
///
/// # Arguments
/// * `file_path` - Path to the CSV file.
/// * `has_headers` - Whether the file has a single header row to skip.
///
/// # Returns
/// On success, returns `(points, values)` where `points` has shape
/// `(n_rows, n_cols - 1)` and `values` has shape `(n_rows, 1)`.
pub fn csv_to_point_arrays<P: AsRef<Path>>(
    file_path: P,
    has_headers: bool,
) -> Result<(Mat<f64>, Mat<f64>), Box<dyn Error>> {
    let file = File::open(file_path)?;
    let mut reader = ReaderBuilder::new()
        .has_headers(has_headers)
        .from_reader(file);

    let mut coordinates = Vec::new();
    let mut values = Vec::new();
    let mut num_rows = 0;
    let mut num_cols = 0;

    for result in reader.records() {
        let record = result?;
        if num_cols == 0 {
            num_cols = record.len();
            if num_cols < 2 {
                return Err("CSV needs at least one coordinate column and one value column".into());
            }
        } else if record.len() != num_cols {
            return Err("Inconsistent number of columns in CSV".into());
        }

        for (i, field) in record.iter().enumerate() {
            let parsed: f64 = field.trim().parse()?;
            if i == num_cols - 1 {
                values.push(parsed);
            } else {
                coordinates.push(parsed);
            }
        }

        num_rows += 1;
    }

    let dims = num_cols.saturating_sub(1);
    let points = MatRef::from_row_major_slice(coordinates.as_slice(), num_rows, dims).to_owned();
    let values = MatRef::from_row_major_slice(values.as_slice(), num_rows, 1).to_owned();

    Ok((points, values))
}

/// Write point coordinates and associated values to a CSV file.
///
/// Each row of `points` is written followed by the corresponding value
/// from `values`. Coordinate columns are headed `X`, `Y`, `Z` for up to three
/// dimensions and `X0, X1, ...` beyond that; the value column is headed
/// `Value`.
///
/// # Errors
/// Returns an error if the row counts differ or writing to disk fails.
pub fn point_arrays_to_csv<P: AsRef<Path>>(
    points: &Mat<f64>,
    values: &Mat<f64>,
    file_path: P,
) -> Result<(), Box<dyn Error>> {
    let num_points = points.nrows();
    if num_points != values.nrows() {
        return Err("Points and values must have same length.".into());
    }

    let dims = points.ncols();
    let mut headers: Vec<String> = if dims <= 3 {
        ["X", "Y", "Z"][..dims].iter().map(|h| h.to_string()).collect()
    } else {
        (0..dims).map(|d| format!("X{}", d)).collect()
    };
    headers.push("Value".to_string());

    let mut wtr = Writer::from_path(file_path)?;
    wtr.write_record(&headers)?;

    for i in 0..num_points {
        let mut record: Vec<String> = (0..dims).map(|d| points[(i, d)].to_string()).collect();
        record.push(values[(i, 0)].to_string());
        wtr.write_record(&record)?;
    }

    wtr.flush()?;
    Ok(())
}
