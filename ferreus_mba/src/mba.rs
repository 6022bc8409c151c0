/////////////////////////////////////////////////////////////////////////////////////////////
//
// Implements the multilevel B-spline model: construction, evaluation, gradients, and compaction.
//
// Created on: 19 Oct 2026     Author: Daniel Owen
//
// Copyright (c) 2026, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

use crate::{
    config::{InitialApproximation, MbaParams, OutOfDomain},
    multilevel::{build_hierarchy, rms, LevelReport, Termination},
    progress::{ProgressMsg, ProgressSink},
    trend::LinearTrend,
    MbaError,
};
use faer::{Mat, MatRef};
use ferreus_bspline::{BoundingBox, ControlLattice, LatticeScratch, LevelSpec};
use ndarray::{ArrayD, ArrayViewD, IxDyn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::{borrow::Cow, fmt, sync::Arc, time::Instant};

/// Minimum number of target points handled by one evaluation task.
const EVAL_MIN_CHUNK: usize = 256;

/// Convenience builder for constructing a [`MultilevelBSpline`].
///
/// The builder should be called via the [`MultilevelBSpline::builder`] method.
///
/// See [`MultilevelBSpline`] for details on each field.
pub struct MultilevelBSplineBuilder {
    lo: Vec<f64>,
    hi: Vec<f64>,
    grid: Vec<usize>,
    points: Mat<f64>,
    point_values: Mat<f64>,
    weights: Option<Vec<f64>>,
    params: MbaParams,
    progress_callback: Option<Arc<dyn ProgressSink>>,
}

impl MultilevelBSplineBuilder {
    fn new(
        lo: Vec<f64>,
        hi: Vec<f64>,
        grid: Vec<usize>,
        points: Mat<f64>,
        point_values: Mat<f64>,
    ) -> Self {
        Self {
            lo,
            hi,
            grid,
            points,
            point_values,
            weights: None,
            params: MbaParams::default(),
            progress_callback: None,
        }
    }

    /// Sets custom construction and evaluation parameters.
    pub fn params(mut self, params: MbaParams) -> Self {
        self.params = params;
        self
    }

    /// Per-sample weights. Samples with a weight of zero or less do not take
    /// part in fitting. Defaults to `1` for every sample.
    pub fn weights(mut self, weights: Vec<f64>) -> Self {
        self.weights = Some(weights);
        self
    }

    /// Optional callback for reporting construction progress.
    ///
    /// Skipped during serialization.
    pub fn progress_callback(mut self, progress_callback: Arc<dyn ProgressSink>) -> Self {
        self.progress_callback = Some(progress_callback);
        self
    }

    /// Validates the inputs and builds the model.
    ///
    /// # Errors
    /// - [`MbaError::InvalidConfig`] for out-of-range parameters or a zero grid entry.
    /// - [`MbaError::InvalidDomain`] if any `lo[d] >= hi[d]`.
    /// - [`MbaError::ShapeMismatch`] if `lo`, `hi`, `grid`, the point columns,
    ///   the values or the weights disagree in size, or if no samples are given.
    /// - [`MbaError::NonFiniteInput`] for NaN or infinite coordinates, values or weights.
    pub fn build(self) -> Result<MultilevelBSpline, MbaError> {
        MultilevelBSpline::new(
            self.lo,
            self.hi,
            self.grid,
            self.points,
            self.point_values,
            self.weights,
            self.params,
            self.progress_callback,
        )
    }
}

/// A multilevel uniform cubic B-spline approximation of scattered data.
///
/// The model is a hierarchy of control lattices over one bounding box. Level
/// `l` has `grid * 2^l` cells per dimension and approximates what the coarser
/// levels left unexplained, so the model value at a point is
///
/// ```text
/// f(p) = trend(p) + Σ_l lattice_l(p)
/// ```
///
/// where the trend is zero unless [`InitialApproximation::Linear`] was
/// requested. The function is C² continuous and defined everywhere: outside
/// the bounding box the polynomial pieces of the boundary cells are extended,
/// or evaluation is refused, depending on [`MbaParams::out_of_domain`].
///
/// The model is immutable after construction and can be evaluated
/// concurrently from any number of threads.
///
/// # Example
/// ```
/// use ferreus_mba::{MultilevelBSpline, generate_random_points};
/// use faer::Mat;
///
/// let points = generate_random_points(200, 2, Some(7));
/// let values = Mat::from_fn(200, 1, |i, _| points[(i, 0)] * points[(i, 1)]);
///
/// let model = MultilevelBSpline::builder(
///     vec![0.0, 0.0],
///     vec![1.0, 1.0],
///     vec![2, 2],
///     points.clone(),
///     values.clone(),
/// )
/// .build()
/// .unwrap();
///
/// let fitted = model.evaluate(&points).unwrap();
/// assert_eq!(fitted.nrows(), 200);
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MultilevelBSpline {
    /// Domain shared by every level.
    bbox: BoundingBox,

    /// Parameters used to build the model; `out_of_domain` also governs evaluation.
    params: MbaParams,

    /// Optional initial linear approximation.
    trend: Option<LinearTrend>,

    /// Control lattices, coarsest first.
    levels: Vec<ControlLattice>,

    /// Diagnostics recorded while the levels were fitted.
    reports: Vec<LevelReport>,

    termination: Termination,

    /// Optional callback for reporting progress.
    /// Skipped during serialization.
    #[serde(skip, default)]
    pub(crate) progress_callback: Option<Arc<dyn ProgressSink>>,
}

impl MultilevelBSpline {
    /// Creates a new [`MultilevelBSplineBuilder`].
    ///
    /// - `lo`, `hi`: corners of the domain, one entry per dimension.
    /// - `grid`: cells per dimension of the coarsest lattice.
    /// - `points`: sample coordinates, one row per sample.
    /// - `point_values`: sample values, an `n x 1` matrix.
    pub fn builder(
        lo: Vec<f64>,
        hi: Vec<f64>,
        grid: Vec<usize>,
        points: Mat<f64>,
        point_values: Mat<f64>,
    ) -> MultilevelBSplineBuilder {
        MultilevelBSplineBuilder::new(lo, hi, grid, points, point_values)
    }

    #[allow(clippy::too_many_arguments)]
    fn new(
        lo: Vec<f64>,
        hi: Vec<f64>,
        grid: Vec<usize>,
        points: Mat<f64>,
        point_values: Mat<f64>,
        weights: Option<Vec<f64>>,
        params: MbaParams,
        progress_callback: Option<Arc<dyn ProgressSink>>,
    ) -> Result<Self, MbaError> {
        let build_start = Instant::now();

        params.validate()?;

        let bbox = BoundingBox::new(lo, hi)?;
        let dims = bbox.dimensions();

        check_shape("grid", dims, grid.len())?;
        let base = LevelSpec::new(grid)?;
        check_finest_level(&base, params.max_levels)?;

        check_shape("point columns", dims, points.ncols())?;
        if points.nrows() == 0 {
            return Err(MbaError::ShapeMismatch {
                name: "points",
                expected: 1,
                found: 0,
            });
        }

        let num_points = points.nrows();
        check_shape("value columns", 1, point_values.ncols())?;
        check_shape("values", num_points, point_values.nrows())?;
        if let Some(w) = &weights {
            check_shape("weights", num_points, w.len())?;
        }

        if let Some(row) = (0..num_points).find(|&i| (0..dims).any(|d| !points[(i, d)].is_finite()))
        {
            return Err(MbaError::NonFiniteInput {
                name: "points",
                row,
            });
        }

        let values: Vec<f64> = (0..num_points).map(|i| point_values[(i, 0)]).collect();
        if let Some(row) = values.iter().position(|v| !v.is_finite()) {
            return Err(MbaError::NonFiniteInput {
                name: "values",
                row,
            });
        }

        if let Some(row) = weights
            .as_ref()
            .and_then(|w| w.iter().position(|v| !v.is_finite()))
        {
            return Err(MbaError::NonFiniteInput {
                name: "weights",
                row,
            });
        }

        let weights = weights.as_deref();

        if let Some(sink) = &progress_callback {
            let num_ignored = weights.map_or(0, |w| w.iter().filter(|v| !(**v > 0.0)).count());
            if num_ignored > 0 {
                sink.emit(ProgressMsg::SamplesIgnored { num_ignored });
            }
        }

        let trend = match params.initial_approximation {
            InitialApproximation::None => None,
            InitialApproximation::Linear => Some(LinearTrend::fit(
                &bbox,
                points.as_ref(),
                &values,
                weights,
            )),
        };

        let mut residuals = values;
        if let Some(trend) = &trend {
            subtract_trend(trend, points.as_ref(), &mut residuals);
        }

        let hierarchy = build_hierarchy(
            &bbox,
            base,
            points.as_ref(),
            &mut residuals,
            weights,
            &params,
            progress_callback.as_ref(),
        )?;

        let model = Self {
            bbox,
            params,
            trend,
            levels: hierarchy.levels,
            reports: hierarchy.reports,
            termination: hierarchy.termination,
            progress_callback,
        };

        if let Some(sink) = &model.progress_callback {
            let msg = format!(
                "Took {:?} to fit {} level(s) to {} points in {}D.\n\
                Termination: {}, final RMS residual: {:e}",
                build_start.elapsed(),
                model.levels.len(),
                num_points,
                dims,
                model.termination,
                rms(&residuals, weights),
            );

            sink.emit(ProgressMsg::Message { message: msg });
        }

        Ok(model)
    }

    /// Evaluates the model at a single point.
    ///
    /// # Errors
    /// - [`MbaError::ShapeMismatch`] if `point` does not have one coordinate per dimension.
    /// - [`MbaError::PointOutsideDomain`] if the point is outside the domain and
    ///   [`OutOfDomain::Reject`] is configured.
    pub fn evaluate_point(&self, point: &[f64]) -> Result<f64, MbaError> {
        check_shape("point", self.dimensions(), point.len())?;
        self.check_domain(point, 0)?;

        let mut scratch = LatticeScratch::new(self.dimensions());
        Ok(self.apply_with(point, &mut scratch))
    }

    /// Evaluates the model at every row of `target_points`.
    ///
    /// Returns an `n x 1` matrix of values. Rows are evaluated in parallel.
    ///
    /// # Errors
    /// - [`MbaError::ShapeMismatch`] if the number of columns differs from the
    ///   model dimensionality.
    /// - [`MbaError::PointOutsideDomain`] for the first row outside the domain
    ///   when [`OutOfDomain::Reject`] is configured.
    pub fn evaluate(&self, target_points: &Mat<f64>) -> Result<Mat<f64>, MbaError> {
        let dims = self.dimensions();
        check_shape("target point columns", dims, target_points.ncols())?;

        let targets = target_points.as_ref();
        let num_targets = targets.nrows();

        if self.params.out_of_domain == OutOfDomain::Reject {
            let outside = (0..num_targets)
                .into_par_iter()
                .position_first(|i| !self.row_inside(targets, i));
            if let Some(point_index) = outside {
                return Err(MbaError::PointOutsideDomain { point_index });
            }
        }

        let values: Vec<f64> = (0..num_targets)
            .into_par_iter()
            .with_min_len(EVAL_MIN_CHUNK)
            .map_init(
                || (LatticeScratch::new(dims), vec![0.0; dims]),
                |(scratch, point), i| {
                    for (d, p) in point.iter_mut().enumerate() {
                        *p = *targets.get(i, d);
                    }
                    self.apply_with(point, scratch)
                },
            )
            .collect();

        Ok(Mat::from_fn(num_targets, 1, |i, _| values[i]))
    }

    /// Evaluates the model over an array of any leading shape whose last
    /// axis holds the coordinates.
    ///
    /// An input of shape `[s0, s1, ..., NDim]` produces values of shape
    /// `[s0, s1, ...]`. Points are taken in logical (row-major) order, so
    /// any memory layout is accepted.
    ///
    /// # Errors
    /// - [`MbaError::ShapeMismatch`] if the array has no axes or its last axis
    ///   is not of length `NDim`.
    /// - [`MbaError::PointOutsideDomain`] with the flattened row-major index of the
    ///   first outside point when [`OutOfDomain::Reject`] is configured.
    pub fn evaluate_nd(&self, targets: ArrayViewD<f64>) -> Result<ArrayD<f64>, MbaError> {
        let dims = self.dimensions();
        let shape = targets.shape();

        let Some((&last, leading)) = shape.split_last() else {
            return Err(MbaError::ShapeMismatch {
                name: "target axes",
                expected: 1,
                found: 0,
            });
        };
        check_shape("target coordinate axis", dims, last)?;
        let leading = leading.to_vec();

        let standard = targets.as_standard_layout();
        let flat: Cow<[f64]> = match standard.as_slice() {
            Some(slice) => Cow::Borrowed(slice),
            None => Cow::Owned(standard.iter().copied().collect()),
        };

        if self.params.out_of_domain == OutOfDomain::Reject {
            let outside = flat
                .par_chunks(dims)
                .position_first(|point| !self.bbox.contains(point));
            if let Some(point_index) = outside {
                return Err(MbaError::PointOutsideDomain { point_index });
            }
        }

        let values: Vec<f64> = flat
            .par_chunks(dims)
            .with_min_len(EVAL_MIN_CHUNK)
            .map_init(
                || LatticeScratch::new(dims),
                |scratch, point| self.apply_with(point, scratch),
            )
            .collect();

        let expected = values.len();
        ArrayD::from_shape_vec(IxDyn(&leading), values).map_err(|_| MbaError::ShapeMismatch {
            name: "target points",
            expected,
            found: leading.iter().product(),
        })
    }

    /// Gradient of the model at a single point, one partial derivative per dimension.
    ///
    /// # Errors
    /// As for [`MultilevelBSpline::evaluate_point`].
    pub fn gradient_point(&self, point: &[f64]) -> Result<Vec<f64>, MbaError> {
        check_shape("point", self.dimensions(), point.len())?;
        self.check_domain(point, 0)?;

        let mut scratch = LatticeScratch::new(self.dimensions());
        let mut gradient = vec![0.0; self.dimensions()];

        if let Some(trend) = &self.trend {
            trend.add_gradient(&mut gradient);
        }
        for lattice in &self.levels {
            lattice.add_gradient_with(&self.bbox, point, &mut scratch, &mut gradient);
        }

        Ok(gradient)
    }

    /// Returns an equivalent model holding a single dense lattice at the
    /// finest resolution.
    ///
    /// Coarse levels are carried to the finest resolution by exact cubic
    /// B-spline subdivision and summed, so evaluation of the compacted model
    /// matches this model up to rounding, inside and outside the domain,
    /// at the cost of one lattice evaluation per point instead of one per level.
    ///
    /// # Errors
    /// [`MbaError::IncompatibleLevels`] if the levels cannot be merged, either
    /// because their resolutions are not related by doubling or because the
    /// finest lattice is too large to store densely.
    pub fn compact(&self) -> Result<Self, MbaError> {
        let mut levels = self.levels.iter();

        let Some(first) = levels.next() else {
            return Ok(self.clone());
        };

        if let Some(finest) = self.levels.last() {
            finest
                .spec()
                .dense_len()
                .map_err(MbaError::IncompatibleLevels)?;
        }

        let merged = levels
            .try_fold(first.clone(), |acc, finer| acc.merged_with(finer))
            .map_err(MbaError::IncompatibleLevels)?;

        let report = LevelReport {
            level: 0,
            grid: merged.spec().resolution().to_vec(),
            fill_ratio: merged.fill_ratio(),
            sparse: merged.is_sparse(),
            rms: self.reports.last().map_or(0.0, |r| r.rms),
        };

        Ok(Self {
            bbox: self.bbox.clone(),
            params: self.params,
            trend: self.trend.clone(),
            levels: vec![merged],
            reports: vec![report],
            termination: self.termination,
            progress_callback: self.progress_callback.clone(),
        })
    }

    /// Number of spatial dimensions.
    #[inline]
    pub fn dimensions(&self) -> usize {
        self.bbox.dimensions()
    }

    /// The model domain.
    pub fn bounding_box(&self) -> &BoundingBox {
        &self.bbox
    }

    /// Control lattices, coarsest first.
    pub fn levels(&self) -> &[ControlLattice] {
        &self.levels
    }

    /// Per-level diagnostics, aligned with [`MultilevelBSpline::levels`].
    pub fn reports(&self) -> &[LevelReport] {
        &self.reports
    }

    pub fn termination(&self) -> Termination {
        self.termination
    }

    pub fn params(&self) -> &MbaParams {
        &self.params
    }

    pub fn trend(&self) -> Option<&LinearTrend> {
        self.trend.as_ref()
    }

    #[inline]
    fn apply_with(&self, point: &[f64], scratch: &mut LatticeScratch) -> f64 {
        let base = self.trend.as_ref().map_or(0.0, |t| t.evaluate(point));

        self.levels
            .iter()
            .fold(base, |acc, lattice| acc + lattice.apply_with(&self.bbox, point, scratch))
    }

    fn check_domain(&self, point: &[f64], point_index: usize) -> Result<(), MbaError> {
        if self.params.out_of_domain == OutOfDomain::Reject && !self.bbox.contains(point) {
            return Err(MbaError::PointOutsideDomain { point_index });
        }
        Ok(())
    }

    fn row_inside(&self, targets: MatRef<f64>, row: usize) -> bool {
        let lo = self.bbox.lo();
        let hi = self.bbox.hi();
        (0..self.dimensions()).all(|d| {
            let v = *targets.get(row, d);
            v >= lo[d] && v <= hi[d]
        })
    }

    /// Checks that deserialized parts agree with each other.
    pub(crate) fn validate_parts(&self) -> Result<(), MbaError> {
        self.params.validate()?;
        let dims = self.dimensions();

        for lattice in &self.levels {
            lattice.validate()?;
            check_shape("lattice dimensions", dims, lattice.spec().dimensions())?;
        }

        check_shape("level reports", self.levels.len(), self.reports.len())?;

        if let Some(trend) = &self.trend {
            if !trend.is_consistent(dims) {
                return Err(MbaError::ShapeMismatch {
                    name: "trend coefficients",
                    expected: dims + 1,
                    found: trend.coefficients().len(),
                });
            }
        }

        Ok(())
    }
}

impl fmt::Display for MultilevelBSpline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "MultilevelBSpline: {}D, {} level(s), {}",
            self.dimensions(),
            self.levels.len(),
            self.termination
        )?;

        write!(f, "  domain:")?;
        for (lo, hi) in self.bbox.lo().iter().zip(self.bbox.hi()) {
            write!(f, " [{}, {}]", lo, hi)?;
        }
        writeln!(f)?;

        if let Some(trend) = &self.trend {
            writeln!(f, "  trend: linear {:?}", trend.coefficients())?;
        }

        for (lattice, report) in self.levels.iter().zip(&self.reports) {
            writeln!(
                f,
                "  level {:>2}: grid {:?}, {} ({} of {} nodes stored), fill {:.1}%, rms {:.3e}",
                report.level,
                report.grid,
                if lattice.is_sparse() { "sparse" } else { "dense" },
                lattice.stored_nodes(),
                lattice.num_nodes(),
                100.0 * report.fill_ratio,
                report.rms,
            )?;
        }

        Ok(())
    }
}

fn subtract_trend(trend: &LinearTrend, points: MatRef<f64>, residuals: &mut [f64]) {
    let dims = points.ncols();

    residuals.par_iter_mut().enumerate().for_each_init(
        || vec![0.0; dims],
        |point, (i, residual)| {
            for (d, p) in point.iter_mut().enumerate() {
                *p = *points.get(i, d);
            }
            *residual -= trend.evaluate(point);
        },
    );
}

/// Rejects a level count whose finest lattice could not be indexed.
fn check_finest_level(base: &LevelSpec, max_levels: usize) -> Result<(), MbaError> {
    let mut spec = base.clone();
    for _ in 1..max_levels {
        spec = spec.refined().map_err(|_| MbaError::InvalidConfig {
            parameter: "max_levels",
            value: max_levels.to_string(),
            expected: "a level count whose finest lattice has an indexable number of control nodes",
        })?;
    }
    Ok(())
}

#[inline]
fn check_shape(name: &'static str, expected: usize, found: usize) -> Result<(), MbaError> {
    if expected == found {
        Ok(())
    } else {
        Err(MbaError::ShapeMismatch {
            name,
            expected,
            found,
        })
    }
}
