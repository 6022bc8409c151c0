/////////////////////////////////////////////////////////////////////////////////////////////
//
// Implements the multilevel residual-correction loop that builds the lattice hierarchy.
//
// Created on: 19 Oct 2026     Author: Daniel Owen
//
// Copyright (c) 2026, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! Multilevel construction.
//!
//! Starting from the base resolution, every level fits a [`ControlLattice`]
//! to the residuals left by the coarser levels, subtracts its contribution
//! at the samples and doubles the resolution. Levels are built strictly in
//! sequence; the work inside a level runs in parallel.
use crate::{
    config::{FillPolicy, MbaParams},
    progress::{progress_from_rel, ProgressMsg, ProgressSink},
    MbaError,
};
use faer::MatRef;
use ferreus_bspline::{BoundingBox, ControlLattice, LatticeScratch, LevelSpec};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};

/// Minimum number of samples handled by one residual update task.
const RESIDUAL_MIN_CHUNK: usize = 512;

/// Reason multilevel construction stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    /// The RMS residual reached the tolerance.
    Converged,

    /// `max_levels` levels were built without reaching the tolerance.
    MaxLevelsReached,

    /// A level fell below `min_fill` while [`FillPolicy::Stop`] was configured.
    Sparse,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Termination::Converged => "converged",
            Termination::MaxLevelsReached => "maximum levels reached",
            Termination::Sparse => "stopped on sparse level",
        };
        f.write_str(text)
    }
}

/// Diagnostics recorded for one level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelReport {
    /// Zero-based level index, coarsest first.
    pub level: usize,

    /// Cells per dimension.
    pub grid: Vec<usize>,

    /// Fraction of control nodes that received data.
    pub fill_ratio: f64,

    /// Whether the lattice was stored sparsely.
    pub sparse: bool,

    /// RMS residual at the samples after this level was added.
    pub rms: f64,
}

pub(crate) struct Hierarchy {
    pub(crate) levels: Vec<ControlLattice>,
    pub(crate) reports: Vec<LevelReport>,
    pub(crate) termination: Termination,
}

/// Builds the lattice hierarchy. `residuals` holds the values to approximate
/// on entry and the final residuals on return.
pub(crate) fn build_hierarchy(
    bbox: &BoundingBox,
    base: LevelSpec,
    points: MatRef<f64>,
    residuals: &mut [f64],
    weights: Option<&[f64]>,
    params: &MbaParams,
    progress: Option<&Arc<dyn ProgressSink>>,
) -> Result<Hierarchy, MbaError> {
    let start_rms = rms(residuals, weights);

    let mut levels: Vec<ControlLattice> = Vec::with_capacity(params.max_levels);
    let mut reports = Vec::with_capacity(params.max_levels);
    let mut spec = base;

    let termination = loop {
        let level = levels.len();

        let lattice = ControlLattice::fit(
            bbox,
            spec.clone(),
            points,
            residuals,
            weights,
            params.min_fill,
        )?;

        subtract_level(bbox, &lattice, points, residuals);
        let level_rms = rms(residuals, weights);
        let fill_ratio = lattice.fill_ratio();

        if let Some(sink) = progress {
            sink.emit(ProgressMsg::LevelFitted {
                level,
                grid: spec.resolution().to_vec(),
                fill_ratio,
                rms: level_rms,
                progress: progress_from_rel(
                    level_rms,
                    start_rms,
                    params.tol,
                    level + 1,
                    params.max_levels,
                ),
            });
        }

        reports.push(LevelReport {
            level,
            grid: spec.resolution().to_vec(),
            fill_ratio,
            sparse: lattice.is_sparse(),
            rms: level_rms,
        });
        levels.push(lattice);

        if level_rms <= params.tol {
            break Termination::Converged;
        }

        if levels.len() >= params.max_levels {
            break Termination::MaxLevelsReached;
        }

        if fill_ratio < params.min_fill && params.fill_policy == FillPolicy::Stop {
            break Termination::Sparse;
        }

        spec = spec.refined()?;
    };

    Ok(Hierarchy {
        levels,
        reports,
        termination,
    })
}

/// Subtracts the lattice's value at every sample from its residual.
fn subtract_level(
    bbox: &BoundingBox,
    lattice: &ControlLattice,
    points: MatRef<f64>,
    residuals: &mut [f64],
) {
    let dims = bbox.dimensions();

    residuals
        .par_iter_mut()
        .enumerate()
        .with_min_len(RESIDUAL_MIN_CHUNK)
        .for_each_init(
            || (LatticeScratch::new(dims), vec![0.0; dims]),
            |(scratch, point), (i, residual)| {
                for (d, p) in point.iter_mut().enumerate() {
                    *p = *points.get(i, d);
                }
                *residual -= lattice.apply_with(bbox, point, scratch);
            },
        );
}

/// Root mean square of the residuals of samples that take part in fitting.
pub(crate) fn rms(residuals: &[f64], weights: Option<&[f64]>) -> f64 {
    let (sum_sq, count) = match weights {
        Some(w) => residuals
            .iter()
            .zip(w.iter())
            .filter(|(_, w)| **w > 0.0)
            .fold((0.0, 0usize), |(s, c), (r, _)| (s + r * r, c + 1)),
        None => (residuals.iter().map(|r| r * r).sum(), residuals.len()),
    };

    if count == 0 {
        0.0
    } else {
        (sum_sq / count as f64).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::closure_sink;
    use faer::Mat;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::f64::consts::PI;
    use std::sync::Mutex;

    fn sample_problem(n: usize, seed: u64) -> (BoundingBox, Mat<f64>, Vec<f64>) {
        let bbox = BoundingBox::new(vec![0.0, 0.0], vec![1.0, 1.0]).unwrap();
        let mut rng = StdRng::seed_from_u64(seed);
        let points = Mat::from_fn(n, 2, |_, _| rng.random_range(0.0..1.0));
        let values = (0..n)
            .map(|i| (2.0 * PI * points[(i, 0)]).sin() * (2.0 * PI * points[(i, 1)]).cos())
            .collect();
        (bbox, points, values)
    }

    #[test]
    fn rms_ignores_unweighted_samples() {
        assert_eq!(rms(&[], None), 0.0);
        assert!((rms(&[3.0, 4.0], None) - 12.5f64.sqrt()).abs() < 1e-15);
        assert_eq!(rms(&[3.0, 100.0], Some(&[1.0, 0.0])), 3.0);
        assert_eq!(rms(&[3.0], Some(&[0.0])), 0.0);
    }

    #[test]
    fn residual_update_matches_direct_evaluation() {
        let (bbox, points, values) = sample_problem(300, 1);
        let params = MbaParams::builder().max_levels(3).build();
        let mut residuals = values.clone();

        let hierarchy = build_hierarchy(
            &bbox,
            LevelSpec::new(vec![2, 2]).unwrap(),
            points.as_ref(),
            &mut residuals,
            None,
            &params,
            None,
        )
        .unwrap();

        for i in 0..points.nrows() {
            let p = [points[(i, 0)], points[(i, 1)]];
            let model: f64 = hierarchy.levels.iter().map(|l| l.apply(&bbox, &p)).sum();
            assert!((values[i] - model - residuals[i]).abs() < 1e-12);
        }
    }

    #[test]
    fn resolution_doubles_each_level() {
        let (bbox, points, mut residuals) = sample_problem(200, 2);
        let params = MbaParams::builder().max_levels(4).tol(1e-14).build();

        let hierarchy = build_hierarchy(
            &bbox,
            LevelSpec::new(vec![3, 2]).unwrap(),
            points.as_ref(),
            &mut residuals,
            None,
            &params,
            None,
        )
        .unwrap();

        let grids: Vec<Vec<usize>> = hierarchy.reports.iter().map(|r| r.grid.clone()).collect();
        assert_eq!(
            grids,
            vec![vec![3, 2], vec![6, 4], vec![12, 8], vec![24, 16]]
        );
        assert_eq!(hierarchy.termination, Termination::MaxLevelsReached);
    }

    #[test]
    fn stop_policy_ends_on_first_sparse_level() {
        let (bbox, points, mut residuals) = sample_problem(20, 3);
        let params = MbaParams::builder()
            .max_levels(8)
            .tol(1e-14)
            .min_fill(0.9)
            .fill_policy(FillPolicy::Stop)
            .build();

        let hierarchy = build_hierarchy(
            &bbox,
            LevelSpec::new(vec![1, 1]).unwrap(),
            points.as_ref(),
            &mut residuals,
            None,
            &params,
            None,
        )
        .unwrap();

        assert_eq!(hierarchy.termination, Termination::Sparse);
        let last = hierarchy.reports.last().unwrap();
        assert!(last.fill_ratio < 0.9);
        assert!(last.sparse);
        assert!(hierarchy.reports[..hierarchy.reports.len() - 1]
            .iter()
            .all(|r| r.fill_ratio >= 0.9));
    }

    #[test]
    fn converges_immediately_on_zero_data() {
        let (bbox, points, _) = sample_problem(50, 4);
        let mut residuals = vec![0.0; 50];

        let hierarchy = build_hierarchy(
            &bbox,
            LevelSpec::new(vec![4, 4]).unwrap(),
            points.as_ref(),
            &mut residuals,
            None,
            &MbaParams::default(),
            None,
        )
        .unwrap();

        assert_eq!(hierarchy.levels.len(), 1);
        assert_eq!(hierarchy.termination, Termination::Converged);
    }

    #[test]
    fn emits_one_message_per_level() {
        let (bbox, points, mut residuals) = sample_problem(100, 5);
        let params = MbaParams::builder().max_levels(3).tol(1e-14).build();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let store = Arc::clone(&seen);
        let (sink, handle) = closure_sink(64, move |msg| {
            if let ProgressMsg::LevelFitted {
                level, progress, ..
            } = msg
            {
                store.lock().unwrap().push((level, progress));
            }
        });

        build_hierarchy(
            &bbox,
            LevelSpec::new(vec![2, 2]).unwrap(),
            points.as_ref(),
            &mut residuals,
            None,
            &params,
            Some(&sink),
        )
        .unwrap();

        drop(sink);
        handle.join().unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.iter().map(|(l, _)| *l).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!(seen.iter().all(|(_, p)| (0.0..=1.0).contains(p)));
    }
}
