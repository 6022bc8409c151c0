/////////////////////////////////////////////////////////////////////////////////////////////
//
// Defines progress reporting messages, sinks, and helper functions for multilevel fitting.
//
// Created on: 19 Oct 2026     Author: Daniel Owen
//
// Copyright (c) 2026, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! Progress reporting primitives for multilevel construction.

use std::fmt::Debug;
use std::sync::{mpsc, Arc};
use std::thread;

/// Progress events emitted while a model is built.
#[derive(Debug, Clone)]
pub enum ProgressMsg {
    /// Event indicating that samples with non-positive weight were ignored.
    SamplesIgnored { num_ignored: usize },

    /// Event emitted after each lattice level has been fitted and the
    /// residuals updated.
    LevelFitted {
        level: usize,
        grid: Vec<usize>,
        fill_ratio: f64,
        rms: f64,
        progress: f64,
    },

    /// Arbitrary informational message.
    Message { message: String },
}

/// Sink that consumes progress messages.
pub trait ProgressSink: Send + Sync + Debug {
    fn emit(&self, msg: ProgressMsg);
}

/// Progress sink that forwards messages over a channel.
#[derive(Debug)]
pub struct ClosureSink {
    tx: mpsc::SyncSender<ProgressMsg>,
}

impl ProgressSink for ClosureSink {
    #[inline]
    fn emit(&self, msg: ProgressMsg) {
        let _ = self.tx.try_send(msg);
    }
}

/// Spawns a listener thread that runs a handler closure for each progress message.
///
/// The listener exits once every clone of the returned sink has been dropped.
pub fn closure_sink<F>(
    buffer: usize,
    mut handler: F,
) -> (Arc<dyn ProgressSink>, thread::JoinHandle<()>)
where
    F: FnMut(ProgressMsg) + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel::<ProgressMsg>(buffer.max(1));
    let sink: Arc<dyn ProgressSink> = Arc::new(ClosureSink { tx });

    let handle = thread::spawn(move || {
        while let Ok(msg) = rx.recv() {
            handler(msg);
        }
    });

    (sink, handle)
}

/// Estimates construction progress in `[0, 1]` from the current RMS residual,
/// the RMS before the first level and the requested tolerance, on a log scale.
///
/// Level-count progress is used as a floor so the estimate still advances
/// when the residual stalls.
#[inline]
pub(crate) fn progress_from_rel(
    current_rms: f64,
    start_rms: f64,
    target_rms: f64,
    level: usize,
    max_levels: usize,
) -> f64 {
    let by_level = level as f64 / max_levels.max(1) as f64;

    if current_rms <= target_rms {
        return 1.0;
    }

    if !(start_rms > target_rms) || !(current_rms > 0.0) {
        return by_level.min(1.0);
    }

    let by_residual =
        (start_rms.log10() - current_rms.log10()) / (start_rms.log10() - target_rms.log10());

    by_residual.max(by_level).clamp(0.0, 1.0)
}
