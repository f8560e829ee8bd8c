//! Time-resolved sets of responses and their weighted combination.
//!
//! An [`InstrumentResponseSet`] holds responses whose coverage intervals tile
//! a contiguous span of time. For a selection of time intervals it produces
//! a single effective response, weighting every member matrix by the
//! exposure (or the counts) collected while that matrix was valid:
//!
//! ```text
//! w_k    = Σ_segments getter(seg.start - t_ref, seg.stop - t_ref)
//! merged = Σ_k (w_k / Σ_j w_j) * matrix_k
//! ```
//!
//! where the segments are the overlaps between the requested intervals
//! (given relative to the reference time) and the coverage of response `k`.
//! The getters are always called with times relative to the reference time.

use std::fmt;
use std::ops::Index;
use std::path::Path;
use std::sync::Arc;

use log::debug;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::instrument_response::{InstrumentResponse, ResponseError};
use crate::io::fits::{read_rsp2_file, FitsError};
use crate::time_interval::{approx_equal, parse_interval, TimeInterval, TimeIntervalError};

/// Exposure or counts accumulated between two times relative to the reference time.
pub type TimeFunction = Arc<dyn Fn(f64, f64) -> f64 + Send + Sync>;

/// Tolerances applied when building and querying a response set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseSetConfig {
    /// Absolute tolerance in seconds for matching interval bounds
    pub interval_tolerance: f64,

    /// Reject members whose ebounds or Monte Carlo energies differ
    pub check_binning: bool,
}

impl Default for ResponseSetConfig {
    fn default() -> Self {
        Self {
            interval_tolerance: 1e-6,
            check_binning: true,
        }
    }
}

/// Errors that can occur when building or weighting a response set
#[derive(Debug, Error)]
pub enum ResponseSetError {
    #[error("A response set needs at least one response")]
    Empty,

    #[error("Response {index} has no coverage interval")]
    MissingCoverage { index: usize },

    #[error("Coverage intervals are not contiguous: {previous} is followed by {next}")]
    NotContiguous {
        previous: TimeInterval,
        next: TimeInterval,
    },

    #[error("Response covering {coverage} has different ebounds or Monte Carlo energies")]
    MismatchedBinning { coverage: TimeInterval },

    #[error("Reference time must be finite, got {0}")]
    InvalidReferenceTime(f64),

    #[error("No time intervals given")]
    NoIntervals,

    #[error("Invalid time interval: {0}")]
    InvalidInterval(#[from] TimeIntervalError),

    #[error("Interval {interval} is not covered by the responses (coverage {coverage})")]
    IntervalNotCovered {
        interval: TimeInterval,
        coverage: TimeInterval,
    },

    #[error("Total weight must be positive, got {0}")]
    NonPositiveWeight(f64),

    #[error("Response error: {0}")]
    Response(#[from] ResponseError),

    #[error("FITS error: {0}")]
    Fits(#[from] FitsError),
}

/// Responses sorted by time with contiguous coverage.
pub struct InstrumentResponseSet {
    responses: Vec<InstrumentResponse>,

    /// Coverage of each response, same order as `responses`
    coverages: Vec<TimeInterval>,

    /// From the first coverage start to the last coverage stop
    coverage: TimeInterval,

    exposure_getter: TimeFunction,
    counts_getter: TimeFunction,
    reference_time: f64,
    config: ResponseSetConfig,
}

impl InstrumentResponseSet {
    /// Build a set with the default [`ResponseSetConfig`].
    ///
    /// Responses may be given in any order; they are sorted by the start
    /// of their coverage interval (ties broken by the stop).
    pub fn new<E, C>(
        responses: Vec<InstrumentResponse>,
        exposure_getter: E,
        counts_getter: C,
        reference_time: f64,
    ) -> Result<Self, ResponseSetError>
    where
        E: Fn(f64, f64) -> f64 + Send + Sync + 'static,
        C: Fn(f64, f64) -> f64 + Send + Sync + 'static,
    {
        Self::with_config(
            responses,
            exposure_getter,
            counts_getter,
            reference_time,
            ResponseSetConfig::default(),
        )
    }

    /// Build a set with explicit tolerances.
    ///
    /// # Errors
    /// - [`ResponseSetError::Empty`] for an empty list
    /// - [`ResponseSetError::MissingCoverage`] if a response has no coverage
    /// - [`ResponseSetError::NotContiguous`] on a gap or overlap between
    ///   neighbouring coverages
    /// - [`ResponseSetError::MismatchedBinning`] if binning differs and
    ///   `config.check_binning` is set
    pub fn with_config<E, C>(
        responses: Vec<InstrumentResponse>,
        exposure_getter: E,
        counts_getter: C,
        reference_time: f64,
        config: ResponseSetConfig,
    ) -> Result<Self, ResponseSetError>
    where
        E: Fn(f64, f64) -> f64 + Send + Sync + 'static,
        C: Fn(f64, f64) -> f64 + Send + Sync + 'static,
    {
        if responses.is_empty() {
            return Err(ResponseSetError::Empty);
        }
        if !reference_time.is_finite() {
            return Err(ResponseSetError::InvalidReferenceTime(reference_time));
        }

        let mut entries = responses
            .into_iter()
            .enumerate()
            .map(|(index, rsp)| match rsp.coverage_interval().copied() {
                Some(coverage) => Ok((coverage, rsp)),
                None => Err(ResponseSetError::MissingCoverage { index }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        entries.sort_by(|(a, _), (b, _)| {
            a.start()
                .total_cmp(&b.start())
                .then(a.stop().total_cmp(&b.stop()))
        });

        for pair in entries.windows(2) {
            let (previous, _) = &pair[0];
            let (next, _) = &pair[1];
            if !previous.is_contiguous_with(next, config.interval_tolerance) {
                return Err(ResponseSetError::NotContiguous {
                    previous: *previous,
                    next: *next,
                });
            }
        }

        if config.check_binning {
            let (_, first) = &entries[0];
            for (coverage, rsp) in entries.iter().skip(1) {
                if rsp.ebounds() != first.ebounds()
                    || rsp.monte_carlo_energies() != first.monte_carlo_energies()
                {
                    return Err(ResponseSetError::MismatchedBinning {
                        coverage: *coverage,
                    });
                }
            }
        }

        let (coverages, responses): (Vec<TimeInterval>, Vec<_>) = entries.into_iter().unzip();
        let coverage =
            TimeInterval::new(coverages[0].start(), coverages[coverages.len() - 1].stop())?;

        Ok(Self {
            responses,
            coverages,
            coverage,
            exposure_getter: Arc::new(exposure_getter),
            counts_getter: Arc::new(counts_getter),
            reference_time,
            config,
        })
    }

    /// Load every entry of an rsp2 container as a member of the set.
    ///
    /// Entries with `TSTART == TSTOP` are kept; the reader logs one warning
    /// for each of them.
    pub fn from_rsp2_file<P, E, C>(
        path: P,
        exposure_getter: E,
        counts_getter: C,
        reference_time: f64,
    ) -> Result<Self, ResponseSetError>
    where
        P: AsRef<Path>,
        E: Fn(f64, f64) -> f64 + Send + Sync + 'static,
        C: Fn(f64, f64) -> f64 + Send + Sync + 'static,
    {
        let contents = read_rsp2_file(path)?;
        Self::new(contents.entries, exposure_getter, counts_getter, reference_time)
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&InstrumentResponse> {
        self.responses.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &InstrumentResponse> {
        self.responses.iter()
    }

    pub fn reference_time(&self) -> f64 {
        self.reference_time
    }

    pub fn config(&self) -> &ResponseSetConfig {
        &self.config
    }

    /// Span from the first coverage start to the last coverage stop.
    pub fn coverage(&self) -> TimeInterval {
        self.coverage
    }

    /// Merge the matrices weighted by the exposure in each interval.
    ///
    /// Intervals are expressions like `"5.0 - 25.0"`, relative to the
    /// reference time.
    pub fn weight_by_exposure<S: AsRef<str>>(
        &self,
        intervals: &[S],
    ) -> Result<InstrumentResponse, ResponseSetError> {
        self.weighted_response(intervals, &self.exposure_getter)
    }

    /// Merge the matrices weighted by the counts in each interval.
    pub fn weight_by_counts<S: AsRef<str>>(
        &self,
        intervals: &[S],
    ) -> Result<InstrumentResponse, ResponseSetError> {
        self.weighted_response(intervals, &self.counts_getter)
    }

    fn weighted_response<S: AsRef<str>>(
        &self,
        intervals: &[S],
        getter: &TimeFunction,
    ) -> Result<InstrumentResponse, ResponseSetError> {
        let weights = self.weights(intervals, getter)?;

        let total: f64 = weights.iter().sum();
        if !(total > 0.0) {
            return Err(ResponseSetError::NonPositiveWeight(total));
        }

        let first = &self.responses[0];
        let mut merged = Array2::<f64>::zeros(first.matrix().dim());
        for (weight, rsp) in weights.iter().zip(&self.responses) {
            merged.scaled_add(weight / total, rsp.matrix());
        }

        let response = InstrumentResponse::new(
            merged,
            first.ebounds().clone(),
            first.monte_carlo_energies().clone(),
            None,
        )?;
        Ok(response)
    }

    /// Weight of every member, accumulated over all requested intervals.
    fn weights<S: AsRef<str>>(
        &self,
        intervals: &[S],
        getter: &TimeFunction,
    ) -> Result<Vec<f64>, ResponseSetError> {
        if intervals.is_empty() {
            return Err(ResponseSetError::NoIntervals);
        }

        let reference_time = self.reference_time;
        let mut weights = vec![0.0; self.responses.len()];

        for expression in intervals {
            let (start, stop) = parse_interval(expression.as_ref())?;
            let requested = TimeInterval::new(start, stop)?.shift(reference_time);
            let requested = self.snap_to_coverage(requested)?;

            for (weight, coverage) in weights.iter_mut().zip(&self.coverages) {
                if !coverage.overlaps_with(&requested) {
                    continue;
                }
                if let Some(segment) = coverage.intersect(&requested) {
                    *weight += getter(
                        segment.start() - reference_time,
                        segment.stop() - reference_time,
                    );
                }
            }
        }

        for (coverage, weight) in self.coverages.iter().zip(&weights) {
            debug!("Weight for response covering {coverage}: {weight}");
        }

        Ok(weights)
    }

    /// Clamp bounds lying within tolerance of the coverage edges onto them.
    fn snap_to_coverage(&self, requested: TimeInterval) -> Result<TimeInterval, ResponseSetError> {
        let coverage = self.coverage;
        let tolerance = self.config.interval_tolerance;
        let not_covered = || ResponseSetError::IntervalNotCovered {
            interval: requested,
            coverage,
        };

        let mut start = requested.start();
        let mut stop = requested.stop();

        if start < coverage.start() {
            if !approx_equal(start, coverage.start(), tolerance) {
                return Err(not_covered());
            }
            start = coverage.start();
        }
        if stop > coverage.stop() {
            if !approx_equal(stop, coverage.stop(), tolerance) {
                return Err(not_covered());
            }
            stop = coverage.stop();
        }

        Ok(TimeInterval::new(start, stop)?)
    }
}

impl Index<usize> for InstrumentResponseSet {
    type Output = InstrumentResponse;

    fn index(&self, index: usize) -> &Self::Output {
        &self.responses[index]
    }
}

impl<'a> IntoIterator for &'a InstrumentResponseSet {
    type Item = &'a InstrumentResponse;
    type IntoIter = std::slice::Iter<'a, InstrumentResponse>;

    fn into_iter(self) -> Self::IntoIter {
        self.responses.iter()
    }
}

impl fmt::Debug for InstrumentResponseSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstrumentResponseSet")
            .field("coverages", &self.coverages)
            .field("reference_time", &self.reference_time)
            .field("config", &self.config)
            .finish()
    }
}
