//! Energy redistribution matrix and its convolution with a photon spectrum.
//!
//! An [`InstrumentResponse`] maps photon fluence in true-energy bins
//! (the Monte Carlo energies) onto expected counts in measured-energy
//! channels (the ebounds). The matrix has one row per channel and one
//! column per true-energy bin.
//!
//! # Convolution
//!
//! With a stored integral function `F(e1, e2)` the expected counts are
//!
//! ```text
//! fluence[j] = F(mc[j], mc[j + 1])
//! counts[i]  = Σ_j matrix[i, j] * fluence[j]
//! ```
//!
//! The sum runs over `j` in ascending order for every channel.
//!
//! # Example
//! ```rust
//! use ndarray::array;
//! use response::InstrumentResponse;
//!
//! let matrix = array![[1.0, 0.0, 0.0, 0.0], [0.0, 2.0, 0.0, 0.0], [0.0, 0.0, 3.0, 0.0]];
//! let mut rsp = InstrumentResponse::new(
//!     matrix,
//!     vec![1.0, 2.5, 4.5, 5.0],
//!     vec![1.0, 2.0, 3.0, 4.0, 5.0],
//!     None,
//! )
//! .unwrap();
//!
//! rsp.set_function(|e1, e2| e2 - e1);
//! assert_eq!(rsp.convolve().unwrap().to_vec(), vec![1.0, 2.0, 3.0]);
//! assert_eq!(rsp.energy_to_channel(2.6), 1);
//! ```

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use ndarray::{Array1, Array2};
use thiserror::Error;

use crate::io::fits::{self, FitsError};
use crate::models::{integrate_photon_flux, QuadOptions, SpectralModel};
use crate::time_interval::TimeInterval;

/// Integral of the photon flux over a true-energy bin `(e1, e2)`.
pub type IntegralFunction = Arc<dyn Fn(f64, f64) -> f64 + Send + Sync>;

/// Errors that can occur when building or using a response
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ResponseError {
    #[error("Response matrix contains NaN at [{row}, {column}]")]
    NanInMatrix { row: usize, column: usize },

    #[error("Matrix shape {found:?} does not match expected {expected:?} (channels, energy bins)")]
    ShapeMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("{axis} needs at least 2 edges, got {count}")]
    TooFewEdges { axis: &'static str, count: usize },

    #[error("{axis} edges must be finite and strictly increasing (violated at index {index})")]
    NotIncreasing { axis: &'static str, index: usize },

    #[error("No integral function set; call set_function or set_model before convolve")]
    NoIntegralFunction,
}

/// A response matrix with its energy axes and optional time coverage.
#[derive(Clone)]
pub struct InstrumentResponse {
    /// Shape (n_channels, n_energy_bins)
    matrix: Array2<f64>,

    /// Measured-energy channel edges, n_channels + 1 values
    ebounds: Array1<f64>,

    /// True-energy bin edges, n_energy_bins + 1 values
    monte_carlo_energies: Array1<f64>,

    coverage_interval: Option<TimeInterval>,
    rsp_filename: Option<String>,
    arf_filename: Option<String>,
    first_channel: u32,

    integral_function: Option<IntegralFunction>,
}

impl InstrumentResponse {
    /// Create a response from a matrix and its two edge arrays.
    ///
    /// # Errors
    /// - [`ResponseError::TooFewEdges`] / [`ResponseError::NotIncreasing`]
    ///   for malformed edge arrays
    /// - [`ResponseError::ShapeMismatch`] if the matrix does not have
    ///   `(ebounds.len() - 1, monte_carlo_energies.len() - 1)` shape
    /// - [`ResponseError::NanInMatrix`] if any matrix element is NaN
    pub fn new(
        matrix: Array2<f64>,
        ebounds: impl Into<Array1<f64>>,
        monte_carlo_energies: impl Into<Array1<f64>>,
        coverage_interval: Option<TimeInterval>,
    ) -> Result<Self, ResponseError> {
        let ebounds = ebounds.into();
        let monte_carlo_energies = monte_carlo_energies.into();

        validate_edges(&ebounds, "ebounds")?;
        validate_edges(&monte_carlo_energies, "monte_carlo_energies")?;

        let expected = (ebounds.len() - 1, monte_carlo_energies.len() - 1);
        if matrix.dim() != expected {
            return Err(ResponseError::ShapeMismatch {
                expected,
                found: matrix.dim(),
            });
        }

        if let Some(((row, column), _)) = matrix.indexed_iter().find(|(_, v)| v.is_nan()) {
            return Err(ResponseError::NanInMatrix { row, column });
        }

        Ok(Self {
            matrix,
            ebounds,
            monte_carlo_energies,
            coverage_interval,
            rsp_filename: None,
            arf_filename: None,
            first_channel: 1,
            integral_function: None,
        })
    }

    pub fn with_rsp_filename(mut self, rsp_filename: impl Into<String>) -> Self {
        self.rsp_filename = Some(rsp_filename.into());
        self
    }

    pub fn with_arf_filename(mut self, arf_filename: impl Into<String>) -> Self {
        self.arf_filename = Some(arf_filename.into());
        self
    }

    pub(crate) fn with_first_channel(mut self, first_channel: u32) -> Self {
        self.first_channel = first_channel;
        self
    }

    pub fn matrix(&self) -> &Array2<f64> {
        &self.matrix
    }

    pub fn ebounds(&self) -> &Array1<f64> {
        &self.ebounds
    }

    pub fn monte_carlo_energies(&self) -> &Array1<f64> {
        &self.monte_carlo_energies
    }

    pub fn coverage_interval(&self) -> Option<&TimeInterval> {
        self.coverage_interval.as_ref()
    }

    pub fn rsp_filename(&self) -> Option<&str> {
        self.rsp_filename.as_deref()
    }

    pub fn arf_filename(&self) -> Option<&str> {
        self.arf_filename.as_deref()
    }

    /// Number of the first channel as stored in files (OGIP channels start at 1)
    pub fn first_channel(&self) -> u32 {
        self.first_channel
    }

    pub fn n_channels(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn n_energy_bins(&self) -> usize {
        self.matrix.ncols()
    }

    /// Replace the matrix, keeping edges and provenance.
    ///
    /// Only the shape is checked; values are taken as given.
    pub fn replace_matrix(&mut self, new_matrix: Array2<f64>) -> Result<(), ResponseError> {
        if new_matrix.dim() != self.matrix.dim() {
            return Err(ResponseError::ShapeMismatch {
                expected: self.matrix.dim(),
                found: new_matrix.dim(),
            });
        }
        self.matrix = new_matrix;
        Ok(())
    }

    /// Channel whose energy range contains `energy`.
    ///
    /// Energies below the first edge map to channel 0 and energies at or
    /// above the last edge map to the last channel.
    pub fn energy_to_channel(&self, energy: f64) -> usize {
        let edges_at_or_below = self.ebounds.iter().take_while(|&&e| e <= energy).count();
        edges_at_or_below
            .saturating_sub(1)
            .min(self.n_channels() - 1)
    }

    /// Store the function integrating the photon flux over a true-energy bin.
    pub fn set_function<F>(&mut self, integral_function: F)
    where
        F: Fn(f64, f64) -> f64 + Send + Sync + 'static,
    {
        self.integral_function = Some(Arc::new(integral_function));
    }

    /// Convolve with a model through its own integral.
    ///
    /// Models with a closed-form integral use it; others fall back to
    /// quadrature with the photon-flux tolerances.
    pub fn set_model<M>(&mut self, model: Arc<M>)
    where
        M: SpectralModel + ?Sized + 'static,
    {
        self.set_function(move |e1, e2| model.integral(e1, e2));
    }

    /// Convolve with a model through quadrature of its point evaluation.
    pub fn set_model_numerical<M>(&mut self, model: Arc<M>, options: QuadOptions)
    where
        M: SpectralModel + ?Sized + 'static,
    {
        self.set_function(move |e1, e2| integrate_photon_flux(model.as_ref(), e1, e2, &options));
    }

    /// Predicted counts per channel for the stored integral function.
    pub fn convolve(&self) -> Result<Array1<f64>, ResponseError> {
        let integral = self
            .integral_function
            .as_ref()
            .ok_or(ResponseError::NoIntegralFunction)?;

        let mc = &self.monte_carlo_energies;
        let fluence: Array1<f64> = (0..self.n_energy_bins())
            .map(|j| integral(mc[j], mc[j + 1]))
            .collect();

        let counts: Array1<f64> = self
            .matrix
            .rows()
            .into_iter()
            .map(|row| row.iter().zip(fluence.iter()).map(|(m, f)| m * f).sum())
            .collect();

        Ok(counts)
    }

    /// Write the response to an OGIP-style FITS file.
    ///
    /// Refuses to replace an existing file unless `overwrite` is set.
    pub fn to_fits<P: AsRef<Path>>(
        &self,
        path: P,
        telescope_name: &str,
        instrument_name: &str,
        overwrite: bool,
    ) -> Result<(), FitsError> {
        fits::write_response(self, path, telescope_name, instrument_name, overwrite)
    }

    /// Load a response written by [`InstrumentResponse::to_fits`].
    pub fn from_fits<P: AsRef<Path>>(path: P) -> Result<Self, FitsError> {
        fits::read_response(path)
    }
}

/// Edges must have at least two finite, strictly increasing values.
fn validate_edges(edges: &Array1<f64>, axis: &'static str) -> Result<(), ResponseError> {
    if edges.len() < 2 {
        return Err(ResponseError::TooFewEdges {
            axis,
            count: edges.len(),
        });
    }

    if let Some(index) = edges.iter().position(|e| !e.is_finite()) {
        return Err(ResponseError::NotIncreasing { axis, index });
    }

    for i in 1..edges.len() {
        if edges[i] <= edges[i - 1] {
            return Err(ResponseError::NotIncreasing { axis, index: i });
        }
    }

    Ok(())
}

impl PartialEq for InstrumentResponse {
    /// The stored integral function does not take part in the comparison.
    fn eq(&self, other: &Self) -> bool {
        self.matrix == other.matrix
            && self.ebounds == other.ebounds
            && self.monte_carlo_energies == other.monte_carlo_energies
            && self.coverage_interval == other.coverage_interval
            && self.rsp_filename == other.rsp_filename
            && self.arf_filename == other.arf_filename
    }
}

impl fmt::Debug for InstrumentResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstrumentResponse")
            .field("n_channels", &self.n_channels())
            .field("n_energy_bins", &self.n_energy_bins())
            .field("coverage_interval", &self.coverage_interval)
            .field("rsp_filename", &self.rsp_filename)
            .field("arf_filename", &self.arf_filename)
            .field("has_function", &self.integral_function.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Powerlaw;
    use approx::assert_relative_eq;
    use ndarray::{array, s};

    /// diag(1, 2, 3, 4) with the last row removed
    fn matrix_elements() -> (Array2<f64>, Vec<f64>, Vec<f64>) {
        let matrix = Array2::from_diag(&array![1.0, 2.0, 3.0, 4.0])
            .slice(s![..3, ..])
            .to_owned();
        let mc_energies = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let ebounds = vec![1.0, 2.5, 4.5, 5.0];
        (matrix, mc_energies, ebounds)
    }

    fn response() -> InstrumentResponse {
        let (matrix, mc_energies, ebounds) = matrix_elements();
        InstrumentResponse::new(matrix, ebounds, mc_energies, None).unwrap()
    }

    #[test]
    fn test_constructor() {
        let (matrix, mc_energies, ebounds) = matrix_elements();
        let rsp = InstrumentResponse::new(matrix.clone(), ebounds.clone(), mc_energies.clone(), None)
            .unwrap();

        assert_eq!(rsp.matrix(), &matrix);
        assert_eq!(rsp.ebounds().to_vec(), ebounds);
        assert_eq!(rsp.monte_carlo_energies().to_vec(), mc_energies);
        assert_eq!(rsp.n_channels(), 3);
        assert_eq!(rsp.n_energy_bins(), 4);
        assert!(rsp.coverage_interval().is_none());
        assert_eq!(rsp.first_channel(), 1);
    }

    #[test]
    fn test_constructor_with_coverage() {
        let (matrix, mc_energies, ebounds) = matrix_elements();
        let coverage = TimeInterval::new(10.0, 20.0).unwrap();
        let rsp = InstrumentResponse::new(matrix, ebounds, mc_energies, Some(coverage)).unwrap();

        assert!(rsp.rsp_filename().is_none());
        assert!(rsp.arf_filename().is_none());
        assert_eq!(rsp.coverage_interval(), Some(&coverage));
    }

    #[test]
    fn test_provenance_builders() {
        let rsp = response()
            .with_rsp_filename("det.rmf")
            .with_arf_filename("det.arf");
        assert_eq!(rsp.rsp_filename(), Some("det.rmf"));
        assert_eq!(rsp.arf_filename(), Some("det.arf"));
    }

    #[test]
    fn test_rejects_nan() {
        let (mut matrix, mc_energies, ebounds) = matrix_elements();
        matrix[[2, 2]] = f64::NAN;

        let result = InstrumentResponse::new(matrix, ebounds, mc_energies, None);
        assert_eq!(
            result.unwrap_err(),
            ResponseError::NanInMatrix { row: 2, column: 2 }
        );
    }

    #[test]
    fn test_rejects_shape_mismatch() {
        let (matrix, mc_energies, _) = matrix_elements();
        let result = InstrumentResponse::new(matrix, vec![1.0, 2.0, 3.0], mc_energies, None);
        assert!(matches!(result, Err(ResponseError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_rejects_bad_edges() {
        let (matrix, mc_energies, _) = matrix_elements();
        let result =
            InstrumentResponse::new(matrix.clone(), vec![1.0, 2.5, 2.5, 5.0], mc_energies.clone(), None);
        assert_eq!(
            result.unwrap_err(),
            ResponseError::NotIncreasing {
                axis: "ebounds",
                index: 2
            }
        );

        let result = InstrumentResponse::new(
            matrix.clone(),
            vec![1.0, 2.5, 4.5, 5.0],
            vec![1.0, 2.0, f64::NAN, 4.0, 5.0],
            None,
        );
        assert!(matches!(result, Err(ResponseError::NotIncreasing { .. })));

        let empty = Array2::<f64>::zeros((0, 4));
        let result = InstrumentResponse::new(empty, vec![1.0], mc_energies, None);
        assert!(matches!(result, Err(ResponseError::TooFewEdges { .. })));
    }

    #[test]
    fn test_replace_matrix() {
        let mut rsp = response().with_arf_filename("a.arf");
        let new_matrix = rsp.matrix() / 2.0;

        rsp.replace_matrix(new_matrix.clone()).unwrap();
        assert_eq!(rsp.matrix(), &new_matrix);
        assert_eq!(rsp.arf_filename(), Some("a.arf"));

        // Any values are accepted as long as the shape matches
        let negative = Array2::from_elem((3, 4), -1.0);
        assert!(rsp.replace_matrix(negative).is_ok());

        let wrong = Array2::from_elem((10, 10), 0.5);
        assert!(matches!(
            rsp.replace_matrix(wrong),
            Err(ResponseError::ShapeMismatch { .. })
        ));
        assert_eq!(rsp.matrix(), &Array2::from_elem((3, 4), -1.0));
    }

    #[test]
    fn test_set_function_and_convolve() {
        let mut rsp = response();
        rsp.set_function(|e1, e2| e2 - e1);

        let counts = rsp.convolve().unwrap();
        assert_eq!(counts.to_vec(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_convolve_without_function() {
        let rsp = response();
        assert_eq!(rsp.convolve(), Err(ResponseError::NoIntegralFunction));
    }

    #[test]
    fn test_convolve_dense_matrix() {
        let matrix = array![[0.5, 0.25, 0.0], [0.5, 0.75, 1.0]];
        let mut rsp =
            InstrumentResponse::new(matrix, vec![0.0, 1.0, 2.0], vec![1.0, 2.0, 4.0, 8.0], None)
                .unwrap();
        rsp.set_function(|e1, e2| e2 * e2 - e1 * e1);

        // fluence = [3, 12, 48]
        let counts = rsp.convolve().unwrap();
        assert_relative_eq!(counts[0], 0.5 * 3.0 + 0.25 * 12.0);
        assert_relative_eq!(counts[1], 0.5 * 3.0 + 0.75 * 12.0 + 48.0);
    }

    #[test]
    fn test_set_model_analytic_and_numerical_agree() {
        let model = Arc::new(Powerlaw::new(12.2, -1.7, 1.0).unwrap());

        let mut analytic = response();
        analytic.set_model(model.clone());

        let mut numerical = response();
        numerical.set_model_numerical(model, QuadOptions::default());

        let a = analytic.convolve().unwrap();
        let n = numerical.convolve().unwrap();
        for (x, y) in a.iter().zip(n.iter()) {
            assert_relative_eq!(*x, *y, max_relative = 1e-8);
        }
    }

    #[test]
    fn test_set_model_accepts_trait_objects() {
        let model: Arc<dyn SpectralModel> = Arc::new(Powerlaw::new(1.0, 0.0, 1.0).unwrap());
        let mut rsp = response();
        rsp.set_model(model);
        assert_eq!(rsp.convolve().unwrap().to_vec(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_energy_to_channel() {
        let rsp = response();

        assert_eq!(rsp.energy_to_channel(1.5), 0);
        assert_eq!(rsp.energy_to_channel(2.6), 1);
        assert_eq!(rsp.energy_to_channel(4.75), 2);

        // Saturates at both ends
        assert_eq!(rsp.energy_to_channel(100.0), 2);
        assert_eq!(rsp.energy_to_channel(5.0), 2);
        assert_eq!(rsp.energy_to_channel(0.1), 0);
        assert_eq!(rsp.energy_to_channel(-3.0), 0);

        // Lower edges belong to their channel
        assert_eq!(rsp.energy_to_channel(2.5), 1);
        assert_eq!(rsp.energy_to_channel(4.5), 2);
    }

    #[test]
    fn test_energy_to_channel_monotone() {
        let rsp = response();
        let mut previous = 0;
        for step in 0..700 {
            let energy = step as f64 * 0.01;
            let channel = rsp.energy_to_channel(energy);
            assert!(channel >= previous);
            assert!(channel < rsp.n_channels());
            previous = channel;
        }
        assert_eq!(previous, rsp.n_channels() - 1);
    }

    #[test]
    fn test_equality_ignores_function() {
        let a = response();
        let mut b = response();
        b.set_function(|_, _| 1.0);
        assert_eq!(a, b);

        let c = response().with_rsp_filename("x.rsp");
        assert_ne!(a, c);
    }

    #[test]
    fn test_response_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<InstrumentResponse>();
    }
}
