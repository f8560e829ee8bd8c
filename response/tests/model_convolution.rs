//! Convolution of spectral models through responses read from disk

use std::sync::Arc;

use approx::assert_relative_eq;
use ndarray::Array2;
use response::models::{integrate_photon_flux, QuadOptions};
use response::{
    CompositeModel, InstrumentResponse, Operand, Operator, Powerlaw, SpectralModel,
};
use test_helpers::{fresh_output_path, init_test_logging};

/// Log-spaced edges between `lo` and `hi`
fn log_edges(lo: f64, hi: f64, n_bins: usize) -> Vec<f64> {
    let step = (hi / lo).ln() / n_bins as f64;
    (0..=n_bins).map(|i| lo * (step * i as f64).exp()).collect()
}

/// Gaussian redistribution around the true energy with 10% resolution
fn smeared_response() -> InstrumentResponse {
    let mc_energies = log_edges(10.0, 1000.0, 60);
    let ebounds = log_edges(8.0, 1200.0, 40);

    let matrix = Array2::from_shape_fn((40, 60), |(i, j)| {
        let true_energy = (mc_energies[j] * mc_energies[j + 1]).sqrt();
        let channel_energy = (ebounds[i] * ebounds[i + 1]).sqrt();
        let sigma = 0.1 * true_energy;
        let z = (channel_energy - true_energy) / sigma;
        0.8 * (-0.5 * z * z).exp() * (ebounds[i + 1] - ebounds[i]) / (sigma * 2.5066282746310002)
    });

    InstrumentResponse::new(matrix, ebounds, mc_energies, None).unwrap()
}

#[test]
fn test_powerlaw_counts_survive_fits_roundtrip() {
    init_test_logging();
    let rsp = smeared_response().with_arf_filename("effective_area.arf");
    let path = fresh_output_path("models/smeared.rsp").unwrap();
    rsp.to_fits(&path, "TEST", "TEST", false).unwrap();

    let mut reloaded = InstrumentResponse::from_fits(&path).unwrap();
    assert_eq!(reloaded.arf_filename(), Some("effective_area.arf"));

    let model = Arc::new(Powerlaw::new(12.2, -1.7, 100.0).unwrap());
    let mut original = rsp;
    original.set_model(model.clone());
    reloaded.set_model(model);

    let a = original.convolve().unwrap();
    let b = reloaded.convolve().unwrap();
    assert_eq!(a.len(), 40);
    for (x, y) in a.iter().zip(b.iter()) {
        assert_relative_eq!(*x, *y, epsilon = 1e-12, max_relative = 1e-7);
    }
    assert!(a.iter().all(|c| c.is_finite() && *c >= 0.0));
}

#[test]
fn test_numerical_and_analytic_convolution_agree() {
    init_test_logging();
    let model = Arc::new(Powerlaw::new(3.0, -2.3, 50.0).unwrap());

    let mut analytic = smeared_response();
    analytic.set_model(model.clone());

    let mut numerical = smeared_response();
    numerical.set_model_numerical(model, QuadOptions::default());

    let a = analytic.convolve().unwrap();
    let n = numerical.convolve().unwrap();
    for (x, y) in a.iter().zip(n.iter()) {
        assert_relative_eq!(*x, *y, epsilon = 1e-12, max_relative = 1e-7);
    }
}

#[test]
fn test_composite_model_convolution_is_linear() {
    init_test_logging();
    let pl = || Operand::model(Powerlaw::new(3.0, -2.0, 100.0).unwrap());

    let sum = CompositeModel::new(pl(), Operator::Add, pl()).unwrap();
    assert_eq!(sum.parameters().len(), 6);

    let mut single = smeared_response();
    single.set_model(Arc::new(Powerlaw::new(3.0, -2.0, 100.0).unwrap()));

    let mut double = smeared_response();
    double.set_model(Arc::new(sum));

    let one = single.convolve().unwrap();
    let two = double.convolve().unwrap();
    for (x, y) in one.iter().zip(two.iter()) {
        assert_relative_eq!(2.0 * x, *y, epsilon = 1e-12, max_relative = 1e-12);
    }
}

#[test]
fn test_parameter_set_before_attaching_reaches_convolution() {
    init_test_logging();
    let mut model = Powerlaw::new(1.0, -2.0, 100.0).unwrap();
    model.set_parameter("K", 4.0).unwrap();

    let expected: Vec<f64> = {
        let rsp = smeared_response();
        let mc = rsp.monte_carlo_energies().to_vec();
        let fluence: Vec<f64> = mc
            .windows(2)
            .map(|w| integrate_photon_flux(&model, w[0], w[1], &QuadOptions::default()))
            .collect();
        rsp.matrix()
            .rows()
            .into_iter()
            .map(|row| row.iter().zip(&fluence).map(|(m, f)| m * f).sum())
            .collect()
    };

    let mut rsp = smeared_response();
    rsp.set_model(Arc::new(model));
    let counts = rsp.convolve().unwrap();
    for (x, y) in counts.iter().zip(&expected) {
        assert_relative_eq!(*x, *y, epsilon = 1e-12, max_relative = 1e-7);
    }
}
