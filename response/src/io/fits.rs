//! OGIP-style FITS storage for response matrices
//!
//! A single response file holds:
//! - an empty primary HDU
//! - image `MATRIX`, the transposed matrix (one row per true-energy bin),
//!   with `TELESCOP`, `INSTRUME`, `DETCHANS`, `RESPFILE`, `ANCRFILE` and,
//!   when the response has a coverage interval, `TSTART`/`TSTOP`
//! - table `EBOUNDS` with columns `CHANNEL`, `E_MIN`, `E_MAX`
//! - table `ENERGIES` with columns `ENERG_LO`, `ENERG_HI`
//!
//! An rsp2 container stores several responses sharing one `EBOUNDS`
//! table. The primary HDU carries `NUMRSP` and entry `k` (1-based) is
//! stored as image `MATRIX{k}` plus table `ENERGIES{k}`.

use std::path::{Path, PathBuf};

use fitsio::hdu::FitsHdu;
use fitsio::images::{ImageDescription, ImageType};
use fitsio::tables::{ColumnDataType, ColumnDescription};
use fitsio::FitsFile;
use log::{debug, warn};
use ndarray::Array2;
use thiserror::Error;

use crate::instrument_response::{InstrumentResponse, ResponseError};
use crate::time_interval::{TimeInterval, TimeIntervalError};

/// Placeholder written for absent file names
const NO_FILE: &str = "NONE";

/// Errors that can occur during FITS file operations
#[derive(Error, Debug)]
pub enum FitsError {
    #[error("FITS I/O error: {0}")]
    FitsIo(#[from] fitsio::errors::Error),
    #[error("File already exists: {0}")]
    FileExists(PathBuf),
    #[error("HDU not found: {0}")]
    HduNotFound(String),
    #[error("Invalid data in HDU: {0}")]
    InvalidData(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(#[from] ResponseError),
    #[error("Invalid coverage interval: {0}")]
    InvalidInterval(#[from] TimeIntervalError),
}

/// Responses read from an rsp2 container.
#[derive(Debug)]
pub struct Rsp2Contents {
    /// One response per stored matrix, in file order
    pub entries: Vec<InstrumentResponse>,

    /// Positions in `entries` whose coverage has zero duration
    pub degenerate: Vec<usize>,
}

/// Write a single response file.
///
/// # Arguments
/// * `response` - Response to store
/// * `path` - Output path
/// * `telescope_name` - Value of `TELESCOP`
/// * `instrument_name` - Value of `INSTRUME`
/// * `overwrite` - Replace an existing file instead of failing
pub fn write_response<P: AsRef<Path>>(
    response: &InstrumentResponse,
    path: P,
    telescope_name: &str,
    instrument_name: &str,
    overwrite: bool,
) -> Result<(), FitsError> {
    let mut fptr = create_file(path.as_ref(), overwrite)?;

    let hdu = write_matrix(&mut fptr, "MATRIX", response, telescope_name, instrument_name)?;
    if let Some(coverage) = response.coverage_interval() {
        write_coverage(&mut fptr, &hdu, coverage)?;
    }

    write_ebounds(&mut fptr, response)?;
    write_energies(&mut fptr, "ENERGIES", response)?;

    debug!(
        "Wrote {}x{} response to {}",
        response.n_channels(),
        response.n_energy_bins(),
        path.as_ref().display()
    );
    Ok(())
}

/// Read a file written by [`write_response`].
pub fn read_response<P: AsRef<Path>>(path: P) -> Result<InstrumentResponse, FitsError> {
    let mut fptr = FitsFile::open(path.as_ref())?;

    let (ebounds, first_channel) = read_ebounds(&mut fptr)?;
    let mc_energies = read_edges(&mut fptr, "ENERGIES")?;

    let hdu = find_hdu(&mut fptr, "MATRIX")?;
    let matrix = read_matrix(&mut fptr, &hdu, "MATRIX", ebounds.len() - 1, mc_energies.len() - 1)?;

    let coverage = match (
        hdu.read_key::<f64>(&mut fptr, "TSTART").ok(),
        hdu.read_key::<f64>(&mut fptr, "TSTOP").ok(),
    ) {
        (Some(start), Some(stop)) => Some(TimeInterval::new(start, stop)?),
        _ => None,
    };

    let mut response = InstrumentResponse::new(matrix, ebounds, mc_energies, coverage)?
        .with_first_channel(first_channel);

    if let Some(rsp_filename) = read_file_name(&mut fptr, &hdu, "RESPFILE") {
        response = response.with_rsp_filename(rsp_filename);
    }
    if let Some(arf_filename) = read_file_name(&mut fptr, &hdu, "ANCRFILE") {
        response = response.with_arf_filename(arf_filename);
    }

    Ok(response)
}

/// Write several time-resolved responses into one rsp2 container.
///
/// All responses need a coverage interval and the same ebounds.
pub fn write_rsp2_file<P: AsRef<Path>>(
    responses: &[InstrumentResponse],
    path: P,
    telescope_name: &str,
    instrument_name: &str,
    overwrite: bool,
) -> Result<(), FitsError> {
    let first = responses
        .first()
        .ok_or_else(|| FitsError::InvalidData("rsp2 container needs at least one response".into()))?;

    for (index, response) in responses.iter().enumerate() {
        if response.coverage_interval().is_none() {
            return Err(FitsError::InvalidData(format!(
                "response {index} has no coverage interval"
            )));
        }
        if response.ebounds() != first.ebounds() {
            return Err(FitsError::InvalidData(format!(
                "response {index} does not share the ebounds of the first response"
            )));
        }
    }

    let mut fptr = create_file(path.as_ref(), overwrite)?;
    let primary = fptr.primary_hdu()?;
    primary.write_key(&mut fptr, "NUMRSP", responses.len() as i64)?;

    write_ebounds(&mut fptr, first)?;

    for (k, response) in (1..).zip(responses) {
        let hdu = write_matrix(
            &mut fptr,
            &format!("MATRIX{k}"),
            response,
            telescope_name,
            instrument_name,
        )?;
        if let Some(coverage) = response.coverage_interval() {
            write_coverage(&mut fptr, &hdu, coverage)?;
        }
        write_energies(&mut fptr, &format!("ENERGIES{k}"), response)?;
    }

    debug!(
        "Wrote {} responses to {}",
        responses.len(),
        path.as_ref().display()
    );
    Ok(())
}

/// Read every entry of an rsp2 container.
///
/// Entries whose `TSTART` equals `TSTOP` are still loaded; each one is
/// logged as a warning and listed in [`Rsp2Contents::degenerate`].
pub fn read_rsp2_file<P: AsRef<Path>>(path: P) -> Result<Rsp2Contents, FitsError> {
    let path = path.as_ref();
    let mut fptr = FitsFile::open(path)?;

    let primary = fptr.primary_hdu()?;
    let n_responses = primary.read_key::<i64>(&mut fptr, "NUMRSP")?;
    if n_responses < 1 {
        return Err(FitsError::InvalidData(format!(
            "NUMRSP must be positive, got {n_responses}"
        )));
    }

    let (ebounds, first_channel) = read_ebounds(&mut fptr)?;

    let mut entries = Vec::new();
    let mut degenerate = Vec::new();

    for k in 1..=n_responses {
        let matrix_name = format!("MATRIX{k}");
        let mc_energies = read_edges(&mut fptr, &format!("ENERGIES{k}"))?;

        let hdu = find_hdu(&mut fptr, &matrix_name)?;
        let matrix = read_matrix(
            &mut fptr,
            &hdu,
            &matrix_name,
            ebounds.len() - 1,
            mc_energies.len() - 1,
        )?;

        let tstart = hdu.read_key::<f64>(&mut fptr, "TSTART")?;
        let tstop = hdu.read_key::<f64>(&mut fptr, "TSTOP")?;
        let coverage = TimeInterval::new(tstart, tstop)?;

        if coverage.duration() == 0.0 {
            warn!(
                "Matrix {k} in {} has TSTART == TSTOP ({tstart}); it will get no weight",
                path.display()
            );
            degenerate.push(entries.len());
        }

        let mut response =
            InstrumentResponse::new(matrix, ebounds.clone(), mc_energies, Some(coverage))?
                .with_first_channel(first_channel);
        if let Some(rsp_filename) = read_file_name(&mut fptr, &hdu, "RESPFILE") {
            response = response.with_rsp_filename(rsp_filename);
        }
        if let Some(arf_filename) = read_file_name(&mut fptr, &hdu, "ANCRFILE") {
            response = response.with_arf_filename(arf_filename);
        }

        entries.push(response);
    }

    Ok(Rsp2Contents {
        entries,
        degenerate,
    })
}

fn create_file(path: &Path, overwrite: bool) -> Result<FitsFile, FitsError> {
    if path.exists() {
        if !overwrite {
            return Err(FitsError::FileExists(path.to_path_buf()));
        }
        return Ok(FitsFile::create(path).overwrite().open()?);
    }
    Ok(FitsFile::create(path).open()?)
}

fn find_hdu(fptr: &mut FitsFile, name: &str) -> Result<FitsHdu, FitsError> {
    fptr.hdu(name)
        .map_err(|_| FitsError::HduNotFound(name.to_string()))
}

/// Write the transposed matrix with its header keywords.
fn write_matrix(
    fptr: &mut FitsFile,
    name: &str,
    response: &InstrumentResponse,
    telescope_name: &str,
    instrument_name: &str,
) -> Result<FitsHdu, FitsError> {
    let n_channels = response.n_channels();
    let n_energies = response.n_energy_bins();

    // Row-major (n_energies, n_channels): one row per true-energy bin
    let image_description = ImageDescription {
        data_type: ImageType::Double,
        dimensions: &[n_energies, n_channels],
    };

    let hdu = fptr.create_image(name.to_string(), &image_description)?;
    let flat_data: Vec<f64> = response.matrix().t().iter().copied().collect();
    hdu.write_image(fptr, &flat_data)?;

    hdu.write_key(fptr, "TELESCOP", telescope_name)?;
    hdu.write_key(fptr, "INSTRUME", instrument_name)?;
    hdu.write_key(fptr, "DETCHANS", n_channels as i64)?;
    hdu.write_key(fptr, "RESPFILE", response.rsp_filename().unwrap_or(NO_FILE))?;
    hdu.write_key(fptr, "ANCRFILE", response.arf_filename().unwrap_or(NO_FILE))?;

    Ok(hdu)
}

fn write_coverage(
    fptr: &mut FitsFile,
    hdu: &FitsHdu,
    coverage: &TimeInterval,
) -> Result<(), FitsError> {
    hdu.write_key(fptr, "TSTART", coverage.start())?;
    hdu.write_key(fptr, "TSTOP", coverage.stop())?;
    Ok(())
}

fn write_ebounds(fptr: &mut FitsFile, response: &InstrumentResponse) -> Result<(), FitsError> {
    let ebounds = response.ebounds();
    let first_channel = response.first_channel() as i32;

    let channels: Vec<i32> = (0..response.n_channels() as i32)
        .map(|i| first_channel + i)
        .collect();
    let e_min: Vec<f64> = ebounds.iter().take(response.n_channels()).copied().collect();
    let e_max: Vec<f64> = ebounds.iter().skip(1).copied().collect();

    let columns = [
        ColumnDescription::new("CHANNEL")
            .with_type(ColumnDataType::Int)
            .create()?,
        ColumnDescription::new("E_MIN")
            .with_type(ColumnDataType::Double)
            .create()?,
        ColumnDescription::new("E_MAX")
            .with_type(ColumnDataType::Double)
            .create()?,
    ];

    let hdu = fptr.create_table("EBOUNDS".to_string(), &columns)?;
    hdu.write_col(fptr, "CHANNEL", &channels)?;
    hdu.write_col(fptr, "E_MIN", &e_min)?;
    hdu.write_col(fptr, "E_MAX", &e_max)?;
    hdu.write_key(fptr, "DETCHANS", response.n_channels() as i64)?;
    Ok(())
}

fn write_energies(
    fptr: &mut FitsFile,
    name: &str,
    response: &InstrumentResponse,
) -> Result<(), FitsError> {
    let mc_energies = response.monte_carlo_energies();
    let energ_lo: Vec<f64> = mc_energies
        .iter()
        .take(response.n_energy_bins())
        .copied()
        .collect();
    let energ_hi: Vec<f64> = mc_energies.iter().skip(1).copied().collect();

    let columns = [
        ColumnDescription::new("ENERG_LO")
            .with_type(ColumnDataType::Double)
            .create()?,
        ColumnDescription::new("ENERG_HI")
            .with_type(ColumnDataType::Double)
            .create()?,
    ];

    let hdu = fptr.create_table(name.to_string(), &columns)?;
    hdu.write_col(fptr, "ENERG_LO", &energ_lo)?;
    hdu.write_col(fptr, "ENERG_HI", &energ_hi)?;
    Ok(())
}

/// Channel edges and the number of the first channel.
fn read_ebounds(fptr: &mut FitsFile) -> Result<(Vec<f64>, u32), FitsError> {
    let hdu = find_hdu(fptr, "EBOUNDS")?;
    let channels: Vec<i32> = hdu.read_col(fptr, "CHANNEL")?;
    let e_min: Vec<f64> = hdu.read_col(fptr, "E_MIN")?;
    let e_max: Vec<f64> = hdu.read_col(fptr, "E_MAX")?;

    let edges = join_bin_edges("EBOUNDS", &e_min, &e_max)?;
    let first_channel = channels
        .first()
        .and_then(|&c| u32::try_from(c).ok())
        .ok_or_else(|| FitsError::InvalidData("EBOUNDS has no valid CHANNEL column".into()))?;

    Ok((edges, first_channel))
}

fn read_edges(fptr: &mut FitsFile, name: &str) -> Result<Vec<f64>, FitsError> {
    let hdu = find_hdu(fptr, name)?;
    let lo: Vec<f64> = hdu.read_col(fptr, "ENERG_LO")?;
    let hi: Vec<f64> = hdu.read_col(fptr, "ENERG_HI")?;
    join_bin_edges(name, &lo, &hi)
}

/// Turn per-bin lower/upper bounds into a single edge array.
///
/// Neighbouring bins must share their common edge.
fn join_bin_edges(name: &str, lo: &[f64], hi: &[f64]) -> Result<Vec<f64>, FitsError> {
    if lo.is_empty() || lo.len() != hi.len() {
        return Err(FitsError::InvalidData(format!(
            "{name}: {} lower and {} upper bounds",
            lo.len(),
            hi.len()
        )));
    }

    if let Some(i) = (1..lo.len()).find(|&i| lo[i] != hi[i - 1]) {
        return Err(FitsError::InvalidData(format!(
            "{name}: bin {i} starts at {} but bin {} ends at {}",
            lo[i],
            i - 1,
            hi[i - 1]
        )));
    }

    let mut edges = lo.to_vec();
    edges.push(hi[hi.len() - 1]);
    Ok(edges)
}

/// Read a stored matrix back into (n_channels, n_energies) orientation.
fn read_matrix(
    fptr: &mut FitsFile,
    hdu: &FitsHdu,
    name: &str,
    n_channels: usize,
    n_energies: usize,
) -> Result<Array2<f64>, FitsError> {
    let image_data: Vec<f64> = hdu.read_image(fptr)?;

    let stored = Array2::from_shape_vec((n_energies, n_channels), image_data).map_err(|_| {
        FitsError::InvalidData(format!(
            "Cannot reshape image data for HDU '{name}' into {n_energies}x{n_channels}"
        ))
    })?;

    Ok(stored.t().to_owned())
}

fn read_file_name(fptr: &mut FitsFile, hdu: &FitsHdu, key: &str) -> Option<String> {
    hdu.read_key::<String>(fptr, key)
        .ok()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty() && name != NO_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{array, s};
    use tempfile::tempdir;

    fn test_response(coverage: Option<TimeInterval>) -> InstrumentResponse {
        let matrix = Array2::from_diag(&array![1.0, 2.0, 3.0, 4.0])
            .slice(s![..3, ..])
            .to_owned();
        InstrumentResponse::new(
            matrix,
            vec![1.0, 2.5, 4.5, 5.0],
            vec![1.0, 2.0, 3.0, 4.0, 5.0],
            coverage,
        )
        .unwrap()
    }

    fn assert_same_content(a: &InstrumentResponse, b: &InstrumentResponse) {
        assert_eq!(a.matrix().dim(), b.matrix().dim());
        for (x, y) in a.matrix().iter().zip(b.matrix().iter()) {
            assert_relative_eq!(*x, *y, max_relative = 1e-7);
        }
        for (x, y) in a.ebounds().iter().zip(b.ebounds().iter()) {
            assert_relative_eq!(*x, *y, max_relative = 1e-7);
        }
        for (x, y) in a
            .monte_carlo_energies()
            .iter()
            .zip(b.monte_carlo_energies().iter())
        {
            assert_relative_eq!(*x, *y, max_relative = 1e-7);
        }
    }

    #[test]
    fn test_fits_error_display() {
        let error = FitsError::HduNotFound("MATRIX".to_string());
        assert!(error.to_string().contains("HDU not found: MATRIX"));

        let error = FitsError::FileExists(PathBuf::from("a.rsp"));
        assert!(error.to_string().contains("a.rsp"));
    }

    #[test]
    fn test_response_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.rsp");

        let rsp = test_response(None);
        write_response(&rsp, &path, "TEST", "TEST", false).unwrap();

        let reloaded = read_response(&path).unwrap();
        assert_same_content(&rsp, &reloaded);
        assert!(reloaded.coverage_interval().is_none());
        assert!(reloaded.arf_filename().is_none());
        assert!(reloaded.rsp_filename().is_none());
        assert_eq!(reloaded.first_channel(), 1);
    }

    #[test]
    fn test_non_diagonal_orientation_survives() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dense.rsp");

        let matrix = array![[0.1, 0.2, 0.3], [0.4, 0.5, 0.6]];
        let rsp = InstrumentResponse::new(matrix, vec![0.0, 1.0, 2.0], vec![1.0, 2.0, 4.0, 8.0], None)
            .unwrap();
        write_response(&rsp, &path, "TEST", "TEST", false).unwrap();

        let reloaded = read_response(&path).unwrap();
        assert_eq!(reloaded.matrix().dim(), (2, 3));
        assert_relative_eq!(reloaded.matrix()[[0, 2]], 0.3);
        assert_relative_eq!(reloaded.matrix()[[1, 0]], 0.4);
    }

    #[test]
    fn test_roundtrip_with_arf_and_coverage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("with_arf.rsp");

        let coverage = TimeInterval::new(-3.5, 12.25).unwrap();
        let rsp = test_response(Some(coverage))
            .with_rsp_filename("det.rmf")
            .with_arf_filename("det.arf");
        write_response(&rsp, &path, "TEST", "TEST", false).unwrap();

        let reloaded = read_response(&path).unwrap();
        assert_same_content(&rsp, &reloaded);
        assert_eq!(reloaded.arf_filename(), Some("det.arf"));
        assert_eq!(reloaded.rsp_filename(), Some("det.rmf"));
        assert_eq!(reloaded.coverage_interval(), Some(&coverage));
        assert_eq!(reloaded, rsp);
    }

    #[test]
    fn test_refuses_overwrite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("exists.rsp");

        let rsp = test_response(None);
        write_response(&rsp, &path, "TEST", "TEST", false).unwrap();

        let result = write_response(&rsp, &path, "TEST", "TEST", false);
        assert!(matches!(result, Err(FitsError::FileExists(_))));

        let halved = {
            let mut halved = rsp.clone();
            halved.replace_matrix(rsp.matrix() / 2.0).unwrap();
            halved
        };
        write_response(&halved, &path, "TEST", "TEST", true).unwrap();
        let reloaded = read_response(&path).unwrap();
        assert_relative_eq!(reloaded.matrix()[[1, 1]], 1.0);
    }

    #[test]
    fn test_missing_hdu() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.fits");
        FitsFile::create(&path).open().unwrap();

        let result = read_response(&path);
        assert!(matches!(result, Err(FitsError::HduNotFound(name)) if name == "EBOUNDS"));
    }

    #[test]
    fn test_join_bin_edges() {
        let edges = join_bin_edges("T", &[1.0, 2.0, 3.0], &[2.0, 3.0, 5.0]).unwrap();
        assert_eq!(edges, vec![1.0, 2.0, 3.0, 5.0]);

        assert!(join_bin_edges("T", &[1.0, 2.5], &[2.0, 3.0]).is_err());
        assert!(join_bin_edges("T", &[], &[]).is_err());
    }

    #[test]
    fn test_rsp2_roundtrip_with_degenerate_entry() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("set.rsp2");

        let responses = vec![
            test_response(Some(TimeInterval::new(0.0, 10.0).unwrap())),
            test_response(Some(TimeInterval::new(10.0, 10.0).unwrap())),
            test_response(Some(TimeInterval::new(10.0, 30.0).unwrap())),
        ];
        write_rsp2_file(&responses, &path, "TEST", "TEST", false).unwrap();

        let contents = read_rsp2_file(&path).unwrap();
        assert_eq!(contents.entries.len(), 3);
        assert_eq!(contents.degenerate, vec![1]);
        for (written, read) in responses.iter().zip(&contents.entries) {
            assert_same_content(written, read);
            assert_eq!(written.coverage_interval(), read.coverage_interval());
        }
    }

    #[test]
    fn test_rsp2_requires_coverage_and_shared_ebounds() {
        let dir = tempdir().unwrap();

        let responses = vec![test_response(None)];
        let result = write_rsp2_file(&responses, dir.path().join("a.rsp2"), "T", "T", false);
        assert!(matches!(result, Err(FitsError::InvalidData(_))));

        let other = InstrumentResponse::new(
            Array2::zeros((2, 4)),
            vec![1.0, 3.0, 5.0],
            vec![1.0, 2.0, 3.0, 4.0, 5.0],
            Some(TimeInterval::new(10.0, 20.0).unwrap()),
        )
        .unwrap();
        let responses = vec![
            test_response(Some(TimeInterval::new(0.0, 10.0).unwrap())),
            other,
        ];
        let result = write_rsp2_file(&responses, dir.path().join("b.rsp2"), "T", "T", false);
        assert!(matches!(result, Err(FitsError::InvalidData(_))));

        let result = write_rsp2_file(&[], dir.path().join("c.rsp2"), "T", "T", false);
        assert!(matches!(result, Err(FitsError::InvalidData(_))));
    }
}
