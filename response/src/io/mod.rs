//! I/O for response matrices stored in FITS files

pub mod fits;

pub use fits::{
    read_response, read_rsp2_file, write_response, write_rsp2_file, FitsError, Rsp2Contents,
};
