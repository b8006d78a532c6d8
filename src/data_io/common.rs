/// Common functionality shared by the NetCDF reader and writers
use super::DataAccessError;
use std::path::{Path, PathBuf};

/// Relative tolerance used when comparing a sample against the fill sentinel.
const FILL_TOLERANCE: f64 = 1e-6;

/// True for NaN or for values equal to `fill` (to a relative 1e-6, so a
/// single-precision 1e20 on disk still counts as missing).
pub fn is_missing(value: f64, fill: f64) -> bool {
    value.is_nan() || (value - fill).abs() <= FILL_TOLERANCE * fill.abs()
}

/// Closure mapping a netcdf error to a `DataAccessError` tagged with the path
pub fn netcdf_error(path: &Path) -> impl Fn(netcdf::Error) -> DataAccessError + '_ {
    move |source| DataAccessError::Netcdf {
        path: path.to_path_buf(),
        source,
    }
}

/// Open a NetCDF file read-only, failing with `FileNotFound` if absent
pub fn open_netcdf_file(path: &Path) -> Result<netcdf::File, DataAccessError> {
    if !path.is_file() {
        return Err(DataAccessError::FileNotFound(path.to_path_buf()));
    }
    netcdf::open(path).map_err(netcdf_error(path))
}

/// Create (clobbering) a NetCDF file, making its parent directory if needed
pub fn create_netcdf_file(path: &Path) -> Result<netcdf::FileMut, DataAccessError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    netcdf::create(path).map_err(netcdf_error(path))
}

/// Reject `target` if it names the same file as `protected`.
pub fn guard_protected(target: &Path, protected: &Path) -> Result<(), DataAccessError> {
    let same = match (target.canonicalize(), protected.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => target == protected,
    };
    if same {
        return Err(DataAccessError::ProtectedPath(target.to_path_buf()));
    }
    Ok(())
}

/// Every path in `paths` that does not exist as a file
pub fn missing_files(paths: &[PathBuf]) -> Vec<PathBuf> {
    paths.iter().filter(|p| !p.is_file()).cloned().collect()
}
