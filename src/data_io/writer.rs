use super::common::{create_netcdf_file, netcdf_error};
use super::{Axis, DataAccessError, Dataset, GriddedField};
use chrono::Utc;
use ndarray::ArrayD;
use netcdf::{Extent, Extents};
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::debug;

/// NetCDF writer for whole in-memory datasets
pub struct NetCDFWriter {
    pub file_path: PathBuf,
}

impl NetCDFWriter {
    pub fn new(file_path: impl AsRef<Path>) -> Self {
        Self {
            file_path: file_path.as_ref().to_path_buf(),
        }
    }

    /// Write every axis and field of `dataset`, replacing any existing file.
    /// Each field gets `units`, `long_name` and `_FillValue`.
    pub fn write_dataset(&self, dataset: &Dataset) -> Result<(), DataAccessError> {
        let mut writer =
            StreamingWriter::create(&self.file_path, dataset.axes(), &dataset.global_attributes)?;
        for field in dataset.fields() {
            writer.put_field(field)?;
        }
        debug!(
            "wrote {} fields to {}",
            dataset.len(),
            self.file_path.display()
        );
        Ok(())
    }
}

/// Writer that defines a file's axes up front and then accepts fields
/// slab by slab, so a dataset larger than memory can be persisted.
pub struct StreamingWriter {
    path: PathBuf,
    file: netcdf::FileMut,
    dims: Vec<(String, usize)>,
}

impl StreamingWriter {
    /// Create the file with one dimension per axis; axes backed by a
    /// coordinate variable get it written along with their attributes.
    pub fn create(
        path: impl AsRef<Path>,
        axes: &[Axis],
        global_attributes: &[(String, String)],
    ) -> Result<Self, DataAccessError> {
        let path = path.as_ref().to_path_buf();
        let mut file = create_netcdf_file(&path)?;
        let err = netcdf_error(&path);

        for (key, value) in global_attributes {
            if key == "history" {
                continue;
            }
            file.add_attribute(key, value.as_str()).map_err(&err)?;
        }
        if !global_attributes.iter().any(|(k, _)| k == "Conventions") {
            file.add_attribute("Conventions", "CF-1.6").map_err(&err)?;
        }
        let creation_time = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        file.add_attribute(
            "history",
            format!("Created on {} by itcz-postproc", creation_time),
        )
        .map_err(&err)?;

        for axis in axes {
            file.add_dimension(&axis.name, axis.len()).map_err(&err)?;
        }
        for axis in axes.iter().filter(|a| a.has_coordinate) {
            let mut var = file
                .add_variable::<f64>(&axis.name, &[axis.name.as_str()])
                .map_err(&err)?;
            for (key, value) in &axis.attributes {
                var.put_attribute(key, value.as_str()).map_err(&err)?;
            }
            var.put_values(&axis.values, ..).map_err(&err)?;
        }
        drop(err);

        let dims = axes.iter().map(|a| (a.name.clone(), a.len())).collect();
        Ok(Self { path, file, dims })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Declare a field over existing dimensions
    pub fn define_field(
        &mut self,
        name: &str,
        dims: &[String],
        units: &str,
        long_name: &str,
        fill_value: f64,
    ) -> Result<(), DataAccessError> {
        if let Some(missing) = dims.iter().find(|d| !self.dims.iter().any(|(n, _)| n == *d)) {
            return Err(DataAccessError::Malformed {
                path: self.path.clone(),
                reason: format!("field '{}' uses undefined dimension '{}'", name, missing),
            });
        }
        let err = netcdf_error(&self.path);
        let dim_names: Vec<&str> = dims.iter().map(String::as_str).collect();
        let mut var = self
            .file
            .add_variable::<f64>(name, &dim_names)
            .map_err(&err)?;
        var.put_attribute("_FillValue", fill_value).map_err(&err)?;
        var.put_attribute("units", units).map_err(&err)?;
        var.put_attribute("long_name", long_name).map_err(&err)?;
        Ok(())
    }

    /// Write `data` into the hyperslab `ranges` (one range per dimension)
    /// of a defined field
    pub fn put_slab(
        &mut self,
        name: &str,
        ranges: &[Range<usize>],
        data: &ArrayD<f64>,
    ) -> Result<(), DataAccessError> {
        let counts: Vec<usize> = ranges.iter().map(|r| r.len()).collect();
        if counts != data.shape() {
            return Err(DataAccessError::Malformed {
                path: self.path.clone(),
                reason: format!(
                    "slab for '{}' has shape {:?}, target region is {:?}",
                    name,
                    data.shape(),
                    counts
                ),
            });
        }
        let path = self.path.clone();
        let mut var = self
            .file
            .variable_mut(name)
            .ok_or_else(|| DataAccessError::MissingVariable {
                name: name.to_string(),
                path: path.clone(),
            })?;

        let values: Vec<f64> = data.iter().copied().collect();
        if ranges.is_empty() {
            var.put_values(&values, ..).map_err(netcdf_error(&path))?;
        } else {
            let extents: Vec<Extent> = ranges.iter().cloned().map(Extent::from).collect();
            var.put_values(&values, Extents::from(extents))
                .map_err(netcdf_error(&path))?;
        }
        Ok(())
    }

    /// Define and write a whole field
    pub fn put_field(&mut self, field: &GriddedField) -> Result<(), DataAccessError> {
        self.define_field(
            &field.name,
            &field.dims,
            &field.units,
            &field.long_name,
            field.fill_value,
        )?;
        let ranges: Vec<Range<usize>> = field.shape().iter().map(|&n| 0..n).collect();
        self.put_slab(&field.name, &ranges, &field.data)
    }
}
