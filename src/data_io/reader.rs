use super::common::{netcdf_error, open_netcdf_file};
use super::{Axis, AxisKind, DataAccessError, Dataset, GriddedField, FILL_VALUE};
use crate::error::PipelineError;
use ndarray::{ArrayD, IxDyn};
use netcdf::{AttributeValue, Extent, Extents};
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::trace;

/// Shape and metadata of a variable, without its data
#[derive(Debug, Clone, PartialEq)]
pub struct FieldInfo {
    pub name: String,
    pub dims: Vec<String>,
    pub shape: Vec<usize>,
    pub units: String,
    pub long_name: String,
}

/// Read-only NetCDF reader. The file handle is released when the reader is
/// dropped.
pub struct NetCDFReader {
    path: PathBuf,
    file: netcdf::File,
}

impl NetCDFReader {
    /// Open an existing file read-only
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DataAccessError> {
        let path = path.as_ref().to_path_buf();
        let file = open_netcdf_file(&path)?;
        trace!("opened {}", path.display());
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn variable(&self, name: &str) -> Result<netcdf::Variable<'_>, DataAccessError> {
        self.file
            .variable(name)
            .ok_or_else(|| DataAccessError::MissingVariable {
                name: name.to_string(),
                path: self.path.clone(),
            })
    }

    /// One axis per file dimension. Dimensions with a 1-D coordinate
    /// variable of the same name take its values and string attributes.
    pub fn read_axes(&self) -> Result<Vec<Axis>, DataAccessError> {
        let mut axes = Vec::new();
        for dim in self.file.dimensions() {
            let name = dim.name();
            let len = dim.len();
            let coordinate = self
                .file
                .variable(&name)
                .filter(|v| v.dimensions().len() == 1 && v.dimensions()[0].name() == name);

            let axis = match coordinate {
                Some(var) => {
                    let values = var
                        .get_values::<f64, _>(..)
                        .map_err(netcdf_error(&self.path))?;
                    let attributes = string_attributes(&var);
                    let cf_axis = attributes
                        .iter()
                        .find(|(k, _)| k == "axis" || k == "cartesian_axis")
                        .map(|(_, v)| v.as_str());
                    let kind = AxisKind::classify(&name, cf_axis);
                    Axis {
                        name,
                        kind,
                        values,
                        attributes,
                        has_coordinate: true,
                    }
                }
                None => Axis::index(name, len),
            };
            axes.push(axis);
        }
        Ok(axes)
    }

    /// Names of the data (non-coordinate) variables, in file order
    pub fn variable_names(&self) -> Vec<String> {
        let dims: Vec<String> = self.file.dimensions().map(|d| d.name()).collect();
        self.file
            .variables()
            .map(|v| v.name())
            .filter(|name| !dims.contains(name))
            .collect()
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.file.variable(name).is_some()
    }

    pub fn field_info(&self, name: &str) -> Result<FieldInfo, DataAccessError> {
        let var = self.variable(name)?;
        let (dims, shape): (Vec<String>, Vec<usize>) = var
            .dimensions()
            .iter()
            .map(|d| (d.name(), d.len()))
            .unzip();
        Ok(FieldInfo {
            name: name.to_string(),
            dims,
            shape,
            units: string_attribute(&var, "units").unwrap_or_else(|| "1".to_string()),
            long_name: string_attribute(&var, "long_name").unwrap_or_else(|| name.to_string()),
        })
    }

    /// Read a whole variable. Missing samples (NaN or the variable's own
    /// fill value) become `FILL_VALUE`.
    pub fn read_field(&self, name: &str) -> Result<GriddedField, DataAccessError> {
        let info = self.field_info(name)?;
        let ranges: Vec<Range<usize>> = info.shape.iter().map(|&n| 0..n).collect();
        self.read_ranges(info, ranges)
    }

    /// Read `range` along `axis`, everything along the other axes. A
    /// variable that does not carry `axis` is read whole.
    pub fn read_field_slab(
        &self,
        name: &str,
        axis: &str,
        range: Range<usize>,
    ) -> Result<GriddedField, DataAccessError> {
        let info = self.field_info(name)?;
        let ranges: Vec<Range<usize>> = info
            .dims
            .iter()
            .zip(&info.shape)
            .map(|(d, &n)| if d == axis { range.clone() } else { 0..n })
            .collect();
        for (n, r) in info.shape.iter().zip(&ranges) {
            if r.end > *n || r.start > r.end {
                return Err(DataAccessError::Malformed {
                    path: self.path.clone(),
                    reason: format!("slab {:?} of '{}' out of bounds along '{}'", r, name, axis),
                });
            }
        }
        self.read_ranges(info, ranges)
    }

    fn read_ranges(
        &self,
        info: FieldInfo,
        ranges: Vec<Range<usize>>,
    ) -> Result<GriddedField, DataAccessError> {
        let var = self.variable(&info.name)?;
        let disk_fill = numeric_attribute(&var, "_FillValue")
            .or_else(|| numeric_attribute(&var, "missing_value"))
            .unwrap_or(FILL_VALUE);

        let shape: Vec<usize> = ranges.iter().map(|r| r.len()).collect();
        let values: Vec<f64> = if shape.is_empty() {
            var.get_values::<f64, _>(..)
                .map_err(netcdf_error(&self.path))?
        } else {
            let extents: Vec<Extent> = ranges.into_iter().map(Extent::from).collect();
            var.get_values::<f64, _>(Extents::from(extents))
                .map_err(netcdf_error(&self.path))?
        };
        let values = values
            .into_iter()
            .map(|v| {
                if super::common::is_missing(v, disk_fill) {
                    FILL_VALUE
                } else {
                    v
                }
            })
            .collect();

        let data = ArrayD::from_shape_vec(IxDyn(&shape), values).map_err(|e| {
            DataAccessError::Malformed {
                path: self.path.clone(),
                reason: format!("variable '{}': {}", info.name, e),
            }
        })?;

        Ok(GriddedField::new(info.name, info.dims, data).with_metadata(info.units, info.long_name))
    }

    pub fn global_attributes(&self) -> Vec<(String, String)> {
        self.file
            .attributes()
            .filter_map(|attr| match attr.value() {
                Ok(AttributeValue::Str(s)) => Some((attr.name().to_string(), s)),
                _ => None,
            })
            .collect()
    }

    /// Load every axis and data variable into memory
    pub fn read_dataset(&self) -> Result<Dataset, PipelineError> {
        let mut dataset = Dataset::new();
        for axis in self.read_axes()? {
            dataset.add_axis(axis)?;
        }
        for name in self.variable_names() {
            let field = self.read_field(&name)?;
            dataset.insert_field(field)?;
        }
        dataset.global_attributes = self.global_attributes();
        Ok(dataset)
    }
}

fn string_attribute(var: &netcdf::Variable<'_>, name: &str) -> Option<String> {
    match var.attribute_value(name) {
        Some(Ok(AttributeValue::Str(s))) => Some(s),
        _ => None,
    }
}

fn numeric_attribute(var: &netcdf::Variable<'_>, name: &str) -> Option<f64> {
    match var.attribute_value(name)?.ok()? {
        AttributeValue::Double(v) => Some(v),
        AttributeValue::Float(v) => Some(v as f64),
        AttributeValue::Doubles(v) => v.first().copied(),
        AttributeValue::Floats(v) => v.first().map(|&x| x as f64),
        _ => None,
    }
}

fn string_attributes(var: &netcdf::Variable<'_>) -> Vec<(String, String)> {
    var.attributes()
        .filter_map(|attr| match attr.value() {
            Ok(AttributeValue::Str(s)) => Some((attr.name().to_string(), s)),
            _ => None,
        })
        .collect()
}
