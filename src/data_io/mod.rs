pub mod common;
pub mod multifile;
pub mod reader;
pub mod utils;
pub mod writer;

pub use multifile::*;
pub use reader::*;
pub use writer::*;

use crate::error::PipelineError;
use ndarray::{ArrayD, IxDyn};
use std::path::PathBuf;
use thiserror::Error;

/// Fill/missing-value sentinel carried by every persisted field
pub const FILL_VALUE: f64 = 1.0e20;

/// Failures reading or writing NetCDF files
#[derive(Error, Debug)]
pub enum DataAccessError {
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("NetCDF error in {}: {source}", path.display())]
    Netcdf {
        path: PathBuf,
        source: netcdf::Error,
    },

    #[error("Variable '{name}' not found in {}", path.display())]
    MissingVariable { name: String, path: PathBuf },

    #[error("Malformed data in {}: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },

    #[error("Refusing to overwrite raw model output: {}", .0.display())]
    ProtectedPath(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Role of a coordinate axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisKind {
    Time,
    Level,
    Latitude,
    Longitude,
    Other,
}

impl AxisKind {
    /// Classify an axis by its name, falling back to the CF `axis` attribute.
    pub fn classify(name: &str, cf_axis: Option<&str>) -> Self {
        match name {
            "time" => Self::Time,
            "pfull" | "phalf" | "plev" | "lev" | "level" => Self::Level,
            "lat" | "latitude" => Self::Latitude,
            "lon" | "longitude" => Self::Longitude,
            _ => match cf_axis {
                Some("T") => Self::Time,
                Some("Z") => Self::Level,
                _ => Self::Other,
            },
        }
    }
}

/// Coordinate axis shared by the fields of a dataset
#[derive(Debug, Clone, PartialEq)]
pub struct Axis {
    pub name: String,
    pub kind: AxisKind,
    pub values: Vec<f64>,
    /// String attributes of the coordinate variable (units, calendar, ...)
    pub attributes: Vec<(String, String)>,
    /// False for bare dimensions with no coordinate variable on disk
    pub has_coordinate: bool,
}

impl Axis {
    pub fn new(name: impl Into<String>, values: Vec<f64>) -> Self {
        let name = name.into();
        Self {
            kind: AxisKind::classify(&name, None),
            name,
            values,
            attributes: Vec::new(),
            has_coordinate: true,
        }
    }

    /// A bare dimension of length `len`, indexed 0..len
    pub fn index(name: impl Into<String>, len: usize) -> Self {
        let mut axis = Self::new(name, (0..len).map(|i| i as f64).collect());
        axis.has_coordinate = false;
        axis
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attribute(key, value);
        self
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.attributes.push((key, value)),
        }
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Same length and coordinate values (to a relative 1e-9).
    pub fn agrees_with(&self, other: &Axis) -> bool {
        self.len() == other.len()
            && self
                .values
                .iter()
                .zip(&other.values)
                .all(|(a, b)| (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0))
    }

    /// Copy of this axis restricted to `range`
    pub fn slice(&self, range: std::ops::Range<usize>) -> Self {
        Self {
            values: self.values[range].to_vec(),
            ..self.clone()
        }
    }
}

/// Which reducible axes a field carries; computed once when the field enters
/// a dataset and updated by reductions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FieldCapabilities {
    pub has_time: bool,
    pub has_longitude: bool,
}

impl FieldCapabilities {
    pub fn from_kinds(kinds: impl IntoIterator<Item = AxisKind>) -> Self {
        kinds.into_iter().fold(Self::default(), |mut caps, kind| {
            match kind {
                AxisKind::Time => caps.has_time = true,
                AxisKind::Longitude => caps.has_longitude = true,
                _ => {}
            }
            caps
        })
    }
}

/// N-dimensional field on named axes
#[derive(Debug, Clone, PartialEq)]
pub struct GriddedField {
    pub name: String,
    /// Axis names, outermost first
    pub dims: Vec<String>,
    pub data: ArrayD<f64>,
    pub units: String,
    pub long_name: String,
    pub fill_value: f64,
    pub capabilities: FieldCapabilities,
}

impl GriddedField {
    /// New field with `units = "1"` and `long_name = name` until told otherwise.
    pub fn new(name: impl Into<String>, dims: Vec<String>, data: ArrayD<f64>) -> Self {
        let name = name.into();
        let capabilities =
            FieldCapabilities::from_kinds(dims.iter().map(|d| AxisKind::classify(d, None)));
        Self {
            long_name: name.clone(),
            name,
            dims,
            data,
            units: "1".to_string(),
            fill_value: FILL_VALUE,
            capabilities,
        }
    }

    /// Build from a flat row-major buffer.
    pub fn from_shape_vec(
        name: impl Into<String>,
        dims: &[&str],
        shape: &[usize],
        values: Vec<f64>,
    ) -> Result<Self, PipelineError> {
        let data = ArrayD::from_shape_vec(IxDyn(shape), values)?;
        Ok(Self::new(
            name,
            dims.iter().map(|d| d.to_string()).collect(),
            data,
        ))
    }

    pub fn with_metadata(mut self, units: impl Into<String>, long_name: impl Into<String>) -> Self {
        self.units = units.into();
        self.long_name = long_name.into();
        self
    }

    pub fn axis_index(&self, axis: &str) -> Option<usize> {
        self.dims.iter().position(|d| d == axis)
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn is_missing(&self, value: f64) -> bool {
        common::is_missing(value, self.fill_value)
    }
}

/// Ordered collection of fields on a shared coordinate system
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    axes: Vec<Axis>,
    fields: Vec<GriddedField>,
    pub global_attributes: Vec<(String, String)>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    pub fn axis(&self, name: &str) -> Option<&Axis> {
        self.axes.iter().find(|a| a.name == name)
    }

    /// Add an axis; an existing axis of the same name must agree with it.
    pub fn add_axis(&mut self, axis: Axis) -> Result<(), PipelineError> {
        match self.axis(&axis.name) {
            Some(existing) if existing.agrees_with(&axis) => Ok(()),
            Some(existing) => Err(PipelineError::Shape(format!(
                "axis '{}' redefined with {} values (had {})",
                axis.name,
                axis.len(),
                existing.len()
            ))),
            None => {
                self.axes.push(axis);
                Ok(())
            }
        }
    }

    pub fn axis_in_use(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.dims.iter().any(|d| d == name))
    }

    /// Remove an axis that no field references. Returns false otherwise.
    pub fn remove_axis(&mut self, name: &str) -> bool {
        if self.axis_in_use(name) {
            return false;
        }
        let before = self.axes.len();
        self.axes.retain(|a| a.name != name);
        self.axes.len() != before
    }

    pub fn drop_unused_axes(&mut self) {
        let fields = &self.fields;
        self.axes
            .retain(|a| fields.iter().any(|f| f.dims.iter().any(|d| *d == a.name)));
    }

    /// Position of the axis of `kind` within the field's dims
    pub fn axis_position(&self, field: &GriddedField, kind: AxisKind) -> Option<usize> {
        field
            .dims
            .iter()
            .position(|d| self.axis(d).map(|a| a.kind) == Some(kind))
    }

    /// Axis of the given kind, if the dataset has one
    pub fn axis_of_kind(&self, kind: AxisKind) -> Option<&Axis> {
        self.axes.iter().find(|a| a.kind == kind)
    }

    pub fn field(&self, name: &str) -> Option<&GriddedField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut GriddedField> {
        self.fields.iter_mut().find(|f| f.name == name)
    }

    pub fn require_field(&self, name: &str, context: &str) -> Result<&GriddedField, PipelineError> {
        self.field(name)
            .ok_or_else(|| PipelineError::missing_field(name, context))
    }

    pub fn contains_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Insert or replace (in place) a field. Its axes must exist and match its shape.
    pub fn insert_field(&mut self, mut field: GriddedField) -> Result<(), PipelineError> {
        if field.dims.len() != field.data.ndim() {
            return Err(PipelineError::Shape(format!(
                "field '{}' has {} dims but {}-d data",
                field.name,
                field.dims.len(),
                field.data.ndim()
            )));
        }
        let mut kinds = Vec::with_capacity(field.dims.len());
        for (dim, &len) in field.dims.iter().zip(field.data.shape()) {
            let axis = self.axis(dim).ok_or_else(|| {
                PipelineError::Shape(format!(
                    "field '{}' uses unknown axis '{}'",
                    field.name, dim
                ))
            })?;
            if axis.len() != len {
                return Err(PipelineError::Shape(format!(
                    "field '{}' has {} values along '{}', axis has {}",
                    field.name,
                    len,
                    dim,
                    axis.len()
                )));
            }
            kinds.push(axis.kind);
        }
        field.capabilities = FieldCapabilities::from_kinds(kinds);

        match self.fields.iter_mut().find(|f| f.name == field.name) {
            Some(slot) => *slot = field,
            None => self.fields.push(field),
        }
        Ok(())
    }

    pub fn remove_field(&mut self, name: &str) -> Option<GriddedField> {
        let idx = self.fields.iter().position(|f| f.name == name)?;
        Some(self.fields.remove(idx))
    }

    /// Rename keeping the field's position.
    pub fn rename_field(&mut self, from: &str, to: &str) -> Result<(), PipelineError> {
        if from != to && self.contains_field(to) {
            return Err(PipelineError::RenameCollision {
                source_name: from.to_string(),
                target: to.to_string(),
                reason: "target already present".to_string(),
            });
        }
        let field = self
            .field_mut(from)
            .ok_or_else(|| PipelineError::missing_field(from, "rename"))?;
        field.name = to.to_string();
        Ok(())
    }

    pub fn fields(&self) -> impl Iterator<Item = &GriddedField> {
        self.fields.iter()
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn set_global_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.global_attributes.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.global_attributes.push((key, value)),
        }
    }
}
