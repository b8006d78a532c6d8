//! Lazy concatenation of per-month files along time.

use super::common::missing_files;
use super::reader::{FieldInfo, NetCDFReader};
use super::writer::StreamingWriter;
use super::{Axis, AxisKind, DataAccessError, Dataset, GriddedField};
use crate::config::ChunkPolicy;
use crate::error::PipelineError;
use ndarray::ArrayD;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A sequence of files sharing one grid, viewed as a single dataset
/// concatenated along its time axis.
///
/// Only metadata is held in memory. Field data is read on request, one
/// level range at a time, opening each file in turn.
#[derive(Debug, Clone)]
pub struct MultiFileDataset {
    files: Vec<PathBuf>,
    /// Time steps contributed by each file
    time_counts: Vec<usize>,
    axes: Vec<Axis>,
    fields: Vec<FieldInfo>,
    global_attributes: Vec<(String, String)>,
    chunking: ChunkPolicy,
}

impl MultiFileDataset {
    /// Check every file exists, then scan their axes.
    ///
    /// Nothing is read if a file is missing. Non-time axes must agree
    /// across files.
    pub fn open(files: Vec<PathBuf>) -> Result<Self, DataAccessError> {
        let missing = missing_files(&files);
        if let Some(first) = missing.first() {
            for path in &missing {
                warn!("missing input file {}", path.display());
            }
            return Err(DataAccessError::FileNotFound(first.clone()));
        }
        let first_path = files.first().ok_or_else(|| DataAccessError::Malformed {
            path: PathBuf::new(),
            reason: "no files to aggregate".to_string(),
        })?;

        let (mut axes, fields, global_attributes) = {
            let reader = NetCDFReader::open(first_path)?;
            let fields = reader
                .variable_names()
                .iter()
                .map(|name| reader.field_info(name))
                .collect::<Result<Vec<_>, _>>()?;
            (reader.read_axes()?, fields, reader.global_attributes())
        };
        let time_name = axes
            .iter()
            .find(|a| a.kind == AxisKind::Time)
            .map(|a| a.name.clone())
            .ok_or_else(|| DataAccessError::Malformed {
                path: first_path.clone(),
                reason: "no time axis".to_string(),
            })?;

        let mut time_counts = Vec::with_capacity(files.len());
        let mut time_values = Vec::new();
        for path in &files {
            let reader = NetCDFReader::open(path)?;
            for axis in reader.read_axes()? {
                if axis.name == time_name {
                    time_counts.push(axis.len());
                    time_values.extend_from_slice(&axis.values);
                } else if let Some(expected) = axes.iter().find(|a| a.name == axis.name) {
                    if !expected.agrees_with(&axis) {
                        return Err(DataAccessError::Malformed {
                            path: path.clone(),
                            reason: format!("axis '{}' differs from {}", axis.name, first_path.display()),
                        });
                    }
                }
            }
        }
        if let Some(time) = axes.iter_mut().find(|a| a.name == time_name) {
            time.values = time_values;
        }

        debug!(
            "aggregated {} files, {} time steps",
            files.len(),
            time_counts.iter().sum::<usize>()
        );
        Ok(Self {
            files,
            time_counts,
            axes,
            fields,
            global_attributes,
            chunking: ChunkPolicy::default(),
        })
    }

    /// Use `policy` for `level_chunks`
    pub fn with_chunking(mut self, policy: ChunkPolicy) -> Self {
        self.chunking = policy;
        self
    }

    /// Level ranges to read at once; a single unrestricted chunk if the
    /// grid has no level axis
    pub fn level_chunks(&self) -> Vec<Option<Range<usize>>> {
        match self.level_axis() {
            Some(level) => self
                .chunking
                .level_ranges(level.len())
                .into_iter()
                .map(Some)
                .collect(),
            None => vec![None],
        }
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    pub fn axis(&self, name: &str) -> Option<&Axis> {
        self.axes.iter().find(|a| a.name == name)
    }

    pub fn global_attributes(&self) -> &[(String, String)] {
        &self.global_attributes
    }

    pub fn time_axis(&self) -> Option<&Axis> {
        self.axes.iter().find(|a| a.kind == AxisKind::Time)
    }

    /// The level axis the data fields are on (`pfull` rather than `phalf`)
    pub fn level_axis(&self) -> Option<&Axis> {
        self.axes.iter().find(|a| {
            a.kind == AxisKind::Level && self.fields.iter().any(|f| f.dims.contains(&a.name))
        })
    }

    pub fn field_info(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_infos(&self) -> &[FieldInfo] {
        &self.fields
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    pub fn contains_field(&self, name: &str) -> bool {
        self.field_info(name).is_some()
    }

    fn is_time(&self, dim: &str) -> bool {
        self.axis(dim).map(|a| a.kind) == Some(AxisKind::Time)
    }

    /// True if the field is on the chunked level axis
    pub fn has_level(&self, name: &str) -> bool {
        match (self.level_axis(), self.field_info(name)) {
            (Some(level), Some(info)) => info.dims.contains(&level.name),
            _ => false,
        }
    }

    /// Axes with the level axis restricted to `levels`
    pub fn axes_for(&self, levels: Option<Range<usize>>) -> Vec<Axis> {
        let level_name = self.level_axis().map(|a| a.name.as_str());
        self.axes
            .iter()
            .map(|a| match &levels {
                Some(range) if Some(a.name.as_str()) == level_name => a.slice(range.clone()),
                _ => a.clone(),
            })
            .collect()
    }

    fn read_from(
        &self,
        reader: &NetCDFReader,
        name: &str,
        levels: Option<&Range<usize>>,
    ) -> Result<GriddedField, DataAccessError> {
        let level_dim = self
            .level_axis()
            .map(|a| a.name.as_str())
            .filter(|_| self.has_level(name));
        match (levels, level_dim) {
            (Some(range), Some(dim)) => reader.read_field_slab(name, dim, range.clone()),
            _ => reader.read_field(name),
        }
    }

    /// Read one field over the full time series, restricted to `levels`
    /// when it has a level axis.
    pub fn read_field_chunk(
        &self,
        name: &str,
        levels: Option<Range<usize>>,
    ) -> Result<GriddedField, PipelineError> {
        let info = self
            .field_info(name)
            .ok_or_else(|| PipelineError::missing_field(name, "aggregated dataset"))?;
        let time_pos = info.dims.iter().position(|d| self.is_time(d));

        let Some(time_pos) = time_pos else {
            // Time-invariant: every file holds the same values.
            let reader = NetCDFReader::open(&self.files[0])?;
            return Ok(self.read_from(&reader, name, levels.as_ref())?);
        };

        let parts = self
            .files
            .iter()
            .map(|path| {
                let reader = NetCDFReader::open(path)?;
                self.read_from(&reader, name, levels.as_ref())
            })
            .collect::<Result<Vec<_>, _>>()?;
        let data: ArrayD<f64> = {
            let views: Vec<_> = parts.iter().map(|f| f.data.view()).collect();
            ndarray::concatenate(ndarray::Axis(time_pos), &views)?
        };

        let mut field = parts
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::missing_field(name, "aggregated dataset"))?;
        field.data = data;
        Ok(field)
    }

    /// In-memory dataset holding `names` for one level range over the full
    /// time series
    pub fn read_chunk_dataset(
        &self,
        names: &[&str],
        levels: Option<Range<usize>>,
    ) -> Result<Dataset, PipelineError> {
        let mut dataset = Dataset::new();
        for axis in self.axes_for(levels.clone()) {
            dataset.add_axis(axis)?;
        }
        for name in names {
            dataset.insert_field(self.read_field_chunk(name, levels.clone())?)?;
        }
        dataset.drop_unused_axes();
        dataset.global_attributes = self.global_attributes.clone();
        Ok(dataset)
    }

    /// Load the named fields whole. Intended for fields without a level axis.
    pub fn load_fields(&self, names: &[&str]) -> Result<Dataset, PipelineError> {
        self.read_chunk_dataset(names, None)
    }

    /// Copy a field into `writer` file by file, each file's time steps
    /// going to their offset in the concatenated time axis.
    pub fn stream_field(
        &self,
        name: &str,
        target: &str,
        writer: &mut StreamingWriter,
    ) -> Result<(), PipelineError> {
        let info = self
            .field_info(name)
            .ok_or_else(|| PipelineError::missing_field(name, "aggregated dataset"))?;
        writer.define_field(
            target,
            &info.dims,
            &info.units,
            &info.long_name,
            super::FILL_VALUE,
        )?;
        debug!("streaming {} into {} as {}", name, writer.path().display(), target);

        let time_pos = info.dims.iter().position(|d| self.is_time(d));
        let mut offset = 0;
        for (path, &count) in self.files.iter().zip(&self.time_counts) {
            let reader = NetCDFReader::open(path)?;
            let field = reader.read_field(name)?;
            let ranges: Vec<Range<usize>> = field
                .shape()
                .iter()
                .enumerate()
                .map(|(i, &n)| {
                    if Some(i) == time_pos {
                        offset..offset + n
                    } else {
                        0..n
                    }
                })
                .collect();
            writer.put_slab(target, &ranges, &field.data)?;
            if time_pos.is_none() {
                break;
            }
            offset += count;
        }
        Ok(())
    }
}

/// Open `files` as one time-concatenated dataset
pub fn open_mfdataset<P: AsRef<Path>>(files: &[P]) -> Result<MultiFileDataset, DataAccessError> {
    MultiFileDataset::open(files.iter().map(|p| p.as_ref().to_path_buf()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_io::NetCDFWriter;
    use tempfile::tempdir;

    fn month_file(dir: &Path, month: usize) -> PathBuf {
        let mut ds = Dataset::new();
        ds.add_axis(Axis::new("time", vec![month as f64 * 30.0 + 15.0]))
            .unwrap();
        ds.add_axis(Axis::new("pfull", vec![850.0, 500.0, 250.0]))
            .unwrap();
        ds.add_axis(Axis::new("lat", vec![-10.0, 10.0])).unwrap();
        let values = (0..6).map(|i| (100 * month + i) as f64).collect();
        let ta = GriddedField::from_shape_vec("ta", &["time", "pfull", "lat"], &[1, 3, 2], values)
            .unwrap()
            .with_metadata("K", "temperature");
        ds.insert_field(ta).unwrap();
        let zsurf = GriddedField::from_shape_vec("zsurf", &["lat"], &[2], vec![0.0, 0.0]).unwrap();
        ds.insert_field(zsurf).unwrap();

        let path = dir.join(format!("m{}.nc", month));
        NetCDFWriter::new(&path).write_dataset(&ds).unwrap();
        path
    }

    #[test]
    fn test_concatenates_along_time() {
        let dir = tempdir().unwrap();
        let files: Vec<_> = (0..3).map(|m| month_file(dir.path(), m)).collect();
        let mf = open_mfdataset(&files).unwrap();

        assert_eq!(mf.time_axis().unwrap().values, vec![15.0, 45.0, 75.0]);
        let ta = mf.read_field_chunk("ta", Some(1..2)).unwrap();
        assert_eq!(ta.shape(), &[3, 1, 2]);
        assert_eq!(ta.data[[2, 0, 1]], 203.0);
        assert_eq!(ta.units, "K");

        let zsurf = mf.read_field_chunk("zsurf", Some(0..1)).unwrap();
        assert_eq!(zsurf.shape(), &[2]);
    }

    #[test]
    fn test_chunk_dataset_slices_level_axis() {
        let dir = tempdir().unwrap();
        let files: Vec<_> = (0..2).map(|m| month_file(dir.path(), m)).collect();
        let mf = open_mfdataset(&files).unwrap();
        let ds = mf.read_chunk_dataset(&["ta"], Some(2..3)).unwrap();
        assert_eq!(ds.axis("pfull").unwrap().values, vec![250.0]);
        assert!(ds.field("ta").unwrap().capabilities.has_time);

        let mf = mf.with_chunking(ChunkPolicy { level_chunk: 2 });
        assert_eq!(mf.level_chunks(), vec![Some(0..2), Some(2..3)]);
    }

    #[test]
    fn test_missing_file_detected_before_reading() {
        let dir = tempdir().unwrap();
        let mut files: Vec<_> = (0..3).map(|m| month_file(dir.path(), m)).collect();
        files[1] = dir.path().join("absent.nc");
        let err = open_mfdataset(&files).unwrap_err();
        match err {
            DataAccessError::FileNotFound(path) => assert!(path.ends_with("absent.nc")),
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_stream_field() {
        let dir = tempdir().unwrap();
        let files: Vec<_> = (0..2).map(|m| month_file(dir.path(), m)).collect();
        let mf = open_mfdataset(&files).unwrap();
        let out = dir.path().join("all.nc");
        {
            let mut writer = StreamingWriter::create(&out, mf.axes(), &[]).unwrap();
            mf.stream_field("ta", "ta", &mut writer).unwrap();
        }
        let ta = NetCDFReader::open(&out).unwrap().read_field("ta").unwrap();
        assert_eq!(ta.shape(), &[2, 3, 2]);
        assert_eq!(ta.data[[1, 2, 1]], 105.0);
    }
}
