//! Eddy flux terms over the full time series, and zonal/time mean
//! climatologies.

use crate::config::{ChunkPolicy, PipelineConfig};
use crate::data_io::{
    Axis, AxisKind, DataAccessError, Dataset, FieldCapabilities, GriddedField, MultiFileDataset,
    NetCDFReader, NetCDFWriter, StreamingWriter,
};
use crate::error::PipelineError;
use crate::math::{combine, masked_mean_over_axes, EddyFluxDecomposer, ZonalTimeDecomposition};
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One transient eddy flux to compute
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EddyFluxSpec {
    pub field_a: &'static str,
    pub field_b: &'static str,
    /// Model output of `field_a * field_b`, consumed by the computation
    pub product: &'static str,
    pub target: &'static str,
    pub long_name: &'static str,
    pub units: &'static str,
}

pub const EDDY_FLUX_SPECS: &[EddyFluxSpec] = &[
    EddyFluxSpec {
        field_a: "va",
        field_b: "ua",
        product: "ucomp_vcomp",
        target: "usvs",
        long_name: "Transient eddy momentum flux",
        units: "m2/s2",
    },
    EddyFluxSpec {
        field_a: "va",
        field_b: "ta",
        product: "vcomp_temp",
        target: "vsts",
        long_name: "Transient eddy heat flux",
        units: "m.K/s",
    },
    EddyFluxSpec {
        field_a: "va",
        field_b: "hus",
        product: "sphum_v",
        target: "vsqs",
        long_name: "Transient eddy moisture flux",
        units: "m.kg/s.kg",
    },
];

/// Fields the climatology comparison reports by default
pub const DEFAULT_COMPARE_FIELDS: &[&str] = &["ts", "prc"];

/// Positions in `dims` of the axes a field tagged `caps` is averaged
/// over: its time axis if it has one, its longitude axis likewise.
fn reduction_axes(grid: &Dataset, dims: &[String], caps: FieldCapabilities) -> Vec<usize> {
    dims.iter()
        .enumerate()
        .filter(|(_, d)| match grid.axis(d.as_str()).map(|a| a.kind) {
            Some(AxisKind::Time) => caps.has_time,
            Some(AxisKind::Longitude) => caps.has_longitude,
            _ => false,
        })
        .map(|(i, _)| i)
        .collect()
}

/// Mean `field` over whichever of its time and longitude axes the
/// capability tag says it has. `None` if it has neither.
pub fn reduce_field(
    dataset: &Dataset,
    field: &GriddedField,
) -> Result<Option<GriddedField>, PipelineError> {
    let axes = reduction_axes(dataset, &field.dims, field.capabilities);
    if axes.is_empty() {
        return Ok(None);
    }
    reduce_along(field, &axes).map(Some)
}

fn reduce_along(field: &GriddedField, axes: &[usize]) -> Result<GriddedField, PipelineError> {
    let data = masked_mean_over_axes(&field.data, axes, field.fill_value)?;
    let dims = field
        .dims
        .iter()
        .enumerate()
        .filter(|(i, _)| !axes.contains(i))
        .map(|(_, d)| d.clone())
        .collect();
    let mut reduced = GriddedField::new(field.name.clone(), dims, data)
        .with_metadata(field.units.clone(), field.long_name.clone());
    reduced.fill_value = field.fill_value;
    Ok(reduced)
}

/// Replace every field by its zonal and time mean (or time mean, for
/// fields without longitude). Fields with neither axis are left as they
/// are and their names returned.
pub fn reduce_to_zonal_time_mean(dataset: &mut Dataset) -> Result<Vec<String>, PipelineError> {
    let mut untouched = Vec::new();
    for name in dataset.field_names() {
        let reduced = match dataset.field(&name) {
            Some(field) => reduce_field(dataset, field)?,
            None => continue,
        };
        match reduced {
            Some(field) => dataset.insert_field(field)?,
            None => {
                info!("{} is already a time mean and zonal mean", name);
                untouched.push(name);
            }
        }
    }
    dataset.drop_unused_axes();
    Ok(untouched)
}

/// Difference `new - old` of `fields` between two climatology files
pub fn compare_climatologies(
    old: &Path,
    new: &Path,
    fields: &[&str],
) -> Result<Dataset, PipelineError> {
    let old_ds = NetCDFReader::open(old)?.read_dataset()?;
    let new_ds = NetCDFReader::open(new)?.read_dataset()?;

    let mut diff = Dataset::new();
    for &name in fields {
        let context = "climatology comparison";
        let a = old_ds.require_field(name, context)?;
        let b = new_ds.require_field(name, context)?;
        if a.dims != b.dims {
            return Err(PipelineError::Shape(format!(
                "'{}' is on {:?} in {} but {:?} in {}",
                name,
                a.dims,
                old.display(),
                b.dims,
                new.display()
            )));
        }
        for dim in &b.dims {
            match (old_ds.axis(dim), new_ds.axis(dim)) {
                (Some(x), Some(y)) if x.agrees_with(y) => diff.add_axis(y.clone())?,
                _ => {
                    return Err(PipelineError::Shape(format!(
                        "axis '{}' differs between {} and {}",
                        dim,
                        old.display(),
                        new.display()
                    )))
                }
            }
        }
        let data = combine(&b.data, &a.data, b.fill_value, |n, o| n - o)?;
        let mut field = GriddedField::new(name, b.dims.clone(), data)
            .with_metadata(b.units.clone(), format!("{} (difference)", b.long_name));
        field.fill_value = b.fill_value;
        diff.insert_field(field)?;
    }
    diff.set_global_attribute("source_old", old.display().to_string());
    diff.set_global_attribute("source_new", new.display().to_string());
    Ok(diff)
}

/// Write through a temporary sibling, renamed into place once complete
fn temporary_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

/// Run `write` against a temporary sibling of `path`, renamed into place
/// on success and removed on failure
fn write_atomically<T>(
    path: &Path,
    write: impl FnOnce(&Path) -> Result<T, PipelineError>,
) -> Result<T, PipelineError> {
    let tmp = temporary_path(path);
    match write(&tmp) {
        Ok(value) => {
            std::fs::rename(&tmp, path).map_err(DataAccessError::from)?;
            Ok(value)
        }
        Err(e) => {
            if tmp.exists() {
                if let Err(rm) = std::fs::remove_file(&tmp) {
                    warn!("could not remove {}: {}", tmp.display(), rm);
                }
            }
            Err(e)
        }
    }
}

/// Computes eddy terms and climatologies for one run
pub struct ClimatologyReducer<D: EddyFluxDecomposer = ZonalTimeDecomposition> {
    decomposer: D,
    chunking: ChunkPolicy,
    fill_value: f64,
}

impl ClimatologyReducer<ZonalTimeDecomposition> {
    pub fn new(config: &PipelineConfig) -> Self {
        Self::with_decomposer(ZonalTimeDecomposition, config)
    }
}

impl<D: EddyFluxDecomposer> ClimatologyReducer<D> {
    pub fn with_decomposer(decomposer: D, config: &PipelineConfig) -> Self {
        Self {
            decomposer,
            chunking: config.chunking,
            fill_value: config.constants.fill_value,
        }
    }

    fn transient_field(
        &self,
        dataset: &Dataset,
        spec: &EddyFluxSpec,
    ) -> Result<GriddedField, PipelineError> {
        let product = dataset.require_field(spec.product, "eddy flux terms")?;
        let terms = self
            .decomposer
            .get_flux_terms(dataset, spec.field_a, spec.field_b, product)?;
        let mut field = terms.transient_eddy;
        field.name = spec.target.to_string();
        field.units = spec.units.to_string();
        field.long_name = spec.long_name.to_string();
        field.fill_value = self.fill_value;
        Ok(field)
    }

    /// Add the transient eddy fluxes to an in-memory dataset holding the
    /// full time series, dropping the product fields they consume.
    pub fn compute_eddy_terms(&self, dataset: &mut Dataset) -> Result<Vec<String>, PipelineError> {
        let fields = EDDY_FLUX_SPECS
            .iter()
            .map(|spec| self.transient_field(dataset, spec))
            .collect::<Result<Vec<_>, _>>()?;
        let mut added = Vec::with_capacity(fields.len());
        for field in fields {
            added.push(field.name.clone());
            dataset.insert_field(field)?;
        }
        for spec in EDDY_FLUX_SPECS {
            dataset.remove_field(spec.product);
        }
        Ok(added)
    }

    /// Eddy-augmented copy of an aggregated run: every field but the
    /// products streamed file by file into `output`, then the eddy fluxes
    /// computed level chunk by level chunk and appended.
    pub fn compute_eddy_terms_aggregated(
        &self,
        aggregated: &MultiFileDataset,
        output: &Path,
    ) -> Result<PathBuf, PipelineError> {
        if aggregated.files().iter().any(|f| f == output) {
            return Err(DataAccessError::ProtectedPath(output.to_path_buf()).into());
        }
        let mut needed: Vec<&str> = Vec::new();
        for spec in EDDY_FLUX_SPECS {
            for name in [spec.field_a, spec.field_b, spec.product] {
                if !aggregated.contains_field(name) {
                    return Err(PipelineError::missing_field(name, "eddy flux terms"));
                }
                if !needed.contains(&name) {
                    needed.push(name);
                }
            }
        }
        let products: Vec<&str> = EDDY_FLUX_SPECS.iter().map(|s| s.product).collect();

        write_atomically(output, |tmp| {
            let mut writer =
                StreamingWriter::create(tmp, aggregated.axes(), aggregated.global_attributes())?;
            for info in aggregated.field_infos() {
                if products.contains(&info.name.as_str()) {
                    continue;
                }
                debug!("copying {}", info.name);
                aggregated.stream_field(&info.name, &info.name, &mut writer)?;
            }

            // Output dims: the product's, less time and longitude.
            let mut target_dims = Vec::with_capacity(EDDY_FLUX_SPECS.len());
            for spec in EDDY_FLUX_SPECS {
                let dims: Vec<String> = aggregated
                    .field_info(spec.product)
                    .map(|info| {
                        info.dims
                            .iter()
                            .filter(|d| {
                                !matches!(
                                    aggregated.axis(d.as_str()).map(|a| a.kind),
                                    Some(AxisKind::Time) | Some(AxisKind::Longitude)
                                )
                            })
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default();
                writer.define_field(spec.target, &dims, spec.units, spec.long_name, self.fill_value)?;
                target_dims.push(dims);
            }

            let level_name = aggregated.level_axis().map(|a| a.name.clone());
            for levels in aggregated.level_chunks() {
                info!("eddy terms for levels {:?}", levels);
                let chunk = aggregated.read_chunk_dataset(&needed, levels.clone())?;
                for (spec, dims) in EDDY_FLUX_SPECS.iter().zip(&target_dims) {
                    let field = self.transient_field(&chunk, spec)?;
                    let ranges = slab_ranges(dims, field.shape(), level_name.as_deref(), &levels);
                    writer.put_slab(spec.target, &ranges, &field.data)?;
                }
            }
            Ok(())
        })?;
        info!("wrote eddy-augmented dataset {}", output.display());
        Ok(output.to_path_buf())
    }

    /// Zonal/time mean climatology of a file, computed level chunk by
    /// level chunk. Returns the names of fields copied unreduced.
    pub fn reduce_file(&self, input: &Path, output: &Path) -> Result<Vec<String>, PipelineError> {
        if input == output {
            return Err(DataAccessError::ProtectedPath(output.to_path_buf()).into());
        }
        let reader = NetCDFReader::open(input)?;
        let mut grid = Dataset::new();
        for axis in reader.read_axes()? {
            grid.add_axis(axis)?;
        }
        let infos = reader
            .variable_names()
            .iter()
            .map(|name| reader.field_info(name))
            .collect::<Result<Vec<_>, _>>()?;

        // Output layout from each field's capability tag.
        let out_dims: Vec<Vec<String>> = infos
            .iter()
            .map(|info| {
                let caps = FieldCapabilities::from_kinds(
                    info.dims.iter().filter_map(|d| grid.axis(d)).map(|a| a.kind),
                );
                let reduced = reduction_axes(&grid, &info.dims, caps);
                info.dims
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| !reduced.contains(i))
                    .map(|(_, d)| d.clone())
                    .collect()
            })
            .collect();
        let kept_axes: Vec<Axis> = grid
            .axes()
            .iter()
            .filter(|a| out_dims.iter().any(|dims| dims.contains(&a.name)))
            .cloned()
            .collect();

        let level = grid
            .axes()
            .iter()
            .find(|a| {
                a.kind == AxisKind::Level && infos.iter().any(|f| f.dims.contains(&a.name))
            })
            .map(|a| (a.name.clone(), a.len()));
        let level_name = level.as_ref().map(|(name, _)| name.as_str());

        let untouched = write_atomically(output, |tmp| {
            let mut untouched = Vec::new();
            let mut writer = StreamingWriter::create(tmp, &kept_axes, &reader.global_attributes())?;
            for (info, dims) in infos.iter().zip(&out_dims) {
                writer.define_field(&info.name, dims, &info.units, &info.long_name, self.fill_value)?;
                if dims.len() == info.dims.len() {
                    info!("{} is already a time mean and zonal mean", info.name);
                    untouched.push(info.name.clone());
                }

                let chunks: Vec<Option<Range<usize>>> = match &level {
                    Some((name, len)) if info.dims.contains(name) => {
                        self.chunking.level_ranges(*len).into_iter().map(Some).collect()
                    }
                    _ => vec![None],
                };
                for levels in chunks {
                    let field = match (&levels, level_name) {
                        (Some(range), Some(name)) => {
                            reader.read_field_slab(&info.name, name, range.clone())?
                        }
                        _ => reader.read_field(&info.name)?,
                    };
                    let chunk = chunk_grid(&grid, level_name, &levels, field)?;
                    let field = chunk.require_field(&info.name, "climatology")?;
                    let reduced = reduce_field(&chunk, field)?;
                    let out = reduced.as_ref().unwrap_or(field);
                    let ranges = slab_ranges(dims, out.shape(), level_name, &levels);
                    writer.put_slab(&info.name, &ranges, &out.data)?;
                }
            }
            Ok(untouched)
        })?;
        info!("wrote climatology {}", output.display());
        Ok(untouched)
    }
}

/// Dataset holding one level chunk of `field` on `grid`, so the field
/// carries the capability tag of its axes
fn chunk_grid(
    grid: &Dataset,
    level_name: Option<&str>,
    levels: &Option<Range<usize>>,
    field: GriddedField,
) -> Result<Dataset, PipelineError> {
    let mut chunk = Dataset::new();
    for axis in grid.axes() {
        if !field.dims.contains(&axis.name) {
            continue;
        }
        let axis = match (levels, level_name) {
            (Some(range), Some(name)) if axis.name == name => axis.slice(range.clone()),
            _ => axis.clone(),
        };
        chunk.add_axis(axis)?;
    }
    chunk.insert_field(field)?;
    Ok(chunk)
}

/// Hyperslab of `dims` a chunk result of `shape` goes to: the chunk's
/// levels along the level axis, everything along the others.
fn slab_ranges(
    dims: &[String],
    shape: &[usize],
    level_name: Option<&str>,
    levels: &Option<Range<usize>>,
) -> Vec<Range<usize>> {
    dims.iter()
        .zip(shape)
        .map(|(dim, &n)| match (levels, level_name) {
            (Some(range), Some(level)) if dim == level => range.clone(),
            _ => 0..n,
        })
        .collect()
}

/// Write a comparison dataset
pub fn write_comparison(diff: &Dataset, output: &Path) -> Result<(), PipelineError> {
    NetCDFWriter::new(output).write_dataset(diff)?;
    info!("wrote climatology difference {}", output.display());
    Ok(())
}
