//! Walks the month directories of one run.

use crate::config::PipelineConfig;
use crate::data_io::common::guard_protected;
use crate::data_io::utils::DAILY_3D_FIELDS;
use crate::data_io::{MultiFileDataset, NetCDFReader, NetCDFWriter, StreamingWriter};
use crate::error::PipelineError;
use crate::normalize::CmipNormalizer;
use std::ops::Range;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, error, info};

/// One run of an experiment: `{base}/{experiment}{run_tag}/run{month:04}/`
#[derive(Debug, Clone)]
pub struct RunCorpus {
    config: PipelineConfig,
    run_tag: String,
    normalizer: CmipNormalizer,
}

impl RunCorpus {
    pub fn new(config: &PipelineConfig, run_tag: &str) -> Result<Self, PipelineError> {
        let normalizer = CmipNormalizer::new(config.constants.clone())?
            .with_radiation_check(config.check_radiation);
        Ok(Self {
            config: config.clone(),
            run_tag: run_tag.to_string(),
            normalizer,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn run_tag(&self) -> &str {
        &self.run_tag
    }

    pub fn run_dir(&self) -> PathBuf {
        self.config.run_dir(&self.run_tag)
    }

    pub fn month_file(&self, month: u32, file_name: &str) -> PathBuf {
        self.config.month_dir(&self.run_tag, month).join(file_name)
    }

    /// `file_name` in every month directory of `months`, in order
    pub fn monthly_files(&self, file_name: &str, months: Range<u32>) -> Vec<PathBuf> {
        months.map(|m| self.month_file(m, file_name)).collect()
    }

    /// Normalize one month's raw file into its CMIP-named sibling.
    ///
    /// The raw file is only ever opened read-only, and the output path may
    /// not name it.
    pub fn normalize_month(&self, month: u32) -> Result<PathBuf, PipelineError> {
        let files = &self.config.files;
        let raw = self.month_file(month, &files.raw_monthly);
        let out = self.month_file(month, &files.normalized_monthly);
        guard_protected(&out, &raw)?;

        let mut dataset = {
            let reader = NetCDFReader::open(&raw)?;
            debug!("reading {}", reader.path().display());
            reader.read_dataset()?
        };
        self.normalizer
            .normalize_monthly(&mut dataset)
            .map_err(|e| e.in_context(format!("month {}", month)))?;
        NetCDFWriter::new(&out).write_dataset(&dataset)?;

        if self.config.progress_interval > 0 && month % self.config.progress_interval == 0 {
            info!("{}: current month is {}", self.run_tag, month);
        }
        debug!("normalized {}", out.display());
        Ok(out)
    }

    /// Normalize `months` in increasing order, stopping at the first failure.
    /// Months already written stay on disk.
    pub fn normalize_range(&self, months: Range<u32>) -> Result<Vec<PathBuf>, PipelineError> {
        let start = Instant::now();
        let mut written = Vec::with_capacity(months.len());
        for month in months.clone() {
            match self.normalize_month(month) {
                Ok(path) => written.push(path),
                Err(e) => {
                    error!("{}: month {} failed: {}", self.run_tag, month, e);
                    return Err(e);
                }
            }
        }
        info!(
            "{}: normalized months {}..{} in {:.1}s",
            self.run_tag,
            months.start,
            months.end,
            start.elapsed().as_secs_f64()
        );
        Ok(written)
    }

    /// Open `file_name` of every month in `months` as one dataset along
    /// time, read level chunk by level chunk per the configured policy.
    ///
    /// Every file is checked before any is read; a missing month fails
    /// with `DataAccess`.
    pub fn aggregate_months(
        &self,
        file_name: &str,
        months: Range<u32>,
    ) -> Result<MultiFileDataset, PipelineError> {
        let files = self.monthly_files(file_name, months);
        let dataset = MultiFileDataset::open(files)?.with_chunking(self.config.chunking);
        Ok(dataset)
    }

    /// Daily output: each 3-D field to its own file, then the surface
    /// fields, normalized, to one file. All in the run directory.
    pub fn run_daily(&self) -> Result<Vec<PathBuf>, PipelineError> {
        let files = &self.config.files;
        let daily =
            self.aggregate_months(&files.raw_daily, self.config.month_range.clone())?;
        for (_, model_name) in DAILY_3D_FIELDS {
            if !daily.contains_field(model_name) {
                return Err(PipelineError::missing_field(*model_name, "daily 3-D fields"));
            }
        }

        let run_dir = self.run_dir();
        let mut written = Vec::new();
        for (cmip_name, model_name) in DAILY_3D_FIELDS {
            info!("{}: writing daily {}", self.run_tag, cmip_name);
            let out = run_dir.join(format!("{}_{}.nc", files.normalized_daily_stem, cmip_name));
            let axes: Vec<_> = match daily.field_info(model_name) {
                Some(info) => daily
                    .axes()
                    .iter()
                    .filter(|a| info.dims.contains(&a.name))
                    .cloned()
                    .collect(),
                None => Vec::new(),
            };
            let mut writer = StreamingWriter::create(&out, &axes, daily.global_attributes())?;
            daily.stream_field(model_name, cmip_name, &mut writer)?;
            written.push(out);
        }

        let surface_names: Vec<String> = daily
            .field_names()
            .into_iter()
            .filter(|name| !daily.has_level(name))
            .collect();
        let names: Vec<&str> = surface_names.iter().map(String::as_str).collect();
        let mut surface = daily.load_fields(&names)?;
        self.normalizer.normalize_daily_surface(&mut surface)?;
        surface.drop_unused_axes();

        let out = run_dir.join(format!("{}.nc", files.normalized_daily_stem));
        NetCDFWriter::new(&out).write_dataset(&surface)?;
        info!("{}: finished daily data", self.run_tag);
        written.push(out);
        Ok(written)
    }
}
