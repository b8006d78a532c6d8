//! Per-run stage state machine with a JSON marker in the run directory.

use crate::climatology::ClimatologyReducer;
use crate::config::PipelineConfig;
use crate::corpus::RunCorpus;
use crate::data_io::DataAccessError;
use crate::error::PipelineError;
use crate::parallel::normalize_range_with;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Raw,
    Normalized,
    Aggregated,
    EddyAugmented,
    Climatology,
}

impl RunStage {
    pub const ALL: [RunStage; 5] = [
        RunStage::Raw,
        RunStage::Normalized,
        RunStage::Aggregated,
        RunStage::EddyAugmented,
        RunStage::Climatology,
    ];

    pub fn next(self) -> Option<RunStage> {
        Self::ALL.iter().copied().find(|s| *s > self)
    }

    /// Stage that must be complete before this one can run
    pub fn prerequisite(self) -> Option<RunStage> {
        Self::ALL.iter().copied().rev().find(|s| *s < self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStage::Raw => "raw",
            RunStage::Normalized => "normalized",
            RunStage::Aggregated => "aggregated",
            RunStage::EddyAugmented => "eddy_augmented",
            RunStage::Climatology => "climatology",
        }
    }
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStage {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .iter()
            .copied()
            .find(|stage| stage.as_str() == key)
            .ok_or_else(|| PipelineError::Stage(format!("unknown stage '{}'", s)))
    }
}

/// Contents of the marker file: the last stage completed for a run and
/// the month range it was completed over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageMarker {
    pub stage: RunStage,
    pub run_tag: String,
    pub month_start: u32,
    pub month_end: u32,
    /// RFC 3339 completion time
    pub updated: String,
}

impl StageMarker {
    pub fn new(stage: RunStage, run_tag: &str, config: &PipelineConfig) -> Self {
        Self {
            stage,
            run_tag: run_tag.to_string(),
            month_start: config.month_range.start,
            month_end: config.month_range.end,
            updated: Utc::now().to_rfc3339(),
        }
    }

    /// `None` if no marker has been written yet
    pub fn load(path: &Path) -> Result<Option<Self>, PipelineError> {
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(path).map_err(DataAccessError::from)?;
        Ok(Some(serde_json::from_str(&text)?))
    }

    /// Written to a sibling and renamed, so a marker is never half written
    pub fn save(&self, path: &Path) -> Result<(), PipelineError> {
        let text = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, text).map_err(DataAccessError::from)?;
        std::fs::rename(&tmp, path).map_err(DataAccessError::from)?;
        Ok(())
    }
}

/// Drives one run through its stages, resuming from the marker.
pub struct RunPipeline {
    corpus: RunCorpus,
    reducer: ClimatologyReducer,
}

impl RunPipeline {
    pub fn new(config: &PipelineConfig, run_tag: &str) -> Result<Self, PipelineError> {
        Ok(Self {
            corpus: RunCorpus::new(config, run_tag)?,
            reducer: ClimatologyReducer::new(config),
        })
    }

    pub fn corpus(&self) -> &RunCorpus {
        &self.corpus
    }

    fn config(&self) -> &PipelineConfig {
        self.corpus.config()
    }

    pub fn marker_path(&self) -> PathBuf {
        self.corpus.run_dir().join(&self.config().files.stage_marker)
    }

    /// Full time series with eddy terms, in the run directory
    pub fn eddy_augmented_path(&self) -> PathBuf {
        self.corpus.run_dir().join(&self.config().files.normalized_monthly)
    }

    pub fn climatology_path(&self) -> PathBuf {
        self.corpus.run_dir().join(&self.config().files.climatology)
    }

    /// Last completed stage; `Raw` without a marker. A marker written for
    /// another run tag or month range is an error.
    pub fn current_stage(&self) -> Result<RunStage, PipelineError> {
        let Some(marker) = StageMarker::load(&self.marker_path())? else {
            return Ok(RunStage::Raw);
        };
        let range = &self.config().month_range;
        if marker.run_tag != self.corpus.run_tag() {
            return Err(PipelineError::Stage(format!(
                "marker {} belongs to run '{}'",
                self.marker_path().display(),
                marker.run_tag
            )));
        }
        if marker.month_start != range.start || marker.month_end != range.end {
            return Err(PipelineError::Stage(format!(
                "{} was reached for months {}..{}, not {}..{}",
                marker.stage, marker.month_start, marker.month_end, range.start, range.end
            )));
        }
        Ok(marker.stage)
    }

    /// Run a single stage. Its prerequisite must be complete; afterwards the
    /// marker records this stage, so any later stage has to be rerun.
    pub fn run_stage(&self, stage: RunStage) -> Result<(), PipelineError> {
        let prerequisite = stage.prerequisite().unwrap_or(RunStage::Raw);
        // Normalization starts from the raw files, so it ignores any marker.
        if prerequisite > RunStage::Raw {
            let current = self.current_stage()?;
            if current < prerequisite {
                return Err(PipelineError::Stage(format!(
                    "{} needs {} to be complete, run '{}' is at {}",
                    stage,
                    prerequisite,
                    self.corpus.run_tag(),
                    current
                )));
            }
        }

        let start = Instant::now();
        info!("{}: running {} stage", self.corpus.run_tag(), stage);
        let config = self.config();
        let months = config.month_range.clone();
        match stage {
            RunStage::Raw => {
                return Err(PipelineError::Stage(
                    "the raw stage cannot be run".to_string(),
                ))
            }
            RunStage::Normalized => {
                normalize_range_with(&self.corpus, months, config.num_threads)?;
            }
            RunStage::Aggregated => {
                let aggregated = self
                    .corpus
                    .aggregate_months(&config.files.normalized_monthly, months)?;
                info!(
                    "{}: {} monthly files, {} fields, {} time steps",
                    self.corpus.run_tag(),
                    aggregated.files().len(),
                    aggregated.field_infos().len(),
                    aggregated.time_axis().map(|t| t.len()).unwrap_or(0)
                );
            }
            RunStage::EddyAugmented => {
                let aggregated = self
                    .corpus
                    .aggregate_months(&config.files.normalized_monthly, months)?;
                self.reducer
                    .compute_eddy_terms_aggregated(&aggregated, &self.eddy_augmented_path())?;
            }
            RunStage::Climatology => {
                self.reducer
                    .reduce_file(&self.eddy_augmented_path(), &self.climatology_path())?;
            }
        }

        StageMarker::new(stage, self.corpus.run_tag(), config).save(&self.marker_path())?;
        info!(
            "{}: {} stage done in {:.1}s",
            self.corpus.run_tag(),
            stage,
            start.elapsed().as_secs_f64()
        );
        Ok(())
    }

    /// Run every stage after the current one up to and including `target`.
    /// Returns the stages actually run.
    pub fn advance_to(&self, target: RunStage) -> Result<Vec<RunStage>, PipelineError> {
        let current = self.current_stage()?;
        if current >= target {
            info!(
                "{}: already at {}, nothing to do for {}",
                self.corpus.run_tag(),
                current,
                target
            );
            return Ok(Vec::new());
        }
        let mut ran = Vec::new();
        let mut next = current.next();
        while let Some(stage) = next.filter(|s| *s <= target) {
            self.run_stage(stage)?;
            ran.push(stage);
            next = stage.next();
        }
        debug!("{}: ran {:?}", self.corpus.run_tag(), ran);
        Ok(ran)
    }

    /// Normalize every month of the run from the raw files
    pub fn normalize(&self) -> Result<(), PipelineError> {
        self.run_stage(RunStage::Normalized)
    }

    /// Eddy-augmented dataset, aggregating first if the run is only
    /// normalized
    pub fn eddy_terms(&self) -> Result<(), PipelineError> {
        if self.current_stage()? == RunStage::Normalized {
            self.run_stage(RunStage::Aggregated)?;
        }
        self.run_stage(RunStage::EddyAugmented)
    }

    pub fn climatology(&self) -> Result<(), PipelineError> {
        self.run_stage(RunStage::Climatology)
    }

    /// Daily outputs; independent of the monthly stages
    pub fn daily(&self) -> Result<Vec<PathBuf>, PipelineError> {
        let written = self.corpus.run_daily()?;
        info!("{}: wrote {} daily files", self.corpus.run_tag(), written.len());
        Ok(written)
    }
}

/// Apply `job` to the pipeline of every configured run tag in turn,
/// stopping at the first failure.
pub fn for_each_run(
    config: &PipelineConfig,
    job: impl Fn(&RunPipeline) -> Result<(), PipelineError>,
) -> Result<(), PipelineError> {
    for tag in &config.run_tags {
        info!("processing run {}{}", config.experiment_name, tag);
        let result = RunPipeline::new(config, tag).and_then(|pipeline| job(&pipeline));
        if let Err(e) = result {
            if e.is_missing_input() {
                warn!("run '{}' is incomplete", tag);
            }
            return Err(e.in_context(format!("run '{}'", tag)));
        }
    }
    Ok(())
}
