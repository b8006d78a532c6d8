use crate::data_io::FILL_VALUE;
use crate::error::PipelineError;
use clap::{Arg, ArgAction, ArgMatches};
use std::ops::Range;
use std::path::{Path, PathBuf};

/// Environment variable holding the root of the model output archive.
pub const GFDL_DATA_ENV: &str = "GFDL_DATA";

/// Experiment tags processed when none are given on the command line.
pub const DEFAULT_RUN_TAGS: &[&str] = &[
    "_m40",
    "_m20",
    "_zero",
    "_p20",
    "_p40",
    "",
    "_m40_4CO2",
    "_m20_4CO2",
    "_zero_4CO2",
    "_p20_4CO2",
    "_p40_4CO2",
];

/// Physical constants and unit factors used by the normalizer
#[derive(Clone, Debug)]
pub struct Constants {
    /// Latent heat of condensation (J/kg)
    pub latent_heat_cond: f64,
    /// Seconds per day, mass flux (kg/m2/s) to mm/day
    pub seconds_per_day: f64,
    /// Fill value written for every persisted field
    pub fill_value: f64,
}

impl Default for Constants {
    fn default() -> Self {
        Self {
            latent_heat_cond: 2.5e6,
            seconds_per_day: 60.0 * 60.0 * 24.0,
            fill_value: FILL_VALUE,
        }
    }
}

/// File naming conventions of the raw archive and of our outputs
#[derive(Clone, Debug)]
pub struct FileNames {
    pub raw_monthly: String,
    pub raw_daily: String,
    /// Written per month directory, and as the eddy-augmented run file
    pub normalized_monthly: String,
    /// Stem of the daily outputs (`{stem}.nc`, `{stem}_{var}.nc`)
    pub normalized_daily_stem: String,
    pub climatology: String,
    pub climatology_diff: String,
    pub stage_marker: String,
}

impl Default for FileNames {
    fn default() -> Self {
        Self {
            raw_monthly: "atmos_monthly_interp_all.nc".to_string(),
            raw_daily: "atmos_daily_interp_all.nc".to_string(),
            normalized_monthly: "itcz-mip_control_monthly.nc".to_string(),
            normalized_daily_stem: "itcz-mip_control_daily".to_string(),
            climatology: "itcz-mip_zm_clim.nc".to_string(),
            climatology_diff: "itcz-mip_zm_clim_diff.nc".to_string(),
            stage_marker: ".itcz_stage.json".to_string(),
        }
    }
}

/// How many vertical levels are held in memory at once when a stage
/// needs the full time series.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkPolicy {
    pub level_chunk: usize,
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self { level_chunk: 1 }
    }
}

impl ChunkPolicy {
    /// Split `0..n_levels` into consecutive ranges of at most `level_chunk`.
    pub fn level_ranges(&self, n_levels: usize) -> Vec<Range<usize>> {
        let step = self.level_chunk.max(1);
        (0..n_levels)
            .step_by(step)
            .map(|start| start..(start + step).min(n_levels))
            .collect()
    }
}

/// Configuration handed to every pipeline component at construction
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Root data directory (normally `$GFDL_DATA`)
    pub base_path: PathBuf,
    /// Experiment name, the run tag is appended to it
    pub experiment_name: String,
    pub run_tags: Vec<String>,
    /// Month directory prefix, `run0024` etc.
    pub run_label: String,
    /// Months processed; the first 24 months are spin-up
    pub month_range: Range<u32>,
    pub chunking: ChunkPolicy,
    pub files: FileNames,
    pub constants: Constants,
    /// 1 = sequential month loop
    pub num_threads: usize,
    /// Emit a progress line for months divisible by this
    pub progress_interval: u32,
    /// Log the area-weighted radiation budget of each normalized month
    pub check_radiation: bool,
}

impl PipelineConfig {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            experiment_name: "ITCZ-MIP_aqua_sst_soc_low_res_take3".to_string(),
            run_tags: DEFAULT_RUN_TAGS.iter().map(|t| t.to_string()).collect(),
            run_label: "run".to_string(),
            month_range: 24..384,
            chunking: ChunkPolicy::default(),
            files: FileNames::default(),
            constants: Constants::default(),
            num_threads: 1,
            progress_interval: 20,
            check_radiation: false,
        }
    }

    /// Build the default configuration rooted at `$GFDL_DATA`.
    pub fn from_env() -> Result<Self, PipelineError> {
        let base = std::env::var(GFDL_DATA_ENV).map_err(|_| {
            PipelineError::Configuration(format!(
                "environment variable {} is not set",
                GFDL_DATA_ENV
            ))
        })?;
        Ok(Self::new(base))
    }

    /// Build the configuration from parsed command line arguments.
    ///
    /// `--base-path` takes precedence over `$GFDL_DATA`.
    pub fn from_matches(matches: &ArgMatches) -> Result<Self, PipelineError> {
        let mut config = match matches.get_one::<String>("base-path") {
            Some(path) => Self::new(path),
            None => Self::from_env()?,
        };

        if let Some(name) = matches.get_one::<String>("experiment") {
            config.experiment_name = name.clone();
        }
        if let Some(tags) = matches.get_many::<String>("run-tag") {
            config.run_tags = tags.cloned().collect();
        }
        let start = matches
            .get_one::<u32>("start")
            .copied()
            .unwrap_or(config.month_range.start);
        let end = matches
            .get_one::<u32>("end")
            .copied()
            .unwrap_or(config.month_range.end);
        config.month_range = start..end;
        if let Some(&chunk) = matches.get_one::<usize>("level-chunk") {
            config.chunking.level_chunk = chunk;
        }
        if let Some(&threads) = matches.get_one::<usize>("threads") {
            config.num_threads = threads;
        }
        config.check_radiation = matches.get_flag("check-radiation");

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.month_range.start >= self.month_range.end {
            return Err(PipelineError::Configuration(format!(
                "empty month range {}..{}",
                self.month_range.start, self.month_range.end
            )));
        }
        if self.chunking.level_chunk == 0 {
            return Err(PipelineError::Configuration(
                "level chunk must be at least 1".to_string(),
            ));
        }
        if self.num_threads == 0 {
            return Err(PipelineError::Configuration(
                "thread count must be at least 1".to_string(),
            ));
        }
        if !self.base_path.is_dir() {
            return Err(PipelineError::Configuration(format!(
                "data directory does not exist: {}",
                self.base_path.display()
            )));
        }
        Ok(())
    }

    /// `{base}/{experiment_name}{run_tag}`
    pub fn run_dir(&self, run_tag: &str) -> PathBuf {
        self.base_path
            .join(format!("{}{}", self.experiment_name, run_tag))
    }

    /// `{run_dir}/{run_label}{month:04}`
    pub fn month_dir(&self, run_tag: &str, month: u32) -> PathBuf {
        month_dir(&self.run_dir(run_tag), &self.run_label, month)
    }
}

/// Month directory inside a run directory
pub fn month_dir(run_dir: &Path, run_label: &str, month: u32) -> PathBuf {
    run_dir.join(format!("{}{:04}", run_label, month))
}

/// Arguments shared by every subcommand.
pub fn pipeline_args() -> Vec<Arg> {
    vec![
        Arg::new("base-path")
            .long("base-path")
            .value_name("DIR")
            .help("Root data directory (defaults to $GFDL_DATA)")
            .global(true),
        Arg::new("experiment")
            .long("experiment")
            .value_name("NAME")
            .help("Experiment name, run tags are appended to it")
            .global(true),
        Arg::new("run-tag")
            .long("run-tag")
            .value_name("TAG")
            .help("Run tag to process (repeatable, defaults to the full experiment list)")
            .action(ArgAction::Append)
            .allow_hyphen_values(true)
            .global(true),
        Arg::new("start")
            .long("start")
            .value_name("MONTH")
            .help("First month (inclusive)")
            .value_parser(clap::value_parser!(u32))
            .global(true),
        Arg::new("end")
            .long("end")
            .value_name("MONTH")
            .help("Last month (exclusive)")
            .value_parser(clap::value_parser!(u32))
            .global(true),
        Arg::new("level-chunk")
            .long("level-chunk")
            .value_name("LEVELS")
            .help("Vertical levels held in memory at once")
            .value_parser(clap::value_parser!(usize))
            .global(true),
        Arg::new("threads")
            .short('j')
            .long("threads")
            .value_name("COUNT")
            .help("Worker threads for per-month normalization")
            .value_parser(clap::value_parser!(usize))
            .global(true),
        Arg::new("check-radiation")
            .long("check-radiation")
            .help("Log the radiation budget of each normalized month")
            .action(ArgAction::SetTrue)
            .global(true),
        Arg::new("verbose")
            .short('v')
            .long("verbose")
            .help("Increase log verbosity")
            .action(ArgAction::Count)
            .global(true),
    ]
}
