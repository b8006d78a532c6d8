mod common;

use common::*;
use itcz_postproc::climatology::compare_climatologies;
use itcz_postproc::corpus::RunCorpus;
use itcz_postproc::data_io::{DataAccessError, NetCDFReader, NetCDFWriter};
use itcz_postproc::parallel::normalize_range_parallel;
use itcz_postproc::stage::{for_each_run, RunPipeline, RunStage, StageMarker};
use itcz_postproc::PipelineError;
use tempfile::tempdir;

const SECONDS_PER_DAY: f64 = 86400.0;

#[test]
fn test_two_month_normalization() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path(), 24..26);
    write_raw_run(&config, RUN_TAG);

    let corpus = RunCorpus::new(&config, RUN_TAG).unwrap();
    let written = corpus.normalize_range(24..26).unwrap();
    assert_eq!(written.len(), 2);
    assert_eq!(
        written[1],
        config.month_dir(RUN_TAG, 25).join("itcz-mip_control_monthly.nc")
    );

    let ds = NetCDFReader::open(&written[0]).unwrap().read_dataset().unwrap();
    for name in ["ua", "va", "ta", "hus", "ts", "hfls", "pr", "prc", "evspsbl"] {
        assert!(ds.contains_field(name), "{} missing", name);
    }
    for name in [
        "ucomp",
        "temp",
        "precipitation",
        "condensation_rain",
        "t_surf",
        "time_bounds",
        "zsurf",
    ] {
        assert!(!ds.contains_field(name), "{} not dropped", name);
    }
    assert!(ds.axis("nv").is_none());
    // products stay for the eddy terms
    assert!(ds.contains_field("ucomp_vcomp"));

    let value = |name: &str| ds.field(name).unwrap().data.iter().copied().next().unwrap();
    assert_close(value("pr"), PRECIP * SECONDS_PER_DAY);
    assert_close(value("prc"), (PRECIP - LARGE_SCALE_PRECIP) * SECONDS_PER_DAY);
    assert_close(value("evspsbl"), LATENT_HEAT_FLUX / 2.5e6 * SECONDS_PER_DAY);

    let prc = ds.field("prc").unwrap();
    assert_eq!(prc.units, "mm/day");
    assert_eq!(prc.long_name, "convective precipitation");
    assert_eq!(ds.field("evspsbl").unwrap().long_name, "evaporation");
    assert_eq!(ds.field("ta").unwrap().dims, vec!["time", "pfull", "lat", "lon"]);

    // raw output untouched
    let raw = NetCDFReader::open(config.month_dir(RUN_TAG, 24).join(&config.files.raw_monthly))
        .unwrap();
    assert!(raw.has_variable("precipitation"));
    assert!(!raw.has_variable("pr"));
}

#[test]
fn test_missing_month_writes_nothing() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path(), 24..27);
    let corpus = RunCorpus::new(&config, RUN_TAG).unwrap();
    for month in [24, 26] {
        write_raw_month(&config, RUN_TAG, month);
        corpus.normalize_month(month).unwrap();
    }

    let err = corpus
        .aggregate_months(&config.files.normalized_monthly, 24..27)
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::DataAccess(DataAccessError::FileNotFound(ref p)) if p.ends_with("run0025/itcz-mip_control_monthly.nc")
    ));

    let pipeline = RunPipeline::new(&config, RUN_TAG).unwrap();
    StageMarker::new(RunStage::Normalized, RUN_TAG, &config)
        .save(&pipeline.marker_path())
        .unwrap();
    let err = pipeline.advance_to(RunStage::EddyAugmented).unwrap_err();
    assert!(err.is_missing_input());
    assert!(!pipeline.eddy_augmented_path().exists());
    assert_eq!(pipeline.current_stage().unwrap(), RunStage::Normalized);
}

#[test]
fn test_normalization_stops_at_missing_month() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path(), 24..27);
    write_raw_month(&config, RUN_TAG, 24);
    write_raw_month(&config, RUN_TAG, 26);

    let corpus = RunCorpus::new(&config, RUN_TAG).unwrap();
    let err = corpus.normalize_range(24..27).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::DataAccess(DataAccessError::FileNotFound(_))
    ));
    let normalized = |m| config.month_dir(RUN_TAG, m).join(&config.files.normalized_monthly);
    assert!(normalized(24).exists());
    assert!(!normalized(26).exists());
}

#[test]
fn test_advance_to_climatology() {
    let dir = tempdir().unwrap();
    let mut config = test_config(dir.path(), 24..26);
    config.chunking.level_chunk = 2;
    write_raw_run(&config, RUN_TAG);

    let pipeline = RunPipeline::new(&config, RUN_TAG).unwrap();
    let ran = pipeline.advance_to(RunStage::Climatology).unwrap();
    assert_eq!(
        ran,
        vec![
            RunStage::Normalized,
            RunStage::Aggregated,
            RunStage::EddyAugmented,
            RunStage::Climatology
        ]
    );
    assert_eq!(pipeline.current_stage().unwrap(), RunStage::Climatology);

    let eddy = NetCDFReader::open(pipeline.eddy_augmented_path())
        .unwrap()
        .read_dataset()
        .unwrap();
    assert_eq!(eddy.axis("time").unwrap().len(), 2);
    for (name, units) in [("usvs", "m2/s2"), ("vsts", "m.K/s"), ("vsqs", "m.kg/s.kg")] {
        let field = eddy.field(name).unwrap();
        assert_eq!(field.dims, vec!["pfull", "lat"]);
        assert_eq!(field.units, units);
        assert!(field.data.iter().all(|v| v.is_finite() && v.abs() < 1e10));
    }
    for product in ["ucomp_vcomp", "vcomp_temp", "sphum_v"] {
        assert!(!eddy.contains_field(product));
    }
    assert_eq!(eddy.field("ua").unwrap().shape(), &[2, 3, 4, 2]);

    let clim = NetCDFReader::open(pipeline.climatology_path())
        .unwrap()
        .read_dataset()
        .unwrap();
    assert!(clim.axis("time").is_none());
    assert!(clim.axis("lon").is_none());
    let ta = clim.field("ta").unwrap();
    assert_eq!(ta.dims, vec!["pfull", "lat"]);
    for p in 0..LEVELS.len() {
        for y in 0..LATS.len() {
            assert_close(ta.data[[p, y]], 280.5 - 20.0 * p as f64 + y as f64);
        }
    }
    assert_eq!(clim.field("pr").unwrap().dims, vec!["lat"]);
    assert_eq!(clim.field("vsts").unwrap(), eddy.field("vsts").unwrap());

    assert!(pipeline.advance_to(RunStage::Climatology).unwrap().is_empty());
}

#[test]
fn test_rerun_invalidates_later_stages() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path(), 24..26);
    write_raw_run(&config, RUN_TAG);

    let pipeline = RunPipeline::new(&config, RUN_TAG).unwrap();
    pipeline.advance_to(RunStage::Aggregated).unwrap();
    pipeline.run_stage(RunStage::Normalized).unwrap();
    assert_eq!(pipeline.current_stage().unwrap(), RunStage::Normalized);
    assert!(matches!(
        pipeline.run_stage(RunStage::EddyAugmented),
        Err(PipelineError::Stage(_))
    ));
}

#[test]
fn test_parallel_matches_sequential() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path(), 24..28);
    write_raw_run(&config, "_seq");
    write_raw_run(&config, "_par");

    let sequential = RunCorpus::new(&config, "_seq").unwrap();
    let parallel = RunCorpus::new(&config, "_par").unwrap();
    let seq_files = sequential.normalize_range(24..28).unwrap();
    let par_files = normalize_range_parallel(&parallel, 24..28, 3).unwrap();
    assert_eq!(par_files.len(), 4);

    for (a, b) in seq_files.iter().zip(&par_files) {
        assert!(b.starts_with(parallel.run_dir()));
        let a = NetCDFReader::open(a).unwrap().read_dataset().unwrap();
        let b = NetCDFReader::open(b).unwrap().read_dataset().unwrap();
        assert_eq!(a.axes(), b.axes());
        assert_eq!(a.field_names(), b.field_names());
        for field in a.fields() {
            assert_eq!(Some(field), b.field(&field.name));
        }
    }
}

#[test]
fn test_parallel_reports_lowest_failing_month() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path(), 24..28);
    write_raw_month(&config, RUN_TAG, 24);
    write_raw_month(&config, RUN_TAG, 26);

    let corpus = RunCorpus::new(&config, RUN_TAG).unwrap();
    let err = normalize_range_parallel(&corpus, 24..28, 2).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::DataAccess(DataAccessError::FileNotFound(ref p)) if p.ends_with("run0025/atmos_monthly_interp_all.nc")
    ));
}

#[test]
fn test_daily_outputs() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path(), 24..26);
    for month in 24..26 {
        write_raw_daily(&config, RUN_TAG, month);
    }

    let corpus = RunCorpus::new(&config, RUN_TAG).unwrap();
    let written = corpus.run_daily().unwrap();
    assert_eq!(written.len(), 7);

    let ta = NetCDFReader::open(corpus.run_dir().join("itcz-mip_control_daily_ta.nc"))
        .unwrap()
        .read_dataset()
        .unwrap();
    assert_eq!(ta.field_names(), vec!["ta"]);
    let field = ta.field("ta").unwrap();
    assert_eq!(field.shape(), &[2 * DAILY_STEPS, 3, 4, 2]);
    assert_eq!(field.data[[0, 1, 2, 1]], temperature(0, 1, 2, 1));

    let surface = NetCDFReader::open(corpus.run_dir().join("itcz-mip_control_daily.nc"))
        .unwrap()
        .read_dataset()
        .unwrap();
    for name in ["pr", "prc", "evspsbl", "tas"] {
        assert!(surface.contains_field(name), "{} missing", name);
    }
    for name in ["hfls", "hfss", "ps", "condensation_rain", "time_bounds"] {
        assert!(!surface.contains_field(name), "{} not dropped", name);
    }
    assert!(surface.axis("pfull").is_none());
    assert_eq!(surface.axis("time").unwrap().len(), 2 * DAILY_STEPS);
}

#[test]
fn test_compare_runs() {
    let dir = tempdir().unwrap();
    let old = dir.path().join("old.nc");
    let new = dir.path().join("new.nc");

    let mut clim = monthly_dataset(24);
    itcz_postproc::climatology::reduce_to_zonal_time_mean(&mut clim).unwrap();
    clim.rename_field("t_surf", "ts").unwrap();
    NetCDFWriter::new(&old).write_dataset(&clim).unwrap();
    let warmer = {
        let field = clim.field_mut("ts").unwrap();
        field.data.mapv_inplace(|v| v + 2.0);
        clim
    };
    NetCDFWriter::new(&new).write_dataset(&warmer).unwrap();

    let diff = compare_climatologies(&old, &new, &["ts", "temp"]).unwrap();
    assert_eq!(diff.field_names(), vec!["ts", "temp"]);
    assert!(diff.field("ts").unwrap().data.iter().all(|v| (v - 2.0).abs() < 1e-9));
    assert!(diff.field("temp").unwrap().data.iter().all(|v| v.abs() < 1e-9));

    let err = compare_climatologies(&old, &new, &["prc"]).unwrap_err();
    assert!(matches!(err, PipelineError::MissingField { .. }));
}

#[test]
fn test_stage_drivers_chain() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path(), 24..26);
    write_raw_run(&config, RUN_TAG);

    // Each step as its own subcommand invocation: a fresh pipeline that
    // only sees what the previous step left on disk.
    for_each_run(&config, RunPipeline::normalize).unwrap();
    assert_eq!(
        RunPipeline::new(&config, RUN_TAG).unwrap().current_stage().unwrap(),
        RunStage::Normalized
    );
    for_each_run(&config, RunPipeline::eddy_terms).unwrap();
    assert_eq!(
        RunPipeline::new(&config, RUN_TAG).unwrap().current_stage().unwrap(),
        RunStage::EddyAugmented
    );
    for_each_run(&config, RunPipeline::climatology).unwrap();

    let pipeline = RunPipeline::new(&config, RUN_TAG).unwrap();
    assert_eq!(pipeline.current_stage().unwrap(), RunStage::Climatology);
    let clim = config.run_dir(RUN_TAG).join("itcz-mip_zm_clim.nc");
    assert!(clim.exists());
    let ds = NetCDFReader::open(&clim).unwrap().read_dataset().unwrap();
    assert!(ds.contains_field("vsts"));
    assert!(ds.axis("time").is_none());
}

#[test]
fn test_radiation_check_on_socrates_month() {
    let dir = tempdir().unwrap();
    let mut config = test_config(dir.path(), 24..25);
    config.check_radiation = true;
    write_raw_month_with_radiation(&config, RUN_TAG, 24);

    let corpus = RunCorpus::new(&config, RUN_TAG).unwrap();
    let out = corpus.normalize_month(24).unwrap();
    let ds = NetCDFReader::open(&out).unwrap().read_dataset().unwrap();

    for (name, expected) in [
        ("rlut", 240.0),
        ("rlds", 330.0),
        ("rlus", 400.0),
        ("rsut", 100.0),
        ("rsdt", 340.0),
        ("rsds", 190.0),
        ("rsus", 30.0),
    ] {
        let field = ds.field(name).unwrap_or_else(|| panic!("{} missing", name));
        assert_eq!(field.units, "watts/m2");
        assert_close(field.data[[0, 0, 0]], expected);
    }
    for (name, _) in SOCRATES_FLUXES {
        assert!(!ds.contains_field(name), "{} not renamed or dropped", name);
    }
}
