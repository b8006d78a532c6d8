//! Synthetic Isca runs written with the crate's own writer.
#![allow(dead_code)]

use itcz_postproc::config::PipelineConfig;
use itcz_postproc::data_io::{Axis, Dataset, GriddedField, NetCDFWriter};
use std::ops::Range;
use std::path::{Path, PathBuf};

pub const RUN_TAG: &str = "_test";
pub const LEVELS: [f64; 3] = [850.0, 500.0, 200.0];
pub const LATS: [f64; 4] = [-30.0, -10.0, 10.0, 30.0];
pub const LONS: [f64; 2] = [0.0, 180.0];

/// kg/m2/s
pub const PRECIP: f64 = 4.0e-5;
pub const LARGE_SCALE_PRECIP: f64 = 1.0e-5;
/// W/m2
pub const LATENT_HEAT_FLUX: f64 = 100.0;

pub const DAILY_STEPS: usize = 3;

pub fn test_config(base: &Path, months: Range<u32>) -> PipelineConfig {
    let mut config = PipelineConfig::new(base);
    config.experiment_name = "aqua".to_string();
    config.run_tags = vec![RUN_TAG.to_string()];
    config.month_range = months;
    config
}

pub fn zonal_wind(step: usize, p: usize, y: usize, x: usize) -> f64 {
    10.0 + p as f64 + 0.5 * y as f64 + 2.0 * x as f64 + 0.1 * step as f64
}

pub fn meridional_wind(step: usize, _p: usize, y: usize, x: usize) -> f64 {
    1.0 + y as f64 - x as f64 + 0.5 * (step % 2) as f64
}

/// Zonal mean is `280.5 - 20 p + y` at every step
pub fn temperature(_step: usize, p: usize, y: usize, x: usize) -> f64 {
    280.0 - 20.0 * p as f64 + y as f64 + x as f64
}

pub fn specific_humidity(step: usize, p: usize, y: usize, x: usize) -> f64 {
    0.01 / (1.0 + p as f64) + 1.0e-4 * (y + x + step % 3) as f64
}

fn grid(times: Vec<f64>) -> Dataset {
    let mut ds = Dataset::new();
    let axes = [
        Axis::new("time", times)
            .with_attribute("units", "days since 0001-01-01 00:00:00")
            .with_attribute("calendar", "360_day")
            .with_attribute("axis", "T"),
        Axis::new("pfull", LEVELS.to_vec())
            .with_attribute("units", "hPa")
            .with_attribute("axis", "Z"),
        Axis::new("lat", LATS.to_vec()).with_attribute("units", "degrees_N"),
        Axis::new("lon", LONS.to_vec()).with_attribute("units", "degrees_E"),
        Axis::index("nv", 2),
    ];
    for axis in axes {
        ds.add_axis(axis).unwrap();
    }
    ds
}

fn field_3d(
    name: &str,
    units: &str,
    steps: Range<usize>,
    f: impl Fn(usize, usize, usize, usize) -> f64,
) -> GriddedField {
    let shape = [steps.len(), LEVELS.len(), LATS.len(), LONS.len()];
    let mut values = Vec::with_capacity(shape.iter().product());
    for t in steps {
        for p in 0..LEVELS.len() {
            for y in 0..LATS.len() {
                for x in 0..LONS.len() {
                    values.push(f(t, p, y, x));
                }
            }
        }
    }
    GriddedField::from_shape_vec(name, &["time", "pfull", "lat", "lon"], &shape, values)
        .unwrap()
        .with_metadata(units, name)
}

fn field_2d(
    name: &str,
    units: &str,
    steps: Range<usize>,
    f: impl Fn(usize, usize, usize) -> f64,
) -> GriddedField {
    let shape = [steps.len(), LATS.len(), LONS.len()];
    let mut values = Vec::with_capacity(shape.iter().product());
    for t in steps {
        for y in 0..LATS.len() {
            for x in 0..LONS.len() {
                values.push(f(t, y, x));
            }
        }
    }
    GriddedField::from_shape_vec(name, &["time", "lat", "lon"], &shape, values)
        .unwrap()
        .with_metadata(units, name)
}

fn bookkeeping(ds: &mut Dataset, steps: usize) {
    let bounds = GriddedField::from_shape_vec(
        "time_bounds",
        &["time", "nv"],
        &[steps, 2],
        (0..steps * 2).map(|i| i as f64).collect(),
    )
    .unwrap()
    .with_metadata("days", "time axis boundaries");
    ds.insert_field(bounds).unwrap();
}

fn surface_fields(ds: &mut Dataset, steps: Range<usize>) {
    for field in [
        field_2d("precipitation", "kg/m2/s", steps.clone(), |_, _, _| PRECIP),
        field_2d("condensation_rain", "kg/m2/s", steps.clone(), |_, _, _| {
            LARGE_SCALE_PRECIP
        }),
        field_2d("flux_lhe", "watts/m2", steps.clone(), |_, _, _| {
            LATENT_HEAT_FLUX
        }),
        field_2d("t_surf", "deg_k", steps, |t, y, x| {
            300.0 - 2.0 * y as f64 + x as f64 + 0.1 * t as f64
        }),
    ] {
        ds.insert_field(field).unwrap();
    }
}

/// One month of raw monthly output: a single time step
pub fn monthly_dataset(month: u32) -> Dataset {
    let step = month as usize;
    let steps = step..step + 1;
    let mut ds = grid(vec![month as f64 * 30.0 + 15.0]);
    for field in [
        field_3d("ucomp", "m/sec", steps.clone(), zonal_wind),
        field_3d("vcomp", "m/sec", steps.clone(), meridional_wind),
        field_3d("temp", "deg_k", steps.clone(), temperature),
        field_3d("sphum", "kg/kg", steps.clone(), specific_humidity),
        field_3d("ucomp_vcomp", "m2/sec2", steps.clone(), |t, p, y, x| {
            zonal_wind(t, p, y, x) * meridional_wind(t, p, y, x)
        }),
        field_3d("vcomp_temp", "deg_k m/sec", steps.clone(), |t, p, y, x| {
            meridional_wind(t, p, y, x) * temperature(t, p, y, x)
        }),
        field_3d("sphum_v", "m/sec", steps.clone(), |t, p, y, x| {
            specific_humidity(t, p, y, x) * meridional_wind(t, p, y, x)
        }),
    ] {
        ds.insert_field(field).unwrap();
    }
    surface_fields(&mut ds, steps);
    bookkeeping(&mut ds, 1);
    let zsurf = GriddedField::from_shape_vec("zsurf", &["lat", "lon"], &[4, 2], vec![0.0; 8])
        .unwrap()
        .with_metadata("m", "surface height");
    ds.insert_field(zsurf).unwrap();
    ds.set_global_attribute("title", "aquaplanet");
    ds
}

/// SOCRATES radiation output (W/m2) added to a raw month by
/// [`monthly_dataset_with_radiation`]
pub const SOCRATES_FLUXES: [(&str, f64); 7] = [
    ("soc_olr", 240.0),
    ("soc_surf_flux_lw_down", 330.0),
    ("soc_surf_flux_lw", 70.0),
    ("soc_toa_sw_down", 340.0),
    ("soc_toa_sw", 240.0),
    ("soc_surf_flux_sw_down", 190.0),
    ("soc_surf_flux_sw", 160.0),
];

pub fn monthly_dataset_with_radiation(month: u32) -> Dataset {
    let step = month as usize;
    let mut ds = monthly_dataset(month);
    for (name, value) in SOCRATES_FLUXES {
        ds.insert_field(field_2d(name, "watts/m2", step..step + 1, move |_, _, _| value))
            .unwrap();
    }
    ds
}

/// One month of raw daily output
pub fn daily_dataset(month: u32) -> Dataset {
    let step = month as usize * DAILY_STEPS;
    let steps = step..step + DAILY_STEPS;
    let times = steps.clone().map(|s| s as f64 * 10.0).collect();
    let mut ds = grid(times);
    for field in [
        field_3d("temp", "deg_k", steps.clone(), temperature),
        field_3d("height", "m", steps.clone(), |_, p, _, _| 1500.0 * (p + 1) as f64),
        field_3d("sphum", "kg/kg", steps.clone(), specific_humidity),
        field_3d("ucomp", "m/sec", steps.clone(), zonal_wind),
        field_3d("vcomp", "m/sec", steps.clone(), meridional_wind),
        field_3d("omega", "Pa/sec", steps.clone(), |_, _, _, _| 0.0),
    ] {
        ds.insert_field(field).unwrap();
    }
    surface_fields(&mut ds, steps.clone());
    for field in [
        field_2d("flux_t", "watts/m2", steps.clone(), |_, _, _| 10.0),
        field_2d("temp_2m", "deg_k", steps.clone(), |_, _, _| 298.0),
        field_2d("ps", "Pa", steps, |_, _, _| 1.0e5),
    ] {
        ds.insert_field(field).unwrap();
    }
    bookkeeping(&mut ds, DAILY_STEPS);
    ds
}

pub fn write_raw_month(config: &PipelineConfig, tag: &str, month: u32) -> PathBuf {
    let path = config.month_dir(tag, month).join(&config.files.raw_monthly);
    NetCDFWriter::new(&path)
        .write_dataset(&monthly_dataset(month))
        .unwrap();
    path
}

pub fn write_raw_month_with_radiation(config: &PipelineConfig, tag: &str, month: u32) -> PathBuf {
    let path = config.month_dir(tag, month).join(&config.files.raw_monthly);
    NetCDFWriter::new(&path)
        .write_dataset(&monthly_dataset_with_radiation(month))
        .unwrap();
    path
}

pub fn write_raw_daily(config: &PipelineConfig, tag: &str, month: u32) -> PathBuf {
    let path = config.month_dir(tag, month).join(&config.files.raw_daily);
    NetCDFWriter::new(&path)
        .write_dataset(&daily_dataset(month))
        .unwrap();
    path
}

pub fn write_raw_run(config: &PipelineConfig, tag: &str) {
    for month in config.month_range.clone() {
        write_raw_month(config, tag, month);
    }
}

pub fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() <= 1e-9 * expected.abs().max(1.0),
        "{} != {}",
        actual,
        expected
    );
}
