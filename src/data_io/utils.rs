/// CMIP variable naming tables for Isca/GFDL output
///
/// Field list: https://pcmdi.llnl.gov/mips/cmip5/docs/standard_output.pdf

/// Model-native to CMIP names for monthly output, applied as a partial map
pub const MONTHLY_RENAMES: &[(&str, &str)] = &[
    // common fields
    ("temp", "ta"),
    ("rh", "hur"),
    ("sphum", "hus"),
    ("height", "zg"),
    ("precipitation", "pr"),
    ("t_surf", "ts"),
    // winds
    ("ucomp", "ua"),
    ("vcomp", "va"),
    ("omega", "wap"),
    // wind stresses
    ("flux_u", "tauu"),
    ("flux_v", "tauv"),
    // surface winds
    ("u_10m", "uas"),
    ("v_10m", "vas"),
    // near surface fields
    ("temp_2m", "tas"),
    ("sphum_2m", "huss"),
    // surface heat fluxes
    ("flux_lhe", "hfls"),
    ("flux_t", "hfss"),
];

/// Renamed surface fields of the daily output
pub const DAILY_SURFACE_RENAMES: &[(&str, &str)] = &[
    ("precipitation", "pr"),
    ("temp_2m", "tas"),
    ("sphum_2m", "huss"),
    ("flux_lhe", "hfls"),
    ("flux_t", "hfss"),
];

/// 3-D daily fields written one per file, as (CMIP name, model name)
pub const DAILY_3D_FIELDS: &[(&str, &str)] = &[
    ("ta", "temp"),
    ("zg", "height"),
    ("hus", "sphum"),
    ("ua", "ucomp"),
    ("va", "vcomp"),
    ("wap", "omega"),
];

/// Radiative fields renamed once the upward fluxes are derived
pub const RADIATION_RENAMES: &[(&str, &str)] = &[
    ("soc_olr", "rlut"),
    ("soc_surf_flux_lw_down", "rlds"),
    ("soc_toa_sw_down", "rsdt"),
    ("soc_surf_flux_sw_down", "rsds"),
];

/// Net fluxes consumed by the upward flux derivation
pub const RADIATION_NET_FIELDS: &[&str] = &["soc_surf_flux_lw", "soc_toa_sw", "soc_surf_flux_sw"];

/// CMIP radiative fields with their long names
pub const RADIATION_LONG_NAMES: &[(&str, &str)] = &[
    ("rlut", "long wave up TOA (OLR)"),
    ("rlds", "long wave down surface"),
    ("rlus", "long wave up surface"),
    ("rsut", "short wave up TOA"),
    ("rsdt", "short wave down TOA"),
    ("rsds", "short wave down surface"),
    ("rsus", "short wave up surface"),
];

pub const RADIATION_UNITS: &str = "watts/m2";

/// Fields and axes removed from the normalized monthly output
pub const MONTHLY_DROP_LIST: &[&str] = &[
    // radiative heating rates
    "soc_tdt_lw",
    "soc_tdt_sw",
    "soc_tdt_rad",
    "albedo",
    // precipitation
    "condensation_rain",
    "zsurf",
    // time bookkeeping
    "average_T1",
    "average_T2",
    "average_DT",
    "time_bounds",
    "nv",
];

/// Fields and axes removed from the daily surface output
pub const DAILY_DROP_LIST: &[&str] = &[
    "temp",
    "height",
    "sphum",
    "ucomp",
    "vcomp",
    "omega",
    // precipitation
    "condensation_rain",
    "hfss",
    "hfls",
    // vertical interpolation
    "zsurf",
    "ps",
    // time bookkeeping
    "average_T1",
    "average_T2",
    "average_DT",
    "time_bounds",
    "nv",
    // grid
    "lonb",
    "latb",
    "pfull",
];

/// Long name of a CMIP radiative field
pub fn radiation_long_name(cmip_name: &str) -> Option<&'static str> {
    RADIATION_LONG_NAMES
        .iter()
        .find(|(name, _)| *name == cmip_name)
        .map(|(_, long)| *long)
}

/// All model-native names consumed by the radiation step
pub fn radiation_sources() -> impl Iterator<Item = &'static str> {
    RADIATION_RENAMES
        .iter()
        .map(|(source, _)| *source)
        .chain(RADIATION_NET_FIELDS.iter().copied())
}
