use crate::config::Constants;
use crate::data_io::{Dataset, GriddedField};
use crate::error::PipelineError;
use crate::math::{combine, scale};

/// Spellings of kg m-2 s-1 found in model output
pub const MASS_FLUX_UNITS: &[&str] = &[
    "kg/m2/s",
    "kg/m^2/s",
    "kg m-2 s-1",
    "kg m^-2 s^-1",
    "kg/(m2 s)",
    "kg/(m2.s)",
    "kg/m2s",
];

pub const MM_PER_DAY: &str = "mm/day";

const CONTEXT: &str = "precipitation terms";

/// True if `units` is one of the mass flux spellings (ignoring case and
/// surrounding whitespace)
pub fn is_mass_flux(units: &str) -> bool {
    let units = units.trim().to_ascii_lowercase();
    MASS_FLUX_UNITS.iter().any(|u| *u == units)
}

/// Convert a mass flux field to mm/day in place.
///
/// Anything not in mass flux units, including a field already in mm/day,
/// is rejected, so converting twice is an error rather than a silent
/// factor of 86400.
pub fn convert_to_mm_per_day(
    field: &mut GriddedField,
    constants: &Constants,
) -> Result<(), PipelineError> {
    check_mass_flux(field)?;
    field.data = scale(&field.data, constants.seconds_per_day, field.fill_value);
    field.units = MM_PER_DAY.to_string();
    Ok(())
}

fn check_mass_flux(field: &GriddedField) -> Result<(), PipelineError> {
    if is_mass_flux(&field.units) {
        Ok(())
    } else {
        Err(PipelineError::UnitsMismatch {
            field: field.name.clone(),
            expected: MASS_FLUX_UNITS.join(", "),
            found: field.units.clone(),
        })
    }
}

/// Add convective precipitation `prc = pr - condensation_rain` and
/// evaporation `evspsbl = hfls / L`, then put `pr`, `prc` and `evspsbl`
/// in mm/day.
///
/// Inputs and units are checked before anything is modified.
pub fn derive_precipitation_terms(
    dataset: &mut Dataset,
    constants: &Constants,
) -> Result<(), PipelineError> {
    let pr = dataset.require_field("pr", CONTEXT)?;
    let large_scale = dataset.require_field("condensation_rain", CONTEXT)?;
    let latent = dataset.require_field("hfls", CONTEXT)?;
    check_mass_flux(pr)?;
    let fill = constants.fill_value;

    let prc_data = combine(&pr.data, &large_scale.data, fill, |total, ls| total - ls)?;
    let mut prc = GriddedField::new("prc", pr.dims.clone(), prc_data)
        .with_metadata(pr.units.clone(), "convective precipitation");
    prc.fill_value = fill;

    let evap_data = scale(&latent.data, 1.0 / constants.latent_heat_cond, fill);
    // W/m2 over J/kg is kg/m2/s, the same mass flux as pr
    let mut evspsbl = GriddedField::new("evspsbl", latent.dims.clone(), evap_data)
        .with_metadata(pr.units.clone(), "evaporation");
    evspsbl.fill_value = fill;

    convert_to_mm_per_day(&mut prc, constants)?;
    convert_to_mm_per_day(&mut evspsbl, constants)?;
    let mut pr = pr.clone();
    convert_to_mm_per_day(&mut pr, constants)?;

    dataset.insert_field(pr)?;
    dataset.insert_field(prc)?;
    dataset.insert_field(evspsbl)?;
    Ok(())
}
