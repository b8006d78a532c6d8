use super::{rename_fields, RenameMap};
use crate::config::Constants;
use crate::data_io::utils::{
    radiation_long_name, radiation_sources, RADIATION_LONG_NAMES, RADIATION_NET_FIELDS,
    RADIATION_RENAMES, RADIATION_UNITS,
};
use crate::data_io::{AxisKind, Dataset, GriddedField};
use crate::error::PipelineError;
use crate::math::{area_weighted_mean, combine};
use ndarray::Axis as NdAxis;
use tracing::info;

const CONTEXT: &str = "radiation terms";

/// Derive the upward fluxes from the model's down and net fluxes:
///
/// - `rlus = lw_down + lw_net` (surface longwave net is up minus down)
/// - `rsut = toa_sw_down - toa_sw_net` (shortwave net is down minus up)
/// - `rsus = sfc_sw_down - sfc_sw_net`
///
/// then rename the remaining sources to CMIP names and drop the net
/// fluxes. A dataset with none of the source fields (gray radiation) is
/// left alone and `Ok(false)` returned; one with only some of them is an
/// error.
pub fn derive_radiation_terms(
    dataset: &mut Dataset,
    constants: &Constants,
) -> Result<bool, PipelineError> {
    let (present, missing): (Vec<&str>, Vec<&str>) =
        radiation_sources().partition(|name| dataset.contains_field(name));
    if present.is_empty() {
        info!("no radiation fields, skipping radiation terms");
        return Ok(false);
    }
    if let Some(name) = missing.first() {
        return Err(PipelineError::missing_field(*name, CONTEXT));
    }

    let fill = constants.fill_value;
    let derive = |name: &str, down: &str, net: &str, op: fn(f64, f64) -> f64| {
        let down = dataset.require_field(down, CONTEXT)?;
        let net = dataset.require_field(net, CONTEXT)?;
        let data = combine(&down.data, &net.data, fill, op)?;
        Ok::<_, PipelineError>(GriddedField::new(name, down.dims.clone(), data))
    };
    let rlus = derive("rlus", "soc_surf_flux_lw_down", "soc_surf_flux_lw", |d, n| d + n)?;
    let rsut = derive("rsut", "soc_toa_sw_down", "soc_toa_sw", |d, n| d - n)?;
    let rsus = derive("rsus", "soc_surf_flux_sw_down", "soc_surf_flux_sw", |d, n| d - n)?;

    rename_fields(dataset, &RenameMap::strict(RADIATION_RENAMES)?)?;
    for name in RADIATION_NET_FIELDS {
        dataset.remove_field(name);
    }
    for field in [rlus, rsut, rsus] {
        dataset.insert_field(field)?;
    }

    for (name, long_name) in RADIATION_LONG_NAMES {
        let field = dataset
            .field_mut(name)
            .ok_or_else(|| PipelineError::missing_field(*name, CONTEXT))?;
        field.units = RADIATION_UNITS.to_string();
        field.long_name = long_name.to_string();
        field.fill_value = fill;
    }
    Ok(true)
}

/// Area-weighted global means of the seven radiative fluxes at the first
/// time step, for checking the derived upward fluxes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RadiationBudget {
    pub rlut: f64,
    pub rlds: f64,
    pub rlus: f64,
    pub rsut: f64,
    pub rsdt: f64,
    pub rsds: f64,
    pub rsus: f64,
}

impl RadiationBudget {
    pub fn from_dataset(dataset: &Dataset) -> Result<Self, PipelineError> {
        let mean = |name: &str| global_mean(dataset, name);
        Ok(Self {
            rlut: mean("rlut")?,
            rlds: mean("rlds")?,
            rlus: mean("rlus")?,
            rsut: mean("rsut")?,
            rsdt: mean("rsdt")?,
            rsds: mean("rsds")?,
            rsus: mean("rsus")?,
        })
    }

    /// Net longwave loss of the atmosphere
    pub fn longwave_cooling(&self) -> f64 {
        self.rlut + self.rlds - self.rlus
    }

    /// Shortwave absorbed in the atmosphere: net at TOA minus net at the surface
    pub fn shortwave_absorption(&self) -> f64 {
        (self.rsdt - self.rsut) - (self.rsds - self.rsus)
    }

    /// Net downward flux at TOA
    pub fn toa_imbalance(&self) -> f64 {
        self.rsdt - self.rsut - self.rlut
    }

    pub fn log(&self) {
        info!(
            "radiation budget (W/m2): rlut={:.1} rlds={:.1} rlus={:.1} rsut={:.1} rsdt={:.1} rsds={:.1} rsus={:.1}",
            self.rlut, self.rlds, self.rlus, self.rsut, self.rsdt, self.rsds, self.rsus
        );
        info!(
            "longwave cooling {:.1}, shortwave absorption {:.1}, TOA imbalance {:.1}",
            self.longwave_cooling(),
            self.shortwave_absorption(),
            self.toa_imbalance()
        );
    }
}

fn global_mean(dataset: &Dataset, name: &str) -> Result<f64, PipelineError> {
    let field = dataset.require_field(name, "radiation budget")?;
    let lat_axis = dataset.axis_of_kind(AxisKind::Latitude).ok_or_else(|| {
        PipelineError::Shape("radiation budget needs a latitude axis".to_string())
    })?;
    let mut data = field.data.clone();
    let mut dims = field.dims.clone();
    if let Some(t) = dataset.axis_position(field, AxisKind::Time) {
        data = data.index_axis(NdAxis(t), 0).to_owned();
        dims.remove(t);
    }
    let lat_pos = dims
        .iter()
        .position(|d| *d == lat_axis.name)
        .ok_or_else(|| PipelineError::Shape(format!("'{}' has no latitude axis", name)))?;
    area_weighted_mean(&data, lat_pos, &lat_axis.values, field.fill_value)
}
