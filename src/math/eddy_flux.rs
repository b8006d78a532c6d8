//! Decomposition of a zonal/time mean covariance into mean-meridional,
//! stationary-eddy and transient-eddy contributions.

use super::averaging::{combine, masked_mean_over, masked_mean_over_axes, zonal_anomaly};
use crate::data_io::{AxisKind, Dataset, GriddedField};
use crate::error::PipelineError;

/// The three covariance components of a field pair. Each is a zonal and
/// time mean, so carries neither a time nor a longitude axis.
#[derive(Debug, Clone)]
pub struct FluxTerms {
    pub mean_meridional: GriddedField,
    pub stationary_eddy: GriddedField,
    pub transient_eddy: GriddedField,
}

/// Splits the covariance of `field_a` and `field_b` into its components.
///
/// `product` is the model's time-resolved `field_a * field_b`, needed for
/// the transient part since monthly means of the factors lose it.
pub trait EddyFluxDecomposer {
    fn get_flux_terms(
        &self,
        dataset: &Dataset,
        field_a: &str,
        field_b: &str,
        product: &GriddedField,
    ) -> Result<FluxTerms, PipelineError>;
}

/// Zonal/time decomposition with `[x]` the zonal mean, `x*` the zonal
/// anomaly and an overbar the time mean:
///
/// - mean meridional = mean_t([a][b])
/// - stationary = [a_bar* b_bar*]
/// - transient = mean_t([ab]) - mean meridional - stationary
#[derive(Debug, Clone, Copy, Default)]
pub struct ZonalTimeDecomposition;

impl ZonalTimeDecomposition {
    fn axes_of(dataset: &Dataset, field: &GriddedField) -> Result<(usize, usize), PipelineError> {
        let time = dataset.axis_position(field, AxisKind::Time);
        let lon = dataset.axis_position(field, AxisKind::Longitude);
        match (time, lon) {
            (Some(t), Some(x)) => Ok((t, x)),
            _ => Err(PipelineError::Shape(format!(
                "eddy decomposition of '{}' needs time and longitude axes, has {:?}",
                field.name, field.dims
            ))),
        }
    }
}

impl EddyFluxDecomposer for ZonalTimeDecomposition {
    fn get_flux_terms(
        &self,
        dataset: &Dataset,
        field_a: &str,
        field_b: &str,
        product: &GriddedField,
    ) -> Result<FluxTerms, PipelineError> {
        let a = dataset.require_field(field_a, "eddy flux decomposition")?;
        let b = dataset.require_field(field_b, "eddy flux decomposition")?;
        if a.dims != b.dims || a.dims != product.dims {
            return Err(PipelineError::Shape(format!(
                "eddy flux inputs '{}' {:?}, '{}' {:?} and '{}' {:?} are on different axes",
                field_a, a.dims, field_b, b.dims, product.name, product.dims
            )));
        }
        let (t, x) = Self::axes_of(dataset, product)?;
        let fill = product.fill_value;

        // Time axis index once longitude is gone, and vice versa.
        let t_after_zonal = if t > x { t - 1 } else { t };
        let x_after_time = if x > t { x - 1 } else { x };

        let za = masked_mean_over(&a.data, x, fill)?;
        let zb = masked_mean_over(&b.data, x, fill)?;
        let mmc = masked_mean_over(&combine(&za, &zb, fill, |p, q| p * q)?, t_after_zonal, fill)?;

        let a_star = zonal_anomaly(&masked_mean_over(&a.data, t, fill)?, x_after_time, fill)?;
        let b_star = zonal_anomaly(&masked_mean_over(&b.data, t, fill)?, x_after_time, fill)?;
        let stationary = masked_mean_over(
            &combine(&a_star, &b_star, fill, |p, q| p * q)?,
            x_after_time,
            fill,
        )?;

        let total = masked_mean_over_axes(&product.data, &[t, x], fill)?;
        let transient = combine(
            &combine(&total, &mmc, fill, |p, q| p - q)?,
            &stationary,
            fill,
            |p, q| p - q,
        )?;

        let dims: Vec<String> = product
            .dims
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != t && *i != x)
            .map(|(_, d)| d.clone())
            .collect();
        let term = |suffix: &str, data: ndarray::ArrayD<f64>| {
            let mut field = GriddedField::new(
                format!("{}_{}_{}", field_a, field_b, suffix),
                dims.clone(),
                data,
            )
            .with_metadata(product.units.clone(), format!("{} of {}", suffix, product.name));
            field.fill_value = fill;
            field
        };

        Ok(FluxTerms {
            mean_meridional: term("mmc", mmc),
            stationary_eddy: term("stationary", stationary),
            transient_eddy: term("transient", transient),
        })
    }
}
