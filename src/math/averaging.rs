use crate::data_io::common::is_missing;
use crate::error::PipelineError;
use ndarray::{ArrayD, ArrayViewD, Axis, IxDyn, Zip};

/// Mean of the non-missing values, `fill` if there are none
pub fn masked_mean<'a>(values: impl IntoIterator<Item = &'a f64>, fill: f64) -> f64 {
    let (sum, count) = values
        .into_iter()
        .filter(|v| !is_missing(**v, fill))
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if count == 0 {
        fill
    } else {
        sum / count as f64
    }
}

/// Mean over several axes at once, skipping missing samples. The reduced
/// axes are removed; remaining axes keep their order.
pub fn masked_mean_over_axes(
    data: &ArrayD<f64>,
    axes: &[usize],
    fill: f64,
) -> Result<ArrayD<f64>, PipelineError> {
    let ndim = data.ndim();
    if let Some(&bad) = axes.iter().find(|&&a| a >= ndim) {
        return Err(PipelineError::Shape(format!(
            "cannot average over axis {} of a {}-d array",
            bad, ndim
        )));
    }
    if axes.is_empty() {
        return Ok(data.clone());
    }

    let keep: Vec<usize> = (0..ndim).filter(|i| !axes.contains(i)).collect();
    let order: Vec<usize> = keep.iter().chain(axes.iter()).copied().collect();
    let mut shape: Vec<usize> = keep.iter().map(|&i| data.shape()[i]).collect();
    shape.push(axes.iter().map(|&i| data.shape()[i]).product());

    let grouped = data
        .view()
        .permuted_axes(IxDyn(&order))
        .as_standard_layout()
        .into_owned()
        .into_shape(IxDyn(&shape))?;
    Ok(grouped.map_axis(Axis(keep.len()), |lane| masked_mean(lane.iter(), fill)))
}

/// Mean along one axis, skipping missing samples
pub fn masked_mean_over(
    data: &ArrayD<f64>,
    axis: usize,
    fill: f64,
) -> Result<ArrayD<f64>, PipelineError> {
    masked_mean_over_axes(data, &[axis], fill)
}

/// Element-wise `op` of two same-shaped arrays; missing in either gives `fill`.
pub fn combine(
    a: &ArrayD<f64>,
    b: &ArrayD<f64>,
    fill: f64,
    op: impl Fn(f64, f64) -> f64,
) -> Result<ArrayD<f64>, PipelineError> {
    if a.shape() != b.shape() {
        return Err(PipelineError::Shape(format!(
            "cannot combine arrays of shape {:?} and {:?}",
            a.shape(),
            b.shape()
        )));
    }
    Ok(Zip::from(a).and(b).map_collect(|&x, &y| {
        if is_missing(x, fill) || is_missing(y, fill) {
            fill
        } else {
            op(x, y)
        }
    }))
}

/// Multiply by a constant, leaving missing samples at `fill`
pub fn scale(data: &ArrayD<f64>, factor: f64, fill: f64) -> ArrayD<f64> {
    data.mapv(|v| if is_missing(v, fill) { fill } else { v * factor })
}

/// Deviation from the zonal mean along `lon_axis`
pub fn zonal_anomaly(
    data: &ArrayD<f64>,
    lon_axis: usize,
    fill: f64,
) -> Result<ArrayD<f64>, PipelineError> {
    let mean = masked_mean_over(data, lon_axis, fill)?.insert_axis(Axis(lon_axis));
    let mean = broadcast_to(mean.view(), data.shape())?;
    combine(data, &mean, fill, |x, m| x - m)
}

fn broadcast_to(view: ArrayViewD<'_, f64>, shape: &[usize]) -> Result<ArrayD<f64>, PipelineError> {
    view.broadcast(IxDyn(shape))
        .map(|b| b.to_owned())
        .ok_or_else(|| {
            PipelineError::Shape(format!(
                "cannot broadcast {:?} to {:?}",
                view.shape(),
                shape
            ))
        })
}

/// Cos(latitude)-weighted mean along `lat_axis`, then the plain mean of
/// what remains. Missing samples are skipped; `fill` if nothing is valid.
pub fn area_weighted_mean(
    data: &ArrayD<f64>,
    lat_axis: usize,
    latitudes: &[f64],
    fill: f64,
) -> Result<f64, PipelineError> {
    if lat_axis >= data.ndim() || data.shape()[lat_axis] != latitudes.len() {
        return Err(PipelineError::Shape(format!(
            "{} latitudes do not match axis {} of shape {:?}",
            latitudes.len(),
            lat_axis,
            data.shape()
        )));
    }
    let weights: Vec<f64> = latitudes.iter().map(|lat| lat.to_radians().cos()).collect();
    let weighted = data.map_axis(Axis(lat_axis), |lane| {
        let (sum, norm) = lane
            .iter()
            .zip(&weights)
            .filter(|(v, _)| !is_missing(**v, fill))
            .fold((0.0, 0.0), |(s, n), (v, w)| (s + v * w, n + w));
        if norm > 0.0 {
            sum / norm
        } else {
            fill
        }
    });
    Ok(masked_mean(weighted.iter(), fill))
}
