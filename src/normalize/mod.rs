//! Model-native to CMIP field names, units and derived quantities.

pub mod precip;
pub mod radiation;

pub use precip::{convert_to_mm_per_day, derive_precipitation_terms};
pub use radiation::{derive_radiation_terms, RadiationBudget};

use crate::config::Constants;
use crate::data_io::utils::{
    DAILY_DROP_LIST, DAILY_SURFACE_RENAMES, MONTHLY_DROP_LIST, MONTHLY_RENAMES,
};
use crate::data_io::Dataset;
use crate::error::PipelineError;
use std::collections::HashSet;
use tracing::{debug, info};

/// Ordered source -> target renames, each target used once.
///
/// A strict map requires every source to be present; a partial map skips
/// absent sources.
#[derive(Debug, Clone, PartialEq)]
pub struct RenameMap {
    pairs: Vec<(String, String)>,
    partial: bool,
}

impl RenameMap {
    pub fn strict(pairs: &[(&str, &str)]) -> Result<Self, PipelineError> {
        Self::build(pairs, false)
    }

    pub fn partial(pairs: &[(&str, &str)]) -> Result<Self, PipelineError> {
        Self::build(pairs, true)
    }

    fn build(pairs: &[(&str, &str)], partial: bool) -> Result<Self, PipelineError> {
        let mut sources = HashSet::new();
        let mut targets = HashSet::new();
        for &(source, target) in pairs {
            if !sources.insert(source) {
                return Err(PipelineError::RenameCollision {
                    source_name: source.to_string(),
                    target: target.to_string(),
                    reason: "source listed twice".to_string(),
                });
            }
            if !targets.insert(target) {
                return Err(PipelineError::RenameCollision {
                    source_name: source.to_string(),
                    target: target.to_string(),
                    reason: "two sources map to this target".to_string(),
                });
            }
        }
        Ok(Self {
            pairs: pairs
                .iter()
                .map(|&(s, t)| (s.to_string(), t.to_string()))
                .collect(),
            partial,
        })
    }

    pub fn is_partial(&self) -> bool {
        self.partial
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }
}

/// Rename dataset fields per `map`, keeping their order.
///
/// All checks happen before any field is renamed, so on error the dataset
/// is unchanged.
pub fn rename_fields(dataset: &mut Dataset, map: &RenameMap) -> Result<(), PipelineError> {
    let mut applicable = Vec::with_capacity(map.pairs().len());
    for (source, target) in map.pairs() {
        if dataset.contains_field(source) {
            applicable.push((source.as_str(), target.as_str()));
        } else if map.is_partial() {
            debug!("rename {} -> {}: source absent, skipped", source, target);
        } else {
            return Err(PipelineError::missing_field(
                source.as_str(),
                format!("rename to '{}'", target),
            ));
        }
    }

    let moving: HashSet<&str> = applicable.iter().map(|(s, _)| *s).collect();
    if let Some((source, target)) = applicable
        .iter()
        .find(|(s, t)| s != t && dataset.contains_field(t) && !moving.contains(t))
    {
        return Err(PipelineError::RenameCollision {
            source_name: source.to_string(),
            target: target.to_string(),
            reason: "target already present in dataset".to_string(),
        });
    }

    // Via placeholders, so chained renames (a -> b, b -> c) work.
    let placeholders: Vec<String> = (0..applicable.len())
        .map(|i| format!("\u{0}rename{}", i))
        .collect();
    for ((source, _), placeholder) in applicable.iter().zip(&placeholders) {
        dataset.rename_field(source, placeholder)?;
    }
    for ((_, target), placeholder) in applicable.iter().zip(&placeholders) {
        dataset.rename_field(placeholder, target)?;
    }
    debug!("renamed {} fields", applicable.len());
    Ok(())
}

/// Remove the listed fields, then the listed axes no remaining field uses.
///
/// Names that are absent, or axes still in use, are skipped. Returns the
/// names actually removed.
pub fn prune_fields(dataset: &mut Dataset, drop_list: &[&str]) -> Vec<String> {
    let mut removed = Vec::new();
    for &name in drop_list {
        if dataset.remove_field(name).is_some() {
            removed.push(name.to_string());
        }
    }
    for &name in drop_list {
        if removed.iter().any(|r| r == name) {
            continue;
        }
        if dataset.axis(name).is_some() {
            if dataset.remove_axis(name) {
                removed.push(name.to_string());
            } else {
                debug!("prune: axis '{}' still in use, kept", name);
            }
        } else {
            debug!("prune: '{}' not present", name);
        }
    }
    removed
}

/// Applies the CMIP conventions to monthly and daily model output
#[derive(Debug, Clone)]
pub struct CmipNormalizer {
    constants: Constants,
    check_radiation: bool,
    monthly_renames: RenameMap,
    daily_renames: RenameMap,
}

impl CmipNormalizer {
    pub fn new(constants: Constants) -> Result<Self, PipelineError> {
        Ok(Self {
            constants,
            check_radiation: false,
            monthly_renames: RenameMap::partial(MONTHLY_RENAMES)?,
            daily_renames: RenameMap::partial(DAILY_SURFACE_RENAMES)?,
        })
    }

    /// Log the radiation budget of every normalized month
    pub fn with_radiation_check(mut self, enabled: bool) -> Self {
        self.check_radiation = enabled;
        self
    }

    pub fn constants(&self) -> &Constants {
        &self.constants
    }

    /// Rename, derive precipitation and radiation terms, prune.
    pub fn normalize_monthly(&self, dataset: &mut Dataset) -> Result<(), PipelineError> {
        rename_fields(dataset, &self.monthly_renames)?;
        derive_precipitation_terms(dataset, &self.constants)?;
        let has_radiation = derive_radiation_terms(dataset, &self.constants)?;
        let removed = prune_fields(dataset, MONTHLY_DROP_LIST);
        debug!("pruned {:?}", removed);

        if self.check_radiation && has_radiation {
            let budget = RadiationBudget::from_dataset(dataset)?;
            budget.log();
        }
        dataset.set_global_attribute("title", "CMIP-named monthly output");
        Ok(())
    }

    /// Surface (2-D) fields of the daily output. The 3-D fields are
    /// written separately and dropped here.
    pub fn normalize_daily_surface(&self, dataset: &mut Dataset) -> Result<(), PipelineError> {
        rename_fields(dataset, &self.daily_renames)?;
        derive_precipitation_terms(dataset, &self.constants)?;
        let removed = prune_fields(dataset, DAILY_DROP_LIST);
        info!("daily surface fields: {:?} (pruned {})", dataset.field_names(), removed.len());
        dataset.set_global_attribute("title", "CMIP-named daily surface output");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_io::{Axis, GriddedField};

    fn dataset(names: &[&str]) -> Dataset {
        let mut ds = Dataset::new();
        ds.add_axis(Axis::new("lat", vec![0.0, 1.0])).unwrap();
        ds.add_axis(Axis::index("nv", 2)).unwrap();
        for name in names {
            ds.insert_field(
                GriddedField::from_shape_vec(*name, &["lat"], &[2], vec![1.0, 2.0]).unwrap(),
            )
            .unwrap();
        }
        ds
    }

    #[test]
    fn test_map_rejects_shared_target() {
        let err = RenameMap::strict(&[("temp", "ta"), ("t", "ta")]).unwrap_err();
        assert!(matches!(err, PipelineError::RenameCollision { .. }));
    }

    #[test]
    fn test_strict_rename_requires_sources() {
        let mut ds = dataset(&["temp"]);
        let map = RenameMap::strict(&[("temp", "ta"), ("sphum", "hus")]).unwrap();
        let err = rename_fields(&mut ds, &map).unwrap_err();
        assert!(matches!(err, PipelineError::MissingField { ref field, .. } if field == "sphum"));
        // unchanged on error
        assert!(ds.contains_field("temp"));
    }

    #[test]
    fn test_partial_rename_skips_absent() {
        let mut ds = dataset(&["temp", "ucomp"]);
        let map = RenameMap::partial(&[("temp", "ta"), ("rh", "hur"), ("ucomp", "ua")]).unwrap();
        rename_fields(&mut ds, &map).unwrap();
        assert_eq!(ds.field_names(), vec!["ta", "ua"]);
        assert!(map.is_partial());
    }

    #[test]
    fn test_rename_onto_existing_field() {
        let mut ds = dataset(&["temp", "ta"]);
        let map = RenameMap::partial(&[("temp", "ta")]).unwrap();
        assert!(matches!(
            rename_fields(&mut ds, &map),
            Err(PipelineError::RenameCollision { .. })
        ));

        // allowed when the occupant is itself renamed away
        let map = RenameMap::strict(&[("temp", "ta"), ("ta", "ta_old")]).unwrap();
        rename_fields(&mut ds, &map).unwrap();
        assert_eq!(ds.field_names(), vec!["ta", "ta_old"]);
    }

    #[test]
    fn test_prune_is_idempotent() {
        let mut ds = dataset(&["ts", "zsurf", "average_T1"]);
        let removed = prune_fields(&mut ds, &["zsurf", "average_T1", "time_bounds", "nv"]);
        assert_eq!(removed, vec!["zsurf", "average_T1", "nv"]);
        assert_eq!(ds.field_names(), vec!["ts"]);
        assert!(prune_fields(&mut ds, &["zsurf", "average_T1", "nv"]).is_empty());
    }

    #[test]
    fn test_prune_keeps_axis_in_use() {
        let mut ds = dataset(&["ts"]);
        assert!(prune_fields(&mut ds, &["lat"]).is_empty());
        assert!(ds.axis("lat").is_some());
    }
}
