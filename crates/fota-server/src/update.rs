//! Update check: reported ECU versions vs. the catalog's latest

use std::collections::BTreeMap;
use std::sync::Arc;

use fota_core::models::normalize;
use fota_core::{CarType, CatalogGateway, GatewayError};
use tracing::debug;

use crate::error::ConnectionError;

/// ECUs whose reported version differs from the catalog's latest.
///
/// Only ECUs present both in the catalog entry and in `reported` are
/// considered; names match case-insensitively and the result is keyed by
/// the catalog's ECU name. ECUs with no published versions are skipped.
pub fn updates_needed(
    car_type: &CarType,
    reported: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let reported: BTreeMap<String, &str> = reported
        .iter()
        .map(|(name, version)| (normalize(name), version.as_str()))
        .collect();

    car_type
        .ecus
        .iter()
        .filter_map(|ecu| {
            let installed = reported.get(&normalize(&ecu.name))?;
            let latest = ecu.latest_version()?;
            if normalize(installed) != normalize(&latest.version_number) {
                Some((ecu.name.clone(), latest.version_number.clone()))
            } else {
                None
            }
        })
        .collect()
}

/// Runs update checks against a freshly loaded catalog
pub struct UpdateChecker {
    catalog: Arc<dyn CatalogGateway>,
}

impl UpdateChecker {
    pub fn new(catalog: Arc<dyn CatalogGateway>) -> Self {
        Self { catalog }
    }

    /// Re-fetch the catalog entry for `car_type` and compare
    pub async fn check(
        &self,
        car_type: &str,
        reported: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>, ConnectionError> {
        let entry = self
            .catalog
            .find_car_type(car_type)
            .await?
            .ok_or_else(|| GatewayError::CarTypeNotFound(car_type.to_string()))?;

        let updates = updates_needed(&entry, reported);
        debug!(
            car_type = %entry.name,
            reported = reported.len(),
            updates = updates.len(),
            "Update check complete"
        );
        Ok(updates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fota_core::{Ecu, Version};
    use fota_store::MemoryCatalog;
    use pretty_assertions::assert_eq;

    fn ecu(name: &str, versions: &[&str]) -> Ecu {
        Ecu {
            name: name.to_string(),
            model_number: format!("{}-M", name),
            versions: versions
                .iter()
                .map(|v| Version {
                    version_number: v.to_string(),
                    compatible_car_types: vec!["ModelX".to_string()],
                    location: format!("{}_{}.hex", name, v),
                })
                .collect(),
        }
    }

    fn model_x() -> CarType {
        CarType {
            name: "ModelX".to_string(),
            model_number: "MX-100".to_string(),
            ecus: vec![
                ecu("Engine_Control_Module", &["1.0.0", "1.1.0", "1.2.0"]),
                // Positional: "latest" is the last entry, not the highest
                ecu("Transmission_Control_Module", &["2.1.0", "2.0.5"]),
                ecu("Brake_Control_Module", &[]),
            ],
            manufactured_count: 1,
            car_ids: vec!["MX2023-001".to_string()],
        }
    }

    fn versions(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_empty_report_yields_no_updates() {
        assert!(updates_needed(&model_x(), &BTreeMap::new()).is_empty());
    }

    #[test]
    fn test_latest_everywhere_yields_no_updates() {
        let reported = versions(&[
            ("Engine_Control_Module", "1.2.0"),
            ("Transmission_Control_Module", "2.0.5"),
        ]);
        assert!(updates_needed(&model_x(), &reported).is_empty());
    }

    #[test]
    fn test_outdated_and_unknown_ecus() {
        let reported = versions(&[
            ("engine_control_module", "1.0.0"),
            ("Transmission_Control_Module", "2.1.0"),
            ("Brake_Control_Module", "0.9.0"),
            ("Infotainment", "5.0"),
        ]);
        assert_eq!(
            updates_needed(&model_x(), &reported),
            versions(&[
                ("Engine_Control_Module", "1.2.0"),
                ("Transmission_Control_Module", "2.0.5"),
            ])
        );
    }

    #[tokio::test]
    async fn test_checker_unknown_car_type() {
        let checker = UpdateChecker::new(Arc::new(MemoryCatalog::new(vec![model_x()])));
        let err = checker.check("ModelZ", &BTreeMap::new()).await.unwrap_err();
        assert_eq!(err.code(), 404);

        let updates = checker
            .check("modelx", &versions(&[("Engine_Control_Module", "1.0.0")]))
            .await
            .unwrap();
        assert_eq!(updates["Engine_Control_Module"], "1.2.0");
    }
}
