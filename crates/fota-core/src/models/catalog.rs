//! Catalog models: car types, their ECUs and firmware versions

use serde::{Deserialize, Serialize};

/// Canonical form used for case-insensitive identity comparisons.
///
/// Vehicle types, vehicle ids and ECU names are all compared through this
/// function so that authentication, update checks and feedback validation
/// agree on what "the same name" means.
pub fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

/// A firmware version available for one ECU
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    /// Version string as published (e.g. "1.2.0")
    pub version_number: String,
    /// Car type names this image may be flashed onto
    #[serde(default)]
    pub compatible_car_types: Vec<String>,
    /// Opaque firmware location resolvable by a `BlobGateway`
    #[serde(alias = "hex_file_path")]
    pub location: String,
}

/// An electronic control unit and its ordered version history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ecu {
    pub name: String,
    pub model_number: String,
    /// Ordered oldest to newest; the last element is the latest version
    #[serde(default)]
    pub versions: Vec<Version>,
}

impl Ecu {
    /// The latest version of this ECU.
    ///
    /// "Latest" is positional: the last element of `versions`. No semantic
    /// version ordering is applied.
    pub fn latest_version(&self) -> Option<&Version> {
        self.versions.last()
    }

    /// Find a version by its exact version string
    pub fn find_version(&self, version_number: &str) -> Option<&Version> {
        self.versions
            .iter()
            .find(|v| v.version_number == version_number)
    }
}

/// A vehicle type with its ECUs and the identifiers of manufactured vehicles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarType {
    pub name: String,
    pub model_number: String,
    #[serde(default)]
    pub ecus: Vec<Ecu>,
    #[serde(default)]
    pub manufactured_count: u64,
    #[serde(default)]
    pub car_ids: Vec<String>,
}

impl CarType {
    /// Case-insensitive name match
    pub fn matches_name(&self, name: &str) -> bool {
        normalize(&self.name) == normalize(name)
    }

    /// Case-insensitive vehicle-id membership check
    pub fn has_car_id(&self, car_id: &str) -> bool {
        let wanted = normalize(car_id);
        self.car_ids.iter().any(|id| normalize(id) == wanted)
    }

    /// Find an ECU by name (case-insensitive)
    pub fn find_ecu(&self, name: &str) -> Option<&Ecu> {
        let wanted = normalize(name);
        self.ecus.iter().find(|ecu| normalize(&ecu.name) == wanted)
    }

    /// Resolve the firmware version for an (ECU, version) pair
    pub fn resolve_version(&self, ecu_name: &str, version_number: &str) -> Option<&Version> {
        self.find_ecu(ecu_name)
            .and_then(|ecu| ecu.find_version(version_number))
    }
}

/// Find a car type by name in a freshly loaded catalog
pub fn find_car_type<'a>(car_types: &'a [CarType], name: &str) -> Option<&'a CarType> {
    car_types.iter().find(|ct| ct.matches_name(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(number: &str) -> Version {
        Version {
            version_number: number.to_string(),
            compatible_car_types: vec!["ModelX".to_string()],
            location: format!("hex_files/ECM_{}.hex", number.replace('.', "_")),
        }
    }

    fn model_x() -> CarType {
        CarType {
            name: "ModelX".to_string(),
            model_number: "MX-2023".to_string(),
            ecus: vec![Ecu {
                name: "Engine_Control_Module".to_string(),
                model_number: "ECM-100".to_string(),
                versions: vec![version("1.0.0"), version("1.2.0"), version("1.1.0")],
            }],
            manufactured_count: 2,
            car_ids: vec!["MX2023-001".to_string(), "MX2023-002".to_string()],
        }
    }

    #[test]
    fn test_latest_version_is_last_element() {
        let car = model_x();
        let ecu = car.find_ecu("engine_control_module").unwrap();
        // Positional, not semver: 1.1.0 is last so it is "latest"
        assert_eq!(ecu.latest_version().unwrap().version_number, "1.1.0");
    }

    #[test]
    fn test_latest_version_empty() {
        let ecu = Ecu {
            name: "BCM".to_string(),
            model_number: "B1".to_string(),
            versions: vec![],
        };
        assert!(ecu.latest_version().is_none());
    }

    #[test]
    fn test_car_id_membership_is_case_insensitive() {
        let car = model_x();
        assert!(car.has_car_id("mx2023-001"));
        assert!(car.has_car_id("  MX2023-002 "));
        assert!(!car.has_car_id("MX2023-999"));
    }

    #[test]
    fn test_resolve_version() {
        let car = model_x();
        let v = car.resolve_version("ENGINE_CONTROL_MODULE", "1.2.0").unwrap();
        assert_eq!(v.location, "hex_files/ECM_1_2_0.hex");
        assert!(car.resolve_version("Engine_Control_Module", "9.9.9").is_none());
        assert!(car.resolve_version("Nope", "1.2.0").is_none());
    }

    #[test]
    fn test_legacy_hex_file_path_field() {
        let json = r#"{"version_number":"1.0.0","compatible_car_types":["ModelX"],"hex_file_path":"hex_files/a.hex"}"#;
        let v: Version = serde_json::from_str(json).unwrap();
        assert_eq!(v.location, "hex_files/a.hex");
        assert_eq!(v.compatible_car_types, vec!["ModelX".to_string()]);
    }
}
