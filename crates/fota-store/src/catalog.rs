//! Catalog gateway implementations

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fota_core::{CarType, CatalogGateway, GatewayError, GatewayResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// On-disk catalog document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogDocument {
    #[serde(default)]
    pub car_types: Vec<CarType>,
}

/// Serialization format of a catalog file, chosen by extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogFormat {
    Json,
    Yaml,
    Toml,
}

impl CatalogFormat {
    pub fn from_path(path: &Path) -> GatewayResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("json") => Ok(CatalogFormat::Json),
            Some("yaml") | Some("yml") => Ok(CatalogFormat::Yaml),
            Some("toml") => Ok(CatalogFormat::Toml),
            _ => Err(GatewayError::Malformed(format!(
                "unsupported catalog file extension: {}",
                path.display()
            ))),
        }
    }

    pub fn parse(self, content: &str) -> GatewayResult<CatalogDocument> {
        let malformed = |e: String| GatewayError::Malformed(e);
        match self {
            CatalogFormat::Json => serde_json::from_str(content).map_err(|e| malformed(e.to_string())),
            CatalogFormat::Yaml => serde_yaml::from_str(content).map_err(|e| malformed(e.to_string())),
            CatalogFormat::Toml => toml::from_str(content).map_err(|e| malformed(e.to_string())),
        }
    }

    pub fn render(self, doc: &CatalogDocument) -> GatewayResult<String> {
        let malformed = |e: String| GatewayError::Malformed(e);
        match self {
            CatalogFormat::Json => {
                serde_json::to_string_pretty(doc).map_err(|e| malformed(e.to_string()))
            }
            CatalogFormat::Yaml => serde_yaml::to_string(doc).map_err(|e| malformed(e.to_string())),
            CatalogFormat::Toml => toml::to_string_pretty(doc).map_err(|e| malformed(e.to_string())),
        }
    }
}

/// Replace the entry with the same name and model number, or append
fn upsert(car_types: &mut Vec<CarType>, car_type: &CarType) {
    match car_types.iter_mut().find(|ct| {
        ct.matches_name(&car_type.name)
            && ct.model_number.eq_ignore_ascii_case(&car_type.model_number)
    }) {
        Some(existing) => *existing = car_type.clone(),
        None => car_types.push(car_type.clone()),
    }
}

// =============================================================================
// In-memory catalog
// =============================================================================

/// Catalog held in memory; used by tests and the in-process test server
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    car_types: RwLock<Vec<CarType>>,
}

impl MemoryCatalog {
    pub fn new(car_types: Vec<CarType>) -> Self {
        Self {
            car_types: RwLock::new(car_types),
        }
    }
}

#[async_trait]
impl CatalogGateway for MemoryCatalog {
    async fn load_car_types(&self) -> GatewayResult<Vec<CarType>> {
        Ok(self.car_types.read().clone())
    }

    async fn save_car_type(&self, car_type: &CarType) -> GatewayResult<()> {
        upsert(&mut self.car_types.write(), car_type);
        Ok(())
    }
}

// =============================================================================
// File catalog
// =============================================================================

/// Catalog backed by a JSON, YAML or TOML file.
///
/// The file is re-read on every `load_car_types` call, so edits are picked
/// up by the next authentication or update check without a restart.
#[derive(Debug)]
pub struct FileCatalog {
    path: PathBuf,
    format: CatalogFormat,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileCatalog {
    pub fn new(path: impl Into<PathBuf>) -> GatewayResult<Self> {
        let path = path.into();
        let format = CatalogFormat::from_path(&path)?;
        Ok(Self {
            path,
            format,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_document(&self) -> GatewayResult<CatalogDocument> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| GatewayError::Storage(format!("{}: {}", self.path.display(), e)))?;
        self.format.parse(&content)
    }
}

#[async_trait]
impl CatalogGateway for FileCatalog {
    async fn load_car_types(&self) -> GatewayResult<Vec<CarType>> {
        let doc = self.read_document().await?;
        debug!(path = %self.path.display(), car_types = doc.car_types.len(), "Catalog loaded");
        Ok(doc.car_types)
    }

    async fn save_car_type(&self, car_type: &CarType) -> GatewayResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.read_document().await?;
        upsert(&mut doc.car_types, car_type);
        let rendered = self.format.render(&doc)?;
        tokio::fs::write(&self.path, rendered).await?;
        Ok(())
    }
}
