use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use anyhow::Context;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use greenhouse_common::{
    resolve, ActiveConfiguration, GreenhouseDocument, GrowthPhase, PhaseProfile, PresetBook,
    ResolveError, RuntimeConfig,
};

const RUNTIME_FILE: &str = "runtime.json";
const PRESETS_FILE: &str = "presets.json";
const GREENHOUSE_FILE: &str = "greenhouse.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Missing(#[from] ResolveError),
    #[error("failed to persist greenhouse document: {0:#}")]
    Persist(anyhow::Error),
}

/// The greenhouse document and the preset book it resolves against. The
/// document is written back to disk on every successful update.
pub struct GreenhouseStore {
    greenhouse_id: String,
    document: Mutex<Option<GreenhouseDocument>>,
    presets: PresetBook,
    document_path: Option<PathBuf>,
}

impl GreenhouseStore {
    pub fn in_memory(
        greenhouse_id: impl Into<String>,
        document: Option<GreenhouseDocument>,
        presets: PresetBook,
    ) -> Self {
        Self {
            greenhouse_id: greenhouse_id.into(),
            document: Mutex::new(document),
            presets,
            document_path: None,
        }
    }

    /// Loads `presets.json` and `greenhouse.json` from `data_dir`. A missing
    /// greenhouse file starts a fresh greenhouse in standby.
    pub async fn open(data_dir: &Path, greenhouse_id: impl Into<String>) -> anyhow::Result<Self> {
        let presets_path = data_dir.join(PRESETS_FILE);
        let presets = read_json::<PresetBook>(&presets_path)
            .await?
            .unwrap_or_else(|| {
                warn!("no preset book at {}", presets_path.display());
                PresetBook::default()
            });

        let document_path = data_dir.join(GREENHOUSE_FILE);
        let document = match read_json::<GreenhouseDocument>(&document_path).await? {
            Some(document) => document,
            None => {
                let document = GreenhouseDocument::default();
                write_json(&document_path, &document).await?;
                info!("created greenhouse document at {}", document_path.display());
                document
            }
        };

        Ok(Self {
            greenhouse_id: greenhouse_id.into(),
            document: Mutex::new(Some(document)),
            presets,
            document_path: Some(document_path),
        })
    }

    pub fn greenhouse_id(&self) -> &str {
        &self.greenhouse_id
    }

    pub fn presets(&self) -> &PresetBook {
        &self.presets
    }

    pub fn get_profile(&self, plant: &str, phase: GrowthPhase) -> Option<&PhaseProfile> {
        self.presets.get_profile(plant, phase)
    }

    pub async fn document(&self) -> Result<GreenhouseDocument, ResolveError> {
        self.document
            .lock()
            .await
            .clone()
            .ok_or_else(|| ResolveError::GreenhouseNotFound(self.greenhouse_id.clone()))
    }

    pub async fn resolve(&self) -> Result<ActiveConfiguration, ResolveError> {
        let document = self.document().await?;
        resolve(&document, &self.presets)
    }

    /// Applies `change` to a copy of the document and commits it once the
    /// copy is persisted. A rejected change or failed write leaves the
    /// stored document untouched.
    pub async fn update<T, E>(
        &self,
        change: impl FnOnce(&mut GreenhouseDocument) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let mut slot = self.document.lock().await;
        let Some(current) = slot.as_ref() else {
            return Err(StoreError::from(ResolveError::GreenhouseNotFound(
                self.greenhouse_id.clone(),
            ))
            .into());
        };

        let mut next = current.clone();
        let output = change(&mut next)?;
        if let Some(path) = &self.document_path {
            write_json(path, &next).await.map_err(StoreError::Persist)?;
        }
        *slot = Some(next);
        Ok(output)
    }
}

pub async fn load_runtime_config(data_dir: &Path) -> anyhow::Result<RuntimeConfig> {
    Ok(read_json(&data_dir.join(RUNTIME_FILE))
        .await?
        .unwrap_or_default())
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    match tokio::fs::read(path).await {
        Ok(raw) => serde_json::from_slice(&raw)
            .map(Some)
            .with_context(|| format!("invalid json in {}", path.display())),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let payload = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(path, payload)
        .await
        .with_context(|| format!("failed to write {}", path.display()))
}
