//! JSON history directory provider
//!
//! One file per entity, named `<entity>.json`:
//!
//! ```json
//! {
//!   "kind": "job",
//!   "repository": "REPO-1",
//!   "samples": [{ "timestamp": "2026-02-01T22:00:00Z", "outcome": "success", ... }],
//!   "restore_tests": [...],
//!   "verification": [...]
//! }
//! ```
//!
//! Every field is optional. The entity name always comes from the file name.

use backup_risk::{
    EntityDescriptor, EntityKind, RiskError, Result, Sample, SampleProvider, VerificationResult,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Default, Deserialize)]
struct EntityFile {
    #[serde(default)]
    kind: EntityKind,
    #[serde(default)]
    repository: Option<String>,
    #[serde(default)]
    samples: Vec<Sample>,
    #[serde(default)]
    restore_tests: Vec<Sample>,
    #[serde(default)]
    verification: Vec<VerificationResult>,
}

pub struct JsonDirProvider {
    name: String,
    entities: BTreeMap<String, EntityFile>,
}

impl JsonDirProvider {
    /// Read every `*.json` file in `dir`
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let mut entities = BTreeMap::new();

        let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().map_or(false, |ext| ext == "json"))
            .collect();
        paths.sort();

        for path in paths {
            let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                warn!("Skipping {}: file name is not valid UTF-8", path.display());
                continue;
            };
            let content = fs::read_to_string(&path)?;
            let mut file: EntityFile = serde_json::from_str(&content)
                .map_err(|e| RiskError::Provider(format!("{}: {}", path.display(), e)))?;

            for sample in file.samples.iter_mut().chain(file.restore_tests.iter_mut()) {
                sample.entity = name.clone();
            }
            file.samples.sort_by_key(|s| s.timestamp);
            file.restore_tests.sort_by_key(|s| s.timestamp);
            file.verification.sort_by_key(|v| v.timestamp);

            debug!(
                "Loaded {}: {} samples, {} restore tests, {} verification results",
                name,
                file.samples.len(),
                file.restore_tests.len(),
                file.verification.len()
            );
            entities.insert(name, file);
        }

        Ok(Self {
            name: dir.display().to_string(),
            entities,
        })
    }

    fn entity(&self, entity: &str) -> Result<&EntityFile> {
        self.entities
            .get(entity)
            .ok_or_else(|| RiskError::Provider(format!("{}: no history for '{}'", self.name, entity)))
    }
}

impl SampleProvider for JsonDirProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn entities(&self) -> Result<Vec<EntityDescriptor>> {
        Ok(self
            .entities
            .iter()
            .map(|(name, file)| EntityDescriptor {
                name: name.clone(),
                kind: file.kind,
                repository: file.repository.clone(),
            })
            .collect())
    }

    fn samples(&self, entity: &str) -> Result<Vec<Sample>> {
        Ok(self.entity(entity)?.samples.clone())
    }

    fn restore_tests(&self, entity: &str) -> Result<Vec<Sample>> {
        Ok(self.entity(entity)?.restore_tests.clone())
    }

    fn verification(&self, entity: &str) -> Result<Vec<VerificationResult>> {
        Ok(self.entity(entity)?.verification.clone())
    }
}
