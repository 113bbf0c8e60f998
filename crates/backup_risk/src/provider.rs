//! Sample acquisition
//!
//! Producers never read raw backup history directly. They ask a
//! `SampleProvider`, chosen at the boundary: a primary source, optionally
//! wrapped in a `FallbackProvider` that switches to a secondary source when
//! the primary fails or returns too short a history.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

use crate::error::{Result, RiskError};
use crate::sample::{span_days, EntityKind, Sample, VerificationResult};

/// An entity known to a provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    pub name: String,
    #[serde(default)]
    pub kind: EntityKind,
    /// Repository whose capacity backs this job
    #[serde(default)]
    pub repository: Option<String>,
}

impl EntityDescriptor {
    pub fn new(name: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            name: name.into(),
            kind,
            repository: None,
        }
    }

    pub fn with_repository(mut self, repository: impl Into<String>) -> Self {
        self.repository = Some(repository.into());
        self
    }
}

/// Source of samples and verification results
pub trait SampleProvider {
    /// Short name for logs
    fn name(&self) -> &str;

    fn entities(&self) -> Result<Vec<EntityDescriptor>>;

    /// Samples for one entity, oldest first
    fn samples(&self, entity: &str) -> Result<Vec<Sample>>;

    /// Restore-test results for one entity, oldest first
    fn restore_tests(&self, entity: &str) -> Result<Vec<Sample>>;

    fn verification(&self, entity: &str) -> Result<Vec<VerificationResult>>;
}

#[derive(Debug, Clone, Default)]
struct EntityData {
    descriptor: Option<EntityDescriptor>,
    samples: Vec<Sample>,
    restore_tests: Vec<Sample>,
    verification: Vec<VerificationResult>,
}

/// In-memory provider
#[derive(Debug, Clone, Default)]
pub struct StaticProvider {
    name: String,
    entities: BTreeMap<String, EntityData>,
}

impl StaticProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entities: BTreeMap::new(),
        }
    }

    pub fn with_entity(mut self, descriptor: EntityDescriptor) -> Self {
        self.add_entity(descriptor);
        self
    }

    pub fn add_entity(&mut self, descriptor: EntityDescriptor) {
        let name = descriptor.name.clone();
        self.entities
            .entry(name)
            .or_default()
            .descriptor = Some(descriptor);
    }

    /// Append samples; registers the entity as a job if it is unknown
    pub fn add_samples(&mut self, entity: &str, samples: impl IntoIterator<Item = Sample>) {
        let data = self.entry(entity);
        data.samples.extend(samples);
        data.samples.sort_by_key(|s| s.timestamp);
    }

    pub fn add_restore_tests(&mut self, entity: &str, tests: impl IntoIterator<Item = Sample>) {
        let data = self.entry(entity);
        data.restore_tests.extend(tests);
        data.restore_tests.sort_by_key(|s| s.timestamp);
    }

    pub fn add_verification(
        &mut self,
        entity: &str,
        results: impl IntoIterator<Item = VerificationResult>,
    ) {
        let data = self.entry(entity);
        data.verification.extend(results);
        data.verification.sort_by_key(|v| v.timestamp);
    }

    fn entry(&mut self, entity: &str) -> &mut EntityData {
        let data = self.entities.entry(entity.to_string()).or_default();
        if data.descriptor.is_none() {
            data.descriptor = Some(EntityDescriptor::new(entity, EntityKind::Job));
        }
        data
    }
}

impl SampleProvider for StaticProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn entities(&self) -> Result<Vec<EntityDescriptor>> {
        Ok(self
            .entities
            .values()
            .filter_map(|d| d.descriptor.clone())
            .collect())
    }

    fn samples(&self, entity: &str) -> Result<Vec<Sample>> {
        self.entities
            .get(entity)
            .map(|d| d.samples.clone())
            .ok_or_else(|| RiskError::Provider(format!("{}: unknown entity '{}'", self.name, entity)))
    }

    fn restore_tests(&self, entity: &str) -> Result<Vec<Sample>> {
        Ok(self
            .entities
            .get(entity)
            .map(|d| d.restore_tests.clone())
            .unwrap_or_default())
    }

    fn verification(&self, entity: &str) -> Result<Vec<VerificationResult>> {
        Ok(self
            .entities
            .get(entity)
            .map(|d| d.verification.clone())
            .unwrap_or_default())
    }
}

/// Primary source with a secondary behind it
pub struct FallbackProvider<P, S> {
    primary: P,
    secondary: S,
    min_span_days: f64,
}

impl<P: SampleProvider, S: SampleProvider> FallbackProvider<P, S> {
    /// `min_span_days`: a primary history shorter than this is checked against the secondary
    pub fn new(primary: P, secondary: S, min_span_days: f64) -> Self {
        Self {
            primary,
            secondary,
            min_span_days,
        }
    }
}

impl<P: SampleProvider, S: SampleProvider> SampleProvider for FallbackProvider<P, S> {
    fn name(&self) -> &str {
        self.primary.name()
    }

    fn entities(&self) -> Result<Vec<EntityDescriptor>> {
        let mut merged: BTreeMap<String, EntityDescriptor> = BTreeMap::new();
        match self.primary.entities() {
            Ok(list) => merged.extend(list.into_iter().map(|d| (d.name.clone(), d))),
            Err(e) => warn!("{} entity listing failed, using {}: {}", self.primary.name(), self.secondary.name(), e),
        }
        for descriptor in self.secondary.entities()? {
            merged.entry(descriptor.name.clone()).or_insert(descriptor);
        }
        Ok(merged.into_values().collect())
    }

    fn samples(&self, entity: &str) -> Result<Vec<Sample>> {
        let primary = match self.primary.samples(entity) {
            Ok(samples) => samples,
            Err(e) => {
                warn!("{} failed for {}, using {}: {}", self.primary.name(), entity, self.secondary.name(), e);
                return self.secondary.samples(entity);
            }
        };

        if span_days(&primary) >= self.min_span_days {
            return Ok(primary);
        }
        match self.secondary.samples(entity) {
            Ok(secondary) if span_days(&secondary) > span_days(&primary) => {
                warn!(
                    "{} history for {} covers {:.0} days, using {}",
                    self.primary.name(),
                    entity,
                    span_days(&primary),
                    self.secondary.name()
                );
                Ok(secondary)
            }
            _ => Ok(primary),
        }
    }

    fn restore_tests(&self, entity: &str) -> Result<Vec<Sample>> {
        match self.primary.restore_tests(entity) {
            Ok(tests) if !tests.is_empty() => Ok(tests),
            Ok(_) => self.secondary.restore_tests(entity),
            Err(e) => {
                warn!("{} restore tests failed for {}: {}", self.primary.name(), entity, e);
                self.secondary.restore_tests(entity)
            }
        }
    }

    fn verification(&self, entity: &str) -> Result<Vec<VerificationResult>> {
        match self.primary.verification(entity) {
            Ok(results) if !results.is_empty() => Ok(results),
            Ok(_) => self.secondary.verification(entity),
            Err(e) => {
                warn!("{} verification failed for {}: {}", self.primary.name(), entity, e);
                self.secondary.verification(entity)
            }
        }
    }
}
