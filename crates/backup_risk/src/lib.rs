//! Backup Risk - quality-gated analytics over backup history
//!
//! Batch producers turn raw samples into quality-annotated metric records:
//! - health: success-rate trend and failure-pattern classification
//! - capacity: growth model selection and threshold-crossing forecasts
//! - efficiency: dedup and compression scoring
//! - recovery: restore-time percentiles, SLA status, concurrency limits
//!
//! The risk synthesizer reads the latest record of every producer per entity
//! and emits a confidence-weighted, tier-weighted risk record.

pub mod capacity;
pub mod config;
pub mod efficiency;
pub mod error;
pub mod pipeline;
pub mod provider;
pub mod quality;
pub mod record;
pub mod recovery;
pub mod risk;
pub mod sample;
pub mod stats;
pub mod store;
pub mod trend;

pub use config::RiskConfig;
pub use error::{Result, RiskError};
pub use pipeline::{Pipeline, RunOutcome, RunSummary};
pub use provider::{EntityDescriptor, FallbackProvider, SampleProvider, StaticProvider};
pub use quality::{ConfidenceTier, QualityAssessment, QualityFlag, QualityGate};
pub use record::{MetricRecord, ProducerKind, ProducerPayload};
pub use risk::{RiskCategory, RiskRecord, RiskSynthesizer, Tier};
pub use sample::{EntityKind, Outcome, Sample, VerificationOutcome, VerificationResult};
pub use store::MetricStore;
