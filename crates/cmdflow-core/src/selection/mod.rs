//! Dynamic agent selection.
//!
//! Resolves which agent persona should execute a task from free-text task
//! signals, session context, and a capability registry.
//!
//! # Module layout
//!
//! - [`registry`]: `CapabilityRegistry`, `CapabilityRecord`, `CapabilitySource`
//! - [`classifier`]: `TaskClassifier::classify` (task text -> signals)
//! - [`analyzer`]: `ContextAnalyzer::analyze` (session context -> signals)
//! - [`matcher`]: `match_capabilities` (signals x registry -> ranked candidates)
//! - [`resolver`]: `DynamicAgentResolver::resolve_agent`, `ResolverConfig`
//! - [`error`]: `SelectionError`, `SelectionResult`

pub mod analyzer;
pub mod classifier;
pub mod error;
pub mod matcher;
pub mod registry;
pub mod resolver;

pub use analyzer::ContextAnalyzer;
pub use classifier::TaskClassifier;
pub use error::{SelectionError, SelectionResult};
pub use matcher::match_capabilities;
pub use registry::{CapabilityRecord, CapabilityRegistry, CapabilitySource};
pub use resolver::{DynamicAgentResolver, ResolverConfig};
