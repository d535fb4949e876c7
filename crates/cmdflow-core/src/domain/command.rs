//! Static command declarations: `CommandDefinition`, `StageSpec`, `RetryPolicy`.
//!
//! These are loaded by the command-resolution collaborator and are read-only
//! input to the execution core.

use std::borrow::Cow;
use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

/// Classification of a stage failure, consumed by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Generic provider/model failure.
    Error,
    Timeout,
    RateLimited,
    Network,
    /// The provider answered but the output was unusable.
    InvalidOutput,
    /// Caller cancelled or the deadline passed. Never retried.
    Cancelled,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Error => "error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Network => "network",
            ErrorKind::InvalidOutput => "invalid_output",
            ErrorKind::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Per-stage retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Must be >= 1.
    pub max_attempts: u32,
    /// Fixed delay between attempts (milliseconds).
    pub backoff_ms: u64,
    /// Failure kinds that trigger another attempt.
    #[serde(default)]
    pub retry_on: BTreeSet<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 1_000,
            retry_on: [
                ErrorKind::Error,
                ErrorKind::Timeout,
                ErrorKind::RateLimited,
                ErrorKind::Network,
            ]
            .into_iter()
            .collect(),
        }
    }
}

impl RetryPolicy {
    /// A policy that runs every stage exactly once.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 0,
            retry_on: BTreeSet::new(),
        }
    }

    /// Whether a failure of `kind` earns another attempt.
    ///
    /// `Cancelled` is never retried, even when listed in `retry_on`.
    pub fn should_retry(&self, kind: ErrorKind) -> bool {
        kind != ErrorKind::Cancelled && self.retry_on.contains(&kind)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("retry_policy.max_attempts must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Granularity at which repeated work is memoized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStrategy {
    #[default]
    None,
    /// Memo keyed by `(stage id, serialized inputs)`.
    Stage,
    /// Memo keyed by the whole command + argument set.
    Command,
}

/// Rule for combining multi-stage outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Stages run strictly in declared order, each seeing all prior outputs.
    #[default]
    Sequential,
    /// Independent stages run concurrently; outputs are shallow-merged.
    Parallel,
}

/// One step of a command's prompt pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    /// Output key of this stage; unique within the pipeline.
    pub id: String,
    /// Prompt template reference handed to the provider.
    pub template: String,
    /// Agent role override for this stage only.
    #[serde(default)]
    pub role: Option<String>,
    /// Declared inputs. Entries naming another stage's `id` are dependencies.
    #[serde(default)]
    pub inputs: Vec<String>,
}

impl StageSpec {
    pub fn new(id: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            template: template.into(),
            role: None,
            inputs: Vec::new(),
        }
    }

    /// Builder: declare an input.
    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.inputs.push(input.into());
        self
    }

    /// Builder: run this stage as `role`.
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }
}

/// The `prompts` block of a command definition.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PromptsConfig {
    #[serde(default)]
    pub pipeline: Vec<StageSpec>,
    #[serde(default)]
    pub cache_strategy: CacheStrategy,
    #[serde(default)]
    pub merge_strategy: MergeStrategy,
    /// `None` means "use the engine's default policy".
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
}

/// Whether a command runs a declared pipeline or a single direct invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Pipeline,
    Direct,
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandKind::Pipeline => write!(f, "pipeline"),
            CommandKind::Direct => write!(f, "direct"),
        }
    }
}

/// Static declaration of a named command (e.g. `implement`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandDefinition {
    pub name: String,
    /// Default/static agent role.
    pub agent: String,
    #[serde(default)]
    pub fallback_agent: Option<String>,
    #[serde(default)]
    pub dynamic_agent_selection: bool,
    /// Roles or selection-criteria tags restricting dynamic selection.
    #[serde(default)]
    pub agent_selection_criteria: Option<Vec<String>>,
    #[serde(default)]
    pub prompts: PromptsConfig,
}

impl CommandDefinition {
    /// A static command with no pipeline.
    pub fn new(name: impl Into<String>, agent: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            agent: agent.into(),
            fallback_agent: None,
            dynamic_agent_selection: false,
            agent_selection_criteria: None,
            prompts: PromptsConfig::default(),
        }
    }

    pub fn kind(&self) -> CommandKind {
        if self.prompts.pipeline.is_empty() {
            CommandKind::Direct
        } else {
            CommandKind::Pipeline
        }
    }

    /// Role used when dynamic selection is off, inconclusive, or broken.
    pub fn fallback_role(&self) -> &str {
        self.fallback_agent.as_deref().unwrap_or(&self.agent)
    }

    /// The declared pipeline, or a single implicit stage named after the
    /// command when none is declared.
    pub fn effective_pipeline(&self) -> Cow<'_, [StageSpec]> {
        if self.prompts.pipeline.is_empty() {
            Cow::Owned(vec![StageSpec::new(&self.name, &self.name)])
        } else {
            Cow::Borrowed(&self.prompts.pipeline)
        }
    }

    /// Structural checks performed before execution starts.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("command name must not be empty".to_string());
        }
        if self.agent.trim().is_empty() {
            return Err(format!("command {} declares an empty agent", self.name));
        }
        let mut seen = HashSet::new();
        for stage in &self.prompts.pipeline {
            if stage.id.trim().is_empty() {
                return Err(format!("command {} has a stage with an empty id", self.name));
            }
            if !seen.insert(stage.id.as_str()) {
                return Err(format!(
                    "command {} declares stage {} more than once",
                    self.name, stage.id
                ));
            }
        }
        if let Some(policy) = &self.prompts.retry_policy {
            policy.validate()?;
        }
        Ok(())
    }
}
