use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Sentinel transition target that completes the run.
pub const END_STEP: &str = "end";

/// Predicate over run variables. Evaluated against the stringified value of
/// the referenced variable, so `Equals { key: "channel", value: "email" }`
/// matches both `"email"` and a JSON string `"email"`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Guard {
    #[default]
    Always,
    Equals {
        key: String,
        value: String,
    },
    NotEquals {
        key: String,
        value: String,
    },
    OneOf {
        key: String,
        values: Vec<String>,
    },
    Contains {
        key: String,
        needle: String,
    },
}

impl Guard {
    pub fn evaluate(&self, variables: &Map<String, Value>) -> bool {
        match self {
            Self::Always => true,
            Self::Equals { key, value } => lookup(variables, key).as_deref() == Some(value),
            Self::NotEquals { key, value } => lookup(variables, key).as_deref() != Some(value),
            Self::OneOf { key, values } => lookup(variables, key)
                .map(|found| values.iter().any(|candidate| candidate == &found))
                .unwrap_or(false),
            Self::Contains { key, needle } => {
                lookup(variables, key).map(|found| found.contains(needle)).unwrap_or(false)
            }
        }
    }
}

fn lookup(variables: &Map<String, Value>, key: &str) -> Option<String> {
    variables.get(key).map(|value| match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    Linear,
    Exponential,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    pub strategy: RetryStrategy,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            strategy: RetryStrategy::Exponential,
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
        }
    }
}

impl RetrySettings {
    /// Delay before the attempt following failed attempt `attempt` (1-based).
    /// Linear: `base × attempt`. Exponential: `base × 2^attempt`, capped.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let raw_ms = match self.strategy {
            RetryStrategy::Linear => self.base_delay_ms.saturating_mul(u64::from(attempt)),
            RetryStrategy::Exponential => self
                .base_delay_ms
                .saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX)),
        };
        Duration::from_millis(raw_ms.min(self.max_delay_ms))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnFailure {
    Skip,
    #[default]
    Stop,
    Continue,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    pub capability: String,
    #[serde(default)]
    pub config: Map<String, Value>,
    /// Step-level retry overrides the workflow default when present.
    #[serde(default)]
    pub retry: Option<RetrySettings>,
    /// Step-level timeout overrides the workflow default when present.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub on_failure: OnFailure,
    #[serde(default)]
    pub requires_human_approval: bool,
}

impl Step {
    pub fn retry_settings(&self, defaults: &WorkflowDefaults) -> RetrySettings {
        self.retry.unwrap_or(defaults.retry)
    }

    pub fn timeout(&self, defaults: &WorkflowDefaults) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(defaults.timeout_secs))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub guard: Guard,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefaults {
    pub retry: RetrySettings,
    pub timeout_secs: u64,
}

impl Default for WorkflowDefaults {
    fn default() -> Self {
        Self { retry: RetrySettings::default(), timeout_secs: 300 }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub transitions: Vec<Transition>,
    #[serde(default)]
    pub variables: Map<String, Value>,
    #[serde(default)]
    pub defaults: WorkflowDefaults,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

impl WorkflowDefinition {
    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|step| step.name == name)
    }

    /// Entry point is the first declared step.
    pub fn entry_step(&self) -> Option<&Step> {
        self.steps.first()
    }

    /// Default continuation: the next step in declaration order.
    pub fn successor(&self, name: &str) -> Option<&Step> {
        let index = self.steps.iter().position(|step| step.name == name)?;
        self.steps.get(index + 1)
    }

    pub fn transitions_from<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Transition> {
        self.transitions.iter().filter(move |transition| transition.from == name)
    }

    /// Returns every violation found; empty means the definition is usable.
    /// Capability names are checked separately against the live registry.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.steps.is_empty() {
            errors.push("workflow has no steps".to_string());
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.name.as_str()) {
                errors.push(format!("duplicate step name `{}`", step.name));
            }
            if step.capability.trim().is_empty() {
                errors.push(format!("step `{}` has an empty capability reference", step.name));
            }
            if let Some(retry) = &step.retry {
                if retry.max_attempts == 0 {
                    errors.push(format!("step `{}` declares zero max_attempts", step.name));
                }
            }
        }

        let known: HashSet<&str> = self.steps.iter().map(|step| step.name.as_str()).collect();
        for transition in &self.transitions {
            if !known.contains(transition.from.as_str()) {
                errors.push(format!("transition from unknown step `{}`", transition.from));
            }
            if transition.to != END_STEP && !known.contains(transition.to.as_str()) {
                errors.push(format!("transition to unknown step `{}`", transition.to));
            }
        }

        if self.defaults.retry.max_attempts == 0 {
            errors.push("workflow default retry declares zero max_attempts".to_string());
        }

        errors
    }
}
