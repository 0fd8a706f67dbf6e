//! Core tool types.
//!
//! A [`ToolRecord`] is the unit of reuse: a canonical description plus the
//! complete source and run-time requirements of one synthesized program.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, ToolError};

/// Sentinel a generated list block uses to say "no entries".
pub const NONE_SENTINEL: &str = "NONE";

/// A synthesized, persisted tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRecord {
    /// Unique identifier, assigned at synthesis and never changed.
    pub id: String,

    /// Canonical summary of the problem the tool solves.
    pub description: String,

    /// Positional argument names.
    pub arguments: Vec<String>,

    /// Primitive type of each argument, parallel to `arguments`.
    pub argument_types: Vec<String>,

    /// Environment variables that must be set for the tool to run.
    pub env_variables: Vec<String>,

    /// Packages the implementation imports at run time.
    pub dependencies: Vec<String>,

    /// Complete source, already wrapped with a command-line entry point.
    pub implementation: String,

    /// When the record was created.
    pub created_at: DateTime<Utc>,

    /// When the record was last patched.
    pub updated_at: DateTime<Utc>,
}

impl ToolRecord {
    /// Create a record with a fresh id.
    pub fn new(description: impl Into<String>, implementation: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), description, implementation)
    }

    /// Create a record with a caller-assigned id.
    pub fn with_id(
        id: impl Into<String>,
        description: impl Into<String>,
        implementation: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            description: description.into(),
            arguments: Vec::new(),
            argument_types: Vec::new(),
            env_variables: Vec::new(),
            dependencies: Vec::new(),
            implementation: implementation.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the argument names and their types.
    pub fn with_arguments(mut self, arguments: Vec<String>, argument_types: Vec<String>) -> Self {
        self.arguments = arguments;
        self.argument_types = argument_types;
        self
    }

    /// Set the required environment variables.
    pub fn with_env_variables(mut self, env_variables: Vec<String>) -> Self {
        self.env_variables = env_variables;
        self
    }

    /// Set the run-time dependencies.
    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Check the record invariants.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(ToolError::InvalidDefinition("id cannot be empty".to_string()));
        }
        if self.description.trim().is_empty() {
            return Err(ToolError::InvalidDefinition(
                "description cannot be empty".to_string(),
            ));
        }
        if self.implementation.trim().is_empty() {
            return Err(ToolError::InvalidDefinition(
                "implementation cannot be empty".to_string(),
            ));
        }
        if self.arguments.len() != self.argument_types.len() {
            return Err(ToolError::InvalidDefinition(format!(
                "{} arguments but {} argument types",
                self.arguments.len(),
                self.argument_types.len()
            )));
        }
        Ok(())
    }
}

/// A partial update of the mutable fields of a [`ToolRecord`].
///
/// Fields left as `None` are not touched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPatch {
    pub description: Option<String>,
    pub arguments: Option<Vec<String>>,
    pub argument_types: Option<Vec<String>>,
    pub env_variables: Option<Vec<String>>,
    pub dependencies: Option<Vec<String>>,
    pub implementation: Option<String>,
}

impl ToolPatch {
    /// Create an empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Replace the implementation.
    pub fn implementation(mut self, implementation: impl Into<String>) -> Self {
        self.implementation = Some(implementation.into());
        self
    }

    /// Replace the argument names and types together.
    pub fn arguments(mut self, arguments: Vec<String>, argument_types: Vec<String>) -> Self {
        self.arguments = Some(arguments);
        self.argument_types = Some(argument_types);
        self
    }

    /// Replace the required environment variables.
    pub fn env_variables(mut self, env_variables: Vec<String>) -> Self {
        self.env_variables = Some(env_variables);
        self
    }

    /// Replace the dependencies.
    pub fn dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = Some(dependencies);
        self
    }

    /// Whether the patch touches no field.
    pub fn is_empty(&self) -> bool {
        self.description.is_none()
            && self.arguments.is_none()
            && self.argument_types.is_none()
            && self.env_variables.is_none()
            && self.dependencies.is_none()
            && self.implementation.is_none()
    }

    /// Apply the patch to `record`, returning the updated record.
    ///
    /// The result must still satisfy [`ToolRecord::validate`].
    pub fn apply(&self, record: &ToolRecord) -> Result<ToolRecord> {
        if self.is_empty() {
            return Err(ToolError::InvalidDefinition(
                "patch must change at least one field".to_string(),
            ));
        }

        let mut updated = record.clone();
        if let Some(description) = &self.description {
            updated.description = description.clone();
        }
        if let Some(arguments) = &self.arguments {
            updated.arguments = arguments.clone();
        }
        if let Some(argument_types) = &self.argument_types {
            updated.argument_types = argument_types.clone();
        }
        if let Some(env_variables) = &self.env_variables {
            updated.env_variables = env_variables.clone();
        }
        if let Some(dependencies) = &self.dependencies {
            updated.dependencies = dependencies.clone();
        }
        if let Some(implementation) = &self.implementation {
            updated.implementation = implementation.clone();
        }
        updated.updated_at = Utc::now();
        updated.validate()?;
        Ok(updated)
    }
}

/// A tool record bound to one request's invocation command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedTool {
    #[serde(flatten)]
    pub record: ToolRecord,

    /// Shell command running the materialized tool for this request.
    pub command: String,

    /// Whether an existing record was reused.
    pub reused: bool,
}

/// Parse a comma-joined list block.
///
/// Entries are trimmed and empty entries dropped; the `NONE` sentinel (in
/// any case) or an empty block yields an empty list.
pub fn parse_list(block: &str) -> Vec<String> {
    let trimmed = block.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(NONE_SENTINEL) {
        return Vec::new();
    }
    trimmed
        .split([',', '\n'])
        .map(str::trim)
        .filter(|entry| !entry.is_empty() && !entry.eq_ignore_ascii_case(NONE_SENTINEL))
        .map(str::to_string)
        .collect()
}

/// Render a list in the comma-joined form, using `NONE` when empty.
pub fn join_list(items: &[String]) -> String {
    if items.is_empty() {
        NONE_SENTINEL.to_string()
    } else {
        items.join(", ")
    }
}
