use std::process::Command;

use anyhow::{bail, Context, Result};
use log::{debug, info, warn};
use serde_json::Value;

use super::collector::AbstractCollector;
use crate::artifacts::{ArtifactDefinition, Source, SourceType};
use crate::output::Outputs;
use crate::variables::HostVariables;

const DEFAULT_NAMESPACE: &str = r"root\cimv2";

/// Runs one query in a namespace and returns its raw JSON text.
pub type QueryRunner = Box<dyn Fn(&str, &str) -> Result<String> + Send>;

#[derive(Debug, Clone)]
struct WmiQuery {
    artifact: String,
    query: String,
    namespace: String,
}

/// Runs WMI sources through PowerShell's CIM cmdlets.
pub struct WmiExecutor {
    queries: Vec<WmiQuery>,
    runner: Option<QueryRunner>,
}

impl Default for WmiExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl WmiExecutor {
    /// Only Windows hosts get a runner; elsewhere WMI sources are refused.
    pub fn new() -> Self {
        let runner: Option<QueryRunner> = if cfg!(target_os = "windows") {
            Some(Box::new(powershell_query))
        } else {
            None
        };
        Self {
            queries: Vec::new(),
            runner,
        }
    }

    pub fn with_runner(runner: QueryRunner) -> Self {
        Self {
            queries: Vec::new(),
            runner: Some(runner),
        }
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}

impl AbstractCollector for WmiExecutor {
    fn name(&self) -> &'static str {
        "wmi"
    }

    fn register_source(
        &mut self,
        definition: &ArtifactDefinition,
        source: &Source,
        variables: &HostVariables,
    ) -> bool {
        let SourceType::Wmi(wmi) = &source.source_type else {
            return false;
        };
        if self.runner.is_none() {
            return false;
        }

        let namespace = wmi
            .base_object
            .as_deref()
            .map(namespace_of)
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
        for query in variables.substitute(&wmi.query) {
            self.queries.push(WmiQuery {
                artifact: definition.name.clone(),
                query,
                namespace: namespace.clone(),
            });
        }
        true
    }

    fn collect(&mut self, output: &mut Outputs) {
        let Some(runner) = &self.runner else {
            return;
        };
        if !self.queries.is_empty() {
            info!("Running {} WMI queries...", self.queries.len());
        }

        for query in &self.queries {
            debug!("WMI query '{}' in {}", query.query, query.namespace);
            let raw = match runner(&query.query, &query.namespace) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(
                        "WMI query '{}' for artifact '{}' failed: {:#}",
                        query.query, query.artifact, e
                    );
                    continue;
                }
            };
            match parse_result(&raw) {
                Ok(value) => output.add_collected_wmi(&query.artifact, &query.query, value),
                Err(e) => warn!(
                    "Invalid JSON from WMI query '{}' for artifact '{}': {}",
                    query.query, query.artifact, e
                ),
            }
        }
    }
}

/// Namespace named by a `base_object` such as `winmgmts:\root\cimv2`.
fn namespace_of(base_object: &str) -> String {
    let trimmed = base_object.trim();
    let trimmed = trimmed.strip_prefix("winmgmts:").unwrap_or(trimmed);
    let trimmed = trimmed.trim_matches(|c| c == '\\' || c == ' ');
    if trimmed.is_empty() {
        DEFAULT_NAMESPACE.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Parses query output, wrapping a lone object in an array.
fn parse_result(raw: &str) -> serde_json::Result<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Value::Array(Vec::new()));
    }
    match serde_json::from_str(trimmed)? {
        Value::Array(rows) => Ok(Value::Array(rows)),
        row => Ok(Value::Array(vec![row])),
    }
}

fn powershell_query(query: &str, namespace: &str) -> Result<String> {
    let script = format!(
        "Get-CimInstance -Namespace '{}' -Query \"{}\" | ConvertTo-Json -Depth 3",
        namespace,
        query.replace('"', "`\"")
    );
    let output = Command::new("powershell")
        .args(["-NoProfile", "-NonInteractive", "-Command", &script])
        .output()
        .context("Failed to run powershell")?;
    if !output.status.success() {
        bail!(
            "powershell returned code {}: {}",
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
