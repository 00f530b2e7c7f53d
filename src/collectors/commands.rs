use std::io;
use std::process::{Command, Output};

use log::{debug, info, warn};
use serde_json::json;

use super::collector::AbstractCollector;
use crate::artifacts::{ArtifactDefinition, Source, SourceType};
use crate::output::Outputs;
use crate::variables::HostVariables;

/// Artifact whose netsh output is reduced to the interesting rule fields.
const FIREWALL_RULES_ARTIFACT: &str = "WindowsFirewallEnabledRules";

const FIREWALL_FIELDS: &[(&str, &str)] = &[
    ("Rule Name:", "RuleName"),
    ("Enabled:", "Enabled"),
    ("Direction:", "Direction"),
    ("Profiles:", "Profiles"),
    ("Grouping:", "Grouping"),
    ("LocalIP:", "LocalIP"),
    ("RemoteIP:", "RemoteIP"),
    ("Protocol:", "Protocol"),
    ("LocalPort:", "LocalPort"),
    ("RemotePort:", "RemotePort"),
    ("Edge traversal:", "EdgeTraversal"),
    ("Action:", "Action"),
];

#[derive(Debug, Clone)]
struct CommandEntry {
    artifact: String,
    cmd: String,
    args: Vec<String>,
}

impl CommandEntry {
    fn command_line(&self) -> String {
        std::iter::once(self.cmd.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Runs COMMAND sources and stores their decoded output.
#[derive(Debug, Default)]
pub struct CommandExecutor {
    commands: Vec<CommandEntry>,
}

impl CommandExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_command(&mut self, artifact: &str, cmd: &str, args: &[String]) {
        self.commands.push(CommandEntry {
            artifact: artifact.to_string(),
            cmd: cmd.to_string(),
            args: args.to_vec(),
        });
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl AbstractCollector for CommandExecutor {
    fn name(&self) -> &'static str {
        "commands"
    }

    fn register_source(
        &mut self,
        definition: &ArtifactDefinition,
        source: &Source,
        _variables: &HostVariables,
    ) -> bool {
        let SourceType::Command(command) = &source.source_type else {
            return false;
        };
        if cfg!(target_os = "windows") && command.cmd.contains('/') {
            debug!(
                "Skipping command '{}' for artifact '{}': not a Windows command",
                command.cmd, definition.name
            );
            return true;
        }
        self.add_command(&definition.name, &command.cmd, &command.args);
        true
    }

    fn collect(&mut self, output: &mut Outputs) {
        if self.commands.is_empty() {
            debug!("No commands to execute");
            return;
        }
        info!("Executing {} commands...", self.commands.len());

        for entry in &self.commands {
            let command_line = entry.command_line();
            debug!("Executing: {}", command_line);

            let raw = match run(entry, &command_line) {
                Ok(out) => {
                    if !out.status.success() {
                        warn!(
                            "Command '{}' for artifact '{}' returned code {}",
                            command_line,
                            entry.artifact,
                            out.status.code().unwrap_or(-1)
                        );
                    }
                    let mut raw = out.stdout;
                    raw.extend_from_slice(&out.stderr);
                    raw
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    warn!("Command '{}' for artifact '{}' not found", entry.cmd, entry.artifact);
                    continue;
                }
                Err(e) => {
                    warn!(
                        "Command '{}' for artifact '{}' failed: {}",
                        command_line, entry.artifact, e
                    );
                    continue;
                }
            };

            let decoded = decode_output(&raw);
            let result = if entry.artifact == FIREWALL_RULES_ARTIFACT {
                parse_firewall_rules(&decoded)
            } else {
                decoded
            };
            if result.trim().is_empty() {
                continue;
            }
            output.add_collected_command(&entry.artifact, &command_line, &result);
        }
    }
}

#[cfg(target_os = "windows")]
fn run(_entry: &CommandEntry, command_line: &str) -> io::Result<Output> {
    Command::new("cmd")
        .args(["/C", &format!("chcp 65001>nul && {}", command_line)])
        .output()
}

#[cfg(not(target_os = "windows"))]
fn run(entry: &CommandEntry, _command_line: &str) -> io::Result<Output> {
    Command::new(&entry.cmd).args(&entry.args).output()
}

/// Converts raw command output to text.
///
/// Output starting with a UTF-16LE byte order mark is decoded as such. On
/// Windows, output that is not valid UTF-8 is read as the OEM code page 866.
pub fn decode_output(raw: &[u8]) -> String {
    if raw.starts_with(&[0xFF, 0xFE]) {
        let units: Vec<u16> = raw[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        return widestring::U16String::from_vec(units).to_string_lossy();
    }

    #[cfg(target_os = "windows")]
    if std::str::from_utf8(raw).is_err() {
        let (decoded, _, _) = encoding_rs::IBM866.decode(raw);
        return decoded.into_owned();
    }

    String::from_utf8_lossy(raw).into_owned()
}

/// Reduces `netsh advfirewall firewall show rule` output to a JSON array.
pub fn parse_firewall_rules(output: &str) -> String {
    let normalized = output.replace("\r\n", "\n");
    let rules: Vec<serde_json::Map<String, serde_json::Value>> = normalized
        .split("\n\n")
        .map(|block| {
            let mut rule = serde_json::Map::new();
            for line in block.lines() {
                for (prefix, field) in FIREWALL_FIELDS {
                    if let Some(value) = line.strip_prefix(prefix) {
                        rule.insert(field.to_string(), json!(value.trim()));
                    }
                }
            }
            rule
        })
        .filter(|rule| !rule.is_empty())
        .collect();

    serde_json::to_string_pretty(&rules).unwrap_or_else(|_| "[]".to_string())
}
