//! PE header and version resource parsing.

use chrono::{SecondsFormat, TimeZone, Utc};
use log::debug;
use pelite::resources::Resources;
use serde::Serialize;

/// Metadata of a Windows executable.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PeMetadata {
    /// Link timestamp from the COFF header, RFC 3339 UTC
    pub compilation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
}

/// Parses an in-memory PE image, trying PE32+ first.
pub fn parse_metadata(bytes: &[u8]) -> Option<PeMetadata> {
    let (timestamp, resources) = match pelite::pe64::PeFile::from_bytes(bytes) {
        Ok(pe) => {
            use pelite::pe64::Pe;
            (pe.file_header().TimeDateStamp, pe.resources().ok())
        }
        Err(_) => match pelite::pe32::PeFile::from_bytes(bytes) {
            Ok(pe) => {
                use pelite::pe32::Pe;
                (pe.file_header().TimeDateStamp, pe.resources().ok())
            }
            Err(e) => {
                debug!("Failed to parse PE file: {:?}", e);
                return None;
            }
        },
    };

    let mut metadata = PeMetadata {
        compilation: format_timestamp(timestamp),
        ..Default::default()
    };
    if let Some(resources) = resources {
        read_version_strings(resources, &mut metadata);
    }
    Some(metadata)
}

fn read_version_strings(resources: Resources<'_>, metadata: &mut PeMetadata) {
    let version_info = match resources.version_info() {
        Ok(version_info) => version_info,
        Err(_) => return,
    };

    // Windows binaries usually carry 0x0409 rather than the neutral language
    for lang in version_info.translation() {
        version_info.strings(*lang, |key: &str, value: &str| {
            let slot = match key {
                "CompanyName" => &mut metadata.company,
                "FileDescription" => &mut metadata.description,
                "FileVersion" => &mut metadata.file_version,
                "OriginalFilename" => &mut metadata.original_file_name,
                "ProductName" => &mut metadata.product,
                _ => return,
            };
            if slot.is_none() {
                *slot = Some(value.to_string());
            }
        });
    }
}

pub fn format_timestamp(timestamp: u32) -> String {
    Utc.timestamp_opt(i64::from(timestamp), 0)
        .single()
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}
