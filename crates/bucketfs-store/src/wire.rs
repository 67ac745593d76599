//! JSON wire types for the object-store HTTP API and their mapping
//! to/from [`ObjectRecord`] (§3).

use std::collections::HashMap;

use bucketfs_core::domain::{Generation, Metageneration, ObjectName, ObjectRecord, RecordKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The JSON shape of a single object resource, modeled loosely on GCS's
/// `objects` resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectResource {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    pub generation: String,
    #[serde(default = "default_metageneration")]
    pub metageneration: String,
    #[serde(default, rename = "contentType")]
    pub content_type: Option<String>,
    pub updated: DateTime<Utc>,
    #[serde(default)]
    pub crc32c: Option<String>,
    #[serde(default)]
    pub md5_hash: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default, rename = "storageClass")]
    pub storage_class: Option<String>,
}

fn default_metageneration() -> String {
    "1".to_string()
}

/// One page of a `list` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListResource {
    #[serde(default)]
    pub items: Vec<ObjectResource>,
    #[serde(default)]
    pub prefixes: Vec<String>,
    #[serde(default, rename = "nextPageToken")]
    pub next_page_token: Option<String>,
}

impl ObjectResource {
    pub fn into_record(self) -> anyhow::Result<ObjectRecord> {
        let crc32c = self
            .crc32c
            .as_deref()
            .map(decode_crc32c_base64)
            .transpose()?;

        Ok(ObjectRecord {
            name: ObjectName::new(self.name)?,
            size: self.size,
            generation: Generation(self.generation.parse()?),
            metageneration: Metageneration(self.metageneration.parse()?),
            content_type: self.content_type,
            updated: self.updated,
            crc32c,
            md5: self.md5_hash,
            metadata: self.metadata,
            storage_class: self.storage_class,
            kind: RecordKind::Object,
        })
    }
}

/// The wire format encodes CRC32C as base64 of the big-endian 4 bytes,
/// matching GCS's convention.
fn decode_crc32c_base64(encoded: &str) -> anyhow::Result<u32> {
    use base64::Engine;
    let bytes = base64::engine::general_purpose::STANDARD.decode(encoded)?;
    if bytes.len() != 4 {
        anyhow::bail!("crc32c field did not decode to 4 bytes");
    }
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_resource_maps_to_record() {
        let json = r#"{
            "name": "a/b/c",
            "size": 5,
            "generation": "10",
            "metageneration": "1",
            "contentType": "text/plain",
            "updated": "2024-01-01T00:00:00Z",
            "metadata": {}
        }"#;
        let resource: ObjectResource = serde_json::from_str(json).unwrap();
        let record = resource.into_record().unwrap();
        assert_eq!(record.name.as_str(), "a/b/c");
        assert_eq!(record.generation.get(), 10);
        assert_eq!(record.size, 5);
    }

    #[test]
    fn list_resource_defaults_to_empty() {
        let resource: ListResource = serde_json::from_str("{}").unwrap();
        assert!(resource.items.is_empty());
        assert!(resource.prefixes.is_empty());
        assert!(resource.next_page_token.is_none());
    }
}
