// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! Externalized result references (§6): when a task outcome's result
//! exceeds `RESULT_EXTERNALIZE_THRESHOLD_BYTES`, the worker writes the
//! payload to object storage and the event carries a [`ResultRef`] instead
//! of the inline value.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStore {
    S3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    None,
    Gzip,
    Zstd,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRef {
    pub store: ResultStore,
    pub uri: String,
    pub size: u64,
    pub checksum: String,
    #[serde(default = "default_compression")]
    pub compression: Compression,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_hint: Option<String>,
}

fn default_compression() -> Compression {
    Compression::None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let r = ResultRef {
            store: ResultStore::S3,
            uri: "s3://bucket/key".into(),
            size: 1024,
            checksum: "sha256:abc".into(),
            compression: Compression::Gzip,
            schema_hint: Some("parquet".into()),
        };
        let json = serde_json::to_string(&r).unwrap();
        let back: ResultRef = serde_json::from_str(&json).unwrap();
        assert_eq!(back.uri, r.uri);
        assert_eq!(back.compression, Compression::Gzip);
    }

    #[test]
    fn compression_defaults_to_none() {
        let json = r#"{"store":"s3","uri":"s3://b/k","size":1,"checksum":"x"}"#;
        let r: ResultRef = serde_json::from_str(json).unwrap();
        assert_eq!(r.compression, Compression::None);
    }
}
