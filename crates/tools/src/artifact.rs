// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! Artifact tool (§6): get/put a task result by [`ResultRef`] against an
//! S3-compatible object store, used both directly as a task kind and by
//! the worker's result-externalization path once a result exceeds
//! `RESULT_EXTERNALIZE_THRESHOLD_BYTES`.

use crate::context::TaskContext;
use crate::registry::Tool;
use async_trait::async_trait;
use aws_sdk_s3::Client as S3Client;
use noetl_core::{Compression, ErrorKind, Outcome, ResultRef, ResultStore, TaskError};
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum ArtifactArgs {
    Get { uri: String },
    Put { bucket: String, key: String, value: Value },
}

pub struct ArtifactTool {
    client: S3Client,
}

impl ArtifactTool {
    pub fn new(client: S3Client) -> Self {
        Self { client }
    }

    fn parse_uri(uri: &str) -> Option<(&str, &str)> {
        let rest = uri.strip_prefix("s3://")?;
        rest.split_once('/')
    }

    pub async fn put(&self, bucket: &str, key: &str, body: &[u8]) -> Result<ResultRef, TaskError> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body.to_vec().into())
            .send()
            .await
            .map_err(|e| TaskError::new(ErrorKind::Transient, format!("artifact put failed: {e}")))?;

        let mut hasher = Sha256::new();
        hasher.update(body);
        let checksum = format!("sha256:{:x}", hasher.finalize());

        Ok(ResultRef {
            store: ResultStore::S3,
            uri: format!("s3://{bucket}/{key}"),
            size: body.len() as u64,
            checksum,
            compression: Compression::None,
            schema_hint: None,
        })
    }

    pub async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, TaskError> {
        let object = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| TaskError::new(ErrorKind::Transient, format!("artifact get failed: {e}")))?;

        object
            .body
            .collect()
            .await
            .map(|data| data.into_bytes().to_vec())
            .map_err(|e| TaskError::new(ErrorKind::Transient, format!("artifact body read failed: {e}")))
    }
}

#[async_trait]
impl Tool for ArtifactTool {
    fn kind(&self) -> &'static str {
        "artifact"
    }

    async fn execute(&self, args: Value, _ctx: &TaskContext) -> Outcome {
        let args: ArtifactArgs = match serde_json::from_value(args) {
            Ok(a) => a,
            Err(e) => return Outcome::failure(TaskError::new(ErrorKind::Invalid, format!("malformed artifact args: {e}"))),
        };

        match args {
            ArtifactArgs::Get { uri } => {
                let Some((bucket, key)) = Self::parse_uri(&uri) else {
                    return Outcome::failure(TaskError::new(ErrorKind::Invalid, format!("not an s3 uri: {uri}")));
                };
                match self.get(bucket, key).await {
                    Ok(bytes) => {
                        let value: Value = serde_json::from_slice(&bytes).unwrap_or(Value::String(String::from_utf8_lossy(&bytes).to_string()));
                        Outcome::success(value)
                    }
                    Err(e) => Outcome::failure(e),
                }
            }
            ArtifactArgs::Put { bucket, key, value } => {
                let body = match serde_json::to_vec(&value) {
                    Ok(b) => b,
                    Err(e) => return Outcome::failure(TaskError::new(ErrorKind::Invalid, format!("failed encoding artifact value: {e}"))),
                };
                match self.put(&bucket, &key, &body).await {
                    Ok(result_ref) => Outcome::success(serde_json::to_value(result_ref).unwrap_or(Value::Null)),
                    Err(e) => Outcome::failure(e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_s3_uri_into_bucket_and_key() {
        assert_eq!(ArtifactTool::parse_uri("s3://bucket/path/to/key"), Some(("bucket", "path/to/key")));
        assert_eq!(ArtifactTool::parse_uri("not-s3"), None);
    }
}
