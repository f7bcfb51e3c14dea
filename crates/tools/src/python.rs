// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! Python tool (§6): inline or external script `{uri, source}`; result
//! via a `result=` assignment or a `main(**args)` return, both captured
//! through a small shim script piped to the interpreter's stdin and the
//! result read back as JSON on stdout.

use crate::context::TaskContext;
use crate::registry::Tool;
use async_trait::async_trait;
use noetl_core::{ErrorKind, Outcome, TaskError};
use serde::Deserialize;
use serde_json::Value;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

#[derive(Debug, Deserialize)]
struct PythonArgs {
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    args: serde_json::Map<String, Value>,
}

const SHIM_PREAMBLE: &str = "\
import json, sys
__args = json.loads(sys.stdin.readline())
result = None
";

const SHIM_EPILOGUE: &str = "\
if 'main' in dir() and callable(main):
    result = main(**__args)
print(json.dumps(result))
";

pub struct PythonTool {
    interpreter: String,
}

impl PythonTool {
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self { interpreter: interpreter.into() }
    }
}

impl Default for PythonTool {
    fn default() -> Self {
        Self::new("python3")
    }
}

#[async_trait]
impl Tool for PythonTool {
    fn kind(&self) -> &'static str {
        "python"
    }

    async fn execute(&self, args: Value, ctx: &TaskContext) -> Outcome {
        let args: PythonArgs = match serde_json::from_value(args) {
            Ok(a) => a,
            Err(e) => return Outcome::failure(TaskError::new(ErrorKind::Invalid, format!("malformed python args: {e}"))),
        };

        let source = match (&args.source, &args.uri) {
            (Some(inline), _) => inline.clone(),
            (None, Some(uri)) => match tokio::fs::read_to_string(uri).await {
                Ok(s) => s,
                Err(e) => return Outcome::failure(TaskError::new(ErrorKind::Invalid, format!("failed reading script {uri}: {e}"))),
            },
            (None, None) => return Outcome::failure(TaskError::new(ErrorKind::Invalid, "python task requires source or uri")),
        };

        let script = format!("{SHIM_PREAMBLE}{source}\n{SHIM_EPILOGUE}");

        let mut child = match Command::new(&self.interpreter)
            .arg("-c")
            .arg(&script)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(c) => c,
            Err(e) => return Outcome::failure(TaskError::new(ErrorKind::Permanent, format!("failed to spawn python: {e}"))),
        };

        if let Some(mut stdin) = child.stdin.take() {
            let payload = Value::Object(args.args);
            if let Ok(line) = serde_json::to_vec(&payload) {
                let _ = stdin.write_all(&line).await;
                let _ = stdin.write_all(b"\n").await;
            }
        }

        let timeout_result = tokio::time::timeout(ctx.timeout, child.wait_with_output()).await;
        let output = match timeout_result {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Outcome::failure(TaskError::new(ErrorKind::Permanent, format!("python process error: {e}"))),
            Err(_) => return Outcome::failure(TaskError::new(ErrorKind::Timeout, "python script exceeded timeout")),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Outcome::failure(TaskError::new(ErrorKind::Permanent, format!("python script exited non-zero: {stderr}")));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let last_line = stdout.lines().last().unwrap_or("null");
        match serde_json::from_str::<Value>(last_line) {
            Ok(result) => Outcome::success(result),
            Err(e) => Outcome::failure(TaskError::new(ErrorKind::Permanent, format!("failed parsing python result: {e}"))),
        }
    }
}
