// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! Container tool (§6): job descriptor `{image, command, args, env,
//! resources, files, timeout}` run as a Kubernetes `Job`, result is exit
//! code plus logs.

use crate::context::TaskContext;
use crate::registry::Tool;
use async_trait::async_trait;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{Container, EnvVar, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{DeleteParams, ListParams, LogParams, PostParams};
use kube::{Api, Client};
use noetl_core::{ErrorKind, Outcome, TaskError};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
struct ContainerArgs {
    image: String,
    #[serde(default)]
    command: Vec<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: HashMap<String, String>,
}

pub struct ContainerTool {
    client: Client,
    namespace: String,
}

impl ContainerTool {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self { client, namespace: namespace.into() }
    }

    fn job_manifest(&self, name: &str, args: &ContainerArgs) -> Job {
        let env: Vec<EnvVar> = args
            .env
            .iter()
            .map(|(name, value)| EnvVar { name: name.clone(), value: Some(value.clone()), value_from: None })
            .collect();

        let container = Container {
            name: "task".to_string(),
            image: Some(args.image.clone()),
            command: if args.command.is_empty() { None } else { Some(args.command.clone()) },
            args: if args.args.is_empty() { None } else { Some(args.args.clone()) },
            env: if env.is_empty() { None } else { Some(env) },
            ..Container::default()
        };

        Job {
            metadata: ObjectMeta { name: Some(name.to_string()), namespace: Some(self.namespace.clone()), ..Default::default() },
            spec: Some(JobSpec {
                backoff_limit: Some(0),
                template: PodTemplateSpec {
                    spec: Some(PodSpec { restart_policy: Some("Never".to_string()), containers: vec![container], ..Default::default() }),
                    ..Default::default()
                },
                ..Default::default()
            }),
            status: None,
        }
    }
}

#[async_trait]
impl Tool for ContainerTool {
    fn kind(&self) -> &'static str {
        "container"
    }

    async fn execute(&self, args: Value, ctx: &TaskContext) -> Outcome {
        let args: ContainerArgs = match serde_json::from_value(args) {
            Ok(a) => a,
            Err(e) => return Outcome::failure(TaskError::new(ErrorKind::Invalid, format!("malformed container args: {e}"))),
        };

        let jobs: Api<Job> = Api::namespaced(self.client.clone(), &self.namespace);
        let name = format!("noetl-{}-{}", ctx.step_id.to_lowercase().replace('_', "-"), nanoid::nanoid!(6));
        let manifest = self.job_manifest(&name, &args);

        if let Err(e) = jobs.create(&PostParams::default(), &manifest).await {
            return Outcome::failure(TaskError::new(ErrorKind::Transient, format!("failed to create job: {e}")));
        }

        let pods: Api<k8s_openapi::api::core::v1::Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        let deadline = tokio::time::Instant::now() + ctx.timeout;
        let exit_code = loop {
            if tokio::time::Instant::now() > deadline {
                let _ = jobs.delete(&name, &DeleteParams::background()).await;
                return Outcome::failure(TaskError::new(ErrorKind::Timeout, "container job exceeded timeout"));
            }
            match jobs.get(&name).await {
                Ok(job) => {
                    let status = job.status.unwrap_or_default();
                    if status.succeeded.unwrap_or(0) > 0 {
                        break 0;
                    }
                    if status.failed.unwrap_or(0) > 0 {
                        break 1;
                    }
                }
                Err(e) => return Outcome::failure(TaskError::new(ErrorKind::Transient, format!("failed polling job: {e}"))),
            }
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        };

        let selector = format!("job-name={name}");
        let pod_name = pods
            .list(&ListParams::default().labels(&selector))
            .await
            .ok()
            .and_then(|list| list.items.into_iter().next())
            .and_then(|pod| pod.metadata.name);

        let logs = if let Some(pod_name) = pod_name {
            pods.logs(&pod_name, &LogParams::default()).await.unwrap_or_default()
        } else {
            String::new()
        };

        let _ = jobs.delete(&name, &DeleteParams::background()).await;

        let result = serde_json::json!({ "exit_code": exit_code, "logs": logs });
        if exit_code == 0 {
            Outcome::success(result)
        } else {
            Outcome::failure(TaskError::new(ErrorKind::Permanent, "container job exited non-zero").with_detail("logs", logs))
        }
    }
}
