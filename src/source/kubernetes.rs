use std::pin::Pin;

use bytes::Bytes;
use futures::io::AsyncBufRead;
use futures::io::AsyncBufReadExt;
use k8s_openapi::api::core::v1::Pod;
use kube::api::LogParams;
use kube::Api;
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;

use super::LogSource;
use super::LogStream;
use super::ReadOutcome;
use crate::ContainerKey;
use crate::KubeConfig;
use crate::SourceError;
use crate::StreamError;

/// [`LogSource`] reading the `log` subresource of pods in one namespace.
#[derive(Clone)]
pub struct KubeLogSource {
    pods: Api<Pod>,
    config: KubeConfig,
}

impl std::fmt::Debug for KubeLogSource {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("KubeLogSource").field("config", &self.config).finish()
    }
}

impl KubeLogSource {
    /// Builds a source from the ambient kubeconfig or in-cluster service account.
    pub async fn try_default(config: KubeConfig) -> Result<Self, SourceError> {
        let client = Client::try_default().await.map_err(|e| SourceError::Unavailable {
            key: ContainerKey::pod_only(""),
            message: format!("failed to create kubernetes client: {e}"),
        })?;
        Ok(Self::new(client, config))
    }

    pub fn new(
        client: Client,
        config: KubeConfig,
    ) -> Self {
        let pods = Api::namespaced(client, &config.namespace);
        Self { pods, config }
    }

    fn log_params(
        &self,
        container: &str,
    ) -> LogParams {
        LogParams {
            container: Some(container.to_string()),
            follow: true,
            tail_lines: self.config.tail_lines,
            timestamps: self.config.timestamps,
            since_seconds: self.config.since_seconds,
            ..LogParams::default()
        }
    }

    async fn get_pod(
        &self,
        key: &ContainerKey,
    ) -> Result<Pod, SourceError> {
        self.pods.get(&key.pod).await.map_err(|e| map_kube_error(key, e))
    }
}

#[async_trait::async_trait]
impl LogSource for KubeLogSource {
    async fn open(
        &self,
        key: &ContainerKey,
    ) -> Result<Box<dyn LogStream>, SourceError> {
        let pod = self.get_pod(key).await?;
        check_container(&pod, key)?;

        let reader = self
            .pods
            .log_stream(&key.pod, &self.log_params(&key.container))
            .await
            .map_err(|e| map_kube_error(key, e))?;
        debug!(%key, namespace = %self.config.namespace, "log stream opened");

        Ok(Box::new(KubeLogStream::new(key.clone(), reader)))
    }

    async fn containers(
        &self,
        pod: &str,
    ) -> Result<Vec<String>, SourceError> {
        let key = ContainerKey::pod_only(pod);
        let pod = self.get_pod(&key).await?;
        Ok(declared_containers(&pod))
    }
}

/// Line-oriented log stream of one container.
///
/// Lines are passed on as raw bytes; nothing is decoded here.
pub struct KubeLogStream {
    key: ContainerKey,
    reader: Option<Pin<Box<dyn AsyncBufRead + Send>>>,
    /// Bytes of the current line read so far; survives an interrupted read
    line: Vec<u8>,
}

impl KubeLogStream {
    pub(crate) fn new(
        key: ContainerKey,
        reader: impl AsyncBufRead + Send + 'static,
    ) -> Self {
        Self {
            key,
            reader: Some(Box::pin(reader)),
            line: Vec::new(),
        }
    }
}

#[async_trait::async_trait]
impl LogStream for KubeLogStream {
    async fn next_chunk(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<ReadOutcome, StreamError> {
        let Self { key, reader, line } = self;
        let Some(reader) = reader.as_mut() else {
            return Ok(ReadOutcome::EndOfStream);
        };

        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(ReadOutcome::Interrupted),
            read = reader.read_until(b'\n', line) => read,
        };

        match read {
            Ok(_) if line.is_empty() => Ok(ReadOutcome::EndOfStream),
            Ok(_) => {
                // Last line of a terminated container may lack its newline
                if line.last() != Some(&b'\n') {
                    line.push(b'\n');
                }
                Ok(ReadOutcome::Chunk(Bytes::from(std::mem::take(line))))
            }
            Err(e) => Err(StreamError::new(key.clone(), e.to_string())),
        }
    }

    async fn close(&mut self) {
        if self.reader.take().is_some() {
            self.line.clear();
            trace!(key = %self.key, "log stream closed");
        }
    }
}

/// Names of the containers and init containers declared by `pod`.
pub(crate) fn declared_containers(pod: &Pod) -> Vec<String> {
    let Some(spec) = pod.spec.as_ref() else {
        return Vec::new();
    };
    spec.init_containers
        .iter()
        .flatten()
        .chain(spec.containers.iter())
        .map(|c| c.name.clone())
        .collect()
}

/// Ensures `key.container` is declared by `pod` and is not waiting to start.
pub(crate) fn check_container(
    pod: &Pod,
    key: &ContainerKey,
) -> Result<(), SourceError> {
    if !declared_containers(pod).iter().any(|name| *name == key.container) {
        return Err(SourceError::NotFound {
            key: key.clone(),
            message: format!("pod {} has no container named {}", key.pod, key.container),
        });
    }

    let Some(status) = pod.status.as_ref() else {
        return Ok(());
    };
    let waiting = status
        .init_container_statuses
        .iter()
        .flatten()
        .chain(status.container_statuses.iter().flatten())
        .find(|s| s.name == key.container)
        .and_then(|s| s.state.as_ref())
        .and_then(|state| state.waiting.as_ref());

    match waiting {
        Some(w) => Err(SourceError::NotRunning {
            key: key.clone(),
            message: w
                .message
                .clone()
                .or_else(|| w.reason.clone())
                .unwrap_or_else(|| "container is waiting".to_string()),
        }),
        None => Ok(()),
    }
}

pub(crate) fn map_kube_error(
    key: &ContainerKey,
    error: kube::Error,
) -> SourceError {
    match error {
        kube::Error::Api(resp) => match resp.code {
            404 => SourceError::NotFound {
                key: key.clone(),
                message: resp.message,
            },
            401 | 403 => SourceError::PermissionDenied {
                key: key.clone(),
                message: resp.message,
            },
            // The API server answers 400 for containers that are still creating
            400 if resp.message.contains("waiting to start") => SourceError::NotRunning {
                key: key.clone(),
                message: resp.message,
            },
            _ => SourceError::Unavailable {
                key: key.clone(),
                message: format!("{} ({})", resp.message, resp.code),
            },
        },
        other => SourceError::Unavailable {
            key: key.clone(),
            message: other.to_string(),
        },
    }
}
