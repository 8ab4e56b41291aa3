//! Command execution inside Redis pods
//!
//! The controller uses this to point the replica at the primary and to push
//! etcd credentials into both members. Output is returned as text; callers
//! decide what counts as success by inspecting it.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use kube::api::{Api, AttachParams};
use kube::Client;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::Error;

/// Runs a command in a named container of a pod
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RemoteExec: Send + Sync {
    /// Execute `command` and return stdout followed by stderr
    ///
    /// Fails with [`Error::Exec`] when the container does not exist, the
    /// stream breaks, or the process reports a non-zero exit.
    async fn execute(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: Vec<String>,
    ) -> Result<String, Error>;
}

/// Real implementation over the pod exec subresource
pub struct PodExec {
    client: Client,
}

impl PodExec {
    /// Create a new PodExec wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn attach_params(container: &str) -> AttachParams {
    AttachParams {
        stdin: false,
        stdout: true,
        stderr: true,
        tty: false,
        container: Some(container.to_string()),
        max_stdin_buf_size: None,
        max_stdout_buf_size: None,
        max_stderr_buf_size: None,
    }
}

async fn read_stream<R: AsyncRead + Unpin>(reader: Option<R>) -> Result<String, Error> {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        reader
            .read_to_end(&mut buf)
            .await
            .map_err(|e| Error::exec(format!("failed to read exec stream: {e}")))?;
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Describe a terminal status that signals a failed command
///
/// Returns `None` for success or an absent status.
pub fn failure_reason(status: Option<&Status>) -> Option<String> {
    let status = status?;
    if status.status.as_deref() == Some("Success") {
        return None;
    }
    Some(
        status
            .message
            .clone()
            .or_else(|| status.reason.clone())
            .unwrap_or_else(|| "command failed".to_string()),
    )
}

fn has_container(pod: &Pod, container: &str) -> bool {
    pod.spec
        .as_ref()
        .map(|s| s.containers.iter().any(|c| c.name == container))
        .unwrap_or(false)
}

#[async_trait]
impl RemoteExec for PodExec {
    async fn execute(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: Vec<String>,
    ) -> Result<String, Error> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);

        let target = pods.get(pod).await?;
        if !has_container(&target, container) {
            return Err(Error::exec(format!(
                "pod {namespace}/{pod} has no container {container}"
            )));
        }

        debug!(pod, container, program = ?command.first(), "executing in pod");
        let mut attached = pods.exec(pod, command, &attach_params(container)).await?;

        let status = attached.take_status();
        let stdout = attached.stdout();
        let stderr = attached.stderr();
        let (stdout, stderr) = tokio::join!(read_stream(stdout), read_stream(stderr));
        let (stdout, stderr) = (stdout?, stderr?);

        let status = match status {
            Some(fut) => fut.await,
            None => None,
        };
        attached
            .join()
            .await
            .map_err(|e| Error::exec(format!("exec in {namespace}/{pod} did not finish: {e}")))?;

        if let Some(reason) = failure_reason(status.as_ref()) {
            return Err(Error::exec(format!(
                "command in {namespace}/{pod} failed: {reason}: {stderr}"
            )));
        }

        Ok(stdout + &stderr)
    }
}
