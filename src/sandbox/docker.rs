use std::path::PathBuf;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::LogOutput;
use bollard::errors::Error as DockerError;
use bollard::models::{ContainerCreateBody, HostConfig};
use bollard::query_parameters::{
    CreateContainerOptions, CreateImageOptionsBuilder, LogsOptionsBuilder,
    RemoveContainerOptionsBuilder, StartContainerOptions, StopContainerOptionsBuilder,
    WaitContainerOptions,
};
use futures::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{ContainerSpec, OutputChunk, OutputStream, SandboxBackend};
use crate::errors::SandboxError;

/// Seconds a container gets to stop before it is killed.
const STOP_GRACE_SECS: i32 = 5;

/// Docker daemon backend.
pub struct DockerBackend {
    docker: Option<Docker>,
    build_context: Option<PathBuf>,
}

impl DockerBackend {
    /// Connect with the local defaults (`DOCKER_HOST` or the unix socket).
    ///
    /// A connection failure is not fatal here; it surfaces as a failed
    /// `ping` so the caller gets an "unavailable" execution result.
    pub fn connect(build_context: Option<PathBuf>) -> Self {
        let docker = match Docker::connect_with_local_defaults() {
            Ok(docker) => Some(docker),
            Err(e) => {
                warn!(error = %e, "could not configure docker client");
                None
            }
        };
        Self {
            docker,
            build_context,
        }
    }

    fn client(&self) -> Result<&Docker, SandboxError> {
        self.docker.as_ref().ok_or(SandboxError::Unavailable)
    }

    async fn build_image(&self, image: &str, context: &PathBuf) -> Result<(), SandboxError> {
        info!(image, context = %context.display(), "building sandbox image");
        let output = Command::new("docker")
            .arg("build")
            .arg("-t")
            .arg(image)
            .arg(context)
            .output()
            .await
            .map_err(|e| SandboxError::Image {
                image: image.to_string(),
                message: format!("failed to spawn docker build: {}", e),
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SandboxError::Image {
                image: image.to_string(),
                message: crate::util::truncate(stderr.trim(), 2000),
            });
        }
        Ok(())
    }

    async fn pull_image(&self, docker: &Docker, image: &str) -> Result<(), SandboxError> {
        info!(image, "pulling sandbox image");
        let options = CreateImageOptionsBuilder::default().from_image(image).build();
        docker
            .create_image(Some(options), None, None)
            .try_collect::<Vec<_>>()
            .await
            .map_err(|e| SandboxError::Image {
                image: image.to_string(),
                message: e.to_string(),
            })?;
        Ok(())
    }
}

fn container_error(stage: &'static str, e: DockerError) -> SandboxError {
    SandboxError::Container {
        stage,
        message: e.to_string(),
    }
}

#[async_trait]
impl SandboxBackend for DockerBackend {
    async fn ping(&self) -> Result<(), SandboxError> {
        let docker = self.client()?;
        docker.ping().await.map_err(|e| {
            debug!(error = %e, "docker ping failed");
            SandboxError::Unavailable
        })?;
        Ok(())
    }

    async fn ensure_image(&self, image: &str) -> Result<(), SandboxError> {
        let docker = self.client()?;
        if docker.inspect_image(image).await.is_ok() {
            debug!(image, "sandbox image present");
            return Ok(());
        }
        match &self.build_context {
            Some(context) if context.join("Dockerfile").is_file() => {
                self.build_image(image, context).await
            }
            _ => self.pull_image(docker, image).await,
        }
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String, SandboxError> {
        let docker = self.client()?;
        let body = ContainerCreateBody {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            working_dir: Some(spec.workdir.clone()),
            env: Some(spec.env.clone()),
            labels: Some(spec.labels.clone()),
            tty: Some(false),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            network_disabled: Some(spec.network_disabled),
            host_config: Some(HostConfig {
                binds: Some(spec.binds.clone()),
                memory: spec.memory_bytes,
                nano_cpus: spec.nano_cpus,
                ..Default::default()
            }),
            ..Default::default()
        };
        let response = docker
            .create_container(None::<CreateContainerOptions>, body)
            .await
            .map_err(|e| container_error("create", e))?;
        for warning in &response.warnings {
            warn!(container = %response.id, "docker: {}", warning);
        }
        Ok(response.id)
    }

    async fn start(&self, id: &str) -> Result<(), SandboxError> {
        self.client()?
            .start_container(id, None::<StartContainerOptions>)
            .await
            .map_err(|e| container_error("start", e))
    }

    fn output<'a>(&'a self, id: &'a str) -> BoxStream<'a, Result<OutputChunk, SandboxError>> {
        let docker = match self.client() {
            Ok(docker) => docker,
            Err(e) => return futures::stream::once(async move { Err(e) }).boxed(),
        };
        let options = LogsOptionsBuilder::default()
            .follow(true)
            .stdout(true)
            .stderr(true)
            .build();
        docker
            .logs(id, Some(options))
            .filter_map(|item| {
                let chunk = match item {
                    Ok(LogOutput::StdOut { message }) => Some(Ok(OutputChunk {
                        stream: OutputStream::Stdout,
                        text: String::from_utf8_lossy(&message).into_owned(),
                    })),
                    Ok(LogOutput::StdErr { message }) => Some(Ok(OutputChunk {
                        stream: OutputStream::Stderr,
                        text: String::from_utf8_lossy(&message).into_owned(),
                    })),
                    Ok(_) => None,
                    Err(e) => Some(Err(SandboxError::Stream(e.to_string()))),
                };
                futures::future::ready(chunk)
            })
            .boxed()
    }

    async fn wait(&self, id: &str) -> Result<i64, SandboxError> {
        let docker = self.client()?;
        let mut responses = Box::pin(docker.wait_container(id, None::<WaitContainerOptions>));
        match responses.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports non-zero exits as an error carrying the code.
            Some(Err(DockerError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(container_error("wait", e)),
            None => Err(SandboxError::Container {
                stage: "wait",
                message: "wait stream ended without an exit status".to_string(),
            }),
        }
    }

    async fn teardown(&self, id: &str) -> Result<(), SandboxError> {
        let docker = self.client()?;

        let stop = StopContainerOptionsBuilder::default()
            .t(STOP_GRACE_SECS)
            .build();
        let stopped = match docker.stop_container(id, Some(stop)).await {
            Ok(()) => Ok(()),
            // 304: already stopped
            Err(DockerError::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) => Err(container_error("stop", e)),
        };

        let remove = RemoveContainerOptionsBuilder::default().force(true).build();
        docker
            .remove_container(id, Some(remove))
            .await
            .map_err(|e| container_error("remove", e))?;
        debug!(container = id, "sandbox container removed");
        stopped
    }
}
