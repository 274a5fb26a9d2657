//! Docker runtime (bollard)
//!
//! 컨테이너 이름을 핸들로 사용한다. 404는 `Error::NotFound`로 변환한다.

use super::runtime::{ContainerRuntime, ContainerSpec, ExecOutput};
use agentbox_foundation::{Error, Result};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, DownloadFromContainerOptions, ListContainersOptions,
    LogOutput, LogsOptions, RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
    UploadToContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, PortBinding as DockerPortBinding};
use bollard::Docker;
use futures::StreamExt;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

/// Seconds Docker waits for a graceful stop before SIGKILL
const STOP_TIMEOUT_SECS: i64 = 10;

/// Docker Engine API client
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using the local defaults (socket or `DOCKER_HOST`)
    pub fn new() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| Error::Container(format!("Failed to connect to Docker: {}", e)))?;
        Ok(Self { docker })
    }

    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }

    /// Pull `image` when it is not present locally
    async fn ensure_image(&self, image: &str) -> Result<()> {
        match self.docker.inspect_image(image).await {
            Ok(_) => return Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {}
            Err(e) => return Err(Error::Container(format!("Failed to inspect image {}: {}", image, e))),
        }

        info!("Pulling image: {}", image);
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(progress) = stream.next().await {
            progress.map_err(|e| Error::Container(format!("Failed to pull {}: {}", image, e)))?;
        }
        Ok(())
    }
}

fn map_err(action: &str, container: &str, err: bollard::errors::Error) -> Error {
    match err {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message,
        } => Error::NotFound(format!("Container {}: {}", container, message)),
        other => Error::Container(format!("Failed to {} {}: {}", action, container, other)),
    }
}

/// Translate a spec into the Engine API create body
pub(crate) fn build_config(spec: &ContainerSpec) -> Config<String> {
    let mut exposed_ports = HashMap::new();
    let mut port_bindings = HashMap::new();
    for port in &spec.ports {
        let key = format!("{}/tcp", port.container);
        exposed_ports.insert(key.clone(), HashMap::new());
        port_bindings.insert(
            key,
            Some(vec![DockerPortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: Some(port.host.to_string()),
            }]),
        );
    }

    let host_config = HostConfig {
        binds: Some(vec![format!(
            "{}:{}",
            spec.workspace.display(),
            spec.mount_path
        )]),
        port_bindings: Some(port_bindings),
        cap_add: Some(spec.cap_add.clone()),
        security_opt: Some(spec.security_opt.clone()),
        ..Default::default()
    };

    Config {
        image: Some(spec.image.clone()),
        working_dir: Some(spec.mount_path.clone()),
        env: Some(spec.env.clone()),
        labels: Some(spec.labels.clone()),
        exposed_ports: Some(exposed_ports),
        host_config: Some(host_config),
        ..Default::default()
    }
}

/// `/a/b/c.txt` → (`/a/b`, `c.txt`)
fn split_container_path(path: &str) -> Result<(&str, &str)> {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some((dir, file)) if !file.is_empty() => {
            Ok((if dir.is_empty() { "/" } else { dir }, file))
        }
        _ => Err(Error::Validation(format!(
            "Container path must be an absolute file path: {}",
            path
        ))),
    }
}

/// One-file tar archive for `upload_to_container`
pub(crate) fn single_file_tar(name: &str, data: &[u8]) -> Result<Vec<u8>> {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();

    let mut builder = tar::Builder::new(Vec::new());
    builder.append_data(&mut header, name, data)?;
    Ok(builder.into_inner()?)
}

/// First regular file of a tar stream from `download_from_container`
pub(crate) fn first_file_from_tar(data: &[u8]) -> Result<Vec<u8>> {
    let mut archive = tar::Archive::new(data);
    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.header().entry_type().is_file() {
            let mut buf = Vec::new();
            entry.read_to_end(&mut buf)?;
            return Ok(buf);
        }
    }
    Err(Error::NotFound("Archive contains no regular file".to_string()))
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        info!("Creating container: {}", spec.name);
        self.ensure_image(&spec.image).await?;

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            ..Default::default()
        };
        let response = self
            .docker
            .create_container(Some(options), build_config(spec))
            .await
            .map_err(|e| Error::Container(format!("Failed to create {}: {}", spec.name, e)))?;

        if let Err(e) = self
            .docker
            .start_container(&response.id, None::<StartContainerOptions<String>>)
            .await
        {
            // 시작 실패 시 생성된 컨테이너는 남기지 않는다
            let _ = self.remove(&spec.name).await;
            return Err(Error::Container(format!("Failed to start {}: {}", spec.name, e)));
        }

        debug!("Started container {} ({})", spec.name, response.id);
        Ok(response.id)
    }

    async fn is_running(&self, container: &str) -> Result<bool> {
        let inspect = self
            .docker
            .inspect_container(container, None)
            .await
            .map_err(|e| map_err("inspect", container, e))?;
        Ok(inspect
            .state
            .and_then(|state| state.running)
            .unwrap_or(false))
    }

    async fn stop(&self, container: &str) -> Result<()> {
        let options = StopContainerOptions {
            t: STOP_TIMEOUT_SECS,
        };
        match self.docker.stop_container(container, Some(options)).await {
            Ok(()) => Ok(()),
            // 304: already stopped
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) => Err(map_err("stop", container, e)),
        }
    }

    async fn remove(&self, container: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.docker
            .remove_container(container, Some(options))
            .await
            .map_err(|e| map_err("remove", container, e))
    }

    async fn exec(&self, container: &str, command: &str) -> Result<ExecOutput> {
        let exec_options = CreateExecOptions {
            cmd: Some(vec!["bash", "-c", command]),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(container, exec_options)
            .await
            .map_err(|e| map_err("exec in", container, e))?;

        let started = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| map_err("exec in", container, e))?;

        let mut output = String::new();
        if let StartExecResults::Attached { output: mut stream, .. } = started {
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(LogOutput::StdOut { message })
                    | Ok(LogOutput::StdErr { message })
                    | Ok(LogOutput::Console { message }) => {
                        output.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(_) => {}
                    Err(e) => return Err(map_err("read exec output from", container, e)),
                }
            }
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| map_err("inspect exec in", container, e))?;

        Ok(ExecOutput {
            output,
            exit_code: inspect.exit_code.unwrap_or(-1),
        })
    }

    async fn copy_in(&self, container: &str, host_path: &Path, container_path: &str) -> Result<()> {
        let (dir, file_name) = split_container_path(container_path)?;
        let data = tokio::fs::read(host_path).await.map_err(|e| {
            Error::NotFound(format!("Source file {}: {}", host_path.display(), e))
        })?;
        let archive = single_file_tar(file_name, &data)?;

        let options = UploadToContainerOptions {
            path: dir.to_string(),
            ..Default::default()
        };
        self.docker
            .upload_to_container(container, Some(options), archive.into())
            .await
            .map_err(|e| map_err("copy into", container, e))
    }

    async fn copy_out(&self, container: &str, container_path: &str, host_path: &Path) -> Result<()> {
        let options = DownloadFromContainerOptions {
            path: container_path.to_string(),
        };
        let mut stream = self.docker.download_from_container(container, Some(options));

        let mut data = Vec::new();
        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(|e| map_err("copy from", container, e))?;
            data.extend_from_slice(&bytes);
        }

        let content = first_file_from_tar(&data)?;
        if let Some(parent) = host_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(host_path, content).await?;
        Ok(())
    }

    async fn logs(&self, container: &str, tail: Option<usize>) -> Result<String> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: tail.map(|n| n.to_string()).unwrap_or_else(|| "all".to_string()),
            ..Default::default()
        };

        let mut stream = self.docker.logs(container, Some(options));
        let mut out = String::new();
        while let Some(chunk) = stream.next().await {
            let line = chunk.map_err(|e| map_err("read logs of", container, e))?;
            out.push_str(&line.to_string());
        }
        Ok(out)
    }

    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![prefix.to_string()]);
        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| Error::Container(format!("Failed to list containers: {}", e)))?;

        // name 필터는 부분 일치라서 접두사로 한 번 더 거른다
        let mut names: Vec<String> = containers
            .into_iter()
            .flat_map(|c| c.names.unwrap_or_default())
            .map(|name| name.trim_start_matches('/').to_string())
            .filter(|name| name.starts_with(prefix))
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::runtime::PortBinding;
    use std::path::PathBuf;

    fn spec() -> ContainerSpec {
        ContainerSpec {
            name: "sandbox-job_1".to_string(),
            image: "sandbox-agent:latest".to_string(),
            workspace: PathBuf::from("/srv/workspaces/job_1"),
            mount_path: "/home/agent/workspace".to_string(),
            ports: vec![
                PortBinding { host: 5901, container: 5900 },
                PortBinding { host: 3002, container: 3000 },
            ],
            cap_add: vec!["SYS_ADMIN".to_string()],
            security_opt: vec!["seccomp=unconfined".to_string()],
            env: vec![],
            labels: HashMap::new(),
        }
    }

    #[test]
    fn test_build_config() {
        let config = build_config(&spec());
        let host = config.host_config.unwrap();

        assert_eq!(
            host.binds.unwrap(),
            vec!["/srv/workspaces/job_1:/home/agent/workspace".to_string()]
        );
        assert_eq!(host.cap_add.unwrap(), vec!["SYS_ADMIN".to_string()]);

        let bindings = host.port_bindings.unwrap();
        let dev = bindings["3000/tcp"].as_ref().unwrap();
        assert_eq!(dev[0].host_port.as_deref(), Some("3002"));
        assert!(config.exposed_ports.unwrap().contains_key("5900/tcp"));
    }

    #[test]
    fn test_split_container_path() {
        assert_eq!(split_container_path("/a/b/c.txt").unwrap(), ("/a/b", "c.txt"));
        assert_eq!(split_container_path("/c.txt").unwrap(), ("/", "c.txt"));
        assert!(split_container_path("c.txt").is_err());
    }

    #[test]
    fn test_single_file_tar_roundtrip() {
        let archive = single_file_tar("notes.txt", b"hello").unwrap();
        assert_eq!(first_file_from_tar(&archive).unwrap(), b"hello");
    }
}
