//! Parsing of the per-workspace `.daemonfile`.
//!
//! The file is ini-like with a single implicit default section: bare
//! `key = value` lines, `#`/`;` comments. Recognized keys are `dockerfile`,
//! `python`, `jina`, `run`, and `ports`; anything else is ignored with a
//! warning. A missing file yields all defaults.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{JinadError, JinadResult};

use super::defaults::{DAEMONFILE, DEFAULT_DOCKERFILE, DEVEL_DOCKERFILE, GPU_DOCKERFILE};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Which Dockerfile a workspace builds with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DockerfileMode {
    /// Build on top of a locally available daemon image.
    Devel,

    /// The stock cpu build.
    Default,

    /// The gpu build.
    Gpu,

    /// A Dockerfile somewhere inside the workspace.
    Custom(PathBuf),
}

/// Python versions the stock Dockerfiles accept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PythonVersion {
    /// Python 3.7.
    Py37,

    /// Python 3.8.
    #[default]
    Py38,

    /// Python 3.9.
    Py39,
}

/// Parsed contents of a workspace's `.daemonfile`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonFile {
    workdir: PathBuf,
    mode: DockerfileMode,
    python: PythonVersion,
    jina: String,
    run: Option<String>,
    ports: Vec<u16>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl PythonVersion {
    /// The value passed as the `PY_VERSION` build arg.
    pub fn as_str(&self) -> &'static str {
        match self {
            PythonVersion::Py37 => "3.7",
            PythonVersion::Py38 => "3.8",
            PythonVersion::Py39 => "3.9",
        }
    }
}

impl DaemonFile {
    /// Parses the `.daemonfile` in `workdir`, falling back to defaults when
    /// the file is absent.
    pub fn parse(workdir: impl AsRef<Path>) -> JinadResult<Self> {
        let workdir = workdir.as_ref().to_path_buf();
        let mut daemon_file = Self {
            workdir: workdir.clone(),
            mode: DockerfileMode::Default,
            python: PythonVersion::default(),
            jina: "master".to_string(),
            run: None,
            ports: Vec::new(),
        };

        let path = workdir.join(DAEMONFILE);
        if !path.is_file() {
            tracing::warn!(
                "no {} found in {}, using defaults",
                DAEMONFILE,
                workdir.display()
            );
            return Ok(daemon_file);
        }

        let contents = std::fs::read_to_string(&path)?;
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            let Some((key, value)) = line.split_once('=').or_else(|| line.split_once(':')) else {
                tracing::warn!("skipping malformed daemonfile line: `{}`", line);
                continue;
            };
            daemon_file.set(key.trim(), value.trim())?;
        }

        Ok(daemon_file)
    }

    fn set(&mut self, key: &str, value: &str) -> JinadResult<()> {
        match key {
            "dockerfile" | "build" => {
                self.mode = match value {
                    "devel" => DockerfileMode::Devel,
                    "default" | "cpu" => DockerfileMode::Default,
                    "gpu" => DockerfileMode::Gpu,
                    // Anything else is a path relative to the workspace.
                    other => {
                        let path = self.workdir.join(other);
                        if !path.is_file() {
                            return Err(JinadError::InvalidDockerfile(path));
                        }
                        DockerfileMode::Custom(PathBuf::from(other))
                    }
                };
            }
            "python" => match value {
                "3.7" => self.python = PythonVersion::Py37,
                "3.8" => self.python = PythonVersion::Py38,
                "3.9" => self.python = PythonVersion::Py39,
                other => {
                    tracing::warn!(
                        "invalid value `{}` for `python`, keeping {}",
                        other,
                        self.python.as_str()
                    );
                }
            },
            "jina" => self.jina = value.to_string(),
            "run" => {
                // The run command must be double-quoted to take effect.
                if value.len() > 1 && value.starts_with('"') && value.ends_with('"') {
                    self.run = Some(value.trim_matches('"').to_string());
                }
            }
            "ports" => {
                self.ports = value
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .filter_map(|p| match p.parse::<u16>() {
                        Ok(port) => Some(port),
                        Err(_) => {
                            tracing::warn!("dropping invalid port value `{}`", p);
                            None
                        }
                    })
                    .collect();
            }
            other => {
                tracing::warn!("ignoring unknown daemonfile key `{}`", other);
            }
        }
        Ok(())
    }

    /// The build mode.
    pub fn mode(&self) -> &DockerfileMode {
        &self.mode
    }

    /// The python version for the stock Dockerfiles.
    pub fn python(&self) -> PythonVersion {
        self.python
    }

    /// The jina version tag to install.
    pub fn jina(&self) -> &str {
        &self.jina
    }

    /// The custom container command, when one was declared.
    pub fn run(&self) -> Option<&str> {
        self.run.as_deref()
    }

    /// Ports the custom container publishes.
    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    /// Directory the Docker build context is assembled from: the daemon's own
    /// root for `devel`, the workspace otherwise.
    pub fn build_context<'a>(&'a self, rootdir: &'a Path) -> &'a Path {
        match self.mode {
            DockerfileMode::Devel => rootdir,
            _ => &self.workdir,
        }
    }

    /// The Dockerfile contents for this build.
    pub fn dockerfile_contents(&self) -> JinadResult<String> {
        match &self.mode {
            DockerfileMode::Devel => Ok(DEVEL_DOCKERFILE.to_string()),
            DockerfileMode::Default => Ok(DEFAULT_DOCKERFILE.to_string()),
            DockerfileMode::Gpu => Ok(GPU_DOCKERFILE.to_string()),
            DockerfileMode::Custom(path) => {
                let full = self.workdir.join(path);
                std::fs::read_to_string(&full).map_err(|_| JinadError::InvalidDockerfile(full))
            }
        }
    }

    /// Display name of the Dockerfile, recorded in workspace arguments.
    pub fn dockerfile_name(&self) -> String {
        match &self.mode {
            DockerfileMode::Devel => "devel.Dockerfile".to_string(),
            DockerfileMode::Default => "default.Dockerfile".to_string(),
            DockerfileMode::Gpu => "gpu.Dockerfile".to_string(),
            DockerfileMode::Custom(path) => path.display().to_string(),
        }
    }

    /// Build args passed to `docker build`. For `devel` only the pip
    /// requirements are forwarded; the other modes also pin the python and
    /// jina versions used to assemble the base image.
    pub fn build_args(&self, requirements: &str) -> BTreeMap<String, String> {
        let mut args = BTreeMap::new();
        args.insert("PIP_REQUIREMENTS".to_string(), requirements.to_string());
        if self.mode != DockerfileMode::Devel {
            args.insert("PY_VERSION".to_string(), self.python.as_str().to_string());
            args.insert("JINA_VERSION".to_string(), self.jina.clone());
        }
        args
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_daemonfile(dir: &Path, contents: &str) {
        std::fs::write(dir.join(DAEMONFILE), contents).unwrap();
    }

    #[test]
    fn test_missing_daemonfile_yields_defaults() {
        let dir = tempdir().unwrap();
        let df = DaemonFile::parse(dir.path()).unwrap();
        assert_eq!(df.mode(), &DockerfileMode::Default);
        assert_eq!(df.python(), PythonVersion::Py38);
        assert_eq!(df.jina(), "master");
        assert!(df.run().is_none());
        assert!(df.ports().is_empty());
    }

    #[test]
    fn test_full_daemonfile() {
        let dir = tempdir().unwrap();
        write_daemonfile(
            dir.path(),
            "dockerfile = devel\npython = 3.9\njina = 2.0.0\nrun = \"python app.py\"\nports = 8080, 9090\n",
        );
        let df = DaemonFile::parse(dir.path()).unwrap();
        assert_eq!(df.mode(), &DockerfileMode::Devel);
        assert_eq!(df.python(), PythonVersion::Py39);
        assert_eq!(df.jina(), "2.0.0");
        assert_eq!(df.run(), Some("python app.py"));
        assert_eq!(df.ports(), &[8080, 9090]);
    }

    #[test]
    fn test_unquoted_run_is_ignored() {
        let dir = tempdir().unwrap();
        write_daemonfile(dir.path(), "run = python app.py\n");
        let df = DaemonFile::parse(dir.path()).unwrap();
        assert!(df.run().is_none());
    }

    #[test]
    fn test_invalid_ports_are_dropped() {
        let dir = tempdir().unwrap();
        write_daemonfile(dir.path(), "ports = 8080, nine, 70000, 9090\n");
        let df = DaemonFile::parse(dir.path()).unwrap();
        assert_eq!(df.ports(), &[8080, 9090]);
    }

    #[test]
    fn test_custom_dockerfile_must_exist() {
        let dir = tempdir().unwrap();
        write_daemonfile(dir.path(), "dockerfile = my.Dockerfile\n");
        assert!(matches!(
            DaemonFile::parse(dir.path()),
            Err(JinadError::InvalidDockerfile(_))
        ));

        std::fs::write(dir.path().join("my.Dockerfile"), "FROM scratch\n").unwrap();
        let df = DaemonFile::parse(dir.path()).unwrap();
        assert_eq!(
            df.mode(),
            &DockerfileMode::Custom(PathBuf::from("my.Dockerfile"))
        );
        assert_eq!(df.dockerfile_name(), "my.Dockerfile");
    }

    #[test]
    fn test_build_args_by_mode() {
        let dir = tempdir().unwrap();
        write_daemonfile(dir.path(), "dockerfile = devel\n");
        let df = DaemonFile::parse(dir.path()).unwrap();
        let args = df.build_args("numpy==1.23");
        assert_eq!(args.len(), 1);
        assert_eq!(args["PIP_REQUIREMENTS"], "numpy==1.23");

        write_daemonfile(dir.path(), "dockerfile = gpu\njina = 2.1.0\n");
        let df = DaemonFile::parse(dir.path()).unwrap();
        let args = df.build_args("");
        assert_eq!(args["PY_VERSION"], "3.8");
        assert_eq!(args["JINA_VERSION"], "2.1.0");
    }
}
