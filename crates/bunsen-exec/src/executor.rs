//! The Python executor: venv lifecycle, package installs, code execution

use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::error::{ProvisionError, Result};
use crate::instrument::{instrumented_source, ARTIFACT_MARKER};

/// Executor configuration
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Virtual environment location
    pub venv_dir: PathBuf,
    /// Root directory for generated plot artifacts
    pub plots_dir: PathBuf,
    /// Scratch directory for temporary code files
    pub temp_dir: PathBuf,
    /// Packages installed during provisioning
    pub default_packages: Vec<String>,
    /// Wall-clock limit for package installation
    pub install_timeout: Duration,
    /// Wall-clock limit for one code execution
    pub execute_timeout: Duration,
    /// Skip venv creation and use the host interpreter directly
    pub use_host_interpreter: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            venv_dir: PathBuf::from("venvs"),
            plots_dir: PathBuf::from("plots"),
            temp_dir: PathBuf::from("temp"),
            default_packages: [
                "numpy",
                "pandas",
                "matplotlib",
                "seaborn",
                "scikit-learn",
                "plotly",
                "statsmodels",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            install_timeout: Duration::from_secs(300),
            execute_timeout: Duration::from_secs(300),
            use_host_interpreter: false,
        }
    }
}

/// Outcome of one `execute_code` call. Never mutated after creation.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    /// Plot files harvested from this execution, in creation order
    pub artifact_paths: Vec<PathBuf>,
    /// Unique token scoping this call's temp files and artifact subdirectory
    pub execution_id: String,
}

impl ExecutionResult {
    fn failure(execution_id: String, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
            artifact_paths: vec![],
            execution_id,
        }
    }
}

/// Outcome of a package installation request
#[derive(Debug, Clone)]
pub struct InstallReport {
    pub success: bool,
    pub message: String,
    /// Captured pip stdout on success, stderr on failure
    pub output: String,
}

impl InstallReport {
    fn ok(message: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            output: output.into(),
        }
    }

    fn failed(message: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            output: output.into(),
        }
    }
}

/// Runs model-generated Python code in a provisioned environment.
///
/// Every execution is a fresh child process: timeouts are enforced from
/// outside, a crash in generated code cannot take down the orchestrator, and
/// plot capture happens via source injected into the child (see
/// `instrument`). One executor instance is shared per process and injected
/// into the tools that need it.
pub struct PythonExecutor {
    config: ExecutorConfig,
    /// Interpreter used for execution; venv python, or host on fallback
    python: PathBuf,
    /// Whether we fell back to the host interpreter (degraded mode)
    degraded: bool,
    /// Cache of installed package names, lazily filled from `pip list`
    installed: Mutex<Option<HashSet<String>>>,
}

impl PythonExecutor {
    /// Provision an environment and return a ready executor.
    ///
    /// Creates the venv if absent, verifies it if present, recreates it if
    /// corrupt, and installs the default plus requested packages. When venv
    /// creation fails (restricted hosts, containers without ensurepip) the
    /// executor falls back to the host interpreter and records the degraded
    /// mode instead of failing.
    pub async fn provision(
        config: ExecutorConfig,
        extra_packages: &[String],
    ) -> Result<Self> {
        for dir in [&config.plots_dir, &config.temp_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| ProvisionError::WorkDir {
                    path: dir.display().to_string(),
                    source: e,
                })?;
        }

        let host = find_host_python().await.ok_or(ProvisionError::NoInterpreter)?;

        let (python, degraded) = if config.use_host_interpreter {
            tracing::info!(python = %host.display(), "using host interpreter by configuration");
            (host, true)
        } else {
            match ensure_venv(&host, &config.venv_dir).await {
                Ok(venv_python) => (venv_python, false),
                Err(reason) => {
                    tracing::warn!(%reason, "venv creation failed, falling back to host interpreter");
                    (host, true)
                }
            }
        };

        let executor = Self {
            config,
            python,
            degraded,
            installed: Mutex::new(None),
        };

        let mut packages = executor.config.default_packages.clone();
        packages.extend_from_slice(extra_packages);
        if !packages.is_empty() {
            let report = executor.install_packages(&packages).await;
            if !report.success {
                tracing::warn!(message = %report.message, "initial package installation incomplete");
            }
        }

        Ok(executor)
    }

    /// Whether the executor is running on the host interpreter rather than
    /// an isolated venv.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Path of the interpreter in use.
    pub fn interpreter(&self) -> &Path {
        &self.python
    }

    /// Install packages, skipping any that are already present.
    ///
    /// Idempotent: the installed set is queried first and only the delta is
    /// handed to pip. A timeout or non-zero pip exit reports failure with the
    /// captured stderr; nothing is raised.
    pub async fn install_packages(&self, packages: &[String]) -> InstallReport {
        let requested: Vec<String> = packages
            .iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        if requested.is_empty() {
            return InstallReport::ok("No packages to install", "");
        }

        let installed = match self.installed_set().await {
            Ok(set) => set,
            Err(e) => {
                // Could not query pip; attempt the full install anyway.
                tracing::debug!(error = %e, "pip list failed, skipping delta check");
                HashSet::new()
            }
        };
        let missing = missing_packages(&requested, &installed);
        if missing.is_empty() {
            return InstallReport::ok(
                format!("Already installed: {}", requested.join(", ")),
                "",
            );
        }

        let mut cmd = Command::new(&self.python);
        cmd.arg("-m")
            .arg("pip")
            .arg("install")
            .args(&missing)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let run = async {
            match cmd.output().await {
                Ok(output) => {
                    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
                    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                    if output.status.success() {
                        let mut cache = self.installed.lock();
                        if let Some(set) = cache.as_mut() {
                            for pkg in &missing {
                                set.insert(normalize_package_name(pkg));
                            }
                        }
                        InstallReport::ok(
                            format!("Installed packages: {}", missing.join(", ")),
                            stdout,
                        )
                    } else {
                        InstallReport::failed(
                            format!("Failed to install packages: {}", missing.join(", ")),
                            stderr,
                        )
                    }
                }
                Err(e) => InstallReport::failed(format!("Failed to run pip: {}", e), String::new()),
            }
        };

        match tokio::time::timeout(self.config.install_timeout, run).await {
            Ok(report) => report,
            Err(_) => InstallReport::failed(
                format!(
                    "Package installation timed out after {}s",
                    self.config.install_timeout.as_secs()
                ),
                "",
            ),
        }
    }

    /// Execute a code string in a child process and harvest its output.
    ///
    /// Never returns an error for anything the code itself does: syntax
    /// errors, raised exceptions, timeouts, and spawn failures all land in
    /// `ExecutionResult { success: false, stderr }`.
    pub async fn execute_code(&self, code: &str, clear_prior_artifacts: bool) -> ExecutionResult {
        if clear_prior_artifacts {
            let _ = tokio::fs::remove_dir_all(&self.config.plots_dir).await;
        }

        let execution_id = new_execution_id();
        let plot_dir = self.config.plots_dir.join(&execution_id);
        let code_file = self.config.temp_dir.join(format!("code_{}.py", execution_id));

        for dir in [&plot_dir, &self.config.temp_dir] {
            if let Err(e) = tokio::fs::create_dir_all(dir).await {
                return ExecutionResult::failure(
                    execution_id,
                    format!("failed to create {}: {}", dir.display(), e),
                );
            }
        }

        let source = instrumented_source(code, &plot_dir);
        if let Err(e) = tokio::fs::write(&code_file, source).await {
            return ExecutionResult::failure(
                execution_id,
                format!("failed to write code file: {}", e),
            );
        }

        let result = self
            .run_code_file(&code_file, &plot_dir, execution_id.clone())
            .await;

        // The temp file is removed on every exit path.
        let _ = tokio::fs::remove_file(&code_file).await;

        result
    }

    async fn run_code_file(
        &self,
        code_file: &Path,
        plot_dir: &Path,
        execution_id: String,
    ) -> ExecutionResult {
        let mut cmd = Command::new(&self.python);
        cmd.arg(code_file)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                return ExecutionResult::failure(
                    execution_id,
                    format!("failed to spawn interpreter: {}", e),
                )
            }
        };

        match tokio::time::timeout(self.config.execute_timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let raw_stdout = String::from_utf8_lossy(&output.stdout).to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                let (stdout, artifact_paths) = parse_artifact_section(&raw_stdout);
                ExecutionResult {
                    success: output.status.success(),
                    stdout,
                    stderr,
                    artifact_paths,
                    execution_id,
                }
            }
            Ok(Err(e)) => ExecutionResult::failure(
                execution_id,
                format!("failed to collect process output: {}", e),
            ),
            Err(_) => {
                // Dropping the timed-out future kills the child
                // (kill_on_drop); discard this execution's partial artifacts.
                let _ = tokio::fs::remove_dir_all(plot_dir).await;
                ExecutionResult::failure(
                    execution_id,
                    format!(
                        "Execution timed out after {}s",
                        self.config.execute_timeout.as_secs()
                    ),
                )
            }
        }
    }

    /// Best-effort release of working directories. Safe to call repeatedly;
    /// swallows its own errors.
    pub async fn cleanup(&self, clear_artifacts: bool) {
        let _ = tokio::fs::remove_dir_all(&self.config.temp_dir).await;
        if clear_artifacts {
            let _ = tokio::fs::remove_dir_all(&self.config.plots_dir).await;
        }
    }

    /// Names of packages currently installed in the environment, cached
    /// after the first query.
    async fn installed_set(&self) -> std::io::Result<HashSet<String>> {
        if let Some(set) = self.installed.lock().as_ref() {
            return Ok(set.clone());
        }

        let output = Command::new(&self.python)
            .args(["-m", "pip", "list", "--format=freeze", "--disable-pip-version-check"])
            .output()
            .await?;
        let set: HashSet<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(|line| line.split("==").next())
            .map(normalize_package_name)
            .collect();

        *self.installed.lock() = Some(set.clone());
        Ok(set)
    }
}

/// Short unique token naming one execution's temp file and artifact dir.
fn new_execution_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Locate a Python interpreter on the host.
async fn find_host_python() -> Option<PathBuf> {
    for candidate in ["python3", "python"] {
        let probe = Command::new(candidate)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if matches!(probe, Ok(s) if s.success()) {
            return Some(PathBuf::from(candidate));
        }
    }
    None
}

/// Interpreter path inside a venv directory.
fn venv_python(venv_dir: &Path) -> PathBuf {
    if cfg!(windows) {
        venv_dir.join("Scripts").join("python.exe")
    } else {
        venv_dir.join("bin").join("python")
    }
}

/// Create the venv if absent, verify it if present, recreate it if corrupt.
/// Returns the venv interpreter path, or a reason string on failure.
async fn ensure_venv(host: &Path, venv_dir: &Path) -> std::result::Result<PathBuf, String> {
    let python = venv_python(venv_dir);

    if venv_dir.exists() {
        let probe = Command::new(&python)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if matches!(probe, Ok(s) if s.success()) {
            tracing::debug!(venv = %venv_dir.display(), "reusing existing virtual environment");
            return Ok(python);
        }
        tracing::warn!(venv = %venv_dir.display(), "existing venv is corrupt, recreating");
        tokio::fs::remove_dir_all(venv_dir)
            .await
            .map_err(|e| format!("could not remove corrupt venv: {}", e))?;
    }

    tracing::info!(venv = %venv_dir.display(), "creating virtual environment");
    let output = Command::new(host)
        .args(["-m", "venv"])
        .arg(venv_dir)
        .output()
        .await
        .map_err(|e| format!("could not run venv module: {}", e))?;

    if !output.status.success() {
        return Err(String::from_utf8_lossy(&output.stderr).to_string());
    }
    Ok(python)
}

/// Normalize a package spec to a comparable name: lowercase, `_` folded to
/// `-`, version constraints and extras stripped.
fn normalize_package_name(spec: impl AsRef<str>) -> String {
    let spec = spec.as_ref();
    let name_end = spec
        .find(|c| ['=', '<', '>', '~', '!', '[', ';', ' '].contains(&c))
        .unwrap_or(spec.len());
    spec[..name_end].trim().to_lowercase().replace('_', "-")
}

/// Requested packages not present in the installed set, original spelling
/// preserved, order kept, duplicates dropped.
fn missing_packages(requested: &[String], installed: &HashSet<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    requested
        .iter()
        .filter(|pkg| {
            let name = normalize_package_name(pkg.as_str());
            !installed.contains(&name) && seen.insert(name)
        })
        .cloned()
        .collect()
}

/// Split the artifact marker section out of stdout. Returns the cleaned
/// stdout and the harvested paths in order.
fn parse_artifact_section(stdout: &str) -> (String, Vec<PathBuf>) {
    match stdout.split_once(ARTIFACT_MARKER) {
        Some((before, after)) => {
            let paths = after
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(PathBuf::from)
                .collect();
            (before.trim_end().to_string(), paths)
        }
        None => (stdout.trim_end().to_string(), vec![]),
    }
}
