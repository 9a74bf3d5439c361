//! Shared helpers for the integration suite.

#![allow(dead_code)]

use anyhow::{Context, Result};
use bblkg_cli::backend::BackendRegistry;
use bblkg_cli::bdf::{BdfCache, BdfServer};
use bblkg_cli::config::{LkgCatalog, Settings};
use bblkg_cli::resolver::LkgResolver;
use bblkg_cli::source::{LkgServer, LkgSource};
use bblkg_cli::test_utils::FakeBdfServer;
use bblkg_cli::utils::RetryPolicy;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tempfile::TempDir;

/// An isolated resolver over injected backends and an in-memory BDF server.
pub struct LkgHarness {
    _temp: TempDir,
    pub cache_dir: PathBuf,
    pub work_dir: PathBuf,
    pub bdf_server: Arc<FakeBdfServer>,
    pub backends: BackendRegistry,
    pub resolver: LkgResolver,
}

impl LkgHarness {
    /// Builds a resolver for `servers` and `sources` with a fresh cache directory.
    pub fn new(servers: Vec<LkgServer>, sources: Vec<LkgSource>, backends: BackendRegistry) -> Self {
        bblkg_cli::test_utils::init_test_logging(None);
        let temp = TempDir::new().unwrap();
        let cache_dir = temp.path().join("cache");
        let work_dir = temp.path().join("work");
        fs::create_dir_all(&work_dir).unwrap();

        let bdf_server = Arc::new(FakeBdfServer::new());
        let resolver = build_resolver(&cache_dir, servers, sources, backends.clone(), Arc::clone(&bdf_server));
        Self {
            _temp: temp,
            cache_dir,
            work_dir,
            bdf_server,
            backends,
            resolver,
        }
    }

    /// A second resolver sharing this harness's cache directory and BDF server,
    /// as another build process on the same machine would.
    pub fn sibling(&self, servers: Vec<LkgServer>, sources: Vec<LkgSource>) -> LkgResolver {
        build_resolver(&self.cache_dir, servers, sources, self.backends.clone(), Arc::clone(&self.bdf_server))
    }
}

fn build_resolver(
    cache_dir: &Path,
    servers: Vec<LkgServer>,
    sources: Vec<LkgSource>,
    backends: BackendRegistry,
    bdf_server: Arc<FakeBdfServer>,
) -> LkgResolver {
    let settings = Arc::new(Settings::from_vars(cache_dir.to_path_buf(), Vec::new()));
    let mut catalog = LkgCatalog::new(None);
    for server in servers {
        catalog.insert_server(server);
    }
    for source in sources {
        catalog.insert_source(source);
    }
    let server: Arc<dyn BdfServer> = bdf_server;
    let bdfs = Arc::new(BdfCache::new(cache_dir, Some(server)).with_retry(RetryPolicy::immediate(1)));
    LkgResolver::new(Arc::new(catalog), settings, backends, bdfs).with_retry(RetryPolicy::immediate(2))
}

/// A scratch directory with an `lkg.toml`, a local share and a cache, for
/// running the `bblkg` binary.
pub struct TestProject {
    _temp: TempDir,
    project_dir: PathBuf,
    cache_dir: PathBuf,
    share_dir: PathBuf,
}

impl TestProject {
    pub fn new() -> Result<Self> {
        let temp = TempDir::new()?;
        let project_dir = temp.path().join("project");
        let cache_dir = temp.path().join("cache");
        let share_dir = temp.path().join("share");
        fs::create_dir_all(&project_dir)?;
        fs::create_dir_all(&cache_dir)?;
        fs::create_dir_all(&share_dir)?;
        Ok(Self {
            _temp: temp,
            project_dir,
            cache_dir,
            share_dir,
        })
    }

    pub fn project_path(&self) -> &Path {
        &self.project_dir
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_dir
    }

    pub fn share_path(&self) -> &Path {
        &self.share_dir
    }

    /// Address template of the local share, with forward slashes.
    pub fn share_template(&self) -> String {
        format!("{}/$(platform)/$(name)/$(version)", self.share_dir.display()).replace('\\', "/")
    }

    /// Writes `lkg.toml` into the project directory.
    pub fn write_config(&self, content: &str) -> Result<()> {
        let path = self.project_dir.join("lkg.toml");
        fs::write(&path, content).with_context(|| format!("Failed to write config to {}", path.display()))
    }

    /// Publishes `files` as `name` `version` for `platform` on the local share.
    pub fn publish(&self, platform: &str, name: &str, version: &str, files: &[(&str, &str)]) -> Result<PathBuf> {
        let dir = self.share_dir.join(platform).join(name).join(version);
        fs::create_dir_all(&dir)?;
        for (file, content) in files {
            let path = dir.join(file);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, content)?;
        }
        Ok(dir)
    }

    /// Runs `bblkg` in the project directory against the project's cache.
    pub fn run_bblkg(&self, args: &[&str]) -> Result<CommandOutput> {
        let output = Command::new(env!("CARGO_BIN_EXE_bblkg"))
            .args(args)
            .current_dir(&self.project_dir)
            .env("BBLKG_CACHE_DIR", &self.cache_dir)
            .env_remove("BBLKG_CONFIG")
            .env_remove("RUST_LOG")
            .env("NO_COLOR", "1")
            .output()
            .context("Failed to run bblkg")?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
            code: output.status.code(),
        })
    }
}

/// Captured output of one `bblkg` run.
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub code: Option<i32>,
}

impl CommandOutput {
    pub fn assert_success(&self) -> &Self {
        assert!(self.success, "Command failed with code {:?}\nStderr: {}", self.code, self.stderr);
        self
    }

    pub fn assert_failure(&self) -> &Self {
        assert!(!self.success, "Command unexpectedly succeeded\nStdout: {}", self.stdout);
        self
    }

    pub fn assert_stdout_contains(&self, text: &str) -> &Self {
        assert!(self.stdout.contains(text), "Expected stdout to contain '{}'\nActual stdout: {}", text, self.stdout);
        self
    }

    pub fn assert_stderr_contains(&self, text: &str) -> &Self {
        assert!(self.stderr.contains(text), "Expected stderr to contain '{}'\nActual stderr: {}", text, self.stderr);
        self
    }
}
