use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

/// `clusterize` isolated from the user's settings and log configuration.
pub fn clusterize(cwd: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_clusterize"));
    cmd.current_dir(cwd)
        .env("CLZ_CONFIG", cwd.join("no-such-config.toml"))
        .env("CLZ_LOG", "warn")
        .env_remove("CLZ_LOG_FILE")
        .env_remove("CLZ_LOG_FORMAT");
    cmd
}

/// Empty directory to scaffold projects into.
pub struct TestWorkspace {
    pub dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        crate::test_log!("FIXTURE: Creating empty workspace");
        Self {
            dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn project_dir(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Scaffold a project through the CLI.
    pub fn create_project(&self, name: &str, head_ip: &str) -> PathBuf {
        let output = clusterize(self.path())
            .args(["project", "create", name, "--head-ip", head_ip])
            .output()
            .expect("Failed to run clusterize project create");
        assert!(
            output.status.success(),
            "project create failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        self.project_dir(name)
    }
}
