use anyhow::{Context, Result};
use std::path::Path;
use std::process::{Command, Output, Stdio};
use tracing::debug;

/// Trait for executing commands and touching the filesystem of the host being provisioned
pub trait CommandExecutor {
    /// Execute a simple command, capturing its output
    fn execute_simple(&self, program: &str, args: &[&str]) -> Result<Output>;

    /// Execute a command with explicit working directory and extra environment
    fn execute_with_env(
        &self,
        program: &str,
        args: &[&str],
        dir: Option<&Path>,
        env: &[(&str, &str)],
    ) -> Result<Output>;

    /// Check if a command exists on PATH
    fn check_command_exists(&self, command: &str) -> Result<bool>;

    /// Read a file
    fn read_file(&self, path: &Path) -> Result<String>;

    /// Write a file, replacing any previous content
    fn write_file(&self, path: &Path, content: &[u8]) -> Result<()>;

    /// Set the unix permission bits of a file
    fn set_mode(&self, path: &Path, mode: u32) -> Result<()>;

    /// Change the owner of a file
    fn chown(&self, path: &Path, uid: u32, gid: u32) -> Result<()>;

    /// Create directory recursively
    fn mkdir_p(&self, path: &Path) -> Result<()>;

    /// Check if file exists
    fn file_exists(&self, path: &Path) -> Result<bool>;

    /// Copy a file
    fn copy_file(&self, from: &Path, to: &Path) -> Result<()>;

    /// Remove a file or directory tree. Missing paths are not an error.
    fn remove_path(&self, path: &Path) -> Result<()>;

    /// List file names in a directory. A missing directory yields an empty list.
    fn list_directory(&self, path: &Path) -> Result<Vec<String>>;
}

/// Executor for the machine this binary runs on
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalExecutor;

impl LocalExecutor {
    fn run(&self, mut cmd: Command, program: &str, args: &[&str]) -> Result<Output> {
        cmd.args(args);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.stdin(Stdio::null());
        let output = cmd
            .output()
            .with_context(|| format!("Failed to execute command: {}", program))?;
        debug!(program, ?args, status = ?output.status.code(), "command finished");
        Ok(output)
    }
}

impl CommandExecutor for LocalExecutor {
    fn execute_simple(&self, program: &str, args: &[&str]) -> Result<Output> {
        self.run(Command::new(program), program, args)
    }

    fn execute_with_env(
        &self,
        program: &str,
        args: &[&str],
        dir: Option<&Path>,
        env: &[(&str, &str)],
    ) -> Result<Output> {
        let mut cmd = Command::new(program);
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }
        for (key, value) in env {
            cmd.env(key, value);
        }
        self.run(cmd, program, args)
    }

    fn check_command_exists(&self, command: &str) -> Result<bool> {
        Ok(which::which(command).is_ok())
    }

    fn read_file(&self, path: &Path) -> Result<String> {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read file: {}", path.display()))
    }

    fn write_file(&self, path: &Path, content: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            self.mkdir_p(parent)?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write file: {}", path.display()))
    }

    fn set_mode(&self, path: &Path, mode: u32) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
            .with_context(|| format!("Failed to set permissions for: {}", path.display()))
    }

    fn chown(&self, path: &Path, uid: u32, gid: u32) -> Result<()> {
        use nix::unistd::{Gid, Uid};
        nix::unistd::chown(path, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid)))
            .with_context(|| format!("Failed to change owner of {}", path.display()))
    }

    fn mkdir_p(&self, path: &Path) -> Result<()> {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory: {}", path.display()))
    }

    fn file_exists(&self, path: &Path) -> Result<bool> {
        Ok(path.exists())
    }

    fn copy_file(&self, from: &Path, to: &Path) -> Result<()> {
        std::fs::copy(from, to).with_context(|| {
            format!("Failed to copy {} to {}", from.display(), to.display())
        })?;
        Ok(())
    }

    fn remove_path(&self, path: &Path) -> Result<()> {
        let metadata = match std::fs::symlink_metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to stat {}", path.display()));
            }
        };
        let removed = if metadata.is_dir() {
            std::fs::remove_dir_all(path)
        } else {
            std::fs::remove_file(path)
        };
        removed.with_context(|| format!("Failed to remove {}", path.display()))
    }

    fn list_directory(&self, path: &Path) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read directory: {}", path.display()));
            }
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        names.sort();
        Ok(names)
    }
}

/// Fail with the command's stderr when it exited non-zero
pub fn ensure_success(output: &Output, what: &str) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    anyhow::bail!(
        "{} failed with exit code {}: {}",
        what,
        output.status.code().unwrap_or(1),
        stderr.trim()
    )
}

/// Package manager types, in detection order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Apt,
    Dnf,
    Yum,
}

impl PackageManager {
    const CANDIDATES: [(&'static str, PackageManager); 3] = [
        ("apt-get", PackageManager::Apt),
        ("dnf", PackageManager::Dnf),
        ("yum", PackageManager::Yum),
    ];

    /// Detect the first supported package manager available on the system
    pub fn detect(exec: &dyn CommandExecutor) -> Result<Option<Self>> {
        for (command, manager) in Self::CANDIDATES {
            if exec.check_command_exists(command)? {
                return Ok(Some(manager));
            }
        }
        Ok(None)
    }

    pub fn command(&self) -> &'static str {
        match self {
            PackageManager::Apt => "apt-get",
            PackageManager::Dnf => "dnf",
            PackageManager::Yum => "yum",
        }
    }

    /// Packages needed for the VPN, PKI, firewall persistence and downloads
    pub fn provisioning_packages(&self) -> &'static [&'static str] {
        match self {
            PackageManager::Apt => &[
                "openvpn",
                "easy-rsa",
                "iptables-persistent",
                "curl",
                "wget",
                "tar",
            ],
            PackageManager::Dnf | PackageManager::Yum => &[
                "openvpn",
                "easy-rsa",
                "iptables-services",
                "curl",
                "wget",
                "tar",
            ],
        }
    }

    /// Install multiple packages at once
    pub fn install_packages(&self, exec: &dyn CommandExecutor, packages: &[&str]) -> Result<()> {
        match self {
            PackageManager::Apt => {
                let env = [("DEBIAN_FRONTEND", "noninteractive")];
                let output = exec.execute_with_env("apt-get", &["update"], None, &env)?;
                ensure_success(&output, "apt-get update")?;
                let mut args = vec!["install", "-y"];
                args.extend(packages.iter().copied());
                let output = exec.execute_with_env("apt-get", &args, None, &env)?;
                ensure_success(&output, "apt-get install")?;
            }
            PackageManager::Dnf | PackageManager::Yum => {
                // easy-rsa and openvpn live in EPEL on RHEL derivatives
                let output = exec.execute_simple(self.command(), &["install", "-y", "epel-release"])?;
                if !output.status.success() {
                    debug!("epel-release not installable, continuing with base repositories");
                }
                let mut args = vec!["install", "-y"];
                args.extend(packages.iter().copied());
                let output = exec.execute_simple(self.command(), &args)?;
                ensure_success(&output, &format!("{} install", self.command()))?;
            }
        }
        Ok(())
    }

    /// Get display name for the package manager
    pub fn display_name(&self) -> &'static str {
        match self {
            PackageManager::Apt => "apt (Debian/Ubuntu)",
            PackageManager::Dnf => "dnf (Fedora/RHEL)",
            PackageManager::Yum => "yum (RHEL/CentOS)",
        }
    }
}

#[cfg(test)]
pub mod testing {
    //! In-memory executor that records every command

    use super::*;
    use std::cell::RefCell;
    use std::collections::{BTreeMap, BTreeSet, HashMap};
    use std::os::unix::process::ExitStatusExt;
    use std::path::PathBuf;
    use std::process::ExitStatus;

    #[derive(Default)]
    pub struct RecordingExecutor {
        pub commands: RefCell<Vec<String>>,
        pub files: RefCell<BTreeMap<PathBuf, Vec<u8>>>,
        pub modes: RefCell<HashMap<PathBuf, u32>>,
        pub available: BTreeSet<String>,
        /// Command prefix -> (exit code, stdout)
        pub responses: HashMap<String, (i32, String)>,
        /// Command prefix -> files the command leaves behind
        pub creates: HashMap<String, Vec<PathBuf>>,
        /// Programs that cannot be spawned at all
        pub unspawnable: BTreeSet<String>,
        /// Paths whose writes fail
        pub read_only: BTreeSet<PathBuf>,
    }

    impl RecordingExecutor {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_commands(mut self, commands: &[&str]) -> Self {
            self.available.extend(commands.iter().map(|c| c.to_string()));
            self
        }

        pub fn respond(mut self, prefix: &str, code: i32, stdout: &str) -> Self {
            self.responses
                .insert(prefix.to_string(), (code, stdout.to_string()));
            self
        }

        pub fn creating(mut self, prefix: &str, paths: &[PathBuf]) -> Self {
            self.creates.insert(prefix.to_string(), paths.to_vec());
            self
        }

        pub fn failing_to_spawn(mut self, program: &str) -> Self {
            self.unspawnable.insert(program.to_string());
            self
        }

        pub fn failing_write(mut self, path: impl Into<PathBuf>) -> Self {
            self.read_only.insert(path.into());
            self
        }

        pub fn with_file(self, path: impl Into<PathBuf>, content: &str) -> Self {
            self.files
                .borrow_mut()
                .insert(path.into(), content.as_bytes().to_vec());
            self
        }

        pub fn file(&self, path: impl AsRef<Path>) -> Option<String> {
            self.files
                .borrow()
                .get(path.as_ref())
                .map(|bytes| String::from_utf8_lossy(bytes).to_string())
        }

        pub fn ran(&self, needle: &str) -> bool {
            self.commands.borrow().iter().any(|c| c.contains(needle))
        }

        pub fn position(&self, needle: &str) -> Option<usize> {
            self.commands.borrow().iter().position(|c| c.contains(needle))
        }

        fn record(&self, program: &str, args: &[&str]) -> Result<Output> {
            let line = std::iter::once(program)
                .chain(args.iter().copied())
                .collect::<Vec<_>>()
                .join(" ");
            self.commands.borrow_mut().push(line.clone());
            if self.unspawnable.contains(program) {
                anyhow::bail!("Failed to execute command: {}", program);
            }

            let mut best: Option<(&String, &(i32, String))> = None;
            for (prefix, response) in &self.responses {
                if line.starts_with(prefix.as_str())
                    && best.map_or(true, |(p, _)| prefix.len() > p.len())
                {
                    best = Some((prefix, response));
                }
            }
            let (code, stdout) = best.map(|(_, r)| r.clone()).unwrap_or((0, String::new()));

            if code == 0 {
                for (prefix, paths) in &self.creates {
                    if line.starts_with(prefix.as_str()) {
                        let mut files = self.files.borrow_mut();
                        for path in paths {
                            files.insert(path.clone(), b"-----BEGIN TEST-----\n".to_vec());
                        }
                    }
                }
            }

            Ok(Output {
                status: ExitStatus::from_raw(code << 8),
                stdout: stdout.into_bytes(),
                stderr: Vec::new(),
            })
        }
    }

    impl CommandExecutor for RecordingExecutor {
        fn execute_simple(&self, program: &str, args: &[&str]) -> Result<Output> {
            self.record(program, args)
        }

        fn execute_with_env(
            &self,
            program: &str,
            args: &[&str],
            _dir: Option<&Path>,
            _env: &[(&str, &str)],
        ) -> Result<Output> {
            self.record(program, args)
        }

        fn check_command_exists(&self, command: &str) -> Result<bool> {
            Ok(self.available.contains(command))
        }

        fn read_file(&self, path: &Path) -> Result<String> {
            self.file(path)
                .with_context(|| format!("Failed to read file: {}", path.display()))
        }

        fn write_file(&self, path: &Path, content: &[u8]) -> Result<()> {
            if self.read_only.contains(path) {
                anyhow::bail!("Failed to write file: {}", path.display());
            }
            self.files
                .borrow_mut()
                .insert(path.to_path_buf(), content.to_vec());
            Ok(())
        }

        fn set_mode(&self, path: &Path, mode: u32) -> Result<()> {
            self.modes.borrow_mut().insert(path.to_path_buf(), mode);
            Ok(())
        }

        fn chown(&self, path: &Path, uid: u32, gid: u32) -> Result<()> {
            self.commands
                .borrow_mut()
                .push(format!("chown {}:{} {}", uid, gid, path.display()));
            Ok(())
        }

        fn mkdir_p(&self, _path: &Path) -> Result<()> {
            Ok(())
        }

        fn file_exists(&self, path: &Path) -> Result<bool> {
            Ok(self.files.borrow().contains_key(path))
        }

        fn copy_file(&self, from: &Path, to: &Path) -> Result<()> {
            let content = self
                .files
                .borrow()
                .get(from)
                .cloned()
                .with_context(|| format!("Failed to copy {}", from.display()))?;
            self.files.borrow_mut().insert(to.to_path_buf(), content);
            Ok(())
        }

        fn remove_path(&self, path: &Path) -> Result<()> {
            self.commands
                .borrow_mut()
                .push(format!("rm {}", path.display()));
            self.files.borrow_mut().retain(|p, _| !p.starts_with(path));
            Ok(())
        }

        fn list_directory(&self, path: &Path) -> Result<Vec<String>> {
            Ok(self
                .files
                .borrow()
                .keys()
                .filter(|p| p.parent() == Some(path))
                .filter_map(|p| p.file_name())
                .map(|n| n.to_string_lossy().to_string())
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingExecutor;
    use super::*;

    #[test]
    fn test_detect_prefers_apt() {
        let exec = RecordingExecutor::new().with_commands(&["yum", "apt-get", "dnf"]);
        assert_eq!(PackageManager::detect(&exec).unwrap(), Some(PackageManager::Apt));
    }

    #[test]
    fn test_detect_dnf_before_yum() {
        let exec = RecordingExecutor::new().with_commands(&["yum", "dnf"]);
        assert_eq!(PackageManager::detect(&exec).unwrap(), Some(PackageManager::Dnf));
    }

    #[test]
    fn test_detect_none() {
        let exec = RecordingExecutor::new().with_commands(&["pacman"]);
        assert_eq!(PackageManager::detect(&exec).unwrap(), None);
    }

    #[test]
    fn test_install_failure_is_fatal() {
        let exec = RecordingExecutor::new().respond("apt-get install", 100, "");
        let err = PackageManager::Apt
            .install_packages(&exec, &["openvpn"])
            .unwrap_err();
        assert!(err.to_string().contains("apt-get install"));
        assert!(exec.ran("apt-get update"));
    }

    #[test]
    fn test_local_remove_missing_path_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let exec = LocalExecutor;
        exec.remove_path(&dir.path().join("absent")).unwrap();
        assert!(exec.list_directory(&dir.path().join("absent")).unwrap().is_empty());
    }

    #[test]
    fn test_local_write_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let exec = LocalExecutor;
        let path = dir.path().join("a/b/c.txt");
        exec.write_file(&path, b"hello").unwrap();
        assert_eq!(exec.read_file(&path).unwrap(), "hello");
        exec.remove_path(&dir.path().join("a")).unwrap();
        assert!(!path.exists());
    }
}
