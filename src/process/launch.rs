//! Launch composition for the server process.
//!
//! The server is started through its platform launcher script
//! (`run.sh` on Linux, `run.cmd` on Windows) with the config `+exec`'d
//! on the command line. The result is a plain value computed once from
//! configuration.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::RunnerConfig;

/// Flag enabling OneSync on the server command line.
pub const ONESYNC_FLAG: &str = "+set onesync_enabled 1";

/// Error type for launch composition.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LaunchError {
    /// The host OS has no launcher script.
    #[error("OS type not supported: {0}")]
    UnsupportedPlatform(String),
}

/// Host platform, as far as launching the server is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Platform {
    Linux,
    Windows,
    Unsupported(String),
}

impl Platform {
    /// Detect the platform this binary was built for.
    #[must_use]
    pub fn current() -> Self {
        match std::env::consts::OS {
            "linux" => Self::Linux,
            "windows" => Self::Windows,
            other => Self::Unsupported(other.to_string()),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Linux => write!(f, "linux"),
            Self::Windows => write!(f, "windows"),
            Self::Unsupported(os) => write!(f, "{os}"),
        }
    }
}

/// Shell, arguments and working directory used to start the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchSpec {
    shell: PathBuf,
    args: Vec<String>,
    cwd: PathBuf,
}

impl LaunchSpec {
    #[must_use]
    pub fn shell(&self) -> &Path {
        &self.shell
    }

    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    #[must_use]
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Shell-quoted command line, for display only.
    #[must_use]
    pub fn display_command(&self) -> String {
        let mut parts = vec![shell_escape::escape(self.shell.to_string_lossy())];
        parts.extend(
            self.args
                .iter()
                .map(|a| shell_escape::escape(a.as_str().into())),
        );
        parts.join(" ")
    }
}

/// Build the launch spec for `platform` from the runner configuration.
///
/// # Errors
///
/// Returns `LaunchError::UnsupportedPlatform` for anything but Linux and
/// Windows. Callers treat this as fatal.
pub fn build_launch_spec(
    platform: &Platform,
    config: &RunnerConfig,
) -> Result<LaunchSpec, LaunchError> {
    let onesync = if config.onesync { ONESYNC_FLAG } else { "" };
    let build = config.build_path.display();
    let cfg = config.cfg_path.display();

    let (shell, args) = match platform {
        Platform::Linux => (
            PathBuf::from("/bin/bash"),
            vec![
                format!("{build}/run.sh"),
                format!("{onesync} +exec {cfg}"),
            ],
        ),
        Platform::Windows => (
            PathBuf::from("cmd.exe"),
            vec![
                "/c".to_string(),
                format!("{build}/run.cmd {onesync} +exec {cfg}"),
            ],
        ),
        Platform::Unsupported(os) => return Err(LaunchError::UnsupportedPlatform(os.clone())),
    };

    Ok(LaunchSpec {
        shell,
        args,
        cwd: config.base_path.clone(),
    })
}
