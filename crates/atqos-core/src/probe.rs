//! Environment probe: inspects the target repository to decide how its
//! toolchain commands should be invoked. Both queries are pure over the
//! filesystem.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// Detected python dependency manager for a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PythonManager {
    Uv,
    Poetry,
    Venv,
    System,
}

impl fmt::Display for PythonManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Uv => "uv",
            Self::Poetry => "poetry",
            Self::Venv => "venv",
            Self::System => "system",
        };
        f.write_str(s)
    }
}

/// What the probe learned about a repository.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepoProfile {
    pub repo_path: PathBuf,
    pub python_manager: PythonManager,
    pub has_uv_lock: bool,
    pub has_poetry_lock: bool,
    pub venv_path: Option<PathBuf>,
}

/// How to invoke python for a repository: either a direct interpreter
/// path, or a wrapping tool plus prefix args (e.g. `uv run python`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PythonInvocation {
    pub python_path: Option<PathBuf>,
    pub tool: Option<String>,
    pub prefix_args: Vec<String>,
}

impl PythonInvocation {
    /// Concatenate the invocation with tool arguments into a final argv.
    pub fn command<I, S>(&self, args: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut argv = Vec::new();
        if let Some(ref python) = self.python_path {
            argv.push(python.to_string_lossy().into_owned());
        } else if let Some(ref tool) = self.tool {
            argv.push(tool.clone());
            argv.extend(self.prefix_args.iter().cloned());
        }
        argv.extend(args.into_iter().map(Into::into));
        argv
    }
}

/// Filesystem probe for target repositories.
#[derive(Debug, Clone, Copy, Default)]
pub struct RepoProbe;

impl RepoProbe {
    pub fn new() -> Self {
        Self
    }

    /// Inspect a repository. Precedence when multiple signals are
    /// present: a uv lock wins the manager label, an explicit venv wins
    /// the interpreter path.
    pub fn detect(&self, repo_path: &Path) -> RepoProfile {
        let mut manager = None;
        let has_uv_lock = is_file(&repo_path.join("uv.lock"));
        if has_uv_lock {
            manager = Some(PythonManager::Uv);
        }

        let has_poetry_lock = is_file(&repo_path.join("poetry.lock"));
        if has_poetry_lock && manager.is_none() {
            manager = Some(PythonManager::Poetry);
        }

        let venv_python = repo_path.join(".venv").join("bin").join("python");
        let venv_path = is_file(&venv_python).then_some(venv_python);
        if venv_path.is_some() && manager.is_none() {
            manager = Some(PythonManager::Venv);
        }

        RepoProfile {
            repo_path: repo_path.to_path_buf(),
            python_manager: manager.unwrap_or(PythonManager::System),
            has_uv_lock,
            has_poetry_lock,
            venv_path,
        }
    }

    /// Pick the python invocation for a profile.
    pub fn resolve_python(&self, profile: &RepoProfile) -> PythonInvocation {
        if let Some(ref venv) = profile.venv_path {
            return PythonInvocation {
                python_path: Some(venv.clone()),
                tool: None,
                prefix_args: Vec::new(),
            };
        }
        if profile.has_uv_lock {
            return PythonInvocation {
                python_path: None,
                tool: Some("uv".to_string()),
                prefix_args: vec!["run".to_string(), "python".to_string()],
            };
        }
        PythonInvocation {
            python_path: Some(PathBuf::from("python")),
            tool: None,
            prefix_args: Vec::new(),
        }
    }
}

fn is_file(path: &Path) -> bool {
    path.is_file()
}
