//! Worker identities and launch specifications.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The two supervised out-of-process workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerIdentity {
    /// Native analysis engine.
    Engine,
    /// Model-inference module.
    Inference,
}

impl WorkerIdentity {
    pub const ALL: [WorkerIdentity; 2] = [WorkerIdentity::Engine, WorkerIdentity::Inference];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerIdentity::Engine => "engine",
            WorkerIdentity::Inference => "inference",
        }
    }
}

impl fmt::Display for WorkerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerIdentity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "engine" | "core" => Ok(WorkerIdentity::Engine),
            "inference" | "ai" | "python" => Ok(WorkerIdentity::Inference),
            other => Err(format!("unknown worker '{other}'")),
        }
    }
}

/// Everything the supervisor needs to start one worker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSpec {
    pub identity: WorkerIdentity,
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<PathBuf>,
}

impl WorkerSpec {
    pub fn new(identity: WorkerIdentity, program: impl Into<String>) -> Self {
        Self {
            identity,
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Command line as it would appear in a process listing.
    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}
