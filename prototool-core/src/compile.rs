//! # Descriptor Compiler
//!
//! Runs `protoc` as a subprocess and turns its output into a [`DescriptorSet`].
//!
//! Standard output carries the serialized descriptor set, standard error the
//! diagnostics. A failing compiler is reported as [`CompileError::Failed`] with
//! the diagnostics parsed into [`Diagnostic`] records.
use crate::descriptor::{DescriptorSet, LookupError};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Upper bound for a single compiler run.
pub const DEFAULT_COMPILE_TIMEOUT: Duration = Duration::from_secs(120);

/// One finding tied to a location in a schema file.
///
/// Line and column are 1-based; `0` means the compiler did not report one.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Diagnostic {
    pub filename: String,
    pub line: u32,
    pub column: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("Failed to run protoc at '{binary}': '{source}'")]
    Spawn {
        binary: PathBuf,
        source: std::io::Error,
    },
    #[error("protoc failed ({status}) with {} diagnostic(s)", .diagnostics.len())]
    Failed {
        status: String,
        diagnostics: Vec<Diagnostic>,
    },
    #[error("protoc did not finish within {0:?}")]
    Timeout(Duration),
    #[error("protoc produced an invalid descriptor set: '{0}'")]
    InvalidOutput(#[from] LookupError),
    #[error("Compiler I/O error: '{0}'")]
    Io(#[from] std::io::Error),
}

impl CompileError {
    /// Structured diagnostics attached to this failure, if any.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            CompileError::Failed { diagnostics, .. } => diagnostics,
            _ => &[],
        }
    }
}

/// Schema files and the directories their imports resolve against.
#[derive(Debug, Clone, Default)]
pub struct CompileRequest {
    pub files: Vec<PathBuf>,
    pub import_paths: Vec<PathBuf>,
}

/// The result of a successful [`DescriptorCompiler::compile`] call.
#[derive(Debug)]
pub enum Compilation {
    /// Dry-run mode: the command that would have been executed.
    DryRun(String),
    /// The compiled descriptors plus any warnings the compiler printed.
    Compiled {
        set: DescriptorSet,
        diagnostics: Vec<Diagnostic>,
    },
}

/// Invokes one specific compiler binary.
#[derive(Debug, Clone)]
pub struct DescriptorCompiler {
    binary: PathBuf,
    work_dir: Option<PathBuf>,
    timeout: Duration,
    dry_run: bool,
}

impl DescriptorCompiler {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            work_dir: None,
            timeout: DEFAULT_COMPILE_TIMEOUT,
            dry_run: false,
        }
    }

    /// Directory the compiler runs in; relative file and import paths resolve against it.
    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Report the command line instead of running it.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Arguments passed to the compiler for `request`, writing descriptors to `out`.
    pub fn arguments(&self, request: &CompileRequest, out: &str) -> Vec<String> {
        let mut args: Vec<String> = request
            .import_paths
            .iter()
            .map(|path| format!("--proto_path={}", path.display()))
            .collect();

        args.push("--include_imports".to_string());
        args.push("--include_source_info".to_string());
        args.push(format!("--descriptor_set_out={out}"));
        args.extend(request.files.iter().map(|f| f.display().to_string()));
        args
    }

    /// The full command line, as it would be typed in a shell.
    pub fn command_line(&self, request: &CompileRequest) -> String {
        std::iter::once(self.binary.display().to_string())
            .chain(self.arguments(request, STDOUT_TARGET))
            .map(|arg| shell_quote(&arg))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub async fn compile(&self, request: &CompileRequest) -> Result<Compilation, CompileError> {
        if self.dry_run {
            return Ok(Compilation::DryRun(self.command_line(request)));
        }

        // Where stdout can't be named as a file, go through a scratch file instead
        let scratch = if cfg!(unix) {
            None
        } else {
            Some(tempfile::NamedTempFile::new()?)
        };
        let out = scratch
            .as_ref()
            .map(|file| file.path().display().to_string())
            .unwrap_or_else(|| STDOUT_TARGET.to_string());

        let mut command = Command::new(&self.binary);
        command
            .args(self.arguments(request, &out))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &self.work_dir {
            command.current_dir(dir);
        }

        debug!(command = %self.command_line(request), "running protoc");

        let child = command.spawn().map_err(|source| CompileError::Spawn {
            binary: self.binary.clone(),
            source,
        })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| CompileError::Timeout(self.timeout))??;

        let diagnostics = parse_diagnostics(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(CompileError::Failed {
                status: output.status.to_string(),
                diagnostics,
            });
        }

        let bytes = match &scratch {
            Some(file) => std::fs::read(file.path())?,
            None => output.stdout,
        };

        let set = DescriptorSet::from_bytes(bytes)?;
        debug!(files = set.files().count(), "protoc produced descriptor set");

        Ok(Compilation::Compiled { set, diagnostics })
    }
}

const STDOUT_TARGET: &str = "/dev/stdout";

/// Parses compiler standard error into diagnostics.
///
/// Recognised shapes are `file:line:column: message` and `file: message`. Any
/// other non-empty line becomes a location-less diagnostic.
pub fn parse_diagnostics(stderr: &str) -> Vec<Diagnostic> {
    stderr
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .map(parse_line)
        .collect()
}

fn parse_line(line: &str) -> Diagnostic {
    // Windows paths contain ':' themselves, so try each colon as the file boundary
    for (index, _) in line.match_indices(':') {
        let (filename, rest) = (&line[..index], &line[index + 1..]);
        if let Some((line_no, column, message)) = parse_position(rest) {
            return Diagnostic {
                filename: filename.to_string(),
                line: line_no,
                column,
                id: None,
                message: message.to_string(),
            };
        }
    }

    if let Some((filename, message)) = line.split_once(": ")
        && Path::new(filename)
            .extension()
            .is_some_and(|ext| ext == "proto")
    {
        return Diagnostic {
            filename: filename.to_string(),
            line: 0,
            column: 0,
            id: None,
            message: message.trim().to_string(),
        };
    }

    Diagnostic {
        filename: String::new(),
        line: 0,
        column: 0,
        id: None,
        message: line.trim().to_string(),
    }
}

/// Parses `<line>:<column>: <message>`.
fn parse_position(rest: &str) -> Option<(u32, u32, &str)> {
    let (line, rest) = rest.split_once(':')?;
    let (column, message) = rest.split_once(':')?;
    let line = line.parse().ok()?;
    let column = column.parse().ok()?;
    Some((line, column, message.trim()))
}

fn shell_quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@%+,".contains(c))
    {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}
