//! # Runner
//!
//! The façade behind the command line. A [`Runner`] holds the per-invocation
//! context (working directory, project configuration, cache settings, output
//! mode, standard input and output) and exposes one operation per command.
//! Each operation takes only the arguments it uses.
//!
//! This is the only place where internal failures are folded into
//! [`RunError`], and where [`RunError::exit_code`] assigns process exit codes.
pub mod output;
pub mod pool;

pub use output::{ExitError, PrintFields};

use crate::BoxError;
use crate::codec::{self, CodecError};
use crate::compile::{Compilation, CompileError, CompileRequest, DescriptorCompiler, Diagnostic};
use crate::config::{ConfigError, ProjectConfig};
use crate::descriptor::{DescriptorSet, LookupError};
use crate::format::{self, Formatter};
use crate::grpc::client::GrpcRequestError;
use crate::grpc::invoke::{CallInvoker, CallOptions, DEFAULT_CALL_TIMEOUT, InvokeError, RequestSource};
use crate::grpc::session::{DEFAULT_CONNECT_TIMEOUT, SessionOptions};
use crate::lint::{LintError, LintSet};
use crate::toolchain::{
    BinaryCache, CacheKey, Fetch, HttpFetcher, Platform, PlatformError, ProtocBinary,
    ToolchainError, ToolchainVersion,
};
use futures_util::StreamExt;
use prost_reflect::{DynamicMessage, ReflectMessage};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncReadExt};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Bounds a single compiler archive download.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

pub type Input = Box<dyn AsyncBufRead + Send + Unpin>;
pub type Output = Box<dyn Write + Send>;

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("{0}")]
    Usage(String),
    #[error("{0}")]
    Toolchain(BoxError),
    #[error("{count} problem(s) found")]
    Compile { count: usize },
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Transport(InvokeError),
    #[error("I/O error: '{0}'")]
    Io(#[from] std::io::Error),
}

impl RunError {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunError::Usage(_) => 2,
            RunError::Compile { .. } => 1,
            RunError::Toolchain(_) => 3,
            RunError::Codec(_) => 4,
            RunError::Transport(_) => 5,
            RunError::Io(_) => 1,
        }
    }
}

impl From<RunError> for ExitError {
    fn from(err: RunError) -> Self {
        ExitError {
            code: err.exit_code(),
            message: err.to_string(),
        }
    }
}

impl From<ToolchainError> for RunError {
    fn from(err: ToolchainError) -> Self {
        match err {
            ToolchainError::Platform(err) => err.into(),
            err => RunError::Toolchain(Box::new(err)),
        }
    }
}

impl From<PlatformError> for RunError {
    fn from(err: PlatformError) -> Self {
        match err {
            PlatformError::InvalidVersion(_) => RunError::Usage(err.to_string()),
            PlatformError::Unsupported { .. } => RunError::Toolchain(Box::new(err)),
        }
    }
}

impl From<CompileError> for RunError {
    fn from(err: CompileError) -> Self {
        match err {
            CompileError::Failed { diagnostics, .. } => RunError::Compile {
                count: diagnostics.len(),
            },
            err => RunError::Toolchain(Box::new(err)),
        }
    }
}

impl From<LookupError> for RunError {
    fn from(err: LookupError) -> Self {
        match err {
            LookupError::Io(err) => RunError::Io(err),
            LookupError::Decode(_) => RunError::Codec(CodecError::Lookup(err)),
            err => RunError::Usage(err.to_string()),
        }
    }
}

impl From<InvokeError> for RunError {
    fn from(err: InvokeError) -> Self {
        match err {
            InvokeError::Lookup(err) => err.into(),
            InvokeError::Codec(CodecError::Lookup(err)) => err.into(),
            InvokeError::Codec(err) => RunError::Codec(err),
            InvokeError::MissingRequest => RunError::Usage(err.to_string()),
            InvokeError::Request(
                GrpcRequestError::InvalidMetadataKey { .. }
                | GrpcRequestError::InvalidMetadataValue { .. },
            ) => RunError::Usage(err.to_string()),
            InvokeError::Input(err) => RunError::Io(err),
            err => RunError::Transport(err),
        }
    }
}

impl From<ConfigError> for RunError {
    fn from(err: ConfigError) -> Self {
        RunError::Usage(err.to_string())
    }
}

impl From<LintError> for RunError {
    fn from(err: LintError) -> Self {
        RunError::Usage(err.to_string())
    }
}

/// Settings shared by every command.
#[derive(Debug, Clone, Default)]
pub struct RunnerOptions {
    /// Overrides the platform cache directory.
    pub cache_path: Option<PathBuf>,
    /// Download the compiler into a scratch directory on every run.
    pub no_cache: bool,
    /// Download the compiler archive from this exact URL.
    pub protoc_url: Option<String>,
    pub json: bool,
    /// Colon-separated diagnostic fields, e.g. `filename:line:message`.
    pub print_fields: Option<String>,
}

/// Where schemas come from: source files, or a precompiled descriptor set.
#[derive(Debug, Clone, Default)]
pub struct SchemaArgs {
    pub inputs: Vec<PathBuf>,
    pub descriptor_set: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct CompileArgs {
    pub inputs: Vec<PathBuf>,
    pub dry_run: bool,
    /// Also write the compiled descriptor set to this file.
    pub output: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct LintArgs {
    pub inputs: Vec<PathBuf>,
    pub list_linters: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FormatArgs {
    pub inputs: Vec<PathBuf>,
    /// Rewrite files in place instead of reporting differences.
    pub overwrite: bool,
}

/// A fully qualified element name plus the schemas to look it up in.
#[derive(Debug, Clone, Default)]
pub struct DescribeArgs {
    pub name: String,
    pub schema: SchemaArgs,
}

#[derive(Debug, Clone, Default)]
pub struct BinaryToJsonArgs {
    pub message: String,
    pub schema: SchemaArgs,
}

#[derive(Debug, Clone, Default)]
pub struct JsonToBinaryArgs {
    pub message: String,
    pub schema: SchemaArgs,
    pub data: Option<String>,
    pub stdin: bool,
}

#[derive(Debug, Clone, Default)]
pub struct GrpcArgs {
    pub schema: SchemaArgs,
    pub address: String,
    pub method: String,
    pub data: Option<String>,
    pub stdin: bool,
    pub headers: Vec<(String, String)>,
    pub call_timeout: Option<String>,
    pub connect_timeout: Option<String>,
    pub keepalive_time: Option<String>,
}

/// Schema files after input expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sources {
    /// Names as passed to the compiler, relative to the working directory or an import path.
    pub files: Vec<PathBuf>,
    /// Where each of `files` lives on disk.
    pub paths: Vec<PathBuf>,
    pub import_paths: Vec<PathBuf>,
}

impl Sources {
    fn request(&self) -> CompileRequest {
        CompileRequest {
            files: self.files.clone(),
            import_paths: self.import_paths.clone(),
        }
    }
}

pub struct Runner {
    work_dir: PathBuf,
    config: ProjectConfig,
    options: RunnerOptions,
    print_fields: PrintFields,
    fetcher: Option<Arc<dyn Fetch>>,
    input: Option<Input>,
    output: Output,
}

impl Runner {
    /// Loads the project configuration from `work_dir` and validates `options`.
    pub fn new(
        work_dir: impl Into<PathBuf>,
        options: RunnerOptions,
        input: Input,
        output: Output,
    ) -> Result<Self, RunError> {
        let work_dir = work_dir.into();
        let config = ProjectConfig::load(&work_dir)?;
        let print_fields = match &options.print_fields {
            Some(fields) => fields.parse().map_err(RunError::Usage)?,
            None => PrintFields::default(),
        };

        Ok(Self {
            work_dir,
            config,
            options,
            print_fields,
            fetcher: None,
            input: Some(input),
            output,
        })
    }

    /// Replaces the HTTP downloader, e.g. with an in-memory source.
    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetch>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn version(&mut self) -> Result<(), RunError> {
        let protoc = self.toolchain_version()?;

        if self.options.json {
            self.write_json(&serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "protoc_version": protoc.as_str(),
            }))
        } else {
            self.write_line(&format!(
                "prototool {}\nprotoc {protoc}",
                env!("CARGO_PKG_VERSION")
            ))
        }
    }

    /// Resolves the compiler, downloading it on a cache miss, and prints its path.
    pub async fn download(&mut self) -> Result<(), RunError> {
        let binary = self.protoc().await?;

        if self.options.json {
            self.write_json(&serde_json::json!({
                "path": binary.path(),
                "version": binary.entry().version,
                "sha256": binary.entry().sha256,
            }))
        } else {
            self.write_line(&binary.path().display().to_string())
        }
    }

    pub fn clean(&mut self) -> Result<(), RunError> {
        Ok(self.binary_cache()?.clean()?)
    }

    /// Prints the schema files `inputs` expand to.
    pub fn files(&mut self, inputs: &[PathBuf]) -> Result<(), RunError> {
        let sources = expand_inputs(&self.work_dir, &self.config.protoc.includes, inputs)?;

        for file in &sources.files {
            if self.options.json {
                self.write_json(&serde_json::json!({ "filename": file }))?;
            } else {
                self.write_line(&file.display().to_string())?;
            }
        }

        Ok(())
    }

    /// Compiles every input file in one compiler run.
    pub async fn compile(&mut self, args: CompileArgs) -> Result<(), RunError> {
        let sources = expand_inputs(&self.work_dir, &self.config.protoc.includes, &args.inputs)?;

        match self.compile_sources(&sources, args.dry_run).await? {
            Compilation::DryRun(command) => {
                if self.options.json {
                    self.write_json(&serde_json::json!({ "command": command }))
                } else {
                    self.write_line(&command)
                }
            }
            Compilation::Compiled { set, diagnostics } => {
                self.write_diagnostics(&diagnostics)?;

                if let Some(path) = args.output {
                    let path = self.work_dir.join(path);
                    std::fs::write(&path, set.encoded())?;
                    debug!(path = %path.display(), "descriptor set written");
                }

                Ok(())
            }
        }
    }

    /// Compiles each file on its own, concurrently, and runs the lint rules over it.
    pub async fn lint(&mut self, args: LintArgs) -> Result<(), RunError> {
        let lint_set = LintSet::new(&self.config.lint.exclude)?;

        if args.list_linters {
            for linter in lint_set.linters() {
                if self.options.json {
                    self.write_json(&serde_json::json!({
                        "id": linter.id(),
                        "purpose": linter.purpose(),
                    }))?;
                } else {
                    self.write_line(&format!("{} {}", linter.id(), linter.purpose()))?;
                }
            }
            return Ok(());
        }

        let sources = expand_inputs(&self.work_dir, &self.config.protoc.includes, &args.inputs)?;
        let binary = self.protoc().await?;
        let compiler = DescriptorCompiler::new(binary.path()).work_dir(&self.work_dir);
        let lint_set = Arc::new(lint_set);
        let import_paths = sources.import_paths.clone();

        let results = pool::run_bounded(sources.files, pool::default_parallelism(), |file| {
            let compiler = compiler.clone();
            let lint_set = lint_set.clone();
            let request = CompileRequest {
                files: vec![file.clone()],
                import_paths: import_paths.clone(),
            };

            async move {
                match compiler.compile(&request).await {
                    Ok(Compilation::Compiled {
                        set,
                        mut diagnostics,
                    }) => {
                        if let Some(descriptor) = set.pool().get_file_by_name(&descriptor_name(&file)) {
                            diagnostics.extend(lint_set.check(&descriptor));
                        }
                        Ok(diagnostics)
                    }
                    Ok(Compilation::DryRun(_)) => Ok(Vec::new()),
                    Err(CompileError::Failed { diagnostics, .. }) => Ok(diagnostics),
                    Err(err) => Err(err),
                }
            }
        })
        .await
        .map_err(|err| RunError::Toolchain(Box::new(err)))?;

        let mut diagnostics = Vec::new();
        for result in results {
            diagnostics.extend(result?);
        }
        self.report_findings(diagnostics)
    }

    /// Formats each file on its own, concurrently.
    ///
    /// Differences are reported as diagnostics, or written back with `overwrite`.
    pub async fn format(&mut self, args: FormatArgs) -> Result<(), RunError> {
        let sources = expand_inputs(&self.work_dir, &self.config.protoc.includes, &args.inputs)?;
        let formatters = Arc::new(format::builtin_formatters());
        debug!(
            formatters = ?formatters.iter().map(|f| f.id()).collect::<Vec<_>>(),
            files = sources.files.len(),
            "formatting"
        );

        let jobs: Vec<_> = sources.files.into_iter().zip(sources.paths).collect();
        let results = pool::run_bounded(jobs, pool::default_parallelism(), |(name, path)| {
            format_file(formatters.clone(), name, path, args.overwrite)
        })
        .await
        .map_err(|err| RunError::Toolchain(Box::new(err)))?;

        let mut diagnostics = Vec::new();
        for result in results {
            diagnostics.extend(result?);
        }
        self.report_findings(diagnostics)
    }

    /// Prints the `DescriptorProto` of a message.
    pub async fn descriptor_proto(&mut self, args: DescribeArgs) -> Result<(), RunError> {
        let set = self.descriptor_set(&args.schema).await?;
        let proto = set.message(&args.name)?.descriptor_proto().clone();
        self.write_message(&proto.transcode_to_dynamic())
    }

    /// Prints the `FieldDescriptorProto` of `package.Message.field`.
    pub async fn field_descriptor_proto(&mut self, args: DescribeArgs) -> Result<(), RunError> {
        let set = self.descriptor_set(&args.schema).await?;
        let proto = set.field(&args.name)?.field_descriptor_proto().clone();
        self.write_message(&proto.transcode_to_dynamic())
    }

    /// Prints the `ServiceDescriptorProto` of a service.
    pub async fn service_descriptor_proto(&mut self, args: DescribeArgs) -> Result<(), RunError> {
        let set = self.descriptor_set(&args.schema).await?;
        let proto = set.service(&args.name)?.service_descriptor_proto().clone();
        self.write_message(&proto.transcode_to_dynamic())
    }

    /// Decodes binary input as `message` and prints it as structured text.
    pub async fn binary_to_json(&mut self, args: BinaryToJsonArgs) -> Result<(), RunError> {
        let mut input = self.take_input()?;
        let set = self.descriptor_set(&args.schema).await?;

        let mut bytes = Vec::new();
        input.read_to_end(&mut bytes).await?;

        let message = codec::decode(&set, &args.message, &bytes)?;
        self.write_message(&message)
    }

    /// Parses structured text as `message` and writes its binary encoding.
    pub async fn json_to_binary(&mut self, args: JsonToBinaryArgs) -> Result<(), RunError> {
        let source = self.request_source(args.data, args.stdin)?;
        let set = self.descriptor_set(&args.schema).await?;

        let text = match source {
            RequestSource::Text(text) => text,
            RequestSource::Reader(mut reader) => {
                let mut text = String::new();
                reader.read_to_string(&mut text).await?;
                text
            }
        };

        let message = codec::from_text(&set, &args.message, &text)?;
        self.output.write_all(&codec::encode(&message))?;
        self.output.flush()?;
        Ok(())
    }

    /// Calls a gRPC method and prints every response as it arrives.
    pub async fn grpc(&mut self, args: GrpcArgs) -> Result<(), RunError> {
        let request = self.request_source(args.data, args.stdin)?;

        if args.address.trim().is_empty() {
            return Err(RunError::Usage("--address is required".to_string()));
        }
        if args.method.trim().is_empty() {
            return Err(RunError::Usage("--method is required".to_string()));
        }

        let options = CallOptions {
            headers: args.headers,
            call_timeout: parse_duration("call-timeout", args.call_timeout.as_deref())?
                .unwrap_or(DEFAULT_CALL_TIMEOUT),
            session: SessionOptions {
                connect_timeout: parse_duration("connect-timeout", args.connect_timeout.as_deref())?
                    .unwrap_or(DEFAULT_CONNECT_TIMEOUT),
                keepalive: parse_duration("keepalive-time", args.keepalive_time.as_deref())?,
            },
        };

        let set = self.descriptor_set(&args.schema).await?;
        let invoker = CallInvoker::new(set);
        let mut responses = invoker
            .invoke(&args.method, &args.address, request, &options)
            .await?;

        while let Some(response) = responses.next().await {
            self.write_message(&response?)?;
        }

        Ok(())
    }

    async fn descriptor_set(&mut self, schema: &SchemaArgs) -> Result<DescriptorSet, RunError> {
        if let Some(path) = &schema.descriptor_set {
            return Ok(DescriptorSet::from_file(self.work_dir.join(path))?);
        }

        let sources = expand_inputs(&self.work_dir, &self.config.protoc.includes, &schema.inputs)?;

        match self.compile_sources(&sources, false).await? {
            Compilation::Compiled { set, diagnostics } => {
                for diagnostic in &diagnostics {
                    warn!(diagnostic = %self.print_fields.format(diagnostic), "protoc warning");
                }
                Ok(set)
            }
            Compilation::DryRun(_) => Err(RunError::Usage(
                "a dry run does not produce descriptors".to_string(),
            )),
        }
    }

    /// Compiles `sources`, printing diagnostics when the compiler fails.
    async fn compile_sources(
        &mut self,
        sources: &Sources,
        dry_run: bool,
    ) -> Result<Compilation, RunError> {
        let binary = self.protoc().await?;
        let compiler = DescriptorCompiler::new(binary.path())
            .work_dir(&self.work_dir)
            .dry_run(dry_run);

        match compiler.compile(&sources.request()).await {
            Ok(compilation) => Ok(compilation),
            Err(err) => {
                self.write_diagnostics(err.diagnostics())?;
                Err(err.into())
            }
        }
    }

    fn toolchain_version(&self) -> Result<ToolchainVersion, RunError> {
        match &self.options.protoc_url {
            Some(url) => Ok(ToolchainVersion::custom(url)),
            None => Ok(ToolchainVersion::resolve(
                self.config.protoc.version.as_deref(),
            )?),
        }
    }

    fn binary_cache(&mut self) -> Result<BinaryCache, RunError> {
        let fetcher = match &self.fetcher {
            Some(fetcher) => fetcher.clone(),
            None => {
                let fetcher: Arc<dyn Fetch> = Arc::new(HttpFetcher::new(DOWNLOAD_TIMEOUT)?);
                self.fetcher = Some(fetcher.clone());
                fetcher
            }
        };

        let cache = if self.options.no_cache {
            BinaryCache::ephemeral(fetcher)
        } else {
            let root = match &self.options.cache_path {
                Some(path) => self.work_dir.join(path),
                None => BinaryCache::default_root()?,
            };
            BinaryCache::persistent(root, fetcher)
        };

        Ok(cache
            .with_url_override(self.options.protoc_url.clone())
            .with_expected_sha256(self.config.protoc.sha256.clone()))
    }

    async fn protoc(&mut self) -> Result<ProtocBinary, RunError> {
        let key = CacheKey::new(self.toolchain_version()?, Platform::current()?);
        Ok(self.binary_cache()?.resolve(&key).await?)
    }

    /// Exactly one of `--data` and `--stdin` must be given.
    fn request_source(&mut self, data: Option<String>, stdin: bool) -> Result<RequestSource, RunError> {
        match (data, stdin) {
            (Some(text), false) => Ok(RequestSource::Text(text)),
            (None, true) => Ok(RequestSource::Reader(self.take_input()?)),
            _ => Err(RunError::Usage(
                "exactly one of --data or --stdin must be set".to_string(),
            )),
        }
    }

    fn take_input(&mut self) -> Result<Input, RunError> {
        self.input
            .take()
            .ok_or_else(|| RunError::Usage("standard input was already consumed".to_string()))
    }

    fn write_line(&mut self, line: &str) -> Result<(), RunError> {
        writeln!(self.output, "{line}")?;
        Ok(())
    }

    fn write_json<T: Serialize>(&mut self, value: &T) -> Result<(), RunError> {
        let rendered = if self.options.json {
            serde_json::to_string(value)
        } else {
            serde_json::to_string_pretty(value)
        }
        .map_err(std::io::Error::other)?;

        self.write_line(&rendered)
    }

    fn write_message(&mut self, message: &DynamicMessage) -> Result<(), RunError> {
        let value = codec::to_value(message)?;
        self.write_json(&value)?;
        self.output.flush()?;
        Ok(())
    }

    /// Prints findings sorted by location; any finding fails the command.
    fn report_findings(&mut self, mut diagnostics: Vec<Diagnostic>) -> Result<(), RunError> {
        diagnostics.sort();
        diagnostics.dedup();

        self.write_diagnostics(&diagnostics)?;

        if diagnostics.is_empty() {
            Ok(())
        } else {
            Err(RunError::Compile {
                count: diagnostics.len(),
            })
        }
    }

    fn write_diagnostics(&mut self, diagnostics: &[Diagnostic]) -> Result<(), RunError> {
        for diagnostic in diagnostics {
            if self.options.json {
                self.write_json(diagnostic)?;
            } else {
                let line = self.print_fields.format(diagnostic);
                self.write_line(&line)?;
            }
        }
        Ok(())
    }
}

/// Expands `inputs` (files or directories, relative to `work_dir`) into schema files.
///
/// No inputs means the whole working directory. Directories are walked in
/// sorted order, skipping hidden ones. The working directory is always the first
/// import path, followed by `includes`; a file outside the working directory
/// adds its own parent as an import path and is compiled by its bare name.
/// Inputs are resolved through symlinks and `..` before being placed.
pub fn expand_inputs(
    work_dir: &Path,
    includes: &[PathBuf],
    inputs: &[PathBuf],
) -> Result<Sources, RunError> {
    let default_inputs = [PathBuf::from(".")];
    let inputs = if inputs.is_empty() {
        &default_inputs[..]
    } else {
        inputs
    };

    let root = work_dir.canonicalize()?;
    // Compiler-visible name -> file on disk
    let mut files = BTreeMap::<PathBuf, PathBuf>::new();
    let mut import_paths = vec![PathBuf::from(".")];
    import_paths.extend(includes.iter().cloned());

    for input in inputs {
        let path = work_dir.join(input);
        if !path.exists() {
            return Err(RunError::Usage(format!(
                "input '{}' does not exist",
                input.display()
            )));
        }
        let path = path.canonicalize()?;

        let found = if path.is_dir() {
            let mut found = Vec::new();
            let walker = WalkDir::new(&path)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry.file_name()));

            for entry in walker {
                let entry = entry.map_err(std::io::Error::from)?;
                if entry.file_type().is_file() && is_proto(entry.path()) {
                    found.push(entry.into_path());
                }
            }
            found
        } else if is_proto(&path) {
            vec![path]
        } else {
            return Err(RunError::Usage(format!(
                "'{}' is not a .proto file",
                input.display()
            )));
        };

        for file in found {
            let name = match file.strip_prefix(&root) {
                Ok(relative) => relative.to_path_buf(),
                Err(_) => {
                    let parent = file.parent().map(Path::to_path_buf).unwrap_or_default();
                    if !import_paths.contains(&parent) {
                        import_paths.push(parent);
                    }
                    file.file_name().map(PathBuf::from).unwrap_or_default()
                }
            };

            match files.get(&name) {
                Some(existing) if *existing != file => {
                    return Err(RunError::Usage(format!(
                        "'{}' and '{}' would both compile as '{}'",
                        existing.display(),
                        file.display(),
                        name.display()
                    )));
                }
                Some(_) => {}
                None => {
                    files.insert(name, file);
                }
            }
        }
    }

    if files.is_empty() {
        return Err(RunError::Usage("no .proto files found".to_string()));
    }

    let (files, paths) = files.into_iter().unzip();
    Ok(Sources {
        files,
        paths,
        import_paths,
    })
}

async fn format_file(
    formatters: Arc<Vec<Box<dyn Formatter>>>,
    name: PathBuf,
    path: PathBuf,
    overwrite: bool,
) -> std::io::Result<Vec<Diagnostic>> {
    let original = tokio::fs::read_to_string(&path).await?;
    let formatted = format::apply(&formatters, &original);

    if formatted == original {
        return Ok(Vec::new());
    }

    if overwrite {
        tokio::fs::write(&path, formatted).await?;
        debug!(file = %name.display(), "rewrote");
        return Ok(Vec::new());
    }

    Ok(format::differences(
        &descriptor_name(&name),
        &original,
        &formatted,
    ))
}

fn is_proto(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "proto")
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|name| name.starts_with('.'))
}

/// The name the compiler gives a file passed as `path`.
fn descriptor_name(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn parse_duration(flag: &str, raw: Option<&str>) -> Result<Option<Duration>, RunError> {
    raw.map(|raw| {
        humantime::parse_duration(raw)
            .map_err(|err| RunError::Usage(format!("invalid --{flag} '{raw}': {err}")))
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(root: &Path, relative: &str) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "syntax = \"proto3\";").unwrap();
    }

    #[test]
    fn expands_directories_sorted_and_skips_hidden() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "b/z.proto");
        touch(dir.path(), "a.proto");
        touch(dir.path(), "b/notes.txt");
        touch(dir.path(), ".git/ignored.proto");

        let sources = expand_inputs(dir.path(), &[PathBuf::from("vendor")], &[]).unwrap();

        assert_eq!(
            sources.files,
            [PathBuf::from("a.proto"), PathBuf::from("b/z.proto")]
        );
        assert_eq!(
            sources.import_paths,
            [PathBuf::from("."), PathBuf::from("vendor")]
        );
    }

    #[test]
    fn files_outside_the_work_dir_bring_their_parent() {
        let work = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        touch(other.path(), "ext.proto");

        let sources =
            expand_inputs(work.path(), &[], &[other.path().join("ext.proto")]).unwrap();

        assert_eq!(sources.files, [PathBuf::from("ext.proto")]);
        assert_eq!(sources.import_paths[1], other.path().canonicalize().unwrap());
    }

    #[test]
    fn parent_relative_inputs_are_outside_the_work_dir() {
        let base = tempfile::tempdir().unwrap();
        touch(base.path(), "work/a.proto");
        touch(base.path(), "other/ext.proto");
        let work = base.path().join("work");

        let sources =
            expand_inputs(&work, &[], &[PathBuf::from("../other/ext.proto")]).unwrap();

        assert_eq!(sources.files, [PathBuf::from("ext.proto")]);
        assert_eq!(
            sources.import_paths,
            [
                PathBuf::from("."),
                base.path().join("other").canonicalize().unwrap()
            ]
        );

        let inside = expand_inputs(&work, &[], &[PathBuf::from("../work/a.proto")]).unwrap();
        assert_eq!(inside.files, [PathBuf::from("a.proto")]);
        assert_eq!(inside.import_paths, [PathBuf::from(".")]);
    }

    #[test]
    fn same_named_files_from_different_dirs_are_rejected() {
        let work = tempfile::tempdir().unwrap();
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        touch(first.path(), "x.proto");
        touch(second.path(), "x.proto");

        let result = expand_inputs(
            work.path(),
            &[],
            &[first.path().join("x.proto"), second.path().join("x.proto")],
        );
        assert!(matches!(result, Err(RunError::Usage(msg)) if msg.contains("x.proto")));

        // The same file named twice is not a collision
        let twice = expand_inputs(
            work.path(),
            &[],
            &[first.path().join("x.proto"), first.path().to_path_buf()],
        )
        .unwrap();
        assert_eq!(twice.files, [PathBuf::from("x.proto")]);
    }

    #[test]
    fn bad_inputs_are_usage_errors() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "readme.md");

        for input in ["missing.proto", "readme.md"] {
            let err = expand_inputs(dir.path(), &[], &[PathBuf::from(input)]).unwrap_err();
            assert_eq!(err.exit_code(), 2, "{input}");
        }

        let empty = tempfile::tempdir().unwrap();
        assert!(matches!(
            expand_inputs(empty.path(), &[], &[]),
            Err(RunError::Usage(_))
        ));
    }

    #[test]
    fn durations_use_human_units() {
        assert_eq!(
            parse_duration("call-timeout", Some("1m30s")).unwrap(),
            Some(Duration::from_secs(90))
        );
        assert_eq!(parse_duration("call-timeout", None).unwrap(), None);
        assert!(parse_duration("call-timeout", Some("soon")).is_err());
    }

    #[test]
    fn descriptor_names_use_forward_slashes() {
        assert_eq!(descriptor_name(Path::new("a/b/c.proto")), "a/b/c.proto");
    }
}
