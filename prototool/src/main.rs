//! # Prototool CLI Entry Point
//!
//! The main executable for the prototool toolchain. This file drives the application lifecycle:
//!
//! 1. **Initialization**: Parses command-line arguments using [`cli::Cli`] and installs logging.
//! 2. **Context**: Builds one `prototool_core::Runner` over the working directory, stdin and stdout.
//! 3. **Execution**: Maps the subcommand to exactly one runner operation.
//! 4. **Exit**: Reports a failure on stderr (or stdout as JSON) and exits with its code.

mod cli;

use clap::Parser;
use cli::{Cli, Commands, RequestOpts, SchemaOpts};
use prototool_core::runner::{
    BinaryToJsonArgs, CompileArgs, DescribeArgs, FormatArgs, GrpcArgs, JsonToBinaryArgs, LintArgs,
    SchemaArgs,
};
use prototool_core::{ExitError, RunError, Runner, RunnerOptions};
use std::process;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    let args = Cli::parse();
    let json = args.json;

    if let Err(err) = init_logging(args.debug) {
        eprintln!("{err:#}");
    }

    if let Err(err) = run(args).await {
        let err = ExitError::from(err);
        let rendered = err.render(json);
        if json {
            println!("{rendered}");
        } else {
            eprintln!("{rendered}");
        }
        process::exit(err.code);
    }
}

/// Logs go to stderr; stdout carries command output only.
fn init_logging(debug: bool) -> anyhow::Result<()> {
    let level = if debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init()?;

    Ok(())
}

async fn run(args: Cli) -> Result<(), RunError> {
    let options = RunnerOptions {
        cache_path: args.cache_path,
        no_cache: args.no_cache,
        protoc_url: args.protoc_url,
        json: args.json,
        print_fields: args.print_fields,
    };

    let work_dir = std::env::current_dir()?;
    let mut runner = Runner::new(
        work_dir,
        options,
        Box::new(tokio::io::BufReader::new(tokio::io::stdin())),
        Box::new(std::io::stdout()),
    )?;

    match args.command {
        Commands::Version => runner.version(),
        Commands::Download => runner.download().await,
        Commands::Clean => runner.clean(),
        Commands::Files { inputs } => runner.files(&inputs),
        Commands::Compile {
            inputs,
            dry_run,
            output,
        } => {
            runner
                .compile(CompileArgs {
                    inputs,
                    dry_run,
                    output,
                })
                .await
        }
        Commands::Lint {
            inputs,
            list_linters,
        } => {
            runner
                .lint(LintArgs {
                    inputs,
                    list_linters,
                })
                .await
        }
        Commands::Format { inputs, overwrite } => {
            runner.format(FormatArgs { inputs, overwrite }).await
        }
        Commands::DescriptorProto { message, schema } => {
            runner.descriptor_proto(describe(message, schema)).await
        }
        Commands::FieldDescriptorProto { field, schema } => {
            runner.field_descriptor_proto(describe(field, schema)).await
        }
        Commands::ServiceDescriptorProto { service, schema } => {
            runner.service_descriptor_proto(describe(service, schema)).await
        }
        Commands::BinaryToJson { message, schema } => {
            runner
                .binary_to_json(BinaryToJsonArgs {
                    message,
                    schema: schema.into(),
                })
                .await
        }
        Commands::JsonToBinary {
            message,
            schema,
            request: RequestOpts { data, stdin },
        } => {
            runner
                .json_to_binary(JsonToBinaryArgs {
                    message,
                    schema: schema.into(),
                    data,
                    stdin,
                })
                .await
        }
        Commands::Grpc {
            schema,
            address,
            method,
            request: RequestOpts { data, stdin },
            headers,
            call_timeout,
            connect_timeout,
            keepalive_time,
        } => {
            runner
                .grpc(GrpcArgs {
                    schema: schema.into(),
                    address,
                    method,
                    data,
                    stdin,
                    headers,
                    call_timeout,
                    connect_timeout,
                    keepalive_time,
                })
                .await
        }
    }
}

fn describe(name: String, schema: SchemaOpts) -> DescribeArgs {
    DescribeArgs {
        name,
        schema: schema.into(),
    }
}

impl From<SchemaOpts> for SchemaArgs {
    fn from(opts: SchemaOpts) -> Self {
        SchemaArgs {
            inputs: opts.inputs,
            descriptor_set: opts.descriptor_set,
        }
    }
}
