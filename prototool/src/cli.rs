//! # CLI
//!
//! This module defines the command-line interface of `prototool` using `clap`.
//!
//! It only parses and shapes input (e.g. splitting `-H key:value` headers);
//! every semantic check happens in the core `Runner`.
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "prototool", version, about = "Protobuf toolchain CLI")]
pub struct Cli {
    /// Directory for cached protoc binaries (defaults to the platform cache dir)
    #[arg(long, global = true)]
    pub cache_path: Option<PathBuf>,

    /// Download protoc into a scratch directory instead of the cache
    #[arg(long, global = true)]
    pub no_cache: bool,

    /// Download the protoc release archive from this URL
    #[arg(long, global = true)]
    pub protoc_url: Option<String>,

    /// Emit diagnostics, responses and errors as JSON lines
    #[arg(long, global = true)]
    pub json: bool,

    /// Colon-separated diagnostic fields (filename, line, column, id, message)
    #[arg(long, global = true)]
    pub print_fields: Option<String>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the tool version and the protoc version in effect
    Version,

    /// Resolve protoc, downloading it on a cache miss, and print its path
    Download,

    /// Remove every cached protoc binary
    Clean,

    /// Print the .proto files the inputs expand to
    Files {
        /// Files or directories (defaults to the working directory)
        inputs: Vec<PathBuf>,
    },

    /// Compile the inputs in a single protoc run and print diagnostics
    Compile {
        inputs: Vec<PathBuf>,

        /// Print the protoc command line instead of running it
        #[arg(long)]
        dry_run: bool,

        /// Also write the compiled descriptor set to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Compile each input on its own and run the lint rules over it
    Lint {
        inputs: Vec<PathBuf>,

        /// Print the active lint rules and exit
        #[arg(long)]
        list_linters: bool,
    },

    /// Check each input's formatting and print the differences
    Format {
        inputs: Vec<PathBuf>,

        /// Rewrite files in place instead of printing differences
        #[arg(short = 'w', long)]
        overwrite: bool,
    },

    /// Print the DescriptorProto of a message as JSON
    DescriptorProto {
        /// Fully qualified message name (e.g. my.package.Message)
        message: String,
        #[command(flatten)]
        schema: SchemaOpts,
    },

    /// Print the FieldDescriptorProto of a field as JSON
    FieldDescriptorProto {
        /// Fully qualified field path (e.g. my.package.Message.field)
        field: String,
        #[command(flatten)]
        schema: SchemaOpts,
    },

    /// Print the ServiceDescriptorProto of a service as JSON
    ServiceDescriptorProto {
        /// Fully qualified service name (e.g. my.package.Service)
        service: String,
        #[command(flatten)]
        schema: SchemaOpts,
    },

    /// Decode binary protobuf from stdin and print it as JSON
    BinaryToJson {
        /// Fully qualified message name
        message: String,
        #[command(flatten)]
        schema: SchemaOpts,
    },

    /// Encode a JSON message as binary protobuf on stdout
    JsonToBinary {
        /// Fully qualified message name
        message: String,
        #[command(flatten)]
        schema: SchemaOpts,
        #[command(flatten)]
        request: RequestOpts,
    },

    /// Call a gRPC method and print every response
    ///
    /// ## Examples:
    ///
    /// ```bash
    /// prototool grpc --address localhost:50051 --method pkg.Greeter/SayHello --data '{"name": "x"}'
    /// ```
    Grpc {
        #[command(flatten)]
        schema: SchemaOpts,

        /// Server address (host:port, or a URL)
        #[arg(long)]
        address: String,

        /// Method path (package.Service/Method)
        #[arg(long)]
        method: String,

        #[command(flatten)]
        request: RequestOpts,

        #[arg(short = 'H', long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,

        /// Deadline for the whole call, e.g. "60s"
        #[arg(long)]
        call_timeout: Option<String>,

        /// Deadline for establishing the connection, e.g. "10s"
        #[arg(long)]
        connect_timeout: Option<String>,

        /// HTTP/2 keepalive ping interval, e.g. "30s"
        #[arg(long)]
        keepalive_time: Option<String>,
    },
}

/// Where message types are looked up.
#[derive(Args)]
pub struct SchemaOpts {
    /// .proto files or directories (defaults to the working directory)
    pub inputs: Vec<PathBuf>,

    /// Use a precompiled descriptor set instead of running protoc
    #[arg(long)]
    pub descriptor_set: Option<PathBuf>,
}

/// Request text, given inline or read from stdin.
#[derive(Args)]
pub struct RequestOpts {
    /// JSON request text; streaming methods accept several concatenated objects
    #[arg(long, short = 'd')]
    pub data: Option<String>,

    /// Read the request from stdin, one JSON object per line for streaming methods
    #[arg(long)]
    pub stdin: bool,
}

fn parse_header(s: &str) -> Result<(String, String), String> {
    s.split_once(':')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .ok_or_else(|| "Format must be 'key:value'".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn headers_split_on_the_first_colon() {
        assert_eq!(
            parse_header("authorization: Bearer a:b").unwrap(),
            ("authorization".to_string(), "Bearer a:b".to_string())
        );
        assert!(parse_header("no-colon").is_err());
    }

    #[test]
    fn format_takes_inputs_and_overwrite() {
        let cli = Cli::try_parse_from(["prototool", "format", "-w", "a.proto", "api"]).unwrap();

        let Commands::Format { inputs, overwrite } = cli.command else {
            panic!("expected the format command");
        };
        assert_eq!(inputs, [PathBuf::from("a.proto"), PathBuf::from("api")]);
        assert!(overwrite);
    }

    #[test]
    fn grpc_flags_and_global_options() {
        let cli = Cli::try_parse_from([
            "prototool",
            "grpc",
            "api",
            "--address",
            "localhost:50051",
            "--method",
            "pkg.Greeter/SayHello",
            "--data",
            "{}",
            "-H",
            "a:1",
            "-H",
            "a:2",
            "--json",
        ])
        .unwrap();

        assert!(cli.json);
        let Commands::Grpc {
            schema, headers, request, ..
        } = cli.command
        else {
            panic!("expected the grpc command");
        };
        assert_eq!(schema.inputs, [PathBuf::from("api")]);
        assert_eq!(headers.len(), 2);
        assert_eq!(request.data.as_deref(), Some("{}"));
        assert!(!request.stdin);
    }
}
