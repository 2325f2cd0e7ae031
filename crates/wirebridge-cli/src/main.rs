//! Wirebridge CLI
//!
//! - `schema`: normalize a textual or JSON table schema
//! - `encode`: run a query against a configured data source and write the
//!   binary row stream (or, with `--verify`, decode it back to TSV)

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use wirebridge_common::config::{env_parse_or_default, load_file, load_from_env};
use wirebridge_common::{telemetry, BridgeSettings};
use wirebridge_core::datasource::DataSourceManager;
use wirebridge_core::pipeline::{debug_schema, mutation_schema, ChannelSink, QueryParameters};
use wirebridge_core::schema::set_emit_default_values;
use wirebridge_core::{QueryHandler, QueryRequest, SchemaCache, TableSchema, WireBuffer};

const ENV_PREFIX: &str = "WIREBRIDGE";

/// Batches buffered between the pipeline thread and the writer,
/// overridable with `WIREBRIDGE_CHANNEL_CAPACITY`
const CHANNEL_CAPACITY: usize = 8;

#[derive(Parser, Debug)]
#[command(name = "wirebridge")]
#[command(about = "Wirebridge - binary row codec and streaming pipeline")]
struct Args {
    /// Log level
    #[arg(long, env = "LOG_LEVEL", global = true)]
    log_level: Option<String>,

    /// Emit JSON formatted logs
    #[arg(long, global = true)]
    json_logs: bool,

    /// Settings file (JSON), overridden by WIREBRIDGE__* environment variables
    #[arg(long, env = "WIREBRIDGE_SETTINGS", global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse a schema and print its multi-line form
    Schema {
        /// Schema file, `-` for stdin
        input: String,

        /// Print the inline form instead
        #[arg(long)]
        inline: bool,
    },

    /// Stream a query result in the binary row format
    Encode {
        /// Data source configuration file (JSON)
        #[arg(long)]
        config: PathBuf,

        /// Data source id
        #[arg(long)]
        datasource: String,

        #[arg(long, default_value = "")]
        query: String,

        /// Requested columns, e.g. "id UInt32, name Nullable(String)"
        #[arg(long)]
        columns: Option<String>,

        /// Request parameter, `key=value` or a bare `key`
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,

        /// Output file, stdout when absent
        #[arg(long)]
        output: Option<PathBuf>,

        /// Decode the stream and print rows as TSV
        #[arg(long)]
        verify: bool,
    },
}

fn parse_param(arg: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = arg.split_once('=').unwrap_or((arg, ""));
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("invalid parameter '{}'", arg));
    }
    Ok((key.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let settings: BridgeSettings = match &args.settings {
        Some(path) => load_file(path, ENV_PREFIX)?,
        None => load_from_env(ENV_PREFIX)?,
    };

    let log_level = args
        .log_level
        .clone()
        .unwrap_or_else(|| settings.telemetry.log_level.clone());
    telemetry::init(&log_level, args.json_logs || settings.telemetry.json_logs)?;

    set_emit_default_values(settings.query.emit_default_values);

    match args.command {
        Command::Schema { input, inline } => print_schema(&input, inline),
        Command::Encode {
            config,
            datasource,
            query,
            columns,
            params,
            output,
            verify,
        } => {
            let request = QueryRequest {
                datasource,
                query,
                columns,
                params: params.into_iter().collect(),
            };
            encode(&settings, &config, request, output, verify).await
        }
    }
}

fn read_input(input: &str) -> Result<String> {
    if input == "-" {
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text)?;
        Ok(text)
    } else {
        std::fs::read_to_string(input).with_context(|| format!("cannot read {}", input))
    }
}

fn print_schema(input: &str, inline: bool) -> Result<()> {
    let text = read_input(input)?;
    let trimmed = text.trim_start();
    let schema = if trimmed.starts_with('[') || trimmed.starts_with('{') {
        let config: serde_json::Value = serde_json::from_str(trimmed)?;
        TableSchema::from_config(&config)?
    } else {
        TableSchema::from_text(&text)?
    };
    debug!(columns = schema.len(), "parsed schema");

    if inline {
        println!("{}", schema.to_inline());
    } else {
        print!("{}", schema.to_text());
    }
    Ok(())
}

async fn encode(
    settings: &BridgeSettings,
    config: &Path,
    request: QueryRequest,
    output: Option<PathBuf>,
    verify: bool,
) -> Result<()> {
    let handler = QueryHandler::new(
        Arc::new(DataSourceManager::default()),
        Arc::new(SchemaCache::new(&settings.schema_cache)),
        settings.query.clone(),
    );
    let loaded = handler.load_file(config)?;
    info!(datasources = loaded, "loaded data sources");

    let verify_schema = if verify {
        Some(output_schema(handler.manager(), &request)?)
    } else {
        None
    };

    let capacity = env_parse_or_default("WIREBRIDGE_CHANNEL_CAPACITY", CHANNEL_CAPACITY);
    let (mut sink, mut rx) = ChannelSink::channel(capacity);
    let pipeline = tokio::task::spawn_blocking(move || handler.execute(&request, &mut sink));

    let mut collected = Vec::new();
    let mut writer: Box<dyn tokio::io::AsyncWrite + Unpin + Send> = match (&output, verify) {
        (_, true) => Box::new(tokio::io::sink()),
        (Some(path), false) => Box::new(tokio::fs::File::create(path).await?),
        (None, false) => Box::new(tokio::io::stdout()),
    };
    while let Some(batch) = rx.recv().await {
        if verify {
            collected.extend_from_slice(&batch);
        } else {
            writer.write_all(&batch).await?;
        }
    }
    writer.flush().await?;

    let stats = pipeline.await??;
    info!(
        rows = stats.rows,
        batches = stats.batches,
        bytes = stats.bytes,
        "encode completed"
    );

    if let Some(schema) = verify_schema {
        print_rows(&schema, collected)?;
    }
    Ok(())
}

/// Shape of the stream the request produces
fn output_schema(manager: &DataSourceManager, request: &QueryRequest) -> Result<TableSchema> {
    let mut params = QueryParameters::default();
    params.merge_map(&request.params)?;
    if params.mutation {
        return Ok(mutation_schema());
    }
    if params.debug {
        return Ok(debug_schema());
    }
    match request.columns.as_deref() {
        Some(columns) if !columns.trim().is_empty() => Ok(TableSchema::from_text(columns)?),
        _ => manager
            .require(&request.datasource)?
            .infer_schema(&request.query, &params),
    }
}

fn print_rows(schema: &TableSchema, bytes: Vec<u8>) -> Result<()> {
    if schema.is_empty() {
        bail!("cannot decode a stream without columns");
    }
    println!("{}", schema.names().join("\t"));
    let mut buf = WireBuffer::from_bytes(bytes);
    while buf.remaining() > 0 {
        let row = schema
            .columns()
            .iter()
            .map(|column| column.read_value_text(&mut buf))
            .collect::<wirebridge_common::Result<Vec<_>>>()?;
        println!("{}", row.join("\t"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_param() {
        assert_eq!(parse_param("batch_size=10").unwrap(), ("batch_size".into(), "10".into()));
        assert_eq!(parse_param("debug").unwrap(), ("debug".into(), String::new()));
        assert_eq!(parse_param("a=b=c").unwrap(), ("a".into(), "b=c".into()));
        assert!(parse_param("=1").is_err());
    }

    #[test]
    fn test_args() {
        let args = Args::try_parse_from([
            "wirebridge",
            "encode",
            "--config",
            "ds.json",
            "--datasource",
            "static",
            "--param",
            "batch_size=5",
            "--param",
            "null_as_default",
            "--verify",
        ])
        .unwrap();
        match args.command {
            Command::Encode {
                datasource,
                params,
                verify,
                ..
            } => {
                assert_eq!(datasource, "static");
                assert_eq!(params.len(), 2);
                assert!(verify);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_output_schema_modes() {
        let manager = DataSourceManager::default();
        let request = QueryRequest::new("static", "").with_param("mutation", "");
        assert_eq!(output_schema(&manager, &request).unwrap().names(), vec!["affected_rows"]);

        let request = QueryRequest::new("static", "").with_columns("a Int32, b String");
        assert_eq!(output_schema(&manager, &request).unwrap().names(), vec!["a", "b"]);

        // inference needs the data source
        assert!(output_schema(&manager, &QueryRequest::new("static", "")).is_err());
    }
}
