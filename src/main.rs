use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use url::Url;

use graph_dispatch::graph::Transformation;
use graph_dispatch::{
    AccumulatorValue, Configuration, ExecutionResult, JobDescriptor, RemoteEnvironment,
};

#[derive(Parser, Debug)]
#[command(name = "graph-dispatch")]
#[command(version)]
#[command(about = "Submit execution graphs to a remote cluster coordinator")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Submit a graph and wait for the job to finish
    Submit(SubmitArgs),
}

// =============================================================================
// Submit Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct SubmitArgs {
    /// Coordinator host name or address
    #[arg(long)]
    host: String,

    /// Coordinator port
    #[arg(long, default_value = "6123")]
    port: u32,

    /// Job name shown by the coordinator
    #[arg(long, short = 'n')]
    job_name: String,

    /// Artifact bundle shipped with the job (repeatable)
    #[arg(long = "jar", short = 'j')]
    jars: Vec<String>,

    /// Classpath URL visible to all workers (repeatable)
    #[arg(long = "classpath")]
    classpaths: Vec<Url>,

    /// Client option as key=value (repeatable)
    #[arg(long = "conf", short = 'c', value_parser = parse_key_value)]
    conf: Vec<(String, String)>,

    /// Default parallelism for operators that don't set one
    #[arg(long, short = 'p')]
    parallelism: Option<i32>,

    /// JSON file with a job descriptor ({"id": ..., "record": ...})
    #[arg(long)]
    descriptor: Option<PathBuf>,

    /// Don't print job status changes while waiting
    #[arg(long)]
    quiet: bool,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,

    /// JSON file with the list of transformations
    graph: PathBuf,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// Input / Output Types
// =============================================================================

#[derive(Deserialize)]
struct GraphFile {
    transformations: Vec<Transformation>,
}

#[derive(Deserialize)]
struct DescriptorFile {
    id: String,
    record: serde_json::Value,
}

#[derive(Serialize)]
struct ResultOutput<'a> {
    job_id: String,
    net_runtime_ms: u128,
    accumulators: &'a BTreeMap<String, AccumulatorValue>,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    if key.trim().is_empty() {
        return Err(format!("empty key in '{}'", raw));
    }
    Ok((key.trim().to_string(), value.to_string()))
}

fn load_descriptor(path: &PathBuf) -> Result<JobDescriptor, Box<dyn std::error::Error>> {
    let file: DescriptorFile = serde_json::from_slice(&std::fs::read(path)?)?;
    Ok(JobDescriptor::from_json(file.id, &file.record)?)
}

fn print_result(
    result: &ExecutionResult,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match output_format {
        OutputFormat::Json => {
            let output = ResultOutput {
                job_id: result.job_id().to_string(),
                net_runtime_ms: result.net_runtime().as_millis(),
                accumulators: result.all_accumulator_results(),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!("Job ID:      {}", result.job_id());
            println!("Net Runtime: {} ms", result.net_runtime().as_millis());
            let accumulators = result.all_accumulator_results();
            if !accumulators.is_empty() {
                println!();
                println!("{:<30} VALUE", "ACCUMULATOR");
                println!("{}", "-".repeat(50));
                for (name, value) in accumulators {
                    println!("{:<30} {}", name, value);
                }
            }
        }
    }
    Ok(())
}

// =============================================================================
// Command Handlers
// =============================================================================

async fn handle_submit(args: SubmitArgs) -> Result<(), Box<dyn std::error::Error>> {
    let graph: GraphFile = serde_json::from_slice(&std::fs::read(&args.graph)?)?;
    let descriptor = args.descriptor.as_ref().map(load_descriptor).transpose()?;
    let configuration: Configuration = args.conf.into_iter().collect();

    let mut env = RemoteEnvironment::with_coordinator(
        graph_dispatch::client::GrpcCoordinator,
        args.host,
        args.port,
        Some(configuration),
        &args.jars,
        Some(args.classpaths),
    )?;
    if let Some(parallelism) = args.parallelism {
        env.set_parallelism(parallelism)?;
    }
    if args.quiet {
        env.disable_sysout_logging();
    }
    for transformation in graph.transformations {
        env.add_transformation(transformation);
    }

    tracing::info!(environment = %env, job_name = %args.job_name, "Submitting job");

    let outcome = match descriptor {
        Some(ref descriptor) => env.execute_with_descriptor(&args.job_name, descriptor).await,
        None => env.execute(&args.job_name).await,
    };

    match outcome {
        Ok(result) => print_result(&result, &args.output),
        Err(e) => {
            eprintln!("Error: {}", e);
            if e.is_recoverable() {
                eprintln!("Hint: the coordinator could not be reached, the job was not submitted");
            }
            std::process::exit(1);
        }
    }
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Submit(submit_args) => handle_submit(submit_args).await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_key_value_splits_on_first_equals() {
        assert_eq!(
            parse_key_value("client.id=a=b").unwrap(),
            ("client.id".to_string(), "a=b".to_string())
        );
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }

    #[test]
    fn graph_file_parses_transformations() {
        let raw = r#"{"transformations":[
            {"id":1,"name":"source","operator":"Source","parallelism":2},
            {"id":2,"name":"sink","operator":"Sink","inputs":[1]}
        ]}"#;
        let graph: GraphFile = serde_json::from_str(raw).unwrap();
        assert_eq!(graph.transformations.len(), 2);
        assert_eq!(graph.transformations[0].parallelism, Some(2));
        assert_eq!(graph.transformations[1].inputs.len(), 1);
    }
}
