//! API Schema CLI
//!
//! Command-line interface for building API schemas from a resolved model and
//! validating documents against them.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use api_schema::{
    build_api_schemas, load_json, load_model, validate_document, ApiSchema, BuildOptions, ProjectSchema,
    ValidateError,
};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "api-schema")]
#[command(about = "Build API schemas, JSON path maps and OpenAPI documents from a resolved model")]
#[command(version)]
struct Cli {
    /// Log pass progress to stderr
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every command that runs the pipeline.
#[derive(Args)]
struct BuildArgs {
    /// Resolved model file (JSON)
    model: PathBuf,

    /// Configuration file (default: api-schema.toml if present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Lowest valid school year
    #[arg(long)]
    min_school_year: Option<i64>,

    /// Highest valid school year
    #[arg(long)]
    max_school_year: Option<i64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the API schema of every project in the model
    Build {
        #[command(flatten)]
        build: BuildArgs,

        /// Output file (stdout if not specified)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Write one project's OpenAPI document, or its fragments for an extension
    Openapi {
        #[command(flatten)]
        build: BuildArgs,

        /// Project name or project endpoint name
        #[arg(long)]
        project: String,

        /// The descriptors document instead of the resources document
        #[arg(long)]
        descriptors: bool,

        /// Output file (stdout if not specified)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Validate a document against a resource's JSON Schema
    Validate {
        #[command(flatten)]
        build: BuildArgs,

        /// Document file to validate
        document: PathBuf,

        /// Endpoint name of the resource (e.g. schools)
        #[arg(long)]
        resource: String,

        /// Project of the resource (default: the first project)
        #[arg(long)]
        project: Option<String>,

        /// Validate as an update (PUT) body
        #[arg(long)]
        update: bool,

        /// Output results as JSON (for automation)
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Build { build, output, pretty } => run_build(&build, output.as_deref(), pretty),
        Commands::Openapi {
            build,
            project,
            descriptors,
            output,
            pretty,
        } => run_openapi(&build, &project, descriptors, output.as_deref(), pretty),
        Commands::Validate {
            build,
            document,
            resource,
            project,
            update,
            json,
        } => run_validate(&build, &document, &resource, project.as_deref(), update, json),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build(args: &BuildArgs) -> Result<Vec<ApiSchema>, u8> {
    let mut options = BuildOptions::load(args.config.as_deref()).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;
    if args.min_school_year.is_some() || args.max_school_year.is_some() {
        let min = args.min_school_year.unwrap_or(options.min_school_year);
        let max = args.max_school_year.unwrap_or(options.max_school_year);
        options = options.with_school_years(min, max);
        options.validate().map_err(|e| {
            eprintln!("Error: {}", e);
            e.exit_code() as u8
        })?;
    }
    debug!(?options, "build options");

    let input = load_model(&args.model).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;
    build_api_schemas(&input, &options).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })
}

fn write_json<T: Serialize>(value: &T, output: Option<&Path>, pretty: bool) -> Result<(), u8> {
    let json_output = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .map_err(|e| {
        eprintln!("Error serializing output: {}", e);
        2u8
    })?;

    match output {
        Some(path) => {
            std::fs::write(path, &json_output).map_err(|e| {
                eprintln!("Error writing to {}: {}", path.display(), e);
                3u8
            })?;
        }
        None => {
            println!("{}", json_output);
        }
    }
    Ok(())
}

fn run_build(args: &BuildArgs, output: Option<&Path>, pretty: bool) -> Result<(), u8> {
    let schemas = build(args)?;
    write_json(&schemas, output, pretty)
}

fn find_project<'a>(schemas: &'a [ApiSchema], project: &str) -> Option<&'a ProjectSchema> {
    schemas
        .iter()
        .map(|schema| &schema.project_schema)
        .find(|p| p.project_name == project || p.project_endpoint_name == project.to_lowercase())
}

fn run_openapi(
    args: &BuildArgs,
    project: &str,
    descriptors: bool,
    output: Option<&Path>,
    pretty: bool,
) -> Result<(), u8> {
    let schemas = build(args)?;
    let Some(project_schema) = find_project(&schemas, project) else {
        eprintln!("Error: no project '{}' in the model", project);
        return Err(2);
    };

    if project_schema.is_extension_project {
        let fragments = if descriptors {
            &project_schema.open_api_extension_descriptor_fragments
        } else {
            &project_schema.open_api_extension_resource_fragments
        };
        write_json(fragments, output, pretty)
    } else {
        let document = if descriptors {
            &project_schema.open_api_core_descriptors
        } else {
            &project_schema.open_api_core_resources
        };
        write_json(document, output, pretty)
    }
}

fn run_validate(
    args: &BuildArgs,
    document_path: &Path,
    resource: &str,
    project: Option<&str>,
    update: bool,
    json_output: bool,
) -> Result<(), u8> {
    let document = load_json(document_path).map_err(|e| {
        report_error(json_output, &format!("loading document: {}", e));
        e.exit_code() as u8
    })?;
    let schemas = build(args)?;

    let project = match project {
        Some(project) => project.to_string(),
        None => match schemas.first() {
            Some(schema) => schema.project_schema.project_name.clone(),
            None => {
                report_error(json_output, "the model has no projects");
                return Err(2);
            }
        },
    };

    match validate_document(&schemas, &project, resource, &document, update) {
        Ok(()) => {
            if json_output {
                println!(r#"{{"valid":true}}"#);
            } else {
                println!("Valid");
            }
            Ok(())
        }
        Err(ValidateError::Invalid { errors }) => {
            if json_output {
                let output = serde_json::json!({
                    "valid": false,
                    "errors": errors
                });
                println!("{}", output);
            } else {
                eprintln!("Validation failed:");
                for error in errors {
                    eprintln!("  {}", error);
                }
            }
            Err(1)
        }
        Err(e) => {
            report_error(json_output, &e.to_string());
            Err(e.exit_code() as u8)
        }
    }
}

/// Output an error message in plain text or JSON format.
fn report_error(json_output: bool, msg: &str) {
    if json_output {
        println!("{}", serde_json::json!({ "valid": false, "error": msg }));
    } else {
        eprintln!("Error: {}", msg);
    }
}
