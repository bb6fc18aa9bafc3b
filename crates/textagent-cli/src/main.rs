//! `textagent`: run, render, inspect and validate agent files.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use textagent_core::{AgentDefinition, FieldDescriptor, Inputs, StructuredOutput};
use textagent_runtime::{load_agent, LoadOptions, LogSink};

const PROMPT_PREVIEW_CHARS: usize = 200;
const INSTRUCTIONS_PREVIEW_CHARS: usize = 100;
const LONG_TEXT_CHARS: usize = 100;

#[derive(Debug, Parser)]
#[command(name = "textagent", version, about = "Run text-defined LLM agents")]
struct Cli {
    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run an agent and print its structured output
    Run(RunArgs),
    /// Print the rendered prompt without calling a model
    Render(RenderArgs),
    /// Show the inputs, outputs and settings of an agent file
    Info(FileArgs),
    /// Check an agent file and report every problem
    Validate(FileArgs),
}

#[derive(Debug, Args)]
struct InputArgs {
    /// JSON file with input values
    #[arg(short, long, value_name = "FILE")]
    inputs: Option<PathBuf>,

    /// Input values as `--name value` or `--name=value`; `@path` reads a file
    #[arg(value_name = "INPUTS", trailing_var_arg = true, allow_hyphen_values = true)]
    values: Vec<String>,
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Path to the agent file
    file: PathBuf,

    /// Override the model from the agent file
    #[arg(short, long, value_name = "ID")]
    model: Option<String>,

    #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,

    #[command(flatten)]
    inputs: InputArgs,
}

#[derive(Debug, Args)]
struct RenderArgs {
    /// Path to the agent file
    file: PathBuf,

    /// Print the rendered prompt and resolved inputs as JSON
    #[arg(long)]
    json: bool,

    #[command(flatten)]
    inputs: InputArgs,
}

#[derive(Debug, Args)]
struct FileArgs {
    /// Path to the agent file
    file: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Pretty,
    Yaml,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Command::Run(args) => run(args).await,
        Command::Render(args) => render(args),
        Command::Info(args) => info(&args.file),
        Command::Validate(args) => validate(&args.file),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
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

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let inputs = collect_inputs(&args.inputs)?;

    let mut options = LoadOptions::new().with_trace_sink(Arc::new(LogSink));
    if let Some(model) = args.model {
        options = options.with_model(model);
    }
    let agent = load_agent(&args.file, options)
        .with_context(|| format!("cannot load agent {}", args.file.display()))?;

    let output = agent.run(&inputs).await?;
    print!("{}", format_output(&output, args.format)?);
    Ok(())
}

fn render(args: RenderArgs) -> anyhow::Result<()> {
    let definition = read_definition(&args.file)?;
    let inputs = collect_inputs(&args.inputs)?;
    let rendered = definition.render(&inputs)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&rendered)?);
        return Ok(());
    }
    if let Some(instructions) = &rendered.instructions {
        println!("# Instructions\n\n{}\n", instructions);
    }
    println!("# Prompt\n\n{}", rendered.prompt);
    Ok(())
}

fn info(path: &Path) -> anyhow::Result<()> {
    let definition = read_definition(path)?;

    println!("Agent: {}", definition.name());
    println!("Model: {}", definition.model());
    println!("Retries: {}", definition.retries());
    if !definition.settings().is_empty() {
        println!("Settings: {}", Value::Object(definition.settings().clone()));
    }
    if let Some(instructions) = definition.instructions() {
        println!("\nInstructions: {}", preview(instructions, INSTRUCTIONS_PREVIEW_CHARS));
    }

    println!("\nInputs:");
    for field in definition.input_model().fields() {
        println!("  {}", describe_field(field));
    }
    for field in definition.template().inferred_inputs() {
        println!("  {} (from template)", describe_field(field));
    }

    println!("\nOutput fields ({}):", definition.output_model().name());
    for field in definition.output_model().fields() {
        println!("  {}", describe_field(field));
    }

    let template = definition.prompt_template();
    println!("\nPrompt template ({} chars):", template.chars().count());
    println!("  {}", preview(template, PROMPT_PREVIEW_CHARS));
    Ok(())
}

fn validate(path: &Path) -> anyhow::Result<()> {
    let definition = read_definition(path)?;

    println!("Valid agent definition: {}", path.display());
    println!("  Name: {}", definition.name());
    println!("  Model: {}", definition.model());
    println!("  Output fields: {}", definition.output_model().len());
    println!("  Inputs: {}", definition.input_names().len());
    Ok(())
}

fn read_definition(path: &Path) -> anyhow::Result<AgentDefinition> {
    AgentDefinition::from_file(path).with_context(|| format!("cannot load agent {}", path.display()))
}

/// Inputs from `--inputs FILE` overlaid with trailing `--name value` pairs.
fn collect_inputs(args: &InputArgs) -> anyhow::Result<Inputs> {
    let mut inputs = match &args.inputs {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("cannot read inputs file {}", path.display()))?;
            let value: Value = serde_json::from_str(&text)
                .with_context(|| format!("inputs file {} is not valid JSON", path.display()))?;
            Inputs::from_json(value)?
        }
        None => Inputs::new(),
    };
    inputs.extend(parse_input_args(&args.values)?);
    tracing::debug!(inputs = ?inputs.names(), "collected inputs");
    Ok(inputs)
}

/// Parse `--name value` and `--name=value`. Dashes in names become underscores.
fn parse_input_args(args: &[String]) -> anyhow::Result<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        let Some(flag) = arg.strip_prefix("--").filter(|flag| !flag.is_empty()) else {
            bail!("unexpected argument '{}'; inputs are given as --name value", arg);
        };
        let (name, value) = match flag.split_once('=') {
            Some((name, value)) => (name, value.to_string()),
            None => match iter.next() {
                Some(value) => (flag, value.clone()),
                None => bail!("input --{} has no value", flag),
            },
        };
        pairs.push((name.replace('-', "_"), value));
    }
    Ok(pairs)
}

fn format_output(output: &StructuredOutput, format: OutputFormat) -> anyhow::Result<String> {
    Ok(match format {
        OutputFormat::Json => format!("{}\n", output.to_json_pretty()),
        OutputFormat::Yaml => serde_yaml::to_string(output)?,
        OutputFormat::Pretty => {
            let mut text = String::new();
            for (name, value) in output.iter() {
                match value {
                    Value::Bool(passed) => {
                        text.push_str(&format!("{}: {}\n", name, if *passed { "PASS" } else { "FAIL" }))
                    }
                    Value::String(s) if s.chars().count() > LONG_TEXT_CHARS => {
                        text.push_str(&format!("{}:\n  {}\n", name, s))
                    }
                    Value::String(s) => text.push_str(&format!("{}: {}\n", name, s)),
                    other => text.push_str(&format!("{}: {}\n", name, other)),
                }
            }
            text
        }
    })
}

fn describe_field(field: &FieldDescriptor) -> String {
    let mut line = format!("{}: {}", field.name(), field.field_type());
    if !field.constraints().is_empty() {
        let constraints: Vec<String> = field.constraints().iter().map(ToString::to_string).collect();
        line.push_str(&format!(" [{}]", constraints.join(", ")));
    }
    if field.is_optional() {
        line.push_str(" (optional)");
    }
    if let Some(default) = field.default() {
        line.push_str(&format!(" = {}", default));
    }
    if let Some(description) = field.description() {
        line.push_str(&format!(" - {}", description));
    }
    line
}

fn preview(text: &str, limit: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(limit).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}
