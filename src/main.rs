//! Sellerflow CLI Entry Point
//!
//! Runs seller workflow templates against loopback capabilities, which
//! echo their input, so templates can be exercised end to end without real
//! providers.
//!
//! # Usage
//!
//! ```bash
//! # List the available templates
//! sellerflow --list
//!
//! # Run a template with a JSON context
//! sellerflow --template product_launch --context launch.json
//!
//! # Preview a template without running it
//! sellerflow --template inventory_restock --dry-run
//!
//! # Resume an interrupted workflow
//! sellerflow --resume 5f0c1e9a-... --state-dir /var/lib/sellerflow
//! ```

use std::env;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use colored::Colorize;
use log::{error, info};

use sellerflow::capability::{bind_loopback, CommandTable};
use sellerflow::monitoring::{ExecutionTimeline, FanoutSink, LogSink};
use sellerflow::storage::FileCheckpointStore;
use sellerflow::workflow::{load_templates, templates, Template};
use sellerflow::{Context, EngineConfig, Orchestrator, WorkflowInstance, WorkflowStatus};
use sellerflow::{APP_NAME, VERSION};

/// Command-line configuration parsed from arguments.
#[derive(Debug, Default)]
struct Config {
    template_id: Option<String>,
    context_path: Option<PathBuf>,
    resume_id: Option<String>,
    state_dir: Option<PathBuf>,
    list: bool,
    dry_run: bool,
    verbose: bool,
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME.bold(), VERSION);
    println!("Seller Workflow Execution Engine");
    println!();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: sellerflow [OPTIONS] [TEMPLATE_ID]");
    println!();
    println!("Arguments:");
    println!("  [TEMPLATE_ID]        Template to run (same as --template)");
    println!();
    println!("Options:");
    println!("  --list               List available templates");
    println!("  --template ID        Template to run");
    println!("  --context FILE       JSON object used as the workflow context");
    println!("  --resume ID          Resume a workflow from its last checkpoint");
    println!("  --state-dir DIR      Checkpoint directory (default: $SELLERFLOW_CHECKPOINT_DIR");
    println!("                       or .sellerflow/checkpoints)");
    println!("  --dry-run            Show the execution plan without running it");
    println!("  --verbose            Enable debug logging");
    println!("  --help               Show this help message");
    println!("  --version            Show version information");
    println!();
    println!("Examples:");
    println!("  sellerflow --list");
    println!("  sellerflow product_launch --context launch.json");
    println!("  sellerflow --resume 5f0c1e9a-7f3b-4c1e-9d2a-2b1f0c9e8a77");
}

/// Returns the value following a flag.
fn flag_value(args: &[String], i: &mut usize, flag: &str) -> Result<String, String> {
    *i += 1;
    args.get(*i)
        .cloned()
        .ok_or_else(|| format!("{} requires an argument", flag))
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--list" | "-l" => config.list = true,
            "--dry-run" => config.dry_run = true,
            "--verbose" | "-v" => config.verbose = true,
            "--template" | "-t" => {
                config.template_id = Some(flag_value(args, &mut i, "--template")?);
            }
            "--context" | "-c" => {
                config.context_path = Some(PathBuf::from(flag_value(args, &mut i, "--context")?));
            }
            "--resume" => {
                config.resume_id = Some(flag_value(args, &mut i, "--resume")?);
            }
            "--state-dir" => {
                config.state_dir = Some(PathBuf::from(flag_value(args, &mut i, "--state-dir")?));
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => {
                if config.template_id.is_some() {
                    return Err(format!("Unexpected argument: {}", arg));
                }
                config.template_id = Some(arg.clone());
            }
        }
        i += 1;
    }

    if config.template_id.is_some() && config.resume_id.is_some() {
        return Err("--template and --resume cannot be combined".to_string());
    }

    Ok(config)
}

/// Reads the workflow context from a JSON file holding an object.
fn read_context(path: Option<&PathBuf>) -> Result<Context, Box<dyn std::error::Error>> {
    let Some(path) = path else {
        return Ok(Context::new());
    };

    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read context file '{}': {}", path.display(), e))?;
    let value: serde_json::Value = serde_json::from_str(&raw)
        .map_err(|e| format!("Invalid JSON in '{}': {}", path.display(), e))?;

    Context::from_json(value)
        .ok_or_else(|| format!("Context file '{}' must hold a JSON object", path.display()).into())
}

/// Built-in templates plus any configured template file.
fn collect_templates(settings: &EngineConfig) -> Result<Vec<Template>, Box<dyn std::error::Error>> {
    let mut all = templates::builtin()?;

    if let Some(path) = &settings.templates_path {
        let extra = load_templates(path)?;
        info!("Loaded {} templates from {}", extra.len(), path.display());
        all.extend(extra);
    }

    Ok(all)
}

fn print_templates(templates: &[Template]) {
    println!("{}", "Available templates:".bold());
    println!();
    for template in templates {
        println!(
            "  {:22} {} steps  {}",
            template.id.cyan(),
            template.len(),
            template.description
        );
    }
    println!();
}

/// Prints the steps a template would run, in order.
fn print_plan(template: &Template) {
    println!("{} {}", "Execution plan for".bold(), template.id.cyan().bold());
    println!();
    for (i, step) in template.steps.iter().enumerate() {
        let deps = if step.dependencies.is_empty() {
            "-".to_string()
        } else {
            step.dependencies.join(", ")
        };
        println!(
            "  {:>2}. {:20} {}.{}",
            i + 1,
            step.id,
            step.capability,
            step.operation
        );
        println!(
            "      after: {}  retry: {:?} x{}  timeout: {}s{}",
            deps,
            step.retry_policy.retry_strategy,
            step.retry_policy.max_retries,
            step.retry_policy.timeout_seconds,
            if step.critical { "  [critical]".red().to_string() } else { String::new() }
        );
    }
    println!();
}

fn print_summary(instance: &WorkflowInstance, timeline: &ExecutionTimeline) {
    let status = instance.status.to_string();
    let status = match instance.status {
        WorkflowStatus::Completed => status.green().bold(),
        WorkflowStatus::Failed => status.red().bold(),
        _ => status.yellow().bold(),
    };

    print!("{}", timeline.gantt_chart(&instance.id));
    println!();
    println!("Workflow {}: {}", instance.id, status);
    println!(
        "  steps: {} completed, {} failed, {} skipped of {}",
        instance.metrics.completed_steps,
        instance.metrics.failed_steps,
        instance.metrics.skipped_steps,
        instance.metrics.total_steps
    );
    println!(
        "  retries: {}  time: {:.2}s  error rate: {:.1}%",
        instance.metrics.retry_count,
        instance.metrics.total_execution_time,
        instance.metrics.error_rate * 100.0
    );
    if let Some(message) = &instance.error_message {
        println!("  error: {}", message.red());
    }
    if instance.status == WorkflowStatus::Paused {
        println!("  resume with: sellerflow --resume {}", instance.id);
    }
}

/// Main application entry point.
async fn run() -> Result<WorkflowStatus, Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    // Parse arguments
    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    setup_logging(config.verbose);
    print_banner();

    let mut settings = EngineConfig::from_env();
    if let Some(dir) = config.state_dir.clone() {
        settings.checkpoint_dir = dir;
    }

    let templates = collect_templates(&settings)?;

    if config.list {
        print_templates(&templates);
        return Ok(WorkflowStatus::Completed);
    }

    let mut commands = CommandTable::new();
    bind_loopback(&mut commands, &templates);

    let timeline = Arc::new(ExecutionTimeline::new());
    let sink = FanoutSink::new().with(Arc::new(LogSink)).with(timeline.clone());

    info!("Checkpoints: {}", settings.checkpoint_dir.display());
    let orchestrator = Orchestrator::builder(commands)
        .store(Arc::new(FileCheckpointStore::new(settings.checkpoint_dir.clone())))
        .sink(Arc::new(sink))
        .config(settings)
        .build();
    orchestrator.register_templates(templates)?;

    let instance = if let Some(id) = &config.resume_id {
        orchestrator.resume(id).await?
    } else {
        let Some(template_id) = &config.template_id else {
            eprintln!("Error: no template given");
            eprintln!();
            print_usage();
            return Err("Nothing to run: pass --template ID, --resume ID or --list".into());
        };

        if config.dry_run {
            let template = orchestrator
                .template(template_id)
                .ok_or_else(|| format!("Template not found: {}", template_id))?;
            info!("Mode: DRY RUN (capabilities will not be called)");
            print_plan(&template);
            return Ok(WorkflowStatus::Completed);
        }

        let context = read_context(config.context_path.as_ref())?;
        orchestrator
            .start_workflow(template_id, context, Context::new())
            .await?
    };

    print_summary(&instance, &timeline);

    if instance.status == WorkflowStatus::Failed {
        error!("Workflow {} failed", instance.id);
    }
    Ok(instance.status)
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(WorkflowStatus::Failed) => ExitCode::FAILURE,
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
