//! terragrunt-atlantis-config CLI - Generate Atlantis config for terragrunt projects

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use clap::{ArgAction, Args, Parser, Subcommand};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use terragrunt_atlantis_config::{generate, GenerateConfig};

#[derive(Parser)]
#[command(name = "terragrunt-atlantis-config")]
#[command(author, version, about = "Generate Atlantis config for terragrunt projects")]
struct Cli {
    /// Debug output on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate an atlantis.yaml for every terragrunt module under --root
    Generate(GenerateArgs),
    /// Print the version
    Version,
}

// Boolean flags take an optional value so defaults of true can be turned off
// with `--flag=false`.
#[derive(Args, Debug)]
struct GenerateArgs {
    /// Root directory to scan for terragrunt modules
    #[arg(long, default_value = ".")]
    root: Utf8PathBuf,

    /// Output file; printed to stdout when absent
    #[arg(long)]
    output: Option<Utf8PathBuf>,

    /// Enable autoplan by default
    #[arg(long, default_value_t = false, action = ArgAction::Set, num_args = 0..=1, default_missing_value = "true", require_equals = true)]
    autoplan: bool,

    /// Enable automerge
    #[arg(long, default_value_t = false, action = ArgAction::Set, num_args = 0..=1, default_missing_value = "true", require_equals = true)]
    automerge: bool,

    /// Enable parallel plan and apply
    #[arg(long, default_value_t = true, action = ArgAction::Set, num_args = 0..=1, default_missing_value = "true", require_equals = true)]
    parallel: bool,

    /// Include the dependencies of dependencies
    #[arg(long, default_value_t = true, action = ArgAction::Set, num_args = 0..=1, default_missing_value = "true", require_equals = true)]
    cascade_dependencies: bool,

    /// Skip parent terragrunt configs that are only included by others
    #[arg(long, default_value_t = true, action = ArgAction::Set, num_args = 0..=1, default_missing_value = "true", require_equals = true)]
    ignore_parent_terragrunt: bool,

    /// Ignore `dependency` blocks
    #[arg(long, default_value_t = false, action = ArgAction::Set, num_args = 0..=1, default_missing_value = "true", require_equals = true)]
    ignore_dependency_blocks: bool,

    /// Emit a workspace per project, named after its directory
    #[arg(long, default_value_t = false, action = ArgAction::Set, num_args = 0..=1, default_missing_value = "true", require_equals = true)]
    create_workspace: bool,

    /// Emit a name per project, derived from its directory
    #[arg(long, default_value_t = false, action = ArgAction::Set, num_args = 0..=1, default_missing_value = "true", require_equals = true)]
    create_project_name: bool,

    /// Keep the workflows of an existing output file
    #[arg(long, default_value_t = true, action = ArgAction::Set, num_args = 0..=1, default_missing_value = "true", require_equals = true)]
    preserve_workflows: bool,

    /// Keep the projects of an existing output file, replacing those regenerated
    #[arg(long, default_value_t = false, action = ArgAction::Set, num_args = 0..=1, default_missing_value = "true", require_equals = true)]
    preserve_projects: bool,

    /// Default workflow
    #[arg(long, default_value = "")]
    workflow: String,

    /// Default apply requirements, comma separated
    #[arg(long, value_delimiter = ',')]
    apply_requirements: Vec<String>,

    /// Default terraform version
    #[arg(long, default_value = "")]
    terraform_version: String,

    /// Globs relative to --root selecting the modules to process, comma separated
    #[arg(long, value_delimiter = ',')]
    filter: Vec<String>,

    /// Number of modules processed concurrently
    #[arg(long, default_value_t = 15)]
    num_executors: usize,

    /// Compute execution order groups from project dependencies
    #[arg(long, default_value_t = false, action = ArgAction::Set, num_args = 0..=1, default_missing_value = "true", require_equals = true)]
    execution_order_groups: bool,

    /// Emit depends_on from project dependencies
    #[arg(long, default_value_t = false, action = ArgAction::Set, num_args = 0..=1, default_missing_value = "true", require_equals = true)]
    depends_on: bool,

    /// Marker file names; each directory holding one becomes a single project
    #[arg(long, value_delimiter = ',')]
    project_hcl_files: Vec<String>,

    /// Only emit modules whose locals set atlantis_project = true
    #[arg(long, default_value_t = false, action = ArgAction::Set, num_args = 0..=1, default_missing_value = "true", require_equals = true)]
    use_project_markers: bool,
}

impl GenerateArgs {
    fn into_config(self) -> GenerateConfig {
        GenerateConfig {
            root: self.root,
            output: self.output,
            autoplan: self.autoplan,
            automerge: self.automerge,
            parallel: self.parallel,
            cascade_dependencies: self.cascade_dependencies,
            ignore_parent_terragrunt: self.ignore_parent_terragrunt,
            ignore_dependency_blocks: self.ignore_dependency_blocks,
            create_workspace: self.create_workspace,
            create_project_name: self.create_project_name,
            preserve_workflows: self.preserve_workflows,
            preserve_projects: self.preserve_projects,
            default_workflow: self.workflow,
            default_apply_requirements: self.apply_requirements,
            default_terraform_version: self.terraform_version,
            filter: self.filter,
            num_executors: self.num_executors,
            execution_order_groups: self.execution_order_groups,
            depends_on: self.depends_on,
            project_hcl_files: self.project_hcl_files,
            use_project_markers: self.use_project_markers,
            env: Arc::new(std::env::vars().collect()),
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli.command) {
        eprintln!("Error: {:#}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// Log to stderr, honouring RUST_LOG when set.
fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::Version => {
            println!("terragrunt-atlantis-config {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Command::Generate(args) => run_generate(args),
    }
}

fn run_generate(args: GenerateArgs) -> Result<()> {
    debug!(?args, "generate");
    let config = args.into_config();

    let atlantis = generate(&config).with_context(|| format!("failed to generate config for {}", config.root))?;

    match &config.output {
        Some(path) => atlantis
            .write(path)
            .with_context(|| format!("failed to write {}", path))?,
        None => {
            let yaml = atlantis.to_yaml().context("failed to serialize config")?;
            print!("{}", yaml);
        }
    }
    Ok(())
}
