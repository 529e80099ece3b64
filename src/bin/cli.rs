use std::path::{Path, PathBuf};
use std::process;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use iacharness::ci::{self, CiEnvironment, CiIntegration};
use iacharness::config::{Config, CONFIG_FILE_NAME};
use iacharness::dynamic::cloud::{AwsCliInspector, CloudInspector};
use iacharness::dynamic::Environment;
use iacharness::error::HarnessError;
use iacharness::evaluation::{self, EvaluationSamples};
use iacharness::exec::SystemRunner;
use iacharness::output::{self, OutputFormat};
use iacharness::{RunOptions, RunReport};

#[derive(Parser)]
#[command(
    name = "iac-harness",
    about = "Test harness for Terraform: static analysis, policy compliance and runtime checks",
    version,
    author
)]
struct Cli {
    /// Enable debug logging (or set IAC_HARNESS_LOG)
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ReportArgs {
    /// Config file path
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Output format (console, json, yaml, markdown, junit)
    #[arg(long, short = 'f', default_value = "console")]
    format: String,

    /// Write output to file instead of stdout
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run terraform validate, tflint and checkov
    Static {
        /// Terraform directory
        #[arg(default_value = ".")]
        dir: PathBuf,

        #[command(flatten)]
        report: ReportArgs,
    },

    /// Score resources against the policy files
    Policy {
        /// Terraform directory
        #[arg(default_value = ".")]
        dir: PathBuf,

        /// Policy directory
        #[arg(long, short = 'p')]
        policies: Option<PathBuf>,

        #[command(flatten)]
        report: ReportArgs,
    },

    /// Deploy the configuration and run runtime checks
    Dynamic {
        /// Terraform directory
        #[arg(default_value = ".")]
        dir: PathBuf,

        /// Target environment (localstack, aws)
        #[arg(long, short = 'e')]
        environment: Option<String>,

        /// Destroy resources after testing
        #[arg(long)]
        destroy: bool,

        #[command(flatten)]
        report: ReportArgs,
    },

    /// Static analysis and policy compliance, optionally with dynamic testing
    #[command(alias = "analyze")]
    Comprehensive {
        /// Terraform directory
        #[arg(default_value = ".")]
        dir: PathBuf,

        /// Policy directory
        #[arg(long, short = 'p')]
        policies: Option<PathBuf>,

        /// Also deploy and run runtime checks
        #[arg(long)]
        include_dynamic: bool,

        /// Target environment (localstack, aws)
        #[arg(long, short = 'e')]
        environment: Option<String>,

        /// Destroy resources after testing
        #[arg(long)]
        destroy: bool,

        /// CI system (github_actions, gitlab_ci, jenkins, local, auto)
        #[arg(long, env = "IAC_HARNESS_CI")]
        ci: Option<String>,

        /// Directory for the CI report bundle
        #[arg(long, default_value = "reports")]
        reports_dir: PathBuf,

        #[command(flatten)]
        report: ReportArgs,
    },

    /// Evaluate detection accuracy, performance and configurations
    Evaluate {
        /// Directory for evaluation_report.html and evaluation_data.json
        #[arg(long, default_value = "evaluation_results")]
        output_dir: PathBuf,

        /// JSON or YAML file with detection and timing samples
        #[arg(long)]
        samples: Option<PathBuf>,
    },

    /// List the loaded policies
    ListPolicies {
        /// Policy directory
        #[arg(long, short = 'p')]
        policies: Option<PathBuf>,

        /// Config file path
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,

        /// Output format (table, json)
        #[arg(long, short = 'f', default_value = "table")]
        format: String,
    },

    /// Generate a starter .iac-harness.toml config file
    Init {
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Static { dir, report } => cmd_static(dir, report),
        Commands::Policy {
            dir,
            policies,
            report,
        } => cmd_policy(dir, policies, report),
        Commands::Dynamic {
            dir,
            environment,
            destroy,
            report,
        } => cmd_dynamic(dir, environment, destroy, report),
        Commands::Comprehensive {
            dir,
            policies,
            include_dynamic,
            environment,
            destroy,
            ci,
            reports_dir,
            report,
        } => cmd_comprehensive(
            dir,
            Overrides {
                policies,
                environment,
                destroy,
            },
            include_dynamic,
            ci,
            reports_dir,
            report,
        ),
        Commands::Evaluate {
            output_dir,
            samples,
        } => cmd_evaluate(output_dir, samples),
        Commands::ListPolicies {
            policies,
            config,
            format,
        } => cmd_list_policies(policies, config, format),
        Commands::Init { force } => cmd_init(force),
    };

    match result {
        Ok(exit_code) => process::exit(exit_code),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(e.exit_code());
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("IAC_HARNESS_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[derive(Default)]
struct Overrides {
    policies: Option<PathBuf>,
    environment: Option<String>,
    destroy: bool,
}

fn load(dir: &Path, config: Option<PathBuf>, overrides: Overrides) -> Result<Config, HarnessError> {
    let environment = overrides.environment.and_then(|s| {
        let env = Environment::from_str_lenient(&s);
        if env.is_none() {
            eprintln!("Warning: unknown environment '{}', using config default", s);
        }
        env
    });
    let options = RunOptions {
        config_path: config,
        policies_dir: overrides.policies,
        environment,
        destroy: overrides.destroy,
    };
    iacharness::load_config(dir, &options)
}

fn parse_format(format_str: &str) -> OutputFormat {
    OutputFormat::from_str_lenient(format_str).unwrap_or_else(|| {
        eprintln!("Warning: unknown format '{}', using console", format_str);
        OutputFormat::Console
    })
}

fn emit(report: &RunReport, args: &ReportArgs) -> Result<(), HarnessError> {
    let rendered = output::render(report, parse_format(&args.format))?;
    match &args.output {
        Some(out) => std::fs::write(out, &rendered)?,
        None => print!("{}", rendered),
    }
    Ok(())
}

/// Exit code: 0 = no breaking findings, 1 = breaking findings.
fn gate(report: &RunReport) -> i32 {
    if ci::is_breaking(report) {
        1
    } else {
        0
    }
}

fn cmd_static(dir: PathBuf, args: ReportArgs) -> Result<i32, HarnessError> {
    let config = load(&dir, args.config.clone(), Overrides::default())?;
    let report = iacharness::run_static(&SystemRunner, &config, &dir);
    emit(&report, &args)?;
    Ok(gate(&report))
}

fn cmd_policy(dir: PathBuf, policies: Option<PathBuf>, args: ReportArgs) -> Result<i32, HarnessError> {
    let overrides = Overrides {
        policies,
        ..Default::default()
    };
    let config = load(&dir, args.config.clone(), overrides)?;
    let report = iacharness::run_policy(&SystemRunner, &config, &dir);
    emit(&report, &args)?;
    Ok(gate(&report))
}

fn cmd_dynamic(
    dir: PathBuf,
    environment: Option<String>,
    destroy: bool,
    args: ReportArgs,
) -> Result<i32, HarnessError> {
    let overrides = Overrides {
        environment,
        destroy,
        ..Default::default()
    };
    let config = load(&dir, args.config.clone(), overrides)?;
    let inspector = AwsCliInspector::new(&SystemRunner, &config);
    let report = iacharness::run_dynamic(&SystemRunner, &inspector, &config, &dir);
    emit(&report, &args)?;
    Ok(gate(&report))
}

fn cmd_comprehensive(
    dir: PathBuf,
    overrides: Overrides,
    include_dynamic: bool,
    ci_str: Option<String>,
    reports_dir: PathBuf,
    args: ReportArgs,
) -> Result<i32, HarnessError> {
    let config = load(&dir, args.config.clone(), overrides)?;
    let inspector = AwsCliInspector::new(&SystemRunner, &config);
    let inspector = include_dynamic.then_some(&inspector as &dyn CloudInspector);
    let report = iacharness::run_comprehensive(&SystemRunner, inspector, &config, &dir);
    emit(&report, &args)?;

    let Some(ci_str) = ci_str else {
        return Ok(gate(&report));
    };
    let environment = if ci_str.eq_ignore_ascii_case("auto") {
        CiEnvironment::detect(|key| std::env::var(key).ok())
    } else {
        CiEnvironment::from_str_lenient(&ci_str).unwrap_or_else(|| {
            eprintln!("Warning: unknown CI environment '{}', detecting", ci_str);
            CiEnvironment::detect(|key| std::env::var(key).ok())
        })
    };

    let integration = CiIntegration::from_env(environment);
    let bundle = integration.save_reports(&report, &reports_dir)?;
    eprintln!("Reports saved to {}", reports_dir.display());
    tracing::debug!(junit = %bundle.junit.display(), "report bundle written");

    let (lines, exit_code) = integration.finalize(&report)?;
    for line in lines {
        println!("{}", line);
    }
    Ok(exit_code)
}

fn cmd_evaluate(output_dir: PathBuf, samples: Option<PathBuf>) -> Result<i32, HarnessError> {
    let samples = match samples {
        Some(path) => EvaluationSamples::load(&path)?,
        None => EvaluationSamples::default(),
    };
    let data = evaluation::evaluate(&samples);
    let artifacts = evaluation::write_report(&data, &output_dir)?;
    println!("Evaluation report generated: {}", artifacts.html.display());
    println!("Raw data saved: {}", artifacts.data.display());
    Ok(0)
}

fn cmd_list_policies(
    policies: Option<PathBuf>,
    config: Option<PathBuf>,
    format_str: String,
) -> Result<i32, HarnessError> {
    let overrides = Overrides {
        policies,
        ..Default::default()
    };
    let config = load(Path::new("."), config, overrides)?;
    let summary = iacharness::list_policies(&config);

    match format_str.as_str() {
        "json" => {
            let json = serde_json::to_string_pretty(&summary)?;
            println!("{}", json);
        }
        _ => {
            println!("{:<28} {:<6} {:<40} DESCRIPTION", "NAME", "RULES", "RESOURCE TYPES");
            println!("{}", "-".repeat(100));
            for policy in &summary.policies {
                println!(
                    "{:<28} {:<6} {:<40} {}",
                    policy.name,
                    policy.rules_count,
                    policy.resource_types.join(", "),
                    policy.description,
                );
            }
            println!("\n{} policies loaded from {}", summary.total_policies, config.policy.dir.display());
        }
    }

    Ok(0)
}

fn cmd_init(force: bool) -> Result<i32, HarnessError> {
    let path = PathBuf::from(CONFIG_FILE_NAME);

    if path.exists() && !force {
        eprintln!("{} already exists. Use --force to overwrite.", CONFIG_FILE_NAME);
        return Ok(1);
    }

    std::fs::write(&path, Config::starter_toml())?;
    println!("Created {}", CONFIG_FILE_NAME);

    Ok(0)
}
