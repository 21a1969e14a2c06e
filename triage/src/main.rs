//! `triage` CLI: crash investigations and fuzz-harness repair.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::Value;

use triage::core::bundle::ProblemBundle;
use triage::core::harness::{HarnessDraft, TargetUnderTest};
use triage::core::protocol::unreachable_steps;
use triage::core::rules::CompiledRuleSet;
use triage::core::session::{Session, SessionStatus};
use triage::core::types::ToolName;
use triage::core::validator::validate_draft;
use triage::dispatch::ToolRegistry;
use triage::exit_codes;
use triage::investigate::{CancelFlag, TurnEffect, run_investigation};
use triage::io::compiler::{CommandCompiler, Compiler, SkipCompiler};
use triage::io::config::{CommandConfig, TriageConfig, load_config};
use triage::io::init::{CONFIG_FILE, init_workspace};
use triage::io::proposer::CommandProposer;
use triage::io::rule_store::load_rules;
use triage::io::session_log::{write_repair, write_session};
use triage::io::tools::CommandToolBackend;
use triage::logging;
use triage::repair::{RepairConfig, RepairRequest, RepairStatus, run_repair};

#[derive(Parser)]
#[command(
    name = "triage",
    version,
    about = "Bounded crash-triage and fuzz-harness repair orchestrator"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default `triage.toml` and `rules.toml` in the current directory.
    Init {
        /// Overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },
    /// Investigate a crash bundle and print the sealed verdict as JSON.
    Investigate {
        /// Problem bundle JSON file.
        bundle: PathBuf,
        #[arg(long, default_value = CONFIG_FILE)]
        config: PathBuf,
        /// Directory for session artifacts.
        #[arg(long, default_value = ".triage")]
        out: PathBuf,
    },
    /// Repair a generated harness and print the final source.
    Repair {
        /// Repair request JSON file.
        request: PathBuf,
        #[arg(long, default_value = CONFIG_FILE)]
        config: PathBuf,
        /// Directory for revision artifacts.
        #[arg(long, default_value = ".triage")]
        out: PathBuf,
    },
    /// Check a harness source file against the rule set.
    Check {
        source: PathBuf,
        #[arg(long)]
        class_name: String,
        #[arg(long, requires = "target_method")]
        target_type: Option<String>,
        #[arg(long, requires = "target_type")]
        target_method: Option<String>,
        /// Rule file; defaults to the embedded rules.
        #[arg(long)]
        rules: Option<PathBuf>,
    },
    /// Print the rule set.
    Rules {
        /// Rule file; defaults to the embedded rules.
        #[arg(long)]
        rules: Option<PathBuf>,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force } => cmd_init(force),
        Command::Investigate {
            bundle,
            config,
            out,
        } => cmd_investigate(&bundle, &config, &out),
        Command::Repair {
            request,
            config,
            out,
        } => cmd_repair(&request, &config, &out),
        Command::Check {
            source,
            class_name,
            target_type,
            target_method,
            rules,
        } => {
            let target = target_type
                .zip(target_method)
                .map(|(type_name, method)| TargetUnderTest { type_name, method });
            cmd_check(&source, class_name, target, rules.as_deref())
        }
        Command::Rules { rules } => cmd_rules(rules.as_deref()),
    }
}

fn cmd_init(force: bool) -> Result<i32> {
    let paths = init_workspace(Path::new("."), force)?;
    println!("wrote {}", paths.config_path.display());
    println!("wrote {}", paths.rules_path.display());
    Ok(exit_codes::OK)
}

fn cmd_investigate(bundle_path: &Path, config_path: &Path, out: &Path) -> Result<i32> {
    let config = load_config(config_path)?;
    let raw: Value = read_json(bundle_path)?;
    let bundle = ProblemBundle::from_json(&raw)
        .with_context(|| format!("invalid bundle {}", bundle_path.display()))?;

    let registry = build_registry(&config)?;
    let proposer = CommandProposer::new(
        config.proposer.command.clone(),
        config.proposer.timeout(),
        config.tool_output_limit_bytes,
    )?;
    let session = Session::new(bundle, config.session_limits(), config.steps.clone());
    let session = run_investigation(session, &registry, &proposer, &CancelFlag::new(), |record| {
        let effect = match &record.effect {
            TurnEffect::Recorded { index } => format!("evidence [{index}]"),
            TurnEffect::Sealed => "verdict sealed".to_string(),
        };
        eprintln!("turn {}: {effect} ({})", record.turn, record.status);
    });

    let paths = write_session(out, &session)?;
    eprintln!("session {} written to {}", session.id(), paths.dir.display());
    if let Some(verdict) = session.verdict() {
        println!(
            "{}",
            serde_json::to_string_pretty(verdict).context("serialize verdict")?
        );
    }
    Ok(match session.status() {
        SessionStatus::Terminated => exit_codes::OK,
        SessionStatus::Aborted | SessionStatus::Investigating => exit_codes::ABORTED,
    })
}

fn cmd_repair(request_path: &Path, config_path: &Path, out: &Path) -> Result<i32> {
    let config = load_config(config_path)?;
    let request = RepairRequest::from_json(&read_json(request_path)?)
        .with_context(|| format!("invalid repair request {}", request_path.display()))?;
    let rules = load_configured_rules(&config, config_path)?;
    let proposer = CommandProposer::new(
        config.proposer.command.clone(),
        config.proposer.timeout(),
        config.tool_output_limit_bytes,
    )?;
    let compiler = build_compiler(&config);

    let outcome = run_repair(
        request,
        &RepairConfig {
            rules: &rules,
            proposer: &proposer,
            compiler: compiler.as_ref(),
            iteration_limit: config.repair_iteration_limit,
        },
    )?;

    let paths = write_repair(out, &outcome)?;
    eprintln!(
        "repair {} after {} revision(s); artifacts in {}",
        match outcome.status {
            RepairStatus::Accepted => "accepted",
            RepairStatus::BudgetExhausted => "not converged",
        },
        outcome.final_revision().number,
        paths.dir.display()
    );
    for finding in &outcome.findings {
        eprintln!("- {}", triage::io::prompt::describe_finding(finding));
    }
    print!("{}", outcome.draft().source);
    Ok(match outcome.status {
        RepairStatus::Accepted => exit_codes::OK,
        RepairStatus::BudgetExhausted => exit_codes::NOT_CONVERGED,
    })
}

fn cmd_check(
    source_path: &Path,
    class_name: String,
    target: Option<TargetUnderTest>,
    rules_path: Option<&Path>,
) -> Result<i32> {
    let source = fs::read_to_string(source_path)
        .with_context(|| format!("read {}", source_path.display()))?;
    let rules = load_rules(rules_path)?;
    let draft = HarnessDraft::new(source, class_name);
    let violations = validate_draft(&draft, target.as_ref(), &rules);
    println!(
        "{}",
        serde_json::to_string_pretty(&violations).context("serialize violations")?
    );
    Ok(if violations.is_empty() {
        exit_codes::OK
    } else {
        exit_codes::VIOLATIONS
    })
}

fn cmd_rules(rules_path: Option<&Path>) -> Result<i32> {
    let rules = load_rules(rules_path)?;
    println!("rule set version {}", rules.version);
    for rule in &rules.rules {
        println!(
            "{}\t{}\t{}",
            rule.rule.id,
            rule.rule.kind.category(),
            rule.rule.message
        );
    }
    for rewrite in &rules.rewrites {
        println!("{}\trewrite\t{}", rewrite.id, rewrite.pattern.as_str());
    }
    Ok(exit_codes::OK)
}

fn read_json(path: &Path) -> Result<Value> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))
}

/// Rule files named in the config resolve relative to the config's directory.
fn load_configured_rules(config: &TriageConfig, config_path: &Path) -> Result<CompiledRuleSet> {
    let resolved = config.rules_path.as_ref().map(|path| {
        if path.is_absolute() {
            path.clone()
        } else {
            config_path
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(path)
        }
    });
    load_rules(resolved.as_deref())
}

fn build_registry(config: &TriageConfig) -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new(config.tool_output_limit_bytes)?;
    let backends: [(ToolName, &CommandConfig); 2] = [
        (ToolName::LookupFunction, &config.tools.lookup_function),
        (ToolName::SearchFiles, &config.tools.search_files),
    ];
    for (tool, cfg) in backends {
        if !cfg.is_configured() {
            continue;
        }
        registry.register(
            tool,
            Box::new(CommandToolBackend {
                command: cfg.command.clone(),
                timeout: cfg.timeout(),
                output_limit_bytes: config.tool_output_limit_bytes,
                workdir: None,
            }),
        )?;
    }

    let unreachable = unreachable_steps(&config.steps, |tool| registry.is_registered(tool));
    if !unreachable.is_empty() {
        bail!("invalid steps: {}", unreachable.join("; "));
    }
    Ok(registry)
}

fn build_compiler(config: &TriageConfig) -> Box<dyn Compiler> {
    if config.compiler.command.is_empty() {
        return Box::new(SkipCompiler);
    }
    Box::new(CommandCompiler {
        command: config.compiler.command.clone(),
        timeout: std::time::Duration::from_secs(config.compiler.timeout_secs),
        workdir: config.compiler.workdir.clone(),
        max_diagnostics: config.max_diagnostics,
        output_limit_bytes: config.tool_output_limit_bytes,
    })
}
