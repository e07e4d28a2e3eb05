use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use factory_core::{
    CancelToken, FactoryConfig, FactoryError, Orchestrator, Phase, PipelineResult, PipelineState,
    StateStore,
};
use factory_registry::RegistryStore;
use factory_runner::{resolve, CheckRunner, ProcessCheckRunner, Selector};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

const EXIT_OK: i32 = 0;
const EXIT_FAILED: i32 = 1;
const EXIT_USAGE: i32 = 2;

fn cli() -> Command {
    Command::new("factory")
        .version(factory_core::VERSION)
        .about("Gated feature pipeline with a baseline/new check registry")
        .arg(
            Arg::new("debug")
                .long("debug")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Verbose logging and decision-log echo"),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("run")
                .about("Run the whole pipeline from a human spec")
                .arg(
                    Arg::new("spec")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Path to the human spec"),
                ),
        )
        .subcommand(Command::new("resume").about("Continue the persisted run"))
        .subcommand(
            Command::new("run-phase")
                .about("Execute one phase against a context document")
                .arg(Arg::new("phase").required(true).help("Phase name, e.g. author-tests"))
                .arg(
                    Arg::new("context")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("JSON context: artifacts, strategy, spec_ref, decisions"),
                ),
        )
        .subcommand(Command::new("status").about("Show the persisted run state"))
        .subcommand(
            Command::new("check")
                .about("Run registry checks")
                .arg(
                    Arg::new("selection")
                        .required(true)
                        .num_args(1..)
                        .help("BASELINE, NEW, ALL, or check ids (optionally <category>:<id>)"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
}

fn init_tracing(debug: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();
    let debug = matches.get_flag("debug");
    init_tracing(debug);

    let code = match dispatch(&matches, debug).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            EXIT_FAILED
        }
    };
    std::process::exit(code);
}

async fn dispatch(matches: &ArgMatches, debug: bool) -> anyhow::Result<i32> {
    let root = std::env::current_dir().context("cannot determine working directory")?;
    let config = match FactoryConfig::load(&root) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return Ok(EXIT_FAILED);
        }
    };

    match matches.subcommand() {
        Some(("run", args)) => {
            let Some(spec) = args.get_one::<PathBuf>("spec") else {
                return Ok(EXIT_USAGE);
            };
            let orchestrator = orchestrator(&root, config);
            let result = orchestrator.run(spec).await;
            Ok(report(&orchestrator, result, debug))
        }
        Some(("resume", _)) => {
            let orchestrator = orchestrator(&root, config);
            let result = orchestrator.resume().await;
            Ok(report(&orchestrator, result, debug))
        }
        Some(("run-phase", args)) => {
            let (Some(name), Some(context)) = (
                args.get_one::<String>("phase"),
                args.get_one::<PathBuf>("context"),
            ) else {
                return Ok(EXIT_USAGE);
            };
            let phase: Phase = match name.parse() {
                Ok(phase) => phase,
                Err(e) => {
                    eprintln!("error: {e}");
                    return Ok(EXIT_USAGE);
                }
            };
            let orchestrator = orchestrator(&root, config);
            match orchestrator.run_phase(phase, context).await {
                Ok(phase_report) => {
                    println!("{}", serde_json::to_string_pretty(&phase_report)?);
                    let blocked = phase_report.gate.as_ref().is_some_and(|g| !g.passed());
                    if let Some(gate) = phase_report.gate.as_ref().filter(|_| blocked) {
                        eprint!("{}", gate.render_report());
                    }
                    Ok(if blocked { EXIT_FAILED } else { EXIT_OK })
                }
                Err(e) => {
                    eprintln!("error in phase {phase}: {e}");
                    Ok(EXIT_FAILED)
                }
            }
        }
        Some(("status", _)) => {
            let store = StateStore::new(FactoryConfig::resolve(&root, &config.paths.state));
            match store.load() {
                Ok(state) => {
                    print_status(&root, &state, debug);
                    Ok(EXIT_OK)
                }
                Err(FactoryError::Configuration(msg)) if !store.exists() => {
                    println!("{msg}");
                    Ok(EXIT_FAILED)
                }
                Err(e) => {
                    eprintln!("error: {e}");
                    Ok(EXIT_FAILED)
                }
            }
        }
        Some(("check", args)) => {
            let selectors: Vec<Selector> = args
                .get_many::<String>("selection")
                .into_iter()
                .flatten()
                .map(|s| Selector::parse(s))
                .collect();
            run_checks(&root, &config, &selectors, args.get_flag("json")).await
        }
        _ => Ok(EXIT_USAGE),
    }
}

fn orchestrator(root: &Path, config: FactoryConfig) -> Orchestrator {
    let cancel = CancelToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping at the next phase boundary");
            on_signal.cancel();
        }
    });
    Orchestrator::from_config(root, config).with_cancel(cancel)
}

fn report(
    orchestrator: &Orchestrator,
    result: Result<PipelineResult, FactoryError>,
    debug: bool,
) -> i32 {
    let state = orchestrator.state_store().load().ok();

    match result {
        Ok(PipelineResult::Completed {
            run_id,
            strategy,
            promoted,
        }) => {
            println!("FACTORY RUN COMPLETED");
            println!("  run:      {run_id}");
            if let Some(strategy) = strategy {
                println!("  strategy: {strategy}");
            }
            println!("  promoted: {promoted} checks");
            if let Some(state) = &state {
                println!("\nArtifacts ({}):", state.artifacts.len());
                for (name, path) in state.artifacts.iter() {
                    println!("  - {name}: {}", path.display());
                }
                print_decisions(state, debug);
            }
            EXIT_OK
        }
        Ok(PipelineResult::Blocked { phase, gate, .. }) => {
            println!("FACTORY RUN BLOCKED at phase {phase}\n");
            print!("{}", gate.render_report());
            if let Some(state) = &state {
                print_decisions(state, debug);
            }
            EXIT_FAILED
        }
        Ok(PipelineResult::Cancelled { phase, .. }) => {
            println!("Cancelled before {phase}; run `factory resume` to continue");
            EXIT_FAILED
        }
        Err(e) => {
            let phase = state
                .as_ref()
                .map_or_else(|| "unknown".to_string(), |s| s.current_phase.to_string());
            eprintln!("FACTORY RUN FAILED in phase {phase}: {e}");
            EXIT_FAILED
        }
    }
}

fn print_decisions(state: &PipelineState, debug: bool) {
    println!("\nDecisions made: {}", state.decisions.len());
    if debug {
        for (i, decision) in state.decisions.iter().enumerate() {
            println!("\n  {}. Phase: {}", i + 1, decision.phase);
            println!("     Decision: {}", decision.decision);
            println!("     Details: {}", decision.details);
        }
    }
}

fn print_status(root: &Path, state: &PipelineState, debug: bool) {
    println!("FACTORY STATE");
    println!("  run:           {}", state.run_id);
    println!("  current phase: {}", state.current_phase);
    println!(
        "  strategy:      {}",
        state
            .strategy
            .map_or_else(|| "undecided".to_string(), |s| s.to_string())
    );
    println!("  spec:          {}", state.spec_ref.display());
    println!("  updated:       {}", state.updated_at.to_rfc3339());

    if !state.artifacts.is_empty() {
        println!("\nArtifacts ({}):", state.artifacts.len());
        for (name, path) in state.artifacts.iter() {
            let mark = if FactoryConfig::resolve(root, path).exists() {
                "✓"
            } else {
                "✗"
            };
            println!("  {mark} {name}: {}", path.display());
        }
    }
    print_decisions(state, debug);
}

async fn run_checks(
    root: &Path,
    config: &FactoryConfig,
    selectors: &[Selector],
    json: bool,
) -> anyhow::Result<i32> {
    let registry = RegistryStore::new(FactoryConfig::resolve(root, &config.paths.registry));
    let registry = match registry.load() {
        Ok(registry) => registry,
        Err(e) => {
            eprintln!("error: {e}");
            return Ok(EXIT_FAILED);
        }
    };
    let selection = match resolve(selectors, &registry) {
        Ok(selection) => selection,
        Err(e) => {
            eprintln!("error: {e}");
            return Ok(EXIT_USAGE);
        }
    };

    let runner = ProcessCheckRunner::new(config.runner_config(), root);
    let summary = match runner.run(&selection).await {
        Ok(summary) => summary,
        Err(e) => {
            eprintln!("error: {e}");
            return Ok(EXIT_FAILED);
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&summary.report())?);
    } else {
        print!("{}", summary.render_human());
    }
    Ok(if summary.failed == 0 { EXIT_OK } else { EXIT_FAILED })
}
