//! CLI command dispatch
//!
//! Loads the spec configuration for a command and prints the outcome.

use std::sync::Arc;

use colored::Colorize;

use crate::commands::{Commands, SpecArgs};
use crate::common::{logging, Result};
use crate::testing::{CaseOutcome, Engine, EngineConfig, HttpKernel, IterationResult};

/// Dispatch a CLI command
///
/// Returns `Ok(false)` when cases ran but at least one failed.
pub async fn dispatch(command: Commands) -> Result<bool> {
    match command {
        Commands::List { spec } => {
            let engine = load(&spec)?;
            let cases = engine.cases(spec.filter.as_deref(), spec.regex.as_deref())?;

            if cases.is_empty() {
                println!("No test cases match");
                return Ok(true);
            }

            for case in &cases {
                let users = if case.users.is_empty() {
                    String::new()
                } else {
                    format!(" as {}", case.users.join(", "))
                };
                println!(
                    "{} {} {}{}",
                    case.test_id.white().bold(),
                    case.method.cyan(),
                    case.uri,
                    users.dimmed()
                );
            }

            Ok(true)
        }

        Commands::Run {
            spec,
            fail_fast,
            verbose,
        } => {
            let engine = load(&spec)?;
            logging::init(&engine.prefix_config()?.logging)?;

            let cases = engine.cases(spec.filter.as_deref(), spec.regex.as_deref())?;
            let executor = engine.executor(Arc::new(HttpKernel::new()?))?;

            let mut passed = 0usize;
            let mut failed = 0usize;

            for case in &cases {
                println!(
                    "\n{} {}",
                    "Running Test:".blue().bold(),
                    case.test_id.white().bold()
                );

                let outcome = executor.run_case(case).await?;
                print_outcome(&outcome, verbose);

                if outcome.passed() {
                    passed += 1;
                } else {
                    failed += 1;
                    if fail_fast {
                        break;
                    }
                }
            }

            let summary = format!("{} passed, {} failed", passed, failed);
            if failed == 0 {
                println!("\n{} {}\n", "✓".green().bold(), summary.green().bold());
            } else {
                println!("\n{} {}\n", "✗".red().bold(), summary.red().bold());
            }

            Ok(failed == 0)
        }
    }
}

fn load(spec: &SpecArgs) -> Result<Engine> {
    let mut config = EngineConfig::new(spec.prefix.clone())
        .overrides(spec.overrides.clone())
        .schemas(spec.schemas.clone());
    for path in &spec.paths {
        config = config.search_path(path.clone());
    }
    Engine::load(config)
}

fn print_outcome(outcome: &CaseOutcome, verbose: bool) {
    for iteration in &outcome.iterations {
        let actor = iteration
            .identity
            .as_deref()
            .map(|name| format!("as {}", name))
            .unwrap_or_else(|| "anonymous".to_string());

        match &iteration.result {
            IterationResult::Passed => {
                println!("  {} {}", "✓".green(), actor.dimmed());
            }
            IterationResult::Failed(failures) => {
                println!(
                    "  {} {} ({} failure(s))",
                    "✗".red(),
                    actor,
                    failures.len()
                );
                for failure in failures {
                    println!("      {}", failure);
                    if verbose {
                        println!(
                            "        expected: {}\n        actual:   {}",
                            failure.expected.dimmed(),
                            failure.actual.dimmed()
                        );
                    }
                }
            }
            IterationResult::DispatchFailed(error) => {
                println!("  {} {}: {}", "✗".red(), actor, error);
            }
        }
    }
}
