//! distronode-test - run distronode-backed infrastructure tests
//!
//! Standalone runner around the plugin: lists parametrized items, runs
//! molecule scenarios and exposes the host fixtures from the shell.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;

use distronode_test::cli::{Cli, Commands};
use distronode_test::config::Overrides;
use distronode_test::error::{Error, ExitCode};
use distronode_test::fixtures::Fixtures;
use distronode_test::logging::init_logging;
use distronode_test::molecule;
use distronode_test::plugin::{ParamValue, Plugin, TestRequest};

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbosity(), cli.log_format);

    let code = match run(&cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("ERROR: {:#}", err);
            exit_code_for(&err)
        }
    };

    std::process::exit(code.code());
}

fn exit_code_for(err: &anyhow::Error) -> ExitCode {
    err.downcast_ref::<Error>()
        .map_or(ExitCode::InternalError, Error::exit_code)
}

fn run(cli: &Cli) -> Result<ExitCode> {
    let plugin = Plugin::configure(cli.plugin.clone(), cli.verbosity(), &cli.rootdir)?;

    match &cli.command {
        Commands::Collect { fixtures } => collect(&plugin, fixtures),
        Commands::Run { keyword } => run_scenarios(&plugin, keyword.as_deref()),
        Commands::Hosts => list_hosts(&plugin),
        Commands::Adhoc { module, args } => adhoc(&plugin, module, args),
        Commands::Facts => facts(&plugin),
    }
}

fn collect(plugin: &Plugin, fixtures: &[String]) -> Result<ExitCode> {
    let generated = plugin.generate_tests(fixtures)?;

    let mut count = 0;
    for parametrization in &generated {
        for id in &parametrization.ids {
            println!("{}[{}]", parametrization.fixture, id);
            count += 1;
        }
    }

    if count == 0 {
        eprintln!("no tests collected");
        return Ok(ExitCode::NoTestsCollected);
    }
    println!("\n{} items collected", count);
    Ok(ExitCode::Ok)
}

fn run_scenarios(plugin: &Plugin, keyword: Option<&str>) -> Result<ExitCode> {
    println!("{}", plugin.report_header());
    if plugin.verbosity() > 0 {
        let version = distronode_test::version::detected().map(ToString::to_string);
        for (key, value) in molecule::report_metadata(version.as_deref()) {
            println!("{}: {}", key, value);
        }
    }

    let items: Vec<_> = plugin
        .scenario_items()?
        .into_iter()
        .filter(|item| keyword.map_or(true, |k| item.test_id.contains(k)))
        .collect();
    if items.is_empty() {
        eprintln!("no scenarios collected");
        return Ok(ExitCode::NoTestsCollected);
    }

    let config = plugin.run_config()?;
    let stdout = std::io::stdout();
    let mut failures = 0;

    for item in &items {
        let mut out = stdout.lock();
        writeln!(out, "==> {}", item)?;
        let outcome = item.run(&config, &mut out);
        writeln!(out, "{} {}", item, outcome)?;
        if outcome.is_failure() {
            failures += 1;
        }
    }

    println!("\n{} scenarios, {} failed", items.len(), failures);
    Ok(if failures > 0 {
        ExitCode::TestsFailed
    } else {
        ExitCode::Ok
    })
}

fn list_hosts(plugin: &Plugin) -> Result<ExitCode> {
    let generated = plugin.generate_tests(&["distronode_host".to_string()])?;
    for parametrization in generated {
        for value in parametrization.values {
            if let ParamValue::Host(dispatcher) = value {
                println!("{}", dispatcher.pattern());
            }
        }
    }
    Ok(ExitCode::Ok)
}

fn adhoc(plugin: &Plugin, module: &str, args: &[String]) -> Result<ExitCode> {
    plugin.assert_required_parameters()?;
    let fixtures = Fixtures::new(plugin, TestRequest::new("adhoc").with_fixtures(["distronode_module"]));

    let result = fixtures.module()?.invoke(module, args.join(" "))?;
    let mut report = Overrides::new();
    for (host, outcome) in result.iter() {
        report.insert(host.to_string(), serde_json::to_value(outcome.result())?);
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Unable to render module results")?
    );

    Ok(if result.is_success() {
        ExitCode::Ok
    } else {
        ExitCode::TestsFailed
    })
}

fn facts(plugin: &Plugin) -> Result<ExitCode> {
    plugin.assert_required_parameters()?;
    let fixtures = Fixtures::new(plugin, TestRequest::new("facts").with_fixtures(["distronode_facts"]));

    let result = fixtures.facts()?;
    println!(
        "{}",
        serde_json::to_string_pretty(&result.facts()).context("Unable to render facts")?
    );
    Ok(ExitCode::Ok)
}
