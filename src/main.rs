use anyhow::{Context, Result};
use arbor::config::OutputPaths;
use arbor::engine::{compare, run_batch};
use arbor::prelude::*;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "arbor")]
#[command(about = "An event-driven, tree-structured portfolio backtesting engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    //run one or more backtests from json configurations
    Run {
        //path to a json configuration, repeat to compare several backtests
        #[arg(long = "config", required = true)]
        configs: Vec<PathBuf>,

        //overrides the initial capital of every configuration
        #[arg(long)]
        initial_capital: Option<f64>,

        //run the backtests one after the other
        #[arg(long)]
        sequential: bool,
    },

    //write a starter configuration
    InitConfig {
        //output path of the configuration
        #[arg(long, default_value = "arbor.json")]
        output: PathBuf,

        //price csv referenced by the configuration
        #[arg(long, default_value = "prices.csv")]
        prices: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            configs,
            initial_capital,
            sequential,
        } => run_backtests(configs, initial_capital, sequential)?,
        Commands::InitConfig { output, prices } => init_config(output, prices)?,
    }

    Ok(())
}

fn init_config(output: PathBuf, prices: PathBuf) -> Result<()> {
    let config = BacktestConfiguration {
        prices_path: prices,
        ..BacktestConfiguration::default()
    };
    config.to_json_file(&output)?;
    println!("Configuration written to {:?}", output);
    Ok(())
}

fn run_backtests(paths: Vec<PathBuf>, initial_capital: Option<f64>, sequential: bool) -> Result<()> {
    println!("Arbor Backtesting Engine");
    println!("========================\n");

    let mut configs = Vec::with_capacity(paths.len());
    for path in &paths {
        let mut config = BacktestConfiguration::from_json_file(path)?;
        if let Some(capital) = initial_capital {
            config.engine.initial_capital = capital;
        }
        println!("Loaded configuration '{}' from {:?}", config.name, path);
        configs.push(config);
    }

    let mut backtests = Vec::with_capacity(configs.len());
    for config in &configs {
        backtests.push(config.build()?);
    }

    println!("Running {} backtest(s)...\n", backtests.len());
    let mut finished = Vec::with_capacity(backtests.len());
    for (config, outcome) in configs.iter().zip(run_batch(backtests, !sequential)) {
        let backtest = outcome.context(format!("Backtest '{}' failed", config.name))?;
        report(&backtest)?;
        save_outputs(&backtest, &config.output)?;
        finished.push(backtest);
    }

    if finished.len() > 1 {
        println!("\nComparison");
        println!("==========\n");
        compare(&finished)?.printstd();
    }

    Ok(())
}

fn report(backtest: &Backtest) -> Result<()> {
    let dates = backtest.dates();
    println!("Backtest '{}'", backtest.name());
    println!("Date range: {} to {}", dates[1], dates[dates.len() - 1]);
    println!("Final value: {:.2}", backtest.values()[dates.len() - 1]);
    if backtest.is_bankrupt() {
        println!("The strategy went bankrupt and was liquidated");
    }
    println!();
    backtest.stats()?.pretty_print_table();
    println!();
    Ok(())
}

fn save_outputs(backtest: &Backtest, output: &OutputPaths) -> Result<()> {
    if let Some(path) = &output.prices_csv {
        write_panel_csv(&backtest.strategy_prices()?, path)?;
        println!("Prices saved to {:?}", path);
    }

    if let Some(path) = &output.weights_csv {
        write_panel_csv(&backtest.weights()?, path)?;
        println!("Weights saved to {:?}", path);
    }

    if let Some(path) = &output.security_weights_csv {
        write_panel_csv(&backtest.security_weights()?, path)?;
        println!("Security weights saved to {:?}", path);
    }

    if let Some(path) = &output.positions_csv {
        write_panel_csv(&backtest.positions()?, path)?;
        println!("Positions saved to {:?}", path);
    }

    if let Some(path) = &output.transactions_csv {
        write_transactions_csv(&backtest.transactions(), path)?;
        println!("Transactions saved to {:?}", path);
    }

    if let Some(path) = &output.equity_csv {
        let dates = backtest.dates();
        let curve = calculate_equity_curve(&dates[1..], &backtest.prices()[1..]);
        save_equity_csv(&curve, path)?;
        println!("Equity curve saved to {:?}", path);
    }

    if let Some(path) = &output.stats_json {
        let json = serde_json::to_string_pretty(&backtest.stats()?)?;
        std::fs::write(path, json).context(format!("Failed to write stats to {:?}", path))?;
        println!("Stats saved to {:?}", path);
    }

    Ok(())
}

fn save_equity_csv(curve: &[EquityPoint], path: &PathBuf) -> Result<()> {
    let mut writer =
        csv::Writer::from_path(path).context(format!("Failed to create CSV file: {:?}", path))?;
    for point in curve {
        writer.serialize(point)?;
    }
    writer.flush()?;
    Ok(())
}
