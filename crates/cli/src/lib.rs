pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

use commands::counterparties::NewCounterparty;

#[derive(Debug, Parser)]
#[command(
    name = "procura",
    about = "Procura operator CLI",
    long_about = "Manage the counterparty directory, inspect purchase history and dry-run quote requests.",
    after_help = "Examples:\n  procura migrate\n  procura counterparties list --category cement\n  procura quote \"10 bags of cement and 2 m3 of sand\" --urgent"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations")]
    Migrate,
    #[command(about = "Load the sample counterparty directory (idempotent)")]
    Seed,
    #[command(about = "Show effective configuration with source attribution and redaction")]
    Config,
    #[command(subcommand, about = "Manage the counterparty directory")]
    Counterparties(CounterpartyCommand),
    #[command(about = "List recent purchase decisions")]
    History {
        #[arg(long, default_value_t = commands::history::DEFAULT_LIMIT)]
        last: u32,
    },
    #[command(about = "Dry-run a quote request: match, compose and record, without waiting")]
    Quote {
        description: String,
        #[arg(long, help = "Use the urgent deadline")]
        urgent: bool,
    },
    #[command(about = "Dry-run the last purchase again")]
    Repeat {
        #[arg(long, help = "Use the urgent deadline")]
        urgent: bool,
    },
}

#[derive(Debug, Subcommand)]
enum CounterpartyCommand {
    #[command(about = "Add a counterparty")]
    Add {
        #[arg(long)]
        name: String,
        #[arg(long, help = "Contact address on the message channel, e.g. +55 67 99274-0001")]
        address: String,
        #[arg(long, default_value = "local")]
        locality: String,
        #[arg(long = "category", help = "Repeat for several categories")]
        categories: Vec<String>,
    },
    #[command(about = "List active counterparties")]
    List {
        #[arg(long = "category")]
        categories: Vec<String>,
    },
    #[command(about = "Set a counterparty rating (0 to 5)")]
    Rate { id: String, rating: f64 },
    #[command(about = "Stop matching a counterparty")]
    Deactivate { id: String },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Config => commands::config::run(),
        Command::Counterparties(command) => match command {
            CounterpartyCommand::Add { name, address, locality, categories } => {
                commands::counterparties::add(NewCounterparty { name, address, locality, categories })
            }
            CounterpartyCommand::List { categories } => commands::counterparties::list(categories),
            CounterpartyCommand::Rate { id, rating } => commands::counterparties::rate(id, rating),
            CounterpartyCommand::Deactivate { id } => commands::counterparties::deactivate(id),
        },
        Command::History { last } => commands::history::run(last),
        Command::Quote { description, urgent } => commands::quote::run(description, urgent),
        Command::Repeat { urgent } => commands::repeat::run(urgent),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
