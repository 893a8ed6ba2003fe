use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use memtrain_core::{RegionFilter, Trainer, TrainerConfig, ValueType};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

mod commands;
mod input;

#[derive(Parser)]
#[command(name = "memtrain", version)]
#[command(about = "Scan, trace and freeze values in another process's memory")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for cheat tables (overrides the config file)
    #[arg(long, global = true, env = "MEMTRAIN_TABLES")]
    tables: Option<PathBuf>,

    /// Target process id
    #[arg(long, global = true, conflicts_with = "name")]
    pid: Option<u32>,

    /// Target process executable name
    #[arg(long, global = true)]
    name: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Search for a value, then narrow the results interactively
    Scan {
        /// Value type (i8..i64, u8..u64, f32, f64)
        #[arg(short = 't', long = "type", default_value = "i32")]
        value_type: ValueType,

        /// Value to search for
        value: String,
    },

    /// Find pointer chains that lead to an address
    Pointers {
        /// Address to trace (hex, or module+offset)
        #[arg(long)]
        target: String,

        /// Largest offset per level (hex)
        #[arg(long)]
        max_offset: Option<String>,

        /// Deepest chain to consider
        #[arg(long)]
        max_depth: Option<usize>,

        /// Chains to print
        #[arg(long, default_value_t = 20)]
        limit: usize,

        /// Value type recorded on the chains
        #[arg(short = 't', long = "type", default_value = "i32")]
        value_type: ValueType,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Search for a byte signature such as "48 8B ?? 24"
    Pattern {
        pattern: String,

        /// Regions to search: exec, read or write
        #[arg(long, default_value = "exec")]
        regions: RegionFilter,

        /// Stop at the first match
        #[arg(long)]
        first: bool,

        /// Resolve a RIP-relative operand: "<disp_offset>,<instr_len>"
        #[arg(long)]
        resolve: Option<String>,

        /// Print JSON instead of a list
        #[arg(long)]
        json: bool,
    },

    /// Read one value
    Read {
        /// Address (hex, or module+offset)
        address: String,

        #[arg(short = 't', long = "type", default_value = "i32")]
        value_type: ValueType,
    },

    /// Write one value
    Write {
        /// Address (hex, or module+offset)
        address: String,

        value: String,

        #[arg(short = 't', long = "type", default_value = "i32")]
        value_type: ValueType,
    },

    /// Manage saved cheat tables
    Table {
        #[command(subcommand)]
        action: TableAction,
    },

    /// Freeze entries of a saved table until Ctrl+C, Esc or q
    Freeze {
        /// Table to load
        #[arg(long)]
        game: String,

        /// Entries to freeze (default: all)
        #[arg(long = "entry")]
        entries: Vec<String>,
    },
}

#[derive(Subcommand)]
enum TableAction {
    /// List saved tables
    List,
    /// Print the entries of a table
    Show { game: String },
    /// Delete a saved table
    Delete { game: String },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("memtrain=info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Command::Table { action } => {
            let trainer = Trainer::new(config);
            match action {
                TableAction::List => commands::table::list(&trainer),
                TableAction::Show { game } => commands::table::show(&trainer, &game),
                TableAction::Delete { game } => commands::table::delete(&trainer, &game),
            }
        }
        command => {
            let trainer = Trainer::new(config);
            attach(&trainer, cli.pid, cli.name.as_deref())?;
            let result = run_attached(&trainer, command);
            trainer.detach();
            result
        }
    }
}

fn run_attached(trainer: &Trainer, command: Command) -> Result<()> {
    match command {
        Command::Scan { value_type, value } => commands::scan::run(trainer, value_type, &value),
        Command::Pointers {
            target,
            max_offset,
            max_depth,
            limit,
            value_type,
            json,
        } => commands::pointers::run(
            trainer,
            commands::pointers::PointerArgs {
                target,
                max_offset,
                max_depth,
                limit,
                value_type,
                json,
            },
        ),
        Command::Pattern {
            pattern,
            regions,
            first,
            resolve,
            json,
        } => commands::pattern::run(trainer, &pattern, regions, first, resolve.as_deref(), json),
        Command::Read {
            address,
            value_type,
        } => commands::memory::read(trainer, &address, value_type),
        Command::Write {
            address,
            value,
            value_type,
        } => commands::memory::write(trainer, &address, &value, value_type),
        Command::Freeze { game, entries } => commands::freeze::run(trainer, &game, &entries),
        Command::Table { .. } => bail!("table commands do not take a process"),
    }
}

fn load_config(cli: &Cli) -> Result<TrainerConfig> {
    let mut config = match &cli.config {
        Some(path) => TrainerConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => TrainerConfig::default(),
    };
    if let Some(tables) = &cli.tables {
        config.tables_dir = tables.clone();
    }
    debug!("Config: {:?}", config);
    Ok(config)
}

fn attach(trainer: &Trainer, pid: Option<u32>, name: Option<&str>) -> Result<()> {
    match (pid, name) {
        (Some(pid), _) => trainer.attach(pid)?,
        (None, Some(name)) => {
            let pid = trainer.attach_by_name(name)?;
            info!("Found '{}' (PID: {})", name, pid);
        }
        (None, None) => bail!("No target process. Use --pid or --name"),
    }
    Ok(())
}
