//! Interactive value scan.

use std::io::{self, BufRead, Write};

use anyhow::{Result, bail};
use memtrain_core::{ScanFilter, Trainer, Value, ValueType};

const HELP: &str = "\
commands:
  next <value>   keep addresses now holding <value>
  changed        keep addresses whose value changed
  unchanged      keep addresses whose value did not change
  inc / dec      keep addresses whose value went up / down
  list [n]       show up to n candidates (default 20)
  first <value>  start over with a new first scan
  reset          drop the current results
  quit";

#[derive(Debug, PartialEq)]
enum ScanCommand {
    Refine(ScanFilter),
    First(Value),
    List(usize),
    Reset,
    Help,
    Quit,
}

fn parse_command(line: &str, value_type: ValueType) -> Result<ScanCommand> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(ScanCommand::Help);
    };
    let arg = words.next();

    let value = |arg: Option<&str>| -> Result<Value> {
        match arg {
            Some(text) => Ok(value_type.parse_value(text)?),
            None => bail!("'{}' needs a value", verb),
        }
    };

    Ok(match verb.to_ascii_lowercase().as_str() {
        "next" | "n" => ScanCommand::Refine(ScanFilter::Exact(value(arg)?)),
        "changed" | "c" => ScanCommand::Refine(ScanFilter::Changed),
        "unchanged" | "u" => ScanCommand::Refine(ScanFilter::Unchanged),
        "inc" | "increased" => ScanCommand::Refine(ScanFilter::Increased),
        "dec" | "decreased" => ScanCommand::Refine(ScanFilter::Decreased),
        "first" => ScanCommand::First(value(arg)?),
        "list" | "l" => ScanCommand::List(match arg {
            Some(n) => n.parse()?,
            None => 20,
        }),
        "reset" => ScanCommand::Reset,
        "help" | "?" => ScanCommand::Help,
        "quit" | "q" | "exit" => ScanCommand::Quit,
        other => bail!("unknown command '{}' (try 'help')", other),
    })
}

fn print_candidates(trainer: &Trainer, limit: usize) {
    let total = trainer.candidate_count();
    for candidate in trainer.candidates(limit) {
        println!("  0x{:X} = {}", candidate.address, candidate.value);
    }
    if total > limit {
        println!("  ... {} more", total - limit);
    }
}

pub fn run(trainer: &Trainer, value_type: ValueType, text: &str) -> Result<()> {
    let value = value_type.parse_value(text)?;
    let count = trainer.first_scan(value)?;
    println!("First scan for {} ({}): {} candidates", value, value_type, count);
    println!("Type 'help' for commands.");

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("scan> ");
        io::stdout().flush().ok();
        let Some(line) = lines.next() else {
            break;
        };

        let command = match parse_command(&line?, value_type) {
            Ok(command) => command,
            Err(e) => {
                eprintln!("{}", e);
                continue;
            }
        };

        let result = match command {
            ScanCommand::Refine(filter) => trainer.refine(filter),
            ScanCommand::First(value) => trainer.first_scan(value),
            ScanCommand::List(limit) => {
                print_candidates(trainer, limit);
                continue;
            }
            ScanCommand::Reset => {
                trainer.reset_scan();
                println!("Results cleared; use 'first <value>' to scan again");
                continue;
            }
            ScanCommand::Help => {
                println!("{}", HELP);
                continue;
            }
            ScanCommand::Quit => break,
        };

        match result {
            Ok(count) => {
                println!("{} candidates", count);
                if count > 0 && count <= 10 {
                    print_candidates(trainer, count);
                }
            }
            Err(e) if e.is_terminal() => return Err(e.into()),
            Err(e) => eprintln!("{}", e),
        }
    }
    Ok(())
}
