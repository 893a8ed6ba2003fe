//! Pointer scan command.

use anyhow::{Context, Result, bail};
use memtrain_core::{Trainer, ValueType};

use super::resolve_address;

pub struct PointerArgs {
    pub target: String,
    pub max_offset: Option<String>,
    pub max_depth: Option<usize>,
    pub limit: usize,
    pub value_type: ValueType,
    pub json: bool,
}

fn parse_offset(text: &str) -> Result<u64> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    if !digits.starts_with(|c: char| c.is_ascii_hexdigit()) {
        bail!("invalid hex offset '{}'", text);
    }
    u64::from_str_radix(digits, 16).with_context(|| format!("invalid hex offset '{}'", text))
}

pub fn run(trainer: &Trainer, args: PointerArgs) -> Result<()> {
    let limits = &trainer.config().pointer;
    let target = resolve_address(trainer, &args.target)?;
    let max_offset = match &args.max_offset {
        Some(text) => parse_offset(text)?,
        None => limits.max_offset,
    };
    let max_depth = args.max_depth.unwrap_or(limits.max_depth);

    println!(
        "Tracing 0x{:X} (max offset 0x{:X}, depth {})...",
        target, max_offset, max_depth
    );
    let chains = trainer.scan_for_pointers(target, max_offset, max_depth, args.value_type)?;
    let shown = &chains[..chains.len().min(args.limit)];

    if args.json {
        println!("{}", serde_json::to_string_pretty(shown)?);
        return Ok(());
    }

    if shown.is_empty() {
        println!("No pointer chains found");
        return Ok(());
    }
    for (i, chain) in shown.iter().enumerate() {
        println!(
            "{:>3}. {} {}",
            i + 1,
            if chain.validated { "[ok]" } else { "[??]" },
            chain
        );
    }
    if chains.len() > shown.len() {
        println!("... {} more", chains.len() - shown.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_offset() {
        assert_eq!(parse_offset("0x1000").unwrap(), 0x1000);
        assert_eq!(parse_offset("FF").unwrap(), 0xFF);
        assert!(parse_offset("zz").is_err());
        assert!(parse_offset("0x0x10").is_err());
        assert!(parse_offset("+10").is_err());
        assert!(parse_offset("0x").is_err());
    }
}
