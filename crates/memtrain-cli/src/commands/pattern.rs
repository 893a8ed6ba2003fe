//! Signature scan command.

use anyhow::{Context, Result, bail};
use memtrain_core::{RegionFilter, Trainer};

/// Parse `--resolve` as "<disp_offset>,<instr_len>".
fn parse_resolve(text: &str) -> Result<(usize, usize)> {
    let Some((disp, len)) = text.split_once(',') else {
        bail!("expected <disp_offset>,<instr_len>, got '{}'", text);
    };
    let disp = disp.trim().parse().context("invalid displacement offset")?;
    let len = len.trim().parse().context("invalid instruction length")?;
    Ok((disp, len))
}

pub fn run(
    trainer: &Trainer,
    pattern: &str,
    regions: RegionFilter,
    first: bool,
    resolve: Option<&str>,
    json: bool,
) -> Result<()> {
    let resolve = resolve.map(parse_resolve).transpose()?;
    let matches = trainer.scan_pattern(pattern, regions, first)?;

    let mut rows = Vec::with_capacity(matches.len());
    for m in &matches {
        let target = match resolve {
            Some((disp, len)) => Some(trainer.resolve_relative(m.address, disp, len)?),
            None => None,
        };
        rows.push((m.address, target));
    }

    if json {
        let out: Vec<_> = rows
            .iter()
            .map(|(address, target)| {
                serde_json::json!({
                    "address": format!("0x{:X}", address),
                    "target": target.map(|t| format!("0x{:X}", t)),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!("No matches for {} in {} regions", pattern, regions);
        return Ok(());
    }
    println!("{} match(es) for {}:", rows.len(), pattern);
    for (address, target) in rows {
        match target {
            Some(target) => println!("  0x{:X} -> 0x{:X}", address, target),
            None => println!("  0x{:X}", address),
        }
    }
    Ok(())
}
