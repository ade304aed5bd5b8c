//! Simple generation example: build the touch grid and print the run summary.
//! Run with: cargo run --example simple_generation [path/to/netforge.json] [out_dir]

use netforge::prelude::*;
use std::path::Path;

fn main() -> Result<(), NetforgeError> {
    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => GeneratorConfig::load(Path::new(&path))?,
        None => GeneratorConfig::default(),
    };
    let out_dir = args.next().unwrap_or_else(|| "out".to_string());

    let mut options = RunOptions::new(&out_dir, Provenance::current(Path::new(".")));
    options.external = false;
    let outcome = NetforgeCore::generate(&config, &options)?;
    let summary = &outcome.summary;

    println!("Generated {} with {}", summary.title, summary.generator);
    println!(
        "  {} references, {} nets, {} sheets",
        summary.references.len(),
        summary.nets.len(),
        summary.hierarchy.len()
    );
    println!(
        "  findings: {} error(s), {} warning(s), {} info",
        summary.counts.error, summary.counts.warning, summary.counts.info
    );
    for finding in summary.findings.iter().filter(|f| f.severity == Severity::Error) {
        println!("  - [{}] {}", finding.location.sheet, finding.message);
    }
    for path in &outcome.published {
        println!("  wrote {}", path.display());
    }

    if !outcome.accepted() {
        std::process::exit(1);
    }
    Ok(())
}
