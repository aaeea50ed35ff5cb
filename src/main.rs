use anyhow::Result;
use clap::Parser;
use demorar::{
    cli::{Cli, OutputFormat},
    registry::SignatureRegistry,
    report::Reporter,
    scanner,
};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Print the builtin signature catalog
fn print_signature_catalog(registry: &SignatureRegistry) {
    println!("{:<26} {:<14} recommendation", "id", "severity");
    println!("{}", "─".repeat(72));
    for signature in registry.all() {
        println!(
            "{:<26} {:<14} {}",
            signature.id,
            signature.severity.to_string(),
            signature.recommendation
        );
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let registry = SignatureRegistry::builtin();
    if cli.list_signatures {
        print_signature_catalog(&registry);
        return Ok(());
    }

    if cli.paths.is_empty() {
        eprintln!("demorar: no input paths (try --help)");
        std::process::exit(2);
    }

    let reporter = Reporter::new();
    let scanned = scanner::scan_files(&cli.paths, &registry, &reporter);
    tracing::debug!(scanned, "scan complete");

    let report = reporter.flush();
    match cli.format {
        OutputFormat::Json => println!("{}", report.to_json()?),
        OutputFormat::Text => print!("{}", report.render_text()),
    }

    if report.exit_failure() {
        std::process::exit(1);
    }
    Ok(())
}
