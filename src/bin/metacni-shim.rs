use anyhow::Result;
use clap::Parser;
use metacni::commands::run_cni;
use tracing::{error, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Meta-plugin shim that delegates attachment work and manages default
/// gateway routes.
#[derive(Parser)]
#[command(disable_version_flag = true)]
struct Cli {
    /// Show application version
    #[arg(short = 'v', long = "version")]
    version: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.version {
        println!("metacni-shim: {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // Set up tracing; stdout carries the CNI result, so logs go to stderr
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_max_level(Level::INFO)
        .with_writer(std::io::stderr)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);

    // Run the CNI plugin
    if let Err(err) = run_cni() {
        error!("CNI plugin error: {}", err);

        // Output error in CNI format
        let error_msg = format!(
            r#"{{"cniVersion":"1.0.0","code":100,"msg":"{}","details":""}}"#,
            err.to_string().replace("\"", "\\\"")
        );
        eprintln!("{}", error_msg);
        std::process::exit(1);
    }

    Ok(())
}
