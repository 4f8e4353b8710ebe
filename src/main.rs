mod browser;
mod context;
mod dataset;
mod db;
mod geocode;
mod loader;
mod pipeline;
mod scraper;
mod settings;

use std::time::Instant;

use clap::{Parser, Subcommand};
use tracing::warn;

use context::RunContext;
use settings::Settings;

#[derive(Parser)]
#[command(name = "comercios_etl", about = "Cuenta DNI commerce directory ETL")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape every source, geocode missing coordinates, and load the table
    Run {
        /// Keep unresolved coordinates instead of calling the geocoder
        #[arg(long)]
        skip_geocode: bool,
        /// Rows per insert batch (overrides configuration)
        #[arg(long)]
        batch_size: Option<usize>,
        /// Hide progress bars
        #[arg(short, long)]
        quiet: bool,
    },
    /// Show row counts of the loaded table
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let mut settings = Settings::load()?;

    let result = match cli.command {
        Commands::Run {
            skip_geocode,
            batch_size,
            quiet,
        } => {
            if let Some(n) = batch_size {
                settings.batch_size = n;
                settings.validate()?;
            }
            let ctx = RunContext::new(!quiet);
            let cancel = ctx.cancel_token().clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted; stopping at the next checkpoint");
                    cancel.cancel();
                }
            });

            let opts = pipeline::RunOptions { skip_geocode };
            let summary = pipeline::run(&ctx, &settings, &opts).await?;
            for (url, report) in settings.sources.iter().zip(&summary.extracted) {
                println!(
                    "Extracted {} rows from {} in {:.1}s",
                    report.items,
                    url,
                    report.seconds()
                );
            }
            if let Some(g) = summary.geocoding {
                println!(
                    "Geocoded {} of {} addresses ({} not found, {} gave up)",
                    g.resolved, g.attempted, g.not_found, g.exhausted
                );
            }
            println!(
                "Loaded {} rows into {} in {:.1}s (run {})",
                summary.rows,
                settings.table,
                summary.load.seconds(),
                ctx.run_id()
            );
            Ok(())
        }
        Commands::Stats => {
            let conn = db::connect(&settings.db_path)?;
            let s = db::get_stats(&conn, &settings.table, &settings.geocode.coordinate_column)?;
            println!("Rows:                {}", s.rows);
            println!("Without coordinates: {}", s.without_coordinates);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
