//! Offline dataset tooling.
//!
//! Builds filtered extracts from the master dataset, scans it for regions,
//! and regenerates the download catalog.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use tracing_subscriber::EnvFilter;

use geolite::catalog::format_size;
use geolite::models::{parse_feature_classes, parse_feature_codes};
use geolite::store::dataset_metadata;
use geolite::subset::build_subset;
use geolite::{
    AdminLevel, CatalogManager, DatasetLocator, RegionScanner, ScanOptions, StoreConfig,
    SubsetBuilder, SubsetFilter, SubsetOptions,
};

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[derive(Parser, Debug)]
#[command(name = "extract")]
#[command(about = "Build dataset extracts and the download catalog")]
struct Args {
    /// Optional TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Copy a filtered subset of the master dataset into a new file
    Subset {
        /// Output dataset file (replaced if present)
        #[arg(short, long)]
        output: PathBuf,

        /// Read from this file instead of the configured master
        #[arg(long)]
        source: Option<PathBuf>,

        /// ISO country code, e.g. US
        #[arg(long)]
        country: Option<String>,

        #[arg(long)]
        admin1: Option<String>,

        #[arg(long)]
        admin2: Option<String>,

        /// Comma-separated CLASS.CODE list, e.g. H.LK,T.TRL
        #[arg(long)]
        codes: Option<String>,

        /// Comma-separated feature classes, e.g. P,H
        #[arg(long)]
        classes: Option<String>,

        /// Keep at most this many features
        #[arg(long)]
        limit: Option<u64>,

        /// Label recorded in the dataset metadata
        #[arg(long)]
        label: Option<String>,

        /// Skip the alternate_names table
        #[arg(long)]
        no_alternate_names: bool,
    },

    /// List administrative regions of the master dataset
    Regions {
        #[command(flatten)]
        scan: ScanArgs,

        /// Print JSON instead of one line per region
        #[arg(long)]
        json: bool,
    },

    /// Regenerate the dataset catalog from a region scan
    Catalog {
        #[command(flatten)]
        scan: ScanArgs,

        /// Leave the bundled sample dataset out of the catalog
        #[arg(long)]
        no_sample: bool,
    },

    /// Print the metadata of a dataset file (default: the active dataset)
    Metadata {
        dataset: Option<PathBuf>,
    },
}

#[derive(ClapArgs, Debug)]
struct ScanArgs {
    /// Grouping depth: admin1 or admin2
    #[arg(long, default_value = "admin1")]
    level: AdminLevel,

    /// Restrict to one country
    #[arg(long)]
    country: Option<String>,

    /// Drop regions with fewer features
    #[arg(long, default_value = "1")]
    min_count: u64,

    /// Maximum number of regions
    #[arg(long, default_value = "1000")]
    limit: usize,
}

impl ScanArgs {
    fn options(&self) -> ScanOptions {
        ScanOptions {
            level: self.level,
            country: self.country.as_deref().map(str::to_uppercase),
            min_count: self.min_count,
            limit: self.limit,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = StoreConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    let locator = DatasetLocator::new(&config);

    match args.command {
        Command::Subset {
            output,
            source,
            country,
            admin1,
            admin2,
            codes,
            classes,
            limit,
            label,
            no_alternate_names,
        } => {
            let filter = SubsetFilter {
                country: country.map(|c| c.trim().to_uppercase()),
                admin1,
                admin2,
                feature_codes: parse_feature_codes(codes.as_deref().unwrap_or(""))?,
                feature_classes: parse_feature_classes(classes.as_deref().unwrap_or(""))?,
                limit,
            };
            let options = SubsetOptions {
                label,
                alternate_names: !no_alternate_names,
            };

            info!("Building subset: {}", filter.description());
            let pb = spinner(format!("Writing {}", output.display()))?;
            let result = match source {
                Some(source) => build_subset(&source, &output, &filter, &options).await,
                None => SubsetBuilder::new(locator).build(&output, &filter, &options).await,
            };
            let report = match result {
                Ok(report) => report,
                Err(e) => {
                    pb.abandon_with_message("Subset build failed");
                    return Err(e).context("Failed to build subset");
                }
            };
            pb.finish_with_message("Subset complete");

            info!(
                "Wrote {} features and {} alternate names from {} to {} ({})",
                report.features,
                report.alternate_names,
                report.source.display(),
                report.output.display(),
                format_size(report.size_bytes)
            );
        }

        Command::Regions { scan, json } => {
            let pb = spinner(format!("Scanning {} regions", scan.level))?;
            let regions = RegionScanner::new(locator)
                .scan(&scan.options())
                .await
                .context("Region scan failed")?;
            pb.finish_and_clear();

            if json {
                println!("{}", serde_json::to_string_pretty(&regions)?);
            } else {
                for region in &regions {
                    println!(
                        "{:<32} lat {:>9.4}..{:<9.4} lng {:>10.4}..{:<10.4}",
                        region.label(),
                        region.bounds.lat_min,
                        region.bounds.lat_max,
                        region.bounds.lng_min,
                        region.bounds.lng_max
                    );
                }
            }
            info!("{} regions", regions.len());
        }

        Command::Catalog { scan, no_sample } => {
            let manager = CatalogManager::new(&config, locator);
            let pb = spinner(format!("Scanning {} regions", scan.level))?;
            let catalog = manager
                .generate_catalog(&scan.options(), !no_sample)
                .await
                .context("Catalog generation failed")?;
            pb.finish_and_clear();

            info!(
                "Wrote {} entries to {}",
                catalog.len(),
                manager.catalog_path().display()
            );
        }

        Command::Metadata { dataset } => {
            let path = match dataset {
                Some(path) => path,
                None => locator.active()?,
            };
            let metadata = dataset_metadata(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;

            println!("{}", path.display());
            for (key, value) in &metadata {
                println!("  {key} = {value}");
            }
        }
    }

    Ok(())
}

fn spinner(message: String) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    pb.enable_steady_tick(Duration::from_millis(120));
    pb.set_message(message);
    Ok(pb)
}
