//! fieldprod CLI - productivity zoning from multi-year satellite imagery

use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use fieldprod_algorithms::acquisition::growth_season_date;
use fieldprod_algorithms::pipeline::{analyze_field, analyze_stack, AnalysisConfig, FieldAnalysis};
use fieldprod_cloud::{StacArchive, StacCatalog, StacClientOptions};
use fieldprod_colormap::{render_png, Palette};
use fieldprod_core::io::{read_geotiff, write_geotiff};
use fieldprod_core::{FieldBoundary, Raster, RasterStack, RasterYear, YearMeta};

// ─── CLI structure ──────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "fieldprod")]
#[command(author, version, about = "Field productivity zoning from multi-year NDVI", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Flags that override the configuration file.
#[derive(clap::Args, Debug, Default)]
struct Overrides {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Affinity propagation preference
    #[arg(long, allow_hyphen_values = true)]
    preference: Option<f64>,
    /// Outlier removal: both, low-only, high-only, none
    #[arg(long)]
    outliers: Option<String>,
    /// Classify clean statistical outliers too
    #[arg(long)]
    include_excluded: bool,
    /// Persist clustering results in this directory
    #[arg(long)]
    cache_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show information about a raster file
    Info {
        /// Input raster file
        input: PathBuf,
    },
    /// Print the default configuration as TOML
    Config,
    /// Analyse yearly index GeoTIFFs already on disk
    RunLocal {
        /// Yearly index rasters as YEAR=PATH, any order
        #[arg(short, long = "input", required = true, value_name = "YEAR=PATH")]
        inputs: Vec<String>,
        /// Output directory
        #[arg(short, long)]
        output: PathBuf,
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Acquire imagery from a STAC catalog and analyse it
    RunStac {
        /// Field boundary as GeoJSON (Polygon or Feature)
        #[arg(short, long)]
        field: PathBuf,
        /// Catalog: pc, es, or a STAC API URL
        #[arg(long, default_value = "pc")]
        catalog: String,
        /// Seasonal reference date (default: most recent growing season)
        #[arg(short, long)]
        date: Option<NaiveDate>,
        /// Years to acquire
        #[arg(short, long)]
        years: Option<usize>,
        /// Maximum scene cloud cover in percent
        #[arg(long)]
        max_cloud: Option<f64>,
        /// Output directory
        #[arg(short, long)]
        output: PathBuf,
        #[command(flatten)]
        overrides: Overrides,
    },
}

// ─── Configuration ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct RenderConfig {
    palette: Palette,
}

/// The `[render]` section; every other section belongs to the analysis.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RenderSection {
    render: RenderConfig,
}

fn load_config(overrides: &Overrides) -> Result<(AnalysisConfig, RenderConfig)> {
    let (mut analysis, render) = match &overrides.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let analysis = AnalysisConfig::from_toml_str(&text)?;
            let section: RenderSection =
                toml::from_str(&text).context("Invalid [render] section")?;
            (analysis, section.render)
        }
        None => (AnalysisConfig::default(), RenderConfig::default()),
    };

    if let Some(p) = overrides.preference {
        analysis.clustering.preference = p;
    }
    if let Some(mode) = &overrides.outliers {
        analysis.preprocess.outlier_mode = toml::Value::String(mode.to_lowercase().replace('-', "_"))
            .try_into()
            .map_err(|_| anyhow!("Unknown outlier mode: {mode} (both, low-only, high-only, none)"))?;
    }
    if overrides.include_excluded {
        analysis.classification.include_excluded = true;
    }
    if let Some(dir) = &overrides.cache_dir {
        analysis.clustering.cache_dir = Some(dir.clone());
    }
    Ok((analysis, render))
}

// ─── Helpers ────────────────────────────────────────────────────────────

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")
}

fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// `2024=ndvi_2024.tif` -> (2024, "ndvi_2024.tif")
fn parse_year_input(s: &str) -> Result<(i32, PathBuf)> {
    let (year, path) = s
        .split_once('=')
        .ok_or_else(|| anyhow!("Expected YEAR=PATH, got '{s}'"))?;
    let year = year
        .trim()
        .parse()
        .with_context(|| format!("Invalid year in '{s}'"))?;
    if path.trim().is_empty() {
        bail!("Missing path in '{s}'");
    }
    Ok((year, PathBuf::from(path.trim())))
}

fn read_local_stack(inputs: &[String]) -> Result<RasterStack> {
    let mut parsed = inputs
        .iter()
        .map(|s| parse_year_input(s))
        .collect::<Result<Vec<_>>>()?;
    parsed.sort_by(|a, b| b.0.cmp(&a.0));
    if let Some(w) = parsed.windows(2).find(|w| w[0].0 == w[1].0) {
        bail!("Year {} given twice", w[0].0);
    }

    let pb = spinner("Reading rasters...");
    let years = parsed
        .into_iter()
        .map(|(year, path)| {
            let grid: Raster<f64> = read_geotiff(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Ok(RasterYear::new(YearMeta::local(year), grid))
        })
        .collect::<Result<Vec<_>>>()?;
    pb.finish_and_clear();

    Ok(RasterStack::cropped_to_common(years)?)
}

fn read_field(path: &Path) -> Result<FieldBoundary> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&text).context("Field is not valid JSON")?;
    Ok(FieldBoundary::from_geojson(&value)?)
}

fn write_outputs(analysis: &FieldAnalysis, render: &RenderConfig, dir: &Path) -> Result<()> {
    let pb = spinner("Writing outputs...");
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    let maps = [
        (&analysis.class_map, "zones.tif"),
        (&analysis.high_low_map, "high_low.tif"),
        (&analysis.cluster_class_map, "cluster_zones.tif"),
        (&analysis.baseline_class_map, "baseline_zones.tif"),
        (&analysis.baseline_high_low_map, "baseline_high_low.tif"),
    ];
    for (map, name) in maps {
        write_geotiff(map, dir.join(name)).with_context(|| format!("Failed to write {name}"))?;
    }
    let png = render_png(&analysis.class_map, &render.palette)?;
    std::fs::write(dir.join("zones.png"), png).context("Failed to write zones.png")?;
    let json = serde_json::to_string_pretty(&analysis.report)?;
    std::fs::write(dir.join("report.json"), json).context("Failed to write report.json")?;
    pb.finish_and_clear();
    Ok(())
}

fn print_summary(analysis: &FieldAnalysis) {
    let report = &analysis.report;
    let summary = &report.summary;
    let years: Vec<String> = report.years.iter().map(|y| y.year.to_string()).collect();

    println!("Years: {} ({})", summary.n_years, years.join(", "));
    for skipped in &report.skipped_years {
        println!("  skipped {}: {}", skipped.year, skipped.reason);
    }
    println!(
        "Excluded: {} background, {} outliers, {} missing",
        report.exclusions.background, report.exclusions.outliers, report.exclusions.missing
    );
    println!(
        "Threshold: {:.4} ({} clusters, {} iterations{})",
        summary.threshold,
        summary.exemplar_count,
        report.clustering_iterations,
        if summary.clustering_degraded { ", not converged" } else { "" }
    );
    println!("\n  Class   Pixels        %     Acres");
    for c in &summary.classes {
        println!("  {:>5} {:>8} {:>8.2} {:>9.3}", c.class, c.pixels, c.percentage, c.acres);
    }
    println!("\nProfitability score: {}", summary.profitability_score);
    println!(
        "Rule-based baseline: threshold {:.3}, score {}",
        report.baseline.threshold, report.baseline.profitability_score
    );
    for w in &report.warnings {
        println!("warning: {w}");
    }
}

fn done(dir: &Path, elapsed: std::time::Duration) {
    println!("\nOutputs saved to: {}", dir.display());
    println!("  Processing time: {:.2?}", elapsed);
}

// ─── Entry point ────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    match cli.command {
        Commands::Info { input } => {
            let raster: Raster<f64> = read_geotiff(&input).context("Failed to read raster")?;
            let (rows, cols) = raster.shape();
            let gt = raster.transform();
            let stats = raster.statistics();

            println!("File: {}", input.display());
            println!("Dimensions: {} x {} ({} cells)", cols, rows, raster.len());
            println!("Origin: ({:.6}, {:.6})", gt.origin_x, gt.origin_y);
            println!("Cell size: {} x {}", gt.pixel_width, gt.pixel_height.abs());
            if let Some(nodata) = raster.nodata() {
                println!("NoData: {}", nodata);
            }
            println!("\nStatistics:");
            if let (Some(min), Some(max)) = (stats.min, stats.max) {
                println!("  Min: {:.4}", min);
                println!("  Max: {:.4}", max);
            }
            if let Some(mean) = stats.mean {
                println!("  Mean: {:.4}", mean);
            }
            println!(
                "  Valid cells: {} ({:.1}%)",
                stats.valid_count,
                100.0 * stats.valid_count as f64 / raster.len().max(1) as f64
            );
        }

        Commands::Config => {
            print!("{}", AnalysisConfig::default().to_toml_string()?);
            println!("\n[render]");
            let palette: Vec<String> = Palette::default().into();
            println!("palette = {:?}", palette);
        }

        Commands::RunLocal {
            inputs,
            output,
            overrides,
        } => {
            let (config, render) = load_config(&overrides)?;
            let stack = read_local_stack(&inputs)?;
            info!("Stack: {} years, {} x {}", stack.len(), stack.shape().1, stack.shape().0);

            let engine = config.clustering.build_engine()?;
            let start = Instant::now();
            let pb = spinner("Clustering...");
            let analysis = analyze_stack(&stack, &*engine, &config).context("Analysis failed")?;
            pb.finish_and_clear();
            let elapsed = start.elapsed();

            write_outputs(&analysis, &render, &output)?;
            print_summary(&analysis);
            done(&output, elapsed);
        }

        Commands::RunStac {
            field,
            catalog,
            date,
            years,
            max_cloud,
            output,
            overrides,
        } => {
            let (mut config, render) = load_config(&overrides)?;
            if let Some(y) = years {
                config.acquisition.years = y;
            }
            if let Some(cc) = max_cloud {
                config.acquisition.max_cloud_cover = cc;
            }
            let field = read_field(&field)?;
            let base_date = match date {
                Some(d) => d,
                None => growth_season_date(
                    chrono::Local::now().date_naive(),
                    config.acquisition.season_month,
                    config.acquisition.season_day,
                )?,
            };

            let catalog = StacCatalog::from_str_or_url(&catalog);
            info!("Searching {} around {base_date}", catalog.search_url());
            let archive = StacArchive::new(catalog, StacClientOptions::default())?;
            let engine = config.clustering.build_engine()?;

            let start = Instant::now();
            let pb = spinner("Acquiring and analysing...");
            let (_, analysis) = analyze_field(&archive, &field, &*engine, &config, base_date)
                .context("Analysis failed")?;
            pb.finish_and_clear();
            let elapsed = start.elapsed();

            write_outputs(&analysis, &render, &output)?;
            print_summary(&analysis);
            done(&output, elapsed);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldprod_algorithms::temporal::OutlierMode;

    #[test]
    fn test_parse_year_input() {
        let (year, path) = parse_year_input("2023=data/ndvi 2023.tif").unwrap();
        assert_eq!(year, 2023);
        assert_eq!(path, PathBuf::from("data/ndvi 2023.tif"));
        assert!(parse_year_input("ndvi.tif").is_err());
        assert!(parse_year_input("20x3=a.tif").is_err());
        assert!(parse_year_input("2023=").is_err());
    }

    #[test]
    fn test_overrides_apply() {
        let overrides = Overrides {
            preference: Some(-30.0),
            outliers: Some("High-Only".into()),
            include_excluded: true,
            ..Default::default()
        };
        let (config, render) = load_config(&overrides).unwrap();
        assert_eq!(config.clustering.preference, -30.0);
        assert_eq!(config.preprocess.outlier_mode, OutlierMode::HighOnly);
        assert!(config.classification.include_excluded);
        assert_eq!(render.palette, Palette::default());

        let bad = Overrides {
            outliers: Some("sideways".into()),
            ..Default::default()
        };
        assert!(load_config(&bad).is_err());
    }

    #[test]
    fn test_config_file_with_render_section() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fieldprod.toml");
        std::fs::write(
            &path,
            "[acquisition]\nyears = 4\n\n[render]\npalette = [\"#000000\", \"#FFFFFF\"]\n",
        )
        .unwrap();

        let overrides = Overrides {
            config: Some(path),
            ..Default::default()
        };
        let (config, render) = load_config(&overrides).unwrap();
        assert_eq!(config.acquisition.years, 4);
        assert_eq!(render.palette.len(), 2);
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from([
            "fieldprod",
            "run-local",
            "-i",
            "2024=a.tif",
            "-i",
            "2023=b.tif",
            "-o",
            "out",
            "--preference",
            "-20",
        ])
        .unwrap();
        match cli.command {
            Commands::RunLocal { inputs, overrides, .. } => {
                assert_eq!(inputs.len(), 2);
                assert_eq!(overrides.preference, Some(-20.0));
            }
            _ => panic!("expected run-local"),
        }
    }
}
