mod summary;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use pairalign_core::align::{AlignConfig, AlignMode};
use pairalign_core::batch::{discover_work, run_batch, BatchConfig};
use pairalign_core::features::{FeatureConfig, FeatureMatcher};
use pairalign_core::transform::{RansacConfig, TransformKind};

#[derive(Parser)]
#[command(name = "pairalign", about = "Align HR/LR image pairs for super-resolution datasets")]
#[command(version)]
struct Cli {
    /// How many times bigger the HR resolution is than the LR resolution
    #[arg(short, long)]
    scale: f64,

    /// 0 warps the HR images and keeps LR pixels true; 1 warps the LR
    /// images and keeps HR pixels true
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(0..=1))]
    mode: u8,

    /// Strip near-black borders before aligning
    #[arg(short = 'c', long)]
    autocrop: bool,

    /// Luminance cutoff for the autocrop (0-255)
    #[arg(short, long, default_value = "50")]
    threshold: u8,

    /// Worker thread count; tune to available memory, not core count
    #[arg(short = 'n', long, default_value = "1")]
    threads: usize,

    /// Keep rotation and shear in the fitted transform
    #[arg(short, long)]
    rotate: bool,

    /// HR input directory, or a single HR file
    #[arg(long, default_value = "HR")]
    hr: PathBuf,

    /// LR input directory, or a single LR file
    #[arg(long, default_value = "LR")]
    lr: PathBuf,

    /// Skip writing blended overlay previews
    #[arg(long)]
    no_overlay: bool,

    /// Fit a full projective transform instead of an affine one
    #[arg(short, long)]
    full: bool,

    /// Score each aligned pair and write AlignmentScore.txt
    #[arg(short = 'e', long)]
    score: bool,

    /// Fit a thin-plate-spline warp, allowing local distortion
    #[arg(short, long)]
    warp: bool,

    /// Manual point picking (not supported in this build)
    #[arg(short = 'u', long)]
    manual: bool,

    /// Tuning config file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output directory
    #[arg(short, long, default_value = "Output")]
    output: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

/// Optional tuning knobs loaded from `--config`.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    #[serde(default)]
    ransac: RansacSection,
    #[serde(default)]
    features: FeatureSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RansacSection {
    max_iterations: Option<usize>,
    inlier_threshold: Option<f64>,
    confidence: Option<f64>,
    seed: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FeatureSection {
    threshold: Option<f32>,
    max_features: Option<usize>,
    descriptor_sigma: Option<f32>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if cli.manual {
        bail!("manual point picking is not supported; use automatic matching");
    }
    if cli.scale <= 0.0 {
        bail!("scale must be positive");
    }

    let file_config = match &cli.config {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            toml::from_str(&contents).context("Invalid tuning config")?
        }
        None => FileConfig::default(),
    };

    let config = build_config(&cli, &file_config);
    let feature_config = build_feature_config(&file_config);

    let items = discover_work(&cli.hr, &cli.lr)
        .with_context(|| format!("Failed to enumerate pairs under {}", cli.hr.display()))?;
    if items.is_empty() {
        bail!("no input pairs found under {}", cli.hr.display());
    }

    summary::print_run_summary(&config, &cli.hr, &cli.lr, items.len());

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = Arc::clone(&cancel);
        ctrlc::set_handler(move || {
            eprintln!("\nInterrupted; letting in-flight pairs finish");
            cancel.store(true, Ordering::SeqCst);
        })
        .context("Failed to install interrupt handler")?;
    }

    let pb = ProgressBar::new(items.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg:24} [{bar:40}] {pos}/{len}")?
            .progress_chars("=> "),
    );

    let finder = FeatureMatcher::new(feature_config);
    let report = run_batch(&items, &config, &finder, &cancel, |item| {
        pb.set_message(format!("{}{}", item.base, item.ext));
        pb.inc(1);
    })?;

    pb.finish_with_message("Done");
    summary::print_report(&report, &config.output_dir);

    if report.cancelled {
        std::process::exit(130);
    }
    Ok(())
}

fn build_config(cli: &Cli, file: &FileConfig) -> BatchConfig {
    // The spline and projective fits are only meaningful with their full
    // degrees of freedom, so they imply rotation.
    let (kind, allow_rotation) = if cli.warp {
        (TransformKind::NonRigid, true)
    } else if cli.full {
        (TransformKind::Projective, true)
    } else {
        (TransformKind::Affine, cli.rotate)
    };

    let ransac_defaults = RansacConfig::default();
    let ransac = RansacConfig {
        max_iterations: file
            .ransac
            .max_iterations
            .unwrap_or(ransac_defaults.max_iterations),
        inlier_threshold: file
            .ransac
            .inlier_threshold
            .unwrap_or(ransac_defaults.inlier_threshold),
        confidence: file.ransac.confidence.unwrap_or(ransac_defaults.confidence),
        seed: file.ransac.seed,
    };

    BatchConfig {
        align: AlignConfig {
            scale: cli.scale,
            mode: if cli.mode == 0 {
                AlignMode::WarpHr
            } else {
                AlignMode::WarpLr
            },
            kind,
            allow_rotation,
            autocrop: cli.autocrop,
            luminance_threshold: cli.threshold,
            overlay: !cli.no_overlay,
            ransac,
        },
        output_dir: cli.output.clone(),
        threads: cli.threads.max(1),
        score: cli.score,
    }
}

fn build_feature_config(file: &FileConfig) -> FeatureConfig {
    let defaults = FeatureConfig::default();
    FeatureConfig {
        threshold: file.features.threshold.unwrap_or(defaults.threshold),
        max_features: file.features.max_features.unwrap_or(defaults.max_features),
        descriptor_sigma: file
            .features
            .descriptor_sigma
            .unwrap_or(defaults.descriptor_sigma),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("pairalign").chain(args.iter().copied()))
    }

    #[test]
    fn warp_overrides_full() {
        let cli = parse(&["-s", "2", "-m", "0", "--warp", "--full"]);
        let config = build_config(&cli, &FileConfig::default());
        assert_eq!(config.align.kind, TransformKind::NonRigid);
        assert!(config.align.allow_rotation);
    }

    #[test]
    fn full_implies_rotation() {
        let cli = parse(&["-s", "2", "-m", "0", "--full"]);
        let config = build_config(&cli, &FileConfig::default());
        assert_eq!(config.align.kind, TransformKind::Projective);
        assert!(config.align.allow_rotation);
    }

    #[test]
    fn defaults_match_flag_table() {
        let cli = parse(&["-s", "4", "-m", "1"]);
        let config = build_config(&cli, &FileConfig::default());
        assert_eq!(config.align.scale, 4.0);
        assert_eq!(config.align.mode, AlignMode::WarpLr);
        assert_eq!(config.align.kind, TransformKind::Affine);
        assert!(!config.align.allow_rotation);
        assert!(!config.align.autocrop);
        assert_eq!(config.align.luminance_threshold, 50);
        assert!(config.align.overlay);
        assert_eq!(config.threads, 1);
        assert_eq!(config.output_dir, PathBuf::from("Output"));
    }

    #[test]
    fn config_file_overrides_tuning() {
        let file: FileConfig = toml::from_str(
            "[ransac]\nmax_iterations = 250\nseed = 7\n\n[features]\nmax_features = 100\n",
        )
        .unwrap();
        let cli = parse(&["-s", "2", "-m", "0"]);
        let config = build_config(&cli, &file);
        assert_eq!(config.align.ransac.max_iterations, 250);
        assert_eq!(config.align.ransac.seed, Some(7));
        let features = build_feature_config(&file);
        assert_eq!(features.max_features, 100);
    }
}
