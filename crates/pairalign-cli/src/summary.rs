use std::path::Path;

use console::Style;
use pairalign_core::align::AlignMode;
use pairalign_core::batch::{BatchConfig, BatchReport};
use pairalign_core::transform::TransformKind;

struct Styles {
    title: Style,
    label: Style,
    value: Style,
    good: Style,
    bad: Style,
    path: Style,
}

impl Styles {
    fn new() -> Self {
        Self {
            title: Style::new().cyan().bold(),
            label: Style::new().dim(),
            value: Style::new().bold().white(),
            good: Style::new().green(),
            bad: Style::new().red().bold(),
            path: Style::new().underlined(),
        }
    }
}

pub fn print_run_summary(config: &BatchConfig, hr: &Path, lr: &Path, pairs: usize) {
    let s = Styles::new();

    println!();
    println!("  {}", s.title.apply_to("Pairalign"));
    println!("  {}", s.title.apply_to("\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}"));
    println!();
    println!("  {:<14}{}", s.label.apply_to("HR"), s.path.apply_to(hr.display()));
    println!("  {:<14}{}", s.label.apply_to("LR"), s.path.apply_to(lr.display()));
    println!(
        "  {:<14}{}",
        s.label.apply_to("Output"),
        s.path.apply_to(config.output_dir.display())
    );
    println!("  {:<14}{}", s.label.apply_to("Pairs"), s.value.apply_to(pairs));
    println!(
        "  {:<14}{}",
        s.label.apply_to("Scale"),
        s.value.apply_to(config.align.scale)
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Mode"),
        s.value.apply_to(match config.align.mode {
            AlignMode::WarpHr => "0 (LR pixels true)",
            AlignMode::WarpLr => "1 (HR pixels true)",
        })
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Transform"),
        s.value.apply_to(match config.align.kind {
            TransformKind::Affine if config.align.allow_rotation => "affine",
            TransformKind::Affine => "affine (scale + translation only)",
            TransformKind::Projective => "projective",
            TransformKind::NonRigid => "thin-plate spline",
        })
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Threads"),
        s.value.apply_to(config.threads)
    );
    if config.align.autocrop {
        println!(
            "  {:<14}threshold {}",
            s.label.apply_to("Autocrop"),
            s.value.apply_to(config.align.luminance_threshold)
        );
    }
    println!();
}

pub fn print_report(report: &BatchReport, output_dir: &Path) {
    let s = Styles::new();

    println!();
    println!(
        "  {:<14}{}",
        s.label.apply_to("Aligned"),
        s.good.apply_to(report.processed)
    );
    if report.failed.is_empty() {
        println!("  {:<14}{}", s.label.apply_to("Failed"), s.value.apply_to(0));
    } else {
        println!(
            "  {:<14}{}  (see {})",
            s.label.apply_to("Failed"),
            s.bad.apply_to(report.failed.len()),
            s.path
                .apply_to(output_dir.join(pairalign_core::batch::FAILED_LOG).display())
        );
        for base in &report.failed {
            println!("    {}", s.bad.apply_to(base));
        }
    }
    if report.cancelled {
        println!("  {}", s.bad.apply_to("Run interrupted before completion"));
    }
    println!();
}
