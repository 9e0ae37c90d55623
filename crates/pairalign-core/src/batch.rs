//! Batch orchestration: work discovery, bounded parallel execution,
//! per-item failure isolation, and deterministic report files.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use rayon::prelude::*;
use tracing::{info, warn};

use crate::align::{align_pair, AlignConfig};
use crate::error::{PairalignError, Result};
use crate::features::CorrespondenceFinder;
use crate::io::image_io::{load_color_image, save_color_png};
use crate::score::align_score;

pub const FAILED_LOG: &str = "Failed.txt";
pub const SCORE_LOG: &str = "AlignmentScore.txt";

/// One HR/LR pair to process.
#[derive(Clone, Debug)]
pub struct WorkItem {
    pub hr_path: PathBuf,
    pub lr_path: PathBuf,
    /// File stem shared by both outputs.
    pub base: String,
    /// Original extension, kept only for failure reporting.
    pub ext: String,
}

/// Batch-level settings on top of the per-pair alignment config.
#[derive(Clone, Debug)]
pub struct BatchConfig {
    pub align: AlignConfig,
    pub output_dir: PathBuf,
    /// Worker count. Workers are memory-bound on large images, so this
    /// should be tuned to available RAM rather than core count.
    pub threads: usize,
    /// Score each aligned pair and write the score log.
    pub score: bool,
}

/// Outcome summary of a batch run.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub processed: usize,
    pub failed: Vec<String>,
    pub cancelled: bool,
}

/// Enumerate work items.
///
/// When `hr` is a single file it forms one item together with `lr`;
/// otherwise every file in the HR directory is paired with the same
/// base name under the LR directory.
pub fn discover_work(hr: &Path, lr: &Path) -> Result<Vec<WorkItem>> {
    if hr.is_file() {
        let base = stem_of(hr);
        let ext = ext_of(hr);
        return Ok(vec![WorkItem {
            hr_path: hr.to_path_buf(),
            lr_path: lr.to_path_buf(),
            base,
            ext,
        }]);
    }

    let mut items = Vec::new();
    for entry in fs::read_dir(hr)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let base = stem_of(&path);
        let ext = ext_of(&path);
        let lr_path = lr.join(format!("{base}{ext}"));
        items.push(WorkItem {
            hr_path: path,
            lr_path,
            base,
            ext,
        });
    }
    // Stable order so progress reporting is reproducible across runs.
    items.sort_by(|a, b| a.base.cmp(&b.base));
    Ok(items)
}

fn stem_of(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn ext_of(path: &Path) -> String {
    path.extension()
        .map(|s| format!(".{}", s.to_string_lossy()))
        .unwrap_or_default()
}

/// Create the output directory tree.
pub fn prepare_output_dirs(output: &Path, overlay: bool) -> Result<()> {
    fs::create_dir_all(output.join("HR"))?;
    fs::create_dir_all(output.join("LR"))?;
    if overlay {
        fs::create_dir_all(output.join("Overlay"))?;
    }
    Ok(())
}

/// Serialized append-then-sort log files. Lines are appended as items
/// finish, in whatever order the workers produce them; finalization
/// rewrites each file sorted, so the on-disk order is deterministic.
struct BatchLogs {
    failed_path: PathBuf,
    score_path: PathBuf,
    lock: Mutex<()>,
}

impl BatchLogs {
    fn new(output: &Path) -> Self {
        Self {
            failed_path: output.join(FAILED_LOG),
            score_path: output.join(SCORE_LOG),
            lock: Mutex::new(()),
        }
    }

    fn append(&self, path: &Path, line: &str) -> Result<()> {
        let _guard = self.lock.lock().map_err(|_| {
            PairalignError::Pipeline("log mutex poisoned by a panicked worker".into())
        })?;
        let mut file = fs::OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    fn record_failure(&self, item: &WorkItem) -> Result<()> {
        self.append(&self.failed_path, &format!("{}{}", item.base, item.ext))
    }

    fn record_score(&self, item: &WorkItem, score: f64) -> Result<()> {
        self.append(&self.score_path, &format!("{}   {}", item.base, score))
    }

    fn finalize(&self) -> Result<()> {
        sort_log(&self.failed_path)?;
        sort_log(&self.score_path)?;
        Ok(())
    }
}

fn sort_log(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    let contents = fs::read_to_string(path)?;
    let mut lines: Vec<&str> = contents.lines().collect();
    lines.sort_unstable();
    let mut sorted = lines.join("\n");
    if !sorted.is_empty() {
        sorted.push('\n');
    }
    fs::write(path, sorted)?;
    Ok(())
}

/// Run a batch to completion.
///
/// Per-item failures are isolated: the item is logged and the batch moves
/// on. Setting `cancel` stops new items from starting; items already in
/// flight finish normally so no partially written output is left behind.
/// The log files are sorted on the way out regardless of how the run ends.
pub fn run_batch<P>(
    items: &[WorkItem],
    config: &BatchConfig,
    finder: &dyn CorrespondenceFinder,
    cancel: &AtomicBool,
    progress: P,
) -> Result<BatchReport>
where
    P: Fn(&WorkItem) + Sync,
{
    prepare_output_dirs(&config.output_dir, config.align.overlay)?;
    let logs = BatchLogs::new(&config.output_dir);
    let failures: Mutex<Vec<String>> = Mutex::new(Vec::new());
    let processed = std::sync::atomic::AtomicUsize::new(0);

    let run_item = |item: &WorkItem| {
        if cancel.load(Ordering::SeqCst) {
            return;
        }
        progress(item);
        match process_item(item, config, finder, &logs) {
            Ok(()) => {
                processed.fetch_add(1, Ordering::SeqCst);
            }
            Err(err) => {
                warn!(base = %item.base, error = %err, "pair failed");
                if let Err(log_err) = logs.record_failure(item) {
                    warn!(error = %log_err, "could not write failure log");
                }
                if let Ok(mut list) = failures.lock() {
                    list.push(format!("{}{}", item.base, item.ext));
                }
            }
        }
    };

    if config.threads > 1 {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .build()
            .map_err(|e| PairalignError::Pipeline(format!("worker pool: {e}")))?;
        pool.install(|| items.par_iter().for_each(run_item));
    } else {
        for item in items {
            run_item(item);
        }
    }

    logs.finalize()?;

    let mut failed = failures
        .into_inner()
        .map_err(|_| PairalignError::Pipeline("failure list mutex poisoned".into()))?;
    failed.sort_unstable();

    let report = BatchReport {
        processed: processed.into_inner(),
        failed,
        cancelled: cancel.load(Ordering::SeqCst),
    };
    info!(
        processed = report.processed,
        failed = report.failed.len(),
        "batch finished"
    );
    Ok(report)
}

fn process_item(
    item: &WorkItem,
    config: &BatchConfig,
    finder: &dyn CorrespondenceFinder,
    logs: &BatchLogs,
) -> Result<()> {
    let hr = load_color_image(&item.hr_path)?;
    let lr = load_color_image(&item.lr_path)?;

    let aligned = align_pair(&hr, &lr, &config.align, finder)?;

    save_color_png(
        &aligned.hr,
        &config.output_dir.join("HR").join(format!("{}.png", item.base)),
    )?;
    save_color_png(
        &aligned.lr,
        &config.output_dir.join("LR").join(format!("{}.png", item.base)),
    )?;
    if let Some(overlay) = &aligned.overlay {
        save_color_png(
            overlay,
            &config
                .output_dir
                .join("Overlay")
                .join(format!("{}.png", item.base)),
        )?;
    }

    if config.score {
        // Scoring is advisory; a pair that aligns but cannot be scored is
        // reported as 0 rather than failed.
        let score = align_score(&aligned.lr, &aligned.hr, finder, config.align.ransac.seed)
            .unwrap_or(0.0);
        logs.record_score(item, score)?;
    }

    Ok(())
}
