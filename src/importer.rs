use std::path::Path;

use chrono::{DateTime, Utc};

use crate::{
    copy_file::{copy_file, destination_for, CopyLimits, CopyOutcome},
    error::{CopyError, ImportError},
    scanner::ImportCandidate,
    watermark::{format_stored, Watermark, WatermarkStore},
};

#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    pub dry_run: bool,
    pub limits: CopyLimits,
}

/// Outcome of one scenario run.
#[derive(Debug, Default)]
pub struct ImportResult {
    pub scenario: String,
    pub copied: usize,
    /// Destination already had a file with that name.
    pub skipped: usize,
    pub failed: usize,
    pub bytes: u64,
    pub failures: Vec<ImportError>,
    /// Files the extension filter dropped.
    pub filtered: usize,
    pub cancelled: bool,
    pub dry_run: bool,
    /// Set only when the stored watermark actually moved.
    pub new_watermark: Option<Watermark>,
    /// The copies went through but the watermark could not be stored.
    pub save_error: Option<ImportError>,
}

impl ImportResult {
    /// Whether every file made it.
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && !self.cancelled
    }

    pub fn is_success(&self) -> bool {
        self.is_clean() && self.save_error.is_none()
    }
}

/// Min/max timestamps of what was copied in this run.
#[derive(Debug, Default)]
struct CopiedWindow(Option<(DateTime<Utc>, DateTime<Utc>)>);

impl CopiedWindow {
    fn add(&mut self, t: DateTime<Utc>) {
        self.0 = Some(match self.0 {
            Some((oldest, newest)) => (oldest.min(t), newest.max(t)),
            None => (t, t),
        });
    }

    /// The watermark after this run; never behind `prior`.
    fn advance(&self, prior: Option<&Watermark>) -> Option<Watermark> {
        let (oldest, newest) = self.0?;
        let newest = match prior {
            Some(prior) => newest.max(prior.newest),
            None => newest,
        };
        Some(Watermark::new(oldest, newest))
    }
}

/// Copies candidates and moves the watermark once a batch went through cleanly.
pub struct ImportExecutor<'a> {
    store: &'a mut dyn WatermarkStore,
    options: ImportOptions,
}

impl<'a> ImportExecutor<'a> {
    pub fn new(store: &'a mut dyn WatermarkStore, options: ImportOptions) -> Self {
        ImportExecutor { store, options }
    }

    /// Runs one batch.
    ///
    /// Every candidate is attempted; per-file errors are collected in the
    /// result. The watermark is saved only if nothing failed, the run was not
    /// cancelled and at least one file was copied. A failed save lands in
    /// [`ImportResult::save_error`] as [`ImportError::Persistence`] and leaves
    /// the stored value as it was.
    pub fn run<I>(
        &mut self,
        scenario: &str,
        prior: Option<&Watermark>,
        candidates: I,
        destination: &Path,
    ) -> ImportResult
    where
        I: IntoIterator<Item = Result<ImportCandidate, ImportError>>,
    {
        let mut result = ImportResult {
            scenario: scenario.to_string(),
            dry_run: self.options.dry_run,
            ..Default::default()
        };
        let mut copied = CopiedWindow::default();
        log::debug!("{}: copying into {:?}", scenario, destination);

        for candidate in candidates {
            let candidate = match candidate {
                Ok(candidate) => candidate,
                Err(e) => {
                    log::error!("{}", e);
                    result.failed += 1;
                    result.failures.push(e);
                    continue;
                }
            };
            if self.options.limits.cancel.is_cancelled() {
                result.cancelled = true;
                break;
            }
            match self.copy_one(&candidate, destination) {
                Ok(CopyOutcome::Copied { bytes }) => {
                    result.copied += 1;
                    result.bytes += bytes;
                    copied.add(candidate.timestamp);
                }
                Ok(CopyOutcome::Collision) => {
                    log::info!("file {:?} already exists in {:?}", candidate.path, destination);
                    result.skipped += 1;
                }
                Err(CopyError::Cancelled) => {
                    log::warn!("copy of {:?} cancelled", candidate.path);
                    result.cancelled = true;
                    result.failed += 1;
                    result.failures.push(ImportError::Copy {
                        path: candidate.path,
                        source: CopyError::Cancelled,
                    });
                    break;
                }
                Err(source) => {
                    log::error!("failed to copy {:?}: {}", candidate.path, source);
                    result.failed += 1;
                    result.failures.push(ImportError::Copy {
                        path: candidate.path,
                        source,
                    });
                }
            }
        }

        if result.dry_run {
            log::info!("{}: dry run, watermark untouched", scenario);
            return result;
        }
        if !result.is_clean() {
            log::warn!(
                "{}: {} failed{}, watermark stays at {}",
                scenario,
                result.failed,
                if result.cancelled { ", cancelled" } else { "" },
                prior.map_or_else(|| "none".to_string(), |w| format_stored(&w.newest))
            );
            return result;
        }
        let watermark = match copied.advance(prior) {
            Some(watermark) => watermark,
            None => {
                log::info!("{}: nothing copied, watermark unchanged", scenario);
                return result;
            }
        };
        match self.store.save(scenario, &watermark) {
            Ok(true) => {
                log::info!(
                    "{}: watermark advanced to {}",
                    scenario,
                    format_stored(&watermark.newest)
                );
                result.new_watermark = Some(watermark);
            }
            Ok(false) => {}
            Err(source) => {
                let e = ImportError::Persistence {
                    scenario: scenario.to_string(),
                    source,
                };
                log::error!("{}", e);
                result.save_error = Some(e);
            }
        }
        result
    }

    fn copy_one(
        &self,
        candidate: &ImportCandidate,
        destination: &Path,
    ) -> Result<CopyOutcome, CopyError> {
        if self.options.dry_run {
            let exists = destination_for(&candidate.path, destination)
                .map_or(false, |dst| dst.symlink_metadata().is_ok());
            if exists {
                return Ok(CopyOutcome::Collision);
            }
            log::info!("would copy {:?} to {:?}", candidate.path, destination);
            return Ok(CopyOutcome::Copied {
                bytes: candidate.size,
            });
        }
        log::info!("copying {:?} to {:?}", candidate.path, destination);
        copy_file(&candidate.path, destination, &self.options.limits)
    }
}
