use std::{
    cell::Cell,
    collections::{BTreeMap, BTreeSet},
    fs, io,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use walkdir::{DirEntry, WalkDir};

use crate::{error::ImportError, timestamp::TimestampExtractor};

/// A file selected for import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportCandidate {
    pub path: PathBuf,
    pub timestamp: DateTime<Utc>,
    /// Lower-cased, without the dot. Empty when the file has none.
    pub extension: String,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionVerdict {
    Accepted,
    NotIncluded,
    Excluded,
}

/// Case-insensitive include/exclude sets. Exclude wins over include; an
/// empty include set lets every extension through.
#[derive(Debug, Clone, Default)]
pub struct ExtensionFilter {
    include: BTreeSet<String>,
    exclude: BTreeSet<String>,
}

impl ExtensionFilter {
    pub fn new<S: AsRef<str>>(include: &[S], exclude: &[S]) -> Self {
        let normalize = |exts: &[S]| {
            exts.iter()
                .map(|e| e.as_ref().trim().trim_start_matches('.').to_lowercase())
                .filter(|e| !e.is_empty())
                .collect::<BTreeSet<_>>()
        };
        ExtensionFilter {
            include: normalize(include),
            exclude: normalize(exclude),
        }
    }

    pub fn verdict(&self, extension: &str) -> ExtensionVerdict {
        let extension = extension.to_lowercase();
        if !self.include.is_empty() && !self.include.contains(&extension) {
            return ExtensionVerdict::NotIncluded;
        }
        if self.exclude.contains(&extension) {
            return ExtensionVerdict::Excluded;
        }
        ExtensionVerdict::Accepted
    }

    pub fn accepts(&self, path: &Path) -> bool {
        self.verdict(&extension_of(path)) == ExtensionVerdict::Accepted
    }

    /// Whether either list mentions the extension.
    pub fn is_known(&self, extension: &str) -> bool {
        let extension = extension.to_lowercase();
        self.include.contains(&extension) || self.exclude.contains(&extension)
    }
}

pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// Files count when `after < timestamp <= until`; open ends are unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeWindow {
    pub after: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl TimeWindow {
    pub fn contains(&self, t: &DateTime<Utc>) -> bool {
        self.after.map_or(true, |after| *t > after) && self.until.map_or(true, |until| *t <= until)
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|s| s.starts_with('.'))
            .unwrap_or(false)
}

/// Scans one scenario source. Holds no cursor: every call to
/// [`Scanner::candidates`] walks the directory again from the start.
pub struct Scanner<'a> {
    root: PathBuf,
    filter: &'a ExtensionFilter,
    window: TimeWindow,
    recursive: bool,
    timestamps: &'a dyn TimestampExtractor,
    filtered: Cell<usize>,
}

impl<'a> Scanner<'a> {
    pub fn new(
        root: impl Into<PathBuf>,
        filter: &'a ExtensionFilter,
        timestamps: &'a dyn TimestampExtractor,
    ) -> Self {
        Scanner {
            root: root.into(),
            filter,
            window: TimeWindow::default(),
            recursive: false,
            timestamps,
            filtered: Cell::new(0),
        }
    }

    pub fn window(mut self, window: TimeWindow) -> Self {
        self.window = window;
        self
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Files the extension filter dropped during the last [`Scanner::candidates`] walk.
    pub fn filtered(&self) -> usize {
        self.filtered.get()
    }

    /// Fails when the source directory cannot be read at all.
    fn check_root(&self) -> Result<(), ImportError> {
        let scan_error = |source: io::Error| ImportError::Scan {
            path: self.root.clone(),
            source,
        };
        let metadata = fs::metadata(&self.root).map_err(scan_error)?;
        if !metadata.is_dir() {
            return Err(scan_error(io::Error::new(
                io::ErrorKind::Other,
                "not a directory",
            )));
        }
        fs::read_dir(&self.root).map_err(scan_error)?;
        Ok(())
    }

    fn walk(&self) -> walkdir::FilterEntry<walkdir::IntoIter, fn(&DirEntry) -> bool> {
        let mut walk_dir = WalkDir::new(&self.root)
            .min_depth(1)
            .sort_by(|a, b| a.file_name().cmp(b.file_name()));
        if !self.recursive {
            walk_dir = walk_dir.max_depth(1);
        }
        let not_hidden: fn(&DirEntry) -> bool = |e| !is_hidden(e);
        walk_dir.into_iter().filter_entry(not_hidden)
    }

    /// Lazily yields the files to import, in file-name order.
    ///
    /// Per-entry failures (unreadable subdirectory, metadata or timestamp
    /// errors) come through as `Err` items so the caller can count them.
    pub fn candidates(
        &self,
    ) -> Result<impl Iterator<Item = Result<ImportCandidate, ImportError>> + '_, ImportError> {
        self.check_root()?;
        self.filtered.set(0);
        Ok(self
            .walk()
            .filter_map(move |entry| self.candidate(entry).transpose()))
    }

    fn candidate(
        &self,
        entry: Result<DirEntry, walkdir::Error>,
    ) -> Result<Option<ImportCandidate>, ImportError> {
        let entry = entry.map_err(|e| ImportError::Scan {
            path: e.path().map(Path::to_path_buf).unwrap_or_else(|| self.root.clone()),
            source: e.into(),
        })?;
        if !entry.file_type().is_file() {
            return Ok(None);
        }
        let path = entry.path();
        let extension = extension_of(path);
        match self.filter.verdict(&extension) {
            ExtensionVerdict::Accepted => {}
            ExtensionVerdict::NotIncluded if !self.filter.is_known(&extension) => {
                log::warn!("skip {:?}: unexpected extension {:?}", path, extension);
                self.filtered.set(self.filtered.get() + 1);
                return Ok(None);
            }
            verdict => {
                log::debug!("skip {:?}: {:?}", path, verdict);
                self.filtered.set(self.filtered.get() + 1);
                return Ok(None);
            }
        }
        let scan_error = |source: io::Error| ImportError::Scan {
            path: path.to_path_buf(),
            source,
        };
        let metadata = entry.metadata().map_err(|e| scan_error(e.into()))?;
        let timestamp = self
            .timestamps
            .timestamp(path, &metadata)
            .map_err(scan_error)?;
        if !self.window.contains(&timestamp) {
            log::debug!("skip {:?}: {} outside window", path, timestamp);
            return Ok(None);
        }
        Ok(Some(ImportCandidate {
            path: path.to_path_buf(),
            timestamp,
            extension,
            size: metadata.len(),
        }))
    }

    /// Looks at every file in the window regardless of extension, without copying.
    pub fn survey(&self) -> Result<SurveyReport, ImportError> {
        self.check_root()?;
        let mut report = SurveyReport::default();
        for entry in self.walk() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("error walking entry: {}", e);
                    report.errors += 1;
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let timestamp = match entry
                .metadata()
                .map_err(io::Error::from)
                .and_then(|m| self.timestamps.timestamp(entry.path(), &m))
            {
                Ok(timestamp) => timestamp,
                Err(e) => {
                    log::warn!("cannot read timestamp of {:?}: {}", entry.path(), e);
                    report.errors += 1;
                    continue;
                }
            };
            if !self.window.contains(&timestamp) {
                continue;
            }
            let extension = extension_of(entry.path());
            if self.filter.verdict(&extension) == ExtensionVerdict::Accepted {
                report.accepted += 1;
            }
            if !self.filter.is_known(&extension) {
                report.unexpected_extensions.insert(extension.clone());
            }
            *report.found_extensions.entry(extension).or_insert(0) += 1;
            report.oldest = Some(report.oldest.map_or(timestamp, |t| t.min(timestamp)));
            report.newest = Some(report.newest.map_or(timestamp, |t| t.max(timestamp)));
        }
        Ok(report)
    }
}

/// What a source holds within the time window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SurveyReport {
    pub found_extensions: BTreeMap<String, usize>,
    /// Found, but in neither the include nor the exclude list.
    pub unexpected_extensions: BTreeSet<String>,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
    /// Files the import would pick up.
    pub accepted: usize,
    pub errors: usize,
}
