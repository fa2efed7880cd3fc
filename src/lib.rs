//! Copies new photos and videos from a memory card into an archive folder.
//!
//! Each configured scenario (one camera, one card layout) keeps a watermark:
//! the newest timestamp imported so far. A run copies only files strictly
//! newer than it and moves it forward once every copy succeeded.

pub mod config;
pub mod copy_file;
pub mod error;
pub mod importer;
pub mod scanner;
pub mod session;
pub mod timestamp;
pub mod watermark;

pub use config::{GlobalConfig, ScenarioConfig};
pub use error::{CopyError, ImportError, StoreError};
pub use importer::{ImportExecutor, ImportOptions, ImportResult};
pub use scanner::{ExtensionFilter, ImportCandidate, Scanner, SurveyReport, TimeWindow};
pub use session::{RunOptions, ScenarioReport, Selection, Session};
pub use watermark::{SqliteWatermarkStore, Watermark, WatermarkStore};
