use std::{path::PathBuf, time::Duration};

use chrono::{DateTime, Utc};

use crate::{
    config::{GlobalConfig, ScenarioConfig},
    copy_file::{CancelToken, CopyLimits},
    error::ImportError,
    importer::{ImportExecutor, ImportOptions, ImportResult},
    scanner::{ExtensionFilter, Scanner, SurveyReport, TimeWindow},
    timestamp::extractor_for,
    watermark::{Watermark, WatermarkStore},
};

/// Which scenarios an invocation covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    All,
    Named(Vec<String>),
}

impl Selection {
    /// `all` anywhere in the list selects every scenario. The match is exact,
    /// so `All` names a scenario.
    pub fn from_args(names: &[String]) -> Self {
        if names.is_empty() || names.iter().any(|n| n == "all") {
            Selection::All
        } else {
            Selection::Named(names.to_vec())
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Overrides the stored watermark as the lower bound.
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    /// Mount point scenario sources are resolved against.
    pub device: Option<PathBuf>,
    pub dry_run: bool,
    /// Falls back to `copy_timeout_secs` from the config.
    pub timeout: Option<Duration>,
    pub cancel: CancelToken,
}

#[derive(Debug)]
pub struct ScenarioReport {
    pub name: String,
    pub outcome: Result<ImportResult, ImportError>,
}

impl ScenarioReport {
    pub fn is_success(&self) -> bool {
        matches!(&self.outcome, Ok(result) if result.is_success())
    }
}

/// Config and watermark store for one invocation, passed in rather than global.
pub struct Session<'a> {
    config: &'a GlobalConfig,
    store: &'a mut dyn WatermarkStore,
    filter: ExtensionFilter,
    options: RunOptions,
}

impl<'a> Session<'a> {
    pub fn new(
        config: &'a GlobalConfig,
        store: &'a mut dyn WatermarkStore,
        options: RunOptions,
    ) -> Self {
        let filter = ExtensionFilter::new(config.include.as_slice(), config.exclude.as_slice());
        Session {
            config,
            store,
            filter,
            options,
        }
    }

    /// Fails on the first unknown name, before anything is imported.
    pub fn resolve(&self, selection: &Selection) -> Result<Vec<&'a ScenarioConfig>, ImportError> {
        let config: &'a GlobalConfig = self.config;
        match selection {
            Selection::All => Ok(config.scenarios.values().collect()),
            Selection::Named(names) => names.iter().map(|name| config.scenario(name)).collect(),
        }
    }

    /// Imports the selected scenarios one after another. A scenario that
    /// fails to scan or persist does not stop the others.
    pub fn import_selection(
        &mut self,
        selection: &Selection,
    ) -> Result<Vec<ScenarioReport>, ImportError> {
        let scenarios = self.resolve(selection)?;
        let mut reports = Vec::with_capacity(scenarios.len());
        for scenario in scenarios {
            if self.options.cancel.is_cancelled() {
                log::warn!("cancelled, not starting {}", scenario.name);
                break;
            }
            let outcome = self.import(scenario);
            if let Err(e) = &outcome {
                log::error!("{}: {}", scenario.name, e);
            }
            reports.push(ScenarioReport {
                name: scenario.name.clone(),
                outcome,
            });
        }
        Ok(reports)
    }

    fn window(&self, prior: Option<&Watermark>) -> TimeWindow {
        TimeWindow {
            after: self.options.from.or(prior.map(|w| w.newest)),
            until: self.options.to,
        }
    }

    pub fn import(&mut self, scenario: &ScenarioConfig) -> Result<ImportResult, ImportError> {
        let _span = tracing::info_span!("scenario", name = %scenario.name).entered();
        let source = scenario.source_path(self.options.device.as_deref());
        let target = self.config.target_for(scenario);
        log::info!("scenario: {}", scenario.name);
        log::info!("source: {:?}", source);
        log::info!("target: {:?}", target);

        let prior = self.store.load(&scenario.name)?;
        let timestamps = extractor_for(self.config.timestamp_for(scenario));
        let scanner = Scanner::new(source, &self.filter, timestamps.as_ref())
            .recursive(self.config.recursive_for(scenario))
            .window(self.window(prior.as_ref()));
        let candidates = scanner.candidates()?;

        let options = ImportOptions {
            dry_run: self.options.dry_run,
            limits: CopyLimits {
                timeout: self.options.timeout.or(self.config.copy_timeout()),
                cancel: self.options.cancel.clone(),
            },
        };
        let mut result = ImportExecutor::new(&mut *self.store, options).run(
            &scenario.name,
            prior.as_ref(),
            candidates,
            &target,
        );
        result.filtered = scanner.filtered();
        Ok(result)
    }

    /// Reports what an import would see, copying nothing.
    pub fn survey(&self, scenario: &ScenarioConfig) -> Result<SurveyReport, ImportError> {
        let prior = self.store.load(&scenario.name)?;
        let timestamps = extractor_for(self.config.timestamp_for(scenario));
        Scanner::new(
            scenario.source_path(self.options.device.as_deref()),
            &self.filter,
            timestamps.as_ref(),
        )
        .recursive(self.config.recursive_for(scenario))
        .window(self.window(prior.as_ref()))
        .survey()
    }

    /// Every configured scenario with its stored watermark, if any.
    pub fn status(&self) -> Result<Vec<(String, Option<Watermark>)>, ImportError> {
        let mut stored = self.store.list()?;
        let mut status = Vec::with_capacity(self.config.scenarios.len());
        for name in self.config.scenarios.keys() {
            let watermark = stored
                .iter()
                .position(|(n, _)| n == name)
                .map(|i| stored.swap_remove(i).1);
            status.push((name.clone(), watermark));
        }
        for (name, _) in &stored {
            log::debug!("watermark for unconfigured scenario {}", name);
        }
        Ok(status)
    }
}
