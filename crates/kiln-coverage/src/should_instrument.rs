use crate::error::CoverageError;
use crate::glob::GlobSet;
use kiln_config::{ProjectConfig, RunOptions};
use parking_lot::Mutex;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A `__mocks__` directory anywhere in a separator-normalized path.
const MOCKS_SEGMENT: &str = "/__mocks__/";

fn compile_regexes(patterns: &[String]) -> Result<Vec<Regex>, CoverageError> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(pattern).map_err(|source| CoverageError::Regex {
                pattern: pattern.clone(),
                source,
            })
        })
        .collect()
}

/// Precompiled coverage eligibility rules for one project.
#[derive(Debug)]
pub struct CoverageMatcher {
    root_dir: PathBuf,
    force_coverage_match: GlobSet,
    test_path_ignore_patterns: Vec<Regex>,
    test_regex: Vec<Regex>,
    test_match: GlobSet,
    coverage_path_ignore_patterns: Vec<Regex>,
    global_setup: Option<PathBuf>,
    global_teardown: Option<PathBuf>,
    setup_files: Vec<PathBuf>,
    setup_files_after_env: Vec<PathBuf>,
    collect_coverage_from: Mutex<HashMap<Vec<String>, Arc<GlobSet>>>,
}

impl CoverageMatcher {
    pub fn new(config: &ProjectConfig) -> Result<Self, CoverageError> {
        Ok(Self {
            root_dir: config.root_dir.clone(),
            force_coverage_match: GlobSet::new(&config.force_coverage_match)?,
            test_path_ignore_patterns: compile_regexes(&config.test_path_ignore_patterns)?,
            test_regex: compile_regexes(&config.test_regex)?,
            test_match: GlobSet::new(&config.test_match)?,
            coverage_path_ignore_patterns: compile_regexes(&config.coverage_path_ignore_patterns)?,
            global_setup: config.global_setup.clone(),
            global_teardown: config.global_teardown.clone(),
            setup_files: config.setup_files.clone(),
            setup_files_after_env: config.setup_files_after_env.clone(),
            collect_coverage_from: Mutex::new(HashMap::new()),
        })
    }

    /// Decides whether `filename` should be instrumented for coverage.
    ///
    /// `loaded` is the set of files the test run actually required; when
    /// given and no `collect_coverage_from` globs are configured, files
    /// outside it are skipped.
    pub fn should_instrument(
        &self,
        filename: &Path,
        options: &RunOptions,
        loaded: Option<&HashSet<PathBuf>>,
    ) -> Result<bool, CoverageError> {
        let (instrument, reason) = self.decide(filename, options, loaded)?;
        tracing::trace!(
            target = "kiln.coverage",
            path = %filename.display(),
            instrument,
            reason,
            "coverage eligibility"
        );
        Ok(instrument)
    }

    fn decide(
        &self,
        filename: &Path,
        options: &RunOptions,
        loaded: Option<&HashSet<PathBuf>>,
    ) -> Result<(bool, &'static str), CoverageError> {
        if !options.collect_coverage {
            return Ok((false, "coverage disabled"));
        }

        if let Some(only_from) = &options.collect_coverage_only_from {
            if !only_from.contains(filename) {
                return Ok((false, "not in collect_coverage_only_from"));
            }
        }

        let path = filename.to_string_lossy();
        let glob_path = kiln_core::replace_path_sep_for_glob(&path);

        if self.force_coverage_match.matches_any(&glob_path) {
            return Ok((true, "force_coverage_match"));
        }

        if !self.test_path_ignore_patterns.iter().any(|re| re.is_match(&path)) {
            if self.test_regex.iter().any(|re| re.is_match(&path)) {
                return Ok((false, "test_regex"));
            }
            if self.test_match.is_match(&glob_path) {
                return Ok((false, "test_match"));
            }
        }

        if options.collect_coverage_from.is_empty() {
            if let Some(loaded) = loaded {
                if !loaded.contains(filename) {
                    return Ok((false, "not loaded by the test run"));
                }
            }
        } else {
            let globs = self.collect_coverage_from_globs(&options.collect_coverage_from)?;
            let relative = kiln_core::relative_to_root(&self.root_dir, filename);
            let relative = kiln_core::replace_path_sep_for_glob(&relative.to_string_lossy());
            if !globs.is_match(&relative) {
                return Ok((false, "collect_coverage_from"));
            }
        }

        if self.coverage_path_ignore_patterns.iter().any(|re| re.is_match(&path)) {
            return Ok((false, "coverage_path_ignore_patterns"));
        }

        if self.global_setup.as_deref() == Some(filename)
            || self.global_teardown.as_deref() == Some(filename)
        {
            return Ok((false, "global setup/teardown"));
        }

        if self.setup_files.iter().any(|p| p == filename)
            || self.setup_files_after_env.iter().any(|p| p == filename)
        {
            return Ok((false, "setup file"));
        }

        if glob_path.contains(MOCKS_SEGMENT) {
            return Ok((false, "__mocks__"));
        }

        if let Some(changed) = &options.changed_files {
            if !changed.contains(filename) {
                let related = options
                    .sources_related_to_tests_in_changed_files
                    .as_ref()
                    .is_some_and(|related| related.contains(filename));
                if !related {
                    return Ok((false, "not changed"));
                }
            }
        }

        if path.ends_with(".json") {
            return Ok((false, "json"));
        }

        Ok((true, "eligible"))
    }

    fn collect_coverage_from_globs(&self, patterns: &[String]) -> Result<Arc<GlobSet>, CoverageError> {
        let mut cache = self.collect_coverage_from.lock();
        if let Some(globs) = cache.get(patterns) {
            return Ok(globs.clone());
        }
        let globs = Arc::new(GlobSet::new(patterns)?);
        cache.insert(patterns.to_vec(), globs.clone());
        Ok(globs)
    }
}

/// One-shot form of [`CoverageMatcher::should_instrument`].
///
/// Compiles the project's patterns on every call; long-lived callers should
/// keep a [`CoverageMatcher`] instead.
pub fn should_instrument(
    filename: &Path,
    options: &RunOptions,
    config: &ProjectConfig,
    loaded: Option<&HashSet<PathBuf>>,
) -> Result<bool, CoverageError> {
    CoverageMatcher::new(config)?.should_instrument(filename, options, loaded)
}
