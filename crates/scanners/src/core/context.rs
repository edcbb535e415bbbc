use crate::analysis::guards::{self, Guard};
use crate::analysis::version_parser::SolidityVersion;
use crate::core::error::RuleExecutionError;
use crate::core::result::{Finding, Location, RULE_ERROR_ID};
use crate::core::Severity;
use crate::representations::ir::{Contract, Function, Span};
use anyhow::{Context, Result};
use lru::LruCache;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;

pub const CONFIG_FILE_NAME: &str = ".solaudit.toml";

/// Engine and rule settings, loadable from `.solaudit.toml`:
///
/// ```toml
/// parallel_execution = true
/// block_hash_horizon = 256
/// sender_aliases = ["sender", "caller"]
/// disabled_rules = ["integer-overflow"]
/// language_version = "0.4.24"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScannerConfig {
    pub parallel_execution: bool,
    pub cache_enabled: bool,
    pub max_cache_size: usize,
    pub deduplication_enabled: bool,
    /// Number of most recent blocks whose hash is still queryable.
    pub block_hash_horizon: u64,
    /// Substrings that mark a parameter or local as holding the caller.
    pub sender_aliases: Vec<String>,
    pub disabled_rules: Vec<String>,
    /// Overrides the `pragma solidity` version when set.
    pub language_version: Option<String>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            parallel_execution: true,
            cache_enabled: true,
            max_cache_size: 256,
            deduplication_enabled: true,
            block_hash_horizon: 256,
            sender_aliases: vec!["sender".to_string(), "caller".to_string()],
            disabled_rules: Vec::new(),
            language_version: None,
        }
    }
}

impl ScannerConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// `.solaudit.toml` in `dir` if present and valid, defaults otherwise.
    pub fn discover(dir: &Path) -> Self {
        let path = dir.join(CONFIG_FILE_NAME);
        if !path.exists() {
            return Self::default();
        }
        match Self::load(&path) {
            Ok(config) => {
                tracing::debug!(path = %path.display(), "loaded configuration");
                config
            }
            Err(e) => {
                tracing::warn!("ignoring {}: {:#}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn is_rule_enabled(&self, rule_id: &str) -> bool {
        !self.disabled_rules.iter().any(|r| r == rule_id)
    }
}

pub struct AnalysisCache {
    entries: LruCache<String, Arc<dyn Any + Send + Sync>>,
}

impl AnalysisCache {
    pub fn new(max_size: usize) -> Self {
        let capacity = NonZeroUsize::new(max_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
        }
    }

    pub fn get_or_compute<T, F>(&mut self, key: &str, compute: F) -> Result<Arc<T>>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Result<T>,
    {
        if let Some(entry) = self.entries.get(key) {
            if let Some(value) = entry.downcast_ref::<Arc<T>>() {
                return Ok(value.clone());
            }
        }

        let value = Arc::new(compute()?);
        self.entries
            .put(key.to_string(), Arc::new(value.clone()) as Arc<dyn Any + Send + Sync>);
        Ok(value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Everything a rule sees for one contract: the normalized IR, where it came
/// from, the effective language version and the run configuration. Shared
/// read-only between rules; the cache is the only interior mutability.
pub struct AnalysisContext {
    contract: Arc<Contract>,
    file_path: String,
    version: Option<SolidityVersion>,
    config: Arc<ScannerConfig>,
    cache: Arc<RwLock<AnalysisCache>>,
}

impl AnalysisContext {
    pub fn new(
        contract: Arc<Contract>,
        file_path: impl Into<String>,
        version: Option<SolidityVersion>,
        config: Arc<ScannerConfig>,
    ) -> Self {
        let cache = AnalysisCache::new(config.max_cache_size);
        Self {
            contract,
            file_path: file_path.into(),
            version,
            config,
            cache: Arc::new(RwLock::new(cache)),
        }
    }

    pub fn contract(&self) -> &Contract {
        &self.contract
    }

    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    pub fn version(&self) -> Option<&SolidityVersion> {
        self.version.as_ref()
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    pub fn get_or_compute<T, F>(&self, key: &str, compute: F) -> Result<Arc<T>>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Result<T>,
    {
        if self.config.cache_enabled {
            self.cache.write().get_or_compute(key, compute)
        } else {
            Ok(Arc::new(compute()?))
        }
    }

    /// Guards of `function`, computed once per contract and shared by rules.
    pub fn guards(&self, function: &Function) -> Result<Arc<Vec<Guard>>> {
        let key = format!("guards:{}:{}", function.name, function.span.line);
        self.get_or_compute(&key, || Ok(guards::extract(function)))
    }

    pub fn location(&self, span: Span) -> Location {
        Location::new(self.file_path.clone(), span.line, span.column)
    }

    pub fn statement_location(&self, function: &Function, statement_index: usize, span: Span) -> Location {
        let mut location = self
            .location(span)
            .in_function(function.name.clone(), statement_index);
        location.function_line = Some(function.span.line);
        location
    }

    /// Low-severity stand-in for the part of this contract rule `rule` could
    /// not analyse.
    pub fn rule_error(&self, rule: &str, failure: &RuleExecutionError) -> Finding {
        let contract = self.contract();
        let mut location = match failure.line {
            Some(line) => Location::new(self.file_path.clone(), line, 1),
            None => self.location(contract.span),
        };
        location.function = failure.function.clone();
        let scope = match &failure.function {
            Some(function) => format!("function '{}' of contract '{}'", function, contract.name),
            None => format!("contract '{}'", contract.name),
        };

        Finding::new(
            RULE_ERROR_ID,
            Severity::Low,
            format!("Rule '{}' could not analyse {}", rule, scope),
            format!(
                "Rule '{}' stopped on {}: {}. Its findings there are missing; \
                 review the affected code manually.",
                rule, scope, failure.reason
            ),
        )
        .with_location(location)
        .with_contract(&contract.name)
        .with_failed_rule(rule)
        .with_recommendation("Review the affected function manually for the bug class this rule covers.")
    }
}
