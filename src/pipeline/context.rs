use crate::error::{EtlError, EtlResult};
use crate::logger::RunLogger;
use crate::params::Parameters;
use crate::schema::SchemaRecord;
use crate::storage::SchemaStorage;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Metadata key holding the run identifier
pub const RUN_ID_KEY: &str = "run_id";

/// Metadata key holding the context creation time (RFC 3339)
pub const STARTED_AT_KEY: &str = "started_at";

/// Run-scoped state shared by every stage of a pipeline
///
/// Holds the caller's parameters, the run logger, an optional shared storage
/// handle and a string-keyed artifact map that stages use to hand data to
/// later stages. The run identifier is assigned here and never changes.
///
/// # Example
/// ```
/// use etl_pipeline::params::Parameters;
/// use etl_pipeline::pipeline::PipelineContext;
///
/// let mut context: PipelineContext<serde_json::Value> = PipelineContext::new(Parameters::new());
/// context.add_artifact("row_count", 42usize);
///
/// assert_eq!(*context.artifact::<usize>("row_count").unwrap(), 42);
/// assert_eq!(context.get_metadata("run_id"), Some(context.run_id()));
/// ```
pub struct PipelineContext<T: SchemaRecord> {
    run_id: String,
    params: Parameters,
    logger: Arc<RunLogger>,
    storage: Option<Arc<dyn SchemaStorage<T>>>,
    artifacts: HashMap<String, Box<dyn Any + Send + Sync>>,
    metadata: BTreeMap<String, String>,
}

impl<T: SchemaRecord> PipelineContext<T> {
    /// Create a context with a default logger and no storage
    pub fn new(params: Parameters) -> Self {
        let run_id = uuid::Uuid::new_v4().to_string();
        let mut metadata = BTreeMap::new();
        metadata.insert(RUN_ID_KEY.to_string(), run_id.clone());
        metadata.insert(STARTED_AT_KEY.to_string(), chrono::Utc::now().to_rfc3339());

        Self {
            run_id,
            params,
            logger: Arc::new(RunLogger::default()),
            storage: None,
            artifacts: HashMap::new(),
            metadata,
        }
    }

    pub fn with_logger(mut self, logger: Arc<RunLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_storage(mut self, storage: Arc<dyn SchemaStorage<T>>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn params(&self) -> &Parameters {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut Parameters {
        &mut self.params
    }

    pub fn logger(&self) -> &RunLogger {
        &self.logger
    }

    /// Shared handle to the run logger
    pub fn logger_handle(&self) -> Arc<RunLogger> {
        Arc::clone(&self.logger)
    }

    // ------------------------------------------------------------------------
    // Storage
    // ------------------------------------------------------------------------

    /// The attached storage, or `NotConfigured` if none was injected
    pub fn storage(&self) -> EtlResult<Arc<dyn SchemaStorage<T>>> {
        self.storage.clone().ok_or_else(|| {
            EtlError::NotConfigured("No storage attached to the pipeline context".to_string())
        })
    }

    pub fn set_storage(&mut self, storage: Arc<dyn SchemaStorage<T>>) {
        self.storage = Some(storage);
    }

    pub fn has_storage(&self) -> bool {
        self.storage.is_some()
    }

    // ------------------------------------------------------------------------
    // Artifacts
    // ------------------------------------------------------------------------

    /// Store a value under `key`, replacing any previous artifact
    pub fn add_artifact<V: Any + Send + Sync>(&mut self, key: impl Into<String>, value: V) {
        let key = key.into();
        self.logger.debug(&format!(
            "Artifact '{}' added ({})",
            key,
            std::any::type_name::<V>()
        ));
        self.artifacts.insert(key, Box::new(value));
    }

    pub fn artifact<V: Any>(&self, key: &str) -> EtlResult<&V> {
        self.artifacts
            .get(key)
            .ok_or_else(|| EtlError::ArtifactMissing(key.to_string()))?
            .downcast_ref::<V>()
            .ok_or_else(|| type_mismatch::<V>(key))
    }

    pub fn artifact_mut<V: Any>(&mut self, key: &str) -> EtlResult<&mut V> {
        self.artifacts
            .get_mut(key)
            .ok_or_else(|| EtlError::ArtifactMissing(key.to_string()))?
            .downcast_mut::<V>()
            .ok_or_else(|| type_mismatch::<V>(key))
    }

    /// Remove and return an artifact
    ///
    /// On a type mismatch the artifact stays in place.
    pub fn take_artifact<V: Any>(&mut self, key: &str) -> EtlResult<V> {
        let boxed = self
            .artifacts
            .remove(key)
            .ok_or_else(|| EtlError::ArtifactMissing(key.to_string()))?;

        match boxed.downcast::<V>() {
            Ok(value) => Ok(*value),
            Err(boxed) => {
                self.artifacts.insert(key.to_string(), boxed);
                Err(type_mismatch::<V>(key))
            }
        }
    }

    pub fn has_artifact(&self, key: &str) -> bool {
        self.artifacts.contains_key(key)
    }

    /// Drop an artifact; returns whether it existed
    pub fn remove_artifact(&mut self, key: &str) -> bool {
        self.artifacts.remove(key).is_some()
    }

    /// Artifact keys, sorted
    pub fn artifact_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.artifacts.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    // ------------------------------------------------------------------------
    // Metadata
    // ------------------------------------------------------------------------

    /// Set run metadata; `run_id` cannot be overwritten
    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) -> EtlResult<()> {
        let key = key.into();
        if key == RUN_ID_KEY {
            return Err(EtlError::ReservedMetadata(key));
        }
        self.metadata.insert(key, value.into());
        Ok(())
    }

    pub fn get_metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }
}

impl<T: SchemaRecord> fmt::Debug for PipelineContext<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineContext")
            .field("run_id", &self.run_id)
            .field("logger", &self.logger.name())
            .field("has_storage", &self.storage.is_some())
            .field("artifacts", &self.artifact_keys())
            .field("metadata", &self.metadata)
            .finish()
    }
}

fn type_mismatch<V: Any>(key: &str) -> EtlError {
    EtlError::ArtifactType(format!(
        "'{}' is not a {}",
        key,
        std::any::type_name::<V>()
    ))
}
