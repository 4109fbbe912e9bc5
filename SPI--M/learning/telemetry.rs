//! Training progress sinks.
//!
//! [`LearningTelemetry`] owns the optional JSON-lines log and event publisher.
//! A run borrows it through [`RunTelemetry`], which stamps every record with
//! the run's model name, version tag and [`TrainingStage`]. Sink failures are
//! reported through `tracing` and never abort the run.

use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use shared_event_bus::{EventPublisher, EventRecord};
use shared_logging::{JsonLogger, LogLevel, LogRecord};
use tokio::runtime::{Handle, Runtime};

/// Progress markers attached to training logs and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingStage {
    /// Training CSV read and clamped.
    Loaded,
    /// Fold indices drawn.
    Split,
    /// Fold estimator fitted.
    Fit,
    /// Fold scored on held-out rows.
    Score,
    /// Fold means computed.
    Aggregated,
    /// Final estimator fitted on every row.
    FullFit,
    /// Artifacts and reports written.
    Persisted,
}

impl TrainingStage {
    /// Snake-case label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Loaded => "loaded",
            Self::Split => "split",
            Self::Fit => "fit",
            Self::Score => "score",
            Self::Aggregated => "aggregated",
            Self::FullFit => "full_fit",
            Self::Persisted => "persisted",
        }
    }
}

/// Builder for training telemetry sinks.
pub struct LearningTelemetryBuilder {
    module: String,
    log_path: Option<PathBuf>,
    event_publisher: Option<Arc<dyn EventPublisher>>,
}

impl LearningTelemetryBuilder {
    /// Creates the builder; `module` becomes the log module and event source.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            log_path: None,
            event_publisher: None,
        }
    }

    /// Sets the JSON-lines job log.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Sets the event publisher.
    #[must_use]
    pub fn event_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.event_publisher = Some(publisher);
        self
    }

    /// Opens the log and prepares the publisher.
    pub fn build(self) -> Result<LearningTelemetry> {
        let logger = self.log_path.map(JsonLogger::new).transpose()?;
        let events = self.event_publisher.map(EventSink::new).transpose()?;
        Ok(LearningTelemetry {
            inner: Arc::new(Sinks {
                module: self.module,
                logger,
                events,
            }),
        })
    }
}

/// Shared handle to the configured sinks. Cloning is cheap.
#[derive(Clone)]
pub struct LearningTelemetry {
    inner: Arc<Sinks>,
}

impl fmt::Debug for LearningTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LearningTelemetry")
            .field("module", &self.inner.module)
            .field("logs", &self.inner.logger.as_ref().map(JsonLogger::path))
            .field("events", &self.inner.events.is_some())
            .finish()
    }
}

struct Sinks {
    module: String,
    logger: Option<JsonLogger>,
    events: Option<EventSink>,
}

// Training runs synchronously; the publisher is async. Inside a runtime the
// publish is spawned, otherwise it blocks on a private current-thread runtime.
struct EventSink {
    runtime: Runtime,
    publisher: Arc<dyn EventPublisher>,
}

impl EventSink {
    fn new(publisher: Arc<dyn EventPublisher>) -> Result<Self> {
        Ok(Self {
            runtime: tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?,
            publisher,
        })
    }

    fn publish(&self, record: EventRecord) -> Result<()> {
        if let Ok(handle) = Handle::try_current() {
            let publisher = Arc::clone(&self.publisher);
            handle.spawn(async move {
                if let Err(err) = publisher.publish(record).await {
                    tracing::warn!(error = ?err, "training event publish failed");
                }
            });
            Ok(())
        } else {
            self.runtime.block_on(self.publisher.publish(record))
        }
    }
}

impl LearningTelemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> LearningTelemetryBuilder {
        LearningTelemetryBuilder::new(module)
    }

    /// Writes a structured log record when a log path is configured.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Value) -> Result<()> {
        if let Some(logger) = &self.inner.logger {
            let record = LogRecord::new(&self.inner.module, level, message).with_metadata(metadata);
            logger.log(&record)?;
        }
        Ok(())
    }

    /// Publishes an event when a publisher is configured.
    pub fn event(&self, event_type: &str, payload: Value) -> Result<()> {
        if let Some(sink) = &self.inner.events {
            sink.publish(EventRecord::new(&self.inner.module, event_type, payload))?;
        }
        Ok(())
    }
}

/// Telemetry for one training run. Every log record and event carries
/// `model_name`, `version_tag` and `stage`; a run without sinks only traces.
#[derive(Debug, Clone)]
pub struct RunTelemetry {
    sinks: Option<LearningTelemetry>,
    model_name: String,
    version_tag: String,
}

impl RunTelemetry {
    /// Scopes `sinks` (if any) to a model and version.
    #[must_use]
    pub fn new(
        sinks: Option<&LearningTelemetry>,
        model_name: impl Into<String>,
        version_tag: impl Into<String>,
    ) -> Self {
        Self {
            sinks: sinks.cloned(),
            model_name: model_name.into(),
            version_tag: version_tag.into(),
        }
    }

    /// Records a log-only step.
    pub fn progress(&self, stage: TrainingStage, step: &str, details: Value) {
        tracing::debug!(
            model = %self.model_name,
            stage = stage.as_str(),
            step,
            "training progress"
        );
        let Some(sinks) = &self.sinks else {
            return;
        };
        if let Err(err) = sinks.log(LogLevel::Info, step, self.tag(stage, details)) {
            tracing::warn!(error = %err, step, "training log write failed");
        }
    }

    /// Records a step in the log and publishes it as `event_type`.
    pub fn milestone(&self, stage: TrainingStage, event_type: &str, details: Value) {
        self.progress(stage, event_type, details.clone());
        let Some(sinks) = &self.sinks else {
            return;
        };
        if let Err(err) = sinks.event(event_type, self.tag(stage, details)) {
            tracing::warn!(error = %err, event_type, "training event publish failed");
        }
    }

    fn tag(&self, stage: TrainingStage, details: Value) -> Value {
        let mut fields = match details {
            Value::Object(fields) => fields,
            Value::Null => Map::new(),
            other => Map::from_iter([("data".to_string(), other)]),
        };
        fields.insert("model_name".into(), self.model_name.clone().into());
        fields.insert("version_tag".into(), self.version_tag.clone().into());
        fields.insert("stage".into(), stage.as_str().into());
        Value::Object(fields)
    }
}
