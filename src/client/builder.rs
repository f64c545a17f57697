use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parking_lot::Condvar;
use parking_lot::Mutex;
use prometheus::Registry;
use tokio::sync::mpsc;
use tracing::info;

use super::async_ops::spawn_completion_thread;
use super::dispatcher::spawn_event_thread;
use super::dispatcher::PendingWatches;
use super::lifecycle::Lifecycle;
use super::listener::ListenerRegistry;
use super::ClientInner;
use super::CoordClient;
use super::SessionHandle;
use crate::BasicSerializer;
use crate::ClientConfig;
use crate::ClientMonitor;
use crate::ConnectionFactory;
use crate::EventSink;
use crate::MetricsSink;
use crate::MonitoringConfig;
use crate::NoopMetrics;
use crate::PathBasedSerializer;
use crate::Result;
use crate::SessionState;

enum Metrics {
    Noop,
    Sink(Arc<dyn MetricsSink>),
    Monitor {
        registry: Registry,
        config: MonitoringConfig,
    },
}

pub struct CoordClientBuilder {
    factory: Arc<dyn ConnectionFactory>,
    config: ClientConfig,
    serializer: Arc<dyn PathBasedSerializer>,
    metrics: Metrics,
}

impl CoordClientBuilder {
    /// Create a new builder with default config, JSON serialization and no metrics
    pub fn new(factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            factory,
            config: ClientConfig::default(),
            serializer: Arc::new(BasicSerializer::default()),
            metrics: Metrics::Noop,
        }
    }

    /// Completely replaces the default configuration
    pub fn config(
        mut self,
        config: ClientConfig,
    ) -> Self {
        self.config = config;
        self
    }

    pub fn serializer(
        mut self,
        serializer: Arc<dyn PathBasedSerializer>,
    ) -> Self {
        self.serializer = serializer;
        self
    }

    /// Reports into a caller-owned sink
    pub fn metrics_sink(
        mut self,
        sink: Arc<dyn MetricsSink>,
    ) -> Self {
        self.metrics = Metrics::Sink(sink);
        self
    }

    /// Registers a [`ClientMonitor`] in `registry` once the session is
    /// known, labelled per `config`. Disabled monitoring falls back to
    /// [`NoopMetrics`].
    pub fn monitor(
        mut self,
        registry: Registry,
        config: MonitoringConfig,
    ) -> Self {
        self.metrics = Metrics::Monitor { registry, config };
        self
    }

    /// Opens the session, starts the worker threads and waits up to
    /// `connection_timeout_ms` for the session to connect.
    pub fn build(self) -> Result<CoordClient> {
        self.config.validate()?;

        let (events, event_rx) = EventSink::channel();
        let connection = self.factory.connect(&self.config, events.clone())?;
        let session_id = connection.session_id();

        let monitor: Arc<dyn MetricsSink> = match self.metrics {
            Metrics::Sink(sink) => sink,
            Metrics::Monitor { registry, config } if config.enabled => {
                let (monitor_type, monitor_key) = config.labels(session_id);
                match ClientMonitor::register(&registry, &monitor_type, &monitor_key) {
                    Ok(monitor) => Arc::new(monitor),
                    Err(e) => {
                        connection.close();
                        return Err(e);
                    }
                }
            }
            _ => Arc::new(NoopMetrics),
        };

        let (jobs, job_rx) = mpsc::unbounded_channel();
        let client = CoordClient {
            inner: Arc::new(ClientInner {
                factory: self.factory,
                session: ArcSwapOption::from_pointee(SessionHandle { connection }),
                state: Mutex::new(SessionState::Connecting),
                state_changed: Condvar::new(),
                lifecycle: Lifecycle::new(),
                config: self.config,
                serializer: self.serializer,
                monitor,
                listeners: ListenerRegistry::default(),
                pending_watches: Mutex::new(PendingWatches::default()),
                events,
                jobs: Mutex::new(Some(jobs)),
                workers: Mutex::new(Vec::new()),
            }),
        };

        let event_thread = spawn_event_thread(Arc::downgrade(&client.inner), event_rx)?;
        client.inner.workers.lock().push(event_thread);
        let completion_thread = spawn_completion_thread(job_rx)?;
        client.inner.workers.lock().push(completion_thread);

        client.inner.wait_until_connected(client.inner.config.connection_timeout())?;
        info!("connected to {} with session {:#x}", client.servers().unwrap_or_default(), session_id);
        Ok(client)
    }
}
