//! Per-operation instrumentation of the coordination client.
//!
//! The client reports into a [`MetricsSink`] handed over at construction.
//! [`ClientMonitor`] is the prometheus-backed sink; [`NoopMetrics`] drops
//! everything.

mod monitor;


pub use monitor::*;

use std::time::Instant;

use crate::path::segments;
use crate::CONFIGS;
use crate::CONTROLLER;
use crate::CURRENTSTATES;
use crate::EXTERNALVIEW;
use crate::IDEALSTATES;
use crate::INSTANCES;
use crate::LIVEINSTANCES;
use crate::MESSAGES;
use crate::PROPERTYSTORE;

/// Receives one call per completed client operation and per delivered event.
pub trait MetricsSink: Send + Sync {
    fn record_read(
        &self,
        path: &str,
        bytes: usize,
        started: Instant,
    );

    fn record_write(
        &self,
        path: &str,
        bytes: usize,
        started: Instant,
    );

    fn record_read_failure(
        &self,
        path: &str,
    );

    fn record_write_failure(
        &self,
        path: &str,
    );

    fn increase_state_change_event_counter(&self);

    fn increase_data_change_event_counter(&self);

    /// Releases whatever the sink registered. Called once when the client closes.
    fn unregister(&self);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_read(
        &self,
        _path: &str,
        _bytes: usize,
        _started: Instant,
    ) {
    }

    fn record_write(
        &self,
        _path: &str,
        _bytes: usize,
        _started: Instant,
    ) {
    }

    fn record_read_failure(
        &self,
        _path: &str,
    ) {
    }

    fn record_write_failure(
        &self,
        _path: &str,
    ) {
    }

    fn increase_state_change_event_counter(&self) {}

    fn increase_data_change_event_counter(&self) {}

    fn unregister(&self) {}
}

/// Namespace a path is accounted under, in addition to the aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathCategory {
    IdealStates,
    Instances,
    Configs,
    Controller,
    ExternalView,
    LiveInstances,
    PropertyStore,
    CurrentStates,
    Messages,
}

impl PathCategory {
    pub const ALL: [PathCategory; 9] = [
        PathCategory::IdealStates,
        PathCategory::Instances,
        PathCategory::Configs,
        PathCategory::Controller,
        PathCategory::ExternalView,
        PathCategory::LiveInstances,
        PathCategory::PropertyStore,
        PathCategory::CurrentStates,
        PathCategory::Messages,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            PathCategory::IdealStates => IDEALSTATES,
            PathCategory::Instances => INSTANCES,
            PathCategory::Configs => CONFIGS,
            PathCategory::Controller => CONTROLLER,
            PathCategory::ExternalView => EXTERNALVIEW,
            PathCategory::LiveInstances => LIVEINSTANCES,
            PathCategory::PropertyStore => PROPERTYSTORE,
            PathCategory::CurrentStates => CURRENTSTATES,
            PathCategory::Messages => MESSAGES,
        }
    }

    fn from_cluster_segment(segment: &str) -> Option<Self> {
        match segment {
            IDEALSTATES => Some(PathCategory::IdealStates),
            INSTANCES => Some(PathCategory::Instances),
            CONFIGS => Some(PathCategory::Configs),
            CONTROLLER => Some(PathCategory::Controller),
            EXTERNALVIEW => Some(PathCategory::ExternalView),
            LIVEINSTANCES => Some(PathCategory::LiveInstances),
            PROPERTYSTORE => Some(PathCategory::PropertyStore),
            _ => None,
        }
    }

    /// Categories of `path`, derived from its second segment.
    ///
    /// `/<cluster>/INSTANCES/<instance>/CURRENTSTATES/...` and
    /// `/<cluster>/INSTANCES/<instance>/MESSAGES/...` count toward both
    /// `INSTANCES` and the nested namespace.
    pub fn classify(path: &str) -> Vec<PathCategory> {
        let segs: Vec<&str> = segments(path).take(4).collect();
        let Some(category) = segs.get(1).and_then(|s| Self::from_cluster_segment(s)) else {
            return Vec::new();
        };

        let mut categories = vec![category];
        if category == PathCategory::Instances {
            match segs.get(3).copied() {
                Some(CURRENTSTATES) => categories.push(PathCategory::CurrentStates),
                Some(MESSAGES) => categories.push(PathCategory::Messages),
                _ => {}
            }
        }
        categories
    }
}
