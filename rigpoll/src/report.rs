//! Reporting of poll progress and failures.
//!
//! The dispatcher, the normalizer and the metrics sink never log directly;
//! they hand events to a [`Reporter`] supplied by the caller.

use crate::exchange::Exchange;
use crate::tracing::prelude::*;

pub trait Reporter: Send + Sync {
    /// One (task, request) unit finished.
    fn exchange_completed(&self, task: &str, exchange: &Exchange);

    /// A task is reported as down in the metrics pass.
    fn task_down(&self, task: &str, label: &str, reason: &str);

    /// A metric batch reached the sink.
    fn batch_sent(&self, task: &str, sink: &str, result: &str);

    /// A metric batch could not be delivered.
    fn batch_failed(&self, task: &str, sink: &str, reason: &str);
}

/// Reports through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn exchange_completed(&self, task: &str, exchange: &Exchange) {
        match exchange.error_object() {
            Some(error) => warn!(task, %error, "Request failed"),
            None => debug!(task, "Request completed"),
        }
    }

    fn task_down(&self, task: &str, label: &str, reason: &str) {
        error!(task, "error in request for {} ({})", label, reason);
    }

    fn batch_sent(&self, task: &str, sink: &str, result: &str) {
        info!(task, "metrics sent to {} ({})", sink, result);
    }

    fn batch_failed(&self, task: &str, sink: &str, reason: &str) {
        error!(task, "error on sending metrics to {} ({})", sink, reason);
    }
}
