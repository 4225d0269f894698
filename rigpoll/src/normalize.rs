//! Table and metrics passes over a dispatch [`Union`].

use serde::Serialize;
use time::UtcOffset;

use crate::dispatch::{PollTask, Union};
use crate::exchange::Exchange;
use crate::record::{Metric, MetricBatch, Record};
use crate::report::Reporter;
use crate::vendor::ShapingError;

/// How a task's results are presented.
pub trait Present: PollTask {
    /// Name of the table group the task belongs to.
    fn group(&self) -> String;

    /// `"{id} - {host}:{port}"`.
    fn label(&self) -> String;

    fn description(&self) -> Option<&str>;

    fn table(&self, exchanges: &[Exchange], offset: UtcOffset) -> Result<Record, ShapingError>;

    fn metrics(&self, exchanges: &[Exchange]) -> Result<Vec<Metric>, ShapingError>;

    /// Metrics that signal the task is unreachable.
    fn down(&self) -> Vec<Metric>;
}

/// One row of the table view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableRow {
    pub task: String,
    pub group: String,
    pub success: bool,
    pub record: Record,
}

/// Build one row per task, in registration order.
///
/// Failed tasks show their first error object. Timestamps are rendered in
/// `offset`.
pub fn table<T: Present>(union: &Union<T>, offset: UtcOffset) -> Vec<TableRow> {
    union
        .iter()
        .map(|result| {
            let task = result.task.as_ref();
            let mut record = Record::new();
            record.insert("Server", task.label());

            let success = match result.first_error() {
                Some(error) => {
                    if let Some(fields) = error.as_object() {
                        for (key, value) in fields {
                            record.insert(key.as_str(), value.clone());
                        }
                    }
                    false
                }
                None => match task.table(&result.exchanges, offset) {
                    Ok(shaped) => {
                        record.extend(shaped);
                        true
                    }
                    Err(e) => {
                        for (key, value) in error_fields(&e) {
                            record.insert(key, value);
                        }
                        false
                    }
                },
            };

            let description = task
                .description()
                .map(str::to_string)
                .or_else(|| {
                    record
                        .get("Description")
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                })
                .unwrap_or_default();
            record.insert("Description", description);

            TableRow {
                task: task.id().to_string(),
                group: task.group(),
                success,
                record,
            }
        })
        .collect()
}

fn error_fields(error: &ShapingError) -> Vec<(&'static str, serde_json::Value)> {
    let object = error.to_error_object();
    vec![
        ("error_type", object.error_type.to_string().into()),
        ("error_data", object.error_data.into()),
        ("error_message", object.error_message.into()),
    ]
}

/// Build one metric batch per task.
///
/// A task with a failed exchange, or whose answers cannot be shaped, yields
/// only its down metrics.
pub fn metrics<T: Present>(union: &Union<T>, reporter: &dyn Reporter) -> Vec<MetricBatch> {
    union
        .iter()
        .map(|result| {
            let task = result.task.as_ref();
            let shaped = match result.first_error() {
                Some(error) => Err(error.to_string()),
                None => task.metrics(&result.exchanges).map_err(|e| e.to_string()),
            };
            let metrics = shaped.unwrap_or_else(|reason| {
                reporter.task_down(task.id(), &task.label(), &reason);
                task.down()
            });
            MetricBatch {
                task: task.id().to_string(),
                metrics,
            }
        })
        .collect()
}
