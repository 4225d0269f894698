//! Task registration and concurrent fan-out.
//!
//! A [`Dispatcher`] holds validated tasks of one protocol. Dispatching runs
//! one tokio task per (task, request) unit, appends each resulting
//! [`Exchange`] under a single lock, and returns once every unit finished.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;

use crate::error::{Error, Result, TaskError};
use crate::exchange::Exchange;
use crate::report::{Reporter, TracingReporter};
use crate::tracing::prelude::*;

/// A validated task that can exchange requests with its endpoint.
#[async_trait::async_trait]
pub trait PollTask: Serialize + Send + Sync + 'static {
    type Request: Send + Sync + 'static;

    fn id(&self) -> &str;

    /// Requests to send, in configuration order.
    fn requests(&self) -> &[Self::Request];

    /// Perform one request. Failures are recorded in the exchange, never
    /// returned.
    async fn exchange(&self, request: &Self::Request) -> Exchange;
}

/// A task as supplied by the caller, before validation.
pub trait Spec {
    type Task: PollTask;
    /// Settings shared by the whole batch.
    type Context;

    fn id(&self) -> &str;

    fn validate(&self, context: &Self::Context) -> std::result::Result<Self::Task, TaskError>;
}

pub struct Dispatcher<T: PollTask> {
    tasks: Vec<Arc<T>>,
    max_in_flight: Option<usize>,
    reporter: Arc<dyn Reporter>,
}

impl<T: PollTask> Default for Dispatcher<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: PollTask> Dispatcher<T> {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            max_in_flight: None,
            reporter: Arc::new(TracingReporter),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Limit the number of units in flight; `None` runs every unit at once.
    pub fn with_max_in_flight(mut self, limit: Option<usize>) -> Self {
        self.max_in_flight = limit.map(|n| n.max(1));
        self
    }

    /// Validate a batch of specifications and add them.
    ///
    /// The batch is all or nothing: the first invalid task aborts
    /// registration and nothing from the batch is kept.
    pub fn register<S>(&mut self, specs: &[S], context: &S::Context) -> Result<()>
    where
        S: Spec<Task = T>,
    {
        let mut ids: HashSet<&str> = self.tasks.iter().map(|t| t.id()).collect();
        let mut validated = Vec::with_capacity(specs.len());

        for spec in specs {
            if !ids.insert(spec.id()) {
                return Err(Error::DuplicateTask(spec.id().to_string()));
            }
            let task = spec.validate(context).map_err(|reason| Error::InvalidTask {
                id: spec.id().to_string(),
                reason,
            })?;
            validated.push(Arc::new(task));
        }

        debug!(count = validated.len(), "Registered tasks");
        self.tasks.extend(validated);
        Ok(())
    }

    pub fn tasks(&self) -> impl Iterator<Item = &T> {
        self.tasks.iter().map(Arc::as_ref)
    }

    /// Run every (task, request) unit and gather the exchanges.
    pub async fn dispatch(&self) -> Union<T> {
        let results: Arc<Mutex<Vec<Vec<Exchange>>>> =
            Arc::new(Mutex::new(vec![Vec::new(); self.tasks.len()]));
        let limit = self.max_in_flight.map(|n| Arc::new(Semaphore::new(n)));
        let tracker = TaskTracker::new();

        for (slot, task) in self.tasks.iter().enumerate() {
            for request in 0..task.requests().len() {
                let task = Arc::clone(task);
                let results = Arc::clone(&results);
                let limit = limit.clone();
                let reporter = Arc::clone(&self.reporter);

                tracker.spawn(async move {
                    let _permit = match &limit {
                        Some(semaphore) => semaphore.acquire().await.ok(),
                        None => None,
                    };
                    let exchange = task.exchange(&task.requests()[request]).await;
                    reporter.exchange_completed(task.id(), &exchange);
                    results.lock()[slot].push(exchange);
                });
            }
        }
        tracker.close();
        trace!(units = tracker.len(), "Waiting for units");
        tracker.wait().await;

        let exchanges = std::mem::take(&mut *results.lock());
        Union {
            results: self
                .tasks
                .iter()
                .zip(exchanges)
                .map(|(task, exchanges)| TaskResult {
                    task: Arc::clone(task),
                    exchanges,
                })
                .collect(),
        }
    }
}

/// One task with the exchanges it produced.
#[derive(Debug)]
pub struct TaskResult<T> {
    pub task: Arc<T>,
    pub exchanges: Vec<Exchange>,
}

impl<T> TaskResult<T> {
    /// True when no exchange failed.
    pub fn is_success(&self) -> bool {
        self.exchanges.iter().all(|e| !e.is_error())
    }

    pub fn first_error(&self) -> Option<&Value> {
        self.exchanges.iter().find_map(Exchange::error_object)
    }
}

/// Results of one dispatch, in registration order.
///
/// Serializes as a map from task id to the task's settings plus its
/// `exchange` list.
#[derive(Debug)]
pub struct Union<T> {
    results: Vec<TaskResult<T>>,
}

impl<T: PollTask> Union<T> {
    pub fn get(&self, id: &str) -> Option<&TaskResult<T>> {
        self.results.iter().find(|r| r.task.id() == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaskResult<T>> {
        self.results.iter()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

#[derive(serde::Serialize)]
struct Entry<'a, T> {
    #[serde(flatten)]
    task: &'a T,
    exchange: &'a [Exchange],
}

impl<T: PollTask> Serialize for Union<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.results.len()))?;
        for result in &self.results {
            map.serialize_entry(
                result.task.id(),
                &Entry {
                    task: result.task.as_ref(),
                    exchange: &result.exchanges,
                },
            )?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{ErrorKind, ErrorObject};
    use crate::report::tests::Recorder;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Answers each request after the given delay; negative delays fail.
    #[derive(serde::Serialize)]
    struct Scripted {
        id: String,
        #[serde(skip)]
        delays: Vec<i64>,
        #[serde(skip)]
        running: Arc<AtomicUsize>,
        #[serde(skip)]
        peak: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl PollTask for Scripted {
        type Request = i64;

        fn id(&self) -> &str {
            &self.id
        }

        fn requests(&self) -> &[i64] {
            &self.delays
        }

        async fn exchange(&self, delay: &i64) -> Exchange {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(delay.unsigned_abs())).await;
            self.running.fetch_sub(1, Ordering::SeqCst);

            if *delay < 0 {
                Exchange::failure(json!(delay), ErrorObject::new(ErrorKind::NetworkError, "", "down"))
            } else {
                Exchange::success(json!(delay), json!({"slept": delay}))
            }
        }
    }

    struct ScriptedSpec(&'static str, Vec<i64>);

    #[derive(Default)]
    struct Counters {
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl Spec for ScriptedSpec {
        type Task = Scripted;
        type Context = Counters;

        fn id(&self) -> &str {
            self.0
        }

        fn validate(&self, counters: &Counters) -> std::result::Result<Scripted, TaskError> {
            if self.1.is_empty() {
                return Err(TaskError::NoRequests);
            }
            Ok(Scripted {
                id: self.0.to_string(),
                delays: self.1.clone(),
                running: Arc::clone(&counters.running),
                peak: Arc::clone(&counters.peak),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn one_exchange_per_request() {
        let mut dispatcher = Dispatcher::new();
        dispatcher
            .register(
                &[ScriptedSpec("a", vec![30, 10, 20]), ScriptedSpec("b", vec![5])],
                &Counters::default(),
            )
            .unwrap();

        let union = dispatcher.dispatch().await;
        assert_eq!(union.len(), 2);
        assert_eq!(union.get("a").unwrap().exchanges.len(), 3);
        assert_eq!(union.get("b").unwrap().exchanges.len(), 1);
        assert!(union.iter().all(TaskResult::is_success));
    }

    #[tokio::test(start_paused = true)]
    async fn failures_do_not_abort_siblings() {
        let recorder = Arc::new(Recorder::default());
        let mut dispatcher = Dispatcher::new().with_reporter(recorder.clone());
        dispatcher
            .register(
                &[ScriptedSpec("a", vec![10, -10]), ScriptedSpec("b", vec![20])],
                &Counters::default(),
            )
            .unwrap();

        let union = dispatcher.dispatch().await;
        let a = union.get("a").unwrap();
        assert!(!a.is_success());
        assert_eq!(a.exchanges.len(), 2);
        assert_eq!(a.first_error().unwrap()["error_type"], json!("NetworkError"));
        assert!(union.get("b").unwrap().is_success());

        let mut events = recorder.events();
        events.sort();
        assert_eq!(events, ["exchange a failed", "exchange a ok", "exchange b ok"]);
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_cap() {
        let counters = Counters::default();
        let peak = Arc::clone(&counters.peak);
        let mut dispatcher = Dispatcher::new().with_max_in_flight(Some(2));
        dispatcher
            .register(
                &[ScriptedSpec("a", vec![10; 4]), ScriptedSpec("b", vec![10; 4])],
                &counters,
            )
            .unwrap();

        let union = dispatcher.dispatch().await;
        assert_eq!(union.iter().map(|r| r.exchanges.len()).sum::<usize>(), 8);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_by_default() {
        let counters = Counters::default();
        let peak = Arc::clone(&counters.peak);
        let mut dispatcher = Dispatcher::new();
        dispatcher
            .register(&[ScriptedSpec("a", vec![10; 5])], &counters)
            .unwrap();

        dispatcher.dispatch().await;
        assert_eq!(peak.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn invalid_task_rejects_whole_batch() {
        let mut dispatcher = Dispatcher::new();
        let err = dispatcher
            .register(
                &[ScriptedSpec("a", vec![1]), ScriptedSpec("b", vec![])],
                &Counters::default(),
            )
            .unwrap_err();

        assert_eq!(err.to_string(), "task 'b' error in settings (no requests given)");
        assert_eq!(dispatcher.tasks().count(), 0);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut dispatcher = Dispatcher::new();
        dispatcher
            .register(&[ScriptedSpec("a", vec![1])], &Counters::default())
            .unwrap();
        let err = dispatcher
            .register(&[ScriptedSpec("a", vec![2])], &Counters::default())
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateTask(id) if id == "a"));
    }

    #[tokio::test(start_paused = true)]
    async fn union_serializes_by_task_id() {
        let mut dispatcher = Dispatcher::new();
        dispatcher
            .register(&[ScriptedSpec("rig", vec![1])], &Counters::default())
            .unwrap();

        let union = dispatcher.dispatch().await;
        assert_eq!(
            serde_json::to_value(&union).unwrap(),
            json!({
                "rig": {
                    "id": "rig",
                    "exchange": [{"request": 1, "response": {"slept": 1}, "error": false}],
                }
            })
        );
    }
}
