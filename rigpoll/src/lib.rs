//! Poll mining rigs and pools, and normalize what they report.
//!
//! A poll runs in three stages:
//!
//! 1. A batch of task specifications is validated and registered with a
//!    [`dispatch::Dispatcher`]. Nothing touches the network until the whole
//!    batch is known to be valid.
//! 2. [`dispatch::Dispatcher::dispatch`] runs one concurrent exchange per
//!    (task, request) pair and gathers the results into a
//!    [`dispatch::Union`].
//! 3. The [`normalize`] passes reshape the union into table rows for display
//!    or metric batches for a [`zabbix`] sink.

pub mod config;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod exchange;
pub mod miner;
pub mod normalize;
pub mod pool;
pub mod record;
pub mod report;
pub mod schema;
pub mod tracing;
pub mod vendor;
pub mod zabbix;
