//! Pool HTTP APIs: supported operations and how their URLs are built.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::TaskError;

/// Supported pool APIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
pub enum PoolKind {
    NanoPool,
    FlyPool,
}

/// Accepted values of the `hours` argument.
pub const HOURS: [u32; 5] = [1, 3, 6, 12, 24];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Arg {
    Rejected,
    Optional,
    Required,
}

#[derive(Debug)]
struct Operation {
    name: &'static str,
    segment: &'static str,
    worker: Arg,
    hours: Arg,
}

const fn op(name: &'static str, segment: &'static str, worker: Arg, hours: Arg) -> Operation {
    Operation {
        name,
        segment,
        worker,
        hours,
    }
}

use Arg::{Optional, Rejected, Required};

const NANOPOOL: &[Operation] = &[
    op("getMinerAccountBalance", "balance", Rejected, Rejected),
    op("getMinerCheckMinerAccount", "accountexist", Rejected, Rejected),
    op("getMinerCurrentHashrate", "hashrate", Rejected, Rejected),
    op("getMinerGeneralInfo", "user", Rejected, Rejected),
    op("getMinerHashrateAndBalance", "balance_hashrate", Rejected, Rejected),
    op("getMinerListOfWorker", "workers", Rejected, Rejected),
    op("getMinerPayments", "payments", Rejected, Rejected),
    op("getMinerPaymentsDay", "paymentsday", Rejected, Rejected),
    op("getMinerWorkersLastReportedHashrate", "reportedhashrates", Rejected, Rejected),
    op("getUserSettings", "usersettings", Rejected, Rejected),
    op("getMinerAverageHashrates", "avghashrate", Rejected, Rejected),
    op("getMinerChartData", "hashratechart", Rejected, Rejected),
    op("getMinerHashrateHistory", "history", Rejected, Rejected),
    op("getMinerLastReportedHashrateForAccount", "reportedhashrate", Rejected, Rejected),
    op("getMinerShareRateHistory", "shareratehistory", Rejected, Rejected),
    op("getMinerWorkersAverageHashrates", "avghashrateworkers", Rejected, Rejected),
    op("getMinerAverageHashrate", "avghashratelimited", Rejected, Required),
    op("getMinerWorkersAverageHashrate", "avghashrateworkers", Rejected, Required),
    op("getWorkerCurrentHashrate", "hashrate", Optional, Rejected),
    op("getWorkerAverageHashrates", "avghashrate", Optional, Rejected),
    op("getWorkerChartData", "hashratechart", Optional, Rejected),
    op("getWorkerHashrateHistory", "history", Optional, Rejected),
    op("getWorkerLastReportedHashrateForWorker", "reportedhashrate", Optional, Rejected),
    op("getWorkerShareRateHistory", "shareratehistory", Optional, Rejected),
    op("getWorkerAverageHashrate", "avghashratelimited", Optional, Required),
];

// FlyPool segments may contain a `{worker}` placeholder.
const FLYPOOL: &[Operation] = &[
    op("getMinerDashboard", "dashboard", Rejected, Rejected),
    op("getMinerHistory", "history", Rejected, Rejected),
    op("getMinerPayouts", "payouts", Rejected, Rejected),
    op("getMinerSettings", "settings", Rejected, Rejected),
    op("getMinerStatistics", "currentStats", Rejected, Rejected),
    op("getWorkerAllStatistics", "workers", Rejected, Rejected),
    op("getWorkerWorkerMonitoring", "workers/monitor", Rejected, Rejected),
    op("getWorkerIndividualHistoricalStatistics", "worker/{worker}/history", Required, Rejected),
    op("getWorkerIndividualStatistics", "worker/{worker}/currentStats", Required, Rejected),
];

/// Optional arguments of a pool query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryArgs {
    #[serde(default)]
    pub worker: Option<String>,
    #[serde(default)]
    pub hours: Option<u32>,
}

impl PoolKind {
    pub fn default_host(self) -> &'static str {
        match self {
            PoolKind::NanoPool => "api.nanopool.org",
            PoolKind::FlyPool => "api-zcash.flypool.org",
        }
    }

    pub fn operations(self) -> impl Iterator<Item = &'static str> {
        self.table().iter().map(|o| o.name)
    }

    fn table(self) -> &'static [Operation] {
        match self {
            PoolKind::NanoPool => NANOPOOL,
            PoolKind::FlyPool => FLYPOOL,
        }
    }

    /// Coin path segment. FlyPool serves a single coin per host.
    fn coin_segment(self, coin: Option<&str>) -> Result<Option<&'static str>, TaskError> {
        match (self, coin) {
            (PoolKind::FlyPool, _) => Ok(None),
            (PoolKind::NanoPool, Some("Etherium")) => Ok(Some("eth")),
            (PoolKind::NanoPool, Some("Monero")) => Ok(Some("xmr")),
            (PoolKind::NanoPool, other) => Err(TaskError::UnknownCoin {
                pool: self.to_string(),
                coin: other.unwrap_or_default().to_string(),
            }),
        }
    }

    /// Build the request path of `query`, checking its arguments.
    pub fn path(
        self,
        coin: Option<&str>,
        account: &str,
        query: &str,
        args: &QueryArgs,
    ) -> Result<String, TaskError> {
        if account.trim().is_empty() || account.contains('/') {
            return Err(TaskError::InvalidAccount(account.to_string()));
        }
        let operation = self
            .table()
            .iter()
            .find(|o| o.name == query)
            .ok_or_else(|| TaskError::UnknownQuery {
                pool: self.to_string(),
                query: query.to_string(),
            })?;
        let coin = self.coin_segment(coin)?;

        let worker = check(query, "worker", operation.worker, args.worker.as_deref())?;
        if let Some(hours) = args.hours {
            if !HOURS.contains(&hours) {
                return Err(TaskError::InvalidHours(hours));
            }
        }
        let hours = check(query, "hours", operation.hours, args.hours)?;

        Ok(match self {
            PoolKind::NanoPool => {
                let mut path = format!(
                    "/v1/{}/{}/{}",
                    coin.unwrap_or_default(),
                    operation.segment,
                    account
                );
                if let Some(worker) = worker {
                    path.push('/');
                    path.push_str(worker);
                }
                if let Some(hours) = hours {
                    path.push_str(&format!("/{}", hours));
                }
                path
            }
            PoolKind::FlyPool => {
                let segment = match worker {
                    Some(worker) => operation.segment.replace("{worker}", worker),
                    None => operation.segment.to_string(),
                };
                format!("/miner/{}/{}", account, segment)
            }
        })
    }
}

fn check<T>(query: &str, name: &'static str, arg: Arg, value: Option<T>) -> Result<Option<T>, TaskError> {
    match (arg, value) {
        (Arg::Rejected, Some(_)) => Err(TaskError::UnexpectedArgument {
            query: query.to_string(),
            argument: name,
        }),
        (Arg::Required, None) => Err(TaskError::MissingArgument {
            query: query.to_string(),
            argument: name,
        }),
        (_, value) => Ok(value),
    }
}
