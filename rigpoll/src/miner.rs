//! Miner tasks: raw TCP polling of rig firmware.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::UtcOffset;

use crate::device::{AddressPolicy, Device};
use crate::dispatch::{PollTask, Spec};
use crate::error::TaskError;
use crate::exchange::{request_value, ErrorKind, ErrorObject, Exchange};
use crate::normalize::Present;
use crate::record::{Metric, Record};
use crate::vendor::{RequestTemplate, ShapingError, Vendor};

fn default_timeout() -> i64 {
    5
}

/// One or several request names.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RequestNames {
    One(String),
    Many(Vec<String>),
}

impl RequestNames {
    pub fn names(&self) -> Vec<&str> {
        match self {
            RequestNames::One(name) => vec![name.as_str()],
            RequestNames::Many(names) => names.iter().map(String::as_str).collect(),
        }
    }
}

/// A miner as configured, before validation.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MinerSpec {
    pub id: String,
    pub host: String,
    /// Vendor default when absent.
    #[serde(default)]
    pub port: Option<i64>,
    #[serde(rename = "miner")]
    pub vendor: String,
    #[serde(default = "default_timeout")]
    pub timeout: i64,
    pub request: RequestNames,
    #[serde(default)]
    pub description: Option<String>,
}

impl Spec for MinerSpec {
    type Task = MinerTask;
    type Context = AddressPolicy;

    fn id(&self) -> &str {
        &self.id
    }

    fn validate(&self, policy: &AddressPolicy) -> Result<MinerTask, TaskError> {
        let vendor = Vendor::from_str(&self.vendor)
            .map_err(|_| TaskError::UnknownVendor(self.vendor.clone()))?;
        let port = self.port.unwrap_or(i64::from(vendor.default_port()));
        let device = Device::new(&self.host, port, self.timeout, *policy)?;

        let names = self.request.names();
        if names.is_empty() {
            return Err(TaskError::NoRequests);
        }
        let requests = names
            .into_iter()
            .map(|name| vendor.request_for(name))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(MinerTask {
            id: self.id.clone(),
            device,
            vendor,
            requests,
            description: self.description.clone(),
        })
    }
}

/// A validated miner.
#[derive(Debug)]
pub struct MinerTask {
    id: String,
    device: Device,
    vendor: Vendor,
    requests: Vec<&'static RequestTemplate>,
    description: Option<String>,
}

impl MinerTask {
    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn vendor(&self) -> Vendor {
        self.vendor
    }
}

impl Serialize for MinerTask {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Settings<'a> {
            host: String,
            port: u16,
            miner: Vendor,
            #[serde(skip_serializing_if = "Option::is_none")]
            description: Option<&'a str>,
        }

        Settings {
            host: self.device.address().to_string(),
            port: self.device.port(),
            miner: self.vendor,
            description: self.description.as_deref(),
        }
        .serialize(serializer)
    }
}

#[async_trait::async_trait]
impl PollTask for MinerTask {
    type Request = &'static RequestTemplate;

    fn id(&self) -> &str {
        &self.id
    }

    fn requests(&self) -> &[&'static RequestTemplate] {
        &self.requests
    }

    async fn exchange(&self, template: &&'static RequestTemplate) -> Exchange {
        let request = request_value(template.payload);
        match self.device.exchange(template.payload).await {
            Ok(raw) => match self.vendor.validate(template, &raw) {
                Ok(response) => Exchange::success(request, response),
                Err(error) => Exchange::failure(request, error),
            },
            Err(e) => Exchange::failure(
                request,
                ErrorObject::new(ErrorKind::NetworkError, "", e.to_string()),
            ),
        }
    }
}

impl Present for MinerTask {
    fn group(&self) -> String {
        self.vendor.to_string()
    }

    fn label(&self) -> String {
        format!("{} - {}:{}", self.id, self.device.address(), self.device.port())
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn table(&self, exchanges: &[Exchange], offset: UtcOffset) -> Result<Record, ShapingError> {
        self.vendor.table(exchanges, offset)
    }

    fn metrics(&self, exchanges: &[Exchange]) -> Result<Vec<Metric>, ShapingError> {
        self.vendor.metrics(&self.id, exchanges)
    }

    fn down(&self) -> Vec<Metric> {
        vec![Metric::new(self.id.as_str(), "miner.status", 0i64)]
    }
}
