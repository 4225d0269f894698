//! Zabbix sender protocol client.
//!
//! Each batch travels on its own connection: a `ZBXD\x01` header, the body
//! length as a little-endian u64, then a JSON `sender data` request. The
//! server answers with the same framing.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::record::{Metric, MetricBatch};
use crate::report::Reporter;
use crate::tracing::prelude::*;

const HEADER: &[u8; 5] = b"ZBXD\x01";

/// Upper bound on a reply body; replies are a few dozen bytes.
const MAX_REPLY: u64 = 1 << 20;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("invalid reply: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SinkError>;

#[derive(Serialize)]
struct Item<'a> {
    host: &'a str,
    key: &'a str,
    value: String,
}

#[derive(Serialize)]
struct Request<'a> {
    request: &'static str,
    data: Vec<Item<'a>>,
}

/// Server reply to a `sender data` request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Reply {
    pub response: String,
    #[serde(default)]
    pub info: String,
}

impl Reply {
    pub fn is_success(&self) -> bool {
        self.response == "success"
    }
}

fn encode(metrics: &[Metric]) -> Result<Vec<u8>> {
    let request = Request {
        request: "sender data",
        data: metrics
            .iter()
            .map(|m| Item {
                host: &m.host,
                key: &m.key,
                value: m.value.to_string(),
            })
            .collect(),
    };
    let body = serde_json::to_vec(&request)?;

    let mut packet = Vec::with_capacity(HEADER.len() + 8 + body.len());
    packet.extend_from_slice(HEADER);
    packet.extend_from_slice(&(body.len() as u64).to_le_bytes());
    packet.extend_from_slice(&body);
    Ok(packet)
}

async fn read_reply(stream: &mut TcpStream) -> Result<Reply> {
    let mut header = [0u8; 13];
    stream.read_exact(&mut header).await?;
    if &header[..5] != HEADER {
        return Err(SinkError::Protocol(format!(
            "unexpected header {:?}",
            String::from_utf8_lossy(&header[..5])
        )));
    }
    let mut length = [0u8; 8];
    length.copy_from_slice(&header[5..]);
    let length = u64::from_le_bytes(length);
    if length > MAX_REPLY {
        return Err(SinkError::Protocol(format!("reply of {} bytes", length)));
    }

    let mut body = vec![0u8; length as usize];
    stream.read_exact(&mut body).await?;
    Ok(serde_json::from_slice(&body)?)
}

/// Client for one Zabbix server or proxy.
#[derive(Debug, Clone)]
pub struct Sender {
    server: SocketAddr,
    timeout: Duration,
}

impl Sender {
    pub fn new(server: SocketAddr, timeout: Duration) -> Self {
        Self { server, timeout }
    }

    pub fn server(&self) -> SocketAddr {
        self.server
    }

    /// Push `metrics` in one packet and return the server's reply.
    pub async fn send(&self, metrics: &[Metric]) -> Result<Reply> {
        let packet = encode(metrics)?;
        let exchange = async {
            let mut stream = TcpStream::connect(self.server).await?;
            stream.write_all(&packet).await?;
            read_reply(&mut stream).await
        };
        timeout(self.timeout, exchange)
            .await
            .map_err(|_| SinkError::Timeout(self.timeout))?
    }

    /// Push every batch on its own connection.
    ///
    /// Stops at the first batch that cannot be delivered. Returns the number
    /// of batches the server accepted.
    pub async fn send_all(&self, batches: &[MetricBatch], reporter: &dyn Reporter) -> usize {
        let sink = self.server.to_string();
        let mut accepted = 0;

        for batch in batches.iter().filter(|b| !b.metrics.is_empty()) {
            debug!(task = %batch.task, metrics = batch.metrics.len(), "Sending batch");
            match self.send(&batch.metrics).await {
                Ok(reply) if reply.is_success() => {
                    reporter.batch_sent(&batch.task, &sink, &reply.info);
                    accepted += 1;
                }
                Ok(reply) => {
                    let reason = format!("{}: {}", reply.response, reply.info);
                    reporter.batch_failed(&batch.task, &sink, &reason);
                }
                Err(e) => {
                    reporter.batch_failed(&batch.task, &sink, &e.to_string());
                    break;
                }
            }
        }
        accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::tests::Recorder;
    use serde_json::{json, Value};
    use tokio::net::TcpListener;

    /// Fake server: decodes each packet, answers with the next canned reply.
    async fn fake_server(replies: Vec<&'static str>) -> (SocketAddr, tokio::task::JoinHandle<Vec<Value>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let mut received = Vec::new();
            for reply in replies {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut header = [0u8; 13];
                socket.read_exact(&mut header).await.unwrap();
                assert_eq!(&header[..5], HEADER);
                let length = u64::from_le_bytes(header[5..].try_into().unwrap());
                let mut body = vec![0u8; length as usize];
                socket.read_exact(&mut body).await.unwrap();
                received.push(serde_json::from_slice(&body).unwrap());

                let mut packet = HEADER.to_vec();
                packet.extend_from_slice(&(reply.len() as u64).to_le_bytes());
                packet.extend_from_slice(reply.as_bytes());
                socket.write_all(&packet).await.unwrap();
            }
            received
        });
        (addr, handle)
    }

    const SUCCESS: &str = r#"{"response":"success","info":"processed: 2; failed: 0; total: 2; seconds spent: 0.000055"}"#;

    fn batch(task: &str, metrics: Vec<Metric>) -> MetricBatch {
        MetricBatch {
            task: task.into(),
            metrics,
        }
    }

    #[test]
    fn packet_layout() {
        let packet = encode(&[Metric::new("rig", "miner.status", 1i64)]).unwrap();
        let body = br#"{"request":"sender data","data":[{"host":"rig","key":"miner.status","value":"1"}]}"#;
        assert_eq!(&packet[..5], b"ZBXD\x01");
        assert_eq!(packet[5..13], (body.len() as u64).to_le_bytes());
        assert_eq!(&packet[13..], &body[..]);
    }

    #[tokio::test]
    async fn values_travel_as_text() {
        let (addr, server) = fake_server(vec![SUCCESS]).await;
        let sender = Sender::new(addr, Duration::from_secs(2));

        let reply = sender
            .send(&[
                Metric::new("rig", "miner.temp[0]", 63i64),
                Metric::new("rig", "miner.hashrate", 2.0),
            ])
            .await
            .unwrap();
        assert!(reply.is_success());

        let received = server.await.unwrap();
        assert_eq!(
            received[0],
            json!({
                "request": "sender data",
                "data": [
                    {"host": "rig", "key": "miner.temp[0]", "value": "63"},
                    {"host": "rig", "key": "miner.hashrate", "value": "2.0"},
                ]
            })
        );
    }

    #[tokio::test]
    async fn rejected_batch_does_not_stop_the_rest() {
        let (addr, server) = fake_server(vec![r#"{"response":"failed","info":"bad data"}"#, SUCCESS]).await;
        let sender = Sender::new(addr, Duration::from_secs(2));
        let recorder = Recorder::default();

        let accepted = sender
            .send_all(
                &[
                    batch("a", vec![Metric::new("a", "miner.status", 1i64)]),
                    batch("empty", vec![]),
                    batch("b", vec![Metric::new("b", "miner.status", 0i64)]),
                ],
                &recorder,
            )
            .await;

        assert_eq!(accepted, 1);
        assert_eq!(recorder.events(), ["failed a", "sent b"]);
        assert_eq!(server.await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn stops_at_first_network_failure() {
        let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
        let sender = Sender::new(closed, Duration::from_secs(2));
        let recorder = Recorder::default();

        let accepted = sender
            .send_all(
                &[
                    batch("a", vec![Metric::new("a", "miner.status", 1i64)]),
                    batch("b", vec![Metric::new("b", "miner.status", 1i64)]),
                ],
                &recorder,
            )
            .await;

        assert_eq!(accepted, 0);
        assert_eq!(recorder.events(), ["failed a"]);
    }

    #[tokio::test]
    async fn bad_header_is_a_protocol_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 256];
            let _ = socket.read(&mut buf).await;
            let _ = socket.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n").await;
        });

        let err = Sender::new(addr, Duration::from_secs(2))
            .send(&[Metric::new("a", "miner.status", 1i64)])
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::Protocol(_)));
    }
}
