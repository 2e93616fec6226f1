//! Scenarios, one per observable port guarantee

use crate::fixtures::{calculator, Add, Envelope, RunLog, Work};
use crate::framework::{TestFramework, TestMetrics, TestResult, TestScenario, ValidationResult};
use anyhow::{Context, Result};
use futures::future::join_all;
use port_actors::{PortError, PortState};
use port_catalog::{CatalogClient, CatalogEntry, CatalogService};
use port_config::CatalogSettings;
use port_network::ActorUri;
use port_types::ErrorCode;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// N requests in flight at once, answered out of order
pub struct CorrelationTest {
    pub requests: usize,
}

#[async_trait::async_trait]
impl TestScenario for CorrelationTest {
    async fn execute(&self, framework: &TestFramework) -> Result<TestResult> {
        let start = Instant::now();
        let service = calculator("correlation", true, RunLog::default())?;
        let target = framework.open(&service).await?;
        let proxy = framework.connect("correlation-client", target).await?;

        let mut pending = Vec::with_capacity(self.requests);
        for i in 0..self.requests {
            // later requests finish first
            let delay_ms = ((self.requests - i) * 5) as u32;
            let op = proxy
                .send_request::<Add, i64>(
                    "",
                    Add {
                        a: i as i64,
                        b: 1_000,
                        delay_ms,
                    },
                )
                .await?;
            pending.push((i as i64, op));
        }
        let ids: HashSet<u32> = pending.iter().map(|(_, op)| op.request_id()).collect();
        let in_flight = proxy.pending_count();

        let results = join_all(
            pending
                .into_iter()
                .map(|(i, op)| async move { (i, op.await) }),
        )
        .await;
        let matched = results
            .iter()
            .filter(|(i, result)| matches!(result, Ok(sum) if *sum == i + 1_000))
            .count();
        let errors = results.iter().filter(|(_, result)| result.is_err()).count();
        let leftover = proxy.pending_count();

        proxy.disconnect().await;
        service.disconnect().await;

        let n = self.requests;
        Ok(TestResult::from_validations(
            self.name(),
            framework.transport(),
            TestMetrics {
                requests_sent: n as u64,
                responses_received: matched as u64,
                errors_received: errors as u64,
                elapsed_ms: elapsed_ms(start),
            },
            vec![
                ValidationResult::check("unique_request_ids", ids.len() == n, format!("{} distinct ids for {n} requests", ids.len())),
                ValidationResult::check("all_in_flight", in_flight == n, format!("{in_flight} pending before any answer was read")),
                ValidationResult::check("matched_exactly_once", matched == n, format!("{matched}/{n} answers matched their request")),
                ValidationResult::check("table_drained", leftover == 0, format!("{leftover} entries left")),
            ],
        ))
    }

    fn name(&self) -> &str {
        "correlation"
    }

    fn description(&self) -> &str {
        "Concurrent requests resolve to their own answers regardless of arrival order"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(10)
    }
}

/// Disconnect with K requests outstanding
pub struct DisconnectTest {
    pub outstanding: usize,
}

#[async_trait::async_trait]
impl TestScenario for DisconnectTest {
    async fn execute(&self, framework: &TestFramework) -> Result<TestResult> {
        let start = Instant::now();
        let service = calculator("disconnect", false, RunLog::default())?;
        let target = framework.open(&service).await?;
        let proxy = framework.connect("disconnect-client", target).await?;

        let mut pending = Vec::with_capacity(self.outstanding);
        for tag in 0..self.outstanding {
            pending.push(
                proxy
                    .send_request::<Work, u32>("", Work { tag: tag as u32, ms: 200 })
                    .await?,
            );
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        proxy.disconnect().await;

        let results = join_all(pending).await;
        let closed = results
            .iter()
            .filter(|result| matches!(result, Err(PortError::ConnectionClosed)))
            .count();
        let leftover = proxy.pending_count();
        let state = proxy.state();
        service.disconnect().await;

        let k = self.outstanding;
        Ok(TestResult::from_validations(
            self.name(),
            framework.transport(),
            TestMetrics {
                requests_sent: k as u64,
                responses_received: 0,
                errors_received: closed as u64,
                elapsed_ms: elapsed_ms(start),
            },
            vec![
                ValidationResult::check("all_connection_closed", closed == k, format!("{closed}/{k} failed with connection closed")),
                ValidationResult::check("table_empty", leftover == 0, format!("{leftover} entries left")),
                ValidationResult::check("state_disconnected", state == PortState::Disconnected, format!("state {state}")),
            ],
        ))
    }

    fn name(&self) -> &str {
        "disconnect_pending"
    }

    fn description(&self) -> &str {
        "Disconnect fails every outstanding request and empties the correlation table"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(10)
    }
}

/// Handler scheduling of sequential versus multithreaded services
pub struct SchedulingTest {
    pub multithreaded: bool,
    pub requests: u32,
    pub handler_ms: u32,
}

#[async_trait::async_trait]
impl TestScenario for SchedulingTest {
    async fn execute(&self, framework: &TestFramework) -> Result<TestResult> {
        let log = RunLog::default();
        let name = if self.multithreaded { "scheduling-mt" } else { "scheduling-seq" };
        let service = calculator(name, self.multithreaded, log.clone())?;
        let target = framework.open(&service).await?;
        let proxy = framework.connect(&format!("{name}-client"), target).await?;

        let start = Instant::now();
        let mut pending = Vec::new();
        for tag in 0..self.requests {
            pending.push(
                proxy
                    .send_request::<Work, u32>("", Work { tag, ms: self.handler_ms })
                    .await?,
            );
        }
        let results = join_all(pending).await;
        let elapsed = start.elapsed();
        let answered = results.iter().filter(|result| result.is_ok()).count();

        proxy.disconnect().await;
        service.disconnect().await;

        let serial = Duration::from_millis(u64::from(self.requests * self.handler_ms));
        let mut runs = log.runs();
        runs.sort_by_key(|run| run.started);
        let run_order: Vec<u32> = runs.iter().map(|run| run.tag).collect();
        let in_order = run_order == (0..self.requests).collect::<Vec<_>>();

        let mut validations = vec![ValidationResult::check(
            "all_answered",
            answered == self.requests as usize,
            format!("{answered}/{} answered", self.requests),
        )];
        if self.multithreaded {
            validations.push(ValidationResult::check(
                "interleaved",
                elapsed < serial / 2,
                format!("{elapsed:?} for work that takes {serial:?} serially"),
            ));
            validations.push(ValidationResult::check(
                "handlers_overlap",
                log.overlapped(),
                "handlers ran concurrently",
            ));
        } else {
            validations.push(ValidationResult::check(
                "serialized",
                elapsed >= serial.mul_f64(0.9),
                format!("{elapsed:?} for work that takes {serial:?} serially"),
            ));
            validations.push(ValidationResult::check(
                "one_at_a_time",
                !log.overlapped(),
                "no two handlers ran at once",
            ));
            validations.push(ValidationResult::check(
                "arrival_order",
                in_order,
                format!("run order {run_order:?}"),
            ));
        }

        Ok(TestResult::from_validations(
            self.name(),
            framework.transport(),
            TestMetrics {
                requests_sent: u64::from(self.requests),
                responses_received: answered as u64,
                errors_received: (results.len() - answered) as u64,
                elapsed_ms: elapsed.as_millis() as u64,
            },
            validations,
        ))
    }

    fn name(&self) -> &str {
        if self.multithreaded {
            "scheduling_multithreaded"
        } else {
            "scheduling_sequential"
        }
    }

    fn description(&self) -> &str {
        "Sequential services run one handler at a time; multithreaded ones interleave"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(20)
    }
}

/// A structured payload survives the trip and a wrong type is reported
pub struct RoundTripTest;

#[async_trait::async_trait]
impl TestScenario for RoundTripTest {
    async fn execute(&self, framework: &TestFramework) -> Result<TestResult> {
        let start = Instant::now();
        let service = calculator("round-trip", false, RunLog::default())?;
        let target = framework.open(&service).await?;
        let proxy = framework.connect("round-trip-client", target).await?;

        let original = Envelope {
            id: 7,
            label: "settlement".into(),
            note: Some("eod".into()),
            tags: vec!["eu".into(), "t+1".into()],
            ratio: 0.25,
        };
        let echoed: Envelope = proxy.request("echo", original.clone()).await?;
        let wrong = proxy
            .request::<Envelope, String>("echo", original.clone())
            .await;
        let unknown = proxy.call::<String, String>("no handler".into()).await;
        let state = proxy.state();

        proxy.disconnect().await;
        service.disconnect().await;

        Ok(TestResult::from_validations(
            self.name(),
            framework.transport(),
            TestMetrics {
                requests_sent: 3,
                responses_received: 1,
                errors_received: 2,
                elapsed_ms: elapsed_ms(start),
            },
            vec![
                ValidationResult::check("payload_equal", echoed == original, format!("{echoed:?}")),
                ValidationResult::check(
                    "type_mismatch_reported",
                    matches!(wrong, Err(PortError::TypeMismatch { .. })),
                    format!("{wrong:?}"),
                ),
                ValidationResult::check(
                    "not_implemented_reported",
                    matches!(&unknown, Err(err) if err.remote_code() == Some(ErrorCode::NotImplemented)),
                    format!("{unknown:?}"),
                ),
                ValidationResult::check("connection_intact", state == PortState::Ok, format!("state {state}")),
            ],
        ))
    }

    fn name(&self) -> &str {
        "round_trip"
    }

    fn description(&self) -> &str {
        "Typed payloads round-trip intact; mismatches surface as typed errors"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(5)
    }
}

/// Publish, resolve and unpublish through a catalog on the run's transport
pub struct CatalogTest;

#[async_trait::async_trait]
impl TestScenario for CatalogTest {
    async fn execute(&self, framework: &TestFramework) -> Result<TestResult> {
        let start = Instant::now();
        let catalog = CatalogService::new("catalog", &CatalogSettings::default())?;
        let target = framework.open(catalog.port()).await?;
        let client = CatalogClient::new("catalog-client");
        client.connect(target).await?;

        let address = framework.service_address("pricing")?.with_port(7000);
        client.publish(CatalogEntry::new("pricing", &address)).await?;
        let resolved = client.resolve("pricing").await?;
        client.unpublish("pricing").await?;
        let after = client.resolve("pricing").await?;

        client.disconnect().await;
        catalog.disconnect().await;

        let expected = address.to_string();
        Ok(TestResult::from_validations(
            self.name(),
            framework.transport(),
            TestMetrics {
                requests_sent: 4,
                responses_received: 4,
                errors_received: 0,
                elapsed_ms: elapsed_ms(start),
            },
            vec![
                ValidationResult::check(
                    "resolves_current_uri",
                    resolved.as_ref().map(|entry| entry.uri.as_str()) == Some(expected.as_str()),
                    format!("{resolved:?}"),
                ),
                ValidationResult::check("not_found_after_unpublish", after.is_none(), format!("{after:?}")),
            ],
        ))
    }

    fn name(&self) -> &str {
        "catalog"
    }

    fn description(&self) -> &str {
        "A published name resolves to its uri until unpublished"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(5)
    }
}

/// Malformed JSON-RPC frame with a readable id, sent over a raw socket
///
/// Always runs over `jsonrpc://` regardless of the configured transport.
pub struct DecodeFailureTest;

async fn write_frame(stream: &mut TcpStream, data: &[u8]) -> Result<()> {
    stream.write_all(&(data.len() as u32).to_be_bytes()).await?;
    stream.write_all(data).await?;
    Ok(())
}

async fn read_frame(stream: &mut TcpStream) -> Result<Vec<u8>> {
    let mut len = [0u8; 4];
    stream.read_exact(&mut len).await?;
    let mut body = vec![0u8; u32::from_be_bytes(len) as usize];
    stream.read_exact(&mut body).await?;
    Ok(body)
}

#[async_trait::async_trait]
impl TestScenario for DecodeFailureTest {
    async fn execute(&self, framework: &TestFramework) -> Result<TestResult> {
        let start = Instant::now();
        let service = calculator("decode-failure", false, RunLog::default())?;
        let requested = ActorUri::parse(&format!(
            "jsonrpc://127.0.0.1:0/e2e-{}/decode-failure",
            framework.test_id().simple()
        ))?;
        let bound = service.open(&requested).await?;

        let mut stream = TcpStream::connect(("127.0.0.1", bound.port()))
            .await
            .context("raw connect")?;
        write_frame(&mut stream, format!("PORT/1 {}", bound.path()).as_bytes()).await?;
        let hello = read_frame(&mut stream).await?;

        // valid JSON, readable id, unsupported protocol version
        write_frame(&mut stream, br#"{"jsonrpc":"1.0","id":78,"method":"echo","params":1}"#).await?;
        let first: serde_json::Value = serde_json::from_slice(&read_frame(&mut stream).await?)?;

        write_frame(
            &mut stream,
            br#"{"jsonrpc":"2.0","id":79,"method":"echo","params":{"id":1,"label":"x","note":null,"tags":[],"ratio":1.5},"type":"Envelope"}"#,
        )
        .await?;
        let second: serde_json::Value = serde_json::from_slice(&read_frame(&mut stream).await?)?;

        drop(stream);
        service.disconnect().await;

        Ok(TestResult::from_validations(
            self.name(),
            framework.transport(),
            TestMetrics {
                requests_sent: 2,
                responses_received: 1,
                errors_received: 1,
                elapsed_ms: elapsed_ms(start),
            },
            vec![
                ValidationResult::check("handshake", hello == b"OK", String::from_utf8_lossy(&hello)),
                ValidationResult::check(
                    "error_to_origin",
                    first["id"] == 78
                        && first["error"]["data"]["code"] == ErrorCode::DecodeFailure.as_u16(),
                    first.to_string(),
                ),
                ValidationResult::check(
                    "exactly_one_error",
                    second["id"] == 79,
                    second.to_string(),
                ),
                ValidationResult::check(
                    "connection_kept",
                    second["result"]["label"] == "x",
                    second.to_string(),
                ),
            ],
        ))
    }

    fn name(&self) -> &str {
        "decode_failure"
    }

    fn description(&self) -> &str {
        "A recoverable decode failure is answered once and leaves the connection usable"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(5)
    }
}

/// Every scenario with its default parameters
pub fn all_scenarios() -> Vec<Box<dyn TestScenario>> {
    vec![
        Box::new(CorrelationTest { requests: 50 }),
        Box::new(DisconnectTest { outstanding: 8 }),
        Box::new(SchedulingTest {
            multithreaded: false,
            requests: 10,
            handler_ms: 10,
        }),
        Box::new(SchedulingTest {
            multithreaded: true,
            requests: 10,
            handler_ms: 100,
        }),
        Box::new(RoundTripTest),
        Box::new(CatalogTest),
        Box::new(DecodeFailureTest),
    ]
}
