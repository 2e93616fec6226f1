//! Core E2E testing framework

use anyhow::Result;
use port_actors::{LinkTarget, ProxyPort, ServicePort};
use port_network::ActorUri;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Scenario runner; owns the address space ports of one run are opened in
pub struct TestFramework {
    config: TestConfig,
    test_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestConfig {
    /// Per-scenario timeout in seconds, unless the scenario asks for less
    pub timeout_secs: u64,

    /// Transport services are opened on
    pub transport: Transport,

    /// Disconnect every port after each scenario
    pub cleanup: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transport {
    /// In-process link, no serialization
    Local,
    /// TCP with the binary block format
    Tcp,
    /// TCP with JSON-RPC frames
    JsonRpc,
}

impl Transport {
    pub const ALL: [Transport; 3] = [Transport::Local, Transport::Tcp, Transport::JsonRpc];

    pub fn scheme(self) -> &'static str {
        match self {
            Transport::Local => "local",
            Transport::Tcp => "tcp",
            Transport::JsonRpc => "jsonrpc",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

impl FromStr for Transport {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "local" => Ok(Transport::Local),
            "tcp" => Ok(Transport::Tcp),
            "jsonrpc" => Ok(Transport::JsonRpc),
            other => anyhow::bail!("unknown transport '{other}'"),
        }
    }
}

/// Test scenario trait
#[async_trait::async_trait]
pub trait TestScenario: Send + Sync {
    async fn execute(&self, framework: &TestFramework) -> Result<TestResult>;

    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn timeout(&self) -> Duration;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub scenario_name: String,
    pub transport: Transport,
    pub success: bool,
    pub duration: Duration,
    pub error_message: Option<String>,
    pub metrics: TestMetrics,
    pub validation_results: Vec<ValidationResult>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestMetrics {
    pub requests_sent: u64,
    pub responses_received: u64,
    pub errors_received: u64,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub validator: String,
    pub passed: bool,
    pub message: String,
}

impl ValidationResult {
    pub fn check(validator: &str, passed: bool, message: impl Into<String>) -> Self {
        Self {
            validator: validator.to_string(),
            passed,
            message: message.into(),
        }
    }
}

impl TestResult {
    /// Result that passes when every validation passed
    pub fn from_validations(
        scenario_name: &str,
        transport: Transport,
        metrics: TestMetrics,
        validation_results: Vec<ValidationResult>,
    ) -> Self {
        let failed: Vec<&str> = validation_results
            .iter()
            .filter(|result| !result.passed)
            .map(|result| result.validator.as_str())
            .collect();
        Self {
            scenario_name: scenario_name.to_string(),
            transport,
            success: failed.is_empty(),
            duration: Duration::from_millis(metrics.elapsed_ms),
            error_message: (!failed.is_empty()).then(|| format!("failed: {}", failed.join(", "))),
            metrics,
            validation_results,
        }
    }

    fn failed(scenario_name: &str, transport: Transport, message: String) -> Self {
        Self {
            scenario_name: scenario_name.to_string(),
            transport,
            success: false,
            duration: Duration::ZERO,
            error_message: Some(message),
            metrics: TestMetrics::default(),
            validation_results: Vec::new(),
        }
    }
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            transport: Transport::Tcp,
            cleanup: true,
        }
    }
}

impl TestFramework {
    pub fn new(config: TestConfig) -> Self {
        Self {
            config,
            test_id: Uuid::new_v4(),
        }
    }

    pub fn config(&self) -> &TestConfig {
        &self.config
    }

    pub fn transport(&self) -> Transport {
        self.config.transport
    }

    pub fn test_id(&self) -> Uuid {
        self.test_id
    }

    /// Address for `service` under this run's namespace; port 0 binds any
    pub fn service_address(&self, service: &str) -> Result<ActorUri> {
        let namespace = format!("e2e-{}", self.test_id.simple());
        match self.config.transport {
            Transport::Local => Ok(ActorUri::local(&format!("{namespace}/{service}"))),
            transport => Ok(ActorUri::parse(&format!(
                "{}://127.0.0.1:0/{namespace}/{service}",
                transport.scheme()
            ))?),
        }
    }

    /// Open `service` on the configured transport, returning what proxies link to
    pub async fn open(&self, service: &ServicePort) -> Result<LinkTarget> {
        match self.config.transport {
            Transport::Local => {
                service.open_local().await?;
                Ok(LinkTarget::Local(service.clone()))
            }
            _ => {
                let uri = self.service_address(service.name())?;
                Ok(LinkTarget::Uri(service.open(&uri).await?))
            }
        }
    }

    pub async fn connect(&self, name: &str, target: LinkTarget) -> Result<ProxyPort> {
        let proxy = ProxyPort::new(name);
        proxy.connect_to(target).await?;
        Ok(proxy)
    }

    /// Run a complete test scenario
    pub async fn run_scenario(&self, scenario: &dyn TestScenario) -> TestResult {
        info!(
            scenario = scenario.name(),
            transport = %self.config.transport,
            test_id = %self.test_id,
            "Starting test scenario: {}",
            scenario.description()
        );
        let timeout = scenario
            .timeout()
            .min(Duration::from_secs(self.config.timeout_secs));
        let start_time = Instant::now();

        let mut result = match tokio::time::timeout(timeout, scenario.execute(self)).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                error!(scenario = scenario.name(), error = %e, "Test execution failed");
                TestResult::failed(scenario.name(), self.config.transport, format!("Execution failed: {e:#}"))
            }
            Err(_) => {
                error!(scenario = scenario.name(), "Test execution timed out");
                TestResult::failed(
                    scenario.name(),
                    self.config.transport,
                    "Test execution timed out".to_string(),
                )
            }
        };
        result.duration = start_time.elapsed();

        if self.config.cleanup {
            port_actors::PortRegistry::init().disconnect_all().await;
        }

        if result.success {
            info!(scenario = scenario.name(), duration_ms = result.duration.as_millis() as u64, "Scenario passed");
        } else {
            warn!(
                scenario = scenario.name(),
                error = result.error_message.as_deref().unwrap_or_default(),
                "Scenario failed"
            );
        }
        result
    }
}
