//! Every scenario over every transport

use port_e2e_tests::{
    CatalogTest, CorrelationTest, DecodeFailureTest, DisconnectTest, RoundTripTest,
    SchedulingTest, TestConfig, TestFramework, TestResult, TestScenario, Transport,
};

fn framework(transport: Transport) -> TestFramework {
    // tests share one process; each scenario disconnects its own ports
    TestFramework::new(TestConfig {
        timeout_secs: 30,
        transport,
        cleanup: false,
    })
}

fn assert_passed(result: &TestResult) {
    let failures: Vec<String> = result
        .validation_results
        .iter()
        .filter(|validation| !validation.passed)
        .map(|validation| format!("{}: {}", validation.validator, validation.message))
        .collect();
    assert!(
        result.success,
        "{} over {} failed: {:?} {:?}",
        result.scenario_name, result.transport, result.error_message, failures
    );
}

async fn run_everywhere(scenario: &dyn TestScenario) {
    for transport in Transport::ALL {
        let result = framework(transport).run_scenario(scenario).await;
        assert_passed(&result);
    }
}

#[tokio::test]
async fn test_correlation_matches_every_answer() {
    run_everywhere(&CorrelationTest { requests: 40 }).await;
}

#[tokio::test]
async fn test_disconnect_fails_outstanding_requests() {
    run_everywhere(&DisconnectTest { outstanding: 6 }).await;
}

#[tokio::test]
async fn test_sequential_service_serializes_handlers() {
    run_everywhere(&SchedulingTest {
        multithreaded: false,
        requests: 10,
        handler_ms: 10,
    })
    .await;
}

#[tokio::test]
async fn test_multithreaded_service_interleaves_handlers() {
    run_everywhere(&SchedulingTest {
        multithreaded: true,
        requests: 10,
        handler_ms: 100,
    })
    .await;
}

#[tokio::test]
async fn test_round_trip_preserves_payloads() {
    run_everywhere(&RoundTripTest).await;
}

#[tokio::test]
async fn test_catalog_publish_resolve_unpublish() {
    run_everywhere(&CatalogTest).await;
}

#[tokio::test]
async fn test_recoverable_decode_failure() {
    let result = framework(Transport::JsonRpc)
        .run_scenario(&DecodeFailureTest)
        .await;
    assert_passed(&result);
}

#[tokio::test]
async fn test_timeout_is_reported_as_failure() {
    struct Stalled;

    #[async_trait::async_trait]
    impl TestScenario for Stalled {
        async fn execute(&self, _framework: &TestFramework) -> anyhow::Result<TestResult> {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            unreachable!("scenario should have timed out")
        }

        fn name(&self) -> &str {
            "stalled"
        }

        fn description(&self) -> &str {
            "never finishes"
        }

        fn timeout(&self) -> std::time::Duration {
            std::time::Duration::from_millis(50)
        }
    }

    let result = framework(Transport::Local).run_scenario(&Stalled).await;
    assert!(!result.success);
    assert_eq!(result.error_message.as_deref(), Some("Test execution timed out"));
}
