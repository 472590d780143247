/*!
 * Tests for the decoder client
 */

use std::time::Duration;

use mtworker::decoder::{DecoderClient, DecoderEndpoint, ReconnectPolicy, REQUEST_ATTEMPTS};
use mtworker::errors::DecoderError;

use crate::common::ReverseConnector;

fn policy(max_attempts: u32) -> ReconnectPolicy {
    ReconnectPolicy {
        max_attempts,
        delay: Duration::from_secs(5),
    }
}

/// N-1 failures followed by a success yield a usable connection
#[tokio::test(start_paused = true)]
async fn test_reconnect_afterOneFewerFailuresThanBudget_shouldConnect() {
    let connector = ReverseConnector::flaky(4);
    let mut client = DecoderClient::new(DecoderEndpoint::local(8080), connector.clone(), policy(5));

    client.reconnect().await.unwrap();
    assert!(client.is_connected());
    assert_eq!(connector.attempts(), 5);

    let response = client.translate(&["eins zwei".to_string()]).await.unwrap();
    assert_eq!(response, "zwei eins");
}

/// N failures exhaust the budget and no further attempt is made
#[tokio::test(start_paused = true)]
async fn test_reconnect_afterBudgetFailures_shouldFailWithoutRetrying() {
    let connector = ReverseConnector::flaky(5);
    let mut client = DecoderClient::new(DecoderEndpoint::local(8080), connector.clone(), policy(5));

    let result = client.reconnect().await;
    assert!(matches!(result, Err(DecoderError::ReconnectExhausted { attempts: 5, .. })));
    assert!(!client.is_connected());
    assert_eq!(connector.attempts(), 5);
}

#[tokio::test]
async fn test_translate_withoutConnection_shouldReconnectFirst() {
    let connector = ReverseConnector::new();
    let mut client = DecoderClient::new(DecoderEndpoint::local(8080), connector.clone(), policy(2));

    let response = client
        .translate(&["a b".to_string(), "c d".to_string()])
        .await
        .unwrap();
    assert_eq!(response, "b a\nd c");
}

/// Lost responses on a live connection are retried over a fresh one
#[tokio::test(start_paused = true)]
async fn test_translate_afterTwoDroppedResponses_shouldSucceedOnThirdAttempt() {
    let connector = ReverseConnector::dropping(REQUEST_ATTEMPTS - 1);
    let mut client = DecoderClient::new(DecoderEndpoint::local(8080), connector.clone(), policy(2));
    client.connect().await.unwrap();

    let response = client.translate(&["drei vier".to_string()]).await.unwrap();

    assert_eq!(response, "vier drei");
    assert_eq!(connector.requests(), REQUEST_ATTEMPTS);
    // one initial connection plus one reconnect per dropped response
    assert_eq!(connector.attempts(), REQUEST_ATTEMPTS);
    assert!(client.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_translate_whenEveryResponseDropped_shouldGiveUpAfterRequestAttempts() {
    let connector = ReverseConnector::dropping(u32::MAX);
    let mut client = DecoderClient::new(DecoderEndpoint::local(8080), connector.clone(), policy(2));
    client.connect().await.unwrap();

    let result = client.translate(&["drei vier".to_string()]).await;

    assert!(matches!(result, Err(DecoderError::Connection(_))));
    assert_eq!(connector.requests(), REQUEST_ATTEMPTS);
    assert_eq!(connector.attempts(), REQUEST_ATTEMPTS);
    assert!(!client.is_connected());
}
