use super::*;
use crate::fake_node::spawn_fake_node;
use serde_json::json;
use shared::error::ErrorCategory;

#[tokio::test]
async fn results_are_decoded_into_the_requested_type() {
    let (url, node) = spawn_fake_node().await;
    node.result("eth_chainId", json!("0xaa36a7")).await;
    let client = RpcClient::new(url);

    let raw: String = client.request("eth_chainId", json!([])).await.expect("chain id");

    assert_eq!(parse_quantity("eth_chainId", &raw).expect("quantity"), U256::from(11_155_111u64));
}

#[tokio::test]
async fn node_errors_keep_code_and_revert_reason() {
    let (url, node) = spawn_fake_node().await;
    node.error(
        "eth_sendTransaction",
        3,
        "execution reverted: The person is active",
        Some(json!(concat!(
            "0x08c379a0",
            "0000000000000000000000000000000000000000000000000000000000000020",
            "0000000000000000000000000000000000000000000000000000000000000014",
            "54686520706572736f6e20697320616374697665000000000000000000000000"
        ))),
    )
    .await;
    let client = RpcClient::new(url);

    let err = client
        .request::<Value>("eth_sendTransaction", json!([]))
        .await
        .expect_err("reverted");

    assert_eq!(err.code(), Some(3));
    assert_eq!(err.revert_reason().as_deref(), Some("The person is active"));
    let failure = RemoteFailure::from(err);
    assert_eq!(failure.reason.as_deref(), Some("The person is active"));
    assert_eq!(
        failure.provider_message.as_deref(),
        Some("execution reverted: The person is active")
    );
}

#[tokio::test]
async fn node_message_outranks_decoded_revert_data() {
    let (url, node) = spawn_fake_node().await;
    node.error(
        "eth_sendTransaction",
        3,
        "execution reverted: Hell NOOOO",
        Some(json!(concat!(
            "0x08c379a0",
            "0000000000000000000000000000000000000000000000000000000000000020",
            "0000000000000000000000000000000000000000000000000000000000000004",
            "6f6f707300000000000000000000000000000000000000000000000000000000"
        ))),
    )
    .await;
    let client = RpcClient::new(url);

    let err = client
        .request::<Value>("eth_sendTransaction", json!([]))
        .await
        .expect_err("reverted");
    let failure = RemoteFailure::from(err);

    assert_eq!(failure.reason.as_deref(), Some("oops"));
    assert_eq!(
        failure.provider_message.as_deref(),
        Some("execution reverted: Hell NOOOO")
    );
    assert_eq!(
        vault_core::translate(&failure).category,
        ErrorCategory::InvalidPasswordOrUnauthorized
    );
}

#[test]
fn decode_failures_carry_no_provider_message() {
    let failure = RemoteFailure::from(RpcError::decode("eth_call", "bad hex"));

    assert_eq!(failure.provider_message, None);
    assert_eq!(failure.reason, None);
}

#[tokio::test]
async fn null_results_decode_as_none() {
    let (url, node) = spawn_fake_node().await;
    node.result("eth_getTransactionReceipt", Value::Null).await;
    let client = RpcClient::new(url);

    let receipt: Option<Value> = client
        .request("eth_getTransactionReceipt", json!(["0x01"]))
        .await
        .expect("null result");

    assert_eq!(receipt, None);
}

#[test]
fn quantities_require_a_prefix() {
    assert_eq!(parse_quantity("m", "0x").expect("empty"), U256::ZERO);
    assert_eq!(parse_quantity("m", "0x1f").expect("hex"), U256::from(31u64));
    assert!(parse_quantity("m", "31").is_err());
    assert_eq!(quantity(11_155_111), "0xaa36a7");
}
