use super::*;
use crate::fake_node::{spawn_fake_node, FakeNode};
use shared::error::ErrorCategory;

fn vault() -> Address {
    Address::repeat_byte(0x5a)
}

fn fast_poll() -> PollSettings {
    PollSettings {
        receipt_interval: Duration::from_millis(5),
        log_interval: Duration::from_millis(5),
    }
}

async fn backend() -> (RpcVaultBackend, FakeNode) {
    let (url, node) = spawn_fake_node().await;
    let backend = RpcVaultBackend::with_poll_settings(Arc::new(RpcClient::new(url)), fast_poll());
    (backend, node)
}

fn word(value: u64) -> String {
    format!("{value:064x}")
}

#[tokio::test]
async fn balance_comes_from_the_account_balance() {
    let (backend, node) = backend().await;
    node.result("eth_getBalance", json!("0xde0b6b3a7640000")).await;

    let balance = backend.balance(vault()).await.expect("balance");

    assert_eq!(balance, U256::from(1_000_000_000_000_000_000u64));
}

#[tokio::test]
async fn reads_call_the_vault_getters() {
    let (backend, node) = backend().await;
    node.result("eth_call", json!(format!("0x{}", word(1_700_000_000))))
        .await;

    assert_eq!(backend.last_active(vault()).await.expect("read"), 1_700_000_000);

    let calls = node.requests_for("eth_call").await;
    let expected = hex::encode_prefixed(abi::selector("lastactive()"));
    assert_eq!(calls[0][0]["data"], json!(expected));
    assert_eq!(calls[0][1], json!("latest"));
}

#[tokio::test]
async fn empty_call_results_fail_softly() {
    let (backend, node) = backend().await;
    node.result("eth_call", json!("0x")).await;

    let failure = backend.master_key(vault()).await.expect_err("no code");

    assert!(failure.message.starts_with("could not decode result data"));
}

#[tokio::test]
async fn calls_carry_encoded_arguments_and_value() {
    let (backend, node) = backend().await;
    node.result("eth_sendTransaction", json!(format!("0x{}", word(9))))
        .await;
    let from = Address::repeat_byte(0xbb);

    backend
        .submit(
            from,
            vault(),
            &VaultCall::SecureMoney {
                value: U256::from(1_000u64),
            },
        )
        .await
        .expect("deposit");
    backend
        .submit(
            from,
            vault(),
            &VaultCall::WithdrawMoneyOwner {
                password: "p2".into(),
            },
        )
        .await
        .expect("withdraw");

    let sent = node.requests_for("eth_sendTransaction").await;
    assert_eq!(sent[0][0]["value"], json!("0x3e8"));
    assert_eq!(
        sent[0][0]["data"],
        json!(hex::encode_prefixed(abi::selector("securemoney()")))
    );
    let withdraw_data = sent[1][0]["data"].as_str().expect("data").to_string();
    let bytes = hex::decode(withdraw_data).expect("hex");
    assert_eq!(bytes[..4], abi::selector("withdrawmoneyowner(string)"));
    assert_eq!(abi::decode_string(&bytes[4..], 0).expect("password"), "p2");
    assert_eq!(sent[1][0]["value"], json!("0x0"));
}

#[tokio::test]
async fn reverted_submission_translates_by_node_message() {
    let (backend, node) = backend().await;
    node.error(
        "eth_sendTransaction",
        3,
        "execution reverted: Hell NOOOO",
        Some(json!({ "data": concat!(
            "0x08c379a0",
            "0000000000000000000000000000000000000000000000000000000000000020",
            "000000000000000000000000000000000000000000000000000000000000000a",
            "48656c6c204e4f4f4f4f00000000000000000000000000000000000000000000"
        ) })),
    )
    .await;

    let failure = backend
        .submit(
            Address::repeat_byte(0x77),
            vault(),
            &VaultCall::Ping {
                extension_seconds: 60,
            },
        )
        .await
        .expect_err("reverted");

    assert_eq!(
        vault_core::translate(&failure).category,
        ErrorCategory::InvalidPasswordOrUnauthorized
    );
}

#[tokio::test]
async fn creation_waits_for_the_receipt() {
    let (backend, node) = backend().await;
    node.result("eth_sendTransaction", json!(format!("0x{}", word(1))))
        .await;
    node.result("eth_getTransactionReceipt", Value::Null).await;
    node.result(
        "eth_getTransactionReceipt",
        json!({ "status": "0x1", "contractAddress": vault() }),
    )
    .await;
    let args = CreationArgs {
        secondary_key: Address::repeat_byte(0xaa),
        master_key: Address::repeat_byte(0xbb),
        beneficiary: Address::repeat_byte(0xcc),
        secret_password: "p1".into(),
        withdrawal_password: "p2".into(),
    };
    let artifact = DeploymentArtifact::new(vec![0x60, 0x80]);

    let pending = backend
        .submit_creation(Address::repeat_byte(0xbb), &artifact, &args)
        .await
        .expect("submit");
    let address = backend.await_creation(&pending).await.expect("created");

    assert_eq!(address, vault());
    assert_eq!(node.requests_for("eth_getTransactionReceipt").await.len(), 2);
    let sent = node.requests_for("eth_sendTransaction").await;
    let data = sent[0][0]["data"].as_str().expect("data");
    assert!(data.starts_with("0x6080"));
}

#[tokio::test]
async fn finality_outlasts_a_long_run_of_missing_receipts() {
    let (backend, node) = backend().await;
    for _ in 0..200 {
        node.result("eth_getTransactionReceipt", Value::Null).await;
    }
    node.result("eth_getTransactionReceipt", json!({ "status": "0x1" }))
        .await;

    backend
        .await_finality(&PendingOperation::new("0xabc"))
        .await
        .expect("mined late");

    assert_eq!(node.requests_for("eth_getTransactionReceipt").await.len(), 201);
}

#[tokio::test]
async fn unmined_transactions_are_awaited_until_the_caller_gives_up() {
    let (backend, node) = backend().await;
    node.result("eth_getTransactionReceipt", Value::Null).await;

    let waited = tokio::time::timeout(
        Duration::from_millis(200),
        backend.await_finality(&PendingOperation::new("0xabc")),
    )
    .await;

    assert!(waited.is_err(), "finality resolved without a receipt: {waited:?}");
    assert!(node.requests_for("eth_getTransactionReceipt").await.len() > 3);
}

#[tokio::test]
async fn failed_receipt_status_is_a_failure() {
    let (backend, node) = backend().await;
    node.result(
        "eth_getTransactionReceipt",
        json!({ "status": "0x0", "contractAddress": null }),
    )
    .await;

    let failure = backend
        .await_finality(&PendingOperation::new("0x01"))
        .await
        .expect_err("reverted");

    assert!(failure.message.contains("reverted"));
}

#[tokio::test]
async fn subscriptions_deliver_decoded_logs_until_dropped() {
    let (backend, node) = backend().await;
    node.result("eth_blockNumber", json!("0x10")).await;
    let depositor = Address::repeat_byte(0xbb);
    let topic0 = abi::event_topic("moneysecured(address,uint256)");
    let data = abi::encode(&[
        abi::Token::Address(depositor),
        abi::Token::Uint(U256::from(5u64)),
    ]);
    node.result(
        "eth_getLogs",
        json!([{
            "topics": [topic0],
            "data": hex::encode_prefixed(&data),
            "blockNumber": "0x11",
        }]),
    )
    .await;
    node.result("eth_getLogs", json!([])).await;

    let mut receiver = backend
        .subscribe(vault(), VaultTopic::FundsSecured)
        .await
        .expect("subscribe");
    let notification = tokio::time::timeout(Duration::from_secs(2), receiver.recv())
        .await
        .expect("in time")
        .expect("notification");

    assert_eq!(notification.topic, VaultTopic::FundsSecured);
    assert_eq!(notification.vault, vault());
    assert_eq!(notification.account, Some(depositor));
    assert_eq!(notification.amount, Some(U256::from(5u64)));

    let filters = node.requests_for("eth_getLogs").await;
    assert_eq!(filters[0][0]["fromBlock"], json!("0x11"));
    assert_eq!(filters[0][0]["topics"][0], json!(topic0));

    drop(receiver);
    tokio::time::sleep(Duration::from_millis(50)).await;
    let polls = node.requests_for("eth_getLogs").await.len();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(node.requests_for("eth_getLogs").await.len(), polls);
}

#[test]
fn extension_logs_carry_the_message() {
    let log = LogEntry {
        topics: vec![abi::event_topic("extratime(string)")],
        data: abi::encode(&[abi::Token::String("time extended".into())]).into(),
        block_number: None,
    };

    let notification =
        notification_from_log(vault(), VaultTopic::ExtensionOfTime, &log).expect("decoded");

    assert_eq!(notification.note.as_deref(), Some("time extended"));
    assert_eq!(notification.account, None);
}
