// End-to-end pipeline checks over a mock JSON-RPC endpoint: the connector
// fetches real wire shapes, the analyzer classifies them, and the profit
// calculator reproduces the expected economics.
use chainpulse_common::MetricsCollector;
use chainpulse_monitor::analyzer::{address_to_string, TxAnalyzer, SWAP_TOPIC};
use chainpulse_monitor::pool_scanner::{decode_reserves, evaluate_reserves};
use chainpulse_monitor::profit::ProfitCalculator;
use chainpulse_monitor::rpc::{RpcClient, RpcSettings};
use ethers::types::{Address, Block, Bytes, Log, Transaction, TransactionReceipt, H256, U256};
use mockito::Matcher;
use rust_decimal_macros::dec;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn test_settings() -> RpcSettings {
    RpcSettings {
        attempts_per_endpoint: 1,
        initial_backoff: Duration::from_millis(1),
        request_timeout: Duration::from_secs(2),
        breaker_threshold: 2,
        breaker_cooldown: Duration::from_millis(100),
    }
}

fn client_for(urls: Vec<String>) -> RpcClient {
    RpcClient::new(
        "testchain",
        urls,
        test_settings(),
        Arc::new(MetricsCollector::new()),
    )
    .unwrap()
}

fn addr(byte: u8) -> Address {
    Address::from([byte; 20])
}

fn topic_for(address: Address) -> H256 {
    let mut bytes = [0u8; 32];
    bytes[12..].copy_from_slice(address.as_bytes());
    H256::from(bytes)
}

fn swap_log(pool: Address, amounts: [u64; 4], log_index: u64) -> Log {
    let mut data = Vec::with_capacity(128);
    for amount in amounts {
        let mut word = [0u8; 32];
        U256::from(amount).to_big_endian(&mut word);
        data.extend_from_slice(&word);
    }
    Log {
        address: pool,
        topics: vec![*SWAP_TOPIC, topic_for(addr(0xaa)), topic_for(addr(0xbb))],
        data: Bytes::from(data),
        log_index: Some(log_index.into()),
        ..Default::default()
    }
}

fn rpc_result(value: serde_json::Value) -> String {
    json!({"jsonrpc": "2.0", "id": 1, "result": value}).to_string()
}

#[tokio::test]
async fn block_pipeline_detects_the_classic_two_hop() {
    let mut server = mockito::Server::new_async().await;

    let router = addr(0x01);
    let pool_a = addr(0xa1);
    let pool_b = addr(0xb2);

    let mut input = vec![0x38, 0xed, 0x17, 0x39]; // swapExactTokensForTokens
    input.extend_from_slice(&[0u8; 64]);
    let tx = Transaction {
        hash: H256::from([0x11; 32]),
        from: addr(0xfe),
        to: Some(router),
        input: Bytes::from(input),
        ..Default::default()
    };
    let block = Block::<Transaction> {
        timestamp: U256::from(1_700_000_000u64),
        transactions: vec![tx.clone()],
        ..Default::default()
    };
    let receipt = TransactionReceipt {
        transaction_hash: tx.hash,
        logs: vec![
            swap_log(pool_a, [0, 1000, 1100, 0], 0),
            swap_log(pool_b, [1100, 0, 0, 1050], 1),
        ],
        gas_used: Some(U256::from(150_000u64)),
        effective_gas_price: Some(U256::from(5_000_000_000u64)),
        status: Some(1u64.into()),
        ..Default::default()
    };

    let _height = server
        .mock("POST", "/")
        .match_body(Matcher::PartialJson(json!({"method": "eth_blockNumber"})))
        .with_body(rpc_result(json!("0x3e8")))
        .create_async()
        .await;
    let _block = server
        .mock("POST", "/")
        .match_body(Matcher::PartialJson(json!({"method": "eth_getBlockByNumber"})))
        .with_body(rpc_result(serde_json::to_value(&block).unwrap()))
        .create_async()
        .await;
    let _receipt = server
        .mock("POST", "/")
        .match_body(Matcher::PartialJson(
            json!({"method": "eth_getTransactionReceipt"}),
        ))
        .with_body(rpc_result(serde_json::to_value(&receipt).unwrap()))
        .create_async()
        .await;

    let client = client_for(vec![server.url()]);

    let height = client.latest_height().await.unwrap();
    assert_eq!(height, 1000);

    let fetched_block = client.block_with_txs(height).await.unwrap().unwrap();
    assert_eq!(fetched_block.transactions.len(), 1);
    let fetched_tx = &fetched_block.transactions[0];

    let routers = vec![address_to_string(&router)];
    let analyzer = TxAnalyzer::new(routers.iter(), &[]).unwrap();
    assert!(analyzer.is_known_router(&fetched_tx.to.unwrap()));

    let fetched_receipt = client.receipt(fetched_tx.hash).await.unwrap().unwrap();
    assert!(analyzer.is_arbitrage(fetched_tx, &fetched_receipt));
    assert_eq!(analyzer.count_swaps(&fetched_receipt), 2);

    let swaps = analyzer.decode_swaps(&fetched_receipt).unwrap();
    assert_eq!(
        swaps.iter().map(|s| s.pool_address.clone()).collect::<Vec<_>>(),
        vec![address_to_string(&pool_a), address_to_string(&pool_b)]
    );

    let breakdown = ProfitCalculator::calculate(
        &swaps,
        fetched_receipt.gas_used.unwrap(),
        fetched_receipt.effective_gas_price.unwrap(),
        dec!(300),
    )
    .unwrap();

    assert_eq!(breakdown.gross_usd, Some(dec!(15000)));
    assert_eq!(breakdown.gas_cost_usd, dec!(0.225));
    assert_eq!(breakdown.net_usd, Some(dec!(14999.775)));
}

#[tokio::test]
async fn reserve_scan_detects_imbalance_over_rpc() {
    let mut server = mockito::Server::new_async().await;

    // getReserves() -> (1200, 800, ts)
    let mut payload = vec![0u8; 96];
    U256::from(1200u64).to_big_endian(&mut payload[0..32]);
    U256::from(800u64).to_big_endian(&mut payload[32..64]);
    let result_hex = format!("0x{}", hex::encode(&payload));

    let _reserves = server
        .mock("POST", "/")
        .match_body(Matcher::PartialJson(json!({"method": "eth_call"})))
        .with_body(rpc_result(json!(result_hex)))
        .create_async()
        .await;

    let client = client_for(vec![server.url()]);
    let data = client
        .eth_call("0x58f876857a02d6762e0101bb5c46a8c1ed44dc16", "0x0902f1ac")
        .await
        .unwrap();

    let (reserve0, reserve1) = decode_reserves(&data).unwrap().unwrap();
    let (imbalance_pct, profit_native) =
        evaluate_reserves(reserve0, reserve1, dec!(0.003)).unwrap();

    assert!((imbalance_pct - dec!(22.474)).abs() < dec!(0.01));
    assert!((profit_native - dec!(177.4)).abs() < dec!(0.1));
    // well above the 5% emission threshold
    assert!(imbalance_pct >= dec!(5));
}

#[tokio::test]
async fn tripped_endpoint_recovers_through_a_half_open_trial() {
    let mut primary = mockito::Server::new_async().await;
    let mut fallback = mockito::Server::new_async().await;

    let failing = primary
        .mock("POST", "/")
        .with_status(500)
        .expect(2)
        .create_async()
        .await;
    let _healthy = fallback
        .mock("POST", "/")
        .with_body(rpc_result(json!("0x1")))
        .expect(3)
        .create_async()
        .await;

    let client = client_for(vec![primary.url(), fallback.url()]);

    // two exhausted calls trip the primary's breaker
    for _ in 0..2 {
        assert_eq!(client.latest_height().await.unwrap(), 1);
    }
    assert_eq!(client.endpoint_statuses()[0].circuit_state, "open");

    // while open, the primary sees no traffic at all
    assert_eq!(client.latest_height().await.unwrap(), 1);
    failing.assert_async().await;

    // after the cooldown the next call is the half-open trial; the endpoint
    // has recovered, so the breaker closes again
    tokio::time::sleep(Duration::from_millis(120)).await;
    let _recovered = primary
        .mock("POST", "/")
        .with_body(rpc_result(json!("0x2a")))
        .create_async()
        .await;

    assert_eq!(client.latest_height().await.unwrap(), 42);
    assert_eq!(client.endpoint_statuses()[0].circuit_state, "closed");
}
