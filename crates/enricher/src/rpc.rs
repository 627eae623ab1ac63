use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use serde_json::{json, Value};
use std::time::Duration as StdDuration;
use tracing::warn;
use walletscan_config::EnricherConfig;
use walletscan_core_types::{EnrichmentMetrics, WalletKey};

use crate::http_utils::{redacted_endpoint_label, request_error};
use crate::rate_limit::TokenBucketLimiter;
use crate::{EnrichError, EnrichErrorKind, Enricher};

pub const TRANSFER_CATEGORIES: [&str; 5] = ["external", "internal", "erc20", "erc721", "erc1155"];
const WEI_PER_ETH: f64 = 1e18;

/// Wallet activity over Ethereum JSON-RPC: balance, nonce and the most recent
/// asset transfer (Alchemy's `alchemy_getAssetTransfers`).
pub struct RpcActivityEnricher {
    client: Client,
    rpc_url: String,
    endpoint_label: String,
    limiter: Option<TokenBucketLimiter>,
    include_incoming_transfers: bool,
}

impl RpcActivityEnricher {
    pub fn from_config(config: &EnricherConfig, rpc_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(StdDuration::from_millis(config.request_timeout_ms.max(100)))
            .build()
            .context("failed building reqwest blocking client for wallet enrichment")?;
        Ok(Self {
            client,
            rpc_url: rpc_url.trim().to_string(),
            endpoint_label: redacted_endpoint_label(rpc_url),
            limiter: TokenBucketLimiter::new(config.rps_limit, config.rps_burst),
            include_incoming_transfers: config.include_incoming_transfers,
        })
    }

    pub fn endpoint_label(&self) -> &str {
        &self.endpoint_label
    }

    fn call(&self, method: &str, params: Value) -> std::result::Result<Value, EnrichError> {
        if let Some(limiter) = &self.limiter {
            limiter.acquire();
        }
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let response = self
            .client
            .post(&self.rpc_url)
            .json(&payload)
            .send()
            .map_err(|error| request_error(error, &self.endpoint_label))?;
        let status = response.status();
        if !status.is_success() {
            return Err(EnrichError::new(
                EnrichErrorKind::HttpStatus,
                format!("{method} returned http status {status}"),
            ));
        }
        let body = response
            .json::<Value>()
            .map_err(|error| request_error(error, &self.endpoint_label))?;
        if let Some(error) = body.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown rpc error");
            return Err(EnrichError::new(
                EnrichErrorKind::Rpc,
                format!("{method} failed: {message}"),
            ));
        }
        body.get("result")
            .cloned()
            .ok_or_else(|| EnrichError::decode(format!("{method} response has no result")))
    }

    fn fetch_balance_eth(&self, key: &WalletKey) -> std::result::Result<f64, EnrichError> {
        let result = self.call("eth_getBalance", json!([key.as_str(), "latest"]))?;
        let wei = result
            .as_str()
            .and_then(parse_hex_quantity)
            .ok_or_else(|| EnrichError::decode(format!("invalid balance quantity: {result}")))?;
        Ok(wei_to_eth(wei))
    }

    fn fetch_transaction_count(&self, key: &WalletKey) -> std::result::Result<u64, EnrichError> {
        let result = self.call("eth_getTransactionCount", json!([key.as_str(), "latest"]))?;
        result
            .as_str()
            .and_then(parse_hex_quantity)
            .and_then(|count| u64::try_from(count).ok())
            .ok_or_else(|| EnrichError::decode(format!("invalid transaction count: {result}")))
    }

    fn fetch_latest_transfer(
        &self,
        direction: &str,
        key: &WalletKey,
    ) -> std::result::Result<Option<DateTime<Utc>>, EnrichError> {
        let result = self.call(
            "alchemy_getAssetTransfers",
            json!([transfer_query(direction, key)]),
        )?;
        Ok(latest_transfer_timestamp(&result))
    }

    /// Transfer history is best effort: a failed lookup leaves the timestamp
    /// unknown instead of failing the key.
    fn fetch_last_activity(&self, key: &WalletKey) -> Option<DateTime<Utc>> {
        let mut directions = vec!["fromAddress"];
        if self.include_incoming_transfers {
            directions.push("toAddress");
        }
        directions
            .into_iter()
            .filter_map(|direction| match self.fetch_latest_transfer(direction, key) {
                Ok(latest) => latest,
                Err(error) => {
                    warn!(
                        key = %key,
                        direction,
                        error = %error,
                        "could not fetch transfer history"
                    );
                    None
                }
            })
            .max()
    }
}

impl Enricher for RpcActivityEnricher {
    fn fetch(&self, key: &WalletKey) -> std::result::Result<EnrichmentMetrics, EnrichError> {
        let balance_eth = self.fetch_balance_eth(key)?;
        let transaction_count = self.fetch_transaction_count(key)?;
        let last_activity_at = self.fetch_last_activity(key);
        Ok(EnrichmentMetrics {
            balance_eth: Some(balance_eth),
            transaction_count: Some(transaction_count),
            last_activity_at,
            holder_count: None,
            group: None,
        })
    }
}

fn transfer_query(direction: &str, key: &WalletKey) -> Value {
    let mut query = json!({
        "fromBlock": "0x0",
        "toBlock": "latest",
        "category": TRANSFER_CATEGORIES,
        "maxCount": "0x1",
        "order": "desc",
        "withMetadata": true,
        "excludeZeroValue": false,
    });
    query[direction] = Value::String(key.as_str().to_string());
    query
}

fn latest_transfer_timestamp(result: &Value) -> Option<DateTime<Utc>> {
    result
        .get("transfers")
        .and_then(Value::as_array)?
        .iter()
        .filter_map(|transfer| {
            transfer
                .get("metadata")
                .and_then(|metadata| metadata.get("blockTimestamp"))
                .and_then(Value::as_str)
        })
        .filter_map(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|ts| ts.with_timezone(&Utc))
        .max()
}

/// Parses a `0x`-prefixed hex quantity as returned by JSON-RPC.
pub fn parse_hex_quantity(raw: &str) -> Option<u128> {
    let digits = raw.trim().strip_prefix("0x")?;
    if digits.is_empty() {
        return Some(0);
    }
    u128::from_str_radix(digits, 16).ok()
}

pub fn wei_to_eth(wei: u128) -> f64 {
    wei as f64 / WEI_PER_ETH
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::{Arc, Mutex};
    use std::thread;

    fn key() -> WalletKey {
        WalletKey::parse(&format!("0x{}", "ab".repeat(20))).expect("valid key")
    }

    fn find_header_end(buffer: &[u8]) -> Option<usize> {
        buffer.windows(4).position(|window| window == b"\r\n\r\n")
    }

    /// Serves one scripted JSON-RPC response per connection and records the
    /// method of every request it saw.
    fn spawn_rpc_server(
        responses: Vec<(u16, Value)>,
    ) -> Option<(String, Arc<Mutex<Vec<String>>>, thread::JoinHandle<()>)> {
        let listener = match TcpListener::bind("127.0.0.1:0") {
            Ok(listener) => listener,
            Err(error) => {
                eprintln!("skipping rpc enricher test: failed to bind 127.0.0.1:0: {error}");
                return None;
            }
        };
        let addr = listener.local_addr().ok()?;
        let methods = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&methods);
        let mut queue: VecDeque<(u16, Value)> = responses.into();
        let handle = thread::spawn(move || {
            while let Some((status, body)) = queue.pop_front() {
                let (mut stream, _) = listener.accept().expect("accept rpc client");
                stream
                    .set_read_timeout(Some(StdDuration::from_secs(5)))
                    .expect("set read timeout");
                let mut buffer = Vec::new();
                let mut chunk = [0_u8; 1024];
                let mut header_end = None;
                while header_end.is_none() {
                    let read = stream.read(&mut chunk).expect("read request headers");
                    if read == 0 {
                        break;
                    }
                    buffer.extend_from_slice(&chunk[..read]);
                    header_end = find_header_end(&buffer).map(|offset| offset + 4);
                }
                let header_end = header_end.expect("request headers must be present");
                let header_text = String::from_utf8_lossy(&buffer[..header_end]).to_string();
                let content_length = header_text
                    .split("\r\n")
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                while buffer.len() < header_end + content_length {
                    let read = stream.read(&mut chunk).expect("read request body");
                    if read == 0 {
                        break;
                    }
                    buffer.extend_from_slice(&chunk[..read]);
                }
                let request: Value =
                    serde_json::from_slice(&buffer[header_end..]).expect("json request body");
                seen.lock().expect("methods lock").push(
                    request
                        .get("method")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                );

                let body = body.to_string();
                let reason = if status == 200 { "OK" } else { "ERR" };
                let response = format!(
                    "HTTP/1.1 {status} {reason}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                stream
                    .write_all(response.as_bytes())
                    .expect("write rpc response");
                stream.flush().expect("flush rpc response");
            }
        });
        Some((format!("http://{addr}/v2/test-key"), methods, handle))
    }

    fn enricher_for(url: &str, include_incoming_transfers: bool) -> RpcActivityEnricher {
        let config = EnricherConfig {
            rpc_url: url.to_string(),
            request_timeout_ms: 5_000,
            rps_limit: 0,
            include_incoming_transfers,
            ..EnricherConfig::default()
        };
        RpcActivityEnricher::from_config(&config, url).expect("build enricher")
    }

    #[test]
    fn parses_hex_quantities() {
        assert_eq!(parse_hex_quantity("0x0"), Some(0));
        assert_eq!(parse_hex_quantity("0x"), Some(0));
        assert_eq!(parse_hex_quantity("0x2386f26fc10000"), Some(10_000_000_000_000_000));
        assert_eq!(parse_hex_quantity("123"), None);
        assert_eq!(parse_hex_quantity("0xzz"), None);
        assert!((wei_to_eth(10_000_000_000_000_000) - 0.01).abs() < 1e-12);
    }

    #[test]
    fn transfer_query_sets_requested_direction() {
        let query = transfer_query("toAddress", &key());
        assert_eq!(query["toAddress"], Value::String(key().to_string()));
        assert!(query.get("fromAddress").is_none());
        assert_eq!(query["maxCount"], "0x1");
        assert_eq!(query["order"], "desc");
    }

    #[test]
    fn latest_transfer_timestamp_ignores_missing_metadata() {
        let result = json!({
            "transfers": [
                { "metadata": { "blockTimestamp": "2025-01-05T10:00:00.000Z" } },
                { "hash": "0x01" }
            ]
        });
        let latest = latest_transfer_timestamp(&result).expect("timestamp");
        assert_eq!(latest.to_rfc3339(), "2025-01-05T10:00:00+00:00");
        assert!(latest_transfer_timestamp(&json!({ "transfers": [] })).is_none());
    }

    #[test]
    fn fetch_combines_balance_count_and_latest_transfer() {
        let Some((url, methods, handle)) = spawn_rpc_server(vec![
            (200, json!({ "jsonrpc": "2.0", "id": 1, "result": "0x2386f26fc10000" })),
            (200, json!({ "jsonrpc": "2.0", "id": 1, "result": "0xa" })),
            (
                200,
                json!({ "jsonrpc": "2.0", "id": 1, "result": { "transfers": [
                    { "metadata": { "blockTimestamp": "2025-02-01T00:00:00.000Z" } }
                ] } }),
            ),
        ]) else {
            return;
        };

        let metrics = enricher_for(&url, false).fetch(&key()).expect("fetch metrics");
        handle.join().expect("rpc server thread");

        assert!((metrics.balance_eth.expect("balance") - 0.01).abs() < 1e-12);
        assert_eq!(metrics.transaction_count, Some(10));
        assert!(metrics.last_activity_at.is_some());
        assert_eq!(
            *methods.lock().expect("methods lock"),
            vec![
                "eth_getBalance".to_string(),
                "eth_getTransactionCount".to_string(),
                "alchemy_getAssetTransfers".to_string(),
            ]
        );
    }

    #[test]
    fn failed_transfer_lookup_leaves_timestamp_unknown() {
        let Some((url, _methods, handle)) = spawn_rpc_server(vec![
            (200, json!({ "jsonrpc": "2.0", "id": 1, "result": "0x0" })),
            (200, json!({ "jsonrpc": "2.0", "id": 1, "result": "0x1" })),
            (
                200,
                json!({ "jsonrpc": "2.0", "id": 1, "error": { "code": -32600, "message": "unsupported" } }),
            ),
            (200, json!({ "jsonrpc": "2.0", "id": 1, "result": { "transfers": [] } })),
        ]) else {
            return;
        };

        let metrics = enricher_for(&url, true).fetch(&key()).expect("fetch metrics");
        handle.join().expect("rpc server thread");

        assert_eq!(metrics.balance_eth, Some(0.0));
        assert_eq!(metrics.transaction_count, Some(1));
        assert!(metrics.last_activity_at.is_none());
    }

    #[test]
    fn http_error_status_fails_the_key() {
        let Some((url, _methods, handle)) =
            spawn_rpc_server(vec![(429, json!({ "error": "rate limited" }))])
        else {
            return;
        };

        let error = enricher_for(&url, false)
            .fetch(&key())
            .expect_err("status error must fail");
        handle.join().expect("rpc server thread");

        assert_eq!(error.kind, EnrichErrorKind::HttpStatus);
        assert!(!error.to_string().contains("test-key"));
    }
}
