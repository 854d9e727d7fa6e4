//! Lightweight JSON-RPC client.
//!
//! Implements only the methods the daemon actually needs, dispatched
//! through a blocking `ureq` agent inside `spawn_blocking` — this avoids
//! pulling in the full solana-client networking stack for what is, in the
//! end, a handful of JSON-RPC calls.

use crate::core::error::{HarvesterError, RpcError};
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use solana_sdk::{account::Account, hash::Hash, pubkey::Pubkey, transaction::Transaction};
use std::time::Duration;
use tracing::debug;

pub struct RpcClient {
    url: String,
    agent: ureq::Agent,
}

#[derive(Debug, Deserialize)]
struct RpcResponseEnvelope<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct AccountInfoWire {
    lamports: u64,
    data: (String, String),
    owner: String,
    executable: bool,
    #[serde(rename = "rentEpoch")]
    rent_epoch: u64,
}

#[derive(Debug, Deserialize)]
struct KeyedAccountWire {
    pubkey: String,
    account: AccountInfoWire,
}

#[derive(Debug, Serialize)]
pub struct SimulationResult {
    pub err: Option<Value>,
    pub logs: Vec<String>,
    pub units_consumed: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SimulateValueWire {
    err: Option<Value>,
    logs: Option<Vec<String>>,
    #[serde(rename = "unitsConsumed")]
    units_consumed: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SimulateEnvelopeWire {
    value: SimulateValueWire,
}

#[derive(Debug, Deserialize)]
struct PrioritizationFeeSample {
    #[serde(rename = "prioritizationFee")]
    prioritization_fee: u64,
}

#[derive(Debug, Deserialize)]
struct SignatureStatusWire {
    err: Option<Value>,
    #[serde(rename = "confirmationStatus")]
    confirmation_status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SignatureStatusesWire {
    value: Vec<Option<SignatureStatusWire>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationStatus {
    Processed,
    Confirmed,
    Finalized,
    Failed(String),
    Unknown,
}

/// Matches the on-chain `memcmp`/`dataSize` filter shapes `getProgramAccounts` accepts.
pub enum ProgramAccountFilter {
    DataSize(u64),
    Memcmp { offset: usize, bytes: Vec<u8> },
}

impl ProgramAccountFilter {
    fn to_json(&self) -> Value {
        match self {
            ProgramAccountFilter::DataSize(n) => json!({ "dataSize": n }),
            ProgramAccountFilter::Memcmp { offset, bytes } => json!({
                "memcmp": {
                    "offset": offset,
                    "bytes": bs58::encode(bytes).into_string(),
                }
            }),
        }
    }
}

impl RpcClient {
    pub fn new(url: String) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(10))
            .timeout_read(Duration::from_secs(30))
            .build();
        Self { url, agent }
    }

    async fn call<T>(&self, method: &str, params: Value) -> Result<T, HarvesterError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let request_body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        debug!(method, "rpc call");

        let response_body = tokio::task::spawn_blocking({
            let agent = self.agent.clone();
            let url = self.url.clone();
            let body = request_body.to_string();
            move || -> Result<String, String> {
                let response = agent
                    .post(&url)
                    .set("Content-Type", "application/json")
                    .send_string(&body)
                    .map_err(|e| e.to_string())?;
                response.into_string().map_err(|e| e.to_string())
            }
        })
        .await
        .map_err(|e| RpcError::Transport(e.to_string()))?
        .map_err(RpcError::Transport)?;

        let envelope: RpcResponseEnvelope<T> =
            serde_json::from_str(&response_body).map_err(|e| RpcError::Malformed(e.to_string()))?;

        if let Some(err) = envelope.error {
            return Err(RpcError::NodeError { code: err.code, message: err.message }.into());
        }

        envelope
            .result
            .ok_or_else(|| RpcError::Malformed("missing result field".into()).into())
    }

    pub async fn get_latest_blockhash(&self) -> Result<Hash, HarvesterError> {
        let response: Value = self.call("getLatestBlockhash", json!([])).await?;
        let blockhash_str = response["value"]["blockhash"]
            .as_str()
            .ok_or_else(|| RpcError::Malformed("missing blockhash".into()))?;
        blockhash_str
            .parse()
            .map_err(|e: solana_sdk::hash::ParseHashError| RpcError::Malformed(e.to_string()).into())
    }

    pub async fn get_slot(&self) -> Result<u64, HarvesterError> {
        self.call("getSlot", json!([])).await
    }

    pub async fn get_account(&self, pubkey: &Pubkey) -> Result<Option<Account>, HarvesterError> {
        let params = json!([pubkey.to_string(), {"encoding": "base64", "commitment": "confirmed"}]);
        let response: Value = self.call("getAccountInfo", params).await?;

        if response["value"].is_null() {
            return Ok(None);
        }

        let wire: AccountInfoWire =
            serde_json::from_value(response["value"].clone()).map_err(|e| RpcError::Malformed(e.to_string()))?;
        Ok(Some(account_from_wire(wire)?))
    }

    /// `getProgramAccounts` with optional dataSize/memcmp filters — used by
    /// the registry's full rebuild to enumerate every position account.
    pub async fn get_program_accounts(
        &self,
        program_id: &Pubkey,
        filters: &[ProgramAccountFilter],
    ) -> Result<Vec<(Pubkey, Account)>, HarvesterError> {
        let filter_json: Vec<Value> = filters.iter().map(ProgramAccountFilter::to_json).collect();
        let params = json!([
            program_id.to_string(),
            {
                "encoding": "base64",
                "commitment": "confirmed",
                "filters": filter_json,
            }
        ]);

        let wires: Vec<KeyedAccountWire> = self.call("getProgramAccounts", params).await?;
        wires
            .into_iter()
            .map(|w| {
                let pubkey: Pubkey = w
                    .pubkey
                    .parse()
                    .map_err(|e: solana_sdk::pubkey::ParsePubkeyError| RpcError::Malformed(e.to_string()))?;
                Ok((pubkey, account_from_wire(w.account)?))
            })
            .collect()
    }

    pub async fn get_recent_prioritization_fees(
        &self,
        accounts: &[Pubkey],
    ) -> Result<Vec<u64>, HarvesterError> {
        let addrs: Vec<String> = accounts.iter().map(|a| a.to_string()).collect();
        let samples: Vec<PrioritizationFeeSample> =
            self.call("getRecentPrioritizationFees", json!([addrs])).await?;
        Ok(samples.into_iter().map(|s| s.prioritization_fee).collect())
    }

    pub async fn simulate_transaction(&self, transaction: &Transaction) -> Result<SimulationResult, HarvesterError> {
        let tx_data = bincode::serialize(transaction).map_err(|e| RpcError::Malformed(e.to_string()))?;
        let tx_base64 = base64::engine::general_purpose::STANDARD.encode(tx_data);
        let params = json!([tx_base64, {"encoding": "base64", "commitment": "confirmed"}]);

        let envelope: SimulateEnvelopeWire = self.call("simulateTransaction", params).await?;
        Ok(SimulationResult {
            err: envelope.value.err,
            logs: envelope.value.logs.unwrap_or_default(),
            units_consumed: envelope.value.units_consumed,
        })
    }

    pub async fn send_transaction(&self, transaction: &Transaction) -> Result<String, HarvesterError> {
        let tx_data = bincode::serialize(transaction).map_err(|e| RpcError::Malformed(e.to_string()))?;
        let tx_base64 = base64::engine::general_purpose::STANDARD.encode(tx_data);
        let params = json!([tx_base64, {"encoding": "base64", "skipPreflight": false, "maxRetries": 0}]);
        self.call("sendTransaction", params).await
    }

    pub async fn get_signature_statuses(
        &self,
        signatures: &[String],
    ) -> Result<Vec<ConfirmationStatus>, HarvesterError> {
        let params = json!([signatures, {"searchTransactionHistory": false}]);
        let wire: SignatureStatusesWire = self.call("getSignatureStatuses", params).await?;

        Ok(wire
            .value
            .into_iter()
            .map(|entry| match entry {
                None => ConfirmationStatus::Unknown,
                Some(s) if s.err.is_some() => ConfirmationStatus::Failed(s.err.unwrap().to_string()),
                Some(s) => match s.confirmation_status.as_deref() {
                    Some("processed") => ConfirmationStatus::Processed,
                    Some("confirmed") => ConfirmationStatus::Confirmed,
                    Some("finalized") => ConfirmationStatus::Finalized,
                    _ => ConfirmationStatus::Unknown,
                },
            })
            .collect())
    }
}

fn account_from_wire(wire: AccountInfoWire) -> Result<Account, HarvesterError> {
    if wire.data.1 != "base64" {
        return Err(RpcError::Malformed(format!("unsupported encoding {}", wire.data.1)).into());
    }
    let data = base64::engine::general_purpose::STANDARD
        .decode(&wire.data.0)
        .map_err(|e| RpcError::Malformed(e.to_string()))?;
    let owner = wire
        .owner
        .parse()
        .map_err(|e: solana_sdk::pubkey::ParsePubkeyError| RpcError::Malformed(e.to_string()))?;

    Ok(Account {
        lamports: wire.lamports,
        data,
        owner,
        executable: wire.executable,
        rent_epoch: wire.rent_epoch,
    })
}
