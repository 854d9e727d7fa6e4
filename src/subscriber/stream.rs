//! Real account-update stream transport, built on Yellowstone's Dragon's
//! Mouth gRPC service. Replaces the stub the reference consumer shipped
//! with: connects, subscribes, pumps updates into the subscriber, sends
//! periodic pings, and reconnects with exponential backoff on any failure.

use super::Subscriber;
use crate::config::StreamConfig;
use crate::core::error::{HarvesterResult, StreamError};
use futures::StreamExt;
use solana_sdk::pubkey::Pubkey;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, ClientTlsConfig};
use tracing::{error, info, warn};
use yellowstone_grpc_client::GeyserGrpcClient;
use yellowstone_grpc_proto::geyser::{
    subscribe_update::UpdateOneof, CommitmentLevel, SubscribeRequest, SubscribeRequestFilterAccounts,
    SubscribeRequestPing,
};

/// Drives the subscription loop forever, reconnecting on any failure until
/// `cancel` fires. Each iteration does a full rebuild first (catch-up for
/// whatever was missed while disconnected) and then streams until the
/// connection drops.
pub async fn run(subscriber: Arc<Subscriber>, cancel: CancellationToken) {
    let mut backoff = subscriber_config(&subscriber).reconnect_base;

    loop {
        if cancel.is_cancelled() {
            return;
        }

        if let Err(e) = subscriber.rebuild_registry().await {
            warn!(error = %e, "pre-subscribe rebuild failed, continuing anyway");
        }

        match run_once(&subscriber, &cancel).await {
            Ok(()) => {
                info!("stream ended cleanly, reconnecting");
                backoff = subscriber_config(&subscriber).reconnect_base;
            }
            Err(e) => {
                warn!(error = %e, backoff = ?backoff, "stream disconnected, reconnecting after backoff");
                subscriber.note_reconnect();
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = cancel.cancelled() => return,
                }
                let max = subscriber_config(&subscriber).reconnect_max;
                backoff = std::cmp::min(backoff * 2, max);
            }
        }
    }
}

fn subscriber_config(subscriber: &Subscriber) -> &StreamConfig {
    &subscriber.config
}

async fn run_once(subscriber: &Arc<Subscriber>, cancel: &CancellationToken) -> HarvesterResult<()> {
    let config = &subscriber.config;
    let channel = build_channel(&config.grpc_endpoint).await?;
    let mut client = GeyserGrpcClient::new(config.grpc_token.clone(), Some(channel));

    let request = build_subscribe_request(subscriber).await;
    let (mut sink, mut stream) = client
        .subscribe_with_request(Some(request))
        .await
        .map_err(|e| StreamError::Transport(e.to_string()))?;

    let (ping_tx, mut ping_rx) = mpsc::channel::<()>(1);
    let ping_interval = config.ping_interval;
    let ping_timeout = config.ping_timeout;

    let pinger = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(ping_interval);
        loop {
            ticker.tick().await;
            if ping_tx.send(()).await.is_err() {
                return;
            }
        }
    });

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                pinger.abort();
                return Ok(());
            }
            _ = ping_rx.recv() => {
                let ping = SubscribeRequest {
                    ping: Some(SubscribeRequestPing { id: 1 }),
                    ..Default::default()
                };
                if sink.send(ping).await.is_err() {
                    pinger.abort();
                    return Err(StreamError::Disconnected.into());
                }
                if subscriber.seconds_since_last_pong() > ping_timeout.as_secs() && subscriber.seconds_since_last_pong() > 0 {
                    pinger.abort();
                    return Err(StreamError::PingTimeout(ping_timeout).into());
                }
            }
            message = stream.next() => {
                match message {
                    Some(Ok(update)) => {
                        handle_update(subscriber, update).await;
                        if subscriber.take_resubscribe_request() {
                            info!("new pool discovered, reconnecting to extend subscription filter");
                            pinger.abort();
                            return Ok(());
                        }
                    }
                    Some(Err(e)) => {
                        pinger.abort();
                        return Err(StreamError::Transport(e.to_string()).into());
                    }
                    None => {
                        pinger.abort();
                        return Err(StreamError::Disconnected.into());
                    }
                }
            }
        }
    }
}

async fn handle_update(subscriber: &Arc<Subscriber>, update: yellowstone_grpc_proto::geyser::SubscribeUpdate) {
    match update.update_oneof {
        Some(UpdateOneof::Account(acc)) => {
            if let Some(info) = acc.account {
                if let Ok(pubkey) = pubkey_from_bytes(&info.pubkey) {
                    subscriber.handle_account_update(pubkey, Some(info.data)).await;
                }
            }
        }
        Some(UpdateOneof::Pong(_)) => {
            subscriber.record_pong();
        }
        _ => {}
    }
}

fn pubkey_from_bytes(bytes: &[u8]) -> Result<Pubkey, StreamError> {
    if bytes.len() != 32 {
        return Err(StreamError::Transport(format!("invalid pubkey length {}", bytes.len())));
    }
    let mut arr = [0u8; 32];
    arr.copy_from_slice(bytes);
    Ok(Pubkey::from(arr))
}

async fn build_channel(endpoint: &str) -> HarvesterResult<Channel> {
    let tls = ClientTlsConfig::new();
    let channel = Channel::from_shared(endpoint.to_string())
        .map_err(|e| StreamError::Transport(e.to_string()))?
        .tls_config(tls)
        .map_err(|e| StreamError::Transport(e.to_string()))?
        .timeout(Duration::from_secs(10))
        .connect()
        .await
        .map_err(|e| StreamError::Transport(e.to_string()))?;
    Ok(channel)
}

/// Build the filter set: one group per watched pool (constrained by
/// account data size), plus one group matching the program owner for
/// position accounts.
async fn build_subscribe_request(subscriber: &Arc<Subscriber>) -> SubscribeRequest {
    let pools = { subscriber.registry().read().await.watched_pools() };

    let mut accounts = HashMap::new();
    if !pools.is_empty() {
        accounts.insert(
            "watched_pools".to_string(),
            SubscribeRequestFilterAccounts {
                account: pools.iter().map(|p| p.to_string()).collect(),
                owner: vec![],
                filters: vec![],
                nonempty_txn_signature: None,
            },
        );
    }

    accounts.insert(
        "positions".to_string(),
        SubscribeRequestFilterAccounts {
            account: vec![],
            owner: vec![subscriber.program_id.to_string()],
            filters: vec![],
            nonempty_txn_signature: None,
        },
    );

    SubscribeRequest {
        accounts,
        commitment: Some(CommitmentLevel::Confirmed as i32),
        ..Default::default()
    }
}
