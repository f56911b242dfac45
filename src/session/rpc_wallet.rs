use super::WalletProvider;
use crate::{
    error::SessionError,
    rpc::JsonRpcTransport,
    types::Address,
};
use futures::{
    StreamExt,
    stream::{
        self,
        BoxStream,
    },
};
use serde_json::json;
use std::{
    str::FromStr,
    time::Duration,
};
use tokio::time;

pub const DEFAULT_ACCOUNT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Wallet reached through the node's account RPCs. Account switches are
/// detected by polling `eth_accounts`.
#[derive(Clone)]
pub struct RpcWalletProvider {
    transport: JsonRpcTransport,
    poll_interval: Duration,
}

impl RpcWalletProvider {
    pub fn new(transport: JsonRpcTransport, poll_interval: Duration) -> Self {
        Self {
            transport,
            poll_interval,
        }
    }
}

async fn fetch_accounts(
    transport: &JsonRpcTransport,
    method: &str,
) -> Result<Vec<Address>, SessionError> {
    let raw: Vec<String> = transport.call(method, json!([])).await?;
    raw.iter()
        .map(|entry| {
            Address::from_str(entry).map_err(|e| {
                SessionError::Transport(format!("wallet returned bad address '{entry}': {e}"))
            })
        })
        .collect()
}

impl WalletProvider for RpcWalletProvider {
    async fn request_accounts(&self) -> Result<Vec<Address>, SessionError> {
        fetch_accounts(&self.transport, "eth_requestAccounts").await
    }

    async fn current_address(&self) -> Result<Option<Address>, SessionError> {
        Ok(fetch_accounts(&self.transport, "eth_accounts")
            .await?
            .first()
            .copied())
    }

    fn account_changes(&self) -> BoxStream<'static, Option<Address>> {
        let transport = self.transport.clone();
        let interval = self.poll_interval;
        stream::unfold(None::<Option<Address>>, move |last| {
            let transport = transport.clone();
            async move {
                loop {
                    time::sleep(interval).await;
                    match fetch_accounts(&transport, "eth_accounts").await {
                        Ok(accounts) => {
                            let current = accounts.first().copied();
                            if last != Some(current) {
                                return Some((current, Some(current)));
                            }
                        }
                        Err(err) => {
                            tracing::warn!(%err, "polling wallet accounts failed");
                        }
                    }
                }
            }
        })
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::rpc::mock_node::{
        MockNode,
        Reply,
    };
    use std::sync::atomic::{
        AtomicUsize,
        Ordering,
    };

    /// A node whose `eth_accounts` walks through `script`, repeating the last
    /// entry once exhausted.
    async fn scripted_node(script: Vec<Reply>) -> MockNode {
        let polls = AtomicUsize::new(0);
        MockNode::start(move |method, _| match method {
            "eth_accounts" => {
                let at = polls.fetch_add(1, Ordering::SeqCst).min(script.len() - 1);
                script[at].clone()
            }
            "eth_requestAccounts" => Err((4001, "User rejected the request.".to_string())),
            other => Err((-32601, format!("method {other} not found"))),
        })
        .await
    }

    fn accounts(addresses: &[Address]) -> Reply {
        let raw: Vec<String> = addresses.iter().map(Address::to_string).collect();
        Ok(json!(raw))
    }

    fn provider(node: &MockNode) -> RpcWalletProvider {
        let transport = JsonRpcTransport::new(node.url(), Duration::from_secs(5)).unwrap();
        RpcWalletProvider::new(transport, Duration::from_millis(10))
    }

    #[tokio::test]
    async fn account_changes__emits_only_when_selection_changes() {
        // given
        let alice = Address::repeat_byte(1);
        let bob = Address::repeat_byte(2);
        let node = scripted_node(vec![
            accounts(&[alice]),
            accounts(&[alice, bob]),
            accounts(&[bob]),
            accounts(&[bob]),
            accounts(&[]),
        ])
        .await;

        // when
        let changes: Vec<_> = provider(&node).account_changes().take(3).collect().await;

        // then
        assert_eq!(changes, vec![Some(alice), Some(bob), None]);
        assert_eq!(node.calls("eth_accounts"), 5);
    }

    #[tokio::test]
    async fn account_changes__skips_failed_polls() {
        // given
        let alice = Address::repeat_byte(1);
        let node = scripted_node(vec![
            Err((-32005, "rate limit exceeded".to_string())),
            accounts(&[alice]),
        ])
        .await;

        // when
        let first = provider(&node).account_changes().next().await;

        // then
        assert_eq!(first, Some(Some(alice)));
        assert_eq!(node.calls("eth_accounts"), 2);
    }

    #[tokio::test]
    async fn request_accounts__user_rejection_is_denied() {
        let node = scripted_node(vec![accounts(&[])]).await;

        let result = provider(&node).request_accounts().await;

        assert_eq!(
            result,
            Err(SessionError::Denied("User rejected the request.".to_string()))
        );
    }

    #[tokio::test]
    async fn current_address__reads_first_account_without_prompting() {
        let alice = Address::repeat_byte(1);
        let node = scripted_node(vec![accounts(&[alice, Address::repeat_byte(2)])]).await;

        let current = provider(&node).current_address().await;

        assert_eq!(current, Ok(Some(alice)));
        assert_eq!(node.calls("eth_requestAccounts"), 0);
    }
}
