//! The one signing identity the process acts for.

use crate::{
    error::SessionError,
    types::Address,
};
use futures::{
    StreamExt,
    stream::BoxStream,
};
use std::{
    future::Future,
    sync::Arc,
};
use tokio::{
    sync::{
        Mutex,
        watch,
    },
    task::JoinHandle,
};

pub mod rpc_wallet;

/// What the session needs from a wallet, and nothing more.
pub trait WalletProvider: Send + Sync + 'static {
    /// Asks the wallet to authorize accounts; may prompt the user.
    fn request_accounts(
        &self,
    ) -> impl Future<Output = Result<Vec<Address>, SessionError>> + Send;

    /// The already-authorized account, if any, without prompting.
    fn current_address(
        &self,
    ) -> impl Future<Output = Result<Option<Address>, SessionError>> + Send;

    /// Every change of the wallet's selected account. `None` means the
    /// wallet no longer exposes any account.
    fn account_changes(&self) -> BoxStream<'static, Option<Address>>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionState {
    pub address: Option<Address>,
    /// Bumped on every identity change, so A -> B -> A is still observable.
    pub epoch: u64,
}

pub struct AccountSession<W> {
    provider: Option<W>,
    state: watch::Sender<SessionState>,
    connect_lock: Mutex<()>,
}

impl<W: WalletProvider> AccountSession<W> {
    pub fn new(provider: W) -> Self {
        Self::with_provider(Some(provider))
    }

    pub fn without_provider() -> Self {
        Self::with_provider(None)
    }

    fn with_provider(provider: Option<W>) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        Self {
            provider,
            state,
            connect_lock: Mutex::new(()),
        }
    }

    /// Connects to the wallet's first account. While already connected this
    /// returns the active address without prompting again.
    pub async fn connect(&self) -> Result<Address, SessionError> {
        let _guard = self.connect_lock.lock().await;
        if let Some(address) = self.current() {
            return Ok(address);
        }
        let provider = self.provider.as_ref().ok_or(SessionError::NoProvider)?;
        let accounts = provider.request_accounts().await?;
        let address = accounts.first().copied().ok_or(SessionError::NoAccounts)?;
        tracing::info!(%address, "wallet connected");
        self.set_address(Some(address));
        Ok(address)
    }

    /// Adopts an account the wallet already authorized, without prompting.
    pub async fn restore(&self) -> Result<Option<Address>, SessionError> {
        let _guard = self.connect_lock.lock().await;
        if let Some(address) = self.current() {
            return Ok(Some(address));
        }
        let provider = self.provider.as_ref().ok_or(SessionError::NoProvider)?;
        let restored = provider.current_address().await?;
        if let Some(address) = restored {
            tracing::info!(%address, "restored wallet session");
            self.set_address(Some(address));
        }
        Ok(restored)
    }

    pub fn disconnect(&self) {
        if let Some(address) = self.current() {
            tracing::info!(%address, "wallet disconnected");
        }
        self.set_address(None);
    }

    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    pub fn current(&self) -> Option<Address> {
        self.state.borrow().address
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Applies an account switch reported by the wallet. Ignored while no
    /// account is connected.
    pub fn apply_account_change(&self, address: Option<Address>) {
        if self.current().is_none() {
            tracing::debug!(?address, "ignoring account change while disconnected");
            return;
        }
        if self.current() != address {
            tracing::warn!(?address, "wallet switched accounts");
        }
        self.set_address(address);
    }

    /// Calls `listener` with the new address after every identity change.
    pub fn on_account_changed<F>(&self, mut listener: F) -> JoinHandle<()>
    where
        F: FnMut(Option<Address>) + Send + 'static,
    {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let address = rx.borrow_and_update().address;
                listener(address);
            }
        })
    }

    fn set_address(&self, address: Option<Address>) {
        self.state.send_if_modified(|state| {
            if state.address == address {
                return false;
            }
            state.address = address;
            state.epoch += 1;
            true
        });
    }
}

impl<W: WalletProvider> AccountSession<W> {
    /// Forwards the wallet's account-change stream into the session until the
    /// stream ends. Returns `None` when there is no provider to follow.
    pub fn follow_provider(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let mut changes = self.provider.as_ref()?.account_changes();
        let session = Arc::clone(self);
        Some(tokio::spawn(async move {
            while let Some(address) = changes.next().await {
                session.apply_account_change(address);
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::test_helpers::FakeWallet;

    #[tokio::test]
    async fn connect__fails_without_provider() {
        // given
        let session = AccountSession::<FakeWallet>::without_provider();

        // when
        let result = session.connect().await;

        // then
        assert_eq!(result, Err(SessionError::NoProvider));
        assert_eq!(session.current(), None);
    }

    #[tokio::test]
    async fn connect__is_idempotent_and_prompts_once() {
        // given
        let alice = Address::repeat_byte(1);
        let wallet = FakeWallet::with_accounts(vec![alice]);
        let session = AccountSession::new(wallet.clone());

        // when
        let first = session.connect().await.unwrap();
        let second = session.connect().await.unwrap();

        // then
        assert_eq!(first, alice);
        assert_eq!(second, alice);
        assert_eq!(wallet.request_count(), 1);
        assert_eq!(session.state().epoch, 1);
    }

    #[tokio::test]
    async fn connect__surfaces_denial() {
        // given
        let wallet = FakeWallet::denying("User denied account access");
        let session = AccountSession::new(wallet);

        // when
        let result = session.connect().await;

        // then
        assert!(matches!(result, Err(SessionError::Denied(_))));
    }

    #[tokio::test]
    async fn connect__without_accounts_reports_no_accounts() {
        let session = AccountSession::new(FakeWallet::with_accounts(vec![]));
        assert_eq!(session.connect().await, Err(SessionError::NoAccounts));
    }

    #[tokio::test]
    async fn restore__adopts_authorized_account_without_prompt() {
        // given
        let alice = Address::repeat_byte(1);
        let wallet = FakeWallet::with_accounts(vec![alice]);
        let session = AccountSession::new(wallet.clone());

        // when
        let restored = session.restore().await.unwrap();

        // then
        assert_eq!(restored, Some(alice));
        assert_eq!(session.current(), Some(alice));
        assert_eq!(wallet.request_count(), 0);
    }

    #[tokio::test]
    async fn apply_account_change__bumps_epoch_even_when_returning() {
        // given
        let alice = Address::repeat_byte(1);
        let bob = Address::repeat_byte(2);
        let session = AccountSession::new(FakeWallet::with_accounts(vec![alice]));
        session.connect().await.unwrap();
        let before = session.state();

        // when
        session.apply_account_change(Some(bob));
        session.apply_account_change(Some(alice));

        // then
        let after = session.state();
        assert_eq!(after.address, Some(alice));
        assert_eq!(after.epoch, before.epoch + 2);
    }

    #[tokio::test]
    async fn apply_account_change__is_ignored_while_disconnected() {
        let session = AccountSession::new(FakeWallet::with_accounts(vec![]));
        session.apply_account_change(Some(Address::repeat_byte(9)));
        assert_eq!(session.current(), None);
        assert_eq!(session.state().epoch, 0);
    }

    #[tokio::test]
    async fn disconnect__clears_identity_and_notifies() {
        // given
        let alice = Address::repeat_byte(1);
        let session = AccountSession::new(FakeWallet::with_accounts(vec![alice]));
        session.connect().await.unwrap();
        let mut rx = session.subscribe();

        // when
        session.disconnect();

        // then
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().address, None);
        assert_eq!(session.current(), None);
    }

    #[tokio::test]
    async fn follow_provider__applies_wallet_switches() {
        // given
        let alice = Address::repeat_byte(1);
        let bob = Address::repeat_byte(2);
        let wallet = FakeWallet::with_accounts(vec![alice]);
        let session = Arc::new(AccountSession::new(wallet.clone()));
        session.connect().await.unwrap();
        let mut rx = session.subscribe();
        let _follower = session.follow_provider().unwrap();

        // when
        wallet.switch_account(Some(bob));

        // then
        rx.changed().await.unwrap();
        assert_eq!(session.current(), Some(bob));
    }

    #[tokio::test]
    async fn on_account_changed__invokes_listener() {
        // given
        let alice = Address::repeat_byte(1);
        let session = AccountSession::new(FakeWallet::with_accounts(vec![alice]));
        let (tx, mut seen) = tokio::sync::mpsc::unbounded_channel();
        let _listener = session.on_account_changed(move |address| {
            let _ = tx.send(address);
        });

        // when
        session.connect().await.unwrap();

        // then
        assert_eq!(seen.recv().await, Some(Some(alice)));
    }
}
