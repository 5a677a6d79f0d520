//! Integration Tests - End-to-end Submission and Multisig Flows
//!
//! Tests the interaction between usecases, ports, and mock adapters.
//! Uses mockall for trait mocking and tokio::test for async tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::primitives::{Address, B256, Bytes, U256};
use alloy::sol_types::SolCall;
use mockall::mock;
use tokio::sync::Notify;

use wallet_tx_core::adapters::chain::LocalKeySigner;
use wallet_tx_core::domain::error::TxError;
use wallet_tx_core::domain::fees::{FeeData, FeeOverrides};
use wallet_tx_core::domain::safe::{ISafe, SENTINEL_OWNERS, SafeCall};
use wallet_tx_core::domain::transaction::TxStatus;
use wallet_tx_core::ports::chain::{
    ChainAdapter, ChainError, ChainFamily, ContractCall, ReceiptStatus, SendRequest,
};
use wallet_tx_core::ports::fees::FeeSource;
use wallet_tx_core::ports::signer::{HashSigner, SignerError};
use wallet_tx_core::usecases::{
    ChainRegistry, MultisigEngine, NonceMirror, Submitter, SyncPolicy, TransactionLedger, TxDraft,
    WalletSession,
};

// ---- Mock Definitions ----

mock! {
    pub Chain {}

    #[async_trait::async_trait]
    impl ChainAdapter for Chain {
        fn family(&self) -> ChainFamily;
        fn chain_id(&self) -> u64;
        fn provider_id(&self) -> String;
        fn account_address(&self, address: &Address) -> String;
        async fn get_nonce(&self, account: &str) -> Result<Option<u64>, ChainError>;
        async fn get_balance(&self, account: &str) -> Result<U256, ChainError>;
        async fn get_fee_data(&self) -> Result<FeeData, ChainError>;
        async fn send_transaction(&self, request: &SendRequest) -> Result<String, ChainError>;
        async fn get_receipt(&self, hash: &str) -> Result<Option<ReceiptStatus>, ChainError>;
        async fn call_batch(&self, calls: &[ContractCall]) -> Result<Vec<Bytes>, ChainError>;
        async fn is_healthy(&self) -> bool;
        async fn clear_cache(&self);
    }
}

/// Fee source leaving pricing to the adapter.
struct NoFees;

#[async_trait::async_trait]
impl FeeSource for NoFees {
    async fn overrides(&self, _adapter: &Arc<dyn ChainAdapter>, gas_limit: Option<u64>) -> FeeOverrides {
        FeeOverrides {
            pricing: None,
            gas_limit,
        }
    }
}

/// Signer that parks inside `sign_hash` until released.
struct GatedSigner {
    inner: LocalKeySigner,
    entered: Notify,
    release: Notify,
}

#[async_trait::async_trait]
impl HashSigner for GatedSigner {
    fn address(&self) -> Address {
        self.inner.address()
    }

    async fn sign_hash(&self, hash: &B256) -> Result<[u8; 65], SignerError> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.sign_hash(hash).await
    }
}

/// EVM chain whose first broadcast parks until released.
struct GatedChain {
    nonce_queries: AtomicUsize,
    sent: Mutex<Vec<Option<u64>>>,
    entered: Notify,
    release: Notify,
}

impl GatedChain {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            nonce_queries: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
            entered: Notify::new(),
            release: Notify::new(),
        })
    }
}

#[async_trait::async_trait]
impl ChainAdapter for GatedChain {
    fn family(&self) -> ChainFamily {
        ChainFamily::Evm
    }

    fn chain_id(&self) -> u64 {
        1
    }

    fn provider_id(&self) -> String {
        "gated://1".into()
    }

    fn account_address(&self, address: &Address) -> String {
        address.to_checksum(None)
    }

    async fn get_nonce(&self, _account: &str) -> Result<Option<u64>, ChainError> {
        self.nonce_queries.fetch_add(1, Ordering::SeqCst);
        Ok(Some(4))
    }

    async fn get_balance(&self, _account: &str) -> Result<U256, ChainError> {
        Ok(U256::ZERO)
    }

    async fn get_fee_data(&self) -> Result<FeeData, ChainError> {
        Ok(FeeData::default())
    }

    async fn send_transaction(&self, request: &SendRequest) -> Result<String, ChainError> {
        let first = {
            let mut sent = self.sent.lock().unwrap();
            sent.push(request.nonce);
            sent.len() == 1
        };
        if first {
            self.entered.notify_one();
            self.release.notified().await;
        }
        Ok(format!("0x{:064x}", request.nonce.unwrap_or_default()))
    }

    async fn get_receipt(&self, _hash: &str) -> Result<Option<ReceiptStatus>, ChainError> {
        Ok(None)
    }

    async fn call_batch(&self, _calls: &[ContractCall]) -> Result<Vec<Bytes>, ChainError> {
        Ok(Vec::new())
    }

    async fn is_healthy(&self) -> bool {
        true
    }
}

const ACCOUNT: &str = "0x00000000000000000000000000000000000000aA";
const RECIPIENT: &str = "0x00000000000000000000000000000000000000bb";

fn mock_chain(chain_id: u64, family: ChainFamily) -> MockChain {
    let mut chain = MockChain::new();
    chain.expect_family().return_const(family);
    chain.expect_chain_id().return_const(chain_id);
    chain
        .expect_provider_id()
        .return_const(format!("mock://{chain_id}"));
    chain
        .expect_account_address()
        .returning(|address| address.to_checksum(None));
    chain
}

fn new_submitter() -> (Arc<TransactionLedger>, Arc<Submitter>) {
    let ledger = Arc::new(TransactionLedger::new());
    let mirror = Arc::new(NonceMirror::new(SyncPolicy {
        attempts: 3,
        backoff: Duration::from_millis(10),
    }));
    let submitter = Arc::new(Submitter::new(Arc::clone(&ledger), mirror, Arc::new(NoFees)));
    (ledger, submitter)
}

fn transfer(summary: &str) -> TxDraft {
    TxDraft::transfer(RECIPIENT, U256::from(1_000u64), summary)
}

/// Batched `(nonce, getOwners, getThreshold)` answers of a Safe.
fn safe_reads(owners: &[Address], threshold: u64, nonce: u64) -> Vec<Bytes> {
    vec![
        ISafe::nonceCall::abi_encode_returns(&(U256::from(nonce),)).into(),
        ISafe::getOwnersCall::abi_encode_returns(&(owners.to_vec(),)).into(),
        ISafe::getThresholdCall::abi_encode_returns(&(U256::from(threshold),)).into(),
    ]
}

/// Mutable on-chain Safe state served by the mock.
type SafeState = Arc<Mutex<(Vec<Address>, u64, u64)>>;

fn serve_safe(chain: &mut MockChain, state: &SafeState) {
    let state = Arc::clone(state);
    chain.expect_call_batch().returning(move |calls| {
        assert_eq!(calls.len(), 3);
        let (owners, threshold, nonce) = state.lock().unwrap().clone();
        Ok(safe_reads(&owners, threshold, nonce))
    });
}

fn capture_sends(chain: &mut MockChain, times: usize) -> Arc<Mutex<Vec<SendRequest>>> {
    let sent = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&sent);
    chain
        .expect_send_transaction()
        .times(times)
        .returning(move |request| {
            let mut log = log.lock().unwrap();
            log.push(request.clone());
            Ok(format!("0x{:064x}", log.len()))
        });
    sent
}

// ---- Submitter ----

#[tokio::test]
async fn test_sequential_submissions_advance_nonce() {
    let mut chain = mock_chain(1, ChainFamily::Evm);
    chain
        .expect_get_nonce()
        .times(1)
        .returning(|_| Ok(Some(7)));
    let sent = capture_sends(&mut chain, 3);
    let adapter: Arc<dyn ChainAdapter> = Arc::new(chain);
    let (ledger, submitter) = new_submitter();

    for i in 0..3 {
        let result = submitter
            .submit(&adapter, ACCOUNT, transfer(&format!("Send #{i}")))
            .await;
        assert!(result.success, "submission {i} failed: {:?}", result.error);
        assert!(result.hash.is_some());
    }

    let nonces: Vec<_> = sent.lock().unwrap().iter().map(|r| r.nonce).collect();
    assert_eq!(nonces, vec![Some(7), Some(8), Some(9)]);
    assert_eq!(submitter.mirror().current(ACCOUNT, 1).await, Some(10));
    assert_eq!(ledger.submitted_count().await, 3);
}

#[tokio::test]
async fn test_nonce_conflict_resets_mirror_and_resyncs_once() {
    let mut chain = mock_chain(1, ChainFamily::Evm);
    let queries = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&queries);
    chain.expect_get_nonce().times(2).returning(move |_| {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        Ok(Some(if n == 0 { 3 } else { 5 }))
    });

    let attempts = Arc::new(AtomicUsize::new(0));
    let sends = Arc::clone(&attempts);
    chain
        .expect_send_transaction()
        .times(2)
        .returning(move |request| {
            if sends.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ChainError::Rejected("nonce too low: next nonce 5, tx nonce 3".into()))
            } else {
                assert_eq!(request.nonce, Some(5));
                Ok("0xfeed".into())
            }
        });
    let adapter: Arc<dyn ChainAdapter> = Arc::new(chain);
    let (ledger, submitter) = new_submitter();

    let failed = submitter.submit(&adapter, ACCOUNT, transfer("first")).await;
    assert!(!failed.success);
    assert!(failed.error.unwrap().starts_with("Nonce conflict"));
    assert_eq!(submitter.mirror().current(ACCOUNT, 1).await, None);

    // One network query, then the mirror is set.
    assert_eq!(submitter.mirror().sync(&adapter, ACCOUNT).await, Ok(Some(5)));
    assert_eq!(submitter.mirror().sync(&adapter, ACCOUNT).await, Ok(Some(5)));
    assert_eq!(queries.load(Ordering::SeqCst), 2);

    let ok = submitter.submit(&adapter, ACCOUNT, transfer("retry")).await;
    assert!(ok.success);

    let records = ledger.records().await;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].status, TxStatus::Failed);
    assert!(records[0].hash.is_none());
    assert_eq!(records[1].status, TxStatus::Submitted);
}

#[tokio::test]
async fn test_nonce_conflict_in_http_error_body_resets_mirror() {
    let mut chain = mock_chain(1, ChainFamily::Evm);
    let queries = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&queries);
    chain.expect_get_nonce().times(2).returning(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Some(3))
    });
    chain.expect_send_transaction().times(1).returning(|_| {
        Err(ChainError::Transport(
            r#"HTTP 400 Bad Request: {"jsonrpc":"2.0","id":9,"error":{"code":-32000,"message":"nonce too low"}}"#
                .into(),
        ))
    });
    let adapter: Arc<dyn ChainAdapter> = Arc::new(chain);
    let (_ledger, submitter) = new_submitter();

    assert_eq!(submitter.mirror().sync(&adapter, ACCOUNT).await, Ok(Some(3)));

    let failed = submitter.submit(&adapter, ACCOUNT, transfer("rejected")).await;
    assert!(!failed.success);
    assert_eq!(submitter.mirror().current(ACCOUNT, 1).await, None);

    assert_eq!(submitter.mirror().sync(&adapter, ACCOUNT).await, Ok(Some(3)));
    assert_eq!(queries.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_concurrent_submissions_take_consecutive_nonces() {
    let chain = GatedChain::new();
    let adapter: Arc<dyn ChainAdapter> = Arc::clone(&chain) as Arc<dyn ChainAdapter>;
    let (ledger, submitter) = new_submitter();

    let (first, second) = tokio::join!(
        submitter.submit(&adapter, ACCOUNT, transfer("first")),
        async {
            chain.entered.notified().await;
            let second = submitter.submit(&adapter, ACCOUNT, transfer("second"));
            tokio::pin!(second);
            // Blocked on the mirror while the first send is in flight.
            assert!(
                tokio::time::timeout(Duration::from_millis(50), &mut second)
                    .await
                    .is_err()
            );
            assert_eq!(chain.sent.lock().unwrap().len(), 1);
            chain.release.notify_one();
            second.await
        }
    );

    assert!(first.success, "first failed: {:?}", first.error);
    assert!(second.success, "second failed: {:?}", second.error);
    assert_eq!(*chain.sent.lock().unwrap(), vec![Some(4), Some(5)]);
    assert_eq!(chain.nonce_queries.load(Ordering::SeqCst), 1);
    assert_eq!(submitter.mirror().current(ACCOUNT, 1).await, Some(6));
    assert_eq!(ledger.submitted_count().await, 2);
}

#[tokio::test]
async fn test_rejection_without_nonce_marker_keeps_mirror() {
    let mut chain = mock_chain(1, ChainFamily::Evm);
    chain.expect_get_nonce().times(1).returning(|_| Ok(Some(1)));
    chain
        .expect_send_transaction()
        .times(1)
        .returning(|_| Err(ChainError::Rejected("insufficient funds for gas * price + value".into())));
    let adapter: Arc<dyn ChainAdapter> = Arc::new(chain);
    let (_ledger, submitter) = new_submitter();

    let result = submitter.submit(&adapter, ACCOUNT, transfer("broke")).await;
    assert_eq!(
        result.error.as_deref(),
        Some("insufficient funds for gas * price + value")
    );
    assert_eq!(submitter.mirror().current(ACCOUNT, 1).await, Some(1));
}

#[tokio::test(start_paused = true)]
async fn test_transient_sync_failure_is_retried() {
    let mut chain = mock_chain(1, ChainFamily::Evm);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    chain.expect_get_nonce().times(2).returning(move |_| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(ChainError::Transport("connection reset".into()))
        } else {
            Ok(Some(12))
        }
    });
    let adapter: Arc<dyn ChainAdapter> = Arc::new(chain);
    let (_ledger, submitter) = new_submitter();

    assert_eq!(submitter.mirror().sync(&adapter, ACCOUNT).await, Ok(Some(12)));
}

#[tokio::test]
async fn test_tron_skips_nonce_mirror() {
    let mut chain = mock_chain(728_126_428, ChainFamily::Tron);
    chain.expect_get_nonce().times(0);
    let sent = capture_sends(&mut chain, 1);
    let adapter: Arc<dyn ChainAdapter> = Arc::new(chain);
    let (ledger, submitter) = new_submitter();

    let result = submitter
        .submit(
            &adapter,
            "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t",
            TxDraft::transfer("TJRabPrwbZy45sbavfcjinPJC18kjpRTv8", U256::from(1u64), "TRX"),
        )
        .await;
    assert!(result.success);
    assert_eq!(sent.lock().unwrap()[0].nonce, None);
    assert_eq!(ledger.submitted_count().await, 1);
}

#[tokio::test]
async fn test_empty_account_is_not_ready() {
    let chain = mock_chain(1, ChainFamily::Evm);
    let adapter: Arc<dyn ChainAdapter> = Arc::new(chain);
    let (ledger, submitter) = new_submitter();

    let result = submitter.submit(&adapter, "", transfer("nobody")).await;
    assert!(!result.success);
    assert!(result.error.unwrap().starts_with("Not ready"));
    assert!(ledger.records().await.is_empty());
}

// ---- Session ----

#[tokio::test]
async fn test_session_requires_account_and_registered_chain() {
    let registry = Arc::new(ChainRegistry::new());
    registry
        .insert(Arc::new(mock_chain(1, ChainFamily::Evm)))
        .await;
    let (_ledger, submitter) = new_submitter();
    let session = WalletSession::new(registry, submitter, 1);

    assert!(matches!(session.balance().await, Err(TxError::NotReady(_))));
    assert!(!session.send(transfer("no account")).await.success);
    assert!(matches!(
        session.switch_chain(56).await,
        Err(TxError::NotReady(_))
    ));
    assert_eq!(session.scope().chain_id, 1);
}

#[tokio::test]
async fn test_replace_provider_clears_cache_and_mirror() {
    let mut old = mock_chain(1, ChainFamily::Evm);
    old.expect_get_nonce().times(1).returning(|_| Ok(Some(4)));
    old.expect_clear_cache().times(1).return_const(());
    let old: Arc<dyn ChainAdapter> = Arc::new(old);

    let registry = Arc::new(ChainRegistry::new());
    registry.insert(Arc::clone(&old)).await;
    let (_ledger, submitter) = new_submitter();
    let session = WalletSession::new(Arc::clone(&registry), Arc::clone(&submitter), 1);

    let signer = LocalKeySigner::random();
    session.switch_account(signer.address()).await;
    let account = signer.address().to_checksum(None);
    assert_eq!(submitter.mirror().sync(&old, &account).await, Ok(Some(4)));

    session
        .replace_provider(Arc::new(mock_chain(1, ChainFamily::Evm)))
        .await;
    assert_eq!(submitter.mirror().current(&account, 1).await, None);
    assert!(!Arc::ptr_eq(&registry.get(1).await.unwrap(), &old));
}

#[tokio::test]
async fn test_switch_chain_invalidates_mirrors() {
    let mut mainnet = mock_chain(1, ChainFamily::Evm);
    mainnet.expect_get_nonce().times(1).returning(|_| Ok(Some(9)));
    let mainnet: Arc<dyn ChainAdapter> = Arc::new(mainnet);

    let registry = Arc::new(ChainRegistry::new());
    registry.insert(Arc::clone(&mainnet)).await;
    registry
        .insert(Arc::new(mock_chain(137, ChainFamily::Evm)))
        .await;
    let (_ledger, submitter) = new_submitter();
    let session = WalletSession::new(registry, Arc::clone(&submitter), 1);
    let mut scope = session.subscribe();

    assert_eq!(submitter.mirror().sync(&mainnet, ACCOUNT).await, Ok(Some(9)));
    session.switch_chain(137).await.unwrap();

    assert!(scope.has_changed().unwrap());
    assert_eq!(scope.borrow_and_update().chain_id, 137);
    assert_eq!(submitter.mirror().current(ACCOUNT, 1).await, None);
}

// ---- Multisig ----

fn engine() -> (Arc<TransactionLedger>, MultisigEngine) {
    let (ledger, submitter) = new_submitter();
    (ledger, MultisigEngine::new(submitter))
}

fn safe_address() -> Address {
    Address::repeat_byte(0x5a)
}

fn payment() -> SafeCall {
    SafeCall {
        to: Address::repeat_byte(0xbb),
        value: U256::from(10u64),
        data: Bytes::new(),
    }
}

#[tokio::test]
async fn test_flash_execution_broadcasts_without_pending_entry() {
    let owner = LocalKeySigner::random();
    let state: SafeState = Arc::new(Mutex::new((vec![owner.address()], 1, 4)));

    let mut chain = mock_chain(1, ChainFamily::Evm);
    serve_safe(&mut chain, &state);
    chain.expect_get_nonce().returning(|_| Ok(Some(0)));
    let sent = capture_sends(&mut chain, 1);
    let adapter: Arc<dyn ChainAdapter> = Arc::new(chain);
    let (ledger, engine) = engine();

    let receipt = engine
        .propose(&adapter, &owner, safe_address(), payment(), "Pay")
        .await;
    assert!(receipt.outcome.success);
    assert!(receipt.outcome.hash.is_some());
    assert_eq!(receipt.proposal_id, None);
    assert!(engine.pending(1, safe_address()).await.is_empty());

    let request = sent.lock().unwrap()[0].clone();
    assert_eq!(request.to, safe_address().to_checksum(None));
    assert_eq!(request.from, owner.address().to_checksum(None));
    let exec = ISafe::execTransactionCall::abi_decode(&request.data, true).unwrap();
    assert_eq!(exec.to, payment().to);
    assert_eq!(exec.signatures.len(), 65);
    assert!(exec.signatures[64] == 27 || exec.signatures[64] == 28);
    assert_eq!(ledger.submitted_count().await, 1);
}

#[tokio::test]
async fn test_non_owner_is_denied() {
    let stranger = LocalKeySigner::random();
    let state: SafeState = Arc::new(Mutex::new((vec![Address::repeat_byte(1)], 1, 0)));

    let mut chain = mock_chain(1, ChainFamily::Evm);
    serve_safe(&mut chain, &state);
    chain.expect_send_transaction().times(0);
    let adapter: Arc<dyn ChainAdapter> = Arc::new(chain);
    let (_ledger, engine) = engine();

    let receipt = engine
        .propose(&adapter, &stranger, safe_address(), payment(), "Pay")
        .await;
    assert!(!receipt.outcome.success);
    assert_eq!(
        receipt.outcome.error,
        Some(TxError::OwnershipDenied(stranger.address()).to_string())
    );
}

#[tokio::test]
async fn test_quorum_required_and_signatures_sorted() {
    let alice = LocalKeySigner::random();
    let bob = LocalKeySigner::random();
    let carol = Address::repeat_byte(0xcc);
    let state: SafeState = Arc::new(Mutex::new((
        vec![alice.address(), bob.address(), carol],
        2,
        0,
    )));

    let mut chain = mock_chain(1, ChainFamily::Evm);
    serve_safe(&mut chain, &state);
    chain.expect_get_nonce().returning(|_| Ok(Some(0)));
    let sent = capture_sends(&mut chain, 1);
    let adapter: Arc<dyn ChainAdapter> = Arc::new(chain);
    let (_ledger, engine) = engine();

    let receipt = engine
        .propose(&adapter, &alice, safe_address(), payment(), "Pay")
        .await;
    assert!(receipt.outcome.success);
    assert!(receipt.outcome.hash.is_none());
    let id = receipt.proposal_id.expect("proposal queued");

    let short = engine.execute(&adapter, &alice, &id).await;
    assert_eq!(
        short.error.as_deref(),
        Some("Insufficient signatures: 1 of 2 required")
    );
    assert!(sent.lock().unwrap().is_empty());
    assert!(engine.proposal(&id).await.is_some());

    assert!(engine.co_sign(&adapter, &bob, &id).await.success);
    let proposal = engine.proposal(&id).await.unwrap();
    assert_eq!(proposal.signatures.len(), 2);

    let executed = engine.execute(&adapter, &bob, &id).await;
    assert!(executed.success, "{:?}", executed.error);
    assert!(engine.proposal(&id).await.is_none());

    let request = sent.lock().unwrap()[0].clone();
    let exec = ISafe::execTransactionCall::abi_decode(&request.data, true).unwrap();
    let (low, high) = if alice.address() < bob.address() {
        (alice.address(), bob.address())
    } else {
        (bob.address(), alice.address())
    };
    let mut expected = proposal.signatures[&low].to_vec();
    expected.extend_from_slice(&proposal.signatures[&high]);
    assert_eq!(exec.signatures.to_vec(), expected);
}

#[tokio::test]
async fn test_removed_owner_signature_does_not_count() {
    let alice = LocalKeySigner::random();
    let bob = LocalKeySigner::random();
    let carol = Address::repeat_byte(0xcc);
    let state: SafeState = Arc::new(Mutex::new((vec![alice.address(), bob.address()], 2, 0)));

    let mut chain = mock_chain(1, ChainFamily::Evm);
    serve_safe(&mut chain, &state);
    chain.expect_send_transaction().times(0);
    let adapter: Arc<dyn ChainAdapter> = Arc::new(chain);
    let (_ledger, engine) = engine();

    let id = engine
        .propose(&adapter, &alice, safe_address(), payment(), "Pay")
        .await
        .proposal_id
        .unwrap();
    assert!(engine.co_sign(&adapter, &bob, &id).await.success);

    // Bob is replaced by Carol before execution.
    state.lock().unwrap().0 = vec![alice.address(), carol];

    let result = engine.execute(&adapter, &alice, &id).await;
    assert_eq!(
        result.error.as_deref(),
        Some("Insufficient signatures: 1 of 2 required")
    );
    assert!(engine.proposal(&id).await.is_some());
}

#[tokio::test]
async fn test_proposals_take_successive_nonces_and_go_stale() {
    let alice = LocalKeySigner::random();
    let bob = LocalKeySigner::random();
    let state: SafeState = Arc::new(Mutex::new((vec![alice.address(), bob.address()], 2, 3)));

    let mut chain = mock_chain(1, ChainFamily::Evm);
    serve_safe(&mut chain, &state);
    chain.expect_send_transaction().times(0);
    let adapter: Arc<dyn ChainAdapter> = Arc::new(chain);
    let (_ledger, engine) = engine();

    let first = engine
        .propose(&adapter, &alice, safe_address(), payment(), "one")
        .await
        .proposal_id
        .unwrap();
    let second = engine
        .propose(&adapter, &alice, safe_address(), payment(), "two")
        .await
        .proposal_id
        .unwrap();

    let pending = engine.pending(1, safe_address()).await;
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].nonce, 3);
    assert_eq!(pending[1].nonce, 4);
    assert_ne!(pending[0].safe_tx_hash, pending[1].safe_tx_hash);

    // The Safe moved past both nonces elsewhere.
    state.lock().unwrap().2 = 5;
    let result = engine.execute(&adapter, &alice, &first).await;
    assert_eq!(
        result.error,
        Some(TxError::StaleProposal { proposal: 3, current: 5 }.to_string())
    );

    assert!(engine.discard(&first).await);
    assert!(engine.discard(&second).await);
    assert!(!engine.discard(&second).await);
}

#[tokio::test]
async fn test_concurrent_build_fails_fast() {
    let alice = GatedSigner {
        inner: LocalKeySigner::random(),
        entered: Notify::new(),
        release: Notify::new(),
    };
    let state: SafeState = Arc::new(Mutex::new((vec![alice.address()], 2, 0)));

    let mut chain = mock_chain(1, ChainFamily::Evm);
    serve_safe(&mut chain, &state);
    let adapter: Arc<dyn ChainAdapter> = Arc::new(chain);
    let (_ledger, engine) = engine();

    let (first, second) = tokio::join!(
        engine.propose(&adapter, &alice, safe_address(), payment(), "first"),
        async {
            alice.entered.notified().await;
            let second = engine
                .propose(&adapter, &alice.inner, safe_address(), payment(), "second")
                .await;
            alice.release.notify_one();
            second
        }
    );

    assert!(first.proposal_id.is_some());
    assert_eq!(
        second.outcome.error,
        Some(TxError::ProposalInFlight(safe_address()).to_string())
    );
}

#[tokio::test]
async fn test_remove_first_owner_uses_sentinel() {
    let alice = LocalKeySigner::random();
    let bob = Address::repeat_byte(0x0b);
    let carol = Address::repeat_byte(0x0c);
    let state: SafeState = Arc::new(Mutex::new((vec![bob, alice.address(), carol], 2, 0)));

    let mut chain = mock_chain(1, ChainFamily::Evm);
    serve_safe(&mut chain, &state);
    let adapter: Arc<dyn ChainAdapter> = Arc::new(chain);
    let (_ledger, engine) = engine();

    let id = engine
        .remove_owner(&adapter, &alice, safe_address(), bob, 2)
        .await
        .proposal_id
        .unwrap();
    let proposal = engine.proposal(&id).await.unwrap();
    assert_eq!(proposal.to, safe_address());
    let call = ISafe::removeOwnerCall::abi_decode(&proposal.data, true).unwrap();
    assert_eq!(call.prevOwner, SENTINEL_OWNERS);
    assert_eq!(call.owner, bob);

    let too_high = engine
        .remove_owner(&adapter, &alice, safe_address(), carol, 3)
        .await;
    assert!(too_high.outcome.error.unwrap().starts_with("Invalid owner change"));

    let existing = engine
        .add_owner(&adapter, &alice, safe_address(), carol, 2)
        .await;
    assert!(existing.outcome.error.unwrap().contains("already an owner"));

    let zero = engine
        .change_threshold(&adapter, &alice, safe_address(), 0)
        .await;
    assert!(!zero.outcome.success);
}

#[tokio::test]
async fn test_pending_snapshot_round_trip() {
    let alice = LocalKeySigner::random();
    let state: SafeState = Arc::new(Mutex::new((vec![alice.address(), Address::repeat_byte(2)], 2, 0)));

    let mut chain = mock_chain(1, ChainFamily::Evm);
    serve_safe(&mut chain, &state);
    let adapter: Arc<dyn ChainAdapter> = Arc::new(chain);
    let (_ledger, engine) = engine();

    let id = engine
        .change_threshold(&adapter, &alice, safe_address(), 1)
        .await
        .proposal_id
        .unwrap();
    let snapshot = engine.pending_snapshot().await;
    let json = serde_json::to_string(&snapshot).unwrap();

    let (_ledger, restored) = self::engine();
    restored
        .restore_pending(serde_json::from_str(&json).unwrap())
        .await;
    assert_eq!(restored.proposal(&id).await, engine.proposal(&id).await);
}
