//! End-to-end scenarios for the asynchronous top-up pipeline, driven through
//! in-memory doubles of the store and broker ports.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::Utc;
use futures_util::StreamExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use wallet_core::domain::{Account, Transaction, TransactionStatus};
use wallet_core::messaging::TopUpMessage;
use wallet_core::ports::{
    AccountRepository, BrokerError, BrokerPort, BrokerResult, DeliveryStream, Disposition,
    InboundMessage, MessageSettler, RepositoryError, RepositoryResult, TransactionRepository,
};
use wallet_core::use_cases::{CreateTopUp, TopUpError, TopUpInput};
use wallet_core::worker::TopUpWorker;

fn dec(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap()
}

fn account(number: &str, balance: &str) -> Account {
    Account {
        id: Uuid::new_v4(),
        account_number: number.to_string(),
        balance: dec(balance),
        currency: "IDR".to_string(),
        updated_at: Utc::now(),
    }
}

fn payload_for(tx: &Transaction) -> Vec<u8> {
    serde_json::to_vec(&TopUpMessage {
        transaction_id: tx.transaction_id,
        account_number: tx.account_number.clone(),
        amount: tx.amount.clone(),
        currency: "IDR".to_string(),
        created_at: Utc::now(),
    })
    .unwrap()
}

#[derive(Default)]
struct InMemoryAccounts {
    rows: Mutex<HashMap<String, Account>>,
    fail_balance_write: AtomicBool,
}

impl InMemoryAccounts {
    async fn insert(&self, account: Account) {
        self.rows
            .lock()
            .await
            .insert(account.account_number.clone(), account);
    }

    async fn balance_of(&self, number: &str) -> Option<BigDecimal> {
        self.rows
            .lock()
            .await
            .get(number)
            .map(|a| a.balance.clone())
    }

    async fn is_empty(&self) -> bool {
        self.rows.lock().await.is_empty()
    }
}

#[async_trait]
impl AccountRepository for InMemoryAccounts {
    async fn get_by_account_number(
        &self,
        account_number: &str,
    ) -> RepositoryResult<Option<Account>> {
        Ok(self.rows.lock().await.get(account_number).cloned())
    }

    async fn update_balance(&self, account: &Account) -> RepositoryResult<()> {
        if self.fail_balance_write.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable(
                "injected balance write failure".to_string(),
            ));
        }
        let mut rows = self.rows.lock().await;
        match rows.get_mut(&account.account_number) {
            Some(row) => {
                *row = account.clone();
                Ok(())
            }
            None => Err(RepositoryError::Unavailable(
                "no such account row".to_string(),
            )),
        }
    }
}

#[derive(Default)]
struct InMemoryTransactions {
    rows: Mutex<HashMap<Uuid, Transaction>>,
    // When set, update_status calls targeting this status fail.
    fail_status: Mutex<Option<TransactionStatus>>,
}

impl InMemoryTransactions {
    async fn insert(&self, tx: Transaction) {
        self.rows.lock().await.insert(tx.transaction_id, tx);
    }

    async fn fail_when_marking(&self, status: TransactionStatus) {
        *self.fail_status.lock().await = Some(status);
    }

    async fn status_of(&self, id: Uuid) -> Option<TransactionStatus> {
        self.rows.lock().await.get(&id).map(|t| t.status)
    }

    async fn count(&self) -> usize {
        self.rows.lock().await.len()
    }
}

#[async_trait]
impl TransactionRepository for InMemoryTransactions {
    async fn create(&self, transaction: &Transaction) -> RepositoryResult<()> {
        self.rows
            .lock()
            .await
            .insert(transaction.transaction_id, transaction.clone());
        Ok(())
    }

    async fn get_by_transaction_id(
        &self,
        transaction_id: Uuid,
    ) -> RepositoryResult<Option<Transaction>> {
        Ok(self.rows.lock().await.get(&transaction_id).cloned())
    }

    async fn update_status(
        &self,
        transaction_id: Uuid,
        status: TransactionStatus,
    ) -> RepositoryResult<()> {
        if *self.fail_status.lock().await == Some(status) {
            return Err(RepositoryError::Unavailable(
                "injected status write failure".to_string(),
            ));
        }
        let mut rows = self.rows.lock().await;
        let row = rows.get_mut(&transaction_id).ok_or_else(|| {
            RepositoryError::Unavailable("no such transaction row".to_string())
        })?;
        row.status = status;
        row.updated_at = Utc::now();
        Ok(())
    }
}

#[derive(Default)]
struct RecordingBroker {
    published: Mutex<Vec<(String, Vec<u8>)>>,
    fail_publish: AtomicBool,
}

impl RecordingBroker {
    async fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.published.lock().await.clone()
    }
}

#[async_trait]
impl BrokerPort for RecordingBroker {
    async fn connect(&self) -> BrokerResult<()> {
        Ok(())
    }

    async fn close(&self) -> BrokerResult<()> {
        Ok(())
    }

    async fn publish(&self, routing_key: &str, payload: &[u8]) -> BrokerResult<()> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(BrokerError::Protocol(
                "injected publish failure".to_string(),
            ));
        }
        self.published
            .lock()
            .await
            .push((routing_key.to_string(), payload.to_vec()));
        Ok(())
    }

    async fn consume(&self, _queue: &str) -> BrokerResult<DeliveryStream> {
        Err(BrokerError::NotConnected)
    }
}

/// Broker double whose consume stream yields a scripted list of deliveries
/// and then ends.
struct ScriptedBroker {
    deliveries: Mutex<Option<Vec<InboundMessage>>>,
}

impl ScriptedBroker {
    fn new(deliveries: Vec<InboundMessage>) -> Self {
        Self {
            deliveries: Mutex::new(Some(deliveries)),
        }
    }
}

#[async_trait]
impl BrokerPort for ScriptedBroker {
    async fn connect(&self) -> BrokerResult<()> {
        Ok(())
    }

    async fn close(&self) -> BrokerResult<()> {
        Ok(())
    }

    async fn publish(&self, _routing_key: &str, _payload: &[u8]) -> BrokerResult<()> {
        Ok(())
    }

    async fn consume(&self, _queue: &str) -> BrokerResult<DeliveryStream> {
        let deliveries = self
            .deliveries
            .lock()
            .await
            .take()
            .ok_or(BrokerError::NotConnected)?;
        Ok(
            futures_util::stream::iter(deliveries.into_iter().map(Ok::<_, BrokerError>))
                .boxed(),
        )
    }
}

/// Broker double whose consume stream never yields; run() must exit via
/// cancellation.
struct SilentBroker;

#[async_trait]
impl BrokerPort for SilentBroker {
    async fn connect(&self) -> BrokerResult<()> {
        Ok(())
    }

    async fn close(&self) -> BrokerResult<()> {
        Ok(())
    }

    async fn publish(&self, _routing_key: &str, _payload: &[u8]) -> BrokerResult<()> {
        Ok(())
    }

    async fn consume(&self, _queue: &str) -> BrokerResult<DeliveryStream> {
        Ok(futures_util::stream::pending::<BrokerResult<InboundMessage>>().boxed())
    }
}

struct RecordingSettler {
    outcomes: Arc<Mutex<Vec<Disposition>>>,
}

#[async_trait]
impl MessageSettler for RecordingSettler {
    async fn settle(self: Box<Self>, outcome: Disposition) -> BrokerResult<()> {
        self.outcomes.lock().await.push(outcome);
        Ok(())
    }
}

struct Harness {
    accounts: Arc<InMemoryAccounts>,
    transactions: Arc<InMemoryTransactions>,
    broker: Arc<RecordingBroker>,
    worker: TopUpWorker,
    initiator: CreateTopUp,
}

fn harness() -> Harness {
    let accounts = Arc::new(InMemoryAccounts::default());
    let transactions = Arc::new(InMemoryTransactions::default());
    let broker = Arc::new(RecordingBroker::default());
    let worker = TopUpWorker::new(
        broker.clone(),
        transactions.clone(),
        accounts.clone(),
        "topup_queue".to_string(),
    );
    let initiator = CreateTopUp::new(
        accounts.clone(),
        transactions.clone(),
        broker.clone(),
        "topup.created".to_string(),
    );
    Harness {
        accounts,
        transactions,
        broker,
        worker,
        initiator,
    }
}

// --- Initiator ---

#[tokio::test]
async fn create_topup_records_pending_and_publishes_once() {
    let h = harness();
    h.accounts.insert(account("ACC-1", "1000.00")).await;

    let output = h
        .initiator
        .execute(TopUpInput {
            account_number: "ACC-1".to_string(),
            amount: dec("500.00"),
        })
        .await
        .unwrap();

    assert_eq!(output.status, TransactionStatus::Pending);
    assert_eq!(output.balance_before, dec("1000.00"));
    assert_eq!(output.balance_after, dec("1000.00"));
    assert_eq!(output.currency, "IDR");

    // Exactly one pending row and exactly one message referencing it.
    assert_eq!(h.transactions.count().await, 1);
    assert_eq!(
        h.transactions.status_of(output.transaction_id).await,
        Some(TransactionStatus::Pending)
    );
    let published = h.broker.published().await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, "topup.created");
    let message: TopUpMessage = serde_json::from_slice(&published[0].1).unwrap();
    assert_eq!(message.transaction_id, output.transaction_id);
    assert_eq!(message.account_number, "ACC-1");
    assert_eq!(message.amount, dec("500.00"));

    // Crediting is deferred: the initiator never touches the balance.
    assert_eq!(h.accounts.balance_of("ACC-1").await, Some(dec("1000.00")));
}

#[tokio::test]
async fn create_topup_rejects_non_positive_amount() {
    let h = harness();
    h.accounts.insert(account("ACC-1", "1000.00")).await;

    for amount in ["0", "-5.00"] {
        let err = h
            .initiator
            .execute(TopUpInput {
                account_number: "ACC-1".to_string(),
                amount: dec(amount),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TopUpError::Validation(_)));
    }

    assert_eq!(h.transactions.count().await, 0);
    assert!(h.broker.published().await.is_empty());
}

#[tokio::test]
async fn create_topup_rejects_unknown_account() {
    let h = harness();

    let err = h
        .initiator
        .execute(TopUpInput {
            account_number: "ACC-404".to_string(),
            amount: dec("500.00"),
        })
        .await
        .unwrap_err();

    assert!(matches!(err, TopUpError::AccountNotFound(_)));
    assert_eq!(h.transactions.count().await, 0);
    assert!(h.broker.published().await.is_empty());
}

#[tokio::test]
async fn create_topup_marks_failed_publish_when_broker_is_down() {
    let h = harness();
    h.accounts.insert(account("ACC-1", "1000.00")).await;
    h.broker.fail_publish.store(true, Ordering::SeqCst);

    let err = h
        .initiator
        .execute(TopUpInput {
            account_number: "ACC-1".to_string(),
            amount: dec("500.00"),
        })
        .await
        .unwrap_err();

    assert!(matches!(err, TopUpError::Publish(_)));

    // The pending row exists and is marked failed_publish; no message is in
    // flight and the balance is untouched, so the caller may retry.
    assert_eq!(h.transactions.count().await, 1);
    let rows = h.transactions.rows.lock().await;
    let tx = rows.values().next().unwrap();
    assert_eq!(tx.status, TransactionStatus::FailedPublish);
    drop(rows);
    assert_eq!(h.accounts.balance_of("ACC-1").await, Some(dec("1000.00")));
}

// --- Worker state machine ---

#[tokio::test]
async fn worker_applies_credit_and_completes() {
    let h = harness();
    h.accounts.insert(account("ACC-1", "1000.00")).await;
    let tx = Transaction::top_up("ACC-1".to_string(), dec("500.00"));
    h.transactions.insert(tx.clone()).await;

    let outcome = h.worker.process(&payload_for(&tx)).await;

    assert_eq!(outcome, Disposition::Ack);
    assert_eq!(h.accounts.balance_of("ACC-1").await, Some(dec("1500.00")));
    assert_eq!(
        h.transactions.status_of(tx.transaction_id).await,
        Some(TransactionStatus::Completed)
    );
}

#[tokio::test]
async fn worker_is_idempotent_under_redelivery() {
    let h = harness();
    h.accounts.insert(account("ACC-1", "1000.00")).await;
    let tx = Transaction::top_up("ACC-1".to_string(), dec("500.00"));
    h.transactions.insert(tx.clone()).await;
    let payload = payload_for(&tx);

    assert_eq!(h.worker.process(&payload).await, Disposition::Ack);
    assert_eq!(h.worker.process(&payload).await, Disposition::Ack);

    // Applied exactly once: 1500.00, not 2000.00.
    assert_eq!(h.accounts.balance_of("ACC-1").await, Some(dec("1500.00")));
}

#[tokio::test]
async fn worker_requeues_while_processing() {
    let h = harness();
    h.accounts.insert(account("ACC-1", "1000.00")).await;
    let mut tx = Transaction::top_up("ACC-1".to_string(), dec("500.00"));
    tx.status = TransactionStatus::Processing;
    h.transactions.insert(tx.clone()).await;

    let outcome = h.worker.process(&payload_for(&tx)).await;

    assert_eq!(outcome, Disposition::Requeue);
    assert_eq!(h.accounts.balance_of("ACC-1").await, Some(dec("1000.00")));
    assert_eq!(
        h.transactions.status_of(tx.transaction_id).await,
        Some(TransactionStatus::Processing)
    );
}

#[tokio::test]
async fn worker_acks_missing_account_terminally() {
    let h = harness();
    let tx = Transaction::top_up("ACC-404".to_string(), dec("500.00"));
    h.transactions.insert(tx.clone()).await;

    let outcome = h.worker.process(&payload_for(&tx)).await;

    assert_eq!(outcome, Disposition::Ack);
    assert_eq!(
        h.transactions.status_of(tx.transaction_id).await,
        Some(TransactionStatus::FailedAccountNotFound)
    );
    assert!(h.accounts.is_empty().await);
}

#[tokio::test]
async fn worker_rejects_malformed_payload_without_requeue() {
    let h = harness();
    h.accounts.insert(account("ACC-1", "1000.00")).await;

    let outcome = h.worker.process(b"definitely not json").await;

    assert_eq!(outcome, Disposition::Reject);
    assert_eq!(h.transactions.count().await, 0);
    assert_eq!(h.accounts.balance_of("ACC-1").await, Some(dec("1000.00")));
}

#[tokio::test]
async fn worker_rejects_delivery_without_transaction_row() {
    let h = harness();
    h.accounts.insert(account("ACC-1", "1000.00")).await;
    // Valid payload, but the producer's pending row is missing: protocol
    // violation.
    let tx = Transaction::top_up("ACC-1".to_string(), dec("500.00"));

    let outcome = h.worker.process(&payload_for(&tx)).await;

    assert_eq!(outcome, Disposition::Reject);
    assert_eq!(h.accounts.balance_of("ACC-1").await, Some(dec("1000.00")));
}

#[tokio::test]
async fn worker_requeues_when_processing_mark_fails() {
    let h = harness();
    h.accounts.insert(account("ACC-1", "1000.00")).await;
    let tx = Transaction::top_up("ACC-1".to_string(), dec("500.00"));
    h.transactions.insert(tx.clone()).await;
    h.transactions
        .fail_when_marking(TransactionStatus::Processing)
        .await;

    let outcome = h.worker.process(&payload_for(&tx)).await;

    // No balance mutation has happened yet, so retrying is safe.
    assert_eq!(outcome, Disposition::Requeue);
    assert_eq!(h.accounts.balance_of("ACC-1").await, Some(dec("1000.00")));
    assert_eq!(
        h.transactions.status_of(tx.transaction_id).await,
        Some(TransactionStatus::Pending)
    );
}

#[tokio::test]
async fn worker_retries_after_balance_write_failure() {
    let h = harness();
    h.accounts.insert(account("ACC-1", "1000.00")).await;
    let tx = Transaction::top_up("ACC-1".to_string(), dec("500.00"));
    h.transactions.insert(tx.clone()).await;
    let payload = payload_for(&tx);

    h.accounts.fail_balance_write.store(true, Ordering::SeqCst);
    let outcome = h.worker.process(&payload).await;
    assert_eq!(outcome, Disposition::Requeue);
    assert_eq!(
        h.transactions.status_of(tx.transaction_id).await,
        Some(TransactionStatus::FailedUpdateBalance)
    );
    assert_eq!(h.accounts.balance_of("ACC-1").await, Some(dec("1000.00")));

    // Redelivery after the store recovers: the failed_update_balance status
    // proceeds like pending and the credit lands exactly once.
    h.accounts.fail_balance_write.store(false, Ordering::SeqCst);
    let outcome = h.worker.process(&payload).await;
    assert_eq!(outcome, Disposition::Ack);
    assert_eq!(h.accounts.balance_of("ACC-1").await, Some(dec("1500.00")));
    assert_eq!(
        h.transactions.status_of(tx.transaction_id).await,
        Some(TransactionStatus::Completed)
    );
}

#[tokio::test]
async fn worker_acks_when_completion_write_fails_after_credit() {
    let h = harness();
    h.accounts.insert(account("ACC-1", "1000.00")).await;
    let tx = Transaction::top_up("ACC-1".to_string(), dec("500.00"));
    h.transactions.insert(tx.clone()).await;
    h.transactions
        .fail_when_marking(TransactionStatus::Completed)
        .await;

    let outcome = h.worker.process(&payload_for(&tx)).await;

    // The credit is already applied and correct; ack rather than requeue a
    // message that would double-apply.
    assert_eq!(outcome, Disposition::Ack);
    assert_eq!(h.accounts.balance_of("ACC-1").await, Some(dec("1500.00")));
    assert_eq!(
        h.transactions.status_of(tx.transaction_id).await,
        Some(TransactionStatus::Processing)
    );
}

#[tokio::test]
async fn worker_acks_terminally_failed_transactions() {
    let h = harness();
    h.accounts.insert(account("ACC-1", "1000.00")).await;
    let mut tx = Transaction::top_up("ACC-1".to_string(), dec("500.00"));
    tx.status = TransactionStatus::FailedAccountNotFound;
    h.transactions.insert(tx.clone()).await;

    let outcome = h.worker.process(&payload_for(&tx)).await;

    assert_eq!(outcome, Disposition::Ack);
    assert_eq!(h.accounts.balance_of("ACC-1").await, Some(dec("1000.00")));
}

// --- Consume loop ---

#[tokio::test]
async fn run_settles_each_delivery_and_applies_once() {
    let accounts = Arc::new(InMemoryAccounts::default());
    let transactions = Arc::new(InMemoryTransactions::default());
    accounts.insert(account("ACC-1", "1000.00")).await;
    let tx = Transaction::top_up("ACC-1".to_string(), dec("500.00"));
    transactions.insert(tx.clone()).await;

    let outcomes = Arc::new(Mutex::new(Vec::new()));
    let payload = payload_for(&tx);
    // The same message delivered twice, as a broker may under at-least-once
    // delivery.
    let deliveries = vec![
        InboundMessage::new(
            payload.clone(),
            Box::new(RecordingSettler {
                outcomes: outcomes.clone(),
            }),
        ),
        InboundMessage::new(
            payload,
            Box::new(RecordingSettler {
                outcomes: outcomes.clone(),
            }),
        ),
    ];
    let broker = Arc::new(ScriptedBroker::new(deliveries));
    let worker = TopUpWorker::new(
        broker,
        transactions.clone(),
        accounts.clone(),
        "topup_queue".to_string(),
    );

    worker.run(CancellationToken::new()).await.unwrap();

    assert_eq!(
        *outcomes.lock().await,
        vec![Disposition::Ack, Disposition::Ack]
    );
    assert_eq!(accounts.balance_of("ACC-1").await, Some(dec("1500.00")));
    assert_eq!(
        transactions.status_of(tx.transaction_id).await,
        Some(TransactionStatus::Completed)
    );
}

#[tokio::test]
async fn run_stops_on_cancellation() {
    let worker = TopUpWorker::new(
        Arc::new(SilentBroker),
        Arc::new(InMemoryTransactions::default()),
        Arc::new(InMemoryAccounts::default()),
        "topup_queue".to_string(),
    );
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();

    let handle = tokio::spawn(async move { worker.run(token).await });
    shutdown.cancel();

    let result = tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("worker did not stop on cancellation")
        .unwrap();
    assert!(result.is_ok());
}
