//! Conversation ledger: append-only storage of messages and crisis events.
//!
//! Writes are best-effort. A failed append is logged and reported in the
//! [`PersistenceReport`]; it never fails the request.

use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::{MiraError, MiraResult};
use crate::types::{Channel, CrisisEvent, LedgerRecord, Message, RecordKind};

const DEFAULT_LEDGER_PATH: &str = "./data/mira_ledger";

/// Storage backend for ledger records.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Appends a record. Re-using an id is an error; records are never overwritten.
    async fn append(&self, record: &LedgerRecord) -> MiraResult<()>;

    /// Records of `kind` for `user_id`, newest first.
    async fn query(&self, user_id: &str, kind: RecordKind) -> MiraResult<Vec<LedgerRecord>>;
}

/// `<len>:<user_id>/`. The byte-length prefix keeps ids containing `/` from sharing a scan range.
fn user_prefix(user_id: &str) -> String {
    format!("{:08x}:{}/", user_id.len(), user_id)
}

/// `user_prefix/created_at/id`. The fixed-width timestamp keeps prefix scans in time order.
fn record_key(record: &LedgerRecord) -> String {
    format!(
        "{}{}/{}",
        user_prefix(record.user_id()),
        record.created_at().format("%Y%m%dT%H%M%S%.9fZ"),
        record.id()
    )
}

/// Sled-backed ledger: one tree per record kind.
pub struct SledLedgerStore {
    db: sled::Db,
}

impl SledLedgerStore {
    /// Opens the ledger at `path` (default `./data/mira_ledger`).
    pub fn open(path: Option<impl AsRef<Path>>) -> MiraResult<Self> {
        let p = path
            .map(|x| x.as_ref().to_path_buf())
            .unwrap_or_else(|| Path::new(DEFAULT_LEDGER_PATH).to_path_buf());
        let db = sled::open(p)?;
        Ok(Self { db })
    }

    fn tree(&self, kind: RecordKind) -> MiraResult<sled::Tree> {
        Ok(self.db.open_tree(kind.as_str())?)
    }
}

#[async_trait]
impl LedgerStore for SledLedgerStore {
    async fn append(&self, record: &LedgerRecord) -> MiraResult<()> {
        let tree = self.tree(record.kind())?;
        let key = record_key(record);
        let bytes = serde_json::to_vec(record)?;
        tree.compare_and_swap(key.as_bytes(), None as Option<&[u8]>, Some(bytes))?
            .map_err(|_| MiraError::Persistence(format!("record {} already exists", record.id())))?;
        Ok(())
    }

    async fn query(&self, user_id: &str, kind: RecordKind) -> MiraResult<Vec<LedgerRecord>> {
        let tree = self.tree(kind)?;
        let prefix = user_prefix(user_id);
        let mut out = Vec::new();
        for entry in tree.scan_prefix(prefix.as_bytes()).rev() {
            let (_, v) = entry?;
            match serde_json::from_slice::<LedgerRecord>(&v) {
                Ok(r) if r.user_id() == user_id => out.push(r),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(target: "mira::ledger", kind = kind.as_str(), error = %e, "skipping unreadable record")
                }
            }
        }
        Ok(out)
    }
}

/// In-memory ledger for tests and `storage = "memory"`.
#[derive(Default)]
pub struct MemoryLedgerStore {
    records: DashMap<(String, RecordKind), Vec<LedgerRecord>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total records held, across users and kinds.
    pub fn len(&self) -> usize {
        self.records.iter().map(|e| e.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn append(&self, record: &LedgerRecord) -> MiraResult<()> {
        let mut slot = self
            .records
            .entry((record.user_id().to_string(), record.kind()))
            .or_default();
        if slot.iter().any(|r| r.id() == record.id()) {
            return Err(MiraError::Persistence(format!("record {} already exists", record.id())));
        }
        slot.push(record.clone());
        Ok(())
    }

    async fn query(&self, user_id: &str, kind: RecordKind) -> MiraResult<Vec<LedgerRecord>> {
        let mut out = self
            .records
            .get(&(user_id.to_string(), kind))
            .map(|r| r.value().clone())
            .unwrap_or_default();
        out.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        Ok(out)
    }
}

/// Which appends of one turn were durable. `None` means nothing was submitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistenceReport {
    pub user_message: bool,
    pub reply: Option<bool>,
    pub crisis_event: Option<bool>,
}

impl PersistenceReport {
    pub fn complete(&self) -> bool {
        self.user_message && self.reply != Some(false) && self.crisis_event != Some(false)
    }
}

/// Ledger facade used by the pipeline and the history routes.
pub struct ConversationLedger {
    store: std::sync::Arc<dyn LedgerStore>,
}

impl ConversationLedger {
    pub fn new(store: std::sync::Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Appends the records of one turn concurrently. Failures are logged, never returned.
    pub async fn record_turn(
        &self,
        user_message: &Message,
        reply: Option<&Message>,
        event: Option<&CrisisEvent>,
    ) -> PersistenceReport {
        let user_rec = LedgerRecord::Message(user_message.clone());
        let reply_rec = reply.map(|m| LedgerRecord::Message(m.clone()));
        let event_rec = event.map(|e| LedgerRecord::CrisisEvent(e.clone()));

        let (user_ok, reply_ok, event_ok) = tokio::join!(
            self.write(&user_rec),
            async {
                match &reply_rec {
                    Some(r) => Some(self.write(r).await),
                    None => None,
                }
            },
            async {
                match &event_rec {
                    Some(r) => Some(self.write(r).await),
                    None => None,
                }
            }
        );

        let report = PersistenceReport {
            user_message: user_ok,
            reply: reply_ok,
            crisis_event: event_ok,
        };
        if !report.complete() {
            tracing::warn!(target: "mira::ledger", ?report, "turn only partially persisted");
        }
        report
    }

    async fn write(&self, record: &LedgerRecord) -> bool {
        match self.store.append(record).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    target: "mira::ledger",
                    kind = record.kind().as_str(),
                    id = record.id(),
                    error = %e,
                    "ledger append failed"
                );
                false
            }
        }
    }

    /// Records of `kind` for `user_id`, newest first.
    pub async fn history(&self, user_id: &str, kind: RecordKind) -> MiraResult<Vec<LedgerRecord>> {
        self.store.query(user_id, kind).await
    }

    /// Messages on `channel`, newest first.
    pub async fn messages(&self, user_id: &str, channel: Channel) -> MiraResult<Vec<Message>> {
        Ok(self
            .history(user_id, RecordKind::Message)
            .await?
            .into_iter()
            .filter_map(|r| match r {
                LedgerRecord::Message(m) if m.channel == channel => Some(m),
                _ => None,
            })
            .collect())
    }

    pub async fn journal_history(&self, user_id: &str) -> MiraResult<Vec<Message>> {
        self.messages(user_id, Channel::Journal).await
    }

    pub async fn crisis_events(&self, user_id: &str) -> MiraResult<Vec<CrisisEvent>> {
        Ok(self
            .history(user_id, RecordKind::CrisisEvent)
            .await?
            .into_iter()
            .filter_map(|r| match r {
                LedgerRecord::CrisisEvent(e) => Some(e),
                _ => None,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EscalationAction, Sender, Severity};
    use chrono::{Duration as ChronoDuration, Utc};
    use std::sync::Arc;

    fn msg(user: &str, channel: Channel, text: &str, offset_ms: i64) -> Message {
        let mut m = Message::new(user, Sender::User, channel, text);
        m.created_at = Utc::now() + ChronoDuration::milliseconds(offset_ms);
        m
    }

    fn event(user: &str, message_id: &str) -> CrisisEvent {
        CrisisEvent {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user.to_string(),
            message_id: message_id.to_string(),
            matched_keywords: vec!["hopeless".into()],
            severity: Severity::High,
            severity_score: Some(0.95),
            action_taken: EscalationAction::Call,
            action_requested: true,
            excerpt: "I feel hopeless".into(),
            detected_at: Utc::now(),
        }
    }

    async fn exercise_store(store: Arc<dyn LedgerStore>) {
        let older = msg("u1", Channel::Chat, "first", -1000);
        let newer = msg("u1", Channel::Journal, "second", 0);
        let other = msg("u2", Channel::Chat, "not mine", 0);
        for m in [&newer, &older, &other] {
            store.append(&LedgerRecord::Message(m.clone())).await.unwrap();
        }

        let got = store.query("u1", RecordKind::Message).await.unwrap();
        let ids: Vec<&str> = got.iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec![newer.id.as_str(), older.id.as_str()]);

        assert!(store.append(&LedgerRecord::Message(older.clone())).await.is_err());
        assert!(store.query("u1", RecordKind::CrisisEvent).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn memory_store_orders_newest_first() {
        exercise_store(Arc::new(MemoryLedgerStore::new())).await;
    }

    #[tokio::test]
    async fn sled_store_orders_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledLedgerStore::open(Some(dir.path().join("ledger"))).unwrap();
        exercise_store(Arc::new(store)).await;
    }

    async fn users_sharing_a_path_prefix_stay_apart(store: Arc<dyn LedgerStore>) {
        let nested = msg("alice/evil", Channel::Chat, "I feel hopeless", 0);
        store.append(&LedgerRecord::Message(nested.clone())).await.unwrap();
        store.append(&LedgerRecord::CrisisEvent(event("alice/evil", &nested.id))).await.unwrap();

        assert!(store.query("alice", RecordKind::Message).await.unwrap().is_empty());
        assert!(store.query("alice", RecordKind::CrisisEvent).await.unwrap().is_empty());
        let own = store.query("alice/evil", RecordKind::Message).await.unwrap();
        assert_eq!(own.len(), 1);
        assert_eq!(own[0].user_id(), "alice/evil");
    }

    #[tokio::test]
    async fn sled_store_isolates_slash_user_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledLedgerStore::open(Some(dir.path().join("ledger"))).unwrap();
        users_sharing_a_path_prefix_stay_apart(Arc::new(store)).await;
    }

    #[tokio::test]
    async fn memory_store_isolates_slash_user_ids() {
        users_sharing_a_path_prefix_stay_apart(Arc::new(MemoryLedgerStore::new())).await;
    }

    #[tokio::test]
    async fn record_turn_writes_all_parts() {
        let store = Arc::new(MemoryLedgerStore::new());
        let ledger = ConversationLedger::new(store.clone());
        let user = msg("u1", Channel::Journal, "I feel hopeless", 0);
        let reply = Message::new("u1", Sender::Assistant, Channel::Journal, "I'm here.").with_emotion("crisis");
        let ev = event("u1", &user.id);

        let report = ledger.record_turn(&user, Some(&reply), Some(&ev)).await;
        assert!(report.complete());
        assert_eq!(store.len(), 3);
        assert_eq!(ledger.journal_history("u1").await.unwrap().len(), 2);
        assert_eq!(ledger.crisis_events("u1").await.unwrap()[0].message_id, user.id);
        assert!(ledger.messages("u1", Channel::Chat).await.unwrap().is_empty());
    }

    struct BrokenStore;

    #[async_trait]
    impl LedgerStore for BrokenStore {
        async fn append(&self, _record: &LedgerRecord) -> MiraResult<()> {
            Err(MiraError::Persistence("disk full".into()))
        }
        async fn query(&self, _user_id: &str, _kind: RecordKind) -> MiraResult<Vec<LedgerRecord>> {
            Err(MiraError::Persistence("disk full".into()))
        }
    }

    #[tokio::test]
    async fn failures_are_reported_not_raised() {
        let ledger = ConversationLedger::new(Arc::new(BrokenStore));
        let user = msg("u1", Channel::Chat, "hi", 0);
        let report = ledger.record_turn(&user, None, None).await;
        assert!(!report.user_message);
        assert_eq!(report.reply, None);
        assert!(!report.complete());
    }
}
