//! End-to-end tests for `ChatService::send_turn()` and the window invariants.
//!
//! A scripted backend records every request it receives so the tests can
//! check exactly what was sent. Failing and slow stores exercise error
//! propagation and the fetch deadline.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use parley_context::store::StoreFuture;
use parley_context::{
    Attachment, BudgetConfig, ChatService, ContextError, ContextManager, Conversation,
    ConversationLocks, ConversationStatus, ConversationSummary, HistoryConfig, MemoryStore,
    TRUNCATION_MARKER, Turn, TurnOrder, TurnStore, estimate_tokens,
};
use parley_types::backend::ReplyFuture;
use parley_types::{BackendError, CompletionRequest, ModelBackend, Role, StorageError};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// ScriptedBackend
// ---------------------------------------------------------------------------

/// Replies from a queue and records each request.
#[derive(Default)]
struct ScriptedBackend {
    replies: Mutex<VecDeque<Result<String, BackendError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedBackend {
    fn replying(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| Ok(r.to_string())).collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn failing(error: BackendError) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::from([Err(error)])),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn last_request(&self) -> CompletionRequest {
        self.requests.lock().unwrap().last().cloned().unwrap()
    }
}

impl ModelBackend for ScriptedBackend {
    fn complete<'a>(&'a self, request: &'a CompletionRequest) -> ReplyFuture<'a> {
        self.requests.lock().unwrap().push(request.clone());
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("ok".to_string()));
        Box::pin(async move { reply })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// ---------------------------------------------------------------------------
// Stores with injected faults
// ---------------------------------------------------------------------------

/// Delegates to a memory store but fails every turn fetch.
struct FailingFetchStore {
    inner: MemoryStore,
}

impl TurnStore for FailingFetchStore {
    fn create(&self, conversation: Conversation) -> StoreFuture<'_, ()> {
        self.inner.create(conversation)
    }

    fn conversation(&self, id: Uuid) -> StoreFuture<'_, Conversation> {
        self.inner.conversation(id)
    }

    fn set_status(&self, id: Uuid, status: ConversationStatus) -> StoreFuture<'_, Conversation> {
        self.inner.set_status(id, status)
    }

    fn append(&self, turn: Turn) -> StoreFuture<'_, Conversation> {
        self.inner.append(turn)
    }

    fn turns(
        &self,
        _id: Uuid,
        _limit: Option<usize>,
        _order: TurnOrder,
    ) -> StoreFuture<'_, Vec<Turn>> {
        Box::pin(async { Err(StorageError::Unavailable("replica offline".into())) })
    }

    fn list<'a>(&'a self, owner: Option<&'a str>) -> StoreFuture<'a, Vec<ConversationSummary>> {
        self.inner.list(owner)
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// Delegates to a memory store but stalls every turn fetch.
struct SlowFetchStore {
    inner: MemoryStore,
    delay: Duration,
}

impl TurnStore for SlowFetchStore {
    fn create(&self, conversation: Conversation) -> StoreFuture<'_, ()> {
        self.inner.create(conversation)
    }

    fn conversation(&self, id: Uuid) -> StoreFuture<'_, Conversation> {
        self.inner.conversation(id)
    }

    fn set_status(&self, id: Uuid, status: ConversationStatus) -> StoreFuture<'_, Conversation> {
        self.inner.set_status(id, status)
    }

    fn append(&self, turn: Turn) -> StoreFuture<'_, Conversation> {
        self.inner.append(turn)
    }

    fn turns(
        &self,
        id: Uuid,
        limit: Option<usize>,
        order: TurnOrder,
    ) -> StoreFuture<'_, Vec<Turn>> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            self.inner.turns(id, limit, order).await
        })
    }

    fn list<'a>(&'a self, owner: Option<&'a str>) -> StoreFuture<'a, Vec<ConversationSummary>> {
        self.inner.list(owner)
    }

    fn name(&self) -> &str {
        "slow"
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn manager(store: Arc<dyn TurnStore>, budget: BudgetConfig) -> ContextManager {
    ContextManager::new(store, budget, HistoryConfig::default())
}

/// Text whose estimate is exactly `tokens`.
fn text_of(tokens: u64) -> String {
    "w".repeat((tokens * 4) as usize)
}

async fn seeded(oldest_first: &[u64]) -> (ContextManager, Uuid) {
    let manager = manager(Arc::new(MemoryStore::new()), BudgetConfig::default());
    let conv = manager.log().create("alice", None).await.unwrap();
    for (i, &tokens) in oldest_first.iter().enumerate() {
        let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
        manager
            .log()
            .append(conv.id, role, text_of(tokens), false)
            .await
            .unwrap();
    }
    (manager, conv.id)
}

// ---------------------------------------------------------------------------
// Window scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn three_turns_fit_or_drop_oldest() {
    let (manager, id) = seeded(&[1000, 2000, 500]).await;

    let window = manager.build_window(id, 3600).await.unwrap();
    let seqs: Vec<u64> = window.turns.iter().map(|t| t.seq).collect();
    assert_eq!(seqs, vec![0, 1, 2]);
    assert_eq!(window.total_tokens, 3550);

    let window = manager.build_window(id, 2600).await.unwrap();
    let seqs: Vec<u64> = window.turns.iter().map(|t| t.seq).collect();
    assert_eq!(seqs, vec![1, 2]);
    assert_eq!(window.total_tokens, 2550);
}

#[tokio::test]
async fn oversized_single_turn_is_truncated_not_dropped() {
    let (manager, id) = seeded(&[20_000]).await;

    let window = manager.build_window(id, 3000).await.unwrap();
    assert_eq!(window.len(), 1);
    assert!(window.truncated);
    let turn = &window.turns[0];
    assert!(turn.content.ends_with(TRUNCATION_MARKER));
    assert!(estimate_tokens(&turn.content) <= 3000 - 50);

    // the stored turn is untouched
    let stored = manager
        .log()
        .history(id, TurnOrder::OldestFirst)
        .await
        .unwrap();
    assert_eq!(stored[0].token_count, 20_000);
    assert!(stored[0].verify_fingerprint());
}

#[tokio::test]
async fn window_is_always_a_contiguous_suffix_within_budget() {
    let sizes = [120, 900, 40, 2500, 300, 75, 1800, 60, 640, 10];
    let (manager, id) = seeded(&sizes).await;
    let total = sizes.len() as u64;

    for budget in (100..8000).step_by(137) {
        let window = manager.build_window(id, budget).await.unwrap();
        assert!(!window.is_empty(), "empty window at budget {budget}");

        let seqs: Vec<u64> = window.turns.iter().map(|t| t.seq).collect();
        let first = seqs[0];
        let expected: Vec<u64> = (first..total).collect();
        assert_eq!(seqs, expected, "not a suffix at budget {budget}");

        if !window.truncated {
            let sum: u64 = window.turns.iter().map(|t| t.token_count).sum();
            assert!(sum + 50 <= budget, "over budget at {budget}");
        }
    }
}

#[tokio::test]
async fn advisory_count_is_monotonic_and_non_destructive() {
    let (manager, id) = seeded(&[500, 500, 500, 500, 500]).await;
    let mut previous = usize::MAX;
    for target in [0, 100, 600, 1100, 1600, 2100, 2600, 5000] {
        let count = manager.advisory_trim_count(id, target).await.unwrap();
        assert!(count <= previous);
        previous = count;
    }
    assert_eq!(previous, 0);
    assert_eq!(manager.advisory_trim_count(id, 1100).await.unwrap(), 3);

    let history = manager
        .log()
        .history(id, TurnOrder::OldestFirst)
        .await
        .unwrap();
    assert_eq!(history.len(), 5);
}

// ---------------------------------------------------------------------------
// Chat turns
// ---------------------------------------------------------------------------

#[tokio::test]
async fn chat_turn_sends_window_and_appends_reply() {
    let backend = ScriptedBackend::replying(&["It says hello."]);
    let service = ChatService::new(
        manager(Arc::new(MemoryStore::new()), BudgetConfig::default()),
        backend.clone(),
        "You are a helpful assistant.",
    );
    let conv = service.manager().log().create("alice", None).await.unwrap();

    let result = service
        .send_turn(
            conv.id,
            "What does this say?",
            &[Attachment::new("a.txt", 1024, "hello")],
        )
        .await
        .unwrap();

    assert_eq!(result.reply_text, "It says hello.");
    assert!(!result.trimmed_history);
    assert!(!result.truncated);
    assert_eq!(result.messages_advised_excluded, 0);
    assert!(result.warning.is_none());

    let request = backend.last_request();
    assert_eq!(request.system, "You are a helpful assistant.");
    assert_eq!(request.max_tokens, 4000);
    assert_eq!(request.messages.len(), 1);
    assert!(request.messages[0].content.contains("a.txt"));
    assert!(request.messages[0].content.contains("1 KB"));

    let history = service
        .manager()
        .log()
        .history(conv.id, TurnOrder::OldestFirst)
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert!(history[0].has_attachments);
    assert_eq!(history[1].role, Role::Assistant);
    assert_eq!(
        result.token_usage.current_tokens,
        50 + history[0].token_count + history[1].token_count
    );
}

#[tokio::test]
async fn empty_turn_is_rejected_and_not_appended() {
    let backend = ScriptedBackend::replying(&[]);
    let service = ChatService::new(
        manager(Arc::new(MemoryStore::new()), BudgetConfig::default()),
        backend.clone(),
        "",
    );
    let conv = service.manager().log().create("alice", None).await.unwrap();

    let result = service.send_turn(conv.id, "   ", &[]).await;
    assert!(matches!(result, Err(ContextError::EmptyMessage)));
    assert!(backend.requests.lock().unwrap().is_empty());
    let loaded = service.manager().log().conversation(conv.id).await.unwrap();
    assert_eq!(loaded.total_messages, 0);
}

#[tokio::test]
async fn oversized_message_is_rejected_with_estimate() {
    let backend = ScriptedBackend::replying(&[]);
    let service = ChatService::new(
        manager(Arc::new(MemoryStore::new()), BudgetConfig::default()),
        backend,
        "",
    );
    let conv = service.manager().log().create("alice", None).await.unwrap();

    let result = service.send_turn(conv.id, &text_of(15_001), &[]).await;
    match result {
        Err(ContextError::MessageTooLarge { estimated, cap }) => {
            assert_eq!(estimated, 15_001);
            assert_eq!(cap, 15_000);
        }
        other => panic!("expected MessageTooLarge, got: {other:?}"),
    }
    let loaded = service.manager().log().conversation(conv.id).await.unwrap();
    assert_eq!(loaded.total_messages, 0);
}

#[tokio::test]
async fn long_history_is_trimmed_and_warned() {
    let budget = BudgetConfig {
        max_context_tokens: 3000,
        response_reserve_tokens: 500,
        system_prompt_tokens: 50,
        max_message_tokens: 2000,
    };
    let backend = ScriptedBackend::replying(&[]);
    let service = ChatService::new(
        manager(Arc::new(MemoryStore::new()), budget),
        backend.clone(),
        "",
    );
    let conv = service.manager().log().create("alice", None).await.unwrap();

    let mut last = None;
    for _ in 0..4 {
        last = Some(service.send_turn(conv.id, &text_of(900), &[]).await.unwrap());
    }
    let result = last.unwrap();

    // effective budget 2500: only two 900-token user turns (+ short replies) fit
    assert!(result.trimmed_history);
    assert!(result.messages_advised_excluded > 0);
    assert!(
        result
            .warning
            .as_deref()
            .unwrap()
            .contains("older message")
    );
    let request = backend.last_request();
    let sent: u64 = request.messages.iter().map(|m| estimate_tokens(&m.content)).sum();
    assert!(sent + 50 <= 2500);
    assert_eq!(request.messages.last().unwrap().role, Role::User);
}

#[tokio::test]
async fn backend_failure_keeps_user_turn() {
    let backend = ScriptedBackend::failing(BackendError::Server {
        status: 529,
        message: "overloaded".into(),
    });
    let service = ChatService::new(
        manager(Arc::new(MemoryStore::new()), BudgetConfig::default()),
        backend,
        "",
    );
    let conv = service.manager().log().create("alice", None).await.unwrap();

    let result = service.send_turn(conv.id, "Hello?", &[]).await;
    assert!(matches!(
        result,
        Err(ContextError::Backend(BackendError::Server { status: 529, .. }))
    ));
    let history = service
        .manager()
        .log()
        .history(conv.id, TurnOrder::OldestFirst)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].content, "Hello?");
}

#[tokio::test]
async fn empty_backend_reply_is_an_error() {
    let backend = ScriptedBackend::replying(&["  "]);
    let service = ChatService::new(
        manager(Arc::new(MemoryStore::new()), BudgetConfig::default()),
        backend,
        "",
    );
    let conv = service.manager().log().create("alice", None).await.unwrap();
    let result = service.send_turn(conv.id, "Hi", &[]).await;
    assert!(matches!(
        result,
        Err(ContextError::Backend(BackendError::EmptyReply))
    ));
}

#[tokio::test]
async fn concurrent_turns_on_one_conversation_are_serialized() {
    let backend = ScriptedBackend::replying(&[]);
    let locks = ConversationLocks::new();
    let service = Arc::new(
        ChatService::new(
            manager(Arc::new(MemoryStore::new()), BudgetConfig::default()),
            backend,
            "",
        )
        .with_locks(locks.clone()),
    );
    let conv = service.manager().log().create("alice", None).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..8 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service
                .send_turn(conv.id, &format!("message {i}"), &[])
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let history = service
        .manager()
        .log()
        .history(conv.id, TurnOrder::OldestFirst)
        .await
        .unwrap();
    assert_eq!(history.len(), 16);
    for (i, turn) in history.iter().enumerate() {
        assert_eq!(turn.seq, i as u64);
        let expected = if i % 2 == 0 { Role::User } else { Role::Assistant };
        assert_eq!(turn.role, expected);
    }
    let loaded = service.manager().log().conversation(conv.id).await.unwrap();
    assert_eq!(loaded.total_messages, 16);
    // finished turns leave no lock entries behind
    assert!(locks.is_empty());
}

#[tokio::test]
async fn truncated_turn_is_not_reported_as_trimmed_history() {
    let budget = BudgetConfig {
        max_context_tokens: 3000,
        response_reserve_tokens: 500,
        system_prompt_tokens: 50,
        max_message_tokens: 10_000,
    };
    let backend = ScriptedBackend::replying(&["hello", "that is long"]);
    let service = ChatService::new(
        manager(Arc::new(MemoryStore::new()), budget),
        backend.clone(),
        "",
    );
    let conv = service.manager().log().create("alice", None).await.unwrap();

    service.send_turn(conv.id, "hi", &[]).await.unwrap();
    let result = service
        .send_turn(conv.id, &text_of(5000), &[])
        .await
        .unwrap();

    assert!(result.truncated);
    assert!(!result.trimmed_history);
    assert!(result.warning.unwrap().contains("truncated"));

    let sent = backend.last_request();
    assert_eq!(sent.messages.len(), 1);
    assert!(sent.messages[0].content.ends_with(TRUNCATION_MARKER));
    assert!(estimate_tokens(&sent.messages[0].content) <= 2500 - 50);

    // the stored turn keeps its full content
    let history = service
        .manager()
        .log()
        .history(conv.id, TurnOrder::OldestFirst)
        .await
        .unwrap();
    assert_eq!(history[2].content, text_of(5000));
}

// ---------------------------------------------------------------------------
// Storage failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn storage_errors_propagate_unmodified() {
    let store = Arc::new(FailingFetchStore {
        inner: MemoryStore::new(),
    });
    let manager = manager(store, BudgetConfig::default());
    let conv = manager.log().create("alice", None).await.unwrap();

    let result = manager.build_window(conv.id, 1000).await;
    match result {
        Err(ContextError::Storage(StorageError::Unavailable(msg))) => {
            assert_eq!(msg, "replica offline");
        }
        other => panic!("expected storage error, got: {other:?}"),
    }
    assert!(matches!(
        manager.usage(conv.id).await,
        Err(ContextError::Storage(_))
    ));
}

#[tokio::test]
async fn slow_fetch_fails_the_whole_operation() {
    let store = Arc::new(SlowFetchStore {
        inner: MemoryStore::new(),
        delay: Duration::from_millis(500),
    });
    let manager = ContextManager::new(
        store,
        BudgetConfig::default(),
        HistoryConfig {
            fetch_timeout_ms: Some(20),
            ..HistoryConfig::default()
        },
    );
    let conv = manager.log().create("alice", None).await.unwrap();

    assert!(matches!(
        manager.build_window(conv.id, 1000).await,
        Err(ContextError::Timeout { timeout_ms: 20 })
    ));
    assert!(matches!(
        manager.usage(conv.id).await,
        Err(ContextError::Timeout { .. })
    ));
}
