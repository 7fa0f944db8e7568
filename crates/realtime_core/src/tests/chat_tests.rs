use super::*;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex as StdMutex,
};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use url::Url;

use crate::connection::{ConnectionState, SocketConnector, SocketSink, SocketSource};
use crate::presence::PresenceTable;
use crate::router::EventRouter;

const ME: UserId = UserId(1);
const PEER: UserId = UserId(2);

/// Connector whose sockets always open, record every sent frame, and stay
/// alive until the test ends.
struct RecordingConnector {
    sent: Arc<StdMutex<Vec<String>>>,
    fail_sends: Arc<AtomicBool>,
    refuse_connects: AtomicBool,
    keep_alive: StdMutex<Vec<mpsc::UnboundedSender<String>>>,
}

impl RecordingConnector {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Arc::new(StdMutex::new(Vec::new())),
            fail_sends: Arc::new(AtomicBool::new(false)),
            refuse_connects: AtomicBool::new(false),
            keep_alive: StdMutex::new(Vec::new()),
        })
    }

    fn refuse_connects(&self) {
        self.refuse_connects.store(true, Ordering::SeqCst);
    }

    fn sent_frames(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    fn fail_next_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl SocketConnector for RecordingConnector {
    async fn connect(
        &self,
        _endpoint: &Url,
    ) -> Result<(Box<dyn SocketSink>, Box<dyn SocketSource>)> {
        if self.refuse_connects.load(Ordering::SeqCst) {
            return Err(anyhow!("connection refused"));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.keep_alive.lock().unwrap().push(tx);
        Ok((
            Box::new(RecordingSink {
                sent: Arc::clone(&self.sent),
                fail_sends: Arc::clone(&self.fail_sends),
            }),
            Box::new(ChannelSource { rx }),
        ))
    }
}

struct RecordingSink {
    sent: Arc<StdMutex<Vec<String>>>,
    fail_sends: Arc<AtomicBool>,
}

#[async_trait]
impl SocketSink for RecordingSink {
    async fn send(&mut self, frame: String) -> Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(anyhow!("socket reset by peer"));
        }
        self.sent.lock().unwrap().push(frame);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

struct ChannelSource {
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl SocketSource for ChannelSource {
    async fn next_frame(&mut self) -> Option<Result<String>> {
        self.rx.recv().await.map(Ok)
    }
}

/// Loader serving a fixed transcript and counting reloads.
struct ScriptedLoader {
    direct: Vec<ChatMessage>,
    reloads: Arc<StdMutex<Vec<ConversationKey>>>,
}

impl ScriptedLoader {
    fn new(direct: Vec<ChatMessage>) -> Arc<Self> {
        Arc::new(Self {
            direct,
            reloads: Arc::new(StdMutex::new(Vec::new())),
        })
    }

    fn reload_keys(&self) -> Vec<ConversationKey> {
        self.reloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl TranscriptLoader for ScriptedLoader {
    async fn load_direct(&self, peer: UserId) -> Result<Vec<ChatMessage>> {
        self.reloads
            .lock()
            .unwrap()
            .push(ConversationKey::Direct(peer));
        Ok(self.direct.clone())
    }

    async fn load_group(&self, group: GroupId) -> Result<Vec<ChatMessage>> {
        self.reloads
            .lock()
            .unwrap()
            .push(ConversationKey::Group(group));
        Ok(self.direct.clone())
    }
}

struct NoSession;

impl SessionProvider for NoSession {
    fn session_token(&self) -> Option<String> {
        None
    }

    fn current_user(&self) -> Option<UserId> {
        None
    }
}

fn session() -> Arc<StaticSession> {
    Arc::new(StaticSession {
        token: "tok-123".to_string(),
        user_id: ME,
    })
}

fn build_service(
    loader: Arc<dyn TranscriptLoader>,
    session: Arc<dyn SessionProvider>,
) -> (ChatService, Arc<Connection>, Arc<RecordingConnector>) {
    let connector = RecordingConnector::new();
    let endpoint = Url::parse("ws://127.0.0.1:9/protected/ws").unwrap();
    let router = Arc::new(EventRouter::new(Arc::new(PresenceTable::default())));
    let connection = Connection::new(endpoint, connector.clone(), router);
    let service = ChatService::new(Arc::clone(&connection), loader, session);
    (service, connection, connector)
}

async fn open(connection: &Arc<Connection>) {
    connection.connect().await;
    for _ in 0..200 {
        if connection.state().await == ConnectionState::Open {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("connection never opened");
}

fn frame_json(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap()
}

#[tokio::test(start_paused = true)]
async fn submit_direct_appends_an_optimistic_entry_and_transmits() {
    let (service, connection, connector) = build_service(ScriptedLoader::new(vec![]), session());
    open(&connection).await;

    let outcome = service.submit_direct(PEER, "  hello  ").await.unwrap();
    assert_eq!(outcome, SendOutcome::Sent);

    let sent = connector.sent_frames();
    assert_eq!(sent.len(), 1);
    let frame = frame_json(&sent[0]);
    assert_eq!(frame["type"], "send_message");
    assert_eq!(frame["payload"]["message"], "hello");
    assert_eq!(frame["payload"]["receiver_id"], 2);
    assert_eq!(frame["payload"]["session_token"], "tok-123");

    let transcript = service.transcript(ConversationKey::Direct(PEER)).await;
    assert_eq!(transcript.len(), 1);
    assert!(transcript[0].state.is_pending());
    assert_eq!(transcript[0].content, "hello");
    assert_eq!(transcript[0].sender_name, "You");
}

#[tokio::test(start_paused = true)]
async fn blank_drafts_are_rejected_before_anything_happens() {
    let (service, _connection, connector) = build_service(ScriptedLoader::new(vec![]), session());

    let err = service.submit_direct(PEER, "   \n ").await.unwrap_err();
    assert!(matches!(err, ChatError::EmptyMessage));
    assert!(connector.sent_frames().is_empty());
    assert!(service.transcript(ConversationKey::Direct(PEER)).await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn submitting_without_a_session_is_rejected() {
    let (service, _connection, connector) =
        build_service(ScriptedLoader::new(vec![]), Arc::new(NoSession));

    let err = service.submit_direct(PEER, "hello").await.unwrap_err();
    assert!(matches!(err, ChatError::MissingSession));
    assert!(connector.sent_frames().is_empty());
}

#[tokio::test(start_paused = true)]
async fn submitting_while_closed_queues_and_keeps_the_optimistic_entry() {
    let (service, connection, connector) = build_service(ScriptedLoader::new(vec![]), session());
    connector.refuse_connects();

    // Not connected: the frame joins the pending queue.
    let outcome = service.submit_direct(PEER, "hold this").await.unwrap();
    assert_eq!(outcome, SendOutcome::Queued);
    assert_eq!(connection.pending_len().await, 1);

    let transcript = service.transcript(ConversationKey::Direct(PEER)).await;
    assert_eq!(transcript.len(), 1);
    assert!(transcript[0].state.is_pending());
}

#[tokio::test(start_paused = true)]
async fn the_confirmed_echo_replaces_the_optimistic_entry() {
    let (service, connection, _connector) = build_service(ScriptedLoader::new(vec![]), session());
    open(&connection).await;

    service.submit_direct(PEER, "hello").await.unwrap();

    let echo = DirectMessageEvent {
        message: "hello".to_string(),
        sender_id: ME,
        receiver_id: PEER,
        sent_at: "2026-01-05T10:00:00Z".to_string(),
    };
    service.on_remote_direct(&echo, &[]).await;

    let transcript = service.transcript(ConversationKey::Direct(PEER)).await;
    assert_eq!(transcript.len(), 1);
    assert!(!transcript[0].state.is_pending());
    assert_eq!(transcript[0].content, "hello");

    // Redelivery of the same echo is a no-op.
    service.on_remote_direct(&echo, &[]).await;
    assert_eq!(service.transcript(ConversationKey::Direct(PEER)).await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn inbound_messages_land_in_the_senders_conversation() {
    let (service, _connection, _connector) = build_service(ScriptedLoader::new(vec![]), session());

    let members = vec![MemberProfile {
        user_id: PEER,
        full_name: "Grace Hopper".to_string(),
    }];
    let event = DirectMessageEvent {
        message: "hey there".to_string(),
        sender_id: PEER,
        receiver_id: ME,
        sent_at: "2026-01-05T10:00:00Z".to_string(),
    };
    service.on_remote_direct(&event, &members).await;

    let transcript = service.transcript(ConversationKey::Direct(PEER)).await;
    assert_eq!(transcript.len(), 1);
    assert_eq!(transcript[0].sender_name, "Grace Hopper");
    assert_eq!(transcript[0].sender_id, PEER);
}

#[tokio::test(start_paused = true)]
async fn unknown_senders_get_a_placeholder_name() {
    let (service, _connection, _connector) = build_service(ScriptedLoader::new(vec![]), session());

    let event = DirectMessageEvent {
        message: "who dis".to_string(),
        sender_id: UserId(42),
        receiver_id: ME,
        sent_at: "2026-01-05T10:00:00Z".to_string(),
    };
    service.on_remote_direct(&event, &[]).await;

    let transcript = service.transcript(ConversationKey::Direct(UserId(42))).await;
    assert_eq!(transcript[0].sender_name, "User 42");
}

#[tokio::test(start_paused = true)]
async fn group_echoes_reconcile_into_the_group_transcript() {
    let (service, connection, connector) = build_service(ScriptedLoader::new(vec![]), session());
    open(&connection).await;

    let group = GroupId(11);
    service.submit_group(group, "standup in 5").await.unwrap();

    let frame = frame_json(&connector.sent_frames()[0]);
    assert_eq!(frame["type"], "send_group_message");
    assert_eq!(frame["payload"]["group_id"], 11);

    let echo = GroupMessageEvent {
        message: "standup in 5".to_string(),
        sender_id: ME,
        group_id: group,
        sent_at: "2026-01-05T10:00:00Z".to_string(),
    };
    service.on_remote_group(&echo, &[]).await;

    let transcript = service.transcript(ConversationKey::Group(group)).await;
    assert_eq!(transcript.len(), 1);
    assert!(!transcript[0].state.is_pending());
}

#[tokio::test(start_paused = true)]
async fn a_rejected_transmission_reloads_the_transcript_from_the_server() {
    let authoritative = vec![ChatMessage::confirmed(
        None,
        PEER,
        "Grace Hopper",
        "earlier message",
        "2026-01-05T09:00:00Z",
    )];
    let loader = ScriptedLoader::new(authoritative);
    let (service, connection, connector) = build_service(loader.clone(), session());
    open(&connection).await;

    connector.fail_next_sends();
    let err = service.submit_direct(PEER, "doomed").await.unwrap_err();
    assert!(matches!(err, ChatError::Transport(_)));

    // The optimistic entry is gone; the transcript is the server copy.
    assert_eq!(loader.reload_keys(), vec![ConversationKey::Direct(PEER)]);
    let transcript = service.transcript(ConversationKey::Direct(PEER)).await;
    assert_eq!(transcript.len(), 1);
    assert_eq!(transcript[0].content, "earlier message");
}

#[tokio::test(start_paused = true)]
async fn typing_indicators_never_touch_the_transcript() {
    let (service, connection, connector) = build_service(ScriptedLoader::new(vec![]), session());
    open(&connection).await;

    let outcome = service.send_typing(PEER, true).await.unwrap();
    assert_eq!(outcome, SendOutcome::Sent);

    let frame = frame_json(&connector.sent_frames()[0]);
    assert_eq!(frame["type"], "send_typing");
    assert_eq!(frame["payload"]["is_typing"], true);
    assert!(service.transcript(ConversationKey::Direct(PEER)).await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn clear_drops_a_cached_transcript() {
    let (service, _connection, _connector) = build_service(ScriptedLoader::new(vec![]), session());

    let event = DirectMessageEvent {
        message: "hello".to_string(),
        sender_id: PEER,
        receiver_id: ME,
        sent_at: "2026-01-05T10:00:00Z".to_string(),
    };
    service.on_remote_direct(&event, &[]).await;
    assert!(!service.transcript(ConversationKey::Direct(PEER)).await.is_empty());

    service.clear(ConversationKey::Direct(PEER)).await;
    assert!(service.transcript(ConversationKey::Direct(PEER)).await.is_empty());
}
