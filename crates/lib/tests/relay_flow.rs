//! Integration tests: the relay protocol end to end over HTTP and the worker WebSocket.
//! Each test runs its own gateway on an ephemeral port with an in-memory store.

use futures_util::StreamExt;
use relay::agents::{AgentDirectory, AgentStatus};
use relay::client::{ChatClient, PollLoop, PollOutcome, PollSettings, ReplyAck, WorkerClient};
use relay::config::{Config, UserConfig};
use relay::gateway::{self, GatewayState};
use relay::notifier::PushEvent;
use relay::relay::Submission;
use relay::session::UserSessions;
use relay::store::{MemoryMessageStore, MessageStore};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message as WsMessage;

struct Harness {
    base: String,
    http: reqwest::Client,
    agents: Arc<AgentDirectory>,
    /// Worker token of u1's agent (online).
    t1: String,
    /// Worker token of u2's agent.
    t2: String,
}

fn user(id: &str, token: &str) -> UserConfig {
    UserConfig {
        id: id.to_string(),
        name: None,
        session_token: token.to_string(),
    }
}

async fn start(mut config: Config) -> Harness {
    config.users = vec![user("u1", "s-u1"), user("u2", "s-u2")];
    let agents = Arc::new(AgentDirectory::in_memory());
    let (a1, t1) = agents.register("u1", "Octo").await.expect("register u1");
    let (_a2, t2) = agents.register("u2", "Squid").await.expect("register u2");
    agents
        .set_status(&a1.id, AgentStatus::Online)
        .await
        .expect("set status");

    let sessions = Arc::new(UserSessions::from_config(&config));
    let store: Arc<dyn MessageStore> = Arc::new(MemoryMessageStore::new());
    let state = GatewayState::new(config, store, agents.clone(), sessions);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let port = listener.local_addr().expect("local_addr").port();
    tokio::spawn(gateway::serve(listener, state, std::future::pending()));

    Harness {
        base: format!("http://127.0.0.1:{}", port),
        http: reqwest::Client::new(),
        agents,
        t1,
        t2,
    }
}

impl Harness {
    async fn send(&self, session: &str, content: &str) -> (u16, Value) {
        let res = self
            .http
            .post(format!("{}/api/chat/send", self.base))
            .bearer_auth(session)
            .json(&json!({ "content": content }))
            .send()
            .await
            .expect("send");
        (res.status().as_u16(), res.json().await.expect("json"))
    }

    async fn poll(&self, session: &str, msg_id: &str) -> (u16, Value) {
        let res = self
            .http
            .get(format!("{}/api/chat/poll", self.base))
            .bearer_auth(session)
            .query(&[("msgId", msg_id)])
            .send()
            .await
            .expect("poll");
        (res.status().as_u16(), res.json().await.expect("json"))
    }

    async fn reply(&self, token: &str, body: Value) -> (u16, Value) {
        let res = self
            .http
            .post(format!("{}/api/chat/reply", self.base))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .expect("reply");
        (res.status().as_u16(), res.json().await.expect("json"))
    }

    async fn subscribers(&self) -> u64 {
        let v: Value = self
            .http
            .get(format!("{}/", self.base))
            .send()
            .await
            .expect("health")
            .json()
            .await
            .expect("json");
        v["subscribers"].as_u64().unwrap_or(0)
    }

    async fn pending_submission(&self) -> (String, String) {
        let (status, body) = self.send("s-u1", "hello").await;
        assert_eq!(status, 200, "{}", body);
        (
            body["agentMsgId"].as_str().expect("agentMsgId").to_string(),
            body["userMessageId"].as_str().expect("userMessageId").to_string(),
        )
    }
}

#[tokio::test]
async fn online_agent_submission_is_pending_and_poll_not_ready() {
    let h = start(Config::default()).await;
    let (status, body) = h.send("s-u1", "hello").await;
    assert_eq!(status, 200);
    assert_eq!(body["pending"], true);
    assert!(body["agentMsgId"].is_string());
    assert!(body["userMessageId"].is_string());

    let (status, poll) = h.poll("s-u1", body["agentMsgId"].as_str().unwrap()).await;
    assert_eq!(status, 200);
    assert_eq!(poll, json!({ "ready": false }));
}

#[tokio::test]
async fn worker_reply_resolves_placeholder() {
    let h = start(Config::default()).await;
    let (agent_msg_id, _) = h.pending_submission().await;

    let (status, body) = h
        .reply(&h.t1, json!({ "msgId": agent_msg_id, "content": "hi there" }))
        .await;
    assert_eq!(status, 200, "{}", body);
    assert_eq!(body["ok"], true);
    assert_eq!(body["message"]["content"], "hi there");

    for _ in 0..3 {
        let (status, poll) = h.poll("s-u1", &agent_msg_id).await;
        assert_eq!(status, 200);
        assert_eq!(poll["ready"], true);
        assert_eq!(poll["message"]["id"], agent_msg_id.as_str());
        assert_eq!(poll["message"]["content"], "hi there");
        assert_eq!(poll["message"]["role"], "agent");
        assert!(poll["message"]["createdAt"].is_string());
        assert!(poll["message"]["agentId"].is_string());
    }
}

#[tokio::test]
async fn double_reply_conflicts_and_first_content_wins() {
    let h = start(Config::default()).await;
    let (agent_msg_id, _) = h.pending_submission().await;

    let (first, _) = h
        .reply(&h.t1, json!({ "msgId": agent_msg_id, "content": "first" }))
        .await;
    let (second, body) = h
        .reply(&h.t1, json!({ "msgId": agent_msg_id, "content": "second" }))
        .await;
    assert_eq!(first, 200);
    assert_eq!(second, 409);
    assert!(body["error"].is_string());

    let (_, poll) = h.poll("s-u1", &agent_msg_id).await;
    assert_eq!(poll["message"]["content"], "first");
}

#[tokio::test]
async fn offline_agent_gets_synchronous_fallback() {
    let h = start(Config::default()).await;
    let a1 = h.agents.for_user("u1").await.expect("agent");
    h.agents
        .set_status(&a1.id, AgentStatus::Offline)
        .await
        .expect("offline");

    let (status, body) = h.send("s-u1", "hello").await;
    assert_eq!(status, 200);
    assert!(body.get("pending").is_none());
    assert!(body["userMessageId"].is_string());
    assert_eq!(body["agentMessage"]["role"], "agent");
    assert!(body["agentMessage"]["content"]
        .as_str()
        .unwrap()
        .contains("Octo"));
}

#[tokio::test]
async fn ownership_is_enforced_for_poll_and_reply() {
    let h = start(Config::default()).await;
    let (agent_msg_id, _) = h.pending_submission().await;

    let (status, body) = h.poll("s-u2", &agent_msg_id).await;
    assert_eq!(status, 403);
    assert_eq!(body["error"], "forbidden");

    let (status, _) = h
        .reply(&h.t2, json!({ "msgId": agent_msg_id, "content": "not yours" }))
        .await;
    assert_eq!(status, 403);

    h.reply(&h.t1, json!({ "msgId": agent_msg_id, "content": "mine" }))
        .await;
    let (status, _) = h.poll("s-u2", &agent_msg_id).await;
    assert_eq!(status, 403);
    let (_, poll) = h.poll("s-u1", &agent_msg_id).await;
    assert_eq!(poll["message"]["content"], "mine");
}

#[tokio::test]
async fn endpoint_errors_have_stable_codes() {
    let h = start(Config::default()).await;
    let (agent_msg_id, user_message_id) = h.pending_submission().await;

    // 401: missing or unknown credentials; a session token is not a worker token.
    let res = h
        .http
        .get(format!("{}/api/chat/poll?msgId={}", h.base, agent_msg_id))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 401);
    let (status, _) = h
        .reply("s-u1", json!({ "msgId": agent_msg_id, "content": "x" }))
        .await;
    assert_eq!(status, 401);
    let res = h
        .http
        .post(format!("{}/api/chat/reply", h.base))
        .bearer_auth("ta_bogus")
        .body("not json")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 401);

    // 400: missing fields or malformed body.
    let (status, _) = h.reply(&h.t1, json!({ "msgId": agent_msg_id })).await;
    assert_eq!(status, 400);
    let res = h
        .http
        .post(format!("{}/api/chat/reply", h.base))
        .bearer_auth(&h.t1)
        .body("not json")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 400);
    let res = h
        .http
        .get(format!("{}/api/chat/poll", h.base))
        .bearer_auth("s-u1")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 400);
    let (status, _) = h.send("s-u1", "   ").await;
    assert_eq!(status, 400);

    // 404: unknown id, or an id that is not a reply placeholder.
    let (status, _) = h.poll("s-u1", "msg-unknown").await;
    assert_eq!(status, 404);
    let (status, _) = h
        .reply(&h.t1, json!({ "msgId": "msg-unknown", "content": "x" }))
        .await;
    assert_eq!(status, 404);
    let (status, _) = h
        .reply(&h.t1, json!({ "msgId": user_message_id, "content": "x" }))
        .await;
    assert_eq!(status, 404);

    // The placeholder is untouched by all of the above.
    let (_, poll) = h.poll("s-u1", &agent_msg_id).await;
    assert_eq!(poll, json!({ "ready": false }));
}

#[tokio::test]
async fn history_hides_pending_and_unread_lists_it() {
    let h = start(Config::default()).await;
    let (agent_msg_id, user_message_id) = h.pending_submission().await;

    let chat = ChatClient::new(&h.base, "s-u1");
    let history = chat.history(None).await.expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, user_message_id);

    let worker = WorkerClient::new(&h.base, &h.t1);
    let since = chrono::Utc::now() - chrono::Duration::minutes(2);
    let unread = worker.unread(Some(since)).await.expect("unread");
    assert_eq!(unread.pending_replies.len(), 1);
    assert_eq!(unread.pending_replies[0].msg_id, agent_msg_id);
    assert_eq!(unread.pending_replies[0].content.as_deref(), Some("hello"));
    assert_eq!(unread.missed_messages.len(), 1);
    assert_eq!(unread.missed_messages[0].msg_id, user_message_id);

    let other = WorkerClient::new(&h.base, &h.t2);
    assert!(other.unread(None).await.expect("unread").pending_replies.is_empty());
}

#[tokio::test]
async fn late_reply_is_stored_after_client_timed_out() {
    let mut config = Config::default();
    config.relay.poll_interval_ms = 50;
    config.relay.poll_deadline_ms = 300;
    let settings = PollSettings::from_config(&config.relay);
    let notice = config.relay.timeout_notice.clone();
    let h = start(config).await;

    let chat = ChatClient::new(&h.base, "s-u1");
    let Submission::Pending { agent_msg_id, .. } = chat.send("hello").await.expect("send") else {
        panic!("expected pending submission");
    };

    let outcome = PollLoop::new(&chat, settings, notice.clone())
        .run(&agent_msg_id)
        .await;
    match &outcome {
        PollOutcome::TimedOut { notice: shown, .. } => assert_eq!(shown.content, notice),
        other => panic!("expected timeout, got {:?}", other),
    }

    let worker = WorkerClient::new(&h.base, &h.t1);
    match worker.reply(&agent_msg_id, "sorry, late").await.expect("reply") {
        ReplyAck::Accepted(m) => assert_eq!(m.content, "sorry, late"),
        other => panic!("expected accepted, got {:?}", other),
    }
    // A retry of the same reply is reported as already done, not as a failure.
    assert_eq!(
        worker.reply(&agent_msg_id, "sorry, late").await.expect("retry"),
        ReplyAck::AlreadyResolved
    );
    // The record is resolved even though the loop above never saw it.
    assert!(chat.poll(&agent_msg_id).await.expect("poll").ready);
}

#[tokio::test]
async fn worker_status_update_round_trips() {
    let h = start(Config::default()).await;
    let worker = WorkerClient::new(&h.base, &h.t2);
    let res = worker.set_status(AgentStatus::Online).await.expect("status");
    assert_eq!(res.status, AgentStatus::Online);
    assert!(h.agents.for_user("u2").await.unwrap().is_online());

    let res = h
        .http
        .patch(format!("{}/api/agent/status", h.base))
        .bearer_auth(&h.t2)
        .json(&json!({ "status": "asleep" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 400);
}

#[tokio::test]
async fn subscribed_worker_receives_chat_incoming() {
    let h = start(Config::default()).await;
    let worker = WorkerClient::new(&h.base, &h.t1);

    let unauthorized = worker.subscribe_url().into_client_request().unwrap();
    assert!(tokio_tungstenite::connect_async(unauthorized).await.is_err());

    let mut request = worker.subscribe_url().into_client_request().unwrap();
    request.headers_mut().insert(
        "Authorization",
        format!("Bearer {}", h.t1).parse().unwrap(),
    );
    let (mut ws, _) = tokio_tungstenite::connect_async(request)
        .await
        .expect("connect subscription");

    for _ in 0..100 {
        if h.subscribers().await > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let (agent_msg_id, user_message_id) = h.pending_submission().await;

    let frame = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    let event: PushEvent = serde_json::from_str(&text).expect("event");
                    if event != PushEvent::Ping {
                        return event;
                    }
                }
                Some(Ok(_)) => continue,
                other => panic!("subscription ended: {:?}", other),
            }
        }
    })
    .await
    .expect("chat:incoming within 5s");

    assert_eq!(
        frame,
        PushEvent::ChatIncoming {
            msg_id: user_message_id,
            agent_msg_id,
            user_id: "u1".to_string(),
            agent_id: h.agents.for_user("u1").await.unwrap().id,
            content: "hello".to_string(),
        }
    );
}
