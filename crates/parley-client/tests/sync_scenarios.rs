//! End-to-end scenarios over the in-memory REST fake and transport.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use serde_json::json;

use parley_client::{
    ClientConfig, ClientError, CredentialManager, CredentialSlot, MemoryCredentialStore, Session,
};
use parley_net::{MemoryPeer, MemoryServer, MemoryTransport, TransportEvent};
use parley_shared::{ConnectionState, ConversationId, EventKind, UserId};
use parley_store::MemoryApi;

fn token(subject: &str) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let exp = Utc::now().timestamp() + 30 * 24 * 3600;
    let payload = URL_SAFE_NO_PAD.encode(json!({ "sub": subject, "exp": exp }).to_string());
    format!("{header}.{payload}.sig")
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

struct Harness {
    session: Session,
    api: Arc<MemoryApi>,
    server: MemoryServer,
    peer: MemoryPeer,
    token: String,
}

impl Harness {
    async fn logged_in() -> Self {
        let api = Arc::new(MemoryApi::new());
        api.set_identity("me", "Me");
        api.add_conversation("c1", "Alice");
        api.add_conversation("c2", "Bob");
        api.seed_messages("c1", 3);

        let (transport, mut server) = MemoryTransport::new();
        let credentials = CredentialManager::new(
            api.clone(),
            Arc::new(MemoryCredentialStore::new()),
            CredentialSlot::new(),
        );
        let session = Session::new(
            ClientConfig::default(),
            api.clone(),
            api.clone(),
            Arc::new(transport),
            credentials,
        );

        let token = token("me");
        let identity = session.login(token.clone()).await.unwrap();
        assert_eq!(identity.user.id, UserId::from("me"));

        let peer = server.accept().await.unwrap();
        peer.connect().await;
        settle().await;

        Self {
            session,
            api,
            server,
            peer,
            token,
        }
    }

    async fn push_message(&self, conversation: &str, id: &str, sender: &str) {
        self.peer
            .push(
                "new_message",
                json!({
                    "conversationId": conversation,
                    "message": {
                        "id": id,
                        "conversationId": conversation,
                        "senderId": sender,
                        "content": format!("body of {id}"),
                        "createdAt": Utc::now(),
                    }
                }),
            )
            .await;
        settle().await;
    }

    async fn push_typing(&self, conversation: &str, user: &str, name: &str) {
        self.peer
            .push(
                "user_typing",
                json!({ "conversationId": conversation, "userId": user, "userName": name }),
            )
            .await;
        settle().await;
    }

    fn emitted_names(&mut self) -> Vec<String> {
        self.peer
            .drain_emitted()
            .into_iter()
            .map(|frame| frame.event)
            .collect()
    }
}

#[tokio::test(start_paused = true)]
async fn handshake_carries_the_credential() {
    let h = Harness::logged_in().await;

    assert_eq!(h.peer.options.auth_token, h.token);
    assert_eq!(h.session.connection_state(), ConnectionState::Connected);
    assert_eq!(h.session.store().conversations().len(), 2);
    assert_eq!(h.session.local_user(), Some(UserId::from("me")));
}

#[tokio::test(start_paused = true)]
async fn opening_joins_the_room_and_loads_history() {
    let mut h = Harness::logged_in().await;
    let view = h.session.open_conversation("c1").await.unwrap();

    assert_eq!(h.emitted_names(), vec!["join_conversation"]);
    let ids: Vec<_> = view.messages().iter().map(|m| m.id.to_string()).collect();
    assert_eq!(ids, vec!["srv-3", "srv-2", "srv-1"]);
}

#[tokio::test(start_paused = true)]
async fn incoming_message_for_inactive_conversation_counts_unread() {
    let h = Harness::logged_in().await;
    let view = h.session.open_conversation("c1").await.unwrap();

    h.push_message("c2", "m-b1", "user-c2").await;
    h.push_message("c1", "m-a1", "user-c1").await;

    let conversations = h.session.store().conversations();
    let c2 = conversations
        .iter()
        .find(|c| c.id == ConversationId::from("c2"))
        .unwrap();
    assert_eq!(c2.unread_count, 1);
    assert_eq!(c2.last_message.as_deref(), Some("body of m-b1"));
    // Most recent activity first.
    assert_eq!(conversations[0].id, ConversationId::from("c1"));

    let c1 = conversations
        .iter()
        .find(|c| c.id == ConversationId::from("c1"))
        .unwrap();
    assert_eq!(c1.unread_count, 0);

    let messages = view.messages();
    assert_eq!(messages[0].id.as_str(), "m-a1");
    assert!(messages.iter().all(|m| m.id.as_str() != "m-b1"));
}

#[tokio::test(start_paused = true)]
async fn own_echo_after_send_leaves_a_single_copy() {
    let h = Harness::logged_in().await;
    let view = h.session.open_conversation("c1").await.unwrap();

    let sent = view.send_text("hello").await.unwrap();
    assert!(!sent.is_pending());

    let echo = serde_json::to_value(&sent).unwrap();
    assert!(echo.get("clientMessageId").is_some());
    h.peer
        .push(
            "new_message",
            json!({ "conversationId": "c1", "message": echo }),
        )
        .await;
    settle().await;

    let messages = view.messages();
    assert_eq!(messages.iter().filter(|m| m.id == sent.id).count(), 1);
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[0].id, sent.id);
}

#[tokio::test(start_paused = true)]
async fn echo_racing_the_send_response_is_not_duplicated() {
    let h = Harness::logged_in().await;
    let view = h.session.open_conversation("c1").await.unwrap();
    h.api.set_latency(Duration::from_millis(200));

    let store = h.session.store().clone();
    let send = tokio::spawn(async move {
        store
            .send_message("race".into(), Default::default(), Vec::new())
            .await
    });
    settle().await;

    let pending = view.messages();
    assert!(pending[0].is_pending());
    let client_id = pending[0].client_message_id.clone().unwrap();

    h.peer
        .push(
            "new_message",
            json!({
                "conversationId": "c1",
                "message": {
                    // Same id the REST response will carry.
                    "id": "srv-4",
                    "conversationId": "c1",
                    "senderId": "me",
                    "content": "race",
                    "createdAt": Utc::now(),
                    "clientMessageId": client_id,
                }
            }),
        )
        .await;
    settle().await;
    assert_eq!(view.messages().len(), 4);

    let sent = send.await.unwrap().unwrap();
    assert_eq!(sent.id.as_str(), "srv-4");
    let messages = view.messages();
    assert_eq!(messages.len(), 4);
    assert!(messages.iter().all(|m| !m.is_pending()));
    assert_eq!(
        messages
            .iter()
            .filter(|m| m.client_message_id.as_deref() == Some(client_id.as_str()))
            .count(),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn outgoing_typing_start_then_explicit_stop() {
    let mut h = Harness::logged_in().await;
    let view = h.session.open_conversation("c1").await.unwrap();
    h.emitted_names();

    view.handle_typing();
    settle().await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    view.stop_typing();
    settle().await;

    assert_eq!(h.emitted_names(), vec!["typing_start", "typing_stop"]);
}

#[tokio::test(start_paused = true)]
async fn remote_stop_removes_typist_immediately() {
    let h = Harness::logged_in().await;
    let view = h.session.open_conversation("c1").await.unwrap();

    h.push_typing("c1", "user-c1", "Alice").await;
    assert_eq!(view.typing_text().as_deref(), Some("Alice is typing..."));

    tokio::time::sleep(Duration::from_millis(500)).await;
    h.peer
        .push(
            "user_stopped_typing",
            json!({ "conversationId": "c1", "userId": "user-c1" }),
        )
        .await;
    settle().await;

    assert!(view.typing_users().is_empty());
    assert_eq!(view.typing_text(), None);
}

#[tokio::test(start_paused = true)]
async fn keystrokes_are_throttled_and_idle_stops() {
    let mut h = Harness::logged_in().await;
    let view = h.session.open_conversation("c1").await.unwrap();
    h.emitted_names();

    view.handle_typing();
    tokio::time::sleep(Duration::from_millis(200)).await;
    view.handle_typing();
    settle().await;
    assert_eq!(h.emitted_names(), vec!["typing_start"]);

    // Idle stop is measured from the last keystroke.
    tokio::time::sleep(Duration::from_millis(2_900)).await;
    settle().await;
    assert!(h.emitted_names().is_empty());
    tokio::time::sleep(Duration::from_millis(200)).await;
    settle().await;
    assert_eq!(h.emitted_names(), vec!["typing_stop"]);
}

#[tokio::test(start_paused = true)]
async fn remote_typing_expires_without_refresh() {
    let h = Harness::logged_in().await;
    let view = h.session.open_conversation("c1").await.unwrap();

    h.push_typing("c1", "user-c1", "Alice").await;
    assert_eq!(view.typing_text().as_deref(), Some("Alice is typing..."));

    tokio::time::sleep(Duration::from_secs(4)).await;
    h.push_typing("c1", "user-c1", "Alice").await;
    tokio::time::sleep(Duration::from_secs(4)).await;
    settle().await;
    assert_eq!(view.typing_users().len(), 1);

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    settle().await;
    assert!(view.typing_users().is_empty());
    assert_eq!(view.typing_text(), None);
}

#[tokio::test(start_paused = true)]
async fn typing_in_other_conversations_is_ignored() {
    let h = Harness::logged_in().await;
    let view = h.session.open_conversation("c1").await.unwrap();

    h.push_typing("c2", "user-c2", "Bob").await;
    assert!(view.typing_users().is_empty());
}

#[tokio::test(start_paused = true)]
async fn going_offline_clears_typing_and_presence() {
    let h = Harness::logged_in().await;
    let view = h.session.open_conversation("c1").await.unwrap();
    let alice = UserId::from("user-c1");

    h.peer.push("user_online", json!({ "userId": "user-c1" })).await;
    h.push_typing("c1", "user-c1", "Alice").await;
    assert!(h.session.is_user_online(&alice));
    assert_eq!(view.typing_users().len(), 1);

    h.peer
        .push(
            "presence_change",
            json!({ "userId": "user-c1", "status": "offline" }),
        )
        .await;
    settle().await;

    assert!(!h.session.is_user_online(&alice));
    assert!(view.typing_users().is_empty());
}

#[tokio::test(start_paused = true)]
async fn live_edit_and_delete_apply_to_loaded_messages() {
    let h = Harness::logged_in().await;
    let view = h.session.open_conversation("c1").await.unwrap();

    h.peer
        .push(
            "message_edited",
            json!({
                "conversationId": "c1",
                "messageId": "srv-2",
                "content": "reworded",
                "editedAt": Utc::now(),
            }),
        )
        .await;
    h.peer
        .push(
            "message_deleted",
            json!({ "conversationId": "c1", "messageId": "srv-1" }),
        )
        .await;
    settle().await;

    let messages = view.messages();
    assert_eq!(messages.len(), 3);
    let edited = messages.iter().find(|m| m.id.as_str() == "srv-2").unwrap();
    assert_eq!(edited.content, "reworded");
    assert!(edited.is_edited);
    let deleted = messages.iter().find(|m| m.id.as_str() == "srv-1").unwrap();
    assert!(deleted.is_deleted);
    assert!(!messages.iter().find(|m| m.id.as_str() == "srv-3").unwrap().is_deleted);
}

#[tokio::test(start_paused = true)]
async fn closing_a_superseded_view_keeps_the_room() {
    let mut h = Harness::logged_in().await;
    let first = h.session.open_conversation("c1").await.unwrap();
    let second = h.session.open_conversation("c1").await.unwrap();

    drop(first);
    settle().await;

    assert_eq!(
        h.emitted_names(),
        vec!["join_conversation", "join_conversation"]
    );
    assert!(second.is_current());
    assert_eq!(
        h.session.store().active_conversation(),
        Some(ConversationId::from("c1"))
    );
}

#[tokio::test(start_paused = true)]
async fn closing_leaves_the_room_and_drops_listeners() {
    let mut h = Harness::logged_in().await;
    let connection = h.session.connection().clone();
    let listeners = connection.listeners();
    let baseline = listeners.len(EventKind::NewMessage);

    let mut view = h.session.open_conversation("c1").await.unwrap();
    view.handle_typing();
    settle().await;
    assert_eq!(listeners.len(EventKind::UserTyping), 1);
    assert_eq!(listeners.len(EventKind::NewMessage), baseline + 1);
    h.emitted_names();

    view.close();
    settle().await;
    assert_eq!(h.emitted_names(), vec!["typing_stop", "leave_conversation"]);
    assert_eq!(listeners.len(EventKind::UserTyping), 0);
    assert_eq!(listeners.len(EventKind::NewMessage), baseline);
    assert_eq!(h.session.store().active_conversation(), None);

    // Late events for the closed conversation change nothing.
    h.push_typing("c1", "user-c1", "Alice").await;
    assert!(view.typing_users().is_empty());
    view.close();
    assert!(h.emitted_names().is_empty());
}

#[tokio::test(start_paused = true)]
async fn logout_tears_everything_down() {
    let h = Harness::logged_in().await;
    let view = h.session.open_conversation("c1").await.unwrap();
    assert!(!view.messages().is_empty());

    h.session.logout();
    settle().await;

    assert!(h.peer.is_shut_down());
    assert_eq!(h.session.connection_state(), ConnectionState::Disconnected);
    assert!(h.session.connection().listeners().is_empty());
    assert!(h.session.identity().is_none());
    assert!(h.session.credentials().token().is_none());
    assert!(h.session.store().conversations().is_empty());
    assert!(view.messages().is_empty());
    assert!(!h.session.connect());
}

#[tokio::test(start_paused = true)]
async fn rejected_credential_is_renewed_and_the_link_rebuilt() {
    let mut h = Harness::logged_in().await;
    let _view = h.session.open_conversation("c1").await.unwrap();
    let renewed = token("me-renewed");
    h.api.push_refresh(Ok(renewed.clone()));

    h.peer
        .send(TransportEvent::ConnectError {
            message: "jwt expired".into(),
            auth_rejected: true,
        })
        .await;

    let mut peer = h.server.accept().await.unwrap();
    assert_eq!(peer.options.auth_token, renewed);
    assert_eq!(h.api.refresh_calls(), 1);
    assert!(h.peer.is_shut_down());

    peer.connect().await;
    settle().await;
    assert_eq!(h.session.connection_state(), ConnectionState::Connected);
    let rejoin = peer.next_emitted(Duration::from_secs(1)).await.unwrap();
    assert_eq!(rejoin.event, "join_conversation");
    assert_eq!(rejoin.data, json!("c1"));
}

#[tokio::test(start_paused = true)]
async fn message_for_unknown_conversation_refetches_the_list() {
    let h = Harness::logged_in().await;
    h.api.add_conversation("c9", "Zed");

    h.push_message("c9", "m-z1", "user-c9").await;
    settle().await;

    let fetches = h
        .api
        .calls()
        .iter()
        .filter(|c| c.as_str() == "get_conversations")
        .count();
    assert_eq!(fetches, 2);
    assert!(h
        .session
        .store()
        .conversations()
        .iter()
        .any(|c| c.id == ConversationId::from("c9")));
}

#[tokio::test(start_paused = true)]
async fn resume_without_persisted_credential_is_a_no_op() {
    let api = Arc::new(MemoryApi::new());
    let (transport, mut server) = MemoryTransport::new();
    let credentials = CredentialManager::new(
        api.clone(),
        Arc::new(MemoryCredentialStore::new()),
        CredentialSlot::new(),
    );
    let session = Session::new(
        ClientConfig::default(),
        api.clone(),
        api,
        Arc::new(transport),
        credentials,
    );

    assert!(session.resume().await.unwrap().is_none());
    assert!(server.try_accept().is_none());
    assert!(session.identity().is_none());
    assert!(matches!(
        session.open_conversation("c1").await,
        Err(ClientError::NotLoggedIn)
    ));
}

#[tokio::test(start_paused = true)]
async fn refused_identity_logs_out() {
    let api = Arc::new(MemoryApi::new());
    let (transport, mut server) = MemoryTransport::new();
    let credentials = CredentialManager::new(
        api.clone(),
        Arc::new(MemoryCredentialStore::with_token(token("ghost"))),
        CredentialSlot::new(),
    );
    let session = Session::new(
        ClientConfig::default(),
        api.clone(),
        api,
        Arc::new(transport),
        credentials,
    );

    assert!(session.resume().await.is_err());
    assert!(session.credentials().token().is_none());
    assert!(server.try_accept().is_none());
}
