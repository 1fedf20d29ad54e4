//! Websocket pubsub connection.
//!
//! A single background task owns the socket. Callers talk to it through a
//! command channel; each registration gets a client-side [`ListenerId`] that
//! survives reconnects; server subscription ids are re-issued every time the
//! socket comes back.

use std::collections::HashMap;
use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use url::Url;

use super::{ClientError, UiAccount, UiKeyedAccount, WithContext, encode_filters};
use crate::pubkey::Pubkey;
use crate::rpc::{AccountFilter, AccountNotification, ListenerId, NotificationSender};

const COMMAND_BUFFER: usize = 64;
const INITIAL_RECONNECT_DELAY: Duration = Duration::from_secs(1);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);

/// Handle to the pubsub connection task. Dropping it stops the task.
pub struct PubsubClient {
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

#[derive(Debug, Clone)]
enum Target {
    Account(Pubkey),
    Program {
        program: Pubkey,
        filters: Vec<AccountFilter>,
    },
}

impl Target {
    fn subscribe_request(&self, id: u64) -> Value {
        match self {
            Target::Account(address) => json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": "accountSubscribe",
                "params": [
                    address.to_string(),
                    { "encoding": "base64", "commitment": "confirmed" },
                ],
            }),
            Target::Program { program, filters } => json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": "programSubscribe",
                "params": [
                    program.to_string(),
                    {
                        "encoding": "base64",
                        "commitment": "confirmed",
                        "filters": encode_filters(filters),
                    }
                ],
            }),
        }
    }

    fn unsubscribe_request(&self, id: u64, subscription: u64) -> Value {
        let method = match self {
            Target::Account(_) => "accountUnsubscribe",
            Target::Program { .. } => "programUnsubscribe",
        };
        json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": [subscription] })
    }
}

enum Command {
    Subscribe {
        target: Target,
        sink: NotificationSender,
        reply: oneshot::Sender<Result<ListenerId, ClientError>>,
    },
    Unsubscribe {
        listener: ListenerId,
        reply: oneshot::Sender<Result<(), ClientError>>,
    },
}

impl PubsubClient {
    /// Spawn the connection task. Must be called inside a tokio runtime.
    pub fn spawn(url: Url) -> Self {
        let (commands, rx) = mpsc::channel(COMMAND_BUFFER);
        let task = tokio::spawn(run(url, rx));
        Self { commands, task }
    }

    /// `accountSubscribe`
    pub async fn account_subscribe(
        &self,
        address: Pubkey,
        sink: NotificationSender,
    ) -> Result<ListenerId, ClientError> {
        self.subscribe(Target::Account(address), sink).await
    }

    /// `programSubscribe`
    pub async fn program_subscribe(
        &self,
        program: Pubkey,
        filters: &[AccountFilter],
        sink: NotificationSender,
    ) -> Result<ListenerId, ClientError> {
        let target = Target::Program {
            program,
            filters: filters.to_vec(),
        };
        self.subscribe(target, sink).await
    }

    pub async fn unsubscribe(&self, listener: ListenerId) -> Result<(), ClientError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Unsubscribe { listener, reply })
            .await
            .map_err(|_| ClientError::Closed)?;
        rx.await.map_err(|_| ClientError::Closed)?
    }

    async fn subscribe(
        &self,
        target: Target,
        sink: NotificationSender,
    ) -> Result<ListenerId, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Subscribe {
                target,
                sink,
                reply,
            })
            .await
            .map_err(|_| ClientError::Closed)?;
        rx.await.map_err(|_| ClientError::Closed)?
    }
}

impl Drop for PubsubClient {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ---------------------------------------------------------------------------
// Connection task
// ---------------------------------------------------------------------------

struct Listener {
    target: Target,
    sink: NotificationSender,
    subscription: Option<u64>,
}

enum Pending {
    Subscribe {
        listener: ListenerId,
        target: Target,
        reply: Option<oneshot::Sender<Result<ListenerId, ClientError>>>,
    },
    Unsubscribe {
        reply: oneshot::Sender<Result<(), ClientError>>,
    },
}

#[derive(Default)]
struct State {
    next_listener: u64,
    next_request: u64,
    listeners: HashMap<ListenerId, Listener>,
    pending: HashMap<u64, Pending>,
    routes: HashMap<u64, ListenerId>,
}

enum SessionEnd {
    Shutdown,
    Disconnected,
}

#[derive(Debug, Deserialize)]
struct ErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct Incoming {
    id: Option<u64>,
    result: Option<Value>,
    error: Option<ErrorObject>,
    method: Option<String>,
    params: Option<NotificationParams>,
}

#[derive(Debug, Deserialize)]
struct NotificationParams {
    subscription: u64,
    result: Value,
}

async fn run(url: Url, mut commands: mpsc::Receiver<Command>) {
    let mut state = State::default();
    let mut delay = INITIAL_RECONNECT_DELAY;

    loop {
        match connect_async(url.as_str()).await {
            Ok((ws, _)) => {
                tracing::info!(%url, "pubsub connected");
                delay = INITIAL_RECONNECT_DELAY;
                let (mut write, mut read) = ws.split();
                let end = state.session(&mut write, &mut read, &mut commands).await;
                state.disconnect();
                if let SessionEnd::Shutdown = end {
                    let _ = write.close().await;
                    return;
                }
            }
            Err(e) => {
                tracing::error!(%url, error = %e, "pubsub connect failed");
            }
        }

        tracing::warn!(?delay, "reconnecting pubsub");
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                cmd = commands.recv() => match cmd {
                    Some(cmd) => state.handle_offline(cmd),
                    None => return,
                },
            }
        }
        delay = (delay * 2).min(MAX_RECONNECT_DELAY);
    }
}

impl State {
    fn request_id(&mut self) -> u64 {
        self.next_request += 1;
        self.next_request
    }

    fn listener_id(&mut self) -> ListenerId {
        self.next_listener += 1;
        ListenerId(self.next_listener)
    }

    async fn session<W, R>(
        &mut self,
        write: &mut W,
        read: &mut R,
        commands: &mut mpsc::Receiver<Command>,
    ) -> SessionEnd
    where
        W: Sink<Message, Error = tungstenite::Error> + Unpin,
        R: futures_util::Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
    {
        // Re-issue every listener registered before this connection.
        let existing: Vec<(ListenerId, Target)> = self
            .listeners
            .iter()
            .map(|(id, l)| (*id, l.target.clone()))
            .collect();
        for (listener, target) in existing {
            let request = self.request_id();
            self.pending.insert(
                request,
                Pending::Subscribe {
                    listener,
                    target: target.clone(),
                    reply: None,
                },
            );
            tracing::debug!(%listener, "re-issuing subscription");
            if let Err(e) = send(write, &target.subscribe_request(request)).await {
                tracing::warn!(error = %e, "pubsub write failed");
                return SessionEnd::Disconnected;
            }
        }

        loop {
            tokio::select! {
                cmd = commands.recv() => {
                    let Some(cmd) = cmd else {
                        return SessionEnd::Shutdown;
                    };
                    if let Some(out) = self.handle_command(cmd) {
                        if let Err(e) = send(write, &out).await {
                            tracing::warn!(error = %e, "pubsub write failed");
                            return SessionEnd::Disconnected;
                        }
                    }
                }
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        for out in self.handle_text(&text) {
                            if let Err(e) = send(write, &out).await {
                                tracing::warn!(error = %e, "pubsub write failed");
                                return SessionEnd::Disconnected;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::warn!("pubsub socket closed");
                        return SessionEnd::Disconnected;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "pubsub socket error");
                        return SessionEnd::Disconnected;
                    }
                    Some(Ok(_)) => {}
                },
            }
        }
    }

    /// Forget server-side state after the socket is gone.
    fn disconnect(&mut self) {
        self.routes.clear();
        for listener in self.listeners.values_mut() {
            listener.subscription = None;
        }
        for (_, pending) in self.pending.drain() {
            match pending {
                Pending::Subscribe {
                    listener,
                    reply: Some(reply),
                    ..
                } => {
                    // Kept as registered; it is re-issued on reconnect.
                    let _ = reply.send(Ok(listener));
                }
                Pending::Subscribe { reply: None, .. } => {}
                Pending::Unsubscribe { reply } => {
                    let _ = reply.send(Ok(()));
                }
            }
        }
    }

    /// Commands received while no socket is open. Registrations are
    /// accepted and issued once the connection is back.
    fn handle_offline(&mut self, cmd: Command) {
        match cmd {
            Command::Subscribe {
                target,
                sink,
                reply,
            } => {
                let id = self.listener_id();
                self.listeners.insert(
                    id,
                    Listener {
                        target,
                        sink,
                        subscription: None,
                    },
                );
                let _ = reply.send(Ok(id));
            }
            Command::Unsubscribe { listener, reply } => {
                let result = match self.listeners.remove(&listener) {
                    Some(_) => Ok(()),
                    None => Err(ClientError::ListenerNotFound(listener)),
                };
                let _ = reply.send(result);
            }
        }
    }

    /// Returns the request to write, if any.
    fn handle_command(&mut self, cmd: Command) -> Option<Value> {
        match cmd {
            Command::Subscribe {
                target,
                sink,
                reply,
            } => {
                let id = self.listener_id();
                let request = self.request_id();
                let out = target.subscribe_request(request);
                self.pending.insert(
                    request,
                    Pending::Subscribe {
                        listener: id,
                        target: target.clone(),
                        reply: Some(reply),
                    },
                );
                self.listeners.insert(
                    id,
                    Listener {
                        target,
                        sink,
                        subscription: None,
                    },
                );
                Some(out)
            }
            Command::Unsubscribe { listener, reply } => {
                let Some(removed) = self.listeners.remove(&listener) else {
                    let _ = reply.send(Err(ClientError::ListenerNotFound(listener)));
                    return None;
                };
                match removed.subscription {
                    Some(subscription) => {
                        self.routes.remove(&subscription);
                        let request = self.request_id();
                        self.pending.insert(request, Pending::Unsubscribe { reply });
                        Some(removed.target.unsubscribe_request(request, subscription))
                    }
                    None => {
                        let _ = reply.send(Ok(()));
                        None
                    }
                }
            }
        }
    }

    /// Handle one text frame. Returns requests to write back.
    fn handle_text(&mut self, text: &str) -> Vec<Value> {
        let incoming: Incoming = match serde_json::from_str(text) {
            Ok(incoming) => incoming,
            Err(e) => {
                tracing::warn!(error = %e, "unparseable pubsub frame");
                return Vec::new();
            }
        };

        if let Some(id) = incoming.id {
            return self.handle_response(id, incoming.result, incoming.error);
        }

        match (incoming.method.as_deref(), incoming.params) {
            (Some("accountNotification" | "programNotification"), Some(params)) => {
                self.handle_notification(params)
            }
            (method, _) => {
                tracing::debug!(?method, "ignoring pubsub frame");
                Vec::new()
            }
        }
    }

    fn handle_response(
        &mut self,
        id: u64,
        result: Option<Value>,
        error: Option<ErrorObject>,
    ) -> Vec<Value> {
        let Some(pending) = self.pending.remove(&id) else {
            tracing::debug!(id, "response for unknown request");
            return Vec::new();
        };

        let outcome = match (error, result) {
            (Some(err), _) => Err(ClientError::Rpc {
                code: err.code,
                message: err.message,
            }),
            (None, Some(value)) => Ok(value),
            (None, None) => Err(ClientError::InvalidResponse("missing result".into())),
        };

        match pending {
            Pending::Subscribe {
                listener,
                target,
                reply,
            } => {
                let subscription = outcome.and_then(|v| {
                    v.as_u64().ok_or_else(|| {
                        ClientError::InvalidResponse(format!("bad subscription id {v}"))
                    })
                });
                match subscription {
                    Ok(subscription) => match self.listeners.get_mut(&listener) {
                        Some(entry) => {
                            entry.subscription = Some(subscription);
                            self.routes.insert(subscription, listener);
                            if let Some(reply) = reply {
                                let _ = reply.send(Ok(listener));
                            }
                            Vec::new()
                        }
                        // Removed while the request was in flight.
                        None => {
                            let request = self.request_id();
                            vec![target.unsubscribe_request(request, subscription)]
                        }
                    },
                    Err(e) => {
                        tracing::warn!(listener = %listener, error = %e, "subscribe rejected");
                        self.listeners.remove(&listener);
                        if let Some(reply) = reply {
                            let _ = reply.send(Err(e));
                        }
                        Vec::new()
                    }
                }
            }
            Pending::Unsubscribe { reply } => {
                let _ = reply.send(outcome.map(|_| ()));
                Vec::new()
            }
        }
    }

    fn handle_notification(&mut self, params: NotificationParams) -> Vec<Value> {
        let Some(listener_id) = self.routes.get(&params.subscription).copied() else {
            tracing::debug!(
                subscription = params.subscription,
                "notification for unknown subscription"
            );
            return Vec::new();
        };
        let Some(listener) = self.listeners.get(&listener_id) else {
            return Vec::new();
        };

        let decoded = match &listener.target {
            Target::Account(address) => {
                serde_json::from_value::<WithContext<UiAccount>>(params.result)
                    .map_err(ClientError::from)
                    .and_then(|r| Ok((*address, r.value.decode()?, r.context.slot)))
            }
            Target::Program { .. } => {
                serde_json::from_value::<WithContext<UiKeyedAccount>>(params.result)
                    .map_err(ClientError::from)
                    .and_then(|r| {
                        let keyed = r.value.decode()?;
                        Ok((keyed.address, keyed.account, r.context.slot))
                    })
            }
        };

        let (address, account, slot) = match decoded {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::warn!(listener = %listener_id, error = %e, "bad notification payload");
                return Vec::new();
            }
        };

        let notification = AccountNotification {
            listener: listener_id,
            address,
            account,
            slot,
        };
        match listener.sink.try_send(notification) {
            Ok(()) => Vec::new(),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(listener = %listener_id, "notification sink full, dropping update");
                Vec::new()
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                // Receiver is gone; stop the server-side subscription too.
                let Some(removed) = self.listeners.remove(&listener_id) else {
                    return Vec::new();
                };
                self.routes.remove(&params.subscription);
                let request = self.request_id();
                vec![removed.target.unsubscribe_request(request, params.subscription)]
            }
        }
    }
}

async fn send<W>(write: &mut W, value: &Value) -> Result<(), tungstenite::Error>
where
    W: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    write.send(Message::text(value.to_string())).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::notification_channel;

    fn subscribed_state(sink: NotificationSender, target: Target) -> (State, ListenerId) {
        let mut state = State::default();
        let (reply, _rx) = oneshot::channel();
        let out = state
            .handle_command(Command::Subscribe {
                target,
                sink,
                reply,
            })
            .unwrap();
        let request = out["id"].as_u64().unwrap();
        state.handle_text(&format!(r#"{{"jsonrpc":"2.0","result":42,"id":{request}}}"#));
        (state, ListenerId(1))
    }

    #[test]
    fn test_subscribe_confirmation_routes_notifications() {
        let (tx, mut rx) = notification_channel();
        let address = Pubkey::new_from_array([3u8; 32]);
        let (mut state, listener) = subscribed_state(tx, Target::Account(address));
        assert_eq!(state.routes.get(&42), Some(&listener));

        state.handle_text(
            r#"{"jsonrpc":"2.0","method":"accountNotification","params":{
                "subscription":42,
                "result":{"context":{"slot":900},"value":{
                    "lamports":5,"owner":"11111111111111111111111111111111",
                    "data":["AQID","base64"],"executable":false,"rentEpoch":0}}}}"#,
        );
        let n = rx.try_recv().unwrap();
        assert_eq!(n.listener, listener);
        assert_eq!(n.address, address);
        assert_eq!(n.slot, 900);
        assert_eq!(n.account.data.as_ref(), &[1, 2, 3]);
    }

    #[test]
    fn test_program_notification_carries_pubkey() {
        let (tx, mut rx) = notification_channel();
        let target = Target::Program {
            program: Pubkey::new_from_array([7u8; 32]),
            filters: vec![],
        };
        let (mut state, _) = subscribed_state(tx, target);
        let account = Pubkey::new_from_array([8u8; 32]);
        state.handle_text(&format!(
            r#"{{"jsonrpc":"2.0","method":"programNotification","params":{{
                "subscription":42,
                "result":{{"context":{{"slot":12}},"value":{{"pubkey":"{account}","account":{{
                    "lamports":1,"owner":"11111111111111111111111111111111",
                    "data":["","base64"],"executable":false,"rentEpoch":0}}}}}}}}}}"#
        ));
        let n = rx.try_recv().unwrap();
        assert_eq!(n.address, account);
        assert_eq!(n.slot, 12);
    }

    #[test]
    fn test_unsubscribe_unknown_listener() {
        let mut state = State::default();
        let (reply, mut rx) = oneshot::channel();
        assert!(
            state
                .handle_command(Command::Unsubscribe {
                    listener: ListenerId(99),
                    reply,
                })
                .is_none()
        );
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(ClientError::ListenerNotFound(ListenerId(99)))
        ));
    }

    #[test]
    fn test_disconnect_clears_routes_but_keeps_listeners() {
        let (tx, _rx) = notification_channel();
        let (mut state, listener) =
            subscribed_state(tx, Target::Account(Pubkey::new_from_array([1u8; 32])));
        state.disconnect();
        assert!(state.routes.is_empty());
        assert!(state.listeners[&listener].subscription.is_none());
    }
}
