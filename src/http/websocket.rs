//! Real-time socket layer over axum WebSockets.
//!
//! # Responsibilities
//! - Complete the upgrade handshake and register each connection by id
//! - Hand every connection to the `on_connection` handler as a [`Socket`]
//! - Fan out server-wide emits and per-socket broadcasts
//! - Keep connections alive with periodic pings
//! - Close every connection on `disconnect_all`
//!
//! # Data Flow
//! ```text
//! client frames → reader loop → Socket::recv (handler)
//! Socket::send  ─┐
//! emit/broadcast ├→ writer task → client
//! ping interval ─┘
//! ```

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::{get, MethodRouter},
};
use dashmap::DashMap;
use futures_util::{future::BoxFuture, FutureExt, SinkExt, StreamExt};
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use uuid::Uuid;

use crate::config::SocketOptions;
use crate::lifecycle::Shutdown;

type ConnectionHandler = Arc<dyn Fn(Socket) -> BoxFuture<'static, ()> + Send + Sync>;

/// A message fanned out to every connection except its origin.
#[derive(Clone)]
struct Envelope {
    from: Option<Uuid>,
    message: Message,
}

struct SocketHub {
    options: SocketOptions,
    connections: DashMap<Uuid, mpsc::Sender<Message>>,
    events: broadcast::Sender<Envelope>,
    handler: RwLock<Option<ConnectionHandler>>,
    shutdown: Shutdown,
}

/// WebSocket server: a connection registry plus fan-out.
#[derive(Clone)]
pub struct SocketServer {
    hub: Arc<SocketHub>,
}

/// One connected client, as seen by the connection handler.
pub struct Socket {
    id: Uuid,
    incoming: mpsc::Receiver<Message>,
    outgoing: mpsc::Sender<Message>,
    events: broadcast::Sender<Envelope>,
}

impl Socket {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Next text or binary message; `None` once the client is gone.
    pub async fn recv(&mut self) -> Option<Message> {
        self.incoming.recv().await
    }

    /// Send to this client. Returns `false` if it has disconnected.
    pub async fn send(&self, message: Message) -> bool {
        self.outgoing.send(message).await.is_ok()
    }

    pub async fn send_text(&self, text: impl Into<String>) -> bool {
        self.send(Message::Text(text.into().into())).await
    }

    /// Send to every other connected client.
    pub fn broadcast(&self, message: Message) -> usize {
        self.events
            .send(Envelope {
                from: Some(self.id),
                message,
            })
            .unwrap_or(0)
    }
}

impl SocketServer {
    pub fn new(options: SocketOptions) -> Self {
        let (events, _) = broadcast::channel(options.channel_capacity.max(1));
        Self {
            hub: Arc::new(SocketHub {
                options,
                connections: DashMap::new(),
                events,
                handler: RwLock::new(None),
                shutdown: Shutdown::new(),
            }),
        }
    }

    pub fn options(&self) -> &SocketOptions {
        &self.hub.options
    }

    /// Run `handler` for every new connection.
    pub fn on_connection<F, Fut>(&self, handler: F) -> &Self
    where
        F: Fn(Socket) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: ConnectionHandler = Arc::new(move |socket| handler(socket).boxed());
        *self.hub.handler.write().expect("socket handler lock poisoned") = Some(handler);
        self
    }

    /// Send a message to every connected client. Returns how many
    /// connections were listening.
    pub fn emit(&self, message: Message) -> usize {
        self.hub
            .events
            .send(Envelope {
                from: None,
                message,
            })
            .unwrap_or(0)
    }

    pub fn emit_text(&self, text: impl Into<String>) -> usize {
        self.emit(Message::Text(text.into().into()))
    }

    /// Send to one client. Returns `false` if it is unknown or its queue
    /// is full.
    pub fn send_to(&self, id: Uuid, message: Message) -> bool {
        self.hub
            .connections
            .get(&id)
            .is_some_and(|tx| tx.try_send(message).is_ok())
    }

    /// Number of open connections.
    pub fn connected(&self) -> usize {
        self.hub.connections.len()
    }

    /// Close every open connection.
    pub fn disconnect_all(&self) {
        tracing::debug!(connections = self.connected(), "Disconnecting all sockets");
        self.hub.shutdown.trigger();
    }

    /// The upgrade endpoint, ready to be attached to an app.
    pub fn method_router(&self) -> MethodRouter {
        get(upgrade).with_state(self.hub.clone())
    }
}

async fn upgrade(State(hub): State<Arc<SocketHub>>, ws: WebSocketUpgrade) -> Response {
    ws.max_message_size(hub.options.max_message_size)
        .on_upgrade(move |socket| serve_connection(hub, socket))
}

fn ping_timer(secs: u64) -> Option<Interval> {
    (secs > 0).then(|| {
        let period = Duration::from_secs(secs);
        let mut timer = interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        timer
    })
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn serve_connection(hub: Arc<SocketHub>, socket: WebSocket) {
    let id = Uuid::new_v4();
    let capacity = hub.options.channel_capacity.max(1);
    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Message>(capacity);
    let (in_tx, in_rx) = mpsc::channel::<Message>(capacity);

    let mut events = hub.events.subscribe();
    let mut shutdown = hub.shutdown.subscribe();
    hub.connections.insert(id, out_tx.clone());
    tracing::debug!(%id, connections = hub.connections.len(), "Socket connected");

    let handler = hub
        .handler
        .read()
        .expect("socket handler lock poisoned")
        .clone();
    if let Some(handler) = handler {
        tokio::spawn(handler(Socket {
            id,
            incoming: in_rx,
            outgoing: out_tx,
            events: hub.events.clone(),
        }));
    } else {
        drop(in_rx);
    }

    let mut ping = ping_timer(hub.options.ping_interval_secs);
    let mut writer = tokio::spawn(async move {
        loop {
            let outbound = tokio::select! {
                Some(message) = out_rx.recv() => message,
                event = events.recv() => match event {
                    Ok(envelope) if envelope.from == Some(id) => continue,
                    Ok(envelope) => envelope.message,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(%id, skipped, "Socket fell behind broadcasts");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = tick(&mut ping) => Message::Ping(Bytes::new()),
                _ = shutdown.recv() => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            };
            if sink.send(outbound).await.is_err() {
                break;
            }
        }
    });

    let reader = async {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(message @ (Message::Text(_) | Message::Binary(_))) => {
                    // No handler, or the handler stopped reading.
                    if in_tx.is_closed() {
                        continue;
                    }
                    let _ = in_tx.send(message).await;
                }
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    };

    tokio::select! {
        _ = &mut writer => {}
        _ = reader => {}
    }
    writer.abort();
    hub.connections.remove(&id);
    tracing::debug!(%id, connections = hub.connections.len(), "Socket disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_connections() {
        let server = SocketServer::new(SocketOptions::default());
        assert_eq!(server.connected(), 0);
        assert_eq!(server.emit_text("nobody"), 0);
        assert!(!server.send_to(Uuid::new_v4(), Message::Text(String::from("x").into())));
        server.disconnect_all();
    }

    #[tokio::test]
    async fn test_ping_timer_disabled_and_delayed() {
        assert!(ping_timer(0).is_none());

        let mut timer = ping_timer(60);
        let first = tokio::time::timeout(Duration::from_millis(20), tick(&mut timer)).await;
        assert!(first.is_err());
    }
}
