//! Channel-scripted transport for driving the client from tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};

use jsro_client::{ConnectOptions, Connection, RemoteObject, establish};
use jsro_core::transport::{Method, Transport, TransportError};

/// One captured transport call, with the reply channel the client awaits.
pub struct RecordedRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<Value>,
    pub reply: oneshot::Sender<Result<Value, TransportError>>,
}

impl RecordedRequest {
    pub fn respond(self, body: Value) {
        let _ = self.reply.send(Ok(body));
    }

    pub fn fail(self, message: &str) {
        let _ = self.reply.send(Err(TransportError::Network(message.into())));
    }

    /// Whether the client dropped (aborted) this request.
    pub fn aborted(&self) -> bool {
        self.reply.is_closed()
    }

    /// Wait until the client drops (aborts) this request.
    pub async fn wait_aborted(&mut self) {
        self.reply.closed().await;
    }
}

/// Transport whose every call surfaces on a channel for the test to answer.
///
/// An unanswered request models a held long poll; dropping the client's
/// future (watchdog, teardown) closes the reply channel, which the test can
/// observe through [`RecordedRequest::aborted`].
pub struct MockTransport {
    tx: mpsc::UnboundedSender<RecordedRequest>,
}

impl MockTransport {
    pub fn new() -> (Arc<Self>, MockServer) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self { tx }),
            MockServer {
                rx,
                parked_polls: Vec::new(),
            },
        )
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<Value>,
    ) -> Result<Value, TransportError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RecordedRequest {
                method,
                url: url.to_owned(),
                body,
                reply,
            })
            .map_err(|_| TransportError::Network("mock server gone".into()))?;
        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(TransportError::Network("mock reply dropped".into())),
        }
    }
}

/// Test-side view of the transport: pull requests, answer them at will.
pub struct MockServer {
    rx: mpsc::UnboundedReceiver<RecordedRequest>,
    /// Long-poll GETs held open, as a patient server would.
    pub parked_polls: Vec<RecordedRequest>,
}

impl MockServer {
    pub async fn next(&mut self) -> RecordedRequest {
        self.rx.recv().await.expect("transport dropped")
    }

    /// Next batch POST; long-poll GETs arriving meanwhile are parked
    /// unanswered.
    pub async fn next_post(&mut self) -> RecordedRequest {
        loop {
            let request = self.next().await;
            if request.method == Method::Get {
                self.parked_polls.push(request);
                continue;
            }
            assert_eq!(request.method, Method::Post, "unexpected {}", request.url);
            return request;
        }
    }

    /// Next long-poll GET; anything else fails the test.
    pub async fn next_poll(&mut self) -> RecordedRequest {
        let request = self.next().await;
        assert_eq!(
            request.method,
            Method::Get,
            "expected a poll GET, got {}",
            request.url
        );
        request
    }

    /// The oldest held poll, waiting for a fresh one if none is parked.
    pub async fn take_poll(&mut self) -> RecordedRequest {
        if self.parked_polls.is_empty() {
            self.next_poll().await
        } else {
            self.parked_polls.remove(0)
        }
    }

    /// Assert no further transport traffic arrives within `window`.
    pub async fn assert_quiet(&mut self, window: Duration) {
        match tokio::time::timeout(window, self.rx.recv()).await {
            Err(_) | Ok(None) => {}
            Ok(Some(request)) => panic!("unexpected traffic: {}", request.url),
        }
    }
}

/// Establish a session against the mock, answering the hello GET with
/// connection id `c1`.
pub async fn establish_mock(options: ConnectOptions) -> (Connection, MockServer) {
    let (transport, mut server) = MockTransport::new();
    let task = tokio::spawn(establish(transport, "http://srv/", options));

    let hello = server.next().await;
    assert_eq!(hello.method, Method::Get);
    assert_eq!(hello.url, "http://srv/");
    hello.respond(json!({"connectionId": "c1"}));

    let connection = task.await.unwrap().unwrap();
    (connection, server)
}

/// Drive one `create` round-trip, answering with the given registration.
pub async fn create_object(
    connection: &Connection,
    server: &mut MockServer,
    instance_id: &str,
    methods: &[&str],
) -> RemoteObject {
    let create = connection.create("Obj", json!({}));
    let answer = async {
        let post = server.next_post().await;
        let correlation_id = post.body.as_ref().unwrap()[0]["correlationId"].clone();
        post.respond(json!([{
            "correlationId": correlation_id,
            "result": {"instanceId": instance_id, "methods": methods},
        }]));
    };
    let (object, ()) = tokio::join!(create, answer);
    object.unwrap()
}

/// Wait for teardown to land, with a hard cap.
pub async fn wait_disconnected(connection: &Connection) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while connection.is_connected() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("connection did not tear down");
}
