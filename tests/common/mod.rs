#![allow(dead_code, clippy::unwrap_used)]
// Fake WeBack socket endpoint shared by the integration tests.

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

use weback_vacuum::{Credential, CredentialStore};

pub const TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
enum Outgoing {
    Text(String),
    Close,
}

/// Headers seen on a socket handshake
#[derive(Debug, Clone, Default)]
pub struct Handshake {
    pub authorization: Option<String>,
    pub region: Option<String>,
    pub token: Option<String>,
}

pub struct FakeCloud {
    pub url: String,
    connections: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
    handshakes: Arc<Mutex<Vec<Handshake>>>,
    client: Arc<Mutex<Option<mpsc::UnboundedSender<Outgoing>>>>,
    inbound: mpsc::UnboundedReceiver<Value>,
}

impl FakeCloud {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        let connections = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicUsize::new(0));
        let handshakes = Arc::new(Mutex::new(Vec::new()));
        let client: Arc<Mutex<Option<mpsc::UnboundedSender<Outgoing>>>> = Arc::new(Mutex::new(None));
        let (inbound_tx, inbound) = mpsc::unbounded_channel();

        let (conn, done, seen, current) = (
            connections.clone(),
            closed.clone(),
            handshakes.clone(),
            client.clone(),
        );
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                conn.fetch_add(1, Ordering::SeqCst);

                let seen = seen.clone();
                let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                    let header = |name: &str| {
                        request
                            .headers()
                            .get(name)
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string)
                    };
                    seen.lock().unwrap().push(Handshake {
                        authorization: header("Authorization"),
                        region: header("region"),
                        token: header("token"),
                    });
                    Ok(response)
                };
                let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
                    continue;
                };

                let (tx, mut rx) = mpsc::unbounded_channel();
                *current.lock().unwrap() = Some(tx);

                let inbound_tx = inbound_tx.clone();
                let done = done.clone();
                tokio::spawn(async move {
                    let (mut write, mut read) = ws.split();
                    loop {
                        tokio::select! {
                            out = rx.recv() => match out {
                                Some(Outgoing::Text(text)) => {
                                    if write.send(Message::Text(text)).await.is_err() {
                                        break;
                                    }
                                }
                                Some(Outgoing::Close) | None => {
                                    let _ = write.close().await;
                                    break;
                                }
                            },
                            msg = read.next() => match msg {
                                Some(Ok(Message::Text(text))) => {
                                    let _ = inbound_tx.send(serde_json::from_str(&text).unwrap());
                                }
                                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                                Some(Ok(_)) => {}
                            },
                        }
                    }
                    done.fetch_add(1, Ordering::SeqCst);
                });
            }
        });

        Self {
            url,
            connections,
            closed,
            handshakes,
            client,
            inbound,
        }
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn handshakes(&self) -> Vec<Handshake> {
        self.handshakes.lock().unwrap().clone()
    }

    /// Push a text frame to the most recent client
    pub fn push(&self, frame: &Value) {
        let client = self.client.lock().unwrap();
        client
            .as_ref()
            .unwrap()
            .send(Outgoing::Text(frame.to_string()))
            .unwrap();
    }

    /// Close the most recent client connection from the server side
    pub fn hang_up(&self) {
        if let Some(client) = self.client.lock().unwrap().take() {
            let _ = client.send(Outgoing::Close);
        }
    }

    /// Next frame received from any client
    pub async fn next_frame(&mut self) -> Value {
        tokio::time::timeout(TIMEOUT, self.inbound.recv())
            .await
            .expect("no frame received in time")
            .unwrap()
    }

    /// Wait until `check` holds, polling every 20 ms
    pub async fn wait_until(&self, check: impl Fn(&Self) -> bool) {
        tokio::time::timeout(TIMEOUT, async {
            while !check(self) {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }
}

pub fn future_expiry() -> String {
    (chrono::Utc::now() + chrono::Duration::days(1))
        .naive_utc()
        .format("%Y-%m-%d %H:%M:%S%.f")
        .to_string()
}

/// Write a valid cached credential pointing at the given endpoints
pub fn cache_credential(store: &CredentialStore, user: &str, api_url: &str, wss_url: &str) {
    store
        .save(&Credential {
            user: user.to_string(),
            jwt_token: "jwt-test".into(),
            token_exp: future_expiry(),
            api_url: api_url.to_string(),
            wss_url: wss_url.to_string(),
            region_name: "eu".into(),
        })
        .unwrap();
}

/// Compressed map payload as the cloud sends it
pub fn map_payload(document: &Value) -> String {
    use base64::Engine;
    use flate2::write::ZlibEncoder;
    use std::io::Write;

    let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(document.to_string().as_bytes()).unwrap();
    base64::engine::general_purpose::STANDARD.encode(encoder.finish().unwrap())
}

pub fn map_document() -> Value {
    use base64::Engine;
    let b64 = base64::engine::general_purpose::STANDARD;

    serde_json::json!({
        "MapWidth": 4,
        "MapHigh": 1,
        "MapResolution": 0.05,
        "MapOrigin": [10, 20],
        "ChargerPoint": [0, 0],
        "MapData": b64.encode([0x1Bu8]),
        "room_zone_info": [
            {
                "room_id": 7,
                "room_name": "Office",
                "room_point_x": [0, 10, 10, 0],
                "room_point_y": [0, 0, 10, 10]
            }
        ]
    })
}
