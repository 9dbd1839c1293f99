use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::RecordingController;

type ObsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const RPC_VERSION: u64 = 1;

const OP_HELLO: u64 = 0;
const OP_IDENTIFY: u64 = 1;
const OP_IDENTIFIED: u64 = 2;
const OP_REQUEST: u64 = 6;
const OP_REQUEST_RESPONSE: u64 = 7;

#[derive(Debug, Clone)]
pub struct ObsConfig {
    pub host: String,
    pub port: u16,
    /// Empty when OBS has authentication disabled
    pub password: String,
    /// Applies to connecting and to every request/response exchange
    pub request_timeout: Duration,
}

impl ObsConfig {
    pub fn url(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }
}

impl Default for ObsConfig {
    fn default() -> Self {
        ObsConfig {
            host: "localhost".to_string(),
            port: 4455,
            password: String::new(),
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// Recording controller speaking the OBS WebSocket v5 protocol.
///
/// One connection is held open and reused. A connection that fails mid-call
/// is dropped and the next call reconnects.
pub struct ObsRecorder {
    config: ObsConfig,
    connection: Mutex<Option<ObsStream>>,
}

impl ObsRecorder {
    pub fn new(config: ObsConfig) -> Self {
        ObsRecorder {
            config,
            connection: Mutex::new(None),
        }
    }

    /// Open a connection and complete the Hello/Identify handshake.
    async fn connect(&self) -> Result<ObsStream> {
        let url = self.config.url();
        let timeout = self.config.request_timeout;

        let (mut ws, _) = tokio::time::timeout(timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| anyhow!("Timed out connecting to OBS at {}", url))?
            .with_context(|| format!("Failed to connect to OBS at {}", url))?;

        let hello = next_message(&mut ws, timeout).await.context("No Hello from OBS")?;
        if hello["op"].as_u64() != Some(OP_HELLO) {
            bail!("Expected Hello from OBS, got {}", hello);
        }

        let authentication = match hello["d"].get("authentication") {
            Some(challenge) => {
                if self.config.password.is_empty() {
                    bail!("OBS requires a password but none is configured");
                }
                let salt = challenge["salt"].as_str().context("Hello is missing the auth salt")?;
                let challenge = challenge["challenge"].as_str().context("Hello is missing the auth challenge")?;
                Some(auth_response(&self.config.password, salt, challenge))
            }
            None => None,
        };

        send_json(&mut ws, &identify_message(authentication)).await?;

        let identified = next_message(&mut ws, timeout).await.context("OBS did not answer Identify")?;
        if identified["op"].as_u64() != Some(OP_IDENTIFIED) {
            bail!("OBS rejected identification: {}", identified);
        }

        info!(
            "Connected to OBS at {} (rpc version {})",
            url,
            identified["d"]["negotiatedRpcVersion"].as_u64().unwrap_or(RPC_VERSION)
        );
        Ok(ws)
    }

    /// Send one request and return its `responseData`.
    async fn call(&self, request_type: &str, request_data: Value) -> Result<Value> {
        let mut connection = self.connection.lock().await;

        if connection.is_none() {
            *connection = Some(self.connect().await?);
        }
        let Some(ws) = connection.as_mut() else {
            bail!("OBS connection unavailable");
        };

        let response = match exchange(ws, request_type, request_data, self.config.request_timeout).await {
            Ok(response) => response,
            Err(e) => {
                warn!("OBS connection dropped during {}: {:#}", request_type, e);
                *connection = None;
                return Err(e);
            }
        };
        drop(connection);

        response_data(request_type, &response)
    }

    async fn record_status(&self) -> Result<(bool, i64)> {
        let status = self.call("GetRecordStatus", json!({})).await?;
        Ok((
            status["outputActive"].as_bool().unwrap_or(false),
            status["outputDuration"].as_i64().unwrap_or(0),
        ))
    }
}

#[async_trait]
impl RecordingController for ObsRecorder {
    async fn start_recording(&self) -> Result<DateTime<Utc>> {
        let (active, elapsed_ms) = self.record_status().await?;
        if active {
            let reference = common::util::now() - ChronoDuration::milliseconds(elapsed_ms);
            warn!(
                "OBS is already recording ({} ms in); using back-computed start {}",
                elapsed_ms, reference
            );
            return Ok(reference);
        }

        self.call("StartRecord", json!({})).await.context("StartRecord failed")?;
        let reference = common::util::now();
        info!("OBS recording started, T=0 at {}", reference);
        Ok(reference)
    }

    async fn stop_recording(&self) -> Result<Option<PathBuf>> {
        let (active, _) = self.record_status().await?;
        if !active {
            warn!("OBS is not recording, nothing to stop");
            return Ok(None);
        }

        let data = self.call("StopRecord", json!({})).await.context("StopRecord failed")?;
        let path = data["outputPath"].as_str().map(PathBuf::from);
        match &path {
            Some(path) => info!("OBS recording stopped, saved to {}", path.display()),
            None => info!("OBS recording stopped (no output path reported)"),
        }
        Ok(path)
    }

    async fn is_recording(&self) -> Result<bool> {
        Ok(self.record_status().await?.0)
    }
}

/// `base64(sha256(base64(sha256(password + salt)) + challenge))`
pub fn auth_response(password: &str, salt: &str, challenge: &str) -> String {
    let secret = STANDARD.encode(Sha256::digest(format!("{}{}", password, salt).as_bytes()));
    STANDARD.encode(Sha256::digest(format!("{}{}", secret, challenge).as_bytes()))
}

fn identify_message(authentication: Option<String>) -> Value {
    let mut d = json!({
        "rpcVersion": RPC_VERSION,
        "eventSubscriptions": 0,
    });
    if let Some(authentication) = authentication {
        d["authentication"] = Value::String(authentication);
    }
    json!({ "op": OP_IDENTIFY, "d": d })
}

fn request_message(request_type: &str, request_id: &str, request_data: Value) -> Value {
    json!({
        "op": OP_REQUEST,
        "d": {
            "requestType": request_type,
            "requestId": request_id,
            "requestData": request_data,
        }
    })
}

fn response_data(request_type: &str, response: &Value) -> Result<Value> {
    let status = &response["d"]["requestStatus"];
    if status["result"].as_bool() != Some(true) {
        bail!(
            "OBS rejected {}: code {} {}",
            request_type,
            status["code"].as_i64().unwrap_or(0),
            status["comment"].as_str().unwrap_or("")
        );
    }
    Ok(response["d"].get("responseData").cloned().unwrap_or(Value::Null))
}

async fn exchange(ws: &mut ObsStream, request_type: &str, request_data: Value, timeout: Duration) -> Result<Value> {
    let request_id = Uuid::new_v4().to_string();
    send_json(ws, &request_message(request_type, &request_id, request_data)).await?;

    loop {
        let message = next_message(ws, timeout).await?;
        if message["op"].as_u64() == Some(OP_REQUEST_RESPONSE)
            && message["d"]["requestId"].as_str() == Some(request_id.as_str())
        {
            return Ok(message);
        }
        debug!("Ignoring OBS message while waiting for {}: {}", request_type, message);
    }
}

async fn send_json(ws: &mut ObsStream, message: &Value) -> Result<()> {
    ws.send(Message::Text(message.to_string().into()))
        .await
        .context("Failed to send to OBS")
}

async fn next_message(ws: &mut ObsStream, timeout: Duration) -> Result<Value> {
    loop {
        match tokio::time::timeout(timeout, ws.next()).await {
            Err(_) => bail!("Timed out waiting for OBS"),
            Ok(None) => bail!("OBS closed the connection"),
            Ok(Some(Err(e))) => return Err(e).context("OBS connection error"),
            Ok(Some(Ok(Message::Text(text)))) => {
                return serde_json::from_str(&text).context("OBS sent invalid JSON");
            }
            Ok(Some(Ok(Message::Close(_)))) => bail!("OBS closed the connection"),
            Ok(Some(Ok(_))) => continue,
        }
    }
}
