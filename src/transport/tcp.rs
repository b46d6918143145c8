use super::{Transport, TransportConfig};
use crate::measurement::{MeasurementUnit, ResultValue};
use crate::message::{Headers, Message};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Largest reply frame accepted from the target
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Request frame body; serialized as JSON
#[derive(Serialize)]
struct WireRequest<'a> {
    headers: BTreeMap<&'a str, &'a str>,
    payload: &'a str,
}

impl<'a> WireRequest<'a> {
    /// The message's own headers, overlaid with the per-send headers
    fn new(message: Option<&'a Message>, headers: &'a Headers) -> Self {
        let mut merged: BTreeMap<&str, &str> = message
            .map(|m| {
                m.headers
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str()))
                    .collect()
            })
            .unwrap_or_default();
        merged.extend(headers.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        Self {
            headers: merged,
            payload: message.map(|m| m.payload.as_str()).unwrap_or_default(),
        }
    }
}

/// TCP transport holding one persistent connection.
///
/// Frames are a 4-byte little-endian length followed by the body. Requests
/// carry the payload and the headers as JSON, per-send headers taking
/// precedence over the message's own; the reply body is returned as raw
/// bytes. After an I/O failure the connection is dropped and re-established
/// in the next pre-send phase.
pub struct TcpTransport {
    config: Option<TransportConfig>,
    stream: Option<TcpStream>,
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpTransport {
    pub fn new() -> Self {
        Self {
            config: None,
            stream: None,
        }
    }

    async fn connect(config: &TransportConfig) -> Result<TcpStream> {
        debug!("TCP transport connecting to: {}", config.target);
        let stream = timeout(config.connect_timeout, TcpStream::connect(&config.target))
            .await
            .map_err(|_| anyhow!("Timed out connecting to {}", config.target))?
            .with_context(|| format!("Failed to connect to {}", config.target))?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    async fn write_frame(stream: &mut TcpStream, body: &[u8], limit: Duration) -> Result<()> {
        let len = u32::try_from(body.len()).map_err(|_| anyhow!("Request frame too large"))?;
        let write = async {
            stream.write_all(&len.to_le_bytes()).await?;
            stream.write_all(body).await?;
            stream.flush().await?;
            Ok::<(), std::io::Error>(())
        };
        timeout(limit, write)
            .await
            .map_err(|_| anyhow!("Write timed out after {:?}", limit))??;
        Ok(())
    }

    async fn read_frame(stream: &mut TcpStream, limit: Duration) -> Result<Vec<u8>> {
        let read = async {
            let mut len_bytes = [0u8; 4];
            stream.read_exact(&mut len_bytes).await?;
            let len = u32::from_le_bytes(len_bytes) as usize;
            if len > MAX_FRAME_LEN {
                return Err(anyhow!("Reply too large: {} bytes", len));
            }

            let mut body = vec![0u8; len];
            stream.read_exact(&mut body).await?;
            Ok::<Vec<u8>, anyhow::Error>(body)
        };
        timeout(limit, read)
            .await
            .map_err(|_| anyhow!("Read timed out after {:?}", limit))?
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn initialize(&mut self, config: &TransportConfig) -> Result<()> {
        self.stream = Some(Self::connect(config).await?);
        self.config = Some(config.clone());
        Ok(())
    }

    async fn pre_send(&mut self, _message: Option<&Message>, _headers: &Headers) -> Result<()> {
        if self.stream.is_none() {
            let config = self
                .config
                .as_ref()
                .ok_or_else(|| anyhow!("TCP transport was never initialized"))?;
            warn!("TCP connection to {} lost, reconnecting", config.target);
            self.stream = Some(Self::connect(config).await?);
        }
        Ok(())
    }

    async fn send(
        &mut self,
        message: Option<&Message>,
        headers: &Headers,
        _unit: &mut MeasurementUnit,
    ) -> Result<Option<ResultValue>> {
        let (limit, buffer_size) = self
            .config
            .as_ref()
            .map(|c| (c.io_timeout, c.buffer_size))
            .ok_or_else(|| anyhow!("TCP transport was never initialized"))?;
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| anyhow!("TCP transport not connected"))?;

        let mut body = Vec::with_capacity(buffer_size);
        serde_json::to_writer(&mut body, &WireRequest::new(message, headers))?;

        let exchange = async {
            Self::write_frame(stream, &body, limit).await?;
            Self::read_frame(stream, limit).await
        };

        match exchange.await {
            Ok(reply) => Ok(Some(ResultValue::Bytes(reply))),
            Err(e) => {
                // The stream may hold half a frame now; start over on the next round trip.
                self.stream = None;
                Err(e)
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "tcp"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageTemplate;
    use tokio::net::TcpListener;

    /// Answers every frame with `reply(request)`.
    async fn spawn_server(reply: fn(&serde_json::Value) -> String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    loop {
                        let mut len = [0u8; 4];
                        if socket.read_exact(&mut len).await.is_err() {
                            return;
                        }
                        let mut body = vec![0u8; u32::from_le_bytes(len) as usize];
                        if socket.read_exact(&mut body).await.is_err() {
                            return;
                        }
                        let request: serde_json::Value = serde_json::from_slice(&body).unwrap();
                        let reply = reply(&request);
                        let _ = socket.write_all(&(reply.len() as u32).to_le_bytes()).await;
                        let _ = socket.write_all(reply.as_bytes()).await;
                    }
                });
            }
        });
        addr
    }

    /// Replies with the request's payload field.
    async fn spawn_echo_server() -> String {
        spawn_server(|request| request["payload"].as_str().unwrap_or_default().to_string()).await
    }

    #[tokio::test]
    async fn test_round_trip_against_echo_server() {
        let target = spawn_echo_server().await;
        let config = TransportConfig {
            target,
            ..Default::default()
        };

        let mut transport = TcpTransport::new();
        transport.initialize(&config).await.unwrap();

        let mut unit = MeasurementUnit::new(1);
        let message = Message::new("ping");
        transport.pre_send(Some(&message), &Headers::new()).await.unwrap();
        let reply = transport
            .send(Some(&message), &Headers::new(), &mut unit)
            .await
            .unwrap();
        assert_eq!(reply, Some(ResultValue::Bytes(b"ping".to_vec())));

        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_message_headers_reach_the_wire() {
        // Replies with the headers object it received.
        let target = spawn_server(|request| request["headers"].to_string()).await;
        let config = TransportConfig {
            target,
            ..Default::default()
        };
        let mut transport = TcpTransport::new();
        transport.initialize(&config).await.unwrap();

        let message = MessageTemplate::new("p")
            .with_header("trace", "t-${MessageNumber}")
            .with_header("MessageNumber", "from-template")
            .filtered(&[("MessageNumber".to_string(), "7".to_string())].into());
        let mut headers = Headers::new();
        headers.insert("MessageNumber".to_string(), "7".to_string());

        let mut unit = MeasurementUnit::new(7);
        let reply = transport
            .send(Some(&message), &headers, &mut unit)
            .await
            .unwrap()
            .unwrap();
        let received: serde_json::Value = serde_json::from_str(&reply.as_text()).unwrap();

        assert_eq!(received["trace"], "t-7");
        // Per-send headers win over the template's.
        assert_eq!(received["MessageNumber"], "7");

        transport.close().await.unwrap();
    }

    #[test]
    fn test_heartbeat_request_carries_only_send_headers() {
        let mut headers = Headers::new();
        headers.insert("h".to_string(), "v".to_string());

        let body = serde_json::to_value(WireRequest::new(None, &headers)).unwrap();
        assert_eq!(body, serde_json::json!({"headers": {"h": "v"}, "payload": ""}));
    }

    #[tokio::test]
    async fn test_initialize_fails_without_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = listener.local_addr().unwrap().to_string();
        drop(listener);

        let config = TransportConfig {
            target,
            connect_timeout: Duration::from_millis(500),
            ..Default::default()
        };
        let mut transport = TcpTransport::new();
        assert!(transport.initialize(&config).await.is_err());
    }
}
