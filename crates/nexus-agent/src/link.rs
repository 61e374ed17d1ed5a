//! Outbound hub link
//!
//! A single duplex websocket carrying JSON frames. The agent dials out,
//! presents the shared credential, and registers under its display name.
//! The link owner (`runtime`) handles reconnection; this module only
//! represents one live connection.

use anyhow::{Context, Result};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use nexus_core::config::AgentConfig;
use nexus_protocol::{decode_frame, encode_frame, AgentFrame, Hello, HubToAgent};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One live connection to the hub
pub struct HubLink {
    sink: SplitSink<WsStream, Message>,
    stream: SplitStream<WsStream>,
}

impl HubLink {
    /// Dial the hub, authenticate, and register.
    ///
    /// The credential defaults to empty when unset; the hub decides
    /// whether credential-less agents are acceptable.
    pub async fn connect(config: &AgentConfig, name: &str) -> Result<Self> {
        tracing::debug!("Connecting to hub at {}", config.hub_url);
        let (ws, _response) = connect_async(&config.hub_url)
            .await
            .with_context(|| format!("connecting to {}", config.hub_url))?;

        let (sink, stream) = ws.split();
        let mut link = Self { sink, stream };

        let hello = Hello::Agent {
            credential: config.worker_token.clone().unwrap_or_default(),
        };
        link.send_text(&encode_frame(&hello)?).await?;

        link.send(&AgentFrame::Register {
            name: name.to_string(),
        })
        .await?;

        Ok(link)
    }

    /// Send one frame to the hub
    pub async fn send(&mut self, frame: &AgentFrame) -> Result<()> {
        self.send_text(&encode_frame(frame)?).await
    }

    async fn send_text(&mut self, text: &str) -> Result<()> {
        self.sink
            .send(Message::Text(text.to_string().into()))
            .await
            .context("sending frame to hub")
    }

    /// Receive the next hub frame.
    ///
    /// Returns None when the link is gone. Unparsable frames are dropped
    /// with a warning; the hub never legitimately sends them.
    pub async fn recv(&mut self) -> Option<HubToAgent> {
        while let Some(msg) = self.stream.next().await {
            match msg {
                Ok(Message::Text(text)) => match decode_frame::<HubToAgent>(&text) {
                    Ok(frame) => return Some(frame),
                    Err(e) => {
                        tracing::warn!("Dropping bad frame from hub: {}", e);
                    }
                },
                Ok(Message::Close(_)) => return None,
                Ok(_) => continue,
                Err(e) => {
                    tracing::debug!("Hub link error: {}", e);
                    return None;
                }
            }
        }
        None
    }
}
