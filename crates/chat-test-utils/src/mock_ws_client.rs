use std::time::Duration;

use chat_protocol::{ChatMessage, MessageKind};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::tungstenite::protocol::Message;

type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub type ClientError = Box<dyn std::error::Error + Send + Sync>;

/// A chat client for driving the relay over a real socket in tests.
pub struct MockWsClient {
    write: futures_util::stream::SplitSink<WsStream, Message>,
    read: futures_util::stream::SplitStream<WsStream>,
}

impl MockWsClient {
    pub async fn connect(url: &str) -> Result<Self, ClientError> {
        let (ws_stream, _response) = tokio_tungstenite::connect_async(url).await?;
        let (write, read) = ws_stream.split();
        Ok(Self { write, read })
    }

    /// Connect and consume the bootstrap frame, returning the assigned id.
    pub async fn connect_and_identify(url: &str) -> Result<(Self, String), ClientError> {
        let mut client = Self::connect(url).await?;
        let id = client.recv_identity().await?;
        Ok((client, id))
    }

    pub async fn send_message(&mut self, msg: &ChatMessage) -> Result<(), ClientError> {
        self.send_text(&msg.encode()).await
    }

    /// Send a raw text frame, e.g. a hand-written or deliberately malformed payload.
    pub async fn send_text(&mut self, text: &str) -> Result<(), ClientError> {
        self.write.send(Message::Text(text.to_owned().into())).await?;
        Ok(())
    }

    pub async fn send_binary(&mut self, data: Vec<u8>) -> Result<(), ClientError> {
        self.write.send(Message::Binary(data.into())).await?;
        Ok(())
    }

    pub async fn recv_message(&mut self) -> Result<ChatMessage, ClientError> {
        loop {
            match self.read.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Ok(ChatMessage::decode(&text)?);
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) => return Err("connection closed by server".into()),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => return Err("connection stream ended".into()),
            }
        }
    }

    /// Like [`recv_message`](Self::recv_message) but gives up after `wait`,
    /// returning `Ok(None)`.
    pub async fn recv_message_timeout(
        &mut self,
        wait: Duration,
    ) -> Result<Option<ChatMessage>, ClientError> {
        match tokio::time::timeout(wait, self.recv_message()).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Skip frames until one satisfies `pred`, failing after `wait`.
    pub async fn recv_until<F>(&mut self, wait: Duration, pred: F) -> Result<ChatMessage, ClientError>
    where
        F: Fn(&ChatMessage) -> bool,
    {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let msg = tokio::time::timeout_at(deadline, self.recv_message())
                .await
                .map_err(|_| "timed out waiting for matching message")??;
            if pred(&msg) {
                return Ok(msg);
            }
        }
    }

    pub async fn recv_identity(&mut self) -> Result<String, ClientError> {
        let msg = self.recv_message().await?;
        if msg.kind() != MessageKind::IdentityAnnouncement {
            return Err(format!("expected internal_user_id, got {msg:?}").into());
        }
        Ok(msg.body().to_owned())
    }

    /// Wait for the server to close the socket.  Frames received before the
    /// close are discarded.  Returns `false` if the socket is still open after
    /// `wait`.
    pub async fn wait_for_close(&mut self, wait: Duration) -> bool {
        let closed = async {
            loop {
                match self.read.next().await {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                    Some(Ok(_)) => continue,
                }
            }
        };
        tokio::time::timeout(wait, closed).await.is_ok()
    }

    /// Like [`wait_for_close`](Self::wait_for_close) but returns the close
    /// code the server sent, if it sent one.
    pub async fn wait_for_close_code(&mut self, wait: Duration) -> Option<u16> {
        let closed = async {
            loop {
                match self.read.next().await {
                    Some(Ok(Message::Close(frame))) => return frame.map(|f| u16::from(f.code)),
                    Some(Err(_)) | None => return None,
                    Some(Ok(_)) => continue,
                }
            }
        };
        tokio::time::timeout(wait, closed).await.ok().flatten()
    }

    pub async fn close(&mut self) -> Result<(), ClientError> {
        self.write.send(Message::Close(None)).await?;
        Ok(())
    }
}
