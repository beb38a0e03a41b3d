//! Signaling client.
//!
//! Thin driver over the framed transport: joins the overlay with
//! [`SignalingClient::knock`] and exposes one method per client-originated
//! operation. Server-pushed traffic (greetings, alias updates, accepts,
//! goodbyes) is consumed through [`SignalingClient::recv`], which also
//! answers liveness pings transparently.

use crate::address::{Alias, ClientId, Subnet};
use crate::framing::{read_frame, write_frame};
use crate::protocol::{
    Accepting, Answer, Bind, Candidate, Connect, Envelope, Knock, Message, Offer, Shutdown,
};
use anyhow::{anyhow, Context, Result};
use log::info;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Client side of the signaling protocol.
pub struct SignalingClient<S> {
    stream: S,
    id: Option<ClientId>,
}

impl SignalingClient<TcpStream> {
    /// Connect to a signaling server via TCP.
    pub async fn connect(server_addr: &str) -> Result<Self> {
        info!("Connecting to signaling server at {}", server_addr);
        let stream = TcpStream::connect(server_addr)
            .await
            .context("Failed to connect to signaling server")?;
        Ok(Self::new(stream))
    }
}

impl<S> SignalingClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Create a client over an existing stream.
    pub fn new(stream: S) -> Self {
        Self { stream, id: None }
    }

    /// The id allocated by KNOCK, once joined.
    pub fn id(&self) -> Option<ClientId> {
        self.id
    }

    fn joined_id(&self) -> Result<ClientId> {
        self.id.ok_or_else(|| anyhow!("not joined: knock first"))
    }

    /// Join the overlay, requesting an id in `subnet`.
    pub async fn knock(&mut self, subnet: Subnet) -> Result<ClientId> {
        self.send(Message::Knock(Knock { subnet })).await?;
        match self.recv().await? {
            Message::Acknowledgement(ack) if !ack.rejected => {
                let id: ClientId = ack.id.parse()?;
                self.id = Some(id);
                info!("Joined overlay as {}", id);
                Ok(id)
            }
            Message::Acknowledgement(_) => Err(anyhow!("knock rejected: subnet {} is full", subnet)),
            other => Err(anyhow!(
                "expected acknowledgement, got opcode {:?}",
                other.opcode()
            )),
        }
    }

    /// Publish `alias` as a well-known endpoint. The outcome arrives as an
    /// `Alias` message through [`recv`](Self::recv).
    pub async fn bind(&mut self, alias: Alias) -> Result<()> {
        let id = self.joined_id()?;
        self.send(Message::Bind(Bind { id, alias })).await
    }

    /// Declare readiness to receive CONNECTs on a bound alias. The server
    /// never confirms this; assume success unless a CONNECT is rejected.
    pub async fn accepting(&mut self, alias: Alias) -> Result<()> {
        let id = self.joined_id()?;
        self.send(Message::Accepting(Accepting { id, alias })).await
    }

    /// Withdraw a bound alias.
    pub async fn shutdown(&mut self, alias: Alias) -> Result<()> {
        let id = self.joined_id()?;
        self.send(Message::Shutdown(Shutdown { id, alias })).await
    }

    /// Ask for a session against `remote_alias`. `client_connection_id` is
    /// echoed back in the replies so they can be matched to this request.
    pub async fn connect_alias(
        &mut self,
        remote_alias: Alias,
        client_connection_id: &str,
    ) -> Result<()> {
        let id = self.joined_id()?;
        self.send(Message::Connect(Connect {
            id,
            remote_alias,
            client_connection_id: client_connection_id.to_string(),
        }))
        .await
    }

    /// Relay a session-description offer to `answerer_id`.
    pub async fn offer(&mut self, answerer_id: ClientId, offer: &str) -> Result<()> {
        let offerer_id = self.joined_id()?;
        self.send(Message::Offer(Offer {
            offerer_id,
            answerer_id,
            offer: offer.to_string(),
        }))
        .await
    }

    /// Relay a session-description answer back to `offerer_id`.
    pub async fn answer(&mut self, offerer_id: ClientId, answer: &str) -> Result<()> {
        let answerer_id = self.joined_id()?;
        self.send(Message::Answer(Answer {
            offerer_id,
            answerer_id,
            answer: answer.to_string(),
        }))
        .await
    }

    /// Relay an ICE-style candidate to `answerer_id`.
    pub async fn candidate(&mut self, answerer_id: ClientId, candidate: &str) -> Result<()> {
        let offerer_id = self.joined_id()?;
        self.send(Message::Candidate(Candidate {
            offerer_id,
            answerer_id,
            candidate: candidate.to_string(),
        }))
        .await
    }

    /// Send a typed message.
    pub async fn send(&mut self, message: Message) -> Result<()> {
        write_frame(&mut self.stream, &message.encode()).await
    }

    /// Send a raw envelope, bypassing the typed encoder.
    pub async fn send_envelope(&mut self, envelope: Envelope) -> Result<()> {
        write_frame(&mut self.stream, &envelope).await
    }

    /// Next server-pushed message. Liveness pings are answered here and
    /// never surface to the caller.
    pub async fn recv(&mut self) -> Result<Message> {
        loop {
            let envelope = read_frame(&mut self.stream).await?;
            match Message::decode(envelope)? {
                Message::Ping => self.send(Message::Pong).await?,
                message => return Ok(message),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_operations_require_knock() {
        let (stream, _server_side) = tokio::io::duplex(1024);
        let mut client = SignalingClient::new(stream);
        assert!(client.id().is_none());

        let alias: Alias = "127.0.0.0:0".parse().unwrap();
        assert!(client.bind(alias).await.is_err());
        assert!(client.accepting(alias).await.is_err());
        assert!(client.shutdown(alias).await.is_err());
        assert!(client.connect_alias(alias, "c1").await.is_err());
    }

    #[tokio::test]
    async fn test_recv_answers_pings_transparently() {
        let (client_side, mut server_side) = tokio::io::duplex(1024);
        let mut client = SignalingClient::new(client_side);

        write_frame(&mut server_side, &Message::Ping.encode())
            .await
            .unwrap();
        write_frame(
            &mut server_side,
            &Message::Goodbye(crate::protocol::Goodbye {
                id: "127.0.0.0".parse().unwrap(),
            })
            .encode(),
        )
        .await
        .unwrap();

        let message = client.recv().await.unwrap();
        assert!(matches!(message, Message::Goodbye(_)));

        let pong = read_frame(&mut server_side).await.unwrap();
        let pong = Message::decode(pong).unwrap();
        assert_eq!(pong, Message::Pong);
    }
}
