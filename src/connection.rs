use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::broadcast::Broadcaster;
use crate::config::ServerConfig;
use crate::error::ChatError;
use crate::message::ChatLine;
use crate::protocol::{self, Frame, HandshakeReply};
use crate::registry::{ClientHandle, Outgoing};
use crate::types::ConnectionId;

/// Typestate: the connection lifecycle encoded as types.
///
/// Connection<Handshaking> → Connection<Active> → (dropped)
///
/// Only an `Active` connection has a registered name, so only it can read
/// chat frames. Termination consumes the connection, which closes the socket.
pub struct Handshaking;

/// Marker state: the name is registered and chat frames flow.
pub struct Active {
    name: String,
}

pub struct Connection<S> {
    id: ConnectionId,
    peer: SocketAddr,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    handle: ClientHandle,
    outbound: mpsc::Receiver<Outgoing>,
    line: String,
    state: S,
}

/// Why an active connection ended.
#[derive(Debug)]
enum Leave {
    Requested,
    Closed,
    ReadFailed(ChatError),
    WriteFailed,
}

impl Connection<Handshaking> {
    pub fn new(stream: TcpStream, outbound_queue: usize) -> Result<Self, ChatError> {
        let peer = stream.peer_addr()?;
        let id = ConnectionId::next();
        let (reader, writer) = stream.into_split();
        let (handle, outbound) = ClientHandle::channel(id, outbound_queue);

        Ok(Self {
            id,
            peer,
            reader: BufReader::new(reader),
            writer,
            handle,
            outbound,
            line: String::new(),
            state: Handshaking,
        })
    }

    /// Negotiate a name.
    ///
    /// Each attempt reads one untagged name line. Invalid and taken names are
    /// answered with a rejection and cost one attempt. Returns `Ok(None)` when
    /// the peer left or ran out of attempts.
    pub async fn negotiate(
        mut self,
        broadcaster: &Broadcaster,
        config: &ServerConfig,
    ) -> Result<Option<Connection<Active>>, ChatError> {
        let registry = broadcaster.registry();

        for attempt in 1..=config.max_name_attempts {
            let read = read_frame(
                &mut self.reader,
                &mut self.line,
                config.max_frame_len,
                config.idle_timeout,
            )
            .await?;
            if read.is_none() {
                debug!(id = %self.id, "peer left during handshake");
                return Ok(None);
            }

            let name = protocol::strip_line_ending(&self.line).to_string();
            let outcome = protocol::validate_name(&name, config.max_name_len)
                .and_then(|()| registry.register(&name, self.handle.clone()));

            match outcome {
                Ok(()) => {
                    if let Err(e) = self.reply(HandshakeReply::Accepted).await {
                        // Another client's roster may already have listed us.
                        if registry.remove_connection(&name, self.id) {
                            broadcaster.broadcast_roster();
                        }
                        return Err(e);
                    }
                    info!(id = %self.id, peer = %self.peer, %name, "client joined");
                    return Ok(Some(self.activate(name)));
                }
                Err(ChatError::NameTaken(_)) => {
                    debug!(id = %self.id, %name, attempt, "name taken");
                    self.reply(HandshakeReply::NameTaken).await?;
                }
                Err(ChatError::InvalidName(_)) => {
                    debug!(id = %self.id, %name, attempt, "invalid name");
                    self.reply(HandshakeReply::InvalidName).await?;
                }
                Err(e) => return Err(e),
            }
        }

        info!(id = %self.id, peer = %self.peer, "no usable name offered, closing");
        Ok(None)
    }

    async fn reply(&mut self, reply: HandshakeReply) -> Result<(), ChatError> {
        self.writer.write_all(reply.encode().as_bytes()).await?;
        Ok(())
    }

    fn activate(self, name: String) -> Connection<Active> {
        Connection {
            id: self.id,
            peer: self.peer,
            reader: self.reader,
            writer: self.writer,
            handle: self.handle,
            outbound: self.outbound,
            line: self.line,
            state: Active { name },
        }
    }
}

impl Connection<Active> {
    /// Relay chat frames until the peer leaves, then deregister.
    ///
    /// Outbound lines are written by a separate task so a slow socket never
    /// blocks this loop. If that task stops, because a write failed or
    /// stalled or because the registry evicted us, the connection ends the
    /// same way a read failure would.
    pub async fn run(self, broadcaster: &Broadcaster, config: &ServerConfig) {
        let Connection {
            id,
            peer,
            mut reader,
            writer,
            handle,
            outbound,
            mut line,
            state: Active { name },
        } = self;

        let mut writer_task =
            tokio::spawn(write_outbound(id, writer, outbound, config.write_timeout));
        drop(handle);

        broadcaster.broadcast_roster();

        let leave = loop {
            tokio::select! {
                read = read_frame(&mut reader, &mut line, config.max_frame_len, config.idle_timeout) => {
                    match read {
                        Ok(Some(())) => {}
                        Ok(None) => break Leave::Closed,
                        Err(e) => break Leave::ReadFailed(e),
                    }
                }
                _ = &mut writer_task => break Leave::WriteFailed,
            }

            match protocol::parse_frame(&line) {
                Ok(None) => {}
                Ok(Some(Frame::Text { body })) => {
                    debug!(%id, %name, "text frame");
                    let frame: Frame<'static> = ChatLine::new(name.as_str(), body).into();
                    broadcaster.broadcast(&frame);
                }
                Ok(Some(Frame::Disconnect)) => break Leave::Requested,
                Ok(Some(Frame::Roster { .. })) => {
                    debug!(%id, %name, "ignoring roster frame sent by a client");
                }
                Err(e) => warn!(%id, %name, error = %e, "dropping frame"),
            }
        };

        match &leave {
            Leave::ReadFailed(e) => debug!(%id, %name, error = %e, "read failed"),
            other => debug!(%id, %name, reason = ?other, "leaving"),
        }

        if broadcaster.registry().remove_connection(&name, id) {
            broadcaster.broadcast_roster();
        }
        writer_task.abort();

        info!(%id, %peer, %name, "client left");
    }
}

/// Serve one accepted socket from handshake to teardown.
pub async fn handle_client(
    stream: TcpStream,
    broadcaster: Broadcaster,
    config: Arc<ServerConfig>,
) -> Result<(), ChatError> {
    let connection = Connection::new(stream, config.outbound_queue)?;
    if let Some(active) = connection.negotiate(&broadcaster, &config).await? {
        active.run(&broadcaster, &config).await;
    }
    Ok(())
}

async fn read_frame(
    reader: &mut BufReader<OwnedReadHalf>,
    line: &mut String,
    max_len: usize,
    idle_timeout: Option<Duration>,
) -> Result<Option<()>, ChatError> {
    let read = protocol::read_line_bounded(reader, line, max_len);
    match idle_timeout {
        Some(limit) => tokio::time::timeout(limit, read).await.map_err(|_| {
            ChatError::Network(io::Error::new(io::ErrorKind::TimedOut, "idle timeout"))
        })?,
        None => read.await,
    }
}

/// Drain the outbound queue onto the socket.
///
/// Returns on the first failed or stalled write, or once every sender is
/// gone. Dropping the receiver makes later `ClientHandle::send` calls fail.
async fn write_outbound<W>(
    id: ConnectionId,
    mut writer: W,
    mut outbound: mpsc::Receiver<Outgoing>,
    write_timeout: Duration,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = outbound.recv().await {
        match tokio::time::timeout(write_timeout, writer.write_all(line.as_bytes())).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(%id, error = %e, "socket write failed");
                break;
            }
            Err(_) => {
                warn!(%id, timeout = ?write_timeout, "socket write stalled");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::io::AsyncReadExt;

    use super::*;

    #[tokio::test]
    async fn writer_forwards_queued_lines_in_order() {
        let (client, mut server) = tokio::io::duplex(64);
        let (tx, rx) = mpsc::channel(4);
        let task = tokio::spawn(write_outbound(
            ConnectionId::new(1),
            client,
            rx,
            Duration::from_secs(1),
        ));

        tx.send(Arc::from("tAnn: hi\n")).await.unwrap();
        tx.send(Arc::from("nAnn\n")).await.unwrap();
        drop(tx);
        task.await.unwrap();

        let mut received = String::new();
        server.read_to_string(&mut received).await.unwrap();
        assert_eq!(received, "tAnn: hi\nnAnn\n");
    }

    #[tokio::test]
    async fn writer_gives_up_on_a_peer_that_stops_reading() {
        // The far end never reads, so the pipe fills and writes stall.
        let (client, _server) = tokio::io::duplex(8);
        let (tx, rx) = mpsc::channel(4);
        let task = tokio::spawn(write_outbound(
            ConnectionId::new(2),
            client,
            rx,
            Duration::from_millis(50),
        ));

        tx.send(Arc::from("t".repeat(64))).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("writer should stop after the write timeout")
            .unwrap();

        // The receiver is gone, so the registry's next enqueue fails.
        assert!(tx.try_send(Arc::from("tlate\n")).is_err());
    }
}
