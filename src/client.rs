use std::io;
use std::sync::Arc;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::ChatError;
use crate::protocol::{self, Frame, HandshakeReply};
use crate::ui::ChatUi;

/// A registered connection to a chat server.
///
/// Incoming frames are handled by a background task that forwards text to
/// [`ChatUi::add_message`] and rosters to [`ChatUi::set_online_users`].
pub struct Client {
    name: String,
    max_frame_len: usize,
    writer: Mutex<OwnedWriteHalf>,
    receiver: JoinHandle<()>,
    closed: watch::Receiver<bool>,
}

impl Client {
    /// Connect and register a name obtained from `ui`.
    ///
    /// A rejected name is reported through `add_message` and the UI is asked
    /// again, up to `config.max_name_attempts` times.
    pub async fn connect(config: &ClientConfig, ui: Arc<dyn ChatUi>) -> Result<Self, ChatError> {
        let stream = TcpStream::connect(&config.server_addr).await?;
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();

        for attempt in 1..=config.max_name_attempts {
            let name = ask_name(&ui).await?;
            writer.write_all(format!("{name}\n").as_bytes()).await?;

            let read = protocol::read_line_bounded(&mut reader, &mut line, config.max_incoming_len)
                .await?;
            if read.is_none() {
                return Err(ChatError::HandshakeRejected(
                    "server closed the connection".into(),
                ));
            }

            match HandshakeReply::parse(&line)? {
                HandshakeReply::Accepted => {
                    info!(%name, server = %config.server_addr, "registered");
                    let (done, closed) = watch::channel(false);
                    let receiver =
                        tokio::spawn(receive(reader, ui, config.max_incoming_len, done));
                    return Ok(Self {
                        name,
                        max_frame_len: config.max_frame_len,
                        writer: Mutex::new(writer),
                        receiver,
                        closed,
                    });
                }
                HandshakeReply::NameTaken => {
                    debug!(%name, attempt, "name taken");
                    ui.add_message(&format!("* the name {name} is already taken"));
                }
                HandshakeReply::InvalidName => {
                    debug!(%name, attempt, "name invalid");
                    ui.add_message(&format!(
                        "* {name:?} is not a valid name (no spaces, not empty)"
                    ));
                }
            }
        }

        Err(ChatError::HandshakeRejected(format!(
            "no name accepted after {} attempts",
            config.max_name_attempts
        )))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Send one chat line. The server prefixes it with our name and echoes
    /// it back to everyone, us included.
    ///
    /// Text the server would refuse as over-long fails with
    /// [`ChatError::FrameTooLong`] and nothing is sent.
    pub async fn send_text(&self, text: &str) -> Result<(), ChatError> {
        let line = Frame::text(text).encode();
        if protocol::strip_line_ending(&line).len() > self.max_frame_len {
            return Err(ChatError::FrameTooLong(self.max_frame_len));
        }
        self.writer.lock().await.write_all(line.as_bytes()).await?;
        Ok(())
    }

    /// Resolves once the server side of the connection is gone.
    pub async fn disconnected(&self) {
        let mut closed = self.closed.clone();
        // A dropped sender means the receive task is gone too.
        let _ = closed.wait_for(|closed| *closed).await;
    }

    pub fn is_connected(&self) -> bool {
        !self.receiver.is_finished()
    }

    /// Announce the departure, then close the socket.
    pub async fn close(self) -> Result<(), ChatError> {
        let mut writer = self.writer.into_inner();
        let sent: io::Result<()> = async {
            writer.write_all(Frame::Disconnect.encode().as_bytes()).await?;
            writer.shutdown().await
        }
        .await;
        self.receiver.abort();
        sent?;
        Ok(())
    }
}

async fn ask_name(ui: &Arc<dyn ChatUi>) -> Result<String, ChatError> {
    let ui = Arc::clone(ui);
    let name = tokio::task::spawn_blocking(move || ui.get_user_name())
        .await
        .map_err(io::Error::other)?;
    Ok(name.lines().next().unwrap_or_default().trim().to_string())
}

async fn receive(
    mut reader: BufReader<OwnedReadHalf>,
    ui: Arc<dyn ChatUi>,
    max_incoming_len: usize,
    done: watch::Sender<bool>,
) {
    let mut line = String::new();
    loop {
        match protocol::read_line_bounded(&mut reader, &mut line, max_incoming_len).await {
            Ok(Some(())) => {}
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "receive failed");
                break;
            }
        }

        match protocol::parse_frame(&line) {
            Ok(None) => {}
            Ok(Some(Frame::Text { body })) => ui.add_message(&body),
            Ok(Some(Frame::Roster { names })) => {
                let names: Vec<String> = names.into_iter().map(String::from).collect();
                ui.set_online_users(&names);
            }
            Ok(Some(Frame::Disconnect)) => break,
            Err(e) => warn!(error = %e, "dropping frame from server"),
        }
    }
    info!("disconnected from server");
    let _ = done.send(true);
}
