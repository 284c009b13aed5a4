//! Unix domain socket server for IPC
//!
//! Requests are forwarded to the controller queue and answered in order.
//! Subscribed clients additionally receive every daemon event as a
//! `notification` frame.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::controller::ControlMessage;
use crate::events::DaemonEvent;

use super::protocol::{Request, Response};

/// Frames larger than this disconnect the client
const MAX_FRAME_LEN: usize = 1024 * 1024;

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: UnixListener,
    commands: mpsc::Sender<ControlMessage>,
    events: broadcast::Sender<DaemonEvent>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Bind the socket, replacing a stale one
    pub fn bind(
        socket_path: &Path,
        commands: mpsc::Sender<ControlMessage>,
        events: broadcast::Sender<DaemonEvent>,
    ) -> Result<Self> {
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener,
            commands,
            events,
            shutdown_tx,
        })
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let client = Client {
                        commands: self.commands.clone(),
                        events: self.events.clone(),
                    };
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = client.serve(stream) => {
                                if let Err(e) = result {
                                    warn!(error = %e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "accept error");
                }
            }
        }
    }

    /// Disconnect clients and remove the socket file
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(error = %e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

/// Per-connection state
struct Client {
    commands: mpsc::Sender<ControlMessage>,
    events: broadcast::Sender<DaemonEvent>,
}

impl Client {
    async fn serve(self, stream: UnixStream) -> Result<()> {
        let (mut reader, mut writer) = stream.into_split();

        // frames are read on their own task so a slow request never stalls
        // notification delivery and vice versa
        let (frame_tx, mut frame_rx) = mpsc::channel::<Vec<u8>>(8);
        let reader_task = tokio::spawn(async move {
            loop {
                match read_frame(&mut reader).await {
                    Ok(Some(frame)) => {
                        if frame_tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!("client disconnected");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "dropping client");
                        break;
                    }
                }
            }
        });

        let mut subscription: Option<broadcast::Receiver<DaemonEvent>> = None;

        let result = loop {
            tokio::select! {
                frame = frame_rx.recv() => {
                    let Some(frame) = frame else { break Ok(()) };

                    let response = match serde_json::from_slice::<Request>(&frame) {
                        Ok(Request::Subscribe) => {
                            if subscription.is_none() {
                                subscription = Some(self.events.subscribe());
                                debug!("client subscribed to notifications");
                            }
                            Response::Subscribed
                        }
                        Ok(request) => self.dispatch(request).await,
                        Err(e) => Response::error("bad_request", e.to_string()),
                    };

                    if let Err(e) = write_frame(&mut writer, &response).await {
                        break Err(e);
                    }
                }
                event = next_event(&mut subscription) => {
                    match event {
                        Ok(event) => {
                            let notification = Response::Notification { event };
                            if let Err(e) = write_frame(&mut writer, &notification).await {
                                break Err(e);
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "subscriber lagged, notifications dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            subscription = None;
                        }
                    }
                }
            }
        };

        reader_task.abort();
        result
    }

    /// Forward a request to the controller and wait for its answer
    async fn dispatch(&self, request: Request) -> Response {
        let (reply, answer) = oneshot::channel();

        if self
            .commands
            .send(ControlMessage::Request { request, reply })
            .await
            .is_err()
        {
            return Response::error("unavailable", "controller is not running");
        }

        answer
            .await
            .unwrap_or_else(|_| Response::error("unavailable", "controller dropped the request"))
    }
}

/// Next event for a subscribed client; pending forever otherwise
async fn next_event(
    subscription: &mut Option<broadcast::Receiver<DaemonEvent>>,
) -> Result<DaemonEvent, broadcast::error::RecvError> {
    match subscription {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Read one length-prefixed frame. `Ok(None)` on a clean disconnect.
async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        anyhow::bail!("frame of {} bytes exceeds limit", len);
    }

    let mut frame = vec![0u8; len];
    reader.read_exact(&mut frame).await?;
    Ok(Some(frame))
}

/// Send a length-prefixed JSON message
async fn write_frame<W, T>(writer: &mut W, msg: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let msg_bytes = serde_json::to_vec(msg)?;
    let msg_len = (msg_bytes.len() as u32).to_le_bytes();

    writer.write_all(&msg_len).await?;
    writer.write_all(&msg_bytes).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::FilterKind;

    async fn request(stream: &mut UnixStream, request: &Request) -> Response {
        write_frame(stream, request).await.unwrap();
        receive(stream).await
    }

    async fn receive(stream: &mut UnixStream) -> Response {
        let frame = read_frame(stream).await.unwrap().unwrap();
        serde_json::from_slice(&frame).unwrap()
    }

    /// Answers every forwarded request with `pong`
    fn fake_controller(mut rx: mpsc::Receiver<ControlMessage>) {
        tokio::spawn(async move {
            while let Some(ControlMessage::Request { reply, .. }) = rx.recv().await {
                let _ = reply.send(Response::Pong);
            }
        });
    }

    #[tokio::test]
    async fn test_frame_round_trip_over_pipe() {
        let (mut a, mut b) = tokio::io::duplex(64);
        write_frame(&mut a, &Request::Ping).await.unwrap();
        let frame = read_frame(&mut b).await.unwrap().unwrap();
        assert_eq!(serde_json::from_slice::<Request>(&frame).unwrap(), Request::Ping);

        drop(a);
        assert!(read_frame(&mut b).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_frame_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&((MAX_FRAME_LEN as u32) + 1).to_le_bytes())
            .await
            .unwrap();
        assert!(read_frame(&mut b).await.is_err());
    }

    #[tokio::test]
    async fn test_requests_and_notifications() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("daemon.sock");
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let (event_tx, _) = broadcast::channel(8);
        fake_controller(cmd_rx);

        let server = Server::bind(&socket, cmd_tx, event_tx.clone()).unwrap();
        let server_task = tokio::spawn(async move { server.run().await });

        let mut stream = UnixStream::connect(&socket).await.unwrap();
        assert_eq!(request(&mut stream, &Request::GetStatus).await, Response::Pong);
        assert_eq!(request(&mut stream, &Request::Subscribe).await, Response::Subscribed);

        event_tx
            .send(DaemonEvent::FilterRemoved {
                filter: FilterKind::LayoutShortcut,
            })
            .unwrap();
        assert_eq!(
            receive(&mut stream).await,
            Response::Notification {
                event: DaemonEvent::FilterRemoved {
                    filter: FilterKind::LayoutShortcut
                }
            }
        );

        server_task.abort();
    }

    #[tokio::test]
    async fn test_malformed_request_gets_error() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("daemon.sock");
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let (event_tx, _) = broadcast::channel(8);
        fake_controller(cmd_rx);

        let server = Server::bind(&socket, cmd_tx, event_tx).unwrap();
        let server_task = tokio::spawn(async move { server.run().await });

        let mut stream = UnixStream::connect(&socket).await.unwrap();
        write_frame(&mut stream, &serde_json::json!({"type": "set_mode"}))
            .await
            .unwrap();
        assert!(matches!(
            receive(&mut stream).await,
            Response::Error { ref code, .. } if code == "bad_request"
        ));

        server_task.abort();
    }

    #[tokio::test]
    async fn test_bind_replaces_stale_socket_and_shutdown_removes_it() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("daemon.sock");
        std::fs::write(&socket, b"stale").unwrap();

        let (cmd_tx, _cmd_rx) = mpsc::channel(1);
        let (event_tx, _) = broadcast::channel(1);
        let server = tokio_test::assert_ok!(Server::bind(&socket, cmd_tx, event_tx));
        assert!(socket.exists());

        server.shutdown().await;
        assert!(!socket.exists());
    }
}
