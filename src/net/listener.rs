//! Client-facing service listener.
//!
//! One framed request per round trip; a connection may carry any number of
//! round trips and is dropped after the configured idle timeout. Request
//! handling is spawned per connection so a slow client cannot stall the
//! accept loop.

use crate::core::error::{NotaryError, NotaryResult};
use crate::net::codec;
use crate::protocol::dispatcher::NotaryDispatcher;
use crate::protocol::messages::{ClientRequest, ClientResponse, NodeStatus, NotarizationResponse};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Supplies the status report served on the client port.
#[async_trait]
pub trait StatusSource: Send + Sync {
    /// Current operational snapshot.
    async fn status(&self) -> NodeStatus;
}

/// Bind the client listener and start serving.
///
/// Returns the bound address (useful when the config asked for port 0) and
/// the accept-loop task.
pub async fn spawn_client_listener(
    bind: &str,
    dispatcher: Arc<NotaryDispatcher>,
    status: Arc<dyn StatusSource>,
    max_frame: usize,
    idle_timeout: Duration,
    shutdown: watch::Receiver<bool>,
) -> NotaryResult<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind(bind).await.map_err(NotaryError::network)?;
    let local = listener.local_addr().map_err(NotaryError::network)?;
    tracing::info!(%local, "client listener bound");

    let task = tokio::spawn(async move {
        let mut shutdown = shutdown;
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, remote) = match accepted {
                        Ok(conn) => conn,
                        Err(err) => {
                            tracing::warn!(%err, "client accept failed");
                            continue;
                        }
                    };
                    let dispatcher = dispatcher.clone();
                    let status = status.clone();
                    tokio::spawn(async move {
                        if let Err(err) =
                            serve_connection(stream, dispatcher, status, max_frame, idle_timeout)
                                .await
                        {
                            tracing::debug!(%remote, %err, "client connection closed with error");
                        }
                    });
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("client listener shutting down");
                        return;
                    }
                }
            }
        }
    });

    Ok((local, task))
}

async fn serve_connection(
    mut stream: TcpStream,
    dispatcher: Arc<NotaryDispatcher>,
    status: Arc<dyn StatusSource>,
    max_frame: usize,
    idle_timeout: Duration,
) -> NotaryResult<()> {
    loop {
        let request = match tokio::time::timeout(
            idle_timeout,
            codec::read_frame::<_, ClientRequest>(&mut stream, max_frame),
        )
        .await
        {
            Ok(Ok(Some(request))) => request,
            Ok(Ok(None)) => return Ok(()),
            Ok(Err(err)) => {
                // An undecodable frame is the client's mistake; tell them so
                // before dropping the connection. Transport-level failures
                // get no reply, the socket may already be gone.
                if err.is_terminal() {
                    let reply = ClientResponse::Notarization(NotarizationResponse::from_error(&err));
                    let _ = codec::write_frame(&mut stream, &reply, max_frame).await;
                }
                return Err(err);
            }
            Err(_) => {
                tracing::debug!("client connection idle, dropping");
                return Ok(());
            }
        };

        let response = match request {
            ClientRequest::Notarize(request) => {
                ClientResponse::Notarization(dispatcher.handle(*request).await)
            }
            ClientRequest::Status => ClientResponse::Status(status.status().await),
        };
        codec::write_frame(&mut stream, &response, max_frame).await?;
    }
}
