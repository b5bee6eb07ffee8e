//! TCP serving of the acceptor RPC surface.

use std::net::SocketAddr;
use std::sync::Arc;

use error_stack::Report;
use fencepost_core::wire::{AcceptorRequest, AcceptorResponse, PostcardCodec};
use fencepost_core::{Candidate, ConnectorError, KvStore, Scope};
use fencepost_paxos::acceptor::AcceptorHandler;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, instrument, warn};

use crate::state_store::KvAcceptorStore;

pub type KvAcceptorHandler<S> = AcceptorHandler<Scope, Candidate, KvAcceptorStore<S>>;

/// Accept connections until the listener fails.
///
/// # Errors
/// Returns when accepting a connection fails.
#[instrument(skip_all, name = "serve")]
pub async fn serve<S: KvStore>(
    listener: TcpListener,
    handler: Arc<KvAcceptorHandler<S>>,
) -> Result<(), Report<ConnectorError>> {
    loop {
        let (stream, peer) = listener.accept().await.map_err(ConnectorError::Io)?;
        debug!(%peer, "accepted connection");

        let handler = handler.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer, handler).await {
                warn!(%peer, error = %e, "connection error");
            } else {
                debug!(%peer, "connection closed");
            }
        });
    }
}

#[instrument(skip_all, fields(%peer))]
async fn handle_connection<S: KvStore>(
    stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<KvAcceptorHandler<S>>,
) -> Result<(), ConnectorError> {
    stream.set_nodelay(true)?;
    let (read, write) = stream.into_split();
    let mut reader = FramedRead::new(read, PostcardCodec::<AcceptorRequest>::new());
    let mut writer = FramedWrite::new(write, PostcardCodec::<AcceptorResponse>::new());

    while let Some(request) = reader.next().await {
        let response = dispatch(&handler, request?).await;
        writer.send(response).await?;
    }
    Ok(())
}

/// Run one request against the handler. Store failures become
/// [`AcceptorResponse::Failed`].
pub async fn dispatch<S: KvStore>(
    handler: &KvAcceptorHandler<S>,
    request: AcceptorRequest,
) -> AcceptorResponse {
    let result = match request {
        AcceptorRequest::Prepare {
            scope,
            seq,
            proposal,
        } => handler
            .handle_prepare(&scope, seq, &proposal)
            .await
            .map(AcceptorResponse::Prepare),
        AcceptorRequest::Accept {
            scope,
            seq,
            proposal,
            value,
        } => handler
            .handle_accept(&scope, seq, &proposal, value)
            .await
            .map(AcceptorResponse::Accept),
        AcceptorRequest::LatestSequence { scope } => handler
            .latest_sequence(&scope)
            .await
            .map(AcceptorResponse::LatestSequence),
    };

    result.unwrap_or_else(|report| {
        error!(?report, "failed to serve acceptor request");
        AcceptorResponse::Failed(report.to_string())
    })
}
