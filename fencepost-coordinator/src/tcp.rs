//! TCP transport to remote acceptors.

use std::sync::Arc;

use error_stack::{Report, ResultExt};
use fencepost_core::wire::{AcceptorRequest, AcceptorResponse, PostcardCodec};
use fencepost_core::{Candidate, ConnectorError, OperationContext, Scope};
use fencepost_paxos::{AcceptResponse, AcceptorClient, PrepareResponse, ProposalId, Sequence};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, trace};

struct Connection {
    reader: FramedRead<OwnedReadHalf, PostcardCodec<AcceptorResponse>>,
    writer: FramedWrite<OwnedWriteHalf, PostcardCodec<AcceptorRequest>>,
}

/// [`AcceptorClient`] speaking the postcard-framed RPC protocol over one
/// lazily (re)connected TCP stream. Requests on a handle are serialised.
#[derive(Clone)]
pub struct TcpAcceptorClient {
    id: Arc<str>,
    addr: Arc<str>,
    conn: Arc<Mutex<Option<Connection>>>,
}

impl TcpAcceptorClient {
    pub fn new(id: impl Into<Arc<str>>, addr: impl Into<Arc<str>>) -> Self {
        Self {
            id: id.into(),
            addr: addr.into(),
            conn: Arc::new(Mutex::new(None)),
        }
    }

    #[must_use]
    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn connect(&self) -> Result<Connection, Report<ConnectorError>> {
        let stream = TcpStream::connect(&*self.addr)
            .await
            .map_err(|e| ConnectorError::Connect(e.to_string()))
            .attach(OperationContext::CONNECTING)
            .attach_with(|| format!("address: {}", self.addr))?;
        stream.set_nodelay(true).map_err(ConnectorError::Io)?;
        debug!(acceptor = %self.id, addr = %self.addr, "connected");

        let (read, write) = stream.into_split();
        Ok(Connection {
            reader: FramedRead::new(read, PostcardCodec::new()),
            writer: FramedWrite::new(write, PostcardCodec::new()),
        })
    }

    async fn call(&self, request: AcceptorRequest) -> Result<AcceptorResponse, Report<ConnectorError>> {
        let mut guard = self.conn.lock().await;
        // Taken out for the exchange and put back only once the stream is
        // known to be in sync. A cancelled call drops it.
        let mut conn = match guard.take() {
            Some(conn) => conn,
            None => self.connect().await?,
        };
        let response = exchange(&mut conn, request).await;
        let reusable = match &response {
            Ok(_) => true,
            Err(report) => matches!(report.current_context(), ConnectorError::Remote(_)),
        };
        if reusable {
            *guard = Some(conn);
        } else {
            trace!(acceptor = %self.id, "dropping broken connection");
        }
        response
    }
}

async fn exchange(
    conn: &mut Connection,
    request: AcceptorRequest,
) -> Result<AcceptorResponse, Report<ConnectorError>> {
    conn.writer.send(request).await.map_err(ConnectorError::Io)?;
    let response = conn
        .reader
        .next()
        .await
        .ok_or(ConnectorError::Closed)?
        .map_err(ConnectorError::Io)?;
    match response {
        AcceptorResponse::Failed(message) => Err(Report::new(ConnectorError::Remote(message))),
        response => Ok(response),
    }
}

fn unexpected(response: &AcceptorResponse) -> Report<ConnectorError> {
    Report::new(ConnectorError::Codec(format!("unexpected response: {response:?}")))
}

impl AcceptorClient<Scope, Candidate> for TcpAcceptorClient {
    type Error = ConnectorError;

    fn id(&self) -> &str {
        &self.id
    }

    async fn prepare(
        &self,
        scope: &Scope,
        seq: Sequence,
        proposal: &ProposalId,
    ) -> Result<PrepareResponse<Candidate>, Report<ConnectorError>> {
        let request = AcceptorRequest::Prepare {
            scope: scope.clone(),
            seq,
            proposal: proposal.clone(),
        };
        match self.call(request).await? {
            AcceptorResponse::Prepare(response) => Ok(response),
            other => Err(unexpected(&other)),
        }
    }

    async fn accept(
        &self,
        scope: &Scope,
        seq: Sequence,
        proposal: &ProposalId,
        value: &Candidate,
    ) -> Result<AcceptResponse, Report<ConnectorError>> {
        let request = AcceptorRequest::Accept {
            scope: scope.clone(),
            seq,
            proposal: proposal.clone(),
            value: value.clone(),
        };
        match self.call(request).await? {
            AcceptorResponse::Accept(response) => Ok(response),
            other => Err(unexpected(&other)),
        }
    }

    async fn latest_sequence(&self, scope: &Scope) -> Result<Option<Sequence>, Report<ConnectorError>> {
        let request = AcceptorRequest::LatestSequence {
            scope: scope.clone(),
        };
        match self.call(request).await? {
            AcceptorResponse::LatestSequence(seq) => Ok(seq),
            other => Err(unexpected(&other)),
        }
    }
}
