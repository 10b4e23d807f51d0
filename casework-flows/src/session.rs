use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::trace;

use casework_types::constants::SESSION_CHANNEL_CAPACITY;
use casework_types::identity::Party;
use casework_types::network::SessionMessage;

use crate::codec::{decode_frame, encode_frame};
use crate::error::FlowError;

/// One end of an ordered, point-to-point session between two parties.
///
/// Messages travel as encoded frames. Dropping either end closes the
/// session; the other end then sees a transport failure.
#[derive(Debug)]
pub struct Session {
    peer: Party,
    tx: mpsc::Sender<Vec<u8>>,
    rx: mpsc::Receiver<Vec<u8>>,
}

impl Session {
    /// Two connected ends. The first belongs to `a` and talks to `b`.
    pub fn pair(a: Party, b: Party) -> (Session, Session) {
        let (a_tx, b_rx) = mpsc::channel(SESSION_CHANNEL_CAPACITY);
        let (b_tx, a_rx) = mpsc::channel(SESSION_CHANNEL_CAPACITY);
        (
            Session {
                peer: b,
                tx: a_tx,
                rx: a_rx,
            },
            Session {
                peer: a,
                tx: b_tx,
                rx: b_rx,
            },
        )
    }

    /// The party at the other end, as established by the transport.
    pub fn peer(&self) -> &Party {
        &self.peer
    }

    pub async fn send(&self, msg: &SessionMessage) -> Result<(), FlowError> {
        let frame = encode_frame(msg)?;
        trace!(peer = %self.peer, kind = msg.kind(), bytes = frame.len(), "session send");
        self.tx
            .send(frame)
            .await
            .map_err(|_| FlowError::transport(format!("session with {} closed", self.peer)))
    }

    pub async fn receive(&mut self) -> Result<SessionMessage, FlowError> {
        let frame = self
            .rx
            .recv()
            .await
            .ok_or_else(|| FlowError::transport(format!("session with {} closed", self.peer)))?;
        let msg = decode_frame(&frame)?;
        trace!(peer = %self.peer, kind = msg.kind(), "session receive");
        Ok(msg)
    }
}

/// Opens sessions to other parties.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    async fn open_session(&self, from: &Party, to: &Party) -> Result<Session, FlowError>;
}
