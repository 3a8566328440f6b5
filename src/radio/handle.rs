use light_bridge_protocol::{Command, Packet};
use tokio::sync::{mpsc, oneshot};

use crate::error::RadioError;
use crate::state::ConnectedSet;

/// A point query a light can answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Query {
    Temperature,
    Uptime,
    Version,
}

impl Query {
    pub fn request(self) -> Command {
        match self {
            Query::Temperature => Command::GetTemp,
            Query::Uptime => Command::GetUptime,
            Query::Version => Command::GetVersion,
        }
    }
}

pub(crate) enum RadioCommand {
    Discover {
        respond_to: oneshot::Sender<ConnectedSet>,
    },
    Query {
        id: u8,
        query: Query,
        respond_to: oneshot::Sender<Result<Packet, RadioError>>,
    },
}

/// Cloneable handle for talking to the radio task.
#[derive(Clone)]
pub struct RadioHandle {
    command_tx: mpsc::Sender<RadioCommand>,
}

impl RadioHandle {
    pub(crate) fn new(command_tx: mpsc::Sender<RadioCommand>) -> Self {
        Self { command_tx }
    }

    /// Run a full discovery sweep and return the resulting liveness bitmap.
    pub async fn discover(&self) -> Result<ConnectedSet, RadioError> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(RadioCommand::Discover { respond_to: tx })
            .await
            .map_err(|_| RadioError::ChannelClosed)?;
        rx.await.map_err(|_| RadioError::ChannelClosed)
    }

    async fn query(&self, id: u8, query: Query) -> Result<Packet, RadioError> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(RadioCommand::Query {
                id,
                query,
                respond_to: tx,
            })
            .await
            .map_err(|_| RadioError::ChannelClosed)?;
        rx.await.map_err(|_| RadioError::ChannelClosed)?
    }

    /// Temperature in millidegrees Celsius.
    pub async fn temperature(&self, id: u8) -> Result<i16, RadioError> {
        Ok(self.query(id, Query::Temperature).await?.word_i16())
    }

    /// Uptime in milliseconds.
    pub async fn uptime(&self, id: u8) -> Result<u16, RadioError> {
        Ok(self.query(id, Query::Uptime).await?.word_u16())
    }

    pub async fn version(&self, id: u8) -> Result<u8, RadioError> {
        Ok(self.query(id, Query::Version).await?.data[0])
    }
}
