pub(crate) mod discovery;
pub mod error;

use super::tasks::{
    message::*,
    outbound,
    ws::{self as ws_task, AuxNetwork},
};
use crate::{constants::*, ws::WsStream, Config, ConnectionInfo};
use error::{Error, Result};
use flume::Sender;
use tokio::{spawn, time::timeout};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};
use url::Url;

/// A live voice session: the handshake has completed and a transport is installed.
///
/// Dropping this stops the session's network tasks.
pub(crate) struct Connection {
    pub(crate) info: ConnectionInfo,
    pub(crate) ssrc: u32,
    pub(crate) ws: Sender<WsMessage>,
    pub(crate) attempt_idx: usize,
    cancel: CancellationToken,
}

impl Connection {
    /// Opens a session with the relay named in `info`, bounded by the driver timeout.
    ///
    /// If `resume` holds the SSRC of an earlier session, that session is resumed
    /// instead of identifying afresh.
    pub(crate) async fn new(
        info: ConnectionInfo,
        interconnect: &Interconnect,
        config: &Config,
        attempt_idx: usize,
        resume: Option<u32>,
    ) -> Result<Connection> {
        if let Some(t) = config.driver_timeout {
            timeout(
                t,
                Connection::new_inner(info, interconnect, config, attempt_idx, resume),
            )
            .await?
        } else {
            Connection::new_inner(info, interconnect, config, attempt_idx, resume).await
        }
    }

    #[instrument(skip(interconnect, config))]
    async fn new_inner(
        mut info: ConnectionInfo,
        interconnect: &Interconnect,
        config: &Config,
        attempt_idx: usize,
        resume: Option<u32>,
    ) -> Result<Connection> {
        let url = generate_url(&mut info.endpoint, config)?;

        let (sink, reader) = WsStream::connect(&url).await?.split();

        let (out_tx, out_rx) = flume::unbounded();
        spawn(outbound::runner(sink, out_rx));

        let cancel = CancellationToken::new();
        // Cancels the session's tasks if this attempt fails or is abandoned by the timeout.
        let guard = cancel.clone().drop_guard();

        let (ws_tx, ws_rx) = flume::unbounded();
        let (ready_tx, ready_rx) = flume::bounded(1);

        let aux = AuxNetwork::new(
            info.clone(),
            config,
            interconnect.clone(),
            reader,
            out_tx,
            (ws_tx.clone(), ws_rx),
            cancel.clone(),
            ready_tx,
            attempt_idx,
            resume,
        );

        spawn(ws_task::runner(aux));

        let ssrc = ready_rx
            .recv_async()
            .await
            .map_err(|_| Error::AttemptDiscarded)??;

        Ok(Connection {
            info,
            ssrc,
            ws: ws_tx,
            attempt_idx,
            cancel: guard.disarm(),
        })
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.cancel.cancel();
        info!("Disconnected");
    }
}

fn generate_url(endpoint: &mut String, config: &Config) -> Result<Url> {
    if endpoint.ends_with(":80") {
        let len = endpoint.len();

        endpoint.truncate(len - 3);
    }

    #[cfg(test)]
    let scheme = if config.plaintext_ws { "ws" } else { "wss" };
    #[cfg(not(test))]
    let scheme = {
        let _ = config;
        "wss"
    };

    Url::parse(&format!("{scheme}://{endpoint}/?v={VOICE_GATEWAY_VERSION}"))
        .or(Err(Error::EndpointUrl))
}
