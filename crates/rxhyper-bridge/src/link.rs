//! Replication link wiring
//!
//! The side that calls [`bridge`] with a remote endpoint is the initiator.
//! A call without a remote is a responder and hands back its stream for
//! someone else to wire.

use futures::stream::BoxStream;
use rxhyper_core::{ByteDuplex, RxError, RxResult};
use std::sync::Arc;
use tracing::debug;

use crate::endpoint::{Endpoint, ReplicationPeer};
use crate::observer::{Notification, Observer};
use crate::push_stream::{PushStream, Subscription};

/// Result of a bridge call
#[derive(Debug, Clone)]
pub enum BridgeOutcome {
    /// No remote: the local responder stream, ready to be subscribed to or
    /// passed to another bridge call
    Detached(PushStream),
    /// Remote wired: the subscription carrying remote data into the local
    /// transport
    Linked(Subscription),
}

impl BridgeOutcome {
    /// The inbound subscription of a linked bridge
    pub fn subscription(&self) -> Option<&Subscription> {
        match self {
            BridgeOutcome::Linked(subscription) => Some(subscription),
            BridgeOutcome::Detached(_) => None,
        }
    }

    /// The stream of a detached bridge
    pub fn into_push_stream(self) -> Option<PushStream> {
        match self {
            BridgeOutcome::Detached(stream) => Some(stream),
            BridgeOutcome::Linked(_) => None,
        }
    }

    /// The concrete transport of a detached bridge
    pub fn transport(&self) -> Option<&Arc<dyn ByteDuplex>> {
        match self {
            BridgeOutcome::Detached(stream) => Some(stream.transport()),
            BridgeOutcome::Linked(_) => None,
        }
    }

    /// Inbound data of a detached bridge
    pub fn data_stream(&self) -> Option<BoxStream<'static, Notification>> {
        match self {
            BridgeOutcome::Detached(stream) => Some(stream.data_stream()),
            BridgeOutcome::Linked(_) => None,
        }
    }

    /// Stop inbound forwarding of a linked bridge. Transports stay open.
    pub fn unsubscribe(&self) {
        if let BridgeOutcome::Linked(subscription) = self {
            subscription.unsubscribe();
        }
    }
}

/// Wire `local` to `remote` for replication.
///
/// Without a remote, opens a responder transport on `local` and returns it
/// detached. With one, opens an initiator transport, forwards local data
/// into the remote, and subscribes the local transport to the remote's
/// data, completion and errors. Fails without a link when the pipeline
/// cannot run forwarding; the local transport is destroyed in that case.
pub fn bridge(local: &dyn ReplicationPeer, remote: Option<Endpoint>) -> RxResult<BridgeOutcome> {
    let Some(remote) = remote else {
        let stream = local.open_push_stream()?;
        debug!(kind = %local.peer_kind(), initiator = false, "Opened detached replication stream");
        return Ok(BridgeOutcome::Detached(stream));
    };

    let remote = remote.into_push_stream(local)?;
    if remote.is_initiator() {
        return Err(RxError::usage(
            "Remote replication stream is already an initiator",
        ));
    }
    if remote.transport().is_closed() {
        return Err(RxError::closed("Remote replication stream"));
    }

    let local_stream = PushStream::new(local.open_transport(true)?, local.pipeline());
    // A link that cannot forward both ways is torn down before returning.
    let outbound = local_stream
        .subscribe_data(Arc::new(remote.clone()))
        .map_err(|err| {
            local_stream.error(err.clone());
            err
        })?;
    let inbound = remote
        .subscribe(Arc::new(local_stream.clone()))
        .map_err(|err| {
            outbound.unsubscribe();
            local_stream.error(err.clone());
            err
        })?;

    debug!(kind = %local.peer_kind(), initiator = true, "Replication link wired");
    Ok(BridgeOutcome::Linked(inbound))
}
