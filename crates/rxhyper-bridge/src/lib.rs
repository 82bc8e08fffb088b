//! rxhyper Bridge - byte duplexes as push-streams
//!
//! Turns a replication transport into a subscribable push-stream with
//! `next`/`complete`/`error` semantics, and wires two endpoints into a
//! replication link with exactly one initiator.
//!
//! ```rust,ignore
//! // Responder side: no remote, hand the stream to the other peer.
//! let responder = bridge(&log_a, None)?.into_push_stream();
//! // Initiator side.
//! let link = bridge(&log_b, responder.map(Endpoint::from))?;
//! ```

#![forbid(unsafe_code)]

/// Endpoint shapes and the peer facade seam
pub mod endpoint;

/// Initiator/responder wiring
pub mod link;

/// Observer contract
pub mod observer;

/// Push-stream adapter and subscriptions
pub mod push_stream;

pub use endpoint::{Endpoint, PeerKind, ReplicationPeer};
pub use link::{bridge, BridgeOutcome};
pub use observer::{Notification, Observer};
pub use push_stream::{PushStream, Subscription};
