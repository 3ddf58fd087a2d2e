//! Mesh session layer.
//!
//! Runs a group chat session over a local mesh: a coordinator state
//! machine, a peer directory, and a router that frames messages on the
//! connection channels provided by `mesh-transport`.
//!
//! Wire format inside a frame: MessagePack (compact binary).

pub mod connection;
pub mod coordinator;
pub mod directory;
pub mod error;
pub mod message;
pub mod router;
pub mod runtime;
pub mod types;
pub mod view;

pub use connection::{Connection, ConnectionTable};
pub use coordinator::SessionCoordinator;
pub use directory::PeerDirectory;
pub use error::SessionError;
pub use message::ContentMessage;
pub use router::{DeliveryOutcome, MessageRouter, PendingDelivery, FIRST_SEQUENCE};
pub use runtime::effect::SessionEffect;
pub use runtime::{SessionConfig, SessionHandle, SessionRuntime};
pub use types::{
    DeliveryReport, Device, DeviceId, Reachability, SendTarget, SessionSnapshot, SessionState,
};
pub use view::VisibleRegions;
