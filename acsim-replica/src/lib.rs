//! # acsim Replica Process
//!
//! Everything one replica runs: its fault state as dictated by the
//! controller, the bidirectional controller link, the peer-facing transport
//! (periodic UDP broadcast or an event-driven TCP mesh, chosen by the
//! algorithm's capabilities), and the runtime that wires the three
//! long-lived activities together under a supervisor.
//!
//! ## Threading model
//!
//! Three concurrent activities per replica — broadcaster, receiver, and
//! controller handler — plus a supervisor that latches the replica done if
//! any of them exits early. The algorithm state machine sits behind one
//! mutex, the fault state behind another, and neither lock is ever held
//! across I/O. Each socket has exactly one owning activity.

pub mod link;
pub mod runtime;
pub mod state;
pub mod transport;

pub use link::{CommandStream, ControllerLink, LinkError, ReportChannel};
pub use runtime::ReplicaRuntime;
pub use state::{FaultStatus, ReplicaState};
pub use transport::{PeerReceiver, PeerSender};
