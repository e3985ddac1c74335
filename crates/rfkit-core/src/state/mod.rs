//! Connection and attack state machines.

pub mod attack;
pub mod connection;

pub use attack::{
    AttackKind, AttackSession, AttackStatus, LinkState, Role, SessionAction, SniffingMode,
};
pub use connection::{ConnectionParameters, ConnectionTracker, RecoveryPhase};
