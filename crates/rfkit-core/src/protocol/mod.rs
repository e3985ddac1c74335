//! Wire protocols: USB identifiers, frame codecs and lookup tables.
//!
//! Every codec here is pure; nothing in this module touches a transport.

pub mod ble;
pub mod butterfly;
pub mod constants;
pub mod keymap;
pub mod mosart;
pub mod ubertooth;

pub use butterfly::{ButterflyMessage, Command, CommandType, Notification};
pub use constants::*;
pub use keymap::{KeyLookup, MosartKeymap};
pub use mosart::{MosartAction, MosartFrame, MosartKeystroke, MosartPayload};
pub use ubertooth::{PromiscuousReport, UbertoothFrame};
