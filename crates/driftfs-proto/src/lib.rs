//! The DriftFS message vocabulary.
//!
//! Every frame on the wire carries one [`Wrapper`], a tagged union over the
//! message kinds the four process roles exchange. Encoding is field-ordered
//! and little-endian via `driftfs-wire`; the impls are generated by the
//! `wire_message!` / `wire_enum!` macros below so a struct's wire layout is
//! exactly its field list.

/// Implement `WireEncode` / `WireDecode` for a struct by listing its fields
/// in wire order.
macro_rules! wire_message {
    ($name:ident { $($field:ident),+ $(,)? }) => {
        impl driftfs_wire::WireEncode for $name {
            fn encode(&self, buf: &mut Vec<u8>) {
                $(driftfs_wire::WireEncode::encode(&self.$field, buf);)+
            }
        }

        impl driftfs_wire::WireDecode for $name {
            fn decode(buf: &[u8], pos: &mut usize) -> Result<Self, driftfs_wire::WireError> {
                Ok(Self {
                    $($field: driftfs_wire::WireDecode::decode(buf, pos)?,)+
                })
            }
        }
    };
}

/// Implement `TryFrom<u8>` plus the wire traits for a `#[repr(u8)]` enum.
macro_rules! wire_enum {
    ($name:ident { $($variant:ident = $value:literal),+ $(,)? }) => {
        impl TryFrom<u8> for $name {
            type Error = ();

            fn try_from(v: u8) -> Result<Self, ()> {
                match v {
                    $($value => Ok(Self::$variant),)+
                    _ => Err(()),
                }
            }
        }

        impl driftfs_wire::WireEncode for $name {
            fn encode(&self, buf: &mut Vec<u8>) {
                driftfs_wire::WireEncode::encode(&(*self as u8), buf);
            }
        }

        impl driftfs_wire::WireDecode for $name {
            fn decode(buf: &[u8], pos: &mut usize) -> Result<Self, driftfs_wire::WireError> {
                let v = <u8 as driftfs_wire::WireDecode>::decode(buf, pos)?;
                Self::try_from(v).map_err(|_| driftfs_wire::WireError::InvalidVariant {
                    type_name: stringify!($name),
                    value: v as u64,
                })
            }
        }
    };
}

mod action;
mod types;
mod wrapper;

pub use action::{ActionRequest, ActionType, ComputeType};
pub use types::{Chunk, FileInfo, Node, Plugin, Stats};
pub use wrapper::{Ack, ComputationStatus, Files, Heartbeat, JobStatus, Registration, StorageNodes, Wrapper};
