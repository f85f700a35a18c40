//! Opcode tables.
//!
//! The core and diagnostics protocols are separate opcode spaces. Adding an
//! opcode to either table bumps [`PROTOCOL_VERSION`].

use crate::error::{IpcError, IpcResult};

/// Version exchanged in the handshake.
pub const PROTOCOL_VERSION: u32 = 3;

/// Protocol a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ProtocolId {
    Core = 1,
    Diagnostics = 2,
}

impl TryFrom<u8> for ProtocolId {
    type Error = IpcError;

    fn try_from(value: u8) -> IpcResult<Self> {
        match value {
            1 => Ok(Self::Core),
            2 => Ok(Self::Diagnostics),
            other => Err(IpcError::Protocol(format!("unknown protocol id {}", other))),
        }
    }
}

macro_rules! opcode_table {
    ($(#[$meta:meta])* $name:ident, $protocol:expr, { $($variant:ident = $value:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u16)]
        pub enum $name {
            $($variant = $value),+
        }

        impl $name {
            /// Every opcode in the table, in wire order.
            pub const ALL: &'static [$name] = &[$(Self::$variant),+];

            pub fn as_u16(self) -> u16 {
                self as u16
            }

            pub fn from_u16(value: u16) -> IpcResult<Self> {
                match value {
                    $($value => Ok(Self::$variant),)+
                    opcode => Err(IpcError::UnknownOpcode {
                        protocol: $protocol as u8,
                        opcode,
                    }),
                }
            }
        }
    };
}

opcode_table!(
    /// Core resource protocol.
    CoreOpcode, ProtocolId::Core, {
        Handshake = 1,
        IconLookup = 2,
        MultiPartIconLookup = 3,
        MultiIconLookup = 4,
        StyleSheetLookup = 5,
        WidgetLayoutLookup = 6,
        DeviceProfileLookup = 7,
        TypefaceTableLookup = 8,
        EffectLookup = 9,
        EffectAdd = 10,
        UnloadIcon = 11,
        UnloadMultiIcon = 12,
        BatchUnloadIcon = 13,
        ThemeSelection = 14,
        ThemeContentUpdate = 15,
        ForegroundLost = 16,
        FreeSharedMemory = 17,
        AllocatedSharedMemory = 18,
        AllocatedHeapMemory = 19,
        SwitchRenderingMode = 20,
        ServerStop = 21,
    }
);

opcode_table!(
    /// Cache statistics and control, served only with `--diagnostics`.
    DiagOpcode, ProtocolId::Diagnostics, {
        CacheIconCount = 1,
        CacheHitCount = 2,
        CacheMissCount = 3,
        LastAddedRefCount = 4,
        LastRemovedRefCount = 5,
        EnableCache = 6,
        CleanCache = 7,
    }
);
