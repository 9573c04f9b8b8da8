//! Windows `GUID` helpers used to register for device-interface notifications.
#![cfg(windows)]

use std::ffi::OsString;
use std::{error, fmt};
use windows_sys::Win32::System::Rpc::{UuidFromStringW, RPC_S_INVALID_STRING_UUID};

/// Error converting a string into a [`windows_sys::core::GUID`].
#[derive(Debug)]
pub struct InvalidUuidString(Vec<u16>);
impl error::Error for InvalidUuidString {}
impl fmt::Display for InvalidUuidString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid uuid string {:?}", self.0)
    }
}

pub struct Guid(pub windows_sys::core::GUID);

impl Guid {
    /// Parse a `{xxxxxxxx-xxxx-...}` string into a `Guid`.
    pub fn new<S>(s: S) -> Result<Self, InvalidUuidString>
    where
        S: Into<OsString>,
    {
        let uuid = crate::windows::wide::to_wide(s);
        let mut me = unsafe { std::mem::zeroed() };
        let result = unsafe { UuidFromStringW(uuid.as_ptr(), &mut me) };
        match result {
            RPC_S_INVALID_STRING_UUID => Err(InvalidUuidString(uuid)),
            _ => Ok(Self(me)),
        }
    }

    pub fn into_inner(self) -> windows_sys::core::GUID {
        self.0
    }
}

impl PartialEq for Guid {
    fn eq(&self, other: &Self) -> bool {
        self.0.data1 == other.0.data1
            && self.0.data2 == other.0.data2
            && self.0.data3 == other.0.data3
            && self.0.data4 == other.0.data4
    }
}

impl From<windows_sys::core::GUID> for Guid {
    fn from(value: windows_sys::core::GUID) -> Self {
        Self(value)
    }
}

impl From<Guid> for windows_sys::core::GUID {
    fn from(value: Guid) -> Self {
        value.0
    }
}

/// Initializes a `GUID` from literal values, in the `data1, data2, data3,
/// data4[0..8]` shape Microsoft's headers publish device-class GUIDs in.
#[macro_export]
macro_rules! guid {
    ($a:expr, $b:expr, $c:expr, $d:expr) => {
        windows_sys::core::GUID {
            data1: $a,
            data2: $b,
            data3: $c,
            data4: $d,
        }
    };
    ($a:expr, $b:expr, $c:expr, $d0:expr, $d1:expr, $d2:expr, $d3:expr, $d4:expr, $d5:expr, $d6:expr, $d7:expr) => {
        windows_sys::core::GUID {
            data1: $a,
            data2: $b,
            data3: $c,
            data4: [$d0, $d1, $d2, $d3, $d4, $d5, $d6, $d7],
        }
    };
}
