pub mod code;
pub mod consts;
pub mod id;
mod time;

pub use code::ShortCode;
pub use id::{PartyId, SessionId};
pub use time::Timestamp;

#[macro_export]
macro_rules! define_array_type {
    (
        $(#[$outer:meta])*
        struct $t:tt, $n:literal
    ) => {
        $(#[$outer])*
        #[derive(::bincode::Encode, ::bincode::Decode)]
        #[derive(Copy, Clone, Hash, PartialOrd, Ord, PartialEq, Eq)]
        pub struct $t([u8; $n]);

        impl $t {
            pub const ZERO: Self = Self([0u8; $n]);
            pub const MAX: Self = Self([0xffu8; $n]);

            pub fn as_slice(&self) -> &[u8] {
                self.0.as_slice()
            }

            pub fn from_bytes(bytes: [u8; $n]) -> Self {
                Self(bytes)
            }

            pub fn to_bytes(self) -> [u8; $n] {
                self.0
            }
        }

        impl std::fmt::Debug for $t {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                <Self as std::fmt::Display>::fmt(self, f)
            }
        }
    }
}

#[macro_export]
macro_rules! impl_base32_str {
    (
        $t:tt
    ) => {
        impl std::fmt::Display for $t {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                data_encoding::BASE32_NOPAD.encode_write(self.as_slice(), f)
            }
        }

        impl std::str::FromStr for $t {
            type Err = data_encoding::DecodeError;

            fn from_str(s: &str) -> Result<$t, Self::Err> {
                let v = data_encoding::BASE32_NOPAD.decode(s.to_uppercase().as_bytes())?;
                let a = v.try_into().map_err(|_| data_encoding::DecodeError {
                    position: 0,
                    kind: data_encoding::DecodeKind::Length,
                })?;
                Ok(Self(a))
            }
        }

        impl ::serde::Serialize for $t {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: ::serde::Serializer,
            {
                serializer.collect_str(self)
            }
        }

        impl<'de> ::serde::Deserialize<'de> for $t {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: ::serde::Deserializer<'de>,
            {
                let s = <std::borrow::Cow<'_, str> as ::serde::Deserialize>::deserialize(
                    deserializer,
                )?;
                s.parse().map_err(::serde::de::Error::custom)
            }
        }
    };
}

/// Status of a party within a session.
///
/// Only `Waiting` and `Called` count as live; every other status is terminal
/// and the party record never changes again.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[derive(::bincode::Encode, ::bincode::Decode)]
#[derive(::serde::Serialize, ::serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartyStatus {
    Waiting,
    Called,
    Served,
    Left,
    Kicked,
    NoShow,
    Closed,
}

impl PartyStatus {
    pub fn is_live(self) -> bool {
        matches!(self, PartyStatus::Waiting | PartyStatus::Called)
    }

    /// Reason string used in `removed` messages and WS close frames.
    pub fn as_reason(self) -> &'static str {
        match self {
            PartyStatus::Waiting => "waiting",
            PartyStatus::Called => "called",
            PartyStatus::Served => "served",
            PartyStatus::Left => "left",
            PartyStatus::Kicked => "kicked",
            PartyStatus::NoShow => "no_show",
            PartyStatus::Closed => "closed",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[derive(::bincode::Encode, ::bincode::Decode)]
#[derive(::serde::Serialize, ::serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Closed,
}

#[cfg(test)]
mod tests;
