use crate::{define_array_type, impl_base32_str};

define_array_type!(
    /// Opaque 128-bit session identity.
    ///
    /// Chosen at creation, never reused. The short code is a separate,
    /// human-enterable alias resolved through the session directory.
    struct SessionId, 16
);
impl_base32_str!(SessionId);

define_array_type!(
    /// 128-bit random party identity.
    ///
    /// Handed to the guest on join; knowing it is what authorizes
    /// `declare-nearby`, `leave` and guest subscriptions.
    struct PartyId, 16
);
impl_base32_str!(PartyId);

macro_rules! impl_random {
    ($t:tt) => {
        impl $t {
            /// Generate a fresh random id from the thread rng.
            pub fn generate() -> Self {
                Self(rand::random())
            }
        }
    };
}

impl_random!(SessionId);
impl_random!(PartyId);
