use std::fmt;
use std::str::FromStr;

use snafu::Snafu;

/// Alphabet for short codes: uppercase letters and digits minus the
/// ambiguous `I`, `O`, `0`, `1`.
pub const SHORT_CODE_ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

pub const SHORT_CODE_LEN: usize = 6;

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum ShortCodeError {
    #[snafu(display("Short code must be {SHORT_CODE_LEN} characters"))]
    Length,
    #[snafu(display("Short code contains a character outside the allowed alphabet"))]
    Alphabet,
}

/// 6-character human-enterable session alias.
///
/// Stored uppercase; parsing folds lowercase input so codes survive being
/// read aloud or typed from a chalkboard.
#[derive(Copy, Clone, Hash, PartialOrd, Ord, PartialEq, Eq)]
#[derive(::bincode::Encode, ::bincode::Decode)]
pub struct ShortCode([u8; SHORT_CODE_LEN]);

impl ShortCode {
    /// Draw a random code.
    ///
    /// Uniqueness is not guaranteed here; the session directory retries
    /// draws against its unique index.
    pub fn generate() -> Self {
        use rand::Rng as _;
        let mut rng = rand::rng();
        let mut out = [0u8; SHORT_CODE_LEN];
        for b in &mut out {
            *b = SHORT_CODE_ALPHABET[rng.random_range(0..SHORT_CODE_ALPHABET.len())];
        }
        Self(out)
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).expect("Alphabet is ASCII")
    }
}

impl fmt::Display for ShortCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for ShortCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        <Self as fmt::Display>::fmt(self, f)
    }
}

impl FromStr for ShortCode {
    type Err = ShortCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != SHORT_CODE_LEN {
            return Err(ShortCodeError::Length);
        }
        let mut out = [0u8; SHORT_CODE_LEN];
        for (i, ch) in s.bytes().enumerate() {
            let upper = ch.to_ascii_uppercase();
            if !SHORT_CODE_ALPHABET.contains(&upper) {
                return Err(ShortCodeError::Alphabet);
            }
            out[i] = upper;
        }
        Ok(Self(out))
    }
}

impl ::serde::Serialize for ShortCode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: ::serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> ::serde::Deserialize<'de> for ShortCode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: ::serde::Deserializer<'de>,
    {
        let s = <std::borrow::Cow<'_, str> as ::serde::Deserialize>::deserialize(deserializer)?;
        s.parse().map_err(::serde::de::Error::custom)
    }
}
