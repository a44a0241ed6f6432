use std::error::Error;
use std::fmt;

/// Single-line rendering of an error and its source chain.
///
/// Meant for structured log fields, where a multi-line `Debug` dump is
/// unreadable: `err = %e.fmt_compact()`.
pub struct CompactError<'e>(&'e (dyn Error + 'static));

impl fmt::Display for CompactError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;

        let mut cur_source = self.0.source();
        while let Some(source) = cur_source {
            write!(f, ": {source}")?;
            cur_source = source.source();
        }
        Ok(())
    }
}

pub trait FmtCompact {
    fn fmt_compact(&self) -> CompactError<'_>;
}

impl<E> FmtCompact for E
where
    E: Error + 'static,
{
    fn fmt_compact(&self) -> CompactError<'_> {
        CompactError(self)
    }
}

impl FmtCompact for dyn Error + Send + Sync + 'static {
    fn fmt_compact(&self) -> CompactError<'_> {
        CompactError(self)
    }
}

#[cfg(test)]
mod tests {
    use snafu::Snafu;

    use super::*;

    #[derive(Debug, Snafu)]
    #[snafu(display("outer"))]
    struct Outer {
        source: Inner,
    }

    #[derive(Debug, Snafu)]
    #[snafu(display("inner"))]
    struct Inner;

    #[test]
    fn chains_sources() {
        let err = Outer { source: Inner };
        assert_eq!(err.fmt_compact().to_string(), "outer: inner");
    }
}
