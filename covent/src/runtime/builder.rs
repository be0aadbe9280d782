use crate::error::Error;
use crate::reactor::UringReactor;
use std::convert::TryFrom;
use std::io;

/// Default size of the submission ring.
const ENTRIES: u32 = 256;

/// Final completion ring size is `ENTRIES * CQ_SIZE_MULTIPLIER`.
const CQ_SIZE_MULTIPLIER: u32 = 2;

/// Kernel limits, see `IORING_MAX_ENTRIES` and `IORING_MAX_CQ_ENTRIES`.
const MAX_ENTRIES: u32 = 32768;
const MAX_CQ_ENTRIES: u32 = 2 * MAX_ENTRIES;

/// Builds a [`UringReactor`] with custom configuration values.
///
/// ```no_run
/// use covent::runtime::Builder;
///
/// let reactor = Builder::new()
///     .entries(64)
///     .cq_size_multiplier(4)
///     .try_build()?;
/// # Ok::<(), covent::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct Builder {
    /// Size of the submission ring, must be a power of two.
    entries: u32,

    /// Final size of the completion ring will be `entries * cq_size_multiplier`.
    ///
    /// The reactor keeps at most that many requests in flight, so completions
    /// can never overflow the ring.
    cq_size_multiplier: u32,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    pub fn new() -> Self {
        Self {
            entries: ENTRIES,
            cq_size_multiplier: CQ_SIZE_MULTIPLIER,
        }
    }

    #[track_caller]
    pub fn entries(mut self, val: u32) -> Self {
        assert!(val.is_power_of_two(), "entries must be a power of two");
        self.entries = val;
        self
    }

    #[track_caller]
    pub fn cq_size_multiplier(mut self, val: u32) -> Self {
        assert!(val > 0, "cq_size_multiplier must be greater than 0");
        self.cq_size_multiplier = val;
        self
    }

    /// Creates the configured reactor.
    pub fn try_build(self) -> Result<UringReactor, Error> {
        let cfg = ReactorConfig::try_from(self)?;
        UringReactor::with_config(cfg)
    }
}

/// Validated reactor construction parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactorConfig {
    pub entries: u32,
    pub cq_size_multiplier: u32,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        ReactorConfig {
            entries: ENTRIES,
            cq_size_multiplier: CQ_SIZE_MULTIPLIER,
        }
    }
}

impl ReactorConfig {
    pub fn cq_entries(&self) -> u32 {
        self.entries.saturating_mul(self.cq_size_multiplier)
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        let invalid = |msg: String| -> Result<(), Error> {
            Err(io::Error::new(io::ErrorKind::InvalidInput, msg).into())
        };

        if !self.entries.is_power_of_two() || self.entries > MAX_ENTRIES {
            return invalid(format!(
                "entries must be a power of two no larger than {}, got {}",
                MAX_ENTRIES, self.entries
            ));
        }

        if self.cq_size_multiplier == 0 || self.cq_entries() > MAX_CQ_ENTRIES {
            return invalid(format!(
                "completion ring size must be between {} and {}, got {} * {}",
                self.entries, MAX_CQ_ENTRIES, self.entries, self.cq_size_multiplier
            ));
        }

        Ok(())
    }
}

impl TryFrom<Builder> for ReactorConfig {
    type Error = Error;

    fn try_from(builder: Builder) -> Result<Self, Self::Error> {
        let cfg = ReactorConfig {
            entries: builder.entries,
            cq_size_multiplier: builder.cq_size_multiplier,
        };

        cfg.validate()?;

        Ok(cfg)
    }
}
