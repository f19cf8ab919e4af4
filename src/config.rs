/// Represents retry budgets and pacing for [`SdCardSpi`](crate::SdCardSpi).
///
/// Every bounded loop in the driver draws its bound from here, so budgets
/// stay named and overridable per board.
pub trait SdCardSpiConfig {
    /// Polls of the bus for a single R1 response.
    const RESPONSE_POLL_ATTEMPTS: usize;
    /// Attempts to reset the card into the idle state.
    const GO_IDLE_ATTEMPTS: usize;
    /// Attempts of the interface condition check.
    const IF_COND_ATTEMPTS: usize;
    /// Pause between interface condition attempts, in microseconds.
    const IF_COND_RETRY_DELAY_US: u32;
    /// Attempts to negotiate capacity before giving up.
    const NEGOTIATE_ATTEMPTS: usize;
    /// Pause between negotiation attempts, in microseconds.
    const NEGOTIATE_RETRY_DELAY_US: u32;
    /// Polls for the start-of-data token of a sector read.
    const DATA_TOKEN_ATTEMPTS: usize;
    /// Settle time with the power rail off during a power cycle, in
    /// microseconds.
    const POWER_SETTLE_US: u32;
}

/// Default implementation of [`SdCardSpiConfig`](crate::SdCardSpiConfig).
pub struct DefaultSdCardSpiConfig;

impl SdCardSpiConfig for DefaultSdCardSpiConfig {
    const RESPONSE_POLL_ATTEMPTS: usize = 100;
    const GO_IDLE_ATTEMPTS: usize = 100;
    const IF_COND_ATTEMPTS: usize = 100;
    const IF_COND_RETRY_DELAY_US: u32 = 10_000;
    const NEGOTIATE_ATTEMPTS: usize = 1_000;
    const NEGOTIATE_RETRY_DELAY_US: u32 = 10_000;
    const DATA_TOKEN_ATTEMPTS: usize = 10_000;
    const POWER_SETTLE_US: u32 = 100_000;
}
