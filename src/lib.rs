//! SD/SDHC sector-read driver for SPI-attached cards, written in Embedded Rust.
//!
//! This crate brings a card up over a raw byte-at-a-time SPI bus and reads
//! 512-byte sectors from it. Bring-up runs the SPI-mode handshake as a
//! linear sequence: power cycle and clock priming, reset to idle, interface
//! condition check, capacity negotiation, then a trial sector read that
//! fixes the addressing mode. A successful [`SdCardSpi::init`] hands back a
//! [`ReadyCard`], and sector reads are only reachable through that handle.
//!
//! The stack is read-only and fully synchronous: every operation is a
//! blocking busy-wait with bounded retries, which is all a single-slot
//! bare-metal target needs. MMC cards are not supported, and the data
//! checksum trailing each sector is clocked out but not verified.

#![cfg_attr(not(test), no_std)]

mod config;
mod consts;
mod crc;
mod response;


pub use crate::config::{DefaultSdCardSpiConfig, SdCardSpiConfig};
pub use crate::consts::SECTOR_SIZE;
pub use crate::response::R1Response;

use crate::{
    consts::{checksums, commands, tokens},
    crc::crc7,
};

use core::{cell::RefCell, marker::PhantomData};
use embedded_hal::blocking::{delay::DelayUs, spi::Transfer};
use switch_hal::OutputSwitch;

#[cfg(feature = "defmt-log")]
use defmt::{info, warn};

#[cfg(not(feature = "defmt-log"))]
macro_rules! info {
    ($($arg:tt)*) => {{}};
}

#[cfg(not(feature = "defmt-log"))]
macro_rules! warn {
    ($($arg:tt)*) => {{}};
}

/// Failure on one of the underlying peripherals.
///
/// `T` - transport error type.
/// `S` - select switch error type.
/// `P` - power switch error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError<T, S, P> {
    /// Error from the SPI peripheral.
    Transport(T),
    /// Couldn't drive the card-select line.
    Select(S),
    /// Couldn't switch the card power rail.
    Power(P),
}

/// Why bring-up failed. Each variant is terminal for the whole sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitError<E> {
    /// Underlying bus failure.
    Bus(E),
    /// Card never reported the idle state after reset.
    GoIdleFailed,
    /// Card did not answer the interface condition check; cards predating
    /// the versioned interface check do not.
    UnsupportedCard,
    /// Card never left the idle state during capacity negotiation.
    NegotiationFailed,
    /// The trial sector read after negotiation failed.
    ProbeFailed,
}

/// Why a sector read failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadError<E> {
    /// Underlying bus failure.
    Bus(E),
    /// Card rejected the read command with this status token.
    CardRejected(u8),
    /// The start-of-data token never arrived within the poll budget.
    Timeout,
}

impl<E> From<E> for InitError<E> {
    fn from(err: E) -> Self {
        InitError::Bus(err)
    }
}

impl<E> From<E> for ReadError<E> {
    fn from(err: E) -> Self {
        ReadError::Bus(err)
    }
}

/// Wire addressing scheme fixed during bring-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum AddressMode {
    /// Standard capacity: byte-addressed, the sector index is scaled by the
    /// sector size before it goes on the wire.
    Sdsc,
    /// High capacity: block-addressed, the sector index goes on the wire
    /// verbatim.
    Sdhc,
}

/// Bus error type produced by a given peripheral set.
pub type BusErrorFor<Spi, Cs, Pwr> = BusError<
    <Spi as Transfer<u8>>::Error,
    <Cs as OutputSwitch>::Error,
    <Pwr as OutputSwitch>::Error,
>;

/// SD card SPI driver.
///
/// `Spi` - SPI transport.
/// `Cs` - chip select output switch.
/// `Pwr` - card power rail output switch.
/// `D` - busy-wait delay provider.
/// `Config` - retry budget configuration.
pub struct SdCardSpi<
    Spi: Transfer<u8>,
    Cs: OutputSwitch,
    Pwr: OutputSwitch,
    D: DelayUs<u32>,
    Config: SdCardSpiConfig,
> {
    spi: RefCell<Spi>,
    cs: RefCell<Cs>,
    power: RefCell<Pwr>,
    delay: RefCell<D>,
    config: PhantomData<Config>,
}

/// Handle to a card that completed bring-up, and the only path to sector
/// reads.
///
/// The handle borrows the driver for as long as it lives, so the card
/// cannot be re-initialized underneath an outstanding reader. Dropping the
/// handle returns the driver to its uninitialized state; run
/// [`SdCardSpi::init`] again to obtain a new one.
pub struct ReadyCard<
    'a,
    Spi: Transfer<u8>,
    Cs: OutputSwitch,
    Pwr: OutputSwitch,
    D: DelayUs<u32>,
    Config: SdCardSpiConfig,
> {
    bus: &'a SdCardSpi<Spi, Cs, Pwr, D, Config>,
    mode: AddressMode,
}

impl<Spi, Cs, Pwr, D, Config> SdCardSpi<Spi, Cs, Pwr, D, Config>
where
    Spi: Transfer<u8>,
    Cs: OutputSwitch,
    Pwr: OutputSwitch,
    D: DelayUs<u32>,
    Config: SdCardSpiConfig,
{
    /// Idle bytes clocked with the card selected right after power-on; 80
    /// clock cycles, covering the card's minimum before the first command.
    const PRIME_BYTES: usize = 10;
    /// Sector fetched by the bring-up trial read.
    const PROBE_SECTOR: u32 = 1;

    /// Creates a new [`SdCardSpi<Spi, Cs, Pwr, D, Config>`].
    ///
    /// `spi` - SPI instance.
    /// `cs` - chip select output switch.
    /// `power` - card power rail output switch.
    /// `delay` - busy-wait delay provider.
    pub fn new(spi: Spi, cs: Cs, power: Pwr, delay: D) -> Self {
        SdCardSpi {
            spi: RefCell::new(spi),
            cs: RefCell::new(cs),
            power: RefCell::new(power),
            delay: RefCell::new(delay),
            config: PhantomData::<Config>,
        }
    }

    /// Releases the underlying peripherals.
    pub fn free(self) -> (Spi, Cs, Pwr, D) {
        (
            self.spi.into_inner(),
            self.cs.into_inner(),
            self.power.into_inner(),
            self.delay.into_inner(),
        )
    }

    /// Runs the card bring-up sequence and fixes the addressing mode.
    ///
    /// Power cycles the card, primes its clock, resets it to idle, checks
    /// the interface condition, negotiates capacity and proves the result
    /// with a trial sector read. Every stage failure is terminal; the
    /// caller decides whether to retry the whole sequence.
    pub fn init(
        &mut self,
    ) -> Result<ReadyCard<'_, Spi, Cs, Pwr, D, Config>, InitError<BusErrorFor<Spi, Cs, Pwr>>> {
        info!("SD bring-up started");

        self.power_cycle()?;
        self.go_idle()?;
        self.check_interface()?;
        self.negotiate_capacity()?;

        // Address the card as high capacity and prove it with a trial read.
        let card = ReadyCard {
            bus: &*self,
            mode: AddressMode::Sdhc,
        };
        let mut scratch = [0u8; SECTOR_SIZE];
        match card.read_sector(Self::PROBE_SECTOR, &mut scratch) {
            Ok(()) => {
                info!("SD card initialized, mode: {}", card.mode);
                Ok(card)
            }
            Err(ReadError::Bus(err)) => Err(InitError::Bus(err)),
            Err(_) => {
                warn!("trial sector read failed, byte-addressed SDSC card?");
                Err(InitError::ProbeFailed)
            }
        }
    }

    /// Cycle the card's power rail and prime its clock.
    fn power_cycle(&self) -> Result<(), BusErrorFor<Spi, Cs, Pwr>> {
        info!("SD power cycle");

        self.power.borrow_mut().off().map_err(BusError::Power)?;
        self.delay_us(Config::POWER_SETTLE_US);
        self.power.borrow_mut().on().map_err(BusError::Power)?;

        self.cs_scope(|s| {
            for _ in 0..Self::PRIME_BYTES {
                s.send(tokens::IDLE)?;
            }
            Ok(())
        })
    }

    /// Reset the card into the idle state.
    fn go_idle(&self) -> Result<(), InitError<BusErrorFor<Spi, Cs, Pwr>>> {
        info!("SD reset to idle");

        let accepted = self.retry_for_status(
            Config::GO_IDLE_ATTEMPTS,
            0,
            R1Response::IN_IDLE_STATE,
            |s| s.command(commands::GO_IDLE_STATE, 0x0000_0000),
        )?;

        if accepted {
            Ok(())
        } else {
            Err(InitError::GoIdleFailed)
        }
    }

    /// Verify the card's interface operating condition.
    fn check_interface(&self) -> Result<(), InitError<BusErrorFor<Spi, Cs, Pwr>>> {
        info!("SD interface condition check");

        let accepted = self.retry_for_status(
            Config::IF_COND_ATTEMPTS,
            Config::IF_COND_RETRY_DELAY_US,
            R1Response::IN_IDLE_STATE,
            |s| s.command(commands::SEND_IF_COND, commands::IF_COND_CHECK_PATTERN),
        )?;

        if accepted {
            Ok(())
        } else {
            warn!("no answer to the interface condition check, pre-2.0 card?");
            Err(InitError::UnsupportedCard)
        }
    }

    /// Negotiate capacity support and wait for the card to leave idle.
    fn negotiate_capacity(&self) -> Result<(), InitError<BusErrorFor<Spi, Cs, Pwr>>> {
        info!("SD capacity negotiation");

        let accepted = self.retry_for_status(
            Config::NEGOTIATE_ATTEMPTS,
            Config::NEGOTIATE_RETRY_DELAY_US,
            R1Response::READY_STATE,
            |s| {
                // The prefix's own response carries nothing useful here.
                s.command(commands::APP_CMD, 0x0000_0000)?;
                s.command(commands::SD_SEND_OP_COND, commands::HOST_HIGH_CAPACITY)
            },
        )?;

        if accepted {
            Ok(())
        } else {
            Err(InitError::NegotiationFailed)
        }
    }

    /// Repeats `exchange` until it yields `expected`, bounded by `attempts`
    /// and paced by `retry_delay_us` after each miss.
    fn retry_for_status<F>(
        &self,
        attempts: usize,
        retry_delay_us: u32,
        expected: R1Response,
        exchange: F,
    ) -> Result<bool, BusErrorFor<Spi, Cs, Pwr>>
    where
        F: Fn(&Self) -> Result<R1Response, BusErrorFor<Spi, Cs, Pwr>>,
    {
        for _ in 0..attempts {
            if exchange(self)? == expected {
                return Ok(true);
            }

            if retry_delay_us > 0 {
                self.delay_us(retry_delay_us);
            }
        }

        Ok(false)
    }

    /// Send a command frame and poll for its response.
    fn command(&self, cmd: u8, arg: u32) -> Result<R1Response, BusErrorFor<Spi, Cs, Pwr>> {
        self.send_command(cmd, arg)?;
        self.read_response()
    }

    /// Frame and transmit one command: a sync byte, the start byte, the
    /// argument in big-endian order and the checksum, in a single select
    /// scope.
    fn send_command(&self, cmd: u8, arg: u32) -> Result<(), BusErrorFor<Spi, Cs, Pwr>> {
        let frame = [
            commands::FRAME_START | cmd,
            (arg >> 24) as u8,
            (arg >> 16) as u8,
            (arg >> 8) as u8,
            arg as u8,
        ];

        let checksum = match cmd {
            commands::GO_IDLE_STATE => checksums::GO_IDLE_STATE,
            commands::SEND_IF_COND => checksums::SEND_IF_COND,
            _ => (crc7(&frame) << 1) | 0x01,
        };

        self.cs_scope(|s| {
            s.send(tokens::IDLE)?;
            s.send_slice(&frame)?;
            s.send(checksum)
        })
    }

    /// Poll for a status token, toggling the select line around each byte.
    ///
    /// Gives up after the poll budget; the caller then sees a token with
    /// the high bit still set. A token of exactly 0x1F is discarded and
    /// replaced by the next byte on the bus, matching cards that prepend
    /// that value to the real status.
    fn read_response(&self) -> Result<R1Response, BusErrorFor<Spi, Cs, Pwr>> {
        let mut token = R1Response(tokens::IDLE);

        for _ in 0..Config::RESPONSE_POLL_ATTEMPTS {
            token = R1Response(self.cs_scope(|s| s.receive())?);

            if token.is_valid() {
                break;
            }
        }

        if token.0 == tokens::SPURIOUS_STATUS {
            token = R1Response(self.cs_scope(|s| s.receive())?);
        }

        Ok(token)
    }

    /// Poll for the start-of-data token ahead of a sector transfer.
    fn wait_for_data_token(&self) -> Result<bool, BusErrorFor<Spi, Cs, Pwr>> {
        for _ in 0..Config::DATA_TOKEN_ATTEMPTS {
            if self.cs_scope(|s| s.receive())? == tokens::DATA_START_BLOCK {
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Activate chip select.
    fn select(&self) -> Result<(), BusErrorFor<Spi, Cs, Pwr>> {
        self.cs.borrow_mut().on().map_err(BusError::Select)
    }

    /// Deactivate chip select.
    fn unselect(&self) -> Result<(), BusErrorFor<Spi, Cs, Pwr>> {
        self.cs.borrow_mut().off().map_err(BusError::Select)
    }

    /// Runs `f` with chip select held, releasing it on every exit path.
    fn cs_scope<R, F>(&self, f: F) -> Result<R, BusErrorFor<Spi, Cs, Pwr>>
    where
        F: FnOnce(&Self) -> Result<R, BusErrorFor<Spi, Cs, Pwr>>,
    {
        self.select()?;
        let result = f(self);
        self.unselect()?;

        result
    }

    /// Send one byte and receive one byte.
    fn transfer(&self, data: u8) -> Result<u8, BusErrorFor<Spi, Cs, Pwr>> {
        self.spi
            .borrow_mut()
            .transfer(&mut [data])
            .map(|b| b[0])
            .map_err(BusError::Transport)
    }

    /// Receive a byte from the card by clocking out an idle byte.
    fn receive(&self) -> Result<u8, BusErrorFor<Spi, Cs, Pwr>> {
        self.transfer(tokens::IDLE)
    }

    /// Send a byte to the card.
    fn send(&self, data: u8) -> Result<(), BusErrorFor<Spi, Cs, Pwr>> {
        self.transfer(data).map(|_| ())
    }

    /// Send a slice to the card.
    fn send_slice(&self, data: &[u8]) -> Result<(), BusErrorFor<Spi, Cs, Pwr>> {
        for byte in data.iter() {
            self.send(*byte)?;
        }

        Ok(())
    }

    /// Receive a slice from the card.
    fn receive_slice(&self, data: &mut [u8]) -> Result<(), BusErrorFor<Spi, Cs, Pwr>> {
        for byte in data.iter_mut() {
            *byte = self.receive()?;
        }

        Ok(())
    }

    /// Clock out and discard one byte.
    fn skip_byte(&self) -> Result<(), BusErrorFor<Spi, Cs, Pwr>> {
        self.receive().map(|_| ())
    }

    /// Busy-wait.
    fn delay_us(&self, us: u32) {
        self.delay.borrow_mut().delay_us(us);
    }
}

impl<'a, Spi, Cs, Pwr, D, Config> ReadyCard<'a, Spi, Cs, Pwr, D, Config>
where
    Spi: Transfer<u8>,
    Cs: OutputSwitch,
    Pwr: OutputSwitch,
    D: DelayUs<u32>,
    Config: SdCardSpiConfig,
{
    /// The addressing mode fixed during bring-up.
    pub fn mode(&self) -> AddressMode {
        self.mode
    }

    /// Reads one sector into a caller-owned buffer.
    ///
    /// The buffer is zeroed before any bus activity, so a failed read never
    /// hands back stale caller data. Failures leave no driver state behind;
    /// the caller may simply retry.
    pub fn read_sector(
        &self,
        sector: u32,
        out: &mut [u8; SECTOR_SIZE],
    ) -> Result<(), ReadError<BusErrorFor<Spi, Cs, Pwr>>> {
        out.fill(0);

        let arg = match self.mode {
            AddressMode::Sdsc => sector * SECTOR_SIZE as u32,
            AddressMode::Sdhc => sector,
        };

        let status = self.bus.command(commands::READ_SINGLE_BLOCK, arg)?;
        if status != R1Response::READY_STATE {
            warn!("sector read rejected, status: {}", status.0);
            return Err(ReadError::CardRejected(status.0));
        }

        if !self.bus.wait_for_data_token()? {
            warn!("start-of-data token never arrived");
            return Err(ReadError::Timeout);
        }

        self.bus.cs_scope(|s| {
            s.receive_slice(out)?;
            // The trailing data checksum is clocked out but not verified.
            s.skip_byte()?;
            s.skip_byte()
        })?;

        Ok(())
    }
}
