/// Size of one data sector on the wire, in bytes.
pub const SECTOR_SIZE: usize = 512;

pub mod commands {
    /// Transmission bit pattern OR'd into every command index on the wire.
    pub const FRAME_START: u8 = 0x40;
    /// GO_IDLE_STATE - reset the card and select SPI mode.
    pub const GO_IDLE_STATE: u8 = 0;
    /// SEND_IF_COND - announce the supported voltage range.
    pub const SEND_IF_COND: u8 = 8;
    /// READ_SINGLE_BLOCK - read one data sector.
    pub const READ_SINGLE_BLOCK: u8 = 17;
    /// SD_SEND_OP_COND - start card initialization, carries the host
    /// capacity support bit.
    pub const SD_SEND_OP_COND: u8 = 41;
    /// APP_CMD - marks the next command as application-specific.
    pub const APP_CMD: u8 = 55;

    /// 2.7-3.6V supply window plus check pattern for SEND_IF_COND. The
    /// precomputed SEND_IF_COND checksum is only valid for this argument.
    pub const IF_COND_CHECK_PATTERN: u32 = 0x0000_01AA;
    /// Host capacity support bit for SD_SEND_OP_COND.
    pub const HOST_HIGH_CAPACITY: u32 = 1 << 30;
}

pub mod checksums {
    /// Frame checksum for GO_IDLE_STATE with a zero argument.
    pub const GO_IDLE_STATE: u8 = 0x95;
    /// Frame checksum for SEND_IF_COND with the canonical check pattern.
    pub const SEND_IF_COND: u8 = 0x87;
}

pub mod tokens {
    /// Clocked out to elicit the card's next byte; also what an idle bus
    /// reads back.
    pub const IDLE: u8 = 0xFF;
    /// Start data token for a single sector read.
    pub const DATA_START_BLOCK: u8 = 0xFE;
    /// Some cards transmit this ahead of the real status byte.
    pub const SPURIOUS_STATUS: u8 = 0x1F;
}
