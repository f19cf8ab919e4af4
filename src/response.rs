use bitfield::bitfield;

bitfield! {
    /// R1 status token. The high bit clears once a response has arrived;
    /// the remaining bits are error and state flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct R1Response(u8);
    pub in_idle_state, _: 0;
    pub erase_reset, _: 1;
    pub illegal_command, _: 2;
    pub command_crc_error, _: 3;
    pub erase_sequence_error, _: 4;
    pub address_error, _: 5;
    pub parameter_error, _: 6;
}

impl R1Response {
    /// Card accepted the command and has left the idle state.
    pub const READY_STATE: R1Response = R1Response(0x00);
    /// Card is idle after reset with no error flags raised.
    pub const IN_IDLE_STATE: R1Response = R1Response(0x01);

    /// A polled byte is a response once the high bit is clear; 0xFF means
    /// the card has not answered yet.
    pub fn is_valid(&self) -> bool {
        self.0 & 0x80 == 0
    }
}
