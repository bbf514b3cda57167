// ADS1015 12-bit I2C converter: register layout and conversion math
//
// Single-shot read: write the config register with OS=1 and the channel mux,
// wait for the conversion, then read the conversion register (12 bits,
// left-aligned in a big-endian 16-bit word).

/// Default I2C address (ADDR pin tied to GND)
pub const DEFAULT_ADDRESS: u16 = 0x48;

/// Register pointers
pub const REG_CONVERSION: u8 = 0x00;
pub const REG_CONFIG: u8 = 0x01;

/// Full-scale range for PGA gain 1 (+/-4.096V)
pub const FULL_SCALE_VOLTS: f64 = 4.096;

/// Largest positive 12-bit code
const MAX_CODE: i16 = 2047;

// Config register fields
const OS_START: u16 = 1 << 15;
const MUX_SINGLE_ENDED: u16 = 0b100;
const PGA_4_096V: u16 = 0b001;
const MODE_SINGLE_SHOT: u16 = 1 << 8;
const DR_1600_SPS: u16 = 0b100;
const COMP_QUEUE_DISABLE: u16 = 0b11;

/// Config word starting a single-ended single-shot conversion on `channel`
pub fn config_word(channel: u8) -> u16 {
    OS_START
        | ((MUX_SINGLE_ENDED | u16::from(channel & 0b11)) << 12)
        | (PGA_4_096V << 9)
        | MODE_SINGLE_SHOT
        | (DR_1600_SPS << 5)
        | COMP_QUEUE_DISABLE
}

/// Bytes to write for a conversion on `channel`: [pointer, msb, lsb]
pub fn start_conversion_command(channel: u8) -> [u8; 3] {
    let [msb, lsb] = config_word(channel).to_be_bytes();
    [REG_CONFIG, msb, lsb]
}

/// Decode the conversion register into a 12-bit code.
/// Single-ended inputs cannot go below zero; small negative offsets clamp to 0.
pub fn decode_conversion(bytes: [u8; 2]) -> u16 {
    let code = i16::from_be_bytes(bytes) >> 4;
    code.clamp(0, MAX_CODE) as u16
}

/// Convert a 12-bit code into volts
pub fn code_to_volts(code: u16) -> f64 {
    f64::from(code) * FULL_SCALE_VOLTS / f64::from(MAX_CODE + 1)
}
