use crate::checksum::crc16;
use crate::scsi::CDB_LEN;

// Vendor command set of the drive's loader. Only the write path is driven
// by this tool; the rest is defined for completeness of the byte layout.
pub const ERASE_FLASH_BLOCK: u16 = 0xFB00;
pub const ERASE_FLASH_SECTOR: u16 = 0xFB01;
pub const ERASE_FLASH_CHIP: u16 = 0xFB02;
pub const READ_STATUS: u16 = 0xFC03;
pub const WRITE_FLASH: u16 = 0xFB04;
pub const READ_FLASH: u16 = 0xFD05;
pub const WRITE_MEMORY: u16 = 0xFB06;
pub const READ_MEMORY: u16 = 0xFD07;
pub const JUMP_TO_MEMORY: u16 = 0xFB08;
pub const READ_KEY: u16 = 0xFC09;
pub const GET_ONLINE_DEVICE: u16 = 0xFC0A;
pub const READ_ID: u16 = 0xFC0B;
pub const RUN_APP: u16 = 0xFC0C;
pub const SET_FLASH_CMD: u16 = 0xFC0D;
pub const FLASH_CRC16: u16 = 0xFC0E;
pub const WRITE_KEY: u16 = 0xFC12;
pub const FLASH_CRC16_RAW: u16 = 0xFC13;
pub const GET_USB_BUFF_SIZE: u16 = 0xFC14;
pub const GET_LOADER_VER: u16 = 0xFC15;
pub const GET_MASKROM_ID: u16 = 0xFC16;

/// Largest payload carried by one write frame, matching the device's
/// command buffer.
pub const WRITE_CHUNK: usize = 512;

/// Header for one frame-carried payload chunk. Built per chunk and handed
/// to the transport together with the chunk; never retained.
pub struct CommandFrame<'a> {
    pub opcode: u16,
    pub address: u32,
    pub payload: &'a [u8],
    pub crc: u16,
}

/// Builds a write frame for `chunk`, attaching its CRC.
pub fn build_write_frame(opcode: u16, address: u32, chunk: &[u8]) -> CommandFrame<'_> {
    CommandFrame {
        opcode,
        address,
        payload: chunk,
        crc: crc16(chunk),
    }
}

impl CommandFrame<'_> {
    pub fn payload_len(&self) -> u16 {
        self.payload.len() as u16
    }

    /// Encode the frame header as the 12-byte command block.
    /// Layout:
    /// [0..2)   opcode, big-endian
    /// [2..6)   address, big-endian
    /// [6..8)   payload length, big-endian
    /// [8]      reserved, zero
    /// [9..11)  payload CRC, low byte first (the one little-endian field
    ///          on this wire)
    /// [11]     reserved, zero
    pub fn to_cdb(&self) -> [u8; CDB_LEN] {
        let mut cdb = [0u8; CDB_LEN];

        cdb[0] = (self.opcode >> 8) as u8;
        cdb[1] = self.opcode as u8;
        cdb[2..6].copy_from_slice(&self.address.to_be_bytes());
        let len = self.payload_len();
        cdb[6] = (len >> 8) as u8;
        cdb[7] = len as u8;
        cdb[9] = self.crc as u8;
        cdb[10] = (self.crc >> 8) as u8;

        cdb
    }
}
