use std::fmt;
use std::io::Write;
use std::thread;
use std::time::Duration;

use crate::frame::{WRITE_CHUNK, build_write_frame};
use crate::image::FirmwareImage;
use crate::scsi::{
    CDB_LEN, CommandTransport, DataTransfer, INQUIRY, TransportError, WRITE_BUFFER,
};

/// Upload granularity of the WRITE BUFFER path.
pub const UPLOAD_CHUNK: usize = 0x1000;

/// Offset of the identity strings inside a firmware image.
pub const FIRMWARE_IDENT_OFFSET: usize = 0x40BC;

// WRITE BUFFER modes: download microcode with offsets, without / with save.
const MODE_DOWNLOAD: u8 = 6;
const MODE_DOWNLOAD_SAVE: u8 = 7;

// The drive keeps a 32-byte checksum header at the bottom of its microcode
// buffer; image bytes are uploaded above it.
const CHECKSUM_BUF_LEN: usize = 32;
const IMAGE_BUFFER_BASE: u8 = 0x20;

const INQUIRY_LEN: usize = 36;
const IDENT_LEN: usize = 28;

/// Vendor, product and revision strings as reported by INQUIRY, and as
/// embedded in a firmware image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub vendor: String,
    pub product: String,
    pub revision: String,
}

impl DeviceIdentity {
    // `bytes` holds vendor(8) + product(16) + revision(4), space padded.
    fn from_bytes(bytes: &[u8]) -> Self {
        let text = |range: std::ops::Range<usize>| {
            String::from_utf8_lossy(&bytes[range]).trim_end().to_string()
        };
        Self {
            vendor: text(0..8),
            product: text(8..24),
            revision: text(24..28),
        }
    }

    /// Whether two identities name the same drive model. Revision is
    /// excluded: flashing exists precisely to change it.
    pub fn same_model(&self, other: &DeviceIdentity) -> bool {
        self.vendor == other.vendor && self.product == other.product
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}][{}][{}]", self.vendor, self.product, self.revision)
    }
}

/// Asks the drive who it is.
pub fn inquiry(port: &mut dyn CommandTransport) -> Result<DeviceIdentity, TransportError> {
    let mut data = [0u8; INQUIRY_LEN];
    let mut cdb = [0u8; CDB_LEN];
    cdb[0] = INQUIRY;
    cdb[4] = INQUIRY_LEN as u8;
    port.transfer(&cdb, DataTransfer::FromDevice(&mut data))?;
    Ok(DeviceIdentity::from_bytes(&data[8..8 + IDENT_LEN]))
}

/// Reads the identity strings a firmware image carries about itself.
pub fn firmware_identity(image: &FirmwareImage) -> DeviceIdentity {
    let bytes = &image.as_bytes()[FIRMWARE_IDENT_OFFSET..FIRMWARE_IDENT_OFFSET + IDENT_LEN];
    DeviceIdentity::from_bytes(bytes)
}

/// Uploads the whole image into the drive's microcode buffer in
/// `UPLOAD_CHUNK` slices, rewriting a single progress line as it goes.
pub fn upload_firmware(
    port: &mut dyn CommandTransport,
    image: &FirmwareImage,
) -> Result<(), TransportError> {
    let data = image.as_bytes();
    let total = data.len().div_ceil(UPLOAD_CHUNK);

    let stdout = std::io::stdout();
    let mut handle = stdout.lock();

    for (index, chunk) in data.chunks(UPLOAD_CHUNK).enumerate() {
        let offset = index * UPLOAD_CHUNK;

        let mut cdb = [0u8; CDB_LEN];
        cdb[0] = WRITE_BUFFER;
        cdb[1] = MODE_DOWNLOAD;
        cdb[2] = 0; // buffer id
        cdb[3] = (offset >> 16) as u8;
        cdb[4] = (offset >> 8) as u8;
        cdb[5] = IMAGE_BUFFER_BASE;
        cdb[6] = (chunk.len() >> 16) as u8;
        cdb[7] = (chunk.len() >> 8) as u8;
        cdb[8] = chunk.len() as u8;

        port.transfer(&cdb, DataTransfer::ToDevice(chunk))?;

        write!(
            handle,
            "\x1b[2K\rUploading firmware ({:3}/{:3})",
            index + 1,
            total
        )?;
        handle.flush()?;
    }

    writeln!(handle)?;
    Ok(())
}

/// Uploads the 32-byte checksum header validating the image just sent.
pub fn upload_checksum(
    port: &mut dyn CommandTransport,
    checksum: u16,
) -> Result<(), TransportError> {
    let mut buf = [0u8; CHECKSUM_BUF_LEN];
    buf[30] = (checksum >> 8) as u8;
    buf[31] = checksum as u8;

    let mut cdb = [0u8; CDB_LEN];
    cdb[0] = WRITE_BUFFER;
    cdb[1] = MODE_DOWNLOAD;
    cdb[8] = CHECKSUM_BUF_LEN as u8;

    port.transfer(&cdb, DataTransfer::ToDevice(&buf))
}

/// Tells the drive to burn the uploaded buffer into flash.
pub fn commit(port: &mut dyn CommandTransport) -> Result<(), TransportError> {
    let mut cdb = [0u8; CDB_LEN];
    cdb[0] = WRITE_BUFFER;
    cdb[1] = MODE_DOWNLOAD_SAVE;
    port.transfer(&cdb, DataTransfer::None)
}

/// Waits for the drive to come back after a commit: sleeps `settle`, then
/// polls TEST UNIT READY every `poll` until it answers ready or
/// not-ready/no-medium. Check conditions keep the poll going; transport
/// failures abort.
pub fn wait_ready(
    port: &mut dyn CommandTransport,
    settle: Duration,
    poll: Duration,
) -> Result<(), TransportError> {
    thread::sleep(settle);

    loop {
        thread::sleep(poll);
        let cdb = [0u8; CDB_LEN]; // TEST UNIT READY
        match port.transfer(&cdb, DataTransfer::None) {
            Ok(()) => return Ok(()),
            Err(ref err) if err.is_not_ready_no_medium() => return Ok(()),
            Err(TransportError::CheckCondition { .. }) => continue,
            Err(err) => return Err(err),
        }
    }
}

/// Sends `data` to `address` as a sequence of vendor write frames, one
/// `WRITE_CHUNK` slice at a time, CRC attached per chunk.
pub fn write_chunked(
    port: &mut dyn CommandTransport,
    opcode: u16,
    address: u32,
    data: &[u8],
) -> Result<(), TransportError> {
    let mut address = address;
    for chunk in data.chunks(WRITE_CHUNK) {
        let frame = build_write_frame(opcode, address, chunk);
        port.transfer(&frame.to_cdb(), DataTransfer::ToDevice(chunk))?;
        address += chunk.len() as u32;
    }
    Ok(())
}
