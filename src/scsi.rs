use std::io;

use thiserror::Error;

// Standard SCSI opcodes used by the flash sequence.
pub const TEST_UNIT_READY: u8 = 0x00;
pub const INQUIRY: u8 = 0x12;
pub const WRITE_BUFFER: u8 = 0x3B;

/// Every command travels as a fixed-length block; `cdb_len` tells the
/// pass-through how many of these bytes the opcode actually uses.
pub const CDB_LEN: usize = 12;

/// Data phase of one command transaction.
pub enum DataTransfer<'a> {
    None,
    FromDevice(&'a mut [u8]),
    ToDevice(&'a [u8]),
}

/// Failure surfaced by the transport. `CheckCondition` carries the device's
/// structured sense data (key = category, ASC/ASCQ = detail); the rest are
/// host-side failures. Callers propagate these unchanged; there is no retry
/// at this layer.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("device I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("check condition: sense key {key:#04X}, asc {asc:#04X}, ascq {ascq:#04X}")]
    CheckCondition { key: u8, asc: u8, ascq: u8 },
    #[error("transport failed without sense data (host {host:#06X}, driver {driver:#06X})")]
    Failed { host: u16, driver: u16 },
}

impl TransportError {
    /// Not ready, medium not present (2/0x3A). A drive that just reflashed
    /// itself reports this once it is back on its feet without a disc.
    pub fn is_not_ready_no_medium(&self) -> bool {
        matches!(
            self,
            TransportError::CheckCondition {
                key: 0x02,
                asc: 0x3A,
                ..
            }
        )
    }
}

/// One command transaction against the device: a fixed-length command block
/// plus an optional data phase. Implementations own the device handle; the
/// rest of the crate only sees this trait.
pub trait CommandTransport {
    fn transfer(
        &mut self,
        cdb: &[u8; CDB_LEN],
        data: DataTransfer<'_>,
    ) -> Result<(), TransportError>;
}

/// Command block length by SCSI opcode group. Vendor groups use the full
/// 12-byte block.
pub fn cdb_len(opcode: u8) -> u8 {
    match opcode >> 5 {
        0 => 6,
        1 | 2 => 10,
        _ => 12,
    }
}

#[cfg(target_os = "linux")]
pub use sg::{SgDevice, open};

#[cfg(target_os = "linux")]
mod sg {
    use std::fs::{File, OpenOptions};
    use std::io;
    use std::os::fd::AsRawFd;
    use std::path::Path;
    use std::ptr;

    use super::{CDB_LEN, CommandTransport, DataTransfer, TransportError, cdb_len};

    const SG_IO: libc::c_ulong = 0x2285;
    const SG_DXFER_NONE: i32 = -1;
    const SG_DXFER_TO_DEV: i32 = -2;
    const SG_DXFER_FROM_DEV: i32 = -3;
    const SG_INFO_OK_MASK: u32 = 0x1;

    const SENSE_LEN: usize = 32;
    const TIMEOUT_MS: u32 = 60_000;

    // struct sg_io_hdr from <scsi/sg.h>.
    #[repr(C)]
    struct SgIoHdr {
        interface_id: i32,
        dxfer_direction: i32,
        cmd_len: u8,
        mx_sb_len: u8,
        iovec_count: u16,
        dxfer_len: u32,
        dxferp: *mut libc::c_void,
        cmdp: *mut u8,
        sbp: *mut u8,
        timeout: u32,
        flags: u32,
        pack_id: i32,
        usr_ptr: *mut libc::c_void,
        status: u8,
        masked_status: u8,
        msg_status: u8,
        sb_len_wr: u8,
        host_status: u16,
        driver_status: u16,
        resid: i32,
        duration: u32,
        info: u32,
    }

    /// SCSI generic pass-through over a device node like `/dev/sr0`.
    pub struct SgDevice {
        file: File,
    }

    impl SgDevice {
        pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
            let file = OpenOptions::new().read(true).write(true).open(path)?;
            Ok(Self { file })
        }
    }

    impl CommandTransport for SgDevice {
        fn transfer(
            &mut self,
            cdb: &[u8; CDB_LEN],
            data: DataTransfer<'_>,
        ) -> Result<(), TransportError> {
            let mut cdb = *cdb;
            let mut sense = [0u8; SENSE_LEN];

            let (direction, dxfer_len, dxferp) = match data {
                DataTransfer::None => (SG_DXFER_NONE, 0, ptr::null_mut()),
                DataTransfer::FromDevice(buf) => (
                    SG_DXFER_FROM_DEV,
                    buf.len() as u32,
                    buf.as_mut_ptr() as *mut libc::c_void,
                ),
                DataTransfer::ToDevice(buf) => (
                    SG_DXFER_TO_DEV,
                    buf.len() as u32,
                    buf.as_ptr() as *mut libc::c_void,
                ),
            };

            let mut hdr: SgIoHdr = unsafe { std::mem::zeroed() };
            hdr.interface_id = 'S' as i32;
            hdr.dxfer_direction = direction;
            hdr.cmd_len = cdb_len(cdb[0]);
            hdr.mx_sb_len = SENSE_LEN as u8;
            hdr.dxfer_len = dxfer_len;
            hdr.dxferp = dxferp;
            hdr.cmdp = cdb.as_mut_ptr();
            hdr.sbp = sense.as_mut_ptr();
            hdr.timeout = TIMEOUT_MS;

            let rc = unsafe { libc::ioctl(self.file.as_raw_fd(), SG_IO as _, &mut hdr) };
            if rc < 0 {
                return Err(io::Error::last_os_error().into());
            }

            if hdr.info & SG_INFO_OK_MASK == 0 {
                return Ok(());
            }

            // Fixed-format sense: key at byte 2, ASC/ASCQ at 12/13.
            if hdr.sb_len_wr >= 14 {
                Err(TransportError::CheckCondition {
                    key: sense[2] & 0x0F,
                    asc: sense[12],
                    ascq: sense[13],
                })
            } else {
                Err(TransportError::Failed {
                    host: hdr.host_status,
                    driver: hdr.driver_status,
                })
            }
        }
    }

    /// Opens the drive at `path` for pass-through access.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Box<dyn CommandTransport>> {
        Ok(Box::new(SgDevice::open(path)?))
    }
}

#[cfg(not(target_os = "linux"))]
pub fn open(_path: impl AsRef<std::path::Path>) -> io::Result<Box<dyn CommandTransport>> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "SCSI pass-through is only available on Linux",
    ))
}
