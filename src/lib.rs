//! Library for the optical drive firmware flash utility.
//! Provides reusable modules for firmware image decoding, checksums,
//! vendor command framing and the SCSI pass-through transport.

pub mod checksum;
pub mod flash;
pub mod frame;
pub mod image;
pub mod record;
pub mod scsi;
