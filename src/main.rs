use clap::Parser;
use std::fs;
use std::io::{BufRead, Write};
use std::time::Duration;

use odflash::checksum::sum16;
use odflash::flash::{
    commit, firmware_identity, inquiry, upload_checksum, upload_firmware, wait_ready,
};
use odflash::image::{FLASH_SIZE, load_image};
use odflash::scsi;

#[derive(Parser, Debug)]
#[command(name = "odflash", about = "BTC DVD recorder firmware flash utility")]
struct Args {
    /// Drive device path (e.g. /dev/sr0)
    #[arg(value_name = "DEVICE")]
    device: String,

    /// Firmware file (vendor .HEX dialect or raw 1 MiB .BIN)
    #[arg(value_name = "FIRMWARE")]
    firmware: String,

    /// Skip the interactive confirmation prompt.
    #[arg(long, env = "ODFLASH_YES")]
    yes: bool,
}

fn main() {
    let args = Args::parse();

    println!("BTC DVD+/-RW firmware flash utility");
    println!("USE AT YOUR OWN RISK!\n");

    let mut port = scsi::open(&args.device).expect("Failed to open drive");

    // Decode fully before touching the drive; a bad image must never reach it.
    let raw = fs::read(&args.firmware).expect("Failed to read firmware file");
    let image = load_image(&raw, FLASH_SIZE)
        .unwrap_or_else(|err| panic!("{}: {err}", args.firmware));

    let checksum = sum16(image.as_bytes());
    println!("Loaded firmware from {}", args.firmware);
    println!("Firmware checksum is {checksum:04X}");

    let drive = inquiry(&mut *port).expect("INQUIRY failed");
    let firmware = firmware_identity(&image);
    println!("Drive is currently:     {drive}");
    println!("Firmware appears to be: {firmware}\n");

    if !firmware.same_model(&drive) {
        println!("**********************************************************");
        println!("WARNING! THIS FIRMWARE DOES NOT SEEM TO BE FOR THIS DRIVE!");
        println!("**********************************************************");
    }

    if !args.yes {
        print!("Type \"YES\" to proceed with flash: ");
        std::io::stdout().flush().expect("Failed to flush stdout");

        let mut confirm = String::new();
        std::io::stdin()
            .lock()
            .read_line(&mut confirm)
            .expect("Failed to read confirmation");
        if confirm.trim() != "YES" {
            println!("\nFlash canceled.");
            return;
        }
        println!();
    }

    upload_firmware(&mut *port, &image).expect("Firmware upload failed");
    upload_checksum(&mut *port, checksum).expect("Checksum upload failed");

    println!("Flashing drive...");
    commit(&mut *port).expect("Flash commit failed");

    // Let the drive sit for a while before bothering it.
    println!("Waiting for the drive to come back...");
    wait_ready(&mut *port, Duration::from_secs(50), Duration::from_secs(1))
        .expect("Drive did not come back after flashing");

    let drive = inquiry(&mut *port).expect("INQUIRY failed after flashing");
    println!("Drive is now:           {drive}\n");
    println!("Please reboot before using the drive.");
}
