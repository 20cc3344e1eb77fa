//! List connected RTL-SDR dongles.
//!
//! ```sh
//! cargo run --example rtl_info
//! ```

use std::process;

fn main() {
    let count = match dynsdr::rtlsdr::device_count() {
        Ok(count) => count,
        Err(err) => {
            eprintln!("error: {err}");
            process::exit(1);
        }
    };
    if count == 0 {
        eprintln!("no supported devices found");
        process::exit(1);
    }
    println!("Found {count} device(s):");
    for index in 0..count {
        match dynsdr::rtlsdr::device_strings(index) {
            Ok((vendor, product, serial)) => {
                let name = dynsdr::rtlsdr::device_name(index);
                println!("  {index}:  {vendor}, {product}, SN: {serial}  [{name}]");
            }
            Err(err) => println!("  {index}:  <unreadable: {err}>"),
        }
    }
}
