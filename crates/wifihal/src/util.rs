//! Small formatting helpers.

use std::fmt::Write;

/// Format a byte buffer as a hexdump for trace logging.
///
/// One line per 16 bytes, offset-prefixed.
pub fn hexdump(bytes: &[u8]) -> String {
    let mut out = String::new();
    for (i, chunk) in bytes.chunks(16).enumerate() {
        let _ = write!(out, "{:04x}:", i * 16);
        for b in chunk {
            let _ = write!(out, " {:02x}", b);
        }
        out.push('\n');
    }
    out
}
