use std::cmp;
use std::fmt::Write;

/// Formats bytes as a canonical hex display.
///
/// Each line shows the absolute offset in hexadecimal, followed by up to sixteen
/// space-separated, two column, hexadecimal bytes, followed by the same bytes as ASCII
/// with control characters replaced by dots.
pub fn format_hexdump(data: &[u8], offset: usize) -> String {
    let mut out = String::new();
    let mut address = 0;

    while address < data.len() {
        // Read next 16 bytes or until end of data
        let end = cmp::min(address + 16, data.len());
        if !out.is_empty() {
            out.push('\n');
        }
        format_line(&mut out, &data[address..end], address + offset);
        address += 16;
    }

    out
}

fn format_line(out: &mut String, line: &[u8], address: usize) {
    // address (ex - 000000d0)
    let _ = write!(out, "{:08x}:", address);

    for byte in line {
        let _ = write!(out, " {:02x}", byte);
    }

    // align the ASCII column on short lines
    for _ in line.len()..16 {
        out.push_str("   ");
    }

    out.push_str("  ");
    for &c in line {
        match (c as char).is_ascii_graphic() || c == b' ' {
            true => out.push(c as char),
            false => out.push('.'),
        }
    }
}
