//! JeeLabs signed varints
//!
//! Each value is zig-zag mapped (`v << 1`, inverted for negatives) and
//! written as big-endian 7-bit groups. The last byte of a value has its top
//! bit set, so zero is the single byte `0x80`.

/// Encode a sequence of signed values
pub fn encode(values: &[i64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 2);
    for &v in values {
        let mut u = (v as u64) << 1;
        if v < 0 {
            u = !u;
        }
        if u == 0 {
            out.push(0x80);
            continue;
        }

        let mut groups = [0u8; 10];
        let mut i = groups.len();
        while u != 0 {
            i -= 1;
            groups[i] = (u & 0x7f) as u8;
            u >>= 7;
        }
        groups[groups.len() - 1] |= 0x80;
        out.extend_from_slice(&groups[i..]);
    }
    out
}

/// Decode a buffer of varints
///
/// Bytes after the last terminated value are ignored.
pub fn decode(buf: &[u8]) -> Vec<i64> {
    let mut out = Vec::new();
    let mut acc: u64 = 0;
    for &b in buf {
        acc = (acc << 7) | u64::from(b & 0x7f);
        if b & 0x80 != 0 {
            let v = if acc & 1 == 0 { acc >> 1 } else { !(acc >> 1) };
            out.push(v as i64);
            acc = 0;
        }
    }
    out
}
