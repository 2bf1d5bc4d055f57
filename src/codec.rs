use crate::calc::CalcError;

/// The 0x80..=0x9F block of Windows-1252. Bytes the encoding leaves undefined
/// (0x81, 0x8D, 0x8F, 0x90, 0x9D) map to the matching C1 control code points so
/// that decode and encode stay exact inverses over all 256 byte values.
const HIGH_BLOCK: [char; 32] = [
    '\u{20AC}', '\u{0081}', '\u{201A}', '\u{0192}', '\u{201E}', '\u{2026}', '\u{2020}', '\u{2021}',
    '\u{02C6}', '\u{2030}', '\u{0160}', '\u{2039}', '\u{0152}', '\u{008D}', '\u{017D}', '\u{008F}',
    '\u{0090}', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}', '\u{2022}', '\u{2013}', '\u{2014}',
    '\u{02DC}', '\u{2122}', '\u{0161}', '\u{203A}', '\u{0153}', '\u{009D}', '\u{017E}', '\u{0178}',
];

pub fn decode_windows_1252(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        out.push(decode_byte(b));
    }
    out
}

fn decode_byte(b: u8) -> char {
    match b {
        0x80..=0x9F => HIGH_BLOCK[(b - 0x80) as usize],
        _ => b as char,
    }
}

pub fn encode_windows_1252(text: &str) -> Result<Vec<u8>, CalcError> {
    let mut out = Vec::with_capacity(text.len());
    for c in text.chars() {
        out.push(encode_char(c).ok_or_else(|| {
            CalcError::new(
                "invalid_data",
                format!("character {:?} has no Windows-1252 encoding", c),
            )
        })?);
    }
    Ok(out)
}

fn encode_char(c: char) -> Option<u8> {
    let cp = c as u32;
    if cp < 0x80 {
        return Some(cp as u8);
    }
    if let Some(i) = HIGH_BLOCK.iter().position(|&h| h == c) {
        return Some(0x80 + i as u8);
    }
    // The A0..FF range is identical to Latin-1, minus the code points that the
    // high block already claimed.
    if (0xA0..=0xFF).contains(&cp) {
        return Some(cp as u8);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_then_encode_is_identity_for_every_byte() {
        let all: Vec<u8> = (0..=255).collect();
        let text = decode_windows_1252(&all);
        let back = encode_windows_1252(&text).expect("encode");
        assert_eq!(back, all);
    }

    #[test]
    fn accented_names_survive() {
        let bytes = b"Jos\xe9;\x80\x92";
        let text = decode_windows_1252(bytes);
        assert_eq!(text, "Jos\u{e9};\u{20ac}\u{2019}");
        assert_eq!(encode_windows_1252(&text).expect("encode"), bytes);
    }

    #[test]
    fn unmappable_characters_are_rejected() {
        let err = encode_windows_1252("\u{4e2d}").expect_err("no mapping");
        assert_eq!(err.code, "invalid_data");
    }
}
