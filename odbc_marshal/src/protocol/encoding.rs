//! Host string ⇄ driver text. Neither direction returns an error: a cell
//! that cannot be converted strictly is converted with replacement
//! characters, and as a last resort rendered as a visible marker.

use crate::config::TextCodec;
use encoding_rs::{EncoderResult, Encoding, UTF_16BE, UTF_16LE, UTF_8};

/// Text in the representation a bind call expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodedText {
    Narrow(Vec<u8>),
    Wide(Vec<u16>),
}

impl EncodedText {
    /// Length in buffer units (bytes for narrow, UTF-16 units for wide).
    pub fn unit_len(&self) -> usize {
        match self {
            EncodedText::Narrow(b) => b.len(),
            EncodedText::Wide(w) => w.len(),
        }
    }

    pub fn byte_len(&self) -> usize {
        match self {
            EncodedText::Narrow(b) => b.len(),
            EncodedText::Wide(w) => w.len() * 2,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            EncodedText::Narrow(b) => b.clone(),
            EncodedText::Wide(w) => w.iter().flat_map(|u| u.to_le_bytes()).collect(),
        }
    }
}

pub fn resolve(label: &str) -> Option<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes())
}

pub fn encode_wide(text: &str) -> Vec<u16> {
    text.encode_utf16().collect()
}

/// Encodes for the codec's C type. A `SQL_C_CHAR` codec with a UTF-16 label
/// produces UTF-16 bytes in a narrow buffer.
pub fn encode(text: &str, codec: &TextCodec) -> EncodedText {
    if codec.is_wide() {
        return EncodedText::Wide(encode_wide(text));
    }
    EncodedText::Narrow(encode_narrow(text, &codec.encoding))
}

pub fn encode_narrow(text: &str, label: &str) -> Vec<u8> {
    let Some(encoding) = resolve(label) else {
        log::warn!("Unknown encoding {:?}; encoding text as UTF-8", label);
        return text.as_bytes().to_vec();
    };
    if encoding == UTF_16LE {
        return text.encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
    }
    if encoding == UTF_16BE {
        return text.encode_utf16().flat_map(|u| u.to_be_bytes()).collect();
    }
    if encoding == UTF_8 {
        return text.as_bytes().to_vec();
    }
    if let Some(strict) = encode_with(encoding, text, false) {
        return strict;
    }
    log::warn!(
        "Text contains characters not representable in {}; substituting '?'",
        encoding.name()
    );
    encode_with(encoding, text, true).unwrap_or_else(|| text.as_bytes().to_vec())
}

fn encode_with(encoding: &'static Encoding, text: &str, replace: bool) -> Option<Vec<u8>> {
    let mut encoder = encoding.new_encoder();
    let mut out = Vec::with_capacity(text.len());
    let mut chunk = [0u8; 1024];
    let mut src = text;
    loop {
        let (result, read, written) =
            encoder.encode_from_utf8_without_replacement(src, &mut chunk, true);
        out.extend_from_slice(&chunk[..written]);
        src = &src[read..];
        match result {
            EncoderResult::InputEmpty => return Some(out),
            EncoderResult::OutputFull => {}
            EncoderResult::Unmappable(_) if replace => out.push(b'?'),
            EncoderResult::Unmappable(_) => return None,
        }
    }
}

pub fn undecodable_marker(byte_len: usize) -> String {
    format!("<undecodable text: {} bytes>", byte_len)
}

/// Strict decode first, then replacement characters. An unknown label falls
/// back to strict UTF-8 and finally to the marker text.
pub fn decode_narrow(bytes: &[u8], label: &str) -> String {
    let Some(encoding) = resolve(label) else {
        return match std::str::from_utf8(bytes) {
            Ok(s) => s.to_string(),
            Err(_) => {
                log::warn!(
                    "Unknown encoding {:?} and bytes are not UTF-8; returning marker",
                    label
                );
                undecodable_marker(bytes.len())
            }
        };
    };
    if let Some(strict) = encoding.decode_without_bom_handling_and_without_replacement(bytes) {
        return strict.into_owned();
    }
    log::warn!(
        "Invalid {} sequence in {} byte cell; decoding with replacement",
        encoding.name(),
        bytes.len()
    );
    let (text, _had_errors) = encoding.decode_without_bom_handling(bytes);
    text.into_owned()
}

/// A trailing unpaired high surrogate is dropped; other invalid units become
/// replacement characters.
pub fn decode_wide(units: &[u16]) -> String {
    let units = match units.split_last() {
        Some((&last, rest)) if (0xD800..=0xDBFF).contains(&last) => {
            log::warn!("Wide text ends in unpaired high surrogate {:#06x}; dropping it", last);
            rest
        }
        _ => units,
    };
    match String::from_utf16(units) {
        Ok(s) => s,
        Err(_) => {
            log::warn!(
                "Invalid UTF-16 in {} unit cell; decoding with replacement",
                units.len()
            );
            String::from_utf16_lossy(units)
        }
    }
}

/// UTF-16LE bytes from a driver buffer. An odd trailing byte is dropped.
pub fn decode_wide_bytes(bytes: &[u8]) -> String {
    if bytes.len() % 2 != 0 {
        log::warn!(
            "Wide character data has odd byte length {}; dropping trailing byte",
            bytes.len()
        );
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    decode_wide(&units)
}

/// Decodes a cell according to the codec configured for its column family.
pub fn decode(bytes: &[u8], codec: &TextCodec) -> String {
    if codec.is_wide() {
        decode_wide_bytes(bytes)
    } else {
        decode_narrow(bytes, &codec.encoding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CType;

    fn codec(label: &str, c_type: CType) -> TextCodec {
        TextCodec {
            encoding: label.to_string(),
            c_type,
        }
    }

    #[test]
    fn test_wide_surrogate_pairs() {
        let text = "😀a";
        let wide = encode_wide(text);
        assert_eq!(wide.len(), 3);
        assert_eq!(decode_wide(&wide), text);
    }

    #[test]
    fn test_narrow_strict_then_replace() {
        assert_eq!(encode_narrow("café", "latin1"), vec![b'c', b'a', b'f', 0xE9]);
        assert_eq!(encode_narrow("a€b", "iso-8859-2"), b"a?b".to_vec());
        assert_eq!(encode_narrow("日本", "ascii"), b"??".to_vec());
    }

    #[test]
    fn test_unknown_label_falls_back_to_utf8() {
        assert_eq!(encode_narrow("é", "no-such-codec"), "é".as_bytes().to_vec());
        assert_eq!(decode_narrow("é".as_bytes(), "no-such-codec"), "é");
        assert_eq!(
            decode_narrow(&[0xff, 0xfe, 0x00], "no-such-codec"),
            "<undecodable text: 3 bytes>"
        );
    }

    #[test]
    fn test_decode_invalid_utf8_replaces() {
        let decoded = decode_narrow(&[b'o', b'k', 0xC3], "utf-8");
        assert_eq!(decoded, "ok\u{FFFD}");
    }

    #[test]
    fn test_decode_lone_surrogate_replaces() {
        assert_eq!(decode_wide(&[0x0061, 0xD800, 0x0062]), "a\u{FFFD}b");
    }

    #[test]
    fn test_trailing_high_surrogate_dropped() {
        assert_eq!(decode_wide(&[0x0061, 0x0062, 0xD83D]), "ab");
        // a trailing low surrogate is not a split pair
        assert_eq!(decode_wide(&[0x0061, 0xDC00]), "a\u{FFFD}");
    }

    #[test]
    fn test_codec_dispatch() {
        let wide = encode("hé", &codec("utf-16le", CType::WCHAR));
        assert_eq!(wide, EncodedText::Wide(vec![0x68, 0xE9]));
        assert_eq!(wide.byte_len(), 4);
        let narrow_utf16 = encode("hé", &codec("utf-16le", CType::CHAR));
        assert_eq!(narrow_utf16, EncodedText::Narrow(vec![0x68, 0, 0xE9, 0]));
        assert_eq!(
            decode(&[0x68, 0, 0xE9, 0], &codec("utf-16le", CType::WCHAR)),
            "hé"
        );
        assert_eq!(decode(&[0x68, 0xE9], &codec("latin1", CType::CHAR)), "hé");
    }

    #[test]
    fn test_odd_wide_bytes_drop_tail() {
        assert_eq!(decode_wide_bytes(&[0x41, 0x00, 0x42]), "A");
    }
}
