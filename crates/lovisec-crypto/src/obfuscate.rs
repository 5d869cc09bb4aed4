use anyhow::{Result, bail};
use base64::Engine as _;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use tracing::warn;

/// Shared obfuscation key. Changing it breaks every stored `encrypted_content`.
pub const OBFUSCATION_KEY: &[u8] = b"LOVISEC_2025_SECURE_KEY_V1";

/// Standard alphabet, padded on encode. Decoding takes input with or without
/// padding, as browsers' `atob` does.
const BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// XOR each UTF-16 code unit of `text` with the repeating key, then Base64 the
/// resulting bytes.
///
/// Every XOR result must fit in one byte, so text outside Latin-1 is rejected.
pub fn obfuscate(text: &str) -> Result<String> {
    let mut bytes = Vec::with_capacity(text.len());

    for (i, unit) in text.encode_utf16().enumerate() {
        let mixed = unit ^ u16::from(key_byte(i));
        if mixed > 0xFF {
            bail!(
                "character U+{:04X} at position {} cannot be obfuscated",
                unit,
                i
            );
        }
        bytes.push(mixed as u8);
    }

    Ok(BASE64.encode(bytes))
}

/// Inverse of [`obfuscate`]. ASCII whitespace anywhere in the input is
/// skipped. Malformed input is logged and yields an empty string instead of
/// an error.
pub fn reveal(encoded: &str) -> String {
    let compact: String = encoded
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();

    let bytes = match BASE64.decode(compact) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Failed to reveal obfuscated text: {}", e);
            return String::new();
        }
    };

    bytes
        .iter()
        .enumerate()
        .map(|(i, b)| char::from(b ^ key_byte(i)))
        .collect()
}

fn key_byte(i: usize) -> u8 {
    OBFUSCATION_KEY[i % OBFUSCATION_KEY.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn obfuscate_reveal_roundtrip() {
        let text = "Nunca le dije a nadie que odio el café ñoño";
        let encoded = obfuscate(text).unwrap();
        assert_ne!(encoded, text);
        assert_eq!(reveal(&encoded), text);
    }

    #[test]
    fn matches_known_encoding() {
        // "L" ^ "L" == 0, "O" ^ "O" == 0
        assert_eq!(obfuscate("LO").unwrap(), "AAA=");
        assert_eq!(obfuscate("").unwrap(), "");
    }

    #[test]
    fn key_repeats_past_its_length() {
        let text = "x".repeat(OBFUSCATION_KEY.len() * 3 + 5);
        assert_eq!(reveal(&obfuscate(&text).unwrap()), text);
    }

    #[test]
    fn reveal_accepts_unpadded_and_wrapped_input() {
        let encoded = obfuscate("hola").unwrap();
        assert!(encoded.ends_with('='));

        let unpadded = encoded.trim_end_matches('=');
        assert_eq!(reveal(unpadded), "hola");

        let wrapped = format!("{}\n {}", &encoded[..3], &encoded[3..]);
        assert_eq!(reveal(&wrapped), "hola");
    }

    #[test]
    fn garbage_reveals_to_empty() {
        assert_eq!(reveal("not base64 at all!!"), "");
        assert_eq!(reveal("%%%"), "");
    }

    #[test]
    fn rejects_text_outside_latin1() {
        assert!(obfuscate("secreto 🤫").is_err());
        assert!(obfuscate("€").is_err());
    }
}
