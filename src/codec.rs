//! Base64 and base64url conversion with RFC 2045 line wrapping
//!
//! Gmail transports raw messages and attachment bodies as unpadded base64url,
//! while MIME part bodies inside a message use standard base64 wrapped at 76
//! characters per line.

use base64::engine::DecodePaddingMode;
use base64::engine::general_purpose::{
    GeneralPurpose, GeneralPurposeConfig, STANDARD, URL_SAFE_NO_PAD,
};
use base64::{DecodeError, Engine, alphabet};

use crate::errors::{AppError, AppResult};

/// Maximum encoded line length for `Content-Transfer-Encoding: base64` bodies
pub const BASE64_LINE_LEN: usize = 76;

const CRLF: &str = "\r\n";

/// base64url decoder that accepts optional padding and non-zero trailing bits
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_decode_allow_trailing_bits(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Encode bytes as unpadded base64url (`-`/`_` alphabet)
pub fn encode_base64_url(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decode base64url text, padded or not
///
/// # Errors
///
/// Returns `Decode` if the input contains characters outside the base64url
/// alphabet or has a length of `4n + 1`, which no amount of padding can repair.
pub fn decode_base64_url(data: &str) -> AppResult<Vec<u8>> {
    URL_SAFE_LENIENT.decode(data).map_err(|e| match e {
        DecodeError::InvalidByte(offset, byte) => AppError::Decode(format!(
            "invalid base64url character {:?} at offset {offset}",
            char::from(byte)
        )),
        DecodeError::InvalidLength(_) => {
            AppError::Decode("base64url data has an impossible length".to_owned())
        }
        other => AppError::Decode(format!("invalid base64url data: {other}")),
    })
}

/// Encode bytes as standard base64 wrapped into CRLF-separated 76-char lines
pub fn encode_base64_wrapped(bytes: &[u8]) -> String {
    wrap_base64(&STANDARD.encode(bytes))
}

/// Split encoded text into lines of at most 76 characters joined with CRLF
///
/// The final line may be shorter. Empty input yields an empty string.
pub fn wrap_base64(data: &str) -> String {
    let mut out = String::with_capacity(data.len() + (data.len() / BASE64_LINE_LEN) * CRLF.len());
    for (idx, ch) in data.chars().enumerate() {
        if idx > 0 && idx % BASE64_LINE_LEN == 0 {
            out.push_str(CRLF);
        }
        out.push(ch);
    }
    out
}

/// Decode lenient standard base64 supplied by a tool caller
///
/// Whitespace (including CRLF line wrapping) is ignored and padding is
/// optional; base64url input is accepted as well.
///
/// # Errors
///
/// Returns `Decode` if the remaining characters are not valid base64.
pub fn decode_base64_lenient(data: &str) -> AppResult<Vec<u8>> {
    let compact: String = data
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            other => other,
        })
        .collect();
    decode_base64_url(&compact)
}
