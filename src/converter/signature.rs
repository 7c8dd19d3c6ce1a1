//!
//! Tool-call id codec carrying backend continuation signatures.
//!
//! The backend attaches an opaque `thoughtSignature` to function calls and
//! requires it back on the next turn. Client protocols have no field for it, so
//! it rides inside the tool-call id: `<id>__thought__<signature>`.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- constants ------------------------------------------------------------------------------- */

/// Reserved separator; caller-issued ids must not contain it
pub const SEPARATOR: &str = "__thought__";

/* --- start of code -------------------------------------------------------------------------- */

///
/// Embed a continuation signature into a client-visible tool-call id.
///
/// # Arguments
///  * `id` - original tool-call id
///  * `signature` - backend signature, if any
///
/// # Returns
///  * `id` unchanged when there is no signature, `id + SEPARATOR + signature` otherwise
pub fn encode(id: &str, signature: Option<&str>) -> String {
    match signature {
        Some(sig) if !sig.is_empty() => format!("{}{}{}", id, SEPARATOR, sig),
        _ => id.to_string(),
    }
}

///
/// Split a client-visible tool-call id back into id and signature.
///
/// # Arguments
///  * `encoded` - id as received from the client
///
/// # Returns
///  * `(id, Some(signature))` when the separator is present with a non-empty suffix
pub fn decode(encoded: &str) -> (String, Option<String>) {
    match encoded.split_once(SEPARATOR) {
        Some((id, sig)) if !sig.is_empty() => (id.to_string(), Some(sig.to_string())),
        Some((id, _)) => (id.to_string(), None),
        None => (encoded.to_string(), None),
    }
}

/* --- tests ----------------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_survives_round_trip() {
        let cases = [
            ("call_1", "EqQBCg"),
            ("toolu_01ABC", "sig/with+base64=="),
            ("x", "a__b"),
        ];
        for (id, sig) in cases {
            let encoded = encode(id, Some(sig));
            assert_eq!(decode(&encoded), (id.to_string(), Some(sig.to_string())));
        }
    }

    #[test]
    fn test_plain_ids_pass_through() {
        assert_eq!(encode("call_1", None), "call_1");
        assert_eq!(encode("call_1", Some("")), "call_1");
        assert_eq!(decode("call_1"), ("call_1".to_string(), None));
        assert_eq!(decode("call_1__thought__"), ("call_1".to_string(), None));
    }
}
