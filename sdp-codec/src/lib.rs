//! Compression + encoding for WebRTC session description blobs.
//!
//! A [`SessionDescription`] carries the raw SDP text plus the two
//! rendezvous URIs used to exchange offer and answer between host and
//! guest. [`SessionDescription::encode`] deflates the SDP field,
//! base58-encodes it in place, then base58-encodes the whole JSON
//! struct again so the result is safe to paste into a shell command.
//! [`SessionDescription::decode`] reverses both steps.
//!
//! ```
//! use sdp_codec::SessionDescription;
//!
//! let sd = SessionDescription {
//!     sdp: "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\n".to_string(),
//!     sdp_uri: "https://example.test/p/abc".to_string(),
//!     sdp_answer_uri: "https://example.test/p/def".to_string(),
//! };
//! let encoded = sd.encode().unwrap();
//! let decoded = SessionDescription::decode(&encoded).unwrap();
//! assert_eq!(sd, decoded);
//! ```

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while encoding or decoding a [`SessionDescription`].
///
/// The variants mirror the three ways the wire format can be malformed,
/// matching the codec error taxonomy in the pairing specification.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The outer or inner base58 payload did not decode to valid bytes.
    #[error("malformed base58: {0}")]
    Base58(#[from] bs58::decode::Error),
    /// The decoded bytes were not valid JSON for [`SessionDescription`].
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),
    /// The SDP field failed to deflate or inflate.
    #[error("zlib failure: {0}")]
    Zlib(#[from] std::io::Error),
}

/// `{SDP, SDPURI, SDPAnswerURI}` exchanged to bootstrap a WebRTC
/// connection. `sdp` holds plaintext SDP before [`encode`](Self::encode)
/// and after [`decode`](Self::decode); in between it is the base58
/// representation of the zlib-deflated text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Raw SDP text (offer or answer).
    #[serde(rename = "SDP")]
    pub sdp: String,
    /// Rendezvous URI the offer is PUT to / GET from.
    #[serde(rename = "SDPURI")]
    pub sdp_uri: String,
    /// Rendezvous URI the answer is PUT to / GET from.
    #[serde(rename = "SDPAnswerURI")]
    pub sdp_answer_uri: String,
}

impl SessionDescription {
    /// Deflate `sdp`, base58-encode it, JSON-marshal the struct, then
    /// base58-encode the whole thing so it is safe to paste on a
    /// command line.
    pub fn encode(&self) -> Result<String, CodecError> {
        let mut deflated = SessionDescription {
            sdp: String::new(),
            sdp_uri: self.sdp_uri.clone(),
            sdp_answer_uri: self.sdp_answer_uri.clone(),
        };

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(self.sdp.as_bytes())?;
        let compressed = encoder.finish()?;
        deflated.sdp = bs58::encode(compressed).into_string();

        let json = serde_json::to_vec(&deflated)?;
        Ok(bs58::encode(json).into_string())
    }

    /// Reverse of [`encode`](Self::encode).
    pub fn decode(encoded: &str) -> Result<Self, CodecError> {
        let json = bs58::decode(encoded).into_vec()?;
        let mut sd: SessionDescription = serde_json::from_slice(&json)?;

        let compressed = bs58::decode(&sd.sdp).into_vec()?;
        let mut decoder = ZlibDecoder::new(compressed.as_slice());
        let mut sdp = String::new();
        decoder.read_to_string(&mut sdp)?;
        sd.sdp = sdp;

        Ok(sd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn random_ascii(len: usize) -> String {
        let mut rng = rand::rng();
        (0..len)
            .map(|_| rng.random_range(0x20u8..0x7e) as char)
            .collect()
    }

    #[test]
    fn round_trips_small_sdp() {
        let sd = SessionDescription {
            sdp: "v=0\r\na=sendrecv\r\n".to_string(),
            sdp_uri: "https://example.test/p/offer".to_string(),
            sdp_answer_uri: "https://example.test/p/answer".to_string(),
        };
        let encoded = sd.encode().unwrap();
        assert_eq!(SessionDescription::decode(&encoded).unwrap(), sd);
    }

    #[test]
    fn round_trips_4kib_random_ascii_sdp() {
        let sd = SessionDescription {
            sdp: random_ascii(4096),
            sdp_uri: "https://example.test/p/a".to_string(),
            sdp_answer_uri: "https://example.test/p/b".to_string(),
        };
        let encoded = sd.encode().unwrap();
        assert_eq!(SessionDescription::decode(&encoded).unwrap(), sd);
    }

    #[test]
    fn round_trips_up_to_64kib() {
        for len in [0, 1, 4096, 65536] {
            let sd = SessionDescription {
                sdp: random_ascii(len),
                sdp_uri: "https://example.test/p/a".to_string(),
                sdp_answer_uri: "https://example.test/p/b".to_string(),
            };
            let encoded = sd.encode().unwrap();
            assert_eq!(SessionDescription::decode(&encoded).unwrap(), sd, "len={len}");
        }
    }

    #[test]
    fn encoded_form_is_shell_safe() {
        let sd = SessionDescription {
            sdp: "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=-\r\n".to_string(),
            sdp_uri: "https://example.test/p/offer".to_string(),
            sdp_answer_uri: "https://example.test/p/answer".to_string(),
        };
        let encoded = sd.encode().unwrap();
        assert!(encoded
            .chars()
            .all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn decode_rejects_malformed_base58() {
        let err = SessionDescription::decode("not-valid-base58!!!").unwrap_err();
        assert!(matches!(err, CodecError::Base58(_)));
    }

    #[test]
    fn decode_rejects_malformed_json() {
        let encoded = bs58::encode(b"not json").into_string();
        let err = SessionDescription::decode(&encoded).unwrap_err();
        assert!(matches!(err, CodecError::Json(_)));
    }

    #[test]
    fn decode_rejects_bad_inner_zlib() {
        let bogus = SessionDescription {
            sdp: bs58::encode(b"not zlib data").into_string(),
            sdp_uri: "u".to_string(),
            sdp_answer_uri: "a".to_string(),
        };
        let json = serde_json::to_vec(&bogus).unwrap();
        let encoded = bs58::encode(json).into_string();
        let err = SessionDescription::decode(&encoded).unwrap_err();
        assert!(matches!(err, CodecError::Zlib(_)));
    }
}
