//! JSON key packets exchanged through the transport layer.
//!
//! Every field is a hex string. The typed, decoded counterparts live in
//! [`crate::x3dh`].

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Published prekey bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrekeyPacket {
    /// DER `SubjectPublicKeyInfo` of the ECDSA identity key
    pub identity_key: String,
    /// Uncompressed SEC1 signed prekey
    pub signed_prekey: String,
    /// DER ECDSA signature over the signed prekey bytes
    pub signed_key: String,
    /// Uncompressed SEC1 one-time prekey
    pub onetime_prekey: String,
}

/// Handshake initiation sent from initiator to responder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakePacket {
    pub identity_key: String,
    pub ephemeral_key: String,
    /// One-time prekey the initiator used. Older peers omit it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub onetime_prekey: Option<String>,
}

/// Ciphertext envelope, optionally carrying a handshake initiation.
///
/// On the wire the handshake fields sit next to `ciphertext`. An envelope
/// that carries only some of them does not parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "EnvelopeFields", into = "EnvelopeFields")]
pub struct EncryptedMessage {
    pub ciphertext: String,
    pub handshake: Option<HandshakePacket>,
}

#[derive(Serialize, Deserialize)]
struct EnvelopeFields {
    ciphertext: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    identity_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ephemeral_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    onetime_prekey: Option<String>,
}

impl TryFrom<EnvelopeFields> for EncryptedMessage {
    type Error = &'static str;

    fn try_from(fields: EnvelopeFields) -> std::result::Result<Self, Self::Error> {
        let handshake = match (fields.identity_key, fields.ephemeral_key, fields.onetime_prekey) {
            (None, None, None) => None,
            (Some(identity_key), Some(ephemeral_key), onetime_prekey) => Some(HandshakePacket {
                identity_key,
                ephemeral_key,
                onetime_prekey,
            }),
            _ => return Err("envelope carries an incomplete handshake"),
        };

        Ok(Self {
            ciphertext: fields.ciphertext,
            handshake,
        })
    }
}

impl From<EncryptedMessage> for EnvelopeFields {
    fn from(message: EncryptedMessage) -> Self {
        let (identity_key, ephemeral_key, onetime_prekey) = match message.handshake {
            Some(handshake) => (
                Some(handshake.identity_key),
                Some(handshake.ephemeral_key),
                handshake.onetime_prekey,
            ),
            None => (None, None, None),
        };

        Self {
            ciphertext: message.ciphertext,
            identity_key,
            ephemeral_key,
            onetime_prekey,
        }
    }
}

macro_rules! impl_json {
    ($($packet:ty),+) => {
        $(
            impl $packet {
                pub fn to_json(&self) -> Result<String> {
                    Ok(serde_json::to_string(self)?)
                }

                pub fn from_json(json: &str) -> Result<Self> {
                    Ok(serde_json::from_str(json)?)
                }
            }
        )+
    };
}

impl_json!(PrekeyPacket, HandshakePacket, EncryptedMessage);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_prekey_packet_field_names() {
        let packet = PrekeyPacket {
            identity_key: "01".into(),
            signed_prekey: "02".into(),
            signed_key: "03".into(),
            onetime_prekey: "04".into(),
        };
        let json: serde_json::Value = serde_json::from_str(&packet.to_json().unwrap()).unwrap();
        assert_eq!(json["identity_key"], "01");
        assert_eq!(json["signed_prekey"], "02");
        assert_eq!(json["signed_key"], "03");
        assert_eq!(json["onetime_prekey"], "04");
    }

    #[test]
    fn test_handshake_packet_without_onetime_prekey() {
        let packet =
            HandshakePacket::from_json(r#"{"identity_key":"aa","ephemeral_key":"bb"}"#).unwrap();
        assert_eq!(packet.onetime_prekey, None);
        assert!(!packet.to_json().unwrap().contains("onetime_prekey"));
    }

    #[test]
    fn test_envelope_flattens_handshake() {
        let plain = EncryptedMessage {
            ciphertext: "ff".into(),
            handshake: None,
        };
        assert_eq!(plain.to_json().unwrap(), r#"{"ciphertext":"ff"}"#);

        let json = r#"{"ciphertext":"ff","identity_key":"aa","ephemeral_key":"bb"}"#;
        let envelope = EncryptedMessage::from_json(json).unwrap();
        let handshake = envelope.handshake.unwrap();
        assert_eq!(handshake.identity_key, "aa");
        assert_eq!(handshake.ephemeral_key, "bb");
    }

    #[test]
    fn test_envelope_with_onetime_prekey() {
        let envelope = EncryptedMessage {
            ciphertext: "ff".into(),
            handshake: Some(HandshakePacket {
                identity_key: "aa".into(),
                ephemeral_key: "bb".into(),
                onetime_prekey: Some("cc".into()),
            }),
        };
        let json = envelope.to_json().unwrap();
        assert_eq!(
            json,
            r#"{"ciphertext":"ff","identity_key":"aa","ephemeral_key":"bb","onetime_prekey":"cc"}"#
        );
        assert_eq!(EncryptedMessage::from_json(&json).unwrap(), envelope);
    }

    #[test]
    fn test_envelope_with_partial_handshake_rejected() {
        for json in [
            r#"{"ciphertext":"ff","identity_key":"aa"}"#,
            r#"{"ciphertext":"ff","ephemeral_key":"bb"}"#,
            r#"{"ciphertext":"ff","onetime_prekey":"cc"}"#,
            r#"{"ciphertext":"ff","identity_key":"aa","ephemeral_key":5}"#,
            r#"{"ciphertext":"ff","identity_key":"aa","ephemeral_key":"bb","onetime_prekey":[]}"#,
        ] {
            assert_eq!(
                EncryptedMessage::from_json(json).unwrap_err(),
                Error::Serialization,
                "{json}"
            );
        }
    }

    #[test]
    fn test_malformed_json() {
        assert_eq!(PrekeyPacket::from_json("{}").unwrap_err(), Error::Serialization);
    }
}
