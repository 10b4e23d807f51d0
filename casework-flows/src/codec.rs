use borsh::BorshDeserialize;

use casework_types::constants::{MAX_MESSAGE_SIZE, PROTOCOL_VERSION};
use casework_types::error::CaseworkError;
use casework_types::network::SessionMessage;

/// Encode a session message as a versioned, length-prefixed frame.
///
/// Wire format: `[4-byte BE length][1-byte version][borsh payload]`
///
/// The length prefix covers the version byte and the payload.
pub fn encode_frame(msg: &SessionMessage) -> Result<Vec<u8>, CaseworkError> {
    let data = borsh::to_vec(msg).map_err(|e| CaseworkError::SerializationError {
        reason: e.to_string(),
    })?;

    if data.len() > MAX_MESSAGE_SIZE {
        return Err(CaseworkError::MessageTooLarge {
            size: data.len(),
            max_size: MAX_MESSAGE_SIZE,
        });
    }

    let len = ((1 + data.len()) as u32).to_be_bytes();
    let mut out = Vec::with_capacity(4 + 1 + data.len());
    out.extend_from_slice(&len);
    out.push(PROTOCOL_VERSION);
    out.extend_from_slice(&data);
    Ok(out)
}

/// Decode a frame produced by [`encode_frame`].
pub fn decode_frame(data: &[u8]) -> Result<SessionMessage, CaseworkError> {
    if data.len() < 4 {
        return Err(CaseworkError::InvalidMessageFormat {
            reason: "frame too short for length prefix".to_string(),
        });
    }

    let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;

    if len > MAX_MESSAGE_SIZE + 1 {
        return Err(CaseworkError::MessageTooLarge {
            size: len,
            max_size: MAX_MESSAGE_SIZE,
        });
    }

    if len < 1 {
        return Err(CaseworkError::InvalidMessageFormat {
            reason: "frame missing protocol version byte".to_string(),
        });
    }

    if data.len() != 4 + len {
        return Err(CaseworkError::InvalidMessageFormat {
            reason: format!("frame length mismatch: header says {}, got {}", 4 + len, data.len()),
        });
    }

    let version = data[4];
    if version != PROTOCOL_VERSION {
        return Err(CaseworkError::InvalidMessageFormat {
            reason: format!(
                "protocol version mismatch: peer sent v{}, we run v{}",
                version, PROTOCOL_VERSION
            ),
        });
    }

    SessionMessage::try_from_slice(&data[5..]).map_err(|e| CaseworkError::DeserializationError {
        reason: e.to_string(),
    })
}
