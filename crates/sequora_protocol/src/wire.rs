//! Checked primitive readers shared by the message and event decoders.

use crate::error::{ProtocolError, ProtocolResult};
use bytes::Buf;

pub(crate) fn take_u8(buf: &mut impl Buf) -> ProtocolResult<u8> {
    if buf.remaining() < 1 {
        return Err(ProtocolError::Truncated { needed: 1 });
    }
    Ok(buf.get_u8())
}

pub(crate) fn take_u16(buf: &mut impl Buf) -> ProtocolResult<u16> {
    if buf.remaining() < 2 {
        return Err(ProtocolError::Truncated {
            needed: 2 - buf.remaining(),
        });
    }
    Ok(buf.get_u16())
}

pub(crate) fn take_u32(buf: &mut impl Buf) -> ProtocolResult<u32> {
    if buf.remaining() < 4 {
        return Err(ProtocolError::Truncated {
            needed: 4 - buf.remaining(),
        });
    }
    Ok(buf.get_u32())
}

pub(crate) fn take_u64(buf: &mut impl Buf) -> ProtocolResult<u64> {
    if buf.remaining() < 8 {
        return Err(ProtocolError::Truncated {
            needed: 8 - buf.remaining(),
        });
    }
    Ok(buf.get_u64())
}

pub(crate) fn take_bytes(buf: &mut impl Buf, len: usize) -> ProtocolResult<Vec<u8>> {
    if buf.remaining() < len {
        return Err(ProtocolError::Truncated {
            needed: len - buf.remaining(),
        });
    }
    let mut out = vec![0u8; len];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

pub(crate) fn take_bool(buf: &mut impl Buf) -> ProtocolResult<bool> {
    Ok(take_u8(buf)? != 0)
}
