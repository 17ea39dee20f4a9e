//! Record framing: varint length prefix (LEB128, as protobuf delimited streams) + payload.

const MAX_VARINT_LEN: usize = 10;
const MAX_RECORD_LEN: u64 = 16 * 1024 * 1024; // 16 MiB

/// Append one length-delimited record to `out`.
pub fn encode_record(payload: &[u8], out: &mut Vec<u8>) {
    let mut len = payload.len() as u64;
    loop {
        let byte = (len & 0x7f) as u8;
        len >>= 7;
        if len == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
    out.extend_from_slice(payload);
}

/// Decode one record from the front of `bytes`. Returns the payload and the number of bytes consumed.
/// Call with a partial buffer; `NeedMore` means read more and try again.
pub fn decode_record(bytes: &[u8]) -> Result<(&[u8], usize), RecordDecodeError> {
    let mut len: u64 = 0;
    let mut header = 0;
    loop {
        if header == MAX_VARINT_LEN {
            return Err(RecordDecodeError::BadVarint);
        }
        let Some(&byte) = bytes.get(header) else {
            return Err(RecordDecodeError::NeedMore);
        };
        len |= u64::from(byte & 0x7f) << (7 * header);
        header += 1;
        if byte & 0x80 == 0 {
            break;
        }
    }
    if len > MAX_RECORD_LEN {
        return Err(RecordDecodeError::TooLarge(len));
    }
    let end = header + len as usize;
    if bytes.len() < end {
        return Err(RecordDecodeError::NeedMore);
    }
    Ok((&bytes[header..end], end))
}

/// Error decoding a record (need more bytes, too large, or malformed prefix).
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum RecordDecodeError {
    #[error("need more bytes")]
    NeedMore,
    #[error("record too large ({0} bytes)")]
    TooLarge(u64),
    #[error("malformed length prefix")]
    BadVarint,
}
