//! BIP 157 compact-filter messages: filters, filter headers and
//! checkpoints

use crate::envelope::Message;
use crate::error::Result;
use crate::varint::{encode_varint, read_bytes, read_u32_le, read_varint, read_vec};
use std::io::Read;

/// The only filter type defined by BIP 158.
pub const FILTER_TYPE_BASIC: u8 = 0x00;

/// Request a range of compact filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetCFiltersMessage {
    pub filter_type: u8,
    pub start_height: u32,
    pub stop_hash: [u8; 32],
}

impl GetCFiltersMessage {
    pub fn parse<R: Read>(r: &mut R) -> Result<GetCFiltersMessage> {
        Ok(GetCFiltersMessage {
            filter_type: read_bytes::<_, 1>(r)?[0],
            start_height: read_u32_le(r)?,
            stop_hash: read_bytes(r)?,
        })
    }
}

impl Message for GetCFiltersMessage {
    fn command(&self) -> &str {
        "getcfilters"
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut out = vec![self.filter_type];
        out.extend_from_slice(&self.start_height.to_le_bytes());
        out.extend_from_slice(&self.stop_hash);
        Ok(out)
    }
}

/// One compact filter for one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CFilterMessage {
    pub filter_type: u8,
    pub block_hash: [u8; 32],
    pub filter_bytes: Vec<u8>,
}

impl CFilterMessage {
    pub fn parse<R: Read>(r: &mut R) -> Result<CFilterMessage> {
        let filter_type = read_bytes::<_, 1>(r)?[0];
        let block_hash = read_bytes(r)?;
        let len = read_varint(r)? as usize;
        let filter_bytes = read_vec(r, len)?;
        Ok(CFilterMessage {
            filter_type,
            block_hash,
            filter_bytes,
        })
    }
}

impl Message for CFilterMessage {
    fn command(&self) -> &str {
        "cfilter"
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut out = vec![self.filter_type];
        out.extend_from_slice(&self.block_hash);
        out.extend_from_slice(&encode_varint(self.filter_bytes.len() as u64));
        out.extend_from_slice(&self.filter_bytes);
        Ok(out)
    }
}

/// Request a range of filter headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetCFHeadersMessage {
    pub filter_type: u8,
    pub start_height: u32,
    pub stop_hash: [u8; 32],
}

impl GetCFHeadersMessage {
    pub fn parse<R: Read>(r: &mut R) -> Result<GetCFHeadersMessage> {
        Ok(GetCFHeadersMessage {
            filter_type: read_bytes::<_, 1>(r)?[0],
            start_height: read_u32_le(r)?,
            stop_hash: read_bytes(r)?,
        })
    }
}

impl Message for GetCFHeadersMessage {
    fn command(&self) -> &str {
        "getcfheaders"
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut out = vec![self.filter_type];
        out.extend_from_slice(&self.start_height.to_le_bytes());
        out.extend_from_slice(&self.stop_hash);
        Ok(out)
    }
}

/// Filter-header chain segment: the header before the range plus one
/// filter hash per block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CFHeadersMessage {
    pub filter_type: u8,
    pub stop_hash: [u8; 32],
    pub prev_filter_header: [u8; 32],
    pub filter_hashes: Vec<[u8; 32]>,
}

impl CFHeadersMessage {
    pub fn parse<R: Read>(r: &mut R) -> Result<CFHeadersMessage> {
        let filter_type = read_bytes::<_, 1>(r)?[0];
        let stop_hash = read_bytes(r)?;
        let prev_filter_header = read_bytes(r)?;
        let count = read_varint(r)?;
        let mut filter_hashes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            filter_hashes.push(read_bytes(r)?);
        }
        Ok(CFHeadersMessage {
            filter_type,
            stop_hash,
            prev_filter_header,
            filter_hashes,
        })
    }
}

impl Message for CFHeadersMessage {
    fn command(&self) -> &str {
        "cfheaders"
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut out = vec![self.filter_type];
        out.extend_from_slice(&self.stop_hash);
        out.extend_from_slice(&self.prev_filter_header);
        out.extend_from_slice(&encode_varint(self.filter_hashes.len() as u64));
        for hash in &self.filter_hashes {
            out.extend_from_slice(hash);
        }
        Ok(out)
    }
}

/// Request the filter-header checkpoints up to a stop hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetCFCheckptMessage {
    pub filter_type: u8,
    pub stop_hash: [u8; 32],
}

impl GetCFCheckptMessage {
    pub fn parse<R: Read>(r: &mut R) -> Result<GetCFCheckptMessage> {
        Ok(GetCFCheckptMessage {
            filter_type: read_bytes::<_, 1>(r)?[0],
            stop_hash: read_bytes(r)?,
        })
    }
}

impl Message for GetCFCheckptMessage {
    fn command(&self) -> &str {
        "getcfcheckpt"
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut out = vec![self.filter_type];
        out.extend_from_slice(&self.stop_hash);
        Ok(out)
    }
}

/// Filter headers at every 1000-block checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CFCheckptMessage {
    pub filter_type: u8,
    pub stop_hash: [u8; 32],
    pub filter_headers: Vec<[u8; 32]>,
}

impl CFCheckptMessage {
    pub fn parse<R: Read>(r: &mut R) -> Result<CFCheckptMessage> {
        let filter_type = read_bytes::<_, 1>(r)?[0];
        let stop_hash = read_bytes(r)?;
        let count = read_varint(r)?;
        let mut filter_headers = Vec::with_capacity(count as usize);
        for _ in 0..count {
            filter_headers.push(read_bytes(r)?);
        }
        Ok(CFCheckptMessage {
            filter_type,
            stop_hash,
            filter_headers,
        })
    }
}

impl Message for CFCheckptMessage {
    fn command(&self) -> &str {
        "cfcheckpt"
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut out = vec![self.filter_type];
        out.extend_from_slice(&self.stop_hash);
        out.extend_from_slice(&encode_varint(self.filter_headers.len() as u64));
        for header in &self.filter_headers {
            out.extend_from_slice(header);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_getcfilters_round_trip() {
        let msg = GetCFiltersMessage {
            filter_type: FILTER_TYPE_BASIC,
            start_height: 100_000,
            stop_hash: [0x77; 32],
        };
        let wire = msg.serialize().unwrap();
        assert_eq!(wire.len(), 37);
        let parsed = GetCFiltersMessage::parse(&mut Cursor::new(&wire)).unwrap();
        assert_eq!(parsed, msg);
        assert_eq!(msg.command(), "getcfilters");
    }

    #[test]
    fn test_cfilter_round_trip() {
        let msg = CFilterMessage {
            filter_type: FILTER_TYPE_BASIC,
            block_hash: [0x12; 32],
            filter_bytes: vec![0x01, 0x80, 0xff],
        };
        let wire = msg.serialize().unwrap();
        let parsed = CFilterMessage::parse(&mut Cursor::new(&wire)).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_cfheaders_round_trip() {
        let msg = CFHeadersMessage {
            filter_type: FILTER_TYPE_BASIC,
            stop_hash: [0x01; 32],
            prev_filter_header: [0x02; 32],
            filter_hashes: vec![[0x03; 32], [0x04; 32]],
        };
        let wire = msg.serialize().unwrap();
        let parsed = CFHeadersMessage::parse(&mut Cursor::new(&wire)).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_getcfheaders_round_trip() {
        let msg = GetCFHeadersMessage {
            filter_type: FILTER_TYPE_BASIC,
            start_height: 0,
            stop_hash: [0xee; 32],
        };
        let parsed =
            GetCFHeadersMessage::parse(&mut Cursor::new(&msg.serialize().unwrap())).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_checkpt_round_trip() {
        let request = GetCFCheckptMessage {
            filter_type: FILTER_TYPE_BASIC,
            stop_hash: [0xab; 32],
        };
        let parsed =
            GetCFCheckptMessage::parse(&mut Cursor::new(&request.serialize().unwrap())).unwrap();
        assert_eq!(parsed, request);

        let response = CFCheckptMessage {
            filter_type: FILTER_TYPE_BASIC,
            stop_hash: [0xab; 32],
            filter_headers: vec![[0x10; 32]; 3],
        };
        let parsed =
            CFCheckptMessage::parse(&mut Cursor::new(&response.serialize().unwrap())).unwrap();
        assert_eq!(parsed, response);
    }

    #[test]
    fn test_truncated_rejected() {
        let msg = CFilterMessage {
            filter_type: FILTER_TYPE_BASIC,
            block_hash: [0x12; 32],
            filter_bytes: vec![0x01, 0x80, 0xff],
        };
        let wire = msg.serialize().unwrap();
        assert!(CFilterMessage::parse(&mut Cursor::new(&wire[..wire.len() - 2])).is_err());
    }
}
