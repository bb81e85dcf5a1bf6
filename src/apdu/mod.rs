//! Request/response framing for the device's APDU protocol, and the structured
//! primitive readers/writers used to build and parse command bodies.
//!
//! This module is deliberately pure and synchronous: encoding a request or decoding a
//! response never touches a transport, which makes the wire format unit-testable without
//! a device or a mock.

use crate::error::{Error, Result};

/// The protocol's fixed class byte.
pub const CLA: u8 = 0xE0;

/// Status word returned on success.
pub const SW_OK: u16 = 0x9000;

/// Largest request the transport will accept, including the 6-byte header.
const MAX_REQUEST_SIZE: usize = 512;
const HEADER_SIZE: usize = 6;
const MAX_DATA_SIZE: usize = MAX_REQUEST_SIZE - HEADER_SIZE;

/// A single APDU request: `CLA | INS | P1 | P2 | LEN(u16be) | DATA`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduRequest {
    pub ins: u8,
    pub confirm: bool,
    pub data: Vec<u8>,
}

impl ApduRequest {
    pub fn new(ins: u8, confirm: bool, data: Vec<u8>) -> Result<Self> {
        if data.len() > MAX_DATA_SIZE {
            return Err(Error::invalid_argument(format!(
                "payload of {} bytes exceeds the {} byte limit",
                data.len(),
                MAX_DATA_SIZE
            )));
        }
        Ok(Self { ins, confirm, data })
    }

    pub fn p1(&self) -> u8 {
        if self.confirm {
            0x01
        } else {
            0x00
        }
    }

    /// Encode the request into the exact bytes the transport should send.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE + self.data.len());
        out.push(CLA);
        out.push(self.ins);
        out.push(self.p1());
        out.push(0x00); // P2
        out.extend_from_slice(&(self.data.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.data);
        out
    }
}

/// A parsed response: the body (everything before the trailing status word) plus the
/// resolved error code when the status word signals failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduResponse {
    pub body: Vec<u8>,
    pub status_word: u16,
}

impl ApduResponse {
    /// Parse `raw` as `BODY || SW` and fail with [`Error::DeviceProtocolError`] if the
    /// status word (or the richer in-body code that supersedes it) signals an error.
    pub fn decode(raw: &[u8]) -> Result<Self> {
        if raw.len() < 2 {
            return Err(Error::invalid_argument(format!(
                "response of {} bytes is too short to contain a status word",
                raw.len()
            )));
        }
        let split = raw.len() - 2;
        let body = raw[..split].to_vec();
        let status_word = u16::from_be_bytes([raw[split], raw[split + 1]]);

        if status_word == SW_OK {
            return Ok(Self { body, status_word });
        }

        // Quirk: on error, the device sometimes encodes a richer code in the first two
        // body bytes, which supersedes the status word.
        let code = if body.len() >= 2 {
            u16::from_be_bytes([body[0], body[1]])
        } else {
            status_word
        };
        Err(Error::device_protocol(code))
    }
}

/// A cursor over a response body, reading the big-endian primitives the protocol uses.
pub struct BodyReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> BodyReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.offset + n > self.data.len() {
            return Err(Error::invalid_argument(format!(
                "response body too short: need {} more bytes at offset {}, have {}",
                n,
                self.offset,
                self.data.len()
            )));
        }
        let slice = &self.data[self.offset..self.offset + n];
        self.offset += n;
        Ok(slice)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    pub fn hash32(&mut self) -> Result<[u8; 32]> {
        let b = self.take(32)?;
        let mut out = [0u8; 32];
        out.copy_from_slice(b);
        Ok(out)
    }

    pub fn signature64(&mut self) -> Result<[u8; 64]> {
        let b = self.take(64)?;
        let mut out = [0u8; 64];
        out.copy_from_slice(b);
        Ok(out)
    }

    pub fn rest(&mut self) -> &'a [u8] {
        let rest = &self.data[self.offset..];
        self.offset = self.data.len();
        rest
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }
}

/// A growable buffer for building request bodies with the protocol's big-endian
/// primitives.
#[derive(Debug, Default)]
pub struct BodyWriter {
    data: Vec<u8>,
}

impl BodyWriter {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.data.push(v);
        self
    }

    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.data.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.data.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.data.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn raw32(&mut self, v: &[u8; 32]) -> &mut Self {
        self.data.extend_from_slice(v);
        self
    }

    pub fn raw64(&mut self, v: &[u8; 64]) -> &mut Self {
        self.data.extend_from_slice(v);
        self
    }

    pub fn bytes(&mut self, v: &[u8]) -> &mut Self {
        self.data.extend_from_slice(v);
        self
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_request_header() {
        // S1: send `E0 01 01 00 0000` -> reply `01 02 03 9000`.
        let req = ApduRequest::new(0x01, true, Vec::new()).unwrap();
        assert_eq!(req.encode(), vec![0xE0, 0x01, 0x01, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn encodes_request_with_data() {
        let req = ApduRequest::new(0x10, false, vec![1, 2, 3]).unwrap();
        assert_eq!(
            req.encode(),
            vec![0xE0, 0x10, 0x00, 0x00, 0x00, 0x03, 1, 2, 3]
        );
    }

    #[test]
    fn rejects_oversized_payload() {
        let data = vec![0u8; MAX_DATA_SIZE + 1];
        assert!(ApduRequest::new(0x10, false, data).is_err());
    }

    #[test]
    fn decodes_ok_response() {
        let resp = ApduResponse::decode(&[0x01, 0x02, 0x03, 0x90, 0x00]).unwrap();
        assert_eq!(resp.body, vec![0x01, 0x02, 0x03]);
        assert_eq!(resp.status_word, SW_OK);
    }

    #[test]
    fn decodes_error_from_status_word_only() {
        let err = ApduResponse::decode(&[0x69, 0x85]).unwrap_err();
        match err {
            Error::DeviceProtocolError(code) => assert_eq!(code.code(), 0x6985),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn body_error_code_supersedes_status_word() {
        // Quirk: body carries a richer error code that overrides the SW.
        let err = ApduResponse::decode(&[0x94, 0x06, 0x69, 0x85]).unwrap_err();
        match err {
            Error::DeviceProtocolError(code) => assert_eq!(code.code(), 0x9406),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn body_reader_reads_primitives_in_order() {
        let body = [0x01u8, 0x00, 0x02, 0x00, 0x00, 0x00, 0x03];
        let mut reader = BodyReader::new(&body);
        assert_eq!(reader.u8().unwrap(), 0x01);
        assert_eq!(reader.u16().unwrap(), 0x0002);
        assert_eq!(reader.u32().unwrap(), 0x0000_0003);
    }

    #[test]
    fn body_reader_errors_on_short_input() {
        let body = [0x01u8];
        let mut reader = BodyReader::new(&body);
        assert!(reader.u32().is_err());
    }
}
