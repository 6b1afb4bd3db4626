//! Binary transaction parsing.
//!
//! The wire layout is: version, chain id, authorization (one spending
//! condition, or two for sponsored transactions), anchor mode, post-condition
//! mode, length-delimited post-conditions, then the type-discriminated
//! payload. Everything is big-endian. The parser never panics; every failure
//! carries the byte position it happened at.

use super::{DecodeError, DecodeErrorKind};

const AUTH_STANDARD: u8 = 0x04;
const AUTH_SPONSORED: u8 = 0x05;

const PRINCIPAL_STANDARD: u8 = 0x05;
const PRINCIPAL_CONTRACT: u8 = 0x06;

const PAYLOAD_TOKEN_TRANSFER: u8 = 0x00;
const PAYLOAD_SMART_CONTRACT: u8 = 0x01;
const PAYLOAD_CONTRACT_CALL: u8 = 0x02;
const PAYLOAD_POISON_MICROBLOCK: u8 = 0x03;
const PAYLOAD_COINBASE: u8 = 0x04;

struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn error(&self, kind: DecodeErrorKind) -> DecodeError {
        DecodeError::Malformed {
            position: self.pos,
            kind,
        }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < len {
            return Err(self.error(DecodeErrorKind::UnexpectedEof {
                needed: len - self.remaining(),
            }));
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.read_array::<1>()?[0])
    }

    fn read_u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    fn read_u64(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_be_bytes(self.read_array()?))
    }

    /// A name on the wire is a u8 length followed by that many utf-8 bytes.
    fn read_name(&mut self) -> Result<String, DecodeError> {
        let len = self.read_u8()?;
        let bytes = self.read_bytes(usize::from(len))?;
        String::from_utf8(bytes.to_vec()).map_err(|_| self.error(DecodeErrorKind::InvalidString))
    }

    /// A body is a u32 length followed by that many utf-8 bytes.
    fn read_body(&mut self) -> Result<String, DecodeError> {
        let len = self.read_u32()?;
        let bytes = self.read_bytes(len as usize)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| self.error(DecodeErrorKind::InvalidString))
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HashMode {
    P2pkh = 0x00,
    P2sh = 0x01,
    P2wpkhP2sh = 0x02,
    P2wshP2sh = 0x03,
}

impl HashMode {
    fn from_wire(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::P2pkh),
            0x01 => Some(Self::P2sh),
            0x02 => Some(Self::P2wpkhP2sh),
            0x03 => Some(Self::P2wshP2sh),
            _ => None,
        }
    }

    pub fn is_single_sig(self) -> bool {
        matches!(self, Self::P2pkh | Self::P2wpkhP2sh)
    }
}

/// Who authorized a transaction and what they pay. Signature material is
/// validated structurally and then discarded; the store never needs it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SpendingCondition {
    pub hash_mode: HashMode,
    pub signer: [u8; 20],
    pub nonce: u64,
    pub fee_rate: u64,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Auth {
    Standard(SpendingCondition),
    Sponsored {
        origin: SpendingCondition,
        sponsor: SpendingCondition,
    },
}

impl Auth {
    pub fn origin(&self) -> &SpendingCondition {
        match self {
            Self::Standard(origin) | Self::Sponsored { origin, .. } => origin,
        }
    }

    /// The fee actually offered for the transaction: the sponsor's on
    /// sponsored transactions, the origin's otherwise.
    pub fn fee_rate(&self) -> u64 {
        match self {
            Self::Standard(origin) => origin.fee_rate,
            Self::Sponsored { sponsor, .. } => sponsor.fee_rate,
        }
    }

    pub fn is_sponsored(&self) -> bool {
        matches!(self, Self::Sponsored { .. })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StandardPrincipal {
    pub version: u8,
    pub hash160: [u8; 20],
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Principal {
    Standard(StandardPrincipal),
    Contract {
        address: StandardPrincipal,
        name: String,
    },
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TxPayload {
    TokenTransfer {
        recipient: Principal,
        amount: u64,
        memo: [u8; 34],
    },
    SmartContract {
        name: String,
        code_body: String,
    },
    ContractCall {
        address: StandardPrincipal,
        contract_name: String,
        function_name: String,
        /// Count prefix plus length-delimited serialized argument values,
        /// kept raw.
        function_args: Vec<u8>,
    },
    PoisonMicroblock {
        header_1: Vec<u8>,
        header_2: Vec<u8>,
    },
    Coinbase {
        payload: [u8; 32],
    },
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParsedTx {
    pub version: u8,
    pub chain_id: u32,
    pub auth: Auth,
    pub anchor_mode: u8,
    pub post_condition_mode: u8,
    /// Count prefix plus length-delimited serialized post-conditions, kept
    /// raw for the `post_conditions` column.
    pub post_conditions: Vec<u8>,
    pub payload: TxPayload,
}

pub fn parse_transaction(bytes: &[u8]) -> Result<ParsedTx, DecodeError> {
    let mut reader = ByteReader::new(bytes);

    let version = reader.read_u8()?;
    let chain_id = reader.read_u32()?;

    let auth_type = reader.read_u8()?;
    let auth = match auth_type {
        AUTH_STANDARD => Auth::Standard(read_spending_condition(&mut reader)?),
        AUTH_SPONSORED => Auth::Sponsored {
            origin: read_spending_condition(&mut reader)?,
            sponsor: read_spending_condition(&mut reader)?,
        },
        other => return Err(reader.error(DecodeErrorKind::UnknownAuthType(other))),
    };

    let anchor_mode = reader.read_u8()?;
    let post_condition_mode = reader.read_u8()?;
    let post_conditions = read_post_conditions(&mut reader)?;
    let payload = read_payload(&mut reader)?;

    let trailing = reader.remaining();
    if trailing > 0 {
        return Err(reader.error(DecodeErrorKind::TrailingBytes(trailing)));
    }

    Ok(ParsedTx {
        version,
        chain_id,
        auth,
        anchor_mode,
        post_condition_mode,
        post_conditions,
        payload,
    })
}

fn read_spending_condition(reader: &mut ByteReader) -> Result<SpendingCondition, DecodeError> {
    let mode = reader.read_u8()?;
    let hash_mode = HashMode::from_wire(mode)
        .ok_or_else(|| reader.error(DecodeErrorKind::UnknownHashMode(mode)))?;
    let signer = reader.read_array()?;
    let nonce = reader.read_u64()?;
    let fee_rate = reader.read_u64()?;
    if hash_mode.is_single_sig() {
        let _key_encoding = reader.read_u8()?;
        let _signature: [u8; 65] = reader.read_array()?;
    } else {
        let fields = reader.read_u32()?;
        for _ in 0..fields {
            let _field: [u8; 66] = reader.read_array()?;
        }
        let _signatures_required = reader.read_u16()?;
    }
    Ok(SpendingCondition {
        hash_mode,
        signer,
        nonce,
        fee_rate,
    })
}

fn read_post_conditions(reader: &mut ByteReader) -> Result<Vec<u8>, DecodeError> {
    let mut raw = Vec::new();
    let count = reader.read_u32()?;
    raw.extend_from_slice(&count.to_be_bytes());
    for _ in 0..count {
        let len = reader.read_u16()?;
        raw.extend_from_slice(&len.to_be_bytes());
        raw.extend_from_slice(reader.read_bytes(usize::from(len))?);
    }
    Ok(raw)
}

fn read_standard_principal(reader: &mut ByteReader) -> Result<StandardPrincipal, DecodeError> {
    Ok(StandardPrincipal {
        version: reader.read_u8()?,
        hash160: reader.read_array()?,
    })
}

fn read_principal(reader: &mut ByteReader) -> Result<Principal, DecodeError> {
    let ty = reader.read_u8()?;
    match ty {
        PRINCIPAL_STANDARD => Ok(Principal::Standard(read_standard_principal(reader)?)),
        PRINCIPAL_CONTRACT => Ok(Principal::Contract {
            address: read_standard_principal(reader)?,
            name: reader.read_name()?,
        }),
        other => Err(reader.error(DecodeErrorKind::UnknownPrincipalType(other))),
    }
}

fn read_payload(reader: &mut ByteReader) -> Result<TxPayload, DecodeError> {
    let type_id = reader.read_u8()?;
    match type_id {
        PAYLOAD_TOKEN_TRANSFER => Ok(TxPayload::TokenTransfer {
            recipient: read_principal(reader)?,
            amount: reader.read_u64()?,
            memo: reader.read_array()?,
        }),
        PAYLOAD_SMART_CONTRACT => Ok(TxPayload::SmartContract {
            name: reader.read_name()?,
            code_body: reader.read_body()?,
        }),
        PAYLOAD_CONTRACT_CALL => {
            let address = read_standard_principal(reader)?;
            let contract_name = reader.read_name()?;
            let function_name = reader.read_name()?;
            let mut function_args = Vec::new();
            let count = reader.read_u32()?;
            function_args.extend_from_slice(&count.to_be_bytes());
            for _ in 0..count {
                let len = reader.read_u32()?;
                function_args.extend_from_slice(&len.to_be_bytes());
                function_args.extend_from_slice(reader.read_bytes(len as usize)?);
            }
            Ok(TxPayload::ContractCall {
                address,
                contract_name,
                function_name,
                function_args,
            })
        }
        PAYLOAD_POISON_MICROBLOCK => Ok(TxPayload::PoisonMicroblock {
            header_1: reader.read_bytes(MICROBLOCK_HEADER_LEN)?.to_vec(),
            header_2: reader.read_bytes(MICROBLOCK_HEADER_LEN)?.to_vec(),
        }),
        PAYLOAD_COINBASE => Ok(TxPayload::Coinbase {
            payload: reader.read_array()?,
        }),
        other => Err(reader.error(DecodeErrorKind::UnknownPayloadType(other))),
    }
}

/// version + sequence + previous block + tx merkle root + signature.
const MICROBLOCK_HEADER_LEN: usize = 1 + 2 + 32 + 32 + 65;
