//! Node message decoding.
//!
//! A [`RawBlockMessage`] is one block announcement from the node: header
//! fields, the raw binary transactions, and the execution events the node
//! observed while applying them. [`decode_block_message`] is a pure function
//! turning that into the store rows for one ingestion transaction; all I/O
//! stays in the indexer.

pub mod address;
pub mod tx;

use {
    self::address::Network,
    self::tx::{Principal, StandardPrincipal, TxPayload},
    bigdecimal::BigDecimal,
    database::{
        blocks::Block,
        byte_array::ByteArray,
        events::{AssetEventType, ContractLog, Event, EventLocator, FtEvent, NftEvent, StxEvent},
        smart_contracts::SmartContract,
        txs::{Tx, TxStatus, TxType},
    },
    serde::{Deserialize, Serialize},
    sha2::{Digest, Sha256},
};

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("{kind} at byte {position}")]
    Malformed {
        position: usize,
        kind: DecodeErrorKind,
    },
    #[error("value {value} does not fit its storage column")]
    OutOfRange { value: u128 },
}

#[derive(Debug, Eq, PartialEq, thiserror::Error)]
pub enum DecodeErrorKind {
    #[error("unexpected end of input, {needed} more bytes needed")]
    UnexpectedEof { needed: usize },
    #[error("unknown authorization type {0:#04x}")]
    UnknownAuthType(u8),
    #[error("unknown hash mode {0:#04x}")]
    UnknownHashMode(u8),
    #[error("unknown principal type {0:#04x}")]
    UnknownPrincipalType(u8),
    #[error("unknown payload type {0:#04x}")]
    UnknownPayloadType(u8),
    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),
    #[error("string field is not valid utf-8")]
    InvalidString,
}

/// One block announcement as delivered by the node connector. Delivery is
/// at-least-once; the store's idempotent inserts absorb duplicates.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RawBlockMessage {
    pub block_hash: [u8; 32],
    pub index_block_hash: [u8; 32],
    pub parent_index_block_hash: [u8; 32],
    pub parent_block_hash: [u8; 32],
    pub parent_microblock: [u8; 32],
    pub block_height: u64,
    pub burn_block_time: u64,
    pub txs: Vec<RawTxMessage>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RawTxMessage {
    pub tx_id: [u8; 32],
    pub tx_index: u32,
    /// Serialized transaction, parsed by [`tx::parse_transaction`].
    pub raw_tx: Vec<u8>,
    pub success: bool,
    pub events: Vec<RawEvent>,
    /// Node-computed interface of the contract deployed by this transaction.
    pub contract_abi: Option<String>,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RawAssetEventType {
    Transfer,
    Mint,
    Burn,
}

impl From<RawAssetEventType> for AssetEventType {
    fn from(value: RawAssetEventType) -> Self {
        match value {
            RawAssetEventType::Transfer => Self::Transfer,
            RawAssetEventType::Mint => Self::Mint,
            RawAssetEventType::Burn => Self::Burn,
        }
    }
}

/// Execution events arrive pre-structured; decoding only validates and
/// normalizes them.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawEvent {
    StxAsset {
        event_index: u32,
        event_type: RawAssetEventType,
        sender: Option<String>,
        recipient: Option<String>,
        amount: u64,
    },
    FtAsset {
        event_index: u32,
        event_type: RawAssetEventType,
        asset_identifier: String,
        sender: Option<String>,
        recipient: Option<String>,
        amount: u128,
    },
    NftAsset {
        event_index: u32,
        event_type: RawAssetEventType,
        asset_identifier: String,
        sender: Option<String>,
        recipient: Option<String>,
        value: Vec<u8>,
    },
    ContractLog {
        event_index: u32,
        contract_identifier: String,
        topic: String,
        value: Vec<u8>,
    },
}

impl RawEvent {
    fn event_index(&self) -> u32 {
        match self {
            Self::StxAsset { event_index, .. }
            | Self::FtAsset { event_index, .. }
            | Self::NftAsset { event_index, .. }
            | Self::ContractLog { event_index, .. } => *event_index,
        }
    }
}

/// Everything one transaction contributes to the batch.
#[derive(Clone, Debug)]
pub struct DecodedTx {
    pub tx: Tx,
    pub events: Vec<(EventLocator, Event)>,
    pub contracts: Vec<SmartContract>,
}

/// One node message, decoded and normalized into store rows. Rows leave the
/// decoder flagged canonical; the indexer decides otherwise for siblings.
#[derive(Clone, Debug)]
pub struct BlockBatch {
    pub block: Block,
    pub txs: Vec<DecodedTx>,
}

/// Deterministic fingerprint of one event:
/// `sha256(u32be(event_index) ‖ tx_id)[16..32]`.
pub fn compute_event_id(event_index: u32, tx_id: &ByteArray<32>) -> [u8; 16] {
    let mut hasher = Sha256::new();
    hasher.update(event_index.to_be_bytes());
    hasher.update(tx_id.0);
    let digest = hasher.finalize();
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest[16..]);
    out
}

fn fits_bigint(value: u64) -> Result<i64, DecodeError> {
    i64::try_from(value).map_err(|_| DecodeError::OutOfRange {
        value: u128::from(value),
    })
}

fn principal_to_address(principal: &StandardPrincipal) -> String {
    address::c32_address(principal.version, &principal.hash160)
}

fn principal_to_string(principal: &Principal) -> String {
    match principal {
        Principal::Standard(principal) => principal_to_address(principal),
        Principal::Contract { address, name } => {
            format!("{}.{name}", principal_to_address(address))
        }
    }
}

pub fn decode_block_message(
    message: &RawBlockMessage,
    network: Network,
) -> Result<BlockBatch, DecodeError> {
    let block = Block {
        block_hash: ByteArray(message.block_hash),
        index_block_hash: ByteArray(message.index_block_hash),
        parent_index_block_hash: ByteArray(message.parent_index_block_hash),
        parent_block_hash: ByteArray(message.parent_block_hash),
        parent_microblock: ByteArray(message.parent_microblock),
        block_height: fits_bigint(message.block_height)?,
        burn_block_time: fits_bigint(message.burn_block_time)?,
        canonical: true,
    };

    let mut txs = Vec::with_capacity(message.txs.len());
    for raw in &message.txs {
        txs.push(decode_tx(raw, &block, network)?);
    }

    Ok(BlockBatch { block, txs })
}

fn decode_tx(
    raw: &RawTxMessage,
    block: &Block,
    network: Network,
) -> Result<DecodedTx, DecodeError> {
    let parsed = tx::parse_transaction(&raw.raw_tx)?;

    let origin = parsed.auth.origin();
    let sender_version = if origin.hash_mode.is_single_sig() {
        network.single_sig_version()
    } else {
        network.multi_sig_version()
    };
    let sender_address = address::c32_address(sender_version, &origin.signer);

    let mut record = Tx {
        tx_id: ByteArray(raw.tx_id),
        index_block_hash: block.index_block_hash,
        tx_index: tx_index_to_i32(raw.tx_index)?,
        block_hash: block.block_hash,
        block_height: block.block_height,
        burn_block_time: block.burn_block_time,
        status: if raw.success {
            TxStatus::Success
        } else {
            TxStatus::Failed
        },
        canonical: true,
        post_conditions: parsed.post_conditions.clone(),
        fee_rate: fits_bigint(parsed.auth.fee_rate())?,
        sender_address: sender_address.clone(),
        origin_hash_mode: origin.hash_mode as i16,
        sponsored: parsed.auth.is_sponsored(),
        ..Default::default()
    };

    let mut contracts = Vec::new();
    match &parsed.payload {
        TxPayload::TokenTransfer {
            recipient,
            amount,
            memo,
        } => {
            record.type_id = TxType::TokenTransfer;
            record.token_transfer_recipient_address = Some(principal_to_string(recipient));
            record.token_transfer_amount = Some(fits_bigint(*amount)?);
            record.token_transfer_memo = Some(memo.to_vec());
        }
        TxPayload::SmartContract { name, code_body } => {
            let contract_id = format!("{sender_address}.{name}");
            record.type_id = TxType::SmartContract;
            record.smart_contract_contract_id = Some(contract_id.clone());
            record.smart_contract_source_code = Some(code_body.clone());
            contracts.push(SmartContract {
                tx_id: record.tx_id,
                contract_id,
                block_height: block.block_height,
                index_block_hash: block.index_block_hash,
                source_code: code_body.clone(),
                abi: raw.contract_abi.clone(),
                canonical: true,
            });
        }
        TxPayload::ContractCall {
            address,
            contract_name,
            function_name,
            function_args,
        } => {
            record.type_id = TxType::ContractCall;
            record.contract_call_contract_id =
                Some(format!("{}.{contract_name}", principal_to_address(address)));
            record.contract_call_function_name = Some(function_name.clone());
            record.contract_call_function_args = Some(function_args.clone());
        }
        TxPayload::PoisonMicroblock { header_1, header_2 } => {
            record.type_id = TxType::PoisonMicroblock;
            record.poison_microblock_header_1 = Some(header_1.clone());
            record.poison_microblock_header_2 = Some(header_2.clone());
        }
        TxPayload::Coinbase { payload } => {
            record.type_id = TxType::Coinbase;
            record.coinbase_payload = Some(payload.to_vec());
        }
    }

    let mut events = Vec::with_capacity(raw.events.len());
    for event in &raw.events {
        let locator = EventLocator {
            event_index: tx_index_to_i32(event.event_index())?,
            tx_id: record.tx_id,
            tx_index: record.tx_index,
            block_height: block.block_height,
            index_block_hash: block.index_block_hash,
            canonical: true,
        };
        events.push((locator, decode_event(event)?));
    }

    Ok(DecodedTx {
        tx: record,
        events,
        contracts,
    })
}

fn decode_event(event: &RawEvent) -> Result<Event, DecodeError> {
    Ok(match event {
        RawEvent::StxAsset {
            event_type,
            sender,
            recipient,
            amount,
            ..
        } => Event::Stx(StxEvent {
            asset_event_type: (*event_type).into(),
            sender: sender.clone(),
            recipient: recipient.clone(),
            amount: fits_bigint(*amount)?,
        }),
        RawEvent::FtAsset {
            event_type,
            asset_identifier,
            sender,
            recipient,
            amount,
            ..
        } => Event::Ft(FtEvent {
            asset_event_type: (*event_type).into(),
            asset_identifier: asset_identifier.clone(),
            sender: sender.clone(),
            recipient: recipient.clone(),
            amount: BigDecimal::from(*amount),
        }),
        RawEvent::NftAsset {
            event_type,
            asset_identifier,
            sender,
            recipient,
            value,
            ..
        } => Event::Nft(NftEvent {
            asset_event_type: (*event_type).into(),
            asset_identifier: asset_identifier.clone(),
            sender: sender.clone(),
            recipient: recipient.clone(),
            value: value.clone(),
        }),
        RawEvent::ContractLog {
            contract_identifier,
            topic,
            value,
            ..
        } => Event::Log(ContractLog {
            contract_identifier: contract_identifier.clone(),
            topic: topic.clone(),
            value: value.clone(),
        }),
    })
}

fn tx_index_to_i32(value: u32) -> Result<i32, DecodeError> {
    i32::try_from(value).map_err(|_| DecodeError::OutOfRange {
        value: u128::from(value),
    })
}

#[cfg(test)]
mod tests {
    use {super::*, super::tx::tests::TxBuilder};

    fn message_with_tx(raw_tx: Vec<u8>, events: Vec<RawEvent>) -> RawBlockMessage {
        RawBlockMessage {
            block_hash: [1; 32],
            index_block_hash: [2; 32],
            parent_index_block_hash: [3; 32],
            parent_block_hash: [4; 32],
            parent_microblock: [0; 32],
            block_height: 5,
            burn_block_time: 1_700_000_000,
            txs: vec![RawTxMessage {
                tx_id: [9; 32],
                tx_index: 0,
                raw_tx,
                success: true,
                events,
                contract_abi: None,
            }],
        }
    }

    #[test]
    fn decodes_token_transfer_batch() {
        let raw_tx = TxBuilder::standard().epilogue().token_transfer(22, 1_000);
        let message = message_with_tx(
            raw_tx,
            vec![RawEvent::StxAsset {
                event_index: 0,
                event_type: RawAssetEventType::Transfer,
                sender: Some("SPA".into()),
                recipient: Some("SPB".into()),
                amount: 1_000,
            }],
        );
        let batch = decode_block_message(&message, Network::Mainnet).unwrap();

        assert_eq!(batch.block.block_height, 5);
        assert!(batch.block.canonical);

        let decoded = &batch.txs[0];
        assert_eq!(decoded.tx.type_id, TxType::TokenTransfer);
        assert_eq!(decoded.tx.status, TxStatus::Success);
        assert_eq!(decoded.tx.fee_rate, 180);
        assert!(decoded.tx.sender_address.starts_with("SP"));
        assert_eq!(decoded.tx.token_transfer_amount, Some(1_000));
        let recipient = decoded.tx.token_transfer_recipient_address.as_deref().unwrap();
        assert!(recipient.starts_with("SP"));
        assert_eq!(decoded.events.len(), 1);
        assert!(decoded.contracts.is_empty());
    }

    #[test]
    fn testnet_sender_addresses_use_testnet_versions() {
        let raw_tx = TxBuilder::standard().epilogue().coinbase();
        let message = message_with_tx(raw_tx, vec![]);
        let batch = decode_block_message(&message, Network::Testnet).unwrap();
        assert!(batch.txs[0].tx.sender_address.starts_with("ST"));
    }

    #[test]
    fn deployment_produces_contract_row() {
        let code = "(define-read-only (f) u1)";
        let raw_tx = TxBuilder::standard().epilogue().smart_contract("pool", code);
        let mut message = message_with_tx(raw_tx, vec![]);
        message.txs[0].contract_abi = Some("{\"functions\":[]}".into());

        let batch = decode_block_message(&message, Network::Mainnet).unwrap();
        let decoded = &batch.txs[0];
        assert_eq!(decoded.tx.type_id, TxType::SmartContract);
        assert_eq!(decoded.contracts.len(), 1);
        let contract = &decoded.contracts[0];
        assert_eq!(
            contract.contract_id,
            format!("{}.pool", decoded.tx.sender_address)
        );
        assert_eq!(contract.source_code, code);
        assert_eq!(contract.abi.as_deref(), Some("{\"functions\":[]}"));
    }

    #[test]
    fn failed_tx_keeps_failed_status() {
        let raw_tx = TxBuilder::standard().epilogue().coinbase();
        let mut message = message_with_tx(raw_tx, vec![]);
        message.txs[0].success = false;
        let batch = decode_block_message(&message, Network::Mainnet).unwrap();
        assert_eq!(batch.txs[0].tx.status, TxStatus::Failed);
    }

    #[test]
    fn malformed_tx_rejects_whole_message() {
        let mut raw_tx = TxBuilder::standard().epilogue().coinbase();
        raw_tx.truncate(raw_tx.len() - 10);
        let message = message_with_tx(raw_tx, vec![]);
        assert!(matches!(
            decode_block_message(&message, Network::Mainnet),
            Err(DecodeError::Malformed { .. })
        ));
    }

    #[test]
    fn event_id_is_deterministic_and_spreads() {
        let tx_id = ByteArray([7; 32]);
        let id = compute_event_id(0, &tx_id);
        assert_eq!(id, compute_event_id(0, &tx_id));
        assert_ne!(id, compute_event_id(1, &tx_id));
        assert_ne!(id, compute_event_id(0, &ByteArray([8; 32])));
        assert_eq!(id.len(), 16);
    }
}
