use {
    crate::{IndexBlockHash, PgTransaction, TxId},
    bigdecimal::ToPrimitive,
    sqlx::{PgConnection, types::BigDecimal},
};

/// What happened to the asset: it moved, appeared, or was destroyed.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, sqlx::Type)]
#[repr(i16)]
pub enum AssetEventType {
    #[default]
    Transfer = 1,
    Mint = 2,
    Burn = 3,
}

/// Position of an event row: which transaction emitted it, inside which
/// block, and where in the transaction's event sequence. `event_index` is
/// unique and monotonic within (`tx_id`, `index_block_hash`).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct EventLocator {
    pub event_index: i32,
    pub tx_id: TxId,
    pub tx_index: i32,
    pub block_height: i64,
    pub index_block_hash: IndexBlockHash,
    pub canonical: bool,
}

/// The four event kinds emitted during transaction execution. They share the
/// [`EventLocator`] envelope and differ only in their asset-specific fields.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Stx(StxEvent),
    Ft(FtEvent),
    Nft(NftEvent),
    Log(ContractLog),
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StxEvent {
    pub asset_event_type: AssetEventType,
    pub sender: Option<String>,
    pub recipient: Option<String>,
    pub amount: i64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FtEvent {
    pub asset_event_type: AssetEventType,
    pub asset_identifier: String,
    pub sender: Option<String>,
    pub recipient: Option<String>,
    /// Fungible token amounts may exceed 64 bits; stored as numeric(78,0).
    pub amount: BigDecimal,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct NftEvent {
    pub asset_event_type: AssetEventType,
    pub asset_identifier: String,
    pub sender: Option<String>,
    pub recipient: Option<String>,
    /// Raw serialized token value.
    pub value: Vec<u8>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ContractLog {
    pub contract_identifier: String,
    pub topic: String,
    pub value: Vec<u8>,
}

pub async fn append(
    ex: &mut PgTransaction<'_>,
    events: &[(EventLocator, Event)],
) -> Result<(), sqlx::Error> {
    for (locator, event) in events {
        match event {
            Event::Stx(event) => insert_stx_event(ex, locator, event).await?,
            Event::Ft(event) => insert_ft_event(ex, locator, event).await?,
            Event::Nft(event) => insert_nft_event(ex, locator, event).await?,
            Event::Log(event) => insert_contract_log(ex, locator, event).await?,
        }
    }
    Ok(())
}

async fn insert_stx_event(
    ex: &mut PgConnection,
    locator: &EventLocator,
    event: &StxEvent,
) -> Result<(), sqlx::Error> {
    const QUERY: &str = "\
        INSERT INTO stx_events (event_index, tx_id, tx_index, block_height, \
        index_block_hash, canonical, asset_event_type_id, sender, recipient, \
        amount) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
        ON CONFLICT DO NOTHING;";
    sqlx::query(QUERY)
        .bind(locator.event_index)
        .bind(locator.tx_id)
        .bind(locator.tx_index)
        .bind(locator.block_height)
        .bind(locator.index_block_hash)
        .bind(locator.canonical)
        .bind(event.asset_event_type)
        .bind(&event.sender)
        .bind(&event.recipient)
        .bind(event.amount)
        .execute(ex)
        .await?;
    Ok(())
}

async fn insert_ft_event(
    ex: &mut PgConnection,
    locator: &EventLocator,
    event: &FtEvent,
) -> Result<(), sqlx::Error> {
    const QUERY: &str = "\
        INSERT INTO ft_events (event_index, tx_id, tx_index, block_height, \
        index_block_hash, canonical, asset_event_type_id, asset_identifier, \
        sender, recipient, amount) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
        ON CONFLICT DO NOTHING;";
    sqlx::query(QUERY)
        .bind(locator.event_index)
        .bind(locator.tx_id)
        .bind(locator.tx_index)
        .bind(locator.block_height)
        .bind(locator.index_block_hash)
        .bind(locator.canonical)
        .bind(event.asset_event_type)
        .bind(&event.asset_identifier)
        .bind(&event.sender)
        .bind(&event.recipient)
        .bind(&event.amount)
        .execute(ex)
        .await?;
    Ok(())
}

async fn insert_nft_event(
    ex: &mut PgConnection,
    locator: &EventLocator,
    event: &NftEvent,
) -> Result<(), sqlx::Error> {
    const QUERY: &str = "\
        INSERT INTO nft_events (event_index, tx_id, tx_index, block_height, \
        index_block_hash, canonical, asset_event_type_id, asset_identifier, \
        sender, recipient, value) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
        ON CONFLICT DO NOTHING;";
    sqlx::query(QUERY)
        .bind(locator.event_index)
        .bind(locator.tx_id)
        .bind(locator.tx_index)
        .bind(locator.block_height)
        .bind(locator.index_block_hash)
        .bind(locator.canonical)
        .bind(event.asset_event_type)
        .bind(&event.asset_identifier)
        .bind(&event.sender)
        .bind(&event.recipient)
        .bind(event.value.as_slice())
        .execute(ex)
        .await?;
    Ok(())
}

async fn insert_contract_log(
    ex: &mut PgConnection,
    locator: &EventLocator,
    event: &ContractLog,
) -> Result<(), sqlx::Error> {
    const QUERY: &str = "\
        INSERT INTO contract_logs (event_index, tx_id, tx_index, block_height, \
        index_block_hash, canonical, contract_identifier, topic, value) \
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
        ON CONFLICT DO NOTHING;";
    sqlx::query(QUERY)
        .bind(locator.event_index)
        .bind(locator.tx_id)
        .bind(locator.tx_index)
        .bind(locator.block_height)
        .bind(locator.index_block_hash)
        .bind(locator.canonical)
        .bind(&event.contract_identifier)
        .bind(&event.topic)
        .bind(event.value.as_slice())
        .execute(ex)
        .await?;
    Ok(())
}

/// Row shape shared by the per-kind SELECTs so the four tables can be merged
/// into one ordered event list.
#[derive(sqlx::FromRow)]
struct EventRow {
    event_index: i32,
    tx_id: TxId,
    tx_index: i32,
    block_height: i64,
    index_block_hash: IndexBlockHash,
    canonical: bool,
    asset_event_type_id: Option<AssetEventType>,
    sender: Option<String>,
    recipient: Option<String>,
    amount: Option<BigDecimal>,
    asset_identifier: Option<String>,
    value: Option<Vec<u8>>,
    contract_identifier: Option<String>,
    topic: Option<String>,
}

impl EventRow {
    fn locator(&self) -> EventLocator {
        EventLocator {
            event_index: self.event_index,
            tx_id: self.tx_id,
            tx_index: self.tx_index,
            block_height: self.block_height,
            index_block_hash: self.index_block_hash,
            canonical: self.canonical,
        }
    }
}

// The UNION arms must produce identical column lists, so each arm NULLs out
// the fields the kind does not have and tags itself with `kind`.
const EVENT_COLUMNS: &str = "\
    event_index, tx_id, tx_index, block_height, index_block_hash, canonical";

#[rustfmt::skip]
const STX_ARM: &str = const_format::concatcp!(
"SELECT 0 AS kind, ", EVENT_COLUMNS,
", asset_event_type_id, sender, recipient, amount::numeric AS amount, \
 NULL AS asset_identifier, NULL::bytea AS value, \
 NULL AS contract_identifier, NULL AS topic FROM stx_events",
);

#[rustfmt::skip]
const FT_ARM: &str = const_format::concatcp!(
"SELECT 1 AS kind, ", EVENT_COLUMNS,
", asset_event_type_id, sender, recipient, amount, \
 asset_identifier, NULL::bytea AS value, \
 NULL AS contract_identifier, NULL AS topic FROM ft_events",
);

#[rustfmt::skip]
const NFT_ARM: &str = const_format::concatcp!(
"SELECT 2 AS kind, ", EVENT_COLUMNS,
", asset_event_type_id, sender, recipient, NULL::numeric AS amount, \
 asset_identifier, value, \
 NULL AS contract_identifier, NULL AS topic FROM nft_events",
);

#[rustfmt::skip]
const LOG_ARM: &str = const_format::concatcp!(
"SELECT 3 AS kind, ", EVENT_COLUMNS,
", NULL::smallint AS asset_event_type_id, NULL AS sender, NULL AS recipient, \
 NULL::numeric AS amount, NULL AS asset_identifier, value, \
 contract_identifier, topic FROM contract_logs",
);

#[derive(sqlx::FromRow)]
struct TaggedEventRow {
    kind: i32,
    #[sqlx(flatten)]
    row: EventRow,
}

impl TaggedEventRow {
    fn into_event(self) -> (EventLocator, Event) {
        let locator = self.row.locator();
        let row = self.row;
        let event = match self.kind {
            0 => Event::Stx(StxEvent {
                asset_event_type: row.asset_event_type_id.unwrap_or_default(),
                sender: row.sender,
                recipient: row.recipient,
                amount: row
                    .amount
                    .as_ref()
                    .and_then(ToPrimitive::to_i64)
                    .unwrap_or_default(),
            }),
            1 => Event::Ft(FtEvent {
                asset_event_type: row.asset_event_type_id.unwrap_or_default(),
                asset_identifier: row.asset_identifier.unwrap_or_default(),
                sender: row.sender,
                recipient: row.recipient,
                amount: row.amount.unwrap_or_default(),
            }),
            2 => Event::Nft(NftEvent {
                asset_event_type: row.asset_event_type_id.unwrap_or_default(),
                asset_identifier: row.asset_identifier.unwrap_or_default(),
                sender: row.sender,
                recipient: row.recipient,
                value: row.value.unwrap_or_default(),
            }),
            _ => Event::Log(ContractLog {
                contract_identifier: row.contract_identifier.unwrap_or_default(),
                topic: row.topic.unwrap_or_default(),
                value: row.value.unwrap_or_default(),
            }),
        };
        (locator, event)
    }
}

/// All canonical events of one transaction, all four kinds merged, ordered by
/// `event_index`.
pub async fn tx_events(
    ex: &mut PgConnection,
    tx_id: &TxId,
    index_block_hash: &IndexBlockHash,
) -> Result<Vec<(EventLocator, Event)>, sqlx::Error> {
    #[rustfmt::skip]
    const QUERY: &str = const_format::concatcp!(
"SELECT * FROM (",
    STX_ARM, " UNION ALL ", FT_ARM, " UNION ALL ", NFT_ARM, " UNION ALL ", LOG_ARM,
") events WHERE tx_id = $1 AND index_block_hash = $2 AND canonical ",
"ORDER BY event_index ASC",
    );
    let rows: Vec<TaggedEventRow> = sqlx::query_as(QUERY)
        .bind(tx_id)
        .bind(index_block_hash)
        .fetch_all(ex)
        .await?;
    Ok(rows.into_iter().map(TaggedEventRow::into_event).collect())
}

/// Canonical asset events (STX, FT, NFT; contract logs are not asset events)
/// in which `address` is sender or recipient, newest first. The total is the
/// real count of matching events across all three kinds.
pub async fn address_asset_events(
    ex: &mut PgConnection,
    address: &str,
    limit: i64,
    offset: i64,
) -> Result<(Vec<(EventLocator, Event)>, i64), sqlx::Error> {
    #[rustfmt::skip]
    const QUERY: &str = const_format::concatcp!(
"SELECT *, COUNT(*) OVER () AS total_count FROM (",
    STX_ARM, " UNION ALL ", FT_ARM, " UNION ALL ", NFT_ARM,
") events WHERE canonical AND (sender = $1 OR recipient = $1) ",
"ORDER BY block_height DESC, event_index DESC ",
"LIMIT $2 ",
"OFFSET $3 ",
    );

    #[derive(sqlx::FromRow)]
    struct CountedRow {
        #[sqlx(flatten)]
        tagged: TaggedEventRow,
        total_count: i64,
    }

    let rows: Vec<CountedRow> = sqlx::query_as(QUERY)
        .bind(address)
        .bind(limit)
        .bind(offset)
        .fetch_all(ex)
        .await?;
    let total = rows.first().map(|row| row.total_count).unwrap_or_default();
    Ok((
        rows.into_iter()
            .map(|row| row.tagged.into_event())
            .collect(),
        total,
    ))
}
