//! Balance aggregation over canonical asset events.
//!
//! Balances are never stored; they are derived on demand from the canonical
//! event rows, which keeps them automatically consistent across reorgs: the
//! moment a reorg commit flips `canonical` flags, every balance query
//! reflects the new chain without further bookkeeping.

use {
    sqlx::{PgConnection, types::BigDecimal},
    std::collections::BTreeMap,
};

/// Received minus sent, with the two legs broken out. `SUM(bigint)` is
/// `numeric` in Postgres, and FT amounts are `numeric(78,0)` to begin with,
/// so all three figures are [`BigDecimal`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AssetBalance {
    pub balance: BigDecimal,
    pub total_sent: BigDecimal,
    pub total_received: BigDecimal,
}

impl AssetBalance {
    fn from_legs(total_sent: BigDecimal, total_received: BigDecimal) -> Self {
        Self {
            balance: &total_received - &total_sent,
            total_sent,
            total_received,
        }
    }
}

#[derive(sqlx::FromRow)]
struct BalanceRow {
    total_sent: BigDecimal,
    total_received: BigDecimal,
}

// An address receives through transfers and mints and spends through
// transfers and burns, hence the asymmetric type filters.
#[rustfmt::skip]
const STX_BALANCE_QUERY: &str = "\
SELECT \
    COALESCE(SUM(amount) FILTER (WHERE sender = $1 AND asset_event_type_id IN (1, 3)), 0) AS total_sent, \
    COALESCE(SUM(amount) FILTER (WHERE recipient = $1 AND asset_event_type_id IN (1, 2)), 0) AS total_received \
FROM stx_events \
WHERE canonical AND (sender = $1 OR recipient = $1)";

/// STX balance of one address over the canonical chain.
pub async fn stx_balance(
    ex: &mut PgConnection,
    address: &str,
) -> Result<AssetBalance, sqlx::Error> {
    let row: BalanceRow = sqlx::query_as(STX_BALANCE_QUERY)
        .bind(address)
        .fetch_one(ex)
        .await?;
    Ok(AssetBalance::from_legs(row.total_sent, row.total_received))
}

#[derive(sqlx::FromRow)]
struct FtBalanceRow {
    asset_identifier: String,
    total_sent: BigDecimal,
    total_received: BigDecimal,
}

#[rustfmt::skip]
const FT_BALANCES_QUERY: &str = "\
SELECT \
    asset_identifier, \
    COALESCE(SUM(amount) FILTER (WHERE sender = $1 AND asset_event_type_id IN (1, 3)), 0) AS total_sent, \
    COALESCE(SUM(amount) FILTER (WHERE recipient = $1 AND asset_event_type_id IN (1, 2)), 0) AS total_received \
FROM ft_events \
WHERE canonical AND (sender = $1 OR recipient = $1) \
GROUP BY asset_identifier";

/// Fungible token balances of one address, one entry per asset identifier.
pub async fn ft_balances(
    ex: &mut PgConnection,
    address: &str,
) -> Result<BTreeMap<String, AssetBalance>, sqlx::Error> {
    let rows: Vec<FtBalanceRow> = sqlx::query_as(FT_BALANCES_QUERY)
        .bind(address)
        .fetch_all(ex)
        .await?;
    Ok(rows
        .into_iter()
        .map(|row| {
            (
                row.asset_identifier,
                AssetBalance::from_legs(row.total_sent, row.total_received),
            )
        })
        .collect())
}

/// Held count plus sent/received totals per non-fungible asset identifier.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct NftCount {
    pub count: i64,
    pub total_sent: i64,
    pub total_received: i64,
}

#[derive(sqlx::FromRow)]
struct NftCountRow {
    asset_identifier: String,
    total_sent: i64,
    total_received: i64,
}

#[rustfmt::skip]
const NFT_COUNTS_QUERY: &str = "\
SELECT \
    asset_identifier, \
    COUNT(*) FILTER (WHERE sender = $1 AND asset_event_type_id IN (1, 3)) AS total_sent, \
    COUNT(*) FILTER (WHERE recipient = $1 AND asset_event_type_id IN (1, 2)) AS total_received \
FROM nft_events \
WHERE canonical AND (sender = $1 OR recipient = $1) \
GROUP BY asset_identifier";

/// Non-fungible token holdings of one address, one entry per asset
/// identifier.
pub async fn nft_counts(
    ex: &mut PgConnection,
    address: &str,
) -> Result<BTreeMap<String, NftCount>, sqlx::Error> {
    let rows: Vec<NftCountRow> = sqlx::query_as(NFT_COUNTS_QUERY)
        .bind(address)
        .fetch_all(ex)
        .await?;
    Ok(rows
        .into_iter()
        .map(|row| {
            (
                row.asset_identifier,
                NftCount {
                    count: row.total_received - row.total_sent,
                    total_sent: row.total_sent,
                    total_received: row.total_received,
                },
            )
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            byte_array::ByteArray,
            events::{self, AssetEventType, Event, EventLocator, FtEvent, NftEvent, StxEvent},
        },
        maplit::btreemap,
        sqlx::{Connection, PgConnection},
    };

    fn locator(event_index: i32, canonical: bool) -> EventLocator {
        EventLocator {
            event_index,
            tx_id: ByteArray([1; 32]),
            tx_index: 0,
            block_height: 1,
            index_block_hash: ByteArray([if canonical { 2 } else { 3 }; 32]),
            canonical,
        }
    }

    fn transfer(amount: i64, sender: &str, recipient: &str) -> Event {
        Event::Stx(StxEvent {
            asset_event_type: AssetEventType::Transfer,
            sender: Some(sender.to_string()),
            recipient: Some(recipient.to_string()),
            amount,
        })
    }

    #[tokio::test]
    #[ignore]
    async fn postgres_stx_balance_is_received_minus_sent() {
        let mut db = PgConnection::connect("postgresql://").await.unwrap();
        let mut db = db.begin().await.unwrap();
        crate::clear_DANGER_(&mut db).await.unwrap();

        let mint = Event::Stx(StxEvent {
            asset_event_type: AssetEventType::Mint,
            sender: None,
            recipient: Some("SPA".into()),
            amount: 50,
        });
        events::append(
            &mut db,
            &[
                (locator(0, true), transfer(100, "SPGENESIS", "SPA")),
                (locator(1, true), mint),
                (locator(2, true), transfer(30, "SPA", "SPB")),
                // orphaned transfer must not count
                (locator(3, false), transfer(1_000, "SPGENESIS", "SPA")),
            ],
        )
        .await
        .unwrap();

        let balance = stx_balance(&mut db, "SPA").await.unwrap();
        assert_eq!(balance.total_received, BigDecimal::from(150));
        assert_eq!(balance.total_sent, BigDecimal::from(30));
        assert_eq!(balance.balance, BigDecimal::from(120));

        // an address with no events has an all-zero balance
        let empty = stx_balance(&mut db, "SPNOBODY").await.unwrap();
        assert_eq!(empty, AssetBalance::default());
    }

    #[tokio::test]
    #[ignore]
    async fn postgres_ft_balances_group_per_asset() {
        let mut db = PgConnection::connect("postgresql://").await.unwrap();
        let mut db = db.begin().await.unwrap();
        crate::clear_DANGER_(&mut db).await.unwrap();

        let ft = |event_index, asset: &str, ty, sender: Option<&str>, recipient: Option<&str>, amount: u64| {
            (
                locator(event_index, true),
                Event::Ft(FtEvent {
                    asset_event_type: ty,
                    asset_identifier: asset.to_string(),
                    sender: sender.map(str::to_string),
                    recipient: recipient.map(str::to_string),
                    amount: amount.into(),
                }),
            )
        };
        events::append(
            &mut db,
            &[
                ft(0, "SPX.alpha::a", AssetEventType::Mint, None, Some("SPA"), 10),
                ft(1, "SPX.alpha::a", AssetEventType::Transfer, Some("SPA"), Some("SPB"), 4),
                ft(2, "SPX.beta::b", AssetEventType::Burn, Some("SPA"), None, 1),
            ],
        )
        .await
        .unwrap();

        let balances = ft_balances(&mut db, "SPA").await.unwrap();
        assert_eq!(
            balances,
            btreemap! {
                "SPX.alpha::a".to_string() => AssetBalance {
                    balance: 6.into(),
                    total_sent: 4.into(),
                    total_received: 10.into(),
                },
                "SPX.beta::b".to_string() => AssetBalance {
                    balance: (-1).into(),
                    total_sent: 1.into(),
                    total_received: 0.into(),
                },
            }
        );
    }

    #[tokio::test]
    #[ignore]
    async fn postgres_nft_counts_per_asset() {
        let mut db = PgConnection::connect("postgresql://").await.unwrap();
        let mut db = db.begin().await.unwrap();
        crate::clear_DANGER_(&mut db).await.unwrap();

        let nft = |event_index, ty, sender: Option<&str>, recipient: Option<&str>, value: u8| {
            (
                locator(event_index, true),
                Event::Nft(NftEvent {
                    asset_event_type: ty,
                    asset_identifier: "SPX.punks::punk".to_string(),
                    sender: sender.map(str::to_string),
                    recipient: recipient.map(str::to_string),
                    value: vec![value],
                }),
            )
        };
        events::append(
            &mut db,
            &[
                nft(0, AssetEventType::Mint, None, Some("SPA"), 1),
                nft(1, AssetEventType::Mint, None, Some("SPA"), 2),
                nft(2, AssetEventType::Transfer, Some("SPA"), Some("SPB"), 1),
            ],
        )
        .await
        .unwrap();

        let counts = nft_counts(&mut db, "SPA").await.unwrap();
        assert_eq!(
            counts,
            btreemap! {
                "SPX.punks::punk".to_string() => NftCount {
                    count: 1,
                    total_sent: 1,
                    total_received: 2,
                },
            }
        );
    }
}
