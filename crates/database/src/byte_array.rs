use {
    sqlx::{
        Decode, Encode, Postgres, Type,
        encode::IsNull,
        error::BoxDynError,
        postgres::{PgArgumentBuffer, PgHasArrayType, PgTypeInfo, PgValueFormat, PgValueRef},
    },
    std::{fmt, str::FromStr},
};

/// Fixed size byte array stored as `bytea`.
///
/// Hashes are persisted as raw bytes but rendered as `0x`-prefixed hex
/// everywhere humans see them (logs, errors, API payloads), so Display and
/// FromStr speak hex while the sqlx impls speak binary.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ByteArray<const N: usize>(pub [u8; N]);

impl<const N: usize> Default for ByteArray<N> {
    fn default() -> Self {
        Self([0; N])
    }
}

impl<const N: usize> fmt::Debug for ByteArray<N> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl<const N: usize> fmt::Display for ByteArray<N> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ParseByteArrayError {
    #[error("expected {expected} hex bytes, got {got}")]
    WrongLength { expected: usize, got: usize },
    #[error(transparent)]
    Hex(#[from] hex::FromHexError),
}

impl<const N: usize> FromStr for ByteArray<N> {
    type Err = ParseByteArrayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        if s.len() != N * 2 {
            return Err(ParseByteArrayError::WrongLength {
                expected: N,
                got: s.len() / 2,
            });
        }
        let mut bytes = [0u8; N];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl<const N: usize> Type<Postgres> for ByteArray<N> {
    fn type_info() -> PgTypeInfo {
        <[u8] as Type<Postgres>>::type_info()
    }
}

impl<const N: usize> PgHasArrayType for ByteArray<N> {
    fn array_type_info() -> PgTypeInfo {
        <[&[u8]] as Type<Postgres>>::type_info()
    }
}

impl<const N: usize> Decode<'_, Postgres> for ByteArray<N> {
    fn decode(value: PgValueRef<'_>) -> Result<Self, BoxDynError> {
        let mut bytes = [0u8; N];
        match value.format() {
            // prepared query
            PgValueFormat::Binary => {
                bytes = value.as_bytes()?.try_into()?;
            }
            // unprepared raw query
            PgValueFormat::Text => {
                let text = value
                    .as_bytes()?
                    .strip_prefix(b"\\x")
                    .ok_or("bytea text value does not start with \\x")?;
                hex::decode_to_slice(text, &mut bytes)?;
            }
        }
        Ok(Self(bytes))
    }
}

impl<const N: usize> Encode<'_, Postgres> for ByteArray<N> {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        <&[u8] as Encode<Postgres>>::encode(&self.0, buf)
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        sqlx::{Executor, PgPool, Row},
    };

    #[test]
    fn hex_round_trip() {
        let array: ByteArray<4> = "0xdeadbeef".parse().unwrap();
        assert_eq!(array.0, [0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(array.to_string(), "0xdeadbeef");
        // prefix is optional on input
        assert_eq!("deadbeef".parse::<ByteArray<4>>().unwrap(), array);
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(matches!(
            "0xdead".parse::<ByteArray<4>>(),
            Err(ParseByteArrayError::WrongLength {
                expected: 4,
                got: 2
            })
        ));
        assert!("0xzzzzzzzz".parse::<ByteArray<4>>().is_err());
    }

    #[tokio::test]
    #[ignore]
    async fn postgres_fixed_bytes() {
        const TABLE: &str = "fixed_bytes_test";
        let db = PgPool::connect("postgresql://").await.unwrap();
        db.execute(format!("CREATE TABLE IF NOT EXISTS {TABLE} (bytes bytea);").as_str())
            .await
            .unwrap();
        db.execute(format!("TRUNCATE {TABLE};").as_str())
            .await
            .unwrap();

        let data: ByteArray<3> = ByteArray([1, 2, 3]);
        sqlx::query(&format!("INSERT INTO {TABLE} (bytes) VALUES ($1);"))
            .bind(data)
            .execute(&db)
            .await
            .unwrap();
        let query = format!("SELECT * FROM {TABLE} LIMIT 1;");

        // unprepared raw query
        let row = db.fetch_one(query.as_str()).await.unwrap();
        let data_: ByteArray<3> = row.try_get(0).unwrap();
        assert_eq!(data, data_);

        // prepared query
        let data_: ByteArray<3> = sqlx::query_scalar(&query).fetch_one(&db).await.unwrap();
        assert_eq!(data, data_);

        // wrong size errors out instead of truncating
        let result = sqlx::query_scalar::<_, ByteArray<4>>(&query)
            .fetch_one(&db)
            .await;
        assert!(result.is_err());
    }
}
