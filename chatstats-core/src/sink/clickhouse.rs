// chatstats-core/src/sink/clickhouse.rs

use async_trait::async_trait;

use crate::models::EventRow;
use crate::sink::EventSink;
use crate::Error;

/// Columnar sink: one INSERT per batch.
pub struct ClickHouseSink {
    client: clickhouse::Client,
    table: String,
}

impl ClickHouseSink {
    pub fn new(client: clickhouse::Client, table: &str) -> Self {
        Self { client, table: table.to_string() }
    }
}

#[async_trait]
impl EventSink for ClickHouseSink {
    async fn insert_batch(&self, rows: &[EventRow]) -> Result<(), Error> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut insert = self.client.insert(&self.table)?;
        for row in rows {
            insert.write(row).await?;
        }
        insert.end().await?;
        Ok(())
    }
}
