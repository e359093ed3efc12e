//! PostgreSQL Store Adapter
//!
//! Durable order store over a `deadpool-postgres` pool. An order is spread
//! across four tables (`orders`, `delivery`, `payment`, `items`); the optional
//! blob mirror lives in `order_cache`.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tokio_postgres::{NoTls, Row};
use tracing::{debug, info, instrument};

use crate::domain::ports::{OrderStore, SaveOutcome};
use crate::domain::{Delivery, Item, Order, OrderId, Payment};
use crate::error::{Error, Result};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS orders (
    order_uid          TEXT PRIMARY KEY,
    track_number       TEXT NOT NULL,
    entry              TEXT NOT NULL,
    locale             TEXT NOT NULL,
    internal_signature TEXT NOT NULL,
    customer_id        TEXT NOT NULL,
    delivery_service   TEXT NOT NULL,
    shardkey           TEXT NOT NULL,
    sm_id              INTEGER NOT NULL,
    date_created       TIMESTAMPTZ NOT NULL,
    oof_shard          TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS delivery (
    order_uid TEXT PRIMARY KEY REFERENCES orders (order_uid) ON DELETE CASCADE,
    name      TEXT NOT NULL,
    phone     TEXT NOT NULL,
    zip       TEXT NOT NULL,
    city      TEXT NOT NULL,
    address   TEXT NOT NULL,
    region    TEXT NOT NULL,
    email     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS payment (
    order_uid     TEXT PRIMARY KEY REFERENCES orders (order_uid) ON DELETE CASCADE,
    transaction_id TEXT NOT NULL,
    request_id    TEXT NOT NULL,
    currency      TEXT NOT NULL,
    provider      TEXT NOT NULL,
    amount        BIGINT NOT NULL,
    payment_dt    BIGINT NOT NULL,
    bank          TEXT NOT NULL,
    delivery_cost BIGINT NOT NULL,
    goods_total   BIGINT NOT NULL,
    custom_fee    BIGINT NOT NULL
);

CREATE TABLE IF NOT EXISTS items (
    order_uid    TEXT NOT NULL REFERENCES orders (order_uid) ON DELETE CASCADE,
    position     INTEGER NOT NULL,
    chrt_id      BIGINT NOT NULL,
    track_number TEXT NOT NULL,
    price        BIGINT NOT NULL,
    rid          TEXT NOT NULL,
    name         TEXT NOT NULL,
    sale         INTEGER NOT NULL,
    size         TEXT NOT NULL,
    total_price  BIGINT NOT NULL,
    nm_id        BIGINT NOT NULL,
    brand        TEXT NOT NULL,
    status       INTEGER NOT NULL,
    PRIMARY KEY (order_uid, position)
);

CREATE TABLE IF NOT EXISTS order_cache (
    order_uid  TEXT PRIMARY KEY,
    data       BYTEA NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
"#;

/// PostgreSQL connection configuration
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Wait/create/recycle timeout for pooled connections
    pub timeout: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5434,
            user: "my_user".to_string(),
            password: "1".to_string(),
            dbname: "my_database".to_string(),
            max_size: 25,
            timeout: Duration::from_secs(5),
        }
    }
}

impl PostgresConfig {
    /// Build a pool. No connection is opened until first use.
    pub fn create_pool(&self) -> Result<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());
        cfg.dbname = Some(self.dbname.clone());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool_cfg = deadpool_postgres::PoolConfig::new(self.max_size);
        pool_cfg.timeouts.wait = Some(self.timeout);
        pool_cfg.timeouts.create = Some(self.timeout);
        pool_cfg.timeouts.recycle = Some(self.timeout);
        cfg.pool = Some(pool_cfg);

        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| Error::Config(format!("failed to create pool: {}", e)))
    }
}

/// Order store backed by PostgreSQL
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: Pool,
}

impl PostgresOrderStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn from_config(config: &PostgresConfig) -> Result<Self> {
        Ok(Self::new(config.create_pool()?))
    }

    /// Create the tables if they do not exist yet.
    pub async fn migrate(&self) -> Result<()> {
        let client = self.pool.get().await?;
        client.batch_execute(SCHEMA).await?;
        info!("Database schema ready");
        Ok(())
    }

    /// Current number of pooled connections
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }
}

fn order_from_row(row: &Row) -> Result<Order> {
    let uid: String = row.try_get("order_uid")?;
    let mut order = Order::new(OrderId::parse(uid)?);
    order.track_number = row.try_get("track_number")?;
    order.entry = row.try_get("entry")?;
    order.locale = row.try_get("locale")?;
    order.internal_signature = row.try_get("internal_signature")?;
    order.customer_id = row.try_get("customer_id")?;
    order.delivery_service = row.try_get("delivery_service")?;
    order.shardkey = row.try_get("shardkey")?;
    order.sm_id = row.try_get("sm_id")?;
    order.date_created = row.try_get("date_created")?;
    order.oof_shard = row.try_get("oof_shard")?;
    Ok(order)
}

fn delivery_from_row(row: &Row) -> Result<Delivery> {
    Ok(Delivery {
        name: row.try_get("name")?,
        phone: row.try_get("phone")?,
        zip: row.try_get("zip")?,
        city: row.try_get("city")?,
        address: row.try_get("address")?,
        region: row.try_get("region")?,
        email: row.try_get("email")?,
    })
}

fn payment_from_row(row: &Row) -> Result<Payment> {
    Ok(Payment {
        transaction: row.try_get("transaction_id")?,
        request_id: row.try_get("request_id")?,
        currency: row.try_get("currency")?,
        provider: row.try_get("provider")?,
        amount: row.try_get("amount")?,
        payment_dt: row.try_get("payment_dt")?,
        bank: row.try_get("bank")?,
        delivery_cost: row.try_get("delivery_cost")?,
        goods_total: row.try_get("goods_total")?,
        custom_fee: row.try_get("custom_fee")?,
    })
}

fn item_from_row(row: &Row) -> Result<Item> {
    Ok(Item {
        chrt_id: row.try_get("chrt_id")?,
        track_number: row.try_get("track_number")?,
        price: row.try_get("price")?,
        rid: row.try_get("rid")?,
        name: row.try_get("name")?,
        sale: row.try_get("sale")?,
        size: row.try_get("size")?,
        total_price: row.try_get("total_price")?,
        nm_id: row.try_get("nm_id")?,
        brand: row.try_get("brand")?,
        status: row.try_get("status")?,
    })
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    #[instrument(skip(self, order), fields(order_uid = %order.id()))]
    async fn save_if_absent(&self, order: &Order) -> Result<SaveOutcome> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let uid = order.id().as_str();

        let inserted = tx
            .execute(
                "INSERT INTO orders (order_uid, track_number, entry, locale, internal_signature, \
                 customer_id, delivery_service, shardkey, sm_id, date_created, oof_shard) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
                 ON CONFLICT (order_uid) DO NOTHING",
                &[
                    &uid,
                    &order.track_number,
                    &order.entry,
                    &order.locale,
                    &order.internal_signature,
                    &order.customer_id,
                    &order.delivery_service,
                    &order.shardkey,
                    &order.sm_id,
                    &order.date_created,
                    &order.oof_shard,
                ],
            )
            .await?;

        if inserted == 0 {
            // Dropping the transaction rolls it back.
            debug!("Order already persisted");
            return Ok(SaveOutcome::AlreadyPresent);
        }

        let d = &order.delivery;
        tx.execute(
            "INSERT INTO delivery (order_uid, name, phone, zip, city, address, region, email) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            &[&uid, &d.name, &d.phone, &d.zip, &d.city, &d.address, &d.region, &d.email],
        )
        .await?;

        let p = &order.payment;
        tx.execute(
            "INSERT INTO payment (order_uid, transaction_id, request_id, currency, provider, amount, \
             payment_dt, bank, delivery_cost, goods_total, custom_fee) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
            &[
                &uid,
                &p.transaction,
                &p.request_id,
                &p.currency,
                &p.provider,
                &p.amount,
                &p.payment_dt,
                &p.bank,
                &p.delivery_cost,
                &p.goods_total,
                &p.custom_fee,
            ],
        )
        .await?;

        let insert_item = tx
            .prepare(
                "INSERT INTO items (order_uid, position, chrt_id, track_number, price, rid, name, \
                 sale, size, total_price, nm_id, brand, status) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
            )
            .await?;
        for (position, item) in order.items.iter().enumerate() {
            let position = i32::try_from(position)
                .map_err(|_| Error::Malformed("too many items".to_string()))?;
            tx.execute(
                &insert_item,
                &[
                    &uid,
                    &position,
                    &item.chrt_id,
                    &item.track_number,
                    &item.price,
                    &item.rid,
                    &item.name,
                    &item.sale,
                    &item.size,
                    &item.total_price,
                    &item.nm_id,
                    &item.brand,
                    &item.status,
                ],
            )
            .await?;
        }

        tx.commit().await?;
        info!(items = order.items.len(), "Order persisted");
        Ok(SaveOutcome::Inserted)
    }

    #[instrument(skip(self), fields(order_uid = %id))]
    async fn fetch(&self, id: &OrderId) -> Result<Option<Order>> {
        let client = self.pool.get().await?;

        let Some(row) = client
            .query_opt("SELECT * FROM orders WHERE order_uid = $1", &[&id.as_str()])
            .await?
        else {
            debug!("Order not in store");
            return Ok(None);
        };
        let mut order = order_from_row(&row)?;

        if let Some(row) = client
            .query_opt("SELECT * FROM delivery WHERE order_uid = $1", &[&id.as_str()])
            .await?
        {
            order.delivery = delivery_from_row(&row)?;
        }

        if let Some(row) = client
            .query_opt("SELECT * FROM payment WHERE order_uid = $1", &[&id.as_str()])
            .await?
        {
            order.payment = payment_from_row(&row)?;
        }

        let rows = client
            .query(
                "SELECT * FROM items WHERE order_uid = $1 ORDER BY position",
                &[&id.as_str()],
            )
            .await?;
        order.items = rows.iter().map(item_from_row).collect::<Result<Vec<_>>>()?;

        Ok(Some(order))
    }

    async fn list_ids(&self) -> Result<Vec<OrderId>> {
        let client = self.pool.get().await?;
        let rows = client
            .query("SELECT order_uid FROM orders ORDER BY order_uid", &[])
            .await?;

        rows.iter()
            .map(|row| {
                let uid: String = row.try_get(0)?;
                OrderId::parse(uid)
            })
            .collect()
    }

    async fn cache_blob(&self, id: &OrderId, blob: &[u8]) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO order_cache (order_uid, data, created_at) VALUES ($1, $2, NOW()) \
                 ON CONFLICT (order_uid) DO UPDATE SET data = EXCLUDED.data, created_at = NOW()",
                &[&id.as_str(), &blob],
            )
            .await?;
        Ok(())
    }

    async fn fetch_blob(&self, id: &OrderId) -> Result<Option<Bytes>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT data FROM order_cache WHERE order_uid = $1",
                &[&id.as_str()],
            )
            .await?;

        match row {
            Some(row) => {
                let data: Vec<u8> = row.try_get(0)?;
                Ok(Some(Bytes::from(data)))
            }
            None => Ok(None),
        }
    }

    async fn health_check(&self) -> Result<()> {
        let client = self.pool.get().await?;
        client.simple_query("SELECT 1").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PostgresConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 5434);
        assert_eq!(config.dbname, "my_database");
        assert_eq!(config.max_size, 25);
    }

    #[tokio::test]
    async fn test_pool_creation_is_lazy() {
        let config = PostgresConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            ..Default::default()
        };
        let store = PostgresOrderStore::from_config(&config).unwrap();
        assert_eq!(store.pool_size(), 0);
    }

    #[test]
    fn test_schema_covers_all_tables() {
        for table in ["orders", "delivery", "payment", "items", "order_cache"] {
            assert!(SCHEMA.contains(&format!("CREATE TABLE IF NOT EXISTS {} (", table)));
        }
    }
}
