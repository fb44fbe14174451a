mod counter;

use super::{Batch, SequenceStore};
use crate::{
    context::Context,
    error::{Error, Result},
};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection,
    EntityTrait, QueryFilter, Schema, Set, TransactionTrait, sea_query::Expr,
};

const OP_CONNECT: &str = "database connect";
const OP_SCHEMA: &str = "database schema";
const OP_SEED: &str = "database seed";
const OP_READ: &str = "database read";
const OP_RESERVE: &str = "database reserve";

/// A durable store backed by a single SQL counter row.
///
/// Each reservation is one transaction: the row is incremented by the batch
/// size and then read back while the transaction still holds its write lock.
/// The read value is one past the end of the reserved range. Because the
/// increment happens before the read, no application-level locking is needed
/// and the same SQL works on SQLite, PostgreSQL and MySQL.
///
/// The counter only moves forward. Ranges lost to crashes or timeouts after
/// commit are simply skipped.
#[derive(Clone, Debug)]
pub struct DatabaseSequenceStore {
    db: DatabaseConnection,
    name: String,
}

impl DatabaseSequenceStore {
    /// Connects to `url`, creating the counter table and seeding the counter
    /// `name` at `start` if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Database`] if the connection or schema setup fails.
    pub async fn connect(url: &str, name: impl Into<String>, start: u64) -> Result<Self> {
        Self::connect_with(ConnectOptions::new(url.to_owned()), name, start).await
    }

    /// Like [`Self::connect`] with explicit pool options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Database`] if the connection or schema setup fails.
    pub async fn connect_with(
        opts: ConnectOptions,
        name: impl Into<String>,
        start: u64,
    ) -> Result<Self> {
        let db = Database::connect(opts)
            .await
            .map_err(|e| Error::database(OP_CONNECT, e))?;
        Self::from_connection(db, name, start).await
    }

    /// Wraps an existing connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Database`] if the schema setup fails, or
    /// [`Error::System`] if `start` does not fit the counter column.
    pub async fn from_connection(
        db: DatabaseConnection,
        name: impl Into<String>,
        start: u64,
    ) -> Result<Self> {
        let store = Self {
            db,
            name: name.into(),
        };
        store.init_schema().await?;
        store.ensure_counter(start).await?;
        Ok(store)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn init_schema(&self) -> Result<()> {
        let backend = self.db.get_database_backend();
        let schema = Schema::new(backend);
        let stmt = schema
            .create_table_from_entity(counter::Entity)
            .if_not_exists()
            .to_owned();

        self.db
            .execute(backend.build(&stmt))
            .await
            .map_err(|e| Error::database(OP_SCHEMA, e))?;
        Ok(())
    }

    async fn ensure_counter(&self, start: u64) -> Result<()> {
        let start = i64::try_from(start).map_err(|_| {
            Error::system(OP_SEED, format!("start {start} exceeds the counter column"))
        })?;

        if self.current().await?.is_some() {
            return Ok(());
        }

        let row = counter::ActiveModel {
            name: Set(self.name.clone()),
            value: Set(start),
        };
        match row.insert(&self.db).await {
            Ok(_) => {
                #[cfg(feature = "tracing")]
                tracing::info!(counter = %self.name, start, "seeded sequence counter");
                Ok(())
            }
            // Another process may have seeded the row between our read and
            // insert.
            Err(e) => match self.current().await? {
                Some(_) => Ok(()),
                None => Err(Error::database(OP_SEED, e)),
            },
        }
    }

    /// The next id the counter will hand out, if the counter exists.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Database`] if the read fails.
    pub async fn current(&self) -> Result<Option<u64>> {
        let row = counter::Entity::find_by_id(self.name.clone())
            .one(&self.db)
            .await
            .map_err(|e| Error::database(OP_READ, e))?;
        Ok(row.and_then(|r| u64::try_from(r.value).ok()))
    }

    async fn reserve(&self, count: u64) -> Result<Batch> {
        let delta = i64::try_from(count).map_err(|_| {
            Error::system(OP_RESERVE, format!("batch of {count} exceeds the counter column"))
        })?;

        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| Error::database(OP_RESERVE, e))?;

        let updated = counter::Entity::update_many()
            .col_expr(
                counter::Column::Value,
                Expr::col(counter::Column::Value).add(delta),
            )
            .filter(counter::Column::Name.eq(self.name.as_str()))
            .exec(&txn)
            .await
            .map_err(|e| Error::database(OP_RESERVE, e))?;

        if updated.rows_affected == 0 {
            txn.rollback()
                .await
                .map_err(|e| Error::database(OP_RESERVE, e))?;
            return Err(Error::not_found(OP_RESERVE));
        }

        // Dropping `txn` on any early return rolls the increment back.
        let row = counter::Entity::find_by_id(self.name.clone())
            .one(&txn)
            .await
            .map_err(|e| Error::database(OP_RESERVE, e))?
            .ok_or(Error::not_found(OP_RESERVE))?;

        txn.commit()
            .await
            .map_err(|e| Error::database(OP_RESERVE, e))?;

        let end = u64::try_from(row.value).map_err(|_| {
            Error::system(OP_RESERVE, format!("counter holds negative value {}", row.value))
        })?;
        let first = end.checked_sub(count).ok_or_else(|| {
            Error::system(OP_RESERVE, format!("counter {end} below batch size {count}"))
        })?;
        Ok(Batch::new(first, count))
    }
}

impl SequenceStore for DatabaseSequenceStore {
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip(self, ctx), fields(counter = %self.name)))]
    async fn get_batch(&self, ctx: &Context, count: u64) -> Result<Batch> {
        if count == 0 {
            return Ok(Batch::empty());
        }
        ctx.run(OP_RESERVE, self.reserve(count)).await
    }
}
