use crate::config::AppConfig;
use crate::entities;
use crate::errors::ServiceError;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, EntityTrait, Schema,
};
use std::time::Duration;
use tracing::info;

/// Type alias for a database connection pool
pub type DbPool = DatabaseConnection;

/// Establishes a connection pool using the application configuration.
pub async fn establish_connection(cfg: &AppConfig) -> Result<DbPool, ServiceError> {
    let mut opts = ConnectOptions::new(cfg.database_url.clone());
    opts.max_connections(cfg.db_max_connections)
        .min_connections(cfg.db_min_connections)
        .connect_timeout(Duration::from_secs(cfg.db_connect_timeout_secs))
        .sqlx_logging(cfg.is_development());

    let db = Database::connect(opts).await?;
    info!("Database connection established");
    Ok(db)
}

/// Creates any missing tables from the entity definitions. Used on startup
/// when `auto_migrate` is set, and by the test harness against SQLite.
pub async fn init_schema(db: &DatabaseConnection) -> Result<(), ServiceError> {
    let schema = Schema::new(db.get_database_backend());

    create_table(db, &schema, entities::customer::Entity).await?;
    create_table(db, &schema, entities::category::Entity).await?;
    create_table(db, &schema, entities::product::Entity).await?;
    create_table(db, &schema, entities::product_variant::Entity).await?;
    create_table(db, &schema, entities::cart::Entity).await?;
    create_table(db, &schema, entities::cart_item::Entity).await?;
    create_table(db, &schema, entities::coupon::Entity).await?;
    create_table(db, &schema, entities::order::Entity).await?;
    create_table(db, &schema, entities::order_item::Entity).await?;
    create_table(db, &schema, entities::order_status_history::Entity).await?;
    create_table(db, &schema, entities::wallet::Entity).await?;
    create_table(db, &schema, entities::wallet_transaction::Entity).await?;
    create_table(db, &schema, entities::address::Entity).await?;
    create_table(db, &schema, entities::wishlist::Entity).await?;
    create_table(db, &schema, entities::wishlist_item::Entity).await?;

    info!("Schema initialized");
    Ok(())
}

async fn create_table<E>(db: &DatabaseConnection, schema: &Schema, entity: E) -> Result<(), DbErr>
where
    E: EntityTrait,
{
    let backend = db.get_database_backend();
    let mut stmt = schema.create_table_from_entity(entity);
    stmt.if_not_exists();
    db.execute(backend.build(&stmt)).await.map(|_| ())
}
