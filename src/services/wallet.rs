use crate::{
    entities::{
        wallet, wallet_transaction, Wallet, WalletModel, WalletTransaction,
        WalletTransactionModel,
    },
    entities::{TransactionKind, TransactionSource},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Store-credit wallets. Every balance change appends a ledger row carrying
/// the balance after the change; the debit path is guarded in SQL so two
/// concurrent spends can never overdraw.
#[derive(Clone)]
pub struct WalletService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl WalletService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    pub async fn find_or_create_wallet<C: ConnectionTrait>(
        &self,
        conn: &C,
        customer_id: Uuid,
    ) -> Result<WalletModel, ServiceError> {
        if let Some(existing) = Wallet::find()
            .filter(wallet::Column::CustomerId.eq(customer_id))
            .one(conn)
            .await?
        {
            return Ok(existing);
        }
        let now = Utc::now();
        let model = wallet::ActiveModel {
            id: Set(Uuid::new_v4()),
            customer_id: Set(customer_id),
            balance: Set(Decimal::ZERO),
            created_at: Set(now),
            updated_at: Set(now),
        };
        Ok(model.insert(conn).await?)
    }

    pub async fn get_wallet(&self, customer_id: Uuid) -> Result<WalletModel, ServiceError> {
        self.find_or_create_wallet(&*self.db, customer_id).await
    }

    pub async fn list_transactions(
        &self,
        customer_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<WalletTransactionModel>, u64), ServiceError> {
        let wallet = self.get_wallet(customer_id).await?;
        let paginator = WalletTransaction::find()
            .filter(wallet_transaction::Column::WalletId.eq(wallet.id))
            .order_by_desc(wallet_transaction::Column::CreatedAt)
            .paginate(&*self.db, per_page.clamp(1, 100));
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((items, total))
    }

    /// Credits a wallet and appends the ledger row, in the caller's
    /// transaction when one is supplied.
    #[instrument(skip(self, conn))]
    pub async fn credit<C: ConnectionTrait>(
        &self,
        conn: &C,
        customer_id: Uuid,
        amount: Decimal,
        source: TransactionSource,
        order_id: Option<Uuid>,
        description: &str,
    ) -> Result<WalletTransactionModel, ServiceError> {
        if amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationError("Credit amount must be positive".into()));
        }
        let wallet = self.find_or_create_wallet(conn, customer_id).await?;
        Wallet::update_many()
            .col_expr(
                wallet::Column::Balance,
                Expr::col(wallet::Column::Balance).add(amount),
            )
            .col_expr(wallet::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(wallet::Column::Id.eq(wallet.id))
            .exec(conn)
            .await?;
        // Re-read after the UPDATE so the ledger row carries the balance
        // actually written, not one computed from a pre-update snapshot.
        let balance_after = Self::current_balance(conn, wallet.id).await?;
        let entry = self
            .append_entry(conn, wallet.id, TransactionKind::Credit, amount,
                balance_after, source, order_id, description)
            .await?;
        self.event_sender
            .send_or_log(Event::WalletCredited {
                wallet_id: wallet.id,
                amount,
                source: source.to_string(),
            })
            .await;
        Ok(entry)
    }

    /// Debits a wallet; the balance check rides in the UPDATE's WHERE
    /// clause and a zero row count means insufficient funds.
    #[instrument(skip(self, conn))]
    pub async fn debit<C: ConnectionTrait>(
        &self,
        conn: &C,
        customer_id: Uuid,
        amount: Decimal,
        source: TransactionSource,
        order_id: Option<Uuid>,
        description: &str,
    ) -> Result<WalletTransactionModel, ServiceError> {
        if amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationError("Debit amount must be positive".into()));
        }
        let wallet = self.find_or_create_wallet(conn, customer_id).await?;
        let result = Wallet::update_many()
            .col_expr(
                wallet::Column::Balance,
                Expr::col(wallet::Column::Balance).sub(amount),
            )
            .col_expr(wallet::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(wallet::Column::Id.eq(wallet.id))
            .filter(wallet::Column::Balance.gte(amount))
            .exec(conn)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::InsufficientBalance(format!(
                "Wallet balance is below {}",
                amount
            )));
        }
        let balance_after = Self::current_balance(conn, wallet.id).await?;
        let entry = self
            .append_entry(conn, wallet.id, TransactionKind::Debit, amount,
                balance_after, source, order_id, description)
            .await?;
        self.event_sender
            .send_or_log(Event::WalletDebited {
                wallet_id: wallet.id,
                amount,
                source: source.to_string(),
            })
            .await;
        Ok(entry)
    }

    /// Manual admin adjustment, positive or negative.
    pub async fn admin_adjust(
        &self,
        customer_id: Uuid,
        amount: Decimal,
        description: &str,
    ) -> Result<WalletTransactionModel, ServiceError> {
        if amount.is_zero() {
            return Err(ServiceError::ValidationError("Adjustment cannot be zero".into()));
        }
        let txn = self.db.begin().await?;
        let entry = if amount > Decimal::ZERO {
            self.credit(&txn, customer_id, amount, TransactionSource::AdminCredit, None, description)
                .await?
        } else {
            self.debit(&txn, customer_id, -amount, TransactionSource::AdminDebit, None, description)
                .await?
        };
        txn.commit().await?;
        Ok(entry)
    }

    async fn current_balance<C: ConnectionTrait>(
        conn: &C,
        wallet_id: Uuid,
    ) -> Result<Decimal, ServiceError> {
        Wallet::find_by_id(wallet_id)
            .one(conn)
            .await?
            .map(|w| w.balance)
            .ok_or_else(|| ServiceError::NotFound("Wallet not found".into()))
    }

    #[allow(clippy::too_many_arguments)]
    async fn append_entry<C: ConnectionTrait>(
        &self,
        conn: &C,
        wallet_id: Uuid,
        kind: TransactionKind,
        amount: Decimal,
        balance_after: Decimal,
        source: TransactionSource,
        order_id: Option<Uuid>,
        description: &str,
    ) -> Result<WalletTransactionModel, ServiceError> {
        let entry = wallet_transaction::ActiveModel {
            id: Set(Uuid::new_v4()),
            wallet_id: Set(wallet_id),
            kind: Set(kind),
            amount: Set(amount),
            balance_after: Set(balance_after),
            source: Set(source),
            order_id: Set(order_id),
            description: Set(description.to_string()),
            created_at: Set(Utc::now()),
        }
        .insert(conn)
        .await?;
        Ok(entry)
    }
}
