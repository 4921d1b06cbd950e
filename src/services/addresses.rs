use crate::{
    entities::{address, Address, AddressModel},
    errors::ServiceError,
};
use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, ModelTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;

/// Address book. The default flag is maintained with a transactional
/// clear-then-set so a customer never ends up with two defaults.
#[derive(Clone)]
pub struct AddressService {
    db: Arc<DatabaseConnection>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddressInput {
    #[validate(length(min = 1, max = 120))]
    pub full_name: String,
    #[validate(length(min = 7, max = 20))]
    pub phone: String,
    #[validate(length(min = 1, max = 200))]
    pub line1: String,
    #[validate(length(max = 200))]
    pub line2: Option<String>,
    #[validate(length(min = 1, max = 80))]
    pub city: String,
    #[validate(length(min = 1, max = 80))]
    pub state: String,
    #[validate(length(min = 3, max = 12))]
    pub postal_code: String,
    #[validate(length(min = 2, max = 80))]
    pub country: String,
    #[serde(default)]
    pub is_default: bool,
}

impl AddressService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self, input))]
    pub async fn create(
        &self,
        customer_id: Uuid,
        input: AddressInput,
    ) -> Result<AddressModel, ServiceError> {
        input.validate().map_err(|e| ServiceError::ValidationError(e.to_string()))?;
        let txn = self.db.begin().await?;
        let existing_count = Address::find()
            .filter(address::Column::CustomerId.eq(customer_id))
            .count(&txn)
            .await?;
        // First address becomes the default regardless of the flag.
        let make_default = input.is_default || existing_count == 0;
        if make_default {
            Self::clear_default(&txn, customer_id).await?;
        }
        let now = Utc::now();
        let model = address::ActiveModel {
            id: Set(Uuid::new_v4()),
            customer_id: Set(customer_id),
            full_name: Set(input.full_name),
            phone: Set(input.phone),
            line1: Set(input.line1),
            line2: Set(input.line2),
            city: Set(input.city),
            state: Set(input.state),
            postal_code: Set(input.postal_code),
            country: Set(input.country),
            is_default: Set(make_default),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;
        txn.commit().await?;
        Ok(model)
    }

    pub async fn list(&self, customer_id: Uuid) -> Result<Vec<AddressModel>, ServiceError> {
        Ok(Address::find()
            .filter(address::Column::CustomerId.eq(customer_id))
            .order_by_desc(address::Column::IsDefault)
            .order_by_desc(address::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    pub async fn get(
        &self,
        customer_id: Uuid,
        address_id: Uuid,
    ) -> Result<AddressModel, ServiceError> {
        Address::find_by_id(address_id)
            .filter(address::Column::CustomerId.eq(customer_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Address not found".into()))
    }

    #[instrument(skip(self, input))]
    pub async fn update(
        &self,
        customer_id: Uuid,
        address_id: Uuid,
        input: AddressInput,
    ) -> Result<AddressModel, ServiceError> {
        input.validate().map_err(|e| ServiceError::ValidationError(e.to_string()))?;
        let txn = self.db.begin().await?;
        let existing = Address::find_by_id(address_id)
            .filter(address::Column::CustomerId.eq(customer_id))
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Address not found".into()))?;
        if input.is_default && !existing.is_default {
            Self::clear_default(&txn, customer_id).await?;
        }
        let was_default = existing.is_default;
        let mut active: address::ActiveModel = existing.into();
        active.full_name = Set(input.full_name);
        active.phone = Set(input.phone);
        active.line1 = Set(input.line1);
        active.line2 = Set(input.line2);
        active.city = Set(input.city);
        active.state = Set(input.state);
        active.postal_code = Set(input.postal_code);
        active.country = Set(input.country);
        active.is_default = Set(input.is_default || was_default);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&txn).await?;
        txn.commit().await?;
        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn set_default(
        &self,
        customer_id: Uuid,
        address_id: Uuid,
    ) -> Result<AddressModel, ServiceError> {
        let txn = self.db.begin().await?;
        let existing = Address::find_by_id(address_id)
            .filter(address::Column::CustomerId.eq(customer_id))
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Address not found".into()))?;
        Self::clear_default(&txn, customer_id).await?;
        let mut active: address::ActiveModel = existing.into();
        active.is_default = Set(true);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&txn).await?;
        txn.commit().await?;
        Ok(updated)
    }

    pub async fn delete(&self, customer_id: Uuid, address_id: Uuid) -> Result<(), ServiceError> {
        let existing = self.get(customer_id, address_id).await?;
        existing.delete(&*self.db).await?;
        Ok(())
    }

    async fn clear_default<C: sea_orm::ConnectionTrait>(
        conn: &C,
        customer_id: Uuid,
    ) -> Result<(), ServiceError> {
        Address::update_many()
            .col_expr(address::Column::IsDefault, Expr::value(false))
            .col_expr(address::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(address::Column::CustomerId.eq(customer_id))
            .filter(address::Column::IsDefault.eq(true))
            .exec(conn)
            .await?;
        Ok(())
    }
}
