use crate::{
    entities::{
        coupon::{self, CouponType},
        order, Coupon, CouponModel, Order,
    },
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;

/// Admin-side coupon management. Eligibility checks at apply time live in
/// the cart service; this service owns the coupon rows themselves.
#[derive(Clone)]
pub struct CouponService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateCouponInput {
    #[validate(length(min = 3, max = 32))]
    pub code: String,
    pub discount_type: CouponType,
    pub value: Decimal,
    pub min_cart_value: Option<Decimal>,
    pub max_discount: Option<Decimal>,
    pub usage_limit: Option<i32>,
    pub expires_at: DateTime<Utc>,
}

impl CouponService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    #[instrument(skip(self, input), fields(code = %input.code))]
    pub async fn create_coupon(
        &self,
        input: CreateCouponInput,
    ) -> Result<CouponModel, ServiceError> {
        input.validate().map_err(|e| ServiceError::ValidationError(e.to_string()))?;
        if input.value <= Decimal::ZERO {
            return Err(ServiceError::ValidationError("Discount value must be positive".into()));
        }
        if input.discount_type == CouponType::Percentage && input.value > Decimal::ONE_HUNDRED {
            return Err(ServiceError::ValidationError(
                "Percentage discount cannot exceed 100".into(),
            ));
        }
        if let Some(limit) = input.usage_limit {
            if limit < 1 {
                return Err(ServiceError::ValidationError(
                    "Usage limit must be at least 1".into(),
                ));
            }
        }
        if input.expires_at <= Utc::now() {
            return Err(ServiceError::ValidationError("Expiry must be in the future".into()));
        }

        let code = input.code.trim().to_uppercase();
        let exists = Coupon::find()
            .filter(coupon::Column::Code.eq(code.clone()))
            .filter(coupon::Column::IsDeleted.eq(false))
            .one(&*self.db)
            .await?;
        if exists.is_some() {
            return Err(ServiceError::Conflict(format!("Coupon {} already exists", code)));
        }

        let now = Utc::now();
        let model = coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code),
            discount_type: Set(input.discount_type),
            value: Set(input.value),
            min_cart_value: Set(input.min_cart_value.unwrap_or(Decimal::ZERO)),
            max_discount: Set(input.max_discount),
            usage_limit: Set(input.usage_limit),
            is_active: Set(true),
            is_deleted: Set(false),
            expires_at: Set(input.expires_at),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?;
        self.event_sender
            .send_or_log(Event::CouponCreated(model.id))
            .await;
        Ok(model)
    }

    pub async fn list_coupons(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<CouponModel>, u64), ServiceError> {
        let paginator = Coupon::find()
            .filter(coupon::Column::IsDeleted.eq(false))
            .order_by_desc(coupon::Column::CreatedAt)
            .paginate(&*self.db, per_page.clamp(1, 100));
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((items, total))
    }

    pub async fn get_coupon(&self, id: Uuid) -> Result<CouponModel, ServiceError> {
        Coupon::find_by_id(id)
            .filter(coupon::Column::IsDeleted.eq(false))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Coupon {} not found", id)))
    }

    pub async fn set_active(&self, id: Uuid, active: bool) -> Result<CouponModel, ServiceError> {
        let existing = self.get_coupon(id).await?;
        let mut model: coupon::ActiveModel = existing.into();
        model.is_active = Set(active);
        model.updated_at = Set(Utc::now());
        Ok(model.update(&*self.db).await?)
    }

    pub async fn delete_coupon(&self, id: Uuid) -> Result<(), ServiceError> {
        let existing = self.get_coupon(id).await?;
        let mut model: coupon::ActiveModel = existing.into();
        model.is_deleted = Set(true);
        model.is_active = Set(false);
        model.updated_at = Set(Utc::now());
        model.update(&*self.db).await?;
        Ok(())
    }

    /// How many orders have consumed this coupon so far.
    pub async fn usage(&self, id: Uuid) -> Result<u64, ServiceError> {
        usage_count(&*self.db, id).await
    }
}

/// Usage is derived from orders rather than kept as a counter, so a
/// cancelled-before-payment order never permanently burns a redemption.
pub async fn usage_count<C: ConnectionTrait>(conn: &C, coupon_id: Uuid) -> Result<u64, ServiceError> {
    let count = Order::find()
        .filter(order::Column::CouponId.eq(coupon_id))
        .filter(order::Column::Status.ne(crate::entities::OrderStatus::Cancelled))
        .filter(order::Column::Status.ne(crate::entities::OrderStatus::PaymentFailed))
        .count(conn)
        .await?;
    Ok(count)
}
