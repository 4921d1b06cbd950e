use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::order::OrderStatus;

/// Order line item with frozen variant pricing. `discount_share` is this
/// line's prorated slice of the order-level coupon discount, computed once
/// at checkout and reused for refunds so displayed and refunded amounts
/// always agree.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "order_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Uuid,
    pub product_name: String,
    pub size: String,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub unit_price: Decimal,
    pub quantity: i32,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub line_total: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub discount_share: Decimal,
    pub status: OrderStatus,
    #[sea_orm(nullable)]
    pub return_reason: Option<String>,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub refunded_amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id"
    )]
    Order,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Refund owed for this line: its subtotal minus its prorated coupon
    /// share, never the flat line price.
    pub fn refundable_amount(&self) -> Decimal {
        self.line_total - self.discount_share
    }
}
