use crate::{
    entities::{
        product, wishlist, wishlist_item, Product, ProductModel, Wishlist, WishlistItem,
        WishlistModel,
    },
    errors::ServiceError,
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, ModelTrait, QueryFilter,
    QueryOrder, Set,
};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct WishlistService {
    db: Arc<DatabaseConnection>,
}

impl WishlistService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    async fn find_or_create(&self, customer_id: Uuid) -> Result<WishlistModel, ServiceError> {
        if let Some(existing) = Wishlist::find()
            .filter(wishlist::Column::CustomerId.eq(customer_id))
            .one(&*self.db)
            .await?
        {
            return Ok(existing);
        }
        let model = wishlist::ActiveModel {
            id: Set(Uuid::new_v4()),
            customer_id: Set(customer_id),
            created_at: Set(Utc::now()),
        };
        Ok(model.insert(&*self.db).await?)
    }

    /// Adding an already-wishlisted product is a no-op, not an error.
    pub async fn add(&self, customer_id: Uuid, product_id: Uuid) -> Result<(), ServiceError> {
        Product::find_by_id(product_id)
            .filter(product::Column::IsDeleted.eq(false))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;
        let list = self.find_or_create(customer_id).await?;
        let existing = WishlistItem::find()
            .filter(wishlist_item::Column::WishlistId.eq(list.id))
            .filter(wishlist_item::Column::ProductId.eq(product_id))
            .one(&*self.db)
            .await?;
        if existing.is_none() {
            wishlist_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                wishlist_id: Set(list.id),
                product_id: Set(product_id),
                created_at: Set(Utc::now()),
            }
            .insert(&*self.db)
            .await?;
        }
        Ok(())
    }

    pub async fn remove(&self, customer_id: Uuid, product_id: Uuid) -> Result<(), ServiceError> {
        let list = self.find_or_create(customer_id).await?;
        let item = WishlistItem::find()
            .filter(wishlist_item::Column::WishlistId.eq(list.id))
            .filter(wishlist_item::Column::ProductId.eq(product_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Product is not on the wishlist".into()))?;
        item.delete(&*self.db).await?;
        Ok(())
    }

    /// Wishlisted products, newest first, skipping anything soft-deleted.
    pub async fn list(&self, customer_id: Uuid) -> Result<Vec<ProductModel>, ServiceError> {
        let list = self.find_or_create(customer_id).await?;
        let items = WishlistItem::find()
            .filter(wishlist_item::Column::WishlistId.eq(list.id))
            .order_by_desc(wishlist_item::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        let mut products = Vec::with_capacity(items.len());
        for item in items {
            if let Some(p) = Product::find_by_id(item.product_id)
                .filter(product::Column::IsDeleted.eq(false))
                .one(&*self.db)
                .await?
            {
                products.push(p);
            }
        }
        Ok(products)
    }
}
