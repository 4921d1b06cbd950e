use crate::{
    entities::{
        category, product, product_variant, Category, CategoryModel, Product, ProductModel,
        ProductVariant, ProductVariantModel,
    },
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

/// Catalog reads and admin-side catalog management.
///
/// Stock mutation lives here as two guarded primitives, [`decrement_stock`]
/// and [`restore_stock`], generic over the connection so checkout and
/// cancellation can call them inside their own transactions.
#[derive(Clone)]
pub struct CatalogService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateCategoryInput {
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateProductInput {
    pub category_id: Uuid,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(length(max = 5000))]
    pub description: Option<String>,
    #[validate(range(min = 0.0, max = 100.0))]
    pub offer_percent: Option<f64>,
    pub images: Option<Vec<String>>,
    pub variants: Vec<CreateVariantInput>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateVariantInput {
    #[validate(length(min = 1, max = 40))]
    pub size: String,
    pub price: Decimal,
    pub sale_price: Option<Decimal>,
    #[validate(range(min = 0))]
    pub stock_quantity: i32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateProductInput {
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    #[validate(length(max = 5000))]
    pub description: Option<String>,
    pub category_id: Option<Uuid>,
    #[validate(range(min = 0.0, max = 100.0))]
    pub offer_percent: Option<f64>,
    pub images: Option<Vec<String>>,
    pub is_listed: Option<bool>,
}

impl CatalogService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    #[instrument(skip(self))]
    pub async fn create_category(
        &self,
        input: CreateCategoryInput,
    ) -> Result<CategoryModel, ServiceError> {
        input.validate().map_err(|e| ServiceError::ValidationError(e.to_string()))?;
        let now = Utc::now();
        let model = category::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(input.name),
            description: Set(input.description),
            is_listed: Set(true),
            is_deleted: Set(false),
            created_at: Set(now),
            updated_at: Set(now),
        };
        Ok(model.insert(&*self.db).await?)
    }

    pub async fn list_categories(&self, include_hidden: bool) -> Result<Vec<CategoryModel>, ServiceError> {
        let mut query = Category::find().filter(category::Column::IsDeleted.eq(false));
        if !include_hidden {
            query = query.filter(category::Column::IsListed.eq(true));
        }
        Ok(query.order_by_asc(category::Column::Name).all(&*self.db).await?)
    }

    pub async fn set_category_listed(&self, id: Uuid, listed: bool) -> Result<CategoryModel, ServiceError> {
        let existing = Category::find_by_id(id)
            .filter(category::Column::IsDeleted.eq(false))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Category {} not found", id)))?;
        let mut active: category::ActiveModel = existing.into();
        active.is_listed = Set(listed);
        active.updated_at = Set(Utc::now());
        Ok(active.update(&*self.db).await?)
    }

    pub async fn delete_category(&self, id: Uuid) -> Result<(), ServiceError> {
        let in_use = Product::find()
            .filter(product::Column::CategoryId.eq(id))
            .filter(product::Column::IsDeleted.eq(false))
            .count(&*self.db)
            .await?;
        if in_use > 0 {
            return Err(ServiceError::InvalidOperation(
                "Category still has products".into(),
            ));
        }
        let existing = Category::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Category {} not found", id)))?;
        let mut active: category::ActiveModel = existing.into();
        active.is_deleted = Set(true);
        active.updated_at = Set(Utc::now());
        active.update(&*self.db).await?;
        Ok(())
    }

    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create_product(
        &self,
        input: CreateProductInput,
    ) -> Result<ProductModel, ServiceError> {
        input.validate().map_err(|e| ServiceError::ValidationError(e.to_string()))?;
        if input.variants.is_empty() {
            return Err(ServiceError::ValidationError(
                "A product needs at least one variant".into(),
            ));
        }
        for v in &input.variants {
            v.validate().map_err(|e| ServiceError::ValidationError(e.to_string()))?;
            if v.price <= Decimal::ZERO {
                return Err(ServiceError::ValidationError("Price must be positive".into()));
            }
            if let Some(sale) = v.sale_price {
                if sale > v.price {
                    return Err(ServiceError::ValidationError(
                        "Sale price cannot exceed list price".into(),
                    ));
                }
            }
        }
        Category::find_by_id(input.category_id)
            .filter(category::Column::IsDeleted.eq(false))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Category {} not found", input.category_id)))?;

        let now = Utc::now();
        let offer = Decimal::from_f64_retain(input.offer_percent.unwrap_or(0.0))
            .unwrap_or(Decimal::ZERO)
            .round_dp(2);
        let product_model = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            category_id: Set(input.category_id),
            name: Set(input.name),
            description: Set(input.description),
            offer_percent: Set(offer),
            images: Set(input.images.map(|i| serde_json::json!(i))),
            is_listed: Set(true),
            is_deleted: Set(false),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        for v in input.variants {
            product_variant::ActiveModel {
                id: Set(Uuid::new_v4()),
                product_id: Set(product_model.id),
                size: Set(v.size),
                price: Set(v.price),
                sale_price: Set(v.sale_price.unwrap_or(v.price)),
                stock_quantity: Set(v.stock_quantity),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(&*self.db)
            .await?;
        }

        info!(product_id = %product_model.id, "product created");
        self.event_sender
            .send_or_log(Event::ProductCreated(product_model.id))
            .await;
        Ok(product_model)
    }

    #[instrument(skip(self, input))]
    pub async fn update_product(
        &self,
        id: Uuid,
        input: UpdateProductInput,
    ) -> Result<ProductModel, ServiceError> {
        input.validate().map_err(|e| ServiceError::ValidationError(e.to_string()))?;
        let existing = Product::find_by_id(id)
            .filter(product::Column::IsDeleted.eq(false))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", id)))?;
        let mut active: product::ActiveModel = existing.into();
        if let Some(name) = input.name {
            active.name = Set(name);
        }
        if let Some(description) = input.description {
            active.description = Set(Some(description));
        }
        if let Some(category_id) = input.category_id {
            Category::find_by_id(category_id)
                .filter(category::Column::IsDeleted.eq(false))
                .one(&*self.db)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Category {} not found", category_id))
                })?;
            active.category_id = Set(category_id);
        }
        if let Some(offer) = input.offer_percent {
            active.offer_percent = Set(Decimal::from_f64_retain(offer)
                .unwrap_or(Decimal::ZERO)
                .round_dp(2));
        }
        if let Some(images) = input.images {
            active.images = Set(Some(serde_json::json!(images)));
        }
        if let Some(listed) = input.is_listed {
            active.is_listed = Set(listed);
            if !listed {
                self.event_sender.send_or_log(Event::ProductDelisted(id)).await;
            }
        }
        active.updated_at = Set(Utc::now());
        let updated = active.update(&*self.db).await?;
        self.event_sender.send_or_log(Event::ProductUpdated(id)).await;
        Ok(updated)
    }

    pub async fn delete_product(&self, id: Uuid) -> Result<(), ServiceError> {
        let existing = Product::find_by_id(id)
            .filter(product::Column::IsDeleted.eq(false))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", id)))?;
        let mut active: product::ActiveModel = existing.into();
        active.is_deleted = Set(true);
        active.is_listed = Set(false);
        active.updated_at = Set(Utc::now());
        active.update(&*self.db).await?;
        self.event_sender.send_or_log(Event::ProductDelisted(id)).await;
        Ok(())
    }

    /// Storefront listing: visible products only, newest first.
    pub async fn list_products(
        &self,
        category_id: Option<Uuid>,
        search: Option<String>,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<ProductModel>, u64), ServiceError> {
        let mut query = Product::find()
            .filter(product::Column::IsDeleted.eq(false))
            .filter(product::Column::IsListed.eq(true));
        if let Some(category_id) = category_id {
            query = query.filter(product::Column::CategoryId.eq(category_id));
        }
        if let Some(term) = search {
            let term = term.trim();
            if !term.is_empty() {
                query = query.filter(product::Column::Name.contains(term));
            }
        }
        let paginator = query
            .order_by_desc(product::Column::CreatedAt)
            .paginate(&*self.db, per_page.clamp(1, 100));
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((items, total))
    }

    /// Admin listing: includes delisted products, excludes soft-deleted ones.
    pub async fn list_products_admin(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<ProductModel>, u64), ServiceError> {
        let paginator = Product::find()
            .filter(product::Column::IsDeleted.eq(false))
            .order_by_desc(product::Column::CreatedAt)
            .paginate(&*self.db, per_page.clamp(1, 100));
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((items, total))
    }

    pub async fn get_product(
        &self,
        id: Uuid,
    ) -> Result<(ProductModel, Vec<ProductVariantModel>), ServiceError> {
        let product = Product::find_by_id(id)
            .filter(product::Column::IsDeleted.eq(false))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", id)))?;
        let variants = ProductVariant::find()
            .filter(product_variant::Column::ProductId.eq(id))
            .order_by_asc(product_variant::Column::Price)
            .all(&*self.db)
            .await?;
        Ok((product, variants))
    }

    pub async fn get_variant(&self, variant_id: Uuid) -> Result<ProductVariantModel, ServiceError> {
        ProductVariant::find_by_id(variant_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Variant {} not found", variant_id)))
    }

    #[instrument(skip(self))]
    pub async fn set_variant_stock(
        &self,
        variant_id: Uuid,
        stock_quantity: i32,
    ) -> Result<ProductVariantModel, ServiceError> {
        if stock_quantity < 0 {
            return Err(ServiceError::ValidationError("Stock cannot be negative".into()));
        }
        let existing = self.get_variant(variant_id).await?;
        let delta = stock_quantity - existing.stock_quantity;
        let mut active: product_variant::ActiveModel = existing.into();
        active.stock_quantity = Set(stock_quantity);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&*self.db).await?;
        self.event_sender
            .send_or_log(Event::StockAdjusted { variant_id, delta })
            .await;
        Ok(updated)
    }

    pub async fn update_variant_pricing(
        &self,
        variant_id: Uuid,
        price: Decimal,
        sale_price: Option<Decimal>,
    ) -> Result<ProductVariantModel, ServiceError> {
        if price <= Decimal::ZERO {
            return Err(ServiceError::ValidationError("Price must be positive".into()));
        }
        let sale = sale_price.unwrap_or(price);
        if sale > price {
            return Err(ServiceError::ValidationError(
                "Sale price cannot exceed list price".into(),
            ));
        }
        let existing = self.get_variant(variant_id).await?;
        let mut active: product_variant::ActiveModel = existing.into();
        active.price = Set(price);
        active.sale_price = Set(sale);
        active.updated_at = Set(Utc::now());
        Ok(active.update(&*self.db).await?)
    }
}

/// Atomically takes `quantity` units off a variant, failing without side
/// effects when stock is short. The guard rides in the WHERE clause, so
/// concurrent checkouts can never drive stock negative.
pub async fn decrement_stock<C: ConnectionTrait>(
    conn: &C,
    variant_id: Uuid,
    quantity: i32,
) -> Result<(), ServiceError> {
    let result = ProductVariant::update_many()
        .col_expr(
            product_variant::Column::StockQuantity,
            Expr::col(product_variant::Column::StockQuantity).sub(quantity),
        )
        .col_expr(
            product_variant::Column::UpdatedAt,
            Expr::value(Utc::now()),
        )
        .filter(product_variant::Column::Id.eq(variant_id))
        .filter(product_variant::Column::StockQuantity.gte(quantity))
        .exec(conn)
        .await?;
    if result.rows_affected == 0 {
        return Err(ServiceError::InsufficientStock(format!(
            "Variant {} has fewer than {} units in stock",
            variant_id, quantity
        )));
    }
    Ok(())
}

/// Puts units back on a variant after a cancellation or rejected return.
pub async fn restore_stock<C: ConnectionTrait>(
    conn: &C,
    variant_id: Uuid,
    quantity: i32,
) -> Result<(), ServiceError> {
    let result = ProductVariant::update_many()
        .col_expr(
            product_variant::Column::StockQuantity,
            Expr::col(product_variant::Column::StockQuantity).add(quantity),
        )
        .col_expr(
            product_variant::Column::UpdatedAt,
            Expr::value(Utc::now()),
        )
        .filter(product_variant::Column::Id.eq(variant_id))
        .exec(conn)
        .await?;
    if result.rows_affected == 0 {
        return Err(ServiceError::NotFound(format!(
            "Variant {} not found",
            variant_id
        )));
    }
    Ok(())
}
