pub mod address;
pub mod cart;
pub mod cart_item;
pub mod category;
pub mod coupon;
pub mod customer;
pub mod order;
pub mod order_item;
pub mod order_status_history;
pub mod product;
pub mod product_variant;
pub mod wallet;
pub mod wallet_transaction;
pub mod wishlist;
pub mod wishlist_item;

// Re-export entities
pub use address::{Entity as Address, Model as AddressModel};
pub use cart::{Entity as Cart, Model as CartModel};
pub use cart_item::{Entity as CartItem, Model as CartItemModel};
pub use category::{Entity as Category, Model as CategoryModel};
pub use coupon::{CouponType, Entity as Coupon, Model as CouponModel};
pub use customer::{Entity as Customer, Model as CustomerModel};
pub use order::{
    Entity as Order, Model as OrderModel, OrderStatus, PaymentMethod, PaymentStatus,
};
pub use order_item::{Entity as OrderItem, Model as OrderItemModel};
pub use order_status_history::{Entity as OrderStatusHistory, Model as OrderStatusHistoryModel};
pub use product::{Entity as Product, Model as ProductModel};
pub use product_variant::{Entity as ProductVariant, Model as ProductVariantModel};
pub use wallet::{Entity as Wallet, Model as WalletModel};
pub use wallet_transaction::{
    Entity as WalletTransaction, Model as WalletTransactionModel, TransactionKind,
    TransactionSource,
};
pub use wishlist::{Entity as Wishlist, Model as WishlistModel};
pub use wishlist_item::{Entity as WishlistItem, Model as WishlistItemModel};
