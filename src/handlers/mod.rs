pub mod addresses;
pub mod admin;
pub mod carts;
pub mod checkout;
pub mod common;
pub mod customers;
pub mod orders;
pub mod payments;
pub mod products;
pub mod wallet;
pub mod wishlist;

use crate::{
    auth::AuthService,
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    services::{
        addresses::AddressService, cart::CartService, catalog::CatalogService,
        checkout::CheckoutService, coupons::CouponService, customers::CustomerService,
        orders::OrderService, payments::PaymentGateway, payments::PaymentService,
        returns::ReturnService, wallet::WalletService, wishlist::WishlistService,
    },
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub catalog: CatalogService,
    pub carts: CartService,
    pub coupons: CouponService,
    pub checkout: CheckoutService,
    pub orders: OrderService,
    pub payments: PaymentService,
    pub returns: ReturnService,
    pub wallets: WalletService,
    pub customers: CustomerService,
    pub addresses: AddressService,
    pub wishlists: WishlistService,
}

impl AppServices {
    pub fn new(
        db: Arc<DbPool>,
        config: Arc<AppConfig>,
        event_sender: EventSender,
        gateway: Arc<dyn PaymentGateway>,
        auth: Arc<AuthService>,
    ) -> Self {
        let catalog = CatalogService::new(db.clone(), event_sender.clone());
        let carts = CartService::new(db.clone(), config.clone(), event_sender.clone());
        let coupons = CouponService::new(db.clone(), event_sender.clone());
        let wallets = WalletService::new(db.clone(), event_sender.clone());
        let checkout = CheckoutService::new(
            db.clone(),
            config.clone(),
            event_sender.clone(),
            gateway.clone(),
            carts.clone(),
            wallets.clone(),
        );
        let orders = OrderService::new(db.clone(), event_sender.clone(), wallets.clone());
        let payments = PaymentService::new(
            db.clone(),
            config.clone(),
            event_sender.clone(),
            gateway,
            carts.clone(),
        );
        let returns = ReturnService::new(db.clone(), event_sender.clone(), wallets.clone());
        let customers = CustomerService::new(
            db.clone(),
            config.clone(),
            event_sender.clone(),
            auth,
            wallets.clone(),
        );
        let addresses = AddressService::new(db.clone());
        let wishlists = WishlistService::new(db);

        Self {
            catalog,
            carts,
            coupons,
            checkout,
            orders,
            payments,
            returns,
            wallets,
            customers,
            addresses,
            wishlists,
        }
    }
}
