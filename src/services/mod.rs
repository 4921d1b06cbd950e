// Pure pricing math
pub mod pricing;

// Storefront
pub mod cart;
pub mod catalog;
pub mod checkout;
pub mod coupons;
pub mod wishlist;

// Orders and money movement
pub mod orders;
pub mod payments;
pub mod returns;
pub mod wallet;

// Accounts
pub mod addresses;
pub mod customers;
