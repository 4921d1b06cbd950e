use crate::{
    auth::AuthService,
    config::AppConfig,
    entities::{customer, Customer, CustomerModel, TransactionSource},
    errors::ServiceError,
    events::{Event, EventSender},
    services::wallet::WalletService,
};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::Utc;
use rand::Rng;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

const REFERRAL_CODE_LEN: usize = 8;
const REFERRAL_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Accounts, credentials and the referral program.
#[derive(Clone)]
pub struct CustomerService {
    db: Arc<DatabaseConnection>,
    config: Arc<AppConfig>,
    event_sender: EventSender,
    auth: Arc<AuthService>,
    wallets: WalletService,
}

#[derive(Debug, Deserialize, Validate, utoipa::ToSchema)]
pub struct RegisterInput {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    #[validate(length(min = 8, max = 128))]
    pub password: String,
    #[validate(length(min = 7, max = 20))]
    pub phone: Option<String>,
    pub referral_code: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginInput {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginOutcome {
    pub token: String,
    pub customer: CustomerModel,
}

impl CustomerService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: Arc<AppConfig>,
        event_sender: EventSender,
        auth: Arc<AuthService>,
        wallets: WalletService,
    ) -> Self {
        Self { db, config, event_sender, auth, wallets }
    }

    #[instrument(skip(self, input), fields(email = %input.email))]
    pub async fn register(&self, input: RegisterInput) -> Result<CustomerModel, ServiceError> {
        input.validate().map_err(|e| ServiceError::ValidationError(e.to_string()))?;
        let email = input.email.trim().to_lowercase();

        let exists = Customer::find()
            .filter(customer::Column::Email.eq(email.clone()))
            .one(&*self.db)
            .await?;
        if exists.is_some() {
            return Err(ServiceError::Conflict("Email is already registered".into()));
        }

        let referred_by = match input.referral_code.as_deref().map(str::trim) {
            Some(code) if !code.is_empty() => {
                let referrer = Customer::find()
                    .filter(customer::Column::ReferralCode.eq(code.to_uppercase()))
                    .one(&*self.db)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::ValidationError("Unknown referral code".into())
                    })?;
                Some(referrer.id)
            }
            _ => None,
        };

        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(input.password.as_bytes(), &salt)
            .map_err(|e| ServiceError::InternalError(format!("password hashing failed: {}", e)))?
            .to_string();

        let is_admin = self
            .config
            .bootstrap_admin_email
            .as_deref()
            .is_some_and(|admin| admin.eq_ignore_ascii_case(&email));

        let now = Utc::now();
        let model = customer::ActiveModel {
            id: Set(Uuid::new_v4()),
            email: Set(email),
            name: Set(input.name.trim().to_string()),
            password_hash: Set(password_hash),
            phone: Set(input.phone),
            referral_code: Set(generate_referral_code()),
            referred_by: Set(referred_by),
            is_verified: Set(false),
            is_blocked: Set(false),
            is_admin: Set(is_admin),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        info!(customer_id = %model.id, "customer registered");
        self.event_sender
            .send_or_log(Event::CustomerRegistered(model.id))
            .await;
        Ok(model)
    }

    /// Marks the account verified and, the first time only, pays out the
    /// referral bonuses on both sides.
    #[instrument(skip(self))]
    pub async fn verify(&self, customer_id: Uuid) -> Result<CustomerModel, ServiceError> {
        let txn = self.db.begin().await?;
        let existing = Customer::find_by_id(customer_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Customer not found".into()))?;
        if existing.is_verified {
            txn.commit().await?;
            return Ok(existing);
        }

        let referred_by = existing.referred_by;
        let mut active: customer::ActiveModel = existing.into();
        active.is_verified = Set(true);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&txn).await?;

        if let Some(referrer_id) = referred_by {
            let signup_bonus = self.config.referral_signup_bonus();
            if signup_bonus > Decimal::ZERO {
                self.wallets
                    .credit(
                        &txn,
                        customer_id,
                        signup_bonus,
                        TransactionSource::ReferralSignup,
                        None,
                        "Referral signup bonus",
                    )
                    .await?;
            }
            let reward = self.config.referral_reward();
            if reward > Decimal::ZERO {
                self.wallets
                    .credit(
                        &txn,
                        referrer_id,
                        reward,
                        TransactionSource::ReferralReward,
                        None,
                        "Referral reward",
                    )
                    .await?;
            }
        }
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CustomerVerified(customer_id))
            .await;
        Ok(updated)
    }

    #[instrument(skip(self, input), fields(email = %input.email))]
    pub async fn login(&self, input: LoginInput) -> Result<LoginOutcome, ServiceError> {
        input.validate().map_err(|e| ServiceError::ValidationError(e.to_string()))?;
        let email = input.email.trim().to_lowercase();
        let customer = Customer::find()
            .filter(customer::Column::Email.eq(email))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::Unauthorized("Invalid credentials".into()))?;

        let parsed = PasswordHash::new(&customer.password_hash)
            .map_err(|_| ServiceError::Unauthorized("Invalid credentials".into()))?;
        Argon2::default()
            .verify_password(input.password.as_bytes(), &parsed)
            .map_err(|_| ServiceError::Unauthorized("Invalid credentials".into()))?;

        if customer.is_blocked {
            return Err(ServiceError::Forbidden("Account is blocked".into()));
        }

        let token = self.auth.issue_token(customer.id, customer.is_admin)?;
        Ok(LoginOutcome { token, customer })
    }

    pub async fn get(&self, customer_id: Uuid) -> Result<CustomerModel, ServiceError> {
        Customer::find_by_id(customer_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Customer not found".into()))
    }

    pub async fn list(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<CustomerModel>, u64), ServiceError> {
        let paginator = Customer::find()
            .order_by_desc(customer::Column::CreatedAt)
            .paginate(&*self.db, per_page.clamp(1, 100));
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((items, total))
    }

    #[instrument(skip(self))]
    pub async fn set_blocked(
        &self,
        customer_id: Uuid,
        blocked: bool,
    ) -> Result<CustomerModel, ServiceError> {
        let existing = self.get(customer_id).await?;
        let mut active: customer::ActiveModel = existing.into();
        active.is_blocked = Set(blocked);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&*self.db).await?;
        if blocked {
            self.event_sender
                .send_or_log(Event::CustomerBlocked(customer_id))
                .await;
        }
        Ok(updated)
    }
}

fn generate_referral_code() -> String {
    let mut rng = rand::thread_rng();
    (0..REFERRAL_CODE_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..REFERRAL_CODE_ALPHABET.len());
            REFERRAL_CODE_ALPHABET[idx] as char
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn referral_codes_use_the_unambiguous_alphabet() {
        for _ in 0..100 {
            let code = generate_referral_code();
            assert_eq!(code.len(), REFERRAL_CODE_LEN);
            assert!(code.bytes().all(|b| REFERRAL_CODE_ALPHABET.contains(&b)));
            assert!(!code.contains('O') && !code.contains('0') && !code.contains('I'));
        }
    }
}
