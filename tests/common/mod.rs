#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request},
    response::Response,
    Router,
};
use chrono::{Duration as ChronoDuration, Utc};
use http_body_util::BodyExt;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, EntityTrait, IntoActiveModel};
use serde_json::{json, Value};
use settlement_api::{
    auth::{AuthUser, USER_EMAIL_HEADER, USER_ID_HEADER, USER_ROLE_HEADER},
    config::AppConfig,
    db,
    entities::commerce::{coupon, product, product_variant, Product, ProductVariant},
    events::{Event, EventSender},
    handlers::AppServices,
    services::{
        notifications::EventNotificationGateway,
        payments::{
            ledger::{LedgerEntry, PaymentLedger},
            signing, to_minor_units, GatewayError, InitializedPayment, PaymentData,
            PaymentGateway, PaymentGatewayFacade, PaymentProvider, ProviderPaymentStatus,
            VerifiedPayment,
        },
    },
    AppState,
};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tower::ServiceExt;
use uuid::Uuid;

pub const MOCK_SIGNATURE_HEADER: &str = "x-mock-signature";
pub const MOCK_SECRET: &str = "mock-webhook-secret";

/// Scriptable stand-in for a payment provider.
pub struct MockGateway {
    provider: PaymentProvider,
    fail_initialize: AtomicBool,
    initialize_calls: AtomicUsize,
    verdicts: Mutex<HashMap<String, VerifiedPayment>>,
}

impl MockGateway {
    pub fn new(provider: PaymentProvider) -> Self {
        Self {
            provider,
            fail_initialize: AtomicBool::new(false),
            initialize_calls: AtomicUsize::new(0),
            verdicts: Mutex::new(HashMap::new()),
        }
    }

    pub fn fail_initialize(&self, fail: bool) {
        self.fail_initialize.store(fail, Ordering::SeqCst);
    }

    pub fn initialize_calls(&self) -> usize {
        self.initialize_calls.load(Ordering::SeqCst)
    }

    /// What `verify` answers for the verdict's reference.
    pub fn set_verdict(&self, verdict: VerifiedPayment) {
        self.verdicts
            .lock()
            .unwrap()
            .insert(verdict.reference.clone(), verdict);
    }

    pub fn sign(payload: &[u8]) -> String {
        signing::hmac_sha256_hex(MOCK_SECRET.as_bytes(), payload).unwrap()
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    fn provider(&self) -> PaymentProvider {
        self.provider
    }

    fn signature_header(&self) -> &'static str {
        MOCK_SIGNATURE_HEADER
    }

    async fn initialize(&self, data: &PaymentData) -> Result<InitializedPayment, GatewayError> {
        self.initialize_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_initialize.load(Ordering::SeqCst) {
            return Err(GatewayError::Timeout(self.provider));
        }
        Ok(InitializedPayment {
            reference: data.reference.clone(),
            checkout_url: Some(format!("https://pay.test/{}", data.reference)),
            access_code: None,
            provider_reference: Some(format!("mock_{}", data.reference)),
            amount_minor: to_minor_units(data.amount)?,
        })
    }

    async fn verify(&self, reference: &str) -> Result<VerifiedPayment, GatewayError> {
        self.verdicts
            .lock()
            .unwrap()
            .get(reference)
            .cloned()
            .ok_or_else(|| GatewayError::Rejected {
                provider: self.provider,
                message: format!("unknown reference {}", reference),
            })
    }

    fn verify_webhook_signature(
        &self,
        payload: &[u8],
        signature: &str,
        _timestamp: Option<&str>,
    ) -> bool {
        signing::constant_time_eq(&Self::sign(payload), signature)
    }

    fn parse_webhook(&self, payload: &[u8]) -> Result<VerifiedPayment, GatewayError> {
        serde_json::from_slice(payload).map_err(|e| GatewayError::Malformed {
            provider: self.provider,
            message: e.to_string(),
        })
    }
}

/// A provider verdict for `reference`.
pub fn verdict(
    reference: &str,
    status: ProviderPaymentStatus,
    amount: Decimal,
) -> VerifiedPayment {
    VerifiedPayment {
        provider: PaymentProvider::Paystack,
        reference: reference.to_string(),
        status,
        amount_minor: to_minor_units(amount).unwrap(),
        currency: Some("NGN".to_string()),
        transaction_id: Some(format!("txn_{}", reference)),
        paid_at: Some(Utc::now()),
        message: None,
    }
}

/// Application wired against in-memory SQLite and a mock Paystack gateway.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: Arc<MockGateway>,
    events: AsyncMutex<mpsc::Receiver<Event>>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Backed by a SQLite file with several pooled connections, for tests
    /// that need writers racing on separate connections.
    pub async fn pooled() -> Self {
        let path = std::env::temp_dir().join(format!("settlement-{}.db", Uuid::new_v4().simple()));
        Self::with_config(|cfg| {
            cfg.database_url = format!("sqlite://{}?mode=rwc", path.display());
            cfg.db_max_connections = 4;
            cfg.db_min_connections = 2;
        })
        .await
    }

    pub async fn with_config(customize: impl FnOnce(&mut AppConfig)) -> Self {
        let mut cfg = AppConfig::new("sqlite::memory:".to_string(), "test".to_string());
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.payments.completed_url = "https://shop.test/orders/completed".to_string();
        cfg.payments.cart_url = "https://shop.test/cart".to_string();
        customize(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations");
        let db = Arc::new(pool);

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);

        let gateway = Arc::new(MockGateway::new(PaymentProvider::Paystack));
        let gateways = Arc::new(
            PaymentGatewayFacade::new(1, Duration::ZERO).with_gateway(gateway.clone()),
        );
        let notifier = Arc::new(EventNotificationGateway::new(event_sender.clone()));
        let services = AppServices::new(db.clone(), &cfg, gateways, notifier);

        let state = AppState {
            db,
            config: cfg,
            event_sender,
            services,
        };
        let router = settlement_api::build_router(state.clone()).expect("router builds");

        Self {
            router,
            state,
            gateway,
            events: AsyncMutex::new(event_rx),
        }
    }

    /// A customer with an email, so Paystack checkouts are accepted.
    pub fn customer(&self) -> AuthUser {
        let mut user = AuthUser::new(Uuid::new_v4());
        user.email = Some(format!("{}@shop.test", user.user_id.simple()));
        user
    }

    pub fn admin(&self) -> AuthUser {
        AuthUser::admin(Uuid::new_v4())
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        caller: Option<&AuthUser>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(caller) = caller {
            builder = builder.header(USER_ID_HEADER, caller.user_id.to_string());
            if !caller.roles.is_empty() {
                builder = builder.header(USER_ROLE_HEADER, caller.roles.join(","));
            }
            if let Some(email) = &caller.email {
                builder = builder.header(USER_EMAIL_HEADER, email.as_str());
            }
        }
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        self.router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap()
    }

    /// Posts a raw webhook body, signed with the mock secret unless a
    /// signature is given.
    pub async fn webhook(&self, payload: &[u8], signature: Option<&str>) -> Response {
        let signature = signature
            .map(str::to_string)
            .unwrap_or_else(|| MockGateway::sign(payload));
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/payments/webhook/paystack")
            .header("content-type", "application/json")
            .header(MOCK_SIGNATURE_HEADER, signature)
            .body(Body::from(payload.to_vec()))
            .unwrap();
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn seed_product(&self, name: &str, category: &str, price: Decimal, stock: i32) -> Uuid {
        let now = Utc::now();
        let model = product::Model {
            id: Uuid::new_v4(),
            name: name.to_string(),
            category: category.to_string(),
            price,
            stock,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        model
            .into_active_model()
            .insert(&*self.state.db)
            .await
            .expect("insert product")
            .id
    }

    pub async fn seed_variant(
        &self,
        product_id: Uuid,
        name: &str,
        price: Option<Decimal>,
        stock: i32,
    ) -> Uuid {
        let now = Utc::now();
        let model = product_variant::Model {
            id: Uuid::new_v4(),
            product_id,
            name: name.to_string(),
            price,
            stock,
            created_at: now,
            updated_at: now,
        };
        model
            .into_active_model()
            .insert(&*self.state.db)
            .await
            .expect("insert variant")
            .id
    }

    /// An active coupon valid from yesterday until next week.
    pub async fn seed_coupon(
        &self,
        code: &str,
        promo_type: &str,
        discount_value: Decimal,
        minimum_order_value: Decimal,
        usage_limit: Option<i32>,
    ) -> Uuid {
        let now = Utc::now();
        let model = coupon::Model {
            id: Uuid::new_v4(),
            coupon_code: code.to_uppercase(),
            promo_type: promo_type.to_string(),
            discount_value,
            usage_limit,
            per_user_limit: None,
            current_usage: 0,
            minimum_order_value,
            applicable_categories: json!([]),
            applicable_products: json!([]),
            start_date_time: now - ChronoDuration::days(1),
            end_date_time: now + ChronoDuration::days(7),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        model
            .into_active_model()
            .insert(&*self.state.db)
            .await
            .expect("insert coupon")
            .id
    }

    pub async fn product_stock(&self, product_id: Uuid) -> i32 {
        Product::find_by_id(product_id)
            .one(&*self.state.db)
            .await
            .unwrap()
            .expect("product exists")
            .stock
    }

    pub async fn variant_stock(&self, variant_id: Uuid) -> i32 {
        ProductVariant::find_by_id(variant_id)
            .one(&*self.state.db)
            .await
            .unwrap()
            .expect("variant exists")
            .stock
    }

    pub async fn ledger_entry(&self, reference: &str) -> LedgerEntry {
        PaymentLedger::new()
            .find_by_reference(&*self.state.db, reference)
            .await
            .unwrap()
            .expect("ledger entry exists")
    }

    /// Puts `quantity` of a product into the caller's cart through the service.
    pub async fn add_to_cart(&self, caller: &AuthUser, product_id: Uuid, quantity: i32) {
        use settlement_api::services::commerce::cart_service::AddCartItemInput;
        self.state
            .services
            .carts
            .add_item(
                caller.user_id,
                AddCartItemInput {
                    product_id,
                    variant_id: None,
                    quantity,
                },
            )
            .await
            .expect("add to cart");
    }

    /// Names of every event published so far that has not been drained.
    pub async fn drain_events(&self) -> Vec<&'static str> {
        let mut rx = self.events.lock().await;
        let mut names = Vec::new();
        while let Ok(event) = rx.try_recv() {
            names.push(event.name());
        }
        names
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    }
}

pub fn checkout_body(payment_method: &str) -> Value {
    json!({
        "shippingAddressId": Uuid::new_v4(),
        "deliveryMethod": "standard",
        "paymentMethod": payment_method,
    })
}
