mod common;

use axum::http::{Method, StatusCode};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use uuid::Uuid;

use common::{checkout_body, response_json, TestApp};

/// Places a cash-on-delivery order and returns its slug.
async fn place_cod_order(app: &TestApp, caller: &settlement_api::auth::AuthUser, product_id: Uuid, quantity: i32) -> String {
    app.add_to_cart(caller, product_id, quantity).await;
    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(checkout_body("cash_on_delivery")),
            Some(caller),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    response_json(response).await["data"]["order"]["orderSlug"]
        .as_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn missing_identity_is_unauthorized() {
    let app = TestApp::new().await;
    let response = app.request(Method::GET, "/api/v1/cart", None, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app.request(Method::GET, "/api/v1/orders", None, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn customers_cannot_reach_admin_routes() {
    let app = TestApp::new().await;
    let customer = app.customer();
    let response = app
        .request(
            Method::PUT,
            "/api/v1/admin/orders/anything/status",
            Some(json!({ "status": "processing" })),
            Some(&customer),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .request(
            Method::POST,
            "/api/v1/admin/inventory/adjust",
            Some(json!({ "productId": Uuid::new_v4(), "delta": 5 })),
            Some(&customer),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn cart_lifecycle_over_http() {
    let app = TestApp::new().await;
    let customer = app.customer();
    let product_id = app.seed_product("Mug", "kitchen", dec!(2500), 3).await;

    let response = app.request(Method::GET, "/api/v1/cart", None, Some(&customer)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let cart = response_json(response).await;
    assert_eq!(cart["data"]["items"].as_array().unwrap().len(), 0);

    let response = app
        .request(
            Method::POST,
            "/api/v1/cart/items",
            Some(json!({ "productId": product_id, "quantity": 4 })),
            Some(&customer),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let response = app
        .request(
            Method::POST,
            "/api/v1/cart/items",
            Some(json!({ "productId": product_id, "quantity": 2 })),
            Some(&customer),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .request(
            Method::PATCH,
            "/api/v1/cart/items",
            Some(json!({ "productId": product_id, "quantity": 3 })),
            Some(&customer),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let cart = response_json(response).await;
    assert_eq!(cart["data"]["items"][0]["quantity"], 3);

    let response = app
        .request(Method::GET, "/api/v1/cart/stock", None, Some(&customer))
        .await;
    assert_eq!(response_json(response).await["data"]["valid"], true);

    let response = app
        .request(
            Method::DELETE,
            &format!("/api/v1/cart/items/{product_id}"),
            None,
            Some(&customer),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let cart = response_json(response).await;
    assert!(cart["data"]["items"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_coupon_is_rejected() {
    let app = TestApp::new().await;
    let customer = app.customer();
    let product_id = app.seed_product("Pan", "kitchen", dec!(9000), 3).await;
    app.add_to_cart(&customer, product_id, 1).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/cart/coupons",
            Some(json!({ "code": "NOPE" })),
            Some(&customer),
        )
        .await;
    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn fee_estimate_applies_provider_schedule() {
    let app = TestApp::new().await;
    let response = app
        .request(
            Method::GET,
            "/api/v1/payments/fees?subTotal=10000&provider=OPAY",
            None,
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["provider"], "opay");
    let charge: Decimal = body["data"]["serviceCharge"].as_str().unwrap().parse().unwrap();
    assert_eq!(charge, dec!(250));

    let response = app
        .request(
            Method::GET,
            "/api/v1/payments/fees?subTotal=10000&provider=stripe",
            None,
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn webhook_for_unknown_provider_is_bad_request() {
    let app = TestApp::new().await;
    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/webhook/stripe",
            Some(json!({ "event": "charge.success" })),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn admin_drives_fulfilment_and_customer_rates() {
    let app = TestApp::new().await;
    let customer = app.customer();
    let admin = app.admin();
    let product_id = app.seed_product("Shelf", "furniture", dec!(40000), 2).await;
    let slug = place_cod_order(&app, &customer, product_id, 1).await;

    for (status, extra) in [
        ("processing", json!({})),
        ("shipped", json!({ "trackingNumber": "TRK-1" })),
        ("delivered", json!({})),
    ] {
        let mut body = extra;
        body["status"] = json!(status);
        let response = app
            .request(
                Method::PUT,
                &format!("/api/v1/admin/orders/{slug}/status"),
                Some(body),
                Some(&admin),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK, "moving to {status}");
        assert_eq!(response_json(response).await["data"]["orderStatus"], status);
    }

    // Delivered orders can no longer be cancelled.
    let response = app
        .request(Method::POST, &format!("/api/v1/orders/{slug}/cancel"), None, Some(&customer))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{slug}/rating"),
            Some(json!({ "rating": 6 })),
            Some(&customer),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{slug}/rating"),
            Some(json!({ "rating": 5, "review": "Sturdy" })),
            Some(&customer),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_json(response).await["data"]["rating"], 5);

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{slug}/return"),
            Some(json!({ "reason": "Wrong colour" })),
            Some(&customer),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_json(response).await["data"]["orderStatus"], "returned");
}

#[tokio::test]
async fn customer_cancel_restocks_confirmed_cod_order() {
    let app = TestApp::new().await;
    let customer = app.customer();
    let product_id = app.seed_product("Vase", "home", dec!(6000), 3).await;
    let slug = place_cod_order(&app, &customer, product_id, 2).await;
    assert_eq!(app.product_stock(product_id).await, 1);

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{slug}/cancel"),
            Some(json!({ "reason": "Changed my mind" })),
            Some(&customer),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["orderStatus"], "cancelled");
    assert_eq!(body["data"]["cancellationReason"], "Changed my mind");
    assert_eq!(app.product_stock(product_id).await, 3);
}

#[tokio::test]
async fn orders_are_private_to_their_owner() {
    let app = TestApp::new().await;
    let owner = app.customer();
    let other = app.customer();
    let product_id = app.seed_product("Clock", "home", dec!(5000), 5).await;
    let slug = place_cod_order(&app, &owner, product_id, 1).await;

    let response = app
        .request(Method::GET, &format!("/api/v1/orders/{slug}"), None, Some(&other))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .request(Method::GET, "/api/v1/orders?page=1&perPage=10", None, Some(&owner))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"]["pagination"]["total"], 1);

    let response = app.request(Method::GET, "/api/v1/orders", None, Some(&other)).await;
    let body = response_json(response).await;
    assert!(body["data"]["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn admin_adjusts_stock() {
    let app = TestApp::new().await;
    let admin = app.admin();
    let product_id = app.seed_product("Stool", "furniture", dec!(11000), 2).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/admin/inventory/adjust",
            Some(json!({ "productId": product_id, "delta": 8, "reason": "restock" })),
            Some(&admin),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_json(response).await["data"]["stock"], 10);

    let response = app
        .request(
            Method::POST,
            "/api/v1/admin/inventory/adjust",
            Some(json!({ "productId": product_id, "delta": -20 })),
            Some(&admin),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(app.product_stock(product_id).await, 10);

    let response = app
        .request(
            Method::POST,
            "/api/v1/admin/inventory/adjust",
            Some(json!({ "productId": product_id, "delta": 0 })),
            Some(&admin),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn health_and_openapi_are_served() {
    let app = TestApp::new().await;

    let response = app.request(Method::GET, "/api/v1/health", None, None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.request(Method::GET, "/api/v1/health/ready", None, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["status"], "ready");
    assert_eq!(body["providers"], json!(["paystack"]));

    let response = app.request(Method::GET, "/api-docs/openapi.json", None, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let doc = response_json(response).await;
    assert_eq!(doc["info"]["title"], "Settlement API");
}

#[tokio::test]
async fn expired_cart_is_replaced_on_access() {
    use sea_orm::{ActiveModelTrait, ActiveValue::Set, EntityTrait, IntoActiveModel};
    use settlement_api::entities::commerce::cart::Entity as CartEntity;

    let app = TestApp::new().await;
    let customer = app.customer();
    let product_id = app.seed_product("Mug", "kitchen", dec!(1500), 10).await;
    app.add_to_cart(&customer, product_id, 2).await;
    let stale = app.state.services.carts.get_cart(customer.user_id).await.unwrap();

    let row = CartEntity::find_by_id(stale.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .expect("cart row");
    let mut active = row.into_active_model();
    active.expires_at = Set(chrono::Utc::now() - chrono::Duration::minutes(1));
    active.update(&*app.state.db).await.unwrap();

    let response = app
        .request(Method::GET, "/api/v1/cart", None, Some(&customer))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_ne!(body["data"]["id"], json!(stale.id));
    assert_eq!(body["data"]["items"].as_array().map(Vec::len), Some(0));

    let old = CartEntity::find_by_id(stale.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .expect("cart row");
    assert!(!old.is_active);
    assert!(old.active_user_id.is_none());
}
