use std::time::Duration;

use assert_matches::assert_matches;
use rust_decimal_macros::dec;
use serde_json::json;
use settlement_api::{
    config::{PaymentsConfig, ProviderCredentials},
    services::payments::{
        GatewayError, PaymentData, PaymentGatewayFacade, PaymentProvider, ProviderPaymentStatus,
    },
};
use uuid::Uuid;
use wiremock::{
    matchers::{body_partial_json, header, header_exists, method, path},
    Mock, MockServer, ResponseTemplate,
};

fn credentials(server: &MockServer) -> ProviderCredentials {
    ProviderCredentials {
        base_url: server.uri(),
        public_key: "pk_test".to_string(),
        secret_key: "sk_test".to_string(),
        merchant_id: Some("M100".to_string()),
        app_id: None,
    }
}

fn payments_config(provider: PaymentProvider, server: &MockServer) -> PaymentsConfig {
    let mut cfg = PaymentsConfig {
        http_timeout_secs: 1,
        verify_max_attempts: 3,
        verify_initial_backoff_ms: 0,
        ..PaymentsConfig::default()
    };
    match provider {
        PaymentProvider::Paystack => cfg.paystack = credentials(server),
        PaymentProvider::Palmpay => cfg.palmpay = credentials(server),
        PaymentProvider::Opay => cfg.opay = credentials(server),
    }
    cfg
}

fn payment_data(reference: &str) -> PaymentData {
    PaymentData {
        reference: reference.to_string(),
        amount: dec!(12500),
        currency: "NGN".to_string(),
        email: Some("buyer@shop.test".to_string()),
        user_id: Uuid::new_v4(),
        order_ids: vec![Uuid::new_v4()],
        callback_url: "http://localhost:8080/api/v1/payments/callback".to_string(),
        description: "Order ORD-1".to_string(),
    }
}

#[tokio::test]
async fn paystack_initialize_sends_kobo_and_bearer_secret() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/transaction/initialize"))
        .and(header("authorization", "Bearer sk_test"))
        .and(body_partial_json(json!({
            "amount": 1_250_000,
            "reference": "PAY_a_1",
            "email": "buyer@shop.test",
            "currency": "NGN",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": true,
            "message": "Authorization URL created",
            "data": {
                "authorization_url": "https://checkout.paystack.com/abc",
                "access_code": "abc",
                "reference": "PAY_a_1",
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let facade =
        PaymentGatewayFacade::from_config(&payments_config(PaymentProvider::Paystack, &server))
            .unwrap();
    let init = facade
        .initialize_payment(PaymentProvider::Paystack, &payment_data("PAY_a_1"))
        .await
        .unwrap();

    assert_eq!(init.reference, "PAY_a_1");
    assert_eq!(init.amount_minor, 1_250_000);
    assert_eq!(
        init.checkout_url.as_deref(),
        Some("https://checkout.paystack.com/abc")
    );
    assert_eq!(init.access_code.as_deref(), Some("abc"));
}

#[tokio::test]
async fn paystack_refusal_is_reported_in_the_envelope() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/transaction/initialize"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": false,
            "message": "Duplicate Transaction Reference",
        })))
        .mount(&server)
        .await;

    let facade =
        PaymentGatewayFacade::from_config(&payments_config(PaymentProvider::Paystack, &server))
            .unwrap();
    let response = facade.initialize("paystack", &payment_data("PAY_dup_1")).await;

    assert!(!response.success);
    assert_eq!(response.provider, "paystack");
    assert!(response
        .error
        .unwrap()
        .contains("Duplicate Transaction Reference"));
}

#[tokio::test]
async fn paystack_verify_retries_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/transaction/verify/PAY_b_2"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/transaction/verify/PAY_b_2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": true,
            "data": {
                "id": 4099260516_i64,
                "status": "success",
                "reference": "PAY_b_2",
                "amount": 1_250_000,
                "currency": "NGN",
                "paid_at": "2024-05-01T10:00:00Z",
                "gateway_response": "Approved",
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let facade =
        PaymentGatewayFacade::from_config(&payments_config(PaymentProvider::Paystack, &server))
            .unwrap();
    let verified = facade
        .verify_payment(PaymentProvider::Paystack, "PAY_b_2")
        .await
        .unwrap();

    assert_eq!(verified.status, ProviderPaymentStatus::Success);
    assert_eq!(verified.amount_minor, 1_250_000);
    assert_eq!(verified.transaction_id.as_deref(), Some("4099260516"));
}

#[tokio::test]
async fn verify_gives_up_after_max_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/transaction/verify/PAY_c_3"))
        .respond_with(ResponseTemplate::new(502))
        .expect(3)
        .mount(&server)
        .await;

    let facade =
        PaymentGatewayFacade::from_config(&payments_config(PaymentProvider::Paystack, &server))
            .unwrap();
    let err = facade
        .verify_payment(PaymentProvider::Paystack, "PAY_c_3")
        .await
        .unwrap_err();
    assert_matches!(err, GatewayError::Http { status: 502, .. });
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/transaction/verify/PAY_d_4"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "status": false,
            "message": "Transaction reference not found",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let facade =
        PaymentGatewayFacade::from_config(&payments_config(PaymentProvider::Paystack, &server))
            .unwrap();
    let err = facade
        .verify_payment(PaymentProvider::Paystack, "PAY_d_4")
        .await
        .unwrap_err();
    assert_matches!(err, GatewayError::Http { status: 404, .. });
}

#[tokio::test]
async fn slow_provider_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/transaction/initialize"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(3))
                .set_body_json(json!({ "status": true })),
        )
        .mount(&server)
        .await;

    let facade =
        PaymentGatewayFacade::from_config(&payments_config(PaymentProvider::Paystack, &server))
            .unwrap();
    let err = facade
        .initialize_payment(PaymentProvider::Paystack, &payment_data("PAY_e_5"))
        .await
        .unwrap_err();
    assert_matches!(err, GatewayError::Timeout(PaymentProvider::Paystack));
}

#[tokio::test]
async fn palmpay_requests_are_signed_and_statuses_mapped() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/payment/merchant/createorder"))
        .and(header("authorization", "Bearer pk_test"))
        .and(header("CountryCode", "NG"))
        .and(header_exists("x-palmpay-signature"))
        .and(header_exists("x-palmpay-timestamp"))
        .and(body_partial_json(json!({
            "orderId": "PAY_f_6",
            "amount": 1_250_000,
            "merchantId": "M100",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "respCode": "00000000",
            "respMsg": "success",
            "data": { "orderNo": "PP123", "checkoutUrl": "https://palmpay.test/pay/PP123" }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v2/payment/merchant/order/queryStatus"))
        .and(body_partial_json(json!({ "orderId": "PAY_f_6" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "respCode": "00000000",
            "data": {
                "orderId": "PAY_f_6",
                "orderNo": "PP123",
                "orderStatus": 3,
                "amount": 1_250_000,
                "currency": "NGN",
                "errorMsg": "Insufficient balance",
            }
        })))
        .mount(&server)
        .await;

    let facade =
        PaymentGatewayFacade::from_config(&payments_config(PaymentProvider::Palmpay, &server))
            .unwrap();
    let init = facade
        .initialize_payment(PaymentProvider::Palmpay, &payment_data("PAY_f_6"))
        .await
        .unwrap();
    assert_eq!(init.provider_reference.as_deref(), Some("PP123"));

    let verified = facade
        .verify_payment(PaymentProvider::Palmpay, "PAY_f_6")
        .await
        .unwrap();
    assert_eq!(verified.status, ProviderPaymentStatus::Failed);
    assert_eq!(verified.message.as_deref(), Some("Insufficient balance"));
    assert!(verified.paid_at.is_none());
}

#[tokio::test]
async fn palmpay_error_code_is_a_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/payment/merchant/createorder"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "respCode": "OPEN_GW_000008",
            "respMsg": "sign error",
        })))
        .mount(&server)
        .await;

    let facade =
        PaymentGatewayFacade::from_config(&payments_config(PaymentProvider::Palmpay, &server))
            .unwrap();
    let err = facade
        .initialize_payment(PaymentProvider::Palmpay, &payment_data("PAY_g_7"))
        .await
        .unwrap_err();
    assert_matches!(err, GatewayError::Rejected { ref message, .. } if message.contains("OPEN_GW_000008"));
}

#[tokio::test]
async fn opay_cashier_and_status_round() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/international/cashier/create"))
        .and(header("MerchantId", "M100"))
        .and(header_exists("x-opay-signature"))
        .and(body_partial_json(json!({
            "country": "NG",
            "reference": "PAY_h_8",
            "amount": { "total": 1_250_000, "currency": "NGN" },
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": "00000",
            "message": "SUCCESSFUL",
            "data": { "orderNo": "OP777", "cashierUrl": "https://opay.test/cashier/OP777" }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/international/cashier/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": "00000",
            "data": {
                "reference": "PAY_h_8",
                "orderNo": "OP777",
                "status": "SUCCESS",
                "amount": { "total": "1250000", "currency": "NGN" },
            }
        })))
        .mount(&server)
        .await;

    let facade =
        PaymentGatewayFacade::from_config(&payments_config(PaymentProvider::Opay, &server))
            .unwrap();
    let init = facade
        .initialize_payment(PaymentProvider::Opay, &payment_data("PAY_h_8"))
        .await
        .unwrap();
    assert_eq!(
        init.checkout_url.as_deref(),
        Some("https://opay.test/cashier/OP777")
    );

    let verified = facade
        .verify_payment(PaymentProvider::Opay, "PAY_h_8")
        .await
        .unwrap();
    assert_eq!(verified.status, ProviderPaymentStatus::Success);
    assert_eq!(verified.amount_minor, 1_250_000);
    assert_eq!(verified.transaction_id.as_deref(), Some("OP777"));
}

#[tokio::test]
async fn providers_without_credentials_are_not_configured() {
    let facade = PaymentGatewayFacade::from_config(&PaymentsConfig::default()).unwrap();
    assert!(facade.configured_providers().is_empty());
    let err = facade
        .initialize_payment(PaymentProvider::Opay, &payment_data("PAY_i_9"))
        .await
        .unwrap_err();
    assert_matches!(err, GatewayError::NotConfigured(PaymentProvider::Opay));
}
