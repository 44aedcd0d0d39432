mod common;

use common::year_2023;
use observatory::apis::factory::create_adapter;
use observatory::config::{AuthConfig, SourceConfig};
use observatory::error::SourceError;
use observatory::infra::http_client::ReqwestHttp;
use observatory::types::SourceAdapter;
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{body_string_contains, header, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn adapter(config: &SourceConfig) -> Arc<dyn SourceAdapter> {
    create_adapter(config, Arc::new(ReqwestHttp::new())).expect("supported kind")
}

#[tokio::test]
async fn claims_rows_are_fetched_for_the_window() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/prescriptions"))
        .and(query_param("from", "2023-01-01"))
        .and(query_param("to", "2023-12-31"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                {"id": "c-1", "region": "11", "period": "2023-Q1", "drug": "ritaline", "prescriptions": 120},
                {"id": "c-2", "region": "11", "period": "2021-Q4", "drug": "ritaline", "prescriptions": 80},
                {"id": "c-3", "period": "2023-Q2", "prescriptions": 5}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = SourceConfig::new("claims-main", "claims", &server.uri());
    let batch = adapter(&config).fetch(&year_2023(), &config).await.unwrap();

    assert_eq!(batch.records.len(), 1);
    let record = &batch.records[0];
    assert_eq!(record.source_id, "claims-main");
    assert_eq!(record.source_record_id, "c-1");
    assert_eq!(record.fields["prescriptions"], json!(120));
    assert_eq!(record.fields["indicator"], json!(format!("{}:ritaline", config.indicator)));
    assert_eq!(batch.skipped_rows.len(), 1);
    assert!(batch.skipped_rows[0].contains("row 2"));
}

#[tokio::test]
async fn bearer_and_api_key_credentials_come_from_the_environment() {
    std::env::set_var("OBS_TEST_BEARER_TOKEN", "tok-123");
    std::env::set_var("OBS_TEST_API_KEY", "key-456");

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/prescriptions"))
        .and(header("authorization", "Bearer tok-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": []})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/utilisation"))
        .and(header("x-api-key", "key-456"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"records": []})))
        .expect(1)
        .mount(&server)
        .await;

    let mut bearer = SourceConfig::new("claims-main", "claims", &server.uri());
    bearer.auth = AuthConfig::Bearer {
        token_env: "OBS_TEST_BEARER_TOKEN".to_string(),
    };
    let batch = adapter(&bearer).fetch(&year_2023(), &bearer).await.unwrap();
    assert!(batch.records.is_empty());

    let mut api_key = SourceConfig::new("meds", "medication", &server.uri());
    api_key.auth = AuthConfig::ApiKey {
        header: "X-Api-Key".to_string(),
        key_env: "OBS_TEST_API_KEY".to_string(),
    };
    adapter(&api_key).fetch(&year_2023(), &api_key).await.unwrap();
}

#[tokio::test]
async fn missing_credential_is_an_auth_failure() {
    let server = MockServer::start().await;
    let mut config = SourceConfig::new("claims-main", "claims", &server.uri());
    config.auth = AuthConfig::Bearer {
        token_env: "OBS_TEST_UNSET_TOKEN".to_string(),
    };
    let err = adapter(&config).fetch(&year_2023(), &config).await.unwrap_err();
    assert!(matches!(err, SourceError::Auth { .. }));
    assert!(err.to_string().contains("OBS_TEST_UNSET_TOKEN"));
}

#[tokio::test]
async fn http_statuses_map_onto_error_classes() {
    let cases = [
        (503, "unavailable"),
        (429, "unavailable"),
        (401, "auth"),
        (403, "auth"),
        (404, "schema"),
    ];
    for (status, kind) in cases {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&server)
            .await;
        let config = SourceConfig::new("claims-main", "claims", &server.uri());
        let err = adapter(&config).fetch(&year_2023(), &config).await.unwrap_err();
        assert_eq!(err.kind(), kind, "HTTP {}", status);
        assert_eq!(err.is_retryable(), kind == "unavailable");
    }
}

#[tokio::test]
async fn malformed_payloads_are_schema_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/prescriptions"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/population"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"rows": []})))
        .mount(&server)
        .await;

    let claims = SourceConfig::new("claims-main", "claims", &server.uri());
    let err = adapter(&claims).fetch(&year_2023(), &claims).await.unwrap_err();
    assert!(matches!(err, SourceError::Schema { .. }));

    let population = SourceConfig::new("insee", "population", &server.uri());
    let err = adapter(&population)
        .fetch(&year_2023(), &population)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("'data'"));
}

#[tokio::test]
async fn client_credentials_token_is_exchanged_once_and_reused() {
    std::env::set_var("OBS_TEST_CLIENT_ID", "client");
    std::env::set_var("OBS_TEST_CLIENT_SECRET", "s3cret");

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(header_exists("authorization"))
        .and(body_string_contains("grant_type=client_credentials"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "granted-789",
            "token_type": "Bearer",
            "expires_in": 604800
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/population"))
        .and(query_param("startYear", "2023"))
        .and(query_param("endYear", "2023"))
        .and(header("authorization", "Bearer granted-789"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {"codeGeo": "11", "year": 2023, "population_6_17": 1800000, "population_total": 12300000},
                {"codeGeo": "53", "year": 2023, "population_6_17": 470000}
            ]
        })))
        .expect(2)
        .mount(&server)
        .await;

    let mut config = SourceConfig::new("insee", "population", &server.uri());
    config.auth = AuthConfig::ClientCredentials {
        token_url: format!("{}/token", server.uri()),
        key_env: "OBS_TEST_CLIENT_ID".to_string(),
        secret_env: "OBS_TEST_CLIENT_SECRET".to_string(),
    };
    let source = adapter(&config);
    let first = source.fetch(&year_2023(), &config).await.unwrap();
    let second = source.fetch(&year_2023(), &config).await.unwrap();

    assert_eq!(first.records.len(), 2);
    assert_eq!(first.records[0].fields["period"], json!("2023"));
    assert_eq!(first.records[1].fields.get("population_total"), None);
    // rows without an id column get a content-derived id
    assert_eq!(
        first.records[0].source_record_id,
        second.records[0].source_record_id
    );
}

#[tokio::test]
async fn rejected_token_exchange_is_an_auth_failure() {
    std::env::set_var("OBS_TEST_BAD_CLIENT_ID", "client");
    std::env::set_var("OBS_TEST_BAD_CLIENT_SECRET", "wrong");

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let mut config = SourceConfig::new("insee", "population", &server.uri());
    config.auth = AuthConfig::ClientCredentials {
        token_url: format!("{}/token", server.uri()),
        key_env: "OBS_TEST_BAD_CLIENT_ID".to_string(),
        secret_env: "OBS_TEST_BAD_CLIENT_SECRET".to_string(),
    };
    let err = adapter(&config).fetch(&year_2023(), &config).await.unwrap_err();
    assert!(matches!(err, SourceError::Auth { .. }));
    assert!(!err.to_string().contains("wrong"));
}
