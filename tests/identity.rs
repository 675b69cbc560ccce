use azchat::client::{AzureOpenAIClientFactory, ChatRequest};
use azchat::identity::{
    BearerTokenProvider, COGNITIVE_SERVICES_SCOPE, ClientSecretCredential, TokenProvider,
};
use azchat::models::{AzChatError, IdentityError, Message, ServicePrincipal};
use httpmock::Method::POST;
use httpmock::MockServer;
use serde_json::json;
use std::sync::Arc;

fn principal(server: &MockServer) -> ServicePrincipal {
    ServicePrincipal {
        tenant_id: "tenant-1".to_string(),
        client_id: "app-1".to_string(),
        client_secret: "s3cret".to_string(),
        authority_host: server.base_url(),
    }
}

#[tokio::test]
async fn token_exchange_uses_client_credentials() {
    let server = MockServer::start_async().await;
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/tenant-1/oauth2/v2.0/token")
            .body_contains("grant_type=client_credentials")
            .body_contains("client_id=app-1")
            .body_contains("client_secret=s3cret");
        then.status(200).json_body(json!({
            "token_type": "Bearer",
            "expires_in": 3599,
            "access_token": "tok-1"
        }));
    });

    let credential = ClientSecretCredential::new(principal(&server)).unwrap();
    let token = credential.get_token(COGNITIVE_SERVICES_SCOPE).await.unwrap();

    mock.assert();
    assert_eq!(token.token, "tok-1");
    assert!(token.expires_on > chrono::Utc::now());
}

#[tokio::test]
async fn provider_caches_until_near_expiry() {
    let server = MockServer::start_async().await;
    let mock = server.mock(|when, then| {
        when.method(POST).path("/tenant-1/oauth2/v2.0/token");
        then.status(200)
            .json_body(json!({"expires_in": 3600, "access_token": "tok-cached"}));
    });

    let credential = Arc::new(ClientSecretCredential::new(principal(&server)).unwrap());
    let provider = BearerTokenProvider::new(credential, COGNITIVE_SERVICES_SCOPE);

    assert_eq!(provider.token().await.unwrap(), "tok-cached");
    assert_eq!(provider.token().await.unwrap(), "tok-cached");
    assert_eq!(mock.hits(), 1);
}

#[tokio::test]
async fn short_lived_tokens_are_refreshed() {
    let server = MockServer::start_async().await;
    let mock = server.mock(|when, then| {
        when.method(POST).path("/tenant-1/oauth2/v2.0/token");
        then.status(200)
            .json_body(json!({"expires_in": 60, "access_token": "tok-short"}));
    });

    let credential = Arc::new(ClientSecretCredential::new(principal(&server)).unwrap());
    let provider = BearerTokenProvider::new(credential, COGNITIVE_SERVICES_SCOPE);

    provider.token().await.unwrap();
    provider.token().await.unwrap();
    assert_eq!(mock.hits(), 2);
}

#[tokio::test]
async fn token_errors_carry_description() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(POST).path("/tenant-1/oauth2/v2.0/token");
        then.status(401).json_body(json!({
            "error": "invalid_client",
            "error_description": "AADSTS7000215: Invalid client secret provided."
        }));
    });

    let credential = ClientSecretCredential::new(principal(&server)).unwrap();
    let err = credential
        .get_token(COGNITIVE_SERVICES_SCOPE)
        .await
        .unwrap_err();

    match err {
        AzChatError::Identity(IdentityError::TokenRequest { status, message }) => {
            assert_eq!(status, 401);
            assert!(message.starts_with("AADSTS7000215"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn out_of_range_expiry_is_rejected() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(POST).path("/tenant-1/oauth2/v2.0/token");
        then.status(200).json_body(json!({
            "token_type": "Bearer",
            "expires_in": u64::MAX,
            "access_token": "forever"
        }));
    });

    let credential = ClientSecretCredential::new(principal(&server)).unwrap();
    let err = credential
        .get_token(COGNITIVE_SERVICES_SCOPE)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AzChatError::Identity(IdentityError::InvalidTokenResponse(_))
    ));
}

#[tokio::test]
async fn bearer_token_reaches_data_plane() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(POST).path("/tenant-1/oauth2/v2.0/token");
        then.status(200)
            .json_body(json!({"expires_in": 3600, "access_token": "tok-dp"}));
    });
    let chat = server.mock(|when, then| {
        when.method(POST)
            .path("/openai/deployments/gpt/chat/completions")
            .header("authorization", "Bearer tok-dp");
        then.status(200).json_body(json!({
            "choices": [{"message": {"role": "assistant", "content": "hi there"}}]
        }));
    });

    let credential = Arc::new(ClientSecretCredential::new(principal(&server)).unwrap());
    let provider = Arc::new(BearerTokenProvider::new(credential, COGNITIVE_SERVICES_SCOPE));
    let factory =
        AzureOpenAIClientFactory::with_identity(server.base_url(), "2024-10-21", provider).unwrap();

    let reply = factory
        .create_azure_client()
        .chat_completion(&ChatRequest {
            deployment: "gpt".to_string(),
            messages: vec![Message::user("hello")],
            temperature: None,
            max_tokens: None,
        })
        .await
        .unwrap();

    chat.assert();
    assert_eq!(reply.content, "hi there");
    assert_eq!(reply.model, "gpt");
}
