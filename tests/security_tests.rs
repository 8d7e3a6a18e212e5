use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use http::HeaderValue;
use identity_gateway::gate::Operation;
use identity_gateway::{
    AuthError, AuthSecret, AuthorizationGate, Environment, TokenClaims, TokenService,
};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::json;
use uuid::Uuid;

const SECRET: &str = "security-test-secret";

fn service() -> TokenService {
    TokenService::new(AuthSecret::new(SECRET))
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

fn fresh_claims() -> TokenClaims {
    let iat = now();
    TokenClaims {
        sub: Uuid::new_v4(),
        name: "alice".to_string(),
        iat,
        exp: iat + 3600,
    }
}

fn segment(value: &serde_json::Value) -> String {
    URL_SAFE_NO_PAD.encode(serde_json::to_vec(value).unwrap())
}

#[test]
fn reject_alg_none_token() {
    let claims = fresh_claims();
    let header = segment(&json!({ "alg": "none", "typ": "JWT" }));
    let payload = segment(&serde_json::to_value(&claims).unwrap());

    for token in [format!("{header}.{payload}."), format!("{header}.{payload}")] {
        assert!(
            matches!(service().validate(&token), Err(AuthError::InvalidToken)),
            "unsigned token must be rejected: {token}"
        );
    }
}

#[test]
fn reject_other_hmac_algorithm_with_same_key() {
    let token = encode(
        &Header::new(Algorithm::HS512),
        &fresh_claims(),
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap();

    assert!(matches!(
        service().validate(&token),
        Err(AuthError::InvalidToken)
    ));
}

#[test]
fn reject_asymmetric_header_over_hmac_signature() {
    // RS256 header, signature computed as HS256 with the shared secret.
    let hs = encode(
        &Header::new(Algorithm::HS256),
        &fresh_claims(),
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap();
    let mut parts = hs.splitn(3, '.');
    let (_, payload, signature) = (
        parts.next().unwrap(),
        parts.next().unwrap(),
        parts.next().unwrap(),
    );
    let header = segment(&json!({ "alg": "RS256", "typ": "JWT" }));
    let forged = format!("{header}.{payload}.{signature}");

    assert!(matches!(
        service().validate(&forged),
        Err(AuthError::InvalidToken)
    ));
}

#[test]
fn reject_token_signed_with_different_key() {
    let other = TokenService::new(AuthSecret::new("not-the-gateway-key"));
    let token = other.issue(Uuid::new_v4(), "mallory").unwrap();

    assert!(matches!(
        service().validate(&token),
        Err(AuthError::InvalidToken)
    ));
}

#[test]
fn reject_tampered_payload() {
    let token = service().issue(Uuid::new_v4(), "alice").unwrap();
    let mut parts: Vec<&str> = token.split('.').collect();

    let mut claims = fresh_claims();
    claims.name = "admin".to_string();
    let forged_payload = segment(&serde_json::to_value(&claims).unwrap());
    parts[1] = &forged_payload;

    assert!(matches!(
        service().validate(&parts.join(".")),
        Err(AuthError::InvalidToken)
    ));
}

#[test]
fn expiry_honours_leeway_boundaries() {
    let service = service().with_validity(Duration::from_secs(60));
    let leeway = service.leeway_secs();

    // Expired by well over the leeway.
    let issued = SystemTime::now() - Duration::from_secs(60 + leeway * 4);
    let stale = service.issue_at(Uuid::new_v4(), "alice", issued).unwrap();
    assert!(matches!(
        service.validate(&stale),
        Err(AuthError::InvalidToken)
    ));

    // Expired by half the leeway: still accepted.
    let issued = SystemTime::now() - Duration::from_secs(60 + leeway / 2);
    let recent = service.issue_at(Uuid::new_v4(), "alice", issued).unwrap();
    assert!(service.validate(&recent).is_ok());
}

#[test]
fn reject_token_missing_required_claims() {
    let token = encode(
        &Header::new(Algorithm::HS256),
        &json!({ "sub": Uuid::new_v4(), "name": "alice", "iat": now() }),
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap();

    assert!(matches!(
        service().validate(&token),
        Err(AuthError::InvalidToken)
    ));
}

#[test]
fn gate_hides_the_failing_check() {
    let gate = AuthorizationGate::new(service(), Environment::Production);
    let protected = Operation::Http {
        method: "GET",
        path: "/v1/auth/me",
    };

    let forged = TokenService::new(AuthSecret::new("other"))
        .issue(Uuid::new_v4(), "mallory")
        .unwrap();
    let candidates = [
        None,
        Some(HeaderValue::from_static("Basic YWxpY2U6cHc=")),
        Some(HeaderValue::from_static("Bearer not-a-jwt")),
        Some(HeaderValue::from_str(&format!("Bearer {forged}")).unwrap()),
    ];

    let messages: Vec<String> = candidates
        .iter()
        .map(|header| {
            let err = gate.authorize(protected, header.as_ref()).unwrap_err();
            assert_eq!(err.code(), tonic::Code::Unauthenticated);
            err.public_message()
        })
        .collect();

    assert!(messages.windows(2).all(|w| w[0] == w[1]), "{messages:?}");
}

#[test]
fn secret_is_never_printed() {
    let rendered = format!("{:?}", service());
    assert!(!rendered.contains(SECRET));
}
