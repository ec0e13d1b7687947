use jsonwebtoken::{DecodingKey, Validation, decode};
use serde_json::Value;

use crate::error::GatewayError;

/// Read the user id out of a bearer token's claims.
///
/// The client cannot verify the server's signature, so only the payload is
/// decoded; the server authenticates the token during the socket handshake.
pub fn user_id_from_token(token: &str) -> Result<String, GatewayError> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data = decode::<Value>(token, &DecodingKey::from_secret(&[]), &validation)
        .map_err(|e| GatewayError::InvalidToken(e.to_string()))?;

    ["sub", "id", "userId", "user_id"]
        .iter()
        .find_map(|claim| match data.claims.get(*claim) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
        .ok_or_else(|| GatewayError::InvalidToken("no user id claim".into()))
}
