use ed25519_dalek::{
    Signature, Signer as _, SigningKey, VerifyingKey, KEYPAIR_LENGTH, PUBLIC_KEY_LENGTH,
    SECRET_KEY_LENGTH, SIGNATURE_LENGTH,
};
use rand::rngs::OsRng;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use crate::error::SignerError;

use super::{KeyPair, Signer, TransactionKind, TransactionRequest};

/// Ed25519 keys in base58. A private key is either the 32-byte seed or the
/// 64-byte `seed || public` form; key pairs produced here always carry the
/// 64-byte form.
///
/// Signed bodies carry `digest`, the hex SHA-256 of the unsigned body in
/// canonical form (keys sorted, no whitespace), and `signature`, the base58
/// Ed25519 signature over the raw digest bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct Ed25519Signer;

impl Ed25519Signer {
    pub fn new() -> Self {
        Self
    }

    /// Check the `digest` and `signature` of a body built by
    /// [`build_signed_transaction`](Signer::build_signed_transaction)
    /// against its `from` key.
    pub fn verify_signed_transaction(&self, body: &Value) -> Result<(), SignerError> {
        let invalid = |message: &str| SignerError::InvalidTransaction(message.to_owned());

        let mut fields = body
            .as_object()
            .cloned()
            .ok_or_else(|| invalid("body is not an object"))?;
        let digest = take_str(&mut fields, "digest").ok_or_else(|| invalid("missing digest"))?;
        let signature =
            take_str(&mut fields, "signature").ok_or_else(|| invalid("missing signature"))?;
        let from = fields
            .get("from")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid("missing from"))?;

        let expected = digest_of(&Value::Object(fields.clone()));
        if hex::encode(expected) != digest {
            return Err(invalid("digest does not match body"));
        }

        let signature = bs58::decode(&signature)
            .into_vec()
            .ok()
            .and_then(|bytes| <[u8; SIGNATURE_LENGTH]>::try_from(bytes.as_slice()).ok())
            .map(|bytes| Signature::from_bytes(&bytes))
            .ok_or_else(|| invalid("malformed signature"))?;
        verifying_key(from)?
            .verify_strict(&expected, &signature)
            .map_err(|_| invalid("signature does not verify"))
    }
}

impl Signer for Ed25519Signer {
    fn validate_private_key(&self, private_key: &str) -> Result<(), SignerError> {
        signing_key(private_key).map(|_| ())
    }

    fn key_pair_from_private_key(&self, private_key: &str) -> Result<KeyPair, SignerError> {
        signing_key(private_key).map(|key| key_pair(&key))
    }

    fn key_pair_from_random(&self) -> Result<KeyPair, SignerError> {
        Ok(key_pair(&SigningKey::generate(&mut OsRng)))
    }

    fn key_pair_from_secret_phrase(&self, phrase: &str) -> Result<KeyPair, SignerError> {
        if phrase.is_empty() {
            return Err(SignerError::InvalidPrivateKey(
                "secret phrase is empty".to_owned(),
            ));
        }
        let seed: [u8; SECRET_KEY_LENGTH] = Sha256::digest(phrase.as_bytes()).into();
        Ok(key_pair(&SigningKey::from_bytes(&seed)))
    }

    fn build_signed_transaction(&self, request: &TransactionRequest) -> Result<Value, SignerError> {
        let key = signing_key(request.key_pair.private_key())?;
        let from = bs58::encode(key.verifying_key().as_bytes()).into_string();
        if from != request.key_pair.public_key() {
            return Err(SignerError::InvalidPrivateKey(
                "public key does not belong to private key".to_owned(),
            ));
        }

        let mut body = unsigned_body(request, from)?;
        let digest = digest_of(&Value::Object(body.clone()));
        let signature = key.sign(&digest);

        body.insert("digest".to_owned(), json!(hex::encode(digest)));
        body.insert(
            "signature".to_owned(),
            json!(bs58::encode(signature.to_bytes()).into_string()),
        );
        Ok(Value::Object(body))
    }
}

fn signing_key(private_key: &str) -> Result<SigningKey, SignerError> {
    let bytes = bs58::decode(private_key.trim())
        .into_vec()
        .map_err(|e| SignerError::InvalidPrivateKey(e.to_string()))?;

    if let Ok(seed) = <[u8; SECRET_KEY_LENGTH]>::try_from(bytes.as_slice()) {
        return Ok(SigningKey::from_bytes(&seed));
    }
    if let Ok(pair) = <[u8; KEYPAIR_LENGTH]>::try_from(bytes.as_slice()) {
        return SigningKey::from_keypair_bytes(&pair)
            .map_err(|e| SignerError::InvalidPrivateKey(e.to_string()));
    }
    Err(SignerError::InvalidPrivateKey(format!(
        "expected {SECRET_KEY_LENGTH} or {KEYPAIR_LENGTH} bytes, got {}",
        bytes.len()
    )))
}

fn verifying_key(public_key: &str) -> Result<VerifyingKey, SignerError> {
    let bytes = bs58::decode(public_key.trim())
        .into_vec()
        .map_err(|e| SignerError::InvalidPublicKey(e.to_string()))?;
    let bytes = <[u8; PUBLIC_KEY_LENGTH]>::try_from(bytes.as_slice()).map_err(|_| {
        SignerError::InvalidPublicKey(format!(
            "expected {PUBLIC_KEY_LENGTH} bytes, got {}",
            bytes.len()
        ))
    })?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| SignerError::InvalidPublicKey(e.to_string()))
}

fn key_pair(key: &SigningKey) -> KeyPair {
    KeyPair::new(
        bs58::encode(key.verifying_key().as_bytes()).into_string(),
        bs58::encode(key.to_keypair_bytes()).into_string(),
    )
}

fn unsigned_body(request: &TransactionRequest, from: String) -> Result<Map<String, Value>, SignerError> {
    let invalid = |message: String| SignerError::InvalidTransaction(message);

    let mut body = Map::new();
    body.insert("transaction-type".to_owned(), json!(request.kind.type_name()));
    body.insert(
        "transaction-id".to_owned(),
        json!(request.transaction_id.to_string()),
    );
    body.insert("block-id".to_owned(), json!(request.block_id.to_string()));
    body.insert("from".to_owned(), json!(from));

    match request.kind {
        TransactionKind::Transfer | TransactionKind::Emission => {
            let to = request
                .destination
                .as_deref()
                .ok_or_else(|| invalid(format!("{} needs a destination", request.kind)))?;
            verifying_key(to)?;
            body.insert("to".to_owned(), json!(to));
        }
        TransactionKind::RegisterNode => {
            let address = request
                .destination
                .as_deref()
                .filter(|a| !a.trim().is_empty())
                .ok_or_else(|| invalid("node address is empty".to_owned()))?;
            body.insert("address".to_owned(), json!(address));
        }
        TransactionKind::UnregisterNode => {}
    }

    if request.kind != TransactionKind::UnregisterNode {
        if !is_decimal(&request.amount) {
            return Err(invalid(format!("amount `{}` is not a decimal number", request.amount)));
        }
        body.insert(
            "asset".to_owned(),
            json!([{ "code": request.asset_code, "amount": request.amount }]),
        );
    }

    if !request.fee.is_empty() && !is_decimal(&request.fee) {
        return Err(invalid(format!("fee `{}` is not a decimal number", request.fee)));
    }
    body.insert("fee".to_owned(), json!(request.fee));

    if let Some(description) = &request.description {
        body.insert("description".to_owned(), json!(description));
    }
    Ok(body)
}

fn is_decimal(s: &str) -> bool {
    let (int, frac) = s.split_once('.').unwrap_or((s, ""));
    !int.is_empty()
        && int.bytes().all(|b| b.is_ascii_digit())
        && frac.bytes().all(|b| b.is_ascii_digit())
        && !(s.ends_with('.'))
}

fn take_str(fields: &mut Map<String, Value>, key: &str) -> Option<String> {
    match fields.remove(key) {
        Some(Value::String(s)) => Some(s),
        _ => None,
    }
}

fn digest_of(body: &Value) -> [u8; 32] {
    let mut canonical = String::new();
    write_canonical(body, &mut canonical);
    Sha256::digest(canonical.as_bytes()).into()
}

// Sorted keys at every level, independent of how `Map` orders entries.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}
