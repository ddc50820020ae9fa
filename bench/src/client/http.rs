//! [super::Client] backed by a node's JSON-over-HTTP interface.
//!
//! Every request is a `POST` to `<endpoint>/<key type>/<operation>` carrying a JSON body.
//! When the endpoint carries a user part, it is sent as a bearer token.

use super::{Error, KeyType, Session};
use crate::endpoint::Endpoint;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateKey<'a> {
    session: &'a Session,
    curve: &'static str,
    threshold: u32,
    key_id: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Sign<'a> {
    session: &'a Session,
    key_id: &'a str,
    path: &'a [u32],
    message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeneratePresignatures<'a> {
    session: &'a Session,
    key_id: &'a str,
    count: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignWithPresignature<'a> {
    key_id: &'a str,
    presignature_id: &'a str,
    path: &'a [u32],
    message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PublicKey<'a> {
    key_id: &'a str,
    path: &'a [u32],
}

#[derive(Deserialize)]
struct Signature {
    signature: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Presignatures {
    presignature_ids: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Key {
    public_key: String,
}

/// A participant reached over HTTP.
#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    base: String,
    api_key: Option<String>,
}

impl Client {
    /// Create a client for `endpoint`.
    pub fn new(endpoint: &Endpoint) -> Result<Self, Error> {
        let http = reqwest::Client::builder().build()?;
        let mut base = endpoint.url();
        if !base.ends_with('/') {
            base.push('/');
        }
        Ok(Self {
            http,
            base,
            api_key: endpoint.api_key.clone(),
        })
    }

    fn url(&self, key_type: KeyType, operation: &str) -> String {
        format!("{}{}/{}", self.base, key_type.name(), operation)
    }

    async fn send<B: Serialize>(
        &self,
        url: String,
        body: &B,
    ) -> Result<reqwest::Response, Error> {
        let mut request = self.http.post(url).json(body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        url: String,
        body: &B,
    ) -> Result<T, Error> {
        Ok(self.send(url, body).await?.json().await?)
    }
}

impl super::Client for Client {
    async fn generate_key(
        &self,
        key_type: KeyType,
        session: &Session,
        threshold: u32,
        key_id: &str,
    ) -> Result<(), Error> {
        let body = GenerateKey {
            session,
            curve: key_type.curve(),
            threshold,
            key_id,
        };
        self.send(self.url(key_type, "keys/generate"), &body).await?;
        Ok(())
    }

    async fn sign(
        &self,
        key_type: KeyType,
        session: &Session,
        key_id: &str,
        path: &[u32],
        message: &[u8],
    ) -> Result<Vec<u8>, Error> {
        let body = Sign {
            session,
            key_id,
            path,
            message: hex(message),
        };
        let reply: Signature = self.post(self.url(key_type, "sign"), &body).await?;
        decode(&reply.signature)
    }

    async fn generate_presignatures(
        &self,
        key_type: KeyType,
        session: &Session,
        key_id: &str,
        count: u64,
    ) -> Result<Vec<String>, Error> {
        let body = GeneratePresignatures {
            session,
            key_id,
            count,
        };
        let reply: Presignatures = self
            .post(self.url(key_type, "presignatures/generate"), &body)
            .await?;
        Ok(reply.presignature_ids)
    }

    async fn sign_with_presignature(
        &self,
        key_type: KeyType,
        key_id: &str,
        presignature_id: &str,
        path: &[u32],
        message: &[u8],
    ) -> Result<Vec<u8>, Error> {
        let body = SignWithPresignature {
            key_id,
            presignature_id,
            path,
            message: hex(message),
        };
        let reply: Signature = self
            .post(self.url(key_type, "presignatures/sign"), &body)
            .await?;
        decode(&reply.signature)
    }

    async fn public_key(
        &self,
        key_type: KeyType,
        key_id: &str,
        path: &[u32],
    ) -> Result<Vec<u8>, Error> {
        let body = PublicKey { key_id, path };
        let reply: Key = self.post(self.url(key_type, "keys/public"), &body).await?;
        decode(&reply.public_key)
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn decode(hex: &str) -> Result<Vec<u8>, Error> {
    from_hex(hex).ok_or_else(|| Error::Rejected(format!("invalid hex: {hex}")))
}

fn from_hex(hex: &str) -> Option<Vec<u8>> {
    let hex = hex.strip_prefix("0x").unwrap_or(hex);
    if hex.len() % 2 != 0 || !hex.is_ascii() {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex() {
        assert_eq!(hex(&[]), "");
        assert_eq!(hex(&[0x00, 0xab, 0x10]), "00ab10");

        // Test case 0: round trip with and without prefix
        assert_eq!(from_hex("00ab10"), Some(vec![0x00, 0xab, 0x10]));
        assert_eq!(from_hex("0x00AB10"), Some(vec![0x00, 0xab, 0x10]));

        // Test case 1: odd length
        assert_eq!(from_hex("abc"), None);

        // Test case 2: invalid digits
        assert_eq!(from_hex("zz"), None);
        assert!(matches!(decode("zz"), Err(Error::Rejected(_))));
    }

    #[test]
    fn test_request_urls() {
        let endpoint = Endpoint::parse("http://key@localhost:8500/mpc").unwrap();
        let client = Client::new(&endpoint).unwrap();
        assert_eq!(client.api_key.as_deref(), Some("key"));
        assert_eq!(
            client.url(KeyType::Ecdsa, "sign"),
            "http://localhost:8500/mpc/ecdsa/sign"
        );

        let endpoint = Endpoint::parse("http://localhost").unwrap();
        let client = Client::new(&endpoint).unwrap();
        assert_eq!(client.api_key, None);
        assert_eq!(
            client.url(KeyType::Ed25519, "presignatures/sign"),
            "http://localhost:80/ed25519/presignatures/sign"
        );
    }

    #[test]
    fn test_request_shape() {
        let session = Session::new("abc".into(), vec![2, 1]);
        let body = Sign {
            session: &session,
            key_id: "key",
            path: &[1, 2, 3, 4, 5],
            message: hex(b"hi"),
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "session": { "id": "abc", "players": [1, 2] },
                "keyId": "key",
                "path": [1, 2, 3, 4, 5],
                "message": "6869",
            })
        );
    }
}
