#![forbid(unsafe_code)]

//! Credential handling and process guards shared by the harvest binaries.

use std::collections::BTreeMap;

use anyhow::bail;
use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use chrono::{DateTime, Duration, Utc};
use nix::unistd::Uid;
use serde_json::Value;

const LENIENT: GeneralPurposeConfig =
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent);
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT);
const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, LENIENT);

/// Secret used to authenticate against an origin's search API.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Value sent verbatim as the `authorization` header.
    Bearer(String),
    /// Browser session cookies, sent as a single `Cookie` header.
    Cookies(BTreeMap<String, String>),
}

impl Credential {
    /// `(name, value)` header that carries this credential.
    pub fn header(&self) -> Option<(&'static str, String)> {
        match self {
            Credential::Bearer(token) => Some(("authorization", token.clone())),
            Credential::Cookies(cookies) if cookies.is_empty() => None,
            Credential::Cookies(cookies) => {
                let joined = cookies
                    .iter()
                    .map(|(key, value)| format!("{key}={value}"))
                    .collect::<Vec<_>>()
                    .join("; ");
                Some(("cookie", joined))
            }
        }
    }
}

// Secrets stay out of logs.
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::Bearer(_) => f.write_str("Bearer(<redacted>)"),
            Credential::Cookies(cookies) => f
                .debug_tuple("Cookies")
                .field(&cookies.keys().collect::<Vec<_>>())
                .finish(),
        }
    }
}

/// Result of introspecting a credential's embedded expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    Valid { remaining: Duration },
    Expired,
    /// The credential carries no readable expiry; callers proceed anyway.
    Unknown,
}

impl AuthStatus {
    pub fn from_expiry(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        match expires_at {
            None => AuthStatus::Unknown,
            Some(expires_at) if expires_at <= now => AuthStatus::Expired,
            Some(expires_at) => AuthStatus::Valid {
                remaining: expires_at - now,
            },
        }
    }
}

/// Parses `name=value; other=value` as copied from browser dev tools.
pub fn parse_cookie_string(raw: &str) -> BTreeMap<String, String> {
    raw.split(';')
        .filter_map(|pair| {
            let (key, value) = pair.trim().split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Reads the `exp` claim of a JWT without verifying its signature. A
/// leading `Bearer ` is ignored.
pub fn jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    let token = token.trim();
    let token = token.strip_prefix("Bearer ").unwrap_or(token).trim();
    let mut parts = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return None;
    };
    let decoded = URL_SAFE_LENIENT.decode(payload).ok()?;
    let claims: Value = serde_json::from_slice(&decoded).ok()?;
    let exp = match claims.get("exp")? {
        Value::Number(number) => number.as_i64().or_else(|| number.as_f64().map(|f| f as i64))?,
        _ => return None,
    };
    DateTime::<Utc>::from_timestamp(exp, 0)
}

/// Extracts the JWT stored inside a Supabase-style session cookie, whose
/// value is either raw or `base64-` prefixed JSON with an `access_token`.
pub fn session_cookie_access_token(cookie_value: &str) -> Option<String> {
    let encoded = cookie_value
        .strip_prefix("base64-")
        .unwrap_or(cookie_value)
        .trim();
    let decoded = STANDARD_LENIENT.decode(encoded).ok()?;
    let session: Value = serde_json::from_slice(&decoded).ok()?;
    session
        .get("access_token")
        .and_then(Value::as_str)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

/// Fails fast when a binary is started as root; harvest output belongs to
/// the invoking user.
pub fn ensure_not_root(process: &str) -> anyhow::Result<()> {
    ensure_not_root_for(Uid::current(), process)
}

fn ensure_not_root_for(uid: Uid, process: &str) -> anyhow::Result<()> {
    if uid.is_root() {
        bail!("{process} must not be run as root; downloads would end up owned by root");
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
    use serde_json::json;

    pub(crate) fn make_jwt(exp: i64) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(json!({"sub": "user", "exp": exp}).to_string());
        format!("{header}.{payload}.signature")
    }

    #[test]
    fn parse_cookie_string_splits_pairs() {
        let cookies = parse_cookie_string(" a=1; b = two=2 ;; novalue; =skip ");
        assert_eq!(cookies.get("a").unwrap(), "1");
        assert_eq!(cookies.get("b").unwrap(), "two=2");
        assert_eq!(cookies.len(), 2);
    }

    #[test]
    fn jwt_expiry_reads_exp_claim() {
        let token = format!("Bearer {}", make_jwt(1_900_000_000));
        let exp = jwt_expiry(&token).unwrap();
        assert_eq!(exp.timestamp(), 1_900_000_000);
    }

    #[test]
    fn jwt_expiry_accepts_padded_payload() {
        let header = URL_SAFE_NO_PAD.encode(b"{}");
        let payload = base64::engine::general_purpose::URL_SAFE.encode(br#"{"exp":12345}"#);
        let token = format!("{header}.{payload}.sig");
        assert_eq!(jwt_expiry(&token).unwrap().timestamp(), 12345);
    }

    #[test]
    fn jwt_expiry_rejects_malformed_tokens() {
        assert!(jwt_expiry("not-a-jwt").is_none());
        assert!(jwt_expiry("a.b").is_none());
        assert!(jwt_expiry("a.b.c.d").is_none());
        assert!(jwt_expiry("a.!!!.c").is_none());
        let no_exp = format!("x.{}.y", URL_SAFE_NO_PAD.encode(br#"{"sub":"u"}"#));
        assert!(jwt_expiry(&no_exp).is_none());
    }

    #[test]
    fn auth_status_classifies_expiry() {
        let now = DateTime::<Utc>::from_timestamp(1_000, 0).unwrap();
        assert_eq!(AuthStatus::from_expiry(None, now), AuthStatus::Unknown);
        assert_eq!(
            AuthStatus::from_expiry(DateTime::from_timestamp(1_000, 0), now),
            AuthStatus::Expired
        );
        assert_eq!(
            AuthStatus::from_expiry(DateTime::from_timestamp(4_600, 0), now),
            AuthStatus::Valid {
                remaining: Duration::hours(1)
            }
        );
    }

    #[test]
    fn session_cookie_access_token_decodes_prefixed_json() {
        let jwt = make_jwt(2_000_000_000);
        let session = json!({"access_token": jwt, "token_type": "bearer"}).to_string();
        let cookie = format!("base64-{}", STANDARD.encode(session));
        assert_eq!(session_cookie_access_token(&cookie).as_deref(), Some(jwt.as_str()));
        assert!(session_cookie_access_token("base64-%%%").is_none());
    }

    #[test]
    fn credential_header_joins_cookies() {
        let credential = Credential::Cookies(parse_cookie_string("b=2; a=1"));
        assert_eq!(
            credential.header(),
            Some(("cookie", "a=1; b=2".to_string()))
        );
        assert!(Credential::Cookies(BTreeMap::new()).header().is_none());
        assert!(!format!("{:?}", Credential::Bearer("secret".into())).contains("secret"));
    }

    #[test]
    fn ensure_not_root_allows_unprivileged_uid() {
        assert!(ensure_not_root_for(Uid::from_raw(1000), "harvest").is_ok());
    }

    #[test]
    fn ensure_not_root_rejects_root_uid() {
        let err = ensure_not_root_for(Uid::from_raw(0), "harvest").unwrap_err();
        assert!(err.to_string().contains("must not be run as root"));
    }
}
