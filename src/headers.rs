//! Credential extraction from HTTP request headers

use http::header::AUTHORIZATION;
use http::HeaderMap;

use crate::errors::VerifyError;

/// Request header carrying the proof JWT
pub const DPOP_HEADER: &str = "dpop";

/// Authentication scheme named by the `Authorization` header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// `Authorization: DPoP <token>`, proof expected in the `DPoP` header
    Dpop,
    /// `Authorization: Bearer <token>`
    Bearer,
}

/// Credentials pulled off an incoming request
#[derive(Debug, Clone)]
pub struct RequestCredentials {
    /// Scheme the client presented
    pub scheme: AuthScheme,
    /// Access token, verbatim
    pub access_token: String,
    /// Proof JWT from the `DPoP` header, when one was sent
    pub proof: Option<String>,
}

/// Pull scheme, access token and proof out of request headers
///
/// Scheme names compare case-insensitively per RFC 9110. A request may
/// carry at most one `DPoP` header; anything else is malformed.
pub fn from_headers(headers: &HeaderMap) -> Result<RequestCredentials, VerifyError> {
    let authorization = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| VerifyError::Malformed {
            reason: "missing Authorization header".to_string(),
        })?
        .to_str()
        .map_err(|_| VerifyError::Malformed {
            reason: "Authorization header is not valid UTF-8".to_string(),
        })?;

    let (scheme, token) = authorization
        .split_once(' ')
        .map(|(scheme, rest)| (scheme, rest.trim()))
        .ok_or_else(|| VerifyError::Malformed {
            reason: "Authorization header carries no credentials".to_string(),
        })?;

    let scheme = if scheme.eq_ignore_ascii_case("dpop") {
        AuthScheme::Dpop
    } else if scheme.eq_ignore_ascii_case("bearer") {
        AuthScheme::Bearer
    } else {
        return Err(VerifyError::Malformed {
            reason: format!("unsupported authorization scheme: {scheme}"),
        });
    };

    if token.is_empty() {
        return Err(VerifyError::Malformed {
            reason: "empty access token".to_string(),
        });
    }

    let mut proof_headers = headers.get_all(DPOP_HEADER).iter();
    let proof = match proof_headers.next() {
        Some(value) => {
            if proof_headers.next().is_some() {
                return Err(VerifyError::Malformed {
                    reason: "multiple DPoP headers".to_string(),
                });
            }
            Some(
                value
                    .to_str()
                    .map_err(|_| VerifyError::Malformed {
                        reason: "DPoP header is not valid UTF-8".to_string(),
                    })?
                    .trim()
                    .to_string(),
            )
        }
        None => None,
    };

    Ok(RequestCredentials {
        scheme,
        access_token: token.to_string(),
        proof,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers(authorization: &str, proof: Option<&str>) -> HeaderMap {
        let mut map = HeaderMap::new();
        map.insert(AUTHORIZATION, HeaderValue::from_str(authorization).unwrap());
        if let Some(proof) = proof {
            map.insert(DPOP_HEADER, HeaderValue::from_str(proof).unwrap());
        }
        map
    }

    #[test]
    fn test_extracts_dpop_credentials() {
        let creds = from_headers(&headers("DPoP token-abc", Some("proof-jwt"))).unwrap();
        assert_eq!(creds.scheme, AuthScheme::Dpop);
        assert_eq!(creds.access_token, "token-abc");
        assert_eq!(creds.proof.as_deref(), Some("proof-jwt"));
    }

    #[test]
    fn test_scheme_is_case_insensitive() {
        let creds = from_headers(&headers("dpop token-abc", None)).unwrap();
        assert_eq!(creds.scheme, AuthScheme::Dpop);

        let creds = from_headers(&headers("BEARER token-abc", None)).unwrap();
        assert_eq!(creds.scheme, AuthScheme::Bearer);
        assert_eq!(creds.proof, None);
    }

    #[test]
    fn test_missing_or_garbled_authorization() {
        let err = from_headers(&HeaderMap::new()).unwrap_err();
        assert!(matches!(err, VerifyError::Malformed { .. }));

        let err = from_headers(&headers("token-without-scheme", None)).unwrap_err();
        assert!(matches!(err, VerifyError::Malformed { .. }));

        let err = from_headers(&headers("Basic dXNlcjpwdw==", None)).unwrap_err();
        assert!(matches!(err, VerifyError::Malformed { .. }));

        let err = from_headers(&headers("DPoP ", None)).unwrap_err();
        assert!(matches!(err, VerifyError::Malformed { .. }));
    }

    #[test]
    fn test_rejects_repeated_proof_header() {
        let mut map = headers("DPoP token-abc", Some("proof-one"));
        map.append(DPOP_HEADER, HeaderValue::from_static("proof-two"));
        let err = from_headers(&map).unwrap_err();
        assert!(matches!(err, VerifyError::Malformed { .. }));
        assert!(err.to_string().contains("multiple"));
    }
}
