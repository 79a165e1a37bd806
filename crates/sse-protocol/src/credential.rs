/// Credential extraction from credential-issuance responses.
///
/// The target service hands out tokens in one of two shapes:
/// - `Set-Cookie` headers carrying access/refresh token cookies, replayed
///   verbatim as a `Cookie` header on the subscribe request
/// - a JSON body with the token at a known location (`token`,
///   `data.accessToken`, ...), sent back as a bearer token
///
/// Cookies win when both are present.

use serde_json::Value;

/// A token as it is attached to the subscribe request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// `Authorization: Bearer <token>`
    Bearer(String),
    /// `Cookie: accessToken=...; refreshToken=...`
    Cookie(String),
}

impl Token {
    /// Header name and value to attach to a request.
    pub fn header(&self) -> (&'static str, String) {
        match self {
            Self::Bearer(token) => ("authorization", format!("Bearer {token}")),
            Self::Cookie(cookies) => ("cookie", cookies.clone()),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bearer(_) => "bearer",
            Self::Cookie(_) => "cookie",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("response body is not valid JSON: {0}")]
    MalformedBody(String),
    #[error("no token cookie and no token at any of {0:?}")]
    Missing(Vec<String>),
}

/// Collect the `name=value` pairs of every `Set-Cookie` header whose cookie
/// name is one of `names`, joined into a single `Cookie` header value.
pub fn cookie_token<'a, S: AsRef<str>>(
    set_cookies: impl IntoIterator<Item = &'a str>,
    names: &[S],
) -> Option<Token> {
    let pairs: Vec<&str> = set_cookies
        .into_iter()
        .filter_map(|header| {
            // Attributes (Path, HttpOnly, Max-Age, ...) follow the first ';'
            let pair = header.split(';').next()?.trim();
            let (name, value) = pair.split_once('=')?;
            let wanted = names.iter().any(|n| n.as_ref() == name.trim());
            (wanted && !value.trim().is_empty()).then_some(pair)
        })
        .collect();

    if pairs.is_empty() {
        None
    } else {
        Some(Token::Cookie(pairs.join("; ")))
    }
}

/// Look up a bearer token in a JSON body at the first pointer that yields a
/// non-empty string.
pub fn json_token<S: AsRef<str>>(body: &Value, pointers: &[S]) -> Option<Token> {
    pointers.iter().find_map(|pointer| {
        body.pointer(pointer.as_ref())
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
            .map(|token| Token::Bearer(token.to_string()))
    })
}

/// Extract a token from a full issuance response (cookies first, then body).
pub fn extract_token<'a, S: AsRef<str>>(
    set_cookies: impl IntoIterator<Item = &'a str>,
    body: &[u8],
    cookie_names: &[S],
    token_pointers: &[S],
) -> Result<Token, TokenError> {
    if let Some(token) = cookie_token(set_cookies, cookie_names) {
        return Ok(token);
    }

    let missing = || TokenError::Missing(token_pointers.iter().map(|p| p.as_ref().to_string()).collect());
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(missing());
    }

    let value: Value =
        serde_json::from_slice(body).map_err(|e| TokenError::MalformedBody(e.to_string()))?;
    json_token(&value, token_pointers).ok_or_else(missing)
}
