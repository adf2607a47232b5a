// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::HeaderValue;

use super::*;

fn headers_with(value: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Some(v) = value {
        headers.insert(RECONCILE_TOKEN_HEADER, HeaderValue::from_str(v).unwrap());
    }
    headers
}

#[yare::parameterized(
    no_secret_configured = { None, None, true },
    matching             = { Some("s3cret"), Some("s3cret"), true },
    mismatched           = { Some("s3cret"), Some("s3creT"), false },
    different_length     = { Some("s3cret"), Some("s3cret!"), false },
    missing_header       = { Some("s3cret"), None, false },
)]
fn shared_secret(expected: Option<&str>, provided: Option<&str>, ok: bool) {
    let result = validate_shared_secret(&headers_with(provided), RECONCILE_TOKEN_HEADER, expected);
    assert_eq!(result.is_ok(), ok);
    if !ok {
        assert_eq!(result, Err(ErrorCode::Unauthorized));
    }
}

#[test]
fn constant_time_eq_matches_plain_equality() {
    assert!(constant_time_eq("", ""));
    assert!(constant_time_eq("abc", "abc"));
    assert!(!constant_time_eq("abc", "abd"));
    assert!(!constant_time_eq("abc", "ab"));
}
