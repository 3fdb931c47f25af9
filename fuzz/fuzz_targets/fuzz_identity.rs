//! Fuzz client identity resolution with arbitrary forwarding headers.
//!
//! ```bash
//! cargo +nightly fuzz run fuzz_identity
//! ```

#![no_main]

use std::net::{Ipv4Addr, SocketAddr};

use arbitrary::Arbitrary;
use axum::http::{HeaderMap, HeaderValue};
use inference_gate::middleware::{TrustedProxies, resolve_identity};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input<'a> {
    forwarded_for: Option<&'a [u8]>,
    real_ip: Option<&'a [u8]>,
    peer: Option<[u8; 4]>,
    restrict_proxies: bool,
}

fuzz_target!(|input: Input<'_>| {
    let mut headers = HeaderMap::new();
    if let Some(value) = input.forwarded_for.and_then(|v| HeaderValue::from_bytes(v).ok()) {
        headers.insert("x-forwarded-for", value);
    }
    if let Some(value) = input.real_ip.and_then(|v| HeaderValue::from_bytes(v).ok()) {
        headers.insert("x-real-ip", value);
    }

    let peer = input
        .peer
        .map(|octets| SocketAddr::from((Ipv4Addr::from(octets), 4000)));
    let trusted = if input.restrict_proxies {
        TrustedProxies::new(&["10.0.0.0/8".to_string()])
    } else {
        TrustedProxies::new(&[])
    };

    let identity = resolve_identity(&headers, peer, &trusted);
    assert!(!identity.is_empty());
});
