use axum::extract::ConnectInfo;
use axum::http::{Extensions, HeaderMap};
use std::net::{IpAddr, SocketAddr};

/// Resolve the caller's network address.
///
/// The socket peer recorded by `into_make_service_with_connect_info` is the
/// client unless it is one of `trusted_proxies`. Behind a trusted proxy the
/// `X-Forwarded-For` chain is walked from the right and the first hop that is
/// not itself a trusted proxy wins; entries left of it were written by the
/// client and are never believed. `None` when no peer is recorded, e.g. in
/// router tests driven with `oneshot`.
pub fn client_ip(
    headers: &HeaderMap,
    extensions: &Extensions,
    trusted_proxies: &[IpAddr],
) -> Option<IpAddr> {
    let peer = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())?;

    if !trusted_proxies.contains(&peer) {
        return Some(peer);
    }

    let hops: Vec<&str> = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .collect();

    for hop in hops.iter().rev() {
        match hop.parse::<IpAddr>() {
            Ok(ip) if trusted_proxies.contains(&ip) => continue,
            Ok(ip) => return Some(ip),
            Err(_) => break,
        }
    }

    Some(peer)
}
