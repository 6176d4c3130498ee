// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Connection establishment with implicit-TLS-first, STARTTLS fallback.

use std::time::Duration;

use async_native_tls::{TlsConnector, TlsStream};
use log::debug;
use tokio::net::TcpStream;

use crate::imap::error::ImapError;

/// Upper bound on the combined dial stage of a migration (both servers,
/// including the fallback attempt).
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(15);

/// Stream type shared by both connection paths: a direct TLS connection and
/// a plaintext connection upgraded via STARTTLS end up identical.
pub type ImapStream = TlsStream<TcpStream>;

pub type Client = async_imap::Client<ImapStream>;

fn tls_connector(accept_invalid_certs: bool) -> TlsConnector {
    // Skipping verification is permitted only in debug deployments; the
    // caller gates this on the DEBUG setting.
    TlsConnector::new().danger_accept_invalid_certs(accept_invalid_certs)
}

/// Connects to an IMAP server, attempting TLS-from-the-start and falling
/// back to plaintext-then-STARTTLS. The caller bounds the overall dial
/// stage with [`DIAL_TIMEOUT`].
pub async fn dial(host: &str, port: u16, accept_invalid_certs: bool) -> Result<Client, ImapError> {
    match dial_tls(host, port, accept_invalid_certs).await {
        Ok(client) => {
            debug!("connected to {host}:{port} with implicit TLS");
            Ok(client)
        }
        Err(e) => {
            debug!("implicit TLS to {host}:{port} failed ({e}), trying STARTTLS");
            let client = dial_starttls(host, port, accept_invalid_certs).await?;
            debug!("connected to {host}:{port} via STARTTLS");
            Ok(client)
        }
    }
}

async fn dial_tls(host: &str, port: u16, accept_invalid_certs: bool) -> Result<Client, ImapError> {
    let tcp = TcpStream::connect((host, port)).await?;
    let tls_stream = tls_connector(accept_invalid_certs).connect(host, tcp).await?;
    Ok(async_imap::Client::new(tls_stream))
}

async fn dial_starttls(
    host: &str,
    port: u16,
    accept_invalid_certs: bool,
) -> Result<Client, ImapError> {
    let tcp = TcpStream::connect((host, port)).await?;

    let mut client = async_imap::Client::new(tcp);
    // The plaintext greeting arrives before we may upgrade.
    let _greeting = client.read_response().await;
    client
        .run_command_and_check_ok("STARTTLS", None)
        .await
        .map_err(ImapError::from)?;

    let stream = client.into_inner();
    let tls_stream = tls_connector(accept_invalid_certs)
        .connect(host, stream)
        .await?;

    Ok(async_imap::Client::new(tls_stream))
}
