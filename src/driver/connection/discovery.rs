//! UDP IP discovery, used to learn this client's external address as seen by the relay.
//!
//! Both request and response are [`IP_DISCOVERY_LEN`] bytes long. A request carries
//! only the SSRC in its first four bytes. A response carries the address as
//! NUL-terminated ASCII starting at byte 4, followed by the port in the final two bytes.

use super::error::{Error, Result};
use crate::constants::IP_DISCOVERY_LEN;
use byteorder::{ByteOrder, NetworkEndian};
use std::{net::IpAddr, str::FromStr, time::Duration};
use tokio::{net::UdpSocket, time::timeout};
use tracing::{debug, instrument};

const ADDRESS_START: usize = 4;
const ADDRESS_END_OFFSET: usize = 6;
const PORT_LEN: usize = 2;

/// Builds a discovery request for the given SSRC.
#[must_use]
pub(crate) fn request(ssrc: u32) -> [u8; IP_DISCOVERY_LEN] {
    let mut out = [0u8; IP_DISCOVERY_LEN];
    NetworkEndian::write_u32(&mut out[..4], ssrc);
    out
}

/// Extracts the external IP and port from a discovery response.
pub(crate) fn parse_response(bytes: &[u8]) -> Result<(IpAddr, u16)> {
    if bytes.len() != IP_DISCOVERY_LEN {
        return Err(Error::IllegalDiscoveryResponse);
    }

    let address_raw = &bytes[ADDRESS_START..bytes.len() - ADDRESS_END_OFFSET];

    // The spoofing risk means we cannot assume a trailing run of NULs; the first
    // one terminates the address.
    let nul_byte_index = address_raw
        .iter()
        .position(|&b| b == 0)
        .ok_or(Error::IllegalIp)?;

    let address_str =
        std::str::from_utf8(&address_raw[..nul_byte_index]).map_err(|_| Error::IllegalIp)?;

    let address = IpAddr::from_str(address_str).map_err(|_| Error::IllegalIp)?;
    let port = NetworkEndian::read_u16(&bytes[bytes.len() - PORT_LEN..]);

    Ok((address, port))
}

/// Builds the response a relay would send for the given address.
#[cfg(test)]
pub(crate) fn response(ip: &str, port: u16) -> [u8; IP_DISCOVERY_LEN] {
    let mut out = [0u8; IP_DISCOVERY_LEN];
    out[1] = 2;
    out[3] = 70;
    out[ADDRESS_START..][..ip.len()].copy_from_slice(ip.as_bytes());
    NetworkEndian::write_u16(&mut out[IP_DISCOVERY_LEN - PORT_LEN..], port);
    out
}

/// Sends a discovery request over a connected socket and waits for a valid reply.
///
/// Datagrams of any other length are ignored. Expiry of `wait` fails with
/// [`Error::TimedOut`].
#[instrument(skip(udp))]
pub(crate) async fn discover(udp: &UdpSocket, ssrc: u32, wait: Duration) -> Result<(IpAddr, u16)> {
    udp.send(&request(ssrc)).await?;

    timeout(wait, async {
        // One spare byte lets oversized datagrams be told apart from valid ones.
        let mut buf = [0u8; IP_DISCOVERY_LEN + 1];
        loop {
            let len = udp.recv(&mut buf).await?;
            if len == IP_DISCOVERY_LEN {
                return parse_response(&buf[..len]);
            }

            debug!("Ignoring {len}B datagram while awaiting IP discovery.");
        }
    })
    .await?
}
