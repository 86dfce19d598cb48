//! # Summary
//!
//! This module moves datagrams between the acceptor socket and the manager.
//!
//! There is no framing beyond the datagram itself and no retransmission:
//! every protocol message is idempotent and every round is retried on a
//! timer, so a lost packet costs latency and nothing else.

use std::sync::Arc;

use tokio::net::UdpSocket;

use crate::internal::{Rx, Tx};
use crate::message::Datagram;

/// Largest datagram sent or accepted.
pub const MAX_DATAGRAM: usize = 3000;

/// Spawns the receive and send halves onto the current runtime.
pub fn spawn(socket: UdpSocket, inbound: Tx<Datagram>, outbound: Rx<Datagram>) {
    let socket = Arc::new(socket);
    tokio::spawn(receive(socket.clone(), inbound));
    tokio::spawn(send(socket, outbound));
}

async fn receive(socket: Arc<UdpSocket>, inbound: Tx<Datagram>) {
    let mut buffer = vec![0; MAX_DATAGRAM];
    loop {
        let (len, addr) = match socket.recv_from(&mut buffer).await {
        | Ok(received) => received,
        | Err(error) => {
            warn!("receive failed: {}", error);
            continue
        }
        };
        let datagram = Datagram {
            addr,
            data: buffer[..len].to_vec(),
        };
        if inbound.try_send(datagram).is_err() {
            debug!("manager gone; closing receiver");
            return
        }
    }
}

async fn send(socket: Arc<UdpSocket>, mut outbound: Rx<Datagram>) {
    while let Some(datagram) = outbound.recv().await {
        if datagram.data.len() > MAX_DATAGRAM {
            warn!("dropping {} byte datagram to {}", datagram.data.len(), datagram.addr);
            continue
        }
        if let Err(error) = socket.send_to(&datagram.data, datagram.addr).await {
            warn!("send to {} failed: {}", datagram.addr, error);
        }
    }
    debug!("outbound channel closed; closing sender");
}
