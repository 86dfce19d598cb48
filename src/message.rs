//! # Summary
//!
//! Wire format and in-memory representation of consensus messages.
//!
//! On the wire a `Message` is a flat record of optional fields tagged by a
//! `Cmd`, serialized with `bincode`. Before any role looks at it, a message is
//! validated into a `Body`, a closed sum type carrying exactly the fields its
//! command requires. Messages missing a required field never become a `Body`
//! and are dropped without side effects.

use std::fmt;
use std::net::SocketAddr;

use serde_derive::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Message command tag.
#[derive(Serialize, Deserialize)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Cmd {
    Nop,
    Invite,
    Rsvp,
    Nominate,
    Vote,
    Tick,
    Propose,
    Learn,
}

impl Cmd {
    /// Number of distinct commands.
    pub const COUNT: usize = 8;

    pub const ALL: [Cmd; Cmd::COUNT] = [
        Cmd::Nop,
        Cmd::Invite,
        Cmd::Rsvp,
        Cmd::Nominate,
        Cmd::Vote,
        Cmd::Tick,
        Cmd::Propose,
        Cmd::Learn,
    ];

    /// Position of this command in per-command counters.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
        | Cmd::Nop => "NOP",
        | Cmd::Invite => "INVITE",
        | Cmd::Rsvp => "RSVP",
        | Cmd::Nominate => "NOMINATE",
        | Cmd::Vote => "VOTE",
        | Cmd::Tick => "TICK",
        | Cmd::Propose => "PROPOSE",
        | Cmd::Learn => "LEARN",
        }
    }
}

/// Wire representation. Every field but `cmd` is optional.
#[derive(Serialize, Deserialize)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub seqn: Option<i64>,
    pub cmd: Cmd,
    pub crnd: Option<i64>,
    pub vrnd: Option<i64>,
    pub value: Option<Vec<u8>>,
}

impl Message {
    pub fn new(cmd: Cmd) -> Self {
        Message {
            seqn: None,
            cmd,
            crnd: None,
            vrnd: None,
            value: None,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(Error::Encode)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data).map_err(Error::Decode)
    }

    /// Validates the fields required by `cmd`, returning `None` if any is missing.
    pub fn body(&self) -> Option<Body> {
        let value = || self.value.clone().unwrap_or_default();
        let body = match self.cmd {
        | Cmd::Nop => Body::Nop,
        | Cmd::Invite => Body::Invite { crnd: self.crnd? },
        | Cmd::Rsvp => Body::Rsvp {
            crnd: self.crnd?,
            vrnd: self.vrnd?,
            value: value(),
        },
        | Cmd::Nominate => Body::Nominate {
            crnd: self.crnd?,
            value: value(),
        },
        | Cmd::Vote => Body::Vote {
            vrnd: self.vrnd?,
            value: value(),
        },
        | Cmd::Tick => Body::Tick,
        | Cmd::Propose => Body::Propose { value: value() },
        | Cmd::Learn => Body::Learn { value: value() },
        };
        Some(body)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.seqn {
        | Some(seqn) => write!(f, "msg{{{} {}", seqn, self.cmd.name())?,
        | None => write!(f, "msg{{- {}", self.cmd.name())?,
        }
        if let Some(crnd) = self.crnd {
            write!(f, ", Crnd:{}", crnd)?;
        }
        if let Some(vrnd) = self.vrnd {
            write!(f, ", Vrnd:{}", vrnd)?;
        }
        if let Some(value) = self.value.as_ref().filter(|value| !value.is_empty()) {
            write!(f, ", Value:{}", String::from_utf8_lossy(value))?;
        }
        write!(f, "}}")
    }
}

/// Validated message contents.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Body {
    Nop,
    Invite { crnd: i64 },
    Rsvp { crnd: i64, vrnd: i64, value: Vec<u8> },
    Nominate { crnd: i64, value: Vec<u8> },
    Vote { vrnd: i64, value: Vec<u8> },
    Tick,
    Propose { value: Vec<u8> },
    Learn { value: Vec<u8> },
}

impl Body {
    pub fn cmd(&self) -> Cmd {
        match self {
        | Body::Nop => Cmd::Nop,
        | Body::Invite { .. } => Cmd::Invite,
        | Body::Rsvp { .. } => Cmd::Rsvp,
        | Body::Nominate { .. } => Cmd::Nominate,
        | Body::Vote { .. } => Cmd::Vote,
        | Body::Tick => Cmd::Tick,
        | Body::Propose { .. } => Cmd::Propose,
        | Body::Learn { .. } => Cmd::Learn,
        }
    }

    /// Converts back to wire form, stamped with `seqn`.
    pub fn into_message(self, seqn: i64) -> Message {
        let mut message = Message::new(self.cmd());
        message.seqn = Some(seqn);
        match self {
        | Body::Nop | Body::Tick => (),
        | Body::Invite { crnd } => message.crnd = Some(crnd),
        | Body::Rsvp { crnd, vrnd, value } => {
            message.crnd = Some(crnd);
            message.vrnd = Some(vrnd);
            message.value = Some(value);
        }
        | Body::Nominate { crnd, value } => {
            message.crnd = Some(crnd);
            message.value = Some(value);
        }
        | Body::Vote { vrnd, value } => {
            message.vrnd = Some(vrnd);
            message.value = Some(value);
        }
        | Body::Propose { value } | Body::Learn { value } => message.value = Some(value),
        }
        message
    }
}

/// A validated message addressed to one seqn, plus the address it came from.
///
/// Locally synthesized packets (proposals, fills, ticks) carry no address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    pub addr: Option<SocketAddr>,
    pub seqn: i64,
    pub body: Body,
}

impl Packet {
    pub fn local(seqn: i64, body: Body) -> Self {
        Packet {
            addr: None,
            seqn,
            body,
        }
    }

    /// Decodes and validates an inbound datagram.
    /// Returns `None` for anything undecodable, seqn-less, or invalid.
    pub fn parse(datagram: &Datagram) -> Option<Self> {
        let message = match Message::decode(&datagram.data) {
        | Ok(message) => message,
        | Err(error) => {
            debug!("discarding datagram from {}: {}", datagram.addr, error);
            return None
        }
        };
        let (seqn, body) = match (message.seqn, message.body()) {
        | (Some(seqn), Some(body)) => (seqn, body),
        | _ => {
            debug!("discarding {} from {}", message, datagram.addr);
            return None
        }
        };
        Some(Packet {
            addr: Some(datagram.addr),
            seqn,
            body,
        })
    }

    pub fn cmd(&self) -> Cmd {
        self.body.cmd()
    }
}

/// Encoded message bytes with an out-of-band peer address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Datagram {
    pub addr: SocketAddr,
    pub data: Vec<u8>,
}

impl Datagram {
    pub fn new(addr: SocketAddr, message: &Message) -> Result<Self> {
        Ok(Datagram {
            addr,
            data: message.encode()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "1.2.3.4:5".parse().unwrap()
    }

    #[test]
    fn invite_requires_crnd() {
        assert_eq!(Message::new(Cmd::Invite).body(), None);
        let mut message = Message::new(Cmd::Invite);
        message.crnd = Some(3);
        assert_eq!(message.body(), Some(Body::Invite { crnd: 3 }));
    }

    #[test]
    fn rsvp_requires_both_rounds() {
        let mut message = Message::new(Cmd::Rsvp);
        message.crnd = Some(2);
        assert_eq!(message.body(), None);
        message.vrnd = Some(0);
        assert_eq!(
            message.body(),
            Some(Body::Rsvp { crnd: 2, vrnd: 0, value: vec![] }),
        );
    }

    #[test]
    fn nominate_and_vote_require_rounds() {
        assert_eq!(Message::new(Cmd::Nominate).body(), None);
        assert_eq!(Message::new(Cmd::Vote).body(), None);
        assert_eq!(Message::new(Cmd::Learn).body(), Some(Body::Learn { value: vec![] }));
        assert_eq!(Message::new(Cmd::Tick).body(), Some(Body::Tick));
    }

    #[test]
    fn body_survives_the_wire() {
        let body = Body::Rsvp { crnd: 4, vrnd: 1, value: b"v".to_vec() };
        let message = body.clone().into_message(9);
        let datagram = Datagram::new(addr(), &message).unwrap();
        let packet = Packet::parse(&datagram).unwrap();
        assert_eq!(packet.seqn, 9);
        assert_eq!(packet.addr, Some(addr()));
        assert_eq!(packet.body, body);
    }

    #[test]
    fn parse_drops_garbage() {
        let empty = Datagram { addr: addr(), data: vec![] };
        assert_eq!(Packet::parse(&empty), None);
        let garbage = Datagram { addr: addr(), data: vec![0x80] };
        assert_eq!(Packet::parse(&garbage), None);
    }

    #[test]
    fn parse_drops_seqnless_messages() {
        let message = Message::new(Cmd::Learn);
        let datagram = Datagram::new(addr(), &message).unwrap();
        assert_eq!(Packet::parse(&datagram), None);
    }

    #[test]
    fn display_matches_log_format() {
        let message = Body::Invite { crnd: 1 }.into_message(3);
        assert_eq!(message.to_string(), "msg{3 INVITE, Crnd:1}");
    }
}
