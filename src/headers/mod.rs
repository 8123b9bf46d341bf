//! Bit-exact, defensive parsers for the header layouts listed in §6. Each
//! parser takes a byte slice starting at the header and returns the parsed
//! fields plus the header's length in bytes; none of them copy the payload.

pub mod ipv4;
pub mod plus;
pub mod quic;
pub mod tcp;
pub mod udp;
