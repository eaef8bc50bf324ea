//! Ticket code generation.
//!
//! Codes are a fixed prefix plus 8 uppercase hex digits (`CMP-A1B2C3D4`).
//! The generator is a PCG stream: production seeds it from entropy,
//! tests seed it explicitly so issued codes are reproducible.
//! Uniqueness is enforced by the store; on a collision the lifecycle
//! simply draws the next code.

use rand::{RngCore, SeedableRng};
use rand_pcg::Pcg64Mcg;
use std::sync::Mutex;

pub const TICKET_PREFIX: &str = "CMP-";
const SUFFIX_LEN: usize = 8;

pub struct TicketCodeGenerator {
    inner: Mutex<Pcg64Mcg>,
}

impl TicketCodeGenerator {
    pub fn seeded(seed: u64) -> Self {
        Self {
            inner: Mutex::new(Pcg64Mcg::seed_from_u64(seed)),
        }
    }

    pub fn from_entropy() -> Self {
        let seed = uuid::Uuid::new_v4().as_u128();
        Self::seeded((seed >> 64) as u64 ^ seed as u64)
    }

    /// Draw the next candidate code.
    pub fn next_code(&self) -> String {
        let mut rng = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        format!("{TICKET_PREFIX}{:08X}", rng.next_u32())
    }
}

/// True when `code` has the exact `CMP-XXXXXXXX` shape.
pub fn is_ticket_code(code: &str) -> bool {
    code.strip_prefix(TICKET_PREFIX).is_some_and(|suffix| {
        suffix.len() == SUFFIX_LEN
            && suffix
                .chars()
                .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c))
    })
}
