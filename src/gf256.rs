//! GF(256) field arithmetic backing the rateless linear-algebra core.
//!
//! `coding/matrix.py`'s `dot()` combines coefficients with plain
//! floating-point multiplication and summation — numerically fragile over
//! many rounds of elimination, and the spec explicitly leaves the field
//! choice open (spec.md §9). This crate resolves that open question with a
//! proper finite field: GF(2^8) under the standard AES reduction polynomial
//! (0x11B), giving exact, bounded-width arithmetic with no floating-point
//! drift. Log/antilog tables are built once at first use and shared.

use std::sync::OnceLock;

const REDUCTION_POLY: u16 = 0x11B;

struct Tables {
    exp: [u8; 512],
    log: [u8; 256],
}

fn tables() -> &'static Tables {
    static TABLES: OnceLock<Tables> = OnceLock::new();
    TABLES.get_or_init(|| {
        let mut exp = [0u8; 512];
        let mut log = [0u8; 256];
        let mut x: u16 = 1;
        for i in 0..255usize {
            exp[i] = x as u8;
            log[x as usize] = i as u8;
            x <<= 1;
            if x & 0x100 != 0 {
                x ^= REDUCTION_POLY;
            }
        }
        for i in 255..512 {
            exp[i] = exp[i - 255];
        }
        Tables { exp, log }
    })
}

/// Adds two field elements (XOR: addition and subtraction coincide in
/// characteristic 2).
pub fn add(a: u8, b: u8) -> u8 {
    a ^ b
}

/// Multiplies two field elements.
pub fn mul(a: u8, b: u8) -> u8 {
    if a == 0 || b == 0 {
        return 0;
    }
    let t = tables();
    let log_sum = t.log[a as usize] as usize + t.log[b as usize] as usize;
    t.exp[log_sum]
}

/// Multiplicative inverse of a nonzero field element.
pub fn inv(a: u8) -> u8 {
    assert!(a != 0, "0 has no multiplicative inverse in GF(256)");
    let t = tables();
    let log_a = t.log[a as usize] as usize;
    t.exp[255 - log_a]
}

/// Divides `a` by nonzero `b`.
pub fn div(a: u8, b: u8) -> u8 {
    if a == 0 {
        return 0;
    }
    mul(a, inv(b))
}
