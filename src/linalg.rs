//! C5: incremental Gaussian elimination over GF(256).
//!
//! Rateless Deluge decodes a page by collecting coded packets
//! (coefficient vector + coded data) and reducing them incrementally, the
//! way `coding/gaussian.py`'s `GaussianElimination` does: each new row is
//! reduced against the rows already kept, non-innovative (all-zero) rows
//! are discarded, and the system is considered solved once enough
//! independent rows have arrived to reach full rank. This port replaces the
//! original's plain float `dot()` (`coding/matrix.py`) with GF(256)
//! arithmetic ([`crate::gf256`]) so elimination is exact regardless of how
//! many rounds it runs.

use std::collections::BTreeMap;

use crate::error::LinalgError;
use crate::gf256;

/// One kept row: a normalized pivot column plus its eliminated coefficient
/// and data vectors.
struct Row {
    coeffs: Vec<u8>,
    data: Vec<u8>,
}

/// An incrementally-built linear system over GF(256): `width` unknown
/// packets, each carrying `packet_len` bytes, solved from coded
/// (coefficients, data) rows as they arrive.
pub struct LinearSystem {
    width: usize,
    packet_len: usize,
    /// Kept rows indexed by pivot column, already reduced into partial
    /// row-echelon form.
    rows: BTreeMap<usize, Row>,
}

impl LinearSystem {
    pub fn new(width: usize, packet_len: usize) -> Self {
        LinearSystem {
            width,
            packet_len,
            rows: BTreeMap::new(),
        }
    }

    /// Number of independent rows still needed to reach full rank.
    pub fn rows_required(&self) -> usize {
        self.width - self.rows.len()
    }

    pub fn is_solved(&self) -> bool {
        self.rows_required() == 0
    }

    /// Feeds one coded row into the system. Returns `true` if the row was
    /// innovative (increased rank), `false` if it reduced to all-zero
    /// coefficients and was discarded as redundant.
    pub fn add_row(&mut self, coeffs: &[u8], data: &[u8]) -> Result<bool, LinalgError> {
        if coeffs.len() != self.width {
            return Err(LinalgError::WidthMismatch {
                expected: self.width,
                got: coeffs.len(),
            });
        }
        if data.len() != self.packet_len {
            return Err(LinalgError::WidthMismatch {
                expected: self.packet_len,
                got: data.len(),
            });
        }
        if self.is_solved() {
            return Ok(false);
        }

        let mut coeffs = coeffs.to_vec();
        let mut data = data.to_vec();

        // Eliminate against every pivot already kept.
        for (&pivot, row) in self.rows.iter() {
            let factor = coeffs[pivot];
            if factor != 0 {
                eliminate(&mut coeffs, &mut data, &row.coeffs, &row.data, factor);
            }
        }

        let Some(pivot) = coeffs.iter().position(|&c| c != 0) else {
            return Ok(false);
        };

        // Normalize so the pivot entry is 1.
        let inv_pivot = gf256::inv(coeffs[pivot]);
        for c in coeffs.iter_mut() {
            *c = gf256::mul(*c, inv_pivot);
        }
        for d in data.iter_mut() {
            *d = gf256::mul(*d, inv_pivot);
        }

        // Back-eliminate this new pivot out of every row already kept, so
        // the system stays in full reduced row-echelon form at every step.
        for row in self.rows.values_mut() {
            let factor = row.coeffs[pivot];
            if factor != 0 {
                eliminate(
                    &mut row.coeffs,
                    &mut row.data,
                    &coeffs,
                    &data,
                    factor,
                );
            }
        }

        self.rows.insert(pivot, Row { coeffs, data });
        Ok(true)
    }

    /// Once solved, returns the decoded packet for each original column, in
    /// order.
    pub fn solve(&self) -> Result<Vec<Vec<u8>>, LinalgError> {
        if !self.is_solved() {
            return Err(LinalgError::NotYetSolved);
        }
        let mut out = Vec::with_capacity(self.width);
        for col in 0..self.width {
            let row = self.rows.get(&col).expect("full rank implies every pivot present");
            out.push(row.data.clone());
        }
        Ok(out)
    }
}

/// `coeffs -= factor * pivot_coeffs`, `data -= factor * pivot_data` (GF(256)
/// subtraction is addition).
fn eliminate(coeffs: &mut [u8], data: &mut [u8], pivot_coeffs: &[u8], pivot_data: &[u8], factor: u8) {
    for (c, &pc) in coeffs.iter_mut().zip(pivot_coeffs) {
        *c = gf256::add(*c, gf256::mul(factor, pc));
    }
    for (d, &pd) in data.iter_mut().zip(pivot_data) {
        *d = gf256::add(*d, gf256::mul(factor, pd));
    }
}
