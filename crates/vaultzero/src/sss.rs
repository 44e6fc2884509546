//! threshold secret sharing using shamir's scheme over GF(256)
//!
//! generic (k, n): every byte of the secret gets its own random polynomial
//! of degree k-1 with the byte as constant term. share i is the polynomial
//! evaluated at x = i. any k shares interpolate back to x = 0; fewer than k
//! reveal nothing about any byte.
//!
//! node count and threshold are policy, see [`crate::quorum::Topology`].

use std::collections::BTreeMap;

use rand::RngCore;

use crate::share::Share;
use crate::{Error, Result};

/// GF(256) multiplication using AES polynomial (x^8 + x^4 + x^3 + x + 1)
pub(crate) fn gf256_mul(a: u8, b: u8) -> u8 {
    let mut result = 0u8;
    let mut a = a;
    let mut b = b;

    while b != 0 {
        if b & 1 != 0 {
            result ^= a;
        }
        let hi = a & 0x80;
        a <<= 1;
        if hi != 0 {
            a ^= 0x1b; // AES polynomial
        }
        b >>= 1;
    }
    result
}

/// GF(256) multiplicative inverse, a^254 = a^(-1)
pub(crate) fn gf256_inv(a: u8) -> u8 {
    if a == 0 {
        return 0; // 0 has no inverse
    }
    let mut result = a;
    for _ in 0..6 {
        result = gf256_mul(result, result);
        result = gf256_mul(result, a);
    }
    gf256_mul(result, result)
}

fn gf256_div(a: u8, b: u8) -> u8 {
    gf256_mul(a, gf256_inv(b))
}

/// evaluate polynomial at point x (horner, coefficients low to high)
fn poly_eval(coeffs: &[u8], x: u8) -> u8 {
    coeffs
        .iter()
        .rev()
        .fold(0u8, |acc, &c| gf256_mul(acc, x) ^ c)
}

/// lagrange interpolation at x=0 to recover secret
fn lagrange_interpolate(points: &[(u8, u8)]) -> u8 {
    let mut result = 0u8;

    for (i, &(xi, yi)) in points.iter().enumerate() {
        let mut num = 1u8;
        let mut den = 1u8;

        for (j, &(xj, _)) in points.iter().enumerate() {
            if i != j {
                num = gf256_mul(num, xj); // (0 - xj) = xj in GF(256)
                den = gf256_mul(den, xi ^ xj); // (xi - xj)
            }
        }

        result ^= gf256_mul(yi, gf256_div(num, den));
    }

    result
}

/// a (threshold, shares) sharing scheme
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Scheme {
    threshold: usize,
    shares: usize,
}

impl Scheme {
    /// `1 <= threshold <= shares <= 255`
    pub fn new(threshold: usize, shares: usize) -> Result<Self> {
        if threshold == 0 || threshold > shares || shares > u8::MAX as usize {
            return Err(Error::InvalidScheme { threshold, shares });
        }
        Ok(Self { threshold, shares })
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn shares(&self) -> usize {
        self.shares
    }

    /// split a secret into `shares` shares, any `threshold` of which recover it
    pub fn split(&self, secret: &[u8]) -> Result<Vec<Share>> {
        if secret.is_empty() {
            return Err(Error::InvalidSecretLength { len: 0, max: 0 });
        }

        let mut rng = rand::thread_rng();
        let mut shares: Vec<Share> = (1..=self.shares as u8)
            .map(|x| Share::new(x, vec![0u8; secret.len()]))
            .collect();

        let mut coeffs = vec![0u8; self.threshold];
        for (i, &byte) in secret.iter().enumerate() {
            coeffs[0] = byte;
            rng.fill_bytes(&mut coeffs[1..]);

            for share in shares.iter_mut() {
                share.data[i] = poly_eval(&coeffs, share.index);
            }
        }
        coeffs.iter_mut().for_each(|c| *c = 0);

        Ok(shares)
    }

    /// reconstruct the secret from at least `threshold` distinct shares
    pub fn combine(&self, shares: &[Share]) -> Result<Vec<u8>> {
        let mut distinct: BTreeMap<u8, &Share> = BTreeMap::new();
        for share in shares {
            if share.index == 0 {
                return Err(Error::Reconstruction("share index 0 is reserved".into()));
            }
            match distinct.get(&share.index) {
                Some(existing) if existing.data != share.data => {
                    return Err(Error::Reconstruction(format!(
                        "conflicting shares for index {}",
                        share.index
                    )));
                }
                Some(_) => {}
                None => {
                    distinct.insert(share.index, share);
                }
            }
        }

        if distinct.len() < self.threshold {
            return Err(Error::Reconstruction(format!(
                "not enough shares: have {}, need {}",
                distinct.len(),
                self.threshold
            )));
        }

        // every supplied share must agree on length, not just the ones used
        let len = distinct.values().next().map_or(0, |s| s.data.len());
        if distinct.values().any(|s| s.data.len() != len) {
            return Err(Error::Reconstruction("inconsistent share lengths".into()));
        }

        let used: Vec<&Share> = distinct.values().take(self.threshold).copied().collect();

        let secret = (0..len)
            .map(|i| {
                let points: Vec<(u8, u8)> = used.iter().map(|s| (s.index, s.data[i])).collect();
                lagrange_interpolate(&points)
            })
            .collect();

        Ok(secret)
    }
}
