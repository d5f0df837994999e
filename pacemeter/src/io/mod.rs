//! Throttled I/O
//!
//! [`ThrottledReader`] meters every byte read from an inner reader on a
//! byte-rate [`Quantity`] and applies the throttler's backpressure inline with
//! the read path.

use std::io::{self, Read};

use crate::core::{Quantity, ThrottleError, Throttler};

#[cfg(test)]
mod tests;

/// A reader whose throughput is limited by a quantity's throttler
///
/// Each `read`:
/// 1. opens an operation bracket unless the calling thread already holds one,
/// 2. reads from the inner reader,
/// 3. reports `bytes / rate_units` on the quantity and throttles,
/// 4. closes the bracket it opened and waits out the residual pause.
///
/// Callers that wrap several reads in their own bracket get one throttle per
/// read and keep control of the final pause.
pub struct ThrottledReader<R> {
    inner: R,
    quantity: Quantity,
    throttler: Throttler,
}

impl<R: Read> ThrottledReader<R> {
    pub fn new(inner: R, quantity: Quantity) -> Self {
        let throttler = quantity.throttler();
        ThrottledReader {
            inner,
            quantity,
            throttler,
        }
    }

    pub fn quantity(&self) -> &Quantity {
        &self.quantity
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn meter(&self, n: usize) -> Result<(), ThrottleError> {
        self.quantity
            .update(n as f64 / self.quantity.rate_units())?;
        self.throttler.throttle()
    }
}

fn contract_error(err: ThrottleError) -> io::Error {
    io::Error::other(err)
}

impl<R: Read> Read for ThrottledReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let opened = !self.throttler.holds_operation();
        if opened {
            self.throttler.start_operation().map_err(contract_error)?;
        }

        let result = self.inner.read(buf);
        let metered = match &result {
            Ok(n) if *n > 0 => self.meter(*n),
            _ => Ok(()),
        };

        if opened {
            let mut pause = self.throttler.stop_operation().map_err(contract_error)?;
            if pause.is_needed() {
                pause.wait();
            }
        }

        metered.map_err(contract_error)?;
        result
    }
}
