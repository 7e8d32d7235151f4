use std::ops::ControlFlow;

use crate::error::CoreError;

/// Receives `(fraction, message)` updates; returning `Break` cancels the operation.
pub trait Progress {
    fn report(&mut self, fraction: f64, message: &str) -> ControlFlow<()>;
}

impl<F> Progress for F
where
    F: FnMut(f64, &str) -> ControlFlow<()>,
{
    fn report(&mut self, fraction: f64, message: &str) -> ControlFlow<()> {
        self(fraction, message)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn report(&mut self, _fraction: f64, _message: &str) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }
}

/// Maps `[0, 1]` onto the `[start, end]` slice of a parent's range.
pub struct SubProgress<'a, P: Progress + ?Sized> {
    parent: &'a mut P,
    start: f64,
    end: f64,
}

impl<'a, P: Progress + ?Sized> SubProgress<'a, P> {
    pub fn new(parent: &'a mut P, start: f64, end: f64) -> Self {
        Self { parent, start, end }
    }
}

impl<P: Progress + ?Sized> Progress for SubProgress<'_, P> {
    fn report(&mut self, fraction: f64, message: &str) -> ControlFlow<()> {
        let fraction = fraction.clamp(0.0, 1.0);
        self.parent
            .report(self.start + (self.end - self.start) * fraction, message)
    }
}

/// Reports and turns a `Break` into a cancellation error.
pub(crate) fn checkpoint<P: Progress + ?Sized>(
    progress: &mut P,
    fraction: f64,
    message: &str,
) -> Result<(), CoreError> {
    match progress.report(fraction, message) {
        ControlFlow::Continue(()) => Ok(()),
        ControlFlow::Break(()) => Err(CoreError::cancelled()),
    }
}

pub(crate) fn fraction_of(pos: u64, len: u64) -> f64 {
    if len == 0 {
        1.0
    } else {
        pos as f64 / len as f64
    }
}
