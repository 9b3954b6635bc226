//! The two shapes in which audio hardware exchanges samples with the client.
//!
//! - [`Pushable<T>`] - capture: the device periodically hands over what it
//!   recorded.
//! - [`Pullable<T>`] - playback: the device asks for exactly as many samples
//!   as it is about to play.
//!
//! Both are driven from the audio host's own callback thread, so
//! implementations must return within the real-time budget: no blocking, no
//! unbounded work.

/// Passive receiver of captured samples.
pub trait Pushable<T: ?Sized>: Send {
    fn push(&mut self, input: &T);
}

/// Passive producer of playback samples.
pub trait Pullable<T>: Send {
    /// Fills all of `out` and returns how many samples were real audio. The
    /// remainder is silence.
    fn pull(&mut self, out: &mut [T]) -> usize;
}

impl<T: ?Sized, P: Pushable<T> + ?Sized> Pushable<T> for Box<P> {
    fn push(&mut self, input: &T) {
        (**self).push(input)
    }
}

impl<T, P: Pullable<T> + ?Sized> Pullable<T> for Box<P> {
    fn pull(&mut self, out: &mut [T]) -> usize {
        (**self).pull(out)
    }
}
