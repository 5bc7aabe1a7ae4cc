//! Rate limiting for display record streams

use futures::Stream;
use pin_project_lite::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::{Instant, Sleep, sleep_until};

/// Extension trait to add latest-wins rate limiting to any Stream
pub trait ThrottleExt: Stream {
    /// Emit at most one item per `period`.
    ///
    /// Items that arrive while the stream is cooling down replace each other;
    /// only the most recent one is emitted when the period elapses. The first
    /// item is emitted immediately.
    fn throttle(self, period: Duration) -> Throttle<Self>
    where
        Self: Sized,
    {
        Throttle::new(self, period)
    }
}

impl<T: Stream> ThrottleExt for T {}

pin_project! {
    /// Stream returned by [`ThrottleExt::throttle`]
    pub struct Throttle<S: Stream> {
        #[pin]
        stream: S,
        #[pin]
        cooldown: Sleep,
        period: Duration,
        cooling: bool,
        pending: Option<S::Item>,
        finished: bool,
    }
}

impl<S: Stream> Throttle<S> {
    pub fn new(stream: S, period: Duration) -> Self {
        Self {
            stream,
            cooldown: sleep_until(Instant::now()),
            period,
            cooling: false,
            pending: None,
            finished: false,
        }
    }
}

impl<S: Stream> Stream for Throttle<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if !*this.cooling {
                let item = match this.pending.take() {
                    Some(item) => item,
                    None if *this.finished => return Poll::Ready(None),
                    None => match this.stream.as_mut().poll_next(cx) {
                        Poll::Ready(Some(item)) => item,
                        Poll::Ready(None) => {
                            *this.finished = true;
                            return Poll::Ready(None);
                        }
                        Poll::Pending => return Poll::Pending,
                    },
                };
                let deadline = Instant::now() + *this.period;
                this.cooldown.as_mut().reset(deadline);
                *this.cooling = true;
                return Poll::Ready(Some(item));
            }

            // Cooling down: keep only the latest item from the inner stream.
            while !*this.finished {
                match this.stream.as_mut().poll_next(cx) {
                    Poll::Ready(Some(item)) => *this.pending = Some(item),
                    Poll::Ready(None) => *this.finished = true,
                    Poll::Pending => break,
                }
            }

            if this.cooldown.as_mut().poll(cx).is_ready() {
                *this.cooling = false;
                continue;
            }
            if *this.finished && this.pending.is_none() {
                return Poll::Ready(None);
            }
            return Poll::Pending;
        }
    }
}
