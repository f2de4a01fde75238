//! # Call Context
//!
//! A [`Context`] travels with every call, on both the client and the server side. It carries
//! a cancellation signal, an optional deadline and the propagated trace context.
//!
//! Cancellation is cooperative: generated clients check the context at fixed checkpoints
//! (before the request is built, around the network round-trip and after the response is
//! decoded) and abort with an `Internal` error wrapping the [`ContextError`].
use crate::error::Error;
use crate::trace::SpanContext;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a context is done.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    #[error("context canceled")]
    Canceled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
    span_context: SpanContext,
}

impl Context {
    /// A context that is never canceled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// Derives a context canceled when the returned token is, or when `self` is.
    pub fn with_cancel(&self) -> (Self, CancellationToken) {
        let token = self.token.child_token();
        let ctx = Self {
            token: token.clone(),
            ..self.clone()
        };
        (ctx, token)
    }

    /// Derives a context that expires after `timeout`.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derives a context that expires at `deadline`, or earlier if `self` already does.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        };
        Self {
            deadline: Some(deadline),
            ..self.clone()
        }
    }

    pub fn with_span_context(&self, span_context: SpanContext) -> Self {
        Self {
            span_context,
            ..self.clone()
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn span_context(&self) -> &SpanContext {
        &self.span_context
    }

    /// Reports whether the context is done, and why.
    pub fn err(&self) -> Option<ContextError> {
        if self.token.is_cancelled() {
            return Some(ContextError::Canceled);
        }
        match self.deadline {
            Some(deadline) if deadline <= Instant::now() => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }
}

/// Fails with an `Internal` error if `ctx` is done.
pub fn checkpoint(ctx: &Context) -> Result<(), Error> {
    match ctx.err() {
        Some(err) => Err(Error::internal_with(err, "aborted because context was done")),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_background_is_never_done() {
        assert_eq!(Context::background().err(), None);
        assert!(checkpoint(&Context::background()).is_ok());
    }

    #[test]
    fn test_cancel_propagates_to_children_only() {
        let parent = Context::background();
        let (child, cancel) = parent.with_cancel();
        let (grandchild, _) = child.with_cancel();

        cancel.cancel();

        assert_eq!(parent.err(), None);
        assert_eq!(child.err(), Some(ContextError::Canceled));
        assert_eq!(grandchild.err(), Some(ContextError::Canceled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline() {
        let ctx = Context::background().with_timeout(Duration::from_secs(5));
        assert_eq!(ctx.err(), None);

        tokio::time::advance(Duration::from_secs(6)).await;

        assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));
        let err = checkpoint(&ctx).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.msg(), "aborted because context was done");
        assert_eq!(err.cause().unwrap().to_string(), "context deadline exceeded");
    }

    #[test]
    fn test_deadline_never_extended() {
        let now = Instant::now();
        let ctx = Context::background().with_deadline(now + Duration::from_secs(1));
        let later = ctx.with_deadline(now + Duration::from_secs(60));
        assert_eq!(later.deadline(), Some(now + Duration::from_secs(1)));
    }
}
