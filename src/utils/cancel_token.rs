use std::fmt;
use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared cancellation state. A state may carry a parent, so that
/// cancelling an ancestor is observed by every descendant.
struct TokenState {
    fired: AtomicBool,
    parent: Option<Arc<TokenState>>,
}

impl TokenState {
    #[inline]
    fn is_cancelled(&self) -> bool {
        let mut cur = self;
        loop {
            if cur.fired.load(Ordering::Relaxed) {
                return true;
            }
            match cur.parent.as_deref() {
                Some(parent) => cur = parent,
                None => return false,
            }
        }
    }
}

/// Hierarchical cancellation token.
///
/// Cloning is cheap (one `Arc` bump). Cancelling a token is observed by the
/// token itself and by every child derived from it; cancelling a child does
/// not affect its parent.
#[derive(Clone)]
pub struct CancelToken {
    state: Arc<TokenState>,
}

impl CancelToken {
    /// Create a new root token with no parent.
    #[inline]
    pub fn new_root() -> Self {
        Self {
            state: Arc::new(TokenState {
                fired: AtomicBool::new(false),
                parent: None,
            }),
        }
    }

    /// Derive a child token observing this token's cancellation.
    #[inline]
    pub fn child(&self) -> Self {
        Self {
            state: Arc::new(TokenState {
                fired: AtomicBool::new(false),
                parent: Some(self.state.clone()),
            }),
        }
    }

    /// Cancel this token and, transitively, all of its children.
    #[inline]
    pub fn cancel(&self) {
        self.state.fired.store(true, Ordering::Relaxed);
    }

    /// True once this token or any of its ancestors has been cancelled.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.state.is_cancelled()
    }
}

impl Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("is_cancelled", &self.is_cancelled())
            .finish()
    }
}
