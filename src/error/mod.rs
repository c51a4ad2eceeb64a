use std::any::Any;
use std::{error::Error, fmt};

const ERR_MSG_SEND_TIMEOUT: &str = "timed out waiting for a reply";
const ERR_MSG_REQUESTOR_CLOSED: &str = "requestor closed";
const ERR_MSG_RESPONDER_CLOSED: &str = "responder closed";
const ERR_MSG_COMMS_CLOSED: &str = "comms channel has been closed";
const ERR_MSG_UNABLE_TO_SEND: &str = "unable to submit request";
const ERR_MSG_CONTEXT_COMPLETED: &str = "cancellation token fired";
const ERR_MSG_HANDLER_PANIC: &str = "recovered handler panic";
const ERR_MSG_SEND_PANIC: &str = "recovered panic during send";
const ERR_MSG_GONE_AWAY: &str = "requestor gone away";

/// Failure surfaced by `Requestor::send` or `Responder::listen_and_handle`.
///
/// Engine failures carry no payload; recovered panics carry the rendered
/// panic message; `Handler` wraps the application error produced by the
/// user-supplied handler, forwarded verbatim to the sender.
#[derive(Debug)]
pub enum CommsError {
    /// The reply wait elapsed before a matching response arrived.
    SendTimeout,
    /// `send` was invoked on a requestor already marked closed.
    RequestorClosed,
    /// The reply was produced by a responder that had been closed.
    ResponderClosed,
    /// The done signal fired: the responder will not reply.
    CommsChannelClosed,
    /// The work channel stayed full for every submit attempt.
    UnableToSendRequest,
    /// A cancellation token fired.
    ContextCompleted,
    /// The handler panicked; the payload is the rendered panic value.
    HandlerPanic(String),
    /// The send path panicked; the payload is the rendered panic value.
    SendPanic(String),
    /// The responder saw no requests for longer than the gone-away window.
    RequestorGoneAway,
    /// The handler returned an application error.
    Handler(anyhow::Error),
}

impl fmt::Display for CommsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommsError::SendTimeout => write!(f, "{ERR_MSG_SEND_TIMEOUT}"),
            CommsError::RequestorClosed => write!(f, "{ERR_MSG_REQUESTOR_CLOSED}"),
            CommsError::ResponderClosed => write!(f, "{ERR_MSG_RESPONDER_CLOSED}"),
            CommsError::CommsChannelClosed => write!(f, "{ERR_MSG_COMMS_CLOSED}"),
            CommsError::UnableToSendRequest => write!(f, "{ERR_MSG_UNABLE_TO_SEND}"),
            CommsError::ContextCompleted => write!(f, "{ERR_MSG_CONTEXT_COMPLETED}"),
            CommsError::HandlerPanic(v) => write!(f, "{ERR_MSG_HANDLER_PANIC}: {v}"),
            CommsError::SendPanic(v) => write!(f, "{ERR_MSG_SEND_PANIC}: {v}"),
            CommsError::RequestorGoneAway => write!(f, "{ERR_MSG_GONE_AWAY}"),
            CommsError::Handler(e) => write!(f, "handler error: {e}"),
        }
    }
}

impl Error for CommsError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CommsError::Handler(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

/// Render a caught panic payload for inclusion in an error.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "opaque panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_error_keeps_source() {
        let err = CommsError::Handler(anyhow::anyhow!("division by zero"));
        assert!(err.source().is_some());
        assert!(err.to_string().contains("division by zero"));
    }

    #[test]
    fn panic_payloads_render() {
        let caught =
            std::panic::catch_unwind(|| panic!("boom {}", 7)).expect_err("must panic");
        assert_eq!(panic_message(caught), "boom 7");
    }
}
