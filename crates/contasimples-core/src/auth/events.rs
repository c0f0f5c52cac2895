use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use crate::models::UserProfile;

/// A committed session transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn(UserProfile),
    UserUpdated(UserProfile),
    SignedOut,
}

impl AuthEvent {
    /// User after the transition, `None` once signed out
    pub fn user(&self) -> Option<&UserProfile> {
        match self {
            AuthEvent::SignedIn(user) | AuthEvent::UserUpdated(user) => Some(user),
            AuthEvent::SignedOut => None,
        }
    }
}

/// Fan-out of events to every live subscriber.
///
/// Channels are unbounded so a slow subscriber never loses or reorders
/// events.
#[derive(Debug, Default)]
pub(crate) struct Subscribers {
    senders: Mutex<Vec<mpsc::UnboundedSender<AuthEvent>>>,
}

impl Subscribers {
    pub(crate) fn subscribe(&self) -> AuthEvents {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        AuthEvents { rx }
    }

    /// Deliver `event` to everyone, dropping subscribers that went away
    pub(crate) fn publish(&self, event: AuthEvent) {
        let mut senders = self.senders.lock().unwrap_or_else(PoisonError::into_inner);
        senders.retain(|tx| tx.send(event.clone()).is_ok());
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Receiving end of a session subscription.
#[derive(Debug)]
pub struct AuthEvents {
    rx: mpsc::UnboundedReceiver<AuthEvent>,
}

impl AuthEvents {
    /// Wait for the next event. `None` once the controller is dropped.
    pub async fn recv(&mut self) -> Option<AuthEvent> {
        self.rx.recv().await
    }

    /// Next already-delivered event, without waiting
    pub fn try_recv(&mut self) -> Option<AuthEvent> {
        self.rx.try_recv().ok()
    }
}

impl Stream for AuthEvents {
    type Item = AuthEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
