// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Poll, Waker};

use minidom::Element;
use parking_lot::Mutex;
use tracing::error;
use xmpp_parsers::iq::IqType;

use crate::util::request_error::RequestError;
use crate::util::XMPPElement;

/// The session offers every inbound stanza to the pending futures before
/// the module chain sees it. A future reports whether it consumed the
/// element, passed it on, or completed (carrying the waker to fire after
/// the lock is released).
pub(crate) enum PendingFuturePoll {
    Pending(Option<XMPPElement>),
    Ready(Option<Waker>),
}

pub(crate) trait PendingFutureState: Send {
    fn handle_element(&mut self, element: XMPPElement) -> PendingFuturePoll;
    fn fail_with_timeout(&mut self) -> Option<Waker>;
    fn fail_with_disconnect(&mut self) -> Option<Waker>;
}

pub(crate) enum ElementReducerPoll {
    Pending(Option<XMPPElement>),
    Ready,
}

type ElementReducer<T> =
    Box<dyn Fn(&mut T, XMPPElement) -> Result<ElementReducerPoll, RequestError> + Send>;
type ResultTransformer<T, U> = fn(T) -> U;

/// A future that is resolved by feeding it inbound elements until its reducer
/// reports completion. The session visits all pending futures for each inbound
/// stanza; a future may consume the element, pass it on or finish.
pub(crate) struct RequestFuture<T: Send, U> {
    pub(crate) state: Arc<Mutex<ReducerFutureState<T, U>>>,
}

pub(crate) struct IQReducerState {
    request_id: String,
    element: Option<Element>,
}

impl RequestFuture<IQReducerState, Option<Element>> {
    pub fn new_iq_request(id: impl Into<String>) -> Self {
        let id = id.into();
        RequestFuture::new(
            id.clone(),
            IQReducerState {
                request_id: id,
                element: None,
            },
            |state, element| {
                let iq = match element {
                    XMPPElement::IQ(iq) => iq,
                    XMPPElement::Message(_)
                    | XMPPElement::Presence(_)
                    | XMPPElement::PubSubMessage(_) => {
                        return Ok(ElementReducerPoll::Pending(Some(element)))
                    }
                };

                if iq.id != state.request_id {
                    return Ok(ElementReducerPoll::Pending(Some(iq.into())));
                }

                match iq.payload {
                    IqType::Result(payload) => {
                        state.element = payload;
                        Ok(ElementReducerPoll::Ready)
                    }
                    IqType::Error(err) => Err(RequestError::XMPP { err }),
                    IqType::Get(_) | IqType::Set(_) => Err(RequestError::UnexpectedResponse),
                }
            },
            |state| state.element,
        )
    }
}

impl<T: Send, U> RequestFuture<T, U> {
    pub fn new<R>(
        identifier: impl Into<String>,
        initial_value: T,
        reducer: R,
        transformer: ResultTransformer<T, U>,
    ) -> Self
    where
        R: Fn(&mut T, XMPPElement) -> Result<ElementReducerPoll, RequestError> + Send + 'static,
    {
        RequestFuture {
            state: Arc::new(Mutex::new(ReducerFutureState {
                identifier: identifier.into(),
                reducer: Box::new(reducer),
                transformer,
                value: Some(initial_value),
                result: None,
                waker: None,
            })),
        }
    }

    pub fn failed(err: RequestError) -> Self {
        RequestFuture {
            state: Arc::new(Mutex::new(ReducerFutureState {
                identifier: "".to_string(),
                reducer: Box::new(|_, _| unreachable!("Executed reducer in failed RequestFuture")),
                transformer: |_| unreachable!("Executed transformer in failed RequestFuture"),
                value: None,
                result: Some(Err(err)),
                waker: None,
            })),
        }
    }
}

pub(crate) struct ReducerFutureState<T, U> {
    identifier: String,
    reducer: ElementReducer<T>,
    transformer: ResultTransformer<T, U>,
    value: Option<T>,
    result: Option<Result<(), RequestError>>,
    waker: Option<Waker>,
}

impl<T: Send, U> PendingFutureState for ReducerFutureState<T, U> {
    fn handle_element(&mut self, element: XMPPElement) -> PendingFuturePoll {
        if self.result.is_some() {
            return PendingFuturePoll::Ready(self.waker.take());
        }

        let mut value = self
            .value
            .take()
            .expect("Promise has been fulfilled already");
        let result = (self.reducer)(&mut value, element);
        self.value.replace(value);

        match result {
            Err(err) => {
                self.result = Some(Err(err));
                PendingFuturePoll::Ready(self.waker.take())
            }
            Ok(ElementReducerPoll::Ready) => {
                self.result = Some(Ok(()));
                PendingFuturePoll::Ready(self.waker.take())
            }
            Ok(ElementReducerPoll::Pending(element)) => PendingFuturePoll::Pending(element),
        }
    }

    fn fail_with_timeout(&mut self) -> Option<Waker> {
        error!("Request with id '{}' timed out.", self.identifier);
        self.result = Some(Err(RequestError::TimedOut));
        self.waker.take()
    }

    fn fail_with_disconnect(&mut self) -> Option<Waker> {
        self.result = Some(Err(RequestError::Disconnected));
        self.waker.take()
    }
}

impl<T: Send, U> Future for RequestFuture<T, U> {
    type Output = Result<U, RequestError>;

    fn poll(self: Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> Poll<Self::Output> {
        let mut state = self.state.lock();

        let Some(result) = state.result.take() else {
            state.waker = Some(cx.waker().clone());
            return Poll::Pending;
        };

        match result {
            Ok(_) => {
                let value = (state.transformer)(
                    state
                        .value
                        .take()
                        .expect("Promise has been fulfilled already"),
                );
                Poll::Ready(Ok(value))
            }
            Err(err) => Poll::Ready(Err(err)),
        }
    }
}
