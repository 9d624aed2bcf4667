// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

pub use element_ext::{parse_bool, ElementBuilderExt, ElementExt};
pub use join_all::join_all_limited;
pub use request_error::{ParseError, RequestError};
pub(crate) use request_future::{
    ElementReducerPoll, PendingFuturePoll, PendingFutureState, RequestFuture,
};
pub use xmpp_element::XMPPElement;

pub mod element_ext;
pub(crate) mod id_string_macro;
mod join_all;
mod request_error;
mod request_future;
mod xmpp_element;

use std::future::Future;
use std::pin::Pin;

pub type PinnedFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

pub(crate) fn spawn<F>(future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(future);
}
