// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

use xmpp_parsers::stanza_error::{DefinedCondition, StanzaError};

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("Request Timeout")]
    TimedOut,
    #[error("Request Error: Disconnected")]
    Disconnected,
    #[error("Request Error: Unexpected server response")]
    UnexpectedResponse,
    #[error("XMPP Error: {err:?}")]
    XMPP { err: StanzaError },
    #[error("Request error: {msg}")]
    Generic { msg: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Parse error: {msg}")]
    Generic { msg: String },
}

impl RequestError {
    pub fn is_item_not_found_err(&self) -> bool {
        self.defined_condition() == Some(DefinedCondition::ItemNotFound)
    }

    pub fn is_forbidden_err(&self) -> bool {
        self.defined_condition() == Some(DefinedCondition::Forbidden)
    }

    pub fn defined_condition(&self) -> Option<DefinedCondition> {
        let RequestError::XMPP { err } = self else {
            return None;
        };
        Some(err.defined_condition.clone())
    }
}

impl From<StanzaError> for RequestError {
    fn from(err: StanzaError) -> Self {
        RequestError::XMPP { err }
    }
}

impl From<ParseError> for RequestError {
    fn from(err: ParseError) -> Self {
        RequestError::Generic {
            msg: err.to_string(),
        }
    }
}

impl From<anyhow::Error> for RequestError {
    fn from(err: anyhow::Error) -> Self {
        RequestError::Generic {
            msg: err.to_string(),
        }
    }
}

impl From<xmpp_parsers::Error> for RequestError {
    fn from(err: xmpp_parsers::Error) -> Self {
        RequestError::Generic {
            msg: err.to_string(),
        }
    }
}

impl From<std::num::ParseIntError> for ParseError {
    fn from(err: std::num::ParseIntError) -> Self {
        ParseError::Generic {
            msg: err.to_string(),
        }
    }
}

impl From<jid::Error> for ParseError {
    fn from(err: jid::Error) -> Self {
        ParseError::Generic {
            msg: err.to_string(),
        }
    }
}
