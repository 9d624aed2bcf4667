// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

use std::time::Duration;

use xmpp_parsers::iq::Iq;
use xmpp_parsers::ping::Ping as PingPayload;

use crate::client::{IqRequestType, ModuleContext};
use crate::mods::Module;
use crate::ns;
use crate::util::RequestError;

/// XEP-0199: XMPP Ping
/// https://xmpp.org/extensions/xep-0199.html
#[derive(Default, Clone)]
pub struct Ping {
    ctx: ModuleContext,
}

impl Module for Ping {
    fn register_with(&mut self, context: ModuleContext) {
        // Inbound pings are answered with an empty result.
        context.register_iq_callee(ns::PING, "ping", IqRequestType::Get, Box::new(|_| Ok(None)));
        self.ctx = context;
    }
}

impl Ping {
    pub async fn send_ping(
        &self,
        to: impl Into<jid::Jid>,
        timeout: Duration,
    ) -> Result<(), RequestError> {
        self.ctx
            .send_iq_with_timeout(
                Iq::from_get(self.ctx.generate_id(), PingPayload).with_to(to.into()),
                timeout,
            )
            .await?;
        Ok(())
    }

    pub async fn send_ping_to_server(&self, timeout: Duration) -> Result<(), RequestError> {
        self.send_ping(self.ctx.server_jid(), timeout).await
    }
}
