// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

use jid::BareJid;
use minidom::Element;
use xmpp_parsers::data_forms::{DataForm, DataFormType, Field, FieldType};
use xmpp_parsers::iq::Iq;
use xmpp_parsers::pubsub;
use xmpp_parsers::pubsub::{ItemId, NodeName};

use crate::client::ModuleContext;
use crate::mods::Module;
use crate::util::RequestError;

/// Generic PEP/PubSub plumbing shared by the profile and bookmark flows.
#[derive(Default, Clone)]
pub struct PubSub {
    ctx: ModuleContext,
}

impl Module for PubSub {
    fn register_with(&mut self, context: ModuleContext) {
        self.ctx = context
    }
}

impl PubSub {
    pub async fn publish_item(
        &self,
        node: impl Into<String>,
        item_id: Option<String>,
        payload: impl Into<Element>,
        private: bool,
    ) -> Result<(), RequestError> {
        let iq = Iq::from_set(
            self.ctx.generate_id(),
            pubsub::PubSub::Publish {
                publish: pubsub::pubsub::Publish {
                    node: NodeName(node.into()),
                    items: vec![pubsub::pubsub::Item(pubsub::Item {
                        id: item_id.map(ItemId),
                        publisher: None,
                        payload: Some(payload.into()),
                    })],
                },
                publish_options: private.then(private_publish_options),
            },
        );
        self.ctx.send_iq(iq).await?;
        Ok(())
    }

    pub async fn retract_item(
        &self,
        node: impl Into<String>,
        item_id: impl Into<String>,
    ) -> Result<(), RequestError> {
        let iq = Iq::from_set(
            self.ctx.generate_id(),
            pubsub::PubSub::Retract(pubsub::pubsub::Retract {
                node: NodeName(node.into()),
                notify: pubsub::pubsub::Notify::True,
                items: vec![pubsub::pubsub::Item(pubsub::Item {
                    id: Some(ItemId(item_id.into())),
                    publisher: None,
                    payload: None,
                })],
            }),
        );
        self.ctx.send_iq(iq).await?;
        Ok(())
    }

    pub async fn load_items(
        &self,
        from: Option<BareJid>,
        node: impl Into<String>,
        item_ids: impl IntoIterator<Item = String>,
        max_items: Option<u32>,
    ) -> Result<Vec<pubsub::Item>, RequestError> {
        Ok(self
            .ctx
            .query_pubsub_node(from, node, item_ids.into_iter().collect(), max_items)
            .await?
            .unwrap_or_default())
    }
}

/// Publish options for data only we should be able to read back: persisted
/// items behind a whitelist access model.
/// https://xmpp.org/extensions/xep-0223.html#approach
pub(crate) fn private_publish_options() -> pubsub::pubsub::PublishOptions {
    let persist_items = Field {
        var: "pubsub#persist_items".to_string(),
        type_: FieldType::Boolean,
        label: None,
        required: false,
        media: vec![],
        options: vec![],
        values: vec!["true".to_string()],
    };

    pubsub::pubsub::PublishOptions {
        form: Some(DataForm::new(
            DataFormType::Submit,
            "http://jabber.org/protocol/pubsub#publish-options",
            vec![
                persist_items,
                Field::text_single("pubsub#access_model", "whitelist"),
            ],
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_private_publish_options_form() {
        let options = private_publish_options();
        let form = options.form.expect("Missing form");

        assert_eq!(
            form.form_type.as_deref(),
            Some("http://jabber.org/protocol/pubsub#publish-options")
        );
        let values: Vec<(&str, &str)> = form
            .fields
            .iter()
            .map(|field| (field.var.as_str(), field.values[0].as_str()))
            .collect();
        assert!(values.contains(&("pubsub#persist_items", "true")));
        assert!(values.contains(&("pubsub#access_model", "whitelist")));
    }
}
