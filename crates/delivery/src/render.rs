//! Turn a `Delivery` into an outbound mail.

use minijinja::{context, Environment};
use thiserror::Error;

use herald_core::Delivery;
use herald_infra::mail::{
    OutboundMail, HEADER_CLIENT_ID, HEADER_NOTIFICATION_ID, HEADER_REQUEST_RECEIVED,
    HEADER_VCAP_REQUEST_ID,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("failed to render {part}: {reason}")]
    Template { part: &'static str, reason: String },
}

/// Renders subject/text/html from the templates carried in the delivery.
#[derive(Debug, Clone)]
pub struct MessageRenderer {
    sender: String,
    root_path: String,
}

impl MessageRenderer {
    pub fn new(sender: impl Into<String>, root_path: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            root_path: root_path.into().trim_end_matches('/').to_string(),
        }
    }

    /// Link offered to users who may opt out; critical kinds and raw-email
    /// recipients get none.
    pub fn unsubscribe_link(&self, delivery: &Delivery) -> Option<String> {
        (delivery.has_user() && !delivery.options.critical)
            .then(|| format!("{}/unsubscribe/{}", self.root_path, delivery.message_id))
    }

    pub fn render(&self, delivery: &Delivery) -> Result<OutboundMail, RenderError> {
        let env = Environment::new();
        let options = &delivery.options;
        let ctx = context! {
            subject => &options.subject,
            text => &options.text,
            html => &options.html.body_content,
            endorsement => &options.endorsement,
            unsubscribe_link => self.unsubscribe_link(delivery).unwrap_or_default(),
            kind_description => &options.kind_description,
            source_description => &options.source_description,
            client_id => &delivery.client_id,
            kind_id => &options.kind_id,
            message_id => delivery.message_id.to_string(),
            to => &delivery.email,
            space => &delivery.space,
            organization => &delivery.organization,
            scope => &delivery.scope,
            role => &options.role,
        };

        let render = |part: &'static str, source: &str| -> Result<String, RenderError> {
            env.render_str(source, ctx.clone())
                .map_err(|e| RenderError::Template {
                    part,
                    reason: e.to_string(),
                })
        };

        let subject = render("subject", &options.templates.subject)?;
        let text = render("text", &options.templates.text)?;
        let html = if options.html.is_empty() {
            None
        } else {
            Some(self.wrap_html(delivery, render("html", &options.templates.html)?))
        };

        Ok(OutboundMail {
            from: self.sender.clone(),
            to: delivery.email.clone(),
            reply_to: Some(options.reply_to.clone()).filter(|r| !r.is_empty()),
            subject: subject.trim().to_string(),
            text,
            html,
            headers: headers(delivery),
        })
    }

    fn wrap_html(&self, delivery: &Delivery, body: String) -> String {
        let html = &delivery.options.html;
        let doctype = if html.doctype.is_empty() {
            "<!DOCTYPE html>"
        } else {
            html.doctype.as_str()
        };
        let attributes = if html.body_attributes.is_empty() {
            String::new()
        } else {
            format!(" {}", html.body_attributes)
        };
        format!(
            "{doctype}\n<html><head>{head}</head><body{attributes}>{body}</body></html>",
            head = html.head
        )
    }
}

fn headers(delivery: &Delivery) -> Vec<(String, String)> {
    let mut headers = vec![
        (HEADER_CLIENT_ID.to_string(), delivery.client_id.clone()),
        (
            HEADER_NOTIFICATION_ID.to_string(),
            delivery.message_id.to_string(),
        ),
        (
            HEADER_REQUEST_RECEIVED.to_string(),
            delivery.request_received.to_rfc3339(),
        ),
    ];
    if !delivery.vcap_request_id.is_empty() {
        headers.push((
            HEADER_VCAP_REQUEST_ID.to_string(),
            delivery.vcap_request_id.clone(),
        ));
    }
    headers
}
