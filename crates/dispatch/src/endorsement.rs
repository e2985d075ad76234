//! Sentences explaining why a recipient got a message.

use minijinja::{context, Environment};

use crate::error::DispatchError;

const USER: &str = "This message was sent directly to you.";
const EMAIL: &str = "This message was sent directly to your email address.";
const EVERYONE: &str = "This message was sent to everyone.";
const SPACE: &str = "You received this message because you belong to the {{ space }} space in the {{ organization }} organization.";
const ORGANIZATION: &str =
    "You received this message because you belong to the {{ organization }} organization.";
const ORGANIZATION_ROLE: &str = "You received this message because you are an {{ role }} in the {{ organization }} organization.";
const SCOPE: &str = "You received this message because you have the {{ scope }} scope.";

/// Why an audience was selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endorsement<'a> {
    User,
    Email,
    Everyone,
    Space {
        space: &'a str,
        organization: &'a str,
    },
    Organization {
        organization: &'a str,
    },
    OrganizationRole {
        role: &'a str,
        organization: &'a str,
    },
    Scope {
        scope: &'a str,
    },
}

impl Endorsement<'_> {
    pub fn render(&self) -> Result<String, DispatchError> {
        let env = Environment::new();
        let rendered = match *self {
            Endorsement::User => Ok(USER.to_string()),
            Endorsement::Email => Ok(EMAIL.to_string()),
            Endorsement::Everyone => Ok(EVERYONE.to_string()),
            Endorsement::Space {
                space,
                organization,
            } => env.render_str(SPACE, context! { space, organization }),
            Endorsement::Organization { organization } => {
                env.render_str(ORGANIZATION, context! { organization })
            }
            Endorsement::OrganizationRole { role, organization } => {
                env.render_str(ORGANIZATION_ROLE, context! { role, organization })
            }
            Endorsement::Scope { scope } => env.render_str(SCOPE, context! { scope }),
        };
        rendered.map_err(|e| DispatchError::Endorsement(e.to_string()))
    }
}
