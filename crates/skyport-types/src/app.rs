use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::email::Email;
use crate::error::StoreError;
use crate::ids::{AccountId, AppId};

/// `Owner` or `Collaborator` on an app (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Permission {
    Owner,
    Collaborator,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collaborator {
    pub permission: Permission,
    pub account_id: AccountId,
}

/// An application: an identity plus a collaborator map with exactly one
/// Owner at all times (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct App {
    pub id: AppId,
    pub name: String,
    pub collaborators: HashMap<Email, Collaborator>,
}

impl App {
    pub fn owner(&self) -> Option<(&Email, &Collaborator)> {
        self.collaborators
            .iter()
            .find(|(_, c)| c.permission == Permission::Owner)
    }

    /// Every `App` must carry exactly one Owner; stores validate this on
    /// every mutation rather than trusting callers.
    pub fn has_exactly_one_owner(&self) -> bool {
        self.collaborators
            .values()
            .filter(|c| c.permission == Permission::Owner)
            .count()
            == 1
    }

    /// Atomically swaps the Owner role to `new_owner`, demoting the
    /// previous Owner to Collaborator (spec §3: "ownership transfer
    /// atomically swaps the Owner role").
    pub fn transfer_ownership(&mut self, new_owner: &Email) -> Result<(), StoreError> {
        let current_owner = self
            .owner()
            .map(|(email, _)| email.clone())
            .ok_or_else(|| StoreError::Other("app has no owner".to_string()))?;

        if !self.collaborators.contains_key(new_owner) {
            return Err(StoreError::NotFound(format!(
                "'{new_owner}' is not a collaborator on this app"
            )));
        }

        if let Some(c) = self.collaborators.get_mut(&current_owner) {
            c.permission = Permission::Collaborator;
        }
        if let Some(c) = self.collaborators.get_mut(new_owner) {
            c.permission = Permission::Owner;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email(s: &str) -> Email {
        Email::parse(s).unwrap()
    }

    #[test]
    fn transfer_ownership_swaps_roles() {
        let owner = email("owner@example.com");
        let collaborator = email("collaborator@example.com");
        let mut app = App {
            id: AppId::new(),
            name: "demo".to_string(),
            collaborators: HashMap::from([
                (
                    owner.clone(),
                    Collaborator {
                        permission: Permission::Owner,
                        account_id: AccountId::new(),
                    },
                ),
                (
                    collaborator.clone(),
                    Collaborator {
                        permission: Permission::Collaborator,
                        account_id: AccountId::new(),
                    },
                ),
            ]),
        };

        app.transfer_ownership(&collaborator).unwrap();
        assert_eq!(app.collaborators[&collaborator].permission, Permission::Owner);
        assert_eq!(app.collaborators[&owner].permission, Permission::Collaborator);
        assert!(app.has_exactly_one_owner());
    }
}
