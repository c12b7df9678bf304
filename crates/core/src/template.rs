// SPDX-License-Identifier: MIT
// Copyright (c) 2026 GARM contributors

//! Runner install-script templates (spec §3).

use serde::{Deserialize, Serialize};

use crate::forge::ForgeKind;
use crate::ids::{TemplateId, UserId};

/// Operating system family a [`Template`] targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OsType {
    Linux,
    Windows,
    Osx,
}

crate::simple_display! {
    OsType {
        Linux => "linux",
        Windows => "windows",
        Osx => "osx",
    }
}

/// Either a named user owns a template, or it ships with the controller and
/// cannot be deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TemplateOwner {
    User { id: UserId },
    System,
}

impl TemplateOwner {
    pub fn is_system(&self) -> bool {
        matches!(self, TemplateOwner::System)
    }
}

/// A runner install-script template: the shell/PowerShell payload a
/// Provider Worker hands to a newly created instance to register it as a
/// runner (spec §3, §4.4).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: TemplateId,
    pub name: String,
    pub description: String,
    pub owner: TemplateOwner,
    pub os_type: OsType,
    pub forge_kind: ForgeKind,
    /// The install-script body, stored sealed at rest; plaintext only while
    /// actively being rendered for an instance.
    pub install_script: Vec<u8>,
}

impl Template {
    pub fn is_deletable(&self) -> bool {
        !self.owner.is_system()
    }
}

#[cfg(test)]
#[path = "template_tests.rs"]
mod tests;
