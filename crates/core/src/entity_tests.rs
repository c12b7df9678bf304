// SPDX-License-Identifier: MIT
// Copyright (c) 2026 GARM contributors

use super::*;
use crate::change::EntityType;

fn sample(kind: EntityKind) -> ForgeEntity {
    ForgeEntity {
        id: EntityId::new(),
        kind,
        credentials_id: CredentialsId(1),
        endpoint_name: "github.com".to_string(),
        webhook_secret: SecretBytes::new(b"hook-secret".to_vec()),
        pool_balancer_type: PoolBalancerType::default(),
    }
}

#[test]
fn repository_display_name_is_owner_slash_name() {
    let kind = EntityKind::Repository {
        owner: "acme".to_string(),
        name: "widgets".to_string(),
    };
    assert_eq!(kind.display_name(), "acme/widgets");
}

#[test]
fn organization_and_enterprise_display_name_is_bare_name() {
    assert_eq!(
        EntityKind::Organization {
            name: "acme".to_string()
        }
        .display_name(),
        "acme"
    );
    assert_eq!(
        EntityKind::Enterprise {
            name: "acme".to_string()
        }
        .display_name(),
        "acme"
    );
}

#[test]
fn entity_type_matches_kind() {
    let repo = sample(EntityKind::Repository {
        owner: "acme".to_string(),
        name: "widgets".to_string(),
    });
    assert_eq!(repo.entity_type(), EntityType::Repository);

    let org = sample(EntityKind::Organization {
        name: "acme".to_string(),
    });
    assert_eq!(org.entity_type(), EntityType::Organization);

    let ent = sample(EntityKind::Enterprise {
        name: "acme".to_string(),
    });
    assert_eq!(ent.entity_type(), EntityType::Enterprise);
}

#[test]
fn default_pool_balancer_is_round_robin() {
    assert_eq!(PoolBalancerType::default(), PoolBalancerType::RoundRobin);
}
