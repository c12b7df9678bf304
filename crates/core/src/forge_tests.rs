// SPDX-License-Identifier: MIT
// Copyright (c) 2026 GARM contributors

use super::*;

#[test]
fn secret_bytes_debug_never_prints_contents() {
    let secret = SecretBytes::new(b"super-secret-pat".to_vec());
    let debug = format!("{secret:?}");
    assert!(!debug.contains("super-secret-pat"));
    assert_eq!(debug, "SecretBytes(REDACTED)");
}

#[test]
fn generation_counter_increments_monotonically() {
    let creds = ForgeCredentials {
        id: CredentialsId(1),
        name: "default".to_string(),
        forge_kind: ForgeKind::Github,
        auth_method: AuthMethod::Pat,
        endpoint_name: "github.com".to_string(),
        secret: SecretBytes::new(b"token".to_vec()),
        generation: 3,
    };
    assert_eq!(creds.next_generation(), 4);
}

#[test]
fn forge_kind_display() {
    assert_eq!(ForgeKind::Github.to_string(), "github");
    assert_eq!(ForgeKind::Gitea.to_string(), "gitea");
}
