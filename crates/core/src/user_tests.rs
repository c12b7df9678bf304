// SPDX-License-Identifier: MIT
// Copyright (c) 2026 GARM contributors

use super::*;

#[test]
fn disable_flips_enabled_flag() {
    let mut user = User {
        id: UserId::new(),
        username: "admin".to_string(),
        enabled: true,
        password_generation: 0,
    };
    user.disable();
    assert!(!user.enabled);
}

#[test]
fn bump_password_generation_increments_and_returns_new_value() {
    let mut user = User {
        id: UserId::new(),
        username: "admin".to_string(),
        enabled: true,
        password_generation: 1,
    };
    assert_eq!(user.bump_password_generation(), 2);
    assert_eq!(user.password_generation, 2);
}
