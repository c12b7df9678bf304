// SPDX-License-Identifier: MIT
// Copyright (c) 2026 GARM contributors

//! Property tests for the `Filter` algebra (spec §4.1's filter predicates).

use super::*;
use crate::change::{ChangePayload, EntityType, IdentityShell};
use proptest::prelude::*;

fn entity_type_strategy() -> impl Strategy<Value = EntityType> {
    prop_oneof![
        Just(EntityType::Endpoint),
        Just(EntityType::Credentials),
        Just(EntityType::Repository),
        Just(EntityType::Organization),
        Just(EntityType::Enterprise),
        Just(EntityType::Template),
        Just(EntityType::Pool),
        Just(EntityType::ScaleSet),
        Just(EntityType::Instance),
        Just(EntityType::Job),
        Just(EntityType::User),
        Just(EntityType::Controller),
    ]
}

fn operation_strategy() -> impl Strategy<Value = Operation> {
    prop_oneof![Just(Operation::Create), Just(Operation::Update), Just(Operation::Delete)]
}

fn payload_strategy() -> impl Strategy<Value = ChangePayload> {
    (entity_type_strategy(), operation_strategy()).prop_map(|(entity_type, operation)| match operation {
        Operation::Create => ChangePayload::create(entity_type, serde_json::json!({})),
        Operation::Update => ChangePayload::update(entity_type, serde_json::json!({})),
        Operation::Delete => ChangePayload::delete(entity_type, IdentityShell::by_name("x")),
    })
}

proptest! {
    /// `everything()` matches every payload, `none()` matches none.
    #[test]
    fn everything_and_none_are_absorbing(payload in payload_strategy()) {
        prop_assert!(Filter::everything().matches(&payload));
        prop_assert!(!Filter::none().matches(&payload));
    }

    /// `by_entity_type` matches iff the payload's type is in the list.
    #[test]
    fn by_entity_type_matches_membership(
        payload in payload_strategy(),
        types in prop::collection::vec(entity_type_strategy(), 0..4),
    ) {
        let expected = types.contains(&payload.entity_type);
        prop_assert_eq!(Filter::by_entity_type(types).matches(&payload), expected);
    }

    /// `exclude_entity_type` is the complement of `by_entity_type` over the same list.
    #[test]
    fn exclude_entity_type_is_complement(
        payload in payload_strategy(),
        types in prop::collection::vec(entity_type_strategy(), 0..4),
    ) {
        let included = Filter::by_entity_type(types.clone()).matches(&payload);
        let excluded = Filter::exclude_entity_type(types).matches(&payload);
        prop_assert_ne!(included, excluded);
    }

    /// `all([])` is vacuously true; `any([])` is vacuously false.
    #[test]
    fn empty_all_and_any_are_identities(payload in payload_strategy()) {
        prop_assert!(Filter::all(vec![]).matches(&payload));
        prop_assert!(!Filter::any(vec![]).matches(&payload));
    }

    /// `all([f, g])` matches iff both `f` and `g` match.
    #[test]
    fn all_is_conjunction(
        payload in payload_strategy(),
        type_filter in prop::collection::vec(entity_type_strategy(), 0..4),
        op_filter in prop::collection::vec(operation_strategy(), 0..3),
    ) {
        let f = Filter::by_entity_type(type_filter.clone());
        let g = Filter::by_operation(op_filter.clone());
        let combined = Filter::all(vec![f, g]);
        let expected = type_filter.contains(&payload.entity_type) && op_filter.contains(&payload.operation);
        prop_assert_eq!(combined.matches(&payload), expected);
    }

    /// `any([f, g])` matches iff `f` or `g` matches.
    #[test]
    fn any_is_disjunction(
        payload in payload_strategy(),
        type_filter in prop::collection::vec(entity_type_strategy(), 0..4),
        op_filter in prop::collection::vec(operation_strategy(), 0..3),
    ) {
        let f = Filter::by_entity_type(type_filter.clone());
        let g = Filter::by_operation(op_filter.clone());
        let combined = Filter::any(vec![f, g]);
        let expected = type_filter.contains(&payload.entity_type) || op_filter.contains(&payload.operation);
        prop_assert_eq!(combined.matches(&payload), expected);
    }

    /// `any` is at least as permissive as `all` over the same filter set.
    #[test]
    fn any_is_superset_of_all(
        payload in payload_strategy(),
        type_filter in prop::collection::vec(entity_type_strategy(), 0..4),
        op_filter in prop::collection::vec(operation_strategy(), 0..3),
    ) {
        let filters = vec![Filter::by_entity_type(type_filter), Filter::by_operation(op_filter)];
        if Filter::all(filters.clone()).matches(&payload) {
            prop_assert!(Filter::any(filters).matches(&payload));
        }
    }
}
