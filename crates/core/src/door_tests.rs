// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

fn user(level: u32) -> UserContext {
    UserContext::new(level, Duration::from_secs(3600))
}

#[test]
fn open_door_admits_anyone_with_time_left() {
    let door = DoorRegistration::new("tradewars");
    assert_eq!(door.check_access(&user(0)), Ok(()));
}

#[parameterized(
    below_minimum = { 9, false },
    at_minimum = { 10, true },
    above_minimum = { 50, true },
)]
fn access_level_threshold(level: u32, admitted: bool) {
    let door = DoorRegistration::new("lord").with_min_access_level(10);
    assert_eq!(door.check_access(&user(level)).is_ok(), admitted);
}

#[test]
fn required_flags_must_all_be_present() {
    let door = DoorRegistration::new("lord").with_required_flags(["A", "B"]);

    let partial = user(10).with_flags(["A"]);
    let err = door.check_access(&partial).unwrap_err();
    assert!(err.contains("B"), "unexpected reason: {}", err);

    let full = user(10).with_flags(["A", "B", "C"]);
    assert!(door.check_access(&full).is_ok());
}

#[test]
fn forbidden_flag_refuses_entry() {
    let door = DoorRegistration::new("lord").with_forbidden_flags(["X"]);
    let err = door.check_access(&user(10).with_flags(["X"])).unwrap_err();
    assert!(err.contains("X"));
}

#[test]
fn zero_time_remaining_is_refused() {
    let door = DoorRegistration::new("lord");
    let broke = UserContext::new(10, Duration::ZERO);
    assert_eq!(door.check_access(&broke), Err("no time remaining".to_string()));
}

#[test]
fn minimum_time_remaining_is_enforced() {
    let door = DoorRegistration::new("lord").with_min_time_remaining(Duration::from_secs(300));

    let short = UserContext::new(10, Duration::from_secs(120));
    assert!(door.check_access(&short).is_err());

    let enough = UserContext::new(10, Duration::from_secs(300));
    assert!(door.check_access(&enough).is_ok());
}

#[parameterized(
    single_user = { MultiNodePolicy::SingleUser, false },
    shared_data = { MultiNodePolicy::SharedData, false },
    exclusive = { MultiNodePolicy::ExclusiveInstances, false },
    cooperative = { MultiNodePolicy::Cooperative, true },
    competitive = { MultiNodePolicy::Competitive, true },
)]
fn multi_user_policies(policy: MultiNodePolicy, multi_user: bool) {
    assert_eq!(policy.is_multi_user(), multi_user);
}

#[test]
fn registration_parses_from_toml_with_defaults() {
    let door: DoorRegistration = toml::from_str(
        r#"
        id = "lord"
        policy = "exclusive-instances"
        max_instances = 3
        exclusive_resources = ["lord/players.dat"]
        time_limit = "45m"
        "#,
    )
    .unwrap();

    assert_eq!(door.id, DoorId::new("lord"));
    assert_eq!(door.policy, MultiNodePolicy::ExclusiveInstances);
    assert_eq!(door.max_instances, 3);
    assert_eq!(door.time_limit, Some(Duration::from_secs(45 * 60)));
    assert_eq!(door.min_time_remaining, Duration::ZERO);
    assert!(door.enabled);
    assert!(door.shared_resources.is_empty());
}
