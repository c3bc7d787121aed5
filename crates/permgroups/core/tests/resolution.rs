// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! End-to-end group resolution against the in-memory backend

use permgroups_core::{EngineConfig, ErrorKind, GroupNode, ManualClock, MemoryStorage, Node, PermissionSystem, Subject, SubjectRecord};
use std::sync::Arc;

const T0: i64 = 1_700_000_000_000;

async fn setup() -> (Arc<MemoryStorage>, Arc<ManualClock>, PermissionSystem) {
    let storage = Arc::new(MemoryStorage::new());
    let clock = Arc::new(ManualClock::new(T0));
    let system = PermissionSystem::initialize_with_clock(EngineConfig::default(), storage.clone(), clock.clone()).await.unwrap();
    (storage, clock, system)
}

fn group_nodes(storage: &MemoryStorage, user: &str) -> Vec<Node> {
    storage.user(user).unwrap().nodes.into_iter().filter(|node| node.key().starts_with("group.")).collect()
}

#[tokio::test]
async fn test_assignment_switches_group() {
    let (_, _, system) = setup().await;
    let groups = system.groups();

    let default = groups.get("default").unwrap();
    assert_eq!(default.weight(), -1);
    assert_eq!(default.prefix(), "");

    groups.create_and_load("vip").await.unwrap();
    groups.add_weight("vip", 10).await.unwrap();

    let user = system.create_user("u1").await.unwrap();
    assert_eq!(system.get_group(&user).unwrap().name(), "default");

    groups.add_group("u1", "vip", 0).await.unwrap();
    assert_eq!(system.get_group(&user).unwrap().name(), "vip");
}

#[tokio::test]
async fn test_temporary_assignment_expires() {
    let (_, clock, system) = setup().await;
    system.groups().create_and_load("vip").await.unwrap();
    let user = system.create_user("u1").await.unwrap();

    system.groups().add_group("u1", "vip", 1000).await.unwrap();
    let node = system.get_group_node(&user);
    assert_eq!(node.name(), "vip");
    assert_eq!(node.expires_at(), T0 + 1000);

    clock.advance(2000);
    assert_eq!(system.get_group_node(&user), GroupNode::default_group());
}

#[tokio::test]
async fn test_heavier_group_wins() {
    let (_, _, system) = setup().await;
    let groups = system.groups();
    for (name, weight) in [("a", 5), ("b", 9)] {
        groups.create_and_load(name).await.unwrap();
        groups.set_weight(name, weight).await.unwrap();
    }

    let user = system.create_user("u2").await.unwrap();
    groups.add_group("u2", "a", 0).await.unwrap();
    groups.add_group("u2", "b", 0).await.unwrap();

    assert_eq!(system.get_group(&user).unwrap().name(), "b");
}

#[tokio::test]
async fn test_weight_tie_resolves_to_smallest_name() {
    let (storage, _, system) = setup().await;
    let groups = system.groups();
    for name in ["zeta", "alpha", "mid"] {
        groups.create_and_load(name).await.unwrap();
        groups.set_weight(name, 4).await.unwrap();
    }
    storage.insert_user(SubjectRecord::with_nodes("u3", vec![Node::new("group.zeta"), Node::new("group.mid"), Node::new("group.alpha")]));

    let user = system.load_user("u3").await.unwrap().unwrap();
    assert_eq!(system.get_group_node(&user).name(), "alpha");
}

#[tokio::test]
async fn test_all_expired_falls_back_to_default() {
    let (storage, _, system) = setup().await;
    system.groups().create_and_load("vip").await.unwrap();
    storage.insert_user(SubjectRecord::with_nodes("u4", vec![Node::temporary("group.vip", true, T0 - 1)]));

    let user = system.load_user("u4").await.unwrap().unwrap();
    assert!(system.get_group_node(&user).is_default());
}

#[tokio::test]
async fn test_set_prefix_keeps_one_prefix() {
    let (_, _, system) = setup().await;
    let groups = system.groups();
    groups.create_and_load("vip").await.unwrap();
    groups.add_prefix("vip", "[A]", 3).await.unwrap();
    groups.add_prefix("vip", "[B]", 7).await.unwrap();

    groups.set_prefix("vip", "[VIP]").await.unwrap();
    groups.set_prefix("vip", "[ELITE]").await.unwrap();

    let vip = groups.get("vip").unwrap();
    assert_eq!(vip.prefix(), "[ELITE]");
    let prefixes = vip.cache().read().get_starting_with("prefix.").len();
    assert_eq!(prefixes, 1);
}

#[tokio::test]
async fn test_prefix_length_is_validated() {
    let (storage, _, system) = setup().await;
    let groups = system.groups();
    groups.create_and_load("vip").await.unwrap();

    for text in ["", "seventeen chars!!"] {
        let err = groups.set_prefix("vip", text).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidPrefix);
        let err = groups.add_prefix("vip", text, 1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidPrefix);
    }

    groups.add_prefix("vip", "sixteen chars!!!", 1).await.unwrap();
    assert!(storage.group("vip").unwrap().nodes.iter().any(|node| node.key() == "prefix.1.sixteen chars!!!"));
}

#[tokio::test]
async fn test_clear_prefix_resets_display() {
    let (_, _, system) = setup().await;
    let groups = system.groups();
    groups.create_and_load("vip").await.unwrap();
    groups.set_prefix("vip", "[VIP]").await.unwrap();

    assert_eq!(groups.clear_prefix("vip").await.unwrap(), 1);
    assert_eq!(groups.prefix_of("vip"), "");
}

#[tokio::test]
async fn test_set_group_replaces_all_assignments() {
    let (storage, _, system) = setup().await;
    let groups = system.groups();
    for name in ["a", "b", "c"] {
        groups.create_and_load(name).await.unwrap();
    }
    system.create_user("u5").await.unwrap();
    groups.add_group("u5", "a", 0).await.unwrap();
    groups.add_group("u5", "c", 0).await.unwrap();

    groups.set_group("u5", "b", 0).await.unwrap();

    let nodes = group_nodes(&storage, "u5");
    assert_eq!(nodes, vec![Node::new("group.b")]);
    let user = system.users().get_user("u5").unwrap();
    assert_eq!(system.get_group_node(&user).name(), "b");
}

#[tokio::test]
async fn test_assignment_errors() {
    let (_, _, system) = setup().await;
    let groups = system.groups();
    groups.create_and_load("vip").await.unwrap();
    system.create_user("u6").await.unwrap();
    groups.add_group("u6", "vip", 0).await.unwrap();

    assert_eq!(groups.add_group("u6", "Vip", 0).await.unwrap_err().kind(), ErrorKind::AlreadyHasGroup);
    assert_eq!(groups.add_group("u6", "ghost", 0).await.unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(groups.add_group("nobody", "vip", 0).await.unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(groups.set_group("u6", "ghost", 0).await.unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(groups.remove_group("nobody", "vip").await.unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(groups.create_and_load("VIP").await.unwrap_err().kind(), ErrorKind::AlreadyExists);
    assert_eq!(groups.set_permission("ghost", "fly", true, 0).await.unwrap_err().kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_remove_group_drops_assignment() {
    let (storage, _, system) = setup().await;
    system.groups().create_and_load("vip").await.unwrap();
    system.create_user("u7").await.unwrap();
    system.groups().add_group("u7", "vip", 0).await.unwrap();

    assert!(system.groups().remove_group("u7", "vip").await.unwrap());
    assert!(group_nodes(&storage, "u7").is_empty());
    assert_eq!(system.resolve_group("u7").await.unwrap(), GroupNode::default_group());
}

#[tokio::test]
async fn test_group_permission_change_invalidates_users() {
    let (_, _, system) = setup().await;
    let groups = system.groups();
    groups.create_and_load("a").await.unwrap();
    groups.create_and_load("b").await.unwrap();
    groups.set_weight("a", 1).await.unwrap();
    groups.set_weight("b", 2).await.unwrap();

    let user = system.create_user("u8").await.unwrap();
    groups.add_group("u8", "a", 0).await.unwrap();
    groups.add_group("u8", "b", 0).await.unwrap();
    assert_eq!(system.get_group_node(&user).name(), "b");

    groups.set_permission("a", "weight.50", true, 0).await.unwrap();
    assert_eq!(system.get_group_node(&user).name(), "a");
}

#[tokio::test]
async fn test_delete_group_sweeps_assignments() {
    let (storage, _, system) = setup().await;
    system.groups().create_and_load("vip").await.unwrap();
    system.create_user("u1").await.unwrap();
    system.groups().add_group("u1", "vip", 0).await.unwrap();

    system.groups().delete_group("vip").await.unwrap();

    assert!(!system.groups().contains("vip"));
    assert!(storage.group("vip").is_none());
    assert!(group_nodes(&storage, "u1").is_empty());

    assert!(system.users().unload_user("u1"));
    let user = system.load_user("u1").await.unwrap().unwrap();
    assert_eq!(system.get_group(&user).unwrap().name(), "default");
}

#[tokio::test]
async fn test_deleting_default_recreates_it() {
    let (storage, _, system) = setup().await;
    system.groups().set_weight("default", 3).await.unwrap();

    system.groups().delete_group("default").await.unwrap();

    let default = system.groups().get("default").unwrap();
    assert_eq!(default.weight(), -1);
    assert!(storage.group("default").is_some());
}

#[tokio::test]
async fn test_concurrent_writes_on_one_user_all_persist() {
    let (storage, _, system) = setup().await;
    let user = system.create_user("busy").await.unwrap();

    let writes = (0..32).map(|i| {
        let users = system.users().clone();
        let user = user.clone();
        tokio::spawn(async move { users.set_permission(&user, Node::new(format!("perm.{i}"))).await })
    });
    for result in futures::future::join_all(writes).await {
        result.unwrap().unwrap();
    }

    assert_eq!(user.cache().read().len(), 32);
    assert_eq!(storage.user("busy").unwrap().nodes.len(), 32);
}
