//! Property-based tests for global binding
//!
//! Random announcement sequences drawn from the known interfaces plus some
//! foreign ones check that binding is idempotent and that verification fails
//! exactly for the interfaces that were never announced.

use super::*;
use proptest::prelude::*;
use std::collections::HashSet;

fn interface_name() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("wl_compositor".to_string()),
        Just("xdg_wm_base".to_string()),
        Just("wl_shm".to_string()),
        Just("wl_seat".to_string()),
        Just("zwlr_data_control_manager_v1".to_string()),
        Just("wl_output".to_string()),
        Just("wl_data_device_manager".to_string()),
        Just("zxdg_decoration_manager_v1".to_string()),
    ]
}

prop_compose! {
    fn announcement()(
        name in 1u32..10_000,
        interface in interface_name(),
        version in 1u32..10,
    ) -> (u32, String, u32) {
        (name, interface, version)
    }
}

fn required_set() -> impl Strategy<Value = Vec<KnownInterface>> {
    proptest::sample::subsequence(KnownInterface::ALL.to_vec(), 0..=KnownInterface::ALL.len())
}

proptest! {
    #[test]
    fn prop_each_interface_bound_at_most_once(
        announcements in proptest::collection::vec(announcement(), 0..40)
    ) {
        let mut registry = GlobalRegistry::new();
        let mut binds: Vec<KnownInterface> = Vec::new();

        for (name, interface, version) in &announcements {
            if let Announcement::Bind { interface, .. } =
                registry.on_global_announced(*name, interface, *version)
            {
                binds.push(interface);
            }
        }

        let unique: HashSet<_> = binds.iter().copied().collect();
        prop_assert_eq!(unique.len(), binds.len());
    }

    #[test]
    fn prop_bound_version_never_exceeds_either_side(
        announcements in proptest::collection::vec(announcement(), 1..20)
    ) {
        let mut registry = GlobalRegistry::new();
        for (name, interface, version) in &announcements {
            if let Announcement::Bind { interface, version: bound, .. } =
                registry.on_global_announced(*name, interface, *version)
            {
                prop_assert!(bound <= *version);
                prop_assert!(bound <= interface.supported_version());
            }
        }
    }

    #[test]
    fn prop_verify_fails_iff_required_never_announced(
        announcements in proptest::collection::vec(announcement(), 0..30),
        required in required_set(),
    ) {
        let mut registry = GlobalRegistry::new();
        let mut seen: HashSet<KnownInterface> = HashSet::new();

        for (name, interface, version) in &announcements {
            registry.on_global_announced(*name, interface, *version);
            if let Some(known) = KnownInterface::from_name(interface) {
                seen.insert(known);
            }
        }

        let expected_missing: Vec<KnownInterface> = required
            .iter()
            .copied()
            .filter(|iface| !seen.contains(iface))
            .collect();

        match registry.verify(&required) {
            Ok(()) => prop_assert!(expected_missing.is_empty()),
            Err(err) => prop_assert_eq!(err.missing(), expected_missing.as_slice()),
        }
    }
}
