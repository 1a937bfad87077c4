//! Stateful property testing for CronRegistry bookkeeping.
//!
//! Drives random add/remove/clear sequences against a plain map model and
//! checks that every resource lists exactly the patch names the model holds.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use proptest::prelude::*;
use proptest_state_machine::{ReferenceStateMachine, StateMachineTest, prop_state_machine};
use tokio::runtime::Runtime;

use cronpatch_core::ResourceKey;
use cronpatch_scheduler::{CronRegistry, JobCallback, JobFuture};

const RESOURCES: [&str; 3] = ["foo", "bar", "baz"];
const PATCHES: [&str; 4] = ["patch-1", "patch-2", "patch-3", "patch-4"];

/// Operations that can be performed on the registry.
#[derive(Debug, Clone)]
pub enum RegistryOperation {
    /// Register a job with a valid schedule.
    Add { resource: String, patch: String },
    /// Try to register a job with an unparseable schedule.
    AddInvalid { resource: String, patch: String },
    /// Unregister one job.
    Remove { resource: String, patch: String },
    /// Unregister every job for a resource.
    Clear { resource: String },
}

/// Reference model: patch names per resource.
#[derive(Clone, Debug, Default)]
pub struct RegistryModel {
    pub jobs: BTreeMap<String, BTreeSet<String>>,
}

impl ReferenceStateMachine for RegistryModel {
    type State = Self;
    type Transition = RegistryOperation;

    fn init_state() -> BoxedStrategy<Self::State> {
        Just(Self::default()).boxed()
    }

    fn transitions(_state: &Self::State) -> BoxedStrategy<Self::Transition> {
        let resource = || proptest::sample::select(RESOURCES.to_vec()).prop_map(str::to_string);
        let patch = || proptest::sample::select(PATCHES.to_vec()).prop_map(str::to_string);

        prop_oneof![
            4 => (resource(), patch())
                .prop_map(|(resource, patch)| RegistryOperation::Add { resource, patch }),
            1 => (resource(), patch())
                .prop_map(|(resource, patch)| RegistryOperation::AddInvalid { resource, patch }),
            2 => (resource(), patch())
                .prop_map(|(resource, patch)| RegistryOperation::Remove { resource, patch }),
            1 => resource().prop_map(|resource| RegistryOperation::Clear { resource }),
        ]
        .boxed()
    }

    fn apply(mut state: Self::State, transition: &Self::Transition) -> Self::State {
        match transition {
            RegistryOperation::Add { resource, patch } => {
                state
                    .jobs
                    .entry(resource.clone())
                    .or_default()
                    .insert(patch.clone());
            }
            RegistryOperation::AddInvalid { .. } => {}
            RegistryOperation::Remove { resource, patch } => {
                if let Some(names) = state.jobs.get_mut(resource) {
                    names.remove(patch);
                    if names.is_empty() {
                        state.jobs.remove(resource);
                    }
                }
            }
            RegistryOperation::Clear { resource } => {
                state.jobs.remove(resource);
            }
        }
        state
    }

    fn preconditions(_state: &Self::State, _transition: &Self::Transition) -> bool {
        true
    }
}

/// Test harness owning a registry and the runtime that drives it.
pub struct RegistryTestHarness {
    runtime: Runtime,
    registry: CronRegistry,
}

fn noop() -> JobCallback {
    Arc::new(|_key: ResourceKey, _patch: String| -> JobFuture { Box::pin(async { Ok(()) }) })
}

impl RegistryTestHarness {
    fn new() -> Self {
        let runtime = Runtime::new().expect("Failed to create tokio runtime");
        Self {
            runtime,
            registry: CronRegistry::new(),
        }
    }

    fn apply_operation(&self, op: &RegistryOperation) {
        self.runtime.block_on(async {
            match op {
                RegistryOperation::Add { resource, patch } => {
                    let key = ResourceKey::new("ns", resource);
                    self.registry
                        .add(&key, patch, "0 */2 * * *", None, noop())
                        .await
                        .expect("valid schedule rejected");
                }
                RegistryOperation::AddInvalid { resource, patch } => {
                    let key = ResourceKey::new("ns", resource);
                    let result = self
                        .registry
                        .add(&key, patch, "not a schedule", None, noop())
                        .await;
                    assert!(result.is_err());
                }
                RegistryOperation::Remove { resource, patch } => {
                    let key = ResourceKey::new("ns", resource);
                    self.registry.remove(&key, patch).await;
                }
                RegistryOperation::Clear { resource } => {
                    let key = ResourceKey::new("ns", resource);
                    self.registry.clear(&key).await;
                }
            }
        });
    }
}

impl StateMachineTest for RegistryTestHarness {
    type SystemUnderTest = Self;
    type Reference = RegistryModel;

    fn init_test(
        _ref_state: &<Self::Reference as ReferenceStateMachine>::State,
    ) -> Self::SystemUnderTest {
        Self::new()
    }

    fn apply(
        state: Self::SystemUnderTest,
        _ref_state: &<Self::Reference as ReferenceStateMachine>::State,
        transition: <Self::Reference as ReferenceStateMachine>::Transition,
    ) -> Self::SystemUnderTest {
        state.apply_operation(&transition);
        state
    }

    fn check_invariants(
        state: &Self::SystemUnderTest,
        ref_state: &<Self::Reference as ReferenceStateMachine>::State,
    ) {
        state.runtime.block_on(async {
            let mut total = 0;
            for resource in RESOURCES {
                let key = ResourceKey::new("ns", resource);
                let listed = state.registry.list(&key).await;

                let expected = ref_state.jobs.get(resource).cloned().unwrap_or_default();
                let actual: BTreeSet<String> = listed.keys().cloned().collect();
                assert_eq!(actual, expected, "names for {key}");

                // Each slot holds its own handle.
                let handles: HashSet<_> = listed.values().copied().collect();
                assert_eq!(handles.len(), listed.len());
                total += listed.len();
            }

            // No job outlives its slot.
            assert_eq!(state.registry.job_count().await, total);

            let expected_keys: Vec<ResourceKey> = ref_state
                .jobs
                .keys()
                .map(|resource| ResourceKey::new("ns", resource))
                .collect();
            let mut actual_keys = state.registry.resources().await;
            actual_keys.sort();
            let mut expected_keys = expected_keys;
            expected_keys.sort();
            assert_eq!(actual_keys, expected_keys);
        });
    }
}

prop_state_machine! {
    #![proptest_config(ProptestConfig {
        cases: 50,
        max_shrink_iters: 5000,
        ..ProptestConfig::default()
    })]

    #[test]
    fn registry_state_machine_test(sequential 1..40 => RegistryTestHarness);
}
