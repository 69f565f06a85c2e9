//! In-memory scripted provider.
//!
//! [`MockProvider`] keeps resources in memory, enforces its capability set
//! the way a real driver would, records every call, and lets tests script
//! what `fetch` observes for a resource (misses, errors, arbitrary states).

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use parking_lot::Mutex;
use pcv_core::{
    async_trait, CapabilitySet, ManagedResource, Operation, PcvError, PcvResult, Product, Provider,
    ResizeTarget, ResourceFilter, ResourceId, ResourceKind, ResourceSpec, ResourceState,
    ResourceStream,
};

/// One scripted `fetch` result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// The provider reports the resource as nonexistent.
    Missing,
    /// The fetch call fails.
    Fail(PcvError),
    /// The resource is observed in this state (and stays in it).
    State(ResourceState),
}

/// A call the provider received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    Capabilities { region: String },
    Create { kind: ResourceKind, name: String },
    Fetch { kind: ResourceKind, id: ResourceId },
    Transition {
        kind: ResourceKind,
        id: ResourceId,
        operation: Operation,
    },
    List { kind: ResourceKind },
    Products { kind: ResourceKind },
}

#[derive(Debug)]
struct MockState {
    capabilities: CapabilitySet,
    products: Vec<Product>,
    /// Keyed by id; ids are zero-padded so each kind iterates in creation order.
    resources: BTreeMap<ResourceId, ManagedResource>,
    scripts: HashMap<ResourceId, VecDeque<Observation>>,
    create_failures: HashMap<ResourceKind, VecDeque<PcvError>>,
    stuck: HashMap<ResourceId, PcvError>,
    pending_first_fetch: HashSet<ResourceId>,
    calls: Vec<ProviderCall>,
    next_id: u64,
    launch_state: Option<ResourceState>,
    transitional: bool,
}

/// In-memory provider for exercising the fixture core.
#[derive(Debug, Clone)]
pub struct MockProvider {
    name: String,
    state: Arc<Mutex<MockState>>,
}

impl MockProvider {
    /// Provider advertising `capabilities` in every region.
    #[must_use]
    pub fn new(capabilities: CapabilitySet) -> Self {
        Self {
            name: "mock".to_string(),
            state: Arc::new(Mutex::new(MockState {
                capabilities,
                products: Vec::new(),
                resources: BTreeMap::new(),
                scripts: HashMap::new(),
                create_failures: HashMap::new(),
                stuck: HashMap::new(),
                pending_first_fetch: HashSet::new(),
                calls: Vec::new(),
                next_id: 0,
                launch_state: None,
                transitional: false,
            })),
        }
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_products(self, products: impl IntoIterator<Item = Product>) -> Self {
        self.state.lock().products = products.into_iter().collect();
        self
    }

    /// New resources start in `state` and settle into their ready state on
    /// the first fetch.
    #[must_use]
    pub fn with_launch_state(self, state: ResourceState) -> Self {
        self.state.lock().launch_state = Some(state);
        self
    }

    /// Operations first move resources into the matching transitional state
    /// (`stopping`, `pausing`, ...), which settles on the next fetch.
    #[must_use]
    pub fn with_transitional_states(self) -> Self {
        self.state.lock().transitional = true;
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Scripting
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a pre-existing resource, as if created outside the suite.
    pub fn seed(&self, resource: ManagedResource) {
        self.state
            .lock()
            .resources
            .insert(resource.id.clone(), resource);
    }

    /// Queue observations returned by the next `fetch` calls for `id`, before
    /// falling back to the stored resource.
    pub fn script(&self, id: &ResourceId, observations: impl IntoIterator<Item = Observation>) {
        self.state
            .lock()
            .scripts
            .entry(id.clone())
            .or_default()
            .extend(observations);
    }

    /// Make the next `create` of `kind` fail with `error`.
    pub fn fail_next_create(&self, kind: ResourceKind, error: PcvError) {
        self.state
            .lock()
            .create_failures
            .entry(kind)
            .or_default()
            .push_back(error);
    }

    /// Make every delete of `id` fail with `error`.
    pub fn fail_delete(&self, id: &ResourceId, error: PcvError) {
        self.state.lock().stuck.insert(id.clone(), error);
    }

    /// Change a stored resource's state behind the harness's back.
    pub fn set_state(&self, id: &ResourceId, state: ResourceState) {
        if let Some(resource) = self.state.lock().resources.get_mut(id) {
            resource.state = state;
        }
    }

    /// Remove a stored resource behind the harness's back.
    pub fn vanish(&self, id: &ResourceId) -> Option<ManagedResource> {
        self.state.lock().resources.remove(id)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Inspection
    // ─────────────────────────────────────────────────────────────────────────

    #[must_use]
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.state.lock().calls.clone()
    }

    #[must_use]
    pub fn resource(&self, id: &ResourceId) -> Option<ManagedResource> {
        self.state.lock().resources.get(id).cloned()
    }

    /// Every stored resource of `kind`, in creation order.
    #[must_use]
    pub fn resources(&self, kind: ResourceKind) -> Vec<ManagedResource> {
        self.state
            .lock()
            .resources
            .values()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn create_count(&self) -> usize {
        self.count(|call| matches!(call, ProviderCall::Create { .. }))
    }

    #[must_use]
    pub fn create_count_for(&self, kind: ResourceKind) -> usize {
        self.count(|call| matches!(call, ProviderCall::Create { kind: k, .. } if *k == kind))
    }

    #[must_use]
    pub fn fetch_count(&self, id: &ResourceId) -> usize {
        self.count(|call| matches!(call, ProviderCall::Fetch { id: i, .. } if i == id))
    }

    /// Operations issued against `id`, in order.
    #[must_use]
    pub fn operations_on(&self, id: &ResourceId) -> Vec<Operation> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                ProviderCall::Transition { id: i, operation, .. } if i == id => {
                    Some(operation.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// Ids that received a delete, in the order the deletes were issued.
    #[must_use]
    pub fn deletes(&self) -> Vec<ResourceId> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                ProviderCall::Transition {
                    id,
                    operation: Operation::Delete,
                    ..
                } => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Returns true if no stored resource is left.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().resources.is_empty()
    }

    fn count(&self, predicate: impl Fn(&ProviderCall) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| predicate(c)).count()
    }
}

/// State a transitional resource moves to on its next observation.
fn settle_target(resource: &ManagedResource) -> Option<ResourceState> {
    match resource.state {
        ResourceState::Pending => Some(resource.kind.ready_state()),
        other => other.settles_to(),
    }
}

fn transitional_for(operation: &Operation) -> Option<ResourceState> {
    match operation {
        Operation::Stop { .. } => Some(ResourceState::Stopping),
        Operation::Pause => Some(ResourceState::Pausing),
        Operation::Suspend => Some(ResourceState::Suspending),
        Operation::Reboot => Some(ResourceState::Rebooting),
        Operation::Start | Operation::Unpause | Operation::Resume => Some(ResourceState::Pending),
        Operation::Delete | Operation::Resize { .. } | Operation::SetAnalytics { .. } => None,
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn capabilities(&self, region: &str) -> PcvResult<CapabilitySet> {
        let mut state = self.state.lock();
        state.calls.push(ProviderCall::Capabilities {
            region: region.to_string(),
        });
        let mut caps = state.capabilities.clone();
        caps.region = region.to_string();
        Ok(caps)
    }

    async fn create(&self, kind: ResourceKind, spec: ResourceSpec) -> PcvResult<ManagedResource> {
        let mut state = self.state.lock();
        state.calls.push(ProviderCall::Create {
            kind,
            name: spec.name.clone(),
        });

        if let Some(err) = state.create_failures.get_mut(&kind).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        if !state.capabilities.supports_kind(kind) {
            return Err(PcvError::unsupported(format!("{kind} resources")));
        }
        if !state.capabilities.is_subscribed(kind) {
            return Err(PcvError::NotSubscribed { kind });
        }
        if spec.name.is_empty() {
            return Err(PcvError::InvalidSpec {
                message: "name is required".into(),
            });
        }

        let product_id = match (kind, spec.product_id) {
            (ResourceKind::Instance, None) => state.products.first().map(|p| p.id.clone()),
            (_, product) => product,
        };
        if kind == ResourceKind::Instance && product_id.is_none() {
            return Err(PcvError::InvalidSpec {
                message: "no product available for instance".into(),
            });
        }

        state.next_id += 1;
        let id = ResourceId::new(format!("{}-{:04}", kind.as_str(), state.next_id));
        let initial = state.launch_state.unwrap_or_else(|| kind.ready_state());
        let mut resource = ManagedResource::new(id.clone(), kind, spec.name, initial)
            .with_placement(spec.placement);
        resource.product_id = product_id;
        resource.image_id = spec.image_id;
        resource.client_request_token = spec.client_request_token;
        resource.private_ip = spec.private_ip;
        resource.labels = spec.labels;

        if initial.is_transitional() {
            state.pending_first_fetch.insert(id.clone());
        }
        state.resources.insert(id, resource.clone());
        Ok(resource)
    }

    async fn fetch(
        &self,
        kind: ResourceKind,
        id: &ResourceId,
    ) -> PcvResult<Option<ManagedResource>> {
        let mut state = self.state.lock();
        state.calls.push(ProviderCall::Fetch {
            kind,
            id: id.clone(),
        });

        if let Some(next) = state.scripts.get_mut(id).and_then(VecDeque::pop_front) {
            return match next {
                Observation::Missing => Ok(None),
                Observation::Fail(err) => Err(err),
                Observation::State(observed) => Ok(state.resources.get_mut(id).map(|r| {
                    r.state = observed;
                    r.observed_in(observed)
                })),
            };
        }

        let first_fetch = state.pending_first_fetch.remove(id);
        let transitional = state.transitional;
        let (observed, settled) = {
            let Some(resource) = state.resources.get(id) else {
                return Ok(None);
            };
            if resource.kind != kind {
                return Ok(None);
            }
            let settled = if first_fetch || transitional {
                settle_target(resource)
            } else {
                None
            };
            (resource.observed_in(resource.state), settled)
        };
        match settled {
            Some(next) if next.is_deletion() => {
                state.resources.remove(id);
            }
            Some(next) => {
                if let Some(resource) = state.resources.get_mut(id) {
                    resource.state = next;
                }
            }
            None => {}
        }
        Ok(Some(observed))
    }

    async fn transition(
        &self,
        kind: ResourceKind,
        id: &ResourceId,
        operation: Operation,
    ) -> PcvResult<()> {
        let mut state = self.state.lock();
        state.calls.push(ProviderCall::Transition {
            kind,
            id: id.clone(),
            operation: operation.clone(),
        });

        let op = operation.kind();
        let Some(current) = state.resources.get(id).map(|r| r.state) else {
            return Err(PcvError::NotFound {
                kind,
                id: id.clone(),
            });
        };

        if operation == Operation::Delete {
            if let Some(err) = state.stuck.get(id) {
                return Err(err.clone());
            }
            if state.transitional {
                if let Some(resource) = state.resources.get_mut(id) {
                    resource.state = ResourceState::Deleting;
                }
            } else {
                state.resources.remove(id);
            }
            return Ok(());
        }

        if !state.capabilities.supports_operation(kind, op) {
            return Err(PcvError::unsupported(format!("{op} on {kind}")));
        }
        if !state.capabilities.can(kind, op, current) {
            return Err(PcvError::InvalidState {
                id: id.clone(),
                operation: op,
                state: current,
            });
        }

        let new_product = match &operation {
            Operation::Resize {
                target: ResizeTarget::Product { product_id },
            } => {
                if !state.products.iter().any(|p| &p.id == product_id) {
                    return Err(PcvError::InvalidSpec {
                        message: format!("unknown product {product_id}"),
                    });
                }
                Some(product_id.clone())
            }
            Operation::Resize {
                target:
                    ResizeTarget::Shape {
                        cpu_count,
                        memory_mb,
                    },
            } => {
                let Some(product) = state
                    .products
                    .iter()
                    .find(|p| p.cpu_count == *cpu_count && p.memory_mb == *memory_mb)
                else {
                    return Err(PcvError::InvalidSpec {
                        message: format!("no product with {cpu_count} cpu and {memory_mb} MB"),
                    });
                };
                Some(product.id.clone())
            }
            _ => None,
        };

        let transitional = state.transitional;
        if let Some(resource) = state.resources.get_mut(id) {
            if let Some(product_id) = new_product {
                resource.product_id = Some(product_id);
            }
            if let Operation::SetAnalytics { enabled } = operation {
                resource.analytics = enabled;
            }
            if let Some(expected) = operation.expected_state() {
                resource.state = match transitional_for(&operation) {
                    Some(passing) if transitional => {
                        // Pending settles into the kind's ready state.
                        if passing == ResourceState::Pending && expected != resource.kind.ready_state() {
                            expected
                        } else {
                            passing
                        }
                    }
                    _ => expected,
                };
            }
        }
        Ok(())
    }

    fn list(&self, kind: ResourceKind, filter: ResourceFilter) -> ResourceStream {
        let mut state = self.state.lock();
        state.calls.push(ProviderCall::List { kind });
        let listed: Vec<PcvResult<ManagedResource>> = state
            .resources
            .values()
            .filter(|r| r.kind == kind && filter.matches(r))
            .cloned()
            .map(Ok)
            .collect();
        stream::iter(listed).boxed()
    }

    async fn products(
        &self,
        kind: ResourceKind,
        _image: Option<&ResourceId>,
    ) -> PcvResult<Vec<Product>> {
        let mut state = self.state.lock();
        state.calls.push(ProviderCall::Products { kind });
        if kind == ResourceKind::Instance {
            Ok(state.products.clone())
        } else {
            Ok(Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;
    use pcv_core::OperationKind;

    use super::*;

    fn caps() -> CapabilitySet {
        CapabilitySet::new("r1")
            .with_kind(ResourceKind::Instance)
            .with_unsubscribed_kind(ResourceKind::Database)
            .allow(ResourceKind::Instance, OperationKind::Stop, [ResourceState::Running])
            .allow(ResourceKind::Instance, OperationKind::Start, [ResourceState::Stopped])
    }

    fn provider() -> MockProvider {
        MockProvider::new(caps()).with_products([Product::new("small", 1, 1024, 10)])
    }

    #[tokio::test]
    async fn create_respects_subscription() {
        let provider = provider();
        let err = provider
            .create(ResourceKind::Database, ResourceSpec::named("db"))
            .await
            .unwrap_err();
        assert_eq!(err, PcvError::NotSubscribed { kind: ResourceKind::Database });

        let err = provider
            .create(ResourceKind::Queue, ResourceSpec::named("q"))
            .await
            .unwrap_err();
        assert!(err.is_skip());
    }

    #[tokio::test]
    async fn transitions_are_state_checked() {
        let provider = provider();
        let vm = provider
            .create(ResourceKind::Instance, ResourceSpec::named("vm"))
            .await
            .unwrap();
        assert_eq!(vm.state, ResourceState::Running);
        assert_eq!(vm.product_id.as_deref(), Some("small"));

        let err = provider
            .transition(ResourceKind::Instance, &vm.id, Operation::Start)
            .await
            .unwrap_err();
        assert!(matches!(err, PcvError::InvalidState { .. }));

        provider
            .transition(ResourceKind::Instance, &vm.id, Operation::stop())
            .await
            .unwrap();
        assert_eq!(provider.resource(&vm.id).unwrap().state, ResourceState::Stopped);

        let err = provider
            .transition(ResourceKind::Instance, &vm.id, Operation::Pause)
            .await
            .unwrap_err();
        assert!(err.is_skip());
    }

    #[tokio::test]
    async fn scripted_fetches_come_first() {
        let provider = provider();
        let vm = provider
            .create(ResourceKind::Instance, ResourceSpec::named("vm"))
            .await
            .unwrap();
        provider.script(
            &vm.id,
            [
                Observation::Missing,
                Observation::Fail(PcvError::transient("timeout")),
                Observation::State(ResourceState::Stopped),
            ],
        );
        assert_eq!(provider.fetch(ResourceKind::Instance, &vm.id).await, Ok(None));
        assert!(provider.fetch(ResourceKind::Instance, &vm.id).await.is_err());
        let seen = provider.fetch(ResourceKind::Instance, &vm.id).await.unwrap().unwrap();
        assert_eq!(seen.state, ResourceState::Stopped);
        let seen = provider.fetch(ResourceKind::Instance, &vm.id).await.unwrap().unwrap();
        assert_eq!(seen.state, ResourceState::Stopped);
        assert_eq!(provider.fetch_count(&vm.id), 4);
    }

    #[tokio::test]
    async fn launch_state_settles_on_first_fetch() {
        let provider = provider().with_launch_state(ResourceState::Pending);
        let vm = provider
            .create(ResourceKind::Instance, ResourceSpec::named("vm"))
            .await
            .unwrap();
        assert_eq!(vm.state, ResourceState::Pending);
        let first = provider.fetch(ResourceKind::Instance, &vm.id).await.unwrap().unwrap();
        assert_eq!(first.state, ResourceState::Pending);
        let second = provider.fetch(ResourceKind::Instance, &vm.id).await.unwrap().unwrap();
        assert_eq!(second.state, ResourceState::Running);
    }

    #[tokio::test]
    async fn list_filters_and_deletes_are_recorded() {
        let provider = provider();
        let a = provider
            .create(ResourceKind::Instance, ResourceSpec::named("pcv-a"))
            .await
            .unwrap();
        provider
            .create(ResourceKind::Instance, ResourceSpec::named("other"))
            .await
            .unwrap();
        let listed: Vec<_> = provider
            .list(
                ResourceKind::Instance,
                ResourceFilter::all().with_name_prefix("pcv-"),
            )
            .collect()
            .await;
        assert_eq!(listed.len(), 1);

        provider
            .transition(ResourceKind::Instance, &a.id, Operation::Delete)
            .await
            .unwrap();
        assert_eq!(provider.deletes(), vec![a.id.clone()]);
        assert!(provider.resource(&a.id).is_none());
    }
}
