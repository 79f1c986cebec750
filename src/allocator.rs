// src/allocator.rs
//! Interval-based resource assignment.
//!
//! Each render pass reports which proxies it touches as `[start, end]` operation-index
//! intervals. [`ResourceAllocator::plan_assignment`] walks them in start order and hands each
//! one a [`Register`], reusing registers whose previous interval already ended, much like a
//! linear-scan register allocator. [`ResourceAllocator::assign`] then creates the real
//! resources, one per register, and attaches them to every proxy that shares it.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::gpu::provider::ResourceProvider;
use crate::gpu::proxy::{ProxyId, SurfaceProxy};
use crate::key::{ScratchKey, UniqueKey};
use crate::multimap::MultiMap;
use crate::resource::{BudgetedType, ResourceRef};

/// Whether the op that reports an interval really reads or writes the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActualUse {
    No,
    Yes,
}

/// Whether the proxy's register may go back to the free pool when its interval ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowRecycling {
    No,
    Yes,
}

pub type RegisterId = usize;

// -----------------------------------------------------------------------------
// Intervals & registers
// -----------------------------------------------------------------------------

/// The op-index window during which a proxy must stay backed.
#[derive(Debug)]
pub struct Interval {
    proxy: Arc<SurfaceProxy>,
    start: u32,
    end: u32,
    uses: usize,
    allow_recycling: bool,
    register: Option<RegisterId>,
}

impl Interval {
    pub fn proxy(&self) -> &Arc<SurfaceProxy> {
        &self.proxy
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    pub fn uses(&self) -> usize {
        self.uses
    }
}

/// A backing slot shared by proxies whose intervals never overlap.
#[derive(Debug)]
pub struct Register {
    originating: ProxyId,
    scratch_key: Option<ScratchKey>,
    unique_key: Option<UniqueKey>,
    existing: Option<ResourceRef>,
    created: Option<ResourceRef>,
    accounted_for_in_budget: bool,
}

impl Register {
    fn new(
        proxy: &Arc<SurfaceProxy>,
        scratch_key: Option<ScratchKey>,
        provider: &mut ResourceProvider,
    ) -> Self {
        let unique_key = proxy.unique_key().cloned();
        let mut existing = unique_key
            .as_ref()
            .and_then(|key| provider.find_by_unique_key(key));
        if existing.is_none() {
            if let Some(key) = &scratch_key {
                existing = provider.find_and_ref_scratch(key);
            }
        }
        Self {
            originating: proxy.id(),
            scratch_key,
            unique_key,
            existing,
            created: None,
            accounted_for_in_budget: false,
        }
    }

    pub fn scratch_key(&self) -> Option<&ScratchKey> {
        self.scratch_key.as_ref()
    }

    pub fn existing_resource(&self) -> Option<&ResourceRef> {
        self.existing.as_ref()
    }

    /// Idle once `proxy`'s interval ends and nobody outside the allocator's known uses holds
    /// the proxy.
    fn is_recyclable(&self, reuse_scratch_textures: bool, proxy: &Arc<SurfaceProxy>, uses: usize) -> bool {
        if !reuse_scratch_textures && !proxy.is_render_target() {
            return false;
        }
        if self.scratch_key.is_none() || self.unique_key.is_some() {
            return false;
        }
        // One reference belongs to the interval itself.
        Arc::strong_count(proxy) <= uses + 1
    }

    fn instantiate(&mut self, proxy: &SurfaceProxy, provider: &mut ResourceProvider) -> bool {
        let resource = match (&self.existing, &self.created) {
            (Some(existing), _) => existing.clone(),
            (None, Some(created)) => created.clone(),
            (None, None) => {
                debug_assert_eq!(proxy.id(), self.originating, "register used before its origin");
                let Some(created) = provider.create_resource(proxy.desc(), proxy.is_budgeted())
                else {
                    return false;
                };
                self.created = Some(created.clone());
                created
            }
        };

        if proxy.is_budgeted()
            && provider.cache().budgeted_type(&resource) != Some(BudgetedType::Budgeted)
        {
            provider.cache_mut().make_budgeted(&resource);
        }
        if let Some(key) = proxy.unique_key() {
            if provider.cache().unique_key(&resource).is_none() {
                provider.assign_unique_key_to_resource(key, &resource);
            }
        }
        proxy.assign(resource);
        true
    }
}

// -----------------------------------------------------------------------------
// Allocator
// -----------------------------------------------------------------------------

pub struct ResourceAllocator<'a> {
    provider: &'a mut ResourceProvider,
    intervals: Vec<Interval>,
    interval_hash: HashMap<ProxyId, usize>,
    // Indices into `intervals`, ordered by start; equal starts keep insertion order.
    interval_list: Vec<usize>,
    // Ordered by end.
    active: VecDeque<usize>,
    registers: Vec<Register>,
    free_pool: MultiMap<ScratchKey, RegisterId>,
    unique_key_registers: HashMap<UniqueKey, RegisterId>,
    planned: bool,
    assigned: bool,
    failed: Option<ProxyId>,
}

impl<'a> ResourceAllocator<'a> {
    pub fn new(provider: &'a mut ResourceProvider) -> Self {
        Self {
            provider,
            intervals: Vec::new(),
            interval_hash: HashMap::new(),
            interval_list: Vec::new(),
            active: VecDeque::new(),
            registers: Vec::new(),
            free_pool: MultiMap::new(),
            unique_key_registers: HashMap::new(),
            planned: false,
            assigned: false,
            failed: None,
        }
    }

    pub fn provider(&mut self) -> &mut ResourceProvider {
        &mut *self.provider
    }

    /// Sticky; survives [`reset`](Self::reset).
    pub fn failed_instantiation(&self) -> bool {
        self.failed.is_some()
    }

    pub fn num_registers(&self) -> usize {
        self.registers.len()
    }

    pub fn num_intervals(&self) -> usize {
        self.intervals.len()
    }

    /// The register planned for `proxy`, if it got one.
    pub fn register_for(&self, proxy: ProxyId) -> Option<RegisterId> {
        self.intervals
            .iter()
            .find(|i| i.proxy.id() == proxy)
            .and_then(|i| i.register)
    }

    pub fn register(&self, id: RegisterId) -> Option<&Register> {
        self.registers.get(id)
    }

    /// Intervals in start order.
    pub fn intervals(&self) -> impl Iterator<Item = &Interval> {
        self.interval_list.iter().map(|&i| &self.intervals[i])
    }

    /// Record that `proxy` is used by ops `start..=end`.
    pub fn add_interval(
        &mut self,
        proxy: &Arc<SurfaceProxy>,
        start: u32,
        end: u32,
        actual_use: ActualUse,
        allow_recycling: AllowRecycling,
    ) {
        assert!(!self.planned, "intervals added after planning; call reset() first");
        debug_assert!(start <= end);

        if proxy.is_read_only() {
            // Read-only content never moves between registers; resolve it now.
            if proxy.is_lazy() {
                if !self.provider.instantiate_lazy(proxy) {
                    log::warn!("read-only lazy {:?} could not be instantiated", proxy.id());
                    self.failed.get_or_insert(proxy.id());
                }
            } else {
                debug_assert!(proxy.is_instantiated(), "read-only proxy without a resource");
            }
            return;
        }

        if let Some(&index) = self.interval_hash.get(&proxy.id()) {
            let interval = &mut self.intervals[index];
            if actual_use == ActualUse::Yes {
                interval.uses += 1;
            }
            if allow_recycling == AllowRecycling::No {
                interval.allow_recycling = false;
            }
            interval.end = interval.end.max(end);
            return;
        }

        let index = self.intervals.len();
        self.intervals.push(Interval {
            proxy: Arc::clone(proxy),
            start,
            end,
            uses: usize::from(actual_use == ActualUse::Yes),
            allow_recycling: allow_recycling == AllowRecycling::Yes,
            register: None,
        });
        let intervals = &self.intervals;
        let at = self.interval_list.partition_point(|&i| intervals[i].start <= start);
        self.interval_list.insert(at, index);
        self.interval_hash.insert(proxy.id(), index);
    }

    /// Walk the intervals once and give each proxy a register.
    pub fn plan_assignment(&mut self) -> Result<()> {
        if self.planned {
            return Err(Error::AllocatorState("plan_assignment called twice without reset"));
        }
        self.planned = true;
        self.interval_hash.clear();

        let order = self.interval_list.clone();
        for index in order {
            if self.failed.is_some() {
                break;
            }
            self.expire(self.intervals[index].start);

            let proxy = Arc::clone(&self.intervals[index].proxy);
            if proxy.is_instantiated() {
                self.activate(index);
                continue;
            }
            if proxy.is_lazy() {
                if proxy.is_fully_lazy() && !self.provider.instantiate_lazy(&proxy) {
                    log::warn!("fully lazy {:?} could not be instantiated", proxy.id());
                    self.failed = Some(proxy.id());
                    break;
                }
                self.activate(index);
                continue;
            }

            let register = self.find_or_create_register_for(&proxy);
            log::trace!(
                "{:?} [{}, {}] -> register {}",
                proxy.id(),
                self.intervals[index].start,
                self.intervals[index].end,
                register
            );
            self.intervals[index].register = Some(register);
            self.activate(index);
        }
        self.active.clear();

        log::debug!(
            "planned {} intervals onto {} registers",
            self.intervals.len(),
            self.registers.len()
        );
        self.check_failed()
    }

    fn activate(&mut self, index: usize) {
        let intervals = &self.intervals;
        let end = intervals[index].end;
        let at = self.active.partition_point(|&i| intervals[i].end <= end);
        self.active.insert(at, index);
    }

    /// Retire every active interval that ended before `current_start`.
    fn expire(&mut self, current_start: u32) {
        let reuse = self.provider.reuse_scratch_textures();
        while let Some(&index) = self.active.front() {
            let interval = &self.intervals[index];
            if interval.end >= current_start {
                break;
            }
            self.active.pop_front();
            let Some(register_id) = interval.register else {
                continue;
            };
            let register = &self.registers[register_id];
            if interval.allow_recycling
                && register.is_recyclable(reuse, &interval.proxy, interval.uses)
            {
                if let Some(key) = register.scratch_key.clone() {
                    log::trace!("register {} back in the free pool", register_id);
                    self.free_pool.insert(key, register_id);
                }
            }
        }
    }

    fn find_or_create_register_for(&mut self, proxy: &Arc<SurfaceProxy>) -> RegisterId {
        // Uniquely keyed proxies get their own register and never enter the free pool.
        if let Some(key) = proxy.unique_key() {
            if let Some(&existing) = self.unique_key_registers.get(key) {
                return existing;
            }
            let register = Register::new(proxy, None, self.provider);
            let id = self.push_register(register);
            self.unique_key_registers.insert(key.clone(), id);
            return id;
        }

        let scratch_key = proxy.desc().scratch_key();
        if let Some(key) = &scratch_key {
            if let Some(id) = self.free_pool.find_and_remove(key, |_| true) {
                return id;
            }
        }
        let register = Register::new(proxy, scratch_key, self.provider);
        self.push_register(register)
    }

    fn push_register(&mut self, register: Register) -> RegisterId {
        self.registers.push(register);
        self.registers.len() - 1
    }

    /// Make room in the budget for every budgeted register that still needs a new resource.
    pub fn make_budget_headroom(&mut self) -> Result<()> {
        let mut needed = 0usize;
        for &index in &self.interval_list {
            let interval = &self.intervals[index];
            let proxy = &interval.proxy;
            if !proxy.is_budgeted() || proxy.is_instantiated() {
                continue;
            }
            if proxy.is_lazy() {
                needed += proxy.gpu_memory_size();
                continue;
            }
            let Some(register) = interval.register.and_then(|r| self.registers.get_mut(r)) else {
                continue;
            };
            if !register.accounted_for_in_budget && register.existing.is_none() {
                needed += proxy.gpu_memory_size();
            }
            register.accounted_for_in_budget = true;
        }

        if self.provider.cache_mut().purge_to_make_headroom(needed) {
            Ok(())
        } else {
            log::warn!("no headroom for {} bytes of new resources", needed);
            Err(Error::BudgetHeadroom { needed })
        }
    }

    /// Create or attach the real resources, in start order so every register's originating
    /// proxy is instantiated before the proxies that reuse it.
    pub fn assign(&mut self) -> Result<()> {
        self.check_failed()?;
        if !self.planned {
            return Err(Error::AllocatorState("assign called before plan_assignment"));
        }
        if self.assigned {
            return Err(Error::AllocatorState("assign called twice without reset"));
        }
        self.assigned = true;

        for &index in &self.interval_list {
            let interval = &self.intervals[index];
            let proxy = &interval.proxy;
            if proxy.is_instantiated() {
                continue;
            }
            let ok = if proxy.is_lazy() {
                self.provider.instantiate_lazy(proxy)
            } else {
                match interval.register {
                    Some(register) => {
                        self.registers[register].instantiate(proxy, &mut *self.provider)
                    }
                    None => false,
                }
            };
            if !ok {
                log::warn!("could not instantiate {:?}", proxy.id());
                self.failed = Some(proxy.id());
                break;
            }
        }
        self.check_failed()
    }

    fn check_failed(&self) -> Result<()> {
        match self.failed {
            Some(proxy) => Err(Error::InstantiationFailed { proxy }),
            None => Ok(()),
        }
    }

    /// Forget all intervals and registers so the allocator can plan again.
    pub fn reset(&mut self) {
        self.planned = false;
        self.assigned = false;
        self.intervals.clear();
        self.interval_hash.clear();
        self.interval_list.clear();
        self.active.clear();
        self.registers.clear();
        self.free_pool.clear();
        self.unique_key_registers.clear();
    }
}

impl std::fmt::Debug for ResourceAllocator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceAllocator")
            .field("intervals", &self.intervals.len())
            .field("registers", &self.registers.len())
            .field("planned", &self.planned)
            .field("assigned", &self.assigned)
            .field("failed", &self.failed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ResourceCache;
    use crate::config::CacheConfig;
    use crate::gpu::desc::{PixelFormat, ResourceDesc};
    use crate::gpu::proxy::LazyKind;
    use crate::key::KeyDomain;
    use crate::testing::{init_logger, Counters, MockBackend};
    use std::sync::atomic::Ordering;

    fn provider_with(counters: &Arc<Counters>, config: CacheConfig, reuse_textures: bool) -> ResourceProvider {
        init_logger();
        let mut backend = MockBackend::new(counters);
        backend.reuse_scratch_textures = reuse_textures;
        ResourceProvider::new(ResourceCache::with_config(config), Box::new(backend))
    }

    fn provider(counters: &Arc<Counters>) -> ResourceProvider {
        provider_with(counters, CacheConfig::default(), true)
    }

    fn rt() -> ResourceDesc {
        ResourceDesc::render_target(64, 64, PixelFormat::Rgba8Unorm)
    }

    fn proxy(desc: ResourceDesc) -> Arc<SurfaceProxy> {
        Arc::new(SurfaceProxy::new(desc, true))
    }

    fn same_resource(a: &SurfaceProxy, b: &SurfaceProxy) -> bool {
        match (a.resource(), b.resource()) {
            (Some(x), Some(y)) => ResourceRef::ptr_eq(&x, &y),
            _ => false,
        }
    }

    fn add(alloc: &mut ResourceAllocator<'_>, p: &Arc<SurfaceProxy>, start: u32, end: u32) {
        alloc.add_interval(p, start, end, ActualUse::Yes, AllowRecycling::Yes);
    }

    #[test]
    fn expired_register_is_reused() {
        let counters = Counters::new();
        let mut provider = provider(&counters);
        let (a, b, c) = (proxy(rt()), proxy(rt()), proxy(rt()));
        {
            let mut alloc = ResourceAllocator::new(&mut provider);
            add(&mut alloc, &a, 0, 2);
            add(&mut alloc, &b, 1, 3);
            add(&mut alloc, &c, 4, 5);
            alloc.plan_assignment().unwrap();
            assert_eq!(alloc.num_registers(), 2);
            assert_eq!(alloc.register_for(a.id()), alloc.register_for(c.id()));
            assert_ne!(alloc.register_for(a.id()), alloc.register_for(b.id()));
            alloc.assign().unwrap();
        }
        assert!(same_resource(&a, &c));
        assert!(!same_resource(&a, &b));
        assert_eq!(counters.created(), 2);
    }

    #[test]
    fn disallowed_recycling_keeps_registers_apart() {
        let counters = Counters::new();
        let mut provider = provider(&counters);
        let (a, c) = (proxy(rt()), proxy(rt()));
        let mut alloc = ResourceAllocator::new(&mut provider);
        add(&mut alloc, &a, 0, 1);
        // Same proxy reported again by a later op that forbids recycling.
        alloc.add_interval(&a, 0, 1, ActualUse::No, AllowRecycling::No);
        add(&mut alloc, &c, 2, 3);
        alloc.plan_assignment().unwrap();
        assert_eq!(alloc.num_intervals(), 2);
        assert_ne!(alloc.register_for(a.id()), alloc.register_for(c.id()));
    }

    #[test]
    fn externally_held_proxy_is_not_recycled() {
        let counters = Counters::new();
        let mut provider = provider(&counters);
        let (a, c) = (proxy(rt()), proxy(rt()));
        let _extra = Arc::clone(&a);
        let mut alloc = ResourceAllocator::new(&mut provider);
        add(&mut alloc, &a, 0, 1);
        add(&mut alloc, &c, 2, 3);
        alloc.plan_assignment().unwrap();
        assert_eq!(alloc.num_registers(), 2);
    }

    #[test]
    fn extended_interval_blocks_reuse() {
        let counters = Counters::new();
        let mut provider = provider(&counters);
        let (a, c) = (proxy(rt()), proxy(rt()));
        let mut alloc = ResourceAllocator::new(&mut provider);
        add(&mut alloc, &a, 0, 1);
        add(&mut alloc, &c, 2, 3);
        // `a` is touched again by op 5, so it overlaps `c`.
        alloc.add_interval(&a, 5, 5, ActualUse::Yes, AllowRecycling::Yes);
        alloc.plan_assignment().unwrap();
        let first = alloc.intervals().next().unwrap();
        assert_eq!((first.start(), first.end(), first.uses()), (0, 5, 2));
        assert_ne!(alloc.register_for(a.id()), alloc.register_for(c.id()));
    }

    #[test]
    fn plain_textures_need_backend_permission() {
        let counters = Counters::new();
        let mut provider = provider_with(&counters, CacheConfig::default(), false);
        let desc = ResourceDesc::texture(32, 32, PixelFormat::Rgba8Unorm);
        let (a, c) = (proxy(desc), proxy(desc));
        let mut alloc = ResourceAllocator::new(&mut provider);
        add(&mut alloc, &a, 0, 1);
        add(&mut alloc, &c, 2, 3);
        alloc.plan_assignment().unwrap();
        assert_eq!(alloc.num_registers(), 2);
    }

    #[test]
    fn same_start_intervals_keep_insertion_order() {
        let counters = Counters::new();
        let mut provider = provider(&counters);
        let proxies: Vec<_> = (0..4).map(|_| proxy(rt())).collect();
        let mut alloc = ResourceAllocator::new(&mut provider);
        for p in &proxies {
            add(&mut alloc, p, 3, 4);
        }
        let order: Vec<ProxyId> = alloc.intervals().map(|i| i.proxy().id()).collect();
        let expected: Vec<ProxyId> = proxies.iter().map(|p| p.id()).collect();
        assert_eq!(order, expected);
    }

    #[test]
    fn unique_keyed_proxies_share_a_register() {
        let counters = Counters::new();
        let mut provider = provider(&counters);
        let key = UniqueKey::builder(KeyDomain::generate(), 0, Some("mask")).finish();
        let a = Arc::new(SurfaceProxy::new(rt(), true).with_unique_key(key.clone()));
        let b = Arc::new(SurfaceProxy::new(rt(), true).with_unique_key(key.clone()));
        let c = proxy(rt());
        {
            let mut alloc = ResourceAllocator::new(&mut provider);
            add(&mut alloc, &a, 0, 0);
            add(&mut alloc, &b, 1, 1);
            add(&mut alloc, &c, 2, 2);
            alloc.plan_assignment().unwrap();
            assert_eq!(alloc.register_for(a.id()), alloc.register_for(b.id()));
            // Uniquely keyed registers never go back to the pool.
            assert_ne!(alloc.register_for(a.id()), alloc.register_for(c.id()));
            alloc.assign().unwrap();
        }
        assert!(same_resource(&a, &b));
        let resource = a.resource().unwrap();
        assert_eq!(provider.cache().unique_key(&resource), Some(key));
    }

    #[test]
    fn idle_scratch_in_cache_is_picked_up() {
        let counters = Counters::new();
        let mut provider = provider(&counters);
        drop(provider.create_resource(&rt(), true));
        provider.cache_mut().process_messages();
        assert_eq!(provider.cache().purgeable_count(), 1);

        let a = proxy(rt());
        {
            let mut alloc = ResourceAllocator::new(&mut provider);
            add(&mut alloc, &a, 0, 1);
            alloc.plan_assignment().unwrap();
            let register = alloc.register(alloc.register_for(a.id()).unwrap()).unwrap();
            assert!(register.existing_resource().is_some());
            alloc.assign().unwrap();
        }
        assert_eq!(counters.created(), 1);
        assert!(a.is_instantiated());
    }

    #[test]
    fn lazy_proxies_are_resolved() {
        let counters = Counters::new();
        let mut provider = provider(&counters);
        let desc = rt();
        let make = move |p: &mut ResourceProvider| p.create_resource(&desc, true);
        let full = Arc::new(SurfaceProxy::new_lazy(desc, true, LazyKind::Full, Box::new(make)));
        let partial = Arc::new(SurfaceProxy::new_lazy(desc, true, LazyKind::Partial, Box::new(make)));

        let mut alloc = ResourceAllocator::new(&mut provider);
        add(&mut alloc, &full, 0, 1);
        add(&mut alloc, &partial, 0, 1);
        alloc.plan_assignment().unwrap();
        assert!(full.is_instantiated());
        assert!(!partial.is_instantiated());
        alloc.assign().unwrap();
        assert!(partial.is_instantiated());
        assert_eq!(alloc.num_registers(), 0);
    }

    #[test]
    fn read_only_proxies_skip_intervals() {
        let counters = Counters::new();
        let mut provider = provider(&counters);
        let desc = rt();
        let lazy = Arc::new(
            SurfaceProxy::new_lazy(
                desc,
                true,
                LazyKind::Partial,
                Box::new(move |p: &mut ResourceProvider| p.create_resource(&desc, true)),
            )
            .read_only(),
        );
        let mut alloc = ResourceAllocator::new(&mut provider);
        add(&mut alloc, &lazy, 0, 3);
        assert_eq!(alloc.num_intervals(), 0);
        assert!(lazy.is_instantiated());
        assert!(!alloc.failed_instantiation());
    }

    #[test]
    fn failure_is_sticky() {
        let counters = Counters::new();
        let backend = MockBackend::new(&counters);
        let fail = Arc::clone(&backend.fail);
        let mut provider = ResourceProvider::new(
            ResourceCache::with_config(CacheConfig::default()),
            Box::new(backend),
        );
        let a = proxy(rt());
        let mut alloc = ResourceAllocator::new(&mut provider);
        add(&mut alloc, &a, 0, 1);
        alloc.plan_assignment().unwrap();
        fail.store(true, Ordering::SeqCst);
        assert_eq!(alloc.assign(), Err(Error::InstantiationFailed { proxy: a.id() }));
        assert!(alloc.failed_instantiation());

        fail.store(false, Ordering::SeqCst);
        alloc.reset();
        assert!(alloc.failed_instantiation());
        add(&mut alloc, &a, 0, 1);
        assert!(alloc.plan_assignment().is_err());
    }

    #[test]
    fn misuse_is_reported() {
        let counters = Counters::new();
        let mut provider = provider(&counters);
        let mut alloc = ResourceAllocator::new(&mut provider);
        assert_eq!(
            alloc.assign(),
            Err(Error::AllocatorState("assign called before plan_assignment"))
        );
        alloc.plan_assignment().unwrap();
        assert!(alloc.plan_assignment().is_err());
        alloc.assign().unwrap();
        assert!(alloc.assign().is_err());
        alloc.reset();
        alloc.plan_assignment().unwrap();
    }

    #[test]
    #[should_panic(expected = "after planning")]
    fn adding_after_planning_panics() {
        let counters = Counters::new();
        let mut provider = provider(&counters);
        let mut alloc = ResourceAllocator::new(&mut provider);
        alloc.plan_assignment().unwrap();
        add(&mut alloc, &proxy(rt()), 0, 1);
    }

    #[test]
    fn budget_headroom() {
        let counters = Counters::new();
        let size = rt().approx_size_bytes();
        let config = CacheConfig::default().with_max_bytes(2 * size);
        let mut provider = provider_with(&counters, config, true);

        // One idle resource of another shape occupies half the budget.
        let other = ResourceDesc::render_target(32, 128, PixelFormat::Rgba8Unorm);
        drop(provider.create_resource(&other, true));
        assert_eq!(provider.cache().budgeted_bytes(), size);

        let (a, b) = (proxy(rt()), proxy(rt()));
        {
            let mut alloc = ResourceAllocator::new(&mut provider);
            add(&mut alloc, &a, 0, 1);
            add(&mut alloc, &b, 0, 1);
            alloc.plan_assignment().unwrap();
            alloc.make_budget_headroom().unwrap();
        }
        assert_eq!(provider.cache().budgeted_bytes(), 0);

        let (c, d, e) = (proxy(rt()), proxy(rt()), proxy(rt()));
        let mut alloc = ResourceAllocator::new(&mut provider);
        add(&mut alloc, &c, 0, 1);
        add(&mut alloc, &d, 0, 1);
        add(&mut alloc, &e, 0, 1);
        alloc.plan_assignment().unwrap();
        assert_eq!(
            alloc.make_budget_headroom(),
            Err(Error::BudgetHeadroom { needed: 3 * size })
        );
    }
}
