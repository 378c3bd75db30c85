//! Descriptor layouts, pools and sets, tracked on the CPU.
//!
//! Sets are built in two steps: stage writes with [`ResourceBindingTable::write`]
//! or [`ResourceBindingTable::write_array`], then flush them with
//! [`ResourceBindingTable::build`]. A built set can be pointed at new
//! resources with [`ResourceBindingTable::rewrite`].

use std::collections::{BTreeMap, HashMap};

use ash::vk;

use crate::gpu::{ArrayLength, BindingSlot, BoundResource, DescriptorWrite, GpuDevice, PoolDesc};
use crate::{AshError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LayoutHandle(usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PoolHandle(usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SetHandle(usize);

struct LayoutEntry {
    raw: vk::DescriptorSetLayout,
    slots: Vec<BindingSlot>,
}

impl LayoutEntry {
    fn slot(&self, binding: u32) -> Option<&BindingSlot> {
        self.slots.iter().find(|slot| slot.binding == binding)
    }

    fn variable_slot(&self) -> Option<&BindingSlot> {
        self.slots.iter().find(|slot| slot.length.is_variable())
    }
}

struct PoolEntry {
    raw: vk::DescriptorPool,
    desc: PoolDesc,
    allocated_sets: u32,
    allocated: HashMap<vk::DescriptorType, u32>,
}

impl PoolEntry {
    fn capacity(&self, kind: vk::DescriptorType) -> u32 {
        self.desc
            .sizes
            .iter()
            .filter(|(ty, _)| *ty == kind)
            .map(|(_, count)| *count)
            .sum()
    }
}

struct SetEntry {
    raw: vk::DescriptorSet,
    layout: LayoutHandle,
    pool: PoolHandle,
    variable_count: Option<u32>,
    staged: Vec<(u32, u32, BoundResource)>,
    bound: BTreeMap<(u32, u32), BoundResource>,
    built: bool,
}

/// Declares layouts, owns pools and tracks what every set currently references.
#[derive(Default)]
pub struct ResourceBindingTable {
    layouts: Vec<LayoutEntry>,
    pools: Vec<PoolEntry>,
    sets: Vec<Option<SetEntry>>,
}

impl ResourceBindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a set layout. At most one slot may be runtime-sized, and it
    /// must have the highest binding number.
    pub fn declare_layout<D: GpuDevice>(
        &mut self,
        device: &mut D,
        slots: &[BindingSlot],
    ) -> Result<LayoutHandle> {
        validate_slots(slots)?;
        let raw = device.create_descriptor_set_layout(slots)?;
        self.layouts.push(LayoutEntry {
            raw,
            slots: slots.to_vec(),
        });
        Ok(LayoutHandle(self.layouts.len() - 1))
    }

    pub fn create_pool<D: GpuDevice>(&mut self, device: &mut D, desc: PoolDesc) -> Result<PoolHandle> {
        if desc.max_sets == 0 {
            return Err(AshError::configuration("descriptor pool must allow at least one set"));
        }
        let raw = device.create_descriptor_pool(&desc)?;
        self.pools.push(PoolEntry {
            raw,
            desc,
            allocated_sets: 0,
            allocated: HashMap::new(),
        });
        Ok(PoolHandle(self.pools.len() - 1))
    }

    /// Allocates a set from `pool`. Layouts with a runtime-sized slot need the
    /// exact element count for this set in `variable_count`.
    pub fn allocate_set<D: GpuDevice>(
        &mut self,
        device: &mut D,
        layout: LayoutHandle,
        pool: PoolHandle,
        variable_count: Option<u32>,
    ) -> Result<SetHandle> {
        let layout_entry = self.layout_entry(layout)?;
        let pool_entry = self
            .pools
            .get(pool.0)
            .ok_or_else(|| AshError::precondition(format!("unknown descriptor pool {pool:?}")))?;

        let variable_count = match (layout_entry.variable_slot(), variable_count) {
            (Some(slot), Some(count)) => {
                if count > slot.length.max_count() {
                    return Err(AshError::Configuration(format!(
                        "variable descriptor count {count} exceeds binding {} maximum of {}",
                        slot.binding,
                        slot.length.max_count()
                    )));
                }
                if !pool_entry.desc.update_after_bind {
                    return Err(AshError::configuration(
                        "runtime-sized arrays need an update-after-bind pool",
                    ));
                }
                Some(count)
            }
            (Some(slot), None) => {
                return Err(AshError::Configuration(format!(
                    "binding {} is runtime-sized; an element count is required",
                    slot.binding
                )));
            }
            (None, Some(_)) => {
                return Err(AshError::configuration(
                    "element count given for a layout without a runtime-sized binding",
                ));
            }
            (None, None) => None,
        };

        if pool_entry.allocated_sets >= pool_entry.desc.max_sets {
            return Err(AshError::Configuration(format!(
                "descriptor pool exhausted: {} of {} sets allocated",
                pool_entry.allocated_sets, pool_entry.desc.max_sets
            )));
        }

        let mut demand: HashMap<vk::DescriptorType, u32> = HashMap::new();
        for slot in &layout_entry.slots {
            let count = match slot.length {
                ArrayLength::Variable { .. } => variable_count.unwrap_or(0),
                length => length.max_count(),
            };
            *demand.entry(slot.kind).or_default() += count;
        }
        for (kind, count) in &demand {
            let used = pool_entry.allocated.get(kind).copied().unwrap_or(0);
            let capacity = pool_entry.capacity(*kind);
            if used + count > capacity {
                return Err(AshError::Configuration(format!(
                    "descriptor pool cannot hold {count} more {kind:?} descriptors ({used}/{capacity} in use)"
                )));
            }
        }

        let raw = device.allocate_descriptor_set(layout_entry.raw, pool_entry.raw, variable_count)?;

        let pool_entry = &mut self.pools[pool.0];
        pool_entry.allocated_sets += 1;
        for (kind, count) in demand {
            *pool_entry.allocated.entry(kind).or_default() += count;
        }

        self.sets.push(Some(SetEntry {
            raw,
            layout,
            pool,
            variable_count,
            staged: Vec::new(),
            bound: BTreeMap::new(),
            built: false,
        }));
        Ok(SetHandle(self.sets.len() - 1))
    }

    /// Stages a single-element write.
    pub fn write(&mut self, set: SetHandle, binding: u32, resource: BoundResource) -> Result<()> {
        self.write_array(set, binding, [(0, resource)])
    }

    /// Stages writes to individual elements of an array binding. Elements not
    /// written stay unbound.
    pub fn write_array(
        &mut self,
        set: SetHandle,
        binding: u32,
        elements: impl IntoIterator<Item = (u32, BoundResource)>,
    ) -> Result<()> {
        let capacity = self.element_capacity(set, binding)?;
        let entry = self.set_entry_mut(set)?;
        for (element, resource) in elements {
            if element >= capacity {
                return Err(AshError::PreconditionViolated(format!(
                    "element {element} out of range for binding {binding} ({capacity} elements)"
                )));
            }
            entry.staged.push((binding, element, resource));
        }
        Ok(())
    }

    /// Flushes staged writes to the device and marks the set ready for binding.
    pub fn build<D: GpuDevice>(&mut self, device: &mut D, set: SetHandle) -> Result<vk::DescriptorSet> {
        let writes = {
            let layout = self.layout_entry(self.set_entry(set)?.layout)?;
            let entry = self.set_entry(set)?;
            entry
                .staged
                .iter()
                .map(|(binding, element, resource)| {
                    let kind = layout.slot(*binding).map(|slot| slot.kind).ok_or_else(|| {
                        AshError::precondition(format!("binding {binding} missing from layout"))
                    })?;
                    Ok(DescriptorWrite {
                        binding: *binding,
                        first_element: *element,
                        kind,
                        resources: vec![*resource],
                    })
                })
                .collect::<Result<Vec<_>>>()?
        };

        let raw = self.set_entry(set)?.raw;
        if !writes.is_empty() {
            device.update_descriptor_set(raw, &writes)?;
        }

        let entry = self.set_entry_mut(set)?;
        for (binding, element, resource) in entry.staged.drain(..) {
            entry.bound.insert((binding, element), resource);
        }
        entry.built = true;
        Ok(raw)
    }

    /// Points element 0 of `binding` at `resource`. Writing the same resource
    /// again leaves the set unchanged.
    pub fn rewrite<D: GpuDevice>(
        &mut self,
        device: &mut D,
        set: SetHandle,
        binding: u32,
        resource: BoundResource,
    ) -> Result<()> {
        self.rewrite_element(device, set, binding, 0, resource)
    }

    pub fn rewrite_element<D: GpuDevice>(
        &mut self,
        device: &mut D,
        set: SetHandle,
        binding: u32,
        element: u32,
        resource: BoundResource,
    ) -> Result<()> {
        let capacity = self.element_capacity(set, binding)?;
        if element >= capacity {
            return Err(AshError::PreconditionViolated(format!(
                "element {element} out of range for binding {binding} ({capacity} elements)"
            )));
        }
        let entry = self.set_entry(set)?;
        if !entry.built {
            return Err(AshError::precondition("rewrite of a descriptor set that was never built"));
        }
        let kind = self
            .layout_entry(entry.layout)?
            .slot(binding)
            .map(|slot| slot.kind)
            .ok_or_else(|| AshError::precondition(format!("binding {binding} missing from layout")))?;
        let raw = entry.raw;

        device.update_descriptor_set(
            raw,
            &[DescriptorWrite {
                binding,
                first_element: element,
                kind,
                resources: vec![resource],
            }],
        )?;
        self.set_entry_mut(set)?.bound.insert((binding, element), resource);
        Ok(())
    }

    /// Returns every allocation of `pool` to it. Sets allocated from it become invalid.
    pub fn reset_pool<D: GpuDevice>(&mut self, device: &mut D, pool: PoolHandle) -> Result<()> {
        let entry = self
            .pools
            .get_mut(pool.0)
            .ok_or_else(|| AshError::precondition(format!("unknown descriptor pool {pool:?}")))?;
        device.reset_descriptor_pool(entry.raw)?;
        entry.allocated_sets = 0;
        entry.allocated.clear();

        for slot in self.sets.iter_mut() {
            if slot.as_ref().is_some_and(|set| set.pool == pool) {
                *slot = None;
            }
        }
        Ok(())
    }

    pub fn raw_layout(&self, layout: LayoutHandle) -> Result<vk::DescriptorSetLayout> {
        Ok(self.layout_entry(layout)?.raw)
    }

    /// The native handle of a built set.
    pub fn raw_set(&self, set: SetHandle) -> Result<vk::DescriptorSet> {
        let entry = self.set_entry(set)?;
        if !entry.built {
            return Err(AshError::precondition("descriptor set used before it was built"));
        }
        Ok(entry.raw)
    }

    pub fn bound(&self, set: SetHandle, binding: u32, element: u32) -> Option<BoundResource> {
        self.sets
            .get(set.0)?
            .as_ref()?
            .bound
            .get(&(binding, element))
            .copied()
    }

    pub fn variable_count(&self, set: SetHandle) -> Option<u32> {
        self.sets.get(set.0)?.as_ref()?.variable_count
    }

    pub fn is_live(&self, set: SetHandle) -> bool {
        self.sets.get(set.0).is_some_and(Option::is_some)
    }

    fn element_capacity(&self, set: SetHandle, binding: u32) -> Result<u32> {
        let entry = self.set_entry(set)?;
        let slot = self
            .layout_entry(entry.layout)?
            .slot(binding)
            .ok_or_else(|| AshError::precondition(format!("binding {binding} missing from layout")))?;
        Ok(match slot.length {
            ArrayLength::Variable { .. } => entry.variable_count.unwrap_or(0),
            length => length.max_count(),
        })
    }

    fn layout_entry(&self, layout: LayoutHandle) -> Result<&LayoutEntry> {
        self.layouts
            .get(layout.0)
            .ok_or_else(|| AshError::precondition(format!("unknown descriptor layout {layout:?}")))
    }

    fn set_entry(&self, set: SetHandle) -> Result<&SetEntry> {
        self.sets
            .get(set.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| AshError::precondition(format!("descriptor set {set:?} is not live")))
    }

    fn set_entry_mut(&mut self, set: SetHandle) -> Result<&mut SetEntry> {
        self.sets
            .get_mut(set.0)
            .and_then(Option::as_mut)
            .ok_or_else(|| AshError::precondition(format!("descriptor set {set:?} is not live")))
    }
}

fn validate_slots(slots: &[BindingSlot]) -> Result<()> {
    if slots.is_empty() {
        return Err(AshError::configuration("descriptor layout needs at least one binding"));
    }

    let mut seen = Vec::with_capacity(slots.len());
    for slot in slots {
        if seen.contains(&slot.binding) {
            return Err(AshError::Configuration(format!(
                "binding {} declared twice",
                slot.binding
            )));
        }
        if slot.length.max_count() == 0 {
            return Err(AshError::Configuration(format!(
                "binding {} has zero capacity",
                slot.binding
            )));
        }
        seen.push(slot.binding);
    }

    let highest = seen.iter().copied().max().unwrap_or(0);
    let variable: Vec<_> = slots.iter().filter(|slot| slot.length.is_variable()).collect();
    match variable.as_slice() {
        [] => Ok(()),
        [slot] if slot.binding == highest => Ok(()),
        [slot] => Err(AshError::Configuration(format!(
            "runtime-sized binding {} must be the highest binding ({highest})",
            slot.binding
        ))),
        _ => Err(AshError::configuration(
            "a layout may contain only one runtime-sized binding",
        )),
    }
}
