use ash::vk;

use crate::gpu::{ArrayLength, BindingSlot};
use crate::{AshError, Result};

/// Builds a descriptor set layout; runtime-sized slots get the
/// update-after-bind, partially-bound and variable-count flags.
pub struct DescriptorSetLayoutBuilder {
    bindings: Vec<vk::DescriptorSetLayoutBinding<'static>>,
    flags: Vec<vk::DescriptorBindingFlags>,
}

impl Default for DescriptorSetLayoutBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DescriptorSetLayoutBuilder {
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
            flags: Vec::new(),
        }
    }

    pub fn add_binding(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        stage_flags: vk::ShaderStageFlags,
        count: u32,
    ) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding)
                .descriptor_type(descriptor_type)
                .descriptor_count(count)
                .stage_flags(stage_flags),
        );
        self.flags.push(vk::DescriptorBindingFlags::empty());
        self
    }

    pub fn add_variable_binding(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        stage_flags: vk::ShaderStageFlags,
        max_count: u32,
    ) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding)
                .descriptor_type(descriptor_type)
                .descriptor_count(max_count)
                .stage_flags(stage_flags),
        );
        self.flags.push(
            vk::DescriptorBindingFlags::UPDATE_AFTER_BIND
                | vk::DescriptorBindingFlags::PARTIALLY_BOUND
                | vk::DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT,
        );
        self
    }

    pub fn add_slot(self, slot: &BindingSlot) -> Self {
        match slot.length {
            ArrayLength::Variable { max } => {
                self.add_variable_binding(slot.binding, slot.kind, slot.stages, max)
            }
            length => self.add_binding(slot.binding, slot.kind, slot.stages, length.max_count()),
        }
    }

    pub fn from_slots(slots: &[BindingSlot]) -> Self {
        slots.iter().fold(Self::new(), |builder, slot| builder.add_slot(slot))
    }

    fn has_variable_binding(&self) -> bool {
        self.flags
            .iter()
            .any(|flags| flags.contains(vk::DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT))
    }

    pub fn build(self, device: &ash::Device) -> Result<vk::DescriptorSetLayout> {
        let mut flags_info =
            vk::DescriptorSetLayoutBindingFlagsCreateInfo::default().binding_flags(&self.flags);

        let mut create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&self.bindings);
        if self.has_variable_binding() {
            create_info = create_info
                .flags(vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL)
                .push_next(&mut flags_info);
        }

        unsafe {
            device
                .create_descriptor_set_layout(&create_info, None)
                .map_err(|e| {
                    AshError::VulkanError(format!("Failed to create descriptor set layout: {e}"))
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_variable_slots_get_bindless_flags() {
        let builder = DescriptorSetLayoutBuilder::from_slots(&[
            BindingSlot::single(
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
                vk::ShaderStageFlags::VERTEX,
            ),
            BindingSlot::variable(
                1,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                vk::ShaderStageFlags::FRAGMENT,
                64,
            ),
        ]);

        assert_eq!(builder.bindings.len(), 2);
        assert_eq!(builder.bindings[1].descriptor_count, 64);
        assert!(builder.flags[0].is_empty());
        assert!(builder.flags[1].contains(vk::DescriptorBindingFlags::PARTIALLY_BOUND));
        assert!(builder.has_variable_binding());
    }

    #[test]
    fn fixed_layouts_need_no_update_after_bind_pool() {
        let builder = DescriptorSetLayoutBuilder::new().add_binding(
            0,
            vk::DescriptorType::INPUT_ATTACHMENT,
            vk::ShaderStageFlags::FRAGMENT,
            1,
        );
        assert!(!builder.has_variable_binding());
    }
}
