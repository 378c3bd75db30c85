use ash::vk;

use crate::gpu::{GpuDevice, ImageDesc, SampledImage};
use crate::{AshError, Result};

pub const AREA_TEX_WIDTH: u32 = 160;
pub const AREA_TEX_HEIGHT: u32 = 560;
pub const AREA_TEX_PITCH: u32 = AREA_TEX_WIDTH * 2;
pub const AREA_TEX_SIZE: usize = (AREA_TEX_HEIGHT * AREA_TEX_PITCH) as usize;

pub const SEARCH_TEX_WIDTH: u32 = 64;
pub const SEARCH_TEX_HEIGHT: u32 = 16;
pub const SEARCH_TEX_PITCH: u32 = SEARCH_TEX_WIDTH;
pub const SEARCH_TEX_SIZE: usize = (SEARCH_TEX_HEIGHT * SEARCH_TEX_PITCH) as usize;

/// Raw lookup-table texels supplied by the asset side.
#[derive(Clone, Copy, Debug)]
pub struct LookupTables<'a> {
    /// R8G8, 160x560
    pub area: &'a [u8],
    /// R8, 64x16
    pub search: &'a [u8],
}

/// Immutable SMAA area and search textures, uploaded once and never resized.
pub struct LookupTextures {
    area: SampledImage,
    search: SampledImage,
}

impl LookupTextures {
    pub fn upload<D: GpuDevice>(device: &mut D, tables: LookupTables<'_>) -> Result<Self> {
        check_size("area", tables.area.len(), AREA_TEX_SIZE)?;
        check_size("search", tables.search.len(), SEARCH_TEX_SIZE)?;

        let area = upload_one(
            device,
            vk::Extent2D {
                width: AREA_TEX_WIDTH,
                height: AREA_TEX_HEIGHT,
            },
            vk::Format::R8G8_UNORM,
            "smaa-area",
            tables.area,
        )?;
        let search = match upload_one(
            device,
            vk::Extent2D {
                width: SEARCH_TEX_WIDTH,
                height: SEARCH_TEX_HEIGHT,
            },
            vk::Format::R8_UNORM,
            "smaa-search",
            tables.search,
        ) {
            Ok(search) => search,
            Err(err) => {
                device.destroy_image(&area);
                return Err(err);
            }
        };

        log::info!("Uploaded SMAA lookup textures");
        Ok(Self { area, search })
    }

    pub fn area(&self) -> &SampledImage {
        &self.area
    }

    pub fn search(&self) -> &SampledImage {
        &self.search
    }

    pub fn destroy<D: GpuDevice>(&self, device: &mut D) {
        device.destroy_image(&self.area);
        device.destroy_image(&self.search);
    }
}

fn check_size(name: &str, actual: usize, expected: usize) -> Result<()> {
    if actual != expected {
        return Err(AshError::Configuration(format!(
            "{name} lookup texture has {actual} bytes, expected {expected}"
        )));
    }
    Ok(())
}

fn upload_one<D: GpuDevice>(
    device: &mut D,
    extent: vk::Extent2D,
    format: vk::Format,
    label: &'static str,
    texels: &[u8],
) -> Result<SampledImage> {
    let image = device.create_image(&ImageDesc {
        extent,
        format,
        usage: vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
        label,
    })?;
    if let Err(err) = device.upload_image(&image, texels) {
        device.destroy_image(&image);
        return Err(err);
    }
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_sizes() {
        assert_eq!(AREA_TEX_SIZE, 179_200);
        assert_eq!(SEARCH_TEX_SIZE, 1_024);
    }

    #[test]
    fn size_mismatch_is_configuration_error() {
        assert!(check_size("area", AREA_TEX_SIZE, AREA_TEX_SIZE).is_ok());
        assert!(matches!(
            check_size("search", 12, SEARCH_TEX_SIZE),
            Err(AshError::Configuration(_))
        ));
    }
}
