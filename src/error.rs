use ash::vk;
use thiserror::Error;

/// Errors surfaced by the frame orchestration core and its Vulkan adapter.
#[derive(Debug, Error)]
pub enum AshError {
    /// Invalid setup: capacity exceeded, bad layout declaration, malformed lookup data.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The presentable surface no longer matches the window and must be recreated.
    #[error("Swapchain out of date: {0}")]
    SwapchainOutOfDate(String),

    #[error("Surface lost: {0}")]
    SurfaceLost(String),

    /// A programming error inside the frame sequence (pass order, missing inputs, overflow).
    #[error("Precondition violated: {0}")]
    PreconditionViolated(String),

    #[error("Vulkan error: {0}")]
    VulkanError(String),

    #[error("Vulkan call failed: {0}")]
    Vk(#[from] vk::Result),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AshError {
    /// True for the failures the orchestrator answers with a single surface recreation.
    pub fn is_surface_loss(&self) -> bool {
        matches!(
            self,
            AshError::SwapchainOutOfDate(_)
                | AshError::SurfaceLost(_)
                | AshError::Vk(vk::Result::ERROR_OUT_OF_DATE_KHR)
                | AshError::Vk(vk::Result::ERROR_SURFACE_LOST_KHR)
        )
    }

    pub(crate) fn precondition(message: impl Into<String>) -> Self {
        AshError::PreconditionViolated(message.into())
    }

    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        AshError::Configuration(message.into())
    }
}

pub type Result<T> = std::result::Result<T, AshError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surface_loss_classification() {
        assert!(AshError::SwapchainOutOfDate("acquire".into()).is_surface_loss());
        assert!(AshError::SurfaceLost("present".into()).is_surface_loss());
        assert!(AshError::from(vk::Result::ERROR_OUT_OF_DATE_KHR).is_surface_loss());
        assert!(AshError::from(vk::Result::ERROR_SURFACE_LOST_KHR).is_surface_loss());

        assert!(!AshError::from(vk::Result::ERROR_DEVICE_LOST).is_surface_loss());
        assert!(!AshError::configuration("too many textures").is_surface_loss());
        assert!(!AshError::precondition("pass order").is_surface_loss());
    }

    #[test]
    fn messages_carry_context() {
        let err = AshError::configuration("texture array 'albedo' is full (64)");
        assert_eq!(
            err.to_string(),
            "Configuration error: texture array 'albedo' is full (64)"
        );
    }
}
