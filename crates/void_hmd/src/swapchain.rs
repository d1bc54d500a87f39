//! Per-view image rings
//!
//! The runtime owns the images and decides which one is handed out next.
//! At most one image may be acquired at a time; acquire and release strictly
//! alternate.

use crate::config::SwapchainConfig;
use crate::error::{HmdError, HmdResult};
use crate::handle::SwapchainHandle;
use crate::runtime::SharedRuntime;
use crate::session::Session;
use crate::system::ConfigurationView;
use crate::types::{SwapchainCreateInfo, SwapchainImage, SwapchainUsageFlags, XrDuration};

pub const GL_SRGB8_ALPHA8: i64 = 0x8C43;
pub const GL_SRGB8: i64 = 0x8C41;
pub const GL_RGBA8: i64 = 0x8058;

/// Built-in format preference, best first
pub const PREFERRED_FORMATS: [i64; 3] = [GL_SRGB8_ALPHA8, GL_SRGB8, GL_RGBA8];

/// Pick a color format from what the runtime supports
pub fn choose_format(supported: &[i64], preferred: Option<i64>) -> Option<i64> {
    preferred
        .into_iter()
        .chain(PREFERRED_FORMATS)
        .find(|f| supported.contains(f))
        .or_else(|| supported.first().copied())
}

pub struct Swapchain {
    runtime: SharedRuntime,
    handle: SwapchainHandle,
    images: Vec<SwapchainImage>,
    width: u32,
    height: u32,
    sample_count: u32,
    format: i64,
    acquired: Option<u32>,
}

impl Swapchain {
    /// Create the ring for one view, sized to the recommendation unless overridden
    pub fn new(
        session: &Session,
        view: &ConfigurationView,
        overrides: &SwapchainConfig,
    ) -> HmdResult<Self> {
        let width = overrides.width.unwrap_or(view.recommended_width);
        let height = overrides.height.unwrap_or(view.recommended_height);
        let sample_count = overrides
            .sample_count
            .unwrap_or(view.recommended_sample_count);

        if width > view.max_width || height > view.max_height {
            log::warn!(
                "View {} swapchain {}x{} exceeds maximum {}x{}",
                view.index,
                width,
                height,
                view.max_width,
                view.max_height
            );
        }
        if sample_count > view.max_sample_count {
            log::warn!(
                "View {} sample count {} exceeds maximum {}",
                view.index,
                sample_count,
                view.max_sample_count
            );
        }

        let format = choose_format(session.swapchain_formats(), overrides.format)
            .ok_or_else(|| HmdError::Runtime("runtime offers no swapchain formats".into()))?;

        let runtime = session.runtime().clone();
        let handle = runtime.create_swapchain(
            session.handle(),
            &SwapchainCreateInfo {
                usage: SwapchainUsageFlags::SAMPLED | SwapchainUsageFlags::COLOR_ATTACHMENT,
                format,
                sample_count,
                width,
                height,
                face_count: 1,
                array_size: 1,
                mip_count: 1,
            },
        )?;

        let images: Vec<SwapchainImage> = runtime
            .enumerate_swapchain_images(handle)?
            .into_iter()
            .enumerate()
            .map(|(index, image)| SwapchainImage {
                index: index as u32,
                image,
            })
            .collect();

        log::info!(
            "Swapchain {} created: {}x{} x{}, format {:#x}, {} images",
            view.index,
            width,
            height,
            sample_count,
            format,
            images.len()
        );

        Ok(Self {
            runtime,
            handle,
            images,
            width,
            height,
            sample_count,
            format,
            acquired: None,
        })
    }

    /// Acquire the runtime's next image and block until it is writable
    pub fn acquire_image_info(&mut self) -> HmdResult<SwapchainImage> {
        if let Some(index) = self.acquired {
            return Err(HmdError::SwapchainState(format!(
                "image {} is still acquired",
                index
            )));
        }

        let index = self.runtime.acquire_swapchain_image(self.handle)?;
        if let Err(e) = self
            .runtime
            .wait_swapchain_image(self.handle, XrDuration::INFINITE)
        {
            self.discard_image(index);
            return Err(e);
        }

        match self.images.get(index as usize) {
            Some(image) => {
                self.acquired = Some(index);
                Ok(*image)
            }
            None => {
                self.discard_image(index);
                Err(HmdError::OutOfRange {
                    what: "swapchain images",
                    index: index as usize,
                    len: self.images.len(),
                })
            }
        }
    }

    /// Return an image that cannot be rendered into
    fn discard_image(&self, index: u32) {
        if let Err(e) = self.runtime.release_swapchain_image(self.handle) {
            log::warn!("Failed to hand back swapchain image {}: {}", index, e);
        }
    }

    /// Hand the acquired image back to the runtime
    pub fn release_image_info(&mut self) -> HmdResult<()> {
        if self.acquired.is_none() {
            return Err(HmdError::SwapchainState(
                "release without a matching acquire".into(),
            ));
        }
        self.runtime.release_swapchain_image(self.handle)?;
        self.acquired = None;
        Ok(())
    }

    pub fn handle(&self) -> SwapchainHandle {
        self.handle
    }

    pub fn images(&self) -> &[SwapchainImage] {
        &self.images
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    pub fn format(&self) -> i64 {
        self.format
    }

    /// Slot currently held by the application
    pub fn acquired_index(&self) -> Option<u32> {
        self.acquired
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        if let Some(index) = self.acquired {
            log::warn!("Destroying swapchain with image {} still acquired", index);
        }
        if let Err(e) = self.runtime.destroy_swapchain(self.handle) {
            log::error!("Failed to destroy swapchain: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_preference() {
        let supported = [GL_RGBA8, GL_SRGB8_ALPHA8, 0x881A];
        assert_eq!(choose_format(&supported, None), Some(GL_SRGB8_ALPHA8));
        assert_eq!(choose_format(&supported, Some(0x881A)), Some(0x881A));
        // Unsupported preference falls through to the built-in order
        assert_eq!(choose_format(&supported, Some(GL_SRGB8)), Some(GL_SRGB8_ALPHA8));
        assert_eq!(choose_format(&[0x881A, 0x8C3A], None), Some(0x881A));
        assert_eq!(choose_format(&[], None), None);
    }
}
