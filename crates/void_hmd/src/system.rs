//! Device capability query and validation

use crate::error::{HmdError, HmdResult};
use crate::instance::Instance;
use crate::types::{
    EnvironmentBlendMode, FormFactor, GraphicsRequirements, SystemId, SystemProperties, Version,
    ViewConfigurationType, ViewConfigurationView,
};

/// Size limits for one view of the chosen configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigurationView {
    pub index: usize,
    pub recommended_width: u32,
    pub recommended_height: u32,
    pub recommended_sample_count: u32,
    pub max_width: u32,
    pub max_height: u32,
    pub max_sample_count: u32,
}

impl ConfigurationView {
    fn from_runtime(index: usize, view: &ViewConfigurationView) -> Self {
        Self {
            index,
            recommended_width: view.recommended_image_rect_width,
            recommended_height: view.recommended_image_rect_height,
            recommended_sample_count: view.recommended_swapchain_sample_count,
            max_width: view.max_image_rect_width,
            max_height: view.max_image_rect_height,
            max_sample_count: view.max_swapchain_sample_count,
        }
    }
}

/// The headset selected for the instance
pub struct System {
    id: SystemId,
    form_factor: FormFactor,
    view_configuration: ViewConfigurationType,
    properties: SystemProperties,
    views: Vec<ConfigurationView>,
    blend_modes: Vec<EnvironmentBlendMode>,
    graphics_requirements: GraphicsRequirements,
}

impl System {
    pub fn new(
        instance: &Instance,
        form_factor: FormFactor,
        view_configuration: ViewConfigurationType,
        graphics_api_version: Version,
    ) -> HmdResult<Self> {
        let runtime = instance.runtime();
        let handle = instance.handle();

        let id = runtime.get_system(handle, form_factor)?;
        let properties = runtime.system_properties(handle, id)?;
        log::info!(
            "XR System: {} (vendor {:#x})",
            properties.system_name,
            properties.vendor_id
        );
        log::info!(
            "  Max swapchain: {}x{}, max layers: {}",
            properties.max_swapchain_image_width,
            properties.max_swapchain_image_height,
            properties.max_layer_count
        );
        log::info!(
            "  Tracking: orientation={}, position={}",
            properties.orientation_tracking,
            properties.position_tracking
        );

        let configurations = runtime.enumerate_view_configurations(handle, id)?;
        let mut selected = None;
        let mut blend_modes = Vec::new();
        for config_type in &configurations {
            let views = runtime.enumerate_view_configuration_views(handle, id, *config_type)?;
            log::info!("View configuration {} ({} views)", config_type, views.len());
            if views.is_empty() {
                log::error!("  Runtime reported no views for {}", config_type);
            }
            for (i, view) in views.iter().enumerate() {
                log::info!(
                    "  [{}] recommended {}x{} x{}, max {}x{} x{}",
                    i,
                    view.recommended_image_rect_width,
                    view.recommended_image_rect_height,
                    view.recommended_swapchain_sample_count,
                    view.max_image_rect_width,
                    view.max_image_rect_height,
                    view.max_swapchain_sample_count
                );
            }

            let modes = runtime.enumerate_environment_blend_modes(handle, id, *config_type)?;
            log::info!("  Blend modes: {:?}", modes);

            if *config_type == view_configuration {
                selected = Some(views);
                blend_modes = modes;
            }
        }

        let views = selected.ok_or_else(|| {
            HmdError::ViewConfigurationUnsupported(view_configuration.to_string())
        })?;
        if views.is_empty() {
            return Err(HmdError::EmptyViewConfiguration(
                view_configuration.to_string(),
            ));
        }

        let graphics_requirements = runtime.graphics_requirements(handle, id)?;
        log::info!(
            "Graphics API: host {}, runtime requires {} - {}",
            graphics_api_version,
            graphics_requirements.min_api_version,
            graphics_requirements.max_api_version
        );
        if !graphics_requirements.accepts(graphics_api_version) {
            return Err(HmdError::GraphicsRequirements(format!(
                "host API {} is older than the required {}",
                graphics_api_version, graphics_requirements.min_api_version
            )));
        }

        Ok(Self {
            id,
            form_factor,
            view_configuration,
            properties,
            views: views
                .iter()
                .enumerate()
                .map(|(i, v)| ConfigurationView::from_runtime(i, v))
                .collect(),
            blend_modes,
            graphics_requirements,
        })
    }

    pub fn id(&self) -> SystemId {
        self.id
    }

    pub fn form_factor(&self) -> FormFactor {
        self.form_factor
    }

    pub fn view_configuration(&self) -> ViewConfigurationType {
        self.view_configuration
    }

    pub fn properties(&self) -> &SystemProperties {
        &self.properties
    }

    pub fn views(&self) -> &[ConfigurationView] {
        &self.views
    }

    pub fn view_count(&self) -> usize {
        self.views.len()
    }

    pub fn blend_modes(&self) -> &[EnvironmentBlendMode] {
        &self.blend_modes
    }

    pub fn supports_blend_mode(&self, mode: EnvironmentBlendMode) -> bool {
        self.blend_modes.contains(&mode)
    }

    pub fn graphics_requirements(&self) -> &GraphicsRequirements {
        &self.graphics_requirements
    }
}
