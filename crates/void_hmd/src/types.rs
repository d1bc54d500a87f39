//! Value types exchanged with the XR runtime
//!
//! Poses and field-of-view angles here are always in the runtime's frame:
//! right-handed, +Y up, -Z forward. Conversion to the host engine's convention
//! happens in [`crate::projection`].

use core::fmt;
use core::str::FromStr;

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::error::HmdError;
use crate::handle::{ActionHandle, ActionSetHandle, SessionHandle, SpaceHandle, SwapchainHandle};

/// Runtime timestamp in nanoseconds
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct XrTime(i64);

impl XrTime {
    #[inline]
    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    #[inline]
    pub const fn as_nanos(&self) -> i64 {
        self.0
    }

    /// Seconds as a float, for logging and engine clocks
    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1_000_000_000.0
    }
}

impl core::ops::Add<XrDuration> for XrTime {
    type Output = XrTime;

    fn add(self, rhs: XrDuration) -> XrTime {
        XrTime(self.0.saturating_add(rhs.0))
    }
}

/// Runtime duration in nanoseconds
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct XrDuration(i64);

impl XrDuration {
    /// Wait forever
    pub const INFINITE: Self = Self(i64::MAX);

    #[inline]
    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    #[inline]
    pub const fn as_nanos(&self) -> i64 {
        self.0
    }
}

/// Packed API/application version (16-bit major, 16-bit minor, 32-bit patch)
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "VersionRepr", into = "VersionRepr")]
pub struct Version(u64);

impl Version {
    pub const fn new(major: u16, minor: u16, patch: u32) -> Self {
        Self(((major as u64) << 48) | ((minor as u64) << 32) | patch as u64)
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn into_raw(self) -> u64 {
        self.0
    }

    pub const fn major(&self) -> u16 {
        (self.0 >> 48) as u16
    }

    pub const fn minor(&self) -> u16 {
        (self.0 >> 32) as u16
    }

    pub const fn patch(&self) -> u32 {
        self.0 as u32
    }
}

impl Default for Version {
    fn default() -> Self {
        Self::new(0, 0, 0)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major(), self.minor(), self.patch())
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Version({})", self)
    }
}

#[derive(Serialize, Deserialize)]
struct VersionRepr {
    major: u16,
    #[serde(default)]
    minor: u16,
    #[serde(default)]
    patch: u32,
}

impl From<VersionRepr> for Version {
    fn from(r: VersionRepr) -> Self {
        Version::new(r.major, r.minor, r.patch)
    }
}

impl From<Version> for VersionRepr {
    fn from(v: Version) -> Self {
        VersionRepr {
            major: v.major(),
            minor: v.minor(),
            patch: v.patch(),
        }
    }
}

/// Physical arrangement of the displays
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FormFactor {
    HeadMountedDisplay,
    HandheldDisplay,
}

impl Default for FormFactor {
    fn default() -> Self {
        Self::HeadMountedDisplay
    }
}

/// How many views the runtime expects and how they relate
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ViewConfigurationType {
    PrimaryMono,
    PrimaryStereo,
}

impl Default for ViewConfigurationType {
    fn default() -> Self {
        Self::PrimaryStereo
    }
}

impl fmt::Display for ViewConfigurationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PrimaryMono => write!(f, "PRIMARY_MONO"),
            Self::PrimaryStereo => write!(f, "PRIMARY_STEREO"),
        }
    }
}

/// How submitted layers blend with the physical environment
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentBlendMode {
    Opaque,
    Additive,
    AlphaBlend,
}

impl Default for EnvironmentBlendMode {
    fn default() -> Self {
        Self::Opaque
    }
}

/// Named reference frame
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReferenceSpaceKind {
    /// Head-relative
    View,
    /// Seated, origin at the initial head position
    Local,
    /// Standing, origin on the floor of the play area
    Stage,
}

impl Default for ReferenceSpaceKind {
    fn default() -> Self {
        Self::Stage
    }
}

impl fmt::Display for ReferenceSpaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::View => write!(f, "View"),
            Self::Local => write!(f, "Local"),
            Self::Stage => write!(f, "Stage"),
        }
    }
}

impl FromStr for ReferenceSpaceKind {
    type Err = HmdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "View" => Ok(Self::View),
            "Local" => Ok(Self::Local),
            "Stage" => Ok(Self::Stage),
            other => Err(HmdError::UnknownReferenceSpace(other.to_string())),
        }
    }
}

macro_rules! runtime_flags {
    ($(#[$doc:meta])* $name:ident { $($(#[$fdoc:meta])* $flag:ident = $bit:expr,)* }) => {
        $(#[$doc])*
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
        #[repr(transparent)]
        pub struct $name(u64);

        impl $name {
            $($(#[$fdoc])* pub const $flag: Self = Self($bit);)*

            #[inline]
            pub const fn empty() -> Self {
                Self(0)
            }

            #[inline]
            pub const fn from_bits(bits: u64) -> Self {
                Self(bits)
            }

            #[inline]
            pub const fn bits(&self) -> u64 {
                self.0
            }

            #[inline]
            pub const fn is_empty(&self) -> bool {
                self.0 == 0
            }

            #[inline]
            pub const fn contains(&self, other: Self) -> bool {
                (self.0 & other.0) == other.0
            }

            #[inline]
            pub fn insert(&mut self, other: Self) {
                self.0 |= other.0;
            }

            #[inline]
            pub fn remove(&mut self, other: Self) {
                self.0 &= !other.0;
            }
        }

        impl core::ops::BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }
    };
}

runtime_flags! {
    /// Validity of the poses returned by view location
    ViewStateFlags {
        ORIENTATION_VALID = 1 << 0,
        POSITION_VALID = 1 << 1,
        ORIENTATION_TRACKED = 1 << 2,
        POSITION_TRACKED = 1 << 3,
    }
}

runtime_flags! {
    /// Validity of a located space
    SpaceLocationFlags {
        ORIENTATION_VALID = 1 << 0,
        POSITION_VALID = 1 << 1,
        ORIENTATION_TRACKED = 1 << 2,
        POSITION_TRACKED = 1 << 3,
    }
}

runtime_flags! {
    /// How swapchain images will be used
    SwapchainUsageFlags {
        COLOR_ATTACHMENT = 1 << 0,
        DEPTH_STENCIL_ATTACHMENT = 1 << 1,
        UNORDERED_ACCESS = 1 << 2,
        TRANSFER_SRC = 1 << 3,
        TRANSFER_DST = 1 << 4,
        SAMPLED = 1 << 5,
        MUTABLE_FORMAT = 1 << 6,
    }
}

runtime_flags! {
    /// Severity of a runtime debug message
    DebugSeverity {
        VERBOSE = 0x0001,
        INFO = 0x0010,
        WARNING = 0x0100,
        ERROR = 0x1000,
    }
}

impl ViewStateFlags {
    /// Both position and orientation may be used
    pub const fn pose_valid(&self) -> bool {
        self.contains(Self::POSITION_VALID) && self.contains(Self::ORIENTATION_VALID)
    }
}

impl SpaceLocationFlags {
    /// Both position and orientation may be used
    pub const fn pose_valid(&self) -> bool {
        self.contains(Self::POSITION_VALID) && self.contains(Self::ORIENTATION_VALID)
    }
}

impl DebugSeverity {
    pub const ALL: Self = Self(0x1111);
}

/// Position and orientation in the runtime frame
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Posef {
    pub orientation: Quat,
    pub position: Vec3,
}

impl Posef {
    pub const IDENTITY: Self = Self {
        orientation: Quat::IDENTITY,
        position: Vec3::ZERO,
    };

    pub fn new(position: Vec3, orientation: Quat) -> Self {
        Self {
            orientation,
            position,
        }
    }
}

impl Default for Posef {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Field of view as four edge angles in radians (left and down are negative)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Fovf {
    pub angle_left: f32,
    pub angle_right: f32,
    pub angle_up: f32,
    pub angle_down: f32,
}

impl Fovf {
    pub const fn new(angle_left: f32, angle_right: f32, angle_up: f32, angle_down: f32) -> Self {
        Self {
            angle_left,
            angle_right,
            angle_up,
            angle_down,
        }
    }

    /// Symmetric field of view with the given half angle
    pub fn symmetric(half_angle: f32) -> Self {
        Self::new(-half_angle, half_angle, half_angle, -half_angle)
    }
}

impl Default for Fovf {
    fn default() -> Self {
        Self::symmetric(45.0_f32.to_radians())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Offset2Di {
    pub x: i32,
    pub y: i32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Extent2Di {
    pub width: i32,
    pub height: i32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rect2Di {
    pub offset: Offset2Di,
    pub extent: Extent2Di,
}

impl Rect2Di {
    /// Rectangle at the origin covering `width` x `height`
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            offset: Offset2Di { x: 0, y: 0 },
            extent: Extent2Di {
                width: width as i32,
                height: height as i32,
            },
        }
    }
}

/// Timing handed back by the runtime when a frame may start
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameState {
    pub predicted_display_time: XrTime,
    pub predicted_display_period: XrDuration,
    pub should_render: bool,
}

/// Per-view image size limits reported by the system
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ViewConfigurationView {
    pub recommended_image_rect_width: u32,
    pub max_image_rect_width: u32,
    pub recommended_image_rect_height: u32,
    pub max_image_rect_height: u32,
    pub recommended_swapchain_sample_count: u32,
    pub max_swapchain_sample_count: u32,
}

/// Runtime-assigned system identifier
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SystemId(pub u64);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SystemProperties {
    pub system_id: SystemId,
    pub vendor_id: u32,
    pub system_name: String,
    pub max_swapchain_image_width: u32,
    pub max_swapchain_image_height: u32,
    pub max_layer_count: u32,
    pub orientation_tracking: bool,
    pub position_tracking: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RuntimeProperties {
    pub runtime_name: String,
    pub runtime_version: Version,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtensionProperties {
    pub name: String,
    pub version: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiLayerProperties {
    pub name: String,
    pub spec_version: Version,
    pub layer_version: u32,
    pub description: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApplicationInfo {
    pub application_name: String,
    pub application_version: Version,
    pub engine_name: String,
    pub engine_version: Version,
    pub api_version: Version,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstanceCreateInfo {
    pub application: ApplicationInfo,
    pub enabled_extensions: Vec<String>,
    pub enabled_api_layers: Vec<String>,
    /// Severities forwarded to the debug sink; `None` disables the messenger
    pub debug_severities: Option<DebugSeverity>,
}

/// Graphics API versions the runtime accepts
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GraphicsRequirements {
    pub min_api_version: Version,
    pub max_api_version: Version,
}

impl GraphicsRequirements {
    /// Only major.minor take part in the check
    pub fn accepts(&self, api_version: Version) -> bool {
        let key = |v: Version| (v.major(), v.minor());
        key(api_version) >= key(self.min_api_version)
    }
}

/// Platform graphics context handles. Raw pointers are carried as integers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlatformBinding {
    Xlib {
        x_display: usize,
        visual_id: u32,
        glx_fb_config: usize,
        glx_drawable: u64,
        glx_context: usize,
    },
    Win32 {
        h_dc: usize,
        h_glrc: usize,
    },
    /// No graphics; only accepted by runtimes that support headless sessions
    Headless,
}

impl PlatformBinding {
    pub fn is_supported_on_host(&self) -> bool {
        match self {
            Self::Xlib { .. } => cfg!(target_os = "linux"),
            Self::Win32 { .. } => cfg!(target_os = "windows"),
            Self::Headless => true,
        }
    }
}

/// Opaque graphics binding, created once by the host and never changed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GraphicsBinding {
    pub platform: PlatformBinding,
    /// Graphics API version of the host context
    pub api_version: Version,
}

impl GraphicsBinding {
    pub fn headless() -> Self {
        Self {
            platform: PlatformBinding::Headless,
            api_version: Version::new(4, 5, 0),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainCreateInfo {
    pub usage: SwapchainUsageFlags,
    pub format: i64,
    pub sample_count: u32,
    pub width: u32,
    pub height: u32,
    pub face_count: u32,
    pub array_size: u32,
    pub mip_count: u32,
}

/// One renderable image of a swapchain ring
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainImage {
    /// Slot in the ring
    pub index: u32,
    /// Graphics API object name (an OpenGL texture for the GL binding)
    pub image: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SpaceLocation {
    pub flags: SpaceLocationFlags,
    pub pose: Posef,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ViewLocation {
    pub pose: Posef,
    pub fov: Fovf,
}

/// Interned semantic path such as `/user/hand/left`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct XrPath(pub u64);

impl XrPath {
    pub const NULL: Self = Self(0);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SuggestedBinding {
    pub action: ActionHandle,
    pub binding: XrPath,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActiveActionSet {
    pub action_set: ActionSetHandle,
    /// `XrPath::NULL` activates every subaction path
    pub subaction_path: XrPath,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ActionStatePose {
    pub is_active: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DebugMessage {
    pub severity: DebugSeverity,
    pub function_name: String,
    pub message: String,
}

/// Events drained from the runtime queue
#[derive(Clone, Debug, PartialEq)]
pub enum RuntimeEvent {
    EventsLost {
        lost_event_count: u32,
    },
    InstanceLossPending {
        loss_time: XrTime,
    },
    SessionStateChanged {
        session: SessionHandle,
        state: crate::session::SessionState,
        time: XrTime,
    },
    InteractionProfileChanged {
        session: SessionHandle,
    },
    ReferenceSpaceChangePending {
        session: SessionHandle,
        reference_space: ReferenceSpaceKind,
    },
    /// Event type this crate does not interpret
    Unrecognized {
        type_name: String,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainSubImage {
    pub swapchain: SwapchainHandle,
    pub image_rect: Rect2Di,
    pub image_array_index: u32,
}

/// One eye's contribution to a projection layer
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CompositionLayerProjectionView {
    pub pose: Posef,
    pub fov: Fovf,
    pub sub_image: SwapchainSubImage,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CompositionLayerProjection {
    pub space: SpaceHandle,
    pub views: Vec<CompositionLayerProjectionView>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum CompositionLayer {
    Projection(CompositionLayerProjection),
}

impl CompositionLayer {
    pub fn view_count(&self) -> usize {
        match self {
            Self::Projection(layer) => layer.views.len(),
        }
    }
}

/// Everything handed to the runtime when a frame ends
#[derive(Clone, Debug, PartialEq)]
pub struct FrameSubmission {
    pub display_time: XrTime,
    pub blend_mode: EnvironmentBlendMode,
    pub layers: Vec<CompositionLayer>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_packing() {
        let v = Version::new(1, 2, 3);
        assert_eq!(v.major(), 1);
        assert_eq!(v.minor(), 2);
        assert_eq!(v.patch(), 3);
        assert_eq!(v.to_string(), "1.2.3");
        assert_eq!(Version::from_raw(v.into_raw()), v);
    }

    #[test]
    fn test_reference_space_parse() {
        assert_eq!("Stage".parse::<ReferenceSpaceKind>().unwrap(), ReferenceSpaceKind::Stage);
        assert_eq!("View".parse::<ReferenceSpaceKind>().unwrap(), ReferenceSpaceKind::View);
        assert_eq!("Local".parse::<ReferenceSpaceKind>().unwrap(), ReferenceSpaceKind::Local);
        assert_eq!(
            "Unbounded".parse::<ReferenceSpaceKind>(),
            Err(HmdError::UnknownReferenceSpace("Unbounded".into()))
        );
    }

    #[test]
    fn test_pose_validity_needs_both_bits() {
        assert!(!ViewStateFlags::POSITION_VALID.pose_valid());
        assert!(!ViewStateFlags::ORIENTATION_VALID.pose_valid());
        assert!((ViewStateFlags::POSITION_VALID | ViewStateFlags::ORIENTATION_VALID).pose_valid());

        let tracked_only = SpaceLocationFlags::POSITION_VALID | SpaceLocationFlags::ORIENTATION_TRACKED;
        assert!(!tracked_only.pose_valid());
    }

    #[test]
    fn test_graphics_requirements_ignore_patch() {
        let req = GraphicsRequirements {
            min_api_version: Version::new(4, 3, 7),
            max_api_version: Version::new(4, 6, 0),
        };
        assert!(req.accepts(Version::new(4, 3, 0)));
        assert!(req.accepts(Version::new(4, 6, 0)));
        assert!(!req.accepts(Version::new(3, 3, 0)));
    }
}
