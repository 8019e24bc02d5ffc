//! Core library for the speaker status display.
//!
//! The hub picks one "current" audio source out of several wireless
//! sources, shows what is happening on a small square panel and dims the
//! backlight when nobody is looking. Each module owns one subsystem (source
//! polling, arbitration, scenes, overlays, compositing, backlight, the
//! render loop) and talks to hardware only through the traits in
//! [`display`], [`audio`] and [`source`].

pub mod arbiter;
pub mod assets;
pub mod audio;
pub mod brightness;
pub mod config;
pub mod control;
pub mod display;
pub mod draw;
pub mod error;
pub mod hub;
pub mod overlay;
pub mod render;
pub mod scene;
pub mod source;
pub mod timeline;

pub use arbiter::{Arbitrator, Transition};
pub use assets::{ArtCache, AssetStore, SheetKind, SpriteSheet};
pub use audio::{AudioEvent, AudioEventSource, EventMailbox, Facility, Mixer, SoftMixer};
pub use brightness::{Activity, BrightnessController};
pub use config::HubConfig;
pub use control::{ButtonAction, ButtonHandle};
pub use display::{DisplayProbe, DisplaySink, HeadlessDisplay, SnapshotSettings};
pub use error::{HubError, Result};
pub use hub::{Hub, StopHandle, TickReport};
pub use overlay::{ButtonFeedback, Overlay, OverlayKind, OverlaySpec};
pub use render::Compositor;
pub use scene::{Scene, SceneKind};
pub use source::{PlaybackStatus, SourceBackend, SourceClient, SourceId, SourceInfo, SourceKind};
pub use timeline::{Clock, ManualClock, ScheduledEvent, Scheduler, SystemClock};
