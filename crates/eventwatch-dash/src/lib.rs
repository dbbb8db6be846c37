//! Live dashboard controller for the video event-detection service.

pub mod api;
pub mod console;
pub mod control;
pub mod core;
pub mod media;
pub mod mode;
pub mod reconciler;
pub mod sources;
pub mod view;
